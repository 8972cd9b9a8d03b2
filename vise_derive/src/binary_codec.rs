//! Derive macro for binary serialization.
//!
//! Generates `Encode` and `Decode` implementations (see `vise::encoding`) for
//! structs and enums. Fields are serialized in declaration order; enums carry
//! a one-byte discriminant before the variant's fields.

use proc_macro::TokenStream;
use quote::quote;
use syn::{parse_macro_input, Data, DataEnum, DeriveInput, Fields};

/// Derives `Encode` and `Decode` for a type.
///
/// ```ignore
/// use vise_derive::BinaryCodec;
///
/// #[derive(BinaryCodec)]
/// pub struct Snapshot {
///     pub flags: Vec<u8>,
///     pub stack: Vec<String>,
/// }
/// ```
pub fn derive_binary_codec(input: TokenStream) -> TokenStream {
    let input = parse_macro_input!(input as DeriveInput);
    let name = &input.ident;
    let (impl_generics, ty_generics, where_clause) = input.generics.split_for_impl();

    let expanded = match &input.data {
        Data::Struct(data_struct) => match &data_struct.fields {
            Fields::Named(fields) => {
                named_struct_impl(name, &impl_generics, &ty_generics, where_clause, fields)
            }
            Fields::Unnamed(fields) => {
                tuple_struct_impl(name, &impl_generics, &ty_generics, where_clause, fields)
            }
            Fields::Unit => unit_struct_impl(name, &impl_generics, &ty_generics, where_clause),
        },
        Data::Enum(data_enum) => {
            enum_impl(name, &impl_generics, &ty_generics, where_clause, data_enum)
        }
        Data::Union(_) => {
            syn::Error::new_spanned(&input, "BinaryCodec derive does not support unions")
                .to_compile_error()
        }
    };

    TokenStream::from(expanded)
}

fn named_struct_impl(
    name: &syn::Ident,
    impl_generics: &syn::ImplGenerics,
    ty_generics: &syn::TypeGenerics,
    where_clause: Option<&syn::WhereClause>,
    fields: &syn::FieldsNamed,
) -> proc_macro2::TokenStream {
    let field_names: Vec<_> = fields.named.iter().map(|f| &f.ident).collect();

    let encode_fields = field_names.iter().map(|name| {
        quote! {
            crate::encoding::Encode::encode(&self.#name, out);
        }
    });

    let decode_fields = field_names.iter().map(|name| {
        quote! {
            #name: crate::encoding::Decode::decode(input)?,
        }
    });

    quote! {
        impl #impl_generics crate::encoding::Encode for #name #ty_generics #where_clause {
            fn encode<S: crate::encoding::EncodeSink>(&self, out: &mut S) {
                #(#encode_fields)*
            }
        }

        impl #impl_generics crate::encoding::Decode for #name #ty_generics #where_clause {
            fn decode(input: &mut &[u8]) -> ::std::result::Result<Self, crate::encoding::DecodeError> {
                Ok(Self {
                    #(#decode_fields)*
                })
            }
        }
    }
}

fn tuple_struct_impl(
    name: &syn::Ident,
    impl_generics: &syn::ImplGenerics,
    ty_generics: &syn::TypeGenerics,
    where_clause: Option<&syn::WhereClause>,
    fields: &syn::FieldsUnnamed,
) -> proc_macro2::TokenStream {
    let field_indices: Vec<_> = (0..fields.unnamed.len()).map(syn::Index::from).collect();

    let encode_fields = field_indices.iter().map(|idx| {
        quote! {
            crate::encoding::Encode::encode(&self.#idx, out);
        }
    });

    let decode_fields = field_indices.iter().map(|_| {
        quote! {
            crate::encoding::Decode::decode(input)?,
        }
    });

    quote! {
        impl #impl_generics crate::encoding::Encode for #name #ty_generics #where_clause {
            fn encode<S: crate::encoding::EncodeSink>(&self, out: &mut S) {
                #(#encode_fields)*
            }
        }

        impl #impl_generics crate::encoding::Decode for #name #ty_generics #where_clause {
            fn decode(input: &mut &[u8]) -> ::std::result::Result<Self, crate::encoding::DecodeError> {
                Ok(Self(
                    #(#decode_fields)*
                ))
            }
        }
    }
}

fn unit_struct_impl(
    name: &syn::Ident,
    impl_generics: &syn::ImplGenerics,
    ty_generics: &syn::TypeGenerics,
    where_clause: Option<&syn::WhereClause>,
) -> proc_macro2::TokenStream {
    quote! {
        impl #impl_generics crate::encoding::Encode for #name #ty_generics #where_clause {
            fn encode<S: crate::encoding::EncodeSink>(&self, _out: &mut S) {}
        }

        impl #impl_generics crate::encoding::Decode for #name #ty_generics #where_clause {
            fn decode(_input: &mut &[u8]) -> ::std::result::Result<Self, crate::encoding::DecodeError> {
                Ok(Self)
            }
        }
    }
}

/// Enums encode a u8 discriminant (declaration order, or the explicit value
/// when one is given) followed by the variant's fields.
fn enum_impl(
    name: &syn::Ident,
    impl_generics: &syn::ImplGenerics,
    ty_generics: &syn::TypeGenerics,
    where_clause: Option<&syn::WhereClause>,
    data_enum: &DataEnum,
) -> proc_macro2::TokenStream {
    let discriminants = compute_discriminants(data_enum);

    let encode_arms =
        data_enum
            .variants
            .iter()
            .zip(discriminants.iter())
            .map(|(variant, &idx)| {
                let variant_name = &variant.ident;

                match &variant.fields {
                    Fields::Unit => {
                        quote! {
                            Self::#variant_name => {
                                crate::encoding::Encode::encode(&#idx, out);
                            }
                        }
                    }
                    Fields::Unnamed(fields) => {
                        let field_names: Vec<_> = (0..fields.unnamed.len())
                            .map(|i| quote::format_ident!("f{}", i))
                            .collect();
                        let encode_fields = field_names.iter().map(|f| {
                            quote! { crate::encoding::Encode::encode(#f, out); }
                        });
                        quote! {
                            Self::#variant_name(#(#field_names),*) => {
                                crate::encoding::Encode::encode(&#idx, out);
                                #(#encode_fields)*
                            }
                        }
                    }
                    Fields::Named(fields) => {
                        let field_names: Vec<_> = fields.named.iter().map(|f| &f.ident).collect();
                        let encode_fields = field_names.iter().map(|f| {
                            quote! { crate::encoding::Encode::encode(#f, out); }
                        });
                        quote! {
                            Self::#variant_name { #(#field_names),* } => {
                                crate::encoding::Encode::encode(&#idx, out);
                                #(#encode_fields)*
                            }
                        }
                    }
                }
            });

    let decode_arms =
        data_enum
            .variants
            .iter()
            .zip(discriminants.iter())
            .map(|(variant, &idx)| {
                let variant_name = &variant.ident;

                match &variant.fields {
                    Fields::Unit => {
                        quote! {
                            #idx => Ok(Self::#variant_name),
                        }
                    }
                    Fields::Unnamed(fields) => {
                        let decode_fields = (0..fields.unnamed.len()).map(|_| {
                            quote! { crate::encoding::Decode::decode(input)?, }
                        });
                        quote! {
                            #idx => Ok(Self::#variant_name(#(#decode_fields)*)),
                        }
                    }
                    Fields::Named(fields) => {
                        let decode_fields = fields.named.iter().map(|f| {
                            let field_name = &f.ident;
                            quote! { #field_name: crate::encoding::Decode::decode(input)?, }
                        });
                        quote! {
                            #idx => Ok(Self::#variant_name { #(#decode_fields)* }),
                        }
                    }
                }
            });

    quote! {
        impl #impl_generics crate::encoding::Encode for #name #ty_generics #where_clause {
            fn encode<S: crate::encoding::EncodeSink>(&self, out: &mut S) {
                match self {
                    #(#encode_arms)*
                }
            }
        }

        impl #impl_generics crate::encoding::Decode for #name #ty_generics #where_clause {
            fn decode(input: &mut &[u8]) -> ::std::result::Result<Self, crate::encoding::DecodeError> {
                let variant_idx: u8 = crate::encoding::Decode::decode(input)?;
                match variant_idx {
                    #(#decode_arms)*
                    _ => Err(crate::encoding::DecodeError::InvalidValue),
                }
            }
        }
    }
}

/// Assigns discriminants following Rust's own rules: explicit values are
/// honored, everything else increments from the previous variant.
fn compute_discriminants(data_enum: &DataEnum) -> Vec<u8> {
    let mut discriminants = Vec::with_capacity(data_enum.variants.len());
    let mut next: u8 = 0;

    for variant in &data_enum.variants {
        let discriminant = if let Some((_, expr)) = &variant.discriminant {
            parse_discriminant_expr(expr)
        } else {
            next
        };

        discriminants.push(discriminant);
        next = discriminant.wrapping_add(1);
    }

    discriminants
}

/// Extracts a u8 from an explicit discriminant expression.
fn parse_discriminant_expr(expr: &syn::Expr) -> u8 {
    match expr {
        syn::Expr::Lit(expr_lit) => match &expr_lit.lit {
            syn::Lit::Int(lit_int) => lit_int
                .base10_parse::<u8>()
                .expect("discriminant must be a valid u8"),
            _ => panic!("discriminant must be an integer literal"),
        },
        _ => panic!("discriminant must be a simple integer literal"),
    }
}
