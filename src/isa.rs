//! Instruction set definitions.
//!
//! The [`for_each_opcode!`](crate::for_each_opcode) macro holds the one
//! authoritative opcode list and invokes a callback macro for code
//! generation, so every opcode-derived table (mnemonic lookup, numeric
//! decoding, operand shapes) comes from the same source.
//!
//! Opcode indices are stable: new opcodes append to the list, existing
//! indices are never reassigned.
//!
//! # Bytecode Format
//!
//! Instructions use variable-length encoding, big-endian throughout:
//! - Opcode: 2 bytes
//! - Symbol: 1 length byte, then that many bytes of UTF-8
//! - Size: 1 width byte (1-4), then that many big-endian value bytes
//! - Literal: 1 length byte, then that many bytes
//! - Signal flag: 1 byte, 0x00 or 0x01

use crate::errors::EngineError;

/// Invokes a callback macro with the complete opcode definition list.
#[macro_export]
macro_rules! for_each_opcode {
    ($callback:ident) => {
        $callback! {
            /// BACK ; pop one navigation frame and return to the previous symbol
            Back = 0, "BACK" => None,
            /// CATCH sym bit val ; jump to sym when flag bit equals val
            Catch = 1, "CATCH" => Sig,
            /// CROAK sym bit val ; abort the session when flag bit equals val
            Croak = 2, "CROAK" => Sig,
            /// LOAD sym size ; invoke external sym and cache the result
            Load = 3, "LOAD" => Sized,
            /// RELOAD sym ; re-invoke external sym, refreshing the cached value
            Reload = 4, "RELOAD" => Single,
            /// MAP sym ; expose cached sym to the renderer for this frame
            Map = 5, "MAP" => Single,
            /// MOVE sym ; push the current symbol and continue at sym
            Move = 6, "MOVE" => Single,
            /// HALT ; suspend until the host supplies input
            Halt = 7, "HALT" => None,
            /// INCMP sel sym ; move to sym when the pending input equals sel
            Incmp = 8, "INCMP" => Double,
            /// MOUT sel "label" ; add a menu entry for selector sel
            Mout = 9, "MOUT" => Display,
            /// MNEXT sel "label" ; define the forward paging entry
            Mnext = 10, "MNEXT" => Display,
            /// MPREV sel "label" ; define the backward paging entry
            Mprev = 11, "MPREV" => Display,
        }
    };
}

#[macro_export]
macro_rules! define_opcodes {
    (
        $(
            $(#[$doc:meta])*
            $name:ident = $index:expr, $mnemonic:literal => $shape:ident
        ),* $(,)?
    ) => {
        /// Operand shape attached to an opcode.
        #[derive(Copy, Clone, Debug, Eq, PartialEq)]
        pub enum ArgKind {
            /// No payload.
            None,
            /// One symbol.
            Single,
            /// Two symbols.
            Double,
            /// Symbol plus a 32-bit size.
            Sized,
            /// Symbol, 32-bit size, one-bit signal value.
            Sig,
            /// Symbol plus a quoted literal.
            Display,
        }

        impl ArgKind {
            /// Shape name as it appears in diagnostics.
            pub const fn name(&self) -> &'static str {
                match self {
                    ArgKind::None => "None",
                    ArgKind::Single => "Single",
                    ArgKind::Double => "Double",
                    ArgKind::Sized => "Sized",
                    ArgKind::Sig => "Sig",
                    ArgKind::Display => "Display",
                }
            }
        }

        #[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
        pub enum Opcode {
            $(
                $(#[$doc])*
                $name = $index,
            )*
        }

        impl Opcode {
            /// Returns the assembly mnemonic for this opcode.
            pub const fn mnemonic(&self) -> &'static str {
                match self {
                    $( Opcode::$name => $mnemonic, )*
                }
            }

            /// Returns the operand shape this opcode declares.
            pub const fn arg_kind(&self) -> ArgKind {
                match self {
                    $( Opcode::$name => ArgKind::$shape, )*
                }
            }

            /// Resolves a mnemonic to its opcode, if it exists.
            pub fn from_mnemonic(name: &str) -> Option<Opcode> {
                match name {
                    $( $mnemonic => Some(Opcode::$name), )*
                    _ => None,
                }
            }
        }

        impl TryFrom<u16> for Opcode {
            type Error = EngineError;

            fn try_from(value: u16) -> Result<Self, Self::Error> {
                match value {
                    $( $index => Ok(Opcode::$name), )*
                    _ => Err(EngineError::UnknownOpcode {
                        opcode: value,
                        offset: 0,
                    }),
                }
            }
        }
    };
}

for_each_opcode!(define_opcodes);
