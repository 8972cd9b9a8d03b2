//! Assembly language parser and bytecode encoder.
//!
//! Converts menu-flow assembly source into the binary instruction stream the
//! interpreter executes. Source is line-oriented: each non-blank,
//! non-comment line is one instruction.
//!
//! # Syntax
//!
//! ```text
//! MNEMONIC operand...  # optional comment
//! ```
//!
//! - Mnemonics are uppercase and start the line (e.g. `MOVE`, `INCMP`)
//! - Symbols match `[A-Za-z_][A-Za-z0-9_]+` (at least two characters)
//! - Sizes are decimal integers
//! - Display literals are quoted with `"` or `'`
//! - Comments start with `#`
//!
//! Operand alternatives are tried most specific first: Display, Sig, Sized,
//! Double, Single, then no operand. The parsed shape must match the shape
//! the mnemonic declares in the opcode registry.

use crate::errors::EngineError;
use crate::isa::{ArgKind, Opcode};
use std::fs;
use std::io::{self, Write};
use std::path::Path;

/// Maximum serialized length of a symbol or display literal.
pub const FIELD_MAX: usize = 255;
/// Minimum length of a symbol identifier.
pub const SYM_MIN: usize = 2;

/// Operand payload attached to one instruction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Operand {
    /// No payload.
    None,
    /// One symbol.
    Single { sym: String },
    /// Two symbols.
    Double { sym_a: String, sym_b: String },
    /// Symbol plus an unsigned 32-bit size.
    Sized { sym: String, size: u32 },
    /// Symbol, size, and a one-bit signal value.
    Sig { sym: String, size: u32, flag: u8 },
    /// Symbol plus a quoted literal.
    Display { sym: String, literal: String },
}

impl Operand {
    /// Returns the shape tag of this operand.
    pub fn kind(&self) -> ArgKind {
        match self {
            Operand::None => ArgKind::None,
            Operand::Single { .. } => ArgKind::Single,
            Operand::Double { .. } => ArgKind::Double,
            Operand::Sized { .. } => ArgKind::Sized,
            Operand::Sig { .. } => ArgKind::Sig,
            Operand::Display { .. } => ArgKind::Display,
        }
    }
}

/// One parsed instruction: an opcode and its operand.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Instruction {
    pub opcode: Opcode,
    pub operand: Operand,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TokenKind {
    /// Uppercase mnemonic at the start of a line.
    Ident,
    /// Run of decimal digits.
    Size,
    /// Symbol identifier.
    Sym,
    /// A single `"` or `'`.
    Quote,
    /// Verbatim text between two quotes, whitespace preserved.
    Literal,
}

#[derive(Debug, Clone)]
struct Token<'a> {
    kind: TokenKind,
    text: &'a str,
    /// 1-based column offset in the line.
    col: usize,
}

/// Tokenizes a single line.
///
/// Whitespace and comments are discarded here; quoted literals are captured
/// verbatim between their `Quote` tokens. Any byte that fits no token class
/// is a lex error naming line and column.
fn tokenize(line_no: usize, line: &str) -> Result<Vec<Token<'_>>, EngineError> {
    let mut out = Vec::with_capacity(8);
    let bytes = line.as_bytes();
    let mut i = 0;

    while i < bytes.len() {
        let b = bytes[i];
        match b {
            b'#' => break,
            b' ' | b'\t' | b'\r' => {
                i += 1;
            }
            b'"' | b'\'' => {
                out.push(Token {
                    kind: TokenKind::Quote,
                    text: &line[i..i + 1],
                    col: i + 1,
                });
                let start = i + 1;
                let mut j = start;
                while j < bytes.len() && bytes[j] != b {
                    j += 1;
                }
                if j >= bytes.len() {
                    return Err(EngineError::UnterminatedLiteral { line: line_no });
                }
                out.push(Token {
                    kind: TokenKind::Literal,
                    text: &line[start..j],
                    col: start + 1,
                });
                out.push(Token {
                    kind: TokenKind::Quote,
                    text: &line[j..j + 1],
                    col: j + 1,
                });
                i = j + 1;
            }
            b'0'..=b'9' => {
                let start = i;
                while i < bytes.len() && bytes[i].is_ascii_digit() {
                    i += 1;
                }
                out.push(Token {
                    kind: TokenKind::Size,
                    text: &line[start..i],
                    col: start + 1,
                });
            }
            b'_' | b'a'..=b'z' | b'A'..=b'Z' => {
                let start = i;
                while i < bytes.len()
                    && (bytes[i] == b'_' || bytes[i].is_ascii_alphanumeric())
                {
                    i += 1;
                }
                let text = &line[start..i];
                let kind = if out.is_empty() && text.bytes().all(|c| c.is_ascii_uppercase()) {
                    TokenKind::Ident
                } else if text.len() >= SYM_MIN {
                    TokenKind::Sym
                } else {
                    return Err(EngineError::Lex {
                        line: line_no,
                        col: start + 1,
                        found: line[start..].chars().next().unwrap_or(' '),
                    });
                };
                out.push(Token {
                    kind,
                    text,
                    col: start + 1,
                });
            }
            _ => {
                return Err(EngineError::Lex {
                    line: line_no,
                    col: i + 1,
                    found: line[i..].chars().next().unwrap_or(' '),
                });
            }
        }
    }

    Ok(out)
}

/// Parses a decimal size operand, enforcing the 32-bit bound.
fn parse_size(line_no: usize, tok: &Token) -> Result<u32, EngineError> {
    let value: u64 = tok.text.parse().map_err(|_| EngineError::Parse {
        line: line_no,
        message: format!("bad size '{}'", tok.text),
    })?;
    u32::try_from(value).map_err(|_| EngineError::SizeOverflow { value })
}

/// Parses the one-bit signal value of a Sig operand. Only 0 and 1 are legal.
fn parse_signal(line_no: usize, tok: &Token) -> Result<u8, EngineError> {
    let value: u64 = tok.text.parse().map_err(|_| EngineError::Parse {
        line: line_no,
        message: format!("bad signal value '{}'", tok.text),
    })?;
    match value {
        0 | 1 => Ok(value as u8),
        _ => Err(EngineError::InvalidSignal {
            line: line_no,
            value,
        }),
    }
}

/// Matches the operand tokens of one line against the operand shapes,
/// most specific alternative first.
fn parse_operand(line_no: usize, toks: &[Token]) -> Result<Operand, EngineError> {
    use TokenKind::*;

    let kinds: Vec<TokenKind> = toks.iter().map(|t| t.kind).collect();
    match kinds.as_slice() {
        [Sym, Quote, Literal, Quote] => {
            if toks[2].text.is_empty() {
                return Err(EngineError::Parse {
                    line: line_no,
                    message: "empty literal".to_string(),
                });
            }
            Ok(Operand::Display {
                sym: toks[0].text.to_string(),
                literal: toks[2].text.to_string(),
            })
        }
        [Sym, Size, Size] => Ok(Operand::Sig {
            sym: toks[0].text.to_string(),
            size: parse_size(line_no, &toks[1])?,
            flag: parse_signal(line_no, &toks[2])?,
        }),
        [Sym, Size] => Ok(Operand::Sized {
            sym: toks[0].text.to_string(),
            size: parse_size(line_no, &toks[1])?,
        }),
        [Sym, Sym] => Ok(Operand::Double {
            sym_a: toks[0].text.to_string(),
            sym_b: toks[1].text.to_string(),
        }),
        [Sym] => Ok(Operand::Single {
            sym: toks[0].text.to_string(),
        }),
        [] => Ok(Operand::None),
        _ => Err(EngineError::Parse {
            line: line_no,
            message: "operands fit no shape".to_string(),
        }),
    }
}

/// Parses one line into an instruction, or `None` for blank/comment lines.
fn parse_line(line_no: usize, line: &str) -> Result<Option<Instruction>, EngineError> {
    let toks = tokenize(line_no, line)?;
    if toks.is_empty() {
        return Ok(None);
    }

    if toks[0].kind != TokenKind::Ident {
        return Err(EngineError::Parse {
            line: line_no,
            message: format!("expected mnemonic, got '{}'", toks[0].text),
        });
    }

    let opcode =
        Opcode::from_mnemonic(toks[0].text).ok_or_else(|| EngineError::UnknownMnemonic {
            line: line_no,
            name: toks[0].text.to_string(),
        })?;

    let operand = parse_operand(line_no, &toks[1..])?;
    if operand.kind() != opcode.arg_kind() {
        return Err(EngineError::ShapeMismatch {
            line: line_no,
            mnemonic: opcode.mnemonic(),
            expected: opcode.arg_kind().name(),
            actual: operand.kind().name(),
        });
    }

    Ok(Some(Instruction { opcode, operand }))
}

/// Parses full source text into an instruction list.
pub fn parse_program(source: &str) -> Result<Vec<Instruction>, EngineError> {
    let mut program = Vec::new();
    for (idx, line) in source.lines().enumerate() {
        if let Some(instr) = parse_line(idx + 1, line)? {
            program.push(instr);
        }
    }
    Ok(program)
}

fn sink_err(err: io::Error) -> EngineError {
    EngineError::Sink {
        message: err.to_string(),
    }
}

/// Returns the smallest width in 1..=4 able to hold `n`.
fn num_size(n: u32) -> usize {
    match n {
        0..=0xFF => 1,
        0x100..=0xFFFF => 2,
        0x1_0000..=0xFF_FFFF => 3,
        _ => 4,
    }
}

fn write_opcode(op: Opcode, out: &mut Vec<u8>) {
    out.extend_from_slice(&(op as u16).to_be_bytes());
}

fn write_sym(sym: &str, out: &mut Vec<u8>) -> Result<(), EngineError> {
    let len = sym.len();
    if len > FIELD_MAX {
        return Err(EngineError::SymbolTooLong {
            sym: sym.chars().take(16).collect(),
            len,
        });
    }
    out.push(len as u8);
    out.extend_from_slice(sym.as_bytes());
    Ok(())
}

fn write_literal(literal: &str, out: &mut Vec<u8>) -> Result<(), EngineError> {
    let len = literal.len();
    if len > FIELD_MAX {
        return Err(EngineError::LiteralTooLong { len });
    }
    out.push(len as u8);
    out.extend_from_slice(literal.as_bytes());
    Ok(())
}

fn write_size(n: u32, out: &mut Vec<u8>) {
    let width = num_size(n);
    out.push(width as u8);
    out.extend_from_slice(&n.to_be_bytes()[4 - width..]);
}

fn write_signal(v: u8, out: &mut Vec<u8>) {
    out.push(if v == 0 { 0x00 } else { 0x01 });
}

/// Encodes one instruction to the sink, returning the bytes written.
///
/// The instruction is staged in a local buffer so that a length violation
/// leaves the sink untouched.
pub fn encode_one<W: Write>(instr: &Instruction, w: &mut W) -> Result<usize, EngineError> {
    let mut buf = Vec::with_capacity(16);
    write_opcode(instr.opcode, &mut buf);

    match &instr.operand {
        Operand::None => {}
        Operand::Single { sym } => {
            write_sym(sym, &mut buf)?;
        }
        Operand::Double { sym_a, sym_b } => {
            write_sym(sym_a, &mut buf)?;
            write_sym(sym_b, &mut buf)?;
        }
        Operand::Sized { sym, size } => {
            write_sym(sym, &mut buf)?;
            write_size(*size, &mut buf);
        }
        Operand::Sig { sym, size, flag } => {
            write_sym(sym, &mut buf)?;
            write_size(*size, &mut buf);
            write_signal(*flag, &mut buf);
        }
        Operand::Display { sym, literal } => {
            write_sym(sym, &mut buf)?;
            write_literal(literal, &mut buf)?;
        }
    }

    w.write_all(&buf).map_err(sink_err)?;
    Ok(buf.len())
}

/// Assembles source text into the sink, returning the total bytes written.
pub fn assemble<W: Write>(source: &str, w: &mut W) -> Result<usize, EngineError> {
    let program = parse_program(source)?;
    let mut total = 0;
    for instr in &program {
        total += encode_one(instr, w)?;
    }
    Ok(total)
}

/// Validates source and returns its encoded size without keeping any output.
pub fn check(source: &str) -> Result<usize, EngineError> {
    assemble(source, &mut io::sink())
}

/// Assembles source text into a fresh byte buffer.
pub fn assemble_bytes(source: &str) -> Result<Vec<u8>, EngineError> {
    let mut out = Vec::new();
    assemble(source, &mut out)?;
    Ok(out)
}

/// Convenience: assemble directly from a file path.
pub fn assemble_file<P: AsRef<Path>>(path: P) -> Result<Vec<u8>, EngineError> {
    let path_ref = path.as_ref();
    let source = fs::read_to_string(path_ref).map_err(|e| EngineError::Io {
        path: path_ref.display().to_string(),
        message: e.to_string(),
    })?;
    assemble_bytes(&source)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn assemble_empty_source() {
        assert_eq!(assemble_bytes("").unwrap(), Vec::<u8>::new());
    }

    #[test]
    fn assemble_comments_and_blank_lines() {
        let source = "\n# a comment\n\n   # another\n";
        assert_eq!(assemble_bytes(source).unwrap(), Vec::<u8>::new());
    }

    #[test]
    fn assemble_halt() {
        assert_eq!(assemble_bytes("HALT\n").unwrap(), vec![0x00, 0x07]);
    }

    #[test]
    fn assemble_move() {
        let mut expected = vec![0x00, 0x06, 0x09];
        expected.extend_from_slice(b"next_menu");
        assert_eq!(assemble_bytes("MOVE next_menu\n").unwrap(), expected);
    }

    #[test]
    fn assemble_load() {
        let mut expected = vec![0x00, 0x03, 0x08];
        expected.extend_from_slice(b"do_thing");
        expected.extend_from_slice(&[0x01, 0x2a]);
        assert_eq!(assemble_bytes("LOAD do_thing 42\n").unwrap(), expected);
    }

    #[test]
    fn assemble_catch() {
        let mut expected = vec![0x00, 0x01, 0x0b];
        expected.extend_from_slice(b"back_screen");
        expected.extend_from_slice(&[0x01, 0x08, 0x01]);
        assert_eq!(assemble_bytes("CATCH back_screen 8 1\n").unwrap(), expected);
    }

    #[test]
    fn assemble_display() {
        let out = assemble_bytes("MOUT accept \"Accept terms\"\n").unwrap();
        assert_eq!(&out[..2], &[0x00, 0x09]);
        assert_eq!(out[2], 6);
        assert_eq!(&out[3..9], b"accept");
        assert_eq!(out[9], 12);
        assert_eq!(&out[10..], b"Accept terms");
    }

    #[test]
    fn display_preserves_inner_whitespace_and_punctuation() {
        let program = parse_program("MOUT yes 'I agree,  fully!'\n").unwrap();
        assert_eq!(
            program[0].operand,
            Operand::Display {
                sym: "yes".to_string(),
                literal: "I agree,  fully!".to_string(),
            }
        );
    }

    #[test]
    fn single_and_double_quotes_match() {
        assert!(parse_program("MOUT ab \"x y\"\n").is_ok());
        assert!(parse_program("MOUT ab 'x y'\n").is_ok());
        // A quote of the other kind inside a literal is plain content.
        let program = parse_program("MOUT ab \"it's fine\"\n").unwrap();
        assert!(matches!(
            &program[0].operand,
            Operand::Display { literal, .. } if literal == "it's fine"
        ));
    }

    #[test]
    fn unterminated_literal() {
        assert!(matches!(
            parse_program("MOUT ab \"oops\n"),
            Err(EngineError::UnterminatedLiteral { line: 1 })
        ));
    }

    #[test]
    fn lex_error_names_line_and_column() {
        let err = parse_program("HALT\nMOVE ba%d\n").unwrap_err();
        assert!(matches!(
            err,
            EngineError::Lex {
                line: 2,
                col: 8,
                found: '%',
            }
        ));
    }

    #[test]
    fn one_char_symbol_is_rejected() {
        assert!(matches!(
            parse_program("MOVE a\n"),
            Err(EngineError::Lex { line: 1, .. })
        ));
    }

    #[test]
    fn unknown_mnemonic() {
        assert!(matches!(
            parse_program("FROB sym_a\n"),
            Err(EngineError::UnknownMnemonic { line: 1, ref name }) if name == "FROB"
        ));
    }

    #[test]
    fn shape_mismatch() {
        // HALT declares no operand.
        let err = parse_program("HALT sym_a\n").unwrap_err();
        assert!(matches!(
            err,
            EngineError::ShapeMismatch {
                mnemonic: "HALT",
                expected: "None",
                actual: "Single",
                ..
            }
        ));
        // MOVE declares a single symbol.
        assert!(matches!(
            parse_program("MOVE one two\n"),
            Err(EngineError::ShapeMismatch { .. })
        ));
    }

    #[test]
    fn signal_value_must_be_bit() {
        assert!(matches!(
            parse_program("CATCH sym_a 8 2\n"),
            Err(EngineError::InvalidSignal { line: 1, value: 2 })
        ));
        assert!(parse_program("CATCH sym_a 8 0\n").is_ok());
        assert!(parse_program("CATCH sym_a 8 1\n").is_ok());
    }

    #[test]
    fn symbol_length_bounds() {
        let ok = format!("MOVE {}\n", "s".repeat(255));
        assert!(assemble_bytes(&ok).is_ok());

        let too_long = format!("MOVE {}\n", "s".repeat(256));
        assert!(matches!(
            assemble_bytes(&too_long),
            Err(EngineError::SymbolTooLong { len: 256, .. })
        ));
    }

    #[test]
    fn literal_length_bounds() {
        let ok = format!("MOUT ab \"{}\"\n", "x".repeat(255));
        assert!(assemble_bytes(&ok).is_ok());

        let too_long = format!("MOUT ab \"{}\"\n", "x".repeat(256));
        assert!(matches!(
            assemble_bytes(&too_long),
            Err(EngineError::LiteralTooLong { len: 256 })
        ));
    }

    #[test]
    fn size_width_is_minimal() {
        assert_eq!(num_size(0), 1);
        assert_eq!(num_size(255), 1);
        assert_eq!(num_size(256), 2);
        assert_eq!(num_size(65535), 2);
        assert_eq!(num_size(65536), 3);
        assert_eq!(num_size(0xFF_FFFF), 3);
        assert_eq!(num_size(0x100_0000), 4);
        assert_eq!(num_size(u32::MAX), 4);
    }

    #[test]
    fn size_encoding_uses_width_prefix() {
        let out = assemble_bytes("LOAD fetch_x 300\n").unwrap();
        // opcode(2) + len(1) + "fetch_x"(7) + width(1) + value(2)
        assert_eq!(out[10], 0x02);
        assert_eq!(&out[11..], &[0x01, 0x2c]);
    }

    #[test]
    fn size_overflow_is_rejected() {
        assert!(matches!(
            parse_program("LOAD fetch_x 4294967296\n"),
            Err(EngineError::SizeOverflow { value: 4294967296 })
        ));
        assert!(parse_program("LOAD fetch_x 4294967295\n").is_ok());
    }

    #[test]
    fn encode_is_deterministic() {
        let source = "LOAD fetch_x 300\nMOUT yes \"Accept\"\nHALT\nINCMP yes accepted\n";
        let a = assemble_bytes(source).unwrap();
        let b = assemble_bytes(source).unwrap();
        assert_eq!(a, b);
        assert!(!a.is_empty());
    }

    #[test]
    fn check_counts_without_output() {
        let source = "MOVE next_menu\nHALT\n";
        let n = check(source).unwrap();
        assert_eq!(n, assemble_bytes(source).unwrap().len());
    }

    #[test]
    fn failed_instruction_leaves_sink_untouched() {
        let mut out = Vec::new();
        let source = format!("HALT\nMOVE {}\n", "s".repeat(256));
        assert!(assemble(&source, &mut out).is_err());
        assert_eq!(out, vec![0x00, 0x07]);
    }

    #[test]
    fn mid_line_uppercase_word_is_a_symbol() {
        let program = parse_program("INCMP AB cd\n").unwrap();
        assert_eq!(
            program[0].operand,
            Operand::Double {
                sym_a: "AB".to_string(),
                sym_b: "cd".to_string(),
            }
        );
    }

    #[test]
    fn inline_comment_after_operands() {
        let program = parse_program("MOVE next_menu # go on\n").unwrap();
        assert_eq!(program.len(), 1);
    }
}
