use vise_derive::Error;

/// Errors that can occur while assembling, decoding or executing a flow.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Byte in assembly source that fits no token class.
    #[error("lex error at {line}:{col}: unexpected character {found:?}")]
    Lex { line: usize, col: usize, found: char },
    /// Unrecognized instruction mnemonic.
    #[error("parse error at line {line}: unknown mnemonic '{name}'")]
    UnknownMnemonic { line: usize, name: String },
    /// Line does not match any operand shape.
    #[error("parse error at line {line}: {message}")]
    Parse { line: usize, message: String },
    /// Quoted literal missing its closing quote.
    #[error("parse error at line {line}: unterminated literal")]
    UnterminatedLiteral { line: usize },
    /// Parsed operand shape differs from the shape the mnemonic declares.
    #[error("parse error at line {line}: {mnemonic} expects {expected} operand, got {actual}")]
    ShapeMismatch {
        line: usize,
        mnemonic: &'static str,
        expected: &'static str,
        actual: &'static str,
    },
    /// Signal value outside {0, 1}.
    #[error("parse error at line {line}: signal flag must be 0 or 1, got {value}")]
    InvalidSignal { line: usize, value: u64 },
    /// Symbol longer than the one-byte length prefix allows.
    #[error("symbol '{sym}' is {len} bytes, limit is 255")]
    SymbolTooLong { sym: String, len: usize },
    /// Display literal longer than the one-byte length prefix allows.
    #[error("literal of {len} bytes exceeds the 255 byte limit")]
    LiteralTooLong { len: usize },
    /// Size operand does not fit in four bytes.
    #[error("size value {value} does not fit in 32 bits")]
    SizeOverflow { value: u64 },
    /// Failure while writing to the output sink.
    #[error("write error: {message}")]
    Sink { message: String },

    /// Bytecode ended in the middle of an instruction.
    #[error("truncated bytecode at offset {offset}: wanted {wanted} bytes, {available} available")]
    Truncated {
        offset: usize,
        wanted: usize,
        available: usize,
    },
    /// Opcode index not present in the registry.
    #[error("unknown opcode {opcode} at offset {offset}")]
    UnknownOpcode { opcode: u16, offset: usize },
    /// Structurally decodable instruction with a malformed field.
    #[error("bad bytecode at offset {offset}: {reason}")]
    BadBytecode { offset: usize, reason: String },

    /// Attempt to write a reserved flag bit from flow-controlled code.
    #[error("flag {bit} is reserved")]
    ReservedFlag { bit: u32 },
    /// Flag bit beyond the register width.
    #[error("flag {bit} out of range, register holds {bits} bits")]
    FlagOutOfRange { bit: u32, bits: u32 },
    /// Navigation stack exceeded its configured depth.
    #[error("navigation stack overflow at depth {depth}")]
    StackOverflow { depth: usize },
    /// BACK with no frame to return to.
    #[error("navigation stack underflow")]
    StackUnderflow,
    /// Value larger than the entry's declared maximum.
    #[error("cache value for '{sym}' is {len} bytes, declared maximum is {max}")]
    CacheValueTooLarge { sym: String, len: usize, max: usize },
    /// Global cache ceiling would be exceeded.
    #[error("cache ceiling of {ceiling} bytes exceeded by '{sym}'")]
    CacheFull { sym: String, ceiling: usize },
    /// Key already resolvable from an enclosing frame.
    #[error("cache key '{sym}' shadows an existing entry")]
    CacheShadowed { sym: String },
    /// Lookup miss for a key the flow expects to be cached.
    #[error("no cache entry for '{sym}'")]
    CacheMiss { sym: String },
    /// Rendered output exceeded the configured cap.
    #[error("rendered output of {size} bytes exceeds the {max} byte limit")]
    OutputTooLarge { size: usize, max: usize },
    /// Flow aborted through a CROAK instruction or a fatal runtime fault.
    #[error("session aborted: {reason}")]
    Croak { reason: String },

    /// No bytecode registered for a symbol.
    #[error("no bytecode for symbol '{sym}'")]
    NoCode { sym: String },
    /// No external function registered under a name.
    #[error("no external function '{name}'")]
    NoExternal { name: String },
    /// External function reported failure.
    #[error("external function '{name}' failed: {message}")]
    External { name: String, message: String },

    /// Malformed session snapshot.
    #[error("malformed snapshot: {reason}")]
    Snapshot { reason: &'static str },
    /// Underlying filesystem failure.
    #[error("io error on {path}: {message}")]
    Io { path: String, message: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_includes_location() {
        let err = EngineError::Lex {
            line: 3,
            col: 7,
            found: '%',
        };
        assert_eq!(err.to_string(), "lex error at 3:7: unexpected character '%'");
    }

    #[test]
    fn display_symbol_too_long() {
        let err = EngineError::SymbolTooLong {
            sym: "a".repeat(10),
            len: 256,
        };
        assert!(err.to_string().contains("256 bytes"));
    }
}
