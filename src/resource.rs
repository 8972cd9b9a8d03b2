//! Resource loading and the external-function registry.
//!
//! The engine depends on two capabilities: retrieving compiled bytecode and
//! display templates by symbol, and invoking host-registered callables by
//! name. Both sit behind the [`Resource`] trait so that flows can be served
//! from memory, the filesystem, or anything an embedder provides.

use crate::asm;
use crate::errors::EngineError;
use crate::state::FLAG_USERSTART;
use log::debug;
use std::collections::HashMap;
use std::fs;
use std::path::PathBuf;

/// Key under which the session identifier is carried in the context.
pub const CTX_SESSION_ID: &str = "session_id";

/// Opaque key-value map carried across external calls.
#[derive(Debug, Clone, Default)]
pub struct SessionContext {
    values: HashMap<String, String>,
}

impl SessionContext {
    /// Creates a context holding the given session identifier.
    pub fn new(session_id: &str) -> Self {
        let mut values = HashMap::new();
        values.insert(CTX_SESSION_ID.to_string(), session_id.to_string());
        Self { values }
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(String::as_str)
    }

    pub fn set(&mut self, key: &str, value: &str) {
        self.values.insert(key.to_string(), value.to_string());
    }

    /// The session identifier, empty if unset.
    pub fn session_id(&self) -> &str {
        self.get(CTX_SESSION_ID).unwrap_or("")
    }
}

/// Outcome of a successful external invocation: content for the cache plus
/// flag deltas to apply. Only user flags (bit >= [`FLAG_USERSTART`]) may
/// appear in the deltas.
#[derive(Debug, Clone, Default)]
pub struct ExtResult {
    pub content: Vec<u8>,
    pub flags_set: Vec<u32>,
    pub flags_reset: Vec<u32>,
}

impl ExtResult {
    /// A result carrying only content.
    pub fn content(bytes: impl Into<Vec<u8>>) -> Self {
        Self {
            content: bytes.into(),
            ..Self::default()
        }
    }

    /// Validates that every flag delta stays in the user partition.
    pub fn check_flags(&self) -> Result<(), EngineError> {
        for &bit in self.flags_set.iter().chain(self.flags_reset.iter()) {
            if bit < FLAG_USERSTART {
                return Err(EngineError::ReservedFlag { bit });
            }
        }
        Ok(())
    }
}

/// Host-registered callable: `(context, symbol, input) -> result`.
pub type ExtFn = Box<dyn Fn(&SessionContext, &str, &[u8]) -> Result<ExtResult, EngineError>>;

/// Supplies bytecode, templates and external functions to the engine.
pub trait Resource {
    /// Loads the compiled bytecode stored under a symbol.
    fn load_code(&self, sym: &str) -> Result<Vec<u8>, EngineError>;

    /// Loads the display template for a symbol. Symbols without display
    /// content yield an empty template.
    fn load_template(&self, sym: &str) -> Result<String, EngineError>;

    /// Invokes the external function registered under `name`.
    fn invoke(
        &self,
        name: &str,
        ctx: &SessionContext,
        input: &[u8],
    ) -> Result<ExtResult, EngineError>;
}

/// In-memory resource store, for tests and embedders that assemble flows at
/// runtime.
#[derive(Default)]
pub struct MemResource {
    code: HashMap<String, Vec<u8>>,
    templates: HashMap<String, String>,
    funcs: HashMap<String, ExtFn>,
}

impl MemResource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers compiled bytecode under a symbol.
    pub fn add_code(&mut self, sym: &str, code: Vec<u8>) {
        self.code.insert(sym.to_string(), code);
    }

    /// Registers a display template under a symbol.
    pub fn add_template(&mut self, sym: &str, template: &str) {
        self.templates.insert(sym.to_string(), template.to_string());
    }

    /// Registers an external function under a name.
    pub fn add_func<F>(&mut self, name: &str, f: F)
    where
        F: Fn(&SessionContext, &str, &[u8]) -> Result<ExtResult, EngineError> + 'static,
    {
        self.funcs.insert(name.to_string(), Box::new(f));
    }
}

impl Resource for MemResource {
    fn load_code(&self, sym: &str) -> Result<Vec<u8>, EngineError> {
        self.code
            .get(sym)
            .cloned()
            .ok_or_else(|| EngineError::NoCode {
                sym: sym.to_string(),
            })
    }

    fn load_template(&self, sym: &str) -> Result<String, EngineError> {
        Ok(self.templates.get(sym).cloned().unwrap_or_default())
    }

    fn invoke(
        &self,
        name: &str,
        ctx: &SessionContext,
        input: &[u8],
    ) -> Result<ExtResult, EngineError> {
        debug!("invoke external '{}'", name);
        let f = self.funcs.get(name).ok_or_else(|| EngineError::NoExternal {
            name: name.to_string(),
        })?;
        f(ctx, name, input)
    }
}

/// Filesystem-backed resource store.
///
/// For a symbol `sym`, bytecode is read from `<dir>/sym.bin`; when no
/// compiled file exists, `<dir>/sym.vis` is assembled on the fly. Templates
/// are read from `<dir>/sym`, missing templates are empty. External
/// functions are registered on top, as with [`MemResource`].
pub struct FsResource {
    dir: PathBuf,
    funcs: HashMap<String, ExtFn>,
}

impl FsResource {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            funcs: HashMap::new(),
        }
    }

    /// Registers an external function under a name.
    pub fn add_func<F>(&mut self, name: &str, f: F)
    where
        F: Fn(&SessionContext, &str, &[u8]) -> Result<ExtResult, EngineError> + 'static,
    {
        self.funcs.insert(name.to_string(), Box::new(f));
    }
}

impl Resource for FsResource {
    fn load_code(&self, sym: &str) -> Result<Vec<u8>, EngineError> {
        let bin = self.dir.join(format!("{}.bin", sym));
        if bin.exists() {
            return fs::read(&bin).map_err(|e| EngineError::Io {
                path: bin.display().to_string(),
                message: e.to_string(),
            });
        }
        let src = self.dir.join(format!("{}.vis", sym));
        if src.exists() {
            debug!("assembling '{}' from source", sym);
            return asm::assemble_file(&src);
        }
        Err(EngineError::NoCode {
            sym: sym.to_string(),
        })
    }

    fn load_template(&self, sym: &str) -> Result<String, EngineError> {
        let path = self.dir.join(sym);
        if !path.exists() {
            return Ok(String::new());
        }
        fs::read_to_string(&path).map_err(|e| EngineError::Io {
            path: path.display().to_string(),
            message: e.to_string(),
        })
    }

    fn invoke(
        &self,
        name: &str,
        ctx: &SessionContext,
        input: &[u8],
    ) -> Result<ExtResult, EngineError> {
        debug!("invoke external '{}'", name);
        let f = self.funcs.get(name).ok_or_else(|| EngineError::NoExternal {
            name: name.to_string(),
        })?;
        f(ctx, name, input)
    }
}
