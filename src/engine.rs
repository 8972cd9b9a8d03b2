//! Host-facing session engine.
//!
//! Owns one session's state, drives the interpreter over resources, and
//! exposes the three operations a host needs: start the session, feed it
//! input, and render the current screen. [`run_loop`] wires an engine to a
//! line-oriented reader and writer for interactive use.

use crate::cache::Cache;
use crate::errors::EngineError;
use crate::persist::{Snapshot, SnapshotEntry};
use crate::render::{self, RenderContext};
use crate::resource::{Resource, SessionContext};
use crate::state::{State, FLAG_NEWSESSION, FLAG_TERMINATE};
use crate::vm::{RunSignal, TerminalKind, Vm};
use log::{debug, error, info};
use std::io::{BufRead, Write};

/// Engine construction parameters.
#[derive(Debug, Clone)]
pub struct Config {
    /// Entry point symbol.
    pub root: String,
    /// Opaque session identifier, carried to external calls and used as the
    /// persistence key.
    pub session_id: String,
    /// Maximum rendered output size in bytes; 0 disables the cap.
    pub output_size: usize,
    /// Global cache ceiling in bytes.
    pub cache_size: usize,
    /// Navigation stack depth bound.
    pub stack_depth: usize,
    /// Number of user-defined flag bits.
    pub user_flags: u32,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            root: "root".to_string(),
            session_id: "default".to_string(),
            output_size: 0,
            cache_size: 1 << 20,
            stack_depth: 64,
            user_flags: 16,
        }
    }
}

/// One session's engine: state, cache, render context and the current
/// bytecode position.
pub struct Engine<R: Resource> {
    cfg: Config,
    resource: R,
    state: State,
    cache: Cache,
    render_ctx: RenderContext,
    ctx: SessionContext,
    code: Vec<u8>,
    pos: usize,
    running: bool,
}

impl<R: Resource> Engine<R> {
    pub fn new(cfg: Config, resource: R) -> Self {
        let state = State::new(cfg.user_flags, cfg.stack_depth);
        let cache = Cache::new(cfg.cache_size);
        let ctx = SessionContext::new(&cfg.session_id);
        Self {
            cfg,
            resource,
            state,
            cache,
            render_ctx: RenderContext::new(),
            ctx,
            code: Vec::new(),
            pos: 0,
            running: false,
        }
    }

    /// Enters the root symbol and runs until the first suspension.
    ///
    /// Returns whether the session expects further input.
    pub fn init(&mut self) -> Result<bool, EngineError> {
        info!(
            "starting session '{}' at '{}'",
            self.cfg.session_id, self.cfg.root
        );
        self.state.set_flag_internal(FLAG_NEWSESSION);
        self.state.set_cursor(&self.cfg.root);
        self.code = self.resource.load_code(&self.cfg.root)?;
        self.pos = 0;
        self.running = true;
        self.run_pending()
    }

    /// Feeds one round of user input and runs until the next suspension.
    ///
    /// Returns whether the session expects further input; a terminated
    /// session ignores input and reports `false`.
    pub fn exec(&mut self, input: &[u8]) -> Result<bool, EngineError> {
        if !self.running {
            return Ok(false);
        }
        debug!("exec with input {:?}", String::from_utf8_lossy(input));
        self.state.set_input(input);
        self.state.reset_flag_internal(FLAG_NEWSESSION);
        self.run_pending()
    }

    fn run_pending(&mut self) -> Result<bool, EngineError> {
        loop {
            let (outcome, resume) = {
                let mut vm = Vm::new(
                    &self.code,
                    self.pos,
                    &mut self.state,
                    &mut self.cache,
                    &mut self.render_ctx,
                    &self.resource,
                    &self.ctx,
                );
                let outcome = vm.run();
                (outcome, vm.resume_pos())
            };
            let signal = match outcome {
                Ok(signal) => signal,
                Err(err) => {
                    error!("session '{}' faulted: {}", self.cfg.session_id, err);
                    self.running = false;
                    self.state.set_flag_internal(FLAG_TERMINATE);
                    return Err(err);
                }
            };

            match signal {
                RunSignal::Continue => continue,
                RunSignal::WaitInput => {
                    self.pos = resume;
                    self.state.clear_input();
                    return Ok(true);
                }
                RunSignal::Jump(sym) => {
                    debug!("jump to '{}'", sym);
                    self.state.clear_input();
                    self.render_ctx.reset();
                    self.code = self.resource.load_code(&sym)?;
                    self.pos = 0;
                    if self.code.is_empty() {
                        info!("empty bytecode for '{}', session over", sym);
                        self.running = false;
                        return Ok(false);
                    }
                }
                RunSignal::Terminal(TerminalKind::Halt) => {
                    self.running = false;
                    return Ok(false);
                }
                RunSignal::Terminal(TerminalKind::Croak { reason }) => {
                    error!("session '{}' croaked: {}", self.cfg.session_id, reason);
                    self.running = false;
                    self.state.set_flag_internal(FLAG_TERMINATE);
                    return Err(EngineError::Croak { reason });
                }
            }
        }
    }

    /// Renders the current screen: the cursor's template expanded against
    /// mapped cache values, menu entries appended.
    pub fn render(&self) -> Result<String, EngineError> {
        let template = self.resource.load_template(self.state.cursor())?;
        render::render(
            &template,
            &self.render_ctx,
            &self.cache,
            self.cfg.output_size,
        )
    }

    /// Whether the session still accepts input.
    pub fn running(&self) -> bool {
        self.running
    }

    /// Captures the session for persistence. The current symbol rides as
    /// the top element of the serialized navigation stack.
    pub fn snapshot(&self) -> Snapshot {
        let mut stack = self.state.stack_syms().to_vec();
        stack.push(self.state.cursor().to_string());
        Snapshot {
            flags: self.state.flag_bytes().to_vec(),
            stack,
            cache: self
                .cache
                .entries()
                .into_iter()
                .map(|(sym, value)| SnapshotEntry { sym, value })
                .collect(),
        }
    }

    /// Resumes a persisted session: state is restored and the current
    /// symbol's screen replayed up to its suspension point.
    pub fn restore(&mut self, snapshot: Snapshot) -> Result<bool, EngineError> {
        let mut stack = snapshot.stack;
        let cursor = stack.pop().ok_or(EngineError::Snapshot {
            reason: "empty navigation stack",
        })?;
        self.state.restore_flags(&snapshot.flags)?;
        self.state.restore_stack(stack)?;
        self.cache.restore(
            snapshot
                .cache
                .into_iter()
                .map(|e| (e.sym, e.value))
                .collect(),
        )?;
        // Keep the frame/stack coupling: one cache frame per history entry,
        // with every restored value held at the base.
        for _ in 0..self.state.depth() {
            self.cache.push_frame();
        }
        self.state.set_cursor(&cursor);
        self.render_ctx.reset();
        self.code = self.resource.load_code(&cursor)?;
        self.pos = 0;
        self.running = true;
        info!(
            "restored session '{}' at '{}'",
            self.cfg.session_id, cursor
        );
        self.run_pending()
    }
}

/// Drives an engine over a line-oriented reader and writer until the
/// session ends or the reader is exhausted.
pub fn run_loop<R: Resource, I: BufRead, O: Write>(
    en: &mut Engine<R>,
    input: &mut I,
    output: &mut O,
) -> Result<(), EngineError> {
    let stdio_err = |e: std::io::Error| EngineError::Io {
        path: "<stdio>".to_string(),
        message: e.to_string(),
    };

    let mut cont = en.init()?;
    writeln!(output, "{}", en.render()?).map_err(stdio_err)?;

    while cont {
        let mut line = String::new();
        let n = input.read_line(&mut line).map_err(stdio_err)?;
        if n == 0 {
            break;
        }
        cont = en.exec(line.trim_end_matches(['\n', '\r']).as_bytes())?;
        writeln!(output, "{}", en.render()?).map_err(stdio_err)?;
    }
    Ok(())
}
