//! Bytecode interpreter.
//!
//! Executes one symbol's instruction stream stepwise, mutating session state
//! and yielding control signals the host acts on: keep going, wait for user
//! input, switch to another symbol's bytecode, or end the session.
//!
//! Decode faults (truncated stream, unknown opcode, malformed fields) and
//! state-invariant violations surface as errors; the engine converts them
//! into a terminal croak. External-function failures are not errors here:
//! they raise the load-failure flag and execution continues so that flow
//! code can route on it with `CATCH`.

use crate::asm::{Instruction, Operand};
use crate::cache::Cache;
use crate::errors::EngineError;
use crate::isa::{ArgKind, Opcode};
use crate::render::RenderContext;
use crate::resource::{Resource, SessionContext};
use crate::state::{State, FLAG_DIRTY, FLAG_INMATCH, FLAG_LOADFAIL, FLAG_READIN};
use log::{debug, warn};

/// Navigation target that pops a frame instead of pushing one.
pub const TARGET_BACK: &str = "__";

/// How a session ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TerminalKind {
    /// Graceful end of flow.
    Halt,
    /// Abort, carrying the reason symbol or fault description.
    Croak { reason: String },
}

/// Control signal returned to the host after a step or run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunSignal {
    /// More instructions remain in this blob.
    Continue,
    /// Execution paused until the host supplies user input.
    WaitInput,
    /// The cursor changed; the host should load bytecode for the symbol
    /// and resume.
    Jump(String),
    /// The session is over.
    Terminal(TerminalKind),
}

/// Cursor over a bytecode slice with typed field readers.
pub(crate) struct ByteReader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> ByteReader<'a> {
    pub(crate) fn new(data: &'a [u8], pos: usize) -> Self {
        Self { data, pos }
    }

    pub(crate) fn at_end(&self) -> bool {
        self.pos >= self.data.len()
    }

    pub(crate) fn pos(&self) -> usize {
        self.pos
    }

    fn read_exact(&mut self, count: usize) -> Result<&'a [u8], EngineError> {
        let start = self.pos;
        let available = self.data.len().saturating_sub(start);
        let slice = self
            .data
            .get(start..start + count)
            .ok_or(EngineError::Truncated {
                offset: start,
                wanted: count,
                available,
            })?;
        self.pos = start + count;
        Ok(slice)
    }

    fn read_u16(&mut self) -> Result<u16, EngineError> {
        let bytes = self.read_exact(2)?;
        Ok(u16::from_be_bytes([bytes[0], bytes[1]]))
    }

    /// Reads a length-prefixed UTF-8 field.
    fn read_lpstr(&mut self, what: &'static str) -> Result<String, EngineError> {
        let offset = self.pos;
        let len = self.read_exact(1)?[0] as usize;
        let bytes = self.read_exact(len)?;
        String::from_utf8(bytes.to_vec()).map_err(|_| EngineError::BadBytecode {
            offset,
            reason: format!("{} is not valid UTF-8", what),
        })
    }

    fn read_sym(&mut self) -> Result<String, EngineError> {
        self.read_lpstr("symbol")
    }

    fn read_literal(&mut self) -> Result<String, EngineError> {
        self.read_lpstr("literal")
    }

    /// Reads a width-prefixed big-endian size.
    fn read_size(&mut self) -> Result<u32, EngineError> {
        let offset = self.pos;
        let width = self.read_exact(1)?[0] as usize;
        if !(1..=4).contains(&width) {
            return Err(EngineError::BadBytecode {
                offset,
                reason: format!("size width {} out of range", width),
            });
        }
        let bytes = self.read_exact(width)?;
        let mut buf = [0u8; 4];
        buf[4 - width..].copy_from_slice(bytes);
        Ok(u32::from_be_bytes(buf))
    }

    fn read_signal(&mut self) -> Result<u8, EngineError> {
        let offset = self.pos;
        match self.read_exact(1)?[0] {
            v @ (0 | 1) => Ok(v),
            v => Err(EngineError::BadBytecode {
                offset,
                reason: format!("signal byte {:#04x}", v),
            }),
        }
    }
}

/// Decodes a full bytecode blob back into its instruction list.
///
/// Operand shapes are reconstructed from the registry, so for any
/// well-formed program `decode_program(assemble(p)) == p`.
pub fn decode_program(code: &[u8]) -> Result<Vec<Instruction>, EngineError> {
    let mut reader = ByteReader::new(code, 0);
    let mut out = Vec::new();

    while !reader.at_end() {
        let offset = reader.pos();
        let raw = reader.read_u16()?;
        let opcode = Opcode::try_from(raw).map_err(|_| EngineError::UnknownOpcode {
            opcode: raw,
            offset,
        })?;
        let operand = match opcode.arg_kind() {
            ArgKind::None => Operand::None,
            ArgKind::Single => Operand::Single {
                sym: reader.read_sym()?,
            },
            ArgKind::Double => Operand::Double {
                sym_a: reader.read_sym()?,
                sym_b: reader.read_sym()?,
            },
            ArgKind::Sized => Operand::Sized {
                sym: reader.read_sym()?,
                size: reader.read_size()?,
            },
            ArgKind::Sig => Operand::Sig {
                sym: reader.read_sym()?,
                size: reader.read_size()?,
                flag: reader.read_signal()?,
            },
            ArgKind::Display => Operand::Display {
                sym: reader.read_sym()?,
                literal: reader.read_literal()?,
            },
        };
        out.push(Instruction { opcode, operand });
    }

    Ok(out)
}

/// Executes one symbol's bytecode against borrowed session state.
///
/// A `Vm` lives for one run: the engine constructs it with the current blob
/// and resume position, drives [`run`](Self::run), and tears it down on any
/// signal other than `Continue`.
pub struct Vm<'a, R: Resource> {
    reader: ByteReader<'a>,
    state: &'a mut State,
    cache: &'a mut Cache,
    render: &'a mut RenderContext,
    resource: &'a R,
    ctx: &'a SessionContext,
    /// Target recorded by a matched INCMP, taken when the blob ends.
    pending_target: Option<String>,
    /// Position input-driven resumption restarts from.
    checkpoint: usize,
    instr_start: usize,
}

impl<'a, R: Resource> Vm<'a, R> {
    pub fn new(
        code: &'a [u8],
        pos: usize,
        state: &'a mut State,
        cache: &'a mut Cache,
        render: &'a mut RenderContext,
        resource: &'a R,
        ctx: &'a SessionContext,
    ) -> Self {
        Self {
            reader: ByteReader::new(code, pos),
            state,
            cache,
            render,
            resource,
            ctx,
            pending_target: None,
            checkpoint: pos,
            instr_start: pos,
        }
    }

    /// Position the host should resume from after `WaitInput`.
    pub fn resume_pos(&self) -> usize {
        self.checkpoint
    }

    /// Runs instructions until the blob yields control.
    pub fn run(&mut self) -> Result<RunSignal, EngineError> {
        loop {
            if self.reader.at_end() {
                if let Some(target) = self.pending_target.take() {
                    self.state.reset_flag_internal(FLAG_INMATCH);
                    return self.apply_target(target);
                }
                self.state.set_flag_internal(FLAG_READIN);
                return Ok(RunSignal::WaitInput);
            }
            match self.step()? {
                RunSignal::Continue => {}
                signal => return Ok(signal),
            }
        }
    }

    /// Fetches, decodes and executes exactly one instruction.
    pub fn step(&mut self) -> Result<RunSignal, EngineError> {
        self.instr_start = self.reader.pos();
        let offset = self.instr_start;
        let raw = self.reader.read_u16()?;
        let opcode = Opcode::try_from(raw).map_err(|_| EngineError::UnknownOpcode {
            opcode: raw,
            offset,
        })?;
        debug!("exec {} at offset {}", opcode.mnemonic(), offset);

        match opcode {
            Opcode::Back => self.op_back(),
            Opcode::Catch => {
                let sym = self.reader.read_sym()?;
                let bit = self.reader.read_size()?;
                let val = self.reader.read_signal()?;
                self.op_catch(sym, bit, val)
            }
            Opcode::Croak => {
                let sym = self.reader.read_sym()?;
                let bit = self.reader.read_size()?;
                let val = self.reader.read_signal()?;
                self.op_croak(sym, bit, val)
            }
            Opcode::Load => {
                let sym = self.reader.read_sym()?;
                let size = self.reader.read_size()?;
                self.op_load(sym, size)
            }
            Opcode::Reload => {
                let sym = self.reader.read_sym()?;
                self.op_reload(sym)
            }
            Opcode::Map => {
                let sym = self.reader.read_sym()?;
                self.op_map(sym)
            }
            Opcode::Move => {
                let sym = self.reader.read_sym()?;
                self.apply_target(sym)
            }
            Opcode::Halt => self.op_halt(),
            Opcode::Incmp => {
                let sel = self.reader.read_sym()?;
                let target = self.reader.read_sym()?;
                self.op_incmp(sel, target)
            }
            Opcode::Mout => {
                let sel = self.reader.read_sym()?;
                let label = self.reader.read_literal()?;
                self.render.add_menu(&sel, &label);
                self.state.set_flag_internal(FLAG_DIRTY);
                Ok(RunSignal::Continue)
            }
            Opcode::Mnext => {
                let sel = self.reader.read_sym()?;
                let label = self.reader.read_literal()?;
                self.render.set_next(&sel, &label);
                self.state.set_flag_internal(FLAG_DIRTY);
                Ok(RunSignal::Continue)
            }
            Opcode::Mprev => {
                let sel = self.reader.read_sym()?;
                let label = self.reader.read_literal()?;
                self.render.set_prev(&sel, &label);
                self.state.set_flag_internal(FLAG_DIRTY);
                Ok(RunSignal::Continue)
            }
        }
    }

    /// Enters a navigation target: push the current symbol and jump, or pop
    /// when the target is the back sentinel.
    fn apply_target(&mut self, sym: String) -> Result<RunSignal, EngineError> {
        if sym == TARGET_BACK {
            return self.op_back();
        }
        let current = self.state.cursor().to_string();
        self.state.push(current)?;
        self.cache.push_frame();
        self.state.set_cursor(&sym);
        Ok(RunSignal::Jump(sym))
    }

    fn op_back(&mut self) -> Result<RunSignal, EngineError> {
        let target = self.state.pop()?;
        self.cache.pop_frame()?;
        self.state.set_cursor(&target);
        Ok(RunSignal::Jump(target))
    }

    fn op_catch(&mut self, sym: String, bit: u32, val: u8) -> Result<RunSignal, EngineError> {
        if self.state.test_flag(bit)? == (val == 1) {
            self.state.set_cursor(&sym);
            return Ok(RunSignal::Jump(sym));
        }
        Ok(RunSignal::Continue)
    }

    fn op_croak(&mut self, sym: String, bit: u32, val: u8) -> Result<RunSignal, EngineError> {
        if self.state.test_flag(bit)? == (val == 1) {
            return Ok(RunSignal::Terminal(TerminalKind::Croak { reason: sym }));
        }
        Ok(RunSignal::Continue)
    }

    fn op_load(&mut self, sym: String, size: u32) -> Result<RunSignal, EngineError> {
        if self.cache.get(&sym).is_some() {
            debug!("'{}' already cached, skipping load", sym);
            return Ok(RunSignal::Continue);
        }
        let input = self.state.input().unwrap_or(&[]).to_vec();
        match self.resource.invoke(&sym, self.ctx, &input) {
            Ok(result) => {
                result.check_flags()?;
                for &bit in &result.flags_set {
                    self.state.set_flag(bit)?;
                }
                for &bit in &result.flags_reset {
                    self.state.reset_flag(bit)?;
                }
                self.cache.add(&sym, result.content, size as usize)?;
                self.state.reset_flag_internal(FLAG_LOADFAIL);
            }
            Err(err) => {
                warn!("external '{}' failed: {}", sym, err);
                self.state.set_flag_internal(FLAG_LOADFAIL);
            }
        }
        Ok(RunSignal::Continue)
    }

    fn op_reload(&mut self, sym: String) -> Result<RunSignal, EngineError> {
        if self.cache.get(&sym).is_none() {
            return Err(EngineError::CacheMiss { sym });
        }
        let input = self.state.input().unwrap_or(&[]).to_vec();
        match self.resource.invoke(&sym, self.ctx, &input) {
            Ok(result) => {
                result.check_flags()?;
                for &bit in &result.flags_set {
                    self.state.set_flag(bit)?;
                }
                for &bit in &result.flags_reset {
                    self.state.reset_flag(bit)?;
                }
                self.cache.update(&sym, result.content)?;
                self.state.reset_flag_internal(FLAG_LOADFAIL);
            }
            Err(err) => {
                warn!("external '{}' failed: {}", sym, err);
                self.state.set_flag_internal(FLAG_LOADFAIL);
            }
        }
        Ok(RunSignal::Continue)
    }

    fn op_map(&mut self, sym: String) -> Result<RunSignal, EngineError> {
        if self.cache.get(&sym).is_none() {
            return Err(EngineError::CacheMiss { sym });
        }
        self.render.add_map(&sym);
        self.state.set_flag_internal(FLAG_DIRTY);
        Ok(RunSignal::Continue)
    }

    fn op_halt(&mut self) -> Result<RunSignal, EngineError> {
        self.checkpoint = self.reader.pos();
        self.state.set_flag_internal(FLAG_READIN);
        Ok(RunSignal::WaitInput)
    }

    fn op_incmp(&mut self, sel: String, target: String) -> Result<RunSignal, EngineError> {
        let input = match self.state.input() {
            Some(input) => input.to_vec(),
            None => {
                self.checkpoint = self.instr_start;
                self.state.set_flag_internal(FLAG_READIN);
                return Ok(RunSignal::WaitInput);
            }
        };
        if !self.state.test_flag(FLAG_INMATCH)? && input == sel.as_bytes() {
            debug!("input matched '{}', deferring move to '{}'", sel, target);
            self.pending_target = Some(target);
            self.state.set_flag_internal(FLAG_INMATCH);
        }
        Ok(RunSignal::Continue)
    }
}

#[cfg(test)]
mod tests;
