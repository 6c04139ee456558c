//! Abstract emission interface driven by the helper-stub generators.
//!
//! Stub emission is written against this trait rather than a concrete
//! encoder so the same decision logic can feed the x86-64 encoder, the
//! recording emitter used by tests and tools, or both. Implementations
//! must keep the operation shape of a call sequence identical between the
//! relocations-only and final passes; only embedded immediates may change.

use serde::Serialize;

use super::operand::{AddrMode, Register};
use super::symbols::Symbol;

/// Sink for the abstract machine operations a helper stub consists of.
pub trait Emitter {
    /// `dst <- src` where `src` is a memory operand or a direct register.
    fn emit_mov(&mut self, dst: Register, src: &AddrMode);

    /// `dst <- imm`
    fn emit_mov_imm(&mut self, dst: Register, imm: i64);

    /// `dst <- &symbol + offset`
    fn emit_lea_symbol(&mut self, dst: Register, symbol: &Symbol, offset: i32);

    /// `dst <- &src` for a memory operand.
    fn emit_lea(&mut self, dst: Register, src: &AddrMode);

    /// Compare a memory or register operand against an immediate.
    fn emit_cmp_imm(&mut self, addr: &AddrMode, imm: i32);

    /// Add an immediate to a memory or register operand.
    fn emit_add_imm(&mut self, addr: &AddrMode, imm: i32);

    /// Unconditional transfer to a symbol. Used in place of call+return
    /// whenever the callee must return to this frame's caller rather than
    /// to this frame.
    fn emit_jmp_symbol(&mut self, target: &Symbol);

    /// Unconditional transfer through a memory operand or register.
    fn emit_jmp(&mut self, target: &AddrMode);

    fn emit_ret(&mut self);

    /// Return if the previous comparison set the equal flag.
    fn emit_ret_if_equal(&mut self);

    /// Deliberate trap for paths that must fail loudly if ever reached.
    fn emit_trap(&mut self);

    /// Annotate the current position so source-level stepping follows the
    /// upcoming control transfer.
    fn mark_step_in_point(&mut self);
}

/// One recorded abstract operation.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum EmitOp {
    Mov { dst: Register, src: AddrMode },
    MovImm { dst: Register, imm: i64 },
    LeaSymbol { dst: Register, symbol: Symbol, offset: i32 },
    Lea { dst: Register, src: AddrMode },
    CmpImm { addr: AddrMode, imm: i32 },
    AddImm { addr: AddrMode, imm: i32 },
    JmpSymbol { target: Symbol },
    Jmp { target: AddrMode },
    Ret,
    RetIfEqual,
    Trap,
    StepInPoint,
}

impl EmitOp {
    /// Operation kind, independent of operands and immediates.
    pub fn kind(&self) -> &'static str {
        match self {
            EmitOp::Mov { .. } => "mov",
            EmitOp::MovImm { .. } => "mov_imm",
            EmitOp::LeaSymbol { .. } => "lea_symbol",
            EmitOp::Lea { .. } => "lea",
            EmitOp::CmpImm { .. } => "cmp_imm",
            EmitOp::AddImm { .. } => "add_imm",
            EmitOp::JmpSymbol { .. } => "jmp_symbol",
            EmitOp::Jmp { .. } => "jmp",
            EmitOp::Ret => "ret",
            EmitOp::RetIfEqual => "ret_if_equal",
            EmitOp::Trap => "trap",
            EmitOp::StepInPoint => "step_in_point",
        }
    }
}

/// An [`Emitter`] that records the operation stream instead of encoding it.
#[derive(Debug, Default)]
pub struct RecordingEmitter {
    ops: Vec<EmitOp>,
}

impl RecordingEmitter {
    pub fn new() -> RecordingEmitter {
        RecordingEmitter::default()
    }

    pub fn ops(&self) -> &[EmitOp] {
        &self.ops
    }

    pub fn into_ops(self) -> Vec<EmitOp> {
        self.ops
    }

    /// Operation kinds in emission order.
    pub fn kinds(&self) -> Vec<&'static str> {
        self.ops.iter().map(EmitOp::kind).collect()
    }
}

impl Emitter for RecordingEmitter {
    fn emit_mov(&mut self, dst: Register, src: &AddrMode) {
        self.ops.push(EmitOp::Mov { dst, src: *src });
    }

    fn emit_mov_imm(&mut self, dst: Register, imm: i64) {
        self.ops.push(EmitOp::MovImm { dst, imm });
    }

    fn emit_lea_symbol(&mut self, dst: Register, symbol: &Symbol, offset: i32) {
        self.ops.push(EmitOp::LeaSymbol {
            dst,
            symbol: symbol.clone(),
            offset,
        });
    }

    fn emit_lea(&mut self, dst: Register, src: &AddrMode) {
        self.ops.push(EmitOp::Lea { dst, src: *src });
    }

    fn emit_cmp_imm(&mut self, addr: &AddrMode, imm: i32) {
        self.ops.push(EmitOp::CmpImm { addr: *addr, imm });
    }

    fn emit_add_imm(&mut self, addr: &AddrMode, imm: i32) {
        self.ops.push(EmitOp::AddImm { addr: *addr, imm });
    }

    fn emit_jmp_symbol(&mut self, target: &Symbol) {
        self.ops.push(EmitOp::JmpSymbol {
            target: target.clone(),
        });
    }

    fn emit_jmp(&mut self, target: &AddrMode) {
        self.ops.push(EmitOp::Jmp { target: *target });
    }

    fn emit_ret(&mut self) {
        self.ops.push(EmitOp::Ret);
    }

    fn emit_ret_if_equal(&mut self) {
        self.ops.push(EmitOp::RetIfEqual);
    }

    fn emit_trap(&mut self) {
        self.ops.push(EmitOp::Trap);
    }

    fn mark_step_in_point(&mut self) {
        self.ops.push(EmitOp::StepInPoint);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codegen::operand::OperandSize;

    #[test]
    fn test_recording_order() {
        let mut rec = RecordingEmitter::new();
        rec.emit_lea_symbol(Register::RDI, &Symbol::new("typehandle_t1"), 0);
        rec.emit_jmp_symbol(&Symbol::new("rt_alloc_object_t1"));
        assert_eq!(rec.kinds(), vec!["lea_symbol", "jmp_symbol"]);
    }

    #[test]
    fn test_kind_ignores_operands() {
        let a = EmitOp::Mov {
            dst: Register::RAX,
            src: AddrMode::indirect(Register::RDI, 0, OperandSize::Int64),
        };
        let b = EmitOp::Mov {
            dst: Register::RCX,
            src: AddrMode::indirect(Register::RSI, 64, OperandSize::Int64),
        };
        assert_eq!(a.kind(), b.kind());
    }
}
