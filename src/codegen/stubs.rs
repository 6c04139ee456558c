//! Small fixed-shape trampolines.
//!
//! These stubs carry no decision logic of their own; they exist to give a
//! caller a reachable, predictable entry for a target that is otherwise
//! out of direct-encoding range, behind an import, or shaped differently
//! (boxed receiver, missing constant argument).

use serde::Serialize;

use super::emit::Emitter;
use super::operand::{AddrMode, OperandSize};
use super::regmap::TargetRegisterMap;
use super::symbols::{Symbol, SymbolResolver};

/// A single unconditional jump to a target symbol, giving callers a
/// fixed-encoding-distance proxy for it.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JumpStub {
    pub target: Symbol,
}

impl JumpStub {
    pub fn emit(&self, out: &mut dyn Emitter) {
        out.emit_jmp_symbol(&self.target);
    }
}

/// A jump to an externally imported function, giving it a stable,
/// directly callable local address.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ImportTrampoline {
    pub import: Symbol,
}

impl ImportTrampoline {
    pub fn emit(&self, out: &mut dyn Emitter) {
        out.emit_jmp_symbol(&self.import);
    }
}

/// Adjusts a boxed receiver past its type-handle header, then jumps to the
/// unboxed method body.
///
/// The stub has no source mapping of its own, so the jump is annotated as
/// a step-in point for the debugger.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UnboxingStub {
    /// Entrypoint of the unboxed instance method.
    pub target: Symbol,
}

impl UnboxingStub {
    pub fn emit(
        &self,
        regs: &TargetRegisterMap,
        resolver: &dyn SymbolResolver,
        out: &mut dyn Emitter,
    ) {
        out.emit_add_imm(
            &AddrMode::reg_direct(regs.arg0, OperandSize::Int64),
            resolver.pointer_size() as i32,
        );
        out.mark_step_in_point();
        out.emit_jmp_symbol(&self.target);
    }
}

/// Loads one fixed constant into the first argument register and jumps to
/// a shared target: a partial application letting one implementation serve
/// many constant-argument call sites.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConstantArgThunk {
    pub constant: i64,
    pub target: Symbol,
}

impl ConstantArgThunk {
    pub fn emit(&self, regs: &TargetRegisterMap, out: &mut dyn Emitter) {
        out.emit_mov_imm(regs.arg0, self.constant);
        out.emit_jmp_symbol(&self.target);
    }
}
