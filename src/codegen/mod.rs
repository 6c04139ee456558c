//! Native-code generation backend for runtime helper stubs.
//!
//! This module turns abstract helper requests into exact x86-64 operation
//! sequences: the operand model, the per-OS register map, the emission
//! interface with its recording and encoding implementations, and the
//! per-helper-kind decision logic.

pub mod codebuf;
pub mod emit;
pub mod generic;
pub mod helpers;
pub mod operand;
pub mod regmap;
pub mod stubs;
pub mod symbols;
pub mod x64;

/// Which emission pass is running.
///
/// Stub code is emitted twice. The first pass only has to get relocation
/// sites and operation shape right so layout bookkeeping can run; slot
/// indices and other late-bound immediates are placeholder zeros. The
/// final pass re-emits the same shape with real values. Address and
/// offset bookkeeping from the first pass stays valid because the shape
/// never changes between passes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompilationPass {
    /// Provisional layout pass: placeholder immediates, real shape.
    RelocsOnly,
    /// Fixup pass with finalized slots and immediates.
    Final,
}
