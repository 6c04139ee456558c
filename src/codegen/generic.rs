//! Generic dictionary lookups and the stubs built from them.
//!
//! A generic dictionary is a per-instantiation array of runtime facts
//! (type handles, method entries, static bases) indexed by slot. Stubs in
//! this module receive a dictionary context in the first argument
//! register, or derive one from the receiver's virtual table, and load the
//! requested slot. Slot indices are only known during the final pass; the
//! relocations-only pass emits the same operation shape with placeholder
//! zero indices.

use serde::Serialize;

use super::emit::Emitter;
use super::operand::{AddrMode, OperandSize, Register};
use super::regmap::TargetRegisterMap;
use super::symbols::{HelperEntrypoint, MethodRef, SymbolResolver, TypeRef};
use super::CompilationPass;

/// What value a generic dictionary slot holds.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub enum GenericLookupResult {
    TypeHandle(TypeRef),
    NonGcStaticBase(TypeRef),
    GcStaticBase(TypeRef),
    ThreadStaticIndex(TypeRef),
    MethodDictionary(MethodRef),
    MethodEntry(MethodRef),
}

/// Which dictionary a lookup is relative to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum DictionaryOwner {
    Type(TypeRef),
    Method(MethodRef),
}

/// How the dictionary context reaches the stub.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ContextSource {
    /// The caller passes the dictionary pointer in the first argument
    /// register.
    Explicit,
    /// The first argument register holds a type handle; the dictionary
    /// pointer sits in a virtual-table slot of that type.
    TypeVtable,
    /// The dictionary would have to be derived from a receiver object for
    /// a generic method. Not supported: the stub traps instead of
    /// producing wrong code.
    MethodFromThis,
}

/// A dictionary plus the way its pointer is obtained.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct GenericContext {
    pub owner: DictionaryOwner,
    pub source: ContextSource,
}

/// Load one dictionary slot: `result <- [context + slot * pointer_size]`.
///
/// Must not trash the context register; several stubs perform a second
/// lookup through the same context.
pub fn emit_dictionary_lookup(
    context: Register,
    result: Register,
    owner: DictionaryOwner,
    lookup: &GenericLookupResult,
    pass: CompilationPass,
    resolver: &dyn SymbolResolver,
    out: &mut dyn Emitter,
) {
    // The concrete slot is assigned when dictionary layouts are finalized;
    // don't ask for it before then.
    let slot = match pass {
        CompilationPass::RelocsOnly => 0,
        CompilationPass::Final => resolver.dictionary_slot_for(owner, lookup),
    };

    let entry = AddrMode::indirect(
        context,
        (slot * resolver.pointer_size()) as i32,
        OperandSize::Int64,
    );
    out.emit_mov(result, &entry);
}

/// Bring the dictionary pointer into the first argument register.
pub fn emit_load_generic_context(
    context: &GenericContext,
    pass: CompilationPass,
    regs: &TargetRegisterMap,
    resolver: &dyn SymbolResolver,
    out: &mut dyn Emitter,
) {
    match context.source {
        ContextSource::Explicit => {
            // Already in arg0.
        }
        ContextSource::TypeVtable => {
            let owner_type = match context.owner {
                DictionaryOwner::Type(ty) => ty,
                DictionaryOwner::Method(_) => {
                    unreachable!("vtable-derived context requires a type owner")
                }
            };
            let vtable_slot = match pass {
                CompilationPass::RelocsOnly => 0,
                CompilationPass::Final => resolver.dictionary_vtable_slot(owner_type),
            };
            let slot_offset =
                resolver.vtable_offset() + vtable_slot * resolver.pointer_size() as i32;
            let dictionary = AddrMode::indirect(regs.arg0, slot_offset, OperandSize::Int64);
            out.emit_mov(regs.arg0, &dictionary);
        }
        ContextSource::MethodFromThis => {
            // Deriving a method dictionary from the receiver is not
            // supported; fail loudly at run time if this path is reached.
            out.emit_trap();
        }
    }
}

/// What a generic-lookup stub produces once the context is in place.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum GenericStubKind {
    /// Non-GC static base, honoring a pending type initializer.
    NonGcStaticBase(TypeRef),
    /// GC static base, honoring a pending type initializer.
    GcStaticBase(TypeRef),
    /// Thread-static base, honoring a pending type initializer.
    ThreadStaticBase(TypeRef),
    /// Any single dictionary entry, returned as-is.
    Lookup(GenericLookupResult),
}

/// A stub that answers a generic-dictionary question at run time.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GenericLookupStub {
    pub context: GenericContext,
    pub kind: GenericStubKind,
}

impl GenericLookupStub {
    /// Emit the stub body.
    pub fn emit(
        &self,
        pass: CompilationPass,
        regs: &TargetRegisterMap,
        resolver: &dyn SymbolResolver,
        out: &mut dyn Emitter,
    ) {
        let owner = self.context.owner;
        let ptr = resolver.pointer_size() as i32;

        emit_load_generic_context(&self.context, pass, regs, resolver, out);

        match &self.kind {
            GenericStubKind::NonGcStaticBase(ty) => {
                let lookup = GenericLookupResult::NonGcStaticBase(*ty);
                if !resolver.has_lazy_initializer(*ty) {
                    emit_dictionary_lookup(regs.arg0, regs.result, owner, &lookup, pass, resolver, out);
                    out.emit_ret();
                } else {
                    // The dictionary entry points at the initializer
                    // context, which precedes the visible storage.
                    emit_dictionary_lookup(regs.arg0, regs.arg0, owner, &lookup, pass, resolver, out);
                    let storage = AddrMode::indirect(
                        regs.arg0,
                        resolver.initializer_context_size(*ty),
                        OperandSize::Int64,
                    );
                    out.emit_lea(regs.result, &storage);
                    emit_initializer_check(regs, ptr, out);
                    out.emit_mov(regs.arg1, &AddrMode::reg_direct(regs.result, OperandSize::Int64));
                    out.emit_jmp_symbol(&resolver.helper_entrypoint(
                        HelperEntrypoint::EnsureInitializerRunNonGcStaticBase,
                    ));
                }
            }

            GenericStubKind::GcStaticBase(ty) => {
                let lookup = GenericLookupResult::GcStaticBase(*ty);
                emit_dictionary_lookup(regs.arg0, regs.result, owner, &lookup, pass, resolver, out);

                // The slot holds a handle to the storage, not the storage
                // itself: two loads to reach the real base.
                let cell = AddrMode::indirect(regs.result, 0, OperandSize::Int64);
                out.emit_mov(regs.result, &cell);
                out.emit_mov(regs.result, &cell);

                if !resolver.has_lazy_initializer(*ty) {
                    out.emit_ret();
                } else {
                    let non_gc = GenericLookupResult::NonGcStaticBase(*ty);
                    emit_dictionary_lookup(regs.arg0, regs.arg0, owner, &non_gc, pass, resolver, out);
                    emit_initializer_check(regs, ptr, out);
                    out.emit_mov(regs.arg1, &AddrMode::reg_direct(regs.result, OperandSize::Int64));
                    out.emit_jmp_symbol(&resolver.helper_entrypoint(
                        HelperEntrypoint::EnsureInitializerRunGcStaticBase,
                    ));
                }
            }

            GenericStubKind::ThreadStaticBase(ty) => {
                // Look up the (type manager, slot index) cell.
                let index_cell = GenericLookupResult::ThreadStaticIndex(*ty);
                emit_dictionary_lookup(regs.arg0, regs.arg1, owner, &index_cell, pass, resolver, out);

                let helper = if resolver.has_lazy_initializer(*ty) {
                    // The initializer context lives at the start of the
                    // non-GC region; pass it along for the slow path.
                    let non_gc = GenericLookupResult::NonGcStaticBase(*ty);
                    emit_dictionary_lookup(regs.arg0, regs.arg2, owner, &non_gc, pass, resolver, out);
                    HelperEntrypoint::EnsureInitializerRunThreadStaticBase
                } else {
                    HelperEntrypoint::GetThreadStaticBase
                };

                // First arg: the type manager for the module. Second arg:
                // the type's index in the module's thread-static section.
                out.emit_mov(regs.arg0, &AddrMode::indirect(regs.arg1, 0, OperandSize::Int64));
                out.emit_mov(regs.arg1, &AddrMode::indirect(regs.arg1, ptr, OperandSize::Int64));

                out.emit_jmp_symbol(&resolver.helper_entrypoint(helper));
            }

            GenericStubKind::Lookup(lookup) => {
                emit_dictionary_lookup(regs.arg0, regs.result, owner, lookup, pass, resolver, out);
                out.emit_ret();
            }
        }
    }
}

/// Fast-path check of the one-word initializer flag: return the already
/// computed base if the type is initialized, fall through otherwise. The
/// slow path that follows must tail-jump so the runtime returns straight
/// to the stub's caller.
fn emit_initializer_check(regs: &TargetRegisterMap, pointer_size: i32, out: &mut dyn Emitter) {
    let flag = AddrMode::indirect(regs.arg0, pointer_size, OperandSize::Int32);
    out.emit_cmp_imm(&flag, 1);
    out.emit_ret_if_equal();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codegen::emit::{EmitOp, RecordingEmitter};
    use crate::codegen::symbols::FixedResolver;
    use crate::config::TargetOs;

    fn sysv() -> TargetRegisterMap {
        TargetRegisterMap::for_os(TargetOs::Linux)
    }

    #[test]
    fn test_lookup_uses_final_slot_times_pointer_size() {
        let ty = TypeRef(4);
        let owner = DictionaryOwner::Type(ty);
        let lookup = GenericLookupResult::TypeHandle(ty);
        let resolver = FixedResolver::new().with_dictionary_slot(owner, lookup.clone(), 6);

        let mut rec = RecordingEmitter::new();
        emit_dictionary_lookup(
            Register::RDI,
            Register::RAX,
            owner,
            &lookup,
            CompilationPass::Final,
            &resolver,
            &mut rec,
        );
        assert_eq!(
            rec.ops(),
            &[EmitOp::Mov {
                dst: Register::RAX,
                src: AddrMode::indirect(Register::RDI, 48, OperandSize::Int64),
            }]
        );
    }

    #[test]
    fn test_lookup_placeholder_slot_before_final_pass() {
        let ty = TypeRef(4);
        let owner = DictionaryOwner::Type(ty);
        let lookup = GenericLookupResult::TypeHandle(ty);
        let resolver = FixedResolver::new().with_dictionary_slot(owner, lookup.clone(), 6);

        let mut rec = RecordingEmitter::new();
        emit_dictionary_lookup(
            Register::RDI,
            Register::RAX,
            owner,
            &lookup,
            CompilationPass::RelocsOnly,
            &resolver,
            &mut rec,
        );
        assert_eq!(
            rec.ops(),
            &[EmitOp::Mov {
                dst: Register::RAX,
                src: AddrMode::indirect(Register::RDI, 0, OperandSize::Int64),
            }]
        );
    }

    #[test]
    fn test_vtable_context_load() {
        let ty = TypeRef(9);
        let resolver = FixedResolver::new().with_dictionary_vtable_slot(ty, 3);
        let context = GenericContext {
            owner: DictionaryOwner::Type(ty),
            source: ContextSource::TypeVtable,
        };

        let mut rec = RecordingEmitter::new();
        emit_load_generic_context(
            &context,
            CompilationPass::Final,
            &sysv(),
            &resolver,
            &mut rec,
        );
        // vtable starts 16 bytes in; slot 3 of 8-byte entries.
        assert_eq!(
            rec.ops(),
            &[EmitOp::Mov {
                dst: Register::RDI,
                src: AddrMode::indirect(Register::RDI, 16 + 24, OperandSize::Int64),
            }]
        );
    }

    #[test]
    fn test_method_context_from_receiver_traps() {
        let stub = GenericLookupStub {
            context: GenericContext {
                owner: DictionaryOwner::Method(MethodRef(2)),
                source: ContextSource::MethodFromThis,
            },
            kind: GenericStubKind::Lookup(GenericLookupResult::MethodDictionary(MethodRef(2))),
        };
        let mut rec = RecordingEmitter::new();
        stub.emit(
            CompilationPass::Final,
            &sysv(),
            &FixedResolver::new(),
            &mut rec,
        );
        assert_eq!(rec.ops()[0], EmitOp::Trap);
    }

    #[test]
    fn test_gc_static_base_double_dereference() {
        let ty = TypeRef(5);
        let stub = GenericLookupStub {
            context: GenericContext {
                owner: DictionaryOwner::Type(ty),
                source: ContextSource::Explicit,
            },
            kind: GenericStubKind::GcStaticBase(ty),
        };
        let mut rec = RecordingEmitter::new();
        stub.emit(
            CompilationPass::Final,
            &sysv(),
            &FixedResolver::new(),
            &mut rec,
        );
        assert_eq!(rec.kinds(), vec!["mov", "mov", "mov", "ret"]);
    }
}
