//! Helper-request stubs: the central emission dispatcher.
//!
//! Each compiled module carries a set of short stubs that answer runtime
//! questions (allocate, cast, dispatch, find a static base) without going
//! through a generic call path. The dispatcher below turns a
//! [`HelperRequest`] into the exact operation sequence realizing it.
//!
//! Slow paths end in a jump, never a call followed by a return: whenever
//! the shared runtime entrypoint must hand control back to the stub's
//! caller, the stub replaces call+return with a direct jump so the
//! caller's return address stays on top of the stack.

use serde::Serialize;

use super::emit::Emitter;
use super::generic::{emit_dictionary_lookup, emit_load_generic_context, GenericContext, GenericLookupResult};
use super::operand::{AddrMode, OperandSize, Register};
use super::regmap::TargetRegisterMap;
use super::symbols::{HelperEntrypoint, MethodRef, Symbol, SymbolResolver, TypeRef};
use super::CompilationPass;

/// Interface dispatch needs a register for the call-site cell address that
/// does not collide with user arguments; R11 is volatile under both
/// recognized conventions.
const DISPATCH_CELL_REG: Register = Register::R11;

/// Register carrying the runtime method handle into the shared
/// generic-virtual-method resolver; R10 is volatile under both recognized
/// conventions.
const METHOD_HANDLE_REG: Register = Register::R10;

/// Everything needed to construct a delegate over a concrete target.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DelegateCtorInfo {
    /// The delegate type's constructor entrypoint.
    pub constructor: Symbol,
    /// The method the delegate will invoke.
    pub target_method: Symbol,
    /// Extra invocation thunk for delegate shapes that need one.
    pub invoke_thunk: Option<Symbol>,
    /// Parameter count of the constructor, checked against the shape.
    pub constructor_arity: u32,
}

/// A runtime-helper request produced by the dependency analysis.
///
/// Requests are immutable once built and are emitted at least twice: once
/// during the relocations-only pass and once during the final pass.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum HelperRequest {
    NewObject { ty: TypeRef },
    NewArray { ty: TypeRef },
    IsInstanceOf { ty: TypeRef },
    CastClass { ty: TypeRef },
    VirtualCall { method: MethodRef },
    ResolveVirtualFunction { method: MethodRef },
    ResolveGenericVirtualMethod { method: MethodRef },
    GetNonGcStaticBase { ty: TypeRef },
    GetGcStaticBase { ty: TypeRef },
    GetThreadStaticBase { ty: TypeRef },
    TypeHandle { ty: TypeRef, context: GenericContext },
    MethodDictionary { method: MethodRef, context: GenericContext },
    MethodEntry { method: MethodRef, context: GenericContext },
    DelegateCtor(DelegateCtorInfo),
}

impl HelperRequest {
    /// Emit the stub realizing this request.
    ///
    /// Emission is a pure function of the request, the pass and the
    /// resolver state; the operation shape is identical across passes for
    /// a given request, except for the class-receiver arm of
    /// [`HelperRequest::VirtualCall`], which is deferred entirely to the
    /// final pass because the resolved slot decides the displacement size
    /// class.
    pub fn emit(
        &self,
        pass: CompilationPass,
        regs: &TargetRegisterMap,
        resolver: &dyn SymbolResolver,
        out: &mut dyn Emitter,
    ) {
        let ptr = resolver.pointer_size() as i32;

        match self {
            HelperRequest::NewObject { ty } => {
                out.emit_lea_symbol(regs.arg0, &resolver.constructed_type_symbol(*ty), 0);
                out.emit_jmp_symbol(&resolver.object_allocator_symbol(*ty));
            }

            HelperRequest::NewArray { ty } => {
                // The element count arrives in arg0 but the allocator
                // takes it in arg1, after the type handle.
                out.emit_mov(regs.arg1, &AddrMode::reg_direct(regs.arg0, OperandSize::Int64));
                out.emit_lea_symbol(regs.arg0, &resolver.constructed_type_symbol(*ty), 0);
                out.emit_jmp_symbol(&resolver.array_allocator_symbol(*ty));
            }

            HelperRequest::IsInstanceOf { ty } => {
                // arg0 already holds the candidate object.
                out.emit_lea_symbol(regs.arg1, &resolver.necessary_type_symbol(*ty), 0);
                out.emit_jmp_symbol(&resolver.cast_helper_symbol(*ty, false));
            }

            HelperRequest::CastClass { ty } => {
                out.emit_lea_symbol(regs.arg1, &resolver.necessary_type_symbol(*ty), 0);
                out.emit_jmp_symbol(&resolver.cast_helper_symbol(*ty, true));
            }

            HelperRequest::VirtualCall { method } => {
                if resolver.is_interface_method(*method) {
                    // Dispatch through the per-call-site indirection cell.
                    out.emit_lea_symbol(
                        DISPATCH_CELL_REG,
                        &resolver.interface_dispatch_cell(*method),
                        0,
                    );
                    out.emit_jmp(&AddrMode::indirect(DISPATCH_CELL_REG, 0, OperandSize::Int64));
                } else {
                    if pass == CompilationPass::RelocsOnly {
                        return;
                    }
                    // Receiver's type handle sits at offset 0 of the
                    // instance.
                    out.emit_mov(regs.result, &AddrMode::indirect(regs.arg0, 0, OperandSize::Int64));
                    let slot = resolver.vtable_slot_for(*method);
                    let entry = AddrMode::indirect(
                        regs.result,
                        resolver.vtable_offset() + slot * ptr,
                        OperandSize::Int64,
                    );
                    out.emit_jmp(&entry);
                }
            }

            HelperRequest::ResolveVirtualFunction { method } => {
                if resolver.is_interface_method(*method) {
                    out.emit_lea_symbol(regs.result, &resolver.interface_dispatch_cell(*method), 0);
                    out.emit_ret();
                } else {
                    out.emit_mov(regs.result, &AddrMode::indirect(regs.arg0, 0, OperandSize::Int64));
                    let slot = match pass {
                        CompilationPass::RelocsOnly => 0,
                        CompilationPass::Final => resolver.vtable_slot_for(*method),
                    };
                    let entry = AddrMode::indirect(
                        regs.result,
                        resolver.vtable_offset() + slot * ptr,
                        OperandSize::Int64,
                    );
                    out.emit_mov(regs.result, &entry);
                    out.emit_ret();
                }
            }

            HelperRequest::ResolveGenericVirtualMethod { method } => {
                out.emit_lea_symbol(METHOD_HANDLE_REG, &resolver.method_handle_symbol(*method), 0);
                out.emit_jmp_symbol(
                    &resolver.helper_entrypoint(HelperEntrypoint::ResolveGenericVirtualMethod),
                );
            }

            HelperRequest::GetNonGcStaticBase { ty } => {
                out.emit_lea_symbol(regs.result, &resolver.non_gc_statics_symbol(*ty), 0);
                if !resolver.has_lazy_initializer(*ty) {
                    out.emit_ret();
                } else {
                    self.emit_initializer_slow_path(
                        *ty,
                        HelperEntrypoint::EnsureInitializerRunNonGcStaticBase,
                        regs,
                        resolver,
                        out,
                    );
                }
            }

            HelperRequest::GetGcStaticBase { ty } => {
                out.emit_lea_symbol(regs.result, &resolver.gc_statics_symbol(*ty), 0);
                // The symbol names an indirection cell whose value is a
                // handle to the storage: two loads to the real base.
                let cell = AddrMode::indirect(regs.result, 0, OperandSize::Int64);
                out.emit_mov(regs.result, &cell);
                out.emit_mov(regs.result, &cell);
                if !resolver.has_lazy_initializer(*ty) {
                    out.emit_ret();
                } else {
                    self.emit_initializer_slow_path(
                        *ty,
                        HelperEntrypoint::EnsureInitializerRunGcStaticBase,
                        regs,
                        resolver,
                        out,
                    );
                }
            }

            HelperRequest::GetThreadStaticBase { ty } => {
                out.emit_lea_symbol(regs.arg2, &resolver.thread_statics_index_symbol(*ty), 0);
                // First arg: the type manager for the module. Second arg:
                // the type's slot in the module's thread-static section.
                out.emit_mov(regs.arg0, &AddrMode::indirect(regs.arg2, 0, OperandSize::Int64));
                out.emit_mov(regs.arg1, &AddrMode::indirect(regs.arg2, ptr, OperandSize::Int64));
                if resolver.has_lazy_initializer(*ty) {
                    out.emit_lea_symbol(
                        regs.arg2,
                        &resolver.non_gc_statics_symbol(*ty),
                        -resolver.initializer_context_size(*ty),
                    );
                    out.emit_jmp_symbol(&resolver.helper_entrypoint(
                        HelperEntrypoint::EnsureInitializerRunThreadStaticBase,
                    ));
                } else {
                    out.emit_jmp_symbol(
                        &resolver.helper_entrypoint(HelperEntrypoint::GetThreadStaticBase),
                    );
                }
            }

            HelperRequest::TypeHandle { ty, context } => {
                self.emit_simple_lookup(
                    GenericLookupResult::TypeHandle(*ty),
                    context,
                    pass,
                    regs,
                    resolver,
                    out,
                );
            }

            HelperRequest::MethodDictionary { method, context } => {
                self.emit_simple_lookup(
                    GenericLookupResult::MethodDictionary(*method),
                    context,
                    pass,
                    regs,
                    resolver,
                    out,
                );
            }

            HelperRequest::MethodEntry { method, context } => {
                self.emit_simple_lookup(
                    GenericLookupResult::MethodEntry(*method),
                    context,
                    pass,
                    regs,
                    resolver,
                    out,
                );
            }

            HelperRequest::DelegateCtor(info) => {
                out.emit_lea_symbol(regs.arg2, &info.target_method, 0);
                if let Some(thunk) = &info.invoke_thunk {
                    assert_eq!(
                        info.constructor_arity, 3,
                        "delegate constructor arity mismatch for thunked shape"
                    );
                    out.emit_lea_symbol(regs.arg3, thunk, 0);
                } else {
                    assert_eq!(
                        info.constructor_arity, 2,
                        "delegate constructor arity mismatch"
                    );
                }
                out.emit_jmp_symbol(&info.constructor);
            }
        }
    }

    /// Shared static-base slow path: check the initializer flag, return
    /// the precomputed base on the fast path, otherwise tail-jump into the
    /// runtime with the context in arg0 and the base in arg1.
    fn emit_initializer_slow_path(
        &self,
        ty: TypeRef,
        helper: HelperEntrypoint,
        regs: &TargetRegisterMap,
        resolver: &dyn SymbolResolver,
        out: &mut dyn Emitter,
    ) {
        let ptr = resolver.pointer_size() as i32;
        // The initializer context precedes the visible storage.
        out.emit_lea_symbol(
            regs.arg0,
            &resolver.non_gc_statics_symbol(ty),
            -resolver.initializer_context_size(ty),
        );
        let flag = AddrMode::indirect(regs.arg0, ptr, OperandSize::Int32);
        out.emit_cmp_imm(&flag, 1);
        out.emit_ret_if_equal();
        out.emit_mov(regs.arg1, &AddrMode::reg_direct(regs.result, OperandSize::Int64));
        out.emit_jmp_symbol(&resolver.helper_entrypoint(helper));
    }

    /// The uniform dictionary case: load the context, fetch one slot into
    /// the result register, return.
    fn emit_simple_lookup(
        &self,
        lookup: GenericLookupResult,
        context: &GenericContext,
        pass: CompilationPass,
        regs: &TargetRegisterMap,
        resolver: &dyn SymbolResolver,
        out: &mut dyn Emitter,
    ) {
        emit_load_generic_context(context, pass, regs, resolver, out);
        emit_dictionary_lookup(regs.arg0, regs.result, context.owner, &lookup, pass, resolver, out);
        out.emit_ret();
    }
}
