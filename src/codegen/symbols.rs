//! Symbols and the resolver interface the emission backend consumes.
//!
//! The backend never manufactures addresses: every reference to a type,
//! method entry, static region or runtime entrypoint goes through a
//! [`SymbolResolver`] supplied by the compilation driver. The resolver is
//! passed explicitly into every emission call so tests and tools can
//! substitute one with fabricated slots or placeholder answers.

use std::collections::{HashMap, HashSet};

use serde::Serialize;

use super::generic::{DictionaryOwner, GenericLookupResult};

/// A named reference to an object-file symbol.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct Symbol {
    name: String,
}

impl Symbol {
    pub fn new(name: impl Into<String>) -> Symbol {
        Symbol { name: name.into() }
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

impl std::fmt::Display for Symbol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.name)
    }
}

/// Opaque reference to a type owned by the external type system.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct TypeRef(pub u32);

/// Opaque reference to a method owned by the external type system.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct MethodRef(pub u32);

/// Shared runtime entrypoints helper stubs tail-jump into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HelperEntrypoint {
    /// Run a pending type initializer, then return the non-GC static base.
    EnsureInitializerRunNonGcStaticBase,
    /// Run a pending type initializer, then return the GC static base.
    EnsureInitializerRunGcStaticBase,
    /// Run a pending type initializer, then return the thread-static base.
    EnsureInitializerRunThreadStaticBase,
    /// Return the thread-static base for an already-initialized type.
    GetThreadStaticBase,
    /// Shared entry for generic-virtual-method resolution.
    ResolveGenericVirtualMethod,
}

impl HelperEntrypoint {
    /// Export name of the runtime entrypoint.
    pub fn name(self) -> &'static str {
        match self {
            HelperEntrypoint::EnsureInitializerRunNonGcStaticBase => {
                "rt_ensure_initializer_run_nongc_static_base"
            }
            HelperEntrypoint::EnsureInitializerRunGcStaticBase => {
                "rt_ensure_initializer_run_gc_static_base"
            }
            HelperEntrypoint::EnsureInitializerRunThreadStaticBase => {
                "rt_ensure_initializer_run_thread_static_base"
            }
            HelperEntrypoint::GetThreadStaticBase => "rt_get_thread_static_base",
            HelperEntrypoint::ResolveGenericVirtualMethod => "rt_resolve_generic_virtual_method",
        }
    }
}

/// Answers the symbol, slot and type-layout questions the backend asks
/// while emitting a helper stub.
///
/// Implementations must tolerate concurrent read access: independent stubs
/// are emitted in parallel and all consult the same resolver. Slot queries
/// are only made during the final pass; during the relocations-only pass
/// the emission logic substitutes placeholder zeros itself.
pub trait SymbolResolver {
    /// Target pointer width in bytes.
    fn pointer_size(&self) -> u32;

    /// Symbol of the fully constructed runtime type descriptor.
    fn constructed_type_symbol(&self, ty: TypeRef) -> Symbol;

    /// Symbol of the type descriptor sufficient for casts and identity.
    fn necessary_type_symbol(&self, ty: TypeRef) -> Symbol;

    /// Symbol of the start of the type's non-GC static region.
    fn non_gc_statics_symbol(&self, ty: TypeRef) -> Symbol;

    /// Symbol of the indirection cell for the type's GC static storage.
    fn gc_statics_symbol(&self, ty: TypeRef) -> Symbol;

    /// Symbol of the (type-manager, slot-index) cell for thread statics.
    fn thread_statics_index_symbol(&self, ty: TypeRef) -> Symbol;

    /// Symbol of a runtime method handle usable for late-bound resolution.
    fn method_handle_symbol(&self, method: MethodRef) -> Symbol;

    /// Symbol of the per-call-site interface dispatch cell.
    fn interface_dispatch_cell(&self, method: MethodRef) -> Symbol;

    /// Symbol of a method's code entrypoint.
    fn method_entry_symbol(&self, method: MethodRef) -> Symbol;

    /// Symbol of the allocation helper matching the type's shape.
    fn object_allocator_symbol(&self, ty: TypeRef) -> Symbol;

    /// Symbol of the array allocation helper matching the element shape.
    fn array_allocator_symbol(&self, ty: TypeRef) -> Symbol;

    /// Symbol of the cast helper for the type; `throwing` picks the variant
    /// that raises on failure rather than returning null.
    fn cast_helper_symbol(&self, ty: TypeRef, throwing: bool) -> Symbol;

    /// Symbol for an imported or runtime-provided function by name.
    fn extern_symbol(&self, name: &str) -> Symbol;

    /// Symbol of a shared runtime helper entrypoint.
    fn helper_entrypoint(&self, helper: HelperEntrypoint) -> Symbol {
        self.extern_symbol(helper.name())
    }

    /// Whether the type has a deferred initializer that must run before
    /// its static storage is observed.
    fn has_lazy_initializer(&self, ty: TypeRef) -> bool;

    /// Byte size of the initializer-context header preceding the type's
    /// non-GC static storage. Only meaningful for lazily initialized types.
    fn initializer_context_size(&self, ty: TypeRef) -> i32;

    /// Whether the method is declared on an interface.
    fn is_interface_method(&self, method: MethodRef) -> bool;

    /// Final virtual-table slot of the method. Only asked during the final
    /// pass.
    fn vtable_slot_for(&self, method: MethodRef) -> i32;

    /// Virtual-table slot holding the type's generic dictionary pointer.
    /// Only asked during the final pass.
    fn dictionary_vtable_slot(&self, ty: TypeRef) -> i32;

    /// Byte offset of the virtual table within a runtime type descriptor.
    fn vtable_offset(&self) -> i32;

    /// Final dictionary slot assigned to a lookup within the owner's
    /// dictionary layout. Only asked during the final pass.
    fn dictionary_slot_for(&self, owner: DictionaryOwner, lookup: &GenericLookupResult) -> u32;
}

/// A [`SymbolResolver`] backed by fixed tables.
///
/// Symbols are derived deterministically from reference numbers, and slots
/// come from explicitly registered entries (unregistered slots resolve to
/// zero). Used by the dump tool, the benchmarks and the test suite.
#[derive(Debug, Default)]
pub struct FixedResolver {
    lazy_init: HashSet<TypeRef>,
    interface_methods: HashSet<MethodRef>,
    vtable_slots: HashMap<MethodRef, i32>,
    dictionary_vtable_slots: HashMap<TypeRef, i32>,
    dictionary_slots: HashMap<(DictionaryOwner, GenericLookupResult), u32>,
    initializer_context_size: i32,
}

impl FixedResolver {
    pub fn new() -> FixedResolver {
        FixedResolver {
            initializer_context_size: 16,
            ..FixedResolver::default()
        }
    }

    /// Mark a type as carrying a deferred initializer.
    pub fn with_lazy_initializer(mut self, ty: TypeRef) -> Self {
        self.lazy_init.insert(ty);
        self
    }

    /// Mark a method as declared on an interface.
    pub fn with_interface_method(mut self, method: MethodRef) -> Self {
        self.interface_methods.insert(method);
        self
    }

    pub fn with_vtable_slot(mut self, method: MethodRef, slot: i32) -> Self {
        self.vtable_slots.insert(method, slot);
        self
    }

    pub fn with_dictionary_vtable_slot(mut self, ty: TypeRef, slot: i32) -> Self {
        self.dictionary_vtable_slots.insert(ty, slot);
        self
    }

    pub fn with_dictionary_slot(
        mut self,
        owner: DictionaryOwner,
        lookup: GenericLookupResult,
        slot: u32,
    ) -> Self {
        self.dictionary_slots.insert((owner, lookup), slot);
        self
    }

    pub fn with_initializer_context_size(mut self, size: i32) -> Self {
        self.initializer_context_size = size;
        self
    }
}

impl SymbolResolver for FixedResolver {
    fn pointer_size(&self) -> u32 {
        8
    }

    fn constructed_type_symbol(&self, ty: TypeRef) -> Symbol {
        Symbol::new(format!("typehandle_t{}", ty.0))
    }

    fn necessary_type_symbol(&self, ty: TypeRef) -> Symbol {
        Symbol::new(format!("necessarytype_t{}", ty.0))
    }

    fn non_gc_statics_symbol(&self, ty: TypeRef) -> Symbol {
        Symbol::new(format!("statics_nongc_t{}", ty.0))
    }

    fn gc_statics_symbol(&self, ty: TypeRef) -> Symbol {
        Symbol::new(format!("statics_gc_t{}", ty.0))
    }

    fn thread_statics_index_symbol(&self, ty: TypeRef) -> Symbol {
        Symbol::new(format!("threadstatics_index_t{}", ty.0))
    }

    fn method_handle_symbol(&self, method: MethodRef) -> Symbol {
        Symbol::new(format!("methodhandle_m{}", method.0))
    }

    fn interface_dispatch_cell(&self, method: MethodRef) -> Symbol {
        Symbol::new(format!("dispatchcell_m{}", method.0))
    }

    fn method_entry_symbol(&self, method: MethodRef) -> Symbol {
        Symbol::new(format!("method_entry_m{}", method.0))
    }

    fn object_allocator_symbol(&self, ty: TypeRef) -> Symbol {
        Symbol::new(format!("rt_alloc_object_t{}", ty.0))
    }

    fn array_allocator_symbol(&self, ty: TypeRef) -> Symbol {
        Symbol::new(format!("rt_alloc_array_t{}", ty.0))
    }

    fn cast_helper_symbol(&self, ty: TypeRef, throwing: bool) -> Symbol {
        if throwing {
            Symbol::new(format!("rt_cast_class_t{}", ty.0))
        } else {
            Symbol::new(format!("rt_is_instance_t{}", ty.0))
        }
    }

    fn extern_symbol(&self, name: &str) -> Symbol {
        Symbol::new(name)
    }

    fn has_lazy_initializer(&self, ty: TypeRef) -> bool {
        self.lazy_init.contains(&ty)
    }

    fn initializer_context_size(&self, _ty: TypeRef) -> i32 {
        self.initializer_context_size
    }

    fn is_interface_method(&self, method: MethodRef) -> bool {
        self.interface_methods.contains(&method)
    }

    fn vtable_slot_for(&self, method: MethodRef) -> i32 {
        self.vtable_slots.get(&method).copied().unwrap_or(0)
    }

    fn dictionary_vtable_slot(&self, ty: TypeRef) -> i32 {
        self.dictionary_vtable_slots.get(&ty).copied().unwrap_or(0)
    }

    fn vtable_offset(&self) -> i32 {
        // Runtime type descriptors carry a fixed header of two words
        // before the first vtable slot.
        2 * self.pointer_size() as i32
    }

    fn dictionary_slot_for(&self, owner: DictionaryOwner, lookup: &GenericLookupResult) -> u32 {
        self.dictionary_slots
            .get(&(owner, lookup.clone()))
            .copied()
            .unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_symbol_display() {
        let s = Symbol::new("rt_alloc_object_t3");
        assert_eq!(s.to_string(), "rt_alloc_object_t3");
        assert_eq!(s.name(), "rt_alloc_object_t3");
    }

    #[test]
    fn test_fixed_resolver_defaults() {
        let r = FixedResolver::new();
        assert_eq!(r.pointer_size(), 8);
        assert!(!r.has_lazy_initializer(TypeRef(1)));
        assert_eq!(r.vtable_slot_for(MethodRef(1)), 0);
        assert_eq!(r.vtable_offset(), 16);
    }

    #[test]
    fn test_fixed_resolver_registration() {
        let r = FixedResolver::new()
            .with_lazy_initializer(TypeRef(7))
            .with_vtable_slot(MethodRef(2), 5);
        assert!(r.has_lazy_initializer(TypeRef(7)));
        assert_eq!(r.vtable_slot_for(MethodRef(2)), 5);
    }

    #[test]
    fn test_helper_entrypoint_symbols() {
        let r = FixedResolver::new();
        let sym = r.helper_entrypoint(HelperEntrypoint::GetThreadStaticBase);
        assert_eq!(sym.name(), "rt_get_thread_static_base");
    }
}
