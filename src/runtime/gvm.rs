//! Run-time resolution of generic virtual methods.
//!
//! A call through a generic virtual method cannot be bound to a vtable
//! slot at compile time; the stub emitted for it tail-jumps into the
//! shared resolver implemented here. Resolution walks the receiver's
//! base-type chain, asks the type loader at each level, and interns the
//! winning (entrypoint, dictionary) pair as a stable descriptor handle.
//!
//! Resolution runs on arbitrary application threads without locking
//! beyond the interning table. It is idempotent: concurrent duplicate
//! resolution of the same slot wastes work but cannot corrupt state.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

/// Opaque runtime identifier for a concrete type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RuntimeTypeHandle(pub usize);

/// Opaque signature token; only compared for identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MethodSignature(pub u64);

/// Name and signature pair identifying a virtual method slot.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MethodNameAndSig {
    pub name: String,
    pub signature: MethodSignature,
}

impl MethodNameAndSig {
    pub fn new(name: impl Into<String>, signature: MethodSignature) -> MethodNameAndSig {
        MethodNameAndSig {
            name: name.into(),
            signature,
        }
    }
}

/// Outcome of probing one level of a base-type chain.
#[derive(Debug, Clone, PartialEq)]
pub enum ProbeResult {
    /// This level neither declares nor implements the slot.
    Miss,
    /// The level supplied an entrypoint and instantiation dictionary.
    Resolved { code: usize, dictionary: usize },
    /// Resolution crossed an interface boundary; the walk must restart
    /// from the original receiver against the re-targeted slot.
    SlotChanged {
        declaring: RuntimeTypeHandle,
        method: MethodNameAndSig,
    },
}

/// The type-loader callback resolution consults.
pub trait TypeLoader: Sync {
    /// Immediate base type, `None` at the root.
    fn base_type(&self, ty: RuntimeTypeHandle) -> Option<RuntimeTypeHandle>;

    /// Try to resolve the slot at one level of the chain.
    fn probe(
        &self,
        ty: RuntimeTypeHandle,
        declaring: RuntimeTypeHandle,
        generic_args: &[RuntimeTypeHandle],
        method: &MethodNameAndSig,
    ) -> ProbeResult;
}

/// A resolved generic method: code entrypoint plus its dictionary.
#[derive(Debug, PartialEq, Eq)]
pub struct GenericMethodDescriptor {
    pub code: usize,
    pub dictionary: usize,
}

/// Interning table for resolved descriptors.
///
/// Resolving the same (entrypoint, dictionary) pair from any thread
/// yields the same shared handle.
#[derive(Debug, Default)]
pub struct DescriptorTable {
    entries: Mutex<HashMap<(usize, usize), Arc<GenericMethodDescriptor>>>,
}

impl DescriptorTable {
    pub fn new() -> DescriptorTable {
        DescriptorTable::default()
    }

    /// Get or create the descriptor for an (entrypoint, dictionary) pair.
    pub fn intern(&self, code: usize, dictionary: usize) -> Arc<GenericMethodDescriptor> {
        let mut entries = self.entries.lock().unwrap();
        entries
            .entry((code, dictionary))
            .or_insert_with(|| Arc::new(GenericMethodDescriptor { code, dictionary }))
            .clone()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().unwrap().is_empty()
    }
}

/// Resolve a generic virtual call for a receiver of type `receiver`.
///
/// Walks the base-type chain from most-derived to least-derived, probing
/// the loader at each level. A slot change restarts the walk from the
/// original receiver with the updated declaring type, name and signature.
/// The restart is written as an explicit loop rather than self-recursion
/// so pathological hierarchies cannot grow the stack; it terminates
/// because chains are finite and every walk moves strictly toward the
/// root.
///
/// Exhausting the chain, or resolving to a null entrypoint, is a
/// type-system inconsistency: every declared virtual slot of a
/// constructed type must be resolvable. Callers universally assume
/// success, so this aborts instead of returning an error.
pub fn resolve_generic_virtual_method(
    loader: &dyn TypeLoader,
    descriptors: &DescriptorTable,
    receiver: RuntimeTypeHandle,
    declaring: RuntimeTypeHandle,
    generic_args: &[RuntimeTypeHandle],
    method: MethodNameAndSig,
) -> Arc<GenericMethodDescriptor> {
    let mut declaring = declaring;
    let mut method = method;

    'restart: loop {
        let mut level = Some(receiver);
        while let Some(ty) = level {
            match loader.probe(ty, declaring, generic_args, &method) {
                ProbeResult::Miss => level = loader.base_type(ty),
                ProbeResult::Resolved { code, dictionary } => {
                    if code == 0 {
                        resolution_failure(receiver, &method);
                    }
                    return descriptors.intern(code, dictionary);
                }
                ProbeResult::SlotChanged {
                    declaring: new_declaring,
                    method: new_method,
                } => {
                    declaring = new_declaring;
                    method = new_method;
                    continue 'restart;
                }
            }
        }
        resolution_failure(receiver, &method);
    }
}

fn resolution_failure(receiver: RuntimeTypeHandle, method: &MethodNameAndSig) -> ! {
    panic!(
        "generic virtual method '{}' unresolvable on type {:?}: inconsistent type system",
        method.name, receiver
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// A linear chain of types, each type's base being `id - 1`, with
    /// resolutions and slot changes registered per (type, method name).
    #[derive(Default)]
    struct ChainLoader {
        resolutions: HashMap<(usize, String), (usize, usize)>,
        slot_changes: HashMap<(usize, String), (RuntimeTypeHandle, MethodNameAndSig)>,
        probes: AtomicUsize,
    }

    impl TypeLoader for ChainLoader {
        fn base_type(&self, ty: RuntimeTypeHandle) -> Option<RuntimeTypeHandle> {
            (ty.0 > 0).then(|| RuntimeTypeHandle(ty.0 - 1))
        }

        fn probe(
            &self,
            ty: RuntimeTypeHandle,
            _declaring: RuntimeTypeHandle,
            _generic_args: &[RuntimeTypeHandle],
            method: &MethodNameAndSig,
        ) -> ProbeResult {
            self.probes.fetch_add(1, Ordering::Relaxed);
            let key = (ty.0, method.name.clone());
            if let Some((declaring, method)) = self.slot_changes.get(&key) {
                return ProbeResult::SlotChanged {
                    declaring: *declaring,
                    method: method.clone(),
                };
            }
            match self.resolutions.get(&key) {
                Some(&(code, dictionary)) => ProbeResult::Resolved { code, dictionary },
                None => ProbeResult::Miss,
            }
        }
    }

    fn method(name: &str) -> MethodNameAndSig {
        MethodNameAndSig::new(name, MethodSignature(0x5150))
    }

    #[test]
    fn test_resolves_at_root_after_full_walk() {
        let mut loader = ChainLoader::default();
        // Receiver is type 4; only the root (type 0) resolves.
        loader
            .resolutions
            .insert((0, "map".to_string()), (0x4000, 0x5000));

        let descriptors = DescriptorTable::new();
        let result = resolve_generic_virtual_method(
            &loader,
            &descriptors,
            RuntimeTypeHandle(4),
            RuntimeTypeHandle(0),
            &[RuntimeTypeHandle(11)],
            method("map"),
        );

        assert_eq!(result.code, 0x4000);
        assert_eq!(result.dictionary, 0x5000);
        // One probe per level of the 5-deep chain.
        assert_eq!(loader.probes.load(Ordering::Relaxed), 5);
    }

    #[test]
    fn test_slot_change_restarts_from_receiver() {
        let mut loader = ChainLoader::default();
        // Type 2 re-targets the slot; the restarted walk resolves at the
        // receiver itself under the new name.
        loader.slot_changes.insert(
            (2, "map".to_string()),
            (RuntimeTypeHandle(9), method("map_retargeted")),
        );
        loader
            .resolutions
            .insert((3, "map_retargeted".to_string()), (0x7000, 0x8000));

        let descriptors = DescriptorTable::new();
        let result = resolve_generic_virtual_method(
            &loader,
            &descriptors,
            RuntimeTypeHandle(3),
            RuntimeTypeHandle(0),
            &[],
            method("map"),
        );

        // Same outcome as a walk that started with the updated slot.
        let direct = resolve_generic_virtual_method(
            &loader,
            &descriptors,
            RuntimeTypeHandle(3),
            RuntimeTypeHandle(9),
            &[],
            method("map_retargeted"),
        );
        assert!(Arc::ptr_eq(&result, &direct));
        assert_eq!(result.code, 0x7000);
    }

    #[test]
    #[should_panic(expected = "inconsistent type system")]
    fn test_exhausted_chain_is_fatal() {
        let loader = ChainLoader::default();
        let descriptors = DescriptorTable::new();
        resolve_generic_virtual_method(
            &loader,
            &descriptors,
            RuntimeTypeHandle(3),
            RuntimeTypeHandle(0),
            &[],
            method("missing"),
        );
    }

    #[test]
    #[should_panic(expected = "inconsistent type system")]
    fn test_null_entrypoint_is_fatal() {
        let mut loader = ChainLoader::default();
        loader.resolutions.insert((1, "map".to_string()), (0, 0));
        let descriptors = DescriptorTable::new();
        resolve_generic_virtual_method(
            &loader,
            &descriptors,
            RuntimeTypeHandle(1),
            RuntimeTypeHandle(0),
            &[],
            method("map"),
        );
    }

    #[test]
    fn test_descriptors_are_interned() {
        let table = DescriptorTable::new();
        let a = table.intern(0x1000, 0x2000);
        let b = table.intern(0x1000, 0x2000);
        let c = table.intern(0x1000, 0x3000);
        assert!(Arc::ptr_eq(&a, &b));
        assert!(!Arc::ptr_eq(&a, &c));
        assert_eq!(table.len(), 2);
    }

    #[test]
    fn test_concurrent_resolution_shares_descriptors() {
        let mut loader = ChainLoader::default();
        loader
            .resolutions
            .insert((0, "map".to_string()), (0x4000, 0x5000));
        let descriptors = DescriptorTable::new();

        let results: Vec<_> = std::thread::scope(|s| {
            (0..4)
                .map(|_| {
                    s.spawn(|| {
                        resolve_generic_virtual_method(
                            &loader,
                            &descriptors,
                            RuntimeTypeHandle(2),
                            RuntimeTypeHandle(0),
                            &[],
                            method("map"),
                        )
                    })
                })
                .collect::<Vec<_>>()
                .into_iter()
                .map(|h| h.join().unwrap())
                .collect()
        });

        assert_eq!(descriptors.len(), 1);
        for r in &results[1..] {
            assert!(Arc::ptr_eq(&results[0], r));
        }
    }
}
