//! Ownership tracking for the resource graph.
//!
//! Every Engine, Compartment, Store, Module and Instance occupies a slot in the
//! engine's [`Registry`]. Slots are addressed by generation-tagged
//! [`ResourceId`]s, so an id outlives the resource it names without ever
//! aliasing a newer one. A resource is live only while it and every owner up
//! to the engine are live; releasing an owner poisons its whole subtree.

use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::warn;

use wasm_embed_common::RuntimeError;

/// Generation-tagged handle to a registry slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ResourceId {
    index: u32,
    generation: u32,
}

impl fmt::Display for ResourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}.{}", self.index, self.generation)
    }
}

/// The kind of resource held by a slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceKind {
    Engine,
    Compartment,
    Store,
    Module,
    Instance,
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResourceKind::Engine => write!(f, "engine"),
            ResourceKind::Compartment => write!(f, "compartment"),
            ResourceKind::Store => write!(f, "store"),
            ResourceKind::Module => write!(f, "module"),
            ResourceKind::Instance => write!(f, "instance"),
        }
    }
}

struct Entry {
    kind: ResourceKind,
    label: String,
    parent: Option<ResourceId>,
}

impl Entry {
    fn describe(&self) -> String {
        if self.label.is_empty() {
            self.kind.to_string()
        } else {
            format!("{} '{}'", self.kind, self.label)
        }
    }
}

struct Slot {
    generation: u32,
    entry: Option<Entry>,
}

#[derive(Default)]
struct Slots {
    slots: Vec<Slot>,
    free: Vec<u32>,
}

impl Slots {
    fn get(&self, id: ResourceId) -> Option<&Entry> {
        self.slots
            .get(id.index as usize)
            .filter(|slot| slot.generation == id.generation)
            .and_then(|slot| slot.entry.as_ref())
    }

    fn insert(&mut self, entry: Entry) -> ResourceId {
        if let Some(index) = self.free.pop() {
            let slot = &mut self.slots[index as usize];
            slot.entry = Some(entry);
            return ResourceId {
                index,
                generation: slot.generation,
            };
        }

        #[allow(clippy::cast_possible_truncation)]
        let index = self.slots.len() as u32;
        self.slots.push(Slot {
            generation: 0,
            entry: Some(entry),
        });
        ResourceId {
            index,
            generation: 0,
        }
    }

    fn remove(&mut self, id: ResourceId) -> Option<Entry> {
        let slot = self.slots.get_mut(id.index as usize)?;
        if slot.generation != id.generation {
            return None;
        }
        let entry = slot.entry.take()?;
        slot.generation = slot.generation.wrapping_add(1);
        self.free.push(id.index);
        Some(entry)
    }

    fn ensure_live(&self, id: ResourceId) -> Result<(), RuntimeError> {
        let Some(entry) = self.get(id) else {
            return Err(RuntimeError::use_after_destroy(format!(
                "resource {id} was released"
            )));
        };

        let mut parent = entry.parent;
        while let Some(owner) = parent {
            match self.get(owner) {
                Some(owner_entry) => parent = owner_entry.parent,
                None => {
                    return Err(RuntimeError::use_after_destroy(format!(
                        "{}: owner {owner} was released",
                        entry.describe()
                    )));
                }
            }
        }

        Ok(())
    }

    fn dependents(&self, id: ResourceId) -> usize {
        self.slots
            .iter()
            .filter_map(|slot| slot.entry.as_ref())
            .filter(|entry| entry.parent == Some(id))
            .count()
    }
}

/// Arena of live resources for one engine.
///
/// The registry is internally synchronized so handles stay `Send`; it does not
/// make concurrent use of a single store safe.
#[derive(Default)]
pub struct Registry {
    slots: Mutex<Slots>,
}

impl Registry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a resource under `parent`.
    ///
    /// # Errors
    ///
    /// Returns `UseAfterDestroy` if `parent` (or any of its owners) was released.
    pub fn insert(
        &self,
        kind: ResourceKind,
        label: impl Into<String>,
        parent: Option<ResourceId>,
    ) -> Result<ResourceId, RuntimeError> {
        let mut slots = self.slots.lock();
        if let Some(parent) = parent {
            slots.ensure_live(parent)?;
        }
        Ok(slots.insert(Entry {
            kind,
            label: label.into(),
            parent,
        }))
    }

    /// Check that `id` and all of its owners are live.
    pub fn ensure_live(&self, id: ResourceId) -> Result<(), RuntimeError> {
        self.slots.lock().ensure_live(id)
    }

    /// Returns `true` if `id` and all of its owners are live.
    pub fn is_live(&self, id: ResourceId) -> bool {
        self.ensure_live(id).is_ok()
    }

    /// Number of resources directly owned by `id` that have not been released.
    pub fn dependents(&self, id: ResourceId) -> usize {
        self.slots.lock().dependents(id)
    }

    /// Number of occupied slots.
    pub fn len(&self) -> usize {
        self.slots
            .lock()
            .slots
            .iter()
            .filter(|slot| slot.entry.is_some())
            .count()
    }

    /// Returns `true` if no resource is registered.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Release `id`.
    ///
    /// The slot is freed even when dependents are still registered; they are
    /// poisoned and the violation is reported as `ResourceInUse`.
    ///
    /// # Errors
    ///
    /// Returns `UseAfterDestroy` if `id` was already released, or
    /// `ResourceInUse` if it still had live dependents.
    pub fn release(&self, id: ResourceId) -> Result<(), RuntimeError> {
        let mut slots = self.slots.lock();
        let dependents = slots.dependents(id);
        let Some(entry) = slots.remove(id) else {
            return Err(RuntimeError::use_after_destroy(format!(
                "resource {id} was already released"
            )));
        };

        if dependents > 0 {
            return Err(RuntimeError::ResourceInUse {
                resource: entry.describe(),
                dependents,
            });
        }

        Ok(())
    }
}

impl fmt::Debug for Registry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Registry")
            .field("live", &self.len())
            .finish_non_exhaustive()
    }
}

/// Registry slot owned by a handle.
///
/// Dropping the guard releases the slot; [`ResourceGuard::release`] does the
/// same but surfaces ordering violations to the caller.
pub(crate) struct ResourceGuard {
    registry: Arc<Registry>,
    id: ResourceId,
    released: bool,
}

impl ResourceGuard {
    pub(crate) fn new(
        registry: Arc<Registry>,
        kind: ResourceKind,
        label: &str,
        parent: Option<ResourceId>,
    ) -> Result<Self, RuntimeError> {
        let id = registry.insert(kind, label, parent)?;
        Ok(Self {
            registry,
            id,
            released: false,
        })
    }

    pub(crate) fn id(&self) -> ResourceId {
        self.id
    }

    pub(crate) fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    pub(crate) fn ensure_live(&self) -> Result<(), RuntimeError> {
        self.registry.ensure_live(self.id)
    }

    pub(crate) fn release(&mut self) -> Result<(), RuntimeError> {
        if self.released {
            return Ok(());
        }
        self.released = true;
        self.registry.release(self.id)
    }
}

impl Drop for ResourceGuard {
    fn drop(&mut self) {
        if let Err(e) = self.release() {
            warn!(resource = %self.id, error = %e, "Resource dropped out of order");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insert_and_release() {
        let registry = Registry::new();
        let engine = registry.insert(ResourceKind::Engine, "", None).unwrap();

        assert!(registry.is_live(engine));
        assert_eq!(registry.len(), 1);

        registry.release(engine).unwrap();
        assert!(!registry.is_live(engine));
        assert!(registry.is_empty());
    }

    #[test]
    fn test_generation_prevents_aliasing() {
        let registry = Registry::new();
        let first = registry.insert(ResourceKind::Engine, "a", None).unwrap();
        registry.release(first).unwrap();

        let second = registry.insert(ResourceKind::Engine, "b", None).unwrap();
        assert_ne!(first, second);
        assert!(!registry.is_live(first));
        assert!(registry.is_live(second));
    }

    #[test]
    fn test_owner_release_poisons_subtree() {
        let registry = Registry::new();
        let engine = registry.insert(ResourceKind::Engine, "", None).unwrap();
        let compartment = registry
            .insert(ResourceKind::Compartment, "c", Some(engine))
            .unwrap();
        let store = registry
            .insert(ResourceKind::Store, "s", Some(compartment))
            .unwrap();

        let err = registry.release(compartment).unwrap_err();
        assert!(matches!(
            err,
            RuntimeError::ResourceInUse { dependents: 1, .. }
        ));

        let err = registry.ensure_live(store).unwrap_err();
        assert!(matches!(err, RuntimeError::UseAfterDestroy { .. }));
        assert!(err.to_string().contains("store 's'"));

        // The orphan can still be released on its own.
        registry.release(store).unwrap();
    }

    #[test]
    fn test_insert_under_released_parent() {
        let registry = Registry::new();
        let engine = registry.insert(ResourceKind::Engine, "", None).unwrap();
        registry.release(engine).unwrap();

        let result = registry.insert(ResourceKind::Compartment, "late", Some(engine));
        assert!(matches!(result, Err(RuntimeError::UseAfterDestroy { .. })));
    }

    #[test]
    fn test_double_release() {
        let registry = Registry::new();
        let engine = registry.insert(ResourceKind::Engine, "", None).unwrap();
        registry.release(engine).unwrap();

        assert!(matches!(
            registry.release(engine),
            Err(RuntimeError::UseAfterDestroy { .. })
        ));
    }

    #[test]
    fn test_dependents_count() {
        let registry = Registry::new();
        let engine = registry.insert(ResourceKind::Engine, "", None).unwrap();
        let a = registry
            .insert(ResourceKind::Module, "a", Some(engine))
            .unwrap();
        registry
            .insert(ResourceKind::Module, "b", Some(engine))
            .unwrap();

        assert_eq!(registry.dependents(engine), 2);
        registry.release(a).unwrap();
        assert_eq!(registry.dependents(engine), 1);
    }

    #[test]
    fn test_guard_releases_on_drop() {
        let registry = Arc::new(Registry::new());
        {
            let guard =
                ResourceGuard::new(registry.clone(), ResourceKind::Engine, "", None).unwrap();
            assert!(guard.ensure_live().is_ok());
            assert_eq!(registry.len(), 1);
        }
        assert!(registry.is_empty());
    }

    #[test]
    fn test_guard_release_is_idempotent() {
        let registry = Arc::new(Registry::new());
        let mut guard =
            ResourceGuard::new(registry.clone(), ResourceKind::Store, "s", None).unwrap();

        guard.release().unwrap();
        guard.release().unwrap();
        assert!(guard.ensure_live().is_err());
    }
}
