use std::collections::HashMap;
use std::sync::Arc;

use once_cell::sync::OnceCell;
use parking_lot::Mutex;

/// Process-wide module cache keyed by artifact id.
///
/// Each id owns one slot. Threads that miss on the same id race for the slot's
/// initialization: exactly one runs the loader while the others block on it
/// and then observe the same handle. A failed load leaves the slot empty so a
/// later request retries.
///
/// Loading an id must not recursively request the same id on the same thread.
pub struct ModuleCache<M> {
  slots: Mutex<HashMap<String, Arc<OnceCell<M>>>>,
}

impl<M: Clone> ModuleCache<M> {
  pub fn new() -> Self {
    Self {
      slots: Mutex::new(HashMap::new()),
    }
  }

  fn slot(&self, id: &str) -> Arc<OnceCell<M>> {
    let mut slots = self.slots.lock();
    Arc::clone(slots.entry(id.to_string()).or_default())
  }

  pub fn get(&self, id: &str) -> Option<M> {
    let slots = self.slots.lock();
    slots.get(id).and_then(|slot| slot.get().cloned())
  }

  pub fn get_or_try_load<E>(&self, id: &str, load: impl FnOnce() -> Result<M, E>) -> Result<M, E> {
    // The map lock is released before loading so other ids proceed in parallel.
    let slot = self.slot(id);
    slot.get_or_try_init(load).cloned()
  }

  pub fn is_loaded(&self, id: &str) -> bool {
    self.get(id).is_some()
  }

  /// Number of loaded modules.
  pub fn len(&self) -> usize {
    self.slots.lock().values().filter(|slot| slot.get().is_some()).count()
  }

  pub fn is_empty(&self) -> bool {
    self.len() == 0
  }
}

impl<M: Clone> Default for ModuleCache<M> {
  fn default() -> Self {
    Self::new()
  }
}
