//! Service-name dictionary.
//!
//! Log lines name services with short byte strings; spans store a compact
//! [`ServiceId`] instead. Every worker thread owns a [`ServiceDictionary`]
//! fork. Forks share one id allocator and one concurrent name→id table, so
//! a name receives the same id on every worker, while each fork keeps its
//! own unsynchronised tables for the per-line lookups.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tracer_types::ServiceId;

/// State shared by all forks of one dictionary.
struct SharedNames {
    next_id: AtomicU32,
    by_name: DashMap<Arc<[u8]>, ServiceId>,
    by_id: DashMap<ServiceId, Arc<[u8]>>,
}

impl SharedNames {
    fn new() -> Self {
        Self {
            next_id: AtomicU32::new(1),
            by_name: DashMap::new(),
            by_id: DashMap::new(),
        }
    }

    /// Insert-if-absent. Only the winning insertion allocates an id; a
    /// racing loser gets the winner's id and key.
    fn intern(&self, name: &[u8]) -> (ServiceId, Arc<[u8]>) {
        if let Some(entry) = self.by_name.get(name) {
            return (*entry.value(), Arc::clone(entry.key()));
        }
        match self.by_name.entry(Arc::from(name)) {
            Entry::Occupied(entry) => (*entry.get(), Arc::clone(entry.key())),
            Entry::Vacant(entry) => {
                let id = ServiceId::new(self.next_id.fetch_add(1, Ordering::Relaxed));
                let key = Arc::clone(entry.key());
                // Published before the name→id entry becomes visible.
                self.by_id.insert(id, Arc::clone(&key));
                entry.insert(id);
                (id, key)
            }
        }
    }
}

/// One worker's view of the service-name dictionary.
pub struct ServiceDictionary {
    shared: Arc<SharedNames>,
    by_name: HashMap<Arc<[u8]>, ServiceId>,
    by_id: HashMap<ServiceId, Arc<[u8]>>,
}

impl ServiceDictionary {
    /// A fresh base dictionary with its own id allocator.
    pub fn new() -> Self {
        Self {
            shared: Arc::new(SharedNames::new()),
            by_name: HashMap::new(),
            by_id: HashMap::new(),
        }
    }

    /// A fork sharing id allocation and the name→id table, starting with
    /// empty local tables.
    pub fn fork(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
            by_name: HashMap::new(),
            by_id: HashMap::new(),
        }
    }

    /// Intern `name`, returning its id. Never returns
    /// [`ServiceId::UNRESOLVED`].
    pub fn add(&mut self, name: &[u8]) -> ServiceId {
        if let Some(&id) = self.by_name.get(name) {
            return id;
        }
        let (id, key) = self.shared.intern(name);
        self.by_name.insert(Arc::clone(&key), id);
        self.by_id.insert(id, key);
        id
    }

    /// Local-only lookup: `None` unless this fork added or resolved `id`.
    pub fn get_by_id(&self, id: ServiceId) -> Option<&[u8]> {
        self.by_id.get(&id).map(|name| &**name)
    }

    /// Like [`get_by_id`](Self::get_by_id), but falls back to the shared
    /// table for ids interned by another fork and caches the result.
    pub fn resolve(&mut self, id: ServiceId) -> Option<&[u8]> {
        if !self.by_id.contains_key(&id) {
            let name = self.shared.by_id.get(&id).map(|name| Arc::clone(name.value()))?;
            self.by_name.insert(Arc::clone(&name), id);
            self.by_id.insert(id, name);
        }
        self.get_by_id(id)
    }

    /// Number of ids visible through the local tables.
    pub fn len(&self) -> usize {
        self.by_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_id.is_empty()
    }

    /// Number of names interned across all forks.
    pub fn shared_len(&self) -> usize {
        self.shared.by_name.len()
    }
}

impl Default for ServiceDictionary {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for ServiceDictionary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceDictionary")
            .field("local", &self.by_id.len())
            .field("shared", &self.shared.by_name.len())
            .finish()
    }
}
