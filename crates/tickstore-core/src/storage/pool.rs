//! Process-wide backend registry.
//!
//! The one legitimate piece of global state: a named pool of shared
//! backend handles so embedding applications can wire several stores to
//! the same connections. It has explicit init and teardown and is never
//! required for correctness; every store works with a directly supplied
//! backend, and queries never read the registry mid-flight.

use std::collections::HashMap;
use std::sync::OnceLock;

use parking_lot::RwLock;

use crate::storage::BackendRef;

static REGISTRY: OnceLock<RwLock<HashMap<String, BackendRef>>> = OnceLock::new();

fn registry() -> &'static RwLock<HashMap<String, BackendRef>> {
    REGISTRY.get_or_init(|| RwLock::new(HashMap::new()))
}

/// Register a backend under `name`, replacing any previous entry.
pub fn register(name: impl Into<String>, backend: BackendRef) {
    registry().write().insert(name.into(), backend);
}

/// Fetch a registered backend handle.
pub fn get(name: &str) -> Option<BackendRef> {
    registry().read().get(name).cloned()
}

/// Remove one registered backend, returning it if present.
pub fn deregister(name: &str) -> Option<BackendRef> {
    registry().write().remove(name)
}

/// Drop every registered backend. Call at process shutdown; stores built
/// from previously fetched handles keep working.
pub fn teardown() {
    registry().write().clear();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryBackend;
    use std::sync::Arc;

    #[test]
    fn register_get_teardown_lifecycle() {
        let name = "pool-test-backend";
        assert!(get(name).is_none());

        let backend: BackendRef = Arc::new(MemoryBackend::new());
        register(name, backend.clone());
        assert!(get(name).is_some());

        // A fetched handle stays alive independently of the registry.
        let held = get(name).expect("registered");
        deregister(name);
        assert!(get(name).is_none());
        drop(held);

        register(name, backend);
        teardown();
        assert!(get(name).is_none());
    }
}
