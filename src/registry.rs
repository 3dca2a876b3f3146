//! Named registries of shared capabilities
//!
//! Handlers, validators and collectors all live in a [`Registry`]. Readers
//! take a [`Registry::snapshot`] and release the lock before calling into any
//! entry, so registration never waits on a slow handler or check.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;

/// Name-keyed set of shared trait objects
pub struct Registry<T: ?Sized> {
    entries: RwLock<HashMap<String, Arc<T>>>,
}

impl<T: ?Sized> Registry<T> {
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
        }
    }

    /// Insert or replace an entry, returning the replaced one
    pub fn register(&self, name: impl Into<String>, entry: Arc<T>) -> Option<Arc<T>> {
        let mut entries = self.entries.write();
        entries.insert(name.into(), entry)
    }

    pub fn unregister(&self, name: &str) -> Option<Arc<T>> {
        let mut entries = self.entries.write();
        entries.remove(name)
    }

    pub fn get(&self, name: &str) -> Option<Arc<T>> {
        let entries = self.entries.read();
        entries.get(name).cloned()
    }

    /// Copy of all entries, sorted by name
    pub fn snapshot(&self) -> Vec<(String, Arc<T>)> {
        let mut snapshot: Vec<(String, Arc<T>)> = {
            let entries = self.entries.read();
            entries
                .iter()
                .map(|(name, entry)| (name.clone(), Arc::clone(entry)))
                .collect()
        };
        snapshot.sort_by(|a, b| a.0.cmp(&b.0));
        snapshot
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.entries.read().keys().cloned().collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<T: ?Sized> Default for Registry<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    trait Named: Send + Sync {
        fn label(&self) -> String;
    }

    struct Fixed(&'static str);

    impl Named for Fixed {
        fn label(&self) -> String {
            self.0.to_string()
        }
    }

    #[test]
    fn test_register_replace_unregister() {
        let registry: Registry<dyn Named> = Registry::new();
        assert!(registry.is_empty());

        assert!(registry.register("a", Arc::new(Fixed("first"))).is_none());
        let replaced = registry.register("a", Arc::new(Fixed("second"))).unwrap();
        assert_eq!(replaced.label(), "first");
        assert_eq!(registry.get("a").unwrap().label(), "second");
        assert_eq!(registry.len(), 1);

        assert!(registry.unregister("a").is_some());
        assert!(registry.unregister("a").is_none());
        assert!(registry.is_empty());
    }

    #[test]
    fn test_snapshot_is_detached() {
        let registry: Registry<dyn Named> = Registry::new();
        registry.register("b", Arc::new(Fixed("b")));
        registry.register("a", Arc::new(Fixed("a")));

        let snapshot = registry.snapshot();
        registry.register("c", Arc::new(Fixed("c")));
        registry.unregister("a");

        // Later mutations do not affect a taken snapshot
        let names: Vec<&str> = snapshot.iter().map(|(n, _)| n.as_str()).collect();
        assert_eq!(names, vec!["a", "b"]);
        assert_eq!(registry.names(), vec!["b".to_string(), "c".to_string()]);
    }

    #[test]
    fn test_register_while_snapshot_held() {
        let registry: Arc<Registry<dyn Named>> = Arc::new(Registry::new());
        registry.register("a", Arc::new(Fixed("a")));

        let snapshot = registry.snapshot();
        let writer = Arc::clone(&registry);
        std::thread::spawn(move || {
            writer.register("b", Arc::new(Fixed("b")));
        })
        .join()
        .unwrap();

        assert_eq!(snapshot.len(), 1);
        assert_eq!(registry.len(), 2);
    }
}
