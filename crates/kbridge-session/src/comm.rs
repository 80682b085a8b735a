//! Registry of comm ids announced by the kernel.
//!
//! Ids accumulate for the lifetime of the engine; there is no removal,
//! not even on `comm_close`.

use std::collections::HashSet;

#[derive(Debug, Default)]
pub struct CommRegistry {
    ids: HashSet<String>,
}

impl CommRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add `id`. Returns `true` if it was not known before.
    pub fn register(&mut self, id: &str) -> bool {
        if self.ids.contains(id) {
            return false;
        }
        self.ids.insert(id.to_string())
    }

    pub fn contains(&self, id: &str) -> bool {
        self.ids.contains(id)
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.ids.iter().map(String::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn register_deduplicates() {
        let mut comms = CommRegistry::new();
        assert!(comms.register("abc123"));
        assert!(!comms.register("abc123"));
        assert_eq!(comms.len(), 1);
    }

    #[test]
    fn contains_only_registered() {
        let mut comms = CommRegistry::new();
        assert!(comms.is_empty());
        comms.register("abc123");
        assert!(comms.contains("abc123"));
        assert!(!comms.contains("zzz"));
    }

    #[test]
    fn iter_lists_every_id() {
        let mut comms = CommRegistry::new();
        comms.register("a");
        comms.register("b");
        let mut ids: Vec<&str> = comms.iter().collect();
        ids.sort_unstable();
        assert_eq!(ids, vec!["a", "b"]);
    }
}
