use std::collections::BTreeSet;

use loadcheck_config::ConfigError;

/// Allocates bucket names of the form `{prefix}-{suffix:08}` under a fixed
/// ceiling of concurrently-held suffixes.
///
/// New suffixes fill the lowest unused slot so the namespace stays dense;
/// once every suffix under the ceiling has been minted, deleted names are
/// handed back out of a last-deleted-first pool.
#[derive(Debug)]
pub struct BucketNameAllocator {
    prefix: String,
    ceiling: u32,
    used: BTreeSet<u32>,
    reuse: Vec<String>,
}

impl BucketNameAllocator {
    pub fn new(prefix: impl Into<String>, ceiling: u32) -> Self {
        BucketNameAllocator {
            prefix: prefix.into(),
            ceiling,
            used: BTreeSet::new(),
            reuse: Vec::new(),
        }
    }

    fn format(&self, suffix: u32) -> String {
        format!("{}-{:08}", self.prefix, suffix)
    }

    fn parse_suffix(&self, name: &str) -> Option<u32> {
        let rest = name.strip_prefix(self.prefix.as_str())?.strip_prefix('-')?;
        rest.parse().ok()
    }

    /// Mark a name found on the server as in use, so fresh allocations skip
    /// it. Names outside this allocator's prefix are ignored.
    pub fn observe_existing(&mut self, name: &str) -> Result<(), ConfigError> {
        if let Some(suffix) = self.parse_suffix(name) {
            if suffix > self.ceiling {
                return Err(ConfigError::BucketCeilingExceeded {
                    name: name.to_string(),
                    ceiling: self.ceiling,
                });
            }
            self.used.insert(suffix);
        }
        Ok(())
    }

    /// Hand out the next name: the lowest unused suffix under the ceiling,
    /// else the most recently deleted name, else `None`.
    pub fn next(&mut self) -> Option<String> {
        if let Some(suffix) = (1..=self.ceiling).find(|s| !self.used.contains(s)) {
            self.used.insert(suffix);
            return Some(self.format(suffix));
        }
        self.reuse.pop()
    }

    /// Return a deleted name to the pool. Idempotent.
    pub fn note_deleted(&mut self, name: &str) {
        if self.parse_suffix(name).is_some() && !self.reuse.iter().any(|n| n == name) {
            self.reuse.push(name.to_string());
        }
    }
}

/// Allocates key names `key-{n:08}` from a monotonically increasing counter.
/// Key names are never reused within a session.
#[derive(Debug, Default)]
pub struct KeyNameAllocator {
    high: u64,
}

impl KeyNameAllocator {
    pub fn new() -> Self {
        KeyNameAllocator { high: 0 }
    }

    /// Advance the counter past a key found on the server.
    pub fn observe_existing(&mut self, key: &str) {
        if let Some(n) = key.strip_prefix("key-").and_then(|s| s.parse::<u64>().ok()) {
            self.high = self.high.max(n);
        }
    }

    pub fn next(&mut self) -> String {
        self.high += 1;
        format!("key-{:08}", self.high)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bucket_names_fill_lowest_gap() {
        let mut alloc = BucketNameAllocator::new("user1", 6);
        for existing in ["user1-00000001", "user1-00000003", "user1-00000005"] {
            alloc.observe_existing(existing).unwrap();
        }
        assert_eq!(alloc.next().as_deref(), Some("user1-00000002"));
        assert_eq!(alloc.next().as_deref(), Some("user1-00000004"));
        assert_eq!(alloc.next().as_deref(), Some("user1-00000006"));
        assert_eq!(alloc.next(), None);
    }

    #[test]
    fn test_deleted_names_reused_only_after_ceiling() {
        let mut alloc = BucketNameAllocator::new("u", 3);
        let first = alloc.next().unwrap();
        alloc.next().unwrap();
        alloc.note_deleted(&first);
        alloc.note_deleted(&first);
        // Fresh suffixes are preferred while any remain under the ceiling.
        assert_eq!(alloc.next().as_deref(), Some("u-00000003"));
        // Then the pool serves the deleted name exactly once, despite the
        // double notification.
        assert_eq!(alloc.next(), Some(first));
        assert_eq!(alloc.next(), None);
    }

    #[test]
    fn test_ceiling_violation_detected_on_observe() {
        let mut alloc = BucketNameAllocator::new("u", 3);
        let err = alloc.observe_existing("u-00000009").unwrap_err();
        assert!(matches!(
            err,
            ConfigError::BucketCeilingExceeded { ceiling: 3, .. }
        ));
    }

    #[test]
    fn test_foreign_names_ignored() {
        let mut alloc = BucketNameAllocator::new("u", 2);
        alloc.observe_existing("other-00000099").unwrap();
        alloc.observe_existing("u-not-a-number").unwrap();
        assert_eq!(alloc.next().as_deref(), Some("u-00000001"));
    }

    #[test]
    fn test_key_names_advance_past_observed() {
        let mut alloc = KeyNameAllocator::new();
        alloc.observe_existing("key-00000007");
        alloc.observe_existing("key-00000003");
        alloc.observe_existing("unrelated");
        assert_eq!(alloc.next(), "key-00000008");
        assert_eq!(alloc.next(), "key-00000009");
    }
}
