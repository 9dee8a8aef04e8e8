//! A cuckoo filter over string keys.
//!
//! Keys are reduced to 16-bit fingerprints stored in one of two candidate
//! buckets of four slots each. The second bucket is derived from the first
//! and the fingerprint alone, so entries can be relocated without the key.
//! Lookups never miss an inserted key; unrelated keys may collide with a
//! probability of roughly `8 / 65536`.

use rand::Rng;

const BUCKET_SIZE: usize = 4;
const MAX_KICKS: usize = 500;
const EMPTY: u16 = 0;

type Bucket = [u16; BUCKET_SIZE];

/// Approximate set membership with deletion.
#[derive(Debug, Clone)]
pub struct CuckooFilter {
    buckets: Vec<Bucket>,
    mask: usize,
    len: usize,
    /// Entry displaced by a failed relocation; still a member.
    victim: Option<(usize, u16)>,
}

impl CuckooFilter {
    /// Creates a filter sized for about `capacity` keys.
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        let buckets = capacity.div_ceil(BUCKET_SIZE).max(1).next_power_of_two();
        Self {
            buckets: vec![[EMPTY; BUCKET_SIZE]; buckets],
            mask: buckets - 1,
            len: 0,
            victim: None,
        }
    }

    /// Number of stored fingerprints.
    #[must_use]
    pub const fn len(&self) -> usize {
        self.len
    }

    /// Returns true if nothing is stored.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Number of slots.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.buckets.len() * BUCKET_SIZE
    }

    fn index_and_fingerprint(&self, key: &str) -> (usize, u16) {
        let digest = blake3::hash(key.as_bytes());
        let bytes = digest.as_bytes();
        let hash = u64::from_le_bytes([
            bytes[0], bytes[1], bytes[2], bytes[3], bytes[4], bytes[5], bytes[6], bytes[7],
        ]);
        let fp = u16::from_le_bytes([bytes[8], bytes[9]]);
        let fp = if fp == EMPTY { 1 } else { fp };
        (hash as usize & self.mask, fp)
    }

    fn alt_index(&self, index: usize, fp: u16) -> usize {
        let digest = blake3::hash(&fp.to_le_bytes());
        let bytes = digest.as_bytes();
        let hash = u64::from_le_bytes([
            bytes[0], bytes[1], bytes[2], bytes[3], bytes[4], bytes[5], bytes[6], bytes[7],
        ]);
        (index ^ hash as usize) & self.mask
    }

    fn put(&mut self, index: usize, fp: u16) -> bool {
        match self.buckets[index].iter_mut().find(|slot| **slot == EMPTY) {
            Some(slot) => {
                *slot = fp;
                true
            }
            None => false,
        }
    }

    fn bucket_has(&self, index: usize, fp: u16) -> bool {
        self.buckets[index].contains(&fp)
    }

    /// Adds `key`. Returns false if the filter is full; a key already
    /// reported as present is not stored twice.
    pub fn insert(&mut self, key: &str) -> bool {
        if self.contains(key) {
            return true;
        }
        if self.victim.is_some() {
            return false;
        }

        let (i1, fp) = self.index_and_fingerprint(key);
        let i2 = self.alt_index(i1, fp);
        if self.put(i1, fp) || self.put(i2, fp) {
            self.len += 1;
            return true;
        }

        let mut rng = rand::thread_rng();
        let mut index = if rng.gen_bool(0.5) { i1 } else { i2 };
        let mut fp = fp;
        for _ in 0..MAX_KICKS {
            let slot = rng.gen_range(0..BUCKET_SIZE);
            std::mem::swap(&mut fp, &mut self.buckets[index][slot]);
            index = self.alt_index(index, fp);
            if self.put(index, fp) {
                self.len += 1;
                return true;
            }
        }

        self.victim = Some((index, fp));
        self.len += 1;
        true
    }

    /// Whether `key` may be present. Never false for an inserted key.
    #[must_use]
    pub fn contains(&self, key: &str) -> bool {
        let (i1, fp) = self.index_and_fingerprint(key);
        let i2 = self.alt_index(i1, fp);
        if self.bucket_has(i1, fp) || self.bucket_has(i2, fp) {
            return true;
        }
        self.victim
            .is_some_and(|(index, victim)| victim == fp && (index == i1 || index == i2))
    }

    /// Removes one fingerprint matching `key`. Removing a key that was never
    /// inserted may remove a colliding key.
    pub fn delete(&mut self, key: &str) -> bool {
        let (i1, fp) = self.index_and_fingerprint(key);
        let i2 = self.alt_index(i1, fp);

        for index in [i1, i2] {
            if let Some(slot) = self.buckets[index].iter_mut().find(|slot| **slot == fp) {
                *slot = EMPTY;
                self.len -= 1;
                self.reinsert_victim();
                return true;
            }
        }

        if self
            .victim
            .is_some_and(|(index, victim)| victim == fp && (index == i1 || index == i2))
        {
            self.victim = None;
            self.len -= 1;
            return true;
        }
        false
    }

    fn reinsert_victim(&mut self) {
        if let Some((index, fp)) = self.victim {
            let alt = self.alt_index(index, fp);
            if self.put(index, fp) || self.put(alt, fp) {
                self.victim = None;
            }
        }
    }
}

impl Default for CuckooFilter {
    fn default() -> Self {
        Self::with_capacity(1024)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    mod membership_tests {
        use super::*;

        #[test]
        fn inserted_keys_are_found() {
            let mut filter = CuckooFilter::default();
            assert!(filter.insert("SuccessfulCreate"));
            assert!(filter.insert("Pulled"));

            assert!(filter.contains("SuccessfulCreate"));
            assert!(filter.contains("Pulled"));
            assert!(!filter.contains("Killing"));
            assert_eq!(filter.len(), 2);
        }

        #[test]
        fn duplicate_insert_stored_once() {
            let mut filter = CuckooFilter::default();
            filter.insert("Pulled");
            filter.insert("Pulled");
            assert_eq!(filter.len(), 1);

            assert!(filter.delete("Pulled"));
            assert!(!filter.contains("Pulled"));
        }

        #[test]
        fn delete_missing_key_is_noop() {
            let mut filter = CuckooFilter::default();
            filter.insert("Pulled");
            assert!(!filter.delete("Killing"));
            assert!(filter.contains("Pulled"));
            assert_eq!(filter.len(), 1);
        }

        #[test]
        fn capacity_rounds_to_power_of_two_buckets() {
            let filter = CuckooFilter::with_capacity(100);
            assert_eq!(filter.capacity(), 128);
            assert!(filter.is_empty());
        }

        #[test]
        fn false_positive_rate_is_small() {
            let mut filter = CuckooFilter::with_capacity(2048);
            for i in 0..1000 {
                filter.insert(&format!("reason-{i}"));
            }
            let hits = (0..10_000)
                .filter(|i| filter.contains(&format!("other-{i}")))
                .count();
            assert!(hits < 100, "false positives: {hits}");
        }
    }

    mod load_tests {
        use super::*;

        #[test]
        fn high_load_keeps_every_key() {
            let mut filter = CuckooFilter::with_capacity(256);
            let keys: Vec<String> = (0..200).map(|i| format!("key-{i}")).collect();
            for key in &keys {
                assert!(filter.insert(key), "filter full at {key}");
            }
            for key in &keys {
                assert!(filter.contains(key), "lost {key}");
            }
        }
    }

    proptest! {
        #[test]
        fn no_false_negatives(keys in proptest::collection::hash_set("[A-Za-z]{1,24}", 1..200)) {
            let mut filter = CuckooFilter::with_capacity(512);
            for key in &keys {
                prop_assert!(filter.insert(key));
            }
            for key in &keys {
                prop_assert!(filter.contains(key));
            }
        }

        #[test]
        fn delete_after_insert_removes(key in "[A-Za-z]{1,24}") {
            let mut filter = CuckooFilter::default();
            filter.insert(&key);
            prop_assert!(filter.delete(&key));
            prop_assert!(!filter.contains(&key));
            prop_assert!(filter.is_empty());
        }
    }
}
