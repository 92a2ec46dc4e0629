//! Write-behind store for per-read match state across index parts.
//!
//! Keys are the decimal read IDs; values are the version-stamped binary
//! encoding produced by [`crate::read::Read::encode_state`]. The store is a
//! process-lifetime cache behind a single-writer discipline: only the writer
//! thread inserts, and readers consult it between part loads. The value
//! codec stays deterministic so the map could be swapped for an on-disk
//! backend without touching callers.

use foldhash::{HashMap, HashMapExt};

#[derive(Default)]
pub struct KvStore {
    map: HashMap<String, Vec<u8>>,
}

impl KvStore {
    pub fn new() -> KvStore {
        KvStore { map: HashMap::new() }
    }

    #[inline]
    pub fn put(&mut self, key: String, value: Vec<u8>) {
        self.map.insert(key, value);
    }

    #[inline]
    pub fn get(&self, key: &str) -> Option<&[u8]> {
        self.map.get(key).map(Vec::as_slice)
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.map.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn last_write_wins() {
        let mut kv = KvStore::new();
        kv.put("0_3".into(), vec![1]);
        kv.put("0_3".into(), vec![2]);
        assert_eq!(kv.get("0_3"), Some(&[2u8][..]));
        assert_eq!(kv.len(), 1);
        assert_eq!(kv.get("0_4"), None);
    }
}
