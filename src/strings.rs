use ahash::AHashMap;

use crate::error::{Error, Result};

/// Deduplicated, id-addressable table of UTF-8 tag strings shared by all
/// entity columns. Id 0 is reserved for the empty string (PBF convention).
///
/// Append-only: interning is single-threaded during ingest, and the table is
/// frozen together with the store, so lookups need no locking.
#[derive(Debug)]
pub struct StringTable {
    strings: Vec<Box<str>>,
    index: AHashMap<Box<str>, u32>,
}

impl Default for StringTable {
    fn default() -> Self {
        Self::new()
    }
}

impl StringTable {
    pub fn new() -> Self {
        let mut table = Self { strings: Vec::new(), index: AHashMap::new() };
        table.intern("");
        table
    }

    /// Intern a string, returning its stable id. Idempotent.
    pub fn intern(&mut self, s: &str) -> u32 {
        if let Some(&id) = self.index.get(s) {
            return id;
        }
        let id = self.strings.len() as u32;
        let boxed: Box<str> = s.into();
        self.strings.push(boxed.clone());
        self.index.insert(boxed, id);
        id
    }

    /// Resolve an id. Out-of-range ids indicate a corrupt source.
    pub fn get(&self, id: u32) -> Result<&str> {
        self.strings
            .get(id as usize)
            .map(|s| s.as_ref())
            .ok_or_else(|| Error::corrupt(format!("string id {id} out of range")))
    }

    /// Id for a string that may or may not be interned yet.
    pub fn lookup(&self, s: &str) -> Option<u32> {
        self.index.get(s).copied()
    }

    /// Number of distinct strings, including the reserved empty string.
    #[inline]
    pub fn len(&self) -> usize {
        self.strings.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        // Never true in practice: id 0 is always present.
        self.strings.is_empty()
    }
}
