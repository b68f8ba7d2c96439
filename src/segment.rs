//! Interned road segment identifiers (TMC codes).
//!
//! NPMRDS exports repeat the same few thousand segment codes millions of
//! times. Every row of a feed shares one allocation per distinct code.

use std::collections::HashSet;
use std::fmt;
use std::ops::Deref;
use std::sync::Arc;

/// A segment code. Equality, ordering and hashing are by value, so ids
/// produced by different interners still join correctly.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SegmentId(Arc<str>);

impl SegmentId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Deref for SegmentId {
    type Target = str;

    fn deref(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SegmentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Debug for SegmentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", &*self.0)
    }
}

impl From<&str> for SegmentId {
    fn from(code: &str) -> Self {
        SegmentId(Arc::from(code))
    }
}

/// Deduplicates segment codes while a feed is being loaded.
#[derive(Debug, Default)]
pub struct SegmentInterner {
    codes: HashSet<Arc<str>>,
}

impl SegmentInterner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn intern(&mut self, code: &str) -> SegmentId {
        if let Some(existing) = self.codes.get(code) {
            return SegmentId(Arc::clone(existing));
        }
        let shared: Arc<str> = Arc::from(code);
        self.codes.insert(Arc::clone(&shared));
        SegmentId(shared)
    }

    /// Number of distinct codes seen so far.
    pub fn len(&self) -> usize {
        self.codes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.codes.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_intern_shares_allocation() {
        let mut interner = SegmentInterner::new();
        let a = interner.intern("108+04520");
        let b = interner.intern("108+04520");
        let c = interner.intern("108-04521");

        assert!(Arc::ptr_eq(&a.0, &b.0));
        assert_ne!(a, c);
        assert_eq!(interner.len(), 2);
    }

    #[test]
    fn test_ids_from_different_interners_are_equal() {
        let mut all = SegmentInterner::new();
        let mut trucks = SegmentInterner::new();
        assert_eq!(all.intern("108+04520"), trucks.intern("108+04520"));
        assert_eq!(SegmentId::from("X").as_str(), "X");
    }
}
