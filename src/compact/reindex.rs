//! Old-to-new index tables for deleting table entries.

use std::collections::BTreeSet;

use crate::util::{Error, Result, TableKind};

/// Maps every old index of a table to its index after deletions.
///
/// `new = old - (number of deleted indices below old)`; deleted indices
/// map to nothing.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Reindex {
    kind: TableKind,
    map: Vec<Option<usize>>,
    deleted: usize,
}

impl Reindex {
    /// Build the table for a table of `len` entries losing `deleted`.
    pub fn removing(kind: TableKind, len: usize, deleted: &BTreeSet<usize>) -> Self {
        let mut map = Vec::with_capacity(len);
        let mut shift = 0;
        for old in 0..len {
            if deleted.contains(&old) {
                map.push(None);
                shift += 1;
            } else {
                map.push(Some(old - shift));
            }
        }
        Self {
            kind,
            map,
            deleted: shift,
        }
    }

    /// New index of `old`, `None` if it was deleted or never existed.
    #[inline]
    pub fn get(&self, old: usize) -> Option<usize> {
        self.map.get(old).copied().flatten()
    }

    /// New index of a reference that must survive.
    pub fn remap(&self, old: usize) -> Result<usize> {
        self.get(old)
            .ok_or_else(|| Error::dangling(self.kind, old, self.new_len()))
    }

    /// Rewrite a reference in place.
    #[inline]
    pub fn apply(&self, slot: &mut usize) -> Result<()> {
        *slot = self.remap(*slot)?;
        Ok(())
    }

    #[inline]
    pub fn is_deleted(&self, old: usize) -> bool {
        matches!(self.map.get(old), Some(None))
    }

    /// Table length before deletion.
    #[inline]
    pub fn old_len(&self) -> usize {
        self.map.len()
    }

    #[inline]
    pub fn new_len(&self) -> usize {
        self.map.len() - self.deleted
    }

    #[inline]
    pub fn is_identity(&self) -> bool {
        self.deleted == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shift() {
        let deleted: BTreeSet<usize> = [1, 3].into_iter().collect();
        let map = Reindex::removing(TableKind::BufferView, 6, &deleted);
        assert_eq!(map.get(0), Some(0));
        assert_eq!(map.get(1), None);
        assert_eq!(map.get(2), Some(1));
        assert_eq!(map.get(3), None);
        assert_eq!(map.get(4), Some(2));
        assert_eq!(map.get(5), Some(3));
        assert_eq!(map.get(6), None);
        assert!(map.is_deleted(3));
        assert!(!map.is_deleted(6));
        assert_eq!(map.new_len(), 4);
    }

    #[test]
    fn test_remap_deleted_is_dangling() {
        let deleted: BTreeSet<usize> = [0].into_iter().collect();
        let map = Reindex::removing(TableKind::Buffer, 2, &deleted);
        let mut slot = 1;
        map.apply(&mut slot).unwrap();
        assert_eq!(slot, 0);
        assert!(matches!(
            map.remap(0),
            Err(Error::DanglingReference { kind: TableKind::Buffer, index: 0, count: 1 })
        ));
    }

    #[test]
    fn test_identity() {
        let map = Reindex::removing(TableKind::Accessor, 3, &BTreeSet::new());
        assert!(map.is_identity());
        assert_eq!(map.get(2), Some(2));
    }
}
