use alloc::vec::Vec;
use core::slice;

use crate::Error;

/// Number of entries a table reserves each time it grows.
pub(crate) const TABLE_BATCH: usize = 64;

/// An append-only table of records used by the encoder.
///
/// Capacity grows by [`TABLE_BATCH`] entries whenever the table is full.
/// Allocation failures are reported as [`Error::NoMemory`] instead of
/// aborting.
#[derive(Clone, Debug)]
pub(crate) struct Table<T> {
    entries: Vec<T>,
}

impl<T> Table<T> {
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
        }
    }

    /// Append an entry and return its index.
    pub fn push(&mut self, entry: T) -> Result<usize, Error> {
        if self.entries.len() == self.entries.capacity() {
            self.entries
                .try_reserve_exact(TABLE_BATCH)
                .map_err(|_| Error::NoMemory)?;
        }

        let index = self.entries.len();
        self.entries.push(entry);
        Ok(index)
    }

    pub fn get(&self, index: usize) -> Option<&T> {
        self.entries.get(index)
    }

    pub fn get_mut(&mut self, index: usize) -> Option<&mut T> {
        self.entries.get_mut(index)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[cfg(test)]
    pub fn capacity(&self) -> usize {
        self.entries.capacity()
    }

    pub fn iter(&self) -> slice::Iter<'_, T> {
        self.entries.iter()
    }

    pub fn as_slice(&self) -> &[T] {
        &self.entries
    }
}

impl<T> Default for Table<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn grows_in_batches() {
        let mut table = Table::new();
        assert_eq!(table.capacity(), 0);

        assert_eq!(table.push(0u32), Ok(0));
        assert_eq!(table.capacity(), TABLE_BATCH);

        for i in 1..TABLE_BATCH as u32 {
            table.push(i).unwrap();
        }
        assert_eq!(table.capacity(), TABLE_BATCH);

        assert_eq!(table.push(64), Ok(64));
        assert_eq!(table.capacity(), 2 * TABLE_BATCH);
        assert_eq!(table.len(), 65);
    }

    #[test]
    fn random_access() {
        let mut table = Table::new();
        table.push('a').unwrap();
        table.push('b').unwrap();

        *table.get_mut(1).unwrap() = 'c';

        assert_eq!(table.get(0), Some(&'a'));
        assert_eq!(table.get(1), Some(&'c'));
        assert_eq!(table.get(2), None);
        assert_eq!(table.as_slice(), &['a', 'c']);
    }
}
