//! Typed helpers over the raw record operations: fixed or variable layout,
//! unkeyed, keyed, and unique-key (get/set) flavors.

use std::marker::PhantomData;

use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout, Unaligned};

use crate::{Error, Flash, PageId, Rec, Store};

/// Plain-data record types storable in fixed slots: bit-valid in every
/// pattern, byte-serializable, and readable at any alignment straight out
/// of the flash mapping.
pub trait Record: FromBytes + IntoBytes + Immutable + KnownLayout + Unaligned {}

impl<T: FromBytes + IntoBytes + Immutable + KnownLayout + Unaligned> Record for T {}

fn decode<T: Record>(bytes: &[u8]) -> Option<&T> {
    T::ref_from_prefix(bytes).map(|(t, _)| t).ok()
}

/// Fixed-size records whose own first word serves as the key.
pub struct FixedStorage<T> {
    pub page: PageId,
    _record: PhantomData<T>,
}

impl<T: Record> FixedStorage<T> {
    pub const fn new(page: PageId) -> FixedStorage<T> {
        FixedStorage {
            page,
            _record: PhantomData,
        }
    }

    pub fn add<F: Flash>(&self, store: &mut Store<F>, record: &T) -> Result<Rec, Error> {
        store.add_fixed(self.page, record.as_bytes())
    }

    pub fn unordered_first<'a, F: Flash>(&self, store: &'a Store<F>) -> Option<(Rec, &'a T)> {
        let rec = store.find_unordered_first(self.page, 0)?;
        Some((rec, decode(store.bytes(rec))?))
    }

    pub fn unordered_next<'a, F: Flash>(
        &self,
        store: &'a Store<F>,
        after: Rec,
    ) -> Option<(Rec, &'a T)> {
        let rec = store.find_unordered_next(after, 0)?;
        Some((rec, decode(store.bytes(rec))?))
    }

    pub fn newest_first<'a, F: Flash>(&self, store: &'a Store<F>) -> Option<(Rec, &'a T)> {
        let rec = store.find_newest_first(self.page, 0)?;
        Some((rec, decode(store.bytes(rec))?))
    }

    pub fn newest_next<'a, F: Flash>(
        &self,
        store: &'a Store<F>,
        after: Rec,
    ) -> Option<(Rec, &'a T)> {
        let rec = store.find_newest_next(after, 0)?;
        Some((rec, decode(store.bytes(rec))?))
    }

    pub fn oldest_first<'a, F: Flash>(&self, store: &'a Store<F>) -> Option<(Rec, &'a T)> {
        let rec = store.find_oldest_first(self.page, 0)?;
        Some((rec, decode(store.bytes(rec))?))
    }

    pub fn oldest_next<'a, F: Flash>(
        &self,
        store: &'a Store<F>,
        after: Rec,
    ) -> Option<(Rec, &'a T)> {
        let rec = store.find_oldest_next(after, 0)?;
        Some((rec, decode(store.bytes(rec))?))
    }
}

/// Variable-size records whose own first word serves as the key.
pub struct VariableStorage {
    pub page: PageId,
}

impl VariableStorage {
    pub const fn new(page: PageId) -> VariableStorage {
        VariableStorage { page }
    }

    pub fn add<F: Flash>(&self, store: &mut Store<F>, data: &[u8]) -> Result<Rec, Error> {
        store.add_var(self.page, data)
    }

    pub fn unordered_first<'a, F: Flash>(&self, store: &'a Store<F>) -> Option<(Rec, &'a [u8])> {
        let rec = store.find_unordered_first(self.page, 0)?;
        Some((rec, store.bytes(rec)))
    }

    pub fn unordered_next<'a, F: Flash>(
        &self,
        store: &'a Store<F>,
        after: Rec,
    ) -> Option<(Rec, &'a [u8])> {
        let rec = store.find_unordered_next(after, 0)?;
        Some((rec, store.bytes(rec)))
    }

    pub fn newest_first<'a, F: Flash>(&self, store: &'a Store<F>) -> Option<(Rec, &'a [u8])> {
        let rec = store.find_newest_first(self.page, 0)?;
        Some((rec, store.bytes(rec)))
    }

    pub fn newest_next<'a, F: Flash>(
        &self,
        store: &'a Store<F>,
        after: Rec,
    ) -> Option<(Rec, &'a [u8])> {
        let rec = store.find_newest_next(after, 0)?;
        Some((rec, store.bytes(rec)))
    }

    pub fn oldest_first<'a, F: Flash>(&self, store: &'a Store<F>) -> Option<(Rec, &'a [u8])> {
        let rec = store.find_oldest_first(self.page, 0)?;
        Some((rec, store.bytes(rec)))
    }

    pub fn oldest_next<'a, F: Flash>(
        &self,
        store: &'a Store<F>,
        after: Rec,
    ) -> Option<(Rec, &'a [u8])> {
        let rec = store.find_oldest_next(after, 0)?;
        Some((rec, store.bytes(rec)))
    }
}

/// Fixed-size records stored under explicit 32-bit keys. The typed value
/// excludes the 4-byte key prefix.
pub struct FixedKeyStorage<T> {
    pub page: PageId,
    _record: PhantomData<T>,
}

impl<T: Record> FixedKeyStorage<T> {
    pub const fn new(page: PageId) -> FixedKeyStorage<T> {
        FixedKeyStorage {
            page,
            _record: PhantomData,
        }
    }

    pub fn add<F: Flash>(&self, store: &mut Store<F>, key: u32, record: &T) -> Result<Rec, Error> {
        store.add_fixed_keyed(self.page, key, record.as_bytes())
    }

    /// Replaces all records stored under `key` with this one.
    pub fn replace<F: Flash>(
        &self,
        store: &mut Store<F>,
        key: u32,
        record: &T,
    ) -> Result<Rec, Error> {
        store.replace_fixed(self.page, key, record.as_bytes())
    }

    pub fn unordered_first<'a, F: Flash>(
        &self,
        store: &'a Store<F>,
        key: u32,
    ) -> Option<(Rec, &'a T)> {
        let rec = store.find_unordered_first(self.page, key)?;
        Some((rec, decode(store.payload(rec))?))
    }

    /// Continues the enumeration under the same key as `after`.
    pub fn unordered_next<'a, F: Flash>(
        &self,
        store: &'a Store<F>,
        after: Rec,
    ) -> Option<(Rec, &'a T)> {
        let rec = store.find_unordered_next(after, store.key(after))?;
        Some((rec, decode(store.payload(rec))?))
    }

    pub fn newest_first<'a, F: Flash>(
        &self,
        store: &'a Store<F>,
        key: u32,
    ) -> Option<(Rec, &'a T)> {
        let rec = store.find_newest_first(self.page, key)?;
        Some((rec, decode(store.payload(rec))?))
    }

    pub fn newest_next<'a, F: Flash>(
        &self,
        store: &'a Store<F>,
        after: Rec,
    ) -> Option<(Rec, &'a T)> {
        let rec = store.find_newest_next(after, store.key(after))?;
        Some((rec, decode(store.payload(rec))?))
    }

    pub fn oldest_first<'a, F: Flash>(
        &self,
        store: &'a Store<F>,
        key: u32,
    ) -> Option<(Rec, &'a T)> {
        let rec = store.find_oldest_first(self.page, key)?;
        Some((rec, decode(store.payload(rec))?))
    }

    pub fn oldest_next<'a, F: Flash>(
        &self,
        store: &'a Store<F>,
        after: Rec,
    ) -> Option<(Rec, &'a T)> {
        let rec = store.find_oldest_next(after, store.key(after))?;
        Some((rec, decode(store.payload(rec))?))
    }

    /// First record of any key, yielding the key alongside the value.
    pub fn enumerate_unordered_first<'a, F: Flash>(
        &self,
        store: &'a Store<F>,
    ) -> Option<(Rec, u32, &'a T)> {
        let rec = store.find_unordered_first(self.page, 0)?;
        Some((rec, store.key(rec), decode(store.payload(rec))?))
    }

    pub fn enumerate_unordered_next<'a, F: Flash>(
        &self,
        store: &'a Store<F>,
        after: Rec,
    ) -> Option<(Rec, u32, &'a T)> {
        let rec = store.find_unordered_next(after, 0)?;
        Some((rec, store.key(rec), decode(store.payload(rec))?))
    }
}

/// Variable-size records stored under explicit 32-bit keys. Returned spans
/// exclude the 4-byte key prefix.
pub struct VariableKeyStorage {
    pub page: PageId,
}

impl VariableKeyStorage {
    pub const fn new(page: PageId) -> VariableKeyStorage {
        VariableKeyStorage { page }
    }

    pub fn add<F: Flash>(
        &self,
        store: &mut Store<F>,
        key: u32,
        data: &[u8],
    ) -> Result<Rec, Error> {
        store.add_var_keyed(self.page, key, data)
    }

    /// Replaces all records stored under `key` with this one.
    pub fn replace<F: Flash>(
        &self,
        store: &mut Store<F>,
        key: u32,
        data: &[u8],
    ) -> Result<Rec, Error> {
        store.replace_var(self.page, key, data)
    }

    pub fn unordered_first<'a, F: Flash>(
        &self,
        store: &'a Store<F>,
        key: u32,
    ) -> Option<(Rec, &'a [u8])> {
        let rec = store.find_unordered_first(self.page, key)?;
        Some((rec, store.payload(rec)))
    }

    /// Continues the enumeration under the same key as `after`.
    pub fn unordered_next<'a, F: Flash>(
        &self,
        store: &'a Store<F>,
        after: Rec,
    ) -> Option<(Rec, &'a [u8])> {
        let rec = store.find_unordered_next(after, store.key(after))?;
        Some((rec, store.payload(rec)))
    }

    pub fn newest_first<'a, F: Flash>(
        &self,
        store: &'a Store<F>,
        key: u32,
    ) -> Option<(Rec, &'a [u8])> {
        let rec = store.find_newest_first(self.page, key)?;
        Some((rec, store.payload(rec)))
    }

    pub fn newest_next<'a, F: Flash>(
        &self,
        store: &'a Store<F>,
        after: Rec,
    ) -> Option<(Rec, &'a [u8])> {
        let rec = store.find_newest_next(after, store.key(after))?;
        Some((rec, store.payload(rec)))
    }

    pub fn oldest_first<'a, F: Flash>(
        &self,
        store: &'a Store<F>,
        key: u32,
    ) -> Option<(Rec, &'a [u8])> {
        let rec = store.find_oldest_first(self.page, key)?;
        Some((rec, store.payload(rec)))
    }

    pub fn oldest_next<'a, F: Flash>(
        &self,
        store: &'a Store<F>,
        after: Rec,
    ) -> Option<(Rec, &'a [u8])> {
        let rec = store.find_oldest_next(after, store.key(after))?;
        Some((rec, store.payload(rec)))
    }

    pub fn enumerate_unordered_first<'a, F: Flash>(
        &self,
        store: &'a Store<F>,
    ) -> Option<(Rec, u32, &'a [u8])> {
        let rec = store.find_unordered_first(self.page, 0)?;
        Some((rec, store.key(rec), store.payload(rec)))
    }

    pub fn enumerate_unordered_next<'a, F: Flash>(
        &self,
        store: &'a Store<F>,
        after: Rec,
    ) -> Option<(Rec, u32, &'a [u8])> {
        let rec = store.find_unordered_next(after, 0)?;
        Some((rec, store.key(rec), store.payload(rec)))
    }
}

/// Get/set storage for fixed-size values with unique keys, backed by
/// replace.
pub struct FixedUniqueKeyStorage<T> {
    pub page: PageId,
    _record: PhantomData<T>,
}

impl<T: Record> FixedUniqueKeyStorage<T> {
    pub const fn new(page: PageId) -> FixedUniqueKeyStorage<T> {
        FixedUniqueKeyStorage {
            page,
            _record: PhantomData,
        }
    }

    pub fn get<'a, F: Flash>(&self, store: &'a Store<F>, key: u32) -> Option<&'a T> {
        let rec = store.find_unordered_first(self.page, key)?;
        decode(store.payload(rec))
    }

    pub fn set<F: Flash>(&self, store: &mut Store<F>, key: u32, record: &T) -> Result<Rec, Error> {
        store.replace_fixed(self.page, key, record.as_bytes())
    }

    pub fn delete<F: Flash>(&self, store: &mut Store<F>, key: u32) -> bool {
        store.delete(self.page, key)
    }
}

/// Get/set storage for variable-size values with unique keys, backed by
/// replace.
pub struct VariableUniqueKeyStorage {
    pub page: PageId,
}

impl VariableUniqueKeyStorage {
    pub const fn new(page: PageId) -> VariableUniqueKeyStorage {
        VariableUniqueKeyStorage { page }
    }

    pub fn get<'a, F: Flash>(&self, store: &'a Store<F>, key: u32) -> Option<&'a [u8]> {
        let rec = store.find_unordered_first(self.page, key)?;
        Some(store.payload(rec))
    }

    pub fn set<F: Flash>(&self, store: &mut Store<F>, key: u32, data: &[u8]) -> Result<Rec, Error> {
        store.replace_var(self.page, key, data)
    }

    pub fn delete<F: Flash>(&self, store: &mut Store<F>, key: u32) -> bool {
        store.delete(self.page, key)
    }
}
