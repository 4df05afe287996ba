//! Specialized collection types

pub use slotmap::{SlotMap, DefaultKey, Key, KeyData};

/// Handle-based map using slot map for stable references
pub type HandleMap<T> = SlotMap<DefaultKey, T>;

/// Pack a slot map key into the opaque `u64` carried by public handles
#[inline]
pub fn key_to_raw(key: DefaultKey) -> u64 {
    key.data().as_ffi()
}

/// Recover a slot map key from a raw handle value
///
/// Stale or foreign values produce a key that simply misses on lookup.
#[inline]
pub fn key_from_raw(raw: u64) -> DefaultKey {
    DefaultKey::from(KeyData::from_ffi(raw))
}
