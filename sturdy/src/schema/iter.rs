use crate::schema::decoded::{Decoded, Hex};
use crate::schema::key::Key;
use std::collections::HashMap;

/// Iterates over a role's key IDs, yielding the corresponding keys from a key
/// map. Key IDs with no matching key are skipped.
pub(super) struct KeysIter<'a> {
    pub(super) keyids_iter: std::slice::Iter<'a, Decoded<Hex>>,
    pub(super) keys: &'a HashMap<Decoded<Hex>, Key>,
}

impl<'a> Iterator for KeysIter<'a> {
    type Item = &'a Key;

    fn next(&mut self) -> Option<Self::Item> {
        for keyid in self.keyids_iter.by_ref() {
            if let Some(key) = self.keys.get(keyid) {
                return Some(key);
            }
        }
        None
    }
}
