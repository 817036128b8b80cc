//! A map-like object for maps with few entries, such as the handful of
//! attributes attached to one job declaration.

use std::borrow::Borrow;

/// A map-like object implemented as a list of pairs, kept in insertion order.
#[derive(Debug, Clone, PartialEq)]
pub struct SmallMap<K, V>(Vec<(K, V)>);

impl<K, V> Default for SmallMap<K, V> {
    fn default() -> Self {
        SmallMap(Vec::new())
    }
}

impl<K: PartialEq, V> SmallMap<K, V> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts a value, returning the one it replaced.
    pub fn insert(&mut self, k: K, v: V) -> Option<V> {
        for (ik, iv) in self.0.iter_mut() {
            if *ik == k {
                return Some(std::mem::replace(iv, v));
            }
        }
        self.0.push((k, v));
        None
    }

    pub fn get<Q>(&self, q: &Q) -> Option<&V>
    where
        K: Borrow<Q>,
        Q: PartialEq + ?Sized,
    {
        self.0
            .iter()
            .find(|(k, _)| k.borrow() == q)
            .map(|(_, v)| v)
    }

    pub fn iter(&self) -> std::slice::Iter<(K, V)> {
        self.0.iter()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}
