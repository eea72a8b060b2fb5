// src/core/repository.rs

//! Generic keyed repositories over the cluster-state entities, and a
//! `MultiRepository` that composes two sub-repositories and routes lookups
//! by key membership (used for the replicas+LRC groupset split, spec §4.A).

use crate::core::errors::StormError;
use dashmap::DashMap;
use dashmap::mapref::one::{Ref, RefMut};
use std::hash::Hash;

/// A keyed store of entities, supporting insert-or-get, direct lookup,
/// iteration, and removal. Mirrors the original `Repositary` object, with
/// Rust-shaped error handling instead of `KeyError`.
#[derive(Debug)]
pub struct Repository<K, V> {
    kind: &'static str,
    entries: DashMap<K, V>,
}

impl<K, V> Repository<K, V>
where
    K: Eq + Hash + Clone + std::fmt::Display,
{
    pub fn new(kind: &'static str) -> Self {
        Self {
            kind,
            entries: DashMap::new(),
        }
    }

    /// Inserts `value` under `key`, returning any previous value. Calling
    /// `add` twice with the same key is defined (idempotent overwrite),
    /// mirroring `repo.add(x); repo.add(x)` yielding one element.
    pub fn add(&self, key: K, value: V) -> Option<V> {
        self.entries.insert(key, value)
    }

    pub fn get(&self, key: &K) -> Option<Ref<'_, K, V>> {
        self.entries.get(key)
    }

    pub fn get_mut(&self, key: &K) -> Option<RefMut<'_, K, V>> {
        self.entries.get_mut(key)
    }

    /// Direct lookup that fails with a domain `NotFound` error, per spec §4.A.
    pub fn require(&self, key: &K) -> Result<Ref<'_, K, V>, StormError> {
        self.entries
            .get(key)
            .ok_or_else(|| StormError::not_found(self.kind, key.to_string()))
    }

    pub fn require_mut(&self, key: &K) -> Result<RefMut<'_, K, V>, StormError> {
        self.entries
            .get_mut(key)
            .ok_or_else(|| StormError::not_found(self.kind, key.to_string()))
    }

    pub fn contains(&self, key: &K) -> bool {
        self.entries.contains_key(key)
    }

    /// Removes the entry for `key`. Removing an absent key is a defined
    /// error (spec §8, "Repository idempotence").
    pub fn remove(&self, key: &K) -> Result<V, StormError> {
        self.entries
            .remove(key)
            .map(|(_, v)| v)
            .ok_or_else(|| StormError::not_found(self.kind, key.to_string()))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn keys(&self) -> Vec<K> {
        self.entries.iter().map(|e| e.key().clone()).collect()
    }

    pub fn iter(&self) -> dashmap::iter::Iter<'_, K, V> {
        self.entries.iter()
    }
}

/// Which sub-repository of a `MultiRepository` a key belongs to.
pub enum Side {
    Left,
    Right,
}

/// Composes two repositories keyed by the same type and routes lookups by
/// key membership. Duplicate keys across the two sub-repositories are a
/// programmer error (spec §4.A).
///
/// The open question about `keys()`/`values()` in the original
/// (`itevalues` vs `itervalues` typo in `MultiRepository.keys()`) is
/// resolved per spec §9: both `keys()` and `values()` are flat
/// concatenations of the two sub-repositories' corresponding iterators.
pub struct MultiRepository<K, VL, VR> {
    kind: &'static str,
    left: Repository<K, VL>,
    right: Repository<K, VR>,
}

impl<K, VL, VR> MultiRepository<K, VL, VR>
where
    K: Eq + Hash + Clone + std::fmt::Display,
{
    pub fn new(kind: &'static str, left: Repository<K, VL>, right: Repository<K, VR>) -> Self {
        Self { kind, left, right }
    }

    pub fn left(&self) -> &Repository<K, VL> {
        &self.left
    }

    pub fn right(&self) -> &Repository<K, VR> {
        &self.right
    }

    pub fn contains(&self, key: &K) -> bool {
        self.left.contains(key) || self.right.contains(key)
    }

    pub fn side_of(&self, key: &K) -> Option<Side> {
        if self.left.contains(key) {
            Some(Side::Left)
        } else if self.right.contains(key) {
            Some(Side::Right)
        } else {
            None
        }
    }

    /// Inserting under a key already present on the other side is a
    /// programmer error and is rejected rather than silently shadowed.
    pub fn add_left(&self, key: K, value: VL) -> Result<(), StormError> {
        if self.right.contains(&key) {
            return Err(StormError::Internal(format!(
                "{}: key {} already present in the other sub-repository",
                self.kind, key
            )));
        }
        self.left.add(key, value);
        Ok(())
    }

    pub fn add_right(&self, key: K, value: VR) -> Result<(), StormError> {
        if self.left.contains(&key) {
            return Err(StormError::Internal(format!(
                "{}: key {} already present in the other sub-repository",
                self.kind, key
            )));
        }
        self.right.add(key, value);
        Ok(())
    }

    pub fn keys(&self) -> Vec<K> {
        let mut out = self.left.keys();
        out.extend(self.right.keys());
        out
    }

    pub fn len(&self) -> usize {
        self.left.len() + self.right.len()
    }

    pub fn is_empty(&self) -> bool {
        self.left.is_empty() && self.right.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn add_is_idempotent() {
        let repo: Repository<u64, &str> = Repository::new("thing");
        repo.add(1, "a");
        repo.add(1, "a");
        assert_eq!(repo.len(), 1);
    }

    #[test]
    fn remove_missing_key_is_an_error() {
        let repo: Repository<u64, &str> = Repository::new("thing");
        assert!(repo.remove(&42).is_err());
    }

    #[test]
    fn require_missing_key_is_not_found() {
        let repo: Repository<u64, &str> = Repository::new("thing");
        match repo.require(&1) {
            Err(StormError::NotFound { kind, .. }) => assert_eq!(kind, "thing"),
            _ => panic!("expected NotFound"),
        }
    }

    #[test]
    fn multi_repository_routes_by_membership() {
        let left: Repository<u64, &str> = Repository::new("left");
        let right: Repository<u64, &str> = Repository::new("right");
        let multi = MultiRepository::new("thing", left, right);
        multi.add_left(1, "a").unwrap();
        multi.add_right(2, "b").unwrap();
        assert!(multi.contains(&1));
        assert!(multi.contains(&2));
        assert!(multi.add_right(1, "c").is_err());
        assert_eq!(multi.keys().len(), 2);
    }
}
