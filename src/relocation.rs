//! Pointer relocation tables.
//!
//! A record registers two kinds of entries while it is traversed:
//!
//! - *targets* (`pointed_at`): an object that pointers may refer to, keyed
//!   by its identity and mapped to where it ends up;
//! - *pending pointers* (`pointer_to`): a site whose final content depends
//!   on resolving a key against the targets.
//!
//! Targets are numbered by registration order. The write side maps each
//! [`ObjectId`] to its ordinal [`PointerToken`] and stores that token in the
//! stream; the read side maps the same ordinal back to the handle of the
//! reconstructed object. Because both traversals register targets in the
//! same order, the ordinals agree without any address ever leaving the
//! writing process.
use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::fmt;
use std::hash::Hash;

use crate::error::{Error, Result};

/// Record-scoped placeholder stored in the stream where a pointer was.
///
/// Tokens are 1-based target ordinals; [`PointerToken::NULL`] encodes a null
/// pointer. A token means nothing outside the record it was produced in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PointerToken(u32);

impl PointerToken {
    pub const NULL: PointerToken = PointerToken(0);

    pub fn new(raw: u32) -> Self {
        Self(raw)
    }

    pub fn get(self) -> u32 {
        self.0
    }

    pub fn is_null(self) -> bool {
        self.0 == 0
    }

    // Ordinal of the `index`-th target (0-based) of a record.
    fn ordinal(index: usize) -> Self {
        // a record would need billions of targets to saturate this
        Self(u32::try_from(index + 1).unwrap_or(u32::MAX))
    }
}

impl From<PointerToken> for u64 {
    fn from(token: PointerToken) -> u64 {
        u64::from(token.0)
    }
}

impl fmt::Display for PointerToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Identity of an object on the write side.
///
/// Only equality matters: an index into a collection, or the address of a
/// live object (see [`ObjectId::of`]) both work, as long as the object does
/// not move while the record is being written.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectId(u64);

impl ObjectId {
    pub fn new(raw: u64) -> Self {
        Self(raw)
    }

    /// Identity derived from the address of `object`.
    pub fn of<T: ?Sized>(object: &T) -> Self {
        Self(object as *const T as *const () as usize as u64)
    }

    pub fn get(self) -> u64 {
        self.0
    }
}

impl From<usize> for ObjectId {
    fn from(index: usize) -> Self {
        Self(index as u64)
    }
}

impl From<u64> for ObjectId {
    fn from(raw: u64) -> Self {
        Self(raw)
    }
}

impl From<ObjectId> for u64 {
    fn from(id: ObjectId) -> u64 {
        id.0
    }
}

/// Summary of a completed relocation pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Relocation {
    /// Targets registered with `pointed_at`.
    pub targets: usize,
    /// Non-null pointers registered with `pointer_to`, all now resolved.
    pub pointers: usize,
}

/// Target and pending-pointer tables for one record.
///
/// `K` is the lookup key shared by both tables, `T` what a target resolves
/// to and `S` the site a pending pointer will be patched at.
#[derive(Debug)]
pub(crate) struct RelocationTable<K, T, S> {
    targets: HashMap<K, T>,
    pending: Vec<(K, S)>,
}

impl<K, T, S> Default for RelocationTable<K, T, S> {
    fn default() -> Self {
        Self { targets: HashMap::new(), pending: Vec::new() }
    }
}

impl<K, T, S> RelocationTable<K, T, S>
where
    K: Copy + Eq + Hash + Into<u64>,
    T: Clone,
{
    /// Token the next registered target will receive.
    pub(crate) fn next_token(&self) -> PointerToken {
        PointerToken::ordinal(self.targets.len())
    }

    pub(crate) fn add_target(&mut self, key: K, target: T) -> Result<()> {
        match self.targets.entry(key) {
            Entry::Occupied(_) => Err(Error::DuplicateTarget { object: key.into() }),
            Entry::Vacant(slot) => {
                slot.insert(target);
                Ok(())
            }
        }
    }

    /// Register `target` under the next ordinal and return that ordinal.
    ///
    /// Ordinals are never reused within a record, so this cannot collide.
    pub(crate) fn push_target(&mut self, target: T) -> PointerToken
    where
        K: From<PointerToken>,
    {
        let token = self.next_token();
        self.targets.insert(K::from(token), target);
        token
    }

        pub(crate) fn add_pointer(&mut self, key: K, site: S) {
        self.pending.push((key, site));
    }

    pub(crate) fn pending(&self) -> usize {
        self.pending.len()
    }

    pub(crate) fn targets(&self) -> usize {
        self.targets.len()
    }

    pub(crate) fn clear(&mut self) {
        self.targets.clear();
        self.pending.clear();
    }

    /// Resolve every pending pointer against the targets and end the record.
    ///
    /// Returns the `(site, target)` patches in registration order. If any
    /// pointer is unresolved, no patch is returned at all. The tables are
    /// empty afterwards in both cases.
    pub(crate) fn resolve(&mut self) -> Result<(Vec<(S, T)>, Relocation)> {
        let pending = self.pending.len();
        let mut patches = Vec::with_capacity(pending);
        let mut unresolved = 0usize;
        let mut first_unresolved: Option<K> = None;
        for (key, site) in self.pending.drain(..) {
            match self.targets.get(&key) {
                Some(target) => patches.push((site, target.clone())),
                None => {
                    unresolved += 1;
                    first_unresolved.get_or_insert(key);
                }
            }
        }
        let targets = self.targets.len();
        self.targets.clear();

        if let Some(key) = first_unresolved {
            let reference: u64 = key.into();
            tracing::warn!(reference, unresolved, pending, "pointer relocation failed");
            return Err(Error::UnresolvedReference { reference, unresolved, pending });
        }
        tracing::debug!(targets, pointers = pending, "pointer relocation complete");
        Ok((patches, Relocation { targets, pointers: pending }))
    }
}
