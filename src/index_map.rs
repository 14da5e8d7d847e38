//! Ownership of global dof indices on a single rank.
//!
//! A rank owns a contiguous half-open range `[lo, hi)` of global indices and additionally has
//! write access to a sequence of *ghost* indices owned by other ranks. Local storage places the
//! owned indices first (in order), followed by the ghosts in the order given:
//!
//! ```text
//! local:   0 .. (hi - lo)        | (hi - lo) .. (hi - lo) + num_ghosts
//! global:  lo .. hi              | ghosts[0], ghosts[1], ...
//! ```
use crate::error::MpcError;
use rustc_hash::FxHashSet;
use serde::{Deserialize, Serialize};
use std::ops::Range;

/// Strategy used to look up ghost indices.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum GhostLookup {
    /// Scan the ghost sequence. Cheapest for the handful of ghosts typical on small partitions.
    #[default]
    Linear,
    /// Binary search in a sorted copy of the ghost sequence.
    Sorted,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "IndexMapParts")]
pub struct IndexMap {
    owned: Range<usize>,
    ghosts: Vec<usize>,
    lookup: GhostLookup,
    // (global index, position in ghosts), sorted by global index. Only populated for
    // `GhostLookup::Sorted`.
    #[serde(skip)]
    sorted_ghosts: Vec<(usize, usize)>,
}

/// Unvalidated serialized form of [`IndexMap`].
#[derive(Deserialize)]
struct IndexMapParts {
    owned: Range<usize>,
    ghosts: Vec<usize>,
    lookup: GhostLookup,
}

impl TryFrom<IndexMapParts> for IndexMap {
    type Error = MpcError;

    fn try_from(parts: IndexMapParts) -> Result<Self, Self::Error> {
        Self::try_new_with_lookup(parts.owned, parts.ghosts, parts.lookup)
    }
}

impl IndexMap {
    /// Construct an index map for the owned range `[owned.start, owned.end)` and the given ghosts.
    ///
    /// Ghosts must be unique and must not lie in the owned range.
    pub fn try_new(owned: Range<usize>, ghosts: Vec<usize>) -> Result<Self, MpcError> {
        Self::try_new_with_lookup(owned, ghosts, GhostLookup::default())
    }

    pub fn try_new_with_lookup(
        owned: Range<usize>,
        ghosts: Vec<usize>,
        lookup: GhostLookup,
    ) -> Result<Self, MpcError> {
        if owned.start > owned.end {
            return Err(MpcError::InvalidIndexMap(format!(
                "owned range {}..{} is reversed",
                owned.start, owned.end
            )));
        }

        let mut seen = FxHashSet::default();
        for &ghost in &ghosts {
            if owned.contains(&ghost) {
                return Err(MpcError::InvalidIndexMap(format!(
                    "ghost {ghost} lies in the owned range {}..{}",
                    owned.start, owned.end
                )));
            }
            if !seen.insert(ghost) {
                return Err(MpcError::InvalidIndexMap(format!("ghost {ghost} appears more than once")));
            }
        }

        let sorted_ghosts = match lookup {
            GhostLookup::Linear => Vec::new(),
            GhostLookup::Sorted => {
                let mut sorted: Vec<_> = ghosts
                    .iter()
                    .copied()
                    .enumerate()
                    .map(|(q, global)| (global, q))
                    .collect();
                sorted.sort_unstable();
                sorted
            }
        };

        Ok(Self {
            owned,
            ghosts,
            lookup,
            sorted_ghosts,
        })
    }

    /// An index map without ghosts, owning `0 .. size`.
    pub fn serial(size: usize) -> Self {
        Self {
            owned: 0..size,
            ghosts: Vec::new(),
            lookup: GhostLookup::default(),
            sorted_ghosts: Vec::new(),
        }
    }

    pub fn owned_range(&self) -> Range<usize> {
        self.owned.clone()
    }

    pub fn ghosts(&self) -> &[usize] {
        &self.ghosts
    }

    pub fn lookup(&self) -> GhostLookup {
        self.lookup
    }

    pub fn num_owned(&self) -> usize {
        self.owned.len()
    }

    pub fn num_ghosts(&self) -> usize {
        self.ghosts.len()
    }

    /// The number of slots in local storage, i.e. owned plus ghosts.
    pub fn local_size(&self) -> usize {
        self.num_owned() + self.num_ghosts()
    }

    /// Position of `global` in the ghost sequence, if it is a ghost.
    pub fn ghost_position(&self, global: usize) -> Option<usize> {
        match self.lookup {
            GhostLookup::Linear => self.ghosts.iter().position(|&ghost| ghost == global),
            GhostLookup::Sorted => self
                .sorted_ghosts
                .binary_search_by_key(&global, |&(ghost, _)| ghost)
                .ok()
                .map(|idx| self.sorted_ghosts[idx].1),
        }
    }

    /// Map a global index to its slot in local storage.
    ///
    /// Owned indices satisfy `lo <= global < hi` and map to `global - lo`. Otherwise the index
    /// must match ghost `q`, which maps to `q + (hi - lo)`.
    ///
    /// # Errors
    ///
    /// Returns [`MpcError::UnresolvedIndex`] if the index is neither owned nor a ghost.
    pub fn global_to_local(&self, global: usize) -> Result<usize, MpcError> {
        if self.owned.contains(&global) {
            Ok(global - self.owned.start)
        } else {
            self.ghost_position(global)
                .map(|q| q + self.num_owned())
                .ok_or(MpcError::UnresolvedIndex { global })
        }
    }

    /// Map a slot in local storage back to its global index.
    pub fn local_to_global(&self, local: usize) -> Option<usize> {
        let num_owned = self.num_owned();
        if local < num_owned {
            Some(self.owned.start + local)
        } else {
            self.ghosts.get(local - num_owned).copied()
        }
    }

    /// Split local storage into its owned part and its ghost part.
    ///
    /// # Panics
    ///
    /// Panics if `storage` is not of length [`local_size`](Self::local_size).
    pub fn split_owned_and_ghosts<'a, T>(&self, storage: &'a mut [T]) -> (&'a mut [T], &'a mut [T]) {
        assert_eq!(storage.len(), self.local_size(), "Storage must match local size");
        storage.split_at_mut(self.num_owned())
    }
}
