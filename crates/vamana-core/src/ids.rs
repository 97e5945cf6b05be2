//! Object identifiers and the dynamic-index ID translator.
//!
//! The translator follows the "side table" redesign called for when a
//! source represents deletion/reinsertion with possibly-cyclic pointer
//! relations: `slot -> state` is an arena with no pointers, so a freed
//! slot can be reused without ever producing a dangling edge.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{CoreError, CoreResult};

macro_rules! define_id {
    ($name:ident, $doc:literal) => {
        #[doc = $doc]
        #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(Uuid);

        impl $name {
            /// Generates a new identifier using UUID v7.
            #[must_use]
            #[allow(clippy::new_without_default)]
            pub fn new() -> Self {
                Self(Uuid::now_v7())
            }

            /// Creates an identifier from an existing UUID.
            #[must_use]
            pub const fn from_uuid(uuid: Uuid) -> Self {
                Self(uuid)
            }

            /// Returns the inner UUID value.
            #[must_use]
            pub const fn as_uuid(&self) -> Uuid {
                self.0
            }

            /// Returns the raw 16-byte representation used in blob headers.
            #[must_use]
            pub const fn to_bytes(self) -> [u8; 16] {
                self.0.into_bytes()
            }

            /// Creates an identifier from raw bytes.
            ///
            /// # Errors
            ///
            /// Returns `uuid::Error` when the bytes do not form a valid UUID.
            pub fn from_bytes(bytes: &[u8]) -> Result<Self, uuid::Error> {
                Uuid::from_slice(bytes).map(Self)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl FromStr for $name {
            type Err = uuid::Error;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Ok(Self(Uuid::parse_str(s)?))
            }
        }

        impl From<Uuid> for $name {
            fn from(value: Uuid) -> Self {
                Self(value)
            }
        }

        impl From<$name> for Uuid {
            fn from(value: $name) -> Self {
                value.0
            }
        }
    };
}

define_id!(DatasetUuid, "Unique identifier stamped into a blob header.");
define_id!(ManifestUuid, "Unique identifier for a persisted manifest object.");

/// An internal dense slot index used by graph/dataset storage.
pub type InternalId = u32;

/// An arbitrary 64-bit user-supplied identifier.
pub type ExternalId = u64;

/// The lifecycle state of one internal slot in a dynamic index.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SlotState {
    Empty,
    Live(ExternalId),
    Tombstone(ExternalId),
}

/// Bidirectional mapping between external IDs and internal slots.
///
/// Invariants (see Data Model §3):
/// - injective in both directions;
/// - slots freed by deletion are reusable only after [`IdTranslator::consolidate`];
/// - [`IdTranslator::compact`] preserves the relative order of live slots.
#[derive(Debug, Default)]
pub struct IdTranslator {
    slots: Vec<SlotState>,
    external_to_internal: HashMap<ExternalId, InternalId>,
    free_list: Vec<InternalId>,
}

impl IdTranslator {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of slots ever allocated (including tombstoned/empty ones).
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Number of slots currently holding a live external ID.
    #[must_use]
    pub fn live_count(&self) -> usize {
        self.external_to_internal.len()
    }

    #[must_use]
    pub fn has_external(&self, external_id: ExternalId) -> bool {
        self.external_to_internal.contains_key(&external_id)
    }

    #[must_use]
    pub fn get_internal(&self, external_id: ExternalId) -> Option<InternalId> {
        self.external_to_internal.get(&external_id).copied()
    }

    /// Returns `Some(external_id)` for a live slot, `None` for an empty or
    /// tombstoned one.
    #[must_use]
    pub fn get_external(&self, internal_id: InternalId) -> Option<ExternalId> {
        match self.slots.get(internal_id as usize)? {
            SlotState::Live(ext) => Some(*ext),
            SlotState::Empty | SlotState::Tombstone(_) => None,
        }
    }

    #[must_use]
    pub fn is_tombstoned(&self, internal_id: InternalId) -> bool {
        matches!(
            self.slots.get(internal_id as usize),
            Some(SlotState::Tombstone(_))
        )
    }

    /// Allocates a slot for `external_id`, reusing a freed slot when
    /// `reuse_empty` is true and one is available.
    ///
    /// # Errors
    /// Returns [`CoreError::Other`] if `external_id` is already mapped.
    pub fn allocate(&mut self, external_id: ExternalId, reuse_empty: bool) -> CoreResult<InternalId> {
        if self.external_to_internal.contains_key(&external_id) {
            return Err(CoreError::other(format!(
                "external id {external_id} is already live"
            )));
        }
        let internal_id = if reuse_empty {
            self.free_list.pop()
        } else {
            None
        };
        let internal_id = match internal_id {
            Some(id) => {
                self.slots[id as usize] = SlotState::Live(external_id);
                id
            }
            None => {
                let id = self.slots.len() as InternalId;
                self.slots.push(SlotState::Live(external_id));
                id
            }
        };
        self.external_to_internal.insert(external_id, internal_id);
        Ok(internal_id)
    }

    /// Marks the slot for `external_id` as tombstoned. The slot is not
    /// reusable until [`IdTranslator::consolidate`] runs.
    ///
    /// # Errors
    /// Returns [`CoreError::NotFound`] if `external_id` is not live.
    pub fn tombstone(&mut self, external_id: ExternalId) -> CoreResult<InternalId> {
        let internal_id = self
            .external_to_internal
            .remove(&external_id)
            .ok_or_else(|| CoreError::not_found("external_id", external_id.to_string()))?;
        self.slots[internal_id as usize] = SlotState::Tombstone(external_id);
        Ok(internal_id)
    }

    /// Clears tombstones, returning their slots to the free list. Called
    /// once the graph has been rewritten to bypass tombstoned neighbors.
    pub fn consolidate(&mut self) {
        for (idx, state) in self.slots.iter_mut().enumerate() {
            if matches!(state, SlotState::Tombstone(_)) {
                *state = SlotState::Empty;
                self.free_list.push(idx as InternalId);
            }
        }
    }

    /// Computes the permutation that moves all live slots into a
    /// contiguous prefix (relative order preserved), for use by
    /// [`vamana_core`]-level compaction routines. Returns
    /// `old_internal_id -> new_internal_id` for every currently live slot.
    #[must_use]
    pub fn compaction_plan(&self) -> HashMap<InternalId, InternalId> {
        let mut plan = HashMap::with_capacity(self.live_count());
        let mut next = 0u32;
        for (idx, state) in self.slots.iter().enumerate() {
            if matches!(state, SlotState::Live(_)) {
                plan.insert(idx as InternalId, next);
                next += 1;
            }
        }
        plan
    }

    /// Applies a compaction plan produced by [`IdTranslator::compaction_plan`],
    /// discarding empty/tombstoned slots and rebuilding the lookup table.
    pub fn apply_compaction(&mut self, plan: &HashMap<InternalId, InternalId>) {
        let mut new_slots = vec![SlotState::Empty; plan.len()];
        for (old, new) in plan {
            new_slots[*new as usize] = self.slots[*old as usize];
        }
        self.slots = new_slots;
        self.free_list.clear();
        self.external_to_internal.clear();
        for (idx, state) in self.slots.iter().enumerate() {
            if let SlotState::Live(ext) = state {
                self.external_to_internal.insert(*ext, idx as InternalId);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allocate_and_lookup_round_trip() {
        let mut t = IdTranslator::new();
        let slot = t.allocate(42, false).unwrap();
        assert_eq!(t.get_internal(42), Some(slot));
        assert_eq!(t.get_external(slot), Some(42));
        assert!(t.has_external(42));
    }

    #[test]
    fn duplicate_allocate_rejected() {
        let mut t = IdTranslator::new();
        t.allocate(1, false).unwrap();
        assert!(t.allocate(1, false).is_err());
    }

    #[test]
    fn tombstone_then_consolidate_frees_slot() {
        let mut t = IdTranslator::new();
        let slot = t.allocate(7, true).unwrap();
        t.tombstone(7).unwrap();
        assert!(!t.has_external(7));
        assert!(t.is_tombstoned(slot));
        t.consolidate();
        assert!(!t.is_tombstoned(slot));
        let reused = t.allocate(9, true).unwrap();
        assert_eq!(reused, slot);
    }

    #[test]
    fn compaction_preserves_order_of_live_slots() {
        let mut t = IdTranslator::new();
        let a = t.allocate(1, false).unwrap();
        let b = t.allocate(2, false).unwrap();
        let c = t.allocate(3, false).unwrap();
        t.tombstone(2).unwrap();
        t.consolidate();
        let plan = t.compaction_plan();
        assert_eq!(plan.get(&a), Some(&0));
        assert_eq!(plan.get(&c), Some(&1));
        assert!(!plan.contains_key(&b));
        t.apply_compaction(&plan);
        assert_eq!(t.get_internal(1), Some(0));
        assert_eq!(t.get_internal(3), Some(1));
        assert_eq!(t.live_count(), 2);
    }
}
