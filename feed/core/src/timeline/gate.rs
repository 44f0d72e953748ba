//! Duplicate suppression and recently shown statuses

use crate::model::StatusId;

/// Number of recently shown statuses remembered
pub const RECENT_LOG_LEN: usize = 256;

/// Single-slot duplicate filter
///
/// Only an immediately repeated id is suppressed: the same status arriving
/// over two channels back to back. A status shown again after something
/// else passes. Statuses without an id (synthetic follow notices) always
/// pass and leave the slot untouched.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SeenGate {
    last: Option<StatusId>,
}

impl SeenGate {
    /// Create an empty gate
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Return whether `id` may be shown, remembering it if so
    pub fn admit(&mut self, id: StatusId) -> bool {
        if id == 0 {
            return true;
        }
        if self.last == Some(id) {
            return false;
        }
        self.last = Some(id);
        true
    }

    /// Last admitted id
    #[must_use]
    pub fn last(&self) -> Option<StatusId> {
        self.last
    }
}

/// Ring of recently shown status ids
///
/// Each shown status gets a one-byte slot number the user can refer to as
/// `#xx`. A status already in the ring keeps its slot.
#[derive(Clone, Debug)]
pub struct RecentLog {
    slots: Vec<StatusId>,
    last_slot: usize,
}

impl Default for RecentLog {
    fn default() -> Self {
        Self::new()
    }
}

impl RecentLog {
    /// Create an empty log
    #[must_use]
    pub fn new() -> Self {
        Self {
            slots: vec![0; RECENT_LOG_LEN],
            last_slot: 0,
        }
    }

    /// Remember `id` and return its slot
    ///
    /// Returns `None` for id 0.
    pub fn record(&mut self, id: StatusId) -> Option<u8> {
        if id == 0 {
            return None;
        }
        if let Some(slot) = self.slot_of(id) {
            return Some(slot);
        }
        self.last_slot = (self.last_slot + 1) % RECENT_LOG_LEN;
        self.slots[self.last_slot] = id;
        u8::try_from(self.last_slot).ok()
    }

    /// Slot currently holding `id`
    #[must_use]
    pub fn slot_of(&self, id: StatusId) -> Option<u8> {
        if id == 0 {
            return None;
        }
        self.slots
            .iter()
            .position(|&known| known == id)
            .and_then(|slot| u8::try_from(slot).ok())
    }

    /// Status id stored in `slot`
    #[must_use]
    pub fn get(&self, slot: u8) -> Option<StatusId> {
        self.slots
            .get(usize::from(slot))
            .copied()
            .filter(|&id| id != 0)
    }

    /// Forget `id`, returning the slot it occupied
    pub fn forget(&mut self, id: StatusId) -> Option<u8> {
        let slot = self.slot_of(id)?;
        self.slots[usize::from(slot)] = 0;
        Some(slot)
    }

    /// Resolve a user reference to a status id
    ///
    /// `#xx` is a hexadecimal slot; a bare number is a status id.
    #[must_use]
    pub fn resolve(&self, reference: &str) -> Option<StatusId> {
        if let Some(hex) = reference.strip_prefix('#') {
            let slot = u8::from_str_radix(hex, 16).ok()?;
            return self.get(slot);
        }
        reference.parse::<StatusId>().ok().filter(|&id| id != 0)
    }
}
