//! Bulk request staging.
//!
//! A bulker collects create/remove/set requests and commits them in one
//! call per operation kind on [`EntityBulker::flush`]. Each staged request
//! hands back a [`StatusSlot`]; after the flush the slot holds the status
//! reported for that request. Slots stay readable until [`EntityBulker::clear`].

use crate::api::{RouteApi, RouteAttribute, RouteEntry};
use crate::error::SaiStatus;
use log::debug;
use std::collections::BTreeMap;

/// Index of a per-request status inside a bulker's status arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StatusSlot(usize);

#[derive(Debug, Default)]
struct StatusArena {
    statuses: Vec<SaiStatus>,
}

impl StatusArena {
    fn alloc(&mut self, status: SaiStatus) -> StatusSlot {
        self.statuses.push(status);
        StatusSlot(self.statuses.len() - 1)
    }

    fn set(&mut self, slot: StatusSlot, status: SaiStatus) {
        if let Some(s) = self.statuses.get_mut(slot.0) {
            *s = status;
        }
    }

    fn get(&self, slot: StatusSlot) -> SaiStatus {
        self.statuses
            .get(slot.0)
            .copied()
            .unwrap_or(SaiStatus::NotExecuted)
    }
}

/// Bulker for route entries.
///
/// Removals are committed first, then creations, then attribute sets, so a
/// route removed and re-created in the same batch ends up created.
#[derive(Debug, Default)]
pub struct EntityBulker {
    arena: StatusArena,
    creating: BTreeMap<RouteEntry, (Vec<RouteAttribute>, StatusSlot)>,
    removing: BTreeMap<RouteEntry, StatusSlot>,
    setting: BTreeMap<RouteEntry, Vec<(RouteAttribute, StatusSlot)>>,
}

impl EntityBulker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stages a create. Fails with `ItemAlreadyExists` if a create for the
    /// same entry is already staged.
    pub fn create_entry(
        &mut self,
        entry: RouteEntry,
        attrs: Vec<RouteAttribute>,
    ) -> Result<StatusSlot, SaiStatus> {
        if self.creating.contains_key(&entry) {
            return Err(SaiStatus::ItemAlreadyExists);
        }
        let slot = self.arena.alloc(SaiStatus::NotExecuted);
        self.creating.insert(entry, (attrs, slot));
        Ok(slot)
    }

    /// Stages a remove. Pending sets for the entry are dropped; a pending
    /// create is cancelled instead of staging a remove.
    pub fn remove_entry(&mut self, entry: RouteEntry) -> StatusSlot {
        self.setting.remove(&entry);

        if self.creating.remove(&entry).is_some() {
            debug!("Bulker: cancelled pending create of {}", entry);
            return self.arena.alloc(SaiStatus::Success);
        }

        if let Some(slot) = self.removing.get(&entry) {
            return *slot;
        }

        let slot = self.arena.alloc(SaiStatus::NotExecuted);
        self.removing.insert(entry, slot);
        slot
    }

    /// Stages one attribute set.
    pub fn set_entry_attribute(&mut self, entry: RouteEntry, attr: RouteAttribute) -> StatusSlot {
        let slot = self.arena.alloc(SaiStatus::NotExecuted);
        self.setting.entry(entry).or_default().push((attr, slot));
        slot
    }

    /// Allocates a slot that already holds `status`, for a request settled
    /// without a hardware call.
    pub fn completed_slot(&mut self, status: SaiStatus) -> StatusSlot {
        self.arena.alloc(status)
    }

    /// Returns true if a remove of exactly this entry is staged.
    pub fn is_pending_removal(&self, entry: &RouteEntry) -> bool {
        self.removing.contains_key(entry)
    }

    /// Returns the number of staged creates for this entry (0 or 1).
    pub fn creating_entries_count_for(&self, entry: &RouteEntry) -> usize {
        usize::from(self.creating.contains_key(entry))
    }

    pub fn creating_entries_count(&self) -> usize {
        self.creating.len()
    }

    pub fn removing_entries_count(&self) -> usize {
        self.removing.len()
    }

    pub fn setting_entries_count(&self) -> usize {
        self.setting.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.creating.is_empty() && self.removing.is_empty() && self.setting.is_empty()
    }

    /// Status recorded for a slot. Unflushed and unknown slots read as
    /// `NotExecuted`.
    pub fn status(&self, slot: StatusSlot) -> SaiStatus {
        self.arena.get(slot)
    }

    /// Commits every staged request.
    pub async fn flush(&mut self, api: &dyn RouteApi) {
        if !self.removing.is_empty() {
            let removing = std::mem::take(&mut self.removing);
            let (entries, slots): (Vec<RouteEntry>, Vec<StatusSlot>) = removing.into_iter().unzip();
            debug!("Bulker: removing {} route entries", entries.len());
            let statuses = api.remove_route_entries(&entries).await;
            self.record(&slots, statuses);
        }

        if !self.creating.is_empty() {
            let creating = std::mem::take(&mut self.creating);
            let mut entries = Vec::with_capacity(creating.len());
            let mut slots = Vec::with_capacity(creating.len());
            for (entry, (attrs, slot)) in creating {
                entries.push((entry, attrs));
                slots.push(slot);
            }
            debug!("Bulker: creating {} route entries", entries.len());
            let statuses = api.create_route_entries(&entries).await;
            self.record(&slots, statuses);
        }

        if !self.setting.is_empty() {
            let setting = std::mem::take(&mut self.setting);
            let mut entries = Vec::new();
            let mut slots = Vec::new();
            for (entry, attrs) in setting {
                for (attr, slot) in attrs {
                    entries.push((entry, attr));
                    slots.push(slot);
                }
            }
            debug!("Bulker: setting {} route attributes", entries.len());
            let statuses = api.set_route_entries_attribute(&entries).await;
            self.record(&slots, statuses);
        }
    }

    /// Drops all slots. Call once the statuses of a flush have been read.
    pub fn clear(&mut self) {
        self.arena = StatusArena::default();
        self.creating.clear();
        self.removing.clear();
        self.setting.clear();
    }

    fn record(&mut self, slots: &[StatusSlot], statuses: Vec<SaiStatus>) {
        // Missing statuses stay NotExecuted.
        for (slot, status) in slots.iter().zip(statuses) {
            self.arena.set(*slot, status);
        }
    }
}
