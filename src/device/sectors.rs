//! Sector contents with in-flight writes
//!
//! A write is staged before its request is queued and settled once the
//! scheduler accepts or refuses it. Each staged write carries a submission
//! sequence number; a sector shows the newest write that has not been
//! refused. Settling only ever touches the write's own entry, so a refused
//! write never disturbs one submitted after it.

use std::collections::HashMap;

/// One write's payload, tagged with its submission order
struct Staged {
    seq: u64,
    data: Vec<u8>,
}

#[derive(Default)]
struct SectorSlot {
    /// Newest accepted write
    accepted: Option<Staged>,
    /// Writes still waiting on the scheduler, oldest first
    pending: Vec<Staged>,
}

impl SectorSlot {
    fn visible(&self) -> Option<&[u8]> {
        match (&self.accepted, self.pending.last()) {
            (Some(a), Some(p)) if a.seq > p.seq => Some(&a.data),
            (_, Some(p)) => Some(&p.data),
            (a, None) => a.as_ref().map(|a| a.data.as_slice()),
        }
    }

    fn accept(&mut self, seq: u64) {
        let Some(pos) = self.pending.iter().position(|s| s.seq == seq) else {
            return;
        };
        let write = self.pending.remove(pos);
        match &self.accepted {
            Some(a) if a.seq > write.seq => {}
            _ => self.accepted = Some(write),
        }
    }

    fn refuse(&mut self, seq: u64) {
        self.pending.retain(|s| s.seq != seq);
    }

    fn is_empty(&self) -> bool {
        self.accepted.is_none() && self.pending.is_empty()
    }
}

/// Sparse sector map; absent sectors were never written
#[derive(Default)]
pub(crate) struct SectorMap {
    slots: HashMap<u64, SectorSlot>,
    next_seq: u64,
}

impl SectorMap {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Make `data` visible at `sector` and return the write's sequence number
    pub(crate) fn stage(&mut self, sector: u64, data: Vec<u8>) -> u64 {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.slots
            .entry(sector)
            .or_default()
            .pending
            .push(Staged { seq, data });
        seq
    }

    /// The scheduler took the write
    pub(crate) fn accept(&mut self, sector: u64, seq: u64) {
        if let Some(slot) = self.slots.get_mut(&sector) {
            slot.accept(seq);
        }
    }

    /// The scheduler refused the write; drop it without touching later ones
    pub(crate) fn refuse(&mut self, sector: u64, seq: u64) {
        if let Some(slot) = self.slots.get_mut(&sector) {
            slot.refuse(seq);
            if slot.is_empty() {
                self.slots.remove(&sector);
            }
        }
    }

    pub(crate) fn get(&self, sector: u64) -> Option<&[u8]> {
        self.slots.get(&sector).and_then(SectorSlot::visible)
    }

    /// Number of sectors holding data
    pub(crate) fn len(&self) -> usize {
        self.slots.len()
    }
}
