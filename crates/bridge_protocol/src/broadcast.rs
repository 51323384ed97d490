//! Broadcast registration and delta encoding (§3, §4.3).
//!
//! A broadcast variable is an immutable (id, payload) pair. A worker's
//! resident set is mutated by deltas: a registration carries id+payload,
//! a deregistration carries only `-id - 1` (so id 0 still serializes to
//! a distinguishable negative value).

use std::collections::HashSet;
use std::io::{Read, Write};

use crate::error::Result;
use crate::frame::{read_frame, read_int32, read_int64, write_frame, write_int32, write_int64};

/// An immutable broadcast variable as required by a task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Broadcast {
    pub id: i64,
    pub payload: Vec<u8>,
}

/// One entry of a broadcast delta, as it appears on the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeltaEntry {
    Register(Broadcast),
    Deregister(i64),
}

/// Encode a deregistration of `id` as the wire's signed transform.
pub fn encode_deregistration(id: i64) -> i64 {
    -id - 1
}

/// Decode a raw wire `i64` into either a live registration id or a
/// deregistration id. Non-negative values are live ids; negative values
/// decode back via `id = -raw - 1`.
pub fn decode_raw_id(raw: i64) -> (i64, bool) {
    if raw >= 0 {
        (raw, true)
    } else {
        (-raw - 1, false)
    }
}

/// Compute the delta between a worker's resident set and the broadcasts
/// a task requires, applying the result to `resident` in place so the
/// caller's view of the worker's residency stays correct after the
/// delta is sent.
///
/// The number of entries returned is exactly `|old ∆ new|`.
pub fn compute_delta(resident: &mut HashSet<i64>, required: &[Broadcast]) -> Vec<DeltaEntry> {
    let required_ids: HashSet<i64> = required.iter().map(|b| b.id).collect();

    let mut entries = Vec::new();

    let to_drop: Vec<i64> = resident.difference(&required_ids).copied().collect();
    for id in to_drop {
        entries.push(DeltaEntry::Deregister(id));
        resident.remove(&id);
    }

    for b in required {
        if !resident.contains(&b.id) {
            entries.push(DeltaEntry::Register(b.clone()));
            resident.insert(b.id);
        }
    }

    entries
}

/// Apply a decoded delta to a resident set; used by tests (and by any
/// independent party replaying the wire stream) to check
/// `apply(old, delta) == new`.
pub fn apply_delta(resident: &mut HashSet<i64>, entries: &[DeltaEntry]) {
    for entry in entries {
        match entry {
            DeltaEntry::Register(b) => {
                resident.insert(b.id);
            }
            DeltaEntry::Deregister(id) => {
                resident.remove(id);
            }
        }
    }
}

pub fn write_delta<W: Write>(w: &mut W, entries: &[DeltaEntry]) -> Result<()> {
    write_int32(w, entries.len() as i32)?;
    for entry in entries {
        match entry {
            DeltaEntry::Deregister(id) => {
                write_int64(w, encode_deregistration(*id))?;
            }
            DeltaEntry::Register(b) => {
                write_int64(w, b.id)?;
                write_frame(w, &b.payload)?;
            }
        }
    }
    Ok(())
}

pub fn read_delta<R: Read>(r: &mut R) -> Result<Vec<DeltaEntry>> {
    let count = read_int32(r)?;
    let mut entries = Vec::with_capacity(count.max(0) as usize);
    for _ in 0..count {
        let raw = read_int64(r)?;
        let (id, is_registration) = decode_raw_id(raw);
        if is_registration {
            let len = read_int32(r)?;
            let payload = read_frame(r, len as u32)?;
            entries.push(DeltaEntry::Register(Broadcast { id, payload }));
        } else {
            entries.push(DeltaEntry::Deregister(id));
        }
    }
    Ok(entries)
}
