//! Process-image tag store.
//!
//! One slot per [`TagId`], all pre-declared at construction. Reads and
//! writes are atomic per tag behind a single lock; the store is the only
//! mutable state shared between the scan thread and the console thread.

use std::sync::RwLock;

use crate::error::CoreError;
use crate::tags::{Quality, TagId, TagKind, Value, TAG_TABLE};
use crate::timebase::TimeBase;

#[derive(Debug, Clone, Copy, PartialEq)]
struct Slot {
    value: Value,
    quality: Quality,
    ts_us: u64,
}

/// One tag's value at snapshot time.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TagSnapshot {
    pub id: TagId,
    pub value: Value,
    pub quality: Quality,
    pub ts_us: u64,
}

pub struct TagStore {
    slots: RwLock<Vec<Slot>>,
    time: TimeBase,
}

impl TagStore {
    /// Declares every tag in the namespace with its initial value.
    pub fn new(time: TimeBase) -> Self {
        let slots = TAG_TABLE
            .iter()
            .map(|def| Slot {
                value: def.init,
                quality: Quality::Good,
                ts_us: 0,
            })
            .collect();
        Self {
            slots: RwLock::new(slots),
            time,
        }
    }

    pub fn read(&self, id: TagId) -> (Value, Quality, u64) {
        let slots = self.slots.read().unwrap();
        let slot = &slots[id as usize];
        (slot.value, slot.quality, slot.ts_us)
    }

    pub fn quality(&self, id: TagId) -> Quality {
        self.read(id).1
    }

    pub fn read_bool(&self, id: TagId) -> Result<bool, CoreError> {
        match self.read(id).0 {
            Value::Bool(b) => Ok(b),
            other => Err(mismatch(id, "bool", other)),
        }
    }

    pub fn read_f32(&self, id: TagId) -> Result<f32, CoreError> {
        match self.read(id).0 {
            Value::Float(f) => Ok(f),
            other => Err(mismatch(id, "float", other)),
        }
    }

    pub fn read_count(&self, id: TagId) -> Result<u64, CoreError> {
        match self.read(id).0 {
            Value::Count(c) => Ok(c),
            other => Err(mismatch(id, "count", other)),
        }
    }

    pub fn write_bool(&self, id: TagId, value: bool) -> Result<(), CoreError> {
        self.write_bool_quality(id, value, Quality::Good)
    }

    pub fn write_bool_quality(&self, id: TagId, value: bool, q: Quality) -> Result<(), CoreError> {
        self.put(id, Value::Bool(value), q, "bool")
    }

    /// Analog write. Values outside the declared engineering range clamp to
    /// it and the sample is marked Uncertain.
    pub fn write_f32(&self, id: TagId, value: f32) -> Result<(), CoreError> {
        self.write_f32_quality(id, value, Quality::Good)
    }

    pub fn write_f32_quality(&self, id: TagId, value: f32, q: Quality) -> Result<(), CoreError> {
        let (mut value, mut q) = (value, q);
        if matches!(id.kind(), TagKind::Ai | TagKind::Ao) {
            let (lo, hi) = id.range();
            if value < lo || value > hi {
                value = value.clamp(lo, hi);
                if q == Quality::Good {
                    q = Quality::Uncertain;
                }
            }
        }
        self.put(id, Value::Float(value), q, "float")
    }

    pub fn write_count(&self, id: TagId, value: u64) -> Result<(), CoreError> {
        self.write_count_quality(id, value, Quality::Good)
    }

    pub fn write_count_quality(&self, id: TagId, value: u64, q: Quality) -> Result<(), CoreError> {
        self.put(id, Value::Count(value), q, "count")
    }

    pub fn write_text(&self, id: TagId, value: &'static str) -> Result<(), CoreError> {
        self.put(id, Value::Text(value), Quality::Good, "text")
    }

    /// Degrade a tag's quality in place (I/O failure path). The last value
    /// is retained.
    pub fn set_quality(&self, id: TagId, q: Quality) {
        let mut slots = self.slots.write().unwrap();
        let slot = &mut slots[id as usize];
        slot.quality = q;
        slot.ts_us = self.time.now_us();
    }

    fn put(&self, id: TagId, value: Value, q: Quality, expected: &'static str) -> Result<(), CoreError> {
        let mut slots = self.slots.write().unwrap();
        let slot = &mut slots[id as usize];
        if std::mem::discriminant(&slot.value) != std::mem::discriminant(&value) {
            return Err(mismatch(id, expected, slot.value));
        }
        slot.value = value;
        slot.quality = q;
        slot.ts_us = self.time.now_us();
        Ok(())
    }

    /// Consistent view of the whole image, for diagnostics and the console.
    pub fn snapshot(&self) -> Vec<TagSnapshot> {
        let slots = self.slots.read().unwrap();
        TAG_TABLE
            .iter()
            .zip(slots.iter())
            .map(|(def, slot)| TagSnapshot {
                id: def.id,
                value: slot.value,
                quality: slot.quality,
                ts_us: slot.ts_us,
            })
            .collect()
    }

    pub fn iter(&self, kind: TagKind) -> Vec<TagSnapshot> {
        self.snapshot()
            .into_iter()
            .filter(|s| s.id.kind() == kind)
            .collect()
    }

    /// String-keyed read for the console. Unknown names fail typed.
    pub fn read_by_name(&self, name: &str) -> Result<TagSnapshot, CoreError> {
        let id = TagId::parse(name).ok_or_else(|| CoreError::UnknownTag(name.to_string()))?;
        let (value, quality, ts_us) = self.read(id);
        Ok(TagSnapshot {
            id,
            value,
            quality,
            ts_us,
        })
    }
}

fn mismatch(id: TagId, expected: &'static str, actual: Value) -> CoreError {
    CoreError::TypeMismatch {
        tag: id.name(),
        expected,
        actual: actual.kind_name(),
    }
}
