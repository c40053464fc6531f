//! BS&W capacitance probe conditioning.
//!
//! Keeps a rolling window of probe samples and publishes the mean as the
//! effective BS&W. Bad or clamped samples never enter the window; their
//! quality rides through on the published tag so the probe-failure
//! interlock can see it.

use std::collections::VecDeque;

use crate::error::CoreError;
use crate::store::TagStore;
use crate::tags::{Quality, TagId};

const WINDOW: usize = 60;

pub struct BswMonitor {
    window: VecDeque<f32>,
}

impl BswMonitor {
    pub fn new() -> Self {
        Self {
            window: VecDeque::with_capacity(WINDOW),
        }
    }

    pub fn execute(&mut self, store: &TagStore) -> Result<(), CoreError> {
        let (_, quality, _) = store.read(TagId::AiBswProbe);
        if quality != Quality::Good {
            // Reject the sample, propagate the quality.
            store.set_quality(TagId::BswPct, quality);
            return Ok(());
        }

        let raw = store.read_f32(TagId::AiBswProbe)?;
        if self.window.len() == WINDOW {
            self.window.pop_front();
        }
        self.window.push_back(raw);

        let mean = self.window.iter().copied().sum::<f32>() / self.window.len() as f32;
        store.write_f32(TagId::BswPct, mean)?;
        Ok(())
    }

    pub fn reset(&mut self) {
        self.window.clear();
    }
}

impl Default for BswMonitor {
    fn default() -> Self {
        Self::new()
    }
}
