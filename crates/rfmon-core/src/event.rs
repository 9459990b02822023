//! Signal Event Builder
//!
//! Pure transformation of a burst plus its demodulation result into a
//! canonical [`SignalEvent`]. The only state is the monotonic id counter;
//! identical inputs build identical events apart from the id.

use crate::demod::DemodResult;
use crate::types::{Burst, SignalEvent};

/// Assigns monotonically increasing ids to built events.
#[derive(Debug, Default)]
pub struct SignalEventBuilder {
    next_id: u64,
}

impl SignalEventBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build the canonical event for one demodulated burst.
    pub fn build(&mut self, burst: &Burst, demod: &DemodResult) -> SignalEvent {
        let id = self.next_id;
        self.next_id += 1;
        SignalEvent {
            id,
            timestamp: burst.start_time,
            frequency: burst.center_frequency,
            bandwidth: burst.bandwidth,
            modulation_class: demod.class,
            decoded_bits: demod.bits.clone(),
            power_db: burst.peak_power_db,
        }
    }

    /// Id that will be assigned to the next event.
    pub fn next_id(&self) -> u64 {
        self.next_id
    }
}
