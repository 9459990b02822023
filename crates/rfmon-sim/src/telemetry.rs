//! Scripted vehicle telemetry
//!
//! Stand-in for the vehicle-bus adapter: a fixed script of action events,
//! in the shape the original OpenXC-based rig produced them.

use rfmon_core::types::{ActionType, VehicleActionEvent};

/// Builder for a time-ordered vehicle action script.
#[derive(Debug, Default, Clone)]
pub struct TelemetryScript {
    actions: Vec<VehicleActionEvent>,
}

impl TelemetryScript {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn action(mut self, timestamp: f64, action_type: ActionType) -> Self {
        self.actions.push(VehicleActionEvent {
            timestamp,
            action_type,
        });
        self
    }

    pub fn unlock(self, timestamp: f64) -> Self {
        self.action(timestamp, ActionType::Unlock)
    }

    pub fn lock(self, timestamp: f64) -> Self {
        self.action(timestamp, ActionType::Lock)
    }

    pub fn remote_start(self, timestamp: f64) -> Self {
        self.action(timestamp, ActionType::RemoteStart)
    }

    /// The script as a time-sorted slice of events.
    pub fn build(mut self) -> Vec<VehicleActionEvent> {
        self.actions
            .sort_by(|a, b| a.timestamp.partial_cmp(&b.timestamp).unwrap());
        self.actions
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_script_is_time_sorted() {
        let actions = TelemetryScript::new()
            .lock(5.0)
            .unlock(1.0)
            .remote_start(3.0)
            .build();
        assert_eq!(actions.len(), 3);
        assert!(actions.windows(2).all(|w| w[0].timestamp <= w[1].timestamp));
        assert_eq!(actions[0].action_type, ActionType::Unlock);
    }
}
