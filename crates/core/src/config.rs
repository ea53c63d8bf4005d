//! Scheduler configuration.

use serde::{Deserialize, Serialize};

use crate::CLOCK_HZ;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct SimConfig {
    /// Instruction steps per scheduler batch (about 1 µs of CPU time).
    pub batch_instructions: u32,
    /// Upper bound on cycles executed by one `update` call.
    pub max_cycles_per_update: u64,
    /// Re-scan keypads once per `update` in addition to port writes.
    pub keypad_scan_per_update: bool,
}

impl Default for SimConfig {
    fn default() -> Self {
        SimConfig {
            batch_instructions: 16,
            max_cycles_per_update: CLOCK_HZ as u64 / 10,
            keypad_scan_per_update: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_json_keeps_defaults() {
        let cfg: SimConfig = serde_json::from_str(r#"{ "batchInstructions": 8 }"#).unwrap();
        assert_eq!(cfg.batch_instructions, 8);
        assert_eq!(cfg.max_cycles_per_update, 1_600_000);
        assert!(cfg.keypad_scan_per_update);
    }
}
