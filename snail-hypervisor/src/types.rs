//! Type definitions for domain state as reported by the hypervisor.

use serde::{Deserialize, Serialize};
use std::fmt;

// =============================================================================
// VM STATE
// =============================================================================

/// VM power state.
///
/// Parsed from `virsh domstate` output. Anything the parser does not
/// recognise, and any failed query, maps to `Unknown`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VmState {
    Running,
    ShutOff,
    Paused,
    ShuttingDown,
    Crashed,
    Suspended,
    Unknown,
}

impl Default for VmState {
    fn default() -> Self {
        Self::Unknown
    }
}

impl VmState {
    /// Parse the free-form text printed by `virsh domstate`.
    ///
    /// Only the first non-empty line is considered; `--reason` suffixes such
    /// as `shut off (destroyed)` are tolerated.
    pub fn from_virsh(text: &str) -> Self {
        let line = text
            .lines()
            .map(str::trim)
            .find(|l| !l.is_empty())
            .unwrap_or("")
            .to_ascii_lowercase();
        let state = line.split(" (").next().unwrap_or("").trim();
        
        match state {
            "running" | "idle" => VmState::Running,
            "shut off" | "shutoff" | "shutdown" => VmState::ShutOff,
            "paused" => VmState::Paused,
            "in shutdown" | "dying" => VmState::ShuttingDown,
            "crashed" => VmState::Crashed,
            "pmsuspended" => VmState::Suspended,
            _ => VmState::Unknown,
        }
    }
    
    /// The wording virsh uses for this state.
    pub fn as_str(&self) -> &'static str {
        match self {
            VmState::Running => "running",
            VmState::ShutOff => "shut off",
            VmState::Paused => "paused",
            VmState::ShuttingDown => "in shutdown",
            VmState::Crashed => "crashed",
            VmState::Suspended => "pmsuspended",
            VmState::Unknown => "unknown",
        }
    }
    
    /// Whether the VM has reached a terminal stopped state.
    pub fn is_stopped(&self) -> bool {
        matches!(self, VmState::ShutOff)
    }
    
    pub fn is_running(&self) -> bool {
        matches!(self, VmState::Running)
    }
}

impl fmt::Display for VmState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    
    #[test]
    fn test_parse_virsh_states() {
        assert_eq!(VmState::from_virsh("running\n\n"), VmState::Running);
        assert_eq!(VmState::from_virsh("shut off\n"), VmState::ShutOff);
        assert_eq!(VmState::from_virsh("shut off (destroyed)"), VmState::ShutOff);
        assert_eq!(VmState::from_virsh("paused"), VmState::Paused);
        assert_eq!(VmState::from_virsh("in shutdown"), VmState::ShuttingDown);
        assert_eq!(VmState::from_virsh("crashed"), VmState::Crashed);
        assert_eq!(VmState::from_virsh("pmsuspended"), VmState::Suspended);
    }
    
    #[test]
    fn test_unrecognised_state_is_unknown() {
        assert_eq!(VmState::from_virsh(""), VmState::Unknown);
        assert_eq!(VmState::from_virsh("blocked-ish"), VmState::Unknown);
    }
    
    #[test]
    fn test_display_matches_virsh_wording() {
        assert_eq!(VmState::ShutOff.to_string(), "shut off");
        assert!(VmState::ShutOff.is_stopped());
        assert!(!VmState::ShuttingDown.is_stopped());
    }
}
