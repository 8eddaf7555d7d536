/// Reason the VM stopped stepping for good.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub enum HaltReason {
    /// Guest requested power-off through syscon.
    PowerOff,
    /// A guest fault was escalated while fail-on-all-faults was enabled.
    FaultEscalated {
        /// Engine status code reported for the escalated fault.
        status: u32,
    },
    /// The engine aborted with a bus or storage error.
    EngineError,
}

/// VM lifecycle driven by host commands and engine statuses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub enum VmState {
    /// Created but not yet powered on.
    #[default]
    Stopped,
    /// Powered on with a valid CPU state, not stepping.
    Paused,
    /// Stepping on every host tick.
    Running,
    /// Terminal until reset or snapshot load.
    Halted(HaltReason),
}

impl VmState {
    /// Returns the halt reason when halted.
    #[must_use]
    pub const fn halt_reason(self) -> Option<HaltReason> {
        match self {
            Self::Halted(reason) => Some(reason),
            Self::Stopped | Self::Paused | Self::Running => None,
        }
    }

    /// Returns `true` when ticks invoke the stepping engine.
    #[must_use]
    pub const fn is_running(self) -> bool {
        matches!(self, Self::Running)
    }
}

#[cfg(test)]
mod tests {
    use super::{HaltReason, VmState};

    #[test]
    fn vm_state_default_is_stopped() {
        assert_eq!(VmState::default(), VmState::Stopped);
    }

    #[test]
    fn halt_reason_accessor_reports_only_halted_variant() {
        assert_eq!(VmState::Stopped.halt_reason(), None);
        assert_eq!(VmState::Paused.halt_reason(), None);
        assert_eq!(VmState::Running.halt_reason(), None);
        assert_eq!(
            VmState::Halted(HaltReason::PowerOff).halt_reason(),
            Some(HaltReason::PowerOff)
        );
    }

    #[test]
    fn only_running_state_steps() {
        assert!(VmState::Running.is_running());
        assert!(!VmState::Paused.is_running());
        assert!(!VmState::Halted(HaltReason::EngineError).is_running());
    }
}
