//! Bootloader status as observed over the bus.

use std::fmt;

use crate::protocol::{BmsState, BootFsmState, CanFsmState};

/// Target state; every field is absent when the target did not answer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BootloaderStatus {
    pub can_fsm: Option<CanFsmState>,
    pub boot_fsm: Option<BootFsmState>,
    pub current_loop: Option<u32>,
}

impl BootloaderStatus {
    /// Idle bootloader: `(NoCommunication, Wait)` at loop 0.
    pub fn at_initial(&self) -> bool {
        self.can_fsm == Some(CanFsmState::NoCommunication)
            && self.boot_fsm == Some(BootFsmState::Wait)
            && self.current_loop == Some(0)
    }

    pub fn is_complete(&self) -> bool {
        self.can_fsm.is_some() && self.boot_fsm.is_some() && self.current_loop.is_some()
    }

    pub fn is_empty(&self) -> bool {
        self.can_fsm.is_none() && self.boot_fsm.is_none() && self.current_loop.is_none()
    }
}

impl fmt::Display for BootloaderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fn opt<T: fmt::Display>(value: &Option<T>) -> String {
            value.as_ref().map_or_else(|| "?".to_string(), T::to_string)
        }
        write!(
            f,
            "{}/{} loop {}",
            opt(&self.can_fsm),
            opt(&self.boot_fsm),
            opt(&self.current_loop)
        )
    }
}

/// Bootloader version.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Version {
    pub major: u8,
    pub minor: u8,
    pub patch: u8,
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "v{}.{}.{}", self.major, self.minor, self.patch)
    }
}

/// Outcome of probing the target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TargetCheck {
    /// State, loop and version all answered.
    Ready {
        status: BootloaderStatus,
        version: Version,
        commit: Option<String>,
    },
    /// No bootloader answer but the application state frame was seen.
    ApplicationRunning(BmsState),
    /// Some bootloader answers missing.
    Partial {
        status: BootloaderStatus,
        version: Option<Version>,
    },
    Unreachable,
}

impl TargetCheck {
    pub fn is_ready(&self) -> bool {
        matches!(self, TargetCheck::Ready { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn idle() -> BootloaderStatus {
        BootloaderStatus {
            can_fsm: Some(CanFsmState::NoCommunication),
            boot_fsm: Some(BootFsmState::Wait),
            current_loop: Some(0),
        }
    }

    #[test]
    fn test_idle_is_initial() {
        assert!(idle().at_initial());
        assert!(idle().is_complete());
        assert!(BootloaderStatus::default().is_empty());
        assert!(!BootloaderStatus::default().at_initial());
    }

    #[test]
    fn test_display() {
        assert_eq!(idle().to_string(), "NoCommunication/Wait loop 0");
        assert_eq!(
            BootloaderStatus {
                boot_fsm: Some(BootFsmState::Load),
                ..Default::default()
            }
            .to_string(),
            "?/Load loop ?"
        );
        let version = Version {
            major: 6,
            minor: 1,
            patch: 2,
        };
        assert_eq!(version.to_string(), "v6.1.2");
    }

    fn any_status() -> impl Strategy<Value = BootloaderStatus> {
        (
            proptest::option::of(prop::sample::select(CanFsmState::ALL)),
            proptest::option::of(prop::sample::select(BootFsmState::ALL)),
            proptest::option::of(prop_oneof![Just(0u32), any::<u32>()]),
        )
            .prop_map(|(can_fsm, boot_fsm, current_loop)| BootloaderStatus {
                can_fsm,
                boot_fsm,
                current_loop,
            })
    }

    proptest! {
        #[test]
        fn prop_at_initial_iff_idle(status in any_status()) {
            prop_assert_eq!(status.at_initial(), status == idle());
        }
    }
}
