//! Errors of the top-level operations.

use thiserror::Error;

use crate::payload::ArtifactError;
use crate::session::ProtocolError;
use crate::state::{BootloaderStatus, TargetCheck};
use crate::transport::BusError;

#[derive(Error, Debug)]
pub enum FlashError {
    #[error("Artifact invalid: {0}")]
    Artifact(#[from] ArtifactError),
    #[error("Bus unavailable: {0}")]
    Bus(#[from] BusError),
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
    #[error("Cannot resolve bootloader state ({0})")]
    CannotResolveState(BootloaderStatus),
    #[error("Target unreachable")]
    Unreachable,
    #[error("Target not ready: {0:?}")]
    TargetNotReady(TargetCheck),
    #[error("Loop number {loop_number} lies beyond the last flash sector")]
    SectorMapExhausted { loop_number: u64 },
    #[error("Flash failed after {attempts} attempts: {last}")]
    RetriesExhausted {
        attempts: u32,
        #[source]
        last: ProtocolError,
    },
    #[error("Launch failed: {0}")]
    LaunchFailed(#[source] ProtocolError),
}

/// Coarse failure classes the exit codes are derived from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitClass {
    AppRunning,
    NotReady,
    Failed,
    Timeout,
    ArtifactInvalid,
    BusUnavailable,
}

impl FlashError {
    pub fn exit_class(&self) -> ExitClass {
        match self {
            FlashError::Artifact(_) => ExitClass::ArtifactInvalid,
            FlashError::Bus(_) => ExitClass::BusUnavailable,
            FlashError::Protocol(ProtocolError::AppRunning { .. }) => ExitClass::AppRunning,
            FlashError::Protocol(ProtocolError::Timeout { .. }) | FlashError::Unreachable => {
                ExitClass::Timeout
            }
            FlashError::TargetNotReady(_) => ExitClass::NotReady,
            FlashError::Protocol(_)
            | FlashError::CannotResolveState(_)
            | FlashError::SectorMapExhausted { .. }
            | FlashError::RetriesExhausted { .. }
            | FlashError::LaunchFailed(_) => ExitClass::Failed,
        }
    }

    /// Worth another flash attempt.
    pub(crate) fn is_retryable(&self) -> bool {
        matches!(
            self,
            FlashError::Protocol(ProtocolError::Timeout { .. } | ProtocolError::Rejected { .. })
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::BmsState;

    #[test]
    fn test_exit_classes() {
        let timeout = FlashError::Protocol(ProtocolError::Timeout { waiting_for: "ack" });
        assert_eq!(timeout.exit_class(), ExitClass::Timeout);
        assert!(timeout.is_retryable());

        let running = FlashError::Protocol(ProtocolError::AppRunning {
            bms_state: BmsState::Normal,
        });
        assert_eq!(running.exit_class(), ExitClass::AppRunning);
        assert!(!running.is_retryable());

        assert_eq!(
            FlashError::CannotResolveState(BootloaderStatus::default()).exit_class(),
            ExitClass::Failed
        );
        assert_eq!(
            FlashError::Bus(BusError::Disconnected).exit_class(),
            ExitClass::BusUnavailable
        );
        assert_eq!(
            FlashError::Artifact(ArtifactError::Empty).exit_class(),
            ExitClass::ArtifactInvalid
        );
    }
}
