//! Bootloader session: one typed method per protocol exchange.
//!
//! The session never retries. A missing or negative answer is reported
//! to the caller, which owns all retry decisions.

use std::thread;
use std::time::Duration;

use thiserror::Error;
use tracing::{debug, info, instrument, warn};

use crate::codec::{CodecError, DecodedFrame};
use crate::config::Timings;
use crate::protocol::{
    AckMessage, BmsState, BootFsmState, CanFsmState, ID_APPLICATION_STATE,
    ID_BOOTLOADER_FSM_STATES, ID_BOOTLOADER_VERSION_INFO, ID_DATA_TRANSFER_INFO, RequestCode,
    StatusCode, VersionInfoMux,
};
use crate::signals;
use crate::state::{BootloaderStatus, Version};
use crate::transport::{Ack, CanBus, Transport};

#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("Timed out waiting for {waiting_for}")]
    Timeout { waiting_for: &'static str },
    #[error("Rejected: {reason}")]
    Rejected { reason: String },
    #[error("State mismatch: expected {expected}, observed {observed}")]
    StateMismatch { expected: String, observed: String },
    #[error("Application is running (BMS state {bms_state})")]
    AppRunning { bms_state: BmsState },
    #[error("Encoding error: {0}")]
    Encode(#[from] CodecError),
}

/// Answer to a CRC word.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CrcAck {
    /// The target acknowledged the CRC.
    pub received: bool,
    /// The target found the CRC to match.
    pub valid: bool,
}

/// Protocol client bound to a transport.
pub struct Session<'t, B: CanBus> {
    transport: &'t Transport<B>,
    timings: Timings,
}

impl<'t, B: CanBus> Session<'t, B> {
    pub fn new(transport: &'t Transport<B>, timings: Timings) -> Self {
        Self { transport, timings }
    }

    pub fn timings(&self) -> &Timings {
        &self.timings
    }

    fn request(&self, code: RequestCode) -> Result<(), ProtocolError> {
        debug!(request = %code, "Request");
        self.transport
            .send_frame("ActionRequest", &signals! { "RequestCode" => code.symbol() })?;
        Ok(())
    }

    /// Wait for an acknowledgement of `expected` carrying `status`.
    pub fn wait_ack(&self, expected: AckMessage, status: StatusCode, timeout: Duration) -> Option<Ack> {
        self.transport
            .wait_ack(expected, status, timeout, self.timings.recv_timeout())
    }

    fn expect_state(&self, expected: CanFsmState) -> Result<(), ProtocolError> {
        match self.get_state()? {
            Some((can_fsm, _)) if can_fsm == expected => Ok(()),
            Some((can_fsm, boot_fsm)) => Err(ProtocolError::StateMismatch {
                expected: expected.to_string(),
                observed: format!("{can_fsm}/{boot_fsm}"),
            }),
            None => Err(ProtocolError::Timeout {
                waiting_for: "bootloader state",
            }),
        }
    }

    /// Ask the bootloader to accept a new program.
    #[instrument(skip(self))]
    pub fn start_transfer(&self) -> Result<(), ProtocolError> {
        self.request(RequestCode::CmdToTransferProgram)?;
        self.wait_ack(
            AckMessage::ReceivedCmdToTransferProgram,
            StatusCode::Processed,
            self.timings.ack_timeout(),
        )
        .ok_or(ProtocolError::Timeout {
            waiting_for: "transfer command acknowledgement",
        })?;
        self.expect_state(CanFsmState::WaitForInfo)
    }

    /// Announce program length and number of data words.
    #[instrument(skip(self))]
    pub fn send_program_info(&self, len_bytes: u64, words: u64) -> Result<(), ProtocolError> {
        self.transport.send_frame(
            "TransferProcessInfo",
            &signals! {
                "ProgramLength" => len_bytes,
                "RequiredTransferLoops" => words,
            },
        )?;
        let ack = self
            .wait_ack(
                AckMessage::ReceivedProgramInfo,
                StatusCode::Processed,
                self.timings.ack_timeout(),
            )
            .ok_or(ProtocolError::Timeout {
                waiting_for: "program info acknowledgement",
            })?;
        if !ack.is_yes() {
            return Err(ProtocolError::Rejected {
                reason: format!("program of {len_bytes} bytes refused"),
            });
        }
        self.expect_state(CanFsmState::WaitForDataLoops)
    }

    pub fn send_loop(&self, loop_number: u64) -> Result<(), ProtocolError> {
        self.transport
            .send_frame("LoopInfo", &signals! { "LoopNumber" => loop_number })?;
        Ok(())
    }

    /// Send one data word, then pause so the adapter can drain.
    pub fn send_data(&self, word: u64) -> Result<(), ProtocolError> {
        self.transport
            .send_frame("Data8Bytes", &signals! { "Data" => word })?;
        thread::sleep(self.timings.data_pause());
        Ok(())
    }

    /// Send a CRC word; `vector` selects the vector table CRC.
    #[instrument(skip(self, crc), fields(crc = %format!("0x{:016X}", crc)))]
    pub fn send_crc(&self, crc: u64, vector: bool) -> Result<CrcAck, ProtocolError> {
        self.transport
            .send_frame("Crc8Bytes", &signals! { "Crc" => crc })?;
        let (expected, timeout) = if vector {
            (
                AckMessage::ReceivedCrcOfVectorTable,
                self.timings.vector_crc_timeout(),
            )
        } else {
            (AckMessage::Received8BytesCrc, self.timings.ack_timeout())
        };
        let ack = self.wait_ack(expected, StatusCode::Processed, timeout);
        Ok(CrcAck {
            received: ack.is_some(),
            valid: ack.is_some_and(|a| a.is_yes()),
        })
    }

    /// Return the bootloader to idle.
    ///
    /// After the acknowledgement the target is given `settle` to restart,
    /// then polled until it reports `(NoCommunication, Wait)` at loop 0.
    #[instrument(skip(self))]
    pub fn reset(&self, settle: Duration) -> Result<(), ProtocolError> {
        self.request(RequestCode::CmdToResetBootProcess)?;
        self.wait_ack(
            AckMessage::ReceivedCmdToResetBootProcess,
            StatusCode::InProcessing,
            self.timings.ack_timeout(),
        )
        .ok_or(ProtocolError::Timeout {
            waiting_for: "reset acknowledgement",
        })?;

        info!(settle_ms = settle.as_millis() as u64, "Reset acknowledged, waiting");
        thread::sleep(settle);

        let mut status = BootloaderStatus::default();
        for attempt in 1..=self.timings.reset_poll_attempts.max(1) {
            status = self.get_status()?;
            if status.at_initial() {
                info!("Bootloader back to idle");
                return Ok(());
            }
            debug!(attempt, status = %status, "Bootloader not idle yet");
            thread::sleep(self.timings.reset_poll_interval());
        }
        warn!(status = %status, "Bootloader did not return to idle");
        Err(ProtocolError::StateMismatch {
            expected: "NoCommunication/Wait loop 0".to_string(),
            observed: status.to_string(),
        })
    }

    /// Start the flashed application and wait for it to report.
    #[instrument(skip(self))]
    pub fn run_app(&self) -> Result<BmsState, ProtocolError> {
        self.request(RequestCode::CmdToRunProgram)?;
        self.wait_ack(
            AckMessage::ReceivedCmdToRunProgram,
            StatusCode::InProcessing,
            self.timings.ack_timeout(),
        )
        .ok_or(ProtocolError::Timeout {
            waiting_for: "run command acknowledgement",
        })?;

        let ack = self
            .wait_ack(
                AckMessage::ReceivedCmdToRunProgram,
                StatusCode::Processed,
                self.timings.run_ack_timeout(),
            )
            .ok_or(ProtocolError::Timeout {
                waiting_for: "run command completion",
            })?;
        if !ack.is_yes() {
            return Err(ProtocolError::Rejected {
                reason: "no valid program on the target".to_string(),
            });
        }

        thread::sleep(self.timings.launch_delay());
        self.get_app_state()?.ok_or(ProtocolError::Timeout {
            waiting_for: "application state",
        })
    }

    /// `(can_fsm, boot_fsm)` of the bootloader.
    pub fn get_state(&self) -> Result<Option<(CanFsmState, BootFsmState)>, ProtocolError> {
        self.request(RequestCode::CmdToGetBootloaderInfo)?;
        let state = self
            .transport
            .wait_for(
                ID_BOOTLOADER_FSM_STATES,
                None,
                &[],
                self.timings.reply_timeout(),
                self.timings.recv_timeout(),
            )
            .and_then(|frame| {
                Some((
                    CanFsmState::from_symbol(frame.symbol("CanFsmState")?)?,
                    BootFsmState::from_symbol(frame.symbol("BootFsmState")?)?,
                ))
            });
        Ok(state)
    }

    /// Loop number the bootloader expects next.
    pub fn get_loop(&self) -> Result<Option<u32>, ProtocolError> {
        self.request(RequestCode::CmdToGetDataTransferInfo)?;
        let current = self
            .transport
            .wait_for(
                ID_DATA_TRANSFER_INFO,
                None,
                &[],
                self.timings.reply_timeout(),
                self.timings.recv_timeout(),
            )
            .and_then(|frame| frame.unsigned("CurrentLoopNumber"))
            .and_then(|n| u32::try_from(n).ok());
        Ok(current)
    }

    fn wait_version_info(&self, mux: VersionInfoMux) -> Result<Option<DecodedFrame>, ProtocolError> {
        self.request(RequestCode::CmdToGetVersionInfo)?;
        Ok(self.transport.wait_for(
            ID_BOOTLOADER_VERSION_INFO,
            Some(mux.symbol()),
            &[],
            self.timings.reply_timeout(),
            self.timings.recv_timeout(),
        ))
    }

    pub fn get_version(&self) -> Result<Option<Version>, ProtocolError> {
        let version = self
            .wait_version_info(VersionInfoMux::BootloaderVersionInfo)?
            .and_then(|frame| {
                Some(Version {
                    major: frame.unsigned("MajorVersionNumber")? as u8,
                    minor: frame.unsigned("MinorVersionNumber")? as u8,
                    patch: frame.unsigned("PatchVersionNumber")? as u8,
                })
            });
        Ok(version)
    }

    /// Short commit hash the bootloader was built from.
    pub fn get_commit_hash(&self) -> Result<Option<String>, ProtocolError> {
        let hash = self
            .wait_version_info(VersionInfoMux::CommitHash)?
            .and_then(|frame| frame.unsigned("CommitHash"))
            .map(commit_hash_text);
        Ok(hash)
    }

    /// State, loop and nothing else; fields stay empty when unanswered.
    pub fn get_status(&self) -> Result<BootloaderStatus, ProtocolError> {
        let state = self.get_state()?;
        let current_loop = self.get_loop()?;
        Ok(BootloaderStatus {
            can_fsm: state.map(|(can, _)| can),
            boot_fsm: state.map(|(_, boot)| boot),
            current_loop,
        })
    }

    /// Listen for the application state frame.
    pub fn get_app_state(&self) -> Result<Option<BmsState>, ProtocolError> {
        let state = self
            .transport
            .wait_for(
                ID_APPLICATION_STATE,
                None,
                &[],
                self.timings.app_state_window(),
                self.timings.recv_timeout(),
            )
            .and_then(|frame| frame.symbol("BmsState").and_then(BmsState::from_symbol));
        Ok(state)
    }
}

/// The hash travels as 7 ASCII bytes, first character in the lowest byte.
fn commit_hash_text(raw: u64) -> String {
    raw.to_le_bytes()[..7]
        .iter()
        .take_while(|b| **b != 0)
        .map(|b| char::from(*b))
        .collect()
}
