//! Simulated bootloader for tests, attached to a [`MockBus`](crate::transport::MockBus).

use std::collections::VecDeque;

use crate::codec::{Codec, SignalMap};
use crate::config::Timings;
use crate::protocol::{
    AckMessage, BmsState, BootFsmState, CanFsmState, ID_ACTION_REQUEST, ID_CRC_8_BYTES,
    ID_DATA_8_BYTES, ID_LOOP_INFO, ID_TRANSFER_PROCESS_INFO, RequestCode, StatusCode,
    VECTOR_TABLE_WORDS, WORDS_PER_SUBSECTOR, YesNoAnswer,
};
use crate::signals;
use crate::state::SectorMap;
use crate::transport::{CanFrame, Responder};

/// Timings that keep tests fast: no pauses, short waits.
pub fn fast_timings() -> Timings {
    Timings {
        recv_timeout_ms: 2,
        ack_timeout_ms: 50,
        reply_timeout_ms: 30,
        vector_crc_timeout_ms: 50,
        run_ack_timeout_ms: 50,
        app_state_window_ms: 30,
        data_pause_us: 0,
        sector_setup_pause_ms: 0,
        inter_sector_pause_ms: 0,
        retry_pause_ms: 0,
        reset_settle_ms: 0,
        reset_poll_interval_ms: 0,
        reset_poll_attempts: 3,
        launch_delay_ms: 0,
    }
}

/// Embedded bootloader as seen from the bus.
pub struct VirtualTarget {
    codec: Codec,
    pub can_fsm: CanFsmState,
    pub boot_fsm: BootFsmState,
    pub current_loop: u32,
    pub version: (u8, u8, u8),
    pub commit: [u8; 7],
    /// The bootloader answers requests.
    pub answers_bootloader: bool,
    /// Broadcast by a running application.
    pub app_state: Option<BmsState>,
    /// State polls answered with `ResetBoot` after a reset.
    pub reset_polls_before_idle: u32,
    pub has_valid_program: bool,
    /// Answers to sector CRCs, `Yes` once exhausted.
    pub sector_crc_answers: VecDeque<bool>,
    /// Answers to vector table CRCs, `Yes` once exhausted.
    pub vector_crc_answers: VecDeque<bool>,
    /// Sub-sector acknowledgements to swallow.
    pub dropped_subsector_acks: u32,
    pub sectors: SectorMap,
    reset_polls_left: u32,
    program_words: u64,
    pending_loop: Option<u64>,
    vector_words: Vec<u64>,
}

impl VirtualTarget {
    /// Idle bootloader, version 6.1.2.
    pub fn new() -> Self {
        Self {
            codec: Codec::bootloader(),
            can_fsm: CanFsmState::NoCommunication,
            boot_fsm: BootFsmState::Wait,
            current_loop: 0,
            version: (6, 1, 2),
            commit: *b"c0ffee1",
            answers_bootloader: true,
            app_state: None,
            reset_polls_before_idle: 0,
            has_valid_program: true,
            sector_crc_answers: VecDeque::new(),
            vector_crc_answers: VecDeque::new(),
            dropped_subsector_acks: 0,
            sectors: SectorMap::target(),
            reset_polls_left: 0,
            program_words: 0,
            pending_loop: None,
            vector_words: Vec::new(),
        }
    }

    /// Nothing on the bus answers.
    pub fn silent() -> Self {
        Self {
            answers_bootloader: false,
            ..Self::new()
        }
    }

    /// Application running instead of the bootloader.
    pub fn app_running(state: BmsState) -> Self {
        Self {
            app_state: Some(state),
            ..Self::silent()
        }
    }

    /// Interrupted upload.
    pub fn mid_upload(mut self, current_loop: u32) -> Self {
        self.can_fsm = CanFsmState::Received8BytesData;
        self.boot_fsm = BootFsmState::Load;
        self.current_loop = current_loop;
        self
    }

    /// Program info already accepted for `words` words.
    pub fn transferring(mut self, words: u64) -> Self {
        self.can_fsm = CanFsmState::WaitForDataLoops;
        self.boot_fsm = BootFsmState::Load;
        self.program_words = words;
        self
    }

    pub fn with_sectors(mut self, sectors: SectorMap) -> Self {
        self.sectors = sectors;
        self
    }

    fn frame(&self, name: &str, signals: SignalMap) -> CanFrame {
        let id = self.codec.frame_id_of(name).unwrap();
        CanFrame::new(id, &self.codec.encode(name, &signals).unwrap())
    }

    fn ack(&self, message: AckMessage, status: StatusCode, yes: bool) -> CanFrame {
        let answer = if yes { YesNoAnswer::Yes } else { YesNoAnswer::No };
        self.frame(
            "AcknowledgeMessage",
            signals! {
                "AcknowledgeFlag" => "Received",
                "AcknowledgeMessage" => message.symbol(),
                "StatusCode" => status.symbol(),
                "YesNoAnswer" => answer.symbol(),
            },
        )
    }

    fn go_idle(&mut self) {
        self.can_fsm = CanFsmState::NoCommunication;
        self.boot_fsm = BootFsmState::Wait;
        self.current_loop = 0;
        self.program_words = 0;
        self.pending_loop = None;
        self.vector_words.clear();
    }

    fn ends_subsector(&self, j: u64) -> bool {
        j % u64::from(WORDS_PER_SUBSECTOR) == 0
            || j == self.program_words
            || self.sectors.sector_for_loop(j) != self.sectors.sector_for_loop(j + 1)
    }

    fn on_request(&mut self, code: RequestCode) -> Vec<CanFrame> {
        match code {
            RequestCode::CmdToTransferProgram => {
                self.go_idle();
                self.can_fsm = CanFsmState::WaitForInfo;
                self.boot_fsm = BootFsmState::Load;
                vec![self.ack(AckMessage::ReceivedCmdToTransferProgram, StatusCode::Processed, true)]
            }
            RequestCode::CmdToResetBootProcess => {
                self.can_fsm = CanFsmState::ResetBoot;
                self.boot_fsm = BootFsmState::Reset;
                self.reset_polls_left = self.reset_polls_before_idle;
                vec![self.ack(AckMessage::ReceivedCmdToResetBootProcess, StatusCode::InProcessing, true)]
            }
            RequestCode::CmdToRunProgram => {
                let valid = self.has_valid_program;
                let replies = vec![
                    self.ack(AckMessage::ReceivedCmdToRunProgram, StatusCode::InProcessing, true),
                    self.ack(AckMessage::ReceivedCmdToRunProgram, StatusCode::Processed, valid),
                ];
                if valid {
                    self.can_fsm = CanFsmState::RunProgram;
                    self.boot_fsm = BootFsmState::Run;
                    self.answers_bootloader = false;
                    self.app_state = Some(BmsState::Uninitialized);
                }
                replies
            }
            RequestCode::CmdToGetBootloaderInfo => {
                if self.can_fsm == CanFsmState::ResetBoot {
                    if self.reset_polls_left == 0 {
                        self.go_idle();
                    } else {
                        self.reset_polls_left -= 1;
                    }
                }
                vec![self.frame(
                    "BootloaderFsmStates",
                    signals! {
                        "CanFsmState" => self.can_fsm.symbol(),
                        "BootFsmState" => self.boot_fsm.symbol(),
                    },
                )]
            }
            RequestCode::CmdToGetDataTransferInfo => vec![self.frame(
                "DataTransferInfo",
                signals! { "CurrentLoopNumber" => self.current_loop },
            )],
            RequestCode::CmdToGetVersionInfo => {
                let (major, minor, patch) = self.version;
                let mut hash = [0u8; 8];
                hash[..7].copy_from_slice(&self.commit);
                vec![
                    self.frame(
                        "BootloaderVersionInfo",
                        signals! {
                            "Mux" => "BootloaderVersionInfo",
                            "MajorVersionNumber" => u64::from(major),
                            "MinorVersionNumber" => u64::from(minor),
                            "PatchVersionNumber" => u64::from(patch),
                        },
                    ),
                    self.frame(
                        "BootloaderVersionInfo",
                        signals! {
                            "Mux" => "CommitHash",
                            "CommitHash" => u64::from_le_bytes(hash),
                        },
                    ),
                ]
            }
        }
    }

    fn on_program_info(&mut self, words: u64) -> Vec<CanFrame> {
        let accepted = self.can_fsm == CanFsmState::WaitForInfo;
        if accepted {
            self.program_words = words;
            self.can_fsm = CanFsmState::WaitForDataLoops;
        }
        vec![self.ack(AckMessage::ReceivedProgramInfo, StatusCode::Processed, accepted)]
    }

    fn on_data(&mut self) -> Vec<CanFrame> {
        if let Some(j) = self.pending_loop.take() {
            self.can_fsm = CanFsmState::Received8BytesData;
            if !self.ends_subsector(j) {
                return Vec::new();
            }
            if self.dropped_subsector_acks > 0 {
                self.dropped_subsector_acks -= 1;
                return Vec::new();
            }
            return vec![self.ack(AckMessage::ReceivedSubSectorData, StatusCode::Processed, true)];
        }

        self.vector_words.push(0);
        if self.vector_words.len() == VECTOR_TABLE_WORDS {
            self.can_fsm = CanFsmState::FinishedTransferVectorTable;
            return vec![self.ack(AckMessage::ReceivedVectorTable, StatusCode::Processed, true)];
        }
        Vec::new()
    }

    fn on_crc(&mut self) -> Vec<CanFrame> {
        if self.vector_words.len() == VECTOR_TABLE_WORDS {
            self.vector_words.clear();
            let valid = self.vector_crc_answers.pop_front().unwrap_or(true);
            if valid {
                self.can_fsm = CanFsmState::ValidatedVectorTable;
            }
            return vec![self.ack(AckMessage::ReceivedCrcOfVectorTable, StatusCode::Processed, valid)];
        }

        let valid = self.sector_crc_answers.pop_front().unwrap_or(true);
        if valid {
            self.can_fsm = CanFsmState::Received8BytesCrc;
        } else {
            self.can_fsm = CanFsmState::Error;
            self.boot_fsm = BootFsmState::Error;
        }
        vec![self.ack(AckMessage::Received8BytesCrc, StatusCode::Processed, valid)]
    }
}

impl Responder for VirtualTarget {
    fn on_frame(&mut self, frame: &CanFrame) -> Vec<CanFrame> {
        if !self.answers_bootloader {
            return Vec::new();
        }
        let Ok(decoded) = self.codec.decode(frame.id, &frame.data) else {
            return Vec::new();
        };
        match frame.id {
            ID_ACTION_REQUEST => decoded
                .symbol("RequestCode")
                .and_then(RequestCode::from_symbol)
                .map(|code| self.on_request(code))
                .unwrap_or_default(),
            ID_TRANSFER_PROCESS_INFO => {
                let words = decoded.unsigned("RequiredTransferLoops").unwrap_or(0);
                self.on_program_info(words)
            }
            ID_LOOP_INFO => {
                let j = decoded.unsigned("LoopNumber").unwrap_or(0);
                self.pending_loop = Some(j);
                self.current_loop = j as u32;
                self.can_fsm = CanFsmState::ReceivedLoopNumber;
                Vec::new()
            }
            ID_DATA_8_BYTES => self.on_data(),
            ID_CRC_8_BYTES => self.on_crc(),
            _ => Vec::new(),
        }
    }

    fn on_idle(&mut self) -> Option<CanFrame> {
        let state = self.app_state?;
        Some(self.frame("ApplicationState", signals! { "BmsState" => state.symbol() }))
    }
}
