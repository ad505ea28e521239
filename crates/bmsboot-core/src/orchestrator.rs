//! Flash orchestrator: pre-flight check, reset, image transfer and launch.
//!
//! This is the only place that retries or sleeps between exchanges.
//!
//! # Transfer
//!
//! 1. Reset the target unless it is idle, then announce the program.
//! 2. Stream the image sector by sector. Every sub-sector of 1024 words
//!    is acknowledged, every sector is closed with the CRC of its last word.
//! 3. Write the vector table and validate its CRC. A failure here only
//!    repeats the vector table; a failure during data restarts from loop 1.

use std::thread;

use tracing::{debug, error, info, instrument, warn};

use crate::error::FlashError;
use crate::events::{ProgressSink, ProgressTracker};
use crate::payload::BinarySource;
use crate::protocol::{
    AckMessage, BmsState, RETRY_LIMIT, SUBSECTOR_RETRIES, Sector, StatusCode,
};
use crate::session::{ProtocolError, Session};
use crate::state::{BootloaderStatus, SectorMap, TargetCheck, subsector_end};
use crate::transport::CanBus;

pub struct Orchestrator<'t, B: CanBus, P: ProgressSink> {
    session: Session<'t, B>,
    sectors: SectorMap,
    progress: P,
}

impl<'t, B: CanBus, P: ProgressSink> Orchestrator<'t, B, P> {
    pub fn new(session: Session<'t, B>, progress: P) -> Self {
        Self {
            session,
            sectors: SectorMap::target(),
            progress,
        }
    }

    /// Use a flash layout other than the target MCU's.
    pub fn with_sector_map(mut self, sectors: SectorMap) -> Self {
        self.sectors = sectors;
        self
    }

    pub fn session(&self) -> &Session<'t, B> {
        &self.session
    }

    /// Probe the target.
    #[instrument(skip(self))]
    pub fn check(&self) -> Result<TargetCheck, ProtocolError> {
        let state = self.session.get_state()?;
        let current_loop = self.session.get_loop()?;
        let version = self.session.get_version()?;
        let status = BootloaderStatus {
            can_fsm: state.map(|(can, _)| can),
            boot_fsm: state.map(|(_, boot)| boot),
            current_loop,
        };

        if let (true, Some(version)) = (status.is_complete(), version) {
            let commit = self.session.get_commit_hash()?;
            info!(
                version = %version,
                commit = commit.as_deref().unwrap_or("unknown"),
                status = %status,
                "Bootloader ready"
            );
            return Ok(TargetCheck::Ready {
                status,
                version,
                commit,
            });
        }

        if status.is_empty() && version.is_none() {
            return Ok(match self.session.get_app_state()? {
                Some(bms_state) => {
                    warn!(bms_state = %bms_state, "Application is running, power-cycle the target");
                    TargetCheck::ApplicationRunning(bms_state)
                }
                None => {
                    warn!("Target does not answer");
                    TargetCheck::Unreachable
                }
            });
        }

        warn!(status = %status, version = ?version, "Bootloader answered partially");
        Ok(TargetCheck::Partial { status, version })
    }

    /// Ready status of the target, or the error its check result implies.
    fn ready_status(&self) -> Result<BootloaderStatus, FlashError> {
        match self.check()? {
            TargetCheck::Ready { status, .. } => Ok(status),
            TargetCheck::ApplicationRunning(bms_state) => {
                Err(ProtocolError::AppRunning { bms_state }.into())
            }
            TargetCheck::Partial { status, .. } => Err(FlashError::CannotResolveState(status)),
            TargetCheck::Unreachable => Err(FlashError::Unreachable),
        }
    }

    /// Return the bootloader to idle.
    #[instrument(skip(self))]
    pub fn reset(&self) -> Result<(), FlashError> {
        self.ready_status()?;
        self.session.reset(self.session.timings().reset_settle())?;
        Ok(())
    }

    /// Check the target, then flash `image`.
    pub fn load(&self, image: &BinarySource) -> Result<(), FlashError> {
        let status = self.ready_status()?;
        self.flash(image, status)
    }

    /// Transfer `image` to a target last seen in `status`.
    #[instrument(skip_all, fields(words = image.word_count()))]
    pub fn flash(&self, image: &BinarySource, status: BootloaderStatus) -> Result<(), FlashError> {
        if !status.is_complete() {
            return Err(FlashError::CannotResolveState(status));
        }

        let mut tracker = ProgressTracker::new(image.word_count());
        self.prepare(image, status)?;

        let mut attempts = 0;
        let mut vector_only = false;
        loop {
            let result = if vector_only {
                self.send_vector_table(image)
            } else {
                self.send_app_data(image, &mut tracker).and_then(|()| {
                    vector_only = true;
                    self.send_vector_table(image)
                })
            };

            let err = match result {
                Ok(()) => break,
                Err(e) if e.is_retryable() => e,
                Err(e) => {
                    error!(error = %e, "Flash aborted");
                    return Err(e);
                }
            };

            attempts += 1;
            if attempts > RETRY_LIMIT {
                error!(attempts, error = %err, "Flash failed");
                return Err(match err {
                    FlashError::Protocol(last) => FlashError::RetriesExhausted { attempts, last },
                    other => other,
                });
            }
            warn!(attempt = attempts, error = %err, vector_only, "Flash attempt failed, retrying");
            thread::sleep(self.session.timings().retry_pause());

            if !vector_only {
                let status = self.session.get_status()?;
                if !status.is_complete() {
                    return Err(FlashError::CannotResolveState(status));
                }
                self.prepare(image, status)?;
            }
        }

        tracker.finish(&self.progress);
        info!(words = image.word_count(), "Flash complete");
        Ok(())
    }

    /// Reset unless idle, then announce the program.
    fn prepare(&self, image: &BinarySource, status: BootloaderStatus) -> Result<(), FlashError> {
        if !status.at_initial() {
            info!(status = %status, "Target not idle, resetting first");
            self.session.reset(self.session.timings().reset_settle())?;
        }
        self.session.start_transfer()?;
        self.session
            .send_program_info(image.len_bytes(), image.word_count())?;
        Ok(())
    }

    fn send_app_data(&self, image: &BinarySource, tracker: &mut ProgressTracker) -> Result<(), FlashError> {
        let total = image.word_count();
        let mut loop_number = 1;
        while loop_number <= total {
            let sector = self
                .sectors
                .sector_for_loop(loop_number)
                .ok_or(FlashError::SectorMapExhausted { loop_number })?;
            thread::sleep(self.session.timings().inter_sector_pause());
            self.send_sector(image, sector, loop_number, tracker)?;
            loop_number += u64::from(sector.size_words());
        }
        Ok(())
    }

    /// Stream one sector from `start` and validate its CRC.
    #[instrument(skip(self, image, tracker), fields(sector = sector.id))]
    fn send_sector(
        &self,
        image: &BinarySource,
        sector: Sector,
        start: u64,
        tracker: &mut ProgressTracker,
    ) -> Result<(), FlashError> {
        let total = image.word_count();
        let last = (start + u64::from(sector.size_words()) - 1).min(total);

        let mut sub_start = start;
        while sub_start <= last {
            let sub_end = subsector_end(sub_start, total).min(last);
            let first = sub_start == start;

            let mut tries = 0;
            loop {
                tries += 1;
                match self.send_sub_sector(image, sub_start, sub_end, first) {
                    Ok(()) => break,
                    Err(e) if tries < SUBSECTOR_RETRIES => {
                        debug!(sub_start, sub_end, tries, error = %e, "Sub-sector failed, resending");
                    }
                    Err(e) => return Err(e.into()),
                }
            }
            tracker.words_done(sub_end, &self.progress);
            sub_start = sub_end + 1;
        }

        let (crc, _) = image.word_at(last);
        let ack = self.session.send_crc(crc, false)?;
        if !ack.received {
            return Err(ProtocolError::Timeout {
                waiting_for: "sector CRC acknowledgement",
            }
            .into());
        }
        if !ack.valid {
            return Err(ProtocolError::Rejected {
                reason: format!("CRC of sector {} does not match", sector.id),
            }
            .into());
        }
        debug!(first = start, last, "Sector validated");
        Ok(())
    }

    fn send_sub_sector(
        &self,
        image: &BinarySource,
        start: u64,
        end: u64,
        first_of_sector: bool,
    ) -> Result<(), ProtocolError> {
        for loop_number in start..=end {
            self.session.send_loop(loop_number)?;
            if first_of_sector && loop_number == start {
                // The target prepares the sector before it takes data.
                thread::sleep(self.session.timings().sector_setup_pause());
            }
            let (_, data) = image.word_at(loop_number);
            self.session.send_data(data)?;
        }
        self.session
            .wait_ack(
                AckMessage::ReceivedSubSectorData,
                StatusCode::Processed,
                self.session.timings().ack_timeout(),
            )
            .map(|_| ())
            .ok_or(ProtocolError::Timeout {
                waiting_for: "sub-sector acknowledgement",
            })
    }

    fn send_vector_table(&self, image: &BinarySource) -> Result<(), FlashError> {
        for word in image.vector_table() {
            self.session.send_data(word)?;
        }
        self.session
            .wait_ack(
                AckMessage::ReceivedVectorTable,
                StatusCode::Processed,
                self.session.timings().ack_timeout(),
            )
            .ok_or(ProtocolError::Timeout {
                waiting_for: "vector table acknowledgement",
            })?;

        let ack = self.session.send_crc(image.vector_table_crc(), true)?;
        if !ack.received {
            return Err(ProtocolError::Timeout {
                waiting_for: "vector table CRC acknowledgement",
            }
            .into());
        }
        if !ack.valid {
            return Err(ProtocolError::Rejected {
                reason: "vector table CRC does not match".to_string(),
            }
            .into());
        }
        info!("Vector table validated");
        Ok(())
    }

    /// Start the application on a ready bootloader.
    #[instrument(skip(self))]
    pub fn launch(&self) -> Result<BmsState, FlashError> {
        match self.check()? {
            TargetCheck::Ready { .. } => {}
            other => return Err(FlashError::TargetNotReady(other)),
        }
        let bms_state = self.session.run_app().map_err(FlashError::LaunchFailed)?;
        info!(bms_state = %bms_state, "Application started");
        Ok(bms_state)
    }
}
