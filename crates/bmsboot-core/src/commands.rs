//! Operations offered to front ends, each returning a stable exit code.
//!
//! | Operation | 0 | 1 | 2 | 3 | 4 | 5 | 6 | 7 |
//! |---|---|---|---|---|---|---|---|---|
//! | check | ready | partial | app running | unreachable | | bus unavailable | | |
//! | reset | ok | | app running | | failed | timeout | bus unavailable | |
//! | load | ok | | app running | | failed | timeout | artifact invalid | bus unavailable |
//! | run | ok | not ready | launch failed | bus unavailable | | | | |

use std::path::PathBuf;
use std::time::Duration;

use tracing::{error, info};

use crate::config::ToolConfig;
use crate::error::{ExitClass, FlashError};
use crate::events::{NullProgress, ProgressSink};
use crate::orchestrator::Orchestrator;
use crate::payload::BinarySource;
use crate::session::Session;
use crate::state::{SectorMap, TargetCheck};
use crate::transport::{CanBus, Transport};

fn open(config: &ToolConfig) -> Result<Transport<Box<dyn CanBus>>, FlashError> {
    let transport = Transport::open(&config.bus).map_err(|e| {
        error!(
            interface = %config.bus.interface,
            channel = %config.bus.channel,
            error = %e,
            "Cannot open bus"
        );
        e
    })?;
    Ok(transport)
}

/// Probe the target.
pub fn check_bootloader(config: &ToolConfig) -> i32 {
    match open(config) {
        Ok(transport) => {
            let code = check_on(&transport, config);
            transport.close();
            code
        }
        Err(_) => 5,
    }
}

/// Probe over an already open transport.
pub fn check_on<B: CanBus>(transport: &Transport<B>, config: &ToolConfig) -> i32 {
    let session = Session::new(transport, config.timings.clone());
    let orchestrator = Orchestrator::new(session, NullProgress);
    match orchestrator.check() {
        Ok(TargetCheck::Ready { .. }) => 0,
        Ok(TargetCheck::Partial { .. }) => 1,
        Ok(TargetCheck::ApplicationRunning(_)) => 2,
        Ok(TargetCheck::Unreachable) => 3,
        Err(e) => {
            error!(error = %e, "Check failed");
            5
        }
    }
}

/// Return the bootloader to idle. `timeout_s` overrides the settle period.
pub fn reset_bootloader(config: &ToolConfig, timeout_s: Option<u64>) -> i32 {
    match open(config) {
        Ok(transport) => {
            let code = reset_on(&transport, config, timeout_s);
            transport.close();
            code
        }
        Err(_) => 6,
    }
}

pub fn reset_on<B: CanBus>(transport: &Transport<B>, config: &ToolConfig, timeout_s: Option<u64>) -> i32 {
    let mut timings = config.timings.clone();
    if let Some(seconds) = timeout_s {
        timings.reset_settle_ms = Duration::from_secs(seconds).as_millis() as u64;
    }
    let orchestrator = Orchestrator::new(Session::new(transport, timings), NullProgress);
    match orchestrator.reset() {
        Ok(()) => {
            info!("Reset complete");
            0
        }
        Err(e) => {
            error!(error = %e, "Reset failed");
            match e.exit_class() {
                ExitClass::AppRunning => 2,
                ExitClass::Timeout => 5,
                ExitClass::BusUnavailable => 6,
                _ => 4,
            }
        }
    }
}

/// Flash the artifacts of `config.artifacts_dir`.
///
/// The artifacts are validated before the bus is opened.
pub fn load_app(config: &ToolConfig, timeout_s: Option<u64>, progress: impl ProgressSink) -> i32 {
    let dir = config
        .artifacts_dir
        .clone()
        .unwrap_or_else(|| PathBuf::from("."));
    let image = match BinarySource::from_dir(&dir) {
        Ok(image) => image,
        Err(e) => {
            error!(dir = %dir.display(), error = %e, "Artifact invalid");
            return 6;
        }
    };
    match open(config) {
        Ok(transport) => {
            let code = load_on(&transport, config, &image, SectorMap::target(), timeout_s, progress);
            transport.close();
            code
        }
        Err(_) => 7,
    }
}

pub fn load_on<B: CanBus>(
    transport: &Transport<B>,
    config: &ToolConfig,
    image: &BinarySource,
    sectors: SectorMap,
    timeout_s: Option<u64>,
    progress: impl ProgressSink,
) -> i32 {
    let mut timings = config.timings.clone();
    if let Some(seconds) = timeout_s {
        timings.reset_settle_ms = Duration::from_secs(seconds).as_millis() as u64;
    }
    let orchestrator =
        Orchestrator::new(Session::new(transport, timings), progress).with_sector_map(sectors);
    match orchestrator.load(image) {
        Ok(()) => 0,
        Err(e) => {
            error!(error = %e, "Load failed");
            match e.exit_class() {
                ExitClass::AppRunning => 2,
                ExitClass::Timeout => 5,
                ExitClass::ArtifactInvalid => 6,
                ExitClass::BusUnavailable => 7,
                _ => 4,
            }
        }
    }
}

/// Start the flashed application.
pub fn run_app(config: &ToolConfig) -> i32 {
    match open(config) {
        Ok(transport) => {
            let code = run_on(&transport, config);
            transport.close();
            code
        }
        Err(_) => 3,
    }
}

pub fn run_on<B: CanBus>(transport: &Transport<B>, config: &ToolConfig) -> i32 {
    let orchestrator = Orchestrator::new(Session::new(transport, config.timings.clone()), NullProgress);
    match orchestrator.launch() {
        Ok(_) => 0,
        Err(e) => {
            error!(error = %e, "Run failed");
            match e.exit_class() {
                ExitClass::NotReady | ExitClass::AppRunning => 1,
                ExitClass::BusUnavailable => 3,
                _ => 2,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::Codec;
    use crate::config::{BusConfig, Interface};
    use crate::events::recording::RecordingProgress;
    use crate::payload::source::fixture;
    use crate::protocol::{BmsState, RETRY_LIMIT, SUBSECTOR_RETRIES, Sector};
    use crate::sim::{VirtualTarget, fast_timings};
    use crate::transport::{CanFrame, MockBus};

    fn config() -> ToolConfig {
        ToolConfig {
            timings: fast_timings(),
            ..Default::default()
        }
    }

    fn on(target: VirtualTarget) -> (MockBus, Transport<MockBus>) {
        let bus = MockBus::with_responder(target);
        (bus.clone(), Transport::new(bus))
    }

    /// Sent frames as `(frame name, signals)` text, one per frame.
    fn trace(frames: &[CanFrame]) -> Vec<String> {
        let codec = Codec::bootloader();
        frames
            .iter()
            .map(|f| {
                let decoded = codec.decode(f.id, &f.data).unwrap();
                let signals: Vec<String> = decoded
                    .signals
                    .iter()
                    .map(|(k, v)| format!("{k}={v}"))
                    .collect();
                format!("{}{{{}}}", decoded.name, signals.join(","))
            })
            .filter(|line| !line.contains("CmdToGet"))
            .collect()
    }

    fn toy_sectors() -> SectorMap {
        SectorMap::new(vec![Sector::new(7, 0x10)])
    }

    #[test]
    fn test_check_ready() {
        let (_, transport) = on(VirtualTarget::new());
        assert_eq!(check_on(&transport, &config()), 0);
    }

    #[test]
    fn test_check_app_running() {
        let (_, transport) = on(VirtualTarget::app_running(BmsState::Uninitialized));
        assert_eq!(check_on(&transport, &config()), 2);
    }

    #[test]
    fn test_check_unreachable() {
        let (_, transport) = on(VirtualTarget::silent());
        assert_eq!(check_on(&transport, &config()), 3);
    }

    #[test]
    fn test_check_partial() {
        let bus = MockBus::new();
        let transport = Transport::new(bus.clone());
        bus.queue_frame(CanFrame::new(0x481, &[0, 0]));
        assert_eq!(check_on(&transport, &config()), 1);
    }

    #[test]
    fn test_flash_two_words() {
        let dir = tempfile::tempdir().unwrap();
        let image = fixture::two_words(dir.path());
        let (bus, transport) = on(VirtualTarget::new().with_sectors(toy_sectors()));
        let progress = RecordingProgress::default();

        assert_eq!(
            load_on(&transport, &config(), &image, toy_sectors(), None, &progress),
            0
        );
        assert_eq!(progress.total(), 100);
        assert_eq!(*progress.deltas.lock().unwrap(), vec![99, 1]);

        assert_eq!(
            trace(&bus.sent_frames()),
            vec![
                "ActionRequest{RequestCode=CmdToTransferProgram}",
                "TransferProcessInfo{ProgramLength=16,RequiredTransferLoops=2}",
                "LoopInfo{LoopNumber=1}",
                "Data8Bytes{Data=72471532147835423}",
                "LoopInfo{LoopNumber=2}",
                "Data8Bytes{Data=3977631074064806246}",
                "Crc8Bytes{Crc=15553859376183794778}",
                "Data8Bytes{Data=10}",
                "Data8Bytes{Data=11}",
                "Data8Bytes{Data=12}",
                "Data8Bytes{Data=13}",
                format!("Crc8Bytes{{Crc={}}}", fixture::VECTOR_TABLE_CRC).as_str(),
            ]
        );
    }

    #[test]
    fn test_flash_retries_after_sector_crc_mismatch() {
        let dir = tempfile::tempdir().unwrap();
        let image = fixture::two_words(dir.path());
        let mut target = VirtualTarget::new().with_sectors(toy_sectors());
        target.sector_crc_answers.push_back(false);
        let (bus, transport) = on(target);
        let progress = RecordingProgress::default();

        assert_eq!(
            load_on(&transport, &config(), &image, toy_sectors(), None, &progress),
            0
        );
        assert_eq!(progress.total(), 100);

        let sent = trace(&bus.sent_frames());
        let count = |line: &str| sent.iter().filter(|l| *l == line).count();
        assert_eq!(count("ActionRequest{RequestCode=CmdToResetBootProcess}"), 1);
        assert_eq!(count("ActionRequest{RequestCode=CmdToTransferProgram}"), 2);
        assert_eq!(count("LoopInfo{LoopNumber=1}"), 2);
        assert_eq!(count("Crc8Bytes{Crc=15553859376183794778}"), 2);
    }

    #[test]
    fn test_flash_restarts_after_subsector_gives_up() {
        let dir = tempfile::tempdir().unwrap();
        let image = fixture::two_words(dir.path());
        let mut target = VirtualTarget::new().with_sectors(toy_sectors());
        target.dropped_subsector_acks = SUBSECTOR_RETRIES;
        let (bus, transport) = on(target);
        let progress = RecordingProgress::default();

        assert_eq!(
            load_on(&transport, &config(), &image, toy_sectors(), None, &progress),
            0
        );
        assert_eq!(progress.total(), 100);

        let sent = trace(&bus.sent_frames());
        let count = |line: &str| sent.iter().filter(|l| *l == line).count();
        assert_eq!(count("ActionRequest{RequestCode=CmdToResetBootProcess}"), 1);
        assert_eq!(count("ActionRequest{RequestCode=CmdToTransferProgram}"), 2);
        // Every try of the failing sub-sector plus the successful pass.
        assert_eq!(count("LoopInfo{LoopNumber=1}"), SUBSECTOR_RETRIES as usize + 1);
        assert_eq!(count("Crc8Bytes{Crc=15553859376183794778}"), 1);
    }

    #[test]
    fn test_flash_subsector_never_acknowledged() {
        let dir = tempfile::tempdir().unwrap();
        let image = fixture::two_words(dir.path());
        let mut target = VirtualTarget::new().with_sectors(toy_sectors());
        target.dropped_subsector_acks = u32::MAX;
        let (bus, transport) = on(target);

        assert_eq!(
            load_on(&transport, &config(), &image, toy_sectors(), None, NullProgress),
            4
        );
        let sent = trace(&bus.sent_frames());
        let attempts = (RETRY_LIMIT + 1) as usize;
        assert_eq!(
            sent.iter().filter(|l| *l == "LoopInfo{LoopNumber=1}").count(),
            attempts * SUBSECTOR_RETRIES as usize
        );
        assert!(!sent.iter().any(|l| l.starts_with("Crc8Bytes")));
    }

    #[test]
    fn test_flash_gives_up() {
        let dir = tempfile::tempdir().unwrap();
        let image = fixture::two_words(dir.path());
        let mut target = VirtualTarget::new().with_sectors(toy_sectors());
        target.vector_crc_answers.extend([false; 3]);
        let (bus, transport) = on(target);

        assert_eq!(
            load_on(&transport, &config(), &image, toy_sectors(), None, NullProgress),
            4
        );
        let sent = trace(&bus.sent_frames());
        // Data goes out once, the vector table once per attempt.
        assert_eq!(sent.iter().filter(|l| l.starts_with("LoopInfo")).count(), 2);
        assert_eq!(sent.iter().filter(|l| l.starts_with("Data8Bytes")).count(), 2 + 3 * 4);
    }

    #[test]
    fn test_flash_app_running() {
        let dir = tempfile::tempdir().unwrap();
        let image = fixture::two_words(dir.path());
        let (_, transport) = on(VirtualTarget::app_running(BmsState::Normal));
        assert_eq!(
            load_on(&transport, &config(), &image, toy_sectors(), None, NullProgress),
            2
        );
    }

    #[test]
    fn test_flash_beyond_sector_map() {
        let dir = tempfile::tempdir().unwrap();
        let image = fixture::synthetic(dir.path(), 4);
        let (_, transport) = on(VirtualTarget::new().with_sectors(toy_sectors()));
        assert_eq!(
            load_on(&transport, &config(), &image, toy_sectors(), None, NullProgress),
            4
        );
    }

    #[test]
    fn test_reset_from_mid_upload() {
        let mut target = VirtualTarget::new().mid_upload(1000);
        target.reset_polls_before_idle = 1;
        let (bus, transport) = on(target);

        assert_eq!(reset_on(&transport, &config(), Some(0)), 0);
        let sent = trace(&bus.sent_frames());
        assert_eq!(sent, vec!["ActionRequest{RequestCode=CmdToResetBootProcess}"]);
    }

    #[test]
    fn test_reset_unreachable() {
        let (_, transport) = on(VirtualTarget::silent());
        assert_eq!(reset_on(&transport, &config(), Some(0)), 5);
    }

    #[test]
    fn test_run_without_valid_program() {
        let mut target = VirtualTarget::new();
        target.has_valid_program = false;
        let (_, transport) = on(target);
        assert_eq!(run_on(&transport, &config()), 2);
    }

    #[test]
    fn test_run_starts_application() {
        let (_, transport) = on(VirtualTarget::new());
        assert_eq!(run_on(&transport, &config()), 0);
        // Now the application answers instead of the bootloader.
        assert_eq!(run_on(&transport, &config()), 1);
    }

    #[test]
    fn test_load_rejects_artifacts_before_bus() {
        let dir = tempfile::tempdir().unwrap();
        let config = ToolConfig {
            artifacts_dir: Some(dir.path().to_path_buf()),
            bus: BusConfig {
                interface: Interface::Slcan,
                channel: "/nonexistent/tty".to_string(),
                bitrate: 500_000,
            },
            timings: fast_timings(),
        };
        assert_eq!(load_app(&config, None, NullProgress), 6);

        fixture::two_words(dir.path());
        assert_eq!(load_app(&config, None, NullProgress), 7);
    }

    #[test]
    fn test_bus_unavailable_codes() {
        let config = ToolConfig {
            bus: BusConfig {
                channel: "/nonexistent/tty".to_string(),
                ..Default::default()
            },
            timings: fast_timings(),
            ..Default::default()
        };
        assert_eq!(check_bootloader(&config), 5);
        assert_eq!(reset_bootloader(&config, None), 6);
        assert_eq!(run_app(&config), 3);
    }
}
