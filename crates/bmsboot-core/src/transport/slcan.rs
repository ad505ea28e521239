//! slcan (Lawicel ASCII) transport over a serial-line CAN adapter.

use std::io::Read;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use serialport::SerialPort;
use tracing::{debug, info, instrument, trace, warn};

use super::traits::{BusError, CanBus, CanFrame};

/// Line speed of the virtual serial port; USB adapters ignore it.
const SERIAL_BAUD: u32 = 115_200;

/// Adapter commands are answered quickly; this bounds the initial setup.
const SETUP_TIMEOUT: Duration = Duration::from_millis(200);

/// Map a CAN bitrate to its `S<n>` setup code.
pub fn bitrate_code(bitrate: u32) -> Option<u8> {
    match bitrate {
        10_000 => Some(0),
        20_000 => Some(1),
        50_000 => Some(2),
        100_000 => Some(3),
        125_000 => Some(4),
        250_000 => Some(5),
        500_000 => Some(6),
        800_000 => Some(7),
        1_000_000 => Some(8),
        _ => None,
    }
}

/// Render a standard data frame as an slcan `t` command (without `\r`).
pub fn format_frame(frame: &CanFrame) -> String {
    format!(
        "t{:03X}{:X}{}",
        frame.id,
        frame.data.len(),
        hex::encode_upper(&frame.data)
    )
}

/// Parse one received slcan line. Anything but a standard data frame yields `None`.
pub fn parse_line(line: &[u8]) -> Option<CanFrame> {
    let line = std::str::from_utf8(line).ok()?.trim();
    let rest = line.strip_prefix('t')?;
    if !rest.is_ascii() || rest.len() < 4 {
        return None;
    }
    let id = u32::from_str_radix(&rest[..3], 16).ok()?;
    let len = usize::from_str_radix(&rest[3..4], 16).ok()?;
    if len > CanFrame::MAX_LEN {
        return None;
    }
    // Trailing characters after the payload carry an optional timestamp.
    let payload = rest.get(4..4 + 2 * len)?;
    let data = hex::decode(payload).ok()?;
    Some(CanFrame { id, data })
}

fn write_line(port: &mut dyn SerialPort, line: &str) -> std::io::Result<()> {
    port.write_all(line.as_bytes())?;
    port.write_all(b"\r")?;
    port.flush()
}

/// slcan-speaking serial adapter.
pub struct SlcanBus {
    port: Mutex<Box<dyn SerialPort>>,
    rx_buf: Mutex<Vec<u8>>,
    channel: String,
}

impl SlcanBus {
    /// Open the adapter on `channel` (e.g. `/dev/ttyACM0`) and start the bus.
    #[instrument(level = "info")]
    pub fn open(channel: &str, bitrate: u32) -> Result<Self, BusError> {
        let code = bitrate_code(bitrate).ok_or(BusError::UnsupportedBitrate(bitrate))?;
        let port = serialport::new(channel, SERIAL_BAUD)
            .timeout(SETUP_TIMEOUT)
            .open()
            .map_err(|e| BusError::OpenFailed {
                channel: channel.to_string(),
                message: e.to_string(),
            })?;

        let bus = Self {
            port: Mutex::new(port),
            rx_buf: Mutex::new(Vec::with_capacity(256)),
            channel: channel.to_string(),
        };

        // Close first in case a previous session left the channel open.
        bus.command("C")?;
        bus.command(&format!("S{code}"))?;
        bus.command("O")?;
        bus.drain();

        info!(channel = %channel, bitrate, "slcan bus opened");
        Ok(bus)
    }

    fn lock_port(&self) -> Result<std::sync::MutexGuard<'_, Box<dyn SerialPort>>, BusError> {
        self.port
            .lock()
            .map_err(|_| BusError::WriteFailed("serial port lock poisoned".into()))
    }

    fn command(&self, cmd: &str) -> Result<(), BusError> {
        let mut port = self.lock_port()?;
        write_line(&mut **port, cmd).map_err(|e| BusError::WriteFailed(e.to_string()))?;
        debug!(command = %cmd, "slcan command");
        Ok(())
    }

    /// Discard command replies (`\r` / `\x07`) queued during setup.
    fn drain(&self) {
        let Ok(mut port) = self.port.lock() else {
            return;
        };
        let mut buf = [0u8; 64];
        while matches!(port.read(&mut buf), Ok(n) if n > 0) {}
        if let Ok(mut rx) = self.rx_buf.lock() {
            rx.clear();
        }
    }

    /// Pop one complete line from the receive buffer.
    fn take_line(&self) -> Option<Vec<u8>> {
        let mut rx = self.rx_buf.lock().ok()?;
        let end = rx.iter().position(|&b| b == b'\r' || b == 0x07)?;
        let line: Vec<u8> = rx.drain(..=end).collect();
        Some(line)
    }
}

impl CanBus for SlcanBus {
    fn send(&self, frame: &CanFrame) -> Result<(), BusError> {
        if !frame.is_valid() {
            return Err(BusError::WriteFailed(format!("invalid frame {frame:?}")));
        }
        let line = format_frame(frame);
        trace!(line = %line, "slcan tx");
        let mut port = self.lock_port()?;
        write_line(&mut **port, &line).map_err(|e| BusError::WriteFailed(e.to_string()))
    }

    fn recv(&self, timeout: Duration) -> Result<Option<CanFrame>, BusError> {
        let deadline = Instant::now() + timeout;
        let mut chunk = [0u8; 128];

        loop {
            while let Some(line) = self.take_line() {
                if let Some(frame) = parse_line(&line) {
                    trace!(frame = ?frame, "slcan rx");
                    return Ok(Some(frame));
                }
            }

            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Ok(None);
            }

            let read = {
                let mut port = self.lock_port()?;
                port.set_timeout(remaining)
                    .map_err(|e| BusError::ReadFailed(e.to_string()))?;
                port.read(&mut chunk)
            };
            match read {
                Ok(0) => {}
                Ok(n) => {
                    if let Ok(mut rx) = self.rx_buf.lock() {
                        rx.extend_from_slice(&chunk[..n]);
                    }
                }
                Err(e) if e.kind() == std::io::ErrorKind::TimedOut => return Ok(None),
                Err(e) => return Err(BusError::ReadFailed(e.to_string())),
            }
        }
    }

    fn channel(&self) -> String {
        self.channel.clone()
    }
}

impl Drop for SlcanBus {
    fn drop(&mut self) {
        if let Err(e) = self.command("C") {
            warn!(error = %e, "Failed to close slcan channel");
        } else {
            debug!(channel = %self.channel, "slcan bus closed");
        }
    }
}
