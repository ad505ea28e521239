//! SocketCAN transport for kernel CAN interfaces (Linux only).

use std::io::ErrorKind;
use std::time::Duration;

use socketcan::{CanFrame as SocketFrame, CanSocket, EmbeddedFrame, Id, Socket, StandardId};
use tracing::{info, instrument};

use super::traits::{BusError, CanBus, CanFrame};

/// A zero read timeout would block forever on a socket.
const MIN_READ_TIMEOUT: Duration = Duration::from_millis(1);

pub struct SocketCanBus {
    socket: CanSocket,
    channel: String,
}

impl SocketCanBus {
    /// Open a kernel interface such as `can0`. The bitrate is configured by
    /// the operating system and only recorded here.
    #[instrument(level = "info")]
    pub fn open(channel: &str, bitrate: u32) -> Result<Self, BusError> {
        let socket = CanSocket::open(channel).map_err(|e| BusError::OpenFailed {
            channel: channel.to_string(),
            message: e.to_string(),
        })?;
        info!(channel = %channel, bitrate, "SocketCAN interface opened");
        Ok(Self {
            socket,
            channel: channel.to_string(),
        })
    }
}

impl CanBus for SocketCanBus {
    fn send(&self, frame: &CanFrame) -> Result<(), BusError> {
        let id = u16::try_from(frame.id)
            .ok()
            .and_then(StandardId::new)
            .ok_or_else(|| BusError::WriteFailed(format!("invalid id 0x{:X}", frame.id)))?;
        let out = SocketFrame::new(id, &frame.data)
            .ok_or_else(|| BusError::WriteFailed(format!("invalid payload {frame:?}")))?;
        self.socket
            .write_frame(&out)
            .map_err(|e| BusError::WriteFailed(e.to_string()))
    }

    fn recv(&self, timeout: Duration) -> Result<Option<CanFrame>, BusError> {
        self.socket.set_read_timeout(timeout.max(MIN_READ_TIMEOUT))?;
        match self.socket.read_frame() {
            Ok(frame) if frame.is_remote_frame() => Ok(None),
            Ok(frame) => match frame.id() {
                Id::Standard(id) => Ok(Some(CanFrame::new(id.as_raw() as u32, frame.data()))),
                Id::Extended(_) => Ok(None),
            },
            Err(e) if matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) => Ok(None),
            Err(e) => Err(BusError::ReadFailed(e.to_string())),
        }
    }

    fn channel(&self) -> String {
        self.channel.clone()
    }
}
