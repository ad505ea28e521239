//! CAN bus abstraction.
//!
//! Defines the `CanBus` trait for raw frame I/O, allowing different
//! implementations (slcan, SocketCAN, mock).

use std::fmt;
use std::time::Duration;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum BusError {
    #[error("Failed to open {channel}: {message}")]
    OpenFailed { channel: String, message: String },

    #[error("Unsupported bitrate: {0} bit/s")]
    UnsupportedBitrate(u32),

    #[error("Unsupported interface: {0}")]
    UnsupportedInterface(String),

    #[error("Write failed: {0}")]
    WriteFailed(String),

    #[error("Read failed: {0}")]
    ReadFailed(String),

    #[error("Bus disconnected")]
    Disconnected,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Classic CAN frame with an 11-bit identifier.
#[derive(Clone, PartialEq, Eq)]
pub struct CanFrame {
    pub id: u32,
    pub data: Vec<u8>,
}

impl CanFrame {
    pub const MAX_ID: u32 = 0x7FF;
    pub const MAX_LEN: usize = 8;

    pub fn new(id: u32, data: &[u8]) -> Self {
        Self {
            id,
            data: data.to_vec(),
        }
    }

    /// Whether the frame fits on a classic CAN bus with standard ids.
    pub fn is_valid(&self) -> bool {
        self.id <= Self::MAX_ID && self.data.len() <= Self::MAX_LEN
    }
}

impl fmt::Debug for CanFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CanFrame(0x{:03X} [", self.id)?;
        for (i, b) in self.data.iter().enumerate() {
            if i > 0 {
                f.write_str(" ")?;
            }
            write!(f, "{b:02X}")?;
        }
        f.write_str("])")
    }
}

/// Abstract CAN bus interface.
///
/// This trait enables:
/// - Serial-line adapters speaking slcan
/// - Kernel CAN interfaces through SocketCAN
/// - An in-memory bus for unit testing
pub trait CanBus: Send {
    /// Transmit one frame.
    fn send(&self, frame: &CanFrame) -> Result<(), BusError>;

    /// Receive one frame, waiting at most `timeout`.
    ///
    /// `Ok(None)` means no frame arrived in time.
    fn recv(&self, timeout: Duration) -> Result<Option<CanFrame>, BusError>;

    /// Human-readable channel name for logs.
    fn channel(&self) -> String;
}

impl CanBus for Box<dyn CanBus> {
    fn send(&self, frame: &CanFrame) -> Result<(), BusError> {
        (**self).send(frame)
    }

    fn recv(&self, timeout: Duration) -> Result<Option<CanFrame>, BusError> {
        (**self).recv(timeout)
    }

    fn channel(&self) -> String {
        (**self).channel()
    }
}
