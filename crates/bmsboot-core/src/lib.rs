//! bmsboot-core: host side of the foxBMS CAN bootloader protocol.
//!
//! This crate flashes a battery-management controller that runs the
//! embedded CAN bootloader, and starts the flashed application.
//!
//! # Architecture
//!
//! The crate is organized into layers:
//!
//! - **Codec**: Declarative frame schema, signal encode/decode
//! - **Transport**: CAN bus abstraction (slcan, SocketCAN, mock) and predicate waiting
//! - **Session**: One typed method per protocol exchange
//! - **Payload**: Validated binary, CRC table and manifest
//! - **Orchestrator**: Check, reset, flash and launch with retries and progress
//! - **Commands**: Top-level operations returning exit codes
//!
//! # Example
//!
//! ```no_run
//! use bmsboot_core::commands::load_app;
//! use bmsboot_core::config::ToolConfig;
//! use bmsboot_core::events::TracingProgress;
//!
//! let config = ToolConfig {
//!     artifacts_dir: Some("build/app_embedded/src/app/main".into()),
//!     ..Default::default()
//! };
//!
//! let code = load_app(&config, None, TracingProgress::default());
//! std::process::exit(code);
//! ```

pub mod codec;
pub mod commands;
pub mod config;
pub mod error;
pub mod events;
pub mod orchestrator;
pub mod payload;
pub mod protocol;
pub mod session;
pub mod state;
pub mod transport;

#[cfg(test)]
mod sim;

// Re-exports for convenience
pub use codec::{Codec, CodecError, DecodedFrame, SignalMap, SignalValue};
pub use config::{BusConfig, Interface, Timings, ToolConfig};
pub use error::{ExitClass, FlashError};
pub use events::{NullProgress, ProgressSink, TracingProgress};
pub use orchestrator::Orchestrator;
pub use payload::{ArtifactError, BinarySource};
pub use session::{CrcAck, ProtocolError, Session};
pub use state::{BootloaderStatus, SectorMap, TargetCheck, Version};
pub use transport::{Ack, BusError, CanBus, CanFrame, MockBus, Transport, open_bus};
