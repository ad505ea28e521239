//! Transport layer module.

pub mod framed;
pub mod mock;
pub mod slcan;
#[cfg(target_os = "linux")]
pub mod socketcan;
pub mod traits;

pub use framed::{Ack, Transport};
pub use mock::{MockBus, Responder};
pub use slcan::SlcanBus;
#[cfg(target_os = "linux")]
pub use socketcan::SocketCanBus;
pub use traits::{BusError, CanBus, CanFrame};

use crate::config::{BusConfig, Interface};

/// Open the adapter selected by `config`.
pub fn open_bus(config: &BusConfig) -> Result<Box<dyn CanBus>, BusError> {
    match config.interface {
        Interface::Slcan => Ok(Box::new(SlcanBus::open(&config.channel, config.bitrate)?)),
        #[cfg(target_os = "linux")]
        Interface::Socketcan => Ok(Box::new(SocketCanBus::open(
            &config.channel,
            config.bitrate,
        )?)),
        #[cfg(not(target_os = "linux"))]
        Interface::Socketcan => Err(BusError::UnsupportedInterface(config.interface.to_string())),
    }
}
