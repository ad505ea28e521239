//! Protocol module - bootloader protocol definitions.

pub mod constants;
pub mod symbols;

pub use constants::*;
pub use symbols::{
    AckMessage, AcknowledgeFlag, BmsState, BootFsmState, CanFsmState, RequestCode, StatusCode,
    VersionInfoMux, YesNoAnswer,
};
