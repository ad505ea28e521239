//! Host-side view of the target: observed status and the flash layout.

pub mod layout;
pub mod status;

pub use layout::{SectorMap, subsector_end};
pub use status::{BootloaderStatus, TargetCheck, Version};
