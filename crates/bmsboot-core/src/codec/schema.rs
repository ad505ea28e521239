//! Declarative description of the bootloader CAN frames.

use crate::protocol::constants::*;
use crate::protocol::symbols::*;

/// Bit numbering of a signal inside the payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ByteOrder {
    /// `start` counts from the least significant bit of the little-endian payload.
    Little,
    /// `start` counts from the most significant bit of the big-endian payload.
    Big,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalKind {
    Unsigned,
    Signed,
    Enumerated(&'static [(u64, &'static str)]),
}

/// Position of a signal relative to the frame multiplexer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mux {
    /// Present in every frame.
    None,
    /// This signal selects the branch.
    Selector,
    /// Present only when the selector carries this raw value.
    Branch(u64),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SignalDef {
    pub name: &'static str,
    pub start: u32,
    pub length: u32,
    pub byte_order: ByteOrder,
    pub kind: SignalKind,
    pub min: i128,
    pub max: i128,
    pub mux: Mux,
}

impl SignalDef {
    /// Little-endian unsigned signal spanning its full raw range.
    pub const fn unsigned(name: &'static str, start: u32, length: u32) -> Self {
        Self {
            name,
            start,
            length,
            byte_order: ByteOrder::Little,
            kind: SignalKind::Unsigned,
            min: 0,
            max: (1i128 << length) - 1,
            mux: Mux::None,
        }
    }

    pub const fn signed(name: &'static str, start: u32, length: u32) -> Self {
        Self {
            name,
            start,
            length,
            byte_order: ByteOrder::Little,
            kind: SignalKind::Signed,
            min: -(1i128 << (length - 1)),
            max: (1i128 << (length - 1)) - 1,
            mux: Mux::None,
        }
    }

    pub const fn enumerated(
        name: &'static str,
        start: u32,
        length: u32,
        choices: &'static [(u64, &'static str)],
    ) -> Self {
        Self {
            kind: SignalKind::Enumerated(choices),
            ..Self::unsigned(name, start, length)
        }
    }

    pub const fn range(self, min: i128, max: i128) -> Self {
        Self { min, max, ..self }
    }

    pub const fn big_endian(self) -> Self {
        Self {
            byte_order: ByteOrder::Big,
            ..self
        }
    }

    pub const fn selector(self) -> Self {
        Self {
            mux: Mux::Selector,
            ..self
        }
    }

    pub const fn branch(self, selector: u64) -> Self {
        Self {
            mux: Mux::Branch(selector),
            ..self
        }
    }

    pub(crate) fn symbol_of(&self, raw: u64) -> Option<&'static str> {
        match self.kind {
            SignalKind::Enumerated(choices) => choices
                .iter()
                .find(|(value, _)| *value == raw)
                .map(|(_, symbol)| *symbol),
            _ => None,
        }
    }

    pub(crate) fn raw_of(&self, symbol: &str) -> Option<u64> {
        match self.kind {
            SignalKind::Enumerated(choices) => choices
                .iter()
                .find(|(_, name)| *name == symbol)
                .map(|(value, _)| *value),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameDef {
    pub name: &'static str,
    pub id: u32,
    pub len: usize,
    pub signals: &'static [SignalDef],
}

impl FrameDef {
    pub fn signal(&self, name: &str) -> Option<&SignalDef> {
        self.signals.iter().find(|s| s.name == name)
    }

    pub fn selector(&self) -> Option<&SignalDef> {
        self.signals.iter().find(|s| s.mux == Mux::Selector)
    }
}

/// Frames spoken by the embedded bootloader.
pub static BOOTLOADER_FRAMES: &[FrameDef] = &[
    FrameDef {
        name: "ActionRequest",
        id: ID_ACTION_REQUEST,
        len: 1,
        signals: &[SignalDef::enumerated("RequestCode", 0, 8, RequestCode::CHOICES)],
    },
    FrameDef {
        name: "TransferProcessInfo",
        id: ID_TRANSFER_PROCESS_INFO,
        len: 8,
        signals: &[
            SignalDef::unsigned("ProgramLength", 0, 32).range(8, u32::MAX as i128),
            SignalDef::unsigned("RequiredTransferLoops", 32, 32).range(1, u32::MAX as i128),
        ],
    },
    FrameDef {
        name: "LoopInfo",
        id: ID_LOOP_INFO,
        len: 4,
        signals: &[SignalDef::unsigned("LoopNumber", 0, 32).range(1, u32::MAX as i128)],
    },
    FrameDef {
        name: "Data8Bytes",
        id: ID_DATA_8_BYTES,
        len: 8,
        signals: &[SignalDef::unsigned("Data", 0, 64)],
    },
    FrameDef {
        name: "Crc8Bytes",
        id: ID_CRC_8_BYTES,
        len: 8,
        signals: &[SignalDef::unsigned("Crc", 0, 64)],
    },
    FrameDef {
        name: "AcknowledgeMessage",
        id: ID_ACKNOWLEDGE_MESSAGE,
        len: 2,
        signals: &[
            SignalDef::enumerated("AcknowledgeFlag", 0, 1, AcknowledgeFlag::CHOICES),
            SignalDef::enumerated("AcknowledgeMessage", 1, 8, AckMessage::CHOICES),
            SignalDef::enumerated("StatusCode", 9, 3, StatusCode::CHOICES),
            SignalDef::enumerated("YesNoAnswer", 12, 1, YesNoAnswer::CHOICES),
        ],
    },
    FrameDef {
        name: "BootloaderFsmStates",
        id: ID_BOOTLOADER_FSM_STATES,
        len: 2,
        signals: &[
            SignalDef::enumerated("CanFsmState", 0, 8, CanFsmState::CHOICES),
            SignalDef::enumerated("BootFsmState", 8, 8, BootFsmState::CHOICES),
        ],
    },
    FrameDef {
        name: "DataTransferInfo",
        id: ID_DATA_TRANSFER_INFO,
        len: 4,
        signals: &[SignalDef::unsigned("CurrentLoopNumber", 0, 32)],
    },
    FrameDef {
        name: "BootloaderVersionInfo",
        id: ID_BOOTLOADER_VERSION_INFO,
        len: 8,
        signals: &[
            SignalDef::enumerated("Mux", 0, 8, VersionInfoMux::CHOICES).selector(),
            SignalDef::unsigned("MajorVersionNumber", 8, 8).branch(0),
            SignalDef::unsigned("MinorVersionNumber", 16, 8).branch(0),
            SignalDef::unsigned("PatchVersionNumber", 24, 8).branch(0),
            SignalDef::unsigned("CommitHash", 8, 56).branch(1),
        ],
    },
];

/// Frames of the running application that the flasher listens for.
pub static APPLICATION_FRAMES: &[FrameDef] = &[FrameDef {
    name: "ApplicationState",
    id: ID_APPLICATION_STATE,
    len: 8,
    signals: &[SignalDef::enumerated("BmsState", 0, 5, BmsState::CHOICES)],
}];
