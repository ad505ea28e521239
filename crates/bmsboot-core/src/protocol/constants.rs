//! Protocol constants shared by the codec, the session and the orchestrator.

/// Size of one data word in bytes.
pub const WORD_SIZE: usize = 8;

/// Number of data words acknowledged together by the target.
pub const WORDS_PER_SUBSECTOR: u32 = 1024;

/// The vector table occupies the first 32 bytes of the image.
pub const VECTOR_TABLE_BYTES: usize = 32;
pub const VECTOR_TABLE_WORDS: usize = VECTOR_TABLE_BYTES / WORD_SIZE;

/// Flash attempts after the first one before a flash is given up.
pub const RETRY_LIMIT: u32 = 2;

/// Attempts per sub-sector before the whole sector is considered failed.
pub const SUBSECTOR_RETRIES: u32 = 3;

/// Share of the progress bar covered by data transfer; the rest belongs
/// to vector table validation.
pub const DATA_PROGRESS_SHARE: u32 = 99;

// Outbound frame identifiers
pub const ID_ACTION_REQUEST: u32 = 0x200;
pub const ID_TRANSFER_PROCESS_INFO: u32 = 0x201;
pub const ID_LOOP_INFO: u32 = 0x202;
pub const ID_DATA_8_BYTES: u32 = 0x203;
pub const ID_CRC_8_BYTES: u32 = 0x204;

// Inbound frame identifiers
pub const ID_APPLICATION_STATE: u32 = 0x220;
pub const ID_ACKNOWLEDGE_MESSAGE: u32 = 0x480;
pub const ID_BOOTLOADER_FSM_STATES: u32 = 0x481;
pub const ID_DATA_TRANSFER_INFO: u32 = 0x482;
pub const ID_BOOTLOADER_VERSION_INFO: u32 = 0x483;

/// Artifact file names produced by the build.
pub const APP_BINARY_FILE: &str = "foxbms.bin";
pub const APP_CRC_TABLE_FILE: &str = "foxbms.crc64.csv";
pub const APP_MANIFEST_FILE: &str = "foxbms.crc64.json";

/// One flash sector of the target MCU.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Sector {
    pub id: u8,
    pub size_bytes: u32,
}

impl Sector {
    pub const fn new(id: u8, size_bytes: u32) -> Self {
        Self { id, size_bytes }
    }

    /// Sector size in data words.
    pub const fn size_words(&self) -> u32 {
        self.size_bytes / WORD_SIZE as u32
    }
}

/// Application flash of the target, starting right behind the bootloader.
pub const TARGET_SECTORS: &[Sector] = &[
    Sector::new(7, 0x20000),
    Sector::new(8, 0x20000),
    Sector::new(9, 0x20000),
    Sector::new(10, 0x40000),
    Sector::new(11, 0x40000),
    Sector::new(12, 0x40000),
    Sector::new(13, 0x40000),
    Sector::new(14, 0x40000),
    Sector::new(15, 0x40000),
];
