//! Symbolic values carried by enumerated signals.
//!
//! Each enum doubles as the choice table of its signal in the frame schema,
//! so the orchestrator compares against names rather than wire numbers.

use std::fmt;

macro_rules! symbolic {
    (
        $(#[$meta:meta])*
        pub enum $name:ident {
            $($variant:ident = $raw:literal => $symbol:literal,)+
        }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        pub enum $name {
            $($variant,)+
        }

        impl $name {
            pub const ALL: &'static [Self] = &[$(Self::$variant,)+];

            /// `(raw value, symbol)` pairs used by the frame schema.
            pub const CHOICES: &'static [(u64, &'static str)] = &[$(($raw, $symbol),)+];

            pub const fn symbol(self) -> &'static str {
                match self {
                    $(Self::$variant => $symbol,)+
                }
            }

            pub const fn raw(self) -> u64 {
                match self {
                    $(Self::$variant => $raw,)+
                }
            }

            pub fn from_symbol(symbol: &str) -> Option<Self> {
                match symbol {
                    $($symbol => Some(Self::$variant),)+
                    _ => None,
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.symbol())
            }
        }
    };
}

symbolic! {
    /// Commands carried by `ActionRequest`.
    pub enum RequestCode {
        CmdToTransferProgram = 0 => "CmdToTransferProgram",
        CmdToResetBootProcess = 1 => "CmdToResetBootProcess",
        CmdToRunProgram = 2 => "CmdToRunProgram",
        CmdToGetBootloaderInfo = 3 => "CmdToGetBootloaderInfo",
        CmdToGetDataTransferInfo = 4 => "CmdToGetDataTransferInfo",
        CmdToGetVersionInfo = 5 => "CmdToGetVersionInfo",
    }
}

symbolic! {
    pub enum AcknowledgeFlag {
        NotReceived = 0 => "NotReceived",
        Received = 1 => "Received",
    }
}

symbolic! {
    /// What an acknowledgement refers to.
    pub enum AckMessage {
        ReceivedCmdToTransferProgram = 0 => "ReceivedCmdToTransferProgram",
        ReceivedProgramInfo = 1 => "ReceivedProgramInfo",
        ReceivedSubSectorData = 2 => "ReceivedSubSectorData",
        Received8BytesCrc = 3 => "Received8BytesCrc",
        ReceivedVectorTable = 4 => "ReceivedVectorTable",
        ReceivedCrcOfVectorTable = 5 => "ReceivedCrcOfVectorTable",
        ReceivedCmdToResetBootProcess = 6 => "ReceivedCmdToResetBootProcess",
        ReceivedCmdToRunProgram = 7 => "ReceivedCmdToRunProgram",
    }
}

symbolic! {
    pub enum StatusCode {
        ReceivedButNotProcessed = 0 => "ReceivedButNotProcessed",
        InProcessing = 1 => "InProcessing",
        Processed = 2 => "Processed",
    }
}

symbolic! {
    pub enum YesNoAnswer {
        No = 0 => "No",
        Yes = 1 => "Yes",
    }
}

symbolic! {
    /// State of the CAN protocol machine on the target.
    pub enum CanFsmState {
        NoCommunication = 0 => "NoCommunication",
        WaitForInfo = 1 => "WaitForInfo",
        WaitForDataLoops = 2 => "WaitForDataLoops",
        ReceivedLoopNumber = 3 => "ReceivedLoopNumber",
        Received8BytesData = 4 => "Received8BytesData",
        Received8BytesCrc = 5 => "Received8BytesCrc",
        FinishedFinalValidation = 6 => "FinishedFinalValidation",
        FinishedTransferVectorTable = 7 => "FinishedTransferVectorTable",
        ValidatedVectorTable = 8 => "ValidatedVectorTable",
        Error = 9 => "Error",
        ResetBoot = 10 => "ResetBoot",
        RunProgram = 11 => "RunProgram",
    }
}

symbolic! {
    /// State of the boot process machine on the target.
    pub enum BootFsmState {
        Wait = 0 => "Wait",
        Reset = 1 => "Reset",
        Run = 2 => "Run",
        Load = 3 => "Load",
        Error = 4 => "Error",
    }
}

symbolic! {
    /// Multiplexer of `BootloaderVersionInfo`.
    pub enum VersionInfoMux {
        BootloaderVersionInfo = 0 => "BootloaderVersionInfo",
        CommitHash = 1 => "CommitHash",
    }
}

symbolic! {
    /// Application state reported in frame 0x220.
    pub enum BmsState {
        Uninitialized = 0 => "UNINITIALIZED",
        Initialization = 1 => "INITIALIZATION",
        Initialized = 2 => "INITIALIZED",
        Idle = 3 => "IDLE",
        OpenContactors = 4 => "OPEN_CONTACTORS",
        Standby = 5 => "STANDBY",
        Precharge = 6 => "PRECHARGE",
        Normal = 7 => "NORMAL",
        Charge = 8 => "CHARGE",
        Discharge = 9 => "DISCHARGE",
        Error = 10 => "ERROR",
    }
}
