//! Message codec - schema-driven encode/decode of bootloader frames.
//!
//! The codec never retries and never touches the bus; it only turns signal
//! maps into payloads and back, checking ranges and enumerations on the way.

pub mod schema;
pub mod value;

use byteorder::{ByteOrder as _, LittleEndian};
use thiserror::Error;

pub use schema::{APPLICATION_FRAMES, BOOTLOADER_FRAMES, ByteOrder, FrameDef, Mux, SignalDef, SignalKind};
pub use value::{DecodedFrame, SignalMap, SignalValue};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CodecError {
    #[error("Unknown frame: {0}")]
    UnknownFrame(String),

    #[error("Unknown frame id: 0x{0:03X}")]
    UnknownFrameId(u32),

    #[error("Frame {frame} has no signal {signal}")]
    UnknownSignal { frame: &'static str, signal: String },

    #[error("Frame {frame} requires signal {signal}")]
    MissingSignal {
        frame: &'static str,
        signal: &'static str,
    },

    #[error("Signal {signal} value {value} outside [{min}, {max}]")]
    OutOfRange {
        signal: &'static str,
        value: i128,
        min: i128,
        max: i128,
    },

    #[error("Signal {signal} has no choice {value}")]
    NotInEnum { signal: &'static str, value: String },

    #[error("Signal {signal} cannot take value {value}")]
    WrongValueKind { signal: &'static str, value: String },

    #[error("Frame {frame} needs {expected} bytes, got {actual}")]
    PayloadLength {
        frame: &'static str,
        expected: usize,
        actual: usize,
    },
}

/// Codec over a fixed set of frame tables.
#[derive(Debug, Clone)]
pub struct Codec {
    frames: Vec<&'static FrameDef>,
}

impl Codec {
    pub fn new(tables: &[&'static [FrameDef]]) -> Self {
        Self {
            frames: tables.iter().flat_map(|t| t.iter()).collect(),
        }
    }

    /// Bootloader frames plus the application state frame.
    pub fn bootloader() -> Self {
        Self::new(&[BOOTLOADER_FRAMES, APPLICATION_FRAMES])
    }

    pub fn frame(&self, name: &str) -> Result<&'static FrameDef, CodecError> {
        self.frames
            .iter()
            .copied()
            .find(|f| f.name == name)
            .ok_or_else(|| CodecError::UnknownFrame(name.to_string()))
    }

    pub fn frame_by_id(&self, id: u32) -> Result<&'static FrameDef, CodecError> {
        self.frames
            .iter()
            .copied()
            .find(|f| f.id == id)
            .ok_or(CodecError::UnknownFrameId(id))
    }

    pub fn frame_id_of(&self, name: &str) -> Result<u32, CodecError> {
        self.frame(name).map(|f| f.id)
    }

    /// Build the payload of `frame_name` from `signals`.
    ///
    /// Multiplexed frames take the selector as a regular entry of the map.
    pub fn encode(&self, frame_name: &str, signals: &SignalMap) -> Result<Vec<u8>, CodecError> {
        let frame = self.frame(frame_name)?;

        for name in signals.keys() {
            if frame.signal(name).is_none() {
                return Err(CodecError::UnknownSignal {
                    frame: frame.name,
                    signal: name.to_string(),
                });
            }
        }

        let selected = match frame.selector() {
            Some(selector) => {
                let value = signals
                    .get(selector.name)
                    .ok_or(CodecError::MissingSignal {
                        frame: frame.name,
                        signal: selector.name,
                    })?;
                Some(to_raw(selector, value)?)
            }
            None => None,
        };

        let mut word = 0u64;
        for def in frame.signals {
            if let Mux::Branch(branch) = def.mux {
                if Some(branch) != selected {
                    if signals.contains_key(def.name) {
                        return Err(CodecError::UnknownSignal {
                            frame: frame.name,
                            signal: def.name.to_string(),
                        });
                    }
                    continue;
                }
            }
            let value = signals.get(def.name).ok_or(CodecError::MissingSignal {
                frame: frame.name,
                signal: def.name,
            })?;
            word = insert_bits(word, def, to_raw(def, value)?);
        }

        let mut buf = [0u8; 8];
        LittleEndian::write_u64(&mut buf, word);
        Ok(buf[..frame.len].to_vec())
    }

    /// Decode a received payload. The multiplexer, if any, is returned in
    /// [`DecodedFrame::mux`] and not among the signals.
    pub fn decode(&self, id: u32, data: &[u8]) -> Result<DecodedFrame, CodecError> {
        let frame = self.frame_by_id(id)?;
        if data.len() < frame.len {
            return Err(CodecError::PayloadLength {
                frame: frame.name,
                expected: frame.len,
                actual: data.len(),
            });
        }

        let mut buf = [0u8; 8];
        let n = frame.len.min(8);
        buf[..n].copy_from_slice(&data[..n]);
        let word = LittleEndian::read_u64(&buf);

        let (selected, mux) = match frame.selector() {
            Some(selector) => {
                let raw = extract_bits(word, selector);
                let symbol = selector.symbol_of(raw).ok_or(CodecError::NotInEnum {
                    signal: selector.name,
                    value: raw.to_string(),
                })?;
                (Some(raw), Some(symbol))
            }
            None => (None, None),
        };

        let mut signals = SignalMap::new();
        for def in frame.signals {
            match def.mux {
                Mux::Selector => continue,
                Mux::Branch(branch) if Some(branch) != selected => continue,
                _ => {}
            }
            let raw = extract_bits(word, def);
            let value = match def.kind {
                SignalKind::Unsigned => SignalValue::Unsigned(raw),
                SignalKind::Signed => SignalValue::Signed(sign_extend(raw, def.length)),
                SignalKind::Enumerated(_) => {
                    SignalValue::Symbol(def.symbol_of(raw).ok_or(CodecError::NotInEnum {
                        signal: def.name,
                        value: raw.to_string(),
                    })?)
                }
            };
            signals.insert(def.name, value);
        }

        Ok(DecodedFrame {
            name: frame.name,
            id: frame.id,
            mux,
            signals,
        })
    }
}

impl Default for Codec {
    fn default() -> Self {
        Self::bootloader()
    }
}

fn mask(length: u32) -> u64 {
    if length >= 64 {
        u64::MAX
    } else {
        (1u64 << length) - 1
    }
}

/// Shift that moves the signal's lowest bit to bit 0 of the little-endian word.
fn shift_of(def: &SignalDef) -> u32 {
    match def.byte_order {
        ByteOrder::Little => def.start,
        ByteOrder::Big => 64 - def.start - def.length,
    }
}

// Big-endian signals are placed in the byte-swapped word so that both byte
// orders share one shift/mask path.
fn extract_bits(word: u64, def: &SignalDef) -> u64 {
    let word = match def.byte_order {
        ByteOrder::Little => word,
        ByteOrder::Big => word.swap_bytes(),
    };
    (word >> shift_of(def)) & mask(def.length)
}

fn insert_bits(word: u64, def: &SignalDef, raw: u64) -> u64 {
    let shift = shift_of(def);
    let field = mask(def.length) << shift;
    match def.byte_order {
        ByteOrder::Little => (word & !field) | ((raw << shift) & field),
        ByteOrder::Big => {
            let swapped = word.swap_bytes();
            ((swapped & !field) | ((raw << shift) & field)).swap_bytes()
        }
    }
}

fn sign_extend(raw: u64, length: u32) -> i64 {
    if length >= 64 {
        return raw as i64;
    }
    let unused = 64 - length;
    ((raw << unused) as i64) >> unused
}

fn to_raw(def: &SignalDef, value: &SignalValue) -> Result<u64, CodecError> {
    match def.kind {
        SignalKind::Enumerated(choices) => match *value {
            SignalValue::Symbol(symbol) => def.raw_of(symbol).ok_or(CodecError::NotInEnum {
                signal: def.name,
                value: symbol.to_string(),
            }),
            SignalValue::Unsigned(raw) if choices.iter().any(|(v, _)| *v == raw) => Ok(raw),
            other => Err(CodecError::NotInEnum {
                signal: def.name,
                value: other.to_string(),
            }),
        },
        SignalKind::Unsigned | SignalKind::Signed => {
            let n = value.as_i128().ok_or_else(|| CodecError::WrongValueKind {
                signal: def.name,
                value: value.to_string(),
            })?;
            if n < def.min || n > def.max {
                return Err(CodecError::OutOfRange {
                    signal: def.name,
                    value: n,
                    min: def.min,
                    max: def.max,
                });
            }
            Ok((n as u64) & mask(def.length))
        }
    }
}
