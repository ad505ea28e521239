//! Framed transport: schema-aware send and predicate-based waiting.

use std::thread;
use std::time::{Duration, Instant};

use tracing::{debug, info, trace, warn};

use super::traits::{BusError, CanBus, CanFrame};
use crate::codec::{Codec, CodecError, DecodedFrame, SignalMap, SignalValue};
use crate::config::BusConfig;
use crate::protocol::{AckMessage, AcknowledgeFlag, ID_ACKNOWLEDGE_MESSAGE, StatusCode, YesNoAnswer};

/// Decoded `AcknowledgeMessage` frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ack {
    pub message: AckMessage,
    pub status: StatusCode,
    pub answer: YesNoAnswer,
}

impl Ack {
    pub fn is_yes(&self) -> bool {
        self.answer == YesNoAnswer::Yes
    }

    fn from_frame(frame: &DecodedFrame) -> Option<Self> {
        Some(Self {
            message: AckMessage::from_symbol(frame.symbol("AcknowledgeMessage")?)?,
            status: StatusCode::from_symbol(frame.symbol("StatusCode")?)?,
            answer: YesNoAnswer::from_symbol(frame.symbol("YesNoAnswer")?)?,
        })
    }
}

/// Sole owner of the bus for the duration of an operation.
///
/// The bus is released when the transport is dropped or closed.
pub struct Transport<B: CanBus> {
    bus: B,
    codec: Codec,
}

impl Transport<Box<dyn CanBus>> {
    /// Open the bus described by `config`.
    pub fn open(config: &BusConfig) -> Result<Self, BusError> {
        Ok(Self::new(super::open_bus(config)?))
    }
}

impl<B: CanBus> Transport<B> {
    pub fn new(bus: B) -> Self {
        Self::with_codec(bus, Codec::bootloader())
    }

    pub fn with_codec(bus: B, codec: Codec) -> Self {
        Self { bus, codec }
    }

    pub fn codec(&self) -> &Codec {
        &self.codec
    }

    pub fn bus(&self) -> &B {
        &self.bus
    }

    /// Encode and transmit a frame.
    ///
    /// Bus errors are logged and swallowed; the missing acknowledgement
    /// surfaces them. Encoding errors are returned.
    pub fn send_frame(&self, name: &str, signals: &SignalMap) -> Result<(), CodecError> {
        let id = self.codec.frame_id_of(name)?;
        let payload = self.codec.encode(name, signals)?;
        let frame = CanFrame::new(id, &payload);
        trace!(frame = %name, raw = ?frame, "tx");
        if let Err(e) = self.bus.send(&frame) {
            warn!(frame = %name, error = %e, "Send failed");
        }
        Ok(())
    }

    /// Read frames until one qualifies or `overall_timeout` elapses.
    ///
    /// A frame qualifies when its id is `frame_id`, its multiplexer equals
    /// `mux` (if given) and every `(signal, value)` of `filter` matches.
    pub fn wait_for(
        &self,
        frame_id: u32,
        mux: Option<&str>,
        filter: &[(&str, SignalValue)],
        overall_timeout: Duration,
        recv_timeout: Duration,
    ) -> Option<DecodedFrame> {
        let deadline = Instant::now() + overall_timeout;

        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return None;
            }

            let frame = match self.bus.recv(recv_timeout.min(remaining)) {
                Ok(Some(frame)) => frame,
                Ok(None) => continue,
                Err(e) => {
                    debug!(error = %e, "Receive failed, polling on");
                    thread::sleep(recv_timeout.min(remaining));
                    continue;
                }
            };

            if frame.id != frame_id {
                trace!(raw = ?frame, "Dropping unrelated frame");
                continue;
            }

            let decoded = match self.codec.decode(frame.id, &frame.data) {
                Ok(decoded) => decoded,
                Err(e) => {
                    debug!(raw = ?frame, error = %e, "Dropping undecodable frame");
                    continue;
                }
            };

            if mux.is_some() && decoded.mux != mux {
                continue;
            }
            if filter
                .iter()
                .all(|(name, value)| decoded.get(name) == Some(value))
            {
                trace!(frame = %decoded.name, signals = ?decoded.signals, "rx");
                return Some(decoded);
            }
            trace!(frame = %decoded.name, signals = ?decoded.signals, "Dropping non-matching frame");
        }
    }

    /// Wait for `AcknowledgeMessage` acknowledging `expected` with `required_status`.
    pub fn wait_ack(
        &self,
        expected: AckMessage,
        required_status: StatusCode,
        overall_timeout: Duration,
        per_recv_timeout: Duration,
    ) -> Option<Ack> {
        let filter = [
            (
                "AcknowledgeFlag",
                SignalValue::Symbol(AcknowledgeFlag::Received.symbol()),
            ),
            ("AcknowledgeMessage", SignalValue::Symbol(expected.symbol())),
            ("StatusCode", SignalValue::Symbol(required_status.symbol())),
        ];
        let frame = self.wait_for(
            ID_ACKNOWLEDGE_MESSAGE,
            None,
            &filter,
            overall_timeout,
            per_recv_timeout,
        )?;
        Ack::from_frame(&frame)
    }

    /// Release the bus.
    pub fn close(self) {
        info!(channel = %self.bus.channel(), "Closing bus");
    }
}

impl<B: CanBus> Drop for Transport<B> {
    fn drop(&mut self) {
        debug!(channel = %self.bus.channel(), "Bus released");
    }
}
