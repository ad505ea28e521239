//! In-memory CAN bus for testing.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use super::traits::{BusError, CanBus, CanFrame};

/// Scripted peer attached to a [`MockBus`].
pub trait Responder: Send {
    /// Frames the peer answers with after the host sent `frame`.
    fn on_frame(&mut self, frame: &CanFrame) -> Vec<CanFrame>;

    /// Frame the peer emits on its own while the host is listening.
    fn on_idle(&mut self) -> Option<CanFrame> {
        None
    }
}

/// Mock bus for unit testing the transport, session and orchestrator.
///
/// Clones share the same queues, so a test can keep a handle while the
/// transport owns another.
#[derive(Clone)]
pub struct MockBus {
    /// Queued frames to return on receive.
    rx_queue: Arc<Mutex<VecDeque<CanFrame>>>,
    /// Captured transmissions.
    tx_log: Arc<Mutex<Vec<CanFrame>>>,
    responder: Arc<Mutex<Option<Box<dyn Responder>>>>,
    connected: Arc<Mutex<bool>>,
}

impl MockBus {
    pub fn new() -> Self {
        Self {
            rx_queue: Arc::new(Mutex::new(VecDeque::new())),
            tx_log: Arc::new(Mutex::new(Vec::new())),
            responder: Arc::new(Mutex::new(None)),
            connected: Arc::new(Mutex::new(true)),
        }
    }

    /// Attach a peer that reacts to transmitted frames.
    pub fn with_responder(responder: impl Responder + 'static) -> Self {
        let bus = Self::new();
        *bus.responder.lock().unwrap() = Some(Box::new(responder));
        bus
    }

    /// Queue a frame to be returned on a later receive.
    pub fn queue_frame(&self, frame: CanFrame) {
        self.rx_queue.lock().unwrap().push_back(frame);
    }

    /// Get all captured transmissions.
    pub fn sent_frames(&self) -> Vec<CanFrame> {
        self.tx_log.lock().unwrap().clone()
    }

    /// Clear captured transmissions.
    pub fn clear_sent(&self) {
        self.tx_log.lock().unwrap().clear();
    }

    /// Simulate adapter loss.
    pub fn disconnect(&self) {
        *self.connected.lock().unwrap() = false;
    }

    pub fn reconnect(&self) {
        *self.connected.lock().unwrap() = true;
    }
}

impl Default for MockBus {
    fn default() -> Self {
        Self::new()
    }
}

impl CanBus for MockBus {
    fn send(&self, frame: &CanFrame) -> Result<(), BusError> {
        if !*self.connected.lock().unwrap() {
            return Err(BusError::Disconnected);
        }
        self.tx_log.lock().unwrap().push(frame.clone());
        if let Some(responder) = self.responder.lock().unwrap().as_mut() {
            let replies = responder.on_frame(frame);
            self.rx_queue.lock().unwrap().extend(replies);
        }
        Ok(())
    }

    fn recv(&self, timeout: Duration) -> Result<Option<CanFrame>, BusError> {
        if !*self.connected.lock().unwrap() {
            return Err(BusError::Disconnected);
        }
        if let Some(frame) = self.rx_queue.lock().unwrap().pop_front() {
            return Ok(Some(frame));
        }
        if let Some(frame) = self
            .responder
            .lock()
            .unwrap()
            .as_mut()
            .and_then(|r| r.on_idle())
        {
            return Ok(Some(frame));
        }
        // Nothing on the bus: let a little time pass instead of spinning.
        thread::sleep(timeout.min(Duration::from_millis(1)));
        Ok(None)
    }

    fn channel(&self) -> String {
        "mock".to_string()
    }
}
