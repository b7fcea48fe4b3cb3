//! Event pump
//!
//! Waits on an [`InputSource`], feeds the bytes through a [`KeyDecoder`]
//! and hands out one [`Event`] per call. The pump owns the ESC idle
//! window: a lone ESC (or any stalled prefix) that sees no new byte for
//! `esc_timeout` is resolved with [`KeyDecoder::flush_timeout`].

use std::sync::mpsc;
use std::time::{Duration, Instant};

use tracing::trace;

use super::decoder::KeyDecoder;
use super::key::Event;
use crate::core::input::{CancelHandle, InputSource, Readiness};
use crate::core::session::Result;

/// Default ESC idle window.
pub const DEFAULT_ESC_TIMEOUT: Duration = Duration::from_millis(35);

#[derive(Debug, Clone)]
pub struct PumpConfig {
    /// How long a partial escape sequence may wait for its next byte
    pub esc_timeout: Duration,
    /// Bytes read from the terminal per wake-up
    pub read_buffer: usize,
}

impl Default for PumpConfig {
    fn default() -> Self {
        Self {
            esc_timeout: DEFAULT_ESC_TIMEOUT,
            read_buffer: 1024,
        }
    }
}

/// Receives events from [`EventPump::pump_into`].
pub trait EventSink {
    fn deliver(&mut self, event: Event);
}

impl<F: FnMut(Event)> EventSink for F {
    fn deliver(&mut self, event: Event) {
        self(event)
    }
}

impl EventSink for Vec<Event> {
    fn deliver(&mut self, event: Event) {
        self.push(event);
    }
}

impl EventSink for mpsc::Sender<Event> {
    fn deliver(&mut self, event: Event) {
        // A dropped receiver only means nobody is listening any more
        let _ = self.send(event);
    }
}

pub struct EventPump<S: InputSource> {
    source: S,
    decoder: KeyDecoder,
    config: PumpConfig,
    buf: Vec<u8>,
    last_byte: Option<Instant>,
    cancel: CancelHandle,
}

impl<S: InputSource> EventPump<S> {
    pub fn new(source: S, config: PumpConfig) -> Self {
        let cancel = source.cancel_handle();
        let buf = vec![0u8; config.read_buffer.max(1)];
        Self {
            source,
            decoder: KeyDecoder::new(),
            config,
            buf,
            last_byte: None,
            cancel,
        }
    }

    /// Handle that makes blocked and future polls return `None`.
    pub fn cancel_handle(&self) -> CancelHandle {
        self.cancel.clone()
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub fn config(&self) -> &PumpConfig {
        &self.config
    }

    /// Wait up to `timeout` for the next event. `None` waits forever.
    ///
    /// Returns `Ok(None)` on timeout or cancellation. Cancellation wins
    /// over events already decoded; they stay buffered and are delivered
    /// after [`CancelHandle::reset`]. Bytes of an unfinished sequence stay
    /// buffered across calls.
    pub fn poll(&mut self, timeout: Option<Duration>) -> Result<Option<Event>> {
        let deadline = timeout.map(|t| Instant::now() + t);
        let mut waited = false;

        loop {
            if self.cancel.is_cancelled() {
                return Ok(None);
            }
            if let Some(key) = self.decoder.next() {
                return Ok(Some(key.into()));
            }

            let now = Instant::now();
            let mut wait = deadline.map(|d| d.saturating_duration_since(now));

            if !self.decoder.is_empty() {
                let esc_deadline = self.last_byte.unwrap_or(now) + self.config.esc_timeout;
                if now >= esc_deadline {
                    if let Some(key) = self.decoder.flush_timeout() {
                        trace!("ESC window expired: {}", key);
                        return Ok(Some(key.into()));
                    }
                    continue;
                }
                let esc_left = esc_deadline - now;
                wait = Some(wait.map_or(esc_left, |w| w.min(esc_left)));
            }

            if waited && deadline.map_or(false, |d| now >= d) {
                return Ok(None);
            }

            waited = true;
            match self.source.wait(wait)? {
                Readiness::Data => {
                    let n = self.source.read(&mut self.buf)?;
                    if n > 0 {
                        trace!(bytes = n, "input");
                        self.decoder.feed(&self.buf[..n]);
                        self.last_byte = Some(Instant::now());
                    }
                }
                Readiness::Timeout => {}
                Readiness::Cancelled => return Ok(None),
            }
        }
    }

    /// Poll once and hand the event, if any, to `sink`.
    pub fn pump_into<K: EventSink + ?Sized>(
        &mut self,
        timeout: Option<Duration>,
        sink: &mut K,
    ) -> Result<bool> {
        match self.poll(timeout)? {
            Some(event) => {
                sink.deliver(event);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    pub fn into_source(self) -> S {
        self.source
    }
}
