//! Transport contract and the callback sink handed to it
//!
//! The transport owns the socket. It reports what happened through
//! [`ConnectionEvents`] from whatever thread it runs on; the handler turns
//! those reports into scheduled actions or, for frames, parser calls.

use std::sync::Weak;

use crate::error::TransportError;

use super::Shared;

/// Raw streaming connection, implemented outside this crate.
pub trait Transport: Send + Sync {
    /// Start opening `url`. Returns false if the attempt could not even be
    /// started; otherwise the outcome arrives later through `events`.
    fn connect(&self, url: &str, events: ConnectionEvents) -> bool;

    /// Emit one raw text frame. Called with the parser lock held, so it must
    /// not deliver frames back into [`ConnectionEvents`] from the same call.
    /// Reporting an error or a close from inside `send` is fine; an error is
    /// handed to the parser once its current call returns.
    fn send(&self, text: &str) -> Result<(), TransportError>;

    /// Start a graceful close. Returns false if nothing was open, in which
    /// case no close event will follow.
    fn close(&self) -> bool;
}

/// Callback sink for one connect attempt.
///
/// Events from an attempt that has since been superseded are dropped, so a
/// late close from an old socket cannot disturb the current one.
#[derive(Clone)]
pub struct ConnectionEvents {
    shared: Weak<Shared>,
    generation: u64,
}

impl ConnectionEvents {
    pub(crate) fn new(shared: Weak<Shared>, generation: u64) -> Self {
        Self { shared, generation }
    }

    /// Connect attempt this sink belongs to.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn on_open(&self) {
        if let Some(shared) = self.shared.upgrade() {
            shared.handle_open(self.generation);
        }
    }

    pub fn on_close(&self) {
        if let Some(shared) = self.shared.upgrade() {
            shared.handle_close(self.generation);
        }
    }

    /// Deliver one raw frame to the parser.
    pub fn on_message(&self, raw: &str) {
        if let Some(shared) = self.shared.upgrade() {
            shared.handle_message(self.generation, raw);
        }
    }

    /// Report a fatal transport error.
    pub fn on_error(&self, error: TransportError) {
        if let Some(shared) = self.shared.upgrade() {
            shared.handle_error(self.generation, &error);
        }
    }
}

impl std::fmt::Debug for ConnectionEvents {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionEvents")
            .field("generation", &self.generation)
            .finish()
    }
}
