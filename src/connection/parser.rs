//! Parser contract and the session view parsers work through
//!
//! One parser per exchange translates raw frames into [`Market`] mutations.
//! Frames arrive on the transport's thread; the handler holds the parser's
//! lock for the duration of each call, so a parser never sees two frames at
//! once. Lock order is parser, then subscriptions, then market.

use std::sync::Arc;

use tracing::{debug, warn};

use crate::error::{ParseError, TransportError};
use crate::market::Market;
use crate::subscription::{Subscription, SubscriptionId, SubscriptionRegistry, SubscriptionState};

use super::state::ConnectionState;
use super::Shared;

/// Exchange-specific interpreter of raw frames.
pub trait Parser: Send {
    /// Bind the market that parsed updates are applied to.
    fn set_market(&mut self, market: Arc<Market>);

    /// Build the subscribe frame for `subscription`, tagged with
    /// `request_id`. `None` if this exchange does not offer the channel.
    fn subscribe_command(&self, subscription: &Subscription, request_id: &SubscriptionId) -> Option<String>;

    /// Interpret one frame. A frame that fails to parse must not have
    /// mutated any market.
    fn parse_message(&mut self, raw: &str, session: &Session<'_>) -> Result<(), ParseError>;

    /// Entry point for frames; parse failures stay here.
    fn on_message(&mut self, raw: &str, session: &Session<'_>) {
        if let Err(err) = self.parse_message(raw, session) {
            warn!(error = %err, len = raw.len(), "Failed to parse message");
        }
    }

    /// Transport-level error notification.
    fn on_error(&mut self, error: &TransportError) {
        warn!(error = %error, "Transport error reported to parser");
    }
}

/// What a parser may do with its connection while handling a frame.
pub struct Session<'a> {
    shared: &'a Shared,
}

impl<'a> Session<'a> {
    pub(crate) fn new(shared: &'a Shared) -> Self {
        Self { shared }
    }

    pub fn state(&self) -> ConnectionState {
        self.shared.state()
    }

    /// Send a raw frame on the current connection.
    pub fn send(&self, text: &str) -> Result<(), TransportError> {
        self.shared.send(text)
    }

    /// Run `f` against the subscription registry.
    pub fn subscriptions<R>(&self, f: impl FnOnce(&mut SubscriptionRegistry) -> R) -> R {
        let mut registry = self.shared.lock_registry();
        f(&mut *registry)
    }

    /// Confirmed subscription for exchange id `id`.
    pub fn active_subscription(&self, id: &SubscriptionId) -> Option<Subscription> {
        self.subscriptions(|reg| reg.get_active(id).cloned())
    }

    /// Send the subscribe request for the next inactive subscription the
    /// parser supports. Returns false when nothing was sent.
    pub fn subscribe_next<P: Parser + ?Sized>(&self, parser: &P) -> bool {
        let request_id = SubscriptionId::from(self.shared.next_request_id());
        let pending: Vec<Subscription> = self.subscriptions(|reg| {
            reg.inactive()
                .filter(|s| s.state() == SubscriptionState::Inactive)
                .cloned()
                .collect()
        });

        let Some((subscription, command)) = pending
            .into_iter()
            .find_map(|sub| parser.subscribe_command(&sub, &request_id).map(|cmd| (sub, cmd)))
        else {
            debug!("No inactive subscription left to request");
            return false;
        };

        if let Err(err) = self.send(&command) {
            warn!(error = %err, market = %subscription.pair(), channel = %subscription.channel(), "Subscribe request not sent");
            return false;
        }
        debug!(market = %subscription.pair(), channel = %subscription.channel(), request_id = %request_id, "Subscribe requested");
        self.subscriptions(|reg| reg.set_inactive_id(request_id, &subscription))
    }

    /// Promote the subscription requested under `temp_id` to active under
    /// `exchange_id`.
    pub fn confirm_subscription(&self, temp_id: &SubscriptionId, exchange_id: SubscriptionId) -> Option<Subscription> {
        self.subscriptions(|reg| {
            let subscription = reg.get_inactive(temp_id)?.clone();
            if !reg.activate(exchange_id.clone(), &subscription) {
                return None;
            }
            reg.get_active(&exchange_id).cloned()
        })
    }

    /// Ask for a full reconnect, e.g. after detecting a sequence gap.
    pub fn request_reconnect(&self) -> bool {
        self.shared.schedule_reconnect()
    }
}
