//! Subscription registry
//!
//! Correlates exchange-issued channel identifiers with logical
//! (market, channel) pairs. Subscriptions start INACTIVE, may receive a
//! temporary id while a subscribe request is in flight (INITIATED), and
//! become ACTIVE once the exchange confirms with its final id.
//!
//! Flow: add_inactive → next_inactive → set_inactive_id → activate.
//! On reconnect, `inactivate_all` pushes everything back to the inactive
//! pool so the full set is subscribed again.

use std::collections::{BTreeMap, VecDeque};
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::market::{CurrencyPair, Market};

/// Candle resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Resolution {
    M1,
    M5,
    M15,
    M30,
    H1,
    H3,
    H6,
    H12,
    D1,
    D7,
    D14,
    Month1,
}

impl Resolution {
    /// Wire code, e.g. `1m`, `1D`, `1M`.
    pub fn code(&self) -> &'static str {
        match self {
            Resolution::M1 => "1m",
            Resolution::M5 => "5m",
            Resolution::M15 => "15m",
            Resolution::M30 => "30m",
            Resolution::H1 => "1h",
            Resolution::H3 => "3h",
            Resolution::H6 => "6h",
            Resolution::H12 => "12h",
            Resolution::D1 => "1D",
            Resolution::D7 => "7D",
            Resolution::D14 => "14D",
            Resolution::Month1 => "1M",
        }
    }

    pub fn from_code(code: &str) -> Option<Self> {
        Self::all().iter().copied().find(|r| r.code() == code)
    }

    /// Nominal duration in seconds (a month counts as 30 days).
    pub fn duration_secs(&self) -> u64 {
        const MIN: u64 = 60;
        const HOUR: u64 = 60 * MIN;
        const DAY: u64 = 24 * HOUR;
        match self {
            Resolution::M1 => MIN,
            Resolution::M5 => 5 * MIN,
            Resolution::M15 => 15 * MIN,
            Resolution::M30 => 30 * MIN,
            Resolution::H1 => HOUR,
            Resolution::H3 => 3 * HOUR,
            Resolution::H6 => 6 * HOUR,
            Resolution::H12 => 12 * HOUR,
            Resolution::D1 => DAY,
            Resolution::D7 => 7 * DAY,
            Resolution::D14 => 14 * DAY,
            Resolution::Month1 => 30 * DAY,
        }
    }

    pub fn all() -> &'static [Resolution] {
        &[
            Resolution::M1,
            Resolution::M5,
            Resolution::M15,
            Resolution::M30,
            Resolution::H1,
            Resolution::H3,
            Resolution::H6,
            Resolution::H12,
            Resolution::D1,
            Resolution::D7,
            Resolution::D14,
            Resolution::Month1,
        ]
    }
}

/// Data channel of a subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Channel {
    OrderBook,
    Trades,
    Ticker,
    Candles(Resolution),
}

impl Channel {
    /// Parse `book`, `trades`, `ticker` or `candles@{code}`.
    pub fn parse(s: &str) -> Option<Self> {
        match s.split_once('@') {
            Some(("candles", code)) => Resolution::from_code(code).map(Channel::Candles),
            Some(_) => None,
            None => match s {
                "book" => Some(Channel::OrderBook),
                "trades" => Some(Channel::Trades),
                "ticker" => Some(Channel::Ticker),
                _ => None,
            },
        }
    }

    pub fn to_channel_string(&self) -> String {
        match self {
            Channel::OrderBook => "book".to_string(),
            Channel::Trades => "trades".to_string(),
            Channel::Ticker => "ticker".to_string(),
            Channel::Candles(resolution) => format!("candles@{}", resolution.code()),
        }
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_channel_string())
    }
}

/// Lifecycle of a subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum SubscriptionState {
    Inactive,
    Initiated,
    Active,
}

/// Exchange-issued (or temporary) subscription identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SubscriptionId(String);

impl SubscriptionId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for SubscriptionId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for SubscriptionId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl From<u64> for SubscriptionId {
    fn from(id: u64) -> Self {
        Self(id.to_string())
    }
}

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// One logical (market, channel) subscription.
#[derive(Debug, Clone)]
pub struct Subscription {
    market: Arc<Market>,
    channel: Channel,
    state: SubscriptionState,
    id: Option<SubscriptionId>,
    /// Registration order, used to keep the inactive pool FIFO.
    order: u64,
}

impl Subscription {
    pub fn market(&self) -> &Arc<Market> {
        &self.market
    }

    pub fn pair(&self) -> &CurrencyPair {
        self.market.pair()
    }

    pub fn channel(&self) -> Channel {
        self.channel
    }

    pub fn state(&self) -> SubscriptionState {
        self.state
    }

    pub fn id(&self) -> Option<&SubscriptionId> {
        self.id.as_ref()
    }

    /// Same market pair and channel.
    pub fn same_target(&self, other: &Subscription) -> bool {
        self.targets(other.pair(), other.channel)
    }

    fn targets(&self, pair: &CurrencyPair, channel: Channel) -> bool {
        self.channel == channel && self.pair() == pair
    }

    fn reset(&mut self) {
        self.state = SubscriptionState::Inactive;
        self.id = None;
    }
}

/// Tracks inactive (FIFO) and active (by exchange id) subscriptions.
#[derive(Debug, Default)]
pub struct SubscriptionRegistry {
    inactive: VecDeque<Subscription>,
    active: BTreeMap<SubscriptionId, Subscription>,
    next_order: u64,
}

impl SubscriptionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new inactive subscription. Returns false if the same
    /// (market, channel) is already registered, inactive or active.
    pub fn add_inactive(&mut self, market: Arc<Market>, channel: Channel) -> bool {
        if self
            .inactive
            .iter()
            .chain(self.active.values())
            .any(|s| s.targets(market.pair(), channel))
        {
            return false;
        }

        debug!(market = %market.pair(), channel = %channel, "Subscription registered");
        self.inactive.push_back(Subscription {
            market,
            channel,
            state: SubscriptionState::Inactive,
            id: None,
            order: self.next_order,
        });
        self.next_order += 1;
        true
    }

    /// First subscription in registration order with no request in flight.
    pub fn next_inactive(&self) -> Option<&Subscription> {
        self.inactive
            .iter()
            .find(|s| s.state == SubscriptionState::Inactive)
    }

    /// Attach a temporary id to an inactive subscription (INITIATED).
    pub fn set_inactive_id(&mut self, id: SubscriptionId, subscription: &Subscription) -> bool {
        match self.inactive.iter_mut().find(|s| s.same_target(subscription)) {
            Some(entry) => {
                debug!(market = %entry.pair(), channel = %entry.channel, id = %id, "Subscription initiated");
                entry.state = SubscriptionState::Initiated;
                entry.id = Some(id);
                true
            }
            None => false,
        }
    }

    /// Inactive subscription carrying temporary id `id`.
    pub fn get_inactive(&self, id: &SubscriptionId) -> Option<&Subscription> {
        self.inactive.iter().find(|s| s.id.as_ref() == Some(id))
    }

    /// Move a subscription from the inactive pool to the active map under
    /// the exchange-assigned `id`.
    pub fn activate(&mut self, id: SubscriptionId, subscription: &Subscription) -> bool {
        let Some(idx) = self
            .inactive
            .iter()
            .position(|s| s.same_target(subscription))
        else {
            return false;
        };
        let Some(mut entry) = self.inactive.remove(idx) else {
            return false;
        };

        info!(market = %entry.pair(), channel = %entry.channel, id = %id, "Subscription active");
        entry.state = SubscriptionState::Active;
        entry.id = Some(id.clone());
        if let Some(mut displaced) = self.active.insert(id, entry) {
            // the exchange reused an id; the old holder must subscribe again
            displaced.reset();
            self.push_inactive(displaced);
        }
        true
    }

    /// Confirmed subscription for exchange id `id`.
    pub fn get_active(&self, id: &SubscriptionId) -> Option<&Subscription> {
        self.active.get(id)
    }

    /// Exchange-side unsubscribe: move one active entry back to the pool.
    pub fn deactivate(&mut self, id: &SubscriptionId) -> bool {
        match self.active.remove(id) {
            Some(mut entry) => {
                entry.reset();
                self.push_inactive(entry);
                true
            }
            None => false,
        }
    }

    /// Reset every subscription to INACTIVE with no id, in registration order.
    pub fn inactivate_all(&mut self) {
        let active = std::mem::take(&mut self.active);
        let count = active.len();
        self.inactive.extend(active.into_values());
        self.inactive.iter_mut().for_each(Subscription::reset);
        self.inactive.make_contiguous().sort_by_key(|s| s.order);
        debug!(reactivated = count, total = self.inactive.len(), "All subscriptions inactivated");
    }

    pub fn active_count(&self) -> usize {
        self.active.len()
    }

    pub fn inactive_count(&self) -> usize {
        self.inactive.len()
    }

    pub fn len(&self) -> usize {
        self.active.len() + self.inactive.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// True when every registered subscription is confirmed.
    pub fn is_fully_active(&self) -> bool {
        self.inactive.is_empty() && !self.active.is_empty()
    }

    pub fn active(&self) -> impl Iterator<Item = (&SubscriptionId, &Subscription)> {
        self.active.iter()
    }

    /// Inactive pool in registration order, including INITIATED entries.
    pub fn inactive(&self) -> impl Iterator<Item = &Subscription> {
        self.inactive.iter()
    }

    /// Inactive entry for (pair, channel), for exchanges that confirm by
    /// echoing the request instead of a temporary id.
    pub fn find_inactive(&self, pair: &CurrencyPair, channel: Channel) -> Option<&Subscription> {
        self.inactive.iter().find(|s| s.targets(pair, channel))
    }

    /// Distinct markets referenced by any subscription.
    pub fn markets(&self) -> Vec<Arc<Market>> {
        let mut markets: Vec<Arc<Market>> = Vec::new();
        for sub in self.inactive.iter().chain(self.active.values()) {
            if !markets.iter().any(|m| m.pair() == sub.pair()) {
                markets.push(Arc::clone(&sub.market));
            }
        }
        markets
    }

    fn push_inactive(&mut self, entry: Subscription) {
        let pos = self
            .inactive
            .iter()
            .position(|s| s.order > entry.order)
            .unwrap_or(self.inactive.len());
        self.inactive.insert(pos, entry);
    }
}
