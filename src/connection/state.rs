//! Connection lifecycle states and the transition table
//!
//! Every guard used by the handler lives here as a pure predicate so the
//! table can be checked without a transport or a runtime.

use std::fmt;
use std::time::Duration;

/// Lifecycle state of one connection handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    Disconnected,
    ConnectScheduled,
    Connecting,
    Connected,
    StartScheduled,
    Running,
    WaitConnect,
    DisconnectScheduled,
    Disconnecting,
    ReconnectScheduled,
    RecDisconnecting,
    ShutdownScheduled,
    ShuttingDown,
    Terminated,
}

/// What the handler does when the transport reports a close.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseOutcome {
    /// Solicited disconnect completed.
    Disconnected,
    /// Solicited shutdown completed; the loop exits.
    Terminated,
    /// Not self-initiated: wait, then reconnect.
    Reconnect,
    /// Nothing was expected to be open.
    Ignore,
}

impl ConnectionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionState::Disconnected => "DISCONNECTED",
            ConnectionState::ConnectScheduled => "CONNECT_SCHEDULED",
            ConnectionState::Connecting => "CONNECTING",
            ConnectionState::Connected => "CONNECTED",
            ConnectionState::StartScheduled => "START_SCHEDULED",
            ConnectionState::Running => "RUNNING",
            ConnectionState::WaitConnect => "WAIT_CONNECT",
            ConnectionState::DisconnectScheduled => "DISCONNECT_SCHEDULED",
            ConnectionState::Disconnecting => "DISCONNECTING",
            ConnectionState::ReconnectScheduled => "RECONNECT_SCHEDULED",
            ConnectionState::RecDisconnecting => "REC_DISCONNECTING",
            ConnectionState::ShutdownScheduled => "SHUTDOWN_SCHEDULED",
            ConnectionState::ShuttingDown => "SHUTTING_DOWN",
            ConnectionState::Terminated => "TERMINATED",
        }
    }

    pub fn all() -> &'static [ConnectionState] {
        &[
            ConnectionState::Disconnected,
            ConnectionState::ConnectScheduled,
            ConnectionState::Connecting,
            ConnectionState::Connected,
            ConnectionState::StartScheduled,
            ConnectionState::Running,
            ConnectionState::WaitConnect,
            ConnectionState::DisconnectScheduled,
            ConnectionState::Disconnecting,
            ConnectionState::ReconnectScheduled,
            ConnectionState::RecDisconnecting,
            ConnectionState::ShutdownScheduled,
            ConnectionState::ShuttingDown,
            ConnectionState::Terminated,
        ]
    }

    pub fn can_schedule_connect(&self) -> bool {
        matches!(self, ConnectionState::Disconnected | ConnectionState::WaitConnect)
    }

    /// States from which a disconnect may be scheduled.
    pub fn is_live(&self) -> bool {
        matches!(
            self,
            ConnectionState::ConnectScheduled
                | ConnectionState::Connecting
                | ConnectionState::Connected
                | ConnectionState::StartScheduled
                | ConnectionState::Running
                | ConnectionState::WaitConnect
                | ConnectionState::ReconnectScheduled
                | ConnectionState::RecDisconnecting
        )
    }

    pub fn can_schedule_reconnect(&self) -> bool {
        *self == ConnectionState::Running
    }

    pub fn can_schedule_shutdown(&self) -> bool {
        !matches!(
            self,
            ConnectionState::ShutdownScheduled | ConnectionState::ShuttingDown | ConnectionState::Terminated
        )
    }

    /// A close or fatal error in these states was not asked for.
    pub fn is_reconnect_eligible(&self) -> bool {
        matches!(
            self,
            ConnectionState::Connecting
                | ConnectionState::Connected
                | ConnectionState::StartScheduled
                | ConnectionState::Running
                | ConnectionState::ReconnectScheduled
                | ConnectionState::RecDisconnecting
        )
    }

    pub fn is_terminated(&self) -> bool {
        *self == ConnectionState::Terminated
    }

    pub fn on_transport_closed(&self) -> CloseOutcome {
        match self {
            ConnectionState::Disconnecting | ConnectionState::DisconnectScheduled => CloseOutcome::Disconnected,
            ConnectionState::ShuttingDown | ConnectionState::ShutdownScheduled => CloseOutcome::Terminated,
            s if s.is_reconnect_eligible() => CloseOutcome::Reconnect,
            _ => CloseOutcome::Ignore,
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An action waiting in the handler's single slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Connect,
    Start,
    Disconnect,
    Reconnect,
    Shutdown,
    Terminate,
    /// Arm the reconnect timer.
    Backoff(Duration),
}

#[cfg(test)]
mod tests {
    use super::*;
    use ConnectionState::*;

    #[test]
    fn test_connect_only_from_idle_states() {
        let allowed: Vec<_> = ConnectionState::all()
            .iter()
            .filter(|s| s.can_schedule_connect())
            .copied()
            .collect();
        assert_eq!(allowed, vec![Disconnected, WaitConnect]);
    }

    #[test]
    fn test_reconnect_only_from_running() {
        for state in ConnectionState::all() {
            assert_eq!(state.can_schedule_reconnect(), *state == Running);
        }
    }

    #[test]
    fn test_shutdown_from_anything_not_already_ending() {
        assert!(Disconnected.can_schedule_shutdown());
        assert!(Running.can_schedule_shutdown());
        assert!(WaitConnect.can_schedule_shutdown());
        assert!(!ShutdownScheduled.can_schedule_shutdown());
        assert!(!ShuttingDown.can_schedule_shutdown());
        assert!(!Terminated.can_schedule_shutdown());
    }

    #[test]
    fn test_close_outcomes() {
        assert_eq!(Disconnecting.on_transport_closed(), CloseOutcome::Disconnected);
        assert_eq!(DisconnectScheduled.on_transport_closed(), CloseOutcome::Disconnected);
        assert_eq!(ShuttingDown.on_transport_closed(), CloseOutcome::Terminated);
        assert_eq!(ShutdownScheduled.on_transport_closed(), CloseOutcome::Terminated);
        for state in [Connecting, Connected, StartScheduled, Running, RecDisconnecting, ReconnectScheduled] {
            assert_eq!(state.on_transport_closed(), CloseOutcome::Reconnect, "{state}");
        }
        for state in [Disconnected, ConnectScheduled, WaitConnect, Terminated] {
            assert_eq!(state.on_transport_closed(), CloseOutcome::Ignore, "{state}");
        }
    }

    #[test]
    fn test_terminal_states_are_not_live() {
        assert!(!Disconnected.is_live());
        assert!(!Terminated.is_live());
        assert!(!ShuttingDown.is_live());
        assert!(Running.is_live());
    }

    #[test]
    fn test_display_names() {
        assert_eq!(RecDisconnecting.to_string(), "REC_DISCONNECTING");
        assert_eq!(ConnectionState::all().len(), 14);
    }
}
