//! Connection state machine with exponential-backoff reconnect.

use super::{Transport, TransportEvent};
use crate::config::ReconnectConfig;
use std::time::{Duration, Instant};

/// Lifecycle of the realtime channel for one lesson.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionStatus {
    Disconnected,
    Connecting,
    /// Open; join and state request sent, waiting for the board state.
    AwaitingJoinAck,
    Synchronized,
    /// Channel lost; a reconnect is scheduled.
    Degraded,
    Reconnecting,
}

/// What the status indicator shows.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusIndicator {
    Connecting,
    Connected,
    Disconnected,
}

impl ConnectionStatus {
    pub fn indicator(self) -> StatusIndicator {
        match self {
            Self::Connecting | Self::Reconnecting => StatusIndicator::Connecting,
            Self::AwaitingJoinAck | Self::Synchronized => StatusIndicator::Connected,
            Self::Disconnected | Self::Degraded => StatusIndicator::Disconnected,
        }
    }

    /// Whether operations can be sent right now.
    pub fn is_connected(self) -> bool {
        matches!(self, Self::AwaitingJoinAck | Self::Synchronized)
    }
}

/// Exponential backoff: `base * 2^attempt`, capped.
#[derive(Debug, Clone, PartialEq)]
pub struct ReconnectPolicy {
    pub base: Duration,
    pub max: Duration,
    pub max_attempts: u32,
}

impl ReconnectPolicy {
    /// Delay before the given attempt (0-indexed).
    pub fn delay(&self, attempt: u32) -> Duration {
        let multiplier = 1u32.checked_shl(attempt).unwrap_or(u32::MAX);
        self.base.saturating_mul(multiplier).min(self.max)
    }
}

impl From<&ReconnectConfig> for ReconnectPolicy {
    fn from(config: &ReconnectConfig) -> Self {
        Self {
            base: Duration::from_millis(config.base_delay_ms),
            max: Duration::from_millis(config.max_delay_ms),
            max_attempts: config.max_attempts,
        }
    }
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self::from(&ReconnectConfig::default())
    }
}

/// Drives a [`Transport`] through the connection lifecycle.
///
/// Every method that may change the status returns the new status so the
/// caller can publish it.
#[derive(Debug, Clone)]
pub struct ConnectionManager {
    url: String,
    policy: ReconnectPolicy,
    status: ConnectionStatus,
    /// Failed reconnect attempts since the channel was last open.
    attempts: u32,
    next_attempt_at: Option<Instant>,
}

impl ConnectionManager {
    pub fn new(url: impl Into<String>, policy: ReconnectPolicy) -> Self {
        Self {
            url: url.into(),
            policy,
            status: ConnectionStatus::Disconnected,
            attempts: 0,
            next_attempt_at: None,
        }
    }

    pub fn status(&self) -> ConnectionStatus {
        self.status
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn next_attempt_at(&self) -> Option<Instant> {
        self.next_attempt_at
    }

    /// Reconnect attempts ran out; only the REST path remains.
    pub fn is_exhausted(&self) -> bool {
        self.status == ConnectionStatus::Disconnected && self.attempts >= self.policy.max_attempts
    }

    fn set(&mut self, status: ConnectionStatus) -> Option<ConnectionStatus> {
        if self.status == status {
            return None;
        }
        log::info!("connection {:?} -> {:?}", self.status, status);
        self.status = status;
        Some(status)
    }

    /// Begin the first connection, or a manual retry after exhaustion.
    pub fn start<T: Transport + ?Sized>(&mut self, transport: &mut T, now: Instant) -> Option<ConnectionStatus> {
        self.attempts = 0;
        self.next_attempt_at = None;
        let changed = self.set(ConnectionStatus::Connecting);
        self.dial(transport, now).or(changed)
    }

    fn dial<T: Transport + ?Sized>(&mut self, transport: &mut T, now: Instant) -> Option<ConnectionStatus> {
        match transport.connect(&self.url) {
            Ok(()) => None,
            Err(e) => {
                log::warn!("connect to {} failed: {e}", self.url);
                self.on_failure(now)
            }
        }
    }

    /// Fire a scheduled reconnect when it is due.
    pub fn tick<T: Transport + ?Sized>(&mut self, transport: &mut T, now: Instant) -> Option<ConnectionStatus> {
        if self.status != ConnectionStatus::Degraded {
            return None;
        }
        match self.next_attempt_at {
            Some(due) if due <= now => {
                self.next_attempt_at = None;
                let changed = self.set(ConnectionStatus::Reconnecting);
                self.dial(transport, now).or(changed)
            }
            _ => None,
        }
    }

    /// Feed a transport event through the state machine.
    pub fn handle_event(&mut self, event: &TransportEvent, now: Instant) -> Option<ConnectionStatus> {
        match event {
            TransportEvent::Opened => {
                self.attempts = 0;
                self.next_attempt_at = None;
                self.set(ConnectionStatus::AwaitingJoinAck)
            }
            TransportEvent::Closed | TransportEvent::Failed(_) => self.on_failure(now),
            TransportEvent::Message(_) => None,
        }
    }

    /// The board state arrived after join.
    pub fn mark_synchronized(&mut self) -> Option<ConnectionStatus> {
        if self.status == ConnectionStatus::AwaitingJoinAck {
            self.set(ConnectionStatus::Synchronized)
        } else {
            None
        }
    }

    /// Leave the lesson; no reconnect follows.
    pub fn shutdown<T: Transport + ?Sized>(&mut self, transport: &mut T) -> Option<ConnectionStatus> {
        transport.disconnect();
        self.next_attempt_at = None;
        self.set(ConnectionStatus::Disconnected)
    }

    fn on_failure(&mut self, now: Instant) -> Option<ConnectionStatus> {
        match self.status {
            ConnectionStatus::AwaitingJoinAck | ConnectionStatus::Synchronized => {
                // Lost an open channel: the backoff starts over.
                self.attempts = 0;
            }
            ConnectionStatus::Connecting | ConnectionStatus::Reconnecting => {
                self.attempts += 1;
            }
            ConnectionStatus::Degraded | ConnectionStatus::Disconnected => return None,
        }
        if self.attempts >= self.policy.max_attempts {
            log::warn!("giving up after {} reconnect attempts", self.attempts);
            self.next_attempt_at = None;
            return self.set(ConnectionStatus::Disconnected);
        }
        let delay = self.policy.delay(self.attempts);
        log::info!("reconnecting in {delay:?} (attempt {})", self.attempts + 1);
        self.next_attempt_at = Some(now + delay);
        self.set(ConnectionStatus::Degraded)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::ClientMessage;
    use crate::transport::TransportError;

    #[derive(Default)]
    struct Dialer {
        dials: usize,
        refuse: bool,
    }

    impl Transport for Dialer {
        fn connect(&mut self, _url: &str) -> Result<(), TransportError> {
            self.dials += 1;
            if self.refuse {
                Err(TransportError::ConnectFailed("refused".into()))
            } else {
                Ok(())
            }
        }

        fn disconnect(&mut self) {}

        fn send(&mut self, _message: &ClientMessage) -> Result<(), TransportError> {
            Ok(())
        }

        fn poll_events(&mut self) -> Vec<TransportEvent> {
            Vec::new()
        }

        fn is_open(&self) -> bool {
            false
        }
    }

    fn policy() -> ReconnectPolicy {
        ReconnectPolicy {
            base: Duration::from_secs(1),
            max: Duration::from_secs(30),
            max_attempts: 5,
        }
    }

    #[test]
    fn test_backoff_doubles_and_caps() {
        let p = policy();
        assert_eq!(p.delay(0), Duration::from_secs(1));
        assert_eq!(p.delay(1), Duration::from_secs(2));
        assert_eq!(p.delay(3), Duration::from_secs(8));
        assert_eq!(p.delay(10), Duration::from_secs(30));
        assert_eq!(p.delay(64), Duration::from_secs(30));
    }

    #[test]
    fn test_open_then_synchronized() {
        let mut conn = ConnectionManager::new("ws://x/ws/L", policy());
        let mut dialer = Dialer::default();
        let now = Instant::now();
        assert_eq!(conn.start(&mut dialer, now), Some(ConnectionStatus::Connecting));
        assert_eq!(conn.handle_event(&TransportEvent::Opened, now), Some(ConnectionStatus::AwaitingJoinAck));
        assert_eq!(conn.mark_synchronized(), Some(ConnectionStatus::Synchronized));
        assert_eq!(conn.status().indicator(), StatusIndicator::Connected);
    }

    #[test]
    fn test_reconnect_schedule() {
        let mut conn = ConnectionManager::new("ws://x/ws/L", policy());
        let mut dialer = Dialer::default();
        let t0 = Instant::now();
        conn.start(&mut dialer, t0);
        conn.handle_event(&TransportEvent::Opened, t0);
        assert_eq!(conn.handle_event(&TransportEvent::Closed, t0), Some(ConnectionStatus::Degraded));
        assert_eq!(conn.next_attempt_at(), Some(t0 + Duration::from_secs(1)));

        assert_eq!(conn.tick(&mut dialer, t0 + Duration::from_millis(999)), None);
        assert_eq!(conn.tick(&mut dialer, t0 + Duration::from_secs(1)), Some(ConnectionStatus::Reconnecting));
        let t1 = t0 + Duration::from_secs(1);
        conn.handle_event(&TransportEvent::Failed("refused".into()), t1);
        assert_eq!(conn.next_attempt_at(), Some(t1 + Duration::from_secs(2)));
        assert_eq!(dialer.dials, 2);
    }

    #[test]
    fn test_exhaustion_disconnects() {
        let mut conn = ConnectionManager::new("ws://x/ws/L", ReconnectPolicy { max_attempts: 2, ..policy() });
        let mut dialer = Dialer {
            refuse: true,
            ..Dialer::default()
        };
        let mut now = Instant::now();
        conn.start(&mut dialer, now);
        assert_eq!(conn.status(), ConnectionStatus::Degraded);
        now += Duration::from_secs(2);
        assert_eq!(conn.tick(&mut dialer, now), Some(ConnectionStatus::Disconnected));
        assert!(conn.is_exhausted());
        assert_eq!(conn.tick(&mut dialer, now + Duration::from_secs(60)), None);
    }
}
