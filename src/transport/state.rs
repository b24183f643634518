//! Connection state and retry policy

use std::time::Duration;

/// Connection state machine owned by the transport client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
    /// No channel is open
    #[default]
    Disconnected,

    /// An explicit `connect` is opening the channel
    Connecting,

    /// The channel is open; sends are dispatched
    Connected,

    /// A reconnection attempt is running after a receive failure
    Failing,
}

impl ConnectionState {
    /// Check if this state transition is valid
    pub fn can_transition_to(&self, target: &ConnectionState) -> bool {
        use ConnectionState::*;

        match (self, target) {
            (Disconnected, Connecting) => true,
            (Disconnected, Failing) => true,

            (Connecting, Connected) => true,
            (Connecting, Disconnected) => true,

            (Connected, Disconnected) => true,

            (Failing, Connected) => true,
            (Failing, Disconnected) => true,
            // explicit connect supersedes a pending retry
            (Failing, Connecting) => true,

            (a, b) if a == b => true,

            _ => false,
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            ConnectionState::Disconnected => "Disconnected",
            ConnectionState::Connecting => "Connecting",
            ConnectionState::Connected => "Connected",
            ConnectionState::Failing => "Failing",
        }
    }

    pub fn is_connected(&self) -> bool {
        matches!(self, ConnectionState::Connected)
    }
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.description())
    }
}

/// How often and how far apart the receive loop tries to reopen a failed channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 5,
            delay: Duration::from_secs(2),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_transitions() {
        use ConnectionState::*;

        assert!(Disconnected.can_transition_to(&Connecting));
        assert!(Connecting.can_transition_to(&Connected));
        assert!(Connecting.can_transition_to(&Disconnected));
        assert!(Connected.can_transition_to(&Disconnected));
        assert!(Disconnected.can_transition_to(&Failing));
        assert!(Failing.can_transition_to(&Connected));
        assert!(Connected.can_transition_to(&Connected));
    }

    #[test]
    fn test_invalid_transitions() {
        use ConnectionState::*;

        assert!(!Disconnected.can_transition_to(&Connected));
        assert!(!Connected.can_transition_to(&Connecting));
        assert!(!Connected.can_transition_to(&Failing));
    }

    #[test]
    fn test_default_policy() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.max_retries, 5);
        assert_eq!(policy.delay, Duration::from_secs(2));
        assert_eq!(ConnectionState::default(), ConnectionState::Disconnected);
        assert_eq!(ConnectionState::Failing.to_string(), "Failing");
    }
}
