//! Pipeline lifecycle state

use std::time::Instant;

/// Lifecycle of the stream coordinator.
///
/// Unlike a one-shot pipeline, a stopped coordinator returns to `Idle` and can
/// be started again.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
    /// Sources and encoders are stopped
    Idle,

    /// Sources are delivering and encoders are configured
    Running {
        /// When the pipeline started running
        started_at: Instant,
    },

    /// Sources are being stopped and the video encoder flushed
    Stopping,
}

impl PipelineState {
    /// Check if this state transition is valid
    pub fn can_transition_to(&self, target: &PipelineState) -> bool {
        use PipelineState::*;

        match (self, target) {
            (Idle, Running { .. }) => true,
            (Running { .. }, Stopping) => true,
            (Stopping, Idle) => true,
            (a, b) if a == b => true,
            _ => false,
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            PipelineState::Idle => "Idle",
            PipelineState::Running { .. } => "Running",
            PipelineState::Stopping => "Stopping",
        }
    }

    pub fn is_running(&self) -> bool {
        matches!(self, PipelineState::Running { .. })
    }

    /// Time since the pipeline started (if running)
    pub fn running_duration(&self) -> Option<std::time::Duration> {
        if let PipelineState::Running { started_at } = self {
            Some(started_at.elapsed())
        } else {
            None
        }
    }
}

impl std::fmt::Display for PipelineState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.description())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lifecycle_transitions() {
        let idle = PipelineState::Idle;
        let running = PipelineState::Running {
            started_at: Instant::now(),
        };
        let stopping = PipelineState::Stopping;

        assert!(idle.can_transition_to(&running));
        assert!(running.can_transition_to(&stopping));
        assert!(stopping.can_transition_to(&idle));
        assert!(running.can_transition_to(&running));

        assert!(!idle.can_transition_to(&stopping));
        assert!(!running.can_transition_to(&idle));
        assert!(!stopping.can_transition_to(&running));
    }

    #[test]
    fn test_state_checks() {
        let running = PipelineState::Running {
            started_at: Instant::now(),
        };
        assert!(running.is_running());
        assert!(running.running_duration().is_some());
        assert!(!PipelineState::Idle.is_running());
        assert_eq!(PipelineState::Stopping.to_string(), "Stopping");
    }
}
