use std::{
    fmt,
    sync::atomic::{AtomicU8, Ordering},
};

// Encoded states stored in the atomic
const STATE_INIT: u8 = 0;
const STATE_STARTING: u8 = 1;
const STATE_RUNNING: u8 = 2;
const STATE_DRAINING: u8 = 3;
const STATE_STOPPED: u8 = 4;
const STATE_FAILED: u8 = 5;

/// Runtime lifecycle: `Init -> Starting -> Running -> Draining -> Stopped`,
/// with `Failed` reachable only from `Starting`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RuntimeState {
    Init,
    Starting,
    Running,
    Draining,
    Stopped,
    Failed,
}

impl RuntimeState {
    fn encode(self) -> u8 {
        match self {
            RuntimeState::Init => STATE_INIT,
            RuntimeState::Starting => STATE_STARTING,
            RuntimeState::Running => STATE_RUNNING,
            RuntimeState::Draining => STATE_DRAINING,
            RuntimeState::Stopped => STATE_STOPPED,
            RuntimeState::Failed => STATE_FAILED,
        }
    }

    fn decode(value: u8) -> Self {
        match value {
            STATE_INIT => RuntimeState::Init,
            STATE_STARTING => RuntimeState::Starting,
            STATE_RUNNING => RuntimeState::Running,
            STATE_DRAINING => RuntimeState::Draining,
            STATE_STOPPED => RuntimeState::Stopped,
            _ => RuntimeState::Failed,
        }
    }

    /// Whether `self -> next` is an edge of the lifecycle graph.
    pub fn can_transition_to(self, next: RuntimeState) -> bool {
        matches!(
            (self, next),
            (RuntimeState::Init, RuntimeState::Starting)
                | (RuntimeState::Starting, RuntimeState::Running)
                | (RuntimeState::Starting, RuntimeState::Failed)
                | (RuntimeState::Running, RuntimeState::Draining)
                | (RuntimeState::Draining, RuntimeState::Stopped)
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, RuntimeState::Stopped | RuntimeState::Failed)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            RuntimeState::Init => "init",
            RuntimeState::Starting => "starting",
            RuntimeState::Running => "running",
            RuntimeState::Draining => "draining",
            RuntimeState::Stopped => "stopped",
            RuntimeState::Failed => "failed",
        }
    }

    /// Numeric value exported on the `runtime_state` gauge.
    pub fn gauge_value(self) -> f64 {
        f64::from(self.encode())
    }
}

impl fmt::Display for RuntimeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lock-free holder for the current [`RuntimeState`].
#[derive(Debug)]
pub struct LifecycleState {
    state: AtomicU8,
}

impl Default for LifecycleState {
    fn default() -> Self {
        Self::new()
    }
}

impl LifecycleState {
    pub fn new() -> Self {
        Self {
            state: AtomicU8::new(STATE_INIT),
        }
    }

    pub fn get(&self) -> RuntimeState {
        RuntimeState::decode(self.state.load(Ordering::Acquire))
    }

    /// Move `from -> to` atomically. Fails with the observed state if the
    /// current state is not `from` or the edge is not allowed.
    pub fn transition(&self, from: RuntimeState, to: RuntimeState) -> Result<(), RuntimeState> {
        if !from.can_transition_to(to) {
            return Err(self.get());
        }
        self.state
            .compare_exchange(from.encode(), to.encode(), Ordering::AcqRel, Ordering::Acquire)
            .map(|_| ())
            .map_err(RuntimeState::decode)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_happy_path() {
        let state = LifecycleState::new();
        assert_eq!(state.get(), RuntimeState::Init);
        state
            .transition(RuntimeState::Init, RuntimeState::Starting)
            .unwrap();
        state
            .transition(RuntimeState::Starting, RuntimeState::Running)
            .unwrap();
        state
            .transition(RuntimeState::Running, RuntimeState::Draining)
            .unwrap();
        state
            .transition(RuntimeState::Draining, RuntimeState::Stopped)
            .unwrap();
        assert!(state.get().is_terminal());
    }

    #[test]
    fn test_failed_only_from_starting() {
        assert!(RuntimeState::Starting.can_transition_to(RuntimeState::Failed));
        assert!(!RuntimeState::Running.can_transition_to(RuntimeState::Failed));
        assert!(!RuntimeState::Init.can_transition_to(RuntimeState::Failed));
        assert!(!RuntimeState::Draining.can_transition_to(RuntimeState::Failed));
    }

    #[test]
    fn test_transition_from_wrong_state() {
        let state = LifecycleState::new();
        let observed = state
            .transition(RuntimeState::Running, RuntimeState::Draining)
            .unwrap_err();
        assert_eq!(observed, RuntimeState::Init);
        assert_eq!(state.get(), RuntimeState::Init);
    }

    #[test]
    fn test_illegal_edge_rejected() {
        let state = LifecycleState::new();
        assert!(
            state
                .transition(RuntimeState::Init, RuntimeState::Running)
                .is_err()
        );
    }
}
