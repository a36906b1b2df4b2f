//! Pure state machine for the agent control loop
//!
//! No I/O and no async. `transition(state, event) -> (state, actions)` is
//! deterministic; the network executes the returned actions and feeds the
//! outcome back as the next event.
//!
//! The routing rule, evaluated before every invocation:
//! - nothing has run yet: invoke
//! - the summary carries the completion marker: halt
//! - the invocation cap is reached: halt
//! - otherwise: invoke again

use serde::{Deserialize, Serialize};

/// Why the loop stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HaltReason {
    /// The agent emitted the completion marker
    SummaryComplete,
    /// `max_iter` invocations ran without the marker
    MaxIterations,
}

impl std::fmt::Display for HaltReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::SummaryComplete => write!(f, "summary complete"),
            Self::MaxIterations => write!(f, "max iterations"),
        }
    }
}

/// Loop state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    Start,
    Running { call_count: usize, max_iter: usize },
    Halted { call_count: usize, reason: HaltReason },
}

/// Inputs to the state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Event {
    Begin { max_iter: usize },
    /// One agent invocation finished
    InvocationComplete { marker_present: bool },
}

/// Side effects requested by a transition
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    /// Run the agent; `invocation` is 1-based
    InvokeAgent { invocation: usize },
    LogActivity { message: String },
}

/// Routing decision before an invocation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    Invoke,
    Halt(HaltReason),
}

/// Decide whether to invoke again after `call_count` invocations
pub fn route(call_count: usize, marker_present: bool, max_iter: usize) -> Route {
    if call_count == 0 {
        Route::Invoke
    } else if marker_present {
        Route::Halt(HaltReason::SummaryComplete)
    } else if call_count >= max_iter {
        Route::Halt(HaltReason::MaxIterations)
    } else {
        Route::Invoke
    }
}

/// Pure state transition function
///
/// Events that make no sense for the current state leave it unchanged and
/// request nothing.
pub fn transition(state: State, event: Event) -> (State, Vec<Action>) {
    match (state, event) {
        (State::Start, Event::Begin { max_iter }) => {
            let actions = vec![
                Action::LogActivity {
                    message: format!("Starting network (max {} invocations)", max_iter),
                },
                Action::InvokeAgent { invocation: 1 },
            ];
            (
                State::Running {
                    call_count: 0,
                    max_iter,
                },
                actions,
            )
        }

        (
            State::Running {
                call_count,
                max_iter,
            },
            Event::InvocationComplete { marker_present },
        ) => {
            let call_count = call_count + 1;
            match route(call_count, marker_present, max_iter) {
                Route::Invoke => (
                    State::Running {
                        call_count,
                        max_iter,
                    },
                    vec![Action::InvokeAgent {
                        invocation: call_count + 1,
                    }],
                ),
                Route::Halt(reason) => (
                    State::Halted { call_count, reason },
                    vec![Action::LogActivity {
                        message: format!("Halted after {} invocation(s): {}", call_count, reason),
                    }],
                ),
            }
        }

        (state, _) => (state, Vec::new()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn drive(max_iter: usize, marker_on: Option<usize>) -> State {
        let (mut state, mut actions) = transition(State::Start, Event::Begin { max_iter });
        loop {
            let invocation = actions.iter().find_map(|action| match action {
                Action::InvokeAgent { invocation } => Some(*invocation),
                Action::LogActivity { .. } => None,
            });
            let Some(invocation) = invocation else {
                return state;
            };
            let marker_present = marker_on.is_some_and(|k| invocation >= k);
            (state, actions) = transition(state, Event::InvocationComplete { marker_present });
        }
    }

    #[test]
    fn test_route_first_call_always_invokes() {
        assert_eq!(route(0, true, 1), Route::Invoke);
        assert_eq!(route(0, false, 0), Route::Invoke);
    }

    #[test]
    fn test_route_marker_beats_cap() {
        assert_eq!(route(15, true, 15), Route::Halt(HaltReason::SummaryComplete));
        assert_eq!(route(15, false, 15), Route::Halt(HaltReason::MaxIterations));
        assert_eq!(route(3, false, 15), Route::Invoke);
    }

    #[test]
    fn test_no_marker_runs_exactly_max_iter() {
        for max_iter in 1..=15 {
            assert_eq!(
                drive(max_iter, None),
                State::Halted {
                    call_count: max_iter,
                    reason: HaltReason::MaxIterations
                }
            );
        }
    }

    #[test]
    fn test_marker_on_k_runs_exactly_k() {
        for k in 1..15 {
            assert_eq!(
                drive(15, Some(k)),
                State::Halted {
                    call_count: k,
                    reason: HaltReason::SummaryComplete
                }
            );
        }
    }

    #[test]
    fn test_marker_on_last_invocation() {
        assert_eq!(
            drive(3, Some(3)),
            State::Halted {
                call_count: 3,
                reason: HaltReason::SummaryComplete
            }
        );
    }

    #[test]
    fn test_invalid_event_is_ignored() {
        let halted = State::Halted {
            call_count: 2,
            reason: HaltReason::MaxIterations,
        };
        let (state, actions) = transition(halted, Event::InvocationComplete { marker_present: true });
        assert_eq!(state, halted);
        assert!(actions.is_empty());

        let (state, actions) = transition(State::Start, Event::InvocationComplete { marker_present: false });
        assert_eq!(state, State::Start);
        assert!(actions.is_empty());
    }
}
