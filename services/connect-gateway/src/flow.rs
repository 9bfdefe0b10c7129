//! Authorization-Code flow state machine
//!
//! Pure state machine: receives events, returns (new_state, action).
//! The coordinator executes the I/O implied by each action (signature check,
//! token exchange, persistence) and feeds the outcome back as the next event.
//!
//! ```text
//! Idle --Initiated--> AwaitingCallback --CallbackReceived--> Verifying
//!   Verifying --StateVerified(Ok)--> Exchanging --Exchanged--> Persisting
//!   Persisting --TokenStored--> Completed
//! any validation or I/O failure --> Aborted(reason)
//! ```

/// Why a presented state value was refused after the equality check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StateRejection {
    /// Bad signature or malformed value
    Invalid,
    Expired,
    /// Already used by an earlier callback
    Replayed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AbortReason {
    StateMismatch,
    StateExpired,
    StateReplayed,
    ProviderDenied(String),
    MissingCode,
    ExchangeFailed,
    StoreFailed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FlowState {
    Idle,
    /// `expected` is the state value held in the browser's cookie
    AwaitingCallback { expected: String },
    Verifying {
        code: Option<String>,
        provider_error: Option<String>,
    },
    Exchanging,
    Persisting,
    Completed,
    Aborted(AbortReason),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FlowEvent {
    /// A fresh signed state was issued for the current user
    Initiated { state: String },
    CallbackReceived {
        query_state: Option<String>,
        code: Option<String>,
        provider_error: Option<String>,
    },
    StateVerified(Result<(), StateRejection>),
    Exchanged,
    ExchangeFailed,
    TokenStored,
    StoreFailed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FlowAction {
    /// Set the state cookie and send the browser to the authorize endpoint
    RedirectToProvider { state: String },
    /// Check signature and age, then claim the state as used
    VerifyState { state: String },
    ExchangeCode { code: String },
    PersistToken,
    /// Clear the state cookie and land on the home page
    Finish,
    Abort(AbortReason),
}

/// Rebuild the flow position from the browser's state cookie.
///
/// The server keeps no per-flow record; a callback without the cookie is
/// treated as arriving in `Idle`, which aborts as a mismatch.
pub fn resume(cookie_state: Option<&str>) -> FlowState {
    match cookie_state {
        Some(value) if !value.is_empty() => FlowState::AwaitingCallback {
            expected: value.to_string(),
        },
        _ => FlowState::Idle,
    }
}

fn abort(reason: AbortReason) -> (FlowState, FlowAction) {
    (
        FlowState::Aborted(reason.clone()),
        FlowAction::Abort(reason),
    )
}

/// Handle a state transition. Pure function: no I/O.
pub fn handle_event(state: FlowState, event: FlowEvent) -> (FlowState, FlowAction) {
    match (state, event) {
        // --- Idle ---
        (FlowState::Idle, FlowEvent::Initiated { state }) => (
            FlowState::AwaitingCallback {
                expected: state.clone(),
            },
            FlowAction::RedirectToProvider { state },
        ),

        // Re-initiating replaces the pending state
        (FlowState::AwaitingCallback { .. }, FlowEvent::Initiated { state }) => (
            FlowState::AwaitingCallback {
                expected: state.clone(),
            },
            FlowAction::RedirectToProvider { state },
        ),

        // --- AwaitingCallback ---
        // Byte-exact comparison comes before anything else in the callback
        (
            FlowState::AwaitingCallback { expected },
            FlowEvent::CallbackReceived {
                query_state,
                code,
                provider_error,
            },
        ) => match query_state {
            Some(presented) if !presented.is_empty() && presented == expected => (
                FlowState::Verifying {
                    code,
                    provider_error,
                },
                FlowAction::VerifyState { state: presented },
            ),
            _ => abort(AbortReason::StateMismatch),
        },

        // --- Verifying ---
        (
            FlowState::Verifying {
                code,
                provider_error,
            },
            FlowEvent::StateVerified(Ok(())),
        ) => {
            if let Some(error) = provider_error {
                return abort(AbortReason::ProviderDenied(error));
            }
            match code {
                Some(code) if !code.is_empty() => {
                    (FlowState::Exchanging, FlowAction::ExchangeCode { code })
                }
                _ => abort(AbortReason::MissingCode),
            }
        }

        (FlowState::Verifying { .. }, FlowEvent::StateVerified(Err(rejection))) => {
            abort(match rejection {
                StateRejection::Invalid => AbortReason::StateMismatch,
                StateRejection::Expired => AbortReason::StateExpired,
                StateRejection::Replayed => AbortReason::StateReplayed,
            })
        }

        // --- Exchanging ---
        (FlowState::Exchanging, FlowEvent::Exchanged) => {
            (FlowState::Persisting, FlowAction::PersistToken)
        }

        (FlowState::Exchanging, FlowEvent::ExchangeFailed) => {
            abort(AbortReason::ExchangeFailed)
        }

        // --- Persisting ---
        (FlowState::Persisting, FlowEvent::TokenStored) => {
            (FlowState::Completed, FlowAction::Finish)
        }

        (FlowState::Persisting, FlowEvent::StoreFailed) => abort(AbortReason::StoreFailed),

        // A callback with no flow in progress cannot match any state
        (FlowState::Idle, FlowEvent::CallbackReceived { .. }) => {
            abort(AbortReason::StateMismatch)
        }

        // Terminal states and out-of-order events
        (state @ (FlowState::Completed | FlowState::Aborted(_)), event) => {
            tracing::warn!(?state, ?event, "event after flow terminated");
            let reason = match &state {
                FlowState::Aborted(reason) => reason.clone(),
                _ => AbortReason::StateReplayed,
            };
            (state, FlowAction::Abort(reason))
        }

        (state, event) => {
            tracing::warn!(?state, ?event, "unexpected flow event");
            abort(AbortReason::StateMismatch)
        }
    }
}
