//! Client state machines
//!
//! Two independent machines describe a client:
//!
//! - [`RunState`] is the caller's intent, driven by `start()` / `stop()`.
//! - [`ConnectionState`] is what the wire is doing, driven by the reconnect
//!   loop while the client runs.
//!
//! Transition functions are pure. They return the next state together with
//! the notifications to emit; publishing those notifications is left to the
//! caller.
//!
//! ```text
//!  Closed ──Attempt──► Opening ──Opened──► Open
//!                         │                  │
//!                        Lost               Lost
//!                         ▼                  ▼
//!                     [Closed] ──────► Reopening ──Opened──► Open  (notifies Reopened)
//!                                       ▲   │
//!                                       └───┘ Attempt / Lost (silent)
//! ```

use std::fmt;
use std::time::Duration;

/// Lifecycle phase of a client
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RunState {
    /// Not running
    Stopped,
    /// Start requested, reconnect loop not yet launched
    Starting,
    /// Reconnect loop running
    Started,
    /// Stop requested, waiting for the loop to exit
    Stopping,
}

/// Inputs to the run state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunEvent {
    /// `start()` called
    Start,
    /// Reconnect loop spawned
    Launched,
    /// `stop()` called
    Stop,
    /// Reconnect loop finished
    Exited,
}

impl RunState {
    /// Apply an event, returning the new state if the transition is valid
    pub fn on(self, event: RunEvent) -> Option<RunState> {
        match (self, event) {
            (RunState::Stopped, RunEvent::Start) => Some(RunState::Starting),
            (RunState::Starting, RunEvent::Launched) => Some(RunState::Started),
            (RunState::Starting | RunState::Started, RunEvent::Stop) => Some(RunState::Stopping),
            (RunState::Stopping, RunEvent::Exited) => Some(RunState::Stopped),
            _ => None,
        }
    }

    /// Whether the client is running or about to run
    pub fn is_running(self) -> bool {
        matches!(self, RunState::Starting | RunState::Started)
    }
}

/// Phase of the underlying wire connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    /// No connection and no outage in progress
    Closed,
    /// First connection attempt in progress
    Opening,
    /// Connected and receiving
    Open,
    /// Connection lost, reconnect attempts in progress
    Reopening,
    /// Notification only: an outage ended. The resting state is `Open`.
    Reopened,
}

/// Inputs to the connection state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionEvent {
    /// A connection attempt begins
    Attempt,
    /// The byte stream was opened
    Opened,
    /// The attempt failed or the open stream ended
    Lost,
    /// The client is stopping
    Shutdown,
}

/// Result of a connection state transition
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transition {
    /// State after the transition
    pub state: ConnectionState,
    /// Notifications to publish, in order
    pub notifications: Vec<ConnectionState>,
}

impl Transition {
    fn to(state: ConnectionState, notifications: &[ConnectionState]) -> Self {
        Self {
            state,
            notifications: notifications.to_vec(),
        }
    }

    fn stay(state: ConnectionState) -> Self {
        Self::to(state, &[])
    }
}

impl ConnectionState {
    /// Apply an event
    ///
    /// `Reopening` is announced once per outage; further failed attempts
    /// during the same outage are silent.
    pub fn on(self, event: ConnectionEvent) -> Transition {
        use ConnectionEvent as E;
        use ConnectionState as S;

        match (self, event) {
            (S::Closed, E::Attempt) => Transition::to(S::Opening, &[S::Opening]),
            (S::Opening, E::Opened) => Transition::to(S::Open, &[S::Open]),
            (S::Reopening, E::Opened) => Transition::to(S::Open, &[S::Reopened]),
            (S::Open | S::Opening | S::Reopened, E::Lost) => {
                Transition::to(S::Reopening, &[S::Closed, S::Reopening])
            }
            (S::Closed, E::Lost) => Transition::to(S::Reopening, &[S::Reopening]),
            (S::Closed, E::Shutdown) => Transition::stay(S::Closed),
            (_, E::Shutdown) => Transition::to(S::Closed, &[S::Closed]),
            (state, _) => Transition::stay(state),
        }
    }

    /// Collapse the transient `Reopened` notification to its resting state
    pub fn resting(self) -> ConnectionState {
        match self {
            ConnectionState::Reopened => ConnectionState::Open,
            other => other,
        }
    }
}

/// Notification published on the state channel
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StateChange {
    /// Run state changed
    Run(RunState),
    /// Connection state changed (may be the transient `Reopened`)
    Connection(ConnectionState),
    /// A reconnect attempt was scheduled
    ReconnectScheduled {
        /// Failed attempts so far in this outage
        attempt: u32,
        /// Delay before the next attempt
        delay: Duration,
    },
    /// The connection recovered after an outage
    Reconnected {
        /// Failed attempts it took
        attempts: u32,
    },
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RunState::Stopped => "Stopped",
            RunState::Starting => "Starting",
            RunState::Started => "Started",
            RunState::Stopping => "Stopping",
        };
        f.write_str(name)
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ConnectionState::Closed => "Closed",
            ConnectionState::Opening => "Opening",
            ConnectionState::Open => "Open",
            ConnectionState::Reopening => "Reopening",
            ConnectionState::Reopened => "Reopened",
        };
        f.write_str(name)
    }
}
