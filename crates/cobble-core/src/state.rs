//! Connection-Lifecycle State Machine
//!
//! Owns the session's [`Status`] and [`ErrorCode`]. Every change goes through
//! [`StateMachine::apply`], which either returns the [`Transition`] it made or
//! explains why the trigger is not legal in the current state. Illegal triggers
//! never modify the machine, so no call sequence can reach a state outside the
//! transition table.
//!
//! ```text
//! Uninitialised --Init--> Initialised --ScanStart--> Scanning --ScanStop--> Initialised
//! Initialised|Scanning --Connect--> Connecting --Connected--> Connected
//! Connecting --ConnectFailed--> Initialised
//! Connecting|Connected --Disconnected--> Initialised
//! any --Fault--> Error --Init--> Initialised
//! any --Deinit--> Uninitialised
//! ```

use thiserror::Error;
use tracing::{debug, info};

use crate::error::CobbleError;
use crate::types::{ConnectionStatus, DeviceIdentifier, ErrorCode, Status};

// ----------------------------------------------------------------------------
// Triggers
// ----------------------------------------------------------------------------

/// Facade calls and adapter reports that may move the machine
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Trigger {
    Init,
    Deinit,
    ScanStart,
    ScanStop,
    Connect(DeviceIdentifier),
    /// Disconnect requested; the status only moves on the adapter's acknowledgement
    Disconnect,
    /// Connection outcome raised by the adapter
    Link {
        identifier: DeviceIdentifier,
        status: ConnectionStatus,
    },
    /// Unrecoverable hardware or permission condition
    Fault(ErrorCode),
}

impl Trigger {
    /// Verb used in error messages
    pub fn name(&self) -> &'static str {
        match self {
            Trigger::Init => "initialise",
            Trigger::Deinit => "deinitialise",
            Trigger::ScanStart => "start scanning",
            Trigger::ScanStop => "stop scanning",
            Trigger::Connect(_) => "connect",
            Trigger::Disconnect => "disconnect",
            Trigger::Link { .. } => "apply connection status",
            Trigger::Fault(_) => "raise fault",
        }
    }
}

// ----------------------------------------------------------------------------
// Transition Results
// ----------------------------------------------------------------------------

/// Result of an accepted trigger
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    pub from: Status,
    pub to: Status,
    /// The discovery cache must be cleared as part of this transition
    pub invalidates_cache: bool,
}

impl Transition {
    fn stay(status: Status) -> Self {
        Self {
            from: status,
            to: status,
            invalidates_cache: false,
        }
    }

    pub fn changed(&self) -> bool {
        self.from != self.to
    }
}

/// Why a trigger was refused
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StateTransitionError {
    #[error("Cannot {trigger} while {status}")]
    Invalid {
        trigger: &'static str,
        status: Status,
    },

    #[error("Connection already {status}")]
    Busy { status: Status },

    #[error("No connection to tear down while {status}")]
    NotLinked { status: Status },

    #[error("Ignored stale '{link}' for {identifier} while {status}")]
    Stale {
        status: Status,
        link: ConnectionStatus,
        identifier: DeviceIdentifier,
    },
}

impl From<StateTransitionError> for CobbleError {
    fn from(err: StateTransitionError) -> Self {
        match err {
            StateTransitionError::Invalid { trigger, status } => CobbleError::InvalidState {
                operation: trigger,
                status,
            },
            StateTransitionError::Busy { status } => CobbleError::ConnectionInProgress { status },
            StateTransitionError::NotLinked { .. } => CobbleError::NotConnected,
            StateTransitionError::Stale { status, .. } => CobbleError::InvalidState {
                operation: "apply connection status",
                status,
            },
        }
    }
}

// ----------------------------------------------------------------------------
// State Machine
// ----------------------------------------------------------------------------

/// Single source of truth for the session lifecycle
#[derive(Debug, Clone, Default)]
pub struct StateMachine {
    status: Status,
    error: ErrorCode,
    target: Option<DeviceIdentifier>,
}

impl StateMachine {
    /// Create a machine in [`Status::Uninitialised`]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn status(&self) -> Status {
        self.status
    }

    /// Error code; always [`ErrorCode::None`] unless the status is [`Status::Error`]
    pub fn error_code(&self) -> ErrorCode {
        if self.status == Status::Error {
            self.error
        } else {
            ErrorCode::None
        }
    }

    /// Device of the current connect attempt or connection
    pub fn target(&self) -> Option<&DeviceIdentifier> {
        self.target.as_ref()
    }

    /// Compute the status a trigger leads to without applying it
    pub fn next(status: Status, trigger: &Trigger) -> Result<Transition, StateTransitionError> {
        let to = |next: Status, invalidates_cache: bool| Transition {
            from: status,
            to: next,
            invalidates_cache,
        };

        match (trigger, status) {
            (Trigger::Init, Status::Uninitialised | Status::Error) => {
                Ok(to(Status::Initialised, true))
            }
            (Trigger::Deinit, Status::Uninitialised) => Ok(Transition::stay(status)),
            (Trigger::Deinit, _) => Ok(to(Status::Uninitialised, true)),

            (Trigger::ScanStart, Status::Initialised) => Ok(to(Status::Scanning, false)),
            (Trigger::ScanStop, Status::Scanning) => Ok(to(Status::Initialised, false)),
            (Trigger::ScanStop, _) => Ok(Transition::stay(status)),

            (Trigger::Connect(_), Status::Initialised | Status::Scanning) => {
                Ok(to(Status::Connecting, true))
            }
            (Trigger::Connect(_), Status::Connecting | Status::Connected) => {
                Err(StateTransitionError::Busy { status })
            }

            (Trigger::Disconnect, Status::Connecting | Status::Connected) => Ok(Transition {
                invalidates_cache: true,
                ..Transition::stay(status)
            }),
            (Trigger::Disconnect, _) => Err(StateTransitionError::NotLinked { status }),

            (
                Trigger::Link {
                    status: ConnectionStatus::Connected,
                    ..
                },
                Status::Connecting,
            ) => Ok(to(Status::Connected, false)),
            // Some stacks report the same connection twice
            (
                Trigger::Link {
                    status: ConnectionStatus::Connected,
                    ..
                },
                Status::Connected,
            ) => Ok(Transition::stay(status)),
            (
                Trigger::Link {
                    status: ConnectionStatus::ConnectFailed,
                    ..
                },
                Status::Connecting,
            ) => Ok(to(Status::Initialised, true)),
            (
                Trigger::Link {
                    status: ConnectionStatus::Disconnected,
                    ..
                },
                Status::Connecting | Status::Connected,
            ) => Ok(to(Status::Initialised, true)),
            (Trigger::Link { identifier, status: link }, _) => Err(StateTransitionError::Stale {
                status,
                link: *link,
                identifier: identifier.clone(),
            }),

            (Trigger::Fault(_), _) => Ok(to(Status::Error, true)),

            (trigger, status) => Err(StateTransitionError::Invalid {
                trigger: trigger.name(),
                status,
            }),
        }
    }

    /// Apply a trigger, updating status, error code and connect target together.
    ///
    /// A link report naming a device other than the current target is refused
    /// as stale, so a late acknowledgement from an earlier session cannot move
    /// the current connect attempt.
    pub fn apply(&mut self, trigger: Trigger) -> Result<Transition, StateTransitionError> {
        if let Trigger::Link { identifier, status } = &trigger {
            if self.target.as_ref().is_some_and(|target| target != identifier) {
                return Err(StateTransitionError::Stale {
                    status: self.status,
                    link: *status,
                    identifier: identifier.clone(),
                });
            }
        }
        let transition = Self::next(self.status, &trigger)?;

        match trigger {
            Trigger::Fault(code) => {
                self.error = if code == ErrorCode::None {
                    ErrorCode::Unknown
                } else {
                    code
                };
            }
            Trigger::Connect(identifier) => {
                self.target = Some(identifier);
            }
            Trigger::Link { identifier, status } => {
                debug!("{} reported {}", identifier, status);
            }
            _ => {}
        }

        if !transition.to.has_link() {
            self.target = None;
        }
        if transition.to != Status::Error {
            self.error = ErrorCode::None;
        }

        if transition.changed() {
            info!("Status {} -> {}", transition.from, transition.to);
        }
        self.status = transition.to;
        Ok(transition)
    }
}
