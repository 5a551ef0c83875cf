//! Error types for circulation operations.

use thiserror::Error;

use crate::state::LoanState;

/// Errors surfaced by the circulation engine and its collaborators
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CirculationError {
    /// A loan or transition refers to a state the registry does not know
    #[error("Unknown loan state `{state}`.")]
    UnknownState { state: LoanState },

    /// A state name could not be parsed
    #[error("Unknown loan state name `{name}`.")]
    UnknownStateName { name: String },

    /// Every candidate transition was rejected by its guards
    #[error("No valid transition with current state `{state}`.")]
    NoValidTransition { state: LoanState },

    /// A parameter has a value the loan field cannot hold
    #[error("Invalid value for param `{key}`: {reason}")]
    InvalidParam { key: String, reason: String },

    /// A parameter is not a loan field and strict params are enabled
    #[error("Unknown param `{key}`.")]
    UnknownParam { key: String },

    /// The same state was configured twice
    #[error("State `{state}` is configured more than once.")]
    DuplicateState { state: LoanState },

    /// Date arithmetic left the supported calendar range
    #[error("Date computation overflowed.")]
    DateOverflow,

    /// The extension counter cannot grow any further
    #[error("Extension count overflowed.")]
    ExtensionOverflow,

    /// More than one active loan references the same item
    #[error("Multiple active loans on item {item_pid}")]
    MultipleLoansOnItem { item_pid: String },

    /// The loan store failed
    #[error("Store error: {0}")]
    Store(String),

    /// An observer failed to deliver a notification
    #[error("Notification error: {0}")]
    Notification(String),

    /// Configuration could not be read or parsed
    #[error("Configuration error: {0}")]
    Config(String),
}

/// Result alias used across the crate
pub type Result<T> = std::result::Result<T, CirculationError>;
