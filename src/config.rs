//! Static circulation configuration: policy limits and the transition table.

use std::{fs, path::Path};

use serde::{Deserialize, Serialize};

use crate::{
    error::{CirculationError, Result},
    guards::{Guard, Predicate},
    state::LoanState,
    transition::Effect,
};

/// Durations and limits applied by guards and effects
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct LoanPolicy {
    /// Days between checkout and due date
    pub loan_duration_days: u32,
    /// Days a request stays open
    pub request_duration_days: u32,
    /// Days added by each extension
    pub extension_duration_days: u32,
    /// Maximum number of extensions, `None` for unbounded
    pub max_extensions: Option<u32>,
    /// Loan span must stay strictly below this many days
    pub max_loan_duration_days: u32,
}

impl Default for LoanPolicy {
    fn default() -> Self {
        Self {
            loan_duration_days: 30,
            request_duration_days: 30,
            extension_duration_days: 30,
            max_extensions: None,
            max_loan_duration_days: 60,
        }
    }
}

/// One outgoing edge as written in configuration
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct TransitionDef {
    /// Target state
    pub destination: LoanState,
    /// Action name a caller must pass, `None` for automatic transitions
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trigger: Option<String>,
    /// Guards evaluated in order
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub guards: Vec<Guard>,
    /// Field update applied once the guards pass
    #[serde(default)]
    pub effect: Effect,
}

impl TransitionDef {
    /// Automatic transition to `destination`
    #[must_use]
    pub fn to(destination: LoanState) -> Self {
        Self { destination, trigger: None, guards: Vec::new(), effect: Effect::Merge }
    }

    /// Require the caller to pass `trigger`
    #[must_use]
    pub fn on(mut self, trigger: impl Into<String>) -> Self {
        self.trigger = Some(trigger.into());
        self
    }

    /// Append a guard that requires `predicate`
    #[must_use]
    pub fn requiring(mut self, predicate: Predicate) -> Self {
        self.guards.push(Guard::Require(predicate));
        self
    }

    /// Append a guard that forbids `predicate`
    #[must_use]
    pub fn forbidding(mut self, predicate: Predicate) -> Self {
        self.guards.push(Guard::Forbid(predicate));
        self
    }

    /// Set the field update
    #[must_use]
    pub fn with_effect(mut self, effect: Effect) -> Self {
        self.effect = effect;
        self
    }
}

/// Ordered outgoing edges of one state
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct StateEntry {
    /// Source state
    pub state: LoanState,
    /// Edges, tried in this order
    #[serde(default)]
    pub transitions: Vec<TransitionDef>,
}

impl StateEntry {
    /// Entry for `state` with the given edges
    #[must_use]
    pub fn new(state: LoanState, transitions: Vec<TransitionDef>) -> Self {
        Self { state, transitions }
    }
}

/// Everything the engine needs to know at startup
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct CirculationConfig {
    /// State given to freshly created loans
    pub initial_state: LoanState,
    /// Param key carrying the action name
    pub trigger_field: String,
    /// Reject params that are not loan fields instead of storing them as extras
    pub strict_params: bool,
    /// Loan limits
    pub policy: LoanPolicy,
    /// Transition table
    pub transitions: Vec<StateEntry>,
}

impl Default for CirculationConfig {
    fn default() -> Self {
        Self {
            initial_state: LoanState::Created,
            trigger_field: "trigger".to_string(),
            strict_params: false,
            policy: LoanPolicy::default(),
            transitions: default_transitions(),
        }
    }
}

impl CirculationConfig {
    /// Parse a JSON configuration; missing keys take their defaults
    ///
    /// # Errors
    ///
    /// Returns `CirculationError::Config` if the JSON is malformed.
    pub fn from_json_str(json: &str) -> Result<Self> {
        serde_json::from_str(json)
            .map_err(|e| CirculationError::Config(format!("Failed to parse JSON: {e}")))
    }

    /// Load a JSON configuration file
    ///
    /// # Errors
    ///
    /// Returns `CirculationError::Config` if the file cannot be read or parsed.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path).map_err(|e| {
            CirculationError::Config(format!("Failed to read {}: {e}", path.display()))
        })?;
        Self::from_json_str(&contents)
    }

    /// Pretty JSON rendering
    ///
    /// # Errors
    ///
    /// Returns `CirculationError::Config` if serialization fails.
    pub fn to_json_pretty(&self) -> Result<String> {
        serde_json::to_string_pretty(self).map_err(|e| CirculationError::Config(e.to_string()))
    }
}

/// The standard loan lifecycle
///
/// Automatic edges come first in each state; the guarded pairs out of
/// `PENDING` and `ITEM_ON_LOAN` use a predicate and its negation so that
/// exactly one of them can fire.
#[must_use]
pub fn default_transitions() -> Vec<StateEntry> {
    use LoanState::{
        Cancelled, Created, ItemAtDesk, ItemInTransitForPickup, ItemInTransitToHouse, ItemOnLoan,
        ItemReturned, Pending,
    };

    let cancel = || TransitionDef::to(Cancelled).on("cancel");

    vec![
        StateEntry::new(
            Created,
            vec![
                TransitionDef::to(Pending)
                    .on("request")
                    .requiring(Predicate::HasPickupLocation)
                    .with_effect(Effect::OpenRequest),
                TransitionDef::to(ItemOnLoan)
                    .on("checkout")
                    .requiring(Predicate::LoanDurationValid)
                    .with_effect(Effect::StartLoan),
            ],
        ),
        StateEntry::new(
            Pending,
            vec![
                TransitionDef::to(ItemAtDesk).requiring(Predicate::PickupAtSameLibrary),
                TransitionDef::to(ItemInTransitForPickup)
                    .forbidding(Predicate::PickupAtSameLibrary),
                cancel(),
            ],
        ),
        StateEntry::new(
            ItemAtDesk,
            vec![
                TransitionDef::to(ItemOnLoan)
                    .requiring(Predicate::LoanDurationValid)
                    .with_effect(Effect::StartLoan),
                cancel(),
            ],
        ),
        StateEntry::new(ItemInTransitForPickup, vec![TransitionDef::to(ItemAtDesk), cancel()]),
        StateEntry::new(
            ItemOnLoan,
            vec![
                TransitionDef::to(ItemInTransitToHouse).requiring(Predicate::ShouldItemBeReturned),
                TransitionDef::to(ItemReturned).forbidding(Predicate::ShouldItemBeReturned),
                TransitionDef::to(ItemOnLoan)
                    .on("extend")
                    .requiring(Predicate::ExtensionAllowed)
                    .with_effect(Effect::ExtendLoan),
                cancel(),
            ],
        ),
        StateEntry::new(ItemInTransitToHouse, vec![TransitionDef::to(ItemReturned), cancel()]),
        StateEntry::new(ItemReturned, Vec::new()),
        StateEntry::new(Cancelled, Vec::new()),
    ]
}

#[cfg(test)]
mod tests {
    use super::{CirculationConfig, LoanPolicy};
    use crate::state::LoanState;

    #[test]
    fn test_partial_json_keeps_defaults() {
        let config = CirculationConfig::from_json_str(
            r#"{ "trigger_field": "action", "policy": { "max_extensions": 2 } }"#,
        )
        .unwrap_or_default();

        assert_eq!(config.trigger_field, "action");
        assert_eq!(config.policy.max_extensions, Some(2));
        assert_eq!(config.policy.loan_duration_days, LoanPolicy::default().loan_duration_days);
        assert_eq!(config.initial_state, LoanState::Created);
        assert_eq!(config.transitions.len(), LoanState::ALL.len());
    }

    #[test]
    fn test_json_round_trip_keeps_transition_order() {
        let config = CirculationConfig::default();
        let json = config.to_json_pretty().unwrap_or_default();
        assert!(json.contains("\"require\": \"pickup_at_same_library\""));

        let parsed = CirculationConfig::from_json_str(&json).ok();
        assert_eq!(parsed, Some(config));
    }

    #[test]
    fn test_malformed_json_is_config_error() {
        assert!(CirculationConfig::from_json_str("{ transitions: ").is_err());
    }

    #[test]
    fn test_terminal_states_have_no_edges() {
        for entry in CirculationConfig::default().transitions {
            if entry.state.is_terminal() {
                assert!(entry.transitions.is_empty(), "{} has outgoing edges", entry.state);
            }
        }
    }
}
