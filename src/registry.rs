//! Per-state ordered transition lists, built once at startup.

use std::collections::BTreeMap;

use crate::{
    config::CirculationConfig,
    error::{CirculationError, Result},
    state::LoanState,
    transition::Transition,
};

/// Immutable mapping from state to the transitions leaving it
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TransitionRegistry {
    /// Outgoing transitions per state, in configured order
    table: BTreeMap<LoanState, Vec<Transition>>,
}

impl TransitionRegistry {
    /// Build the registry from the configured table
    ///
    /// # Errors
    ///
    /// Returns `CirculationError::DuplicateState` if a state appears twice.
    pub fn from_config(config: &CirculationConfig) -> Result<Self> {
        let mut table = BTreeMap::new();
        for entry in &config.transitions {
            let transitions: Vec<Transition> = entry
                .transitions
                .iter()
                .map(|def| Transition::from_def(entry.state, def))
                .collect();
            if table.insert(entry.state, transitions).is_some() {
                return Err(CirculationError::DuplicateState { state: entry.state });
            }
        }
        Ok(Self { table })
    }

    /// Whether `state` is a registry key
    #[must_use]
    pub fn contains(&self, state: LoanState) -> bool {
        self.table.contains_key(&state)
    }

    /// Every registered state, in lifecycle order
    pub fn states(&self) -> impl Iterator<Item = LoanState> {
        self.table.keys().copied()
    }

    /// Number of registered states
    #[must_use]
    pub fn len(&self) -> usize {
        self.table.len()
    }

    /// Whether no state is registered
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.table.is_empty()
    }

    /// All transitions leaving `state`
    ///
    /// # Errors
    ///
    /// Returns `CirculationError::UnknownState` if `state` is not registered.
    pub fn transitions_from(&self, state: LoanState) -> Result<&[Transition]> {
        self.table.get(&state).map(Vec::as_slice).ok_or(CirculationError::UnknownState { state })
    }

    /// Every transition of the registry
    pub fn iter(&self) -> impl Iterator<Item = &Transition> {
        self.table.values().flatten()
    }

    /// Transitions worth attempting from `state`
    ///
    /// With a trigger, only triggered transitions are returned and their names
    /// are not compared; each transition checks the name itself. Without one,
    /// every transition is returned. Configured order is kept either way.
    ///
    /// # Errors
    ///
    /// Returns `CirculationError::UnknownState` if `state` is not registered.
    pub fn candidates(&self, state: LoanState, trigger: Option<&str>) -> Result<Vec<&Transition>> {
        let transitions = self.transitions_from(state)?;
        Ok(match trigger.filter(|name| !name.is_empty()) {
            Some(_) => transitions.iter().filter(|t| t.is_triggered()).collect(),
            None => transitions.iter().collect(),
        })
    }
}
