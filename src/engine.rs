use std::{fmt, sync::Arc};

use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::{
    config::CirculationConfig,
    error::{CirculationError, Result},
    guards::ItemLocator,
    loan::{Loan, Params},
    observers::LoanObserver,
    registry::TransitionRegistry,
    store::LoanStore,
    transition::{self, Outcome, TransitionContext},
};

/// Loan state machine driver
///
/// Holds the immutable registry and the collaborators transitions talk to.
/// Callers own their loans and must not trigger the same loan concurrently;
/// `trigger` takes the loan by `&mut` for that reason.
pub struct Circulation {
    /// Static configuration
    config: CirculationConfig,
    /// Transition table, shared and never mutated
    registry: Arc<TransitionRegistry>,
    /// Item location lookup for guards
    locator: Box<dyn ItemLocator>,
    /// Loan persistence and pending request lookup
    store: Arc<dyn LoanStore>,
    /// Registered state change observers
    observers: Vec<Box<dyn LoanObserver>>,
}

impl fmt::Debug for Circulation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Circulation")
            .field("config", &self.config)
            .field("registry", &self.registry)
            .field("observers_count", &self.observers.len())
            .finish_non_exhaustive()
    }
}

impl Circulation {
    /// Build the registry from `config` and wire the collaborators
    ///
    /// # Errors
    ///
    /// Returns `CirculationError::DuplicateState` if the transition table
    /// lists a state twice.
    pub fn new(
        config: CirculationConfig,
        locator: impl ItemLocator + 'static,
        store: Arc<dyn LoanStore>,
    ) -> Result<Self> {
        let registry = Arc::new(TransitionRegistry::from_config(&config)?);
        Ok(Self::with_registry(config, registry, locator, store))
    }

    /// Wire an engine around an already built registry
    #[must_use]
    pub fn with_registry(
        config: CirculationConfig,
        registry: Arc<TransitionRegistry>,
        locator: impl ItemLocator + 'static,
        store: Arc<dyn LoanStore>,
    ) -> Self {
        Self { config, registry, locator: Box::new(locator), store, observers: Vec::new() }
    }

    /// Register an observer to be notified of state changes
    pub fn register_observer(&mut self, observer: Box<dyn LoanObserver>) {
        self.observers.push(observer);
    }

    /// Configuration the engine was built with
    #[must_use]
    pub fn config(&self) -> &CirculationConfig {
        &self.config
    }

    /// Shared transition table
    #[must_use]
    pub fn registry(&self) -> &Arc<TransitionRegistry> {
        &self.registry
    }

    /// Store loans are persisted to
    #[must_use]
    pub fn store(&self) -> &Arc<dyn LoanStore> {
        &self.store
    }

    /// Params carrying only a trigger under the configured field name
    #[must_use]
    pub fn action(&self, trigger: &str) -> Params {
        Params::new().with(self.config.trigger_field.as_str(), trigger)
    }

    /// Create and persist a loan in the initial state
    ///
    /// A missing `document_pid` is looked up from the item.
    ///
    /// # Errors
    ///
    /// Returns parameter errors from the merge and store failures from
    /// persisting the new record.
    pub fn create_loan(&self, params: &Params) -> Result<Loan> {
        self.check_params(params)?;
        let mut loan = Loan::new(Uuid::new_v4().to_string(), self.config.initial_state)
            .merged(params, &self.config.trigger_field)?;
        if loan.document_pid.is_none() {
            loan.document_pid =
                loan.item_pid.as_deref().and_then(|item| self.locator.document_of_item(item));
        }
        self.store.persist(&loan)?;
        debug!(loan_pid = %loan.loan_pid, state = %loan.state, "loan created");
        Ok(loan)
    }

    /// Move the loan along the first transition whose guards pass
    ///
    /// Candidates are tried in configured order and at most one fires. On
    /// success the returned reference is the updated, persisted loan.
    ///
    /// # Errors
    ///
    /// - `UnknownState` if the loan's state or a candidate's states are not
    ///   registered
    /// - `NoValidTransition` if every candidate was rejected
    /// - `InvalidParam` / `UnknownParam` for params that cannot be merged
    /// - store and observer failures, after the loan was already updated
    pub fn trigger<'l>(&self, loan: &'l mut Loan, params: &Params) -> Result<&'l Loan> {
        let state = loan.state;
        if !self.registry.contains(state) {
            return Err(CirculationError::UnknownState { state });
        }
        self.check_params(params)?;

        let requested = params.get_str(&self.config.trigger_field);
        let candidates = self.registry.candidates(state, requested)?;
        let staged = loan.merged(params, &self.config.trigger_field)?;
        let ctx = self.context();

        for candidate in candidates {
            match candidate.attempt(loan, &staged, params, &ctx)? {
                Outcome::Fired => {
                    info!(
                        loan_pid = %loan.loan_pid,
                        from = %state,
                        to = %loan.state,
                        "transition fired"
                    );
                    return Ok(&*loan);
                }
                Outcome::Rejected(failure) => {
                    debug!(loan_pid = %loan.loan_pid, %failure, "transition rejected");
                }
            }
        }

        warn!(
            loan_pid = %loan.loan_pid,
            %state,
            trigger = requested.unwrap_or("-"),
            "no valid transition"
        );
        Err(CirculationError::NoValidTransition { state })
    }

    /// Reject unknown param keys when strict params are enabled
    fn check_params(&self, params: &Params) -> Result<()> {
        if !self.config.strict_params {
            return Ok(());
        }
        let unknown = params
            .iter()
            .map(|(key, _)| key)
            .find(|key| *key != self.config.trigger_field && !Loan::is_field(key));
        match unknown {
            Some(key) => Err(CirculationError::UnknownParam { key: key.to_string() }),
            None => Ok(()),
        }
    }

    /// Borrow everything a transition needs
    fn context(&self) -> TransitionContext<'_> {
        transition::context(
            &self.config,
            &self.registry,
            self.locator.as_ref(),
            self.store.as_ref(),
            &self.observers,
        )
    }
}
