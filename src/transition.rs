//! A single edge of the loan state machine and the pipeline it runs.

use std::fmt;

use chrono::{Days, NaiveDate};
use serde::{Deserialize, Serialize};

use crate::{
    config::{CirculationConfig, LoanPolicy, TransitionDef},
    error::{CirculationError, Result},
    guards::{self, Guard, GuardContext},
    loan::{Loan, Params},
    observers::LoanObserver,
    registry::TransitionRegistry,
    state::LoanState,
    store::LoanStore,
};

/// Named field update applied after the guards pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Effect {
    /// Caller params only
    #[default]
    Merge,
    /// Set the request expiry date if missing
    OpenRequest,
    /// Fill in start and due dates if missing
    StartLoan,
    /// Bump the extension counter and push the due date
    ExtendLoan,
}

impl Effect {
    /// Snake-case name used in configuration
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::Merge => "merge",
            Self::OpenRequest => "open_request",
            Self::StartLoan => "start_loan",
            Self::ExtendLoan => "extend_loan",
        }
    }

    /// Apply the update to a staged loan
    ///
    /// # Errors
    ///
    /// Returns `DateOverflow` or `ExtensionOverflow` when the arithmetic
    /// leaves the representable range.
    pub fn apply(&self, loan: &mut Loan, policy: &LoanPolicy) -> Result<()> {
        let today = loan.reference_date();
        match self {
            Self::Merge => {}
            Self::OpenRequest => {
                if loan.request_expire_date.is_none() {
                    loan.request_expire_date = Some(add_days(today, policy.request_duration_days)?);
                }
            }
            Self::StartLoan => {
                let start = *loan.start_date.get_or_insert(today);
                if loan.end_date.is_none() {
                    loan.end_date = Some(add_days(start, policy.loan_duration_days)?);
                }
            }
            Self::ExtendLoan => {
                loan.extension_count =
                    loan.extension_count.checked_add(1).ok_or(CirculationError::ExtensionOverflow)?;
                let from = loan.end_date.unwrap_or(today);
                loan.end_date = Some(add_days(from, policy.extension_duration_days)?);
            }
        }
        Ok(())
    }
}

impl fmt::Display for Effect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Move a date forward by whole days
fn add_days(date: NaiveDate, days: u32) -> Result<NaiveDate> {
    date.checked_add_days(Days::new(u64::from(days))).ok_or(CirculationError::DateOverflow)
}

/// Why one candidate transition did not fire
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GuardFailure {
    /// State the transition leaves
    pub source: LoanState,
    /// State the transition would have entered
    pub destination: LoanState,
    /// Human-readable reason
    pub reason: String,
}

impl fmt::Display for GuardFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} -> {}: {}", self.source, self.destination, self.reason)
    }
}

/// Result of one attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// The transition ran to completion
    Fired,
    /// A precondition failed; nothing was changed
    Rejected(GuardFailure),
}

/// Everything a transition needs besides the loan and params
#[derive(Clone, Copy)]
pub struct TransitionContext<'a> {
    /// Registry the transition belongs to
    pub registry: &'a TransitionRegistry,
    /// Trigger field name
    pub trigger_field: &'a str,
    /// Item location lookup for guards
    pub locator: &'a dyn guards::ItemLocator,
    /// Loan limits for guards and effects
    pub policy: &'a LoanPolicy,
    /// Receives persisted loans
    pub store: &'a dyn LoanStore,
    /// Told about every completed transition
    pub observers: &'a [Box<dyn LoanObserver>],
}

impl fmt::Debug for TransitionContext<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransitionContext")
            .field("trigger_field", &self.trigger_field)
            .field("policy", self.policy)
            .field("observers_count", &self.observers.len())
            .finish_non_exhaustive()
    }
}

/// A configured edge between two states
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Transition {
    /// State the edge leaves
    pub source: LoanState,
    /// State the edge enters
    pub destination: LoanState,
    /// Action name required to take the edge
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trigger: Option<String>,
    /// Guards evaluated in order
    pub guards: Vec<Guard>,
    /// Field update
    pub effect: Effect,
}

impl Transition {
    /// Build the runtime edge for a configured definition
    #[must_use]
    pub fn from_def(source: LoanState, def: &TransitionDef) -> Self {
        Self {
            source,
            destination: def.destination,
            trigger: def.trigger.clone(),
            guards: def.guards.clone(),
            effect: def.effect,
        }
    }

    /// Whether a caller must name this transition
    #[must_use]
    pub fn is_triggered(&self) -> bool {
        self.trigger.is_some()
    }

    /// Rejection carrying `reason`
    fn reject(&self, reason: impl Into<String>) -> Outcome {
        Outcome::Rejected(GuardFailure {
            source: self.source,
            destination: self.destination,
            reason: reason.into(),
        })
    }

    /// Check preconditions without touching anything
    ///
    /// `staged` is the loan with the params already merged in.
    ///
    /// # Errors
    ///
    /// Returns `UnknownState` if either end of the edge is missing from the
    /// registry, and propagates collaborator failures raised by guards.
    pub fn check(
        &self,
        staged: &Loan,
        params: &Params,
        ctx: &TransitionContext<'_>,
    ) -> Result<Option<Outcome>> {
        if let Some(trigger) = self.trigger.as_deref() {
            if params.get_str(ctx.trigger_field) != Some(trigger) {
                let field = ctx.trigger_field;
                let reason = format!("No param `{field}` with value `{trigger}` found.");
                return Ok(Some(self.reject(reason)));
            }
        }

        for state in [self.source, self.destination] {
            if !ctx.registry.contains(state) {
                return Err(CirculationError::UnknownState { state });
            }
        }

        let guard_ctx =
            GuardContext { locator: ctx.locator, store: ctx.store, policy: ctx.policy, params };
        let failure = guards::first_failure(&self.guards, staged, &guard_ctx)?;
        Ok(failure.map(|reason| self.reject(reason)))
    }

    /// Run the whole pipeline against `loan`
    ///
    /// On success `loan` holds the updated record, which has been persisted
    /// and announced to every observer. A rejection leaves `loan` untouched.
    ///
    /// # Errors
    ///
    /// Everything from [`Self::check`], effect arithmetic failures, and
    /// store or observer failures. Store and observer failures happen after
    /// `loan` was replaced and are not rolled back.
    pub fn attempt(
        &self,
        loan: &mut Loan,
        staged: &Loan,
        params: &Params,
        ctx: &TransitionContext<'_>,
    ) -> Result<Outcome> {
        if let Some(rejection) = self.check(staged, params, ctx)? {
            return Ok(rejection);
        }

        let mut updated = staged.clone();
        self.effect.apply(&mut updated, ctx.policy)?;
        updated.state = self.destination;

        let previous = std::mem::replace(loan, updated);
        ctx.store.persist(loan)?;
        for observer in ctx.observers {
            observer.on_state_change(&previous, loan)?;
        }

        Ok(Outcome::Fired)
    }
}

impl fmt::Display for Transition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} -> {}", self.source, self.destination)?;
        if let Some(trigger) = &self.trigger {
            write!(f, " on `{trigger}`")?;
        }
        Ok(())
    }
}

/// Build a context from a configuration and its collaborators
#[must_use]
pub fn context<'a>(
    config: &'a CirculationConfig,
    registry: &'a TransitionRegistry,
    locator: &'a dyn guards::ItemLocator,
    store: &'a dyn LoanStore,
    observers: &'a [Box<dyn LoanObserver>],
) -> TransitionContext<'a> {
    TransitionContext {
        registry,
        trigger_field: &config.trigger_field,
        locator,
        policy: &config.policy,
        store,
        observers,
    }
}
