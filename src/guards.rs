//! Domain predicates that decide whether a transition may fire.
//!
//! Predicates never mutate anything. A transition holds an ordered chain of
//! [`Guard`]s, each one requiring or forbidding a [`Predicate`]; the chain
//! passes only if every guard passes.

use std::{
    collections::{BTreeMap, BTreeSet, HashMap},
    fmt,
};

use serde::{Deserialize, Serialize};

use crate::{
    config::LoanPolicy,
    error::Result,
    loan::{Loan, Params},
    store::LoanStore,
};

/// Item catalogue lookups the circulation rules depend on
///
/// Only `item_location` is required. The document hooks default to an empty
/// catalogue and the availability policy defaults to allowing every item.
pub trait ItemLocator: Send + Sync {
    /// Location of the item, `None` if unknown
    fn item_location(&self, item_pid: &str) -> Option<String>;

    /// Items belonging to a document, in a stable order
    fn items_of_document(&self, _document_pid: &str) -> Vec<String> {
        Vec::new()
    }

    /// Document an item belongs to
    fn document_of_item(&self, _item_pid: &str) -> Option<String> {
        None
    }

    /// Policy check run before the loan lookup, e.g. items withdrawn from
    /// circulation
    fn is_item_available(&self, _item_pid: &str) -> bool {
        true
    }
}

impl<F> ItemLocator for F
where
    F: Fn(&str) -> Option<String> + Send + Sync,
{
    fn item_location(&self, item_pid: &str) -> Option<String> {
        self(item_pid)
    }
}

/// Fixed catalogue of items, their locations and documents
#[derive(Debug, Clone, Default)]
pub struct StaticLocator {
    /// Location per item pid
    locations: HashMap<String, String>,
    /// Document per item pid
    documents: BTreeMap<String, String>,
    /// Items the policy refuses to lend
    withheld: BTreeSet<String>,
}

impl StaticLocator {
    /// Create an empty locator
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Place an item at a location
    #[must_use]
    pub fn with_item(
        mut self,
        item_pid: impl Into<String>,
        location_pid: impl Into<String>,
    ) -> Self {
        self.locations.insert(item_pid.into(), location_pid.into());
        self
    }

    /// Attach an item to a document
    #[must_use]
    pub fn with_document(
        mut self,
        item_pid: impl Into<String>,
        document_pid: impl Into<String>,
    ) -> Self {
        self.documents.insert(item_pid.into(), document_pid.into());
        self
    }

    /// Refuse to lend an item regardless of its loans
    #[must_use]
    pub fn withholding(mut self, item_pid: impl Into<String>) -> Self {
        self.withheld.insert(item_pid.into());
        self
    }
}

impl ItemLocator for StaticLocator {
    fn item_location(&self, item_pid: &str) -> Option<String> {
        self.locations.get(item_pid).cloned()
    }

    fn items_of_document(&self, document_pid: &str) -> Vec<String> {
        self.documents
            .iter()
            .filter(|(_, document)| document.as_str() == document_pid)
            .map(|(item, _)| item.clone())
            .collect()
    }

    fn document_of_item(&self, item_pid: &str) -> Option<String> {
        self.documents.get(item_pid).cloned()
    }

    fn is_item_available(&self, item_pid: &str) -> bool {
        !self.withheld.contains(item_pid)
    }
}

/// Collaborators and limits a predicate may consult
#[derive(Clone, Copy)]
pub struct GuardContext<'a> {
    /// Item location lookup
    pub locator: &'a dyn ItemLocator,
    /// Pending request lookup
    pub store: &'a dyn LoanStore,
    /// Loan limits
    pub policy: &'a LoanPolicy,
    /// Params of the current call, before merging
    pub params: &'a Params,
}

impl fmt::Debug for GuardContext<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GuardContext").field("policy", self.policy).finish_non_exhaustive()
    }
}

/// Named domain condition
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Predicate {
    /// Pickup location equals the item's current location
    PickupAtSameLibrary,
    /// Item has pending requests, or the transaction happens where the item lives
    ShouldItemBeReturned,
    /// A pickup location is known
    HasPickupLocation,
    /// Another extension fits under the policy maximum
    ExtensionAllowed,
    /// Due date is after the start date and within the maximum span
    LoanDurationValid,
}

impl Predicate {
    /// Snake-case name used in configuration
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::PickupAtSameLibrary => "pickup_at_same_library",
            Self::ShouldItemBeReturned => "should_item_be_returned",
            Self::HasPickupLocation => "has_pickup_location",
            Self::ExtensionAllowed => "extension_allowed",
            Self::LoanDurationValid => "loan_duration_valid",
        }
    }

    /// Evaluate against the loan as it would look after the update
    ///
    /// # Errors
    ///
    /// Propagates store failures from the pending request lookup.
    pub fn holds(&self, loan: &Loan, ctx: &GuardContext<'_>) -> Result<bool> {
        match self {
            Self::PickupAtSameLibrary => Ok(is_pickup_at_same_library(loan, ctx.locator)),
            Self::ShouldItemBeReturned => should_item_be_returned(loan, ctx),
            Self::HasPickupLocation => {
                Ok(loan.pickup_location_pid.as_deref().is_some_and(|pid| !pid.is_empty()))
            }
            Self::ExtensionAllowed => {
                Ok(ctx.policy.max_extensions.is_none_or(|max| loan.extension_count < max))
            }
            Self::LoanDurationValid => Ok(is_loan_duration_valid(loan, ctx.policy)),
        }
    }

    /// Reason reported when a guard requires this predicate and it is false
    fn unmet_reason(self) -> &'static str {
        match self {
            Self::PickupAtSameLibrary => "Pickup is not in the same library.",
            Self::ShouldItemBeReturned => "Item is not due back at its home library.",
            Self::HasPickupLocation => "Pickup location is required.",
            Self::ExtensionAllowed => "Maximum number of extensions reached.",
            Self::LoanDurationValid => "Loan duration is not valid.",
        }
    }

    /// Reason reported when a guard forbids this predicate and it is true
    fn met_reason(self) -> &'static str {
        match self {
            Self::PickupAtSameLibrary => "Pickup is in the same library.",
            Self::ShouldItemBeReturned => "Item is due back at its home library.",
            Self::HasPickupLocation => "Pickup location must not be set.",
            Self::ExtensionAllowed => "Loan can still be extended.",
            Self::LoanDurationValid => "Loan duration is valid.",
        }
    }
}

impl fmt::Display for Predicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A predicate together with the polarity it must have
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Guard {
    /// Pass when the predicate holds
    Require(Predicate),
    /// Pass when the predicate does not hold
    Forbid(Predicate),
}

impl Guard {
    /// `None` when the guard passes, otherwise the reason it failed
    ///
    /// # Errors
    ///
    /// Propagates collaborator failures raised while evaluating the predicate.
    pub fn check(&self, loan: &Loan, ctx: &GuardContext<'_>) -> Result<Option<&'static str>> {
        Ok(match *self {
            Self::Require(predicate) => {
                (!predicate.holds(loan, ctx)?).then_some(predicate.unmet_reason())
            }
            Self::Forbid(predicate) => {
                predicate.holds(loan, ctx)?.then_some(predicate.met_reason())
            }
        })
    }
}

impl fmt::Display for Guard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Require(predicate) => write!(f, "{predicate}"),
            Self::Forbid(predicate) => write!(f, "!{predicate}"),
        }
    }
}

/// Evaluate a chain in order, stopping at the first failure
///
/// # Errors
///
/// Propagates collaborator failures raised while evaluating a predicate.
pub fn first_failure(
    guards: &[Guard],
    loan: &Loan,
    ctx: &GuardContext<'_>,
) -> Result<Option<&'static str>> {
    for guard in guards {
        if let Some(reason) = guard.check(loan, ctx)? {
            return Ok(Some(reason));
        }
    }
    Ok(None)
}

/// Whether the patron picks the item up where it already is
#[must_use]
pub fn is_pickup_at_same_library(loan: &Loan, locator: &dyn ItemLocator) -> bool {
    match (loan.item_pid.as_deref(), loan.pickup_location_pid.as_deref()) {
        (Some(item_pid), Some(pickup)) => {
            locator.item_location(item_pid).as_deref() == Some(pickup)
        }
        _ => false,
    }
}

/// Whether the item has to travel back home before the loan can close
///
/// Only the transaction location passed with the current call counts; a
/// location stored by an earlier action is ignored.
///
/// # Errors
///
/// Propagates store failures from the pending request lookup.
pub fn should_item_be_returned(loan: &Loan, ctx: &GuardContext<'_>) -> Result<bool> {
    let Some(item_pid) = loan.item_pid.as_deref() else {
        return Ok(false);
    };

    if ctx.store.count_pending_requests(item_pid)? > 0 {
        return Ok(true);
    }

    Ok(ctx.params.get_str("transaction_location_pid").is_some_and(|location| {
        ctx.locator.item_location(item_pid).as_deref() == Some(location)
    }))
}

/// Whether the loan period is ordered and short enough
///
/// A missing end date passes, since the start-loan effect fills in a valid one.
#[must_use]
pub fn is_loan_duration_valid(loan: &Loan, policy: &LoanPolicy) -> bool {
    let Some(end) = loan.end_date else {
        return true;
    };
    let start = loan.start_date.unwrap_or_else(|| loan.reference_date());

    end > start
        && end.signed_duration_since(start).num_days() < i64::from(policy.max_loan_duration_days)
}

#[cfg(test)]
mod tests {
    use chrono::NaiveDate;
    use rand::Rng;

    use super::{Guard, GuardContext, ItemLocator, Predicate, StaticLocator, first_failure};
    use crate::{
        config::LoanPolicy,
        loan::{Loan, Params},
        state::LoanState,
        store::MemoryStore,
    };

    fn pending_loan(item: &str, pickup: &str) -> Loan {
        let mut loan = Loan::new("loan-1", LoanState::Pending);
        loan.item_pid = Some(item.to_string());
        loan.pickup_location_pid = Some(pickup.to_string());
        loan
    }

    #[test]
    fn test_pickup_pair_is_total() {
        let store = MemoryStore::new();
        let policy = LoanPolicy::default();
        let params = Params::new();
        let libraries = ["LibA", "LibB", "LibC"];
        let mut rng = rand::rng();

        for _ in 0..200 {
            let item_at =
                libraries.get(rng.random_range(0..libraries.len())).copied().unwrap_or("LibA");
            let pickup =
                libraries.get(rng.random_range(0..libraries.len())).copied().unwrap_or("LibA");
            let locator = StaticLocator::new().with_item("I1", item_at);
            let ctx =
                GuardContext { locator: &locator, store: &store, policy: &policy, params: &params };
            let loan = pending_loan("I1", pickup);

            let desk =
                first_failure(&[Guard::Require(Predicate::PickupAtSameLibrary)], &loan, &ctx);
            let transit =
                first_failure(&[Guard::Forbid(Predicate::PickupAtSameLibrary)], &loan, &ctx);

            let desk_passes = matches!(desk, Ok(None));
            let transit_passes = matches!(transit, Ok(None));
            assert!(desk_passes ^ transit_passes, "item at {item_at}, pickup at {pickup}");
            assert_eq!(desk_passes, item_at == pickup);
        }
    }

    #[test]
    fn test_unknown_item_location_is_not_same_library() {
        let store = MemoryStore::new();
        let policy = LoanPolicy::default();
        let params = Params::new();
        let locator = StaticLocator::new();
        let ctx =
            GuardContext { locator: &locator, store: &store, policy: &policy, params: &params };

        let holds = Predicate::PickupAtSameLibrary.holds(&pending_loan("I1", "LibA"), &ctx);
        assert_eq!(holds.ok(), Some(false));
    }

    #[test]
    fn test_first_failing_guard_reason_wins() {
        let store = MemoryStore::new();
        let policy = LoanPolicy { max_extensions: Some(0), ..LoanPolicy::default() };
        let params = Params::new();
        let locator = StaticLocator::new().with_item("I1", "LibB");
        let ctx =
            GuardContext { locator: &locator, store: &store, policy: &policy, params: &params };
        let loan = pending_loan("I1", "LibA");

        let chain = [
            Guard::Require(Predicate::HasPickupLocation),
            Guard::Require(Predicate::PickupAtSameLibrary),
            Guard::Require(Predicate::ExtensionAllowed),
        ];

        assert_eq!(
            first_failure(&chain, &loan, &ctx).ok().flatten(),
            Some("Pickup is not in the same library.")
        );
    }

    #[test]
    fn test_loan_duration_bounds() {
        let policy = LoanPolicy::default();
        let mut loan = Loan::new("loan-1", LoanState::Created);
        loan.start_date = NaiveDate::from_ymd_opt(2024, 1, 1);

        loan.end_date = NaiveDate::from_ymd_opt(2024, 1, 31);
        assert!(super::is_loan_duration_valid(&loan, &policy));

        loan.end_date = NaiveDate::from_ymd_opt(2023, 12, 31);
        assert!(!super::is_loan_duration_valid(&loan, &policy));

        loan.end_date = NaiveDate::from_ymd_opt(2024, 3, 1);
        assert!(!super::is_loan_duration_valid(&loan, &policy));

        loan.end_date = None;
        assert!(super::is_loan_duration_valid(&loan, &policy));
    }

    #[test]
    fn test_guard_display_marks_negation() {
        assert_eq!(
            Guard::Forbid(Predicate::ShouldItemBeReturned).to_string(),
            "!should_item_be_returned"
        );
        assert_eq!(Guard::Require(Predicate::ExtensionAllowed).to_string(), "extension_allowed");
    }

    #[test]
    fn test_return_location_comes_from_current_params_only() {
        let store = MemoryStore::new();
        let policy = LoanPolicy::default();
        let locator = StaticLocator::new().with_item("I1", "LibA");
        let mut loan = Loan::new("loan-1", LoanState::ItemOnLoan);
        loan.item_pid = Some("I1".to_string());
        loan.transaction_location_pid = Some("LibA".to_string());

        let empty = Params::new();
        let ctx =
            GuardContext { locator: &locator, store: &store, policy: &policy, params: &empty };
        assert_eq!(Predicate::ShouldItemBeReturned.holds(&loan, &ctx).ok(), Some(false));

        let at_home = Params::new().with("transaction_location_pid", "LibA");
        let ctx = GuardContext { params: &at_home, ..ctx };
        assert_eq!(Predicate::ShouldItemBeReturned.holds(&loan, &ctx).ok(), Some(true));
    }

    #[test]
    fn test_static_locator_catalogue() {
        let locator = StaticLocator::new()
            .with_document("I2", "D1")
            .with_document("I1", "D1")
            .with_document("I3", "D2")
            .withholding("I1");

        assert_eq!(locator.items_of_document("D1"), vec!["I1".to_string(), "I2".to_string()]);
        assert!(locator.items_of_document("D9").is_empty());
        assert_eq!(locator.document_of_item("I3").as_deref(), Some("D2"));
        assert!(!locator.is_item_available("I1"));
        assert!(locator.is_item_available("I2"));

        let closure = |_: &str| Some("LibA".to_string());
        assert!(closure.items_of_document("D1").is_empty());
        assert!(closure.is_item_available("I1"));
    }
}
