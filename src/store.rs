//! Loan persistence and the lookups circulation rules depend on.

use std::{
    collections::BTreeMap,
    fs::File,
    io::{Read, Write},
    path::Path,
    sync::{Mutex, MutexGuard},
};

use tracing::debug;

use crate::{
    error::{CirculationError, Result},
    guards::ItemLocator,
    loan::Loan,
    state::LoanState,
};

/// Durable home of loan records
pub trait LoanStore: Send + Sync {
    /// Write the loan, replacing any previous version with the same pid
    ///
    /// # Errors
    ///
    /// Returns `CirculationError::Store` if the write fails.
    fn persist(&self, loan: &Loan) -> Result<()>;

    /// Number of `PENDING` loans on the item
    ///
    /// # Errors
    ///
    /// Returns `CirculationError::Store` if the lookup fails.
    fn count_pending_requests(&self, item_pid: &str) -> Result<usize>;
}

/// Which states a search keeps
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum StateFilter {
    /// Every state
    #[default]
    Any,
    /// Only these states
    Only(Vec<LoanState>),
    /// Every state except these
    Excluding(Vec<LoanState>),
}

impl StateFilter {
    /// Whether a loan in `state` passes the filter
    #[must_use]
    pub fn matches(&self, state: LoanState) -> bool {
        match self {
            Self::Any => true,
            Self::Only(states) => states.contains(&state),
            Self::Excluding(states) => !states.contains(&state),
        }
    }
}

/// Loans kept in memory, keyed by loan pid
#[derive(Debug, Default)]
pub struct MemoryStore {
    /// Stored loans
    loans: Mutex<BTreeMap<String, Loan>>,
}

impl MemoryStore {
    /// Create an empty store
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Lock the table
    fn table(&self) -> Result<MutexGuard<'_, BTreeMap<String, Loan>>> {
        self.loans.lock().map_err(|e| CirculationError::Store(format!("store lock poisoned: {e}")))
    }

    /// Loans matching `keep`, ordered by pid
    fn collect(&self, keep: impl Fn(&Loan) -> bool) -> Result<Vec<Loan>> {
        Ok(self.table()?.values().filter(|loan| keep(loan)).cloned().collect())
    }

    /// Number of stored loans
    ///
    /// # Errors
    ///
    /// Returns `CirculationError::Store` if the store lock is poisoned.
    pub fn len(&self) -> Result<usize> {
        Ok(self.table()?.len())
    }

    /// Whether the store holds no loan
    ///
    /// # Errors
    ///
    /// Returns `CirculationError::Store` if the store lock is poisoned.
    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.table()?.is_empty())
    }

    /// Loan with the given pid
    ///
    /// # Errors
    ///
    /// Returns `CirculationError::Store` if the store lock is poisoned.
    pub fn get(&self, loan_pid: &str) -> Result<Option<Loan>> {
        Ok(self.table()?.get(loan_pid).cloned())
    }

    /// Loans on an item
    ///
    /// # Errors
    ///
    /// Returns `CirculationError::Store` if the store lock is poisoned.
    pub fn search_by_item(&self, item_pid: &str, filter: &StateFilter) -> Result<Vec<Loan>> {
        self.collect(|loan| {
            loan.item_pid.as_deref() == Some(item_pid) && filter.matches(loan.state)
        })
    }

    /// Loans on any item of a document
    ///
    /// # Errors
    ///
    /// Returns `CirculationError::Store` if the store lock is poisoned.
    pub fn search_by_document(
        &self,
        document_pid: &str,
        filter: &StateFilter,
    ) -> Result<Vec<Loan>> {
        self.collect(|loan| {
            loan.document_pid.as_deref() == Some(document_pid) && filter.matches(loan.state)
        })
    }

    /// Loans of a patron
    ///
    /// # Errors
    ///
    /// Returns `CirculationError::Store` if the store lock is poisoned.
    pub fn search_by_patron(&self, patron_pid: &str) -> Result<Vec<Loan>> {
        self.collect(|loan| loan.patron_pid.as_deref() == Some(patron_pid))
    }

    /// Loans of a patron on one item
    ///
    /// # Errors
    ///
    /// Returns `CirculationError::Store` if the store lock is poisoned.
    pub fn search_by_patron_item(
        &self,
        patron_pid: &str,
        item_pid: &str,
        filter: &StateFilter,
    ) -> Result<Vec<Loan>> {
        self.collect(|loan| {
            loan.patron_pid.as_deref() == Some(patron_pid)
                && loan.item_pid.as_deref() == Some(item_pid)
                && filter.matches(loan.state)
        })
    }

    /// Requests waiting on an item
    ///
    /// # Errors
    ///
    /// Returns `CirculationError::Store` if the store lock is poisoned.
    pub fn pending_loans_for_item(&self, item_pid: &str) -> Result<Vec<Loan>> {
        self.search_by_item(item_pid, &StateFilter::Only(vec![LoanState::Pending]))
    }

    /// Requests waiting on a document
    ///
    /// # Errors
    ///
    /// Returns `CirculationError::Store` if the store lock is poisoned.
    pub fn pending_loans_for_document(&self, document_pid: &str) -> Result<Vec<Loan>> {
        self.search_by_document(document_pid, &StateFilter::Only(vec![LoanState::Pending]))
    }

    /// The loan currently holding the item, if any
    ///
    /// # Errors
    ///
    /// Returns `CirculationError::MultipleLoansOnItem` if more than one active
    /// loan references the item.
    pub fn active_loan_for_item(&self, item_pid: &str) -> Result<Option<Loan>> {
        let mut hits =
            self.search_by_item(item_pid, &StateFilter::Only(LoanState::ACTIVE.to_vec()))?;
        if hits.len() > 1 {
            return Err(CirculationError::MultipleLoansOnItem { item_pid: item_pid.to_string() });
        }
        Ok(hits.pop())
    }

    /// Whether a new loan may be created on the item
    ///
    /// The catalogue policy is asked first; an item it accepts is available
    /// while no active loan holds it.
    ///
    /// # Errors
    ///
    /// Same as [`Self::active_loan_for_item`].
    pub fn is_item_available(&self, item_pid: &str, catalogue: &dyn ItemLocator) -> Result<bool> {
        if !catalogue.is_item_available(item_pid) {
            return Ok(false);
        }
        Ok(self.active_loan_for_item(item_pid)?.is_none())
    }

    /// First item of the document that is available, in catalogue order
    ///
    /// # Errors
    ///
    /// Same as [`Self::active_loan_for_item`].
    pub fn available_item_for_document(
        &self,
        document_pid: &str,
        catalogue: &dyn ItemLocator,
    ) -> Result<Option<String>> {
        for item_pid in catalogue.items_of_document(document_pid) {
            if self.is_item_available(&item_pid, catalogue)? {
                return Ok(Some(item_pid));
            }
        }
        Ok(None)
    }

    /// Number of loans per state
    ///
    /// # Errors
    ///
    /// Returns `CirculationError::Store` if the store lock is poisoned.
    #[allow(clippy::arithmetic_side_effects)]
    pub fn count_by_state(&self) -> Result<BTreeMap<LoanState, usize>> {
        let mut counts = BTreeMap::new();
        for loan in self.table()?.values() {
            *counts.entry(loan.state).or_insert(0) += 1;
        }
        Ok(counts)
    }

    /// Save every loan to a JSON file
    ///
    /// # Errors
    ///
    /// Returns a `CirculationError::Store` if:
    /// - The loans cannot be serialized to JSON
    /// - The file cannot be created
    /// - The data cannot be written to the file
    pub fn save_to_file(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let loans: Vec<Loan> = self.table()?.values().cloned().collect();

        let serialized = serde_json::to_string_pretty(&loans)
            .map_err(|e| CirculationError::Store(e.to_string()))?;

        debug!(path = %path.display(), loans = loans.len(), "saving loan snapshot");

        let mut file = File::create(path)
            .map_err(|e| CirculationError::Store(format!("Failed to create file: {e}")))?;

        file.write_all(serialized.as_bytes())
            .map_err(|e| CirculationError::Store(format!("Failed to write to file: {e}")))?;

        Ok(())
    }

    /// Load a store from a JSON file written by [`Self::save_to_file`]
    ///
    /// # Errors
    ///
    /// Returns a `CirculationError::Store` if:
    /// - The file cannot be opened
    /// - The file cannot be read
    /// - The JSON parsing fails
    pub fn load_from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        debug!(path = %path.display(), "loading loan snapshot");

        let mut file = File::open(path)
            .map_err(|e| CirculationError::Store(format!("Failed to open file: {e}")))?;

        let mut contents = String::new();
        file.read_to_string(&mut contents)
            .map_err(|e| CirculationError::Store(format!("Failed to read file: {e}")))?;

        let loans: Vec<Loan> = serde_json::from_str(&contents)
            .map_err(|e| CirculationError::Store(format!("Failed to parse JSON: {e}")))?;

        let table: BTreeMap<String, Loan> =
            loans.into_iter().map(|loan| (loan.loan_pid.clone(), loan)).collect();
        Ok(Self { loans: Mutex::new(table) })
    }
}

impl LoanStore for MemoryStore {
    fn persist(&self, loan: &Loan) -> Result<()> {
        self.table()?.insert(loan.loan_pid.clone(), loan.clone());
        Ok(())
    }

    fn count_pending_requests(&self, item_pid: &str) -> Result<usize> {
        Ok(self.pending_loans_for_item(item_pid)?.len())
    }
}
