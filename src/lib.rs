//! Loan circulation state machine for tracking library loans.
//!
//! This crate provides a configurable state machine that moves a loan
//! through request, pickup, checkout and return. Each transition is guarded
//! by domain predicates, persisted through a [`LoanStore`] and announced to
//! every registered [`LoanObserver`].

pub mod config;
pub mod diagram;
pub mod engine;
pub mod error;
pub mod guards;
pub mod loan;
pub mod observers;
pub mod registry;
pub mod state;
pub mod store;
pub mod transition;

pub use config::{CirculationConfig, LoanPolicy};
pub use diagram::Diagram;
pub use engine::Circulation;
pub use error::{CirculationError, Result};
pub use guards::{Guard, ItemLocator, Predicate, StaticLocator};
pub use loan::{Loan, Params};
pub use observers::{LoanObserver, StateChange, TransitionLogger};
pub use registry::TransitionRegistry;
pub use state::LoanState;
pub use store::{LoanStore, MemoryStore};
pub use transition::{Effect, Transition};
