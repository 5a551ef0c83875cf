use std::sync::{Arc, Mutex, MutexGuard, mpsc::Sender};

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::{
    error::{CirculationError, Result},
    loan::Loan,
};

/// Trait for state change observation
pub trait LoanObserver: Send + Sync {
    /// Called once per completed transition, after the loan was persisted
    ///
    /// # Errors
    ///
    /// A failure is propagated to the caller of the transition.
    fn on_state_change(&self, previous: &Loan, updated: &Loan) -> Result<()>;
}

impl<T: LoanObserver + ?Sized> LoanObserver for Arc<T> {
    fn on_state_change(&self, previous: &Loan, updated: &Loan) -> Result<()> {
        (**self).on_state_change(previous, updated)
    }
}

/// Snapshot pair handed to observers
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct StateChange {
    /// Loan before the transition
    pub previous: Loan,
    /// Loan after the transition
    pub updated: Loan,
}

/// Logs all transitions that occur in the system
#[derive(Debug)]
pub struct TransitionLogger;

impl LoanObserver for TransitionLogger {
    fn on_state_change(&self, previous: &Loan, updated: &Loan) -> Result<()> {
        info!(
            loan_pid = %updated.loan_pid,
            item_pid = updated.item_pid.as_deref().unwrap_or("-"),
            from = %previous.state,
            to = %updated.state,
            "loan state changed"
        );
        Ok(())
    }
}

/// Keeps every change it sees, oldest first
#[derive(Debug, Default)]
pub struct RecordingObserver {
    /// Recorded changes
    changes: Mutex<Vec<StateChange>>,
}

impl RecordingObserver {
    /// Create an empty recorder
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Lock the recorded history
    fn history(&self) -> Result<MutexGuard<'_, Vec<StateChange>>> {
        self.changes
            .lock()
            .map_err(|e| CirculationError::Notification(format!("recorder lock poisoned: {e}")))
    }

    /// Copy of everything recorded so far
    ///
    /// # Errors
    ///
    /// Returns `CirculationError::Notification` if the recorder lock is poisoned.
    pub fn changes(&self) -> Result<Vec<StateChange>> {
        Ok(self.history()?.clone())
    }

    /// Number of recorded changes
    ///
    /// # Errors
    ///
    /// Returns `CirculationError::Notification` if the recorder lock is poisoned.
    pub fn len(&self) -> Result<usize> {
        Ok(self.history()?.len())
    }

    /// Whether nothing was recorded
    ///
    /// # Errors
    ///
    /// Returns `CirculationError::Notification` if the recorder lock is poisoned.
    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.history()?.is_empty())
    }
}

impl LoanObserver for RecordingObserver {
    fn on_state_change(&self, previous: &Loan, updated: &Loan) -> Result<()> {
        self.history()?
            .push(StateChange { previous: previous.clone(), updated: updated.clone() });
        Ok(())
    }
}

/// Forwards every change to a channel
#[derive(Debug)]
pub struct ChannelObserver {
    /// Sending half, guarded so the observer can be shared
    sender: Mutex<Sender<StateChange>>,
}

impl ChannelObserver {
    /// Wrap the sending half of a channel
    #[must_use]
    pub fn new(sender: Sender<StateChange>) -> Self {
        Self { sender: Mutex::new(sender) }
    }
}

impl LoanObserver for ChannelObserver {
    fn on_state_change(&self, previous: &Loan, updated: &Loan) -> Result<()> {
        let change = StateChange { previous: previous.clone(), updated: updated.clone() };
        self.sender
            .lock()
            .map_err(|e| CirculationError::Notification(e.to_string()))?
            .send(change)
            .map_err(|e| CirculationError::Notification(format!("receiver is gone: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, mpsc};

    use super::{ChannelObserver, LoanObserver, RecordingObserver};
    use crate::{loan::Loan, state::LoanState};

    #[test]
    fn test_recorder_keeps_order() {
        let recorder = RecordingObserver::new();
        let created = Loan::new("loan-1", LoanState::Created);
        let pending = Loan { state: LoanState::Pending, ..created.clone() };

        assert!(recorder.on_state_change(&created, &pending).is_ok());
        assert_eq!(recorder.len().ok(), Some(1));
        assert_eq!(
            recorder.changes().unwrap_or_default().first().map(|c| c.updated.state),
            Some(LoanState::Pending)
        );
    }

    #[test]
    fn test_channel_reports_dropped_receiver() {
        let (tx, rx) = mpsc::channel();
        let observer = ChannelObserver::new(tx);
        let created = Loan::new("loan-1", LoanState::Created);

        assert!(observer.on_state_change(&created, &created).is_ok());
        assert_eq!(rx.recv().ok().map(|c| c.previous.loan_pid), Some("loan-1".to_string()));

        drop(rx);
        assert!(observer.on_state_change(&created, &created).is_err());
    }

    #[test]
    fn test_poisoned_recorder_reports_error() {
        let recorder = Arc::new(RecordingObserver::new());
        let poisoner = Arc::clone(&recorder);
        let joined = std::thread::spawn(move || {
            let _guard = poisoner.changes.lock();
            panic!("poison the recorder");
        })
        .join();
        assert!(joined.is_err());

        assert!(recorder.changes().is_err());
        assert!(recorder.len().is_err());
        let created = Loan::new("loan-1", LoanState::Created);
        assert!(recorder.on_state_change(&created, &created).is_err());
    }
}
