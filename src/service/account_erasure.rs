use crate::domain::events::AccountDeleted;
use crate::service::payment_orchestrator::PaymentOrchestrator;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryOutcome {
    Ack,
    /// Left pending so the next backlog read picks it up again.
    Retry,
}

/// Runs the erasure cascade for one `account-deleted` stream entry.
/// Unreadable entries are acknowledged; cascade failures are not.
pub async fn process_entry(
    orchestrator: &PaymentOrchestrator,
    entry_id: &str,
    raw: Option<&str>,
) -> EntryOutcome {
    let Some(raw) = raw else {
        tracing::warn!(entry_id, "account event without payload");
        return EntryOutcome::Ack;
    };
    let event = match AccountDeleted::parse(raw) {
        Ok(e) => e,
        Err(e) => {
            tracing::warn!(entry_id, error = %e, "dropping unparseable account event");
            return EntryOutcome::Ack;
        }
    };

    match orchestrator.handle_account_deleted(event.account_id).await {
        Ok(_) => EntryOutcome::Ack,
        Err(e) => {
            tracing::error!(entry_id, account_id = %event.account_id, error = %e, "erasure cascade failed");
            EntryOutcome::Retry
        }
    }
}

/// Tracks whether this consumer still has pending entries to re-read with
/// XREADGROUP start id `"0"`. Starts set so entries left unacknowledged
/// before a restart are replayed.
#[derive(Debug)]
pub struct PendingCursor {
    backlog: bool,
}

impl Default for PendingCursor {
    fn default() -> Self {
        Self { backlog: true }
    }
}

impl PendingCursor {
    pub fn wants_backlog(&self) -> bool {
        self.backlog
    }

    /// Records one read. `from_backlog` marks a `"0"` read, otherwise `">"`.
    pub fn record(&mut self, from_backlog: bool, read: usize, retried: usize) {
        if retried > 0 {
            self.backlog = true;
        } else if from_backlog && read == 0 {
            self.backlog = false;
        }
    }
}
