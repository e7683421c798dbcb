use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use uuid::Uuid;

/// Serializes saga steps that touch the same payment inside this process.
#[derive(Clone, Default)]
pub struct PaymentLocks {
    slots: Arc<Mutex<HashMap<Uuid, Arc<AsyncMutex<()>>>>>,
}

impl PaymentLocks {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn acquire(&self, payment_id: Uuid) -> OwnedMutexGuard<()> {
        let slot = {
            let mut slots = match self.slots.lock() {
                Ok(s) => s,
                Err(poisoned) => poisoned.into_inner(),
            };
            // drop slots nobody holds or waits on
            slots.retain(|id, m| *id == payment_id || Arc::strong_count(m) > 1);
            slots
                .entry(payment_id)
                .or_insert_with(|| Arc::new(AsyncMutex::new(())))
                .clone()
        };
        slot.lock_owned().await
    }

    pub fn tracked(&self) -> usize {
        self.slots.lock().map(|s| s.len()).unwrap_or(0)
    }
}
