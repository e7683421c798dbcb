use crate::domain::payment::Payment;
use crate::repo::payments_repo::{BookingAlreadyLinked, PaymentStore};
use anyhow::{anyhow, bail, Result};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use uuid::Uuid;

/// Process-local payment store for tests and database-less local runs.
#[derive(Clone, Default)]
pub struct InMemoryPaymentStore {
    payments: Arc<RwLock<HashMap<Uuid, Payment>>>,
}

impl InMemoryPaymentStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> Result<std::sync::RwLockReadGuard<'_, HashMap<Uuid, Payment>>> {
        self.payments.read().map_err(|_| anyhow!("payment store lock poisoned"))
    }

    fn write(&self) -> Result<std::sync::RwLockWriteGuard<'_, HashMap<Uuid, Payment>>> {
        self.payments.write().map_err(|_| anyhow!("payment store lock poisoned"))
    }
}

#[async_trait::async_trait]
impl PaymentStore for InMemoryPaymentStore {
    async fn insert(&self, payment: &Payment) -> Result<()> {
        let mut payments = self.write()?;
        if payments
            .values()
            .any(|p| p.transaction_ref == payment.transaction_ref)
        {
            bail!("duplicate transaction_ref {}", payment.transaction_ref);
        }
        payments.insert(payment.id, payment.clone());
        Ok(())
    }

    async fn update(&self, payment: &Payment) -> Result<()> {
        let mut payments = self.write()?;
        let Some(stored) = payments.get_mut(&payment.id) else {
            bail!("payment {} vanished before update", payment.id);
        };
        if let Some(existing) = stored.booking_id {
            if payment.booking_id != Some(existing) {
                return Err(BookingAlreadyLinked {
                    payment_id: payment.id,
                    existing,
                }
                .into());
            }
        }
        let mut next = payment.clone();
        next.amount = stored.amount;
        next.fee = stored.fee;
        next.net_amount = stored.net_amount;
        *stored = next;
        Ok(())
    }

    async fn get(&self, payment_id: Uuid) -> Result<Option<Payment>> {
        Ok(self.read()?.get(&payment_id).cloned())
    }

    async fn find_by_provider_reference(&self, reference: &str) -> Result<Option<Payment>> {
        let payments = self.read()?;
        let by_session = payments
            .values()
            .find(|p| p.provider_session_ref.as_deref() == Some(reference));
        let found = by_session.or_else(|| {
            payments
                .values()
                .find(|p| p.provider_charge_ref.as_deref() == Some(reference))
        });
        Ok(found.cloned())
    }

    async fn list_by_payer(&self, payer_id: Uuid) -> Result<Vec<Payment>> {
        let mut out: Vec<Payment> = self
            .read()?
            .values()
            .filter(|p| p.payer_id == payer_id)
            .cloned()
            .collect();
        out.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(out)
    }

    async fn list_compensation_gaps(&self, limit: i64) -> Result<Vec<Payment>> {
        let mut out: Vec<Payment> = self
            .read()?
            .values()
            .filter(|p| p.has_compensation_gap())
            .cloned()
            .collect();
        out.sort_by(|a, b| a.paid_at.cmp(&b.paid_at));
        out.truncate(limit.max(0) as usize);
        Ok(out)
    }
}
