use std::fmt::Debug;

use log::*;
use spg_common::{TenantId, TokenAmount};

use crate::{
    config::EngineSettings,
    db_types::{TenantStatus, Withdrawal, WithdrawalStatus},
    events::{EventProducers, WithdrawalEvent},
    helpers::TokenAddress,
    traits::{SettledWithdrawal, StorefrontDatabase, StorefrontError},
};

/// `WithdrawalApi` runs the withdrawal state machine: request, review (approve or reject) and
/// payout. Every successful transition fires a withdrawal event.
pub struct WithdrawalApi<B> {
    db: B,
    config: EngineSettings,
    producers: EventProducers,
}

impl<B> Debug for WithdrawalApi<B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "WithdrawalApi")
    }
}

impl<B> WithdrawalApi<B> {
    pub fn new(db: B, config: EngineSettings, producers: EventProducers) -> Self {
        Self { db, config, producers }
    }
}

impl<B> WithdrawalApi<B>
where B: StorefrontDatabase
{
    /// Creates a withdrawal request, freezing the amount atomically with the insert.
    ///
    /// The amount must clear the tenant's resolved minimum and the available balance at commit
    /// time, and the destination address must parse. The configured fee is recorded on the
    /// request; the eventual payout on the wire is `amount - fee`. Suspended tenants cannot
    /// withdraw; paused ones can, since pausing only stops new orders.
    pub async fn request_withdrawal(
        &self,
        tenant: &TenantId,
        amount: TokenAmount,
        address: &str,
    ) -> Result<Withdrawal, StorefrontError> {
        let profile = self.db.tenant_profile(tenant).await?;
        if matches!(profile.status, TenantStatus::Suspended) {
            return Err(StorefrontError::TenantNotActive { tenant: profile.id, status: profile.status });
        }
        let minimum = self.config.resolve_min_withdrawal(&profile.settings());
        if amount < minimum {
            return Err(StorefrontError::BelowMinimum { requested: amount, minimum });
        }
        let address = TokenAddress::parse(address)?;
        let withdrawal =
            self.db.request_withdrawal(tenant, amount, self.config.withdrawal_fee, address.as_base58()).await?;
        info!(
            "🏧️ Withdrawal #{} requested by tenant {}: {} to {} (payout {} after the {} fee)",
            withdrawal.id,
            withdrawal.tenant_id,
            withdrawal.amount,
            withdrawal.address,
            withdrawal.payout_amount(),
            withdrawal.fee
        );
        self.call_withdrawal_hook(&withdrawal).await;
        Ok(withdrawal)
    }

    /// `Requested` to `Approved`. No balance movement.
    pub async fn approve(&self, id: i64, reviewer: &str) -> Result<Withdrawal, StorefrontError> {
        let withdrawal = self.db.approve_withdrawal(id, reviewer).await?;
        info!("🏧️ Withdrawal #{} approved by {reviewer}", withdrawal.id);
        self.call_withdrawal_hook(&withdrawal).await;
        Ok(withdrawal)
    }

    /// `Requested` to `Rejected`; the frozen amount returns to the available balance.
    pub async fn reject(&self, id: i64, reviewer: &str, reason: &str) -> Result<Withdrawal, StorefrontError> {
        let withdrawal = self.db.reject_withdrawal(id, reviewer, reason).await?;
        info!(
            "🏧️ Withdrawal #{} rejected by {reviewer} ({reason}); {} is available again",
            withdrawal.id, withdrawal.amount
        );
        self.call_withdrawal_hook(&withdrawal).await;
        Ok(withdrawal)
    }

    /// `Approved` to `Paid`; the frozen amount moves into the tenant's lifetime-paid total and
    /// matured ledger entries are marked withdrawn, oldest first, until the amount is covered.
    pub async fn mark_paid(
        &self,
        id: i64,
        reviewer: &str,
        tx_reference: &str,
    ) -> Result<SettledWithdrawal, StorefrontError> {
        let settled = self.db.mark_withdrawal_paid(id, reviewer, tx_reference).await?;
        info!(
            "🏧️ Withdrawal #{} paid out by {reviewer} (tx {tx_reference}); {} matured entries marked withdrawn",
            settled.withdrawal.id, settled.entries_marked
        );
        self.call_withdrawal_hook(&settled.withdrawal).await;
        Ok(settled)
    }

    pub async fn fetch_withdrawal(&self, id: i64) -> Result<Option<Withdrawal>, StorefrontError> {
        self.db.withdrawal_by_id(id).await
    }

    pub async fn withdrawals_for_tenant(
        &self,
        tenant: &TenantId,
        status: Option<WithdrawalStatus>,
    ) -> Result<Vec<Withdrawal>, StorefrontError> {
        self.db.withdrawals_for_tenant(tenant, status).await
    }

    async fn call_withdrawal_hook(&self, withdrawal: &Withdrawal) {
        for emitter in &self.producers.withdrawal_producer {
            debug!("🏧️ Notifying withdrawal hook subscribers");
            let event = WithdrawalEvent::new(withdrawal.clone());
            emitter.publish_event(event).await;
        }
    }

    pub fn db(&self) -> &B {
        &self.db
    }
}
