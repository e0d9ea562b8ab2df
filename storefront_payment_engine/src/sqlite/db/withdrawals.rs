use log::debug;
use spg_common::{TenantId, TokenAmount};
use sqlx::SqliteConnection;

use crate::{
    db_types::{Withdrawal, WithdrawalStatus},
    traits::StorefrontError,
};

pub(crate) async fn insert_withdrawal(
    tenant: &TenantId,
    amount: TokenAmount,
    fee: TokenAmount,
    address: &str,
    conn: &mut SqliteConnection,
) -> Result<Withdrawal, StorefrontError> {
    let withdrawal: Withdrawal = sqlx::query_as(
        r#"
            INSERT INTO withdrawals (tenant_id, amount, fee, address)
            VALUES ($1, $2, $3, $4)
            RETURNING *;
        "#,
    )
    .bind(tenant.as_str())
    .bind(amount)
    .bind(fee)
    .bind(address)
    .fetch_one(conn)
    .await?;
    debug!("🏧️ Withdrawal #{} of {amount} requested by {tenant}", withdrawal.id);
    Ok(withdrawal)
}

pub async fn fetch_withdrawal(id: i64, conn: &mut SqliteConnection) -> Result<Option<Withdrawal>, sqlx::Error> {
    let withdrawal =
        sqlx::query_as("SELECT * FROM withdrawals WHERE id = $1").bind(id).fetch_optional(conn).await?;
    Ok(withdrawal)
}

pub async fn fetch_for_tenant(
    tenant: &TenantId,
    status: Option<WithdrawalStatus>,
    conn: &mut SqliteConnection,
) -> Result<Vec<Withdrawal>, sqlx::Error> {
    let withdrawals = match status {
        Some(status) => {
            sqlx::query_as("SELECT * FROM withdrawals WHERE tenant_id = $1 AND status = $2 ORDER BY id")
                .bind(tenant.as_str())
                .bind(status)
                .fetch_all(conn)
                .await?
        },
        None => {
            sqlx::query_as("SELECT * FROM withdrawals WHERE tenant_id = $1 ORDER BY id")
                .bind(tenant.as_str())
                .fetch_all(conn)
                .await?
        },
    };
    Ok(withdrawals)
}

/// Flips `Requested` to `Approved`, recording the reviewer. `None` when the row is missing or not
/// in `Requested`.
pub(crate) async fn approve(
    id: i64,
    reviewer: &str,
    conn: &mut SqliteConnection,
) -> Result<Option<Withdrawal>, sqlx::Error> {
    let withdrawal = sqlx::query_as(
        "UPDATE withdrawals SET status = 'Approved', reviewed_at = CURRENT_TIMESTAMP, reviewed_by = $1, updated_at = \
         CURRENT_TIMESTAMP WHERE id = $2 AND status = 'Requested' RETURNING *",
    )
    .bind(reviewer)
    .bind(id)
    .fetch_optional(conn)
    .await?;
    Ok(withdrawal)
}

/// Flips `Requested` to `Rejected`, recording the reviewer and reason. `None` when the guard
/// misses.
pub(crate) async fn reject(
    id: i64,
    reviewer: &str,
    reason: &str,
    conn: &mut SqliteConnection,
) -> Result<Option<Withdrawal>, sqlx::Error> {
    let withdrawal = sqlx::query_as(
        "UPDATE withdrawals SET status = 'Rejected', reviewed_at = CURRENT_TIMESTAMP, reviewed_by = $1, \
         reject_reason = $2, updated_at = CURRENT_TIMESTAMP WHERE id = $3 AND status = 'Requested' RETURNING *",
    )
    .bind(reviewer)
    .bind(reason)
    .bind(id)
    .fetch_optional(conn)
    .await?;
    Ok(withdrawal)
}

/// Flips `Approved` to `Paid`, recording who sent the payout and its on-chain reference. `None`
/// when the guard misses.
pub(crate) async fn mark_paid(
    id: i64,
    reviewer: &str,
    tx_reference: &str,
    conn: &mut SqliteConnection,
) -> Result<Option<Withdrawal>, sqlx::Error> {
    let withdrawal = sqlx::query_as(
        "UPDATE withdrawals SET status = 'Paid', paid_at = CURRENT_TIMESTAMP, paid_by = $1, tx_reference = $2, \
         updated_at = CURRENT_TIMESTAMP WHERE id = $3 AND status = 'Approved' RETURNING *",
    )
    .bind(reviewer)
    .bind(tx_reference)
    .bind(id)
    .fetch_optional(conn)
    .await?;
    Ok(withdrawal)
}

/// Resolves the error for a guarded transition that found no row to update: either the withdrawal
/// does not exist, or it sits in a status the transition does not accept.
pub(crate) async fn transition_failure(
    id: i64,
    target: WithdrawalStatus,
    conn: &mut SqliteConnection,
) -> Result<StorefrontError, StorefrontError> {
    let current = fetch_withdrawal(id, conn).await?;
    Ok(match current {
        Some(withdrawal) => StorefrontError::invalid_transition(withdrawal.status, target),
        None => StorefrontError::WithdrawalNotFound(id),
    })
}
