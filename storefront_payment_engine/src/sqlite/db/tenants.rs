use log::debug;
use spg_common::{TenantId, TokenAmount};
use sqlx::SqliteConnection;

use crate::{
    db_types::{TenantProfile, TenantSettings, TenantStatus},
    traits::StorefrontError,
};

/// Creates the tenant row if it is not on file yet. Existing rows are returned untouched, so the
/// call is idempotent and safe under concurrent registration.
pub async fn idempotent_insert(id: &TenantId, conn: &mut SqliteConnection) -> Result<TenantProfile, StorefrontError> {
    sqlx::query("INSERT INTO tenants (id) VALUES ($1) ON CONFLICT (id) DO NOTHING")
        .bind(id.as_str())
        .execute(&mut *conn)
        .await?;
    let profile = fetch_tenant(id, conn).await?.ok_or_else(|| StorefrontError::TenantNotFound(id.clone()))?;
    debug!("🏪️ Tenant [{id}] is on file");
    Ok(profile)
}

pub async fn fetch_tenant(id: &TenantId, conn: &mut SqliteConnection) -> Result<Option<TenantProfile>, sqlx::Error> {
    let profile =
        sqlx::query_as("SELECT * FROM tenants WHERE id = $1").bind(id.as_str()).fetch_optional(conn).await?;
    Ok(profile)
}

pub async fn fetch_active_tenants(conn: &mut SqliteConnection) -> Result<Vec<TenantProfile>, sqlx::Error> {
    let tenants = sqlx::query_as("SELECT * FROM tenants WHERE status = 'Active' ORDER BY id").fetch_all(conn).await?;
    Ok(tenants)
}

pub async fn set_status(
    id: &TenantId,
    status: TenantStatus,
    conn: &mut SqliteConnection,
) -> Result<TenantProfile, StorefrontError> {
    let profile =
        sqlx::query_as("UPDATE tenants SET status = $1, updated_at = CURRENT_TIMESTAMP WHERE id = $2 RETURNING *")
            .bind(status)
            .bind(id.as_str())
            .fetch_optional(conn)
            .await?
            .ok_or_else(|| StorefrontError::TenantNotFound(id.clone()))?;
    debug!("🏪️ Tenant [{id}] status set to {status}");
    Ok(profile)
}

/// Replaces the settings record wholesale and bumps `settings_version`. `None` fields are stored
/// as NULL so they keep tracking the global defaults.
pub async fn update_settings(
    id: &TenantId,
    settings: TenantSettings,
    conn: &mut SqliteConnection,
) -> Result<TenantProfile, StorefrontError> {
    let profile: TenantProfile = sqlx::query_as(
        r#"
        UPDATE tenants SET
            markup_kind = $1,
            markup_value = $2,
            min_withdrawal = $3,
            payout_address = $4,
            deposit_address = $5,
            settings_version = settings_version + 1,
            updated_at = CURRENT_TIMESTAMP
        WHERE id = $6
        RETURNING *;
        "#,
    )
    .bind(settings.markup_kind)
    .bind(settings.markup_value)
    .bind(settings.min_withdrawal)
    .bind(settings.payout_address)
    .bind(settings.deposit_address)
    .bind(id.as_str())
    .fetch_optional(conn)
    .await?
    .ok_or_else(|| StorefrontError::TenantNotFound(id.clone()))?;
    debug!("🏪️ Tenant [{id}] settings replaced (version {})", profile.settings_version);
    Ok(profile)
}

/// Moves the frozen counter by `delta` (positive to freeze, negative to release). The counter can
/// never go negative; a violation means the withdrawal state machine was bypassed.
pub(crate) async fn adjust_frozen(
    id: &TenantId,
    delta: TokenAmount,
    conn: &mut SqliteConnection,
) -> Result<TenantProfile, StorefrontError> {
    let profile: Option<TenantProfile> = sqlx::query_as(
        "UPDATE tenants SET frozen = frozen + $1, updated_at = CURRENT_TIMESTAMP WHERE id = $2 AND frozen + $1 >= 0 \
         RETURNING *",
    )
    .bind(delta)
    .bind(id.as_str())
    .fetch_optional(conn)
    .await?;
    profile.ok_or_else(|| StorefrontError::DatabaseError(format!("Could not adjust frozen funds for {id} by {delta}")))
}

/// Settles a paid withdrawal against the counters: the amount leaves `frozen` and joins
/// `lifetime_paid` in one statement.
pub(crate) async fn record_payout(
    id: &TenantId,
    amount: TokenAmount,
    conn: &mut SqliteConnection,
) -> Result<TenantProfile, StorefrontError> {
    let profile: Option<TenantProfile> = sqlx::query_as(
        "UPDATE tenants SET frozen = frozen - $1, lifetime_paid = lifetime_paid + $1, updated_at = \
         CURRENT_TIMESTAMP WHERE id = $2 AND frozen - $1 >= 0 RETURNING *",
    )
    .bind(amount)
    .bind(id.as_str())
    .fetch_optional(conn)
    .await?;
    profile.ok_or_else(|| StorefrontError::DatabaseError(format!("Could not settle payout of {amount} for {id}")))
}
