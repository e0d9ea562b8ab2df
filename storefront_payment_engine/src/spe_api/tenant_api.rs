use std::fmt::Debug;

use log::*;
use spg_common::TenantId;

use crate::{
    db_types::{TenantProfile, TenantSettings, TenantStatus},
    helpers::TokenAddress,
    traits::{StorefrontDatabase, StorefrontError},
};

/// `TenantApi` manages tenant registration, lifecycle status and the versioned per-tenant
/// settings record.
pub struct TenantApi<B> {
    db: B,
}

impl<B> Debug for TenantApi<B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "TenantApi")
    }
}

impl<B> TenantApi<B>
where B: StorefrontDatabase
{
    pub fn new(db: B) -> Self {
        Self { db }
    }

    /// Registers the tenant if it is not on file yet. Idempotent; an existing profile is
    /// returned unchanged.
    pub async fn register_tenant(&self, id: &TenantId) -> Result<TenantProfile, StorefrontError> {
        let profile = self.db.upsert_tenant(id).await?;
        info!("🏪️ Tenant {} registered", profile.id);
        Ok(profile)
    }

    pub async fn profile(&self, id: &TenantId) -> Result<TenantProfile, StorefrontError> {
        self.db.tenant_profile(id).await
    }

    pub async fn active_tenants(&self) -> Result<Vec<TenantProfile>, StorefrontError> {
        self.db.active_tenants().await
    }

    pub async fn set_status(&self, id: &TenantId, status: TenantStatus) -> Result<TenantProfile, StorefrontError> {
        let profile = self.db.set_tenant_status(id, status).await?;
        info!("🏪️ Tenant {} is now {}", profile.id, profile.status);
        Ok(profile)
    }

    /// Validates and stores the tenant's settings record in one atomic, versioned write.
    ///
    /// Markup kind and value must be set together and the value must not be negative. Addresses
    /// are normalized to their canonical Base58Check spelling before they are stored, so the
    /// watcher and the payout reviewer never see a hex variant.
    pub async fn update_settings(
        &self,
        id: &TenantId,
        mut settings: TenantSettings,
    ) -> Result<TenantProfile, StorefrontError> {
        if settings.markup_kind.is_some() != settings.markup_value.is_some() {
            return Err(StorefrontError::InvalidMarkup("markup kind and value must be set together".to_string()));
        }
        if let Some(value) = settings.markup_value {
            if value.is_negative() {
                return Err(StorefrontError::InvalidMarkup(format!("markup value {value} must not be negative")));
            }
        }
        if let Some(addr) = settings.payout_address.as_deref() {
            settings.payout_address = Some(TokenAddress::parse(addr)?.as_base58().to_string());
        }
        if let Some(addr) = settings.deposit_address.as_deref() {
            settings.deposit_address = Some(TokenAddress::parse(addr)?.as_base58().to_string());
        }
        let profile = self.db.update_tenant_settings(id, settings).await?;
        info!("🏪️ Tenant {} settings updated to version {}", profile.id, profile.settings_version);
        Ok(profile)
    }

    pub fn db(&self) -> &B {
        &self.db
    }
}
