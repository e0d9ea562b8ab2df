//! Engine configuration.
//!
//! Every value is read from the environment with an `SPG_` prefix and falls back to a logged
//! default. Per-tenant overrides never live here: they are stored on the tenant profile and
//! resolved through the `resolve_*` methods, tenant value first, global default second, so the
//! resolution policy exists in exactly one place and no tenant can observe another tenant's
//! settings.
use std::{env, fmt::Display, str::FromStr};

use chrono::Duration;
use log::*;
use spg_common::TokenAmount;

use crate::{
    db_types::{MarkupKind, TenantSettings},
    helpers::TokenAddress,
};

/// The canonical TRC-20 USDT contract.
pub const DEFAULT_TOKEN_CONTRACT: &str = "TR7NHqjeKQxGTCi8q8ZY4pL8otSzgjLj6t";
const DEFAULT_DATABASE_URL: &str = "sqlite://data/storefront.db";
const DEFAULT_MIN_CONFIRMATIONS: u64 = 2;
const DEFAULT_MATCH_WINDOW: Duration = Duration::minutes(60);
const DEFAULT_TOKEN_DECIMALS: u32 = 6;
const DEFAULT_MATURITY_WINDOW: Duration = Duration::hours(48);
const DEFAULT_ORDER_EXPIRY: Duration = Duration::minutes(60);
const DEFAULT_POLL_INTERVAL: Duration = Duration::seconds(60);
const DEFAULT_MATURITY_SWEEP_INTERVAL: Duration = Duration::minutes(10);
const DEFAULT_MAX_UPSTREAM_ATTEMPTS: u32 = 3;

#[derive(Clone, Debug)]
pub struct EngineSettings {
    /// The token contract credits must come from. Transfers of any other token are recorded as
    /// rejected and never matched.
    pub token_contract: TokenAddress,
    /// Deposit address watched for tenants that carry no address override of their own.
    pub deposit_address: Option<TokenAddress>,
    pub min_confirmations: u64,
    /// Half-width of the order matching window around a transfer's block time.
    pub match_window: Duration,
    /// Maximum difference between an order total and a transfer amount that still matches.
    pub match_tolerance: TokenAmount,
    /// On-chain decimals of the settlement token.
    pub token_decimals: u32,
    /// Time before a credited sale's profit becomes available for withdrawal.
    pub maturity_window: Duration,
    pub min_withdrawal: TokenAmount,
    pub withdrawal_fee: TokenAmount,
    /// Time before an unpaid order expires and its reserved stock is released.
    pub order_expiry: Duration,
    pub poll_interval: Duration,
    pub maturity_sweep_interval: Duration,
    /// Retry budget per upstream chain API call.
    pub max_upstream_attempts: u32,
    pub database_url: String,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            token_contract: TokenAddress::parse(DEFAULT_TOKEN_CONTRACT).unwrap(),
            deposit_address: None,
            min_confirmations: DEFAULT_MIN_CONFIRMATIONS,
            match_window: DEFAULT_MATCH_WINDOW,
            // one millionth of a token, the smallest on-chain step at 6 decimals
            match_tolerance: TokenAmount::from(100),
            token_decimals: DEFAULT_TOKEN_DECIMALS,
            maturity_window: DEFAULT_MATURITY_WINDOW,
            min_withdrawal: TokenAmount::from_tokens(10),
            withdrawal_fee: TokenAmount::from_tokens(1),
            order_expiry: DEFAULT_ORDER_EXPIRY,
            poll_interval: DEFAULT_POLL_INTERVAL,
            maturity_sweep_interval: DEFAULT_MATURITY_SWEEP_INTERVAL,
            max_upstream_attempts: DEFAULT_MAX_UPSTREAM_ATTEMPTS,
            database_url: DEFAULT_DATABASE_URL.to_string(),
        }
    }
}

impl EngineSettings {
    pub fn from_env_or_default() -> Self {
        let defaults = Self::default();
        let token_contract = env::var("SPG_TOKEN_CONTRACT")
            .map_err(|_| info!("🪛️ SPG_TOKEN_CONTRACT is not set. Using the default, {DEFAULT_TOKEN_CONTRACT}."))
            .and_then(|s| {
                TokenAddress::parse(&s).map_err(|e| {
                    warn!("🪛️ Invalid address in SPG_TOKEN_CONTRACT: {e}. Using the default, {DEFAULT_TOKEN_CONTRACT}.")
                })
            })
            .ok()
            .unwrap_or(defaults.token_contract);
        let deposit_address = env::var("SPG_DEPOSIT_ADDRESS").ok().and_then(|s| {
            TokenAddress::parse(&s)
                .map_err(|e| {
                    error!(
                        "🪛️ Invalid address in SPG_DEPOSIT_ADDRESS: {e}. Tenants without a deposit address override \
                         of their own cannot be watched."
                    )
                })
                .ok()
        });
        if deposit_address.is_none() {
            warn!("🪛️ No global deposit address. Only tenants with their own deposit address will be watched.");
        }
        let database_url = env::var("SPG_DATABASE_URL").ok().unwrap_or_else(|| {
            info!("🪛️ SPG_DATABASE_URL is not set. Using the default, {DEFAULT_DATABASE_URL}.");
            DEFAULT_DATABASE_URL.to_string()
        });
        Self {
            token_contract,
            deposit_address,
            min_confirmations: parse_from_env("SPG_MIN_CONFIRMATIONS", DEFAULT_MIN_CONFIRMATIONS),
            match_window: Duration::minutes(parse_from_env(
                "SPG_MATCH_WINDOW_MINUTES",
                DEFAULT_MATCH_WINDOW.num_minutes(),
            )),
            match_tolerance: parse_from_env("SPG_MATCH_TOLERANCE", defaults.match_tolerance),
            token_decimals: parse_from_env("SPG_TOKEN_DECIMALS", DEFAULT_TOKEN_DECIMALS),
            maturity_window: Duration::hours(parse_from_env(
                "SPG_MATURITY_HOURS",
                DEFAULT_MATURITY_WINDOW.num_hours(),
            )),
            min_withdrawal: parse_from_env("SPG_MIN_WITHDRAWAL", defaults.min_withdrawal),
            withdrawal_fee: parse_from_env("SPG_WITHDRAWAL_FEE", defaults.withdrawal_fee),
            order_expiry: Duration::minutes(parse_from_env(
                "SPG_ORDER_EXPIRY_MINUTES",
                DEFAULT_ORDER_EXPIRY.num_minutes(),
            )),
            poll_interval: Duration::seconds(parse_from_env(
                "SPG_POLL_INTERVAL_SECONDS",
                DEFAULT_POLL_INTERVAL.num_seconds(),
            )),
            maturity_sweep_interval: Duration::seconds(parse_from_env(
                "SPG_MATURITY_SWEEP_SECONDS",
                DEFAULT_MATURITY_SWEEP_INTERVAL.num_seconds(),
            )),
            max_upstream_attempts: parse_from_env("SPG_MAX_UPSTREAM_ATTEMPTS", DEFAULT_MAX_UPSTREAM_ATTEMPTS),
            database_url,
        }
    }

    /// The tenant's markup. A half-configured markup (kind without value, or vice versa) counts
    /// as unconfigured; an unconfigured tenant sells at the base price and earns nothing.
    pub fn resolve_markup(&self, settings: &TenantSettings) -> (MarkupKind, TokenAmount) {
        match (settings.markup_kind, settings.markup_value) {
            (Some(kind), Some(value)) => (kind, value),
            _ => (MarkupKind::Percent, TokenAmount::default()),
        }
    }

    pub fn resolve_min_withdrawal(&self, settings: &TenantSettings) -> TokenAmount {
        settings.min_withdrawal.unwrap_or(self.min_withdrawal)
    }

    /// The deposit address the tenant's watcher polls. Stored overrides were validated on the
    /// way in; one that no longer parses is skipped with a warning rather than silently watching
    /// the wrong address.
    pub fn resolve_deposit_address(&self, settings: &TenantSettings) -> Option<TokenAddress> {
        settings
            .deposit_address
            .as_deref()
            .and_then(|s| {
                TokenAddress::parse(s).map_err(|e| warn!("🪛️ Stored deposit address override is invalid: {e}")).ok()
            })
            .or_else(|| self.deposit_address.clone())
    }
}

fn parse_from_env<T>(var: &str, default: T) -> T
where
    T: FromStr + Display + Copy,
    T::Err: Display,
{
    env::var(var)
        .map_err(|_| info!("🪛️ {var} is not set. Using the default, {default}."))
        .and_then(|s| s.parse::<T>().map_err(|e| warn!("🪛️ Invalid value for {var}: {e}. Using the default, {default}.")))
        .ok()
        .unwrap_or(default)
}
