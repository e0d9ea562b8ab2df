pub mod op;
mod tenant_id;
mod token_amount;

pub use tenant_id::{TenantId, TenantIdError, MASTER_TENANT};
pub use token_amount::{TokenAmount, TokenAmountError, SETTLEMENT_CURRENCY_CODE, SETTLEMENT_DECIMALS};
