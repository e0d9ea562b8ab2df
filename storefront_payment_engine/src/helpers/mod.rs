mod token_address;

pub use token_address::{AddressError, TokenAddress};
