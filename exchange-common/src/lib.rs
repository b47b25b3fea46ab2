// exchange-common: Shared types, errors, and logging for the exchange
// Used by exchange-core and any thin API adaptors built on top of it

pub mod error;
pub mod logging;
pub mod orders;
pub mod symbols;
