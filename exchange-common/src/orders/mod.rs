//! Order domain vocabulary shared by the engine and its adaptors.

mod requests;
mod types;

pub use requests::*;
pub use types::*;
