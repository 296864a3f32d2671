//! Ledger module containing the document lifecycle and stock ledger

pub mod conversion;
pub mod core;
pub mod delivery;
pub mod documents;
pub mod stock;

pub use conversion::*;
pub use self::core::*;
pub use delivery::*;
pub use documents::*;
pub use stock::*;
