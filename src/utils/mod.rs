//! Utility modules

pub mod memory_storage;
pub mod numbering;
pub mod validation;

pub use memory_storage::*;
pub use numbering::*;
pub use validation::*;
