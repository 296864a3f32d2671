//! Tax computation for document line items

pub mod vat;

pub use vat::*;
