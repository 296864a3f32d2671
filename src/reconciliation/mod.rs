//! Payment allocation and invoice balance reconciliation
//!
//! Allocations are the source of truth for what has been paid; the
//! `paid_amount`/`balance_due` fields on invoices are a cache rebuilt from
//! them by the reconciliation sweep.

pub mod balances;
pub mod payments;

pub use balances::*;
pub use payments::*;
