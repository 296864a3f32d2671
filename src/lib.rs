//! # Sales Ledger Core
//!
//! Document-to-ledger consistency engine for a healthcare-supplies ERP:
//! quotations, proformas, invoices, delivery notes and purchase orders kept
//! in step with an append-only stock ledger and a payment allocation ledger.
//!
//! ## Features
//!
//! - **Document lifecycle**: create and update with items, conversion, audited deletion
//! - **Stock ledger**: signed movements, compensating reversals, counter reconciliation
//! - **Payments**: atomic recording with a manual fallback path, fatal-on-inconsistency reversal
//! - **Balance reconciliation**: invoice paid/balance figures rebuilt from allocations
//! - **Degraded deployments**: creator, optional-column and numbering fallbacks surface as warnings
//! - **Storage abstraction**: database-agnostic design with trait-based storage
//!
//! ## Quick Start
//!
//! ```rust
//! use sales_ledger_core::{Actor, MemoryStore, OperationContext, SalesLedger};
//! use uuid::Uuid;
//!
//! let storage = MemoryStore::new();
//! let ledger = SalesLedger::new(storage);
//! let ctx = OperationContext::new(Uuid::new_v4(), Actor::new(None));
//! // ledger.create_invoice_with_items(&ctx, ...).await
//! # let _ = (ledger, ctx);
//! ```

pub mod config;
pub mod ledger;
pub mod reconciliation;
pub mod tax;
pub mod traits;
pub mod types;
pub mod utils;

// Re-export commonly used types
pub use config::EngineConfig;
pub use ledger::{
    ConversionOptions, CounterUpdates, DeliveryItemInput, DeliveryNoteWithItems, DocumentManager,
    DocumentUpdate, DocumentWithItems, IntegrityReport, MovementRequest, NewDeliveryNote,
    NewDocument, SalesLedger, StockDiscrepancy, StockManager, StockReconciliationReport,
};
pub use reconciliation::*;
pub use tax::vat::*;
pub use traits::*;
pub use types::*;
pub use utils::memory_storage::MemoryStore;
pub use utils::validation::{
    ConflictSeverity, CounterpartyValidation, StrictDocumentValidator,
};
