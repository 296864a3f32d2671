//! Traits for storage abstraction and extensibility

use async_trait::async_trait;
use bigdecimal::BigDecimal;
use uuid::Uuid;

use crate::types::*;
use crate::utils::validation::validate_percentage;

/// Storage abstraction for the document and ledger tables
///
/// Each method is a single statement against the store. Methods documented
/// as procedures are server-side routines that may be missing from a
/// deployment, reported as `StoreErrorCode::ProcedureNotFound`.
#[async_trait]
pub trait LedgerStore: Send + Sync {
    /// Insert a document header, returning the persisted row
    async fn insert_document(&self, document: &DocumentHeader) -> StoreResult<DocumentHeader>;

    /// Get a document header by kind and ID
    async fn get_document(
        &self,
        kind: DocumentKind,
        document_id: Uuid,
    ) -> StoreResult<Option<DocumentHeader>>;

    /// List all documents of a kind for a company
    async fn list_documents(
        &self,
        kind: DocumentKind,
        company_id: Uuid,
    ) -> StoreResult<Vec<DocumentHeader>>;

    /// Overwrite a document header
    async fn update_document(&self, document: &DocumentHeader) -> StoreResult<DocumentHeader>;

    /// Delete a document header
    async fn delete_document(&self, kind: DocumentKind, document_id: Uuid) -> StoreResult<()>;

    /// Count documents of a kind raised against a counterparty
    async fn count_counterparty_documents(
        &self,
        kind: DocumentKind,
        company_id: Uuid,
        counterparty_id: Uuid,
    ) -> StoreResult<usize>;

    /// Insert line items for a document
    async fn insert_line_items(
        &self,
        kind: DocumentKind,
        items: &[LineItem],
    ) -> StoreResult<Vec<LineItem>>;

    /// List a document's line items ordered by `sort_order`
    async fn list_line_items(
        &self,
        kind: DocumentKind,
        document_id: Uuid,
    ) -> StoreResult<Vec<LineItem>>;

    /// Delete every line item of a document
    async fn delete_line_items(&self, kind: DocumentKind, document_id: Uuid) -> StoreResult<()>;

    /// Insert delivery-note rows
    async fn insert_delivery_items(&self, items: &[DeliveryItem]) -> StoreResult<Vec<DeliveryItem>>;

    /// List a delivery note's rows
    async fn list_delivery_items(&self, delivery_note_id: Uuid) -> StoreResult<Vec<DeliveryItem>>;

    /// Get a product by ID
    async fn get_product(&self, product_id: Uuid) -> StoreResult<Option<Product>>;

    /// List all products of a company
    async fn list_products(&self, company_id: Uuid) -> StoreResult<Vec<Product>>;

    /// Overwrite a product's stock counter
    async fn set_product_stock(&self, product_id: Uuid, quantity: &BigDecimal) -> StoreResult<()>;

    /// Procedure `update_product_stock`: move a product's counter by a
    /// non-negative `magnitude`, returning the new quantity
    async fn update_product_stock(
        &self,
        product_id: Uuid,
        direction: StockDirection,
        magnitude: &BigDecimal,
    ) -> StoreResult<BigDecimal>;

    /// Append stock movements
    async fn insert_stock_movements(
        &self,
        movements: &[StockMovement],
    ) -> StoreResult<Vec<StockMovement>>;

    /// List stock movements matching a filter, oldest first
    async fn list_stock_movements(&self, filter: &MovementFilter)
        -> StoreResult<Vec<StockMovement>>;

    /// Procedure `record_payment_with_allocation`: insert the payment and its
    /// allocation and update the invoice in one transaction
    async fn record_payment_with_allocation(
        &self,
        payment: &Payment,
        invoice_id: Uuid,
    ) -> StoreResult<(Payment, PaymentAllocation)>;

    /// Insert a payment
    async fn insert_payment(&self, payment: &Payment) -> StoreResult<Payment>;

    /// Get a payment by ID
    async fn get_payment(&self, payment_id: Uuid) -> StoreResult<Option<Payment>>;

    /// Delete a payment
    async fn delete_payment(&self, payment_id: Uuid) -> StoreResult<()>;

    /// Insert a payment allocation
    async fn insert_allocation(
        &self,
        allocation: &PaymentAllocation,
    ) -> StoreResult<PaymentAllocation>;

    /// List allocations of a payment
    async fn list_payment_allocations(&self, payment_id: Uuid)
        -> StoreResult<Vec<PaymentAllocation>>;

    /// List allocations applied to an invoice
    async fn list_invoice_allocations(&self, invoice_id: Uuid)
        -> StoreResult<Vec<PaymentAllocation>>;

    /// Delete an allocation
    async fn delete_allocation(&self, allocation_id: Uuid) -> StoreResult<()>;

    /// Procedure `generate_<type>_number`: next sequential number for a
    /// company and document type
    async fn generate_document_number(
        &self,
        company_id: Uuid,
        kind: DocumentKind,
    ) -> StoreResult<String>;

    /// Append an audit-log row
    async fn insert_audit_log(&self, entry: &AuditLogEntry) -> StoreResult<()>;
}

/// Trait for implementing custom document validation rules
pub trait DocumentValidator: Send + Sync {
    /// Validate a header before it is written
    fn validate_header(&self, header: &DocumentHeader) -> EngineResult<()>;

    /// Validate caller-supplied line items before any write
    fn validate_items(&self, items: &[LineItemInput]) -> EngineResult<()>;
}

/// Default document validator with the rules every write must satisfy
pub struct DefaultDocumentValidator;

impl DocumentValidator for DefaultDocumentValidator {
    fn validate_header(&self, header: &DocumentHeader) -> EngineResult<()> {
        if header.counterparty_id.is_nil() {
            return Err(EngineError::Validation(format!(
                "A {} requires a {}",
                header.kind,
                match header.kind.counterparty_role() {
                    CounterpartyRole::Customer => "customer",
                    CounterpartyRole::Supplier => "supplier",
                }
            )));
        }

        if header.number.trim().is_empty() {
            return Err(EngineError::Validation(format!(
                "{} number cannot be empty",
                header.kind
            )));
        }

        if !header.kind.allows_status(header.status) {
            return Err(EngineError::Validation(format!(
                "Status {:?} is not valid for a {}",
                header.status, header.kind
            )));
        }

        if !header.totals_consistent() {
            return Err(EngineError::Validation(format!(
                "Totals do not add up: {} + {} != {}",
                header.subtotal, header.tax_amount, header.total_amount
            )));
        }

        Ok(())
    }

    fn validate_items(&self, items: &[LineItemInput]) -> EngineResult<()> {
        // percentages only; quantities and prices are left to the strict validator
        for (index, item) in items.iter().enumerate() {
            let position = index + 1;
            validate_percentage(
                &item.tax_percentage,
                &format!("Tax percentage on line {}", position),
            )?;
            validate_percentage(
                &item.discount_percentage,
                &format!("Discount percentage on line {}", position),
            )?;
        }
        Ok(())
    }
}
