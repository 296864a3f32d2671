//! In-memory storage implementation for testing

use async_trait::async_trait;
use bigdecimal::BigDecimal;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use uuid::Uuid;

use crate::traits::*;
use crate::types::*;

#[derive(Debug, Default)]
struct Tables {
    documents: HashMap<Uuid, DocumentHeader>,
    line_items: HashMap<Uuid, Vec<LineItem>>,
    delivery_items: HashMap<Uuid, Vec<DeliveryItem>>,
    products: HashMap<Uuid, Product>,
    movements: Vec<StockMovement>,
    payments: HashMap<Uuid, Payment>,
    allocations: Vec<PaymentAllocation>,
    audit_logs: Vec<AuditLogEntry>,
    users: HashSet<Uuid>,
    sequences: HashMap<(Uuid, DocumentKind), u64>,
}

/// Deployment gaps and failures the store should simulate
#[derive(Debug, Clone)]
struct Faults {
    payment_procedure: bool,
    numbering: bool,
    allocations_table: bool,
    audit_logs_table: bool,
    missing_columns: HashSet<OptionalColumn>,
    failing_stock_products: HashSet<Uuid>,
    fail_invoice_updates: bool,
    fail_line_item_inserts: bool,
    reject_movement_inserts: bool,
    broken_item_column: Option<OptionalColumn>,
}

impl Default for Faults {
    fn default() -> Self {
        Self {
            payment_procedure: true,
            numbering: true,
            allocations_table: true,
            audit_logs_table: true,
            missing_columns: HashSet::new(),
            failing_stock_products: HashSet::new(),
            fail_invoice_updates: false,
            fail_line_item_inserts: false,
            reject_movement_inserts: false,
            broken_item_column: None,
        }
    }
}

/// In-memory store for testing and development
///
/// Enforces the foreign keys the engine relies on (document creator,
/// movement product, allocation payment/invoice) and can simulate missing
/// procedures, tables and columns.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    tables: Arc<RwLock<Tables>>,
    faults: Arc<RwLock<Faults>>,
    calls: Arc<AtomicUsize>,
}

impl MemoryStore {
    /// Create a new memory store instance
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> StoreResult<RwLockReadGuard<'_, Tables>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.tables
            .read()
            .map_err(|_| StoreError::other("memory store lock poisoned"))
    }

    fn write(&self) -> StoreResult<RwLockWriteGuard<'_, Tables>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.tables
            .write()
            .map_err(|_| StoreError::other("memory store lock poisoned"))
    }

    fn faults(&self) -> Faults {
        self.faults
            .read()
            .map(|faults| faults.clone())
            .unwrap_or_default()
    }

    fn update_faults(&self, f: impl FnOnce(&mut Faults)) {
        if let Ok(mut faults) = self.faults.write() {
            f(&mut faults);
        }
    }

    // Seeding and inspection helpers

    /// Register a user that documents may reference as creator
    pub fn register_user(&self, user_id: Uuid) {
        if let Ok(mut tables) = self.tables.write() {
            tables.users.insert(user_id);
        }
    }

    /// Seed a product
    pub fn add_product(&self, product: Product) {
        if let Ok(mut tables) = self.tables.write() {
            tables.products.insert(product.id, product);
        }
    }

    /// Current stock counter of a product
    pub fn product_stock(&self, product_id: Uuid) -> Option<BigDecimal> {
        let tables = self.tables.read().ok()?;
        tables
            .products
            .get(&product_id)
            .map(|product| product.stock_quantity.clone())
    }

    /// All stock movements in insertion order
    pub fn stock_movements(&self) -> Vec<StockMovement> {
        self.tables
            .read()
            .map(|tables| tables.movements.clone())
            .unwrap_or_default()
    }

    /// Header by ID regardless of kind
    pub fn document(&self, document_id: Uuid) -> Option<DocumentHeader> {
        let tables = self.tables.read().ok()?;
        tables.documents.get(&document_id).cloned()
    }

    /// Line items stored for a document
    pub fn line_items(&self, document_id: Uuid) -> Vec<LineItem> {
        self.tables
            .read()
            .ok()
            .and_then(|tables| tables.line_items.get(&document_id).cloned())
            .unwrap_or_default()
    }

    /// All payment allocations
    pub fn allocations(&self) -> Vec<PaymentAllocation> {
        self.tables
            .read()
            .map(|tables| tables.allocations.clone())
            .unwrap_or_default()
    }

    /// All payments
    pub fn payments(&self) -> Vec<Payment> {
        self.tables
            .read()
            .map(|tables| tables.payments.values().cloned().collect())
            .unwrap_or_default()
    }

    /// All audit-log rows
    pub fn audit_logs(&self) -> Vec<AuditLogEntry> {
        self.tables
            .read()
            .map(|tables| tables.audit_logs.clone())
            .unwrap_or_default()
    }

    /// Number of store statements issued so far
    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    // Fault injection

    /// Toggle the `record_payment_with_allocation` procedure
    pub fn set_payment_procedure_available(&self, available: bool) {
        self.update_faults(|faults| faults.payment_procedure = available);
    }

    /// Toggle the document number generator
    pub fn set_numbering_available(&self, available: bool) {
        self.update_faults(|faults| faults.numbering = available);
    }

    /// Toggle presence of the `payment_allocations` table
    pub fn set_allocations_table(&self, present: bool) {
        self.update_faults(|faults| faults.allocations_table = present);
    }

    /// Toggle presence of the `audit_logs` table
    pub fn set_audit_logs_table(&self, present: bool) {
        self.update_faults(|faults| faults.audit_logs_table = present);
    }

    /// Simulate an item column that does not exist in this deployment
    pub fn drop_column(&self, column: OptionalColumn) {
        self.update_faults(|faults| {
            faults.missing_columns.insert(column);
        });
    }

    /// Make stock counter updates fail for a product
    pub fn fail_stock_updates_for(&self, product_id: Uuid) {
        self.update_faults(|faults| {
            faults.failing_stock_products.insert(product_id);
        });
    }

    /// Make every invoice header update fail
    pub fn set_fail_invoice_updates(&self, fail: bool) {
        self.update_faults(|faults| faults.fail_invoice_updates = fail);
    }

    /// Make every line-item insert fail
    pub fn set_fail_line_item_inserts(&self, fail: bool) {
        self.update_faults(|faults| faults.fail_line_item_inserts = fail);
    }

    /// Report `column` as missing on every item insert, with or without the field set
    pub fn break_item_column(&self, column: Option<OptionalColumn>) {
        self.update_faults(|faults| faults.broken_item_column = column);
    }

    /// Reject stock movement inserts with a check constraint violation
    pub fn set_reject_movement_inserts(&self, reject: bool) {
        self.update_faults(|faults| faults.reject_movement_inserts = reject);
    }
}

fn missing_table(table: &str) -> StoreError {
    StoreError::new(
        StoreErrorCode::UndefinedTable {
            table: table.to_string(),
        },
        format!("relation \"{}\" does not exist", table),
    )
}

fn undefined_column(column: OptionalColumn, kind: DocumentKind) -> StoreError {
    StoreError::new(
        StoreErrorCode::UndefinedColumn {
            column: column.column_name().to_string(),
        },
        format!(
            "column \"{}\" of relation \"{}\" does not exist",
            column.column_name(),
            kind.items_table()
        ),
    )
}

fn foreign_key(column: &str, message: impl Into<String>) -> StoreError {
    StoreError::new(
        StoreErrorCode::ForeignKeyViolation {
            column: column.to_string(),
        },
        message,
    )
}

#[async_trait]
impl LedgerStore for MemoryStore {
    async fn insert_document(&self, document: &DocumentHeader) -> StoreResult<DocumentHeader> {
        let mut tables = self.write()?;

        if let Some(creator) = document.created_by {
            if !tables.users.contains(&creator) {
                return Err(foreign_key(
                    "created_by",
                    format!(
                        "insert or update on table \"{}\" violates foreign key constraint on created_by",
                        document.kind.table()
                    ),
                )
                .with_hint(format!("Key (created_by)=({}) is not present in table \"users\"", creator)));
            }
        }

        let duplicate = tables.documents.values().any(|existing| {
            existing.kind == document.kind
                && existing.company_id == document.company_id
                && existing.number == document.number
        });
        if duplicate {
            return Err(StoreError::new(
                StoreErrorCode::UniqueViolation {
                    constraint: format!("{}_company_id_number_key", document.kind.table()),
                },
                format!("duplicate {} number {}", document.kind, document.number),
            ));
        }

        tables.documents.insert(document.id, document.clone());
        Ok(document.clone())
    }

    async fn get_document(
        &self,
        kind: DocumentKind,
        document_id: Uuid,
    ) -> StoreResult<Option<DocumentHeader>> {
        Ok(self
            .read()?
            .documents
            .get(&document_id)
            .filter(|document| document.kind == kind)
            .cloned())
    }

    async fn list_documents(
        &self,
        kind: DocumentKind,
        company_id: Uuid,
    ) -> StoreResult<Vec<DocumentHeader>> {
        let tables = self.read()?;
        let mut documents: Vec<DocumentHeader> = tables
            .documents
            .values()
            .filter(|document| document.kind == kind && document.company_id == company_id)
            .cloned()
            .collect();
        documents.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.number.cmp(&b.number)));
        Ok(documents)
    }

    async fn update_document(&self, document: &DocumentHeader) -> StoreResult<DocumentHeader> {
        if document.kind == DocumentKind::Invoice && self.faults().fail_invoice_updates {
            return Err(StoreError::other("canceling statement due to statement timeout"));
        }

        let mut tables = self.write()?;
        match tables.documents.get_mut(&document.id) {
            Some(existing) if existing.kind == document.kind => {
                *existing = document.clone();
                Ok(document.clone())
            }
            _ => Err(StoreError::not_found(format!(
                "{} {} not found",
                document.kind, document.id
            ))),
        }
    }

    async fn delete_document(&self, kind: DocumentKind, document_id: Uuid) -> StoreResult<()> {
        let mut tables = self.write()?;
        match tables.documents.get(&document_id) {
            Some(existing) if existing.kind == kind => {
                tables.documents.remove(&document_id);
                Ok(())
            }
            _ => Err(StoreError::not_found(format!(
                "{} {} not found",
                kind, document_id
            ))),
        }
    }

    async fn count_counterparty_documents(
        &self,
        kind: DocumentKind,
        company_id: Uuid,
        counterparty_id: Uuid,
    ) -> StoreResult<usize> {
        Ok(self
            .read()?
            .documents
            .values()
            .filter(|document| {
                document.kind == kind
                    && document.company_id == company_id
                    && document.counterparty_id == counterparty_id
            })
            .count())
    }

    async fn insert_line_items(
        &self,
        kind: DocumentKind,
        items: &[LineItem],
    ) -> StoreResult<Vec<LineItem>> {
        let faults = self.faults();
        if faults.fail_line_item_inserts {
            return Err(StoreError::other(format!(
                "could not insert into \"{}\"",
                kind.items_table()
            )));
        }

        if let Some(column) = faults.broken_item_column {
            return Err(undefined_column(column, kind));
        }

        for item in items {
            if let Some(column) = faults
                .missing_columns
                .iter()
                .find(|column| item.extras.has(**column))
            {
                return Err(undefined_column(*column, kind));
            }
        }

        let mut tables = self.write()?;
        for item in items {
            if !tables.documents.contains_key(&item.document_id) {
                return Err(foreign_key(
                    "document_id",
                    format!("{} {} does not exist", kind, item.document_id),
                ));
            }
        }
        for item in items {
            tables
                .line_items
                .entry(item.document_id)
                .or_default()
                .push(item.clone());
        }
        Ok(items.to_vec())
    }

    async fn list_line_items(
        &self,
        _kind: DocumentKind,
        document_id: Uuid,
    ) -> StoreResult<Vec<LineItem>> {
        let mut items = self
            .read()?
            .line_items
            .get(&document_id)
            .cloned()
            .unwrap_or_default();
        items.sort_by_key(|item| item.sort_order);
        Ok(items)
    }

    async fn delete_line_items(&self, _kind: DocumentKind, document_id: Uuid) -> StoreResult<()> {
        self.write()?.line_items.remove(&document_id);
        Ok(())
    }

    async fn insert_delivery_items(&self, items: &[DeliveryItem]) -> StoreResult<Vec<DeliveryItem>> {
        let mut tables = self.write()?;
        for item in items {
            tables
                .delivery_items
                .entry(item.delivery_note_id)
                .or_default()
                .push(item.clone());
        }
        Ok(items.to_vec())
    }

    async fn list_delivery_items(&self, delivery_note_id: Uuid) -> StoreResult<Vec<DeliveryItem>> {
        Ok(self
            .read()?
            .delivery_items
            .get(&delivery_note_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn get_product(&self, product_id: Uuid) -> StoreResult<Option<Product>> {
        Ok(self.read()?.products.get(&product_id).cloned())
    }

    async fn list_products(&self, company_id: Uuid) -> StoreResult<Vec<Product>> {
        Ok(self
            .read()?
            .products
            .values()
            .filter(|product| product.company_id == company_id)
            .cloned()
            .collect())
    }

    async fn set_product_stock(&self, product_id: Uuid, quantity: &BigDecimal) -> StoreResult<()> {
        let mut tables = self.write()?;
        let product = tables
            .products
            .get_mut(&product_id)
            .ok_or_else(|| StoreError::not_found(format!("product {} not found", product_id)))?;
        product.stock_quantity = quantity.clone();
        Ok(())
    }

    async fn update_product_stock(
        &self,
        product_id: Uuid,
        direction: StockDirection,
        magnitude: &BigDecimal,
    ) -> StoreResult<BigDecimal> {
        if self.faults().failing_stock_products.contains(&product_id) {
            return Err(StoreError::other(format!(
                "update_product_stock failed for product {}",
                product_id
            ))
            .with_hint("row is locked by another transaction"));
        }

        let mut tables = self.write()?;
        let product = tables
            .products
            .get_mut(&product_id)
            .ok_or_else(|| StoreError::not_found(format!("product {} not found", product_id)))?;
        match direction {
            StockDirection::Increase => product.stock_quantity += magnitude.abs(),
            StockDirection::Decrease => product.stock_quantity -= magnitude.abs(),
        }
        Ok(product.stock_quantity.clone())
    }

    async fn insert_stock_movements(
        &self,
        movements: &[StockMovement],
    ) -> StoreResult<Vec<StockMovement>> {
        if self.faults().reject_movement_inserts {
            return Err(StoreError::new(
                StoreErrorCode::CheckViolation {
                    constraint: "stock_movements_quantity_check".to_string(),
                },
                "new row for relation \"stock_movements\" violates check constraint",
            ));
        }

        let mut tables = self.write()?;
        for movement in movements {
            if !tables.products.contains_key(&movement.product_id) {
                return Err(foreign_key(
                    "product_id",
                    format!(
                        "insert on table \"stock_movements\" violates foreign key: product {} does not exist",
                        movement.product_id
                    ),
                ));
            }
        }
        tables.movements.extend(movements.iter().cloned());
        Ok(movements.to_vec())
    }

    async fn list_stock_movements(
        &self,
        filter: &MovementFilter,
    ) -> StoreResult<Vec<StockMovement>> {
        Ok(self
            .read()?
            .movements
            .iter()
            .filter(|movement| filter.matches(movement))
            .cloned()
            .collect())
    }

    async fn record_payment_with_allocation(
        &self,
        payment: &Payment,
        invoice_id: Uuid,
    ) -> StoreResult<(Payment, PaymentAllocation)> {
        if !self.faults().payment_procedure {
            return Err(StoreError::new(
                StoreErrorCode::ProcedureNotFound {
                    procedure: "record_payment_with_allocation".to_string(),
                },
                "function record_payment_with_allocation does not exist",
            ));
        }

        let mut tables = self.write()?;
        let invoice = tables
            .documents
            .get_mut(&invoice_id)
            .filter(|document| document.kind == DocumentKind::Invoice)
            .ok_or_else(|| StoreError::not_found(format!("invoice {} not found", invoice_id)))?;

        let paid = &invoice.paid_amount + &payment.amount;
        invoice.set_paid_amount(paid);

        let allocation = PaymentAllocation::new(payment.id, invoice_id, payment.amount.clone());
        tables.payments.insert(payment.id, payment.clone());
        tables.allocations.push(allocation.clone());
        Ok((payment.clone(), allocation))
    }

    async fn insert_payment(&self, payment: &Payment) -> StoreResult<Payment> {
        self.write()?.payments.insert(payment.id, payment.clone());
        Ok(payment.clone())
    }

    async fn get_payment(&self, payment_id: Uuid) -> StoreResult<Option<Payment>> {
        Ok(self.read()?.payments.get(&payment_id).cloned())
    }

    async fn delete_payment(&self, payment_id: Uuid) -> StoreResult<()> {
        let mut tables = self.write()?;
        if tables
            .allocations
            .iter()
            .any(|allocation| allocation.payment_id == payment_id)
        {
            return Err(foreign_key(
                "payment_id",
                format!("payment {} is still referenced by allocations", payment_id),
            ));
        }
        tables
            .payments
            .remove(&payment_id)
            .map(|_| ())
            .ok_or_else(|| StoreError::not_found(format!("payment {} not found", payment_id)))
    }

    async fn insert_allocation(
        &self,
        allocation: &PaymentAllocation,
    ) -> StoreResult<PaymentAllocation> {
        if !self.faults().allocations_table {
            return Err(missing_table("payment_allocations"));
        }

        let mut tables = self.write()?;
        if !tables.payments.contains_key(&allocation.payment_id) {
            return Err(foreign_key("payment_id", "payment does not exist"));
        }
        if !tables.documents.contains_key(&allocation.invoice_id) {
            return Err(foreign_key("invoice_id", "invoice does not exist"));
        }
        tables.allocations.push(allocation.clone());
        Ok(allocation.clone())
    }

    async fn list_payment_allocations(
        &self,
        payment_id: Uuid,
    ) -> StoreResult<Vec<PaymentAllocation>> {
        if !self.faults().allocations_table {
            return Err(missing_table("payment_allocations"));
        }
        Ok(self
            .read()?
            .allocations
            .iter()
            .filter(|allocation| allocation.payment_id == payment_id)
            .cloned()
            .collect())
    }

    async fn list_invoice_allocations(
        &self,
        invoice_id: Uuid,
    ) -> StoreResult<Vec<PaymentAllocation>> {
        if !self.faults().allocations_table {
            return Err(missing_table("payment_allocations"));
        }
        Ok(self
            .read()?
            .allocations
            .iter()
            .filter(|allocation| allocation.invoice_id == invoice_id)
            .cloned()
            .collect())
    }

    async fn delete_allocation(&self, allocation_id: Uuid) -> StoreResult<()> {
        let mut tables = self.write()?;
        let before = tables.allocations.len();
        tables
            .allocations
            .retain(|allocation| allocation.id != allocation_id);
        if tables.allocations.len() == before {
            return Err(StoreError::not_found(format!(
                "allocation {} not found",
                allocation_id
            )));
        }
        Ok(())
    }

    async fn generate_document_number(
        &self,
        company_id: Uuid,
        kind: DocumentKind,
    ) -> StoreResult<String> {
        if !self.faults().numbering {
            let procedure = format!("generate_{}_number", kind.table().trim_end_matches('s'));
            return Err(StoreError::new(
                StoreErrorCode::ProcedureNotFound {
                    procedure: procedure.clone(),
                },
                format!("function {} does not exist", procedure),
            ));
        }

        let mut tables = self.write()?;
        let sequence = tables.sequences.entry((company_id, kind)).or_insert(0);
        *sequence += 1;
        Ok(format!("{}-{:04}", kind.number_prefix(), sequence))
    }

    async fn insert_audit_log(&self, entry: &AuditLogEntry) -> StoreResult<()> {
        if !self.faults().audit_logs_table {
            return Err(missing_table("audit_logs"));
        }
        self.write()?.audit_logs.push(entry.clone());
        Ok(())
    }
}
