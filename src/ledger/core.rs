//! Main ledger orchestrator that coordinates documents, stock and payments

use bigdecimal::BigDecimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::config::EngineConfig;
use crate::ledger::{
    ConversionOptions, DeliveryNoteWithItems, DocumentManager, DocumentUpdate, DocumentWithItems,
    MovementRequest, NewDeliveryNote, NewDocument, StockManager, StockReconciliationReport,
};
use crate::reconciliation::{
    BalanceReconciler, BalanceReconciliationReport, PaymentDeletion, PaymentReconciler,
    PaymentRecord, PaymentRequest,
};
use crate::traits::*;
use crate::types::*;
use crate::utils::validation::{validate_supplier_selection, CounterpartyValidation, StrictDocumentValidator};

/// Main engine that orchestrates all document, stock and payment operations
pub struct SalesLedger<S: LedgerStore> {
    storage: S,
    documents: DocumentManager<S>,
    stock: StockManager<S>,
    payments: PaymentReconciler<S>,
    balances: BalanceReconciler<S>,
    config: EngineConfig,
}

impl<S: LedgerStore + Clone> SalesLedger<S> {
    /// Create a new engine with the given storage backend
    pub fn new(storage: S) -> Self {
        Self::with_config(storage, EngineConfig::default())
    }

    /// Create a new engine; `strict_validation` selects the strict validator
    pub fn with_config(storage: S, config: EngineConfig) -> Self {
        let validator: Box<dyn DocumentValidator> = if config.strict_validation {
            Box::new(StrictDocumentValidator)
        } else {
            Box::new(DefaultDocumentValidator)
        };
        Self::with_validator(storage, config, validator)
    }

    /// Create a new engine with a custom document validator
    pub fn with_validator(
        storage: S,
        config: EngineConfig,
        validator: Box<dyn DocumentValidator>,
    ) -> Self {
        Self {
            documents: DocumentManager::with_validator(storage.clone(), config.clone(), validator),
            stock: StockManager::new(storage.clone()),
            payments: PaymentReconciler::new(storage.clone()),
            balances: BalanceReconciler::new(storage.clone()),
            storage,
            config,
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    // Document operations
    /// Create an invoice; inventory-affecting invoices move stock out
    pub async fn create_invoice_with_items(
        &self,
        ctx: &OperationContext,
        invoice: NewDocument,
    ) -> EngineResult<Outcome<DocumentWithItems>> {
        self.documents
            .create_document_with_items(ctx, DocumentKind::Invoice, invoice)
            .await
    }

    /// Create a quotation
    pub async fn create_quotation_with_items(
        &self,
        ctx: &OperationContext,
        quotation: NewDocument,
    ) -> EngineResult<Outcome<DocumentWithItems>> {
        self.documents
            .create_document_with_items(ctx, DocumentKind::Quotation, quotation)
            .await
    }

    /// Create a proforma invoice
    pub async fn create_proforma_with_items(
        &self,
        ctx: &OperationContext,
        proforma: NewDocument,
    ) -> EngineResult<Outcome<DocumentWithItems>> {
        self.documents
            .create_document_with_items(ctx, DocumentKind::Proforma, proforma)
            .await
    }

    /// Create a purchase order after checking the supplier
    pub async fn create_lpo_with_items(
        &self,
        ctx: &OperationContext,
        lpo: NewDocument,
    ) -> EngineResult<Outcome<DocumentWithItems>> {
        self.documents
            .create_document_with_items(ctx, DocumentKind::Lpo, lpo)
            .await
    }

    /// Replace an invoice's header and items, re-applying its stock effect
    pub async fn update_invoice_with_items(
        &self,
        ctx: &OperationContext,
        invoice_id: Uuid,
        update: DocumentUpdate,
    ) -> EngineResult<Outcome<DocumentWithItems>> {
        self.documents
            .update_document_with_items(ctx, DocumentKind::Invoice, invoice_id, update)
            .await
    }

    /// Replace a quotation, proforma or LPO's header and items
    pub async fn update_document_with_items(
        &self,
        ctx: &OperationContext,
        kind: DocumentKind,
        document_id: Uuid,
        update: DocumentUpdate,
    ) -> EngineResult<Outcome<DocumentWithItems>> {
        self.documents
            .update_document_with_items(ctx, kind, document_id, update)
            .await
    }

    /// Get a document with its items
    pub async fn get_document_with_items(
        &self,
        ctx: &OperationContext,
        kind: DocumentKind,
        document_id: Uuid,
    ) -> EngineResult<DocumentWithItems> {
        self.documents
            .get_document_with_items(ctx, kind, document_id)
            .await
    }

    /// Delete a quotation; requires the delete-quotations capability
    pub async fn delete_quotation(
        &self,
        ctx: &OperationContext,
        quotation_id: Uuid,
    ) -> EngineResult<Outcome<DocumentHeader>> {
        self.documents
            .delete_document(ctx, DocumentKind::Quotation, quotation_id)
            .await
    }

    /// Delete an invoice and reverse its stock; requires the delete-invoices capability
    pub async fn delete_invoice(
        &self,
        ctx: &OperationContext,
        invoice_id: Uuid,
    ) -> EngineResult<Outcome<DocumentHeader>> {
        self.documents
            .delete_document(ctx, DocumentKind::Invoice, invoice_id)
            .await
    }

    // Conversions
    pub async fn convert_quotation_to_invoice(
        &self,
        ctx: &OperationContext,
        quotation_id: Uuid,
        options: ConversionOptions,
    ) -> EngineResult<Outcome<DocumentWithItems>> {
        self.documents
            .convert_quotation_to_invoice(ctx, quotation_id, options)
            .await
    }

    pub async fn convert_quotation_to_proforma(
        &self,
        ctx: &OperationContext,
        quotation_id: Uuid,
        options: ConversionOptions,
    ) -> EngineResult<Outcome<DocumentWithItems>> {
        self.documents
            .convert_quotation_to_proforma(ctx, quotation_id, options)
            .await
    }

    pub async fn convert_proforma_to_invoice(
        &self,
        ctx: &OperationContext,
        proforma_id: Uuid,
        options: ConversionOptions,
    ) -> EngineResult<Outcome<DocumentWithItems>> {
        self.documents
            .convert_proforma_to_invoice(ctx, proforma_id, options)
            .await
    }

    /// Record a delivery against an invoice
    pub async fn create_delivery_note(
        &self,
        ctx: &OperationContext,
        note: NewDeliveryNote,
    ) -> EngineResult<Outcome<DeliveryNoteWithItems>> {
        self.documents.create_delivery_note(ctx, note).await
    }

    /// Get a delivery note with its items
    pub async fn get_delivery_note_with_items(
        &self,
        ctx: &OperationContext,
        delivery_note_id: Uuid,
    ) -> EngineResult<DeliveryNoteWithItems> {
        self.documents
            .get_delivery_note_with_items(ctx, delivery_note_id)
            .await
    }

    /// Check a counterparty before using it as a supplier
    pub async fn validate_supplier_selection(
        &self,
        ctx: &OperationContext,
        supplier_id: Uuid,
    ) -> EngineResult<CounterpartyValidation> {
        validate_supplier_selection(&self.storage, ctx.company_id, supplier_id, &self.config).await
    }

    // Stock operations
    /// Record a manual stock movement
    pub async fn apply_stock_movement(
        &self,
        request: MovementRequest,
    ) -> EngineResult<Outcome<StockMovement>> {
        self.stock.apply_movement(request).await
    }

    /// Receive stock for a product
    pub async fn restock_product(
        &self,
        ctx: &OperationContext,
        product_id: Uuid,
        quantity: BigDecimal,
        cost_per_unit: Option<BigDecimal>,
        notes: Option<String>,
    ) -> EngineResult<Outcome<StockMovement>> {
        self.stock
            .restock_product(ctx.company_id, product_id, quantity, cost_per_unit, notes)
            .await
    }

    pub async fn reconcile_stock_levels(
        &self,
        company_id: Uuid,
        auto_fix: bool,
    ) -> EngineResult<StockReconciliationReport> {
        self.stock.reconcile_stock_levels(company_id, auto_fix).await
    }

    // Payment operations
    /// Record a payment against one invoice
    pub async fn record_payment(
        &self,
        request: PaymentRequest,
    ) -> EngineResult<Outcome<PaymentRecord>> {
        self.payments.record_payment(request).await
    }

    /// Delete a payment after reversing its allocations
    pub async fn delete_payment(&self, payment_id: Uuid) -> EngineResult<PaymentDeletion> {
        self.payments.delete_payment(payment_id).await
    }

    pub async fn reconcile_all_balances(
        &self,
        company_id: Uuid,
        auto_fix: bool,
    ) -> EngineResult<BalanceReconciliationReport> {
        self.balances
            .reconcile_all_balances(company_id, auto_fix)
            .await
    }

    /// Run both consistency sweeps without correcting anything
    pub async fn validate_integrity(&self, company_id: Uuid) -> EngineResult<IntegrityReport> {
        let balances = self.reconcile_all_balances(company_id, false).await?;
        let stock = self.reconcile_stock_levels(company_id, false).await?;

        let mut issues = Vec::new();
        for discrepancy in &balances.discrepancies {
            issues.push(format!(
                "Invoice {} records {} paid but its allocations total {}",
                discrepancy.number, discrepancy.stored_paid_amount, discrepancy.allocated_amount
            ));
        }
        for discrepancy in &stock.discrepancies {
            issues.push(format!(
                "Product {} holds {} in stock but its movements total {}",
                discrepancy.product_name,
                discrepancy.recorded_quantity,
                discrepancy.ledger_quantity
            ));
        }
        issues.extend(balances.errors.iter().map(|err| {
            format!("Invoice {} could not be checked: {}", err.number, err.message)
        }));
        issues.extend(stock.errors.iter().cloned());

        Ok(IntegrityReport {
            company_id,
            is_valid: issues.is_empty(),
            issues,
            invoices_checked: balances.checked,
            products_checked: stock.checked,
        })
    }
}

/// Report on document-to-ledger consistency
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IntegrityReport {
    pub company_id: Uuid,
    pub is_valid: bool,
    pub issues: Vec<String>,
    pub invoices_checked: usize,
    pub products_checked: usize,
}
