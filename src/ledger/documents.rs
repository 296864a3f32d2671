//! Document lifecycle: creation, update and deletion with line items

use chrono::NaiveDate;
use serde::Serialize;
use std::collections::BTreeSet;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::config::EngineConfig;
use crate::ledger::stock::{degrade_ledger_failure, CounterUpdates, StockManager};
use crate::tax::{price_line_items, DocumentTotals};
use crate::traits::*;
use crate::types::*;
use crate::utils::numbering::NumberingService;
use crate::utils::validation::{validate_supplier_selection, ConflictSeverity};

/// Header fields and items for a new quotation, invoice, proforma or LPO
#[derive(Debug, Clone, PartialEq)]
pub struct NewDocument {
    /// Customer, or supplier for purchase orders
    pub counterparty_id: Option<Uuid>,
    /// Generated when absent
    pub number: Option<String>,
    pub date: NaiveDate,
    pub valid_until: Option<NaiveDate>,
    pub due_date: Option<NaiveDate>,
    pub delivery_date: Option<NaiveDate>,
    /// Defaults to draft
    pub status: Option<DocumentStatus>,
    /// Invoices only; `None` takes the configured default
    pub affects_inventory: Option<bool>,
    pub notes: Option<String>,
    pub terms: Option<String>,
    pub items: Vec<LineItemInput>,
}

impl NewDocument {
    /// Draft document for a counterparty with the given items
    pub fn new(counterparty_id: Uuid, date: NaiveDate, items: Vec<LineItemInput>) -> Self {
        Self {
            counterparty_id: Some(counterparty_id),
            number: None,
            date,
            valid_until: None,
            due_date: None,
            delivery_date: None,
            status: None,
            affects_inventory: None,
            notes: None,
            terms: None,
            items,
        }
    }
}

/// Replacement values for an existing document; items are replaced wholesale.
///
/// `None` keeps the stored value. For the optional header fields
/// `Some(None)` clears it.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DocumentUpdate {
    pub date: Option<NaiveDate>,
    pub valid_until: Option<Option<NaiveDate>>,
    pub due_date: Option<Option<NaiveDate>>,
    pub delivery_date: Option<Option<NaiveDate>>,
    pub status: Option<DocumentStatus>,
    pub notes: Option<Option<String>>,
    pub terms: Option<Option<String>>,
    pub items: Vec<LineItemInput>,
}

impl DocumentUpdate {
    /// Update that only replaces the items
    pub fn items(items: Vec<LineItemInput>) -> Self {
        Self {
            items,
            ..Self::default()
        }
    }
}

/// Persisted header with its line items
#[derive(Debug, Clone, PartialEq)]
pub struct DocumentWithItems {
    pub header: DocumentHeader,
    pub items: Vec<LineItem>,
}

#[derive(Serialize)]
struct DocumentSnapshot<'a> {
    header: &'a DocumentHeader,
    items: &'a [LineItem],
}

/// Wrap a failure that happened after the header was persisted
pub(crate) fn incomplete(header: &DocumentHeader, stage: &'static str, err: EngineError) -> EngineError {
    tracing::error!(
        document_id = %header.id,
        number = %header.number,
        error = %err,
        "{} saved but {} failed",
        header.kind,
        stage
    );
    EngineError::IncompleteWrite {
        kind: header.kind,
        document_id: header.id,
        number: header.number.clone(),
        stage,
        source: Box::new(err),
    }
}

fn ensure_editable_kind(kind: DocumentKind) -> EngineResult<()> {
    match kind {
        DocumentKind::Quotation | DocumentKind::Invoice | DocumentKind::Proforma | DocumentKind::Lpo => {
            Ok(())
        }
        other => Err(EngineError::Validation(format!(
            "A {} cannot be created or edited with line items",
            other
        ))),
    }
}

/// Statuses a caller may set directly; the rest are reached through
/// conversion or payments
fn ensure_requested_status(kind: DocumentKind, status: DocumentStatus) -> EngineResult<()> {
    let derived = match (kind, status) {
        (_, DocumentStatus::Converted) => true,
        (DocumentKind::Invoice, DocumentStatus::Partial)
        | (DocumentKind::Invoice, DocumentStatus::Paid)
        | (DocumentKind::Invoice, DocumentStatus::Overdue) => true,
        _ => false,
    };
    if derived {
        return Err(EngineError::Validation(format!(
            "Status {:?} of a {} cannot be set directly",
            status, kind
        )));
    }
    Ok(())
}

/// Document manager for sales and purchasing documents
pub struct DocumentManager<S: LedgerStore> {
    pub(crate) storage: S,
    pub(crate) stock: StockManager<S>,
    pub(crate) numbering: NumberingService<S>,
    pub(crate) validator: Box<dyn DocumentValidator>,
    pub(crate) config: EngineConfig,
}

impl<S: LedgerStore + Clone> DocumentManager<S> {
    /// Create a new document manager
    pub fn new(storage: S, config: EngineConfig) -> Self {
        Self::with_validator(storage, config, Box::new(DefaultDocumentValidator))
    }

    /// Create a new document manager with a custom validator
    pub fn with_validator(
        storage: S,
        config: EngineConfig,
        validator: Box<dyn DocumentValidator>,
    ) -> Self {
        Self {
            stock: StockManager::new(storage.clone()),
            numbering: NumberingService::new(storage.clone(), config.numbering_fallback),
            storage,
            validator,
            config,
        }
    }

    /// Get a document of the operating company with its items
    pub async fn get_document_with_items(
        &self,
        ctx: &OperationContext,
        kind: DocumentKind,
        document_id: Uuid,
    ) -> EngineResult<DocumentWithItems> {
        let header = self.get_required(ctx, kind, document_id).await?;
        let items = self.storage.list_line_items(kind, document_id).await?;
        Ok(DocumentWithItems { header, items })
    }

    pub(crate) async fn get_required(
        &self,
        ctx: &OperationContext,
        kind: DocumentKind,
        document_id: Uuid,
    ) -> EngineResult<DocumentHeader> {
        self.storage
            .get_document(kind, document_id)
            .await?
            .filter(|header| header.company_id == ctx.company_id)
            .ok_or_else(|| EngineError::not_found(kind.label(), document_id))
    }

    /// Create a document and its items.
    ///
    /// Invoices that affect inventory also get OUT movements for every
    /// product line; movement and counter failures come back as warnings
    /// unless a ledger constraint was violated.
    #[instrument(skip(self, ctx, document), fields(company_id = %ctx.company_id, items = document.items.len()))]
    pub async fn create_document_with_items(
        &self,
        ctx: &OperationContext,
        kind: DocumentKind,
        document: NewDocument,
    ) -> EngineResult<Outcome<DocumentWithItems>> {
        ensure_editable_kind(kind)?;
        if let Some(status) = document.status {
            ensure_requested_status(kind, status)?;
        }

        let counterparty_id = document
            .counterparty_id
            .filter(|id| !id.is_nil())
            .ok_or_else(|| {
                EngineError::Validation(format!(
                    "A {} requires a {}",
                    kind,
                    match kind.counterparty_role() {
                        CounterpartyRole::Customer => "customer",
                        CounterpartyRole::Supplier => "supplier",
                    }
                ))
            })?;

        self.validator.validate_items(&document.items)?;
        self.ensure_known_products(ctx.company_id, &document.items)
            .await?;

        let mut warnings = Vec::new();
        if kind == DocumentKind::Lpo {
            self.check_supplier(ctx.company_id, counterparty_id, &mut warnings)
                .await?;
        }

        let number = self
            .assign_number(ctx.company_id, kind, document.number, &mut warnings)
            .await?;

        let mut header =
            DocumentHeader::new(kind, ctx.company_id, counterparty_id, number, document.date);
        header.valid_until = document.valid_until;
        header.due_date = document.due_date;
        header.delivery_date = document.delivery_date;
        header.status = document.status.unwrap_or(DocumentStatus::Draft);
        header.notes = document.notes;
        header.terms = document.terms;
        header.created_by = ctx.actor.id;
        header.affects_inventory = kind == DocumentKind::Invoice
            && document
                .affects_inventory
                .unwrap_or(self.config.default_affects_inventory);

        let items = price_line_items(header.id, &document.items);
        DocumentTotals::from_items(&items).apply_to(&mut header);
        if kind == DocumentKind::Invoice {
            header.balance_due = header.total_amount.clone();
        }
        self.validator.validate_header(&header)?;

        let header = self.insert_header(header, &mut warnings).await?;
        let items = self
            .insert_items(kind, items, &mut warnings)
            .await
            .map_err(|err| incomplete(&header, "line item insert", err))?;

        if header.kind == DocumentKind::Invoice && header.affects_inventory {
            let stock_warnings = self
                .post_invoice_stock(&header, &items)
                .await
                .map_err(|err| incomplete(&header, "stock ledger write", err))?;
            warnings.extend(stock_warnings);
        }

        info!(
            document_id = %header.id,
            number = %header.number,
            total = %header.total_amount,
            warnings = warnings.len(),
            "{} created",
            kind
        );
        Ok(Outcome::with_warnings(
            DocumentWithItems { header, items },
            warnings,
        ))
    }

    /// Replace a document's header fields and all of its items.
    ///
    /// Item identity does not survive: the old rows are deleted and new ones
    /// inserted. For inventory-affecting invoices the outstanding movements
    /// are reversed before the new OUT movements are applied.
    #[instrument(skip(self, ctx, update), fields(company_id = %ctx.company_id, items = update.items.len()))]
    pub async fn update_document_with_items(
        &self,
        ctx: &OperationContext,
        kind: DocumentKind,
        document_id: Uuid,
        update: DocumentUpdate,
    ) -> EngineResult<Outcome<DocumentWithItems>> {
        ensure_editable_kind(kind)?;
        let existing = self.get_required(ctx, kind, document_id).await?;
        if existing.status == DocumentStatus::Converted {
            return Err(EngineError::Validation(format!(
                "{} {} has been converted and can no longer be edited",
                kind, existing.number
            )));
        }

        if let Some(status) = update.status {
            ensure_requested_status(kind, status)?;
        }
        self.validator.validate_items(&update.items)?;
        self.ensure_known_products(ctx.company_id, &update.items)
            .await?;

        let mut header = existing.clone();
        if let Some(date) = update.date {
            header.date = date;
        }
        if let Some(valid_until) = update.valid_until {
            header.valid_until = valid_until;
        }
        if let Some(due_date) = update.due_date {
            header.due_date = due_date;
        }
        if let Some(delivery_date) = update.delivery_date {
            header.delivery_date = delivery_date;
        }
        if let Some(notes) = update.notes {
            header.notes = notes;
        }
        if let Some(terms) = update.terms {
            header.terms = terms;
        }
        if let Some(status) = update.status {
            header.status = status;
        }
        header.updated_at = chrono::Utc::now().naive_utc();

        let items = price_line_items(header.id, &update.items);
        DocumentTotals::from_items(&items).apply_to(&mut header);
        if kind == DocumentKind::Invoice {
            header.balance_due = &header.total_amount - &header.paid_amount;
            if header.paid_amount != zero() {
                header.status =
                    DocumentStatus::from_balances(&header.paid_amount, &header.balance_due);
            }
        }
        self.validator.validate_header(&header)?;

        let mut warnings = Vec::new();
        let header = self.storage.update_document(&header).await?;

        self.storage
            .delete_line_items(kind, document_id)
            .await
            .map_err(|err| incomplete(&header, "line item replacement", err.into()))?;
        let items = self
            .insert_items(kind, items, &mut warnings)
            .await
            .map_err(|err| incomplete(&header, "line item replacement", err))?;

        if kind == DocumentKind::Invoice && existing.affects_inventory {
            let reversal = self
                .stock
                .reverse_document_movements(
                    ctx.company_id,
                    ReferenceType::Invoice,
                    document_id,
                    &existing.number,
                )
                .await;

            match reversal {
                Ok(outcome) => {
                    warnings.extend(outcome.warnings);
                    let stock_warnings = self
                        .post_invoice_stock(&header, &items)
                        .await
                        .map_err(|err| incomplete(&header, "stock ledger write", err))?;
                    warnings.extend(stock_warnings);
                }
                Err(err) => {
                    // no re-apply without a reversal
                    let warning = degrade_ledger_failure(err, document_id, "invoice stock reversal")
                        .map_err(|err| incomplete(&header, "stock reversal", err))?;
                    warnings.push(warning);
                    warnings.push(Warning::new(
                        WarningKind::StockMovementFailed,
                        format!(
                            "Stock for {} was not re-applied because the previous movements could not be reversed",
                            header.number
                        ),
                    ));
                }
            }
        }

        info!(
            document_id = %header.id,
            number = %header.number,
            total = %header.total_amount,
            warnings = warnings.len(),
            "{} updated",
            kind
        );
        Ok(Outcome::with_warnings(
            DocumentWithItems { header, items },
            warnings,
        ))
    }

    /// Delete a quotation or invoice with its items.
    ///
    /// The actor must hold the matching delete capability. An audit snapshot
    /// is written first on a best-effort basis, and invoice stock movements
    /// are reversed.
    #[instrument(skip(self, ctx), fields(company_id = %ctx.company_id))]
    pub async fn delete_document(
        &self,
        ctx: &OperationContext,
        kind: DocumentKind,
        document_id: Uuid,
    ) -> EngineResult<Outcome<DocumentHeader>> {
        let capability = match kind {
            DocumentKind::Quotation => Capability::DeleteQuotations,
            DocumentKind::Invoice => Capability::DeleteInvoices,
            other => {
                return Err(EngineError::Validation(format!(
                    "Deleting a {} is not supported",
                    other
                )))
            }
        };
        if !ctx.actor.can(capability) {
            return Err(EngineError::PermissionDenied(format!(
                "You do not have permission to delete this {}",
                kind
            )));
        }

        let header = self.get_required(ctx, kind, document_id).await?;
        let mut warnings = Vec::new();
        self.write_audit_snapshot(ctx, &header, &mut warnings).await;

        if kind == DocumentKind::Invoice && header.affects_inventory {
            match self
                .stock
                .reverse_document_movements(
                    ctx.company_id,
                    ReferenceType::Invoice,
                    document_id,
                    &header.number,
                )
                .await
            {
                Ok(outcome) => warnings.extend(outcome.warnings),
                Err(err) => warnings.push(degrade_ledger_failure(
                    err,
                    document_id,
                    "invoice deletion",
                )?),
            }
        }

        if let Err(err) = self.storage.delete_line_items(kind, document_id).await {
            warn!(%document_id, table = kind.items_table(), error = %err, "Could not delete line items");
            warnings.push(Warning::new(
                WarningKind::LineItemCleanupFailed,
                format!("Line items of {} were not deleted: {}", header.number, err),
            ));
        }

        self.storage.delete_document(kind, document_id).await?;
        info!(%document_id, number = %header.number, "{} deleted", kind);

        Ok(Outcome::with_warnings(header, warnings))
    }

    async fn write_audit_snapshot(
        &self,
        ctx: &OperationContext,
        header: &DocumentHeader,
        warnings: &mut Vec<Warning>,
    ) {
        let items = match self.storage.list_line_items(header.kind, header.id).await {
            Ok(items) => items,
            Err(err) => {
                warn!(document_id = %header.id, error = %err, "Audit snapshot without items");
                Vec::new()
            }
        };

        let result = match serde_json::to_value(DocumentSnapshot {
            header,
            items: &items,
        }) {
            Ok(snapshot) => {
                let entry = AuditLogEntry {
                    id: Uuid::new_v4(),
                    company_id: ctx.company_id,
                    actor_id: ctx.actor.id,
                    action: AuditAction::Delete,
                    entity: header.kind,
                    entity_id: header.id,
                    snapshot,
                    created_at: chrono::Utc::now().naive_utc(),
                };
                self.storage
                    .insert_audit_log(&entry)
                    .await
                    .map_err(|err| err.to_string())
            }
            Err(err) => Err(err.to_string()),
        };

        if let Err(reason) = result {
            warn!(document_id = %header.id, error = %reason, "Audit log not written");
            warnings.push(Warning::new(
                WarningKind::AuditLogFailed,
                format!("Deletion of {} was not audited: {}", header.number, reason),
            ));
        }
    }

    /// Reject items that reference products outside the operating company
    pub(crate) async fn ensure_known_products(
        &self,
        company_id: Uuid,
        items: &[LineItemInput],
    ) -> EngineResult<()> {
        let product_ids: BTreeSet<Uuid> = items.iter().filter_map(|item| item.product_id).collect();
        for product_id in product_ids {
            match self.storage.get_product(product_id).await? {
                Some(product) if product.company_id == company_id => {}
                _ => {
                    return Err(EngineError::Validation(format!(
                        "Line item references unknown product {}",
                        product_id
                    )))
                }
            }
        }
        Ok(())
    }

    async fn check_supplier(
        &self,
        company_id: Uuid,
        supplier_id: Uuid,
        warnings: &mut Vec<Warning>,
    ) -> EngineResult<()> {
        let check =
            validate_supplier_selection(&self.storage, company_id, supplier_id, &self.config)
                .await?;
        if !check.is_valid {
            return Err(EngineError::Validation(check.errors.join("; ")));
        }

        for finding in check.warnings {
            let tier = match finding.severity {
                ConflictSeverity::Informational => "info",
                ConflictSeverity::Minor => "minor",
                ConflictSeverity::Moderate => "moderate",
            };
            warnings.push(Warning::new(
                WarningKind::CounterpartyConflict,
                format!("[{}] {}", tier, finding.message),
            ));
        }
        Ok(())
    }

    /// Use the caller's number or ask the generator
    pub(crate) async fn assign_number(
        &self,
        company_id: Uuid,
        kind: DocumentKind,
        requested: Option<String>,
        warnings: &mut Vec<Warning>,
    ) -> EngineResult<String> {
        if let Some(number) = requested.filter(|number| !number.trim().is_empty()) {
            return Ok(number);
        }
        let outcome = self.numbering.next_number(company_id, kind).await?;
        warnings.extend(outcome.warnings);
        Ok(outcome.value)
    }

    /// Insert a header, retrying once without `created_by` when the creator
    /// reference is rejected
    pub(crate) async fn insert_header(
        &self,
        header: DocumentHeader,
        warnings: &mut Vec<Warning>,
    ) -> EngineResult<DocumentHeader> {
        match self.storage.insert_document(&header).await {
            Ok(inserted) => Ok(inserted),
            Err(err) if header.created_by.is_some() && err.is_foreign_key_on("created_by") => {
                warn!(
                    document_id = %header.id,
                    created_by = ?header.created_by,
                    hint = ?err.hint,
                    "Creator rejected by the store, retrying without created_by"
                );
                let retry = DocumentHeader {
                    created_by: None,
                    ..header
                };
                let inserted = self.storage.insert_document(&retry).await?;
                warnings.push(Warning::new(
                    WarningKind::CreatorDropped,
                    format!("{} {} was saved without a creator", retry.kind, retry.number),
                ));
                Ok(inserted)
            }
            Err(err) => Err(err.into()),
        }
    }

    /// Insert items, retrying once without an optional column the store
    /// reports as missing
    pub(crate) async fn insert_items(
        &self,
        kind: DocumentKind,
        mut items: Vec<LineItem>,
        warnings: &mut Vec<Warning>,
    ) -> EngineResult<Vec<LineItem>> {
        if items.is_empty() {
            return Ok(items);
        }

        let err = match self.storage.insert_line_items(kind, &items).await {
            Ok(inserted) => return Ok(inserted),
            Err(err) => err,
        };

        let Some(column) = err
            .undefined_column()
            .and_then(OptionalColumn::from_column_name)
        else {
            return Err(err.into());
        };

        warn!(
            column = column.column_name(),
            table = kind.items_table(),
            "Optional item column missing from store, retrying without it"
        );
        for item in &mut items {
            item.extras.strip(column);
        }

        let inserted = self.storage.insert_line_items(kind, &items).await?;
        warnings.push(Warning::new(
            WarningKind::ColumnStripped,
            format!(
                "Item field {} is not supported by this deployment and was not saved",
                column.column_name()
            ),
        ));
        Ok(inserted)
    }

    /// OUT movements for an invoice's product lines, counters updated concurrently
    pub(crate) async fn post_invoice_stock(
        &self,
        header: &DocumentHeader,
        items: &[LineItem],
    ) -> EngineResult<Vec<Warning>> {
        let movements = StockManager::<S>::outbound_movements(
            header.company_id,
            ReferenceType::Invoice,
            header.id,
            &header.number,
            items
                .iter()
                .filter_map(|item| item.product_id.map(|product_id| (product_id, &item.quantity))),
        );

        match self
            .stock
            .post_movements(movements, CounterUpdates::Concurrent)
            .await
        {
            Ok(outcome) => Ok(outcome.warnings),
            Err(err) => degrade_ledger_failure(err, header.id, "invoice stock-out").map(|w| vec![w]),
        }
    }
}
