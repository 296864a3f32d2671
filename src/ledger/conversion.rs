//! Quotation and proforma conversion

use chrono::NaiveDate;
use tracing::{info, instrument};
use uuid::Uuid;

use crate::ledger::documents::{incomplete, DocumentManager, DocumentWithItems};
use crate::traits::*;
use crate::types::*;

/// Caller overrides for the document produced by a conversion
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConversionOptions {
    /// Defaults to today
    pub date: Option<NaiveDate>,
    pub due_date: Option<NaiveDate>,
    /// Defaults to the source's validity
    pub valid_until: Option<NaiveDate>,
    pub number: Option<String>,
}

impl<S: LedgerStore + Clone> DocumentManager<S> {
    /// Turn a quotation into an invoice with the same items and totals
    pub async fn convert_quotation_to_invoice(
        &self,
        ctx: &OperationContext,
        quotation_id: Uuid,
        options: ConversionOptions,
    ) -> EngineResult<Outcome<DocumentWithItems>> {
        self.convert_document(
            ctx,
            DocumentKind::Quotation,
            quotation_id,
            DocumentKind::Invoice,
            options,
        )
        .await
    }

    /// Turn a quotation into a proforma; no stock is moved
    pub async fn convert_quotation_to_proforma(
        &self,
        ctx: &OperationContext,
        quotation_id: Uuid,
        options: ConversionOptions,
    ) -> EngineResult<Outcome<DocumentWithItems>> {
        self.convert_document(
            ctx,
            DocumentKind::Quotation,
            quotation_id,
            DocumentKind::Proforma,
            options,
        )
        .await
    }

    /// Turn a proforma into an invoice with the same items and totals
    pub async fn convert_proforma_to_invoice(
        &self,
        ctx: &OperationContext,
        proforma_id: Uuid,
        options: ConversionOptions,
    ) -> EngineResult<Outcome<DocumentWithItems>> {
        self.convert_document(
            ctx,
            DocumentKind::Proforma,
            proforma_id,
            DocumentKind::Invoice,
            options,
        )
        .await
    }

    /// Copy a source document into a new target document and mark the source
    /// converted.
    ///
    /// Totals are copied, not recomputed. A source that is already converted
    /// is rejected so its stock effect can never be applied twice.
    #[instrument(skip(self, ctx, options), fields(company_id = %ctx.company_id))]
    async fn convert_document(
        &self,
        ctx: &OperationContext,
        source_kind: DocumentKind,
        source_id: Uuid,
        target_kind: DocumentKind,
        options: ConversionOptions,
    ) -> EngineResult<Outcome<DocumentWithItems>> {
        let source = self.get_required(ctx, source_kind, source_id).await?;
        match source.status {
            DocumentStatus::Converted => {
                return Err(EngineError::Validation(format!(
                    "{} {} has already been converted",
                    source_kind, source.number
                )))
            }
            DocumentStatus::Rejected | DocumentStatus::Cancelled => {
                return Err(EngineError::Validation(format!(
                    "{} {} is {:?} and cannot be converted",
                    source_kind, source.number, source.status
                )))
            }
            _ => {}
        }

        let source_items = self.storage.list_line_items(source_kind, source_id).await?;

        let mut warnings = Vec::new();
        let number = self
            .assign_number(ctx.company_id, target_kind, options.number, &mut warnings)
            .await?;

        let date = options
            .date
            .unwrap_or_else(|| chrono::Utc::now().date_naive());
        let mut header = DocumentHeader::new(
            target_kind,
            ctx.company_id,
            source.counterparty_id,
            number,
            date,
        );
        header.due_date = options.due_date;
        header.valid_until = options.valid_until.or(source.valid_until);
        header.delivery_date = source.delivery_date;
        header.notes = source.notes.clone();
        header.terms = source.terms.clone();
        header.subtotal = source.subtotal.clone();
        header.tax_amount = source.tax_amount.clone();
        header.total_amount = source.total_amount.clone();
        header.source_document_id = Some(source.id);
        header.created_by = ctx.actor.id;
        if target_kind == DocumentKind::Invoice {
            header.balance_due = header.total_amount.clone();
            header.affects_inventory = self.config.default_affects_inventory;
        }
        self.validator.validate_header(&header)?;

        let header = self.insert_header(header, &mut warnings).await?;

        let copies: Vec<LineItem> = source_items
            .iter()
            .zip(1u32..)
            .map(|(item, sort_order)| item.copy_to(header.id, sort_order))
            .collect();
        let items = self
            .insert_items(target_kind, copies, &mut warnings)
            .await
            .map_err(|err| incomplete(&header, "line item copy", err))?;

        if target_kind == DocumentKind::Invoice && header.affects_inventory {
            let stock_warnings = self
                .post_invoice_stock(&header, &items)
                .await
                .map_err(|err| incomplete(&header, "stock ledger write", err))?;
            warnings.extend(stock_warnings);
        }

        let mut converted = source;
        converted.status = DocumentStatus::Converted;
        converted.updated_at = chrono::Utc::now().naive_utc();
        self.storage
            .update_document(&converted)
            .await
            .map_err(|err| incomplete(&header, "marking the source converted", err.into()))?;

        info!(
            source_id = %converted.id,
            source_number = %converted.number,
            document_id = %header.id,
            number = %header.number,
            "{} converted to {}",
            source_kind,
            target_kind
        );
        Ok(Outcome::with_warnings(
            DocumentWithItems { header, items },
            warnings,
        ))
    }
}
