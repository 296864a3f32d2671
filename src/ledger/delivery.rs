//! Delivery notes against existing invoices

use bigdecimal::BigDecimal;
use chrono::NaiveDate;
use std::collections::HashMap;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::ledger::documents::{incomplete, DocumentManager};
use crate::ledger::stock::{degrade_ledger_failure, CounterUpdates, StockManager};
use crate::traits::*;
use crate::types::*;

/// One delivered product line
#[derive(Debug, Clone, PartialEq)]
pub struct DeliveryItemInput {
    pub product_id: Uuid,
    pub description: String,
    pub quantity_ordered: BigDecimal,
    pub quantity_delivered: BigDecimal,
}

impl DeliveryItemInput {
    pub fn new(
        product_id: Uuid,
        description: impl Into<String>,
        quantity_ordered: BigDecimal,
        quantity_delivered: BigDecimal,
    ) -> Self {
        Self {
            product_id,
            description: description.into(),
            quantity_ordered,
            quantity_delivered,
        }
    }
}

/// Delivery note as submitted by a caller
#[derive(Debug, Clone, PartialEq)]
pub struct NewDeliveryNote {
    /// Backing invoice; required
    pub invoice_id: Option<Uuid>,
    pub customer_id: Option<Uuid>,
    pub number: Option<String>,
    pub date: NaiveDate,
    pub delivery_date: Option<NaiveDate>,
    pub notes: Option<String>,
    pub items: Vec<DeliveryItemInput>,
}

/// Persisted delivery note with its items
#[derive(Debug, Clone, PartialEq)]
pub struct DeliveryNoteWithItems {
    pub header: DocumentHeader,
    pub items: Vec<DeliveryItem>,
}

impl<S: LedgerStore + Clone> DocumentManager<S> {
    /// Get a delivery note of the operating company with its items
    pub async fn get_delivery_note_with_items(
        &self,
        ctx: &OperationContext,
        delivery_note_id: Uuid,
    ) -> EngineResult<DeliveryNoteWithItems> {
        let header = self
            .get_required(ctx, DocumentKind::DeliveryNote, delivery_note_id)
            .await?;
        let mut items = self.storage.list_delivery_items(delivery_note_id).await?;
        items.sort_by_key(|item| item.sort_order);
        Ok(DeliveryNoteWithItems { header, items })
    }

    /// Record a delivery against an invoice and move its stock out.
    ///
    /// Every delivered product must appear on the invoice, and the delivered
    /// total per product may not exceed what was invoiced. Delivering more
    /// than the line's ordered quantity is only a warning.
    #[instrument(skip(self, ctx, note), fields(company_id = %ctx.company_id, invoice_id = ?note.invoice_id))]
    pub async fn create_delivery_note(
        &self,
        ctx: &OperationContext,
        note: NewDeliveryNote,
    ) -> EngineResult<Outcome<DeliveryNoteWithItems>> {
        let invoice_id = note.invoice_id.ok_or_else(|| {
            EngineError::Validation("A delivery note requires an invoice reference".to_string())
        })?;
        let customer_id = note
            .customer_id
            .filter(|id| !id.is_nil())
            .ok_or_else(|| {
                EngineError::Validation("A delivery note requires a customer".to_string())
            })?;
        if note.items.is_empty() {
            return Err(EngineError::Validation(
                "A delivery note requires at least one item".to_string(),
            ));
        }

        let invoice = self
            .storage
            .get_document(DocumentKind::Invoice, invoice_id)
            .await?
            .filter(|invoice| invoice.company_id == ctx.company_id)
            .ok_or_else(|| {
                EngineError::Validation(format!(
                    "Invoice {} does not exist in this company",
                    invoice_id
                ))
            })?;
        if invoice.counterparty_id != customer_id {
            return Err(EngineError::Validation(format!(
                "Customer mismatch: invoice {} belongs to a different customer",
                invoice.number
            )));
        }

        let mut invoiced: HashMap<Uuid, BigDecimal> = HashMap::new();
        for line in self
            .storage
            .list_line_items(DocumentKind::Invoice, invoice_id)
            .await?
        {
            if let Some(product_id) = line.product_id {
                *invoiced.entry(product_id).or_insert_with(zero) += line.quantity;
            }
        }

        let mut warnings = Vec::new();
        let mut delivered: HashMap<Uuid, BigDecimal> = HashMap::new();
        for item in &note.items {
            if item.quantity_delivered < zero() {
                return Err(EngineError::Validation(format!(
                    "Delivered quantity for {} cannot be negative",
                    item.description
                )));
            }
            if !invoiced.contains_key(&item.product_id) {
                return Err(EngineError::Validation(format!(
                    "Product {} is not on invoice {}",
                    item.product_id, invoice.number
                )));
            }
            if item.quantity_delivered > item.quantity_ordered {
                warn!(
                    product_id = %item.product_id,
                    ordered = %item.quantity_ordered,
                    delivered = %item.quantity_delivered,
                    "Delivering more than ordered"
                );
                warnings.push(Warning::for_product(
                    WarningKind::OverDelivery,
                    item.product_id,
                    format!(
                        "{}: delivering {} against {} ordered",
                        item.description, item.quantity_delivered, item.quantity_ordered
                    ),
                ));
            }
            *delivered.entry(item.product_id).or_insert_with(zero) +=
                item.quantity_delivered.clone();
        }

        for (product_id, quantity) in &delivered {
            if let Some(limit) = invoiced.get(product_id) {
                if quantity > limit {
                    return Err(EngineError::Validation(format!(
                        "Delivered quantity {} of product {} exceeds the {} invoiced on {}",
                        quantity, product_id, limit, invoice.number
                    )));
                }
            }
        }

        let number = self
            .assign_number(
                ctx.company_id,
                DocumentKind::DeliveryNote,
                note.number,
                &mut warnings,
            )
            .await?;
        let mut header = DocumentHeader::new(
            DocumentKind::DeliveryNote,
            ctx.company_id,
            customer_id,
            number,
            note.date,
        );
        header.delivery_date = note.delivery_date;
        header.notes = note.notes;
        header.source_document_id = Some(invoice.id);
        header.affects_inventory = true;
        header.created_by = ctx.actor.id;
        self.validator.validate_header(&header)?;

        let header = self.insert_header(header, &mut warnings).await?;

        let rows: Vec<DeliveryItem> = note
            .items
            .into_iter()
            .zip(1u32..)
            .map(|(item, sort_order)| DeliveryItem {
                id: Uuid::new_v4(),
                delivery_note_id: header.id,
                product_id: item.product_id,
                description: item.description,
                quantity_ordered: item.quantity_ordered,
                quantity_delivered: item.quantity_delivered,
                sort_order,
            })
            .collect();
        let items = self
            .storage
            .insert_delivery_items(&rows)
            .await
            .map_err(|err| incomplete(&header, "delivery item insert", err.into()))?;

        let movements = StockManager::<S>::outbound_movements(
            ctx.company_id,
            ReferenceType::DeliveryNote,
            header.id,
            &header.number,
            items
                .iter()
                .map(|item| (item.product_id, &item.quantity_delivered)),
        );
        match self
            .stock
            .post_movements(movements, CounterUpdates::Sequential)
            .await
        {
            Ok(outcome) => warnings.extend(outcome.warnings),
            Err(err) => warnings.push(
                degrade_ledger_failure(err, header.id, "delivery")
                    .map_err(|err| incomplete(&header, "stock ledger write", err))?,
            ),
        }

        info!(
            document_id = %header.id,
            number = %header.number,
            invoice = %invoice.number,
            items = items.len(),
            "Delivery note created"
        );
        Ok(Outcome::with_warnings(
            DeliveryNoteWithItems { header, items },
            warnings,
        ))
    }
}
