//! Integration tests for sales-ledger-core

use bigdecimal::BigDecimal;
use chrono::NaiveDate;
use sales_ledger_core::{
    utils::is_fallback_number, Actor, Capability, ConversionOptions, DeliveryItemInput,
    DocumentKind, DocumentStatus, DocumentUpdate, EngineConfig, EngineError, LedgerStore,
    LineItemInput, MemoryStore, MovementType, NewDeliveryNote, NewDocument, OperationContext,
    OptionalColumn, PaymentMethod, PaymentPath, PaymentRequest, Product, ReferenceType,
    SalesLedger, StockMovement, WarningKind,
};
use uuid::Uuid;

struct Fixture {
    storage: MemoryStore,
    ledger: SalesLedger<MemoryStore>,
    ctx: OperationContext,
    customer_id: Uuid,
    product_id: Uuid,
}

fn date() -> NaiveDate {
    NaiveDate::from_ymd_opt(2024, 5, 1).unwrap()
}

fn dec(value: i32) -> BigDecimal {
    BigDecimal::from(value)
}

/// Engine with one product whose opening stock is recorded as a restock
async fn fixture_with_config(opening_stock: i32, config: EngineConfig) -> Fixture {
    let storage = MemoryStore::new();
    let ledger = SalesLedger::with_config(storage.clone(), config);

    let user_id = Uuid::new_v4();
    storage.register_user(user_id);
    let ctx = OperationContext::new(
        Uuid::new_v4(),
        Actor::new(Some(user_id))
            .with_capability(Capability::DeleteInvoices)
            .with_capability(Capability::DeleteQuotations),
    );

    let product = Product::new(ctx.company_id, "Surgical masks (box of 50)", dec(0));
    let product_id = product.id;
    storage.add_product(product);
    if opening_stock > 0 {
        ledger
            .restock_product(
                &ctx,
                product_id,
                dec(opening_stock),
                Some(dec(60)),
                Some("Opening stock".to_string()),
            )
            .await
            .unwrap();
    }

    Fixture {
        storage,
        ledger,
        ctx,
        customer_id: Uuid::new_v4(),
        product_id,
    }
}

async fn fixture(opening_stock: i32) -> Fixture {
    fixture_with_config(opening_stock, EngineConfig::default()).await
}

fn mask_lines(product_id: Uuid, quantity: i32) -> Vec<LineItemInput> {
    vec![LineItemInput::product(
        product_id,
        "Surgical masks (box of 50)",
        dec(quantity),
        dec(100),
        dec(16),
    )]
}

fn payment(fx: &Fixture, invoice_id: &str, amount: i32) -> PaymentRequest {
    PaymentRequest {
        company_id: fx.ctx.company_id.to_string(),
        customer_id: fx.customer_id.to_string(),
        invoice_id: invoice_id.to_string(),
        amount: dec(amount),
        method: PaymentMethod::BankTransfer,
        reference: Some("TRX-88121".to_string()),
        notes: None,
        payment_date: Some(date()),
    }
}

fn movements_for(storage: &MemoryStore, reference_id: Uuid) -> Vec<StockMovement> {
    storage
        .stock_movements()
        .into_iter()
        .filter(|movement| movement.reference_id == Some(reference_id))
        .collect()
}

async fn create_invoice(fx: &Fixture, quantity: i32) -> Uuid {
    fx.ledger
        .create_invoice_with_items(
            &fx.ctx,
            NewDocument::new(fx.customer_id, date(), mask_lines(fx.product_id, quantity)),
        )
        .await
        .unwrap()
        .value
        .header
        .id
}

#[tokio::test]
async fn test_invoice_payment_and_update_lifecycle() {
    let fx = fixture(50).await;

    // Create an inventory-affecting invoice
    let created = fx
        .ledger
        .create_invoice_with_items(
            &fx.ctx,
            NewDocument::new(fx.customer_id, date(), mask_lines(fx.product_id, 10)),
        )
        .await
        .unwrap();
    assert!(!created.is_degraded(), "{:?}", created.warnings);

    let invoice = created.value.header;
    assert_eq!(invoice.number, "INV-0001");
    assert_eq!(invoice.subtotal, dec(1000));
    assert_eq!(invoice.tax_amount, dec(160));
    assert_eq!(invoice.total_amount, dec(1160));
    assert_eq!(invoice.balance_due, dec(1160));
    assert_eq!(invoice.status, DocumentStatus::Draft);
    assert_eq!(fx.storage.product_stock(fx.product_id), Some(dec(40)));

    let movements = movements_for(&fx.storage, invoice.id);
    assert_eq!(movements.len(), 1);
    assert_eq!(movements[0].movement_type, MovementType::Out);
    assert_eq!(movements[0].quantity, dec(-10));

    // Partial payment
    let recorded = fx
        .ledger
        .record_payment(payment(&fx, &invoice.id.to_string(), 500))
        .await
        .unwrap();
    assert_eq!(recorded.value.path, PaymentPath::Atomic);
    let paid = fx.storage.document(invoice.id).unwrap();
    assert_eq!(paid.status, DocumentStatus::Partial);
    assert_eq!(paid.paid_amount, dec(500));
    assert_eq!(paid.balance_due, dec(660));

    // Deleting the payment reverses it
    let deletion = fx
        .ledger
        .delete_payment(recorded.value.payment.id)
        .await
        .unwrap();
    assert_eq!(deletion.removed_allocations.len(), 1);
    let reversed = fx.storage.document(invoice.id).unwrap();
    assert_eq!(reversed.status, DocumentStatus::Draft);
    assert_eq!(reversed.paid_amount, dec(0));
    assert_eq!(reversed.balance_due, dec(1160));
    assert!(fx.storage.payments().is_empty());
    assert!(fx.storage.allocations().is_empty());

    // Edit the quantity down to 5
    let updated = fx
        .ledger
        .update_invoice_with_items(
            &fx.ctx,
            invoice.id,
            DocumentUpdate::items(mask_lines(fx.product_id, 5)),
        )
        .await
        .unwrap();
    assert!(!updated.is_degraded(), "{:?}", updated.warnings);
    assert_eq!(updated.value.header.total_amount, dec(580));
    assert_eq!(updated.value.header.balance_due, dec(580));
    assert_eq!(fx.storage.product_stock(fx.product_id), Some(dec(45)));

    let movements = movements_for(&fx.storage, invoice.id);
    assert_eq!(movements.len(), 3);
    let reversal = &movements[1];
    assert_eq!(reversal.reference_type, ReferenceType::Adjustment);
    assert_eq!(reversal.quantity, dec(10));
    assert_eq!(reversal.reverses_movement_id, Some(movements[0].id));
    let reapplied = &movements[2];
    assert_eq!(reapplied.movement_type, MovementType::Out);
    assert_eq!(reapplied.reference_type, ReferenceType::Invoice);
    assert_eq!(reapplied.quantity, dec(-5));

    let report = fx.ledger.validate_integrity(fx.ctx.company_id).await.unwrap();
    assert!(report.is_valid, "{:?}", report.issues);
}

#[tokio::test]
async fn test_identical_update_leaves_stock_unchanged() {
    let fx = fixture(50).await;
    let invoice_id = create_invoice(&fx, 10).await;

    fx.ledger
        .update_invoice_with_items(
            &fx.ctx,
            invoice_id,
            DocumentUpdate::items(mask_lines(fx.product_id, 10)),
        )
        .await
        .unwrap();
    fx.ledger
        .update_invoice_with_items(
            &fx.ctx,
            invoice_id,
            DocumentUpdate::items(mask_lines(fx.product_id, 10)),
        )
        .await
        .unwrap();

    assert_eq!(fx.storage.product_stock(fx.product_id), Some(dec(40)));
    let report = fx
        .ledger
        .reconcile_stock_levels(fx.ctx.company_id, false)
        .await
        .unwrap();
    assert_eq!(report.mismatched, 0);
}

#[tokio::test]
async fn test_update_keeps_payments_and_recomputes_status() {
    let fx = fixture(50).await;
    let invoice_id = create_invoice(&fx, 10).await;
    fx.ledger
        .record_payment(payment(&fx, &invoice_id.to_string(), 580))
        .await
        .unwrap();

    let updated = fx
        .ledger
        .update_invoice_with_items(
            &fx.ctx,
            invoice_id,
            DocumentUpdate::items(mask_lines(fx.product_id, 5)),
        )
        .await
        .unwrap();

    let header = updated.value.header;
    assert_eq!(header.paid_amount, dec(580));
    assert_eq!(header.balance_due, dec(0));
    assert_eq!(header.status, DocumentStatus::Paid);
}

#[tokio::test]
async fn test_quotation_conversions() {
    let fx = fixture(50).await;

    let quotation = fx
        .ledger
        .create_quotation_with_items(
            &fx.ctx,
            NewDocument::new(
                fx.customer_id,
                date(),
                vec![
                    LineItemInput::product(
                        fx.product_id,
                        "Surgical masks (box of 50)",
                        dec(10),
                        dec(100),
                        dec(0),
                    ),
                    LineItemInput::service("Installation", dec(1), dec(1000), dec(0)),
                ],
            ),
        )
        .await
        .unwrap()
        .value;
    assert_eq!(quotation.header.total_amount, dec(2000));
    assert!(movements_for(&fx.storage, quotation.header.id).is_empty());

    let proforma = fx
        .ledger
        .convert_quotation_to_proforma(&fx.ctx, quotation.header.id, ConversionOptions::default())
        .await
        .unwrap()
        .value;
    assert_eq!(proforma.header.kind, DocumentKind::Proforma);
    assert_eq!(proforma.header.total_amount, dec(2000));
    assert_eq!(proforma.header.source_document_id, Some(quotation.header.id));
    assert_eq!(proforma.items.len(), 2);
    assert!(proforma
        .items
        .iter()
        .all(|item| item.document_id == proforma.header.id));
    assert!(movements_for(&fx.storage, proforma.header.id).is_empty());
    assert_eq!(fx.storage.product_stock(fx.product_id), Some(dec(50)));
    assert_eq!(
        fx.storage.document(quotation.header.id).unwrap().status,
        DocumentStatus::Converted
    );

    // A converted quotation cannot be converted or edited again
    let again = fx
        .ledger
        .convert_quotation_to_invoice(&fx.ctx, quotation.header.id, ConversionOptions::default())
        .await;
    assert!(matches!(again, Err(EngineError::Validation(_))));
    let edit = fx
        .ledger
        .update_document_with_items(
            &fx.ctx,
            DocumentKind::Quotation,
            quotation.header.id,
            DocumentUpdate::items(mask_lines(fx.product_id, 1)),
        )
        .await;
    assert!(matches!(edit, Err(EngineError::Validation(_))));

    // The proforma becomes an invoice and only then moves stock
    let invoice = fx
        .ledger
        .convert_proforma_to_invoice(&fx.ctx, proforma.header.id, ConversionOptions::default())
        .await
        .unwrap()
        .value;
    assert_eq!(invoice.header.total_amount, dec(2000));
    assert_eq!(invoice.header.balance_due, dec(2000));
    assert!(invoice.header.affects_inventory);
    assert_eq!(fx.storage.product_stock(fx.product_id), Some(dec(40)));
    assert_eq!(movements_for(&fx.storage, invoice.header.id).len(), 1);
    assert_eq!(
        fx.storage.document(proforma.header.id).unwrap().status,
        DocumentStatus::Converted
    );
}

#[tokio::test]
async fn test_invalid_invoice_id_makes_no_store_calls() {
    let fx = fixture(0).await;
    let before = fx.storage.call_count();

    let result = fx.ledger.record_payment(payment(&fx, "inv-42", 500)).await;

    match result {
        Err(EngineError::Validation(message)) => assert!(message.contains("invoice ID")),
        other => panic!("expected a validation error, got {:?}", other),
    }
    assert_eq!(fx.storage.call_count(), before);
    assert!(fx.storage.payments().is_empty());
}

#[tokio::test]
async fn test_payment_without_procedure_uses_manual_path() {
    let fx = fixture(50).await;
    let invoice_id = create_invoice(&fx, 10).await;
    fx.storage.set_payment_procedure_available(false);

    let recorded = fx
        .ledger
        .record_payment(payment(&fx, &invoice_id.to_string(), 1160))
        .await
        .unwrap();

    assert!(!recorded.is_degraded());
    assert_eq!(recorded.value.path, PaymentPath::ManualFallback);
    assert!(recorded.value.invoice_updated);
    assert_eq!(fx.storage.allocations().len(), 1);
    assert_eq!(
        fx.storage.document(invoice_id).unwrap().status,
        DocumentStatus::Paid
    );
}

#[tokio::test]
async fn test_payment_survives_missing_allocations_table() {
    let fx = fixture(50).await;
    let invoice_id = create_invoice(&fx, 10).await;
    fx.storage.set_payment_procedure_available(false);
    fx.storage.set_allocations_table(false);

    let recorded = fx
        .ledger
        .record_payment(payment(&fx, &invoice_id.to_string(), 500))
        .await
        .unwrap();

    assert!(recorded.value.allocation_failed);
    assert!(recorded.value.allocation.is_none());
    assert_eq!(recorded.warnings_of(WarningKind::AllocationFailed).count(), 1);
    assert_eq!(fx.storage.payments().len(), 1);
    assert_eq!(
        fx.storage.document(invoice_id).unwrap().balance_due,
        dec(660)
    );
}

#[tokio::test]
async fn test_payment_deletion_is_all_or_nothing() {
    let fx = fixture(50).await;
    let invoice_id = create_invoice(&fx, 10).await;
    let recorded = fx
        .ledger
        .record_payment(payment(&fx, &invoice_id.to_string(), 500))
        .await
        .unwrap();

    fx.storage.set_fail_invoice_updates(true);
    let result = fx.ledger.delete_payment(recorded.value.payment.id).await;

    match result {
        Err(EngineError::ReversalInconsistency { invoice_id: id, .. }) => {
            assert_eq!(id, invoice_id)
        }
        other => panic!("expected a reversal inconsistency, got {:?}", other),
    }
    assert_eq!(fx.storage.payments().len(), 1);
    assert_eq!(fx.storage.allocations().len(), 1);
    assert_eq!(
        fx.storage.document(invoice_id).unwrap().paid_amount,
        dec(500)
    );
}

#[tokio::test]
async fn test_unknown_creator_is_dropped_with_warning() {
    let mut fx = fixture(50).await;
    fx.ctx.actor.id = Some(Uuid::new_v4());

    let created = fx
        .ledger
        .create_invoice_with_items(
            &fx.ctx,
            NewDocument::new(fx.customer_id, date(), mask_lines(fx.product_id, 1)),
        )
        .await
        .unwrap();

    assert_eq!(created.warnings_of(WarningKind::CreatorDropped).count(), 1);
    assert_eq!(created.value.header.created_by, None);
    assert!(fx.storage.document(created.value.header.id).is_some());
}

#[tokio::test]
async fn test_missing_item_column_is_stripped() {
    let fx = fixture(50).await;
    fx.storage.drop_column(OptionalColumn::DiscountBeforeVat);

    let mut line = mask_lines(fx.product_id, 10).remove(0);
    line.discount_before_vat = Some(dec(100));

    let created = fx
        .ledger
        .create_invoice_with_items(
            &fx.ctx,
            NewDocument::new(fx.customer_id, date(), vec![line]),
        )
        .await
        .unwrap();

    assert_eq!(created.warnings_of(WarningKind::ColumnStripped).count(), 1);
    assert_eq!(created.value.header.subtotal, dec(900));
    assert_eq!(created.value.header.total_amount, dec(1044));
    let stored = fx.storage.line_items(created.value.header.id);
    assert_eq!(stored.len(), 1);
    assert_eq!(stored[0].extras.discount_before_vat, None);
}

#[tokio::test]
async fn test_unknown_product_is_rejected_before_any_write() {
    let fx = fixture(50).await;

    let result = fx
        .ledger
        .create_invoice_with_items(
            &fx.ctx,
            NewDocument::new(fx.customer_id, date(), mask_lines(Uuid::new_v4(), 1)),
        )
        .await;

    assert!(matches!(result, Err(EngineError::Validation(_))));
    assert_eq!(fx.storage.stock_movements().len(), 1);
    let invoices = fx
        .storage
        .list_documents(DocumentKind::Invoice, fx.ctx.company_id)
        .await
        .unwrap();
    assert!(invoices.is_empty());
}

#[tokio::test]
async fn test_item_failure_reports_incomplete_write() {
    let fx = fixture(50).await;
    fx.storage.set_fail_line_item_inserts(true);

    let result = fx
        .ledger
        .create_invoice_with_items(
            &fx.ctx,
            NewDocument::new(fx.customer_id, date(), mask_lines(fx.product_id, 10)),
        )
        .await;

    match result {
        Err(EngineError::IncompleteWrite {
            document_id,
            number,
            ..
        }) => {
            assert_eq!(number, "INV-0001");
            assert!(fx.storage.document(document_id).is_some());
            assert!(movements_for(&fx.storage, document_id).is_empty());
        }
        other => panic!("expected an incomplete write, got {:?}", other),
    }
    assert_eq!(fx.storage.product_stock(fx.product_id), Some(dec(50)));
}

#[tokio::test]
async fn test_stock_counter_failure_is_healed_by_reconciliation() {
    let fx = fixture(50).await;
    fx.storage.fail_stock_updates_for(fx.product_id);

    let created = fx
        .ledger
        .create_invoice_with_items(
            &fx.ctx,
            NewDocument::new(fx.customer_id, date(), mask_lines(fx.product_id, 10)),
        )
        .await
        .unwrap();

    let failures: Vec<_> = created.warnings_of(WarningKind::StockUpdateFailed).collect();
    assert_eq!(failures.len(), 1);
    assert_eq!(failures[0].product_id, Some(fx.product_id));
    assert_eq!(movements_for(&fx.storage, created.value.header.id).len(), 1);
    assert_eq!(fx.storage.product_stock(fx.product_id), Some(dec(50)));

    let report = fx
        .ledger
        .reconcile_stock_levels(fx.ctx.company_id, true)
        .await
        .unwrap();
    assert_eq!(report.mismatched, 1);
    assert_eq!(report.fixed, 1);
    assert_eq!(fx.storage.product_stock(fx.product_id), Some(dec(40)));
}

#[tokio::test]
async fn test_delivery_note_rules() {
    let fx = fixture(50).await;
    let invoice_id = create_invoice(&fx, 10).await;

    let other = Product::new(fx.ctx.company_id, "Nitrile gloves", dec(0));
    let other_id = other.id;
    fx.storage.add_product(other);

    let note = |items: Vec<DeliveryItemInput>| NewDeliveryNote {
        invoice_id: Some(invoice_id),
        customer_id: Some(fx.customer_id),
        number: None,
        date: date(),
        delivery_date: Some(date()),
        notes: None,
        items,
    };

    // No backing invoice
    let mut orphan = note(vec![DeliveryItemInput::new(fx.product_id, "Masks", dec(1), dec(1))]);
    orphan.invoice_id = None;
    assert!(matches!(
        fx.ledger.create_delivery_note(&fx.ctx, orphan).await,
        Err(EngineError::Validation(_))
    ));

    // Different customer
    let mut stranger = note(vec![DeliveryItemInput::new(fx.product_id, "Masks", dec(1), dec(1))]);
    stranger.customer_id = Some(Uuid::new_v4());
    match fx.ledger.create_delivery_note(&fx.ctx, stranger).await {
        Err(EngineError::Validation(message)) => assert!(message.contains("Customer mismatch")),
        other => panic!("expected a customer mismatch, got {:?}", other),
    }

    // Product not on the invoice
    let foreign = note(vec![DeliveryItemInput::new(other_id, "Gloves", dec(1), dec(1))]);
    assert!(matches!(
        fx.ledger.create_delivery_note(&fx.ctx, foreign).await,
        Err(EngineError::Validation(_))
    ));

    // More than invoiced
    let excessive = note(vec![DeliveryItemInput::new(fx.product_id, "Masks", dec(12), dec(12))]);
    assert!(matches!(
        fx.ledger.create_delivery_note(&fx.ctx, excessive).await,
        Err(EngineError::Validation(_))
    ));
    assert_eq!(fx.storage.product_stock(fx.product_id), Some(dec(40)));

    // More than the line's ordered quantity, within the invoice
    let delivered = fx
        .ledger
        .create_delivery_note(
            &fx.ctx,
            note(vec![DeliveryItemInput::new(fx.product_id, "Masks", dec(4), dec(6))]),
        )
        .await
        .unwrap();

    assert_eq!(delivered.warnings_of(WarningKind::OverDelivery).count(), 1);
    let header = &delivered.value.header;
    assert_eq!(header.kind, DocumentKind::DeliveryNote);
    assert_eq!(header.number, "DN-0001");
    assert_eq!(header.source_document_id, Some(invoice_id));
    assert_eq!(delivered.value.items.len(), 1);

    let movements = movements_for(&fx.storage, header.id);
    assert_eq!(movements.len(), 1);
    assert_eq!(movements[0].reference_type, ReferenceType::DeliveryNote);
    assert_eq!(movements[0].quantity, dec(-6));
    assert_eq!(fx.storage.product_stock(fx.product_id), Some(dec(34)));

    let stored = fx
        .ledger
        .get_delivery_note_with_items(&fx.ctx, header.id)
        .await
        .unwrap();
    assert_eq!(stored.header.number, "DN-0001");
    assert_eq!(stored.items.len(), 1);
    assert_eq!(stored.items[0].quantity_delivered, dec(6));
    assert_eq!(stored.items[0].quantity_ordered, dec(4));

    // Another company cannot read it
    let outsider = OperationContext::new(Uuid::new_v4(), fx.ctx.actor.clone());
    assert!(fx
        .ledger
        .get_delivery_note_with_items(&outsider, header.id)
        .await
        .is_err());
}

#[tokio::test]
async fn test_invoice_deletion_requires_permission_and_restores_stock() {
    let fx = fixture(50).await;
    let invoice_id = create_invoice(&fx, 10).await;

    let clerk = OperationContext::new(fx.ctx.company_id, Actor::new(fx.ctx.actor.id));
    let denied = fx.ledger.delete_invoice(&clerk, invoice_id).await;
    assert!(matches!(denied, Err(EngineError::PermissionDenied(_))));
    assert!(fx.storage.document(invoice_id).is_some());
    assert!(fx.storage.audit_logs().is_empty());

    let deleted = fx.ledger.delete_invoice(&fx.ctx, invoice_id).await.unwrap();
    assert!(!deleted.is_degraded(), "{:?}", deleted.warnings);
    assert!(fx.storage.document(invoice_id).is_none());
    assert!(fx.storage.line_items(invoice_id).is_empty());
    assert_eq!(fx.storage.product_stock(fx.product_id), Some(dec(50)));

    let audit = fx.storage.audit_logs();
    assert_eq!(audit.len(), 1);
    assert_eq!(audit[0].entity_id, invoice_id);
    assert_eq!(audit[0].snapshot["header"]["number"], "INV-0001");
    assert_eq!(audit[0].snapshot["items"].as_array().map(Vec::len), Some(1));
}

#[tokio::test]
async fn test_audit_failure_does_not_block_deletion() {
    let fx = fixture(0).await;
    fx.storage.set_audit_logs_table(false);

    let quotation = fx
        .ledger
        .create_quotation_with_items(
            &fx.ctx,
            NewDocument::new(
                fx.customer_id,
                date(),
                vec![LineItemInput::service("Consultation", dec(1), dec(250), dec(16))],
            ),
        )
        .await
        .unwrap()
        .value
        .header;

    let deleted = fx
        .ledger
        .delete_quotation(&fx.ctx, quotation.id)
        .await
        .unwrap();

    assert_eq!(deleted.warnings_of(WarningKind::AuditLogFailed).count(), 1);
    assert!(fx.storage.document(quotation.id).is_none());
}

#[tokio::test]
async fn test_balance_reconciliation_repairs_drift() {
    let fx = fixture(50).await;
    let invoice_id = create_invoice(&fx, 10).await;
    fx.ledger
        .record_payment(payment(&fx, &invoice_id.to_string(), 500))
        .await
        .unwrap();

    // overwrite the cached figures behind the engine's back
    let mut drifted = fx.storage.document(invoice_id).unwrap();
    drifted.paid_amount = dec(0);
    drifted.balance_due = dec(1160);
    drifted.status = DocumentStatus::Sent;
    fx.storage.update_document(&drifted).await.unwrap();

    let report = fx
        .ledger
        .reconcile_all_balances(fx.ctx.company_id, false)
        .await
        .unwrap();
    assert_eq!((report.checked, report.mismatched, report.fixed), (1, 1, 0));
    assert_eq!(report.discrepancies[0].allocated_amount, dec(500));

    let report = fx
        .ledger
        .reconcile_all_balances(fx.ctx.company_id, true)
        .await
        .unwrap();
    assert_eq!(report.fixed, 1);

    let repaired = fx.storage.document(invoice_id).unwrap();
    assert_eq!(repaired.paid_amount, dec(500));
    assert_eq!(repaired.balance_due, dec(660));
    assert_eq!(repaired.status, DocumentStatus::Partial);
}

#[tokio::test]
async fn test_lpo_supplier_conflict_tiers() {
    let config = EngineConfig {
        supplier_conflict_threshold: 2,
        supplier_conflict_minor_from: 1,
        supplier_conflict_moderate_from: 2,
        ..EngineConfig::default()
    };
    let fx = fixture_with_config(0, config).await;
    let service = || vec![LineItemInput::service("Maintenance", dec(1), dec(300), dec(16))];

    fx.ledger
        .create_invoice_with_items(&fx.ctx, NewDocument::new(fx.customer_id, date(), service()))
        .await
        .unwrap();

    let lpo = fx
        .ledger
        .create_lpo_with_items(&fx.ctx, NewDocument::new(fx.customer_id, date(), service()))
        .await
        .unwrap();
    let conflicts: Vec<_> = lpo.warnings_of(WarningKind::CounterpartyConflict).collect();
    assert_eq!(conflicts.len(), 1);
    assert!(conflicts[0].message.starts_with("[minor]"));
    assert_eq!(lpo.value.header.number, "LPO-0001");

    for _ in 0..2 {
        fx.ledger
            .create_invoice_with_items(&fx.ctx, NewDocument::new(fx.customer_id, date(), service()))
            .await
            .unwrap();
    }

    let check = fx
        .ledger
        .validate_supplier_selection(&fx.ctx, fx.customer_id)
        .await
        .unwrap();
    assert!(!check.is_valid);

    let blocked = fx
        .ledger
        .create_lpo_with_items(&fx.ctx, NewDocument::new(fx.customer_id, date(), service()))
        .await;
    assert!(matches!(blocked, Err(EngineError::Validation(_))));
}

#[tokio::test]
async fn test_numbering_fallback() {
    let fx = fixture(0).await;
    fx.storage.set_numbering_available(false);

    let quotation = fx
        .ledger
        .create_quotation_with_items(
            &fx.ctx,
            NewDocument::new(
                fx.customer_id,
                date(),
                vec![LineItemInput::service("Consultation", dec(1), dec(250), dec(16))],
            ),
        )
        .await
        .unwrap();

    assert_eq!(quotation.warnings_of(WarningKind::FallbackNumberUsed).count(), 1);
    assert!(quotation.value.header.number.starts_with("QUO-"));
    assert!(is_fallback_number(&quotation.value.header.number));

    let strict = SalesLedger::with_config(
        fx.storage.clone(),
        EngineConfig {
            numbering_fallback: false,
            ..EngineConfig::default()
        },
    );
    let result = strict
        .create_quotation_with_items(
            &fx.ctx,
            NewDocument::new(
                fx.customer_id,
                date(),
                vec![LineItemInput::service("Consultation", dec(1), dec(250), dec(16))],
            ),
        )
        .await;
    assert!(matches!(result, Err(EngineError::DependencyUnavailable(_))));
}

#[tokio::test]
async fn test_strict_validation_rejects_bad_items() {
    let fx = fixture_with_config(
        50,
        EngineConfig {
            strict_validation: true,
            ..EngineConfig::default()
        },
    )
    .await;

    let mut line = mask_lines(fx.product_id, 1).remove(0);
    line.tax_percentage = dec(140);

    let result = fx
        .ledger
        .create_invoice_with_items(&fx.ctx, NewDocument::new(fx.customer_id, date(), vec![line]))
        .await;
    assert!(matches!(result, Err(EngineError::Validation(_))));
    assert_eq!(fx.storage.product_stock(fx.product_id), Some(dec(50)));
}

#[tokio::test]
async fn test_derived_statuses_cannot_be_requested() {
    let fx = fixture(50).await;

    let mut paid = NewDocument::new(fx.customer_id, date(), mask_lines(fx.product_id, 10));
    paid.status = Some(DocumentStatus::Paid);
    let result = fx.ledger.create_invoice_with_items(&fx.ctx, paid).await;
    assert!(matches!(result, Err(EngineError::Validation(_))));
    let invoices = fx
        .storage
        .list_documents(DocumentKind::Invoice, fx.ctx.company_id)
        .await
        .unwrap();
    assert!(invoices.is_empty());
    assert_eq!(fx.storage.product_stock(fx.product_id), Some(dec(50)));

    let mut converted = NewDocument::new(fx.customer_id, date(), mask_lines(fx.product_id, 1));
    converted.status = Some(DocumentStatus::Converted);
    let result = fx.ledger.create_quotation_with_items(&fx.ctx, converted).await;
    assert!(matches!(result, Err(EngineError::Validation(_))));

    let mut sent = NewDocument::new(fx.customer_id, date(), mask_lines(fx.product_id, 10));
    sent.status = Some(DocumentStatus::Sent);
    let invoice = fx
        .ledger
        .create_invoice_with_items(&fx.ctx, sent)
        .await
        .unwrap()
        .value
        .header;
    assert_eq!(invoice.status, DocumentStatus::Sent);

    let mut overdue = DocumentUpdate::items(mask_lines(fx.product_id, 10));
    overdue.status = Some(DocumentStatus::Overdue);
    let result = fx
        .ledger
        .update_invoice_with_items(&fx.ctx, invoice.id, overdue)
        .await;
    assert!(matches!(result, Err(EngineError::Validation(_))));
    assert_eq!(
        fx.storage.document(invoice.id).unwrap().status,
        DocumentStatus::Sent
    );
    assert_eq!(fx.storage.product_stock(fx.product_id), Some(dec(40)));
}

#[tokio::test]
async fn test_out_of_range_tax_is_rejected() {
    let fx = fixture(50).await;

    let mut line = mask_lines(fx.product_id, 1).remove(0);
    line.tax_percentage = dec(-100);
    line.tax_inclusive = true;

    let result = fx
        .ledger
        .create_quotation_with_items(
            &fx.ctx,
            NewDocument::new(fx.customer_id, date(), vec![line]),
        )
        .await;

    assert!(matches!(result, Err(EngineError::Validation(_))));
    let quotations = fx
        .storage
        .list_documents(DocumentKind::Quotation, fx.ctx.company_id)
        .await
        .unwrap();
    assert!(quotations.is_empty());
}

#[tokio::test]
async fn test_update_clears_optional_header_fields() {
    let fx = fixture(50).await;

    let mut document = NewDocument::new(fx.customer_id, date(), mask_lines(fx.product_id, 10));
    document.due_date = NaiveDate::from_ymd_opt(2024, 5, 31);
    document.notes = Some("Deliver to ward 4".to_string());
    document.terms = Some("Net 30".to_string());
    let invoice = fx
        .ledger
        .create_invoice_with_items(&fx.ctx, document)
        .await
        .unwrap()
        .value
        .header;

    let mut update = DocumentUpdate::items(mask_lines(fx.product_id, 10));
    update.due_date = Some(None);
    update.notes = Some(None);
    let updated = fx
        .ledger
        .update_invoice_with_items(&fx.ctx, invoice.id, update)
        .await
        .unwrap()
        .value
        .header;

    assert_eq!(updated.due_date, None);
    assert_eq!(updated.notes, None);
    assert_eq!(updated.terms, Some("Net 30".to_string()));
    let stored = fx.storage.document(invoice.id).unwrap();
    assert_eq!(stored.due_date, None);
    assert_eq!(stored.notes, None);
    assert_eq!(stored.terms, Some("Net 30".to_string()));
}

#[tokio::test]
async fn test_failed_creator_retry_is_returned() {
    let mut fx = fixture(50).await;

    let mut first = NewDocument::new(fx.customer_id, date(), mask_lines(fx.product_id, 1));
    first.number = Some("INV-DUP".to_string());
    fx.ledger
        .create_invoice_with_items(&fx.ctx, first)
        .await
        .unwrap();

    // The creator is rejected, then the retry hits the duplicate number
    fx.ctx.actor.id = Some(Uuid::new_v4());
    let mut second = NewDocument::new(fx.customer_id, date(), mask_lines(fx.product_id, 1));
    second.number = Some("INV-DUP".to_string());
    let result = fx.ledger.create_invoice_with_items(&fx.ctx, second).await;

    assert!(matches!(result, Err(EngineError::Conflict(_))));
    let invoices = fx
        .storage
        .list_documents(DocumentKind::Invoice, fx.ctx.company_id)
        .await
        .unwrap();
    assert_eq!(invoices.len(), 1);
    assert_eq!(fx.storage.product_stock(fx.product_id), Some(dec(49)));
}

#[tokio::test]
async fn test_movement_constraint_violation_is_fatal() {
    let fx = fixture(50).await;
    fx.storage.set_reject_movement_inserts(true);

    let result = fx
        .ledger
        .create_invoice_with_items(
            &fx.ctx,
            NewDocument::new(fx.customer_id, date(), mask_lines(fx.product_id, 10)),
        )
        .await;

    match result {
        Err(EngineError::IncompleteWrite {
            document_id,
            source,
            ..
        }) => {
            assert!(matches!(*source, EngineError::Conflict(_)), "{:?}", source);
            assert!(fx.storage.document(document_id).is_some());
            assert_eq!(fx.storage.line_items(document_id).len(), 1);
            assert!(movements_for(&fx.storage, document_id).is_empty());
        }
        other => panic!("expected an incomplete write, got {:?}", other),
    }
    assert_eq!(fx.storage.product_stock(fx.product_id), Some(dec(50)));
}

#[tokio::test]
async fn test_recurring_missing_column_is_schema_drift() {
    let fx = fixture(50).await;
    fx.storage
        .break_item_column(Some(OptionalColumn::DiscountBeforeVat));

    let result = fx
        .ledger
        .create_invoice_with_items(
            &fx.ctx,
            NewDocument::new(fx.customer_id, date(), mask_lines(fx.product_id, 10)),
        )
        .await;

    match result {
        Err(EngineError::IncompleteWrite {
            document_id,
            source,
            ..
        }) => {
            assert!(matches!(*source, EngineError::SchemaDrift(_)), "{:?}", source);
            assert!(fx.storage.line_items(document_id).is_empty());
        }
        other => panic!("expected an incomplete write, got {:?}", other),
    }
    assert_eq!(fx.storage.product_stock(fx.product_id), Some(dec(50)));
}

#[tokio::test]
async fn test_counter_failure_does_not_affect_other_products() {
    let fx = fixture(50).await;

    let gloves = Product::new(fx.ctx.company_id, "Nitrile gloves", dec(0));
    let gloves_id = gloves.id;
    fx.storage.add_product(gloves);
    fx.ledger
        .restock_product(&fx.ctx, gloves_id, dec(30), None, None)
        .await
        .unwrap();
    fx.storage.fail_stock_updates_for(fx.product_id);

    let mut items = mask_lines(fx.product_id, 10);
    items.push(LineItemInput::product(
        gloves_id,
        "Nitrile gloves",
        dec(5),
        dec(40),
        dec(16),
    ));
    let created = fx
        .ledger
        .create_invoice_with_items(
            &fx.ctx,
            NewDocument::new(fx.customer_id, date(), items),
        )
        .await
        .unwrap();

    let failures: Vec<_> = created.warnings_of(WarningKind::StockUpdateFailed).collect();
    assert_eq!(failures.len(), 1);
    assert_eq!(failures[0].product_id, Some(fx.product_id));
    assert_eq!(movements_for(&fx.storage, created.value.header.id).len(), 2);
    assert_eq!(fx.storage.product_stock(fx.product_id), Some(dec(50)));
    assert_eq!(fx.storage.product_stock(gloves_id), Some(dec(25)));
}

#[tokio::test]
async fn test_quotation_to_invoice_moves_stock() {
    let fx = fixture(50).await;

    let quotation = fx
        .ledger
        .create_quotation_with_items(
            &fx.ctx,
            NewDocument::new(fx.customer_id, date(), mask_lines(fx.product_id, 10)),
        )
        .await
        .unwrap()
        .value
        .header;
    assert_eq!(fx.storage.product_stock(fx.product_id), Some(dec(50)));

    let invoice = fx
        .ledger
        .convert_quotation_to_invoice(&fx.ctx, quotation.id, ConversionOptions::default())
        .await
        .unwrap()
        .value;

    assert_eq!(invoice.header.kind, DocumentKind::Invoice);
    assert_eq!(invoice.header.total_amount, dec(1160));
    assert_eq!(invoice.header.balance_due, dec(1160));
    assert_eq!(invoice.header.source_document_id, Some(quotation.id));
    assert_eq!(invoice.items.len(), 1);

    let movements = movements_for(&fx.storage, invoice.header.id);
    assert_eq!(movements.len(), 1);
    assert_eq!(movements[0].movement_type, MovementType::Out);
    assert_eq!(movements[0].reference_type, ReferenceType::Invoice);
    assert_eq!(movements[0].quantity, dec(-10));
    assert_eq!(fx.storage.product_stock(fx.product_id), Some(dec(40)));
    assert_eq!(
        fx.storage.document(quotation.id).unwrap().status,
        DocumentStatus::Converted
    );
}
