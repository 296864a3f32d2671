//! Payment recording and reversal against invoices

use bigdecimal::BigDecimal;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

use crate::reconciliation::balances::{apply_payment, reverse_payment};
use crate::traits::*;
use crate::types::*;
use crate::utils::validation::{parse_entity_id, validate_positive_amount};

/// Payment as submitted by a caller; identifiers are validated before use
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaymentRequest {
    pub company_id: String,
    pub customer_id: String,
    pub invoice_id: String,
    pub amount: BigDecimal,
    pub method: PaymentMethod,
    pub reference: Option<String>,
    pub notes: Option<String>,
    /// Defaults to today
    pub payment_date: Option<NaiveDate>,
}

/// Which write path recorded a payment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentPath {
    /// Server-side procedure, one transaction
    Atomic,
    /// Separate payment, allocation and invoice writes
    ManualFallback,
}

/// What was persisted for a payment
#[derive(Debug, Clone, PartialEq)]
pub struct PaymentRecord {
    pub payment: Payment,
    pub allocation: Option<PaymentAllocation>,
    pub path: PaymentPath,
    /// The payment exists but is not linked to its invoice
    pub allocation_failed: bool,
    /// The invoice's paid amount, balance and status reflect this payment
    pub invoice_updated: bool,
    pub invoice: Option<DocumentHeader>,
}

/// What a payment deletion reversed
#[derive(Debug, Clone, PartialEq)]
pub struct PaymentDeletion {
    pub payment: Payment,
    pub removed_allocations: Vec<PaymentAllocation>,
    pub reversed_invoices: Vec<DocumentHeader>,
}

/// Records payments with their invoice allocations and reverses them
#[derive(Debug, Clone)]
pub struct PaymentReconciler<S: LedgerStore> {
    storage: S,
}

impl<S: LedgerStore> PaymentReconciler<S> {
    /// Create a new payment reconciler
    pub fn new(storage: S) -> Self {
        Self { storage }
    }

    /// Record a payment against one invoice.
    ///
    /// Uses the atomic procedure when the store has it and falls back to
    /// three separate writes otherwise. Once the payment row exists it is
    /// never discarded; later failures come back as warnings.
    #[instrument(skip(self, request), fields(invoice_id = %request.invoice_id, amount = %request.amount))]
    pub async fn record_payment(
        &self,
        request: PaymentRequest,
    ) -> EngineResult<Outcome<PaymentRecord>> {
        let company_id = parse_entity_id(&request.company_id, "company ID")?;
        let customer_id = parse_entity_id(&request.customer_id, "customer ID")?;
        let invoice_id = parse_entity_id(&request.invoice_id, "invoice ID")?;
        validate_positive_amount(&request.amount, "Payment amount")?;

        let now = chrono::Utc::now();
        let payment = Payment {
            id: Uuid::new_v4(),
            company_id,
            customer_id,
            amount: request.amount,
            method: request.method,
            reference: request.reference,
            notes: request.notes,
            payment_date: request.payment_date.unwrap_or_else(|| now.date_naive()),
            created_at: now.naive_utc(),
        };

        match self
            .storage
            .record_payment_with_allocation(&payment, invoice_id)
            .await
        {
            Ok((payment, allocation)) => {
                let invoice = self
                    .storage
                    .get_document(DocumentKind::Invoice, invoice_id)
                    .await
                    .unwrap_or_else(|err| {
                        warn!(%invoice_id, error = %err, "Could not reload invoice after payment");
                        None
                    });
                info!(payment_id = %payment.id, "Payment recorded atomically");
                Ok(Outcome::new(PaymentRecord {
                    payment,
                    allocation: Some(allocation),
                    path: PaymentPath::Atomic,
                    allocation_failed: false,
                    invoice_updated: true,
                    invoice,
                }))
            }
            Err(err) if err.is_procedure_not_found() => {
                warn!(error = %err, "Payment procedure unavailable, recording manually");
                self.record_payment_manually(payment, invoice_id).await
            }
            Err(err) if err.code == StoreErrorCode::NotFound => {
                Err(EngineError::not_found("Invoice", invoice_id))
            }
            Err(err) => {
                error!(code = %err.code, error = %err.message, hint = ?err.hint, "Payment procedure failed");
                Err(err.into())
            }
        }
    }

    async fn record_payment_manually(
        &self,
        payment: Payment,
        invoice_id: Uuid,
    ) -> EngineResult<Outcome<PaymentRecord>> {
        let payment = self.storage.insert_payment(&payment).await.map_err(|err| {
            error!(code = %err.code, error = %err.message, hint = ?err.hint, "Payment insert failed");
            EngineError::from(err)
        })?;

        let mut warnings = Vec::new();
        let allocation = PaymentAllocation::new(payment.id, invoice_id, payment.amount.clone());
        let allocation = match self.storage.insert_allocation(&allocation).await {
            Ok(allocation) => Some(allocation),
            Err(err) => {
                warn!(
                    payment_id = %payment.id,
                    code = %err.code,
                    error = %err.message,
                    hint = ?err.hint,
                    "Payment recorded without allocation"
                );
                let message = if err.is_undefined_table() {
                    "Payment recorded but this deployment has no allocations table; it is not linked to the invoice".to_string()
                } else {
                    format!("Payment recorded but could not be allocated to the invoice: {}", err)
                };
                warnings.push(Warning::new(WarningKind::AllocationFailed, message));
                None
            }
        };

        let invoice = match self.apply_to_invoice(invoice_id, &payment.amount).await {
            Ok(invoice) => Some(invoice),
            Err(err) => {
                warn!(%invoice_id, payment_id = %payment.id, error = %err, "Invoice balance not updated");
                warnings.push(Warning::new(
                    WarningKind::InvoiceUpdateFailed,
                    format!(
                        "Payment recorded but invoice {} was not updated; run a balance reconciliation: {}",
                        invoice_id, err
                    ),
                ));
                None
            }
        };

        Ok(Outcome::with_warnings(
            PaymentRecord {
                allocation_failed: allocation.is_none(),
                invoice_updated: invoice.is_some(),
                payment,
                allocation,
                path: PaymentPath::ManualFallback,
                invoice,
            },
            warnings,
        ))
    }

    async fn apply_to_invoice(
        &self,
        invoice_id: Uuid,
        amount: &BigDecimal,
    ) -> EngineResult<DocumentHeader> {
        let mut invoice = self
            .storage
            .get_document(DocumentKind::Invoice, invoice_id)
            .await?
            .ok_or_else(|| EngineError::not_found("Invoice", invoice_id))?;
        apply_payment(&mut invoice, amount);
        Ok(self.storage.update_document(&invoice).await?)
    }

    /// Delete a payment, reversing each allocation on its invoice first.
    ///
    /// Any failure to reverse an invoice aborts the delete before the
    /// payment row is touched.
    #[instrument(skip(self))]
    pub async fn delete_payment(&self, payment_id: Uuid) -> EngineResult<PaymentDeletion> {
        let payment = self
            .storage
            .get_payment(payment_id)
            .await?
            .ok_or_else(|| EngineError::not_found("Payment", payment_id))?;

        let allocations = match self.storage.list_payment_allocations(payment_id).await {
            Ok(allocations) => allocations,
            // deployments without the table have nothing to reverse
            Err(err) if err.is_undefined_table() => Vec::new(),
            Err(err) => return Err(err.into()),
        };

        let mut reversed_invoices = Vec::with_capacity(allocations.len());
        for allocation in &allocations {
            let invoice_id = allocation.invoice_id;
            let mut invoice = self
                .storage
                .get_document(DocumentKind::Invoice, invoice_id)
                .await
                .map_err(|err| EngineError::ReversalInconsistency {
                    invoice_id,
                    reason: format!("invoice could not be loaded: {}", err),
                })?
                .ok_or_else(|| EngineError::ReversalInconsistency {
                    invoice_id,
                    reason: "invoice no longer exists".to_string(),
                })?;

            reverse_payment(&mut invoice, &allocation.amount_allocated);

            let invoice = self.storage.update_document(&invoice).await.map_err(|err| {
                error!(%invoice_id, %payment_id, error = %err, "Invoice reversal failed");
                EngineError::ReversalInconsistency {
                    invoice_id,
                    reason: format!("invoice could not be updated: {}", err),
                }
            })?;

            self.storage.delete_allocation(allocation.id).await?;
            reversed_invoices.push(invoice);
        }

        self.storage.delete_payment(payment_id).await?;
        info!(%payment_id, allocations = allocations.len(), "Payment deleted");

        Ok(PaymentDeletion {
            payment,
            removed_allocations: allocations,
            reversed_invoices,
        })
    }
}
