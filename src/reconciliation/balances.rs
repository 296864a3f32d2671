//! Invoice balance arithmetic and the allocation-driven reconciliation sweep

use bigdecimal::BigDecimal;
use serde::{Deserialize, Serialize};
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::traits::*;
use crate::types::*;

/// Add a payment to an invoice's paid amount and refresh balance and status
pub fn apply_payment(invoice: &mut DocumentHeader, amount: &BigDecimal) {
    let paid = &invoice.paid_amount + amount;
    invoice.set_paid_amount(paid);
}

/// Take an allocation back off an invoice, never below zero paid
pub fn reverse_payment(invoice: &mut DocumentHeader, allocated: &BigDecimal) {
    let remaining = &invoice.paid_amount - allocated;
    let paid = if remaining < zero() { zero() } else { remaining };
    invoice.set_paid_amount(paid);
}

/// Invoice whose cached figures disagree with its allocations
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BalanceDiscrepancy {
    pub invoice_id: Uuid,
    pub number: String,
    pub stored_paid_amount: BigDecimal,
    pub stored_balance_due: BigDecimal,
    pub allocated_amount: BigDecimal,
    pub expected_balance_due: BigDecimal,
}

/// Per-invoice failure that did not stop the sweep
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InvoiceReconciliationError {
    pub invoice_id: Uuid,
    pub number: String,
    pub message: String,
}

/// Result of a balance reconciliation sweep
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BalanceReconciliationReport {
    pub company_id: Uuid,
    pub checked: usize,
    pub mismatched: usize,
    pub fixed: usize,
    pub discrepancies: Vec<BalanceDiscrepancy>,
    pub errors: Vec<InvoiceReconciliationError>,
}

/// Rebuilds invoice paid/balance figures from the allocation ledger
#[derive(Debug, Clone)]
pub struct BalanceReconciler<S: LedgerStore> {
    storage: S,
}

impl<S: LedgerStore> BalanceReconciler<S> {
    /// Create a new balance reconciler
    pub fn new(storage: S) -> Self {
        Self { storage }
    }

    /// Compare every invoice of a company with the sum of its allocations.
    ///
    /// Allocations are authoritative. With `auto_fix`, mismatched invoices
    /// get their paid amount, balance and status rewritten.
    #[instrument(skip(self))]
    pub async fn reconcile_all_balances(
        &self,
        company_id: Uuid,
        auto_fix: bool,
    ) -> EngineResult<BalanceReconciliationReport> {
        let invoices = self
            .storage
            .list_documents(DocumentKind::Invoice, company_id)
            .await?;

        let mut report = BalanceReconciliationReport {
            company_id,
            checked: 0,
            mismatched: 0,
            fixed: 0,
            discrepancies: Vec::new(),
            errors: Vec::new(),
        };

        for mut invoice in invoices {
            report.checked += 1;

            let allocations = match self.storage.list_invoice_allocations(invoice.id).await {
                Ok(allocations) => allocations,
                Err(err) => {
                    warn!(invoice_id = %invoice.id, error = %err, "Could not load allocations");
                    report.errors.push(InvoiceReconciliationError {
                        invoice_id: invoice.id,
                        number: invoice.number.clone(),
                        message: err.to_string(),
                    });
                    continue;
                }
            };

            let allocated: BigDecimal = allocations
                .iter()
                .map(|allocation| &allocation.amount_allocated)
                .sum();
            let expected_balance = &invoice.total_amount - &allocated;

            if allocated == invoice.paid_amount && expected_balance == invoice.balance_due {
                continue;
            }

            report.mismatched += 1;
            report.discrepancies.push(BalanceDiscrepancy {
                invoice_id: invoice.id,
                number: invoice.number.clone(),
                stored_paid_amount: invoice.paid_amount.clone(),
                stored_balance_due: invoice.balance_due.clone(),
                allocated_amount: allocated.clone(),
                expected_balance_due: expected_balance,
            });

            if !auto_fix {
                continue;
            }

            invoice.set_paid_amount(allocated);
            match self.storage.update_document(&invoice).await {
                Ok(_) => report.fixed += 1,
                Err(err) => {
                    warn!(invoice_id = %invoice.id, error = %err, "Could not correct invoice balance");
                    report.errors.push(InvoiceReconciliationError {
                        invoice_id: invoice.id,
                        number: invoice.number.clone(),
                        message: err.to_string(),
                    });
                }
            }
        }

        info!(
            checked = report.checked,
            mismatched = report.mismatched,
            fixed = report.fixed,
            errors = report.errors.len(),
            "Balance reconciliation finished"
        );
        Ok(report)
    }
}
