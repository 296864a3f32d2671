//! Validation utilities

use bigdecimal::BigDecimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::config::EngineConfig;
use crate::traits::*;
use crate::types::*;

/// Parse an identifier supplied by a caller, naming the field on failure
///
/// `label` is the human name of the field, e.g. "invoice ID".
pub fn parse_entity_id(value: &str, label: &str) -> EngineResult<Uuid> {
    let trimmed = value.trim();
    if trimmed.len() != 36 {
        return Err(EngineError::Validation(format!(
            "Invalid {}: expected a 36-character identifier, got {} characters",
            label,
            trimmed.len()
        )));
    }

    let id = Uuid::parse_str(trimmed).map_err(|err| {
        EngineError::Validation(format!("Invalid {}: {}", label, err))
    })?;

    if id.is_nil() {
        return Err(EngineError::Validation(format!(
            "Invalid {}: nil identifier",
            label
        )));
    }

    Ok(id)
}

/// Validate that an amount is positive
pub fn validate_positive_amount(amount: &BigDecimal, label: &str) -> EngineResult<()> {
    if *amount <= zero() {
        Err(EngineError::Validation(format!(
            "{} must be positive",
            label
        )))
    } else {
        Ok(())
    }
}

/// Validate that a percentage lies within 0..=100
pub fn validate_percentage(value: &BigDecimal, label: &str) -> EngineResult<()> {
    if *value < zero() || *value > BigDecimal::from(100) {
        return Err(EngineError::Validation(format!(
            "{} must be between 0 and 100, got {}",
            label, value
        )));
    }
    Ok(())
}

/// Document validator that also enforces sane line-item values
pub struct StrictDocumentValidator;

impl DocumentValidator for StrictDocumentValidator {
    fn validate_header(&self, header: &DocumentHeader) -> EngineResult<()> {
        DefaultDocumentValidator.validate_header(header)?;

        if let (Some(valid_until), DocumentKind::Quotation) = (header.valid_until, header.kind) {
            if valid_until < header.date {
                return Err(EngineError::Validation(
                    "Quotation validity ends before its date".to_string(),
                ));
            }
        }

        if let Some(due_date) = header.due_date {
            if due_date < header.date {
                return Err(EngineError::Validation(format!(
                    "{} is due before it is issued",
                    header.kind
                )));
            }
        }

        Ok(())
    }

    fn validate_items(&self, items: &[LineItemInput]) -> EngineResult<()> {
        for (index, item) in items.iter().enumerate() {
            let position = index + 1;

            if item.description.trim().is_empty() {
                return Err(EngineError::Validation(format!(
                    "Line {} has no description",
                    position
                )));
            }

            validate_positive_amount(&item.quantity, &format!("Quantity on line {}", position))?;

            if item.unit_price < zero() {
                return Err(EngineError::Validation(format!(
                    "Unit price on line {} cannot be negative",
                    position
                )));
            }

            validate_percentage(
                &item.tax_percentage,
                &format!("Tax percentage on line {}", position),
            )?;
            validate_percentage(
                &item.discount_percentage,
                &format!("Discount percentage on line {}", position),
            )?;

            if let Some(discount) = &item.discount_before_vat {
                if *discount < zero() || *discount > &item.quantity * &item.unit_price {
                    return Err(EngineError::Validation(format!(
                        "Discount on line {} exceeds the line amount",
                        position
                    )));
                }
            }
        }

        Ok(())
    }
}

/// Severity of an advisory counterparty warning
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictSeverity {
    Informational,
    Minor,
    Moderate,
}

/// Advisory finding that never blocks the action
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConflictWarning {
    pub severity: ConflictSeverity,
    pub message: String,
}

/// Customer-side history found for a counterparty
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConflictData {
    pub counterparty_id: Uuid,
    pub customer_invoice_count: usize,
}

/// Result of checking a counterparty selected as a supplier
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CounterpartyValidation {
    pub is_valid: bool,
    /// Blocking problems
    pub errors: Vec<String>,
    pub warnings: Vec<ConflictWarning>,
    pub conflict_data: Option<ConflictData>,
}

impl CounterpartyValidation {
    /// Grade a supplier by how many customer invoices it already has
    pub fn classify(
        counterparty_id: Uuid,
        customer_invoice_count: usize,
        config: &EngineConfig,
    ) -> Self {
        let mut result = Self {
            is_valid: true,
            errors: Vec::new(),
            warnings: Vec::new(),
            conflict_data: None,
        };

        if customer_invoice_count == 0 {
            return result;
        }

        result.conflict_data = Some(ConflictData {
            counterparty_id,
            customer_invoice_count,
        });

        if customer_invoice_count > config.supplier_conflict_threshold {
            result.is_valid = false;
            result.errors.push(format!(
                "This counterparty has {} invoices as a customer (limit {}) and cannot be used as a supplier",
                customer_invoice_count, config.supplier_conflict_threshold
            ));
            return result;
        }

        let severity = if customer_invoice_count >= config.supplier_conflict_moderate_from {
            ConflictSeverity::Moderate
        } else if customer_invoice_count >= config.supplier_conflict_minor_from {
            ConflictSeverity::Minor
        } else {
            ConflictSeverity::Informational
        };

        result.warnings.push(ConflictWarning {
            severity,
            message: format!(
                "This counterparty also has {} invoice(s) as a customer",
                customer_invoice_count
            ),
        });

        result
    }
}

/// Check whether a counterparty chosen as a supplier already buys from the company
pub async fn validate_supplier_selection<S: LedgerStore>(
    storage: &S,
    company_id: Uuid,
    supplier_id: Uuid,
    config: &EngineConfig,
) -> EngineResult<CounterpartyValidation> {
    if supplier_id.is_nil() {
        return Ok(CounterpartyValidation {
            is_valid: false,
            errors: vec!["A supplier must be selected".to_string()],
            warnings: Vec::new(),
            conflict_data: None,
        });
    }

    let count = storage
        .count_counterparty_documents(DocumentKind::Invoice, company_id, supplier_id)
        .await?;

    Ok(CounterpartyValidation::classify(supplier_id, count, config))
}
