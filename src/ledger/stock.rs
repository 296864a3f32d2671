//! Stock ledger: movement rows and the denormalized product counters

use bigdecimal::BigDecimal;
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

use crate::traits::*;
use crate::types::*;
use crate::utils::validation::validate_positive_amount;

/// A single stock movement requested by a caller
#[derive(Debug, Clone, PartialEq)]
pub struct MovementRequest {
    pub company_id: Uuid,
    pub product_id: Uuid,
    pub movement_type: MovementType,
    pub reference_type: ReferenceType,
    pub reference_id: Option<Uuid>,
    /// Magnitude for IN/OUT; signed for ADJUSTMENT
    pub quantity: BigDecimal,
    pub cost_per_unit: Option<BigDecimal>,
    pub notes: Option<String>,
}

/// How counter updates for a batch of movements are issued
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CounterUpdates {
    /// All requests in flight at once, each settled on its own
    Concurrent,
    /// One after another, in movement order
    Sequential,
}

/// Product whose counter disagrees with its movements
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StockDiscrepancy {
    pub product_id: Uuid,
    pub product_name: String,
    pub recorded_quantity: BigDecimal,
    pub ledger_quantity: BigDecimal,
}

/// Result of a stock reconciliation sweep
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StockReconciliationReport {
    pub company_id: Uuid,
    pub checked: usize,
    pub mismatched: usize,
    pub fixed: usize,
    pub discrepancies: Vec<StockDiscrepancy>,
    /// Per-product failures that did not stop the sweep
    pub errors: Vec<String>,
}

/// Turn a failed movement write inside a document operation into a warning.
///
/// Ledger constraint violations stay fatal: the document is valid but the
/// inventory side needs an operator.
pub(crate) fn degrade_ledger_failure(
    err: EngineError,
    document_id: Uuid,
    stage: &str,
) -> EngineResult<Warning> {
    if err.is_conflict() {
        error!(%document_id, error = %err, "Stock ledger constraint violated during {}", stage);
        return Err(err);
    }

    warn!(%document_id, error = %err, "Stock movements not recorded during {}", stage);
    Ok(Warning::new(
        WarningKind::StockMovementFailed,
        format!("Stock movements for {} were not recorded: {}", stage, err),
    ))
}

/// Stock manager for movement rows and product counters
#[derive(Debug, Clone)]
pub struct StockManager<S: LedgerStore> {
    storage: S,
}

impl<S: LedgerStore> StockManager<S> {
    /// Create a new stock manager
    pub fn new(storage: S) -> Self {
        Self { storage }
    }

    /// Record one movement and move the product's counter.
    ///
    /// The ledger row is the primary write; a failed counter update is
    /// returned as a warning and left for reconciliation.
    #[instrument(skip(self, request), fields(product_id = %request.product_id, movement_type = %request.movement_type))]
    pub async fn apply_movement(
        &self,
        request: MovementRequest,
    ) -> EngineResult<Outcome<StockMovement>> {
        if request.quantity == zero() {
            return Err(EngineError::Validation(
                "Movement quantity cannot be zero".to_string(),
            ));
        }

        let product = self
            .storage
            .get_product(request.product_id)
            .await?
            .filter(|product| product.company_id == request.company_id)
            .ok_or_else(|| {
                EngineError::Validation(format!("Unknown product {}", request.product_id))
            })?;

        let mut movement = StockMovement::new(
            request.company_id,
            product.id,
            request.movement_type,
            request.reference_type,
            request.reference_id,
            &request.quantity,
        )
        .with_cost(request.cost_per_unit);
        movement.notes = request.notes;

        let outcome = self
            .post_movements(vec![movement], CounterUpdates::Sequential)
            .await?;
        let warnings = outcome.warnings;
        let movement = outcome
            .value
            .into_iter()
            .next()
            .ok_or_else(|| EngineError::Storage(StoreError::other("movement insert returned no rows")))?;

        info!(movement_id = %movement.id, quantity = %movement.quantity, "Stock movement recorded");
        Ok(Outcome::with_warnings(movement, warnings))
    }

    /// Receive stock for a product
    pub async fn restock_product(
        &self,
        company_id: Uuid,
        product_id: Uuid,
        quantity: BigDecimal,
        cost_per_unit: Option<BigDecimal>,
        notes: Option<String>,
    ) -> EngineResult<Outcome<StockMovement>> {
        validate_positive_amount(&quantity, "Restock quantity")?;

        self.apply_movement(MovementRequest {
            company_id,
            product_id,
            movement_type: MovementType::In,
            reference_type: ReferenceType::Restock,
            reference_id: None,
            quantity,
            cost_per_unit,
            notes: notes.or_else(|| Some("Restock".to_string())),
        })
        .await
    }

    /// OUT movements for every product line of a document
    pub fn outbound_movements<'a>(
        company_id: Uuid,
        reference_type: ReferenceType,
        reference_id: Uuid,
        document_number: &str,
        lines: impl IntoIterator<Item = (Uuid, &'a BigDecimal)>,
    ) -> Vec<StockMovement> {
        lines
            .into_iter()
            .filter(|(_, quantity)| **quantity != zero())
            .map(|(product_id, quantity)| {
                StockMovement::new(
                    company_id,
                    product_id,
                    MovementType::Out,
                    reference_type,
                    Some(reference_id),
                    quantity,
                )
                .with_notes(format!("Stock out for {}", document_number))
            })
            .collect()
    }

    /// Compensating entry for `original`: direction flipped, quantity negated
    pub fn reversal_of(original: &StockMovement, document_number: &str) -> StockMovement {
        StockMovement {
            id: Uuid::new_v4(),
            company_id: original.company_id,
            product_id: original.product_id,
            movement_type: original.movement_type.reversed(),
            reference_type: ReferenceType::Adjustment,
            reference_id: original.reference_id,
            quantity: -original.quantity.clone(),
            cost_per_unit: original.cost_per_unit.clone(),
            notes: Some(format!(
                "Reversal of {} movement for {}",
                original.movement_type, document_number
            )),
            reverses_movement_id: Some(original.id),
            created_at: chrono::Utc::now().naive_utc(),
        }
    }

    /// Insert movements, then update the product counters they affect
    pub async fn post_movements(
        &self,
        movements: Vec<StockMovement>,
        mode: CounterUpdates,
    ) -> EngineResult<Outcome<Vec<StockMovement>>> {
        if movements.is_empty() {
            return Ok(Outcome::new(movements));
        }

        let inserted = self.storage.insert_stock_movements(&movements).await?;
        let warnings = match mode {
            CounterUpdates::Concurrent => self.update_counters_concurrently(&inserted).await,
            CounterUpdates::Sequential => self.update_counters_sequentially(&inserted).await,
        };

        Ok(Outcome::with_warnings(inserted, warnings))
    }

    /// Issue every counter update at once and settle each independently
    pub async fn update_counters_concurrently(&self, movements: &[StockMovement]) -> Vec<Warning> {
        let requests: Vec<(Uuid, StockDirection, BigDecimal)> = movements
            .iter()
            .map(|movement| (movement.product_id, movement.direction(), movement.magnitude()))
            .collect();

        let results = join_all(requests.iter().map(|(product_id, direction, magnitude)| {
            self.storage
                .update_product_stock(*product_id, *direction, magnitude)
        }))
        .await;

        let warnings: Vec<Warning> = requests
            .iter()
            .zip(results)
            .filter_map(|((product_id, _, _), result)| {
                result
                    .err()
                    .map(|err| counter_failure(*product_id, &err))
            })
            .collect();

        if !warnings.is_empty() {
            warn!(
                failed = warnings.len(),
                total = requests.len(),
                "Stock counter updates failed"
            );
        }
        warnings
    }

    /// Issue counter updates one at a time, in movement order
    pub async fn update_counters_sequentially(&self, movements: &[StockMovement]) -> Vec<Warning> {
        let mut warnings = Vec::new();
        for movement in movements {
            if let Err(err) = self
                .storage
                .update_product_stock(
                    movement.product_id,
                    movement.direction(),
                    &movement.magnitude(),
                )
                .await
            {
                warnings.push(counter_failure(movement.product_id, &err));
            }
        }
        warnings
    }

    /// Movements recorded for a document that have not been reversed yet
    pub async fn outstanding_movements(
        &self,
        company_id: Uuid,
        reference_type: ReferenceType,
        reference_id: Uuid,
    ) -> EngineResult<Vec<StockMovement>> {
        let movements = self
            .storage
            .list_stock_movements(&MovementFilter {
                company_id: Some(company_id),
                reference_id: Some(reference_id),
                ..MovementFilter::default()
            })
            .await?;

        let reversed: HashSet<Uuid> = movements
            .iter()
            .filter_map(|movement| movement.reverses_movement_id)
            .collect();

        Ok(movements
            .into_iter()
            .filter(|movement| {
                movement.reference_type == reference_type
                    && movement.reverses_movement_id.is_none()
                    && !reversed.contains(&movement.id)
            })
            .collect())
    }

    /// Insert a compensating entry for every outstanding movement of a document
    #[instrument(skip(self, document_number))]
    pub async fn reverse_document_movements(
        &self,
        company_id: Uuid,
        reference_type: ReferenceType,
        reference_id: Uuid,
        document_number: &str,
    ) -> EngineResult<Outcome<Vec<StockMovement>>> {
        let outstanding = self
            .outstanding_movements(company_id, reference_type, reference_id)
            .await?;

        let reversals: Vec<StockMovement> = outstanding
            .iter()
            .map(|movement| Self::reversal_of(movement, document_number))
            .collect();

        if !reversals.is_empty() {
            info!(count = reversals.len(), "Reversing stock movements");
        }
        self.post_movements(reversals, CounterUpdates::Concurrent)
            .await
    }

    /// Compare every product's counter with the sum of its movements.
    ///
    /// With `auto_fix`, counters are overwritten from the ledger.
    #[instrument(skip(self))]
    pub async fn reconcile_stock_levels(
        &self,
        company_id: Uuid,
        auto_fix: bool,
    ) -> EngineResult<StockReconciliationReport> {
        let products = self.storage.list_products(company_id).await?;
        let mut report = StockReconciliationReport {
            company_id,
            checked: 0,
            mismatched: 0,
            fixed: 0,
            discrepancies: Vec::new(),
            errors: Vec::new(),
        };

        for product in products {
            report.checked += 1;

            let movements = match self
                .storage
                .list_stock_movements(&MovementFilter {
                    product_id: Some(product.id),
                    ..MovementFilter::default()
                })
                .await
            {
                Ok(movements) => movements,
                Err(err) => {
                    warn!(product_id = %product.id, error = %err, "Could not load stock movements");
                    report
                        .errors
                        .push(format!("{} ({}): {}", product.name, product.id, err));
                    continue;
                }
            };

            let ledger_quantity: BigDecimal =
                movements.iter().map(|movement| &movement.quantity).sum();
            if ledger_quantity == product.stock_quantity {
                continue;
            }

            report.mismatched += 1;
            report.discrepancies.push(StockDiscrepancy {
                product_id: product.id,
                product_name: product.name.clone(),
                recorded_quantity: product.stock_quantity.clone(),
                ledger_quantity: ledger_quantity.clone(),
            });

            if auto_fix {
                match self
                    .storage
                    .set_product_stock(product.id, &ledger_quantity)
                    .await
                {
                    Ok(()) => report.fixed += 1,
                    Err(err) => {
                        warn!(product_id = %product.id, error = %err, "Could not correct stock counter");
                        report
                            .errors
                            .push(format!("{} ({}): {}", product.name, product.id, err));
                    }
                }
            }
        }

        info!(
            checked = report.checked,
            mismatched = report.mismatched,
            fixed = report.fixed,
            "Stock reconciliation finished"
        );
        Ok(report)
    }
}

fn counter_failure(product_id: Uuid, err: &StoreError) -> Warning {
    warn!(
        %product_id,
        code = %err.code,
        error = %err.message,
        hint = err.hint.as_deref().unwrap_or(""),
        "Stock counter update failed"
    );
    Warning::for_product(
        WarningKind::StockUpdateFailed,
        product_id,
        format!("Stock update for product {} failed: {}", product_id, err),
    )
}
