//! Engine configuration

use serde::{Deserialize, Serialize};

/// Tunables for the document engine
///
/// Deserializes with defaults for any missing field, so consumers can load
/// a partial table from their own configuration source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Synthesize a `TYPE-<year>-<timestamp>` number when the generator fails
    pub numbering_fallback: bool,
    /// Customer-invoice count above which a counterparty cannot be used as a supplier
    pub supplier_conflict_threshold: usize,
    /// Invoice count from which a supplier conflict is reported as minor
    pub supplier_conflict_minor_from: usize,
    /// Invoice count from which a supplier conflict is reported as moderate
    pub supplier_conflict_moderate_from: usize,
    /// Use the strict document validator
    pub strict_validation: bool,
    /// Inventory effect of new invoices that do not say otherwise
    pub default_affects_inventory: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            numbering_fallback: true,
            supplier_conflict_threshold: 10,
            supplier_conflict_minor_from: 3,
            supplier_conflict_moderate_from: 6,
            strict_validation: false,
            default_affects_inventory: true,
        }
    }
}
