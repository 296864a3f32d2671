//! Document number generation

use chrono::{DateTime, Datelike, Utc};
use tracing::warn;
use uuid::Uuid;

use crate::traits::*;
use crate::types::*;

/// Client-side number used when the generator is unavailable:
/// `TYPE-<year>-<unix millis>`
pub fn fallback_number(kind: DocumentKind, now: DateTime<Utc>) -> String {
    format!(
        "{}-{}-{}",
        kind.number_prefix(),
        now.year(),
        now.timestamp_millis()
    )
}

/// Whether `number` has the shape produced by [`fallback_number`]
pub fn is_fallback_number(number: &str) -> bool {
    let parts: Vec<&str> = number.split('-').collect();
    matches!(
        parts.as_slice(),
        [_, year, millis]
            if year.len() == 4
                && millis.len() >= 13
                && year.chars().all(|c| c.is_ascii_digit())
                && millis.chars().all(|c| c.is_ascii_digit())
    )
}

/// Requests sequential document numbers from the store's generator
#[derive(Debug, Clone)]
pub struct NumberingService<S: LedgerStore> {
    storage: S,
    allow_fallback: bool,
}

impl<S: LedgerStore> NumberingService<S> {
    /// Create a numbering service
    pub fn new(storage: S, allow_fallback: bool) -> Self {
        Self {
            storage,
            allow_fallback,
        }
    }

    /// Next number for `kind`; a fallback number is returned with a warning
    pub async fn next_number(
        &self,
        company_id: Uuid,
        kind: DocumentKind,
    ) -> EngineResult<Outcome<String>> {
        let failure = match self.storage.generate_document_number(company_id, kind).await {
            Ok(number) if !number.trim().is_empty() => return Ok(Outcome::new(number)),
            Ok(_) => StoreError::other("number generator returned an empty number"),
            Err(err) => err,
        };

        if !self.allow_fallback {
            return Err(EngineError::DependencyUnavailable(format!(
                "{} number generator failed: {}",
                kind, failure
            )));
        }

        let number = fallback_number(kind, Utc::now());
        warn!(
            %company_id,
            kind = kind.number_prefix(),
            code = %failure.code,
            error = %failure.message,
            %number,
            "Number generator failed, using fallback number"
        );

        Ok(Outcome::with_warnings(
            number.clone(),
            vec![Warning::new(
                WarningKind::FallbackNumberUsed,
                format!(
                    "Generated fallback {} number {}; the sequence generator is unavailable",
                    kind, number
                ),
            )],
        ))
    }
}
