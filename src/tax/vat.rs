//! VAT and discount computation for document line items

use bigdecimal::{BigDecimal, RoundingMode};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::types::*;

/// Round a monetary amount to cents, half away from zero
pub fn round_money(amount: &BigDecimal) -> BigDecimal {
    amount.with_scale_round(2, RoundingMode::HalfUp)
}

/// Header totals derived from line items
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentTotals {
    pub subtotal: BigDecimal,
    pub tax_amount: BigDecimal,
    pub total_amount: BigDecimal,
}

impl DocumentTotals {
    /// Sum net amounts and tax across `items`
    pub fn from_items(items: &[LineItem]) -> Self {
        let subtotal: BigDecimal = items.iter().map(|item| item.net_amount()).sum();
        let tax_amount: BigDecimal = items.iter().map(|item| &item.tax_amount).sum();
        let total_amount = &subtotal + &tax_amount;
        Self {
            subtotal,
            tax_amount,
            total_amount,
        }
    }

    /// Copy these totals onto a header
    pub fn apply_to(&self, header: &mut DocumentHeader) {
        header.subtotal = self.subtotal.clone();
        header.tax_amount = self.tax_amount.clone();
        header.total_amount = self.total_amount.clone();
    }
}

/// Per-line amounts before they are attached to a document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LinePricing {
    /// quantity x unit price
    pub gross_amount: BigDecimal,
    pub discount_amount: BigDecimal,
    pub net_amount: BigDecimal,
    pub tax_amount: BigDecimal,
    pub line_total: BigDecimal,
}

impl LinePricing {
    /// Price a line.
    ///
    /// Tax-exclusive lines add VAT on top of the discounted amount.
    /// Tax-inclusive lines treat the discounted amount as the total and back
    /// the VAT out of it.
    pub fn calculate(input: &LineItemInput) -> Self {
        let hundred = BigDecimal::from(100);
        let gross_amount = &input.quantity * &input.unit_price;
        let discount_amount = match &input.discount_before_vat {
            Some(amount) => amount.clone(),
            None => &gross_amount * &input.discount_percentage / hundred.clone(),
        };
        let discounted = &gross_amount - &discount_amount;

        let (net_amount, tax_amount, line_total) = if input.tax_inclusive {
            let divisor = &hundred + &input.tax_percentage;
            let tax = round_money(&(&discounted * &input.tax_percentage / divisor));
            let total = round_money(&discounted);
            (&total - &tax, tax, total)
        } else {
            let net = round_money(&discounted);
            let tax = round_money(&(&net * &input.tax_percentage / hundred));
            let total = &net + &tax;
            (net, tax, total)
        };

        Self {
            gross_amount: round_money(&gross_amount),
            discount_amount: round_money(&discount_amount),
            net_amount,
            tax_amount,
            line_total,
        }
    }
}

/// Build persisted line items for a document, assigning 1-based sort order
pub fn price_line_items(document_id: Uuid, inputs: &[LineItemInput]) -> Vec<LineItem> {
    inputs
        .iter()
        .enumerate()
        .map(|(index, input)| {
            let pricing = LinePricing::calculate(input);
            LineItem {
                id: Uuid::new_v4(),
                document_id,
                product_id: input.product_id,
                description: input.description.clone(),
                quantity: input.quantity.clone(),
                unit_price: input.unit_price.clone(),
                discount_percentage: input.discount_percentage.clone(),
                tax_percentage: input.tax_percentage.clone(),
                tax_amount: pricing.tax_amount,
                tax_inclusive: input.tax_inclusive,
                line_total: pricing.line_total,
                sort_order: index as u32 + 1,
                extras: LineItemExtras {
                    discount_before_vat: input.discount_before_vat.clone(),
                    unit_of_measure: input.unit_of_measure.clone(),
                },
            }
        })
        .collect()
}
