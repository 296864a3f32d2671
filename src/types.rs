//! Core types and data structures for the sales-document engine

use bigdecimal::BigDecimal;
use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use uuid::Uuid;

/// Zero as a `BigDecimal`, used for balance comparisons throughout the crate
pub fn zero() -> BigDecimal {
    BigDecimal::from(0)
}

/// Kinds of sales and purchasing documents handled by the engine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocumentKind {
    Quotation,
    Invoice,
    Proforma,
    /// Local purchase order, raised against a supplier
    Lpo,
    DeliveryNote,
    CreditNote,
}

impl DocumentKind {
    /// Table holding the document headers
    pub fn table(&self) -> &'static str {
        match self {
            DocumentKind::Quotation => "quotations",
            DocumentKind::Invoice => "invoices",
            DocumentKind::Proforma => "proforma_invoices",
            DocumentKind::Lpo => "lpos",
            DocumentKind::DeliveryNote => "delivery_notes",
            DocumentKind::CreditNote => "credit_notes",
        }
    }

    /// Table holding the document's child rows
    pub fn items_table(&self) -> &'static str {
        match self {
            DocumentKind::Quotation => "quotation_items",
            DocumentKind::Invoice => "invoice_items",
            DocumentKind::Proforma => "proforma_items",
            DocumentKind::Lpo => "lpo_items",
            DocumentKind::DeliveryNote => "delivery_note_items",
            DocumentKind::CreditNote => "credit_note_items",
        }
    }

    /// Type tag used by the number generator and fallback numbers
    pub fn number_prefix(&self) -> &'static str {
        match self {
            DocumentKind::Quotation => "QUO",
            DocumentKind::Invoice => "INV",
            DocumentKind::Proforma => "PRF",
            DocumentKind::Lpo => "LPO",
            DocumentKind::DeliveryNote => "DN",
            DocumentKind::CreditNote => "CN",
        }
    }

    /// Human-readable label for messages
    pub fn label(&self) -> &'static str {
        match self {
            DocumentKind::Quotation => "quotation",
            DocumentKind::Invoice => "invoice",
            DocumentKind::Proforma => "proforma invoice",
            DocumentKind::Lpo => "purchase order",
            DocumentKind::DeliveryNote => "delivery note",
            DocumentKind::CreditNote => "credit note",
        }
    }

    /// Which side of the business the counterparty sits on
    pub fn counterparty_role(&self) -> CounterpartyRole {
        match self {
            DocumentKind::Lpo => CounterpartyRole::Supplier,
            _ => CounterpartyRole::Customer,
        }
    }

    /// Whether `status` belongs to this document type's lifecycle
    pub fn allows_status(&self, status: DocumentStatus) -> bool {
        use DocumentStatus::*;
        let allowed: &[DocumentStatus] = match self {
            DocumentKind::Quotation => &[Draft, Sent, Accepted, Rejected, Expired, Converted],
            DocumentKind::Invoice => &[Draft, Sent, Partial, Paid, Overdue, Cancelled],
            DocumentKind::Proforma => &[Draft, Sent, Accepted, Expired, Converted],
            DocumentKind::Lpo => &[Draft, Sent, Approved, Received, Cancelled],
            DocumentKind::DeliveryNote => &[Draft, Sent, Delivered, Cancelled],
            DocumentKind::CreditNote => &[Draft, Sent, Cancelled],
        };
        allowed.contains(&status)
    }
}

impl fmt::Display for DocumentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Document status values across all document types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocumentStatus {
    Draft,
    Sent,
    Accepted,
    Rejected,
    Expired,
    /// Terminal state of a quotation or proforma that produced another document
    Converted,
    Partial,
    Paid,
    /// Derived from `due_date`; never written by the engine
    Overdue,
    Approved,
    Received,
    Delivered,
    Cancelled,
}

impl DocumentStatus {
    /// Invoice status from its payment figures.
    ///
    /// A zero `paid_amount` always yields `Draft`, including for an invoice
    /// that had been sent before its payments were reversed.
    pub fn from_balances(paid_amount: &BigDecimal, balance_due: &BigDecimal) -> Self {
        if *paid_amount == zero() {
            DocumentStatus::Draft
        } else if *balance_due <= zero() {
            DocumentStatus::Paid
        } else {
            DocumentStatus::Partial
        }
    }
}

/// Side of the business a counterparty sits on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CounterpartyRole {
    Customer,
    Supplier,
}

/// Document header shared by every document type
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentHeader {
    pub id: Uuid,
    pub company_id: Uuid,
    pub kind: DocumentKind,
    /// Customer id, or supplier id for purchase orders
    pub counterparty_id: Uuid,
    /// Sequential number per company and document type
    pub number: String,
    pub date: NaiveDate,
    pub valid_until: Option<NaiveDate>,
    pub due_date: Option<NaiveDate>,
    pub delivery_date: Option<NaiveDate>,
    pub status: DocumentStatus,
    pub subtotal: BigDecimal,
    pub tax_amount: BigDecimal,
    pub total_amount: BigDecimal,
    /// Invoices only; zero elsewhere
    pub paid_amount: BigDecimal,
    /// Invoices only; zero elsewhere
    pub balance_due: BigDecimal,
    pub affects_inventory: bool,
    /// Quotation or proforma this document was converted from, or the
    /// invoice a delivery note fulfils
    pub source_document_id: Option<Uuid>,
    pub notes: Option<String>,
    pub terms: Option<String>,
    pub created_by: Option<Uuid>,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

impl DocumentHeader {
    /// Create a draft header with zero totals
    pub fn new(
        kind: DocumentKind,
        company_id: Uuid,
        counterparty_id: Uuid,
        number: String,
        date: NaiveDate,
    ) -> Self {
        let now = chrono::Utc::now().naive_utc();
        Self {
            id: Uuid::new_v4(),
            company_id,
            kind,
            counterparty_id,
            number,
            date,
            valid_until: None,
            due_date: None,
            delivery_date: None,
            status: DocumentStatus::Draft,
            subtotal: zero(),
            tax_amount: zero(),
            total_amount: zero(),
            paid_amount: zero(),
            balance_due: zero(),
            affects_inventory: false,
            source_document_id: None,
            notes: None,
            terms: None,
            created_by: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Whether `total_amount == subtotal + tax_amount`
    pub fn totals_consistent(&self) -> bool {
        self.total_amount == &self.subtotal + &self.tax_amount
    }

    /// Whether `balance_due == total_amount - paid_amount`
    pub fn balance_consistent(&self) -> bool {
        self.balance_due == &self.total_amount - &self.paid_amount
    }

    /// Set `paid_amount`, recompute `balance_due`, and derive the invoice status
    pub fn set_paid_amount(&mut self, paid_amount: BigDecimal) {
        self.balance_due = &self.total_amount - &paid_amount;
        self.paid_amount = paid_amount;
        self.status = DocumentStatus::from_balances(&self.paid_amount, &self.balance_due);
        self.updated_at = chrono::Utc::now().naive_utc();
    }

    /// Status as seen on `today`: unpaid invoices past their due date are overdue
    pub fn effective_status(&self, today: NaiveDate) -> DocumentStatus {
        let settled = matches!(
            self.status,
            DocumentStatus::Paid | DocumentStatus::Cancelled | DocumentStatus::Draft
        );
        match (self.kind, self.due_date) {
            (DocumentKind::Invoice, Some(due)) if due < today && !settled => {
                if self.balance_due > zero() {
                    DocumentStatus::Overdue
                } else {
                    self.status
                }
            }
            _ => self.status,
        }
    }
}

/// Optional extended line-item columns that may not exist in every deployment
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LineItemExtras {
    /// Absolute discount taken before VAT, overriding the percentage
    pub discount_before_vat: Option<BigDecimal>,
    pub unit_of_measure: Option<String>,
}

impl LineItemExtras {
    /// Clear the value stored for `column`
    pub fn strip(&mut self, column: OptionalColumn) {
        match column {
            OptionalColumn::DiscountBeforeVat => self.discount_before_vat = None,
            OptionalColumn::UnitOfMeasure => self.unit_of_measure = None,
        }
    }

    /// Whether a value is present for `column`
    pub fn has(&self, column: OptionalColumn) -> bool {
        match column {
            OptionalColumn::DiscountBeforeVat => self.discount_before_vat.is_some(),
            OptionalColumn::UnitOfMeasure => self.unit_of_measure.is_some(),
        }
    }
}

/// Line-item columns the engine may drop when the store does not know them
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OptionalColumn {
    DiscountBeforeVat,
    UnitOfMeasure,
}

impl OptionalColumn {
    pub const ALL: [OptionalColumn; 2] =
        [OptionalColumn::DiscountBeforeVat, OptionalColumn::UnitOfMeasure];

    pub fn column_name(&self) -> &'static str {
        match self {
            OptionalColumn::DiscountBeforeVat => "discount_before_vat",
            OptionalColumn::UnitOfMeasure => "unit_of_measure",
        }
    }

    /// Match a column name reported by the store
    pub fn from_column_name(column: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|candidate| candidate.column_name() == column)
    }
}

/// Line item owned by a document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LineItem {
    pub id: Uuid,
    pub document_id: Uuid,
    /// `None` for free-text lines
    pub product_id: Option<Uuid>,
    pub description: String,
    pub quantity: BigDecimal,
    pub unit_price: BigDecimal,
    pub discount_percentage: BigDecimal,
    pub tax_percentage: BigDecimal,
    pub tax_amount: BigDecimal,
    pub tax_inclusive: bool,
    pub line_total: BigDecimal,
    /// 1-based insertion index
    pub sort_order: u32,
    pub extras: LineItemExtras,
}

impl LineItem {
    /// Copy of this item re-parented to another document with a fresh id
    pub fn copy_to(&self, document_id: Uuid, sort_order: u32) -> Self {
        Self {
            id: Uuid::new_v4(),
            document_id,
            sort_order,
            ..self.clone()
        }
    }

    /// Amount excluding tax
    pub fn net_amount(&self) -> BigDecimal {
        &self.line_total - &self.tax_amount
    }
}

/// Caller-supplied line item before tax and totals are derived
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LineItemInput {
    pub product_id: Option<Uuid>,
    pub description: String,
    pub quantity: BigDecimal,
    pub unit_price: BigDecimal,
    pub discount_percentage: BigDecimal,
    pub discount_before_vat: Option<BigDecimal>,
    pub tax_percentage: BigDecimal,
    pub tax_inclusive: bool,
    pub unit_of_measure: Option<String>,
}

impl LineItemInput {
    /// Tax-exclusive product line without discount
    pub fn product(
        product_id: Uuid,
        description: impl Into<String>,
        quantity: BigDecimal,
        unit_price: BigDecimal,
        tax_percentage: BigDecimal,
    ) -> Self {
        Self {
            product_id: Some(product_id),
            description: description.into(),
            quantity,
            unit_price,
            discount_percentage: zero(),
            discount_before_vat: None,
            tax_percentage,
            tax_inclusive: false,
            unit_of_measure: None,
        }
    }

    /// Tax-exclusive free-text line
    pub fn service(
        description: impl Into<String>,
        quantity: BigDecimal,
        unit_price: BigDecimal,
        tax_percentage: BigDecimal,
    ) -> Self {
        Self {
            product_id: None,
            ..Self::product(Uuid::nil(), description, quantity, unit_price, tax_percentage)
        }
    }
}

/// Delivery-note row; quantities may diverge from what was ordered
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeliveryItem {
    pub id: Uuid,
    pub delivery_note_id: Uuid,
    pub product_id: Uuid,
    pub description: String,
    pub quantity_ordered: BigDecimal,
    pub quantity_delivered: BigDecimal,
    pub sort_order: u32,
}

/// Product with its denormalized stock counter
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Product {
    pub id: Uuid,
    pub company_id: Uuid,
    pub name: String,
    pub sku: Option<String>,
    /// Must equal the signed sum of the product's stock movements
    pub stock_quantity: BigDecimal,
    pub cost_price: Option<BigDecimal>,
    pub selling_price: Option<BigDecimal>,
}

impl Product {
    pub fn new(company_id: Uuid, name: impl Into<String>, stock_quantity: BigDecimal) -> Self {
        Self {
            id: Uuid::new_v4(),
            company_id,
            name: name.into(),
            sku: None,
            stock_quantity,
            cost_price: None,
            selling_price: None,
        }
    }
}

/// Direction of a stock movement
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum MovementType {
    In,
    Out,
    Adjustment,
}

impl MovementType {
    /// Opposite direction; adjustments stay adjustments
    pub fn reversed(&self) -> Self {
        match self {
            MovementType::In => MovementType::Out,
            MovementType::Out => MovementType::In,
            MovementType::Adjustment => MovementType::Adjustment,
        }
    }

    /// Ledger quantity for a movement of this type: IN positive, OUT
    /// negative, ADJUSTMENT keeps the sign it was given
    pub fn signed_quantity(&self, quantity: &BigDecimal) -> BigDecimal {
        match self {
            MovementType::In => quantity.abs(),
            MovementType::Out => -quantity.abs(),
            MovementType::Adjustment => quantity.clone(),
        }
    }
}

impl fmt::Display for MovementType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MovementType::In => f.write_str("IN"),
            MovementType::Out => f.write_str("OUT"),
            MovementType::Adjustment => f.write_str("ADJUSTMENT"),
        }
    }
}

/// What caused a stock movement
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReferenceType {
    Invoice,
    DeliveryNote,
    Restock,
    Adjustment,
}

/// Direction applied to a product's stock counter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StockDirection {
    Increase,
    Decrease,
}

/// Append-only stock ledger entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StockMovement {
    pub id: Uuid,
    pub company_id: Uuid,
    pub product_id: Uuid,
    pub movement_type: MovementType,
    pub reference_type: ReferenceType,
    /// Originating document; `None` for manual restocks
    pub reference_id: Option<Uuid>,
    /// Signed quantity; the product's stock is the sum of these
    pub quantity: BigDecimal,
    pub cost_per_unit: Option<BigDecimal>,
    pub notes: Option<String>,
    /// Set on compensating entries
    pub reverses_movement_id: Option<Uuid>,
    pub created_at: NaiveDateTime,
}

impl StockMovement {
    /// Create a movement, normalizing the quantity's sign from `movement_type`
    pub fn new(
        company_id: Uuid,
        product_id: Uuid,
        movement_type: MovementType,
        reference_type: ReferenceType,
        reference_id: Option<Uuid>,
        quantity: &BigDecimal,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            company_id,
            product_id,
            movement_type,
            reference_type,
            reference_id,
            quantity: movement_type.signed_quantity(quantity),
            cost_per_unit: None,
            notes: None,
            reverses_movement_id: None,
            created_at: chrono::Utc::now().naive_utc(),
        }
    }

    pub fn with_notes(mut self, notes: impl Into<String>) -> Self {
        self.notes = Some(notes.into());
        self
    }

    pub fn with_cost(mut self, cost_per_unit: Option<BigDecimal>) -> Self {
        self.cost_per_unit = cost_per_unit;
        self
    }

    /// Counter direction; adjustments take it from the ledger sign
    pub fn direction(&self) -> StockDirection {
        match self.movement_type {
            MovementType::In => StockDirection::Increase,
            MovementType::Out => StockDirection::Decrease,
            MovementType::Adjustment if self.quantity < zero() => StockDirection::Decrease,
            MovementType::Adjustment => StockDirection::Increase,
        }
    }

    /// Non-negative quantity passed to counter updates
    pub fn magnitude(&self) -> BigDecimal {
        self.quantity.abs()
    }
}

/// Filter for stock movement queries
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MovementFilter {
    pub company_id: Option<Uuid>,
    pub product_id: Option<Uuid>,
    pub reference_type: Option<ReferenceType>,
    pub reference_id: Option<Uuid>,
}

impl MovementFilter {
    pub fn matches(&self, movement: &StockMovement) -> bool {
        self.company_id.is_none_or(|id| movement.company_id == id)
            && self.product_id.is_none_or(|id| movement.product_id == id)
            && self
                .reference_type
                .is_none_or(|t| movement.reference_type == t)
            && self
                .reference_id
                .is_none_or(|id| movement.reference_id == Some(id))
    }
}

/// How a payment was made
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentMethod {
    Cash,
    BankTransfer,
    Cheque,
    MobileMoney,
    Card,
    Other,
}

/// Payment received from a customer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Payment {
    pub id: Uuid,
    pub company_id: Uuid,
    pub customer_id: Uuid,
    pub amount: BigDecimal,
    pub method: PaymentMethod,
    pub reference: Option<String>,
    pub notes: Option<String>,
    pub payment_date: NaiveDate,
    pub created_at: NaiveDateTime,
}

/// Portion of a payment applied to one invoice
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaymentAllocation {
    pub id: Uuid,
    pub payment_id: Uuid,
    pub invoice_id: Uuid,
    pub amount_allocated: BigDecimal,
    pub created_at: NaiveDateTime,
}

impl PaymentAllocation {
    pub fn new(payment_id: Uuid, invoice_id: Uuid, amount_allocated: BigDecimal) -> Self {
        Self {
            id: Uuid::new_v4(),
            payment_id,
            invoice_id,
            amount_allocated,
            created_at: chrono::Utc::now().naive_utc(),
        }
    }
}

/// Audited action
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditAction {
    Delete,
}

/// Audit-log row holding a snapshot of the affected record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditLogEntry {
    pub id: Uuid,
    pub company_id: Uuid,
    pub actor_id: Option<Uuid>,
    pub action: AuditAction,
    pub entity: DocumentKind,
    pub entity_id: Uuid,
    pub snapshot: serde_json::Value,
    pub created_at: NaiveDateTime,
}

/// Capabilities checked before destructive operations
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Capability {
    DeleteQuotations,
    DeleteInvoices,
}

/// Authenticated user performing an operation
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Actor {
    /// `None` when the session has no resolvable user
    pub id: Option<Uuid>,
    pub capabilities: HashSet<Capability>,
}

impl Actor {
    pub fn new(id: Option<Uuid>) -> Self {
        Self {
            id,
            capabilities: HashSet::new(),
        }
    }

    pub fn with_capability(mut self, capability: Capability) -> Self {
        self.capabilities.insert(capability);
        self
    }

    pub fn can(&self, capability: Capability) -> bool {
        self.capabilities.contains(&capability)
    }
}

/// Company and actor an operation runs for
#[derive(Debug, Clone, PartialEq)]
pub struct OperationContext {
    pub company_id: Uuid,
    pub actor: Actor,
}

impl OperationContext {
    pub fn new(company_id: Uuid, actor: Actor) -> Self {
        Self { company_id, actor }
    }
}

/// Category of a degraded side effect
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WarningKind {
    StockMovementFailed,
    StockUpdateFailed,
    AllocationFailed,
    InvoiceUpdateFailed,
    AuditLogFailed,
    LineItemCleanupFailed,
    FallbackNumberUsed,
    CreatorDropped,
    ColumnStripped,
    OverDelivery,
    CounterpartyConflict,
}

/// Non-fatal problem reported alongside a successful operation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Warning {
    pub kind: WarningKind,
    pub message: String,
    pub product_id: Option<Uuid>,
}

impl Warning {
    pub fn new(kind: WarningKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            product_id: None,
        }
    }

    pub fn for_product(kind: WarningKind, product_id: Uuid, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            product_id: Some(product_id),
        }
    }
}

/// Result of a multi-step operation whose primary write succeeded
#[derive(Debug, Clone, PartialEq)]
pub struct Outcome<T> {
    pub value: T,
    pub warnings: Vec<Warning>,
}

impl<T> Outcome<T> {
    pub fn new(value: T) -> Self {
        Self {
            value,
            warnings: Vec::new(),
        }
    }

    pub fn with_warnings(value: T, warnings: Vec<Warning>) -> Self {
        Self { value, warnings }
    }

    /// Whether any side effect was degraded
    pub fn is_degraded(&self) -> bool {
        !self.warnings.is_empty()
    }

    pub fn warnings_of(&self, kind: WarningKind) -> impl Iterator<Item = &Warning> {
        self.warnings.iter().filter(move |w| w.kind == kind)
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Outcome<U> {
        Outcome {
            value: f(self.value),
            warnings: self.warnings,
        }
    }
}

/// Structured error code reported by the store
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreErrorCode {
    ForeignKeyViolation { column: String },
    UniqueViolation { constraint: String },
    CheckViolation { constraint: String },
    UndefinedColumn { column: String },
    UndefinedTable { table: String },
    ProcedureNotFound { procedure: String },
    NotFound,
    Other,
}

impl fmt::Display for StoreErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StoreErrorCode::ForeignKeyViolation { column } => {
                write!(f, "FOREIGN_KEY_VIOLATION({column})")
            }
            StoreErrorCode::UniqueViolation { constraint } => {
                write!(f, "UNIQUE_VIOLATION({constraint})")
            }
            StoreErrorCode::CheckViolation { constraint } => {
                write!(f, "CHECK_VIOLATION({constraint})")
            }
            StoreErrorCode::UndefinedColumn { column } => write!(f, "UNDEFINED_COLUMN({column})"),
            StoreErrorCode::UndefinedTable { table } => write!(f, "UNDEFINED_TABLE({table})"),
            StoreErrorCode::ProcedureNotFound { procedure } => {
                write!(f, "PROCEDURE_NOT_FOUND({procedure})")
            }
            StoreErrorCode::NotFound => f.write_str("NOT_FOUND"),
            StoreErrorCode::Other => f.write_str("OTHER"),
        }
    }
}

/// Error reported by the store
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("{code}: {message}")]
pub struct StoreError {
    pub code: StoreErrorCode,
    pub message: String,
    pub hint: Option<String>,
}

impl StoreError {
    pub fn new(code: StoreErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            hint: None,
        }
    }

    pub fn with_hint(mut self, hint: impl Into<String>) -> Self {
        self.hint = Some(hint.into());
        self
    }

    pub fn other(message: impl Into<String>) -> Self {
        Self::new(StoreErrorCode::Other, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(StoreErrorCode::NotFound, message)
    }

    /// Foreign-key violation on `column`
    pub fn is_foreign_key_on(&self, column: &str) -> bool {
        matches!(&self.code, StoreErrorCode::ForeignKeyViolation { column: c } if c == column)
    }

    /// Foreign-key, unique or check violation
    pub fn is_constraint_violation(&self) -> bool {
        matches!(
            self.code,
            StoreErrorCode::ForeignKeyViolation { .. }
                | StoreErrorCode::UniqueViolation { .. }
                | StoreErrorCode::CheckViolation { .. }
        )
    }

    pub fn is_procedure_not_found(&self) -> bool {
        matches!(self.code, StoreErrorCode::ProcedureNotFound { .. })
    }

    pub fn is_undefined_table(&self) -> bool {
        matches!(self.code, StoreErrorCode::UndefinedTable { .. })
    }

    /// Column named by an undefined-column error
    pub fn undefined_column(&self) -> Option<&str> {
        match &self.code {
            StoreErrorCode::UndefinedColumn { column } => Some(column),
            _ => None,
        }
    }
}

/// Result type for store operations
pub type StoreResult<T> = Result<T, StoreError>;

/// Errors surfaced by engine operations
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("Validation error: {0}")]
    Validation(String),
    #[error("Conflict: {0}")]
    Conflict(StoreError),
    #[error("Schema drift: {0}")]
    SchemaDrift(StoreError),
    #[error("Dependency unavailable: {0}")]
    DependencyUnavailable(String),
    #[error("Cannot reverse allocation on invoice {invoice_id}: {reason}")]
    ReversalInconsistency { invoice_id: Uuid, reason: String },
    #[error("Permission denied: {0}")]
    PermissionDenied(String),
    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },
    #[error("{kind} {number} ({document_id}) was saved but {stage} failed: {source}")]
    IncompleteWrite {
        kind: DocumentKind,
        document_id: Uuid,
        number: String,
        stage: &'static str,
        #[source]
        source: Box<EngineError>,
    },
    #[error("Storage error: {0}")]
    Storage(StoreError),
}

impl EngineError {
    pub fn not_found(entity: &'static str, id: impl fmt::Display) -> Self {
        EngineError::NotFound {
            entity,
            id: id.to_string(),
        }
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, EngineError::Conflict(_))
    }
}

impl From<StoreError> for EngineError {
    fn from(err: StoreError) -> Self {
        match &err.code {
            StoreErrorCode::ForeignKeyViolation { .. }
            | StoreErrorCode::UniqueViolation { .. }
            | StoreErrorCode::CheckViolation { .. } => EngineError::Conflict(err),
            StoreErrorCode::UndefinedColumn { .. } => EngineError::SchemaDrift(err),
            StoreErrorCode::ProcedureNotFound { procedure } => {
                EngineError::DependencyUnavailable(format!("procedure '{procedure}' not found"))
            }
            _ => EngineError::Storage(err),
        }
    }
}

/// Result type for engine operations
pub type EngineResult<T> = Result<T, EngineError>;
