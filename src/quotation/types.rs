use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::HashSet;
use std::fmt;
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ItemId(pub u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct QuotationId(pub u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PurchaseOrderId(pub u64);

impl fmt::Display for ItemId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for QuotationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for PurchaseOrderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Error, PartialEq)]
pub enum QuotationError {
    #[error("quotation {0} has no line items")]
    Empty(QuotationId),

    #[error("line item {0} appears more than once")]
    DuplicateItem(ItemId),

    #[error("line item {0} has both an item name and a product name")]
    AmbiguousLabel(ItemId),

    #[error("line item {0} has neither an item name nor a product name")]
    MissingLabel(ItemId),

    #[error("line item {0} must have a quantity of at least 1")]
    InvalidQuantity(ItemId),

    #[error("invalid price: {0}")]
    InvalidPrice(String),
}

/// Non-negative amount with two fraction digits, held as cents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Money(u64);

impl Money {
    pub const ZERO: Money = Money(0);

    pub fn from_cents(cents: u64) -> Self {
        Self(cents)
    }

    pub fn cents(&self) -> u64 {
        self.0
    }

    pub fn parse(raw: &str) -> Result<Self, QuotationError> {
        let invalid = || QuotationError::InvalidPrice(raw.to_string());
        let trimmed = raw.trim();
        if trimmed.is_empty() || trimmed.starts_with('-') {
            return Err(invalid());
        }

        let (whole, fraction) = match trimmed.split_once('.') {
            Some((whole, fraction)) => (whole, fraction),
            None => (trimmed, ""),
        };
        if fraction.len() > 2 || !fraction.chars().all(|c| c.is_ascii_digit()) {
            return Err(invalid());
        }

        let whole: u64 = if whole.is_empty() {
            0
        } else {
            whole.parse().map_err(|_| invalid())?
        };
        let fraction: u64 = match fraction.len() {
            0 => 0,
            1 => fraction.parse::<u64>().map_err(|_| invalid())? * 10,
            _ => fraction.parse().map_err(|_| invalid())?,
        };

        whole
            .checked_mul(100)
            .and_then(|cents| cents.checked_add(fraction))
            .map(Money)
            .ok_or_else(invalid)
    }

    /// Same rules as `parse`: whole cents only, no silent rounding or clamping.
    fn from_number(value: f64) -> Result<Self, QuotationError> {
        let invalid = || QuotationError::InvalidPrice(value.to_string());
        if !value.is_finite() || value < 0.0 {
            return Err(invalid());
        }
        let scaled = value * 100.0;
        if scaled >= u64::MAX as f64 {
            return Err(invalid());
        }
        let cents = scaled.round();
        if (scaled - cents).abs() > 1e-6 {
            return Err(invalid());
        }
        Ok(Money(cents as u64))
    }
}

impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{:02}", self.0 / 100, self.0 % 100)
    }
}

impl Serialize for Money {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for Money {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        // DRF renders DecimalField as a string, but hand-written payloads often use numbers.
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum RawPrice {
            Text(String),
            Number(f64),
        }

        let parsed = match RawPrice::deserialize(deserializer)? {
            RawPrice::Text(text) => Money::parse(&text),
            RawPrice::Number(number) => Money::from_number(number),
        };
        parsed.map_err(serde::de::Error::custom)
    }
}

/// What a line item is called. Exactly one of the two wire fields is populated.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ItemLabel {
    Item(String),
    Product(String),
}

impl ItemLabel {
    pub fn as_str(&self) -> &str {
        match self {
            ItemLabel::Item(name) | ItemLabel::Product(name) => name,
        }
    }

    fn split(&self) -> (Option<String>, Option<String>) {
        match self {
            ItemLabel::Item(name) => (Some(name.clone()), None),
            ItemLabel::Product(name) => (None, Some(name.clone())),
        }
    }
}

impl fmt::Display for ItemLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "LineItemWire", into = "LineItemWire")]
pub struct LineItem {
    pub id: ItemId,
    pub label: ItemLabel,
    pub quantity: u32,
    pub unit: String,
    pub unit_price: Money,
}

impl LineItem {
    /// `None` when the product does not fit in cents.
    pub fn total_price(&self) -> Option<Money> {
        self.unit_price
            .cents()
            .checked_mul(u64::from(self.quantity))
            .map(Money::from_cents)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct LineItemWire {
    id: ItemId,
    #[serde(default)]
    item_name: Option<String>,
    #[serde(default)]
    product_name: Option<String>,
    #[serde(default)]
    quantity: Option<u32>,
    #[serde(default)]
    unit: Option<String>,
    #[serde(default)]
    unit_price: Option<Money>,
}

fn non_blank(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

impl TryFrom<LineItemWire> for LineItem {
    type Error = QuotationError;

    fn try_from(wire: LineItemWire) -> Result<Self, Self::Error> {
        let label = match (non_blank(wire.item_name), non_blank(wire.product_name)) {
            (Some(item), None) => ItemLabel::Item(item),
            (None, Some(product)) => ItemLabel::Product(product),
            (Some(_), Some(_)) => return Err(QuotationError::AmbiguousLabel(wire.id)),
            (None, None) => return Err(QuotationError::MissingLabel(wire.id)),
        };
        let quantity = match wire.quantity {
            Some(q) if q >= 1 => q,
            _ => return Err(QuotationError::InvalidQuantity(wire.id)),
        };

        Ok(Self {
            id: wire.id,
            label,
            quantity,
            unit: wire.unit.unwrap_or_default(),
            unit_price: wire.unit_price.unwrap_or(Money::ZERO),
        })
    }
}

impl From<LineItem> for LineItemWire {
    fn from(item: LineItem) -> Self {
        let (item_name, product_name) = item.label.split();
        Self {
            id: item.id,
            item_name,
            product_name,
            quantity: Some(item.quantity),
            unit: Some(item.unit),
            unit_price: Some(item.unit_price),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderType {
    Full,
    Partial,
}

impl fmt::Display for OrderType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OrderType::Full => f.write_str("full"),
            OrderType::Partial => f.write_str("partial"),
        }
    }
}

/// One row of a purchase order, in the shape the purchase-order endpoint reads and writes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PurchaseOrderLine {
    #[serde(default, skip_serializing)]
    pub id: Option<u64>,
    pub item_name: Option<String>,
    pub product_name: Option<String>,
    pub quantity: u32,
    pub unit: Option<String>,
    pub unit_price: Option<Money>,
}

impl From<&LineItem> for PurchaseOrderLine {
    fn from(item: &LineItem) -> Self {
        let (item_name, product_name) = item.label.split();
        Self {
            id: None,
            item_name,
            product_name,
            quantity: item.quantity,
            unit: Some(item.unit.clone()).filter(|u| !u.is_empty()),
            unit_price: Some(item.unit_price),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PurchaseOrderRecord {
    pub id: PurchaseOrderId,
    pub quotation: QuotationId,
    #[serde(default)]
    pub client_po_number: String,
    pub order_type: OrderType,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub items: Vec<PurchaseOrderLine>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CreatePurchaseOrder {
    pub quotation: QuotationId,
    pub order_type: OrderType,
    pub client_po_number: String,
    pub items: Vec<PurchaseOrderLine>,
    #[serde(skip)]
    pub idempotency_key: Option<Uuid>,
}

impl CreatePurchaseOrder {
    pub fn new(quotation: QuotationId, order_type: OrderType, items: &[LineItem]) -> Self {
        Self {
            quotation,
            order_type,
            client_po_number: String::new(),
            items: items.iter().map(PurchaseOrderLine::from).collect(),
            idempotency_key: None,
        }
    }

    pub fn with_client_po_number(mut self, client_po_number: impl Into<String>) -> Self {
        self.client_po_number = client_po_number.into();
        self
    }

    pub fn with_idempotency_key(mut self, key: Uuid) -> Self {
        self.idempotency_key = Some(key);
        self
    }
}

/// A priced proposal and the purchase orders already recorded against it.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(try_from = "QuotationWire")]
pub struct Quotation {
    id: QuotationId,
    quotation_no: String,
    items: Vec<LineItem>,
    purchase_orders: Vec<PurchaseOrderRecord>,
}

#[derive(Deserialize)]
struct QuotationWire {
    id: QuotationId,
    #[serde(default)]
    quotation_no: String,
    items: Vec<LineItem>,
    #[serde(default)]
    purchase_order: Vec<PurchaseOrderRecord>,
}

impl TryFrom<QuotationWire> for Quotation {
    type Error = QuotationError;

    fn try_from(wire: QuotationWire) -> Result<Self, Self::Error> {
        Quotation::new(wire.id, wire.quotation_no, wire.items)
            .map(|quotation| quotation.with_purchase_orders(wire.purchase_order))
    }
}

impl Quotation {
    pub fn new(
        id: QuotationId,
        quotation_no: impl Into<String>,
        items: Vec<LineItem>,
    ) -> Result<Self, QuotationError> {
        if items.is_empty() {
            return Err(QuotationError::Empty(id));
        }
        let mut seen = HashSet::with_capacity(items.len());
        for item in &items {
            if !seen.insert(item.id) {
                return Err(QuotationError::DuplicateItem(item.id));
            }
        }

        Ok(Self {
            id,
            quotation_no: quotation_no.into(),
            items,
            purchase_orders: Vec::new(),
        })
    }

    pub fn with_purchase_orders(mut self, purchase_orders: Vec<PurchaseOrderRecord>) -> Self {
        self.purchase_orders = purchase_orders;
        self
    }

    pub fn id(&self) -> QuotationId {
        self.id
    }

    pub fn quotation_no(&self) -> &str {
        &self.quotation_no
    }

    pub fn items(&self) -> &[LineItem] {
        &self.items
    }

    pub fn item_count(&self) -> usize {
        self.items.len()
    }

    pub fn item(&self, id: ItemId) -> Option<&LineItem> {
        self.items.iter().find(|item| item.id == id)
    }

    pub fn contains(&self, id: ItemId) -> bool {
        self.item(id).is_some()
    }

    pub fn purchase_orders(&self) -> &[PurchaseOrderRecord] {
        &self.purchase_orders
    }

    pub fn has_order_of_type(&self, order_type: OrderType) -> bool {
        self.purchase_orders
            .iter()
            .any(|po| po.order_type == order_type)
    }
}
