use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::errors::ValidationError;
use super::value_objects::{OrderAmounts, OrderStatus};

// ============================================================================
// Order Commands - Represent caller intent
// ============================================================================

/// Allowed gap between the stated total and the recomputed one.
pub const TOTAL_TOLERANCE: Decimal = Decimal::from_parts(1, 0, 0, false, 2);

/// A line handed over by the cart at checkout.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewOrderItem {
    pub product_id: Option<Uuid>,
    pub product_name: String,
    pub product_image: Option<String>,
    pub seller_id: Uuid,
    pub seller_name: Option<String>,
    pub quantity: i32,
    pub unit_price: Decimal,
}

impl NewOrderItem {
    pub fn line_total(&self) -> Decimal {
        self.unit_price * Decimal::from(self.quantity)
    }
}

/// Everything needed to place an order. Payment is already authorized.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewOrder {
    pub buyer_id: Uuid,
    pub items: Vec<NewOrderItem>,
    pub delivery_address: String,
    pub phone: String,
    pub payment_method: String,
    pub notes: Option<String>,
    pub amounts: OrderAmounts,
}

impl NewOrder {
    pub fn subtotal(&self) -> Decimal {
        self.items.iter().map(NewOrderItem::line_total).sum()
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.items.is_empty() {
            return Err(ValidationError::EmptyItems);
        }

        for (index, item) in self.items.iter().enumerate() {
            if item.quantity <= 0 {
                return Err(ValidationError::InvalidQuantity {
                    index,
                    quantity: item.quantity,
                });
            }
            if item.unit_price < Decimal::ZERO {
                return Err(ValidationError::NegativeUnitPrice {
                    index,
                    unit_price: item.unit_price,
                });
            }
            if item.product_name.trim().is_empty() {
                return Err(ValidationError::BlankField("product_name"));
            }
        }

        require_text("delivery_address", &self.delivery_address)?;
        require_text("phone", &self.phone)?;
        require_text("payment_method", &self.payment_method)?;

        let amounts = &self.amounts;
        for (field, value) in [
            ("shipping_amount", amounts.shipping_amount),
            ("tax_amount", amounts.tax_amount),
            ("total_amount", amounts.total_amount),
        ] {
            if value < Decimal::ZERO {
                return Err(ValidationError::NegativeAmount { field, value });
            }
        }

        let expected = self.subtotal() + amounts.shipping_amount + amounts.tax_amount;
        if (amounts.total_amount - expected).abs() > TOTAL_TOLERANCE {
            return Err(ValidationError::TotalMismatch {
                total: amounts.total_amount,
                expected,
            });
        }

        Ok(())
    }
}

fn require_text(field: &'static str, value: &str) -> Result<(), ValidationError> {
    if value.trim().is_empty() {
        return Err(ValidationError::BlankField(field));
    }
    Ok(())
}

/// Request to move an order one step along its lifecycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AdvanceStatus {
    pub order_id: Uuid,
    pub target_status: OrderStatus,
    pub actor_id: Uuid,
    pub notes: Option<String>,
    /// Proof of receipt; only consulted for `delivered`.
    pub delivery_code: Option<String>,
}

impl AdvanceStatus {
    pub fn new(order_id: Uuid, target_status: OrderStatus, actor_id: Uuid) -> Self {
        Self {
            order_id,
            target_status,
            actor_id,
            notes: None,
            delivery_code: None,
        }
    }

    pub fn with_notes(mut self, notes: impl Into<String>) -> Self {
        self.notes = Some(notes.into());
        self
    }

    pub fn with_delivery_code(mut self, code: impl Into<String>) -> Self {
        self.delivery_code = Some(code.into());
        self
    }

    /// Caller-supplied note, or the status default when absent or blank.
    pub fn resolved_note(&self) -> String {
        match self.notes.as_deref().map(str::trim) {
            Some(note) if !note.is_empty() => note.to_string(),
            _ => self.target_status.default_note().to_string(),
        }
    }
}
