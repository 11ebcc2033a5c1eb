use std::fmt;
use std::str::FromStr;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ============================================================================
// Order Value Objects
// ============================================================================

/// Delivery status of an order. Variants are declared in lifecycle order, so
/// the derived `Ord` matches the state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    Confirmed,
    PickedUp,
    InTransit,
    OutForDelivery,
    Delivered,
}

impl OrderStatus {
    /// Every status, in lifecycle order.
    pub const LIFECYCLE: [OrderStatus; 5] = [
        OrderStatus::Confirmed,
        OrderStatus::PickedUp,
        OrderStatus::InTransit,
        OrderStatus::OutForDelivery,
        OrderStatus::Delivered,
    ];

    /// The only status this one may advance to. `None` for `Delivered`.
    pub fn next(self) -> Option<OrderStatus> {
        match self {
            OrderStatus::Confirmed => Some(OrderStatus::PickedUp),
            OrderStatus::PickedUp => Some(OrderStatus::InTransit),
            OrderStatus::InTransit => Some(OrderStatus::OutForDelivery),
            OrderStatus::OutForDelivery => Some(OrderStatus::Delivered),
            OrderStatus::Delivered => None,
        }
    }

    pub fn is_terminal(self) -> bool {
        self.next().is_none()
    }

    /// Zero-based position in the lifecycle.
    pub fn position(self) -> usize {
        self as usize
    }

    pub fn as_str(self) -> &'static str {
        match self {
            OrderStatus::Confirmed => "confirmed",
            OrderStatus::PickedUp => "picked_up",
            OrderStatus::InTransit => "in_transit",
            OrderStatus::OutForDelivery => "out_for_delivery",
            OrderStatus::Delivered => "delivered",
        }
    }

    /// Audit note recorded when a transition does not carry its own.
    pub fn default_note(self) -> &'static str {
        match self {
            OrderStatus::Confirmed => "Order placed successfully",
            OrderStatus::PickedUp => "Order has been picked up by seller",
            OrderStatus::InTransit => "Order is in transit",
            OrderStatus::OutForDelivery => "Order is out for delivery",
            OrderStatus::Delivered => "Order has been delivered",
        }
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown order status: {0}")]
pub struct UnknownStatus(pub String);

impl FromStr for OrderStatus {
    type Err = UnknownStatus;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        OrderStatus::LIFECYCLE
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| UnknownStatus(s.to_string()))
    }
}

/// Permission scope supplied by the authentication layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Buyer,
    Seller,
    Admin,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Role::Buyer => "buyer",
            Role::Seller => "seller",
            Role::Admin => "admin",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown role: {0}")]
pub struct UnknownRole(pub String);

impl FromStr for Role {
    type Err = UnknownRole;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "buyer" => Ok(Role::Buyer),
            "seller" => Ok(Role::Seller),
            "admin" => Ok(Role::Admin),
            other => Err(UnknownRole(other.to_string())),
        }
    }
}

/// An authenticated caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Actor {
    pub id: Uuid,
    pub role: Role,
}

impl Actor {
    pub fn buyer(id: Uuid) -> Self {
        Self { id, role: Role::Buyer }
    }

    pub fn seller(id: Uuid) -> Self {
        Self { id, role: Role::Seller }
    }

    pub fn admin(id: Uuid) -> Self {
        Self { id, role: Role::Admin }
    }

    pub fn scope(&self) -> OrderScope {
        match self.role {
            Role::Buyer => OrderScope::Buyer(self.id),
            Role::Seller => OrderScope::Seller(self.id),
            Role::Admin => OrderScope::All,
        }
    }
}

/// Which orders a listing covers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrderScope {
    /// Orders placed by this buyer.
    Buyer(Uuid),
    /// Orders containing at least one item sold by this seller.
    Seller(Uuid),
    All,
}

// ============================================================================
// Charges
// ============================================================================

/// Shipping and tax charged on top of an order's subtotal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderAmounts {
    pub shipping_amount: Decimal,
    pub tax_amount: Decimal,
    pub total_amount: Decimal,
}

/// Marketplace defaults for deriving [`OrderAmounts`] from a subtotal.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChargePolicy {
    pub shipping_fee: Decimal,
    /// Subtotals strictly above this ship free.
    pub free_shipping_threshold: Decimal,
    pub tax_rate: Decimal,
}

impl Default for ChargePolicy {
    fn default() -> Self {
        Self {
            shipping_fee: Decimal::new(2500, 0),
            free_shipping_threshold: Decimal::new(50000, 0),
            tax_rate: Decimal::new(75, 3),
        }
    }
}

impl ChargePolicy {
    pub fn quote(&self, subtotal: Decimal) -> OrderAmounts {
        let shipping_amount = if subtotal > self.free_shipping_threshold {
            Decimal::ZERO
        } else {
            self.shipping_fee
        };
        let tax_amount = (subtotal * self.tax_rate).round_dp(2);

        OrderAmounts {
            shipping_amount,
            tax_amount,
            total_amount: subtotal + shipping_amount + tax_amount,
        }
    }
}

// ============================================================================
// Unit Tests
// ============================================================================
