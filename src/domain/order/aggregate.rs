use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::identifiers;

use super::commands::{AdvanceStatus, NewOrder, NewOrderItem};
use super::errors::{ConflictReason, OrderError, ValidationError};
use super::value_objects::{Actor, OrderScope, OrderStatus};

// ============================================================================
// Order Aggregate
// ============================================================================
//
// An order is always read and written together with its items and its status
// history. Items never change after creation and history is append-only, so
// the only mutable state is `status`, `updated_at` and `version`.
//
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Order {
    // Identity
    pub id: Uuid,
    pub order_number: String,
    pub delivery_code: String,
    pub version: i64,

    // Placement
    pub buyer_id: Uuid,
    pub phone: String,
    pub delivery_address: String,
    pub notes: Option<String>,
    pub payment_method: String,

    // Money
    pub total_amount: Decimal,
    pub shipping_amount: Decimal,
    pub tax_amount: Decimal,

    // Lifecycle
    pub status: OrderStatus,
    pub estimated_delivery: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,

    pub items: Vec<OrderItem>,
    pub history: Vec<StatusHistoryEntry>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderItem {
    pub id: Uuid,
    pub product_id: Option<Uuid>,
    pub product_name: String,
    pub product_image: Option<String>,
    pub seller_id: Uuid,
    pub seller_name: Option<String>,
    pub quantity: i32,
    pub unit_price: Decimal,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusHistoryEntry {
    pub id: Uuid,
    pub status: OrderStatus,
    pub notes: Option<String>,
    pub updated_by: Option<Uuid>,
    pub created_at: DateTime<Utc>,
}

/// Identifiers assigned to an order at creation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderIdentifiers {
    pub order_number: String,
    pub delivery_code: String,
}

impl OrderIdentifiers {
    /// Canonicalise the order number and reject identifiers a buyer could
    /// never type back in.
    pub fn normalized(self) -> Result<Self, ValidationError> {
        let order_number = identifiers::normalize_order_number(&self.order_number);
        if !identifiers::is_valid_order_number(&order_number) {
            return Err(ValidationError::MalformedOrderNumber(self.order_number));
        }

        let delivery_code = self.delivery_code.trim().to_string();
        if !identifiers::is_valid_delivery_code(&delivery_code) {
            return Err(ValidationError::MalformedDeliveryCode(self.delivery_code));
        }

        Ok(Self {
            order_number,
            delivery_code,
        })
    }
}

/// A validated, not yet committed status change. The repository applies it
/// only if the stored order still has `expected_version` and `from`.
#[derive(Debug, Clone, PartialEq)]
pub struct StatusTransition {
    pub order_id: Uuid,
    pub expected_version: i64,
    pub from: OrderStatus,
    pub to: OrderStatus,
    pub entry: StatusHistoryEntry,
}

impl StatusTransition {
    pub fn new_version(&self) -> i64 {
        self.expected_version + 1
    }

    pub fn updated_at(&self) -> DateTime<Utc> {
        self.entry.created_at
    }
}

impl Order {
    /// Build the initial aggregate for a validated request.
    pub fn place(
        request: NewOrder,
        identifiers: OrderIdentifiers,
        now: DateTime<Utc>,
        lead_time: Duration,
    ) -> Result<Self, ValidationError> {
        request.validate()?;
        let identifiers = identifiers.normalized()?;

        let NewOrder {
            buyer_id,
            items,
            delivery_address,
            phone,
            payment_method,
            notes,
            amounts,
        } = request;

        let items = items
            .into_iter()
            .map(|item| OrderItem::from_new(item, now))
            .collect();

        let first_entry = StatusHistoryEntry {
            id: Uuid::now_v7(),
            status: OrderStatus::Confirmed,
            notes: Some(OrderStatus::Confirmed.default_note().to_string()),
            updated_by: Some(buyer_id),
            created_at: now,
        };

        Ok(Self {
            id: Uuid::now_v7(),
            order_number: identifiers.order_number,
            delivery_code: identifiers.delivery_code,
            version: 1,
            buyer_id,
            phone: phone.trim().to_string(),
            delivery_address: delivery_address.trim().to_string(),
            notes: notes.filter(|n| !n.trim().is_empty()),
            payment_method,
            total_amount: amounts.total_amount,
            shipping_amount: amounts.shipping_amount,
            tax_amount: amounts.tax_amount,
            status: OrderStatus::Confirmed,
            estimated_delivery: now + lead_time,
            created_at: now,
            updated_at: now,
            items,
            history: vec![first_entry],
        })
    }

    pub fn subtotal(&self) -> Decimal {
        self.items.iter().map(OrderItem::line_total).sum()
    }

    /// Distinct sellers with at least one item in this order, in item order.
    pub fn seller_ids(&self) -> Vec<Uuid> {
        let mut sellers: Vec<Uuid> = Vec::with_capacity(self.items.len());
        for item in &self.items {
            if !sellers.contains(&item.seller_id) {
                sellers.push(item.seller_id);
            }
        }
        sellers
    }

    pub fn in_scope(&self, scope: &OrderScope) -> bool {
        match scope {
            OrderScope::Buyer(buyer) => self.buyer_id == *buyer,
            OrderScope::Seller(seller) => self.items.iter().any(|i| i.seller_id == *seller),
            OrderScope::All => true,
        }
    }

    pub fn is_visible_to(&self, actor: &Actor) -> bool {
        self.in_scope(&actor.scope())
    }

    /// Items this seller may act on. Other sellers' items stay visible as
    /// order context only.
    pub fn items_for_seller(&self, seller_id: Uuid) -> impl Iterator<Item = &OrderItem> {
        self.items.iter().filter(move |item| item.seller_id == seller_id)
    }

    /// Check a request against the current state and produce the write.
    pub fn plan_transition(
        &self,
        request: &AdvanceStatus,
        now: DateTime<Utc>,
    ) -> Result<StatusTransition, OrderError> {
        let Some(allowed) = self.status.next() else {
            return Err(OrderError::Conflict {
                order_id: self.id,
                reason: ConflictReason::Terminal(self.status),
            });
        };

        if request.target_status != allowed {
            return Err(OrderError::Conflict {
                order_id: self.id,
                reason: ConflictReason::InvalidTransition {
                    from: self.status,
                    to: request.target_status,
                    allowed,
                },
            });
        }

        if request.target_status == OrderStatus::Delivered {
            self.verify_delivery_code(request.delivery_code.as_deref())?;
        }

        // History must never run backwards, even if the clock does.
        let created_at = self
            .history
            .last()
            .map_or(now, |last| now.max(last.created_at));

        Ok(StatusTransition {
            order_id: self.id,
            expected_version: self.version,
            from: self.status,
            to: request.target_status,
            entry: StatusHistoryEntry {
                id: Uuid::now_v7(),
                status: request.target_status,
                notes: Some(request.resolved_note()),
                updated_by: Some(request.actor_id),
                created_at,
            },
        })
    }

    pub fn verify_delivery_code(&self, supplied: Option<&str>) -> Result<(), ValidationError> {
        match supplied.map(str::trim) {
            None | Some("") => Err(ValidationError::MissingDeliveryCode),
            Some(code) if code == self.delivery_code => Ok(()),
            Some(_) => Err(ValidationError::DeliveryCodeMismatch),
        }
    }

    /// Apply a committed transition to this in-memory copy.
    pub fn apply(&mut self, transition: &StatusTransition) {
        self.status = transition.to;
        self.version = transition.new_version();
        self.updated_at = transition.updated_at();
        self.history.push(transition.entry.clone());
    }

    /// Sort history into audit order after loading rows.
    pub fn sort_history(&mut self) {
        self.history
            .sort_by_key(|entry| (entry.created_at, entry.status.position()));
    }

    /// True when history is exactly the lifecycle prefix ending at `status`.
    pub fn history_is_consistent(&self) -> bool {
        let expected = &OrderStatus::LIFECYCLE[..=self.status.position()];
        self.history.len() == expected.len()
            && self
                .history
                .iter()
                .zip(expected)
                .all(|(entry, status)| entry.status == *status)
            && self
                .history
                .windows(2)
                .all(|pair| pair[0].created_at <= pair[1].created_at)
    }
}

impl OrderItem {
    fn from_new(item: NewOrderItem, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::now_v7(),
            product_id: item.product_id,
            product_name: item.product_name.trim().to_string(),
            product_image: item.product_image,
            seller_id: item.seller_id,
            seller_name: item.seller_name,
            quantity: item.quantity,
            unit_price: item.unit_price,
            created_at: now,
        }
    }

    pub fn line_total(&self) -> Decimal {
        self.unit_price * Decimal::from(self.quantity)
    }
}

impl Actor {
    pub fn can_view(&self, order: &Order) -> bool {
        order.is_visible_to(self)
    }
}

// ============================================================================
// Unit Tests
// ============================================================================

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::domain::order::value_objects::OrderAmounts;
    use rust_decimal_macros::dec;

    pub(crate) fn sample_request(buyer_id: Uuid, seller_ids: &[Uuid]) -> NewOrder {
        let items: Vec<NewOrderItem> = seller_ids
            .iter()
            .map(|seller_id| NewOrderItem {
                product_id: Some(Uuid::new_v4()),
                product_name: "Digital thermometer".to_string(),
                product_image: Some("https://cdn.example/thermo.png".to_string()),
                seller_id: *seller_id,
                seller_name: Some("Clinic Direct".to_string()),
                quantity: 2,
                unit_price: dec!(5000),
            })
            .collect();
        let subtotal: Decimal = items.iter().map(NewOrderItem::line_total).sum();

        NewOrder {
            buyer_id,
            items,
            delivery_address: "4 Allen Avenue, Ikeja".to_string(),
            phone: "+2348012345678".to_string(),
            payment_method: "card".to_string(),
            notes: Some("Call on arrival".to_string()),
            amounts: OrderAmounts {
                shipping_amount: dec!(2500),
                tax_amount: dec!(1500),
                total_amount: subtotal + dec!(4000),
            },
        }
    }

    pub(crate) fn placed_order() -> Order {
        placed(&[Uuid::new_v4()])
    }

    fn placed(seller_ids: &[Uuid]) -> Order {
        Order::place(
            sample_request(Uuid::new_v4(), seller_ids),
            OrderIdentifiers {
                order_number: "DJ-ABC123XYZ".to_string(),
                delivery_code: "73510".to_string(),
            },
            Utc::now(),
            Duration::days(3),
        )
        .unwrap()
    }

    #[test]
    fn test_place_builds_confirmed_order_with_one_entry() {
        let now = Utc::now();
        let buyer = Uuid::new_v4();
        let order = Order::place(
            sample_request(buyer, &[Uuid::new_v4(), Uuid::new_v4()]),
            OrderIdentifiers {
                order_number: "DJ-ABC123XYZ".to_string(),
                delivery_code: "00042".to_string(),
            },
            now,
            Duration::days(3),
        )
        .unwrap();

        assert_eq!(order.status, OrderStatus::Confirmed);
        assert_eq!(order.version, 1);
        assert_eq!(order.total_amount, dec!(24000));
        assert_eq!(order.subtotal(), dec!(20000));
        assert_eq!(order.estimated_delivery, now + Duration::days(3));
        assert_eq!(order.history.len(), 1);
        assert_eq!(order.history[0].updated_by, Some(buyer));
        assert_eq!(
            order.history[0].notes.as_deref(),
            Some("Order placed successfully")
        );
        assert!(order.history_is_consistent());
    }

    #[test]
    fn test_place_rejects_invalid_request() {
        let mut request = sample_request(Uuid::new_v4(), &[Uuid::new_v4()]);
        request.items.clear();

        let result = Order::place(
            request,
            OrderIdentifiers {
                order_number: "DJ-ABC123XYZ".to_string(),
                delivery_code: "00042".to_string(),
            },
            Utc::now(),
            Duration::days(3),
        );
        assert_eq!(result.unwrap_err(), ValidationError::EmptyItems);
    }

    #[test]
    fn test_place_normalizes_order_number() {
        let order = Order::place(
            sample_request(Uuid::new_v4(), &[Uuid::new_v4()]),
            OrderIdentifiers {
                order_number: " dj-abc123xyz".to_string(),
                delivery_code: "73510".to_string(),
            },
            Utc::now(),
            Duration::days(3),
        )
        .unwrap();

        assert_eq!(order.order_number, "DJ-ABC123XYZ");
        assert_eq!(order.delivery_code, "73510");
    }

    #[test]
    fn test_place_rejects_malformed_identifiers() {
        let bad_number = Order::place(
            sample_request(Uuid::new_v4(), &[Uuid::new_v4()]),
            OrderIdentifiers {
                order_number: "ORDER-1".to_string(),
                delivery_code: "73510".to_string(),
            },
            Utc::now(),
            Duration::days(3),
        );
        assert_eq!(
            bad_number.unwrap_err(),
            ValidationError::MalformedOrderNumber("ORDER-1".to_string())
        );

        let bad_code = Order::place(
            sample_request(Uuid::new_v4(), &[Uuid::new_v4()]),
            OrderIdentifiers {
                order_number: "DJ-ABC123XYZ".to_string(),
                delivery_code: "7x".to_string(),
            },
            Utc::now(),
            Duration::days(3),
        );
        assert_eq!(
            bad_code.unwrap_err(),
            ValidationError::MalformedDeliveryCode("7x".to_string())
        );
    }

    #[test]
    fn test_plan_and_apply_next_status() {
        let mut order = placed(&[Uuid::new_v4()]);
        let actor = Uuid::new_v4();
        let request = AdvanceStatus::new(order.id, OrderStatus::PickedUp, actor);

        let transition = order.plan_transition(&request, Utc::now()).unwrap();
        assert_eq!(transition.expected_version, 1);
        assert_eq!(transition.from, OrderStatus::Confirmed);
        assert_eq!(
            transition.entry.notes.as_deref(),
            Some("Order has been picked up by seller")
        );

        order.apply(&transition);
        assert_eq!(order.status, OrderStatus::PickedUp);
        assert_eq!(order.version, 2);
        assert_eq!(order.history.len(), 2);
        assert!(order.history_is_consistent());
    }

    #[test]
    fn test_skip_is_conflict() {
        let order = placed(&[Uuid::new_v4()]);
        let request = AdvanceStatus::new(order.id, OrderStatus::Delivered, Uuid::new_v4())
            .with_delivery_code("73510");

        let err = order.plan_transition(&request, Utc::now()).unwrap_err();
        assert!(matches!(
            err,
            OrderError::Conflict {
                reason: ConflictReason::InvalidTransition {
                    from: OrderStatus::Confirmed,
                    to: OrderStatus::Delivered,
                    allowed: OrderStatus::PickedUp,
                },
                ..
            }
        ));
    }

    #[test]
    fn test_reissue_and_backward_are_conflicts() {
        let mut order = placed(&[Uuid::new_v4()]);
        let actor = Uuid::new_v4();
        let to_picked = AdvanceStatus::new(order.id, OrderStatus::PickedUp, actor);
        let transition = order.plan_transition(&to_picked, Utc::now()).unwrap();
        order.apply(&transition);

        let again = order.plan_transition(&to_picked, Utc::now());
        assert!(matches!(again, Err(OrderError::Conflict { .. })));

        let back = AdvanceStatus::new(order.id, OrderStatus::Confirmed, actor);
        assert!(matches!(
            order.plan_transition(&back, Utc::now()),
            Err(OrderError::Conflict { .. })
        ));
    }

    fn advance_to(order: &mut Order, status: OrderStatus) {
        while order.status < status {
            let next = order.status.next().unwrap();
            let mut request = AdvanceStatus::new(order.id, next, Uuid::new_v4());
            if next == OrderStatus::Delivered {
                request = request.with_delivery_code(order.delivery_code.clone());
            }
            let transition = order.plan_transition(&request, Utc::now()).unwrap();
            order.apply(&transition);
        }
    }

    #[test]
    fn test_delivery_requires_matching_code() {
        let mut order = placed(&[Uuid::new_v4()]);
        advance_to(&mut order, OrderStatus::OutForDelivery);

        let missing = AdvanceStatus::new(order.id, OrderStatus::Delivered, Uuid::new_v4());
        assert!(matches!(
            order.plan_transition(&missing, Utc::now()),
            Err(OrderError::Validation(ValidationError::MissingDeliveryCode))
        ));

        let wrong = missing.clone().with_delivery_code("00000");
        assert!(matches!(
            order.plan_transition(&wrong, Utc::now()),
            Err(OrderError::Validation(ValidationError::DeliveryCodeMismatch))
        ));

        let right = missing.with_delivery_code(" 73510 ");
        assert!(order.plan_transition(&right, Utc::now()).is_ok());
    }

    #[test]
    fn test_delivered_is_terminal() {
        let mut order = placed(&[Uuid::new_v4()]);
        advance_to(&mut order, OrderStatus::Delivered);
        assert!(order.history_is_consistent());
        assert_eq!(order.history.len(), 5);

        let request = AdvanceStatus::new(order.id, OrderStatus::Delivered, Uuid::new_v4())
            .with_delivery_code("73510");
        assert!(matches!(
            order.plan_transition(&request, Utc::now()),
            Err(OrderError::Conflict {
                reason: ConflictReason::Terminal(OrderStatus::Delivered),
                ..
            })
        ));
    }

    #[test]
    fn test_history_timestamp_never_goes_backwards() {
        let mut order = placed(&[Uuid::new_v4()]);
        let skewed = order.created_at - Duration::minutes(5);
        let request = AdvanceStatus::new(order.id, OrderStatus::PickedUp, Uuid::new_v4());

        let transition = order.plan_transition(&request, skewed).unwrap();
        assert_eq!(transition.entry.created_at, order.created_at);

        order.apply(&transition);
        assert!(order.history_is_consistent());
    }

    #[test]
    fn test_visibility_by_role() {
        let seller_a = Uuid::new_v4();
        let seller_b = Uuid::new_v4();
        let order = placed(&[seller_a, seller_b]);

        assert!(Actor::buyer(order.buyer_id).can_view(&order));
        assert!(!Actor::buyer(Uuid::new_v4()).can_view(&order));
        assert!(Actor::seller(seller_b).can_view(&order));
        assert!(!Actor::seller(Uuid::new_v4()).can_view(&order));
        assert!(!Actor::seller(order.buyer_id).can_view(&order));
        assert!(Actor::admin(Uuid::new_v4()).can_view(&order));

        assert_eq!(order.items_for_seller(seller_a).count(), 1);
        assert_eq!(order.seller_ids(), vec![seller_a, seller_b]);
    }
}
