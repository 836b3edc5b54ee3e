use chrono::Utc;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ============================================================================
// Domain Models
// ============================================================================
//
// The canonical wire schema is the minimal one: order_id, product, price,
// timestamp. The richer fields (quantity, status, payment method, shipping
// address) are optional extensions and are omitted from the payload when
// absent.
//
// ============================================================================

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct Order {
    pub order_id: String,
    pub product: String,
    /// Price in currency units. Never negative.
    pub price: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quantity: Option<u32>,
    /// Creation instant, producer-assigned, millis since epoch.
    pub timestamp: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<OrderStatus>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payment_method: Option<PaymentMethod>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub shipping_address: Option<ShippingAddress>,
}

impl Order {
    /// Create a new order with a generated id and the current timestamp.
    /// The price must be non-negative.
    pub fn new(product: impl Into<String>, price: f64) -> Self {
        debug_assert!(
            price >= 0.0,
            "order price must be non-negative, got {price}"
        );
        Self {
            order_id: Uuid::new_v4().to_string(),
            product: product.into(),
            price,
            quantity: None,
            timestamp: Utc::now().timestamp_millis(),
            status: Some(OrderStatus::Created),
            payment_method: None,
            shipping_address: None,
        }
    }

    /// Effective quantity, defaulting to 1 when unset.
    pub fn quantity(&self) -> u32 {
        self.quantity.unwrap_or(1)
    }

    /// Routing key for partition-stable delivery.
    pub fn routing_key(&self) -> &str {
        &self.order_id
    }
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq)]
pub enum OrderStatus {
    Created,
    Processing,
    Completed,
    Cancelled,
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq)]
pub enum PaymentMethod {
    CreditCard,
    DebitCard,
    BankTransfer,
    Wallet,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct ShippingAddress {
    pub street: String,
    pub city: String,
    pub country: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub postal_code: Option<String>,
}

// ============================================================================
// Unit Tests
// ============================================================================
