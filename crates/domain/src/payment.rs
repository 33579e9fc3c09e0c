//! Payment entity and the payment gateway seam.

use std::sync::Arc;

use async_trait::async_trait;
use common::EntityId;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use crate::entity::Entity;
use crate::error::{DomainError, Result};
use crate::value_objects::Money;

/// Record of a successful charge for an order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Payment {
    pub order_id: EntityId,
    pub charge_id: String,
}

impl Entity for Payment {
    fn entity_type() -> &'static str {
        "Payment"
    }

    fn status(&self) -> &'static str {
        "Charged"
    }
}

/// A charge to submit to the gateway.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChargeRequest {
    /// Amount in minor units.
    pub amount: Money,
    pub currency: String,
    /// Card or payment-method token supplied by the buyer.
    pub source: String,
}

/// A charge accepted by the gateway.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Charge {
    pub id: String,
}

/// Trait for payment processing.
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    /// Charges the buyer's payment source.
    async fn charge(&self, request: ChargeRequest) -> Result<Charge>;
}

#[async_trait]
impl<T: PaymentGateway + ?Sized> PaymentGateway for Arc<T> {
    async fn charge(&self, request: ChargeRequest) -> Result<Charge> {
        (**self).charge(request).await
    }
}

#[derive(Debug, Default)]
struct InMemoryGatewayState {
    charges: Vec<(Charge, ChargeRequest)>,
    next_id: u32,
    decline: bool,
}

/// In-memory payment gateway for tests and local runs.
#[derive(Debug, Clone, Default)]
pub struct InMemoryPaymentGateway {
    state: Arc<Mutex<InMemoryGatewayState>>,
}

impl InMemoryPaymentGateway {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes subsequent charges fail (or succeed again).
    pub async fn set_decline(&self, decline: bool) {
        self.state.lock().await.decline = decline;
    }

    /// Returns every accepted charge request, oldest first.
    pub async fn charges(&self) -> Vec<ChargeRequest> {
        self.state
            .lock()
            .await
            .charges
            .iter()
            .map(|(_, request)| request.clone())
            .collect()
    }

    pub async fn charge_count(&self) -> usize {
        self.state.lock().await.charges.len()
    }
}

#[async_trait]
impl PaymentGateway for InMemoryPaymentGateway {
    async fn charge(&self, request: ChargeRequest) -> Result<Charge> {
        let mut state = self.state.lock().await;

        if state.decline {
            return Err(DomainError::Gateway("Card declined".to_string()));
        }

        state.next_id += 1;
        let charge = Charge {
            id: format!("ch_{:06}", state.next_id),
        };
        state.charges.push((charge.clone(), request));
        Ok(charge)
    }
}
