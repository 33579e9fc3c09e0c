//! Payments service: charges orders, replicates orders.

use bus::{EventBus, EventPublisher, Subject};
use common::{ActorId, EntityId};
use record_store::{RecordQuery, RecordStore, Version};

use crate::entity::Versioned;
use crate::error::{AuthorizationError, DomainError, Result};
use crate::events::{OrderEventData, PaymentEventData};
use crate::order::OrderStatus;
use crate::payment::{ChargeRequest, Payment, PaymentGateway};
use crate::replica::OrderReplica;
use crate::repository::Repository;

/// Currency charged unless configured otherwise.
pub const DEFAULT_CURRENCY: &str = "inr";

pub struct PaymentsService<S: RecordStore, B: EventBus, G: PaymentGateway> {
    payments: Repository<S, Payment>,
    orders: Repository<S, OrderReplica>,
    gateway: G,
    publisher: EventPublisher<B>,
    currency: String,
}

impl<S, B, G> PaymentsService<S, B, G>
where
    S: RecordStore + Clone,
    B: EventBus,
    G: PaymentGateway,
{
    pub fn new(store: S, publisher: EventPublisher<B>, gateway: G) -> Self {
        Self {
            payments: Repository::new(store.clone()),
            orders: Repository::new(store),
            gateway,
            publisher,
            currency: DEFAULT_CURRENCY.to_string(),
        }
    }

    pub fn with_currency(mut self, currency: impl Into<String>) -> Self {
        self.currency = currency.into();
        self
    }

    pub fn publisher(&self) -> &EventPublisher<B> {
        &self.publisher
    }

    /// Charges the buyer for one of their orders.
    #[tracing::instrument(skip(self, token))]
    pub async fn charge(
        &self,
        actor: ActorId,
        order_id: EntityId,
        token: String,
    ) -> Result<super::Committed<Payment>> {
        let order = self.orders.load(order_id).await?;
        if !order.is_owned_by(actor) {
            return Err(AuthorizationError::NotOwner.into());
        }
        match order.status {
            OrderStatus::Cancelled => {
                return Err(DomainError::InvalidState(
                    "Cannot pay for a cancelled order".to_string(),
                ));
            }
            OrderStatus::Complete => {
                return Err(DomainError::InvalidState("Order has already been paid".to_string()));
            }
            OrderStatus::Created => {}
        }

        let charge = self
            .gateway
            .charge(ChargeRequest {
                amount: order.price,
                currency: self.currency.clone(),
                source: token,
            })
            .await?;
        tracing::info!(order_id = %order_id, charge_id = %charge.id, "Order charged");

        let payment = Payment {
            order_id,
            charge_id: charge.id,
        };
        let record = self.payments.create(EntityId::new(), actor, payment).await?;

        let publish = self
            .publisher
            .publish_after_commit(
                Subject::PaymentCreated,
                record.id,
                record.version,
                &PaymentEventData::from(&record),
            )
            .await;
        Ok(super::Committed { record, publish })
    }

    /// Payments made by the actor, oldest first.
    pub async fn list(&self, actor: ActorId) -> Result<Vec<Versioned<Payment>>> {
        self.payments.query(RecordQuery::new().owner(actor)).await
    }

    /// Version of the local order replica.
    pub async fn order_replica_version(&self, order_id: EntityId) -> Result<Option<Version>> {
        self.orders.current_version(order_id).await
    }

    pub async fn order_replica(&self, order_id: EntityId) -> Result<Option<Versioned<OrderReplica>>> {
        self.orders.find(order_id).await
    }

    /// Reacts to `order:created`, `order:cancelled` and `order:completed`.
    pub async fn apply_order(&self, data: OrderEventData, version: Version) -> Result<()> {
        self.orders
            .sync(data.id, data.owner, version, OrderReplica::from(&data))
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::order::TicketRef;
    use crate::payment::InMemoryPaymentGateway;
    use crate::value_objects::Money;
    use bus::InMemoryEventBus;
    use chrono::Utc;
    use record_store::InMemoryRecordStore;

    struct Fixture {
        service: PaymentsService<InMemoryRecordStore, InMemoryEventBus, InMemoryPaymentGateway>,
        gateway: InMemoryPaymentGateway,
        bus: InMemoryEventBus,
    }

    fn fixture() -> Fixture {
        let bus = InMemoryEventBus::new();
        let gateway = InMemoryPaymentGateway::new();
        let service = PaymentsService::new(
            InMemoryRecordStore::new(),
            EventPublisher::new(bus.clone()),
            gateway.clone(),
        );
        Fixture {
            service,
            gateway,
            bus,
        }
    }

    fn order(owner: ActorId, status: OrderStatus) -> OrderEventData {
        OrderEventData {
            id: EntityId::new(),
            status,
            owner,
            expires_at: Utc::now(),
            ticket: TicketRef {
                id: EntityId::new(),
                price: Money::from_minor(2000),
            },
        }
    }

    #[tokio::test]
    async fn test_charge_unknown_order_is_not_found() {
        let f = fixture();
        let err = f
            .service
            .charge(ActorId::new(), EntityId::new(), "tok_visa".into())
            .await
            .unwrap_err();
        assert_eq!(err.status_code(), 404);
        assert_eq!(f.gateway.charge_count().await, 0);
    }

    #[tokio::test]
    async fn test_charge_other_buyers_order_is_unauthorized() {
        let f = fixture();
        let data = order(ActorId::new(), OrderStatus::Created);
        f.service.apply_order(data.clone(), Version::initial()).await.unwrap();

        let err = f
            .service
            .charge(ActorId::new(), data.id, "tok_visa".into())
            .await
            .unwrap_err();
        assert_eq!(err.status_code(), 401);
    }

    #[tokio::test]
    async fn test_charge_cancelled_order_is_bad_request() {
        let f = fixture();
        let buyer = ActorId::new();
        let mut data = order(buyer, OrderStatus::Created);
        f.service.apply_order(data.clone(), Version::initial()).await.unwrap();
        data.status = OrderStatus::Cancelled;
        f.service.apply_order(data.clone(), Version::new(1)).await.unwrap();

        let err = f.service.charge(buyer, data.id, "tok_visa".into()).await.unwrap_err();
        assert_eq!(err.status_code(), 400);
        assert_eq!(f.gateway.charge_count().await, 0);
    }

    #[tokio::test]
    async fn test_charge_uses_order_price_and_currency() {
        let f = fixture();
        let buyer = ActorId::new();
        let data = order(buyer, OrderStatus::Created);
        f.service.apply_order(data.clone(), Version::initial()).await.unwrap();

        let payment = f.service.charge(buyer, data.id, "tok_visa".into()).await.unwrap();

        assert_eq!(payment.version, Version::initial());
        assert_eq!(payment.order_id, data.id);
        let charges = f.gateway.charges().await;
        assert_eq!(charges.len(), 1);
        assert_eq!(charges[0].amount.minor_units(), 2000);
        assert_eq!(charges[0].currency, "inr");
        assert_eq!(charges[0].source, "tok_visa");

        let sent = f.bus.published_for(Subject::PaymentCreated).await;
        assert_eq!(sent.len(), 1);
        let body: PaymentEventData = sent[0].decode().unwrap();
        assert_eq!(body.order_id, data.id);
        assert_eq!(body.charge_id, payment.charge_id);
        assert_eq!(f.service.list(buyer).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_declined_charge_stores_nothing() {
        let f = fixture();
        let buyer = ActorId::new();
        let data = order(buyer, OrderStatus::Created);
        f.service.apply_order(data.clone(), Version::initial()).await.unwrap();
        f.gateway.set_decline(true).await;

        let err = f.service.charge(buyer, data.id, "tok_visa".into()).await.unwrap_err();

        assert_eq!(err.status_code(), 500);
        assert!(f.service.list(buyer).await.unwrap().is_empty());
        assert_eq!(f.bus.publish_count().await, 0);
    }

    #[tokio::test]
    async fn test_configured_currency() {
        let f = fixture();
        let service = PaymentsService::new(
            InMemoryRecordStore::new(),
            EventPublisher::new(f.bus.clone()),
            f.gateway.clone(),
        )
        .with_currency("usd");
        let buyer = ActorId::new();
        let data = order(buyer, OrderStatus::Created);
        service.apply_order(data.clone(), Version::initial()).await.unwrap();

        service.charge(buyer, data.id, "tok".into()).await.unwrap();
        assert_eq!(f.gateway.charges().await[0].currency, "usd");
    }
}
