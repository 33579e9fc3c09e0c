//! Integration tests running the three services' consumers over one bus.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use bus::{EventBus, EventMessage, EventPublisher, InMemoryEventBus, Subject};
use common::{ActorId, EntityId};
use domain::{InMemoryPaymentGateway, Money, OrderStatus, OrdersService, PaymentsService, TicketsService};
use record_store::{InMemoryRecordStore, Version};
use replication::{
    Dispatcher, OrderPaymentHandler, OrderTicketHandler, PaymentOrderHandler, ReplicaHandler,
    TicketOrderHandler,
};
use tokio::sync::watch;
use tokio::task::JoinHandle;

type Tickets = TicketsService<InMemoryRecordStore, InMemoryEventBus>;
type Orders = OrdersService<InMemoryRecordStore, InMemoryEventBus>;
type Payments = PaymentsService<InMemoryRecordStore, InMemoryEventBus, InMemoryPaymentGateway>;

struct Cluster {
    bus: InMemoryEventBus,
    tickets: Arc<Tickets>,
    orders: Arc<Orders>,
    payments: Arc<Payments>,
    shutdown: watch::Sender<bool>,
    consumers: Vec<JoinHandle<()>>,
}

impl Cluster {
    async fn start() -> Self {
        let bus = InMemoryEventBus::new();
        let tickets = Arc::new(TicketsService::new(
            InMemoryRecordStore::new(),
            EventPublisher::new(bus.clone()),
        ));
        let orders = Arc::new(OrdersService::new(
            InMemoryRecordStore::new(),
            EventPublisher::new(bus.clone()),
        ));
        let payments = Arc::new(PaymentsService::new(
            InMemoryRecordStore::new(),
            EventPublisher::new(bus.clone()),
            InMemoryPaymentGateway::new(),
        ));
        let (shutdown, _) = watch::channel(false);

        let mut cluster = Self {
            bus,
            tickets: Arc::clone(&tickets),
            orders: Arc::clone(&orders),
            payments: Arc::clone(&payments),
            shutdown,
            consumers: Vec::new(),
        };
        cluster.spawn(TicketOrderHandler::new(tickets)).await;
        cluster.spawn(OrderTicketHandler::new(Arc::clone(&orders))).await;
        cluster.spawn(OrderPaymentHandler::new(orders)).await;
        cluster.spawn(PaymentOrderHandler::new(payments)).await;
        cluster
    }

    async fn spawn<H: ReplicaHandler + 'static>(&mut self, handler: H) {
        let dispatcher = Arc::new(Dispatcher::new(handler));
        for subject in dispatcher.handler().subjects() {
            let subscription = self.bus.subscribe(*subject).await.unwrap();
            let dispatcher = Arc::clone(&dispatcher);
            let shutdown = self.shutdown.subscribe();
            self.consumers.push(tokio::spawn(async move {
                dispatcher.run(subscription, shutdown).await;
            }));
        }
    }

    async fn stop(self) {
        self.shutdown.send_replace(true);
        for consumer in self.consumers {
            consumer.await.unwrap();
        }
    }
}

/// Polls `check` until it holds or two seconds pass.
async fn eventually<F, Fut>(mut check: F)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    for _ in 0..200 {
        if check().await {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not reached in time");
}

#[tokio::test]
async fn test_ticket_changes_reach_orders_replica() {
    let cluster = Cluster::start().await;
    let seller = ActorId::new();
    let ticket_id = cluster
        .tickets
        .create(seller, "concert".into(), Money::from_minor(2000))
        .await
        .unwrap()
        .id;
    cluster
        .tickets
        .update(seller, ticket_id, "concert".into(), Money::from_minor(2500))
        .await
        .unwrap();

    eventually(|| async {
        matches!(
            cluster.orders.ticket_replica(ticket_id).await.unwrap(),
            Some(replica) if replica.version == Version::new(1)
        )
    })
    .await;
    let replica = cluster.orders.ticket_replica(ticket_id).await.unwrap().unwrap();
    assert_eq!(replica.price, Money::from_minor(2500));

    cluster.stop().await;
}

#[tokio::test]
async fn test_order_reserves_ticket_then_payment_completes_it() {
    let cluster = Cluster::start().await;
    let buyer = ActorId::new();
    let ticket_id = cluster
        .tickets
        .create(ActorId::new(), "concert".into(), Money::from_minor(3200))
        .await
        .unwrap()
        .id;

    eventually(|| async { cluster.orders.ticket_replica(ticket_id).await.unwrap().is_some() })
        .await;

    let order_id = cluster.orders.create(buyer, ticket_id).await.unwrap().id;

    // Tickets locks the ticket, and the lock flows back to the orders replica.
    eventually(|| async {
        matches!(
            cluster.orders.ticket_replica(ticket_id).await.unwrap(),
            Some(replica) if replica.order_id == Some(order_id)
        )
    })
    .await;
    assert_eq!(
        cluster.tickets.get(ticket_id).await.unwrap().order_id(),
        Some(order_id)
    );

    eventually(|| async { cluster.payments.order_replica(order_id).await.unwrap().is_some() })
        .await;
    cluster
        .payments
        .charge(buyer, order_id, "tok_visa".into())
        .await
        .unwrap();

    eventually(|| async {
        cluster.orders.get(buyer, order_id).await.unwrap().order_status() == OrderStatus::Complete
    })
    .await;

    // order:completed reaches the payments replica at version 1.
    eventually(|| async {
        matches!(
            cluster.payments.order_replica(order_id).await.unwrap(),
            Some(replica) if replica.version == Version::new(1)
                && replica.status == OrderStatus::Complete
        )
    })
    .await;

    cluster.stop().await;
}

#[tokio::test]
async fn test_cancelled_order_unlocks_ticket() {
    let cluster = Cluster::start().await;
    let seller = ActorId::new();
    let buyer = ActorId::new();
    let ticket_id = cluster
        .tickets
        .create(seller, "concert".into(), Money::from_minor(2000))
        .await
        .unwrap()
        .id;
    eventually(|| async { cluster.orders.ticket_replica(ticket_id).await.unwrap().is_some() })
        .await;

    let order_id = cluster.orders.create(buyer, ticket_id).await.unwrap().id;
    eventually(|| async {
        cluster.tickets.get(ticket_id).await.unwrap().order_id() == Some(order_id)
    })
    .await;

    cluster.orders.cancel(buyer, order_id).await.unwrap();
    eventually(|| async { cluster.tickets.get(ticket_id).await.unwrap().order_id().is_none() })
        .await;

    let edited = cluster
        .tickets
        .update(seller, ticket_id, "concert".into(), Money::from_minor(1800))
        .await
        .unwrap();
    assert_eq!(edited.price(), Money::from_minor(1800));

    cluster.stop().await;
}

#[tokio::test]
async fn test_out_of_order_redelivery_converges() {
    let cluster = Cluster::start().await;
    let id = EntityId::new();
    let owner = ActorId::new();
    let event = |version: i64, price: i64| {
        let subject = if version == 0 {
            Subject::TicketCreated
        } else {
            Subject::TicketUpdated
        };
        EventMessage::from_payload(
            subject,
            id,
            Version::new(version),
            &domain::TicketEventData {
                id,
                title: "concert".into(),
                price: Money::from_minor(price),
                owner,
                order_id: None,
            },
        )
        .unwrap()
    };

    // Garbage first: it must not stop the consumer.
    cluster
        .bus
        .deliver(EventMessage::new(
            Subject::TicketUpdated,
            id,
            Version::initial(),
            serde_json::json!("not a ticket"),
        ))
        .await;
    cluster.bus.deliver(event(2, 1200)).await;
    cluster.bus.deliver(event(0, 1000)).await;
    cluster.bus.deliver(event(0, 1000)).await;
    cluster.bus.deliver(event(1, 1100)).await;

    eventually(|| async {
        matches!(
            cluster.orders.ticket_replica(id).await.unwrap(),
            Some(replica) if replica.version == Version::new(2)
        )
    })
    .await;
    let replica = cluster.orders.ticket_replica(id).await.unwrap().unwrap();
    assert_eq!(replica.price, Money::from_minor(1200));

    cluster.stop().await;
}
