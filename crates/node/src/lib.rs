//! Single-process host for the ticketing services.
//!
//! Wires the tickets, orders and payments services to their own record
//! stores and one in-memory event bus, and runs a replica consumer per
//! subscribed subject until [`App::shutdown`] is called.

pub mod config;
pub mod error;
pub mod telemetry;

use std::sync::Arc;

use bus::{EventBus, EventPublisher, InMemoryEventBus};
use domain::{InMemoryPaymentGateway, OrdersService, PaymentsService, TicketsService};
use record_store::{InMemoryRecordStore, PostgresRecordStore, SharedRecordStore};
use replication::{
    Dispatcher, OrderPaymentHandler, OrderTicketHandler, PaymentOrderHandler, ReplicaHandler,
    TicketOrderHandler,
};
use tokio::sync::watch;
use tokio::task::JoinHandle;

pub use config::{Config, LogFormat};
pub use error::{NodeError, Result};

pub type Tickets = TicketsService<SharedRecordStore, InMemoryEventBus>;
pub type Orders = OrdersService<SharedRecordStore, InMemoryEventBus>;
pub type Payments = PaymentsService<SharedRecordStore, InMemoryEventBus, InMemoryPaymentGateway>;

const POOL_SIZE: u32 = 5;

/// One record store per service.
pub struct Stores {
    pub tickets: SharedRecordStore,
    pub orders: SharedRecordStore,
    pub payments: SharedRecordStore,
    pools: Vec<PostgresRecordStore>,
}

impl Stores {
    /// Three independent in-memory stores.
    pub fn in_memory() -> Self {
        Self {
            tickets: Arc::new(InMemoryRecordStore::new()),
            orders: Arc::new(InMemoryRecordStore::new()),
            payments: Arc::new(InMemoryRecordStore::new()),
            pools: Vec::new(),
        }
    }

    /// Opens each service's store from its configured database URL, falling
    /// back to memory where none is set.
    pub async fn open(config: &Config) -> Result<Self> {
        let mut pools = Vec::new();
        let tickets = open_store("tickets", config.tickets_database_url.as_deref(), &mut pools).await?;
        let orders = open_store("orders", config.orders_database_url.as_deref(), &mut pools).await?;
        let payments =
            open_store("payments", config.payments_database_url.as_deref(), &mut pools).await?;
        Ok(Self {
            tickets,
            orders,
            payments,
            pools,
        })
    }
}

async fn open_store(
    service: &str,
    url: Option<&str>,
    pools: &mut Vec<PostgresRecordStore>,
) -> Result<SharedRecordStore> {
    let Some(url) = url else {
        tracing::info!(service, "Using in-memory record store");
        return Ok(Arc::new(InMemoryRecordStore::new()));
    };

    let store = PostgresRecordStore::connect(url, POOL_SIZE).await?;
    store.run_migrations().await?;
    tracing::info!(service, "Connected to Postgres record store");
    pools.push(store.clone());
    Ok(Arc::new(store))
}

/// The running services and their consumers.
pub struct App {
    pub tickets: Arc<Tickets>,
    pub orders: Arc<Orders>,
    pub payments: Arc<Payments>,
    pub gateway: InMemoryPaymentGateway,
    bus: InMemoryEventBus,
    shutdown: watch::Sender<bool>,
    consumers: Vec<JoinHandle<()>>,
    pools: Vec<PostgresRecordStore>,
}

impl App {
    /// Opens the configured stores and starts everything.
    pub async fn start(config: &Config) -> Result<Self> {
        let stores = Stores::open(config).await?;
        Self::build(config, stores, InMemoryEventBus::without_log()).await
    }

    /// Starts the services over the given stores and bus.
    pub async fn build(config: &Config, stores: Stores, bus: InMemoryEventBus) -> Result<Self> {
        let publisher = || EventPublisher::with_timeout(bus.clone(), config.publish_timeout);
        let gateway = InMemoryPaymentGateway::new();

        let tickets = Arc::new(TicketsService::new(stores.tickets, publisher()));
        let orders = Arc::new(
            OrdersService::new(stores.orders, publisher()).with_expiration(config.order_expiration),
        );
        let payments = Arc::new(
            PaymentsService::new(stores.payments, publisher(), gateway.clone())
                .with_currency(config.payment_currency.clone()),
        );
        let (shutdown, _) = watch::channel(false);

        let mut app = Self {
            tickets: Arc::clone(&tickets),
            orders: Arc::clone(&orders),
            payments: Arc::clone(&payments),
            gateway,
            bus,
            shutdown,
            consumers: Vec::new(),
            pools: stores.pools,
        };

        let limit = config.replica_buffer_limit;
        app.spawn_consumers(TicketOrderHandler::new(tickets), limit).await?;
        app.spawn_consumers(OrderTicketHandler::new(Arc::clone(&orders)), limit)
            .await?;
        app.spawn_consumers(OrderPaymentHandler::new(orders), limit).await?;
        app.spawn_consumers(PaymentOrderHandler::new(payments), limit).await?;

        tracing::info!(consumers = app.consumers.len(), "Node started");
        Ok(app)
    }

    /// The bus shared by every service.
    pub fn bus(&self) -> &InMemoryEventBus {
        &self.bus
    }

    /// Number of publishes that failed after commit and await reconciliation.
    pub async fn pending_publishes(&self) -> usize {
        self.tickets.publisher().pending_reconciliation().await.len()
            + self.orders.publisher().pending_reconciliation().await.len()
            + self.payments.publisher().pending_reconciliation().await.len()
    }

    /// Stops the consumers, closes the bus and releases database pools.
    pub async fn shutdown(mut self) {
        self.shutdown.send_replace(true);
        for consumer in std::mem::take(&mut self.consumers) {
            if let Err(e) = consumer.await {
                tracing::error!(error = %e, "Consumer task failed");
            }
        }
        self.bus.close().await;

        let pending = self.pending_publishes().await;
        if pending > 0 {
            tracing::warn!(pending, "Shutting down with unpublished events");
        }

        for pool in std::mem::take(&mut self.pools) {
            pool.close().await;
        }
        tracing::info!("Node stopped");
    }

    async fn spawn_consumers<H>(&mut self, handler: H, buffer_limit: usize) -> Result<()>
    where
        H: ReplicaHandler + 'static,
    {
        let dispatcher = Arc::new(Dispatcher::with_buffer_limit(handler, buffer_limit));
        for subject in dispatcher.handler().subjects() {
            let subscription = self.bus.subscribe(*subject).await?;
            let dispatcher = Arc::clone(&dispatcher);
            let shutdown = self.shutdown.subscribe();
            self.consumers.push(tokio::spawn(async move {
                dispatcher.run(subscription, shutdown).await;
            }));
        }
        Ok(())
    }
}
