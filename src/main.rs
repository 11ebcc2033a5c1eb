use std::sync::Arc;
use std::time::Duration;

use futures_util::StreamExt;
use rust_decimal::Decimal;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};
use uuid::Uuid;

use order_lifecycle::{
    Actor, AdvanceStatus, EngineConfig, EventFilter, NewOrder, NewOrderItem, OrderChangeEvent,
    OrderEngine, OrderStatus, PgOrderRepository, Role,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Default to INFO level, can be overridden with RUST_LOG env var
    // Example: RUST_LOG=debug cargo run
    tracing_subscriber::registry()
        .with(fmt::layer().with_target(true).with_thread_ids(true))
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,order_lifecycle=debug")),
        )
        .init();

    tracing::info!("🚀 Starting order lifecycle demo");

    // === 1. Configuration ===
    let config = match std::env::var("ORDER_ENGINE_CONFIG") {
        Ok(path) => {
            tracing::info!(path = %path, "Loading engine config");
            EngineConfig::load(&path)?
        }
        Err(_) => EngineConfig::default(),
    };

    // === 2. Storage: PostgreSQL when DATABASE_URL is set, in-memory otherwise ===
    let engine = match std::env::var("DATABASE_URL") {
        Ok(url) => {
            tracing::info!("Connecting to PostgreSQL...");
            let repository = PgOrderRepository::connect(&url).await?;
            repository.migrate().await?;
            OrderEngine::new(repository, config)?
        }
        Err(_) => {
            tracing::info!("DATABASE_URL not set, using in-memory storage");
            OrderEngine::in_memory(config)?
        }
    };
    let engine = Arc::new(engine);

    let buyer = Actor::buyer(Uuid::now_v7());
    let seller = Actor::seller(Uuid::now_v7());
    let courier = Uuid::now_v7();

    // === 3. Seller dashboard: watch events, re-read on each one ===
    let dashboard = {
        let engine = engine.clone();
        let mut feed = Box::pin(engine.subscribe(EventFilter::for_actor(&seller)).into_stream());

        tokio::spawn(async move {
            while let Some(event) = feed.next().await {
                tracing::info!(payload = %serde_json::to_string(&event)?, "📨 Seller dashboard event");

                match event {
                    OrderChangeEvent::Resync { missed } => {
                        let orders = engine.list_for(Role::Seller, seller.id).await?;
                        tracing::warn!(missed, orders = orders.len(), "Dashboard resynced");
                    }
                    other => {
                        let Some(order_id) = other.order_id() else { continue };
                        let order = engine.get_by_id(order_id, &seller).await?;
                        tracing::info!(
                            order_number = %order.order_number,
                            status = %order.status,
                            history = order.history.len(),
                            "Dashboard refreshed order"
                        );
                        if order.status.is_terminal() {
                            break;
                        }
                    }
                }
            }
            Ok::<(), anyhow::Error>(())
        })
    };

    // === 4. Checkout: cart total plus marketplace charges ===
    let unit_price = Decimal::new(12_000, 0);
    let quantity = 2;
    let amounts = engine.quote(unit_price * Decimal::from(quantity));

    let order = engine
        .create_order(NewOrder {
            buyer_id: buyer.id,
            items: vec![NewOrderItem {
                product_id: Some(Uuid::now_v7()),
                product_name: "Pulse oximeter".to_string(),
                product_image: None,
                seller_id: seller.id,
                seller_name: Some("MedSupply Co".to_string()),
                quantity,
                unit_price,
            }],
            delivery_address: "12 Marina Road, Lagos".to_string(),
            phone: "+2348000000000".to_string(),
            payment_method: "card".to_string(),
            notes: None,
            amounts,
        })
        .await?;

    tracing::info!(
        order_number = %order.order_number,
        total = %order.total_amount,
        estimated_delivery = %order.estimated_delivery,
        "✅ Order placed"
    );

    // A skip straight to delivered is refused.
    if let Err(err) = engine
        .advance_status(
            AdvanceStatus::new(order.id, OrderStatus::Delivered, courier)
                .with_delivery_code(order.delivery_code.clone()),
        )
        .await
    {
        tracing::info!(error = %err, "Skip rejected as expected");
    }

    // === 5. Walk the delivery lifecycle ===
    let mut current = order.clone();
    while let Some(next) = current.status.next() {
        let mut request = AdvanceStatus::new(order.id, next, courier);
        if next == OrderStatus::Delivered {
            request = request.with_delivery_code(order.delivery_code.clone());
        }
        current = engine.advance_status(request).await?;
    }

    // === 6. Buyer tracks by order number ===
    let tracked = engine
        .get_by_order_number(&order.order_number.to_lowercase(), &buyer)
        .await?;
    for entry in &tracked.history {
        tracing::info!(
            status = %entry.status,
            at = %entry.created_at,
            notes = entry.notes.as_deref().unwrap_or_default(),
            "📜 History"
        );
    }

    match tokio::time::timeout(Duration::from_secs(5), dashboard).await {
        Ok(joined) => joined??,
        Err(_) => tracing::warn!("Dashboard did not observe delivery in time"),
    }

    tracing::info!(
        metric_families = engine.metrics().registry().gather().len(),
        orders_created = engine.metrics().orders_created.get(),
        "📊 Demo complete"
    );

    Ok(())
}
