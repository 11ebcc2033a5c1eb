use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::postgres::{PgPool, PgRow};
use sqlx::{query, query_as, query_scalar, FromRow, Postgres, Row, Transaction};
use uuid::Uuid;

use super::{OrderRepository, RepositoryError};
use crate::domain::order::{
    Order, OrderItem, OrderScope, OrderStatus, StatusHistoryEntry, StatusTransition,
};

// ============================================================================
// PostgreSQL Order Repository
// ============================================================================
//
// Every write runs in one transaction. Reads run in a `REPEATABLE READ`
// transaction so the order row, its items and its history come from the
// same snapshot.
//
// ============================================================================

const SCHEMA_SQL: &str = include_str!("../../migrations/0001_create_order_tables.sql");

const INSERT_ORDER_SQL: &str = include_str!("sql/insert_order.sql");
const INSERT_ORDER_ITEM_SQL: &str = include_str!("sql/insert_order_item.sql");
const INSERT_STATUS_HISTORY_SQL: &str = include_str!("sql/insert_status_history.sql");
const UPDATE_ORDER_STATUS_SQL: &str = include_str!("sql/update_order_status.sql");
const GET_ORDER_VERSION_SQL: &str = include_str!("sql/get_order_version.sql");
const GET_ORDER_BY_ID_SQL: &str = include_str!("sql/get_order_by_id.sql");
const GET_ORDER_BY_NUMBER_SQL: &str = include_str!("sql/get_order_by_number.sql");
const LIST_ORDERS_FOR_BUYER_SQL: &str = include_str!("sql/list_orders_for_buyer.sql");
const LIST_ORDERS_FOR_SELLER_SQL: &str = include_str!("sql/list_orders_for_seller.sql");
const LIST_ALL_ORDERS_SQL: &str = include_str!("sql/list_all_orders.sql");
const GET_ORDER_ITEMS_SQL: &str = include_str!("sql/get_order_items.sql");
const GET_STATUS_HISTORY_SQL: &str = include_str!("sql/get_status_history.sql");

const SNAPSHOT_SQL: &str = "SET TRANSACTION ISOLATION LEVEL REPEATABLE READ READ ONLY";

#[derive(Debug, Clone)]
pub struct PgOrderRepository {
    pool: PgPool,
}

impl PgOrderRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Connect to `PostgreSQL`.
    pub async fn connect(database_url: &str) -> Result<Self, RepositoryError> {
        let pool = PgPool::connect(database_url).await.map_err(storage_error)?;
        Ok(Self::new(pool))
    }

    /// Create the order tables if they do not exist.
    pub async fn migrate(&self) -> Result<(), RepositoryError> {
        sqlx::raw_sql(SCHEMA_SQL)
            .execute(&self.pool)
            .await
            .map_err(storage_error)?;
        Ok(())
    }

    async fn begin_snapshot(&self) -> Result<Transaction<'static, Postgres>, RepositoryError> {
        let mut tx = self.pool.begin().await.map_err(storage_error)?;
        query(SNAPSHOT_SQL)
            .execute(&mut *tx)
            .await
            .map_err(storage_error)?;
        Ok(tx)
    }

    async fn find_one(&self, sql: &'static str, key: QueryKey<'_>) -> Result<Option<Order>, RepositoryError> {
        let mut tx = self.begin_snapshot().await?;

        let statement = query_as::<Postgres, OrderRow>(sql);
        let statement = match key {
            QueryKey::Id(id) => statement.bind(id),
            QueryKey::Number(number) => statement.bind(number),
        };
        let Some(row) = statement
            .fetch_optional(&mut *tx)
            .await
            .map_err(storage_error)?
        else {
            tx.commit().await.map_err(storage_error)?;
            return Ok(None);
        };

        let mut orders = hydrate(&mut tx, vec![row]).await?;
        tx.commit().await.map_err(storage_error)?;

        Ok(orders.pop())
    }
}

enum QueryKey<'a> {
    Id(Uuid),
    Number(&'a str),
}

#[async_trait]
impl OrderRepository for PgOrderRepository {
    async fn insert_order(&self, order: &Order) -> Result<(), RepositoryError> {
        let mut tx = self.pool.begin().await.map_err(storage_error)?;

        query(INSERT_ORDER_SQL)
            .bind(order.id)
            .bind(&order.order_number)
            .bind(&order.delivery_code)
            .bind(order.buyer_id)
            .bind(&order.phone)
            .bind(&order.delivery_address)
            .bind(&order.notes)
            .bind(order.status.as_str())
            .bind(order.total_amount)
            .bind(order.shipping_amount)
            .bind(order.tax_amount)
            .bind(&order.payment_method)
            .bind(order.estimated_delivery)
            .bind(order.version)
            .bind(order.created_at)
            .bind(order.updated_at)
            .execute(&mut *tx)
            .await
            .map_err(|e| insert_error(e, &order.order_number))?;

        for item in &order.items {
            query(INSERT_ORDER_ITEM_SQL)
                .bind(item.id)
                .bind(order.id)
                .bind(item.product_id)
                .bind(&item.product_name)
                .bind(&item.product_image)
                .bind(item.seller_id)
                .bind(&item.seller_name)
                .bind(item.quantity)
                .bind(item.unit_price)
                .bind(item.created_at)
                .execute(&mut *tx)
                .await
                .map_err(storage_error)?;
        }

        for entry in &order.history {
            insert_history(&mut tx, order.id, entry).await?;
        }

        // Dropping an uncommitted transaction rolls it back, so any early
        // return above leaves nothing behind.
        tx.commit().await.map_err(storage_error)?;

        tracing::info!(
            order_id = %order.id,
            order_number = %order.order_number,
            items = order.items.len(),
            "Committed order aggregate"
        );
        Ok(())
    }

    async fn apply_transition(&self, transition: &StatusTransition) -> Result<(), RepositoryError> {
        let mut tx = self.pool.begin().await.map_err(storage_error)?;

        let updated = query(UPDATE_ORDER_STATUS_SQL)
            .bind(transition.to.as_str())
            .bind(transition.new_version())
            .bind(transition.updated_at())
            .bind(transition.order_id)
            .bind(transition.expected_version)
            .bind(transition.from.as_str())
            .execute(&mut *tx)
            .await
            .map_err(storage_error)?
            .rows_affected();

        if updated == 0 {
            let current = query_scalar::<Postgres, i64>(GET_ORDER_VERSION_SQL)
                .bind(transition.order_id)
                .fetch_optional(&mut *tx)
                .await
                .map_err(storage_error)?;
            tx.rollback().await.map_err(storage_error)?;

            return Err(match current {
                None => RepositoryError::NotFound,
                Some(actual) => RepositoryError::VersionConflict {
                    expected: transition.expected_version,
                    actual,
                },
            });
        }

        insert_history(&mut tx, transition.order_id, &transition.entry).await?;
        tx.commit().await.map_err(storage_error)?;

        tracing::info!(
            order_id = %transition.order_id,
            from = %transition.from,
            to = %transition.to,
            version = transition.new_version(),
            "Committed status transition"
        );
        Ok(())
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<Order>, RepositoryError> {
        self.find_one(GET_ORDER_BY_ID_SQL, QueryKey::Id(id)).await
    }

    async fn find_by_order_number(&self, order_number: &str) -> Result<Option<Order>, RepositoryError> {
        self.find_one(GET_ORDER_BY_NUMBER_SQL, QueryKey::Number(order_number))
            .await
    }

    async fn list(&self, scope: OrderScope) -> Result<Vec<Order>, RepositoryError> {
        let mut tx = self.begin_snapshot().await?;

        let rows = match scope {
            OrderScope::Buyer(buyer) => {
                query_as::<Postgres, OrderRow>(LIST_ORDERS_FOR_BUYER_SQL)
                    .bind(buyer)
                    .fetch_all(&mut *tx)
                    .await
            }
            OrderScope::Seller(seller) => {
                query_as::<Postgres, OrderRow>(LIST_ORDERS_FOR_SELLER_SQL)
                    .bind(seller)
                    .fetch_all(&mut *tx)
                    .await
            }
            OrderScope::All => {
                query_as::<Postgres, OrderRow>(LIST_ALL_ORDERS_SQL)
                    .fetch_all(&mut *tx)
                    .await
            }
        }
        .map_err(storage_error)?;

        let orders = hydrate(&mut tx, rows).await?;
        tx.commit().await.map_err(storage_error)?;

        Ok(orders)
    }
}

async fn insert_history(
    tx: &mut Transaction<'_, Postgres>,
    order_id: Uuid,
    entry: &StatusHistoryEntry,
) -> Result<(), RepositoryError> {
    query(INSERT_STATUS_HISTORY_SQL)
        .bind(entry.id)
        .bind(order_id)
        .bind(entry.status.as_str())
        .bind(&entry.notes)
        .bind(entry.updated_by)
        .bind(entry.created_at)
        .execute(&mut **tx)
        .await
        .map_err(storage_error)?;
    Ok(())
}

/// Attach items and history to order rows, preserving row order.
async fn hydrate(
    tx: &mut Transaction<'_, Postgres>,
    rows: Vec<OrderRow>,
) -> Result<Vec<Order>, RepositoryError> {
    if rows.is_empty() {
        return Ok(Vec::new());
    }

    let ids: Vec<Uuid> = rows.iter().map(|row| row.id).collect();

    let items = query_as::<Postgres, ItemRow>(GET_ORDER_ITEMS_SQL)
        .bind(&ids)
        .fetch_all(&mut **tx)
        .await
        .map_err(storage_error)?;

    let history = query_as::<Postgres, HistoryRow>(GET_STATUS_HISTORY_SQL)
        .bind(&ids)
        .fetch_all(&mut **tx)
        .await
        .map_err(storage_error)?;

    let mut items_by_order: HashMap<Uuid, Vec<OrderItem>> = HashMap::new();
    for row in items {
        items_by_order.entry(row.order_id).or_default().push(row.item);
    }

    let mut history_by_order: HashMap<Uuid, Vec<StatusHistoryEntry>> = HashMap::new();
    for row in history {
        history_by_order.entry(row.order_id).or_default().push(row.entry);
    }

    let orders = rows
        .into_iter()
        .map(|row| {
            let id = row.id;
            let mut order = row.into_order(
                items_by_order.remove(&id).unwrap_or_default(),
                history_by_order.remove(&id).unwrap_or_default(),
            );
            order.sort_history();
            order
        })
        .collect();

    Ok(orders)
}

// ============================================================================
// Row mapping
// ============================================================================

struct OrderRow {
    id: Uuid,
    order_number: String,
    delivery_code: String,
    buyer_id: Uuid,
    phone: String,
    delivery_address: String,
    notes: Option<String>,
    status: OrderStatus,
    total_amount: Decimal,
    shipping_amount: Decimal,
    tax_amount: Decimal,
    payment_method: String,
    estimated_delivery: DateTime<Utc>,
    version: i64,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl OrderRow {
    fn into_order(self, items: Vec<OrderItem>, history: Vec<StatusHistoryEntry>) -> Order {
        Order {
            id: self.id,
            order_number: self.order_number,
            delivery_code: self.delivery_code,
            version: self.version,
            buyer_id: self.buyer_id,
            phone: self.phone,
            delivery_address: self.delivery_address,
            notes: self.notes,
            payment_method: self.payment_method,
            total_amount: self.total_amount,
            shipping_amount: self.shipping_amount,
            tax_amount: self.tax_amount,
            status: self.status,
            estimated_delivery: self.estimated_delivery,
            created_at: self.created_at,
            updated_at: self.updated_at,
            items,
            history,
        }
    }
}

impl<'r> FromRow<'r, PgRow> for OrderRow {
    fn from_row(row: &'r PgRow) -> sqlx::Result<Self> {
        Ok(Self {
            id: row.try_get("id")?,
            order_number: row.try_get("order_number")?,
            delivery_code: row.try_get("delivery_code")?,
            buyer_id: row.try_get("buyer_id")?,
            phone: row.try_get("phone")?,
            delivery_address: row.try_get("delivery_address")?,
            notes: row.try_get("notes")?,
            status: try_get_status(row, "status")?,
            total_amount: row.try_get("total_amount")?,
            shipping_amount: row.try_get("shipping_amount")?,
            tax_amount: row.try_get("tax_amount")?,
            payment_method: row.try_get("payment_method")?,
            estimated_delivery: row.try_get("estimated_delivery")?,
            version: row.try_get("version")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }
}

struct ItemRow {
    order_id: Uuid,
    item: OrderItem,
}

impl<'r> FromRow<'r, PgRow> for ItemRow {
    fn from_row(row: &'r PgRow) -> sqlx::Result<Self> {
        Ok(Self {
            order_id: row.try_get("order_id")?,
            item: OrderItem {
                id: row.try_get("id")?,
                product_id: row.try_get("product_id")?,
                product_name: row.try_get("product_name")?,
                product_image: row.try_get("product_image")?,
                seller_id: row.try_get("seller_id")?,
                seller_name: row.try_get("seller_name")?,
                quantity: row.try_get("quantity")?,
                unit_price: row.try_get("unit_price")?,
                created_at: row.try_get("created_at")?,
            },
        })
    }
}

struct HistoryRow {
    order_id: Uuid,
    entry: StatusHistoryEntry,
}

impl<'r> FromRow<'r, PgRow> for HistoryRow {
    fn from_row(row: &'r PgRow) -> sqlx::Result<Self> {
        Ok(Self {
            order_id: row.try_get("order_id")?,
            entry: StatusHistoryEntry {
                id: row.try_get("id")?,
                status: try_get_status(row, "status")?,
                notes: row.try_get("notes")?,
                updated_by: row.try_get("updated_by")?,
                created_at: row.try_get("created_at")?,
            },
        })
    }
}

/// Status text is validated here, once, on the way in.
fn try_get_status(row: &PgRow, col: &str) -> Result<OrderStatus, sqlx::Error> {
    let raw: String = row.try_get(col)?;

    raw.parse::<OrderStatus>().map_err(|e| sqlx::Error::ColumnDecode {
        index: col.to_string(),
        source: Box::new(e),
    })
}

// ============================================================================
// Error classification
// ============================================================================

const UNIQUE_VIOLATION: &str = "23505";
const SERIALIZATION_FAILURE: &str = "40001";
const DEADLOCK_DETECTED: &str = "40P01";

fn insert_error(err: sqlx::Error, order_number: &str) -> RepositoryError {
    if let sqlx::Error::Database(db) = &err {
        let on_order_number = db
            .constraint()
            .map_or(true, |constraint| constraint.contains("order_number"));
        if db.code().as_deref() == Some(UNIQUE_VIOLATION) && on_order_number {
            return RepositoryError::DuplicateOrderNumber(order_number.to_string());
        }
    }
    storage_error(err)
}

fn storage_error(err: sqlx::Error) -> RepositoryError {
    match &err {
        sqlx::Error::Io(_)
        | sqlx::Error::Tls(_)
        | sqlx::Error::PoolTimedOut
        | sqlx::Error::PoolClosed
        | sqlx::Error::WorkerCrashed => RepositoryError::Unavailable(err.to_string()),
        sqlx::Error::Database(db)
            if matches!(
                db.code().as_deref(),
                Some(SERIALIZATION_FAILURE) | Some(DEADLOCK_DETECTED)
            ) =>
        {
            RepositoryError::Unavailable(err.to_string())
        }
        sqlx::Error::ColumnDecode { .. }
        | sqlx::Error::Decode(_)
        | sqlx::Error::ColumnNotFound(_)
        | sqlx::Error::TypeNotFound { .. } => RepositoryError::Corrupt(err.to_string()),
        _ => RepositoryError::Backend(err.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::order::aggregate::tests::sample_request;
    use crate::domain::order::{AdvanceStatus, OrderIdentifiers};
    use chrono::Duration;

    #[test]
    fn test_connectivity_errors_are_unavailable() {
        assert!(matches!(
            storage_error(sqlx::Error::PoolTimedOut),
            RepositoryError::Unavailable(_)
        ));
        assert!(matches!(
            storage_error(sqlx::Error::PoolClosed),
            RepositoryError::Unavailable(_)
        ));
    }

    #[test]
    fn test_decode_errors_are_corrupt() {
        let err = sqlx::Error::ColumnDecode {
            index: "status".to_string(),
            source: Box::new(crate::domain::order::UnknownStatus("shipped".to_string())),
        };
        assert!(matches!(storage_error(err), RepositoryError::Corrupt(_)));
    }

    #[test]
    fn test_other_errors_are_backend() {
        assert!(matches!(
            storage_error(sqlx::Error::RowNotFound),
            RepositoryError::Backend(_)
        ));
        assert!(matches!(
            insert_error(sqlx::Error::RowNotFound, "DJ-ABC123XYZ"),
            RepositoryError::Backend(_)
        ));
    }

    // Needs a disposable database: DATABASE_URL=postgres://... cargo test -- --ignored
    #[tokio::test]
    #[ignore = "requires DATABASE_URL"]
    async fn test_round_trip_against_postgres() {
        let url = std::env::var("DATABASE_URL").expect("DATABASE_URL must be set");
        let repo = PgOrderRepository::connect(&url).await.unwrap();
        repo.migrate().await.unwrap();

        let buyer = Uuid::new_v4();
        let seller = Uuid::new_v4();
        let order = Order::place(
            sample_request(buyer, &[seller, Uuid::new_v4()]),
            OrderIdentifiers {
                order_number: format!("DJ-{}", &Uuid::new_v4().simple().to_string()[..12].to_uppercase()),
                delivery_code: "73510".to_string(),
            },
            Utc::now(),
            Duration::days(3),
        )
        .unwrap();
        repo.insert_order(&order).await.unwrap();

        let clash = Order::place(
            sample_request(Uuid::new_v4(), &[seller]),
            OrderIdentifiers {
                order_number: order.order_number.clone(),
                delivery_code: "11111".to_string(),
            },
            Utc::now(),
            Duration::days(3),
        )
        .unwrap();
        let err = repo.insert_order(&clash).await.unwrap_err();
        assert!(matches!(err, RepositoryError::DuplicateOrderNumber(_)));
        assert!(repo.find_by_id(clash.id).await.unwrap().is_none());

        let request = AdvanceStatus::new(order.id, OrderStatus::PickedUp, seller);
        let transition = order.plan_transition(&request, Utc::now()).unwrap();
        repo.apply_transition(&transition).await.unwrap();
        assert!(matches!(
            repo.apply_transition(&transition).await,
            Err(RepositoryError::VersionConflict { expected: 1, actual: 2 })
        ));

        let stored = repo
            .find_by_order_number(&order.order_number)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.status, OrderStatus::PickedUp);
        assert_eq!(stored.version, 2);
        assert_eq!(stored.items.len(), 2);
        assert!(stored.history_is_consistent());

        let sold = repo.list(OrderScope::Seller(seller)).await.unwrap();
        assert!(sold.iter().any(|o| o.id == order.id));
    }
}
