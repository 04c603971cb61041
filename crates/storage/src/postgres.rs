use async_trait::async_trait;
use common::{CityId, Money, OrderId, StoreId, UserId, ZoneId};
use sqlx::{PgPool, Row, postgres::PgRow};
use uuid::Uuid;

use crate::{Cart, CommerceStore, Order, OrderStatus, Result, StorageError, Version};

const ORDER_COLUMNS: &str = "id, user_id, store_id, items, total_cents, status, delivery_location, \
     couriers, city_id, zone_id, idempotency_key, created_at, updated_at, version";

// Deleting a cart leaves its last version in `cart_tombstones`. The row
// count of either statement is the number of carts deleted.
const DELETE_CART: &str = r#"
    WITH gone AS (DELETE FROM carts WHERE user_id = $1 RETURNING user_id, version)
    INSERT INTO cart_tombstones (user_id, version)
    SELECT user_id, version FROM gone
    ON CONFLICT (user_id) DO UPDATE SET version = EXCLUDED.version
"#;

const DELETE_CART_AT_VERSION: &str = r#"
    WITH gone AS (
        DELETE FROM carts WHERE user_id = $1 AND version = $2 RETURNING user_id, version
    )
    INSERT INTO cart_tombstones (user_id, version)
    SELECT user_id, version FROM gone
    ON CONFLICT (user_id) DO UPDATE SET version = EXCLUDED.version
"#;

/// PostgreSQL-backed store implementation.
#[derive(Clone)]
pub struct PostgresStore {
    pool: PgPool,
}

impl PostgresStore {
    /// Creates a new PostgreSQL store.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Gets a reference to the underlying connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Runs the workspace migrations, realtime tables included.
    pub async fn run_migrations(&self) -> Result<()> {
        sqlx::migrate!("../../migrations").run(&self.pool).await?;
        Ok(())
    }

    async fn stored_cart_version(&self, user_id: UserId) -> Result<Version> {
        let version: Option<i64> =
            sqlx::query_scalar("SELECT version FROM carts WHERE user_id = $1")
                .bind(user_id.as_uuid())
                .fetch_optional(&self.pool)
                .await?;
        Ok(Version::new(version.unwrap_or(0)))
    }

    async fn stored_order_version(&self, order_id: OrderId) -> Result<Version> {
        let version: Option<i64> = sqlx::query_scalar("SELECT version FROM orders WHERE id = $1")
            .bind(order_id.as_uuid())
            .fetch_optional(&self.pool)
            .await?;
        Ok(Version::new(version.unwrap_or(0)))
    }

    fn row_to_cart(row: PgRow) -> Result<Cart> {
        Ok(Cart {
            user_id: UserId::from_uuid(row.try_get::<Uuid, _>("user_id")?),
            store_id: StoreId::from_uuid(row.try_get::<Uuid, _>("store_id")?),
            items: serde_json::from_value(row.try_get("items")?)?,
            updated_at: row.try_get("updated_at")?,
            version: Version::new(row.try_get("version")?),
        })
    }

    fn row_to_order(row: PgRow) -> Result<Order> {
        let status: String = row.try_get("status")?;
        let status: OrderStatus = status.parse().map_err(StorageError::CorruptRow)?;

        Ok(Order {
            id: OrderId::from_uuid(row.try_get::<Uuid, _>("id")?),
            user_id: UserId::from_uuid(row.try_get::<Uuid, _>("user_id")?),
            store_id: StoreId::from_uuid(row.try_get::<Uuid, _>("store_id")?),
            items: serde_json::from_value(row.try_get("items")?)?,
            total: Money::from_cents(row.try_get("total_cents")?),
            status,
            delivery_location: serde_json::from_value(row.try_get("delivery_location")?)?,
            couriers: serde_json::from_value(row.try_get("couriers")?)?,
            city_id: row.try_get::<Option<i64>, _>("city_id")?.map(CityId::new),
            zone_id: row.try_get::<Option<i64>, _>("zone_id")?.map(ZoneId::new),
            idempotency_key: row.try_get("idempotency_key")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
            version: Version::new(row.try_get("version")?),
        })
    }

    /// Maps unique-constraint violations on the orders table.
    fn map_insert_error(order: &Order, e: sqlx::Error) -> StorageError {
        if let sqlx::Error::Database(ref db_err) = e {
            match db_err.constraint() {
                Some("orders_user_idempotency_key") => {
                    return StorageError::DuplicateIdempotencyKey {
                        user_id: order.user_id,
                        key: order.idempotency_key.clone().unwrap_or_default(),
                    };
                }
                Some("orders_pkey") => return StorageError::OrderExists(order.id),
                _ => {}
            }
        }
        StorageError::Database(e)
    }

    async fn insert_order_in<'e, E>(executor: E, order: &Order) -> Result<()>
    where
        E: sqlx::Executor<'e, Database = sqlx::Postgres>,
    {
        sqlx::query(
            r#"
            INSERT INTO orders (id, user_id, store_id, items, total_cents, status, delivery_location,
                                couriers, city_id, zone_id, idempotency_key, created_at, updated_at, version)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, 1)
            "#,
        )
        .bind(order.id.as_uuid())
        .bind(order.user_id.as_uuid())
        .bind(order.store_id.as_uuid())
        .bind(serde_json::to_value(&order.items)?)
        .bind(order.total.cents())
        .bind(order.status.as_str())
        .bind(serde_json::to_value(&order.delivery_location)?)
        .bind(serde_json::to_value(&order.couriers)?)
        .bind(order.city_id.map(|id| id.as_i64()))
        .bind(order.zone_id.map(|id| id.as_i64()))
        .bind(order.idempotency_key.as_deref())
        .bind(order.created_at)
        .bind(order.updated_at)
        .execute(executor)
        .await
        .map_err(|e| Self::map_insert_error(order, e))?;

        Ok(())
    }
}

#[async_trait]
impl CommerceStore for PostgresStore {
    async fn get_cart(&self, user_id: UserId) -> Result<Option<Cart>> {
        let row = sqlx::query(
            "SELECT user_id, store_id, items, updated_at, version FROM carts WHERE user_id = $1",
        )
        .bind(user_id.as_uuid())
        .fetch_optional(&self.pool)
        .await?;

        row.map(Self::row_to_cart).transpose()
    }

    async fn save_cart(&self, cart: &Cart, expected: Version) -> Result<Version> {
        let items = serde_json::to_value(&cart.items)?;

        let version: Option<i64> = if expected == Version::initial() {
            sqlx::query_scalar(
                r#"
                INSERT INTO carts (user_id, store_id, items, updated_at, version)
                VALUES ($1, $2, $3, $4,
                        COALESCE((SELECT version FROM cart_tombstones WHERE user_id = $1), 0) + 1)
                ON CONFLICT (user_id) DO NOTHING
                RETURNING version
                "#,
            )
            .bind(cart.user_id.as_uuid())
            .bind(cart.store_id.as_uuid())
            .bind(items)
            .bind(cart.updated_at)
            .fetch_optional(&self.pool)
            .await?
        } else {
            sqlx::query_scalar(
                r#"
                UPDATE carts
                SET store_id = $2, items = $3, updated_at = $4, version = version + 1
                WHERE user_id = $1 AND version = $5
                RETURNING version
                "#,
            )
            .bind(cart.user_id.as_uuid())
            .bind(cart.store_id.as_uuid())
            .bind(items)
            .bind(cart.updated_at)
            .bind(expected.as_i64())
            .fetch_optional(&self.pool)
            .await?
        };

        match version {
            Some(version) => Ok(Version::new(version)),
            None => Err(StorageError::CartConflict {
                user_id: cart.user_id,
                expected,
                actual: self.stored_cart_version(cart.user_id).await?,
            }),
        }
    }

    async fn delete_cart(&self, user_id: UserId) -> Result<bool> {
        let result = sqlx::query(DELETE_CART)
            .bind(user_id.as_uuid())
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn get_order(&self, order_id: OrderId) -> Result<Option<Order>> {
        let row = sqlx::query(&format!("SELECT {ORDER_COLUMNS} FROM orders WHERE id = $1"))
            .bind(order_id.as_uuid())
            .fetch_optional(&self.pool)
            .await?;

        row.map(Self::row_to_order).transpose()
    }

    async fn find_order_by_idempotency_key(
        &self,
        user_id: UserId,
        key: &str,
    ) -> Result<Option<Order>> {
        let row = sqlx::query(&format!(
            "SELECT {ORDER_COLUMNS} FROM orders WHERE user_id = $1 AND idempotency_key = $2"
        ))
        .bind(user_id.as_uuid())
        .bind(key)
        .fetch_optional(&self.pool)
        .await?;

        row.map(Self::row_to_order).transpose()
    }

    async fn orders_for_user(&self, user_id: UserId) -> Result<Vec<Order>> {
        let rows = sqlx::query(&format!(
            "SELECT {ORDER_COLUMNS} FROM orders WHERE user_id = $1 ORDER BY created_at DESC"
        ))
        .bind(user_id.as_uuid())
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Self::row_to_order).collect()
    }

    async fn insert_order(&self, order: &Order) -> Result<Version> {
        Self::insert_order_in(&self.pool, order).await?;
        Ok(Version::first())
    }

    async fn update_order(&self, order: &Order, expected: Version) -> Result<Version> {
        let result = sqlx::query(
            r#"
            UPDATE orders
            SET status = $2, couriers = $3, updated_at = $4, version = version + 1
            WHERE id = $1 AND version = $5
            "#,
        )
        .bind(order.id.as_uuid())
        .bind(order.status.as_str())
        .bind(serde_json::to_value(&order.couriers)?)
        .bind(order.updated_at)
        .bind(expected.as_i64())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StorageError::OrderConflict {
                order_id: order.id,
                expected,
                actual: self.stored_order_version(order.id).await?,
            });
        }

        Ok(expected.next())
    }

    async fn commit_conversion(&self, order: &Order, cart_version: Version) -> Result<Version> {
        // Start a transaction; dropping it without commit rolls back
        let mut tx = self.pool.begin().await?;

        let deleted = sqlx::query(DELETE_CART_AT_VERSION)
            .bind(order.user_id.as_uuid())
            .bind(cart_version.as_i64())
            .execute(&mut *tx)
            .await?;

        if deleted.rows_affected() == 0 {
            tx.rollback().await?;
            return Err(StorageError::CartConflict {
                user_id: order.user_id,
                expected: cart_version,
                actual: self.stored_cart_version(order.user_id).await?,
            });
        }

        Self::insert_order_in(&mut *tx, order).await?;

        tx.commit().await?;
        tracing::debug!(order_id = %order.id, user_id = %order.user_id, "conversion committed");
        Ok(Version::first())
    }
}
