use std::collections::{HashMap, VecDeque};

use async_trait::async_trait;
use chrono::Utc;
use sqlx::{
    PgPool, Postgres, Row, Transaction,
    postgres::{PgPoolOptions, PgRow},
};
use uuid::Uuid;

use crate::{
    ActorId, Batch, BatchId, BatchLedger, LedgerEntry, LedgerStoreError, Money, Movement,
    MovementId, MovementKind, MovementQuery, NewBatch, NewProduct, Order, OrderCommit, OrderId,
    OrderLine, OrderStatus, Product, ProductId, Result, Version,
    store::{LedgerStore, MovementStream, dedup_expected_versions},
};

const MOVEMENT_COLUMNS: &str = "m.sequence, m.id, m.batch_id, m.kind, m.quantity_changed, \
     m.order_id, m.created_at, m.recorded_by, o.status AS order_status";

const ORDER_COLUMNS: &str = "id, status, lines, cod_amount_cents, version, created_by, \
     updated_by, created_at, updated_at";

const BATCH_COLUMNS: &str = "id, product_id, lot_number, unit_cost_cents, received_at, version";

/// Number of movements fetched per round trip when streaming the log.
const STREAM_PAGE_SIZE: i64 = 500;

/// PostgreSQL-backed ledger store.
///
/// Allocation commits lock the touched batch rows (`FOR UPDATE`) and compare
/// their versions inside the transaction, so two service replicas committing
/// against the same batch serialize on the row lock and the loser observes a
/// bumped version.
#[derive(Clone)]
pub struct PostgresLedgerStore {
    pool: PgPool,
}

impl PostgresLedgerStore {
    /// Creates a new PostgreSQL ledger store.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Opens a connection pool to `database_url`.
    pub async fn connect(database_url: &str, max_connections: u32) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await?;
        tracing::info!(max_connections, "connected to PostgreSQL");
        Ok(Self::new(pool))
    }

    /// Gets a reference to the underlying connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Runs the database migrations.
    pub async fn run_migrations(&self) -> Result<()> {
        sqlx::migrate!("../../migrations").run(&self.pool).await?;
        Ok(())
    }

    /// Starts a read-only transaction that sees one snapshot for all its
    /// statements.
    async fn begin_snapshot(&self) -> Result<Transaction<'static, Postgres>> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("SET TRANSACTION ISOLATION LEVEL REPEATABLE READ, READ ONLY")
            .execute(&mut *tx)
            .await?;
        Ok(tx)
    }

    fn row_to_product(row: PgRow) -> Result<Product> {
        Ok(Product {
            id: ProductId::from_uuid(row.try_get::<Uuid, _>("id")?),
            sku: row.try_get("sku")?,
            name: row.try_get("name")?,
            min_stock_alert: row.try_get("min_stock_alert")?,
            created_at: row.try_get("created_at")?,
        })
    }

    fn row_to_batch(row: PgRow) -> Result<Batch> {
        Ok(Batch {
            id: BatchId::from_uuid(row.try_get::<Uuid, _>("id")?),
            product_id: ProductId::from_uuid(row.try_get::<Uuid, _>("product_id")?),
            lot_number: row.try_get("lot_number")?,
            unit_cost: Money::from_cents(row.try_get("unit_cost_cents")?),
            received_at: row.try_get("received_at")?,
            version: Version::new(row.try_get("version")?),
        })
    }

    fn row_to_entry(row: PgRow) -> Result<LedgerEntry> {
        let kind: String = row.try_get("kind")?;
        let order_status: Option<String> = row.try_get("order_status")?;

        let movement = Movement {
            id: MovementId::from_uuid(row.try_get::<Uuid, _>("id")?),
            sequence: row.try_get("sequence")?,
            batch_id: BatchId::from_uuid(row.try_get::<Uuid, _>("batch_id")?),
            kind: kind.parse()?,
            quantity_changed: row.try_get("quantity_changed")?,
            order_id: row
                .try_get::<Option<Uuid>, _>("order_id")?
                .map(OrderId::from_uuid),
            created_at: row.try_get("created_at")?,
            recorded_by: ActorId::new(row.try_get::<String, _>("recorded_by")?),
        };

        Ok(LedgerEntry {
            movement,
            order_status: order_status.as_deref().map(parse_status).transpose()?,
        })
    }

    fn row_to_order(row: PgRow) -> Result<Order> {
        let status: String = row.try_get("status")?;
        let lines: serde_json::Value = row.try_get("lines")?;
        let lines: Vec<OrderLine> = serde_json::from_value(lines)?;

        Ok(Order {
            id: OrderId::from_uuid(row.try_get::<Uuid, _>("id")?),
            status: parse_status(&status)?,
            lines,
            cod_amount: Money::from_cents(row.try_get("cod_amount_cents")?),
            version: Version::new(row.try_get("version")?),
            created_by: ActorId::new(row.try_get::<String, _>("created_by")?),
            updated_by: ActorId::new(row.try_get::<String, _>("updated_by")?),
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }

    async fn entries_for_batches(
        tx: &mut Transaction<'static, Postgres>,
        batch_ids: Vec<Uuid>,
    ) -> Result<Vec<LedgerEntry>> {
        let rows = sqlx::query(&format!(
            "SELECT {MOVEMENT_COLUMNS} FROM movements m \
             LEFT JOIN orders o ON o.id = m.order_id \
             WHERE m.batch_id = ANY($1) ORDER BY m.sequence ASC"
        ))
        .bind(batch_ids)
        .fetch_all(&mut **tx)
        .await?;

        rows.into_iter().map(Self::row_to_entry).collect()
    }
}

fn parse_status(status: &str) -> Result<OrderStatus> {
    status
        .parse()
        .map_err(|e: common::ParseStatusError| LedgerStoreError::InvalidRecord(e.to_string()))
}

async fn fetch_movement_page(pool: &PgPool, after_sequence: i64) -> Result<Vec<Movement>> {
    let rows = sqlx::query(&format!(
        "SELECT {MOVEMENT_COLUMNS} FROM movements m \
         LEFT JOIN orders o ON o.id = m.order_id \
         WHERE m.sequence > $1 ORDER BY m.sequence ASC LIMIT $2"
    ))
    .bind(after_sequence)
    .bind(STREAM_PAGE_SIZE)
    .fetch_all(pool)
    .await?;

    rows.into_iter()
        .map(|row| PostgresLedgerStore::row_to_entry(row).map(|entry| entry.movement))
        .collect()
}

#[async_trait]
impl LedgerStore for PostgresLedgerStore {
    async fn insert_product(&self, product: NewProduct) -> Result<Product> {
        product.validate()?;

        let row = sqlx::query(
            r#"
            INSERT INTO products (id, sku, name, min_stock_alert, created_at)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING id, sku, name, min_stock_alert, created_at
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(&product.sku)
        .bind(&product.name)
        .bind(product.min_stock_alert)
        .bind(Utc::now())
        .fetch_one(&self.pool)
        .await
        .map_err(|e| {
            if let sqlx::Error::Database(ref db_err) = e
                && db_err.constraint() == Some("unique_product_sku")
            {
                return LedgerStoreError::DuplicateSku(product.sku.clone());
            }
            LedgerStoreError::from(e)
        })?;

        Self::row_to_product(row)
    }

    async fn get_product(&self, product_id: ProductId) -> Result<Option<Product>> {
        let row = sqlx::query(
            "SELECT id, sku, name, min_stock_alert, created_at FROM products WHERE id = $1",
        )
        .bind(product_id.as_uuid())
        .fetch_optional(&self.pool)
        .await?;

        row.map(Self::row_to_product).transpose()
    }

    async fn get_product_by_sku(&self, sku: &str) -> Result<Option<Product>> {
        let row = sqlx::query(
            "SELECT id, sku, name, min_stock_alert, created_at FROM products WHERE sku = $1",
        )
        .bind(sku)
        .fetch_optional(&self.pool)
        .await?;

        row.map(Self::row_to_product).transpose()
    }

    async fn list_products(&self) -> Result<Vec<Product>> {
        let rows = sqlx::query(
            "SELECT id, sku, name, min_stock_alert, created_at FROM products ORDER BY sku ASC",
        )
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Self::row_to_product).collect()
    }

    async fn receive_batch(&self, batch: NewBatch) -> Result<(Batch, Movement)> {
        batch.validate()?;

        let mut tx = self.pool.begin().await?;

        let exists: Option<Uuid> = sqlx::query_scalar("SELECT id FROM products WHERE id = $1")
            .bind(batch.product_id.as_uuid())
            .fetch_optional(&mut *tx)
            .await?;
        if exists.is_none() {
            return Err(LedgerStoreError::not_found("product", batch.product_id));
        }

        let row = sqlx::query(&format!(
            "INSERT INTO batches (id, product_id, lot_number, unit_cost_cents, received_at, version) \
             VALUES ($1, $2, $3, $4, $5, 0) RETURNING {BATCH_COLUMNS}"
        ))
        .bind(Uuid::new_v4())
        .bind(batch.product_id.as_uuid())
        .bind(&batch.lot_number)
        .bind(batch.unit_cost.cents())
        .bind(batch.received_at)
        .fetch_one(&mut *tx)
        .await?;
        let record = Self::row_to_batch(row)?;

        let movement_id = MovementId::new();
        let created_at = Utc::now();
        let sequence: i64 = sqlx::query_scalar(
            r#"
            INSERT INTO movements (id, batch_id, kind, quantity_changed, order_id, created_at, recorded_by)
            VALUES ($1, $2, 'in', $3, NULL, $4, $5)
            RETURNING sequence
            "#,
        )
        .bind(movement_id.as_uuid())
        .bind(record.id.as_uuid())
        .bind(batch.quantity)
        .bind(created_at)
        .bind(batch.received_by.as_str())
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;

        let movement = Movement {
            id: movement_id,
            sequence,
            batch_id: record.id,
            kind: MovementKind::In,
            quantity_changed: batch.quantity,
            order_id: None,
            created_at,
            recorded_by: batch.received_by,
        };
        Ok((record, movement))
    }

    async fn get_batch(&self, batch_id: BatchId) -> Result<Option<Batch>> {
        let row = sqlx::query(&format!("SELECT {BATCH_COLUMNS} FROM batches WHERE id = $1"))
            .bind(batch_id.as_uuid())
            .fetch_optional(&self.pool)
            .await?;

        row.map(Self::row_to_batch).transpose()
    }

    async fn batches_for_product(&self, product_id: ProductId) -> Result<Vec<Batch>> {
        let rows = sqlx::query(&format!(
            "SELECT {BATCH_COLUMNS} FROM batches WHERE product_id = $1 \
             ORDER BY received_at ASC, id ASC"
        ))
        .bind(product_id.as_uuid())
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Self::row_to_batch).collect()
    }

    async fn update_batch_cost(
        &self,
        batch_id: BatchId,
        unit_cost: Money,
    ) -> Result<(Batch, Money)> {
        if unit_cost.is_negative() {
            return Err(LedgerStoreError::InvalidRecord(
                "unit cost must not be negative".into(),
            ));
        }

        // The locked subselect still sees the pre-update cost.
        let row = sqlx::query(
            r#"
            UPDATE batches b SET unit_cost_cents = $1
            FROM (SELECT id, unit_cost_cents FROM batches WHERE id = $2 FOR UPDATE) old
            WHERE b.id = old.id
            RETURNING b.id, b.product_id, b.lot_number, b.unit_cost_cents, b.received_at,
                      b.version, old.unit_cost_cents AS previous_cost_cents
            "#,
        )
        .bind(unit_cost.cents())
        .bind(batch_id.as_uuid())
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| LedgerStoreError::not_found("batch", batch_id))?;

        let previous = Money::from_cents(row.try_get("previous_cost_cents")?);
        Ok((Self::row_to_batch(row)?, previous))
    }

    async fn batch_ledger(&self, batch_id: BatchId) -> Result<BatchLedger> {
        let mut tx = self.begin_snapshot().await?;

        let row = sqlx::query(&format!("SELECT {BATCH_COLUMNS} FROM batches WHERE id = $1"))
            .bind(batch_id.as_uuid())
            .fetch_optional(&mut *tx)
            .await?
            .ok_or_else(|| LedgerStoreError::not_found("batch", batch_id))?;
        let batch = Self::row_to_batch(row)?;

        let entries = Self::entries_for_batches(&mut tx, vec![batch.id.as_uuid()]).await?;
        tx.commit().await?;

        Ok(BatchLedger { batch, entries })
    }

    async fn product_ledger(&self, product_id: ProductId) -> Result<Vec<BatchLedger>> {
        let mut tx = self.begin_snapshot().await?;

        let exists: Option<Uuid> = sqlx::query_scalar("SELECT id FROM products WHERE id = $1")
            .bind(product_id.as_uuid())
            .fetch_optional(&mut *tx)
            .await?;
        if exists.is_none() {
            return Err(LedgerStoreError::not_found("product", product_id));
        }

        let rows = sqlx::query(&format!(
            "SELECT {BATCH_COLUMNS} FROM batches WHERE product_id = $1 \
             ORDER BY received_at ASC, id ASC"
        ))
        .bind(product_id.as_uuid())
        .fetch_all(&mut *tx)
        .await?;
        let batches = rows
            .into_iter()
            .map(Self::row_to_batch)
            .collect::<Result<Vec<_>>>()?;

        let batch_ids = batches.iter().map(|b| b.id.as_uuid()).collect();
        let entries = Self::entries_for_batches(&mut tx, batch_ids).await?;
        tx.commit().await?;

        let mut by_batch: HashMap<BatchId, Vec<LedgerEntry>> = HashMap::new();
        for entry in entries {
            by_batch
                .entry(entry.movement.batch_id)
                .or_default()
                .push(entry);
        }

        Ok(batches
            .into_iter()
            .map(|batch| BatchLedger {
                entries: by_batch.remove(&batch.id).unwrap_or_default(),
                batch,
            })
            .collect())
    }

    async fn query_movements(&self, query: MovementQuery) -> Result<Vec<Movement>> {
        let mut sql = format!(
            "SELECT {MOVEMENT_COLUMNS} FROM movements m \
             LEFT JOIN orders o ON o.id = m.order_id \
             JOIN batches b ON b.id = m.batch_id WHERE 1=1"
        );
        let mut param_count = 0;

        // Build dynamic query
        if query.batch_id.is_some() {
            param_count += 1;
            sql.push_str(&format!(" AND m.batch_id = ${param_count}"));
        }
        if query.product_id.is_some() {
            param_count += 1;
            sql.push_str(&format!(" AND b.product_id = ${param_count}"));
        }
        if query.order_id.is_some() {
            param_count += 1;
            sql.push_str(&format!(" AND m.order_id = ${param_count}"));
        }
        if query.kind.is_some() {
            param_count += 1;
            sql.push_str(&format!(" AND m.kind = ${param_count}"));
        }
        if query.from_timestamp.is_some() {
            param_count += 1;
            sql.push_str(&format!(" AND m.created_at >= ${param_count}"));
        }
        if query.to_timestamp.is_some() {
            param_count += 1;
            sql.push_str(&format!(" AND m.created_at <= ${param_count}"));
        }

        sql.push_str(" ORDER BY m.sequence ASC");

        if query.limit.is_some() {
            param_count += 1;
            sql.push_str(&format!(" LIMIT ${param_count}"));
        }
        if query.offset.is_some() {
            param_count += 1;
            sql.push_str(&format!(" OFFSET ${param_count}"));
        }

        let mut sqlx_query = sqlx::query(&sql);

        if let Some(id) = query.batch_id {
            sqlx_query = sqlx_query.bind(id.as_uuid());
        }
        if let Some(id) = query.product_id {
            sqlx_query = sqlx_query.bind(id.as_uuid());
        }
        if let Some(id) = query.order_id {
            sqlx_query = sqlx_query.bind(id.as_uuid());
        }
        if let Some(kind) = query.kind {
            sqlx_query = sqlx_query.bind(kind.as_str());
        }
        if let Some(from) = query.from_timestamp {
            sqlx_query = sqlx_query.bind(from);
        }
        if let Some(to) = query.to_timestamp {
            sqlx_query = sqlx_query.bind(to);
        }
        if let Some(limit) = query.limit {
            sqlx_query = sqlx_query.bind(limit as i64);
        }
        if let Some(offset) = query.offset {
            sqlx_query = sqlx_query.bind(offset as i64);
        }

        let rows = sqlx_query.fetch_all(&self.pool).await?;
        rows.into_iter()
            .map(|row| Self::row_to_entry(row).map(|entry| entry.movement))
            .collect()
    }

    async fn stream_movements(&self) -> Result<MovementStream> {
        use futures_util::stream;

        // Keyset pagination over the sequence column keeps the stream
        // independent of the borrow on `self`.
        let initial: (PgPool, i64, VecDeque<Movement>, bool) =
            (self.pool.clone(), 0, VecDeque::new(), false);

        let stream = stream::unfold(
            initial,
            |(pool, after, mut buffer, mut exhausted)| async move {
                if buffer.is_empty() && !exhausted {
                    match fetch_movement_page(&pool, after).await {
                        Ok(page) => {
                            exhausted = (page.len() as i64) < STREAM_PAGE_SIZE;
                            buffer.extend(page);
                        }
                        Err(e) => return Some((Err(e), (pool, after, buffer, true))),
                    }
                }
                let movement = buffer.pop_front()?;
                let next_after = movement.sequence;
                Some((Ok(movement), (pool, next_after, buffer, exhausted)))
            },
        );

        Ok(Box::pin(stream))
    }

    async fn get_order(&self, order_id: OrderId) -> Result<Option<Order>> {
        let row = sqlx::query(&format!("SELECT {ORDER_COLUMNS} FROM orders WHERE id = $1"))
            .bind(order_id.as_uuid())
            .fetch_optional(&self.pool)
            .await?;

        row.map(Self::row_to_order).transpose()
    }

    async fn list_orders(&self, status: Option<OrderStatus>) -> Result<Vec<Order>> {
        let rows = match status {
            Some(status) => {
                sqlx::query(&format!(
                    "SELECT {ORDER_COLUMNS} FROM orders WHERE status = $1 \
                     ORDER BY created_at ASC, id ASC"
                ))
                .bind(status.as_str())
                .fetch_all(&self.pool)
                .await?
            }
            None => {
                sqlx::query(&format!(
                    "SELECT {ORDER_COLUMNS} FROM orders ORDER BY created_at ASC, id ASC"
                ))
                .fetch_all(&self.pool)
                .await?
            }
        };

        rows.into_iter().map(Self::row_to_order).collect()
    }

    async fn commit_order(&self, commit: OrderCommit) -> Result<Order> {
        commit.validate()?;
        let expected = dedup_expected_versions(&commit.expected_versions)?;

        // Dropping the transaction on any early return rolls it back.
        let mut tx = self.pool.begin().await?;

        for (batch_id, version) in &expected {
            let actual: Option<i64> =
                sqlx::query_scalar("SELECT version FROM batches WHERE id = $1 FOR UPDATE")
                    .bind(batch_id.as_uuid())
                    .fetch_optional(&mut *tx)
                    .await?;
            let actual = actual
                .map(Version::new)
                .ok_or_else(|| LedgerStoreError::not_found("batch", batch_id))?;

            if actual != *version {
                return Err(LedgerStoreError::ConcurrencyConflict {
                    entity: "batch",
                    id: batch_id.to_string(),
                    expected: *version,
                    actual,
                });
            }
        }

        let lines = serde_json::to_value(&commit.lines)?;
        let row = sqlx::query(&format!(
            "INSERT INTO orders (id, status, lines, cod_amount_cents, version, created_by, \
             updated_by, created_at, updated_at) \
             VALUES ($1, $2, $3, $4, 1, $5, $5, $6, $6) RETURNING {ORDER_COLUMNS}"
        ))
        .bind(commit.order_id.as_uuid())
        .bind(OrderStatus::Processing.as_str())
        .bind(lines)
        .bind(commit.cod_amount.cents())
        .bind(commit.created_by.as_str())
        .bind(commit.created_at)
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| {
            if let sqlx::Error::Database(ref db_err) = e
                && db_err.is_unique_violation()
            {
                return LedgerStoreError::InvalidRecord(format!(
                    "order {} already exists",
                    commit.order_id
                ));
            }
            LedgerStoreError::from(e)
        })?;
        let order = Self::row_to_order(row)?;

        for deduction in &commit.deductions {
            sqlx::query(
                r#"
                INSERT INTO movements (id, batch_id, kind, quantity_changed, order_id, created_at, recorded_by)
                VALUES ($1, $2, 'sale', $3, $4, $5, $6)
                "#,
            )
            .bind(Uuid::new_v4())
            .bind(deduction.batch_id.as_uuid())
            .bind(-deduction.quantity)
            .bind(order.id.as_uuid())
            .bind(commit.created_at)
            .bind(commit.created_by.as_str())
            .execute(&mut *tx)
            .await?;
        }

        let touched: Vec<Uuid> = expected.iter().map(|(id, _)| id.as_uuid()).collect();
        sqlx::query("UPDATE batches SET version = version + 1 WHERE id = ANY($1)")
            .bind(touched)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(order)
    }

    async fn update_order_status(
        &self,
        order_id: OrderId,
        expected: Version,
        status: OrderStatus,
        actor: &ActorId,
    ) -> Result<Order> {
        let row = sqlx::query(&format!(
            "UPDATE orders SET status = $1, version = version + 1, updated_by = $2, \
             updated_at = $3 WHERE id = $4 AND version = $5 RETURNING {ORDER_COLUMNS}"
        ))
        .bind(status.as_str())
        .bind(actor.as_str())
        .bind(Utc::now())
        .bind(order_id.as_uuid())
        .bind(expected.as_i64())
        .fetch_optional(&self.pool)
        .await?;

        if let Some(row) = row {
            return Self::row_to_order(row);
        }

        // Nothing updated: either the order is missing or someone else won.
        let actual: Option<i64> = sqlx::query_scalar("SELECT version FROM orders WHERE id = $1")
            .bind(order_id.as_uuid())
            .fetch_optional(&self.pool)
            .await?;

        match actual {
            None => Err(LedgerStoreError::not_found("order", order_id)),
            Some(actual) => Err(LedgerStoreError::ConcurrencyConflict {
                entity: "order",
                id: order_id.to_string(),
                expected,
                actual: Version::new(actual),
            }),
        }
    }
}
