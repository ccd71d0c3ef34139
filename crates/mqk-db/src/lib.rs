//! Persistence boundary for the trading coordination core.
//!
//! A narrow async repository over Postgres: insert/update Order, insert/update
//! Position, insert-if-absent Signal, CAS operations on WorkerLease rows, and
//! an append-only event log. The concrete schema is not a design concern of
//! the core itself — callers depend on the functions in this module, not on
//! table layout — but a `migrations/` directory is included so the crate is
//! runnable standalone.
//!
//! Every write that must survive a crash-and-retry uses the same idiom:
//! `INSERT ... ON CONFLICT (key) DO NOTHING RETURNING id` for idempotent
//! dedup inserts, and `UPDATE ... FOR UPDATE SKIP LOCKED` CTEs for atomic
//! exclusive claiming (the WorkerLease CAS).

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::Row;
use sqlx::{postgres::PgPoolOptions, PgPool};
use uuid::Uuid;

use mqk_schemas::{Order, OrderStatus, Position, Side, SignalFingerprint};

pub const ENV_DB_URL: &str = "MQK_DATABASE_URL";

/// Connect to Postgres using `MQK_DATABASE_URL`.
pub async fn connect_from_env() -> Result<PgPool> {
    let url = std::env::var(ENV_DB_URL).with_context(|| format!("missing env var {ENV_DB_URL}"))?;

    let pool = PgPoolOptions::new()
        .max_connections(10)
        .connect(&url)
        .await
        .context("failed to connect to Postgres")?;

    Ok(pool)
}

/// Test helper: connect using `MQK_DATABASE_URL` and ensure migrations are applied.
pub async fn testkit_db_pool() -> Result<PgPool> {
    let pool = connect_from_env().await?;
    migrate(&pool).await?;
    Ok(pool)
}

/// Run embedded SQLx migrations.
pub async fn migrate(pool: &PgPool) -> Result<()> {
    sqlx::migrate!("./migrations")
        .run(pool)
        .await
        .context("db migrate failed")?;
    Ok(())
}

/// Simple status query (connectivity + schema presence), surfaced on the
/// health operational endpoint.
pub async fn status(pool: &PgPool) -> Result<DbStatus> {
    let (one,): (i32,) = sqlx::query_as::<_, (i32,)>("select 1")
        .fetch_one(pool)
        .await
        .context("status connectivity query failed")?;
    let ok = one == 1;

    let (exists,): (bool,) = sqlx::query_as::<_, (bool,)>(
        r#"
        select exists (
            select 1
            from information_schema.tables
            where table_schema='public' and table_name='orders'
        )
        "#,
    )
    .fetch_one(pool)
    .await
    .context("status table-exists query failed")?;

    Ok(DbStatus {
        ok,
        schema_present: exists,
    })
}

#[derive(Debug, Clone)]
pub struct DbStatus {
    pub ok: bool,
    pub schema_present: bool,
}

// ---------------------------------------------------------------------------
// Signals — insert-if-absent by fingerprint
// ---------------------------------------------------------------------------

/// Persist a signal row keyed by its fingerprint, if not already present.
///
/// Idempotent: if `fingerprint` already exists, returns `Ok(false)` and does
/// not create a second row. This is the durable backstop behind
/// `SignalDeduplicator`'s in-memory window — a process restart still cannot
/// double-admit a signal whose fingerprint was already persisted.
pub async fn signal_insert_if_absent(
    pool: &PgPool,
    fingerprint: SignalFingerprint,
    signal_json: Value,
) -> Result<bool> {
    let row: Option<(i64,)> = sqlx::query_as(
        r#"
        insert into signals (fingerprint, signal_json)
        values ($1, $2)
        on conflict (fingerprint) do nothing
        returning signal_id
        "#,
    )
    .bind(fingerprint.0 as i64)
    .bind(signal_json)
    .fetch_optional(pool)
    .await
    .context("signal_insert_if_absent failed")?;

    Ok(row.is_some())
}

// ---------------------------------------------------------------------------
// Orders
// ---------------------------------------------------------------------------

fn order_status_str(s: OrderStatus) -> &'static str {
    match s {
        OrderStatus::Pending => "PENDING",
        OrderStatus::Open => "OPEN",
        OrderStatus::PartiallyFilled => "PARTIALLY_FILLED",
        OrderStatus::Filled => "FILLED",
        OrderStatus::Cancelled => "CANCELLED",
        OrderStatus::Rejected => "REJECTED",
    }
}

fn parse_order_status(s: &str) -> Result<OrderStatus> {
    Ok(match s {
        "PENDING" => OrderStatus::Pending,
        "OPEN" => OrderStatus::Open,
        "PARTIALLY_FILLED" => OrderStatus::PartiallyFilled,
        "FILLED" => OrderStatus::Filled,
        "CANCELLED" => OrderStatus::Cancelled,
        "REJECTED" => OrderStatus::Rejected,
        other => anyhow::bail!("unknown order status in db row: {other}"),
    })
}

fn side_str(s: Side) -> &'static str {
    match s {
        Side::Long => "LONG",
        Side::Short => "SHORT",
    }
}

fn parse_side(s: &str) -> Result<Side> {
    Ok(match s {
        "LONG" => Side::Long,
        "SHORT" => Side::Short,
        other => anyhow::bail!("unknown side in db row: {other}"),
    })
}

/// Insert a new order row. Idempotent on `idempotency_key`: a retried submit
/// with the same key updates nothing and returns the existing id.
pub async fn order_insert(pool: &PgPool, order: &Order) -> Result<()> {
    sqlx::query(
        r#"
        insert into orders (
            order_id, exchange, symbol, side, order_type, requested_qty_micros,
            filled_qty_micros, avg_fill_price_micros, status, position_id,
            reservation_id, created_at, updated_at, exchange_order_id, idempotency_key
        )
        values ($1,$2,$3,$4,$5,$6,$7,$8,$9,$10,$11,$12,$13,$14,$15)
        on conflict (idempotency_key) do nothing
        "#,
    )
    .bind(order.id)
    .bind(&order.exchange.0)
    .bind(&order.symbol)
    .bind(side_str(order.side))
    .bind(format!("{:?}", order.order_type).to_uppercase())
    .bind(order.requested_qty_micros)
    .bind(order.filled_qty_micros)
    .bind(order.avg_fill_price_micros)
    .bind(order_status_str(order.status))
    .bind(order.position_id)
    .bind(order.reservation_id)
    .bind(order.created_at)
    .bind(order.updated_at)
    .bind(&order.exchange_order_id)
    .bind(&order.idempotency_key)
    .execute(pool)
    .await
    .context("order_insert failed")?;
    Ok(())
}

/// Update mutable order fields (fills, status, exchange id) by internal id.
pub async fn order_update_status(
    pool: &PgPool,
    order_id: Uuid,
    filled_qty_micros: i64,
    avg_fill_price_micros: Option<i64>,
    status: OrderStatus,
    exchange_order_id: Option<&str>,
) -> Result<()> {
    sqlx::query(
        r#"
        update orders
           set filled_qty_micros     = $2,
               avg_fill_price_micros = $3,
               status                = $4,
               exchange_order_id     = coalesce($5, exchange_order_id),
               updated_at            = now()
         where order_id = $1
        "#,
    )
    .bind(order_id)
    .bind(filled_qty_micros)
    .bind(avg_fill_price_micros)
    .bind(order_status_str(status))
    .bind(exchange_order_id)
    .execute(pool)
    .await
    .context("order_update_status failed")?;
    Ok(())
}

pub async fn order_fetch(pool: &PgPool, order_id: Uuid) -> Result<Option<Order>> {
    let row = sqlx::query(
        r#"
        select order_id, exchange, symbol, side, order_type, requested_qty_micros,
               filled_qty_micros, avg_fill_price_micros, status, position_id,
               reservation_id, created_at, updated_at, exchange_order_id, idempotency_key
        from orders
        where order_id = $1
        "#,
    )
    .bind(order_id)
    .fetch_optional(pool)
    .await
    .context("order_fetch failed")?;

    let Some(row) = row else { return Ok(None) };
    Ok(Some(order_from_row(&row)?))
}

fn order_from_row(row: &sqlx::postgres::PgRow) -> Result<Order> {
    let order_type_str: String = row.try_get("order_type")?;
    let order_type = match order_type_str.as_str() {
        "MARKET" => mqk_schemas::OrderType::Market,
        "LIMIT" => mqk_schemas::OrderType::Limit,
        "STOP" => mqk_schemas::OrderType::Stop,
        "STOP_MARKET" => mqk_schemas::OrderType::StopMarket,
        "TAKE_PROFIT_MARKET" => mqk_schemas::OrderType::TakeProfitMarket,
        other => anyhow::bail!("unknown order_type in db row: {other}"),
    };
    let status_str: String = row.try_get("status")?;
    let side_s: String = row.try_get("side")?;
    Ok(Order {
        id: row.try_get("order_id")?,
        exchange: mqk_schemas::ExchangeId(row.try_get("exchange")?),
        symbol: row.try_get("symbol")?,
        side: parse_side(&side_s)?,
        order_type,
        requested_qty_micros: row.try_get("requested_qty_micros")?,
        filled_qty_micros: row.try_get("filled_qty_micros")?,
        avg_fill_price_micros: row.try_get("avg_fill_price_micros")?,
        status: parse_order_status(&status_str)?,
        position_id: row.try_get("position_id")?,
        reservation_id: row.try_get("reservation_id")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
        exchange_order_id: row.try_get("exchange_order_id")?,
        idempotency_key: row.try_get("idempotency_key")?,
    })
}

// ---------------------------------------------------------------------------
// Positions
// ---------------------------------------------------------------------------

pub async fn position_upsert(pool: &PgPool, position: &Position) -> Result<()> {
    sqlx::query(
        r#"
        insert into positions (
            position_id, exchange, symbol, side, entry_price_micros,
            current_qty_micros, initial_qty_micros, leverage, active_sl_micros,
            active_tp_micros, highest_favourable_pct_micros, partial_tp_bitmask,
            breakeven_armed, trailing_armed, protection_update_count,
            created_at, updated_at
        )
        values ($1,$2,$3,$4,$5,$6,$7,$8,$9,$10,$11,$12,$13,$14,$15,$16,$17)
        on conflict (position_id) do update
            set current_qty_micros           = excluded.current_qty_micros,
                active_sl_micros              = excluded.active_sl_micros,
                active_tp_micros              = excluded.active_tp_micros,
                highest_favourable_pct_micros = excluded.highest_favourable_pct_micros,
                partial_tp_bitmask            = excluded.partial_tp_bitmask,
                breakeven_armed               = excluded.breakeven_armed,
                trailing_armed                = excluded.trailing_armed,
                protection_update_count       = excluded.protection_update_count,
                updated_at                    = excluded.updated_at
        "#,
    )
    .bind(position.id)
    .bind(&position.exchange.0)
    .bind(&position.symbol)
    .bind(side_str(position.side))
    .bind(position.entry_price_micros)
    .bind(position.current_qty_micros)
    .bind(position.initial_qty_micros)
    .bind(position.leverage as i64)
    .bind(position.active_sl_micros)
    .bind(position.active_tp_micros)
    .bind(position.highest_favourable_pct_micros)
    .bind(position.partial_tp_bitmask as i64)
    .bind(position.breakeven_armed)
    .bind(position.trailing_armed)
    .bind(position.protection_update_count as i64)
    .bind(position.created_at)
    .bind(position.updated_at)
    .execute(pool)
    .await
    .context("position_upsert failed")?;
    Ok(())
}

pub async fn positions_fetch_open(pool: &PgPool) -> Result<Vec<Position>> {
    let rows = sqlx::query(
        r#"
        select position_id, exchange, symbol, side, entry_price_micros,
               current_qty_micros, initial_qty_micros, leverage, active_sl_micros,
               active_tp_micros, highest_favourable_pct_micros, partial_tp_bitmask,
               breakeven_armed, trailing_armed, protection_update_count,
               created_at, updated_at
        from positions
        where current_qty_micros > 0
        order by created_at asc
        "#,
    )
    .fetch_all(pool)
    .await
    .context("positions_fetch_open failed")?;

    rows.iter().map(position_from_row).collect()
}

fn position_from_row(row: &sqlx::postgres::PgRow) -> Result<Position> {
    let side_s: String = row.try_get("side")?;
    let leverage: i64 = row.try_get("leverage")?;
    let bitmask: i64 = row.try_get("partial_tp_bitmask")?;
    let updates: i64 = row.try_get("protection_update_count")?;
    Ok(Position {
        id: row.try_get("position_id")?,
        exchange: mqk_schemas::ExchangeId(row.try_get("exchange")?),
        symbol: row.try_get("symbol")?,
        side: parse_side(&side_s)?,
        entry_price_micros: row.try_get("entry_price_micros")?,
        current_qty_micros: row.try_get("current_qty_micros")?,
        initial_qty_micros: row.try_get("initial_qty_micros")?,
        leverage: leverage as u32,
        active_sl_micros: row.try_get("active_sl_micros")?,
        active_tp_micros: row.try_get("active_tp_micros")?,
        highest_favourable_pct_micros: row.try_get("highest_favourable_pct_micros")?,
        partial_tp_bitmask: bitmask as u32,
        breakeven_armed: row.try_get("breakeven_armed")?,
        trailing_armed: row.try_get("trailing_armed")?,
        protection_update_count: updates as u32,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

// ---------------------------------------------------------------------------
// WorkerLease — CAS semantics
// ---------------------------------------------------------------------------

/// Attempt to claim a role's lease. Succeeds only if no row exists for
/// `role`, or the existing row's `last_heartbeat` is already past
/// `heartbeat_timeout_seconds` (i.e. the prior holder's lease expired).
///
/// This is the single atomic primitive behind WorkerCoordinator's
/// single-writer guarantee: two candidates racing this call can never both
/// succeed, because the `on conflict` arm only fires when the stale-lease
/// predicate holds, and Postgres serialises the row-level upsert.
pub async fn lease_try_register(
    pool: &PgPool,
    role: &str,
    holder_id: &str,
    heartbeat_timeout_seconds: i64,
    metadata_json: Value,
) -> Result<bool> {
    let row: Option<(String,)> = sqlx::query_as(
        r#"
        insert into worker_leases (role, holder_id, last_heartbeat, metadata_json)
        values ($1, $2, now(), $3)
        on conflict (role) do update
            set holder_id     = excluded.holder_id,
                last_heartbeat = excluded.last_heartbeat,
                metadata_json  = excluded.metadata_json
         where worker_leases.last_heartbeat < now() - make_interval(secs => $4)
        returning holder_id
        "#,
    )
    .bind(role)
    .bind(holder_id)
    .bind(metadata_json)
    .bind(heartbeat_timeout_seconds as f64)
    .fetch_optional(pool)
    .await
    .context("lease_try_register failed")?;

    Ok(row.map(|(h,)| h == holder_id).unwrap_or(false))
}

/// Refresh `last_heartbeat` for a held lease. Returns `false` (the caller
/// must treat this as `Expired`) if `holder_id` no longer matches the row —
/// someone else's lease has since taken over the role.
pub async fn lease_heartbeat(pool: &PgPool, role: &str, holder_id: &str) -> Result<bool> {
    let row: Option<(String,)> = sqlx::query_as(
        r#"
        update worker_leases
           set last_heartbeat = now()
         where role = $1 and holder_id = $2
        returning holder_id
        "#,
    )
    .bind(role)
    .bind(holder_id)
    .fetch_optional(pool)
    .await
    .context("lease_heartbeat failed")?;
    Ok(row.is_some())
}

/// Release a held lease. No-op (returns `false`) if `holder_id` does not
/// currently hold `role`.
pub async fn lease_release(pool: &PgPool, role: &str, holder_id: &str) -> Result<bool> {
    let row: Option<(String,)> = sqlx::query_as(
        r#"
        delete from worker_leases
         where role = $1 and holder_id = $2
        returning holder_id
        "#,
    )
    .bind(role)
    .bind(holder_id)
    .fetch_optional(pool)
    .await
    .context("lease_release failed")?;
    Ok(row.is_some())
}

/// Sweep and delete every lease whose `last_heartbeat` has exceeded
/// `heartbeat_timeout_seconds`. Returns the list of `(role, holder_id)`
/// pairs that were expired, so the caller can log/alert per role.
pub async fn lease_sweep_expired(
    pool: &PgPool,
    heartbeat_timeout_seconds: i64,
) -> Result<Vec<(String, String)>> {
    let rows = sqlx::query(
        r#"
        delete from worker_leases
         where last_heartbeat < now() - make_interval(secs => $1)
        returning role, holder_id
        "#,
    )
    .bind(heartbeat_timeout_seconds as f64)
    .fetch_all(pool)
    .await
    .context("lease_sweep_expired failed")?;

    rows.iter()
        .map(|r| Ok((r.try_get("role")?, r.try_get("holder_id")?)))
        .collect()
}

// ---------------------------------------------------------------------------
// Append-only event log
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct EventLogRow {
    pub event_id: i64,
    pub event_type: String,
    pub payload_json: Value,
    pub created_at: DateTime<Utc>,
}

/// Append one lifecycle event. Never updated or deleted after insert — the
/// log is the durable record behind the operational status endpoint's
/// "recent rejections" view and behind `mqk-audit`'s hash chain.
pub async fn event_log_append(
    pool: &PgPool,
    event_type: &str,
    payload_json: Value,
) -> Result<i64> {
    let (event_id,): (i64,) = sqlx::query_as(
        r#"
        insert into event_log (event_type, payload_json, created_at)
        values ($1, $2, now())
        returning event_id
        "#,
    )
    .bind(event_type)
    .bind(payload_json)
    .fetch_one(pool)
    .await
    .context("event_log_append failed")?;
    Ok(event_id)
}

pub async fn event_log_fetch_since(pool: &PgPool, since_event_id: i64) -> Result<Vec<EventLogRow>> {
    let rows = sqlx::query(
        r#"
        select event_id, event_type, payload_json, created_at
        from event_log
        where event_id > $1
        order by event_id asc
        "#,
    )
    .bind(since_event_id)
    .fetch_all(pool)
    .await
    .context("event_log_fetch_since failed")?;

    rows.iter()
        .map(|r| {
            Ok(EventLogRow {
                event_id: r.try_get("event_id")?,
                event_type: r.try_get("event_type")?,
                payload_json: r.try_get("payload_json")?,
                created_at: r.try_get("created_at")?,
            })
        })
        .collect()
}
