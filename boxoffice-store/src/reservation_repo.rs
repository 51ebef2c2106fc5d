use async_trait::async_trait;
use boxoffice_core::models::{Bill, HoldInfo, LineItem, Reservation, Ticket};
use boxoffice_core::repository::{Listing, PageWindow, ReservationStore, TicketRecord, UnitOfWork};
use boxoffice_core::{CoreError, CoreResult};
use boxoffice_shared::Masked;
use chrono::{DateTime, Utc};
use sqlx::{PgConnection, PgPool, Postgres, Transaction};
use std::collections::HashMap;
use uuid::Uuid;

use crate::database::storage_error;

const RESERVATION_COLUMNS: &str = "id, event_id, event_key, workspace_key, user_id, customer_name, customer_phone, \
     total_price, discount, paid, hold_token, hold_ttl_minutes, created_at";

const LINE_ITEM_COLUMNS: &str = "id, reservation_id, object_key, name, category_id, category_name, price, \
     object_type, hold_token, hold_ttl_minutes, canceled, created_at";

const BILL_COLUMNS: &str = "id, reservation_id, payment_id, provider, status, amount, metadata, pending_action, \
     paid_at, created_at";

const TICKET_COLUMNS: &str = "t.id, t.number, t.line_item_id, t.seating_label, t.category_label, t.used, t.created_at";

// ============================================================================
// Rows
// ============================================================================

#[derive(sqlx::FromRow)]
struct ReservationRow {
    id: Uuid,
    event_id: Uuid,
    event_key: String,
    workspace_key: String,
    user_id: Option<Uuid>,
    customer_name: String,
    customer_phone: String,
    total_price: i64,
    discount: i64,
    paid: bool,
    hold_token: Option<String>,
    hold_ttl_minutes: Option<i32>,
    created_at: DateTime<Utc>,
}

#[derive(sqlx::FromRow)]
struct LineItemRow {
    id: Uuid,
    reservation_id: Uuid,
    object_key: String,
    name: String,
    category_id: Uuid,
    category_name: String,
    price: i64,
    object_type: String,
    hold_token: Option<String>,
    hold_ttl_minutes: Option<i32>,
    canceled: bool,
    created_at: DateTime<Utc>,
}

#[derive(sqlx::FromRow)]
struct BillRow {
    id: Uuid,
    reservation_id: Uuid,
    payment_id: String,
    provider: String,
    status: String,
    amount: i64,
    metadata: serde_json::Value,
    pending_action: Option<String>,
    paid_at: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
}

#[derive(sqlx::FromRow)]
struct TicketRow {
    id: Uuid,
    number: i64,
    line_item_id: Uuid,
    seating_label: String,
    category_label: String,
    used: bool,
    created_at: DateTime<Utc>,
}

#[derive(sqlx::FromRow)]
struct TicketRecordRow {
    #[sqlx(flatten)]
    ticket: TicketRow,
    reservation_id: Uuid,
}

fn hold_from(token: Option<String>, ttl: Option<i32>) -> Option<HoldInfo> {
    match (token, ttl) {
        (Some(token), Some(ttl)) => Some(HoldInfo::new(token, ttl)),
        _ => None,
    }
}

impl TryFrom<LineItemRow> for LineItem {
    type Error = CoreError;

    fn try_from(row: LineItemRow) -> Result<Self, Self::Error> {
        Ok(LineItem {
            id: row.id,
            reservation_id: row.reservation_id,
            object_key: row.object_key,
            name: row.name,
            category_id: row.category_id,
            category_name: row.category_name,
            price: row.price,
            object_type: row.object_type.parse().map_err(|_| {
                CoreError::Integrity(format!("line item {} has unknown type {}", row.id, row.object_type))
            })?,
            hold: hold_from(row.hold_token, row.hold_ttl_minutes),
            canceled: row.canceled,
            created_at: row.created_at,
        })
    }
}

impl ReservationRow {
    fn into_reservation(self, line_items: Vec<LineItem>) -> Reservation {
        Reservation {
            id: self.id,
            event_id: self.event_id,
            event_key: self.event_key,
            workspace_key: self.workspace_key,
            user_id: self.user_id,
            customer_name: Masked(self.customer_name),
            customer_phone: Masked(self.customer_phone),
            line_items,
            total_price: self.total_price,
            discount: self.discount,
            paid: self.paid,
            hold: hold_from(self.hold_token, self.hold_ttl_minutes),
            created_at: self.created_at,
        }
    }
}

impl TryFrom<BillRow> for Bill {
    type Error = CoreError;

    fn try_from(row: BillRow) -> Result<Self, Self::Error> {
        Ok(Bill {
            id: row.id,
            reservation_id: row.reservation_id,
            payment_id: row.payment_id,
            provider: row.provider.parse()?,
            status: row.status.parse()?,
            amount: row.amount,
            metadata: row.metadata,
            pending_action: row.pending_action.map(|a| a.parse()).transpose()?,
            paid_at: row.paid_at,
            created_at: row.created_at,
        })
    }
}

impl From<TicketRow> for Ticket {
    fn from(row: TicketRow) -> Self {
        Ticket {
            id: row.id,
            number: row.number,
            line_item_id: row.line_item_id,
            seating_label: row.seating_label,
            category_label: row.category_label,
            used: row.used,
            created_at: row.created_at,
        }
    }
}

// ============================================================================
// Queries shared by the pool and transaction paths
// ============================================================================

async fn load_line_items(conn: &mut PgConnection, reservation_ids: &[Uuid], lock: bool) -> CoreResult<HashMap<Uuid, Vec<LineItem>>> {
    let sql = format!(
        "SELECT {} FROM line_items WHERE reservation_id = ANY($1) ORDER BY created_at, name{}",
        LINE_ITEM_COLUMNS,
        if lock { " FOR UPDATE" } else { "" }
    );
    let rows = sqlx::query_as::<_, LineItemRow>(&sql)
        .bind(reservation_ids)
        .fetch_all(&mut *conn)
        .await
        .map_err(storage_error)?;

    let mut grouped: HashMap<Uuid, Vec<LineItem>> = HashMap::new();
    for row in rows {
        let item = LineItem::try_from(row)?;
        grouped.entry(item.reservation_id).or_default().push(item);
    }
    Ok(grouped)
}

async fn hydrate(conn: &mut PgConnection, rows: Vec<ReservationRow>, lock: bool) -> CoreResult<Vec<Reservation>> {
    if rows.is_empty() {
        return Ok(Vec::new());
    }
    let ids: Vec<Uuid> = rows.iter().map(|r| r.id).collect();
    let mut items = load_line_items(conn, &ids, lock).await?;
    Ok(rows
        .into_iter()
        .map(|row| {
            let line_items = items.remove(&row.id).unwrap_or_default();
            row.into_reservation(line_items)
        })
        .collect())
}

async fn load_reservation(conn: &mut PgConnection, id: Uuid, lock: bool) -> CoreResult<Option<Reservation>> {
    let sql = format!(
        "SELECT {} FROM reservations WHERE id = $1{}",
        RESERVATION_COLUMNS,
        if lock { " FOR UPDATE" } else { "" }
    );
    let row = sqlx::query_as::<_, ReservationRow>(&sql)
        .bind(id)
        .fetch_optional(&mut *conn)
        .await
        .map_err(storage_error)?;

    match row {
        Some(row) => Ok(hydrate(conn, vec![row], lock).await?.pop()),
        None => Ok(None),
    }
}

async fn load_bill(conn: &mut PgConnection, column: &str, value: BillKey<'_>, lock: bool) -> CoreResult<Option<Bill>> {
    let sql = format!(
        "SELECT {} FROM bills WHERE {} = $1{}",
        BILL_COLUMNS,
        column,
        if lock { " FOR UPDATE" } else { "" }
    );
    let query = sqlx::query_as::<_, BillRow>(&sql);
    let query = match value {
        BillKey::PaymentId(id) => query.bind(id.to_string()),
        BillKey::Reservation(id) => query.bind(id),
    };
    let row = query.fetch_optional(&mut *conn).await.map_err(storage_error)?;
    row.map(Bill::try_from).transpose()
}

enum BillKey<'a> {
    PaymentId(&'a str),
    Reservation(Uuid),
}

async fn load_tickets(conn: &mut PgConnection, reservation_id: Uuid) -> CoreResult<Vec<Ticket>> {
    let sql = format!(
        "SELECT {} FROM tickets t JOIN line_items li ON li.id = t.line_item_id \
         WHERE li.reservation_id = $1 ORDER BY t.number",
        TICKET_COLUMNS
    );
    let rows = sqlx::query_as::<_, TicketRow>(&sql)
        .bind(reservation_id)
        .fetch_all(&mut *conn)
        .await
        .map_err(storage_error)?;
    Ok(rows.into_iter().map(Ticket::from).collect())
}

fn ticket_records(rows: Vec<TicketRecordRow>) -> Vec<TicketRecord> {
    rows.into_iter()
        .map(|row| TicketRecord {
            ticket: row.ticket.into(),
            reservation_id: row.reservation_id,
        })
        .collect()
}

fn window_args(window: PageWindow) -> (i64, i64) {
    (
        i64::try_from(window.offset).unwrap_or(i64::MAX),
        i64::try_from(window.limit).unwrap_or(i64::MAX),
    )
}

fn count_of(total: i64) -> u64 {
    u64::try_from(total).unwrap_or(0)
}

// ============================================================================
// Store
// ============================================================================

pub struct PgReservationStore {
    pool: PgPool,
}

impl PgReservationStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn find_pending(&self, predicate: &str, args: &[DateTime<Utc>]) -> CoreResult<Vec<Reservation>> {
        let mut conn = self.pool.acquire().await.map_err(storage_error)?;
        let sql = format!(
            "SELECT {} FROM reservations \
             WHERE paid = FALSE AND hold_token IS NOT NULL AND hold_ttl_minutes IS NOT NULL AND {} \
             ORDER BY created_at",
            RESERVATION_COLUMNS, predicate
        );
        let mut query = sqlx::query_as::<_, ReservationRow>(&sql);
        for arg in args {
            query = query.bind(*arg);
        }
        let rows = query.fetch_all(&mut *conn).await.map_err(storage_error)?;
        hydrate(&mut *conn, rows, false).await
    }
}

#[async_trait]
impl ReservationStore for PgReservationStore {
    async fn begin(&self) -> CoreResult<Box<dyn UnitOfWork>> {
        let tx = self.pool.begin().await.map_err(storage_error)?;
        Ok(Box::new(PgUnitOfWork { tx }))
    }

    async fn get_reservation(&self, id: Uuid) -> CoreResult<Option<Reservation>> {
        let mut conn = self.pool.acquire().await.map_err(storage_error)?;
        load_reservation(&mut *conn, id, false).await
    }

    async fn get_bill(&self, payment_id: &str) -> CoreResult<Option<Bill>> {
        let mut conn = self.pool.acquire().await.map_err(storage_error)?;
        load_bill(&mut *conn, "payment_id", BillKey::PaymentId(payment_id), false).await
    }

    async fn get_bill_for_reservation(&self, reservation_id: Uuid) -> CoreResult<Option<Bill>> {
        let mut conn = self.pool.acquire().await.map_err(storage_error)?;
        load_bill(&mut *conn, "reservation_id", BillKey::Reservation(reservation_id), false).await
    }

    async fn tickets_for_reservation(&self, reservation_id: Uuid) -> CoreResult<Vec<Ticket>> {
        let mut conn = self.pool.acquire().await.map_err(storage_error)?;
        load_tickets(&mut *conn, reservation_id).await
    }

    async fn find_expired_unpaid(&self, now: DateTime<Utc>) -> CoreResult<Vec<Reservation>> {
        self.find_pending("created_at + make_interval(mins => hold_ttl_minutes) < $1", &[now])
            .await
    }

    async fn find_expiring(&self, now: DateTime<Utc>, until: DateTime<Utc>) -> CoreResult<Vec<Reservation>> {
        self.find_pending(
            "created_at + make_interval(mins => hold_ttl_minutes) >= $1 \
             AND created_at + make_interval(mins => hold_ttl_minutes) < $2",
            &[now, until],
        )
        .await
    }

    async fn pending_manual_actions(&self) -> CoreResult<Vec<Bill>> {
        let sql = format!(
            "SELECT {} FROM bills WHERE pending_action IS NOT NULL ORDER BY created_at",
            BILL_COLUMNS
        );
        let rows = sqlx::query_as::<_, BillRow>(&sql)
            .fetch_all(&self.pool)
            .await
            .map_err(storage_error)?;
        rows.into_iter().map(Bill::try_from).collect()
    }

    async fn list_reservations(&self, owner: Option<Uuid>, window: PageWindow) -> CoreResult<Listing<Reservation>> {
        let mut conn = self.pool.acquire().await.map_err(storage_error)?;
        let (offset, limit) = window_args(window);

        let total: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM reservations WHERE $1::uuid IS NULL OR user_id = $1")
            .bind(owner)
            .fetch_one(&mut *conn)
            .await
            .map_err(storage_error)?;

        let sql = format!(
            "SELECT {} FROM reservations WHERE $1::uuid IS NULL OR user_id = $1 \
             ORDER BY created_at DESC, id DESC OFFSET $2 LIMIT $3",
            RESERVATION_COLUMNS
        );
        let rows = sqlx::query_as::<_, ReservationRow>(&sql)
            .bind(owner)
            .bind(offset)
            .bind(limit)
            .fetch_all(&mut *conn)
            .await
            .map_err(storage_error)?;
        let items = hydrate(&mut *conn, rows, false).await?;
        Ok(Listing {
            items,
            total: count_of(total),
        })
    }

    async fn get_ticket(&self, number: i64) -> CoreResult<Option<TicketRecord>> {
        let sql = format!(
            "SELECT {}, li.reservation_id FROM tickets t JOIN line_items li ON li.id = t.line_item_id \
             WHERE t.number = $1",
            TICKET_COLUMNS
        );
        let row = sqlx::query_as::<_, TicketRecordRow>(&sql)
            .bind(number)
            .fetch_optional(&self.pool)
            .await
            .map_err(storage_error)?;
        Ok(ticket_records(row.into_iter().collect()).pop())
    }

    async fn list_tickets(&self, owner: Option<Uuid>, window: PageWindow) -> CoreResult<Listing<TicketRecord>> {
        let (offset, limit) = window_args(window);
        let scope = "FROM tickets t JOIN line_items li ON li.id = t.line_item_id \
                     JOIN reservations r ON r.id = li.reservation_id \
                     WHERE $1::uuid IS NULL OR r.user_id = $1";

        let total: i64 = sqlx::query_scalar(&format!("SELECT COUNT(*) {}", scope))
            .bind(owner)
            .fetch_one(&self.pool)
            .await
            .map_err(storage_error)?;

        let sql = format!(
            "SELECT {}, li.reservation_id {} ORDER BY t.number OFFSET $2 LIMIT $3",
            TICKET_COLUMNS, scope
        );
        let rows = sqlx::query_as::<_, TicketRecordRow>(&sql)
            .bind(owner)
            .bind(offset)
            .bind(limit)
            .fetch_all(&self.pool)
            .await
            .map_err(storage_error)?;
        Ok(Listing {
            items: ticket_records(rows),
            total: count_of(total),
        })
    }
}

// ============================================================================
// Unit of work
// ============================================================================

pub struct PgUnitOfWork {
    tx: Transaction<'static, Postgres>,
}

#[async_trait]
impl UnitOfWork for PgUnitOfWork {
    async fn insert_reservation(&mut self, reservation: &Reservation) -> CoreResult<()> {
        let (hold_token, hold_ttl) = split_hold(reservation.hold.as_ref());
        sqlx::query(
            r#"
            INSERT INTO reservations (id, event_id, event_key, workspace_key, user_id, customer_name,
                customer_phone, total_price, discount, paid, hold_token, hold_ttl_minutes, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
            "#,
        )
        .bind(reservation.id)
        .bind(reservation.event_id)
        .bind(&reservation.event_key)
        .bind(&reservation.workspace_key)
        .bind(reservation.user_id)
        .bind(reservation.customer_name.expose())
        .bind(reservation.customer_phone.expose())
        .bind(reservation.total_price)
        .bind(reservation.discount)
        .bind(reservation.paid)
        .bind(hold_token)
        .bind(hold_ttl)
        .bind(reservation.created_at)
        .execute(&mut *self.tx)
        .await
        .map_err(storage_error)?;

        for item in &reservation.line_items {
            let (hold_token, hold_ttl) = split_hold(item.hold.as_ref());
            sqlx::query(
                r#"
                INSERT INTO line_items (id, reservation_id, object_key, name, category_id, category_name,
                    price, object_type, hold_token, hold_ttl_minutes, canceled, created_at)
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
                "#,
            )
            .bind(item.id)
            .bind(reservation.id)
            .bind(&item.object_key)
            .bind(&item.name)
            .bind(item.category_id)
            .bind(&item.category_name)
            .bind(item.price)
            .bind(item.object_type.as_str())
            .bind(hold_token)
            .bind(hold_ttl)
            .bind(item.canceled)
            .bind(item.created_at)
            .execute(&mut *self.tx)
            .await
            .map_err(storage_error)?;
        }
        Ok(())
    }

    async fn insert_bill(&mut self, bill: &Bill) -> CoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO bills (id, reservation_id, payment_id, provider, status, amount, metadata,
                pending_action, paid_at, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            "#,
        )
        .bind(bill.id)
        .bind(bill.reservation_id)
        .bind(&bill.payment_id)
        .bind(bill.provider.as_str())
        .bind(bill.status.as_str())
        .bind(bill.amount)
        .bind(&bill.metadata)
        .bind(bill.pending_action.map(|a| a.as_str()))
        .bind(bill.paid_at)
        .bind(bill.created_at)
        .execute(&mut *self.tx)
        .await
        .map_err(storage_error)?;
        Ok(())
    }

    async fn lock_reservation(&mut self, id: Uuid) -> CoreResult<Option<Reservation>> {
        load_reservation(&mut *self.tx, id, true).await
    }

    async fn lock_bill(&mut self, payment_id: &str) -> CoreResult<Option<Bill>> {
        load_bill(&mut *self.tx, "payment_id", BillKey::PaymentId(payment_id), true).await
    }

    async fn lock_bill_for_reservation(&mut self, reservation_id: Uuid) -> CoreResult<Option<Bill>> {
        load_bill(&mut *self.tx, "reservation_id", BillKey::Reservation(reservation_id), true).await
    }

    async fn lock_tickets(&mut self, numbers: &[i64]) -> CoreResult<Vec<TicketRecord>> {
        let sql = format!(
            "SELECT {}, li.reservation_id FROM tickets t JOIN line_items li ON li.id = t.line_item_id \
             WHERE t.number = ANY($1) ORDER BY t.number FOR UPDATE OF t",
            TICKET_COLUMNS
        );
        let rows = sqlx::query_as::<_, TicketRecordRow>(&sql)
            .bind(numbers)
            .fetch_all(&mut *self.tx)
            .await
            .map_err(storage_error)?;
        Ok(ticket_records(rows))
    }

    async fn update_reservation(&mut self, reservation: &Reservation) -> CoreResult<()> {
        let (hold_token, hold_ttl) = split_hold(reservation.hold.as_ref());
        sqlx::query(
            "UPDATE reservations SET total_price = $2, paid = $3, hold_token = $4, hold_ttl_minutes = $5 WHERE id = $1",
        )
        .bind(reservation.id)
        .bind(reservation.total_price)
        .bind(reservation.paid)
        .bind(hold_token)
        .bind(hold_ttl)
        .execute(&mut *self.tx)
        .await
        .map_err(storage_error)?;

        for item in &reservation.line_items {
            let (hold_token, hold_ttl) = split_hold(item.hold.as_ref());
            sqlx::query(
                "UPDATE line_items SET canceled = $2, hold_token = $3, hold_ttl_minutes = $4 WHERE id = $1",
            )
            .bind(item.id)
            .bind(item.canceled)
            .bind(hold_token)
            .bind(hold_ttl)
            .execute(&mut *self.tx)
            .await
            .map_err(storage_error)?;
        }
        Ok(())
    }

    async fn update_bill(&mut self, bill: &Bill) -> CoreResult<()> {
        sqlx::query(
            "UPDATE bills SET status = $2, metadata = $3, pending_action = $4, paid_at = $5 WHERE id = $1",
        )
        .bind(bill.id)
        .bind(bill.status.as_str())
        .bind(&bill.metadata)
        .bind(bill.pending_action.map(|a| a.as_str()))
        .bind(bill.paid_at)
        .execute(&mut *self.tx)
        .await
        .map_err(storage_error)?;
        Ok(())
    }

    async fn tickets_for_reservation(&mut self, reservation_id: Uuid) -> CoreResult<Vec<Ticket>> {
        load_tickets(&mut *self.tx, reservation_id).await
    }

    async fn issue_ticket(&mut self, line_item_id: Uuid, seating_label: &str, category_label: &str) -> CoreResult<Ticket> {
        let row = sqlx::query_as::<_, TicketRow>(
            r#"
            INSERT INTO tickets (id, line_item_id, seating_label, category_label, used, created_at)
            VALUES ($1, $2, $3, $4, FALSE, NOW())
            RETURNING id, number, line_item_id, seating_label, category_label, used, created_at
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(line_item_id)
        .bind(seating_label)
        .bind(category_label)
        .fetch_one(&mut *self.tx)
        .await
        .map_err(storage_error)?;
        Ok(row.into())
    }

    async fn update_ticket(&mut self, ticket: &Ticket) -> CoreResult<()> {
        sqlx::query("UPDATE tickets SET used = $2 WHERE id = $1")
            .bind(ticket.id)
            .bind(ticket.used)
            .execute(&mut *self.tx)
            .await
            .map_err(storage_error)?;
        Ok(())
    }

    async fn delete_reservation(&mut self, id: Uuid) -> CoreResult<()> {
        sqlx::query("DELETE FROM reservations WHERE id = $1")
            .bind(id)
            .execute(&mut *self.tx)
            .await
            .map_err(storage_error)?;
        Ok(())
    }

    async fn commit(self: Box<Self>) -> CoreResult<()> {
        self.tx.commit().await.map_err(storage_error)
    }

    async fn rollback(self: Box<Self>) -> CoreResult<()> {
        self.tx.rollback().await.map_err(storage_error)
    }
}

fn split_hold(hold: Option<&HoldInfo>) -> (Option<&str>, Option<i32>) {
    match hold {
        Some(h) => (Some(h.hold_token.as_str()), Some(h.ttl_minutes)),
        None => (None, None),
    }
}
