//! Order repository: the `orders` table and its guarded status transitions.

use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ToSql, ToSqlOutput, ValueRef};
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::{Deserialize, Serialize};

use super::{now_timestamp, Database, DatabaseError};
use crate::order::OrderStatus;

impl FromSql for OrderStatus {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        let s = value.as_str()?;
        OrderStatus::parse(s)
            .ok_or_else(|| FromSqlError::Other(format!("unknown order status '{}'", s).into()))
    }
}

impl ToSql for OrderStatus {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::from(self.as_str()))
    }
}

/// Delivery details captured at checkout.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShippingDetails {
    pub city: Option<String>,
    pub postal_code: Option<String>,
    pub address_line1: Option<String>,
    pub address_line2: Option<String>,
    pub phone: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OrderRow {
    pub id: i64,
    pub customer_id: i64,
    pub status: OrderStatus,
    /// Sum of job estimates, present once every job has one.
    pub estimated_cost: Option<i64>,
    pub shipping: ShippingDetails,
    pub created_at: String,
    pub updated_at: String,
}

impl OrderRow {
    fn from_row(row: &Row<'_>) -> Result<Self, rusqlite::Error> {
        Ok(Self {
            id: row.get("id")?,
            customer_id: row.get("customer_id")?,
            status: row.get("status")?,
            estimated_cost: row.get("estimated_cost")?,
            shipping: ShippingDetails {
                city: row.get("city")?,
                postal_code: row.get("postal_code")?,
                address_line1: row.get("address_line1")?,
                address_line2: row.get("address_line2")?,
                phone: row.get("phone")?,
            },
            created_at: row.get("created_at")?,
            updated_at: row.get("updated_at")?,
        })
    }
}

pub fn insert_in(
    conn: &Connection,
    customer_id: i64,
    shipping: &ShippingDetails,
) -> Result<i64, DatabaseError> {
    let now = now_timestamp();
    conn.execute(
        "INSERT INTO orders (customer_id, status, city, postal_code, address_line1,
         address_line2, phone, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?8)",
        params![
            customer_id,
            OrderStatus::Queued,
            shipping.city,
            shipping.postal_code,
            shipping.address_line1,
            shipping.address_line2,
            shipping.phone,
            now,
        ],
    )?;
    Ok(conn.last_insert_rowid())
}

pub fn find_by_id_in(conn: &Connection, id: i64) -> Result<Option<OrderRow>, DatabaseError> {
    Ok(conn
        .query_row(
            "SELECT * FROM orders WHERE id = ?1",
            params![id],
            OrderRow::from_row,
        )
        .optional()?)
}

pub fn find_by_id(db: &Database, id: i64) -> Result<Option<OrderRow>, DatabaseError> {
    db.with_conn(|conn| find_by_id_in(conn, id))
}

/// Moves the order to `target` if its current status allows it.
///
/// The source-state check (and, for fulfillment states, the "every job
/// estimated" check) runs inside the UPDATE itself, so concurrent writers
/// cannot interleave between check and write. Returns whether a row changed.
pub fn transition_in(
    conn: &Connection,
    id: i64,
    target: OrderStatus,
) -> Result<bool, DatabaseError> {
    let sources = OrderStatus::sources_of(target);
    if sources.is_empty() {
        return Ok(false);
    }
    let source_list = sources
        .iter()
        .map(|s| format!("'{}'", s.as_str()))
        .collect::<Vec<_>>()
        .join(", ");

    let mut sql = format!(
        "UPDATE orders SET status = ?2, updated_at = ?3 WHERE id = ?1 AND status IN ({})",
        source_list
    );
    if target.requires_complete_jobs() {
        sql.push_str(
            " AND NOT EXISTS (SELECT 1 FROM print_jobs
               WHERE print_jobs.order_id = orders.id AND print_jobs.estimated_cost IS NULL)",
        );
    }

    let changed = conn.execute(&sql, params![id, target, now_timestamp()])?;
    Ok(changed > 0)
}

pub fn transition(db: &Database, id: i64, target: OrderStatus) -> Result<bool, DatabaseError> {
    db.with_conn(|conn| transition_in(conn, id, target))
}

/// Recomputes the order total from its jobs. Leaves the total NULL while any
/// job is still unestimated.
pub fn refresh_estimated_cost_in(conn: &Connection, id: i64) -> Result<(), DatabaseError> {
    conn.execute(
        "UPDATE orders SET estimated_cost = CASE
             WHEN EXISTS (SELECT 1 FROM print_jobs WHERE order_id = ?1 AND estimated_cost IS NULL)
             THEN NULL
             ELSE (SELECT SUM(estimated_cost) FROM print_jobs WHERE order_id = ?1)
         END,
         updated_at = ?2
         WHERE id = ?1",
        params![id, now_timestamp()],
    )?;
    Ok(())
}

pub fn delete_in(conn: &Connection, id: i64) -> Result<bool, DatabaseError> {
    let deleted = conn.execute("DELETE FROM orders WHERE id = ?1", params![id])?;
    Ok(deleted > 0)
}
