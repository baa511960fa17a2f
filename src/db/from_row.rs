//! Row mapping for the store tables.
//!
//! Every `*_COLS` constant lists columns in the exact order the matching
//! `FromRow` impl reads them.

use std::str::FromStr;

use rusqlite::{Connection, OptionalExtension, Params, Row, types::Type};

use crate::error::Result;
use crate::models::*;

pub const CUSTOMER_COLS: &str = "id, email, paddle_customer_id, created_at, updated_at";

pub const LICENSE_COLS: &str = "id, license_key, customer_id, plan, allowed_containers, status, created_at, updated_at, expires_at, paddle_subscription_id, last_event_at";

pub const BINDING_COLS: &str =
    "id, license_id, machine_id, container_id, first_seen_at, last_seen_at";

pub const MAGIC_TOKEN_COLS: &str = "id, token_hash, customer_id, created_at, expires_at, used_at";

pub const WEBHOOK_LOG_COLS: &str = "id, received_at, payload, signature, event_id, event_type, status, error, processed_at";

pub trait FromRow: Sized {
    fn from_row(row: &Row) -> rusqlite::Result<Self>;
}

/// Read a TEXT column into a strum enum.
fn parse_enum<T: FromStr>(row: &Row, idx: usize) -> rusqlite::Result<T> {
    let raw: String = row.get(idx)?;
    raw.parse().map_err(|_| {
        rusqlite::Error::FromSqlConversionFailure(
            idx,
            Type::Text,
            format!("unexpected value {:?}", raw).into(),
        )
    })
}

impl FromRow for Customer {
    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(Customer {
            id: row.get(0)?,
            email: row.get(1)?,
            paddle_customer_id: row.get(2)?,
            created_at: row.get(3)?,
            updated_at: row.get(4)?,
        })
    }
}

impl FromRow for License {
    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(License {
            id: row.get(0)?,
            license_key: row.get(1)?,
            customer_id: row.get(2)?,
            plan: row.get(3)?,
            allowed_containers: row.get(4)?,
            status: parse_enum(row, 5)?,
            created_at: row.get(6)?,
            updated_at: row.get(7)?,
            expires_at: row.get(8)?,
            paddle_subscription_id: row.get(9)?,
            last_event_at: row.get(10)?,
        })
    }
}

impl FromRow for MachineBinding {
    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(MachineBinding {
            id: row.get(0)?,
            license_id: row.get(1)?,
            machine_id: row.get(2)?,
            container_id: row.get(3)?,
            first_seen_at: row.get(4)?,
            last_seen_at: row.get(5)?,
        })
    }
}

impl FromRow for MagicToken {
    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(MagicToken {
            id: row.get(0)?,
            token_hash: row.get(1)?,
            customer_id: row.get(2)?,
            created_at: row.get(3)?,
            expires_at: row.get(4)?,
            used_at: row.get(5)?,
        })
    }
}

impl FromRow for WebhookLog {
    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(WebhookLog {
            id: row.get(0)?,
            received_at: row.get(1)?,
            payload: row.get(2)?,
            signature: row.get(3)?,
            event_id: row.get(4)?,
            event_type: row.get(5)?,
            status: parse_enum(row, 6)?,
            error: row.get(7)?,
            processed_at: row.get(8)?,
        })
    }
}

pub fn query_one<T: FromRow>(conn: &Connection, sql: &str, params: impl Params) -> Result<Option<T>> {
    let row = conn
        .query_row(sql, params, |row| T::from_row(row))
        .optional()?;
    Ok(row)
}

pub fn query_all<T: FromRow>(conn: &Connection, sql: &str, params: impl Params) -> Result<Vec<T>> {
    let mut stmt = conn.prepare(sql)?;
    let rows = stmt
        .query_map(params, |row| T::from_row(row))?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(rows)
}
