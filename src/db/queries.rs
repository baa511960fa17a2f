use chrono::Utc;
use rusqlite::{Connection, TransactionBehavior, params, types::Value};

use crate::error::{AppError, LifecycleError, Result, TokenError};
use crate::models::*;
use crate::token::generate_license_key;

use super::from_row::{
    BINDING_COLS, CUSTOMER_COLS, LICENSE_COLS, MAGIC_TOKEN_COLS, WEBHOOK_LOG_COLS, query_all,
    query_one,
};

fn now() -> i64 {
    Utc::now().timestamp()
}

/// Attempts at drawing an unused license key
const LICENSE_KEY_ATTEMPTS: usize = 5;

/// Builder for dynamic UPDATE statements with optional fields.
/// Combines multiple field updates into a single query.
struct UpdateBuilder {
    table: &'static str,
    id: i64,
    fields: Vec<(&'static str, Value)>,
    track_updated_at: bool,
}

impl UpdateBuilder {
    fn new(table: &'static str, id: i64) -> Self {
        Self {
            table,
            id,
            fields: Vec::new(),
            track_updated_at: false,
        }
    }

    fn with_updated_at(mut self) -> Self {
        self.track_updated_at = true;
        self
    }

    fn set(mut self, column: &'static str, value: impl Into<Value>) -> Self {
        self.fields.push((column, value.into()));
        self
    }

    fn set_opt<V: Into<Value>>(self, column: &'static str, value: Option<V>) -> Self {
        match value {
            Some(v) => self.set(column, v),
            None => self,
        }
    }

    /// Set a column to an explicit value, NULL for None.
    fn set_nullable<V: Into<Value>>(mut self, column: &'static str, value: Option<V>) -> Self {
        match value {
            Some(v) => self.fields.push((column, v.into())),
            None => self.fields.push((column, Value::Null)),
        }
        self
    }

    fn execute(mut self, conn: &Connection) -> Result<bool> {
        if self.fields.is_empty() {
            return Ok(false);
        }
        if self.track_updated_at {
            self.fields.push(("updated_at", now().into()));
        }
        let sets: Vec<String> = self
            .fields
            .iter()
            .map(|(col, _)| format!("{} = ?", col))
            .collect();
        let mut values: Vec<Value> = self.fields.into_iter().map(|(_, v)| v).collect();
        values.push(self.id.into());
        let sql = format!("UPDATE {} SET {} WHERE id = ?", self.table, sets.join(", "));
        let affected = conn.execute(&sql, rusqlite::params_from_iter(values))?;
        Ok(affected > 0)
    }
}

// ============ Customers ============

/// Look up a customer by email, creating the row on first sight.
/// Emails are normalized before storage so lookups are case-insensitive.
pub fn find_or_create_customer(conn: &Connection, email: &str) -> Result<Customer> {
    let email = normalize_email(email);
    let now = now();

    conn.execute(
        "INSERT INTO customers (email, created_at, updated_at) VALUES (?1, ?2, ?2)
         ON CONFLICT(email) DO NOTHING",
        params![&email, now],
    )?;

    get_customer_by_email(conn, &email)?
        .ok_or_else(|| AppError::Internal(format!("customer row missing for {}", email)))
}

pub fn get_customer_by_id(conn: &Connection, id: i64) -> Result<Option<Customer>> {
    query_one(
        conn,
        &format!("SELECT {} FROM customers WHERE id = ?1", CUSTOMER_COLS),
        params![id],
    )
}

pub fn get_customer_by_email(conn: &Connection, email: &str) -> Result<Option<Customer>> {
    query_one(
        conn,
        &format!("SELECT {} FROM customers WHERE email = ?1", CUSTOMER_COLS),
        params![normalize_email(email)],
    )
}

/// Record the provider's customer id the first time we learn it.
/// Never overwrites an existing value or steals one bound to another row.
pub fn attach_paddle_customer_id(
    conn: &Connection,
    customer_id: i64,
    paddle_customer_id: &str,
) -> Result<bool> {
    let affected = conn.execute(
        "UPDATE customers SET paddle_customer_id = ?1, updated_at = ?2
         WHERE id = ?3 AND paddle_customer_id IS NULL
           AND NOT EXISTS (SELECT 1 FROM customers WHERE paddle_customer_id = ?1)",
        params![paddle_customer_id, now(), customer_id],
    )?;
    Ok(affected > 0)
}

// ============ Licenses ============

fn license_key_exists(conn: &Connection, key: &str) -> Result<bool> {
    let exists = conn.query_row(
        "SELECT EXISTS(SELECT 1 FROM licenses WHERE license_key = ?1)",
        params![key],
        |row| row.get(0),
    )?;
    Ok(exists)
}

/// Create a license with a freshly generated key.
pub fn create_license(conn: &Connection, key_prefix: &str, input: &CreateLicense) -> Result<License> {
    if input.allowed_containers < 1 {
        return Err(AppError::BadRequest(
            "allowed_containers must be at least 1".into(),
        ));
    }

    let mut license_key = None;
    for _ in 0..LICENSE_KEY_ATTEMPTS {
        let candidate = generate_license_key(key_prefix);
        if !license_key_exists(conn, &candidate)? {
            license_key = Some(candidate);
            break;
        }
    }
    let license_key = license_key
        .ok_or_else(|| AppError::Internal("could not generate a unique license key".into()))?;

    let now = now();
    conn.execute(
        "INSERT INTO licenses (license_key, customer_id, plan, allowed_containers, status,
                               created_at, updated_at, expires_at, paddle_subscription_id, last_event_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?6, ?7, ?8, ?9)",
        params![
            &license_key,
            input.customer_id,
            &input.plan,
            input.allowed_containers,
            input.status.as_ref(),
            now,
            input.expires_at,
            &input.paddle_subscription_id,
            input.last_event_at,
        ],
    )?;

    Ok(License {
        id: conn.last_insert_rowid(),
        license_key,
        customer_id: input.customer_id,
        plan: input.plan.clone(),
        allowed_containers: input.allowed_containers,
        status: input.status,
        created_at: now,
        updated_at: now,
        expires_at: input.expires_at,
        paddle_subscription_id: input.paddle_subscription_id.clone(),
        last_event_at: input.last_event_at,
    })
}

pub fn get_license_by_id(conn: &Connection, id: i64) -> Result<Option<License>> {
    query_one(
        conn,
        &format!("SELECT {} FROM licenses WHERE id = ?1", LICENSE_COLS),
        params![id],
    )
}

pub fn get_license_by_key(conn: &Connection, license_key: &str) -> Result<Option<License>> {
    query_one(
        conn,
        &format!("SELECT {} FROM licenses WHERE license_key = ?1", LICENSE_COLS),
        params![license_key],
    )
}

pub fn get_license_by_subscription(
    conn: &Connection,
    subscription_id: &str,
) -> Result<Option<License>> {
    query_one(
        conn,
        &format!(
            "SELECT {} FROM licenses WHERE paddle_subscription_id = ?1",
            LICENSE_COLS
        ),
        params![subscription_id],
    )
}

pub fn list_licenses_for_customer(conn: &Connection, customer_id: i64) -> Result<Vec<License>> {
    query_all(
        conn,
        &format!(
            "SELECT {} FROM licenses WHERE customer_id = ?1 ORDER BY created_at DESC, id DESC",
            LICENSE_COLS
        ),
        params![customer_id],
    )
}

/// Returns false when the license does not exist.
pub fn set_license_status(conn: &Connection, id: i64, status: LicenseStatus) -> Result<bool> {
    UpdateBuilder::new("licenses", id)
        .with_updated_at()
        .set("status", status.as_ref().to_string())
        .execute(conn)
}

/// Apply a provider lifecycle transition to the license owned by
/// `subscription_id`, creating license and customer on first activation.
///
/// Events older than the last applied one are rejected so that a late
/// `updated` cannot undo a newer `canceled`. Plan changes never delete
/// bindings: a license above its new quota keeps verifying on existing
/// machines and only refuses new ones.
pub fn apply_lifecycle_event(
    conn: &Connection,
    subscription_id: &str,
    transition: &LifecycleTransition,
    occurred_at: Option<i64>,
    key_prefix: &str,
) -> Result<License> {
    let existing = get_license_by_subscription(conn, subscription_id)?;

    if let (Some(license), Some(at)) = (&existing, occurred_at)
        && license.last_event_at.is_some_and(|last| at < last)
    {
        return Err(LifecycleError::OutOfOrder(subscription_id.to_string()).into());
    }

    let license_id = match (transition, existing) {
        (
            LifecycleTransition::Activate(terms) | LifecycleTransition::ChangePlan(terms),
            Some(license),
        ) => {
            let status = match transition {
                LifecycleTransition::Activate(_) => LicenseStatus::Active,
                _ => terms.status,
            };
            if terms.allowed_containers < 1 {
                return Err(AppError::BadRequest(
                    "allowed_containers must be at least 1".into(),
                ));
            }
            UpdateBuilder::new("licenses", license.id)
                .with_updated_at()
                .set("plan", terms.plan.clone())
                .set("allowed_containers", terms.allowed_containers)
                .set("status", status.as_ref().to_string())
                .set_opt("expires_at", terms.expires_at)
                .set_opt("last_event_at", occurred_at)
                .execute(conn)?;
            if let Some(paddle_id) = &terms.paddle_customer_id {
                attach_paddle_customer_id(conn, license.customer_id, paddle_id)?;
            }
            license.id
        }
        (
            LifecycleTransition::Activate(terms) | LifecycleTransition::ChangePlan(terms),
            None,
        ) => {
            let email = terms
                .email
                .as_deref()
                .filter(|e| !e.trim().is_empty())
                .ok_or(LifecycleError::MissingField("customer email"))?;
            let customer = find_or_create_customer(conn, email)?;
            if let Some(paddle_id) = &terms.paddle_customer_id {
                attach_paddle_customer_id(conn, customer.id, paddle_id)?;
            }
            let status = match transition {
                LifecycleTransition::Activate(_) => LicenseStatus::Active,
                _ => terms.status,
            };
            create_license(
                conn,
                key_prefix,
                &CreateLicense {
                    customer_id: customer.id,
                    plan: terms.plan.clone(),
                    allowed_containers: terms.allowed_containers,
                    status,
                    expires_at: terms.expires_at,
                    paddle_subscription_id: Some(subscription_id.to_string()),
                    last_event_at: occurred_at,
                },
            )?
            .id
        }
        (LifecycleTransition::Cancel | LifecycleTransition::Suspend, Some(license)) => {
            let status = match transition {
                LifecycleTransition::Cancel => LicenseStatus::Cancelled,
                _ => LicenseStatus::Suspended,
            };
            UpdateBuilder::new("licenses", license.id)
                .with_updated_at()
                .set("status", status.as_ref().to_string())
                .set_opt("last_event_at", occurred_at)
                .execute(conn)?;
            license.id
        }
        (LifecycleTransition::Cancel | LifecycleTransition::Suspend, None) => {
            return Err(LifecycleError::UnknownSubscription(subscription_id.to_string()).into());
        }
    };

    get_license_by_id(conn, license_id)?
        .ok_or_else(|| AppError::Internal(format!("license {} vanished", license_id)))
}

// ============ Machine Bindings ============

/// Outcome of [`upsert_binding_atomic`]. `license` is the row as read under
/// the write lock and `usage` is the binding count after the call.
#[derive(Debug, Clone)]
pub enum BindingAcquisition {
    /// Identity was already bound; only `last_seen_at` moved.
    Existing {
        license: License,
        binding: MachineBinding,
        usage: i64,
    },
    /// A new binding was recorded against the quota.
    Created {
        license: License,
        binding: MachineBinding,
        usage: i64,
    },
}

impl BindingAcquisition {
    pub fn license(&self) -> &License {
        match self {
            Self::Existing { license, .. } | Self::Created { license, .. } => license,
        }
    }

    pub fn binding(&self) -> &MachineBinding {
        match self {
            Self::Existing { binding, .. } | Self::Created { binding, .. } => binding,
        }
    }

    pub fn usage(&self) -> i64 {
        match self {
            Self::Existing { usage, .. } | Self::Created { usage, .. } => *usage,
        }
    }

    pub fn is_new(&self) -> bool {
        matches!(self, Self::Created { .. })
    }
}

pub fn count_bindings_for_license(conn: &Connection, license_id: i64) -> Result<i64> {
    let count = conn.query_row(
        "SELECT COUNT(*) FROM machine_bindings WHERE license_id = ?1",
        params![license_id],
        |row| row.get(0),
    )?;
    Ok(count)
}

pub fn list_bindings_for_license(conn: &Connection, license_id: i64) -> Result<Vec<MachineBinding>> {
    query_all(
        conn,
        &format!(
            "SELECT {} FROM machine_bindings WHERE license_id = ?1 ORDER BY first_seen_at, id",
            BINDING_COLS
        ),
        params![license_id],
    )
}

/// Bind `(machine_id, container_id)` to a license, or refresh an existing
/// binding. The license check, lookup, count and insert share one
/// write-locked transaction, so neither concurrent first-time requests nor a
/// lifecycle change committed mid-request can push a bind past the license's
/// current terms.
///
/// Refusals are `LicenseInactive`, `LicenseExpired` and `QuotaExceeded`.
pub fn upsert_binding_atomic(
    conn: &mut Connection,
    license_id: i64,
    machine_id: &str,
    container_id: Option<&str>,
) -> Result<BindingAcquisition> {
    // IMMEDIATE acquires the write lock at transaction start, so count-then-insert
    // can't race
    let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
    let now = now();

    let license = get_license_by_id(&tx, license_id)?
        .ok_or_else(|| AppError::NotFound("License not found".into()))?;
    if !license.status.is_active() {
        return Err(AppError::LicenseInactive(license.status.as_ref().to_string()));
    }
    if license.is_expired_at(now) {
        return Err(AppError::LicenseExpired);
    }

    let existing: Option<MachineBinding> = query_one(
        &tx,
        &format!(
            "SELECT {} FROM machine_bindings
             WHERE license_id = ?1 AND machine_id = ?2 AND container_id IS ?3",
            BINDING_COLS
        ),
        params![license_id, machine_id, container_id],
    )?;

    if let Some(binding) = existing {
        tx.execute(
            "UPDATE machine_bindings SET last_seen_at = ?1 WHERE id = ?2",
            params![now, binding.id],
        )?;
        let usage = count_bindings_for_license(&tx, license_id)?;
        tx.commit()?;
        return Ok(BindingAcquisition::Existing {
            license,
            binding: MachineBinding {
                last_seen_at: now,
                ..binding
            },
            usage,
        });
    }

    let allowed = license.allowed_containers;
    let current = count_bindings_for_license(&tx, license_id)?;
    if current >= allowed {
        // Dropping the transaction rolls it back
        return Err(AppError::QuotaExceeded { allowed, current });
    }

    tx.execute(
        "INSERT INTO machine_bindings (license_id, machine_id, container_id, first_seen_at, last_seen_at)
         VALUES (?1, ?2, ?3, ?4, ?4)",
        params![license_id, machine_id, container_id, now],
    )?;
    let id = tx.last_insert_rowid();
    tx.commit()?;

    Ok(BindingAcquisition::Created {
        license,
        binding: MachineBinding {
            id,
            license_id,
            machine_id: machine_id.to_string(),
            container_id: container_id.map(String::from),
            first_seen_at: now,
            last_seen_at: now,
        },
        usage: current + 1,
    })
}

/// Remove every binding of a license. Returns the number removed.
pub fn reset_bindings_for_license(conn: &Connection, license_id: i64) -> Result<usize> {
    let deleted = conn.execute(
        "DELETE FROM machine_bindings WHERE license_id = ?1",
        params![license_id],
    )?;
    Ok(deleted)
}

// ============ Magic Tokens ============

pub fn create_magic_token(
    conn: &Connection,
    customer_id: i64,
    token_hash: &str,
    expires_at: i64,
) -> Result<MagicToken> {
    let now = now();
    conn.execute(
        "INSERT INTO magic_tokens (token_hash, customer_id, created_at, expires_at)
         VALUES (?1, ?2, ?3, ?4)",
        params![token_hash, customer_id, now, expires_at],
    )?;

    Ok(MagicToken {
        id: conn.last_insert_rowid(),
        token_hash: token_hash.to_string(),
        customer_id,
        created_at: now,
        expires_at,
        used_at: None,
    })
}

pub fn get_magic_token_by_hash(conn: &Connection, token_hash: &str) -> Result<Option<MagicToken>> {
    query_one(
        conn,
        &format!(
            "SELECT {} FROM magic_tokens WHERE token_hash = ?1",
            MAGIC_TOKEN_COLS
        ),
        params![token_hash],
    )
}

/// Mark a token used exactly once. Of any number of concurrent claims for
/// the same token, one returns the token and the rest get `AlreadyUsed`.
pub fn claim_magic_token_atomic(
    conn: &mut Connection,
    token_hash: &str,
    now: i64,
) -> Result<MagicToken> {
    let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

    let token: MagicToken = query_one(
        &tx,
        &format!(
            "SELECT {} FROM magic_tokens WHERE token_hash = ?1",
            MAGIC_TOKEN_COLS
        ),
        params![token_hash],
    )?
    .ok_or(TokenError::NotFound)?;

    token.check_usable(now)?;

    // Conditional update: the row only changes if nobody got there first
    let affected = tx.execute(
        "UPDATE magic_tokens SET used_at = ?1 WHERE id = ?2 AND used_at IS NULL",
        params![now, token.id],
    )?;
    if affected == 0 {
        return Err(TokenError::AlreadyUsed.into());
    }
    tx.commit()?;

    Ok(MagicToken {
        used_at: Some(now),
        ..token
    })
}

// ============ Webhook Logs ============

/// Persist a raw delivery before anything else looks at it.
pub fn create_webhook_log(conn: &Connection, payload: &[u8], signature: Option<&str>) -> Result<i64> {
    conn.execute(
        "INSERT INTO webhook_logs (received_at, payload, signature, status)
         VALUES (?1, ?2, ?3, ?4)",
        params![
            now(),
            payload,
            signature,
            WebhookLogStatus::Received.as_ref()
        ],
    )?;
    Ok(conn.last_insert_rowid())
}

/// Attach the parsed event identity to a log entry.
pub fn tag_webhook_log(
    conn: &Connection,
    id: i64,
    event_id: Option<&str>,
    event_type: &str,
) -> Result<()> {
    UpdateBuilder::new("webhook_logs", id)
        .set_nullable("event_id", event_id.map(String::from))
        .set("event_type", event_type.to_string())
        .execute(conn)?;
    Ok(())
}

/// Record the terminal status of a delivery.
pub fn finish_webhook_log(
    conn: &Connection,
    id: i64,
    status: WebhookLogStatus,
    error: Option<&str>,
) -> Result<()> {
    UpdateBuilder::new("webhook_logs", id)
        .set("status", status.as_ref().to_string())
        .set_nullable("error", error.map(String::from))
        .set("processed_at", now())
        .execute(conn)?;
    Ok(())
}

pub fn get_webhook_log(conn: &Connection, id: i64) -> Result<Option<WebhookLog>> {
    query_one(
        conn,
        &format!("SELECT {} FROM webhook_logs WHERE id = ?1", WEBHOOK_LOG_COLS),
        params![id],
    )
}

pub fn list_webhook_logs_for_event(conn: &Connection, event_id: &str) -> Result<Vec<WebhookLog>> {
    query_all(
        conn,
        &format!(
            "SELECT {} FROM webhook_logs WHERE event_id = ?1 ORDER BY id",
            WEBHOOK_LOG_COLS
        ),
        params![event_id],
    )
}

/// True once an event id has been applied successfully. Callers must hold
/// the write lock for check-then-apply to be atomic.
pub fn event_already_processed(conn: &Connection, event_id: &str) -> Result<bool> {
    let processed = conn.query_row(
        "SELECT EXISTS(SELECT 1 FROM webhook_logs WHERE event_id = ?1 AND status = ?2)",
        params![event_id, WebhookLogStatus::Processed.as_ref()],
        |row| row.get(0),
    )?;
    Ok(processed)
}
