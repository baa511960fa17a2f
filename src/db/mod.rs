mod from_row;
pub mod queries;

use std::time::Duration;

use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::Connection;

use crate::config::Config;
use crate::email::EmailService;
use crate::error::Result;
use crate::licensing::{MagicLinkEngine, VerificationEngine, WebhookProcessor};

pub type DbPool = Pool<SqliteConnectionManager>;

/// Shared handles injected into every route. Engines own a clone of the
/// pool; nothing here caches license state between requests.
#[derive(Clone)]
pub struct AppState {
    pub db: DbPool,
    pub verifier: VerificationEngine,
    pub magic_links: MagicLinkEngine,
    pub webhooks: WebhookProcessor,
    pub admin_api_key: String,
}

impl AppState {
    pub fn from_config(db: DbPool, config: &Config) -> Self {
        let email = EmailService::new(
            config.resend_api_key.clone(),
            config.email_from.clone(),
            config.email_webhook_url.clone(),
        );
        Self {
            verifier: VerificationEngine::new(db.clone()),
            magic_links: MagicLinkEngine::new(
                db.clone(),
                email,
                config.portal_url.clone(),
                chrono::Duration::minutes(config.magic_link_ttl_minutes),
            ),
            webhooks: WebhookProcessor::new(
                db.clone(),
                config.paddle_webhook_secret.clone(),
                config.webhook_tolerance,
                config.plans.clone(),
                config.license_key_prefix.clone(),
            ),
            admin_api_key: config.admin_api_key.clone(),
            db,
        }
    }
}

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Open a pooled SQLite database.
///
/// WAL lets readers proceed while an IMMEDIATE transaction holds the write
/// lock; the busy timeout makes competing writers queue instead of failing.
pub fn init_pool(path: &str, max_size: u32) -> Result<DbPool> {
    let manager = SqliteConnectionManager::file(path).with_init(|conn| {
        conn.busy_timeout(BUSY_TIMEOUT)?;
        conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| {
            row.get::<_, String>(0)
        })?;
        conn.execute_batch("PRAGMA foreign_keys = ON;")
    });
    let pool = Pool::builder().max_size(max_size).build(manager)?;
    Ok(pool)
}

pub fn init_db(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS customers (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            email TEXT NOT NULL UNIQUE COLLATE NOCASE,
            paddle_customer_id TEXT UNIQUE,
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL
        );

        CREATE TABLE IF NOT EXISTS licenses (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            license_key TEXT NOT NULL UNIQUE,
            customer_id INTEGER NOT NULL REFERENCES customers(id),
            plan TEXT NOT NULL,
            allowed_containers INTEGER NOT NULL CHECK (allowed_containers > 0),
            status TEXT NOT NULL DEFAULT 'active',
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL,
            expires_at INTEGER,
            paddle_subscription_id TEXT UNIQUE,
            last_event_at INTEGER
        );
        CREATE INDEX IF NOT EXISTS idx_licenses_customer ON licenses(customer_id);

        CREATE TABLE IF NOT EXISTS machine_bindings (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            license_id INTEGER NOT NULL REFERENCES licenses(id),
            machine_id TEXT NOT NULL,
            container_id TEXT,
            first_seen_at INTEGER NOT NULL,
            last_seen_at INTEGER NOT NULL
        );
        -- NULL containers compare equal for uniqueness
        CREATE UNIQUE INDEX IF NOT EXISTS idx_bindings_identity
            ON machine_bindings(license_id, machine_id, COALESCE(container_id, ''));

        CREATE TABLE IF NOT EXISTS magic_tokens (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            token_hash TEXT NOT NULL UNIQUE,
            customer_id INTEGER NOT NULL REFERENCES customers(id),
            created_at INTEGER NOT NULL,
            expires_at INTEGER NOT NULL,
            used_at INTEGER
        );
        CREATE INDEX IF NOT EXISTS idx_magic_tokens_customer ON magic_tokens(customer_id);

        CREATE TABLE IF NOT EXISTS webhook_logs (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            received_at INTEGER NOT NULL,
            payload BLOB NOT NULL,
            signature TEXT,
            event_id TEXT,
            event_type TEXT,
            status TEXT NOT NULL DEFAULT 'received',
            error TEXT,
            processed_at INTEGER
        );
        CREATE INDEX IF NOT EXISTS idx_webhook_logs_event ON webhook_logs(event_id, status);
        CREATE INDEX IF NOT EXISTS idx_webhook_logs_received ON webhook_logs(received_at);
        "#,
    )?;
    Ok(())
}
