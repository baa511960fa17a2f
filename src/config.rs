use std::env;
use std::time::Duration;

use anyhow::{Context, Result};

use crate::plans::PlanTable;
use crate::signature::DEFAULT_TOLERANCE;

const DEFAULT_DATABASE_PATH: &str = "convia_license.db";

#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub database_path: String,
    pub db_pool_size: u32,
    pub base_url: String,
    /// Page that receives `?token=` from magic link emails
    pub portal_url: String,
    pub paddle_webhook_secret: String,
    pub webhook_tolerance: Duration,
    pub admin_api_key: String,
    pub magic_link_ttl_minutes: i64,
    pub license_key_prefix: String,
    pub plans: PlanTable,
    /// System-level Resend API key (email disabled when absent and no webhook)
    pub resend_api_key: Option<String>,
    pub email_from: String,
    /// POST magic links here instead of sending email (DIY delivery)
    pub email_webhook_url: Option<String>,
}

fn required(name: &str) -> Result<String> {
    env::var(name)
        .ok()
        .filter(|v| !v.trim().is_empty())
        .with_context(|| format!("{} must be set", name))
}

fn parsed<T: std::str::FromStr>(name: &str, default: T) -> T {
    env::var(name)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();

        let host = env::var("HOST").unwrap_or_else(|_| "127.0.0.1".to_string());
        let port: u16 = parsed("PORT", 8000);

        let base_url = env::var("BASE_URL")
            .unwrap_or_else(|_| format!("http://{}:{}", host, port));
        let portal_url = env::var("PORTAL_URL")
            .unwrap_or_else(|_| format!("{}/license/portal", base_url.trim_end_matches('/')));

        let plans = match env::var("PLAN_QUOTAS") {
            Ok(spec) => PlanTable::parse(&spec).context("PLAN_QUOTAS is invalid")?,
            Err(_) => PlanTable::default(),
        };

        Ok(Self {
            host,
            port,
            database_path: env::var("DATABASE_PATH")
                .unwrap_or_else(|_| DEFAULT_DATABASE_PATH.to_string()),
            db_pool_size: parsed("DB_POOL_SIZE", 10),
            base_url,
            portal_url,
            paddle_webhook_secret: required("PADDLE_WEBHOOK_SECRET")?,
            webhook_tolerance: Duration::from_secs(parsed(
                "WEBHOOK_TOLERANCE_SECONDS",
                DEFAULT_TOLERANCE.as_secs(),
            )),
            admin_api_key: required("ADMIN_API_KEY")?,
            magic_link_ttl_minutes: parsed("MAGIC_LINK_TTL_MINUTES", 15),
            license_key_prefix: env::var("LICENSE_KEY_PREFIX")
                .unwrap_or_else(|_| "CONVIA".to_string()),
            plans,
            resend_api_key: env::var("RESEND_API_KEY").ok().filter(|v| !v.is_empty()),
            email_from: env::var("EMAIL_FROM")
                .unwrap_or_else(|_| "Convia <licenses@convia.vip>".to_string()),
            email_webhook_url: env::var("EMAIL_WEBHOOK_URL").ok().filter(|v| !v.is_empty()),
        })
    }

    /// Database location alone, for maintenance commands that don't need
    /// the server secrets.
    pub fn database_path_from_env() -> String {
        dotenvy::dotenv().ok();
        env::var("DATABASE_PATH").unwrap_or_else(|_| DEFAULT_DATABASE_PATH.to_string())
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}
