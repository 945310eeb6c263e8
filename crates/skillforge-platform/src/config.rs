use anyhow::{Context, Result};

const DEFAULT_CHECKOUT_TTL_HOURS: u64 = 24;

#[derive(Clone, Debug)]
pub struct ServiceConfig {
    pub database_url: String,
    pub redis_url: String,
    pub http_addr: String,
    pub gateway: GatewayCredentials,
    pub checkout_ttl_seconds: u64,
    pub mail: Option<MailConfig>,
}

#[derive(Clone, Debug)]
pub struct GatewayCredentials {
    pub key_id: String,
    pub key_secret: String,
    pub webhook_secret: String,
    pub base_url: String,
}

#[derive(Clone, Debug)]
pub struct MailConfig {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: String,
    pub from_address: String,
}

impl ServiceConfig {
    pub fn from_env(default_http_addr: &str) -> Result<Self> {
        let database_url = std::env::var("DATABASE_URL").context("DATABASE_URL is required")?;
        let redis_url = std::env::var("REDIS_URL").context("REDIS_URL is required")?;
        let http_addr =
            std::env::var("HTTP_ADDR").unwrap_or_else(|_| default_http_addr.to_string());

        let gateway = GatewayCredentials {
            key_id: std::env::var("GATEWAY_KEY_ID").context("GATEWAY_KEY_ID is required")?,
            key_secret: std::env::var("GATEWAY_KEY_SECRET")
                .context("GATEWAY_KEY_SECRET is required")?,
            webhook_secret: std::env::var("GATEWAY_WEBHOOK_SECRET")
                .context("GATEWAY_WEBHOOK_SECRET is required")?,
            base_url: std::env::var("GATEWAY_BASE_URL")
                .unwrap_or_else(|_| "https://api.gateway.example".to_string()),
        };

        let checkout_ttl_hours = match std::env::var("CHECKOUT_TTL_HOURS") {
            Ok(value) => value
                .parse::<u64>()
                .context("CHECKOUT_TTL_HOURS must be a positive integer")?,
            Err(_) => DEFAULT_CHECKOUT_TTL_HOURS,
        };

        let mail = match std::env::var("SMTP_HOST") {
            Ok(host) => Some(MailConfig {
                host,
                port: match std::env::var("SMTP_PORT") {
                    Ok(value) => value.parse::<u16>().context("SMTP_PORT must be a port number")?,
                    Err(_) => 587,
                },
                username: std::env::var("SMTP_USERNAME")
                    .context("SMTP_USERNAME is required when SMTP_HOST is set")?,
                password: std::env::var("SMTP_PASSWORD")
                    .context("SMTP_PASSWORD is required when SMTP_HOST is set")?,
                from_address: std::env::var("MAIL_FROM")
                    .unwrap_or_else(|_| "SkillForge <no-reply@skillforge.example>".to_string()),
            }),
            Err(_) => None,
        };

        Ok(Self {
            database_url,
            redis_url,
            http_addr,
            gateway,
            checkout_ttl_seconds: checkout_ttl_hours * 3600,
            mail,
        })
    }
}
