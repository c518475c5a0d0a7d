use anyhow::Context;
use bigdecimal::BigDecimal;
use dotenvy::dotenv;
use ipnet::IpNet;
use std::env;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AllowedIps {
    Any,
    Cidrs(Vec<IpNet>),
}

#[derive(Debug, Clone)]
pub struct Config {
    pub server_port: u16,
    pub database_url: String,
    pub database_max_connections: u32,
    pub paystack_base_url: String,
    pub paystack_secret_key: String,
    pub provisioning_base_url: String,
    pub provisioning_api_key: String,
    pub agent_registration_fee: BigDecimal,
    pub webhook_allowed_ips: AllowedIps,
    pub trusted_proxy_depth: usize,
    pub redis_url: Option<String>,
    pub status_sync_max_attempts: u32,
    pub status_sync_base_delay: Duration,
    pub http_timeout: Duration,
    pub log_json: bool,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        dotenv().ok(); // Load .env file if present

        Ok(Config {
            server_port: env::var("SERVER_PORT")
                .unwrap_or_else(|_| "3000".to_string())
                .parse()
                .context("SERVER_PORT must be a port number")?,
            database_url: env::var("DATABASE_URL").context("DATABASE_URL is required")?,
            database_max_connections: env::var("DATABASE_MAX_CONNECTIONS")
                .unwrap_or_else(|_| "5".to_string())
                .parse()
                .context("DATABASE_MAX_CONNECTIONS must be an integer")?,
            paystack_base_url: env::var("PAYSTACK_BASE_URL")
                .unwrap_or_else(|_| "https://api.paystack.co".to_string()),
            paystack_secret_key: env::var("PAYSTACK_SECRET_KEY")
                .context("PAYSTACK_SECRET_KEY is required")?,
            provisioning_base_url: env::var("PROVISIONING_BASE_URL")
                .context("PROVISIONING_BASE_URL is required")?,
            provisioning_api_key: env::var("PROVISIONING_API_KEY")
                .context("PROVISIONING_API_KEY is required")?,
            agent_registration_fee: env::var("AGENT_REGISTRATION_FEE")
                .unwrap_or_else(|_| "50.00".to_string())
                .parse()
                .context("AGENT_REGISTRATION_FEE must be a decimal amount")?,
            webhook_allowed_ips: parse_allowed_ips(
                &env::var("WEBHOOK_ALLOWED_IPS").unwrap_or_else(|_| "*".to_string()),
            )?,
            trusted_proxy_depth: env::var("TRUSTED_PROXY_DEPTH")
                .unwrap_or_else(|_| "0".to_string())
                .parse()
                .context("TRUSTED_PROXY_DEPTH must be an integer")?,
            redis_url: env::var("REDIS_URL").ok().filter(|url| !url.is_empty()),
            status_sync_max_attempts: env::var("STATUS_SYNC_MAX_ATTEMPTS")
                .unwrap_or_else(|_| "3".to_string())
                .parse()
                .context("STATUS_SYNC_MAX_ATTEMPTS must be an integer")?,
            status_sync_base_delay: Duration::from_millis(
                env::var("STATUS_SYNC_BASE_DELAY_MS")
                    .unwrap_or_else(|_| "200".to_string())
                    .parse()
                    .context("STATUS_SYNC_BASE_DELAY_MS must be an integer")?,
            ),
            http_timeout: Duration::from_secs(
                env::var("HTTP_TIMEOUT_SECS")
                    .unwrap_or_else(|_| "30".to_string())
                    .parse()
                    .context("HTTP_TIMEOUT_SECS must be an integer")?,
            ),
            log_json: env::var("LOG_FORMAT").map(|v| v == "json").unwrap_or(false),
        })
    }

    /// Rejects values that parse but cannot work at runtime.
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.server_port == 0 {
            anyhow::bail!("SERVER_PORT must be greater than 0");
        }
        if self.paystack_secret_key.is_empty() {
            anyhow::bail!("PAYSTACK_SECRET_KEY is empty");
        }
        if self.agent_registration_fee <= BigDecimal::from(0) {
            anyhow::bail!("AGENT_REGISTRATION_FEE must be positive");
        }
        if self.status_sync_max_attempts == 0 {
            anyhow::bail!("STATUS_SYNC_MAX_ATTEMPTS must be at least 1");
        }
        url::Url::parse(&self.paystack_base_url).context("PAYSTACK_BASE_URL is not a valid URL")?;
        url::Url::parse(&self.provisioning_base_url)
            .context("PROVISIONING_BASE_URL is not a valid URL")?;
        Ok(())
    }
}

pub fn parse_allowed_ips(raw: &str) -> anyhow::Result<AllowedIps> {
    let value = raw.trim();
    if value == "*" {
        return Ok(AllowedIps::Any);
    }

    let cidrs = value
        .split(',')
        .map(str::trim)
        .filter(|entry| !entry.is_empty())
        .map(|entry| {
            entry
                .parse::<IpNet>()
                .or_else(|_| entry.parse::<std::net::IpAddr>().map(IpNet::from))
        })
        .collect::<Result<Vec<_>, _>>()?;

    if cidrs.is_empty() {
        anyhow::bail!("WEBHOOK_ALLOWED_IPS must be '*' or a comma-separated list of CIDRs");
    }

    Ok(AllowedIps::Cidrs(cidrs))
}

/// Masks the password component of a connection URL.
pub fn mask_password(url: &str) -> String {
    if let Some(at_pos) = url.rfind('@') {
        if let Some(colon_pos) = url[..at_pos].rfind(':') {
            if let Some(slash_pos) = url[..colon_pos].rfind("//") {
                let prefix = &url[..slash_pos + 2];
                let user = &url[slash_pos + 2..colon_pos];
                let suffix = &url[at_pos..];
                return format!("{}{}:****{}", prefix, user, suffix);
            }
        }
    }
    url.to_string()
}

/// Keeps the first four characters of a secret.
pub fn mask_secret(secret: &str) -> String {
    match secret.get(..4) {
        Some(head) if secret.len() > 8 => format!("{}****", head),
        _ => "****".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wildcard_allows_any() {
        assert_eq!(parse_allowed_ips("*").unwrap(), AllowedIps::Any);
    }

    #[test]
    fn bare_ips_and_cidrs_are_accepted() {
        let parsed = parse_allowed_ips("52.31.139.75, 10.0.0.0/8").unwrap();
        match parsed {
            AllowedIps::Cidrs(cidrs) => {
                assert_eq!(cidrs.len(), 2);
                assert!(cidrs[0].contains(&"52.31.139.75".parse::<std::net::IpAddr>().unwrap()));
            }
            AllowedIps::Any => panic!("expected a CIDR list"),
        }
    }

    #[test]
    fn empty_list_is_rejected() {
        assert!(parse_allowed_ips(" , ").is_err());
        assert!(parse_allowed_ips("not-an-ip").is_err());
    }

    #[test]
    fn masks_database_password() {
        assert_eq!(
            mask_password("postgres://app:hunter2@db:5432/bundles"),
            "postgres://app:****@db:5432/bundles"
        );
        assert_eq!(mask_password("postgres://localhost/db"), "postgres://localhost/db");
    }

    #[test]
    fn masks_secret_keys() {
        assert_eq!(mask_secret("sk_test_0123456789"), "sk_t****");
        assert_eq!(mask_secret("short"), "****");
    }
}
