use std::collections::HashSet;
use std::env;
use std::str::FromStr;
use std::time::Duration;

use alloy::primitives::Address;
use pix_reconcile::magic_link::normalize_email;
use pix_reconcile::token::decode_key;
use pix_reconcile::webhook::DEFAULT_SIGNATURE_HEADER;
use pix_reconcile::{RetryPolicy, SignatureEncoding, TokenTtls, DEFAULT_BLOCKS_TO_SCAN};
use url::Url;
use zeroize::Zeroizing;

const DEFAULT_PORT: u16 = 4030;
const DEFAULT_APP_URL: &str = "http://localhost:4030";
const DEFAULT_RATE_LIMIT_RPM: u64 = 120;

/// A `TOKEN_CONTRACTS` entry. A bare address leaves the symbol to be read
/// from the contract at startup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContractEntry {
    pub symbol: Option<String>,
    pub address: Address,
}

#[derive(Clone)]
pub struct ServerConfig {
    /// Shared secret the PIX processor signs webhook bodies with
    pub webhook_secret: Zeroizing<Vec<u8>>,
    /// Header the processor puts its signature in
    pub signature_header: String,
    pub signature_encoding: SignatureEncoding,
    /// 32-byte key for magic-link and session tokens
    pub token_key: Zeroizing<Vec<u8>>,
    pub token_ttls: TokenTtls,
    /// Public base URL magic links point at
    pub app_url: Url,
    /// Normalized emails allowed to request an admin login
    pub admin_emails: Vec<String>,
    /// Relay that emails magic links (None = issuance disabled)
    pub delivery_url: Option<Url>,
    /// Ledger RPC endpoint (None = reconciler disabled)
    pub rpc_url: Option<Url>,
    pub merchant_address: Option<Address>,
    pub token_contracts: Vec<ContractEntry>,
    pub blocks_to_scan: u64,
    pub retry: RetryPolicy,
    pub port: u16,
    pub rate_limit_rpm: u64,
    pub allowed_origins: Vec<String>,
    /// Bearer token required for /metrics (None = forbidden)
    pub metrics_token: Option<String>,
}

impl std::fmt::Debug for ServerConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerConfig")
            .field("webhook_secret", &"[REDACTED]")
            .field("signature_header", &self.signature_header)
            .field("signature_encoding", &self.signature_encoding)
            .field("token_key", &"[REDACTED]")
            .field("token_ttls", &self.token_ttls)
            .field("app_url", &self.app_url.as_str())
            .field("admin_emails", &self.admin_emails.len())
            .field("delivery_url", &self.delivery_url.as_ref().map(Url::as_str))
            .field("rpc_url", &self.rpc_url.as_ref().map(|_| "[REDACTED]"))
            .field("merchant_address", &self.merchant_address)
            .field("token_contracts", &self.token_contracts)
            .field("blocks_to_scan", &self.blocks_to_scan)
            .field("retry", &self.retry)
            .field("port", &self.port)
            .field("rate_limit_rpm", &self.rate_limit_rpm)
            .field("allowed_origins", &self.allowed_origins)
            .field(
                "metrics_token",
                &self.metrics_token.as_ref().map(|_| "[REDACTED]"),
            )
            .finish()
    }
}

impl ServerConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build the config from any key/value source. Empty values count as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        // Required: webhook secret. There is no unsigned mode.
        let webhook_secret = var("PIX_WEBHOOK_SECRET")
            .ok_or(ConfigError::MissingRequired("PIX_WEBHOOK_SECRET"))?
            .into_bytes();
        if webhook_secret.len() < 32 {
            tracing::warn!(
                "PIX_WEBHOOK_SECRET is only {} bytes (minimum 32 recommended)",
                webhook_secret.len()
            );
        }

        let signature_header = var("PIX_WEBHOOK_SIGNATURE_HEADER")
            .map(|h| h.trim().to_string())
            .unwrap_or_else(|| DEFAULT_SIGNATURE_HEADER.to_string());
        actix_web::http::header::HeaderName::from_str(&signature_header).map_err(|_| {
            ConfigError::Invalid {
                var: "PIX_WEBHOOK_SIGNATURE_HEADER",
                reason: "not a valid header name".to_string(),
            }
        })?;

        let signature_encoding = match var("PIX_WEBHOOK_SIGNATURE_ENCODING") {
            Some(raw) => raw.parse().map_err(|reason| ConfigError::Invalid {
                var: "PIX_WEBHOOK_SIGNATURE_ENCODING",
                reason,
            })?,
            None => SignatureEncoding::default(),
        };

        // Required: token key
        let raw_key = var("TOKEN_ENCRYPTION_KEY")
            .ok_or(ConfigError::MissingRequired("TOKEN_ENCRYPTION_KEY"))?;
        let token_key = decode_key(raw_key.trim()).map_err(|e| ConfigError::Invalid {
            var: "TOKEN_ENCRYPTION_KEY",
            reason: e.to_string(),
        })?;

        let defaults = TokenTtls::default();
        let token_ttls = TokenTtls {
            magic_link: parse_ttl(var("MAGIC_LINK_TTL_SECS"), "MAGIC_LINK_TTL_SECS")?
                .unwrap_or(defaults.magic_link),
            admin_session: parse_ttl(var("ADMIN_SESSION_TTL_SECS"), "ADMIN_SESSION_TTL_SECS")?
                .unwrap_or(defaults.admin_session),
        };

        let app_url_raw = var("APP_URL").unwrap_or_else(|| DEFAULT_APP_URL.to_string());
        let app_url = Url::parse(app_url_raw.trim()).map_err(|_| ConfigError::InvalidUrl(app_url_raw))?;

        let admin_emails = var("ADMIN_EMAILS")
            .map(|raw| parse_admin_emails(&raw))
            .transpose()?
            .unwrap_or_default();

        let delivery_url = var("MAGIC_LINK_DELIVERY_URL")
            .map(|raw| Url::parse(raw.trim()).map_err(|_| ConfigError::InvalidUrl(raw)))
            .transpose()?;

        let rpc_url = var("RPC_URL")
            .map(|raw| Url::parse(raw.trim()).map_err(|_| ConfigError::InvalidUrl(raw)))
            .transpose()?;

        let merchant_address = var("MERCHANT_ADDRESS")
            .map(|raw| {
                raw.trim()
                    .parse::<Address>()
                    .map_err(|_| ConfigError::InvalidAddress(raw))
            })
            .transpose()?;

        let token_contracts = var("TOKEN_CONTRACTS")
            .map(|raw| parse_token_contracts(&raw))
            .transpose()?
            .unwrap_or_default();

        let blocks_to_scan =
            parse_or(var("BLOCKS_TO_SCAN"), "BLOCKS_TO_SCAN", DEFAULT_BLOCKS_TO_SCAN)?;

        let default_retry = RetryPolicy::default();
        let retry = RetryPolicy {
            max_attempts: parse_or(
                var("RPC_MAX_ATTEMPTS"),
                "RPC_MAX_ATTEMPTS",
                default_retry.max_attempts,
            )?
            .max(1),
            call_timeout: match var("RPC_TIMEOUT_MS") {
                None => default_retry.call_timeout,
                raw => match parse_or(raw, "RPC_TIMEOUT_MS", 0u64)? {
                    0 => {
                        return Err(ConfigError::Invalid {
                            var: "RPC_TIMEOUT_MS",
                            reason: "must be positive".to_string(),
                        })
                    }
                    ms => Duration::from_millis(ms),
                },
            },
            ..default_retry
        };

        let port = parse_or(var("PORT"), "PORT", DEFAULT_PORT)?;
        let rate_limit_rpm =
            parse_or(var("RATE_LIMIT_RPM"), "RATE_LIMIT_RPM", DEFAULT_RATE_LIMIT_RPM)?;
        if rate_limit_rpm == 0 {
            return Err(ConfigError::Invalid {
                var: "RATE_LIMIT_RPM",
                reason: "must be positive".to_string(),
            });
        }

        let allowed_origins: Vec<String> = var("ALLOWED_ORIGINS")
            .map(|s| {
                s.split(',')
                    .map(|s| s.trim().to_string())
                    .filter(|s| !s.is_empty())
                    .collect()
            })
            .unwrap_or_default();
        // Admin sessions ride on cookies; a wildcard origin is never acceptable.
        if allowed_origins.iter().any(|o| o == "*") {
            return Err(ConfigError::Invalid {
                var: "ALLOWED_ORIGINS",
                reason: "wildcard origin '*' is not allowed".to_string(),
            });
        }

        let metrics_token = var("METRICS_TOKEN");

        if admin_emails.is_empty() {
            tracing::warn!("ADMIN_EMAILS not set: nobody can log in to the admin surface");
        }
        if rpc_url.is_none() {
            tracing::warn!("RPC_URL not set: on-chain reconciliation disabled");
        } else if merchant_address.is_none() {
            tracing::warn!("MERCHANT_ADDRESS not set: reconciliation calls will fail");
        }
        if metrics_token.is_none() {
            tracing::warn!("METRICS_TOKEN not set: /metrics endpoint is disabled");
        }

        Ok(Self {
            webhook_secret: Zeroizing::new(webhook_secret),
            signature_header,
            signature_encoding,
            token_key,
            token_ttls,
            app_url,
            admin_emails,
            delivery_url,
            rpc_url,
            merchant_address,
            token_contracts,
            blocks_to_scan,
            retry,
            port,
            rate_limit_rpm,
            allowed_origins,
            metrics_token,
        })
    }
}

/// `default` when unset; a value that does not parse is an error, never a
/// silent fallback.
fn parse_or<T: FromStr>(
    raw: Option<String>,
    var: &'static str,
    default: T,
) -> Result<T, ConfigError> {
    match raw {
        None => Ok(default),
        Some(raw) => raw.trim().parse().map_err(|_| ConfigError::Invalid {
            var,
            reason: format!("expected a non-negative integer, got '{raw}'"),
        }),
    }
}

fn parse_ttl(raw: Option<String>, var: &'static str) -> Result<Option<Duration>, ConfigError> {
    let Some(raw) = raw else {
        return Ok(None);
    };
    match raw.trim().parse::<u64>() {
        Ok(secs) if secs > 0 => Ok(Some(Duration::from_secs(secs))),
        _ => Err(ConfigError::Invalid {
            var,
            reason: format!("expected a positive number of seconds, got '{raw}'"),
        }),
    }
}

/// Comma-separated admin emails, normalized and deduplicated.
pub fn parse_admin_emails(raw: &str) -> Result<Vec<String>, ConfigError> {
    let mut seen = HashSet::new();
    let mut emails = Vec::new();
    for entry in raw.split(',').map(str::trim).filter(|s| !s.is_empty()) {
        let email = normalize_email(entry).map_err(|_| ConfigError::Invalid {
            var: "ADMIN_EMAILS",
            reason: format!("'{entry}' is not an email address"),
        })?;
        if seen.insert(email.clone()) {
            emails.push(email);
        }
    }
    Ok(emails)
}

/// Parse `SYMBOL:0xaddr,0xaddr,...`. Duplicate contracts are rejected.
pub fn parse_token_contracts(raw: &str) -> Result<Vec<ContractEntry>, ConfigError> {
    let mut seen = HashSet::new();
    let mut entries = Vec::new();

    for item in raw.split(',').map(str::trim).filter(|s| !s.is_empty()) {
        let (symbol, address) = match item.split_once(':') {
            Some((symbol, address)) => (Some(symbol.trim()), address.trim()),
            None => (None, item),
        };
        if symbol.is_some_and(str::is_empty) {
            return Err(ConfigError::Invalid {
                var: "TOKEN_CONTRACTS",
                reason: format!("empty symbol in '{item}'"),
            });
        }
        let address: Address = address
            .parse()
            .map_err(|_| ConfigError::InvalidAddress(address.to_string()))?;
        if !seen.insert(address) {
            return Err(ConfigError::Invalid {
                var: "TOKEN_CONTRACTS",
                reason: format!("contract {address} listed twice"),
            });
        }
        entries.push(ContractEntry {
            symbol: symbol.map(str::to_string),
            address,
        });
    }
    Ok(entries)
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("missing required environment variable: {0}")]
    MissingRequired(&'static str),

    #[error("invalid {var}: {reason}")]
    Invalid { var: &'static str, reason: String },

    #[error("invalid address: {0}")]
    InvalidAddress(String),

    #[error("invalid URL: {0}")]
    InvalidUrl(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    const KEY_HEX: &str = "000102030405060708090a0b0c0d0e0f101112131415161718191a1b1c1d1e1f";

    fn load(vars: &[(&str, &str)]) -> Result<ServerConfig, ConfigError> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        ServerConfig::from_lookup(|key| map.get(key).cloned())
    }

    fn minimal() -> Vec<(&'static str, &'static str)> {
        vec![
            ("PIX_WEBHOOK_SECRET", "whsec_test_only_not_a_real_secret"),
            ("TOKEN_ENCRYPTION_KEY", KEY_HEX),
        ]
    }

    #[test]
    fn test_minimal_config_defaults() {
        let config = load(&minimal()).unwrap();
        assert_eq!(config.signature_header, "X-Webhook-Signature");
        assert_eq!(config.signature_encoding, SignatureEncoding::Hex);
        assert_eq!(config.token_ttls, TokenTtls::default());
        assert_eq!(config.port, 4030);
        assert_eq!(config.blocks_to_scan, 200);
        assert_eq!(config.retry, RetryPolicy::default());
        assert!(config.rpc_url.is_none());
        assert!(config.admin_emails.is_empty());
        assert!(config.metrics_token.is_none());
    }

    #[test]
    fn test_missing_secrets_are_fatal() {
        let err = load(&[("TOKEN_ENCRYPTION_KEY", KEY_HEX)]).unwrap_err();
        assert!(matches!(err, ConfigError::MissingRequired("PIX_WEBHOOK_SECRET")));

        let err = load(&[("PIX_WEBHOOK_SECRET", "x"), ("TOKEN_ENCRYPTION_KEY", "")]).unwrap_err();
        assert!(matches!(err, ConfigError::MissingRequired("TOKEN_ENCRYPTION_KEY")));
    }

    #[test]
    fn test_short_token_key_rejected() {
        let err = load(&[
            ("PIX_WEBHOOK_SECRET", "x"),
            ("TOKEN_ENCRYPTION_KEY", "deadbeef"),
        ])
        .unwrap_err();
        assert!(matches!(
            err,
            ConfigError::Invalid {
                var: "TOKEN_ENCRYPTION_KEY",
                ..
            }
        ));
    }

    #[test]
    fn test_unknown_signature_encoding_rejected() {
        let mut vars = minimal();
        vars.push(("PIX_WEBHOOK_SIGNATURE_ENCODING", "rot13"));
        assert!(load(&vars).is_err());
    }

    #[test]
    fn test_wildcard_origin_rejected() {
        let mut vars = minimal();
        vars.push(("ALLOWED_ORIGINS", "https://app.example.com, *"));
        assert!(load(&vars).is_err());
    }

    #[test]
    fn test_zero_ttl_rejected() {
        let mut vars = minimal();
        vars.push(("MAGIC_LINK_TTL_SECS", "0"));
        assert!(load(&vars).is_err());
    }

    #[test]
    fn test_admin_emails_normalized() {
        let emails = parse_admin_emails(" Ops@Example.com,ops@example.com , cfo@example.com").unwrap();
        assert_eq!(emails, vec!["ops@example.com", "cfo@example.com"]);
        assert!(parse_admin_emails("ops@example.com,not-an-email").is_err());
    }

    #[test]
    fn test_token_contracts_parsing() {
        let entries = parse_token_contracts(
            "USDC:0x833589fCD6eDb6E08f4c7C32D4f71b54bdA02913, 0xfde4C96c8593536E31F229EA8f37b2ADa2699bb2",
        )
        .unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].symbol.as_deref(), Some("USDC"));
        assert_eq!(entries[1].symbol, None);

        assert!(parse_token_contracts("USDC:0xnothex").is_err());
        assert!(parse_token_contracts(":0x833589fCD6eDb6E08f4c7C32D4f71b54bdA02913").is_err());
        assert!(parse_token_contracts(
            "A:0x833589fCD6eDb6E08f4c7C32D4f71b54bdA02913,B:0x833589fcd6edb6e08f4c7c32d4f71b54bda02913"
        )
        .is_err());
    }

    #[test]
    fn test_debug_redacts_secrets() {
        let mut vars = minimal();
        vars.push(("METRICS_TOKEN", "metrics-bearer-value"));
        vars.push(("RPC_URL", "https://rpc.example/v2/apikey123"));
        let rendered = format!("{:?}", load(&vars).unwrap());
        assert!(!rendered.contains("whsec_test_only"));
        assert!(!rendered.contains("metrics-bearer-value"));
        assert!(!rendered.contains("apikey123"));
        assert!(!rendered.contains("0001020304"));
        assert!(rendered.contains("[REDACTED]"));
    }

    #[test]
    fn test_retry_settings() {
        let mut vars = minimal();
        vars.push(("RPC_TIMEOUT_MS", "1500"));
        vars.push(("RPC_MAX_ATTEMPTS", "0"));
        let config = load(&vars).unwrap();
        assert_eq!(config.retry.call_timeout, Duration::from_millis(1500));
        assert_eq!(config.retry.max_attempts, 1);
    }

    #[test]
    fn test_malformed_numbers_are_fatal() {
        for (name, value) in [
            ("BLOCKS_TO_SCAN", "two hundred"),
            ("PORT", "80a"),
            ("PORT", "70000"),
            ("RATE_LIMIT_RPM", "-5"),
            ("RATE_LIMIT_RPM", "0"),
            ("RPC_MAX_ATTEMPTS", "three"),
            ("RPC_TIMEOUT_MS", "1.5s"),
            ("RPC_TIMEOUT_MS", "0"),
        ] {
            let mut vars = minimal();
            vars.push((name, value));
            match load(&vars) {
                Err(ConfigError::Invalid { var, .. }) => assert_eq!(var, name, "{name}={value}"),
                other => panic!("{name}={value} accepted: {other:?}"),
            }
        }
    }
}
