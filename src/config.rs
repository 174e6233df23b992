use std::{env, str::FromStr};

use anyhow::{Context, bail};
use rust_decimal::Decimal;

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub database_url: String,
    pub host: String,
    pub port: u16,
    pub jwt_secret: String,
    pub shipping_flat_fee: Decimal,
    pub cart_cookie_secure: bool,
}

impl AppConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> anyhow::Result<Self> {
        let database_url = lookup("DATABASE_URL").context("DATABASE_URL is not set")?;
        let jwt_secret = lookup("JWT_SECRET").context("JWT_SECRET is not set")?;
        let host = lookup("APP_HOST").unwrap_or_else(|| "127.0.0.1".to_string());
        let port = lookup("APP_PORT")
            .and_then(|p| p.parse::<u16>().ok())
            .unwrap_or(3000);

        let shipping_flat_fee = match lookup("SHIPPING_FLAT_FEE") {
            Some(raw) => Decimal::from_str(raw.trim())
                .with_context(|| format!("SHIPPING_FLAT_FEE is not a decimal: {raw}"))?,
            None => Decimal::new(500, 2),
        };
        if shipping_flat_fee.is_sign_negative() {
            bail!("SHIPPING_FLAT_FEE must not be negative");
        }

        let cart_cookie_secure = lookup("CART_COOKIE_SECURE")
            .map(|v| matches!(v.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes"))
            .unwrap_or(false);

        Ok(Self {
            port,
            database_url,
            host,
            jwt_secret,
            shipping_flat_fee,
            cart_cookie_secure,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use std::collections::HashMap;

    fn config_from(pairs: &[(&str, &str)]) -> anyhow::Result<AppConfig> {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        AppConfig::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn applies_defaults() {
        let config = config_from(&[("DATABASE_URL", "postgres://x"), ("JWT_SECRET", "s")]).unwrap();
        assert_eq!(config.host, "127.0.0.1");
        assert_eq!(config.port, 3000);
        assert_eq!(config.shipping_flat_fee, dec!(5.00));
        assert!(!config.cart_cookie_secure);
    }

    #[test]
    fn reads_overrides() {
        let config = config_from(&[
            ("DATABASE_URL", "postgres://x"),
            ("JWT_SECRET", "s"),
            ("APP_PORT", "8080"),
            ("SHIPPING_FLAT_FEE", "7.25"),
            ("CART_COOKIE_SECURE", "true"),
        ])
        .unwrap();
        assert_eq!(config.port, 8080);
        assert_eq!(config.shipping_flat_fee, dec!(7.25));
        assert!(config.cart_cookie_secure);
    }

    #[test]
    fn rejects_bad_shipping_fee() {
        let base = [("DATABASE_URL", "postgres://x"), ("JWT_SECRET", "s")];
        let mut negative = base.to_vec();
        negative.push(("SHIPPING_FLAT_FEE", "-1"));
        assert!(config_from(&negative).is_err());

        let mut garbage = base.to_vec();
        garbage.push(("SHIPPING_FLAT_FEE", "five"));
        assert!(config_from(&garbage).is_err());
    }

    #[test]
    fn requires_database_url_and_secret() {
        assert!(config_from(&[("JWT_SECRET", "s")]).is_err());
        assert!(config_from(&[("DATABASE_URL", "postgres://x")]).is_err());
    }
}
