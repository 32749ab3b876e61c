use std::fmt::Display;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;

use anyhow::{anyhow, Context};

pub const DEV_JWT_SECRET: &str = "dev-insecure-secret-change-me";
pub const DEFAULT_PUBLIC_BASE_URL: &str = "https://app.jyada.in";

/// Read `key` from the environment, falling back to `default` when unset.
pub fn env_or<T>(key: &str, default: &str) -> anyhow::Result<T>
where
    T: FromStr,
    T::Err: Display,
{
    let raw = std::env::var(key).unwrap_or_else(|_| default.to_string());
    raw.parse()
        .map_err(|e| anyhow!("{e}"))
        .with_context(|| format!("invalid {key}: {raw:?}"))
}

pub fn jwt_secret_from_env() -> String {
    match std::env::var("SAATHI_JWT_SECRET") {
        Ok(secret) if !secret.trim().is_empty() => secret,
        _ => {
            log::warn!("SAATHI_JWT_SECRET not set, using the development secret");
            DEV_JWT_SECRET.to_string()
        }
    }
}

#[derive(Debug, Clone)]
pub struct ApiConfig {
    pub listen: SocketAddr,
    pub db_path: PathBuf,
    pub jwt_secret: String,
    /// Prefix of the URL encoded in printed QR tags.
    pub public_base_url: String,
    /// Pins every issued OTP to this value (development only).
    pub fixed_otp: Option<String>,
}

impl ApiConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        let fixed_otp = std::env::var("SAATHI_FIXED_OTP")
            .ok()
            .filter(|otp| !otp.is_empty());
        if let Some(otp) = &fixed_otp {
            if otp.len() != 6 || !otp.chars().all(|c| c.is_ascii_digit()) {
                anyhow::bail!("invalid SAATHI_FIXED_OTP (expected six digits)");
            }
            log::warn!("SAATHI_FIXED_OTP is set; every OTP will be {otp}");
        }

        Ok(Self {
            listen: env_or("SAATHI_API_LISTEN", "0.0.0.0:3000")?,
            db_path: env_or("SAATHI_DB_PATH", "saathi.db")?,
            jwt_secret: jwt_secret_from_env(),
            public_base_url: env_or::<String>("SAATHI_PUBLIC_BASE_URL", DEFAULT_PUBLIC_BASE_URL)?
                .trim_end_matches('/')
                .to_string(),
            fixed_otp,
        })
    }

    /// Page a QR tag resolves to when scanned.
    pub fn member_url(&self, qr_id: i64) -> String {
        format!("{}/member-details/{qr_id}", self.public_base_url)
    }
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            listen: SocketAddr::from(([0, 0, 0, 0], 3000)),
            db_path: PathBuf::from("saathi.db"),
            jwt_secret: DEV_JWT_SECRET.to_string(),
            public_base_url: DEFAULT_PUBLIC_BASE_URL.to_string(),
            fixed_otp: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use k9::assert_equal;

    #[test]
    fn env_or_uses_default_when_unset() {
        let port: u16 = env_or("SAATHI_TEST_UNSET_PORT", "9090").unwrap();
        assert_equal!(port, 9090);
    }

    #[test]
    fn env_or_reports_bad_values() {
        let err = env_or::<u16>("SAATHI_TEST_UNSET_PORT_2", "not-a-port").unwrap_err();
        assert!(err.to_string().contains("SAATHI_TEST_UNSET_PORT_2"));
    }

    #[test]
    fn member_url_uses_base() {
        let config = ApiConfig::default();
        assert_equal!(config.member_url(12), "https://app.jyada.in/member-details/12");
    }
}
