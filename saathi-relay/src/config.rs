use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use saathi_auth::config::{env_or, jwt_secret_from_env, DEV_JWT_SECRET};

pub const DEFAULT_SWEEP_SECS: u64 = 30;
pub const DEFAULT_CHANNEL_BUFFER: usize = 256;

#[derive(Debug, Clone)]
pub struct RelayConfig {
    pub listen: SocketAddr,
    pub db_path: PathBuf,
    pub jwt_secret: String,
    /// Period of the full-roster refresh.
    pub sweep_interval: Duration,
    /// Capacity of each connection's outbound queue.
    pub channel_buffer: usize,
}

impl RelayConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        let sweep_secs: u64 = env_or("SAATHI_RELAY_SWEEP_SECS", &DEFAULT_SWEEP_SECS.to_string())?;
        if sweep_secs == 0 {
            anyhow::bail!("SAATHI_RELAY_SWEEP_SECS must be at least 1");
        }
        let channel_buffer: usize = env_or(
            "SAATHI_RELAY_CHANNEL_BUFFER",
            &DEFAULT_CHANNEL_BUFFER.to_string(),
        )?;
        if channel_buffer == 0 {
            anyhow::bail!("SAATHI_RELAY_CHANNEL_BUFFER must be at least 1");
        }

        Ok(Self {
            listen: env_or("SAATHI_RELAY_LISTEN", "0.0.0.0:9090")?,
            db_path: env_or("SAATHI_DB_PATH", "saathi.db")?,
            jwt_secret: jwt_secret_from_env(),
            sweep_interval: Duration::from_secs(sweep_secs),
            channel_buffer,
        })
    }
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            listen: SocketAddr::from(([0, 0, 0, 0], 9090)),
            db_path: PathBuf::from("saathi.db"),
            jwt_secret: DEV_JWT_SECRET.to_string(),
            sweep_interval: Duration::from_secs(DEFAULT_SWEEP_SECS),
            channel_buffer: DEFAULT_CHANNEL_BUFFER,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use k9::assert_equal;

    #[test]
    fn defaults_match_documented_values() {
        let config = RelayConfig::default();
        assert_equal!(config.listen.port(), 9090);
        assert_equal!(config.sweep_interval, Duration::from_secs(30));
        assert_equal!(config.channel_buffer, 256);
    }
}
