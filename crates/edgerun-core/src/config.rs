//! Environment-driven configuration, loaded once at startup.

use std::env;

/// Runtime configuration for the edgerun core. Every field has a documented
/// default so the process can start without any environment variables set.
#[derive(Debug, Clone)]
pub struct Config {
    pub metadata_database_url: String,
    pub queue_database_url: String,
    pub main_port: u16,
    pub jwt_secret: String,
    pub function_execution_timeout_ms: u64,
    pub scheduler_poll_interval_ms: u64,
    pub scheduler_max_workers: usize,
    pub sandbox_runtime_command: String,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        let jwt_secret = env::var("JWT_SECRET").unwrap_or_else(|_| {
            let generated = generate_random_secret();
            tracing::warn!("JWT_SECRET not set; generated an ephemeral value for this process");
            generated
        });

        let config = Config {
            metadata_database_url: env::var("METADATA_DATABASE_URL")
                .unwrap_or_else(|_| "sqlite://metadata.db".to_string()),
            queue_database_url: env::var("QUEUE_DATABASE_URL")
                .unwrap_or_else(|_| "sqlite://queue.db".to_string()),
            main_port: env::var("MAIN_PORT")
                .or_else(|_| env::var("PORT"))
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(8080),
            jwt_secret,
            function_execution_timeout_ms: env::var("FUNCTION_EXECUTION_TIMEOUT_MS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(30_000),
            scheduler_poll_interval_ms: env::var("SCHEDULER_POLL_INTERVAL_MS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(200),
            scheduler_max_workers: env::var("SCHEDULER_MAX_WORKERS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(4),
            sandbox_runtime_command: env::var("SANDBOX_RUNTIME_COMMAND")
                .unwrap_or_else(|_| "node".to_string()),
        };

        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> anyhow::Result<()> {
        if self.scheduler_max_workers == 0 {
            anyhow::bail!("SCHEDULER_MAX_WORKERS must be at least 1");
        }
        if self.function_execution_timeout_ms == 0 {
            anyhow::bail!("FUNCTION_EXECUTION_TIMEOUT_MS must be greater than 0");
        }
        Ok(())
    }
}

fn generate_random_secret() -> String {
    use rand::Rng;
    let mut rng = rand::rng();
    (0..32)
        .map(|_| rng.sample(rand::distr::Alphanumeric) as char)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_zero_workers() {
        let mut config = Config {
            metadata_database_url: "sqlite::memory:".to_string(),
            queue_database_url: "sqlite::memory:".to_string(),
            main_port: 8080,
            jwt_secret: "test".to_string(),
            function_execution_timeout_ms: 30_000,
            scheduler_poll_interval_ms: 200,
            scheduler_max_workers: 0,
            sandbox_runtime_command: "node".to_string(),
        };
        assert!(config.validate().is_err());
        config.scheduler_max_workers = 1;
        assert!(config.validate().is_ok());
    }
}
