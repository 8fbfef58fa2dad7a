use anyhow::{Context, Result};
use clap::Parser;
use std::{env, str::FromStr};

/// Centralized application configuration.
/// Combines environment variables and CLI arguments.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub host: String,
    pub port: u16,
    pub storage_dir: String,
    pub database_url: String,
    /// Blob location served without decryption (seeded fixtures only).
    pub fixture_location: Option<String>,
    /// How often to sweep incomplete uploads; 0 disables the sweep.
    pub sweep_interval_secs: u64,
    /// Minimum age of a provisional record before the sweep reclaims it.
    pub provisional_grace_secs: u64,
}

/// Command-line + environment configuration.
#[derive(Parser, Debug)]
#[command(author, version, about = "Encrypted file vault with audit history")]
pub struct Args {
    /// Host to bind to (overrides FILE_VAULT_HOST)
    #[arg(long)]
    pub host: Option<String>,

    /// Port to bind to (overrides FILE_VAULT_PORT)
    #[arg(long)]
    pub port: Option<u16>,

    /// Directory where blobs are stored (overrides FILE_VAULT_STORAGE_DIR)
    #[arg(long)]
    pub storage_dir: Option<String>,

    /// Database URL (overrides FILE_VAULT_DATABASE_URL)
    #[arg(long)]
    pub database_url: Option<String>,

    /// Blob location to serve without decryption (overrides FILE_VAULT_FIXTURE_LOCATION)
    #[arg(long)]
    pub fixture_location: Option<String>,

    /// Seconds between incomplete-upload sweeps, 0 to disable (overrides FILE_VAULT_SWEEP_INTERVAL_SECS)
    #[arg(long)]
    pub sweep_interval_secs: Option<u64>,

    /// Seconds a provisional record may live before it is swept (overrides FILE_VAULT_PROVISIONAL_GRACE_SECS)
    #[arg(long)]
    pub provisional_grace_secs: Option<u64>,

    /// Run migrations and exit
    #[arg(long)]
    pub migrate: bool,
}

impl AppConfig {
    /// Parse environment variables + CLI args into AppConfig and migrate flag.
    pub fn from_env_and_args() -> Result<(Self, bool)> {
        let args = Args::parse();

        // --- Environment fallback ---
        let env_host = env::var("FILE_VAULT_HOST").unwrap_or_else(|_| "0.0.0.0".into());
        let env_port = env_number("FILE_VAULT_PORT", 3000)?;
        let env_storage =
            env::var("FILE_VAULT_STORAGE_DIR").unwrap_or_else(|_| "./data/blobs".into());
        let env_db = env::var("FILE_VAULT_DATABASE_URL")
            .unwrap_or_else(|_| "sqlite://./data/meta/file_vault.db".into());
        let env_fixture = env::var("FILE_VAULT_FIXTURE_LOCATION")
            .ok()
            .filter(|v| !v.is_empty());
        let env_sweep = env_number("FILE_VAULT_SWEEP_INTERVAL_SECS", 600)?;
        let env_grace = env_number("FILE_VAULT_PROVISIONAL_GRACE_SECS", 3600)?;

        // --- Merge ---
        let cfg = Self {
            host: args.host.unwrap_or(env_host),
            port: args.port.unwrap_or(env_port),
            storage_dir: args.storage_dir.unwrap_or(env_storage),
            database_url: args.database_url.unwrap_or(env_db),
            fixture_location: args.fixture_location.or(env_fixture),
            sweep_interval_secs: args.sweep_interval_secs.unwrap_or(env_sweep),
            provisional_grace_secs: args.provisional_grace_secs.unwrap_or(env_grace),
        };

        Ok((cfg, args.migrate))
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Read a numeric env var, falling back to `default` when it is unset.
fn env_number<T>(name: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match env::var(name) {
        Ok(value) => value
            .parse::<T>()
            .with_context(|| format!("parsing {} value `{}`", name, value)),
        Err(env::VarError::NotPresent) => Ok(default),
        Err(err) => Err(err).with_context(|| format!("reading {}", name)),
    }
}
