use anyhow::{Context, Result};
use clap::Parser;
use std::{env, fmt, str::FromStr};

/// Centralized application configuration.
/// Combines environment variables and CLI arguments.
#[derive(Clone)]
pub struct AppConfig {
    pub host: String,
    pub port: u16,
    pub database_url: String,
    /// Raw `STORAGE_CIPHER_KEY` value; parsed by `Cipher::from_config`.
    pub cipher_key: Option<String>,
    pub admin_token: Option<String>,
    pub reconcile_workers: usize,
}

/// Command-line + environment configuration.
#[derive(Parser, Debug)]
#[command(author, version, about = "Multi-tenant storage gateway")]
pub struct Args {
    /// Host to bind to (overrides GATEWAY_HOST)
    #[arg(long)]
    pub host: Option<String>,

    /// Port to bind to (overrides GATEWAY_PORT)
    #[arg(long)]
    pub port: Option<u16>,

    /// Database URL (overrides GATEWAY_DATABASE_URL)
    #[arg(long)]
    pub database_url: Option<String>,

    /// 32-byte AES key, raw or `base64:<...>` (overrides STORAGE_CIPHER_KEY)
    #[arg(long)]
    pub cipher_key: Option<String>,

    /// Shared secret required in `X-Admin-Token` (overrides GATEWAY_ADMIN_TOKEN)
    #[arg(long)]
    pub admin_token: Option<String>,

    /// Concurrent reconciliation runs (overrides GATEWAY_RECONCILE_WORKERS)
    #[arg(long)]
    pub reconcile_workers: Option<usize>,

    /// Run migrations and exit
    #[arg(long)]
    pub migrate: bool,
}

impl AppConfig {
    /// Parse environment variables + CLI args into AppConfig and migrate flag.
    pub fn from_env_and_args() -> Result<(Self, bool)> {
        let args = Args::parse();
        let migrate = args.migrate;
        Ok((Self::merge(args)?, migrate))
    }

    /// Merge parsed flags over the environment.
    pub fn merge(args: Args) -> Result<Self> {
        // --- Environment fallback ---
        let env_host = env::var("GATEWAY_HOST").unwrap_or_else(|_| "0.0.0.0".into());
        let env_port = env_parse("GATEWAY_PORT", 8082u16)?;
        let env_db = env::var("GATEWAY_DATABASE_URL")
            .unwrap_or_else(|_| "sqlite://./data/meta/gateway.db".into());
        let env_workers = env_parse("GATEWAY_RECONCILE_WORKERS", 2usize)?;

        // --- Merge ---
        Ok(Self {
            host: args.host.unwrap_or(env_host),
            port: args.port.unwrap_or(env_port),
            database_url: args.database_url.unwrap_or(env_db),
            cipher_key: args.cipher_key.or_else(|| non_empty_env("STORAGE_CIPHER_KEY")),
            admin_token: args.admin_token.or_else(|| non_empty_env("GATEWAY_ADMIN_TOKEN")),
            reconcile_workers: args.reconcile_workers.unwrap_or(env_workers).max(1),
        })
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl fmt::Debug for AppConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AppConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("database_url", &self.database_url)
            .field("cipher_key", &self.cipher_key.as_ref().map(|_| "<redacted>"))
            .field("admin_token", &self.admin_token.as_ref().map(|_| "<redacted>"))
            .field("reconcile_workers", &self.reconcile_workers)
            .finish()
    }
}

fn non_empty_env(name: &str) -> Option<String> {
    env::var(name).ok().filter(|v| !v.is_empty())
}

fn env_parse<T>(name: &str, default: T) -> Result<T>
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
