use anyhow::{Context, Result};
use clap::Parser;
use std::env;

/// Default virtual host suffix for account-scoped storage endpoints
/// (Cloudflare R2 style `https://{account}.{host}`).
const DEFAULT_STORAGE_HOST: &str = "r2.cloudflarestorage.com";

/// Centralized application configuration.
/// Combines environment variables and CLI arguments.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub host: String,
    pub port: u16,
    pub spool_dir: String,
    pub database_url: String,
    pub storage: StorageConfig,
}

/// Everything needed to locate objects in the S3-compatible bucket.
///
/// All fields are optional on purpose: the resolver degrades gracefully when
/// only a subset is configured (e.g. public reads without credentials), and
/// the upload/delete paths refuse to run without credentials.
#[derive(Clone, Default)]
pub struct StorageConfig {
    /// Bucket name.
    pub bucket: Option<String>,
    /// Account identifier used to derive the storage endpoint.
    pub account_id: Option<String>,
    /// Virtual host suffix combined with `account_id` (R2 by default).
    pub storage_host: String,
    /// Explicit endpoint override (takes precedence over account derivation;
    /// used for Storj or self-hosted gateways).
    pub endpoint: Option<String>,
    /// Region passed to the S3 client ("auto" works for R2).
    pub region: String,
    pub access_key_id: Option<String>,
    pub secret_access_key: Option<String>,
    /// Optional public base URL (CDN / custom domain) tried first by the
    /// resolver and embedded in descriptor URLs.
    pub public_base_url: Option<String>,
}

/// Command-line + environment configuration.
#[derive(Parser, Debug)]
#[command(author, version, about = "Note attachment upload relay and resolver proxy")]
pub struct Args {
    /// Host to bind to (overrides ATTACHMENT_RELAY_HOST)
    #[arg(long)]
    pub host: Option<String>,

    /// Port to bind to (overrides ATTACHMENT_RELAY_PORT)
    #[arg(long)]
    pub port: Option<u16>,

    /// Directory for multipart spool files (overrides ATTACHMENT_RELAY_SPOOL_DIR)
    #[arg(long)]
    pub spool_dir: Option<String>,

    /// Database URL (overrides ATTACHMENT_RELAY_DATABASE_URL)
    #[arg(long)]
    pub database_url: Option<String>,

    /// Run migrations and exit
    #[arg(long)]
    pub migrate: bool,
}

impl AppConfig {
    /// Parse environment variables + CLI args into AppConfig and migrate flag.
    pub fn from_env_and_args() -> Result<(Self, bool)> {
        // Parse CLI once
        let args = Args::parse();

        // --- Environment fallback ---
        let env_host = env::var("ATTACHMENT_RELAY_HOST").unwrap_or_else(|_| "0.0.0.0".into());
        let env_port = match env::var("ATTACHMENT_RELAY_PORT") {
            Ok(value) => value
                .parse::<u16>()
                .with_context(|| format!("parsing ATTACHMENT_RELAY_PORT value `{}`", value))?,
            Err(env::VarError::NotPresent) => 3000,
            Err(err) => return Err(err).context("reading ATTACHMENT_RELAY_PORT"),
        };
        let env_spool =
            env::var("ATTACHMENT_RELAY_SPOOL_DIR").unwrap_or_else(|_| "./data/spool".into());
        let env_db = env::var("ATTACHMENT_RELAY_DATABASE_URL")
            .unwrap_or_else(|_| "sqlite://./data/meta/notes.db".into());

        // --- Merge ---
        let cfg = Self {
            host: args.host.unwrap_or(env_host),
            port: args.port.unwrap_or(env_port),
            spool_dir: args.spool_dir.unwrap_or(env_spool),
            database_url: args.database_url.unwrap_or(env_db),
            storage: StorageConfig::from_env(),
        };

        Ok((cfg, args.migrate))
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl StorageConfig {
    /// Read the storage surface from the environment. Empty values are
    /// treated the same as unset ones so a blank `.env` line cannot produce a
    /// bogus candidate URL.
    pub fn from_env() -> Self {
        Self {
            bucket: non_empty_env("ATTACHMENT_RELAY_BUCKET"),
            account_id: non_empty_env("ATTACHMENT_RELAY_ACCOUNT_ID"),
            storage_host: non_empty_env("ATTACHMENT_RELAY_STORAGE_HOST")
                .unwrap_or_else(|| DEFAULT_STORAGE_HOST.into()),
            endpoint: non_empty_env("ATTACHMENT_RELAY_ENDPOINT"),
            region: non_empty_env("ATTACHMENT_RELAY_REGION").unwrap_or_else(|| "auto".into()),
            access_key_id: non_empty_env("ATTACHMENT_RELAY_ACCESS_KEY_ID"),
            secret_access_key: non_empty_env("ATTACHMENT_RELAY_SECRET_ACCESS_KEY"),
            public_base_url: non_empty_env("ATTACHMENT_RELAY_PUBLIC_URL"),
        }
    }

    /// The endpoint used for authenticated bucket access and for the
    /// account-derived resolver candidates: the explicit override when
    /// configured, else `https://{account}.{storage_host}`.
    pub fn endpoint_url(&self) -> Option<String> {
        if let Some(endpoint) = &self.endpoint {
            return Some(endpoint.trim_end_matches('/').to_string());
        }
        self.account_id
            .as_ref()
            .map(|account| format!("https://{}.{}", account, self.storage_host))
    }

    /// Configured public base URL with any trailing slash removed.
    pub fn public_base(&self) -> Option<String> {
        self.public_base_url
            .as_ref()
            .map(|base| base.trim_end_matches('/').to_string())
    }

    /// True when authenticated bucket operations (upload, delete, GetObject
    /// fallback) can be attempted at all.
    pub fn has_credentials(&self) -> bool {
        self.access_key_id.is_some()
            && self.secret_access_key.is_some()
            && self.bucket.is_some()
            && self.endpoint_url().is_some()
    }
}

// Credentials must never reach the startup log line.
impl std::fmt::Debug for StorageConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StorageConfig")
            .field("bucket", &self.bucket)
            .field("account_id", &self.account_id)
            .field("storage_host", &self.storage_host)
            .field("endpoint", &self.endpoint)
            .field("region", &self.region)
            .field("access_key_id", &self.access_key_id.as_deref().map(|_| "***"))
            .field(
                "secret_access_key",
                &self.secret_access_key.as_deref().map(|_| "***"),
            )
            .field("public_base_url", &self.public_base_url)
            .finish()
    }
}

fn non_empty_env(key: &str) -> Option<String> {
    env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}
