//! # Ledger Configuration
//!
//! Settings for one ledger instance.
//!
//! ## Configuration Sources
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    Configuration Priority                               │
//! │                                                                         │
//! │  1. Environment Variables (highest priority)                            │
//! │     STOCKLEDGER_DB_PATH=/var/lib/ledger.db                              │
//! │     STOCKLEDGER_STATUTORY_TAX_BPS=1500                                  │
//! │                                                                         │
//! │  2. TOML Config File                                                    │
//! │     ~/.config/ledger/ledger.toml (Linux)                                │
//! │     ~/Library/Application Support/com.stockledger.ledger/ledger.toml   │
//! │                                                                         │
//! │  3. Default Values (lowest priority)                                    │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Configuration File Format
//! ```toml
//! # ledger.toml
//! [database]
//! path = "stockledger.db"
//! max_connections = 5
//!
//! [accounting]
//! statutory_tax_rate_bps = 1500   # used for journal revenue/tax split
//! admin_tax_rate_bps = 1500       # rate the POS shows on receipts
//!
//! [concurrency]
//! max_attempts = 8
//! base_delay_ms = 5
//! max_delay_ms = 200
//!
//! [catalog]
//! cache_ttl_secs = 300
//! cache_max_capacity = 10000
//!
//! [reporting]
//! max_page_size = 200
//! ```
//!
//! ## Two Tax Rates
//! The journal always splits revenue and tax with the statutory rate. The
//! admin rate is whatever the POS is configured to print. They are loaded
//! separately and a divergence is logged at startup, never reconciled.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use tracing::{debug, info, warn};

use stockledger_core::types::TaxRate;

use crate::error::{DbError, DbResult};
use crate::pool::DbConfig;
use crate::retry::RetryPolicy;

// =============================================================================
// Sections
// =============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatabaseSettings {
    #[serde(default = "default_db_path")]
    pub path: PathBuf,

    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

fn default_db_path() -> PathBuf {
    PathBuf::from("stockledger.db")
}

fn default_max_connections() -> u32 {
    5
}

impl Default for DatabaseSettings {
    fn default() -> Self {
        DatabaseSettings {
            path: default_db_path(),
            max_connections: default_max_connections(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccountingSettings {
    /// Rate used by the journal generator, in basis points.
    #[serde(default = "default_tax_bps")]
    pub statutory_tax_rate_bps: u32,

    /// Rate the POS front end uses for displayed totals, in basis points.
    #[serde(default = "default_tax_bps")]
    pub admin_tax_rate_bps: u32,
}

fn default_tax_bps() -> u32 {
    1500
}

impl Default for AccountingSettings {
    fn default() -> Self {
        AccountingSettings {
            statutory_tax_rate_bps: default_tax_bps(),
            admin_tax_rate_bps: default_tax_bps(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConcurrencySettings {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    #[serde(default = "default_base_delay")]
    pub base_delay_ms: u64,

    #[serde(default = "default_max_delay")]
    pub max_delay_ms: u64,
}

fn default_max_attempts() -> u32 {
    8
}
fn default_base_delay() -> u64 {
    5
}
fn default_max_delay() -> u64 {
    200
}

impl Default for ConcurrencySettings {
    fn default() -> Self {
        ConcurrencySettings {
            max_attempts: default_max_attempts(),
            base_delay_ms: default_base_delay(),
            max_delay_ms: default_max_delay(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CatalogSettings {
    #[serde(default = "default_cache_ttl")]
    pub cache_ttl_secs: u64,

    #[serde(default = "default_cache_capacity")]
    pub cache_max_capacity: u64,
}

fn default_cache_ttl() -> u64 {
    300
}
fn default_cache_capacity() -> u64 {
    10_000
}

impl Default for CatalogSettings {
    fn default() -> Self {
        CatalogSettings {
            cache_ttl_secs: default_cache_ttl(),
            cache_max_capacity: default_cache_capacity(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportingSettings {
    #[serde(default = "default_max_page_size")]
    pub max_page_size: u32,
}

fn default_max_page_size() -> u32 {
    stockledger_core::MAX_PAGE_SIZE
}

impl Default for ReportingSettings {
    fn default() -> Self {
        ReportingSettings {
            max_page_size: default_max_page_size(),
        }
    }
}

// =============================================================================
// Ledger Configuration
// =============================================================================

/// Complete ledger configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LedgerConfig {
    #[serde(default)]
    pub database: DatabaseSettings,

    #[serde(default)]
    pub accounting: AccountingSettings,

    #[serde(default)]
    pub concurrency: ConcurrencySettings,

    #[serde(default)]
    pub catalog: CatalogSettings,

    #[serde(default)]
    pub reporting: ReportingSettings,
}

impl LedgerConfig {
    /// Loads configuration: defaults, then the TOML file (if present), then
    /// environment overrides, then validation.
    pub fn load(config_path: Option<PathBuf>) -> DbResult<Self> {
        let mut config = Self::default();

        if let Some(path) = config_path.or_else(Self::default_config_path) {
            if path.exists() {
                info!(?path, "Loading ledger config from file");
                let contents = std::fs::read_to_string(&path)
                    .map_err(|e| DbError::ConfigLoadFailed(e.to_string()))?;
                config = Self::from_toml(&contents)?;
            } else {
                debug!(?path, "Config file not found, using defaults");
            }
        }

        config.apply_overrides(|key| std::env::var(key).ok());
        config.validate()?;
        config.warn_on_tax_divergence();

        Ok(config)
    }

    /// Loads configuration or falls back to defaults.
    pub fn load_or_default(config_path: Option<PathBuf>) -> Self {
        Self::load(config_path).unwrap_or_else(|e| {
            warn!("Failed to load ledger config: {}. Using defaults.", e);
            Self::default()
        })
    }

    pub fn from_toml(contents: &str) -> DbResult<Self> {
        toml::from_str(contents).map_err(|e| DbError::ConfigLoadFailed(e.to_string()))
    }

    pub fn validate(&self) -> DbResult<()> {
        for (name, bps) in [
            ("statutory_tax_rate_bps", self.accounting.statutory_tax_rate_bps),
            ("admin_tax_rate_bps", self.accounting.admin_tax_rate_bps),
        ] {
            if bps > 10_000 {
                return Err(DbError::InvalidConfig(format!(
                    "{} must be at most 10000, got {}",
                    name, bps
                )));
            }
        }

        if self.concurrency.max_attempts == 0 {
            return Err(DbError::InvalidConfig(
                "max_attempts must be greater than 0".into(),
            ));
        }

        if self.concurrency.base_delay_ms > self.concurrency.max_delay_ms {
            return Err(DbError::InvalidConfig(
                "base_delay_ms must not exceed max_delay_ms".into(),
            ));
        }

        if self.reporting.max_page_size == 0 {
            return Err(DbError::InvalidConfig(
                "max_page_size must be greater than 0".into(),
            ));
        }

        if self.database.max_connections == 0 {
            return Err(DbError::InvalidConfig(
                "max_connections must be greater than 0".into(),
            ));
        }

        Ok(())
    }

    /// Applies overrides from a key lookup (the process environment in
    /// [`Self::load`]).
    pub fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(path) = lookup("STOCKLEDGER_DB_PATH") {
            debug!(path = %path, "Overriding database path from environment");
            self.database.path = PathBuf::from(path);
        }

        if let Some(raw) = lookup("STOCKLEDGER_STATUTORY_TAX_BPS") {
            match raw.parse::<u32>() {
                Ok(bps) => self.accounting.statutory_tax_rate_bps = bps,
                Err(_) => warn!(value = %raw, "Ignoring unparseable STOCKLEDGER_STATUTORY_TAX_BPS"),
            }
        }

        if let Some(raw) = lookup("STOCKLEDGER_ADMIN_TAX_BPS") {
            match raw.parse::<u32>() {
                Ok(bps) => self.accounting.admin_tax_rate_bps = bps,
                Err(_) => warn!(value = %raw, "Ignoring unparseable STOCKLEDGER_ADMIN_TAX_BPS"),
            }
        }

        if let Some(raw) = lookup("STOCKLEDGER_MAX_ATTEMPTS") {
            if let Ok(n) = raw.parse::<u32>() {
                debug!(max_attempts = n, "Overriding retry limit from environment");
                self.concurrency.max_attempts = n;
            }
        }
    }

    fn default_config_path() -> Option<PathBuf> {
        directories::ProjectDirs::from("com", "stockledger", "ledger")
            .map(|dirs| dirs.config_dir().join("ledger.toml"))
    }

    // =========================================================================
    // Convenience Methods
    // =========================================================================

    pub fn statutory_tax_rate(&self) -> TaxRate {
        TaxRate::from_bps(self.accounting.statutory_tax_rate_bps)
    }

    pub fn admin_tax_rate(&self) -> TaxRate {
        TaxRate::from_bps(self.accounting.admin_tax_rate_bps)
    }

    /// `Some((statutory, admin))` when the two rates differ.
    pub fn tax_rate_divergence(&self) -> Option<(TaxRate, TaxRate)> {
        let statutory = self.statutory_tax_rate();
        let admin = self.admin_tax_rate();
        (statutory != admin).then_some((statutory, admin))
    }

    fn warn_on_tax_divergence(&self) {
        if let Some((statutory, admin)) = self.tax_rate_divergence() {
            warn!(
                statutory_bps = statutory.bps(),
                admin_bps = admin.bps(),
                "Statutory and admin tax rates differ; journal tax lines will not match receipts"
            );
        }
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.concurrency.max_attempts,
            Duration::from_millis(self.concurrency.base_delay_ms),
            Duration::from_millis(self.concurrency.max_delay_ms),
        )
    }

    /// Pool and ledger settings for [`crate::Database::new`].
    pub fn db_config(&self) -> DbConfig {
        DbConfig::new(self.database.path.clone())
            .max_connections(self.database.max_connections)
            .statutory_tax_rate(self.statutory_tax_rate())
            .retry_policy(self.retry_policy())
            .catalog_cache(
                Duration::from_secs(self.catalog.cache_ttl_secs),
                self.catalog.cache_max_capacity,
            )
            .max_page_size(self.reporting.max_page_size)
    }
}
