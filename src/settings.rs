use std::{net::SocketAddr, path::Path, time::Duration};

use clap::Parser;
use config::{builder::DefaultState, ConfigBuilder, ConfigError, Environment, File};
use reqwest::Url;
use serde::Deserialize;

use crate::cache::CachePolicy;

const DEFAULT_ADDR: &str = "127.0.0.1:8000";

#[derive(Parser, Debug)]
#[command(version)]
pub(crate) struct Args {
    /// Path to the local configuration TOML file.
    #[arg(short, value_name = "CONFIG_PATH")]
    pub(crate) config: std::path::PathBuf,

    /// Path to the certificate file. Serves HTTPS together with `--key`.
    #[arg(long, value_name = "CERT_PATH", requires = "key")]
    pub(crate) cert: Option<std::path::PathBuf>,

    /// Path to the key file.
    #[arg(long, value_name = "KEY_PATH", requires = "cert")]
    pub(crate) key: Option<std::path::PathBuf>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct Web {
    #[serde(deserialize_with = "deserialize_socket_addr")]
    pub(crate) address: SocketAddr,
}

/// Connection to the Snowflake SQL API.
#[derive(Clone, Debug, Deserialize)]
pub(crate) struct WarehouseSettings {
    pub(crate) account: String,
    /// Overrides the URL derived from `account`.
    pub(crate) endpoint: Option<String>,
    pub(crate) token: String,
    pub(crate) token_type: String,
    pub(crate) warehouse: String,
    pub(crate) database: String,
    pub(crate) schema: String,
    pub(crate) role: Option<String>,
    pub(crate) timeout_secs: u64,
}

impl WarehouseSettings {
    pub(crate) fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

#[derive(Clone, Debug, Deserialize)]
pub(crate) struct SearchSettings {
    pub(crate) endpoint: String,
    pub(crate) api_key: String,
    /// Value of the API's `v` version-date parameter.
    pub(crate) version_date: String,
    /// Search configuration label to query (`PRODUCTION` or `STAGING`).
    pub(crate) config_label: String,
    pub(crate) locale: String,
    pub(crate) timeout_secs: u64,
}

impl SearchSettings {
    pub(crate) fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// Values the dashboard starts from when the URL names none.
#[derive(Clone, Debug, Deserialize)]
pub(crate) struct Defaults {
    pub(crate) business_id: u64,
    pub(crate) experience_key: String,
    /// Base URL of the hosted product, used for breadcrumb and entity links.
    #[serde(deserialize_with = "deserialize_url")]
    pub(crate) platform_url: Url,
}

#[derive(Debug, Deserialize)]
pub(crate) struct Settings {
    pub(crate) web: Web,
    pub(crate) warehouse: WarehouseSettings,
    pub(crate) search: SearchSettings,
    pub(crate) cache: CachePolicy,
    pub(crate) defaults: Defaults,
}

impl Settings {
    /// Load settings from the given TOML file, with sane defaults.
    ///
    /// Secrets may also come from `DASHBOARD__`-prefixed environment
    /// variables, e.g. `DASHBOARD__WAREHOUSE__TOKEN`.
    pub(crate) fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let builder = ConfigBuilder::<DefaultState>::default()
            .set_default("web.address", DEFAULT_ADDR)?
            .set_default("warehouse.token_type", "PROGRAMMATIC_ACCESS_TOKEN")?
            .set_default("warehouse.warehouse", "HUMAN_WH")?
            .set_default("warehouse.database", "PROD_ANSWERS")?
            .set_default("warehouse.schema", "PUBLIC")?
            .set_default("warehouse.timeout_secs", 60)?
            .set_default("search.endpoint", "https://liveapi.yext.com")?
            .set_default("search.version_date", "20220511")?
            .set_default("search.config_label", "PRODUCTION")?
            .set_default("search.locale", "en")?
            .set_default("search.timeout_secs", 15)?
            .set_default("cache.ttl_secs", 600)?
            .set_default("cache.max_entries", 1000)?
            .set_default("defaults.platform_url", "https://www.yext.com")?;

        let cfg = builder
            .add_source(File::from(path))
            .add_source(
                Environment::with_prefix("DASHBOARD")
                    .prefix_separator("__")
                    .separator("__"),
            )
            .build()?;

        cfg.try_deserialize()
    }
}

fn deserialize_socket_addr<'de, D>(deserializer: D) -> Result<SocketAddr, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let s = String::deserialize(deserializer)?;
    s.parse().map_err(serde::de::Error::custom)
}

fn deserialize_url<'de, D>(deserializer: D) -> Result<Url, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let s = String::deserialize(deserializer)?;
    Url::parse(&s).map_err(serde::de::Error::custom)
}
