//! Command line and environment configuration
//!
//! Every flag can also be set through a `DHTLOG_*` environment variable,
//! including from a `.env` file in the working directory.

use std::fmt;
use std::net::IpAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, ValueEnum};
use dhtlog_connectors::mqtt::DEFAULT_TOPIC;
use dhtlog_connectors::{HttpConfig, MqttConfig};
use dhtlog_core::{Source, SourceRegistry};
use dhtlog_store::{MeasurementStore, MemoryStore, SqliteConfig, SqliteStore, DEFAULT_MAX_BUCKET_COUNT};

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum StorageBackend {
    /// Durable SQLite database
    Sqlite,
    /// In-process only; lost on exit
    Memory,
}

#[derive(Parser, Clone)]
#[clap(version = dhtlog_core::VERSION, about = "DHT sensor logger and chart backend")]
pub struct Config {
    /// File path for SQLite
    #[clap(long, env = "DHTLOG_DB_PATH", default_value = "dht.db")]
    pub db_path: PathBuf,

    /// Storage backend
    #[clap(long, env = "DHTLOG_STORAGE", value_enum, default_value = "sqlite")]
    pub storage: StorageBackend,

    /// Read-only SQLite connections serving queries
    #[clap(long, env = "DHTLOG_READER_CONNECTIONS", default_value = "4")]
    pub reader_connections: usize,

    /// Host interface to bind to
    #[clap(long, env = "DHTLOG_HTTP_INTERFACE", default_value = "0.0.0.0")]
    pub http_interface: IpAddr,

    /// Host port the HTTP service binds to
    #[clap(long, env = "DHTLOG_HTTP_PORT", default_value = "8000")]
    pub http_port: u16,

    #[clap(long, env = "DHTLOG_MQTT_HOST", default_value = "localhost")]
    pub mqtt_host: String,

    #[clap(long, env = "DHTLOG_MQTT_PORT", default_value = "1883")]
    pub mqtt_port: u16,

    #[clap(long, env = "DHTLOG_MQTT_TOPIC", default_value = DEFAULT_TOPIC)]
    pub mqtt_topic: String,

    #[clap(long, env = "DHTLOG_MQTT_CLIENT_ID", default_value = "dhtlog")]
    pub mqtt_client_id: String,

    #[clap(long, env = "DHTLOG_MQTT_KEEP_ALIVE_SECS", default_value = "60")]
    pub mqtt_keep_alive_secs: u64,

    /// Known source as HOST=ALIAS; repeat for each node. Defaults to
    /// 10.0.0.32=in and 10.0.0.31=out
    #[clap(long = "source", env = "DHTLOG_SOURCES", value_delimiter = ',')]
    pub sources: Vec<Source>,

    /// Largest bucket count a query may ask for
    #[clap(long, env = "DHTLOG_MAX_BUCKET_COUNT", default_value_t = DEFAULT_MAX_BUCKET_COUNT)]
    pub max_bucket_count: usize,

    /// Upper bound on one aggregation query
    #[clap(long, env = "DHTLOG_QUERY_TIMEOUT_SECS", default_value = "10")]
    pub query_timeout_secs: u64,
}

impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Config")
            .field("storage", &self.storage)
            .field("db_path", &self.db_path)
            .field("http", &(self.http_interface, self.http_port))
            .field("mqtt", &format!("{}:{}/{}", self.mqtt_host, self.mqtt_port, self.mqtt_topic))
            .field("sources", &self.sources.len())
            .finish()
    }
}

impl Config {
    pub fn registry(&self) -> SourceRegistry {
        if self.sources.is_empty() {
            return SourceRegistry::default();
        }
        let mut registry = SourceRegistry::new(Vec::new());
        for source in &self.sources {
            registry.add_source(source.clone());
        }
        registry
    }

    pub fn http_config(&self) -> HttpConfig {
        HttpConfig::new()
            .with_interface(self.http_interface)
            .with_port(self.http_port)
            .with_query_timeout(Duration::from_secs(self.query_timeout_secs))
    }

    pub fn mqtt_config(&self) -> MqttConfig {
        MqttConfig::new(&self.mqtt_host)
            .with_port(self.mqtt_port)
            .with_topic(&self.mqtt_topic)
            .with_client_id(&self.mqtt_client_id)
            .with_keep_alive(Duration::from_secs(self.mqtt_keep_alive_secs))
    }

    pub fn open_store(&self) -> anyhow::Result<Arc<dyn MeasurementStore>> {
        match self.storage {
            StorageBackend::Sqlite => {
                let config = SqliteConfig::new(&self.db_path)
                    .reader_connections(self.reader_connections);
                let store = SqliteStore::open(&config)
                    .with_context(|| format!("opening {}", self.db_path.display()))?;
                Ok(Arc::new(store))
            }
            StorageBackend::Memory => {
                log::warn!("using in-memory storage; readings are lost on exit");
                Ok(Arc::new(MemoryStore::new()))
            }
        }
    }
}
