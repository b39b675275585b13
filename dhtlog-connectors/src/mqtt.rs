//! MQTT subscriber
//!
//! Receives sensor payloads from a broker and feeds them to the
//! [`IngestionAdapter`]. The subscriber owns the only write path into the
//! store, so inserts are naturally serialized.
//!
//! ## Connection lifecycle
//!
//! ```text
//! poll ──ConnAck──▶ subscribe(topic) ──full queue──▶ retry after reconnect_delay
//!      ──Publish──▶ adapter.handle (blocking pool) ──▶ log outcome
//!      ──Err──────▶ warn, sleep(reconnect_delay), poll again
//! ```
//!
//! rumqttc reconnects on the next poll after an error. The subscription is
//! reissued on every ConnAck because a clean session forgets it. A subscribe
//! request the client cannot queue is retried while the event loop keeps
//! draining; it never ends the subscriber.
//!
//! ## Example
//!
//! ```no_run
//! use std::time::Duration;
//! use dhtlog_connectors::MqttConfig;
//!
//! let config = MqttConfig::new("broker.local")
//!     .with_topic("dht_sensor_measurement")
//!     .with_keep_alive(Duration::from_secs(30));
//! ```

use std::sync::Arc;
use std::time::Duration;

use rumqttc::{AsyncClient, Event, MqttOptions, Packet};
use tokio::sync::watch;
use tokio::time::Instant;

use crate::{ConnectorError, IngestError, IngestionAdapter};

pub use rumqttc::QoS;

/// Default subscription topic
pub const DEFAULT_TOPIC: &str = "dht_sensor_measurement";

/// Log a stats line every this many messages
const STATS_INTERVAL: u64 = 500;

/// Broker connection settings
#[derive(Debug, Clone)]
pub struct MqttConfig {
    /// Broker host name or address
    pub host: String,
    /// Broker port
    pub port: u16,
    /// Client id presented to the broker
    pub client_id: String,
    /// Topic the sensor nodes publish to
    pub topic: String,
    /// Subscription quality of service
    pub qos: QoS,
    /// MQTT keep alive interval (at least 5s)
    pub keep_alive: Duration,
    /// Pause before polling again after a connection error or failed subscribe
    pub reconnect_delay: Duration,
    /// Request channel capacity between client and event loop
    pub channel_capacity: usize,
}

impl MqttConfig {
    /// Defaults for `host`: port 1883, the sensor topic, QoS 0
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            port: 1883,
            client_id: "dhtlog".to_string(),
            topic: DEFAULT_TOPIC.to_string(),
            qos: QoS::AtMostOnce,
            keep_alive: Duration::from_secs(60),
            reconnect_delay: Duration::from_secs(5),
            channel_capacity: 16,
        }
    }

    /// Set the broker port
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Set the client id
    pub fn with_client_id(mut self, client_id: impl Into<String>) -> Self {
        self.client_id = client_id.into();
        self
    }

    /// Set the subscription topic
    pub fn with_topic(mut self, topic: impl Into<String>) -> Self {
        self.topic = topic.into();
        self
    }

    /// Set the subscription QoS
    pub fn with_qos(mut self, qos: QoS) -> Self {
        self.qos = qos;
        self
    }

    /// Set the keep alive interval
    pub fn with_keep_alive(mut self, keep_alive: Duration) -> Self {
        self.keep_alive = keep_alive;
        self
    }

    /// Set the retry pause
    pub fn with_reconnect_delay(mut self, delay: Duration) -> Self {
        self.reconnect_delay = delay;
        self
    }

    /// Reject settings the client library would refuse or panic on
    pub fn validate(&self) -> Result<(), ConnectorError> {
        if self.host.trim().is_empty() {
            return Err(ConnectorError::ConfigError("MQTT host is empty".into()));
        }
        if self.topic.trim().is_empty() {
            return Err(ConnectorError::ConfigError("MQTT topic is empty".into()));
        }
        if self.client_id.trim().is_empty() {
            return Err(ConnectorError::ConfigError("MQTT client id is empty".into()));
        }
        if self.keep_alive < Duration::from_secs(5) {
            return Err(ConnectorError::ConfigError(format!(
                "keep alive must be at least 5s, got {:?}",
                self.keep_alive
            )));
        }
        if self.channel_capacity == 0 {
            return Err(ConnectorError::ConfigError(
                "channel capacity must be positive".into(),
            ));
        }
        Ok(())
    }

    fn options(&self) -> MqttOptions {
        let mut options = MqttOptions::new(&self.client_id, &self.host, self.port);
        options.set_keep_alive(self.keep_alive);
        options
    }
}

/// Long-lived subscription feeding the ingestion adapter
pub struct MqttSubscriber {
    config: MqttConfig,
    adapter: Arc<IngestionAdapter>,
}

impl MqttSubscriber {
    /// Validate `config` and bind it to `adapter`
    pub fn new(config: MqttConfig, adapter: Arc<IngestionAdapter>) -> Result<Self, ConnectorError> {
        config.validate()?;
        Ok(Self { config, adapter })
    }

    /// Settings in use
    pub fn config(&self) -> &MqttConfig {
        &self.config
    }

    /// Run until `shutdown` flips to `true` or its sender is dropped
    ///
    /// Connection errors never end the loop; they are logged and retried.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) -> Result<(), ConnectorError> {
        let (client, mut eventloop) =
            AsyncClient::new(self.config.options(), self.config.channel_capacity);
        log::info!(
            "connecting to MQTT broker {}:{} as '{}'",
            self.config.host,
            self.config.port,
            self.config.client_id
        );

        // Set while a subscribe request still has to be queued
        let mut resubscribe_at: Option<Instant> = None;

        loop {
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
                _ = tokio::time::sleep_until(resubscribe_at.unwrap_or_else(Instant::now)),
                    if resubscribe_at.is_some() =>
                {
                    resubscribe_at = self.subscribe_or_schedule(&client);
                }
                event = eventloop.poll() => match event {
                    Ok(Event::Incoming(Packet::ConnAck(ack))) => {
                        log::info!("MQTT connected ({:?}), subscribing to '{}'", ack.code, self.config.topic);
                        resubscribe_at = self.subscribe_or_schedule(&client);
                    }
                    Ok(Event::Incoming(Packet::SubAck(_))) => {
                        log::debug!("subscription to '{}' acknowledged", self.config.topic);
                    }
                    Ok(Event::Incoming(Packet::Publish(publish))) => {
                        self.ingest(publish.topic, publish.payload.to_vec()).await;
                    }
                    Ok(_) => {}
                    Err(e) => {
                        log::warn!(
                            "MQTT connection error: {e}; retrying in {:?}",
                            self.config.reconnect_delay
                        );
                        if self.back_off(&mut shutdown).await {
                            break;
                        }
                    }
                },
            }
        }

        log::info!("MQTT subscriber stopping: {:?}", self.adapter.stats());
        if let Err(e) = client.try_disconnect() {
            log::debug!("MQTT disconnect failed: {e}");
        }
        Ok(())
    }

    fn subscribe(&self, client: &AsyncClient) -> Result<(), ConnectorError> {
        client
            .try_subscribe(&self.config.topic, self.config.qos)
            .map_err(|e| {
                ConnectorError::ProtocolError(format!(
                    "subscribe to '{}' failed: {e}",
                    self.config.topic
                ))
            })
    }

    /// Queue the subscription; on failure, when to try again
    fn subscribe_or_schedule(&self, client: &AsyncClient) -> Option<Instant> {
        match self.subscribe(client) {
            Ok(()) => None,
            Err(e) => {
                log::warn!("{e}; retrying in {:?}", self.config.reconnect_delay);
                Some(Instant::now() + self.config.reconnect_delay)
            }
        }
    }

    /// Sleep for the reconnect delay; `true` if shutdown arrived first
    async fn back_off(&self, shutdown: &mut watch::Receiver<bool>) -> bool {
        tokio::select! {
            _ = tokio::time::sleep(self.config.reconnect_delay) => false,
            changed = shutdown.changed() => changed.is_err() || *shutdown.borrow(),
        }
    }

    async fn ingest(&self, topic: String, payload: Vec<u8>) {
        let adapter = Arc::clone(&self.adapter);
        let outcome = tokio::task::spawn_blocking(move || adapter.handle(&payload)).await;

        match outcome {
            Ok(Ok(reading)) => {
                log::debug!(
                    "stored reading from {} at {}",
                    reading.source_id(),
                    reading.observed_at()
                );
            }
            Ok(Err(e @ IngestError::Storage(_))) => {
                log::error!("dropping message on '{topic}': {e}");
            }
            Ok(Err(e)) => {
                log::warn!("rejected message on '{topic}': {e}");
            }
            Err(e) => {
                log::error!("ingestion task failed: {e}");
            }
        }

        let stats = self.adapter.stats();
        if stats.received % STATS_INTERVAL == 0 {
            log::info!(
                "ingested {} messages: {} stored, {} rejected, {} failed",
                stats.received,
                stats.stored,
                stats.rejected,
                stats.failed
            );
        }
    }
}

impl std::fmt::Debug for MqttSubscriber {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MqttSubscriber")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::LatestCache;
    use dhtlog_core::SourceRegistry;
    use dhtlog_store::MemoryStore;

    fn adapter() -> Arc<IngestionAdapter> {
        let registry = Arc::new(SourceRegistry::default());
        let latest = Arc::new(LatestCache::new(registry.clone()));
        Arc::new(IngestionAdapter::new(Arc::new(MemoryStore::new()), registry, latest))
    }

    #[test]
    fn test_mqtt_config_builder() {
        let config = MqttConfig::new("broker.local")
            .with_port(8883)
            .with_client_id("logger-1")
            .with_topic("sensors/dht")
            .with_qos(QoS::AtLeastOnce)
            .with_keep_alive(Duration::from_secs(30))
            .with_reconnect_delay(Duration::from_millis(250));

        assert_eq!(config.host, "broker.local");
        assert_eq!(config.port, 8883);
        assert_eq!(config.client_id, "logger-1");
        assert_eq!(config.topic, "sensors/dht");
        assert_eq!(config.qos, QoS::AtLeastOnce);
        assert_eq!(config.keep_alive, Duration::from_secs(30));
        assert_eq!(config.reconnect_delay, Duration::from_millis(250));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_defaults() {
        let config = MqttConfig::new("localhost");
        assert_eq!(config.port, 1883);
        assert_eq!(config.topic, DEFAULT_TOPIC);
        assert_eq!(config.keep_alive, Duration::from_secs(60));
    }

    #[test]
    fn test_invalid_configs() {
        assert!(MqttConfig::new("").validate().is_err());
        assert!(MqttConfig::new("h").with_topic(" ").validate().is_err());
        assert!(MqttConfig::new("h").with_client_id("").validate().is_err());
        assert!(MqttConfig::new("h")
            .with_keep_alive(Duration::from_secs(1))
            .validate()
            .is_err());
        assert!(MqttSubscriber::new(MqttConfig::new(""), adapter()).is_err());
    }

    #[tokio::test]
    async fn test_shutdown_without_broker() {
        // Port 1 refuses connections; the loop must keep retrying until told to stop
        let config = MqttConfig::new("127.0.0.1")
            .with_port(1)
            .with_reconnect_delay(Duration::from_millis(20));
        let subscriber = MqttSubscriber::new(config, adapter()).unwrap();
        let (tx, rx) = watch::channel(false);

        let task = tokio::spawn(subscriber.run(rx));
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(!task.is_finished());

        tx.send(true).unwrap();
        let result = tokio::time::timeout(Duration::from_secs(5), task)
            .await
            .unwrap()
            .unwrap();
        assert!(result.is_ok());
    }

    /// Client whose single-slot request queue is already occupied
    fn saturated_client() -> (AsyncClient, rumqttc::EventLoop) {
        let (client, eventloop) = AsyncClient::new(MqttOptions::new("full", "127.0.0.1", 1), 1);
        client
            .try_publish("filler", QoS::AtMostOnce, false, b"x".to_vec())
            .unwrap();
        (client, eventloop)
    }

    #[tokio::test]
    async fn test_failed_subscribe_is_rescheduled() {
        let config = MqttConfig::new("localhost").with_reconnect_delay(Duration::from_millis(250));
        let subscriber = MqttSubscriber::new(config, adapter()).unwrap();
        let (client, _eventloop) = saturated_client();

        assert!(matches!(
            subscriber.subscribe(&client),
            Err(ConnectorError::ProtocolError(_))
        ));

        let before = Instant::now();
        let retry = subscriber.subscribe_or_schedule(&client).unwrap();
        assert!(retry >= before + Duration::from_millis(250));
    }

    #[tokio::test]
    async fn test_subscribe_queues_request() {
        let subscriber = MqttSubscriber::new(MqttConfig::new("localhost"), adapter()).unwrap();
        let (client, _eventloop) = AsyncClient::new(subscriber.config().options(), 4);
        assert!(subscriber.subscribe_or_schedule(&client).is_none());
    }

    #[tokio::test]
    async fn test_back_off_stops_on_shutdown() {
        let config = MqttConfig::new("localhost").with_reconnect_delay(Duration::from_secs(60));
        let subscriber = MqttSubscriber::new(config, adapter()).unwrap();
        let (tx, mut rx) = watch::channel(false);

        let stopper = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            tx.send(true).unwrap();
            tx
        });
        let stopped = tokio::time::timeout(Duration::from_secs(5), subscriber.back_off(&mut rx))
            .await
            .unwrap();
        assert!(stopped);
        drop(stopper.await.unwrap());
    }

    #[tokio::test]
    async fn test_back_off_elapses() {
        let config = MqttConfig::new("localhost").with_reconnect_delay(Duration::from_millis(10));
        let subscriber = MqttSubscriber::new(config, adapter()).unwrap();
        let (_tx, mut rx) = watch::channel(false);
        assert!(!subscriber.back_off(&mut rx).await);
    }

    #[tokio::test]
    async fn test_ingest_stores_payload() {
        let adapter = adapter();
        let subscriber = MqttSubscriber::new(MqttConfig::new("localhost"), adapter.clone()).unwrap();

        subscriber
            .ingest(DEFAULT_TOPIC.into(), br#"{"host":"10.0.0.32","temp":20.0}"#.to_vec())
            .await;
        subscriber.ingest(DEFAULT_TOPIC.into(), b"garbage".to_vec()).await;

        let stats = adapter.stats();
        assert_eq!(stats.stored, 1);
        assert_eq!(stats.rejected, 1);
    }
}
