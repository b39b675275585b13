//! dhtlog daemon
//!
//! Subscribes to sensor readings over MQTT, stores them and serves
//! bucketed averages over HTTP until interrupted.

mod config;

use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use dhtlog_connectors::{http, AppState, IngestionAdapter, LatestCache, MqttSubscriber};
use dhtlog_store::BucketAggregator;
use log::info;
use tokio::sync::watch;

use crate::config::Config;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let dotenv = dotenvy::dotenv();
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    if let Ok(path) = dotenv {
        info!("loaded environment from {}", path.display());
    }

    let config = Config::parse();
    info!("starting dhtlog {} with {config:?}", dhtlog_core::VERSION);

    let store = config.open_store()?;
    let registry = Arc::new(config.registry());

    let latest = Arc::new(LatestCache::new(registry.clone()));
    latest.seed(store.latest_per_source().context("loading latest readings")?);
    info!(
        "{} readings on {}, latest values for {} sources",
        store.len()?,
        store.backend(),
        latest.len()
    );

    let adapter = Arc::new(IngestionAdapter::new(store.clone(), registry.clone(), latest.clone()));
    let aggregator =
        BucketAggregator::new(store, registry).with_max_bucket_count(config.max_bucket_count);
    let state = AppState::new(aggregator, latest, adapter.clone());

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let subscriber = MqttSubscriber::new(config.mqtt_config(), adapter.clone())?;
    let mqtt = tokio::spawn(subscriber.run(shutdown_rx.clone()));

    let signal = async move {
        tokio::signal::ctrl_c().await.context("installing interrupt handler")?;
        info!("interrupt received, shutting down");
        shutdown_tx.send_replace(true);
        anyhow::Ok(())
    };

    tokio::try_join!(
        signal,
        async { http::serve(config.http_config(), state, shutdown_rx).await.context("HTTP server") },
        async { mqtt.await?.context("MQTT subscriber") },
    )?;

    info!("stopped: {:?}", adapter.stats());
    Ok(())
}
