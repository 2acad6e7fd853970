/**
 * ECOSMART KERNEL - Point d'entrée du serveur de suivi des poubelles
 *
 * RÔLE : Orchestration de tous les modules : config, store, ingestion,
 * fan-out, sweep, MQTT et HTTP.
 *
 * ARCHITECTURE : mesures capteurs (HTTP ou MQTT) -> classification ->
 * persistance -> fan-out temps réel -> sweep périodique des alertes.
 */

mod alerts;
mod config;
mod fanout;
mod fleet;
mod health;
mod http;
mod ingest;
mod models;
mod mqtt;
mod status;
mod store;
mod sweep;

use crate::config::{load_config, KernelConfig};
use crate::fanout::{Broadcaster, MqttSink, Topic};
use crate::health::HealthTracker;
use crate::http::AppState;
use crate::ingest::Ingestor;
use crate::store::{DeviceRegistry, MemoryStore, StoreError};
use crate::sweep::{spawn_sweep_scheduler, Sweeper};

use anyhow::Context;
use std::sync::Arc;
use time::OffsetDateTime;
use tokio::net::TcpListener;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Charger les variables d'environnement depuis .env (si présent)
    dotenvy::dotenv().ok();
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cfg: KernelConfig = load_config().await;
    let alerts = cfg.alert_settings();

    // store : snapshot JSON si configuré, sinon tout en mémoire
    let store = match cfg.storage.data_file.as_deref() {
        Some(path) => MemoryStore::open(path).unwrap_or_else(|e| {
            log::error!("[kernel] failed to open {}: {}, falling back to memory", path, e);
            MemoryStore::in_memory()
        }),
        None => MemoryStore::in_memory(),
    };
    let store = Arc::new(store);
    seed_bins(store.as_ref(), &cfg);

    let broadcaster = Arc::new(Broadcaster::new());
    let ingestor = Arc::new(Ingestor::new(store.clone(), store.clone(), broadcaster.clone(), &alerts));
    let sweeper = Arc::new(Sweeper::new(store.clone(), broadcaster.clone(), &alerts));
    let health = HealthTracker::new();

    // MQTT : entrée capteurs + sortie du fan-out sur le même client
    match &cfg.mqtt {
        Some(conf) => {
            let (client, eventloop) = mqtt::create_mqtt_client(conf);
            let sink = Arc::new(MqttSink::new(client.clone()));
            broadcaster.subscribe(Topic::DeviceUpdates, sink.clone());
            broadcaster.subscribe(Topic::Alerts, sink);
            mqtt::spawn_mqtt_listener(client, eventloop, ingestor.clone(), health.clone());
            log::info!("[kernel] mqtt broker {}:{}", conf.host, conf.port);
        }
        None => {
            health.mark_mqtt_disabled();
            log::warn!("[kernel] no mqtt section, sensor input over HTTP only");
        }
    }

    spawn_sweep_scheduler(sweeper.clone(), cfg.sweep_interval());

    // fabrique l'état unique pour Axum
    let app_state = AppState {
        registry: store.clone(),
        readings: store,
        ingestor,
        broadcaster,
        sweeper,
        health,
        alerts,
    };

    // HTTP
    let app = http::build_router(app_state);
    let listener = TcpListener::bind(&cfg.http.bind)
        .await
        .with_context(|| format!("failed to bind {}", cfg.http.bind))?;
    log::info!("[kernel] listening on http://{}", cfg.http.bind);
    axum::serve(listener, app).await.context("http server stopped")?;
    Ok(())
}

/// Enregistre les poubelles déclarées dans la config si absentes
fn seed_bins(registry: &dyn DeviceRegistry, cfg: &KernelConfig) {
    let now = OffsetDateTime::now_utc();
    let mut added = 0;
    for bin in &cfg.bins {
        if let Err(e) = bin.validate() {
            log::warn!("[kernel] skipping seed bin {}: invalid {}: {}", bin.bin_id, e.field, e.reason);
            continue;
        }
        match registry.register_bin(bin.clone(), now) {
            Ok(_) => added += 1,
            Err(StoreError::Conflict(_)) => {}
            Err(e) => log::error!("[kernel] failed to seed {}: {}", bin.bin_id, e),
        }
    }
    if !cfg.bins.is_empty() {
        log::info!("[kernel] seeded {} of {} configured bins", added, cfg.bins.len());
    }
}
