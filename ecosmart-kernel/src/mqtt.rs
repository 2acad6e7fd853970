/**
 * MQTT - Entrée capteurs + transport du fan-out
 *
 * RÔLE :
 * - Écoute `ecosmart/bins/reading@v1` et passe chaque mesure au pipeline
 * - Le même client sert au MqttSink (updates@v1 / alerts@v1)
 *
 * Un payload invalide ou une ingestion refusée est loggé, la boucle continue.
 */

use crate::config::MqttConf;
use crate::health::HealthTracker;
use crate::ingest::Ingestor;
use crate::models::{Bin, IngestRequest};
use rumqttc::{AsyncClient, Event, EventLoop, Incoming, MqttOptions, QoS};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task;

pub const READING_TOPIC: &str = "ecosmart/bins/reading@v1";
const INGEST_QUEUE: usize = 256;

pub fn create_mqtt_client(conf: &MqttConf) -> (AsyncClient, EventLoop) {
    let mut opts = MqttOptions::new(conf.client_id.clone(), conf.host.clone(), conf.port);
    opts.set_keep_alive(Duration::from_secs(15));
    AsyncClient::new(opts, 64)
}

/// Décode et ingère un message reading@v1
pub fn handle_reading_payload(ingestor: &Ingestor, payload: &[u8]) -> anyhow::Result<Bin> {
    let req: IngestRequest = serde_json::from_slice(payload)?;
    let bin = ingestor.ingest(&req.bin_id, &req.reading)?;
    Ok(bin)
}

/// Les mesures reçues passent par un worker dédié : la boucle `poll()` ne
/// fait jamais d'I/O disque et garde le keep-alive. L'ordre d'arrivée est
/// conservé.
fn spawn_ingest_worker(ingestor: Arc<Ingestor>) -> mpsc::Sender<Vec<u8>> {
    let (tx, mut rx) = mpsc::channel::<Vec<u8>>(INGEST_QUEUE);
    task::spawn(async move {
        while let Some(payload) = rx.recv().await {
            let ingestor = ingestor.clone();
            match task::spawn_blocking(move || handle_reading_payload(&ingestor, &payload)).await {
                Ok(Ok(bin)) => log::debug!("[mqtt] reading ingested for {}", bin.bin_id),
                Ok(Err(e)) => log::warn!("[mqtt] rejected reading: {}", e),
                Err(e) => log::error!("[mqtt] ingest task aborted: {}", e),
            }
        }
    });
    tx
}

pub fn spawn_mqtt_listener(
    client: AsyncClient,
    mut eventloop: EventLoop,
    ingestor: Arc<Ingestor>,
    health: HealthTracker,
) {
    let readings = spawn_ingest_worker(ingestor);
    task::spawn(async move {
        loop {
            match eventloop.poll().await {
                Ok(Event::Incoming(Incoming::ConnAck(_))) => {
                    health.mark_mqtt_connected();
                    // abonnement refait à chaque (re)connexion
                    if let Err(e) = client.try_subscribe(READING_TOPIC, QoS::AtLeastOnce) {
                        log::error!("[mqtt] subscribe {} failed: {:?}", READING_TOPIC, e);
                    } else {
                        log::info!("[mqtt] connected, listening on {}", READING_TOPIC);
                    }
                }
                Ok(Event::Incoming(Incoming::Publish(p))) if p.topic == READING_TOPIC => {
                    if let Err(e) = readings.try_send(p.payload.to_vec()) {
                        log::warn!("[mqtt] dropping reading, ingest queue unavailable: {}", e);
                    }
                }
                Ok(_) => {}
                Err(e) => {
                    log::error!("[mqtt] connection error: {:?}", e);
                    health.increment_reconnects();
                    tokio::time::sleep(Duration::from_secs(2)).await;
                }
            }
        }
    });
}
