/**
 * FAN-OUT - Diffusion publish/subscribe des événements poubelles
 *
 * RÔLE :
 * Pousse chaque NotificationEvent vers les abonnés d'un topic au moment de
 * l'appel. Pas de persistance, pas de rejeu pour les retardataires.
 *
 * FONCTIONNEMENT :
 * - Deux topics : `device-updates` (événements `updated`) et `alerts` (le reste)
 * - Abonnés = EventSink (bridge MQTT, WebSocket via channel, recorder de test)
 * - publish() copie la liste des sinks sous verrou puis livre hors verrou :
 *   connexion/déconnexion pendant une diffusion ne touche pas l'itération
 * - Livraison fire-and-forget : un sink en échec est loggé, un sink
 *   déconnecté est retiré, les autres reçoivent quand même
 */

use parking_lot::RwLock;
use rumqttc::{AsyncClient, QoS};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use time::OffsetDateTime;
use tokio::sync::mpsc;
use uuid::Uuid;

pub const MQTT_UPDATES_TOPIC: &str = "ecosmart/bins/updates@v1";
pub const MQTT_ALERTS_TOPIC: &str = "ecosmart/alerts@v1";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Topic {
    DeviceUpdates,
    Alerts,
}

impl Topic {
    pub fn as_str(&self) -> &'static str {
        match self {
            Topic::DeviceUpdates => "device-updates",
            Topic::Alerts => "alerts",
        }
    }
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Topic {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "device-updates" => Ok(Topic::DeviceUpdates),
            "alerts" => Ok(Topic::Alerts),
            other => Err(format!("unknown topic '{other}'")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EventKind {
    Updated,
    OverflowEntered,
    HighGas,
    Inactive,
    OverflowSweep,
    HighGasSweep,
}

impl EventKind {
    pub fn topic(&self) -> Topic {
        match self {
            EventKind::Updated => Topic::DeviceUpdates,
            _ => Topic::Alerts,
        }
    }
}

/// Événement éphémère, n'existe que le temps du publish
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotificationEvent {
    pub kind: EventKind,
    #[serde(rename = "deviceId", default, skip_serializing_if = "Option::is_none")]
    pub bin_id: Option<String>,
    pub payload: serde_json::Value,
    #[serde(with = "time::serde::rfc3339")]
    pub timestamp: OffsetDateTime,
}

impl NotificationEvent {
    pub fn for_bin(kind: EventKind, bin_id: &str, payload: serde_json::Value, timestamp: OffsetDateTime) -> Self {
        Self { kind, bin_id: Some(bin_id.to_string()), payload, timestamp }
    }

    pub fn aggregate(kind: EventKind, payload: serde_json::Value, timestamp: OffsetDateTime) -> Self {
        Self { kind, bin_id: None, payload, timestamp }
    }

    pub fn topic(&self) -> Topic {
        self.kind.topic()
    }
}

/// Échec de livraison vers UN abonné. Absorbé par le Broadcaster.
#[derive(Debug, thiserror::Error)]
pub enum DeliveryError {
    #[error("subscriber disconnected")]
    Disconnected,
    #[error("subscriber queue full")]
    Full,
    #[error("transport error: {0}")]
    Transport(String),
    #[error("encoding error: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Un abonné. `deliver` ne doit jamais bloquer.
pub trait EventSink: Send + Sync {
    fn deliver(&self, topic: Topic, event: &NotificationEvent) -> Result<(), DeliveryError>;

    fn describe(&self) -> String;
}

struct Subscription {
    topic: Topic,
    sink: Arc<dyn EventSink>,
}

#[derive(Default)]
pub struct Broadcaster {
    subscribers: RwLock<HashMap<Uuid, Subscription>>,
}

impl Broadcaster {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self, topic: Topic, sink: Arc<dyn EventSink>) -> Uuid {
        let id = Uuid::new_v4();
        log::info!("[fanout] {} subscribed to {} ({})", sink.describe(), topic, id);
        self.subscribers.write().insert(id, Subscription { topic, sink });
        id
    }

    pub fn unsubscribe(&self, id: &Uuid) -> bool {
        let removed = self.subscribers.write().remove(id);
        if let Some(sub) = &removed {
            log::info!("[fanout] {} left {} ({})", sub.sink.describe(), sub.topic, id);
        }
        removed.is_some()
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.read().len()
    }

    /// Livre `event` à tous les abonnés actuels de `topic`.
    /// Retourne le nombre de livraisons réussies, jamais d'erreur.
    pub fn publish(&self, topic: Topic, event: &NotificationEvent) -> usize {
        let targets: Vec<(Uuid, Arc<dyn EventSink>)> = self
            .subscribers
            .read()
            .iter()
            .filter(|(_, sub)| sub.topic == topic)
            .map(|(id, sub)| (*id, sub.sink.clone()))
            .collect();

        let mut delivered = 0;
        let mut disconnected = Vec::new();
        for (id, sink) in targets {
            match sink.deliver(topic, event) {
                Ok(()) => delivered += 1,
                Err(DeliveryError::Disconnected) => {
                    log::debug!("[fanout] {} disconnected, pruning", sink.describe());
                    disconnected.push(id);
                }
                Err(e) => log::warn!("[fanout] delivery to {} failed: {}", sink.describe(), e),
            }
        }

        if !disconnected.is_empty() {
            let mut subs = self.subscribers.write();
            for id in disconnected {
                subs.remove(&id);
            }
        }
        delivered
    }

    /// Publie sur le topic propre au type d'événement
    pub fn emit(&self, event: &NotificationEvent) -> usize {
        self.publish(event.topic(), event)
    }
}

/// Abonné côté process (WebSocket, tâches internes) via channel borné
pub struct ChannelSink {
    label: String,
    tx: mpsc::Sender<NotificationEvent>,
}

impl ChannelSink {
    pub fn new(label: impl Into<String>, capacity: usize) -> (Self, mpsc::Receiver<NotificationEvent>) {
        let (tx, rx) = mpsc::channel(capacity);
        (Self { label: label.into(), tx }, rx)
    }
}

impl EventSink for ChannelSink {
    fn deliver(&self, _topic: Topic, event: &NotificationEvent) -> Result<(), DeliveryError> {
        self.tx.try_send(event.clone()).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => DeliveryError::Full,
            mpsc::error::TrySendError::Closed(_) => DeliveryError::Disconnected,
        })
    }

    fn describe(&self) -> String {
        self.label.clone()
    }
}

/// Bridge vers le broker MQTT : un topic MQTT par topic logique
pub struct MqttSink {
    client: AsyncClient,
}

impl MqttSink {
    pub fn new(client: AsyncClient) -> Self {
        Self { client }
    }

    pub fn mqtt_topic(topic: Topic) -> &'static str {
        match topic {
            Topic::DeviceUpdates => MQTT_UPDATES_TOPIC,
            Topic::Alerts => MQTT_ALERTS_TOPIC,
        }
    }
}

impl EventSink for MqttSink {
    fn deliver(&self, topic: Topic, event: &NotificationEvent) -> Result<(), DeliveryError> {
        let payload = serde_json::to_vec(event)?;
        self.client
            .try_publish(Self::mqtt_topic(topic), QoS::AtLeastOnce, false, payload)
            .map_err(|e| DeliveryError::Transport(e.to_string()))
    }

    fn describe(&self) -> String {
        "mqtt-bridge".to_string()
    }
}

/// Recorder en mémoire pour les tests
#[cfg(test)]
#[derive(Default)]
pub struct RecordingSink {
    events: parking_lot::Mutex<Vec<(Topic, NotificationEvent)>>,
}

#[cfg(test)]
impl RecordingSink {
    pub fn events(&self) -> Vec<(Topic, NotificationEvent)> {
        self.events.lock().clone()
    }

    pub fn kinds(&self) -> Vec<EventKind> {
        self.events.lock().iter().map(|(_, e)| e.kind).collect()
    }

    pub fn count(&self, kind: EventKind) -> usize {
        self.events.lock().iter().filter(|(_, e)| e.kind == kind).count()
    }

    pub fn clear(&self) {
        self.events.lock().clear();
    }
}

#[cfg(test)]
impl EventSink for RecordingSink {
    fn deliver(&self, topic: Topic, event: &NotificationEvent) -> Result<(), DeliveryError> {
        self.events.lock().push((topic, event.clone()));
        Ok(())
    }

    fn describe(&self) -> String {
        "recorder".to_string()
    }
}

/// Broadcaster + un recorder abonné aux deux topics
#[cfg(test)]
pub fn recording_broadcaster() -> (Arc<Broadcaster>, Arc<RecordingSink>) {
    let broadcaster = Arc::new(Broadcaster::new());
    let recorder = Arc::new(RecordingSink::default());
    broadcaster.subscribe(Topic::DeviceUpdates, recorder.clone());
    broadcaster.subscribe(Topic::Alerts, recorder.clone());
    (broadcaster, recorder)
}
