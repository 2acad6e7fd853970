/**
 * INGESTION PIPELINE - Mesure capteur -> état poubelle -> événements
 *
 * RÔLE :
 * Point d'entrée unique des mesures (HTTP /api/iot/update et MQTT reading@v1).
 * Seul composant autorisé à modifier l'état courant d'une poubelle.
 *
 * FONCTIONNEMENT (dans l'ordre) :
 * 1. Validation des champs (avant toute lecture/écriture)
 * 2. Résolution de la poubelle, NotFound sinon (pas de création implicite)
 * 3. Classification + capture de l'observation précédente
 * 4. Ajout de la mesure au journal (un seul horodatage pour tout l'appel)
 * 5. Mise à jour champ par champ de la poubelle
 * 6. Évaluation des règles d'alerte + `updated` systématique
 * 7. Diffusion via le Broadcaster, retour du snapshot
 *
 * CONCURRENCE :
 * Les ingestions d'une même poubelle sont sérialisées (verrou par poubelle),
 * deux poubelles différentes ne se bloquent jamais.
 */

use crate::alerts::{AlertRule, AlertSettings, Observation};
use crate::fanout::{Broadcaster, EventKind, NotificationEvent};
use crate::models::{Bin, BinUpdate, FieldError, NewReading, ReadingInput};
use crate::status::classify;
use crate::store::{DeviceRegistry, ReadingStore, StoreError};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use time::OffsetDateTime;

#[derive(Debug, thiserror::Error)]
pub enum IngestError {
    #[error("Invalid {field}: {reason}")]
    InvalidInput { field: &'static str, reason: String },
    #[error("Bin not found: {0}")]
    NotFound(String),
    #[error("Storage failure: {0}")]
    Storage(#[from] StoreError),
}

impl From<FieldError> for IngestError {
    fn from(e: FieldError) -> Self {
        IngestError::InvalidInput { field: e.field, reason: e.reason }
    }
}

/// Vérifie une mesure et retourne le taux de remplissage validé
pub fn validate_reading(input: &ReadingInput) -> Result<f64, FieldError> {
    let fill = input
        .fill_level
        .ok_or_else(|| FieldError::new("fill_level", "is required"))?;
    check_percent("fill_level", fill)?;

    if let Some(gas) = input.gas_level {
        check_percent("gas_level", gas)?;
    }
    if let Some(humidity) = input.humidity {
        check_percent("humidity", humidity)?;
    }
    if let Some(battery) = input.battery {
        check_percent("battery", battery)?;
    }
    if let Some(weight) = input.weight {
        if !weight.is_finite() || weight < 0.0 {
            return Err(FieldError::new("weight", "must be a non-negative number"));
        }
    }
    if let Some(temperature) = input.temperature {
        if !temperature.is_finite() {
            return Err(FieldError::new("temperature", "must be a finite number"));
        }
    }
    Ok(fill)
}

fn check_percent(field: &'static str, value: f64) -> Result<(), FieldError> {
    if value.is_finite() && (0.0..=100.0).contains(&value) {
        Ok(())
    } else {
        Err(FieldError::new(field, format!("must be within [0, 100], got {value}")))
    }
}

pub struct Ingestor {
    registry: Arc<dyn DeviceRegistry>,
    readings: Arc<dyn ReadingStore>,
    broadcaster: Arc<Broadcaster>,
    rules: Vec<AlertRule>,
    /// Un verrou par poubelle connue
    bin_locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl Ingestor {
    pub fn new(
        registry: Arc<dyn DeviceRegistry>,
        readings: Arc<dyn ReadingStore>,
        broadcaster: Arc<Broadcaster>,
        settings: &AlertSettings,
    ) -> Self {
        Self {
            registry,
            readings,
            broadcaster,
            rules: settings.ingestion_rules(),
            bin_locks: Mutex::new(HashMap::new()),
        }
    }

    fn lock_for(&self, bin_id: &str) -> Arc<Mutex<()>> {
        self.bin_locks
            .lock()
            .entry(bin_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Supprime une poubelle (refusé tant qu'elle a des mesures) et oublie
    /// son verrou d'ingestion
    pub fn remove_bin(&self, bin_id: &str) -> Result<(), StoreError> {
        let lock = self.lock_for(bin_id);
        let _guard = lock.lock();
        let result = self.registry.delete_bin(bin_id);
        if matches!(result, Ok(()) | Err(StoreError::NotFound(_))) {
            self.bin_locks.lock().remove(bin_id);
        }
        result
    }

    pub fn ingest(&self, bin_id: &str, input: &ReadingInput) -> Result<Bin, IngestError> {
        let fill_level = validate_reading(input)?;

        // pas de verrou créé pour un identifiant inconnu
        if self.registry.get_bin(bin_id)?.is_none() {
            return Err(IngestError::NotFound(bin_id.to_string()));
        }

        let lock = self.lock_for(bin_id);
        let _guard = lock.lock();

        let bin = self
            .registry
            .get_bin(bin_id)?
            .ok_or_else(|| IngestError::NotFound(bin_id.to_string()))?;

        let status = classify(fill_level);
        let previous = Observation::of_bin(&bin);
        let now = OffsetDateTime::now_utc();

        let reading = self.readings.append(NewReading {
            bin_id: bin.bin_id.clone(),
            fill_level,
            temperature: input.temperature,
            humidity: input.humidity,
            gas_level: input.gas_level,
            battery: input.battery,
            weight: input.weight,
            timestamp: now,
        })?;

        let update = BinUpdate {
            fill_level,
            status,
            temperature: input.temperature,
            humidity: input.humidity,
            gas_level: input.gas_level,
            battery: input.battery,
            weight: input.weight,
            last_update: now,
        };
        let updated = self.registry.update_bin(bin_id, &update).map_err(|e| {
            log::error!(
                "[ingest] reading {} stored but bin {} update failed: {}",
                reading.id,
                bin_id,
                e
            );
            e
        })?;

        // le gaz se juge sur la mesure reçue, pas sur la valeur conservée
        let current = Observation {
            status,
            gas_level: input.gas_level,
            last_update: now,
        };

        for event in self.events_for(&updated, &previous, &current, now) {
            self.broadcaster.emit(&event);
        }

        log::debug!(
            "[ingest] {} fill={} status={} (was {})",
            bin_id,
            fill_level,
            status,
            previous.status
        );
        Ok(updated)
    }

    fn events_for(
        &self,
        bin: &Bin,
        previous: &Observation,
        current: &Observation,
        now: OffsetDateTime,
    ) -> Vec<NotificationEvent> {
        let mut events = vec![NotificationEvent::for_bin(
            EventKind::Updated,
            &bin.bin_id,
            serde_json::json!({
                "location_name": bin.location_name,
                "area": bin.area,
                "fill_level": bin.fill_level,
                "status": bin.status,
                "gas_level": bin.gas_level,
                "battery": bin.battery,
                "last_update": rfc3339(bin.last_update),
            }),
            now,
        )];

        for rule in &self.rules {
            if !rule.fires(Some(previous), current, now) {
                continue;
            }
            let payload = serde_json::json!({
                "location_name": bin.location_name,
                "area": bin.area,
                "fill_level": bin.fill_level,
                "gas_level": current.gas_level,
                "message": format!("Bin {} at {}: {}", bin.bin_id, bin.location_name, rule.condition.describe()),
            });
            log::warn!("[ingest] {} raised {:?}", bin.bin_id, rule.kind);
            events.push(NotificationEvent::for_bin(rule.kind, &bin.bin_id, payload, now));
        }
        events
    }
}

pub(crate) fn rfc3339(ts: OffsetDateTime) -> String {
    ts.format(&time::format_description::well_known::Rfc3339)
        .unwrap_or_default()
}
