use crate::status::{classify, BinStatus};
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

/// État courant d'une poubelle (un "device" côté capteurs)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bin {
    pub bin_id: String,
    pub location_name: String,
    pub area: String,
    pub latitude: f64,
    pub longitude: f64,
    pub fill_level: f64,
    pub status: BinStatus,
    pub temperature: Option<f64>,
    pub humidity: Option<f64>,
    pub gas_level: Option<f64>,
    pub battery: Option<f64>,
    pub weight: Option<f64>,
    #[serde(with = "time::serde::rfc3339")]
    pub last_update: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

impl Bin {
    /// Nouvelle poubelle vide, état `normal`
    pub fn register(new: NewBin, now: OffsetDateTime) -> Self {
        Self {
            bin_id: new.bin_id,
            location_name: new.location_name,
            area: new.area,
            latitude: new.latitude,
            longitude: new.longitude,
            fill_level: 0.0,
            status: classify(0.0),
            temperature: None,
            humidity: None,
            gas_level: None,
            battery: None,
            weight: None,
            last_update: now,
            created_at: now,
        }
    }

    /// Mise à jour champ par champ : les valeurs auxiliaires absentes gardent
    /// leur ancienne valeur.
    pub fn apply(&mut self, update: &BinUpdate) {
        self.fill_level = update.fill_level;
        self.status = update.status;
        self.last_update = update.last_update;
        if update.temperature.is_some() {
            self.temperature = update.temperature;
        }
        if update.humidity.is_some() {
            self.humidity = update.humidity;
        }
        if update.gas_level.is_some() {
            self.gas_level = update.gas_level;
        }
        if update.battery.is_some() {
            self.battery = update.battery;
        }
        if update.weight.is_some() {
            self.weight = update.weight;
        }
    }

    /// Édition admin des métadonnées. Ne touche ni au remplissage, ni au
    /// statut, ni à `last_update` (réservés à l'ingestion).
    pub fn apply_patch(&mut self, patch: &BinPatch) {
        if let Some(location_name) = &patch.location_name {
            self.location_name = location_name.clone();
        }
        if let Some(area) = &patch.area {
            self.area = area.clone();
        }
        if let Some(latitude) = patch.latitude {
            self.latitude = latitude;
        }
        if let Some(longitude) = patch.longitude {
            self.longitude = longitude;
        }
    }
}

/// Requête d'enregistrement d'une poubelle (action admin ou seed de config)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewBin {
    pub bin_id: String,
    pub location_name: String,
    pub area: String,
    pub latitude: f64,
    pub longitude: f64,
}

impl NewBin {
    pub fn validate(&self) -> Result<(), FieldError> {
        if self.bin_id.trim().is_empty() {
            return Err(FieldError::new("bin_id", "must not be empty"));
        }
        check_location_name(&self.location_name)?;
        check_area(&self.area)?;
        check_latitude(self.latitude)?;
        check_longitude(self.longitude)
    }
}

/// Modification partielle d'une poubelle (PUT admin). Le statut n'en fait
/// pas partie : il dérive toujours du remplissage.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BinPatch {
    pub location_name: Option<String>,
    pub area: Option<String>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
}

impl BinPatch {
    pub fn validate(&self) -> Result<(), FieldError> {
        if let Some(location_name) = &self.location_name {
            check_location_name(location_name)?;
        }
        if let Some(area) = &self.area {
            check_area(area)?;
        }
        if let Some(latitude) = self.latitude {
            check_latitude(latitude)?;
        }
        if let Some(longitude) = self.longitude {
            check_longitude(longitude)?;
        }
        Ok(())
    }
}

fn check_location_name(value: &str) -> Result<(), FieldError> {
    if !(3..=200).contains(&value.chars().count()) {
        return Err(FieldError::new("location_name", "length must be between 3 and 200"));
    }
    Ok(())
}

fn check_area(value: &str) -> Result<(), FieldError> {
    if !(2..=100).contains(&value.chars().count()) {
        return Err(FieldError::new("area", "length must be between 2 and 100"));
    }
    Ok(())
}

fn check_latitude(value: f64) -> Result<(), FieldError> {
    if !value.is_finite() || !(-90.0..=90.0).contains(&value) {
        return Err(FieldError::new("latitude", "must be within [-90, 90]"));
    }
    Ok(())
}

fn check_longitude(value: f64) -> Result<(), FieldError> {
    if !value.is_finite() || !(-180.0..=180.0).contains(&value) {
        return Err(FieldError::new("longitude", "must be within [-180, 180]"));
    }
    Ok(())
}

/// Mesure brute envoyée par un capteur. `fill_level` est obligatoire mais
/// reste optionnel ici pour pouvoir répondre "champ manquant" proprement.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ReadingInput {
    pub fill_level: Option<f64>,
    pub temperature: Option<f64>,
    pub weight: Option<f64>,
    pub gas_level: Option<f64>,
    pub humidity: Option<f64>,
    pub battery: Option<f64>,
}

/// Message d'ingestion complet (HTTP /api/iot/update et MQTT reading@v1)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestRequest {
    pub bin_id: String,
    #[serde(flatten)]
    pub reading: ReadingInput,
}

/// Mesure à ajouter au journal, horodatée par le serveur
#[derive(Debug, Clone)]
pub struct NewReading {
    pub bin_id: String,
    pub fill_level: f64,
    pub temperature: Option<f64>,
    pub humidity: Option<f64>,
    pub gas_level: Option<f64>,
    pub battery: Option<f64>,
    pub weight: Option<f64>,
    pub timestamp: OffsetDateTime,
}

/// Mesure persistée. Immuable une fois écrite.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reading {
    pub id: u64,
    pub bin_id: String,
    pub fill_level: f64,
    pub temperature: Option<f64>,
    pub humidity: Option<f64>,
    pub gas_level: Option<f64>,
    pub battery: Option<f64>,
    pub weight: Option<f64>,
    #[serde(with = "time::serde::rfc3339")]
    pub timestamp: OffsetDateTime,
}

impl Reading {
    pub fn from_new(id: u64, new: NewReading) -> Self {
        Self {
            id,
            bin_id: new.bin_id,
            fill_level: new.fill_level,
            temperature: new.temperature,
            humidity: new.humidity,
            gas_level: new.gas_level,
            battery: new.battery,
            weight: new.weight,
            timestamp: new.timestamp,
        }
    }
}

/// Écrasement de l'état courant d'une poubelle après ingestion
#[derive(Debug, Clone)]
pub struct BinUpdate {
    pub fill_level: f64,
    pub status: BinStatus,
    pub temperature: Option<f64>,
    pub humidity: Option<f64>,
    pub gas_level: Option<f64>,
    pub battery: Option<f64>,
    pub weight: Option<f64>,
    pub last_update: OffsetDateTime,
}

/// Champ rejeté à la validation
#[derive(Debug, Clone, PartialEq)]
pub struct FieldError {
    pub field: &'static str,
    pub reason: String,
}

impl FieldError {
    pub fn new(field: &'static str, reason: impl Into<String>) -> Self {
        Self { field, reason: reason.into() }
    }
}
