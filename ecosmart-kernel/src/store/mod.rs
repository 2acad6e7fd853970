/**
 * STORE - Registre des poubelles + journal des mesures
 *
 * RÔLE :
 * Définit les deux contrats de persistence dont le pipeline a besoin, sans
 * imposer de backend. Le kernel reçoit un handle construit explicitement
 * (pas de singleton global) et le passe à chaque composant.
 *
 * FONCTIONNEMENT :
 * - DeviceRegistry = état courant par poubelle (lecture ponctuelle, mise à jour
 *   champ par champ, scan complet pour le sweep)
 * - ReadingStore = journal append-only des mesures capteurs
 * - ReadingQuery = filtre temporel + limite, résultats du plus récent au plus ancien
 *
 * IMPLÉMENTATION :
 * memory::MemoryStore implémente les deux traits, en mémoire avec snapshot
 * JSON des poubelles et journal JSON-lines des mesures, optionnels sur disque.
 */

pub mod memory;

pub use memory::MemoryStore;

use crate::models::{Bin, BinPatch, BinUpdate, NewBin, NewReading, Reading};
use time::OffsetDateTime;

/// Erreurs possibles côté persistence
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Bin not found: {0}")]
    NotFound(String),
    #[error("Bin already exists: {0}")]
    Conflict(String),
    #[error("Bin {bin_id} is still referenced by {readings} readings")]
    HasReadings { bin_id: String, readings: usize },
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Requête d'historique : bornes inclusives, limite de résultats
#[derive(Debug, Clone, PartialEq)]
pub struct ReadingQuery {
    pub from: Option<OffsetDateTime>,
    pub to: Option<OffsetDateTime>,
    pub limit: Option<usize>,
}

impl Default for ReadingQuery {
    /// 100 résultats max, pas de bornes
    fn default() -> Self {
        Self { from: None, to: None, limit: Some(100) }
    }
}

impl ReadingQuery {
    pub fn matches(&self, reading: &Reading) -> bool {
        if let Some(from) = self.from {
            if reading.timestamp < from {
                return false;
            }
        }
        if let Some(to) = self.to {
            if reading.timestamp > to {
                return false;
            }
        }
        true
    }
}

/// État courant des poubelles. Seul le pipeline d'ingestion appelle
/// `update_bin`; le statut n'est jamais écrit indépendamment du remplissage.
pub trait DeviceRegistry: Send + Sync {
    fn get_bin(&self, bin_id: &str) -> Result<Option<Bin>, StoreError>;

    /// Scan complet, trié par `bin_id`
    fn list_bins(&self) -> Result<Vec<Bin>, StoreError>;

    /// `Conflict` si l'identifiant existe déjà
    fn register_bin(&self, new: NewBin, now: OffsetDateTime) -> Result<Bin, StoreError>;

    /// Applique la mise à jour et retourne le nouvel état
    fn update_bin(&self, bin_id: &str, update: &BinUpdate) -> Result<Bin, StoreError>;

    /// Métadonnées admin (nom, zone, position). Statut et remplissage inchangés.
    fn update_bin_meta(&self, bin_id: &str, patch: &BinPatch) -> Result<Bin, StoreError>;

    /// Refusé (`HasReadings`) tant que des mesures référencent la poubelle
    fn delete_bin(&self, bin_id: &str) -> Result<(), StoreError>;
}

/// Journal append-only des mesures
pub trait ReadingStore: Send + Sync {
    /// Ajoute une mesure et lui attribue un identifiant croissant
    fn append(&self, reading: NewReading) -> Result<Reading, StoreError>;

    /// Mesures d'une poubelle, plus récentes d'abord. À horodatage égal,
    /// la dernière insérée sort en premier.
    fn history(&self, bin_id: &str, query: &ReadingQuery) -> Result<Vec<Reading>, StoreError>;

    fn count_for(&self, bin_id: &str) -> Result<usize, StoreError>;

    fn total(&self) -> Result<usize, StoreError>;
}
