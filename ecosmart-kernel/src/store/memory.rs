/**
 * MEMORY STORE - Registre + journal en mémoire, persistance fichier optionnelle
 *
 * FONCTIONNEMENT :
 * - Un seul verrou protège poubelles et mesures (mutations courtes, pas d'I/O réseau)
 * - Si un chemin est fourni : snapshot JSON des poubelles (réécrit via un
 *   fichier temporaire puis renommé) et journal JSON-lines des mesures à côté
 *   (`bins.json` -> `bins.readings.jsonl`), une ligne ajoutée par mesure
 * - Chaque mutation n'est visible en mémoire qu'une fois écrite sur disque ;
 *   un échec d'écriture laisse l'état inchangé
 * - Les mesures ne sont jamais modifiées ni supprimées
 */

use super::{DeviceRegistry, ReadingQuery, ReadingStore, StoreError};
use crate::models::{Bin, BinPatch, BinUpdate, NewBin, NewReading, Reading};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use time::OffsetDateTime;

#[derive(Debug, Default, Deserialize)]
struct Snapshot {
    bins: Vec<Bin>,
}

#[derive(Serialize)]
struct SnapshotRef<'a> {
    bins: Vec<&'a Bin>,
}

#[derive(Debug, Default)]
struct StoreState {
    bins: HashMap<String, Bin>,
    readings: Vec<Reading>,
    next_reading_id: u64,
}

impl StoreState {
    fn new(bins: Vec<Bin>, readings: Vec<Reading>) -> Self {
        let next_reading_id = readings.iter().map(|r| r.id).max().map_or(1, |id| id + 1);
        Self {
            bins: bins.into_iter().map(|b| (b.bin_id.clone(), b)).collect(),
            readings,
            next_reading_id,
        }
    }
}

#[derive(Debug)]
struct Files {
    bins: PathBuf,
    readings: PathBuf,
}

impl Files {
    fn beside(bins: PathBuf) -> Self {
        let readings = bins.with_extension("readings.jsonl");
        Self { bins, readings }
    }
}

pub struct MemoryStore {
    state: Mutex<StoreState>,
    /// `None` = purement en mémoire
    files: Option<Files>,
}

impl MemoryStore {
    pub fn in_memory() -> Self {
        Self {
            state: Mutex::new(StoreState { next_reading_id: 1, ..Default::default() }),
            files: None,
        }
    }

    /// Ouvre (ou crée) un store adossé à un snapshot JSON et son journal de mesures
    pub fn open<P: Into<PathBuf>>(storage_path: P) -> Result<Self, StoreError> {
        let files = Files::beside(storage_path.into());
        if let Some(parent) = files.bins.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        let bins = load_snapshot(&files.bins)?;
        let readings = load_reading_log(&files.readings)?;
        let state = StoreState::new(bins, readings);
        log::info!(
            "[store] opened {:?} ({} bins, {} readings)",
            files.bins,
            state.bins.len(),
            state.readings.len()
        );

        let store = Self { state: Mutex::new(state), files: Some(files) };
        store.persist_bins(&store.state.lock().bins)?;
        Ok(store)
    }

    /// Réécrit le snapshot des poubelles (écriture temporaire + renommage)
    fn persist_bins(&self, bins: &HashMap<String, Bin>) -> Result<(), StoreError> {
        let Some(files) = &self.files else {
            return Ok(());
        };
        let mut sorted: Vec<&Bin> = bins.values().collect();
        sorted.sort_by(|a, b| a.bin_id.cmp(&b.bin_id));
        let json = serde_json::to_string_pretty(&SnapshotRef { bins: sorted })?;

        let tmp = files.bins.with_extension("json.tmp");
        fs::write(&tmp, json)?;
        fs::rename(&tmp, &files.bins)?;
        Ok(())
    }

    /// Ajoute une ligne au journal des mesures
    fn persist_reading(&self, reading: &Reading) -> Result<(), StoreError> {
        let Some(files) = &self.files else {
            return Ok(());
        };
        let mut line = serde_json::to_string(reading)?;
        line.push('\n');
        let mut log_file = OpenOptions::new().create(true).append(true).open(&files.readings)?;
        log_file.write_all(line.as_bytes())?;
        Ok(())
    }

    /// Modifie une poubelle, rétablit l'ancienne valeur si l'écriture échoue
    fn modify_bin(&self, bin_id: &str, change: impl FnOnce(&mut Bin)) -> Result<Bin, StoreError> {
        let mut state = self.state.lock();
        let bin = state
            .bins
            .get_mut(bin_id)
            .ok_or_else(|| StoreError::NotFound(bin_id.to_string()))?;
        let previous = bin.clone();
        change(bin);
        let updated = bin.clone();

        if let Err(e) = self.persist_bins(&state.bins) {
            state.bins.insert(previous.bin_id.clone(), previous);
            return Err(e);
        }
        Ok(updated)
    }
}

fn load_snapshot(path: &Path) -> Result<Vec<Bin>, StoreError> {
    if !path.exists() {
        return Ok(Vec::new());
    }
    let content = fs::read_to_string(path)?;
    if content.trim().is_empty() {
        return Ok(Vec::new());
    }
    Ok(serde_json::from_str::<Snapshot>(&content)?.bins)
}

/// Une ligne illisible (écriture interrompue) est ignorée avec un warning
fn load_reading_log(path: &Path) -> Result<Vec<Reading>, StoreError> {
    if !path.exists() {
        return Ok(Vec::new());
    }
    let content = fs::read_to_string(path)?;
    let mut readings = Vec::new();
    for (n, line) in content.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<Reading>(line) {
            Ok(reading) => readings.push(reading),
            Err(e) => log::warn!("[store] skipping unreadable reading at {:?}:{}: {}", path, n + 1, e),
        }
    }
    Ok(readings)
}

impl DeviceRegistry for MemoryStore {
    fn get_bin(&self, bin_id: &str) -> Result<Option<Bin>, StoreError> {
        Ok(self.state.lock().bins.get(bin_id).cloned())
    }

    fn list_bins(&self) -> Result<Vec<Bin>, StoreError> {
        let mut bins: Vec<Bin> = self.state.lock().bins.values().cloned().collect();
        bins.sort_by(|a, b| a.bin_id.cmp(&b.bin_id));
        Ok(bins)
    }

    fn register_bin(&self, new: NewBin, now: OffsetDateTime) -> Result<Bin, StoreError> {
        let mut state = self.state.lock();
        if state.bins.contains_key(&new.bin_id) {
            return Err(StoreError::Conflict(new.bin_id));
        }
        let bin = Bin::register(new, now);
        state.bins.insert(bin.bin_id.clone(), bin.clone());
        if let Err(e) = self.persist_bins(&state.bins) {
            state.bins.remove(&bin.bin_id);
            return Err(e);
        }
        log::info!("[store] registered bin {}", bin.bin_id);
        Ok(bin)
    }

    fn update_bin(&self, bin_id: &str, update: &BinUpdate) -> Result<Bin, StoreError> {
        self.modify_bin(bin_id, |bin| bin.apply(update))
    }

    fn update_bin_meta(&self, bin_id: &str, patch: &BinPatch) -> Result<Bin, StoreError> {
        let bin = self.modify_bin(bin_id, |bin| bin.apply_patch(patch))?;
        log::info!("[store] updated metadata of bin {}", bin_id);
        Ok(bin)
    }

    fn delete_bin(&self, bin_id: &str) -> Result<(), StoreError> {
        let mut state = self.state.lock();
        if !state.bins.contains_key(bin_id) {
            return Err(StoreError::NotFound(bin_id.to_string()));
        }
        let readings = state.readings.iter().filter(|r| r.bin_id == bin_id).count();
        if readings > 0 {
            return Err(StoreError::HasReadings { bin_id: bin_id.to_string(), readings });
        }
        let Some(removed) = state.bins.remove(bin_id) else {
            return Err(StoreError::NotFound(bin_id.to_string()));
        };
        if let Err(e) = self.persist_bins(&state.bins) {
            state.bins.insert(removed.bin_id.clone(), removed);
            return Err(e);
        }
        log::info!("[store] deleted bin {}", bin_id);
        Ok(())
    }
}

impl ReadingStore for MemoryStore {
    fn append(&self, new: NewReading) -> Result<Reading, StoreError> {
        let mut state = self.state.lock();
        let reading = Reading::from_new(state.next_reading_id, new);
        self.persist_reading(&reading)?;
        state.next_reading_id += 1;
        state.readings.push(reading.clone());
        Ok(reading)
    }

    fn history(&self, bin_id: &str, query: &ReadingQuery) -> Result<Vec<Reading>, StoreError> {
        let state = self.state.lock();
        let mut results: Vec<Reading> = state
            .readings
            .iter()
            .filter(|r| r.bin_id == bin_id && query.matches(r))
            .cloned()
            .collect();
        drop(state);

        results.sort_by(|a, b| b.timestamp.cmp(&a.timestamp).then(b.id.cmp(&a.id)));
        if let Some(limit) = query.limit {
            results.truncate(limit);
        }
        Ok(results)
    }

    fn count_for(&self, bin_id: &str) -> Result<usize, StoreError> {
        Ok(self.state.lock().readings.iter().filter(|r| r.bin_id == bin_id).count())
    }

    fn total(&self) -> Result<usize, StoreError> {
        Ok(self.state.lock().readings.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::status::BinStatus;
    use time::macros::datetime;
    use time::Duration;

    fn new_bin(id: &str) -> NewBin {
        NewBin {
            bin_id: id.into(),
            location_name: "Market Street".into(),
            area: "Central".into(),
            latitude: 28.63,
            longitude: 77.22,
        }
    }

    fn reading(bin_id: &str, fill: f64, at: OffsetDateTime) -> NewReading {
        NewReading {
            bin_id: bin_id.into(),
            fill_level: fill,
            temperature: None,
            humidity: None,
            gas_level: None,
            battery: None,
            weight: None,
            timestamp: at,
        }
    }

    #[test]
    fn test_register_rejects_duplicates() {
        let store = MemoryStore::in_memory();
        let now = datetime!(2025-03-01 10:00 UTC);
        store.register_bin(new_bin("BIN-001"), now).unwrap();
        let err = store.register_bin(new_bin("BIN-001"), now).unwrap_err();
        assert!(matches!(err, StoreError::Conflict(id) if id == "BIN-001"));
        assert_eq!(store.list_bins().unwrap().len(), 1);
    }

    #[test]
    fn test_history_newest_first() {
        let store = MemoryStore::in_memory();
        let t1 = datetime!(2025-03-01 10:00 UTC);
        let t2 = t1 + Duration::minutes(5);
        let t3 = t2 + Duration::minutes(5);
        store.register_bin(new_bin("BIN-001"), t1).unwrap();

        store.append(reading("BIN-001", 10.0, t1)).unwrap();
        store.append(reading("BIN-001", 20.0, t2)).unwrap();
        store.append(reading("BIN-001", 30.0, t3)).unwrap();
        store.append(reading("BIN-999", 99.0, t3)).unwrap();

        let history = store.history("BIN-001", &ReadingQuery::default()).unwrap();
        let times: Vec<_> = history.iter().map(|r| r.timestamp).collect();
        assert_eq!(times, vec![t3, t2, t1]);
    }

    #[test]
    fn test_history_ties_keep_insertion_order() {
        let store = MemoryStore::in_memory();
        let t = datetime!(2025-03-01 10:00 UTC);
        let first = store.append(reading("BIN-001", 10.0, t)).unwrap();
        let second = store.append(reading("BIN-001", 20.0, t)).unwrap();

        let ids: Vec<u64> = store
            .history("BIN-001", &ReadingQuery::default())
            .unwrap()
            .iter()
            .map(|r| r.id)
            .collect();
        assert_eq!(ids, vec![second.id, first.id]);
    }

    #[test]
    fn test_history_range_and_limit() {
        let store = MemoryStore::in_memory();
        let base = datetime!(2025-03-01 10:00 UTC);
        for i in 0..10 {
            store.append(reading("BIN-001", i as f64, base + Duration::minutes(i))).unwrap();
        }

        let query = ReadingQuery {
            from: Some(base + Duration::minutes(2)),
            to: Some(base + Duration::minutes(6)),
            limit: Some(3),
        };
        let fills: Vec<f64> = store
            .history("BIN-001", &query)
            .unwrap()
            .iter()
            .map(|r| r.fill_level)
            .collect();
        assert_eq!(fills, vec![6.0, 5.0, 4.0]);
    }

    #[test]
    fn test_delete_rejected_while_referenced() {
        let store = MemoryStore::in_memory();
        let now = datetime!(2025-03-01 10:00 UTC);
        store.register_bin(new_bin("BIN-001"), now).unwrap();
        store.register_bin(new_bin("BIN-002"), now).unwrap();
        store.append(reading("BIN-001", 50.0, now)).unwrap();

        let err = store.delete_bin("BIN-001").unwrap_err();
        assert!(matches!(err, StoreError::HasReadings { readings: 1, .. }));
        assert!(store.get_bin("BIN-001").unwrap().is_some());

        store.delete_bin("BIN-002").unwrap();
        assert!(store.get_bin("BIN-002").unwrap().is_none());
        assert!(matches!(store.delete_bin("BIN-002"), Err(StoreError::NotFound(_))));
    }

    #[test]
    fn test_update_unknown_bin() {
        let store = MemoryStore::in_memory();
        let update = BinUpdate {
            fill_level: 10.0,
            status: BinStatus::Normal,
            temperature: None,
            humidity: None,
            gas_level: None,
            battery: None,
            weight: None,
            last_update: datetime!(2025-03-01 10:00 UTC),
        };
        assert!(matches!(store.update_bin("nope", &update), Err(StoreError::NotFound(_))));
    }

    #[test]
    fn test_snapshot_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("data").join("bins.json");
        let now = datetime!(2025-03-01 10:00 UTC);

        {
            let store = MemoryStore::open(&path).unwrap();
            store.register_bin(new_bin("BIN-001"), now).unwrap();
            store.append(reading("BIN-001", 42.0, now)).unwrap();
        }

        let reopened = MemoryStore::open(&path).unwrap();
        assert_eq!(reopened.list_bins().unwrap().len(), 1);
        assert_eq!(reopened.total().unwrap(), 1);

        // les identifiants reprennent après le dernier connu
        let next = reopened.append(reading("BIN-001", 43.0, now)).unwrap();
        assert_eq!(next.id, 2);
    }

    #[test]
    fn test_readings_go_to_line_log() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bins.json");
        let now = datetime!(2025-03-01 10:00 UTC);

        let store = MemoryStore::open(&path).unwrap();
        store.register_bin(new_bin("BIN-001"), now).unwrap();
        for i in 0..3 {
            store.append(reading("BIN-001", i as f64, now)).unwrap();
        }

        let log = fs::read_to_string(dir.path().join("bins.readings.jsonl")).unwrap();
        assert_eq!(log.lines().count(), 3);
        // le snapshot ne grossit pas avec l'historique
        let snapshot = fs::read_to_string(&path).unwrap();
        assert!(!snapshot.contains("readings"));
    }

    #[test]
    fn test_truncated_log_line_is_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bins.json");
        let now = datetime!(2025-03-01 10:00 UTC);
        {
            let store = MemoryStore::open(&path).unwrap();
            store.append(reading("BIN-001", 10.0, now)).unwrap();
        }
        let log_path = dir.path().join("bins.readings.jsonl");
        let mut log = fs::read_to_string(&log_path).unwrap();
        log.push_str("{\"id\":2,\"bin_");
        fs::write(&log_path, log).unwrap();

        let reopened = MemoryStore::open(&path).unwrap();
        assert_eq!(reopened.total().unwrap(), 1);
        assert_eq!(reopened.append(reading("BIN-001", 11.0, now)).unwrap().id, 2);
    }

    #[test]
    fn test_failed_write_leaves_state_unchanged() {
        let dir = tempfile::tempdir().unwrap();
        let data = dir.path().join("data");
        let path = data.join("bins.json");
        let now = datetime!(2025-03-01 10:00 UTC);

        let store = MemoryStore::open(&path).unwrap();
        store.register_bin(new_bin("BIN-001"), now).unwrap();
        fs::remove_dir_all(&data).unwrap();

        assert!(store.register_bin(new_bin("BIN-X"), now).is_err());
        assert!(store.get_bin("BIN-X").unwrap().is_none());

        assert!(store.append(reading("BIN-001", 50.0, now)).is_err());
        assert_eq!(store.total().unwrap(), 0);

        let patch = BinPatch { area: Some("Harbour".into()), ..Default::default() };
        assert!(store.update_bin_meta("BIN-001", &patch).is_err());
        assert_eq!(store.get_bin("BIN-001").unwrap().unwrap().area, "Central");

        assert!(store.delete_bin("BIN-001").is_err());
        assert!(store.get_bin("BIN-001").unwrap().is_some());

        // le disque revient : la même demande passe
        fs::create_dir_all(&data).unwrap();
        store.register_bin(new_bin("BIN-X"), now).unwrap();
        let first = store.append(reading("BIN-001", 50.0, now)).unwrap();
        assert_eq!(first.id, 1);
    }

    #[test]
    fn test_update_meta_keeps_fill_state() {
        let store = MemoryStore::in_memory();
        let now = datetime!(2025-03-01 10:00 UTC);
        store.register_bin(new_bin("BIN-001"), now).unwrap();

        let patch = BinPatch { location_name: Some("Harbour Gate".into()), longitude: Some(77.3), ..Default::default() };
        let bin = store.update_bin_meta("BIN-001", &patch).unwrap();
        assert_eq!(bin.location_name, "Harbour Gate");
        assert_eq!(bin.longitude, 77.3);
        assert_eq!(bin.status, BinStatus::Normal);
        assert_eq!(bin.last_update, now);
        assert!(matches!(store.update_bin_meta("nope", &patch), Err(StoreError::NotFound(_))));
    }
}
