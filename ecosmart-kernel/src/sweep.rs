/**
 * PERIODIC SWEEP - Balayage planifié du registre pour les alertes de niveau
 *
 * RÔLE :
 * Indépendamment du trafic capteurs, repère les poubelles pleines, les
 * émissions de gaz et les capteurs muets, puis publie UNE alerte agrégée
 * par catégorie non vide sur le topic `alerts`.
 *
 * FONCTIONNEMENT :
 * - run_once(now) : scan + évaluation des règles de niveau + publication
 * - tick(now) : run_once protégé contre le chevauchement (flag atomique),
 *   erreurs loggées, jamais propagées
 * - spawn_sweep_scheduler : intervalle tokio, ticks manqués ignorés
 */

use crate::alerts::{AlertRule, AlertSettings, Condition, Observation};
use crate::fanout::{Broadcaster, NotificationEvent};
use crate::ingest::rfc3339;
use crate::models::Bin;
use crate::store::{DeviceRegistry, StoreError};
use parking_lot::Mutex;
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use time::OffsetDateTime;
use tokio::task::JoinHandle;

/// Résultat d'un passage : identifiants par catégorie
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SweepReport {
    #[serde(with = "time::serde::rfc3339::option")]
    pub ran_at: Option<OffsetDateTime>,
    pub scanned: usize,
    pub overflow: Vec<String>,
    pub high_gas: Vec<String>,
    pub inactive: Vec<String>,
}

#[derive(Debug)]
pub enum TickOutcome {
    Completed(SweepReport),
    /// Un passage était déjà en cours
    Skipped,
    Failed(StoreError),
}

pub struct Sweeper {
    registry: Arc<dyn DeviceRegistry>,
    broadcaster: Arc<Broadcaster>,
    rules: Vec<AlertRule>,
    running: AtomicBool,
    last_report: Mutex<Option<SweepReport>>,
}

/// Relâche le flag même si le passage panique
struct RunningGuard<'a>(&'a AtomicBool);

impl Drop for RunningGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl Sweeper {
    pub fn new(registry: Arc<dyn DeviceRegistry>, broadcaster: Arc<Broadcaster>, settings: &AlertSettings) -> Self {
        Self {
            registry,
            broadcaster,
            rules: settings.sweep_rules(),
            running: AtomicBool::new(false),
            last_report: Mutex::new(None),
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    pub fn last_report(&self) -> Option<SweepReport> {
        self.last_report.lock().clone()
    }

    pub fn run_once(&self, now: OffsetDateTime) -> Result<SweepReport, StoreError> {
        let bins = self.registry.list_bins()?;
        let mut report = SweepReport { ran_at: Some(now), scanned: bins.len(), ..Default::default() };

        for rule in &self.rules {
            let hits: Vec<&Bin> = bins
                .iter()
                .filter(|bin| rule.fires(None, &Observation::of_bin(bin), now))
                .collect();
            if hits.is_empty() {
                continue;
            }

            let ids: Vec<String> = hits.iter().map(|b| b.bin_id.clone()).collect();
            log::warn!("[sweep] {} bins flagged {:?}", ids.len(), rule.kind);

            let event = NotificationEvent::aggregate(
                rule.kind,
                serde_json::json!({
                    "count": hits.len(),
                    "message": format!("{} bins: {}", hits.len(), rule.condition.describe()),
                    "bins": hits.iter().map(|b| bin_summary(b)).collect::<Vec<_>>(),
                }),
                now,
            );
            self.broadcaster.emit(&event);

            match rule.condition {
                Condition::Overflow => report.overflow = ids,
                Condition::HighGas { .. } => report.high_gas = ids,
                Condition::Inactive { .. } => report.inactive = ids,
            }
        }

        *self.last_report.lock() = Some(report.clone());
        Ok(report)
    }

    /// Un passage planifié. Ne chevauche jamais un passage en cours.
    pub fn tick(&self, now: OffsetDateTime) -> TickOutcome {
        if self
            .running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            log::warn!("[sweep] previous sweep still running, skipping tick");
            return TickOutcome::Skipped;
        }
        let _guard = RunningGuard(&self.running);

        match self.run_once(now) {
            Ok(report) => {
                log::info!(
                    "[sweep] scanned {} bins: {} overflow, {} high gas, {} inactive",
                    report.scanned,
                    report.overflow.len(),
                    report.high_gas.len(),
                    report.inactive.len()
                );
                TickOutcome::Completed(report)
            }
            Err(e) => {
                log::error!("[sweep] registry scan failed: {}", e);
                TickOutcome::Failed(e)
            }
        }
    }
}

fn bin_summary(bin: &Bin) -> serde_json::Value {
    serde_json::json!({
        "bin_id": bin.bin_id,
        "location": bin.location_name,
        "area": bin.area,
        "fill_level": bin.fill_level,
        "gas_level": bin.gas_level,
        "last_update": rfc3339(bin.last_update),
    })
}

/// Démarre le sweep périodique. Le premier passage a lieu après `every`.
pub fn spawn_sweep_scheduler(sweeper: Arc<Sweeper>, every: Duration) -> JoinHandle<()> {
    log::info!("[sweep] scheduling every {}s", every.as_secs());
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(every);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        interval.tick().await;

        loop {
            interval.tick().await;
            let sweeper = sweeper.clone();
            let outcome = tokio::task::spawn_blocking(move || sweeper.tick(OffsetDateTime::now_utc())).await;
            if let Err(e) = outcome {
                log::error!("[sweep] sweep task aborted: {}", e);
            }
        }
    })
}
