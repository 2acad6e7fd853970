use crate::fanout::Broadcaster;
use crate::store::{DeviceRegistry, ReadingStore};
use crate::sweep::{SweepReport, Sweeper};
use parking_lot::Mutex;
use serde::Serialize;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Instant;

#[derive(Debug, Serialize)]
pub struct KernelHealth {
    pub uptime_seconds: u64,
    pub bins_tracked: usize,
    pub readings_stored: usize,
    pub subscribers: usize,
    pub memory_usage_mb: f32,
    pub mqtt_status: String,
    pub mqtt_reconnects: u32,
    pub sweep_running: bool,
    pub last_sweep: Option<SweepReport>,
}

#[derive(Clone)]
pub struct HealthTracker {
    start_time: Instant,
    mqtt_reconnects: Arc<AtomicU32>,
    mqtt_status: Arc<Mutex<String>>,
}

impl Default for HealthTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl HealthTracker {
    pub fn new() -> Self {
        Self {
            start_time: Instant::now(),
            mqtt_reconnects: Arc::new(AtomicU32::new(0)),
            mqtt_status: Arc::new(Mutex::new("connecting".to_string())),
        }
    }

    pub fn mark_mqtt_connected(&self) {
        *self.mqtt_status.lock() = "connected".to_string();
    }

    pub fn mark_mqtt_disabled(&self) {
        *self.mqtt_status.lock() = "disabled".to_string();
    }

    pub fn increment_reconnects(&self) {
        self.mqtt_reconnects.fetch_add(1, Ordering::Relaxed);
        *self.mqtt_status.lock() = "reconnecting".to_string();
    }

    pub fn mqtt_status(&self) -> String {
        self.mqtt_status.lock().clone()
    }

    /// Les compteurs du store qui échouent sont remontés à 0 (health reste servi)
    pub fn get_health(
        &self,
        registry: &dyn DeviceRegistry,
        readings: &dyn ReadingStore,
        broadcaster: &Broadcaster,
        sweeper: &Sweeper,
    ) -> KernelHealth {
        let bins_tracked = registry.list_bins().map(|b| b.len()).unwrap_or_else(|e| {
            log::warn!("[health] failed to count bins: {}", e);
            0
        });
        let readings_stored = readings.total().unwrap_or_else(|e| {
            log::warn!("[health] failed to count readings: {}", e);
            0
        });

        KernelHealth {
            uptime_seconds: self.start_time.elapsed().as_secs(),
            bins_tracked,
            readings_stored,
            subscribers: broadcaster.subscriber_count(),
            memory_usage_mb: get_memory_usage_mb(),
            mqtt_status: self.mqtt_status(),
            mqtt_reconnects: self.mqtt_reconnects.load(Ordering::Relaxed),
            sweep_running: sweeper.is_running(),
            last_sweep: sweeper.last_report(),
        }
    }
}

fn get_memory_usage_mb() -> f32 {
    #[cfg(target_os = "linux")]
    {
        if let Ok(status) = std::fs::read_to_string("/proc/self/status") {
            let kb = status
                .lines()
                .find(|line| line.starts_with("VmRSS:"))
                .and_then(|line| line.split_whitespace().nth(1))
                .and_then(|kb| kb.parse::<u64>().ok());
            if let Some(kb) = kb {
                return kb as f32 / 1024.0;
            }
        }
    }

    0.0
}
