use crate::alerts::{AlertSettings, DEFAULT_GAS_THRESHOLD, DEFAULT_INACTIVITY_MINUTES};
use crate::models::NewBin;
use serde::{Deserialize, Serialize};
use std::path::Path;
use tokio::fs;

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct KernelConfig {
    pub http: HttpConf,
    pub mqtt: Option<MqttConf>,
    pub alerts: AlertConf,
    pub storage: StorageConf,
    /// Poubelles enregistrées au démarrage si absentes
    pub bins: Vec<NewBin>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct HttpConf {
    pub bind: String, // ex: "0.0.0.0:8080"
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct MqttConf {
    pub host: String,
    pub port: u16,
    #[serde(default = "default_client_id")]
    pub client_id: String,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct AlertConf {
    pub gas_threshold: f64,
    pub inactivity_minutes: i64,
    pub sweep_interval_minutes: u64,
}

#[derive(Debug, Serialize, Deserialize, Clone, Default)]
pub struct StorageConf {
    /// Snapshot JSON, absent = tout en mémoire
    pub data_file: Option<String>,
}

fn default_client_id() -> String {
    "ecosmart-kernel".into()
}

impl Default for HttpConf {
    fn default() -> Self {
        Self { bind: "0.0.0.0:8080".into() }
    }
}

impl Default for MqttConf {
    fn default() -> Self {
        Self { host: "localhost".into(), port: 1883, client_id: default_client_id() }
    }
}

impl Default for AlertConf {
    fn default() -> Self {
        Self {
            gas_threshold: DEFAULT_GAS_THRESHOLD,
            inactivity_minutes: DEFAULT_INACTIVITY_MINUTES,
            sweep_interval_minutes: 15,
        }
    }
}

impl Default for KernelConfig {
    fn default() -> Self {
        Self {
            http: HttpConf::default(),
            mqtt: Some(MqttConf::default()),
            alerts: AlertConf::default(),
            storage: StorageConf { data_file: Some("./data/bins.json".into()) },
            bins: Vec::new(),
        }
    }
}

impl KernelConfig {
    pub fn alert_settings(&self) -> AlertSettings {
        AlertSettings {
            gas_threshold: self.alerts.gas_threshold,
            inactivity_window: time::Duration::minutes(self.alerts.inactivity_minutes),
        }
    }

    pub fn sweep_interval(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.alerts.sweep_interval_minutes.max(1) * 60)
    }

    /// Surcharges par variables d'environnement (après lecture du YAML)
    pub fn apply_env_overrides(&mut self, get: impl Fn(&str) -> Option<String>) {
        if let Some(bind) = get("ECOSMART_HTTP_ADDR") {
            self.http.bind = bind;
        }
        if let Some(host) = get("ECOSMART_MQTT_HOST") {
            self.mqtt.get_or_insert_with(MqttConf::default).host = host;
        }
        if let Some(port) = get("ECOSMART_MQTT_PORT") {
            match port.parse::<u16>() {
                Ok(port) => self.mqtt.get_or_insert_with(MqttConf::default).port = port,
                Err(_) => log::warn!("[config] ignoring invalid ECOSMART_MQTT_PORT={port}"),
            }
        }
        if let Some(file) = get("ECOSMART_DATA_FILE") {
            self.storage.data_file = if file.is_empty() { None } else { Some(file) };
        }
    }
}

pub fn parse_config(txt: &str) -> Result<KernelConfig, serde_yaml::Error> {
    if txt.trim().is_empty() {
        return Ok(KernelConfig::default());
    }
    serde_yaml::from_str(txt)
}

pub async fn load_config() -> KernelConfig {
    let path = std::env::var("ECOSMART_KERNEL_CONFIG").unwrap_or_else(|_| "kernel.yaml".into());
    let mut cfg = if Path::new(&path).exists() {
        let txt = fs::read_to_string(&path).await.unwrap_or_default();
        parse_config(&txt).unwrap_or_else(|e| {
            log::error!("[config] invalid {path}: {e}");
            KernelConfig::default()
        })
    } else {
        log::warn!("[config] no {path}, using defaults");
        KernelConfig::default()
    };
    cfg.apply_env_overrides(|key| std::env::var(key).ok());
    cfg
}
