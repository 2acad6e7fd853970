/**
 * ECOSMART SENSOR SIM - Capteurs de poubelles simulés
 *
 * Publie une mesure par poubelle sur `ecosmart/bins/reading@v1` à intervalle
 * fixe. Le remplissage monte à chaque tick et repart à zéro quand il dépasse
 * 100 (collecte). Le gaz suit le remplissage.
 *
 * Variables : ECOSMART_SIM_BINS (ids séparés par des virgules),
 * ECOSMART_MQTT_HOST, ECOSMART_MQTT_PORT, ECOSMART_SIM_INTERVAL_SECS.
 */

use rumqttc::{AsyncClient, Event, Incoming, MqttOptions, QoS};
use serde::Serialize;
use tokio::time::{sleep, Duration};

const READING_TOPIC: &str = "ecosmart/bins/reading@v1";

#[derive(Serialize, Debug, PartialEq)]
struct ReadingV1 {
    bin_id: String,
    fill_level: f64,
    temperature: f64,
    humidity: f64,
    gas_level: f64,
    battery: f64,
    weight: f64,
}

#[derive(Debug)]
struct SimulatedBin {
    bin_id: String,
    fill: f64,
    step: f64,
    battery: f64,
}

impl SimulatedBin {
    fn new(bin_id: &str) -> Self {
        // pas de remplissage stable par poubelle, entre 3 et 9 points
        let seed: u32 = bin_id.bytes().map(u32::from).sum();
        Self { bin_id: bin_id.to_string(), fill: 0.0, step: 3.0 + (seed % 7) as f64, battery: 100.0 }
    }

    fn next_reading(&mut self) -> ReadingV1 {
        self.fill += self.step;
        if self.fill > 100.0 {
            log::info!("[sim] {} collected", self.bin_id);
            self.fill = 0.0;
        }
        self.battery = (self.battery - 0.1).max(5.0);

        ReadingV1 {
            bin_id: self.bin_id.clone(),
            fill_level: self.fill,
            temperature: 24.0 + self.fill / 10.0,
            humidity: 40.0 + self.fill / 5.0,
            gas_level: (self.fill * 0.8).min(100.0),
            battery: round1(self.battery),
            weight: round1(self.fill * 0.5),
        }
    }
}

fn round1(v: f64) -> f64 {
    (v * 10.0).round() / 10.0
}

fn parse_bins(raw: &str) -> Vec<String> {
    raw.split(',').map(str::trim).filter(|s| !s.is_empty()).map(String::from).collect()
}

fn env_or<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key).ok().and_then(|v| v.parse().ok()).unwrap_or(default)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let bins = parse_bins(&std::env::var("ECOSMART_SIM_BINS").unwrap_or_else(|_| "BIN-001,BIN-002,BIN-003".into()));
    if bins.is_empty() {
        anyhow::bail!("ECOSMART_SIM_BINS is empty");
    }
    let host = std::env::var("ECOSMART_MQTT_HOST").unwrap_or_else(|_| "localhost".into());
    let port: u16 = env_or("ECOSMART_MQTT_PORT", 1883);
    let every = Duration::from_secs(env_or("ECOSMART_SIM_INTERVAL_SECS", 10));

    let mut opts = MqttOptions::new("ecosmart-sensor-sim", host.clone(), port);
    opts.set_keep_alive(Duration::from_secs(30));
    let (client, mut eventloop) = AsyncClient::new(opts, 10);

    // Boucle d'événements MQTT
    tokio::spawn(async move {
        loop {
            match eventloop.poll().await {
                Ok(Event::Incoming(Incoming::ConnAck(_))) => log::info!("[sim] connected to {}:{}", host, port),
                Ok(_) => {}
                Err(e) => {
                    log::error!("[sim] MQTT loop error: {:?}", e);
                    sleep(Duration::from_secs(2)).await;
                }
            }
        }
    });

    let mut sims: Vec<SimulatedBin> = bins.iter().map(|id| SimulatedBin::new(id)).collect();
    log::info!("[sim] simulating {} bins every {}s", sims.len(), every.as_secs());
    loop {
        for sim in sims.iter_mut() {
            let reading = sim.next_reading();
            let payload = serde_json::to_vec(&reading)?;
            if let Err(e) = client.publish(READING_TOPIC, QoS::AtLeastOnce, false, payload).await {
                log::warn!("[sim] publish for {} failed: {:?}", reading.bin_id, e);
            }
        }
        sleep(every).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fill_rises_then_resets() {
        let mut sim = SimulatedBin::new("BIN-001");
        let step = sim.step;
        assert!((3.0..=9.0).contains(&step));

        let first = sim.next_reading();
        assert_eq!(first.fill_level, step);
        let second = sim.next_reading();
        assert!(second.fill_level > first.fill_level);

        let mut collected = false;
        for _ in 0..40 {
            let r = sim.next_reading();
            assert!((0.0..=100.0).contains(&r.fill_level));
            if r.fill_level == 0.0 {
                collected = true;
            }
        }
        assert!(collected);
    }

    #[test]
    fn test_reading_stays_in_range() {
        let mut sim = SimulatedBin::new("BIN-XYZ");
        for _ in 0..200 {
            let r = sim.next_reading();
            assert!((0.0..=100.0).contains(&r.gas_level));
            assert!((5.0..=100.0).contains(&r.battery));
            assert!(r.weight >= 0.0);
        }
    }

    #[test]
    fn test_parse_bins() {
        assert_eq!(parse_bins(" BIN-1, ,BIN-2,"), vec!["BIN-1", "BIN-2"]);
        assert!(parse_bins("").is_empty());
    }

    #[test]
    fn test_payload_matches_reading_topic_shape() {
        let mut sim = SimulatedBin::new("BIN-007");
        let json = serde_json::to_value(sim.next_reading()).unwrap();
        assert_eq!(json["bin_id"], "BIN-007");
        assert!(json["fill_level"].is_number());
    }
}
