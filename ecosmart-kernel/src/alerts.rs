/**
 * ALERT RULES - Conditions d'alerte + mode de déclenchement explicite
 *
 * RÔLE :
 * Chaque règle porte sa condition (débordement, gaz, inactivité) ET son mode
 * de déclenchement (front ou niveau). L'ingestion et le sweep évaluent les
 * mêmes conditions mais pas avec le même mode :
 * - ingestion : overflow sur front montant, gaz sur niveau
 * - sweep : tout sur niveau (une poubelle bloquée pleine est re-signalée)
 */

use crate::fanout::EventKind;
use crate::models::Bin;
use crate::status::BinStatus;
use time::{Duration, OffsetDateTime};

pub const DEFAULT_GAS_THRESHOLD: f64 = 70.0;
pub const DEFAULT_INACTIVITY_MINUTES: i64 = 30;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trigger {
    /// Ne se déclenche que sur la transition faux -> vrai
    Edge,
    /// Se déclenche à chaque évaluation où la condition est vraie
    Level,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Condition {
    Overflow,
    HighGas { threshold: f64 },
    Inactive { window: Duration },
}

/// Ce que voit une règle : l'état d'une poubelle à un instant donné
#[derive(Debug, Clone, PartialEq)]
pub struct Observation {
    pub status: BinStatus,
    pub gas_level: Option<f64>,
    pub last_update: OffsetDateTime,
}

impl Observation {
    pub fn of_bin(bin: &Bin) -> Self {
        Self {
            status: bin.status,
            gas_level: bin.gas_level,
            last_update: bin.last_update,
        }
    }
}

impl Condition {
    pub fn holds(&self, obs: &Observation, now: OffsetDateTime) -> bool {
        match self {
            Condition::Overflow => obs.status == BinStatus::Overflow,
            Condition::HighGas { threshold } => obs.gas_level.is_some_and(|gas| gas > *threshold),
            Condition::Inactive { window } => obs.last_update < now - *window,
        }
    }

    /// Libellé lisible, repris dans le `message` des alertes
    pub fn describe(&self) -> &'static str {
        match self {
            Condition::Overflow => "reached overflow status",
            Condition::HighGas { .. } => "high gas emission detected",
            Condition::Inactive { .. } => "no reading within the inactivity window",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AlertRule {
    pub kind: EventKind,
    pub condition: Condition,
    pub trigger: Trigger,
}

impl AlertRule {
    pub const fn edge(kind: EventKind, condition: Condition) -> Self {
        Self { kind, condition, trigger: Trigger::Edge }
    }

    pub const fn level(kind: EventKind, condition: Condition) -> Self {
        Self { kind, condition, trigger: Trigger::Level }
    }

    /// `previous` absent = rien n'était vrai avant (première observation)
    pub fn fires(&self, previous: Option<&Observation>, current: &Observation, now: OffsetDateTime) -> bool {
        let holds_now = self.condition.holds(current, now);
        match self.trigger {
            Trigger::Level => holds_now,
            Trigger::Edge => {
                let held_before = previous.is_some_and(|p| self.condition.holds(p, now));
                holds_now && !held_before
            }
        }
    }
}

/// Seuils partagés par l'ingestion et le sweep
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AlertSettings {
    pub gas_threshold: f64,
    pub inactivity_window: Duration,
}

impl Default for AlertSettings {
    fn default() -> Self {
        Self {
            gas_threshold: DEFAULT_GAS_THRESHOLD,
            inactivity_window: Duration::minutes(DEFAULT_INACTIVITY_MINUTES),
        }
    }
}

impl AlertSettings {
    pub fn ingestion_rules(&self) -> Vec<AlertRule> {
        vec![
            AlertRule::edge(EventKind::OverflowEntered, Condition::Overflow),
            AlertRule::level(EventKind::HighGas, Condition::HighGas { threshold: self.gas_threshold }),
        ]
    }

    pub fn sweep_rules(&self) -> Vec<AlertRule> {
        vec![
            AlertRule::level(EventKind::OverflowSweep, Condition::Overflow),
            AlertRule::level(EventKind::HighGasSweep, Condition::HighGas { threshold: self.gas_threshold }),
            AlertRule::level(EventKind::Inactive, Condition::Inactive { window: self.inactivity_window }),
        ]
    }
}
