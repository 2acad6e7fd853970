use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Seuil haut (inclus) de l'état `normal`
pub const NORMAL_MAX_FILL: f64 = 40.0;
/// Seuil haut (inclus) de l'état `half`, au-delà c'est `overflow`
pub const HALF_MAX_FILL: f64 = 70.0;

/// État dérivé d'une poubelle, toujours calculé depuis le taux de remplissage
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BinStatus {
    Normal,
    Half,
    Overflow,
}

impl BinStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            BinStatus::Normal => "normal",
            BinStatus::Half => "half",
            BinStatus::Overflow => "overflow",
        }
    }
}

impl fmt::Display for BinStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BinStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "normal" => Ok(BinStatus::Normal),
            "half" => Ok(BinStatus::Half),
            "overflow" => Ok(BinStatus::Overflow),
            other => Err(format!("unknown status '{other}'")),
        }
    }
}

/// Classe un taux de remplissage. Fonction totale, sans effet de bord :
/// les valeurs hors [0,100] sont classées telles quelles, c'est à
/// l'appelant de les rejeter avant.
pub fn classify(fill_percent: f64) -> BinStatus {
    if fill_percent <= NORMAL_MAX_FILL {
        BinStatus::Normal
    } else if fill_percent <= HALF_MAX_FILL {
        BinStatus::Half
    } else {
        BinStatus::Overflow
    }
}
