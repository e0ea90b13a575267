//! Parsing of the free-form maintenance annotation field.

use std::collections::BTreeSet;

use serde_json::Value;

/// Sentinel tokens meaning "no maintenance", matched case-insensitively.
const NO_MAINTENANCE_TOKENS: [&str; 4] = ["NONE", "NO", "N/A", "NA"];

/// Parsed maintenance annotation for one sample.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MaintenanceNote {
    /// No unit is flagged.
    NoMaintenance,
    /// The named units are under maintenance.
    Units(BTreeSet<String>),
}

impl MaintenanceNote {
    /// Whether this note flags the given unit.
    pub fn covers(&self, unit: &str) -> bool {
        match self {
            Self::NoMaintenance => false,
            Self::Units(set) => set.contains(unit),
        }
    }
}

/// Parses a maintenance annotation value against the fixed unit enumeration.
///
/// Accepts an absent value, a JSON list of unit identifiers, or a
/// comma/semicolon-delimited string. Sentinel tokens and empty strings
/// mean no maintenance. Candidate tokens are trimmed, matched
/// case-insensitively, and unrecognized ones are dropped silently.
pub fn parse_annotation(value: Option<&Value>, known_units: &BTreeSet<String>) -> MaintenanceNote {
    let candidates: Vec<String> = match value {
        None | Some(Value::Null) => return MaintenanceNote::NoMaintenance,
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(Value::as_str)
            .map(|s| s.trim().to_uppercase())
            .collect(),
        Some(Value::String(s)) => {
            let s = s.trim();
            if s.is_empty() || NO_MAINTENANCE_TOKENS.contains(&s.to_uppercase().as_str()) {
                return MaintenanceNote::NoMaintenance;
            }
            s.replace(';', ",")
                .split(',')
                .map(|p| p.trim().to_uppercase())
                .filter(|p| !p.is_empty())
                .collect()
        }
        Some(_) => return MaintenanceNote::NoMaintenance,
    };

    let validated: BTreeSet<String> = candidates
        .iter()
        .filter_map(|cand| {
            known_units
                .iter()
                .find(|k| k.eq_ignore_ascii_case(cand))
                .cloned()
        })
        .collect();

    if validated.is_empty() {
        MaintenanceNote::NoMaintenance
    } else {
        MaintenanceNote::Units(validated)
    }
}
