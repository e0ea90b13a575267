//! TOML-based plant configuration and the built-in site preset.

use std::collections::BTreeSet;
use std::fmt;
use std::fs;
use std::path::Path;

use serde::Deserialize;

/// Top-level plant configuration parsed from TOML.
///
/// All sections have defaults matching the characterized site. Load from
/// TOML with [`PlantConfig::from_toml_file`] or use
/// [`PlantConfig::site_default`] for the built-in deployment.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PlantConfig {
    /// Fixed inverter enumeration with nominal ratings.
    #[serde(default = "default_units")]
    pub units: Vec<UnitConfig>,
    /// Availability KPI parameters.
    #[serde(default)]
    pub availability: AvailabilityConfig,
    /// Performance-ratio KPI parameters.
    #[serde(default)]
    pub performance: PerformanceConfig,
    /// Telemetry tag vocabulary.
    #[serde(default)]
    pub tags: TagConfig,
}

/// One inverter unit: identifier and nominal power rating.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct UnitConfig {
    /// Unit identifier as it appears in telemetry tags (e.g. `"PM01"`).
    pub id: String,
    /// Nameplate rating (kW), used as the ASYS aggregation weight.
    pub nominal_kw: f64,
}

/// Availability KPI parameters.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AvailabilityConfig {
    /// Irradiance at or above this produces a non-zero HPER (W/m²).
    pub irradiance_threshold_wm2: f64,
    /// Bucket width for the batch decomposition (hours).
    pub block_hours: f64,
    /// Fraction of nameplate treated as the operating base for the
    /// proportional-shortfall signal and the ASYS weights.
    pub operating_factor: f64,
    /// Streaming tick: a unit producing below this fraction of its peer
    /// mean is charged unavailable hours.
    pub peer_ratio_threshold: f64,
}

impl Default for AvailabilityConfig {
    fn default() -> Self {
        Self {
            irradiance_threshold_wm2: 50.0,
            block_hours: 1.0,
            operating_factor: 0.5,
            peer_ratio_threshold: 0.9,
        }
    }
}

/// Performance-ratio KPI parameters.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PerformanceConfig {
    /// Buckets with irradiance at or below this report PR and energy as 0 (W/m²).
    pub irradiance_threshold_wm2: f64,
    /// Bucket width for the batch PR table (minutes).
    pub step_minutes: f64,
    /// Nearest-neighbor tolerance for the ambient temperature match (minutes).
    pub temp_tolerance_minutes: i64,
    /// Installed module technologies; drives the blended temperature
    /// coefficient and the fleet STC rating.
    pub module_mix: Vec<ModuleTechConfig>,
    /// Expected module temperature per calendar month (°C), from site
    /// characterization. Must contain exactly 12 entries.
    pub tmod_monthly_c: Vec<f64>,
}

impl Default for PerformanceConfig {
    fn default() -> Self {
        Self {
            irradiance_threshold_wm2: 30.0,
            step_minutes: 15.0,
            temp_tolerance_minutes: 8,
            module_mix: vec![
                ModuleTechConfig {
                    name: "mono".to_string(),
                    count: 624,
                    unit_wp: 395.0,
                    beta_per_c: -0.0036,
                },
                ModuleTechConfig {
                    name: "poly".to_string(),
                    count: 53,
                    unit_wp: 280.0,
                    beta_per_c: -0.004,
                },
            ],
            tmod_monthly_c: vec![
                36.9, 36.5, 36.4, 36.9, 38.1, 38.6, 24.4, 23.3, 36.5, 34.5, 34.4, 35.7,
            ],
        }
    }
}

/// One module technology in the installed mix.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ModuleTechConfig {
    /// Technology label (informational).
    pub name: String,
    /// Installed module count.
    pub count: u32,
    /// Nameplate wattage per module (Wp).
    pub unit_wp: f64,
    /// Temperature coefficient (1/°C, negative).
    pub beta_per_c: f64,
}

/// Telemetry tag vocabulary.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TagConfig {
    /// First redundant irradiance sensor tag.
    pub irradiance_primary: String,
    /// Second redundant irradiance sensor tag.
    pub irradiance_secondary: String,
    /// Additional irradiance sources pooled by the streaming tick only.
    pub irradiance_extra: Vec<String>,
    /// Suffix appended to a unit id to form its cumulative energy tag.
    pub energy_suffix: String,
    /// Inside ambient temperature tag (streaming).
    pub temp_inside: String,
    /// Outside ambient temperature tag (streaming).
    pub temp_outside: String,
    /// Maintenance annotation field.
    pub maintenance: String,
}

impl Default for TagConfig {
    fn default() -> Self {
        Self {
            irradiance_primary: "IRRADIANCE_PLC1(W/m^2)".to_string(),
            irradiance_secondary: "IRRADIANCE_PLC2(W/m^2)".to_string(),
            irradiance_extra: vec!["solar_rad".to_string()],
            energy_suffix: "_ACTIVE_ENERGY_SUPPLIED_(kWh)".to_string(),
            temp_inside: "temp_in".to_string(),
            temp_outside: "temp_out".to_string(),
            maintenance: "MAINTENANCE".to_string(),
        }
    }
}

fn default_units() -> Vec<UnitConfig> {
    [
        ("PM01", 36.0),
        ("PM02", 60.0),
        ("PM03", 24.0),
        ("PM04", 24.0),
        ("PM05", 10.0),
        ("PM06", 27.6),
        ("PM07", 1.5),
        ("PM08", 7.2),
        ("PM09", 7.2),
        ("PM10", 3.0),
        ("PM11", 5.0),
        ("PM12", 5.0),
    ]
    .iter()
    .map(|&(id, nominal_kw)| UnitConfig {
        id: id.to_string(),
        nominal_kw,
    })
    .collect()
}

/// Configuration error with field path and constraint description.
#[derive(Debug)]
pub struct ConfigError {
    /// Dotted field path (e.g., `"availability.block_hours"`).
    pub field: String,
    /// Human-readable constraint description.
    pub message: String,
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "config error: {} — {}", self.field, self.message)
    }
}

impl PlantConfig {
    /// Returns the characterized-site configuration (12 units, mono/poly
    /// module mix, monthly Tmod table).
    pub fn site_default() -> Self {
        Self {
            units: default_units(),
            availability: AvailabilityConfig::default(),
            performance: PerformanceConfig::default(),
            tags: TagConfig::default(),
        }
    }

    /// Parses a plant configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns a `ConfigError` if the file cannot be read or the TOML is invalid.
    pub fn from_toml_file(path: &Path) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path).map_err(|e| ConfigError {
            field: "config".to_string(),
            message: format!("cannot read \"{}\": {e}", path.display()),
        })?;
        Self::from_toml_str(&content)
    }

    /// Parses a plant configuration from a TOML string.
    ///
    /// # Errors
    ///
    /// Returns a `ConfigError` if the TOML is invalid or contains unknown fields.
    pub fn from_toml_str(s: &str) -> Result<Self, ConfigError> {
        toml::from_str(s).map_err(|e| ConfigError {
            field: "toml".to_string(),
            message: e.to_string(),
        })
    }

    /// Validates all fields and returns a list of errors.
    ///
    /// Returns an empty vector if configuration is valid.
    pub fn validate(&self) -> Vec<ConfigError> {
        let mut errors = Vec::new();

        if self.units.is_empty() {
            errors.push(ConfigError {
                field: "units".into(),
                message: "at least one unit must be configured".into(),
            });
        }
        let mut seen = BTreeSet::new();
        for u in &self.units {
            if !seen.insert(u.id.as_str()) {
                errors.push(ConfigError {
                    field: "units.id".into(),
                    message: format!("duplicate unit id \"{}\"", u.id),
                });
            }
            if u.nominal_kw <= 0.0 {
                errors.push(ConfigError {
                    field: format!("units.{}.nominal_kw", u.id),
                    message: "must be > 0".into(),
                });
            }
        }

        let av = &self.availability;
        if av.block_hours <= 0.0 {
            errors.push(ConfigError {
                field: "availability.block_hours".into(),
                message: "must be > 0".into(),
            });
        }
        if av.irradiance_threshold_wm2 < 0.0 {
            errors.push(ConfigError {
                field: "availability.irradiance_threshold_wm2".into(),
                message: "must be >= 0".into(),
            });
        }
        if !(av.operating_factor > 0.0 && av.operating_factor <= 1.0) {
            errors.push(ConfigError {
                field: "availability.operating_factor".into(),
                message: "must be in (0.0, 1.0]".into(),
            });
        }
        if !(0.0..=1.0).contains(&av.peer_ratio_threshold) {
            errors.push(ConfigError {
                field: "availability.peer_ratio_threshold".into(),
                message: "must be in [0.0, 1.0]".into(),
            });
        }

        let pr = &self.performance;
        if pr.step_minutes <= 0.0 {
            errors.push(ConfigError {
                field: "performance.step_minutes".into(),
                message: "must be > 0".into(),
            });
        }
        if pr.irradiance_threshold_wm2 < 0.0 {
            errors.push(ConfigError {
                field: "performance.irradiance_threshold_wm2".into(),
                message: "must be >= 0".into(),
            });
        }
        if pr.temp_tolerance_minutes < 0 {
            errors.push(ConfigError {
                field: "performance.temp_tolerance_minutes".into(),
                message: "must be >= 0".into(),
            });
        }
        if pr.module_mix.is_empty() {
            errors.push(ConfigError {
                field: "performance.module_mix".into(),
                message: "at least one module technology is required".into(),
            });
        }
        for tech in &pr.module_mix {
            if tech.count == 0 {
                errors.push(ConfigError {
                    field: format!("performance.module_mix.{}.count", tech.name),
                    message: "must be > 0".into(),
                });
            }
            if tech.unit_wp <= 0.0 {
                errors.push(ConfigError {
                    field: format!("performance.module_mix.{}.unit_wp", tech.name),
                    message: "must be > 0".into(),
                });
            }
        }
        if pr.tmod_monthly_c.len() != 12 {
            errors.push(ConfigError {
                field: "performance.tmod_monthly_c".into(),
                message: format!(
                    "must have exactly 12 entries, got {}",
                    pr.tmod_monthly_c.len()
                ),
            });
        }

        errors
    }

    /// Set of configured unit identifiers.
    pub fn unit_ids(&self) -> BTreeSet<String> {
        self.units.iter().map(|u| u.id.clone()).collect()
    }

    /// Nameplate rating for a unit, if configured.
    pub fn nominal_kw(&self, unit: &str) -> Option<f64> {
        self.units
            .iter()
            .find(|u| u.id == unit)
            .map(|u| u.nominal_kw)
    }

    /// Operating base power for a unit: nameplate scaled by the operating factor.
    pub fn operating_kw(&self, unit: &str) -> Option<f64> {
        self.nominal_kw(unit)
            .map(|p| p * self.availability.operating_factor)
    }

    /// Sum of operating base powers over the whole fleet (kW).
    pub fn psys_operating_kw(&self) -> f64 {
        self.units
            .iter()
            .map(|u| u.nominal_kw * self.availability.operating_factor)
            .sum()
    }

    /// Sum of nameplate ratings over the whole fleet (kW).
    pub fn nominal_total_kw(&self) -> f64 {
        self.units.iter().map(|u| u.nominal_kw).sum()
    }

    /// Cumulative energy tag for a unit.
    pub fn energy_tag(&self, unit: &str) -> String {
        format!("{unit}{}", self.tags.energy_suffix)
    }

    /// Extracts the unit id from a cumulative energy tag, if it matches.
    pub fn unit_for_energy_tag<'a>(&self, tag: &'a str) -> Option<&'a str> {
        tag.strip_suffix(self.tags.energy_suffix.as_str())
            .filter(|u| !u.is_empty())
    }

    /// All irradiance tags pooled by the streaming tick.
    pub fn irradiance_tags_all(&self) -> Vec<&str> {
        let mut tags = vec![
            self.tags.irradiance_primary.as_str(),
            self.tags.irradiance_secondary.as_str(),
        ];
        tags.extend(self.tags.irradiance_extra.iter().map(String::as_str));
        tags
    }

    /// Fleet STC rating derived from the module mix (kWp).
    pub fn stc_kwp(&self) -> f64 {
        self.performance
            .module_mix
            .iter()
            .map(|t| f64::from(t.count) * t.unit_wp / 1000.0)
            .sum()
    }

    /// Blended temperature coefficient: Wp-weighted mean over the mix (1/°C).
    pub fn blended_beta(&self) -> f64 {
        let total = self.stc_kwp();
        if total <= 0.0 {
            return 0.0;
        }
        self.performance
            .module_mix
            .iter()
            .map(|t| (f64::from(t.count) * t.unit_wp / 1000.0 / total) * t.beta_per_c)
            .sum()
    }

    /// Share of the fleet STC rating allocated to a unit, pro-rata by
    /// nameplate power (kWp).
    pub fn stc_share_kwp(&self, unit: &str) -> Option<f64> {
        let total_nominal = self.nominal_total_kw();
        if total_nominal <= 0.0 {
            return None;
        }
        self.nominal_kw(unit)
            .map(|p| self.stc_kwp() * p / total_nominal)
    }

    /// Expected module temperature for a 1-based calendar month (°C).
    ///
    /// Falls back to 0.0 when the table is malformed; `validate` rejects
    /// that configuration up front.
    pub fn tmod_for_month(&self, month: u32) -> f64 {
        self.performance
            .tmod_monthly_c
            .get(month.saturating_sub(1) as usize)
            .copied()
            .unwrap_or(0.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn site_default_is_valid() {
        let cfg = PlantConfig::site_default();
        let errors = cfg.validate();
        assert!(errors.is_empty(), "site default should be valid: {errors:?}");
    }

    #[test]
    fn site_default_has_twelve_units() {
        let cfg = PlantConfig::site_default();
        assert_eq!(cfg.units.len(), 12);
        assert_eq!(cfg.nominal_kw("PM01"), Some(36.0));
        assert_eq!(cfg.nominal_kw("PM02"), Some(60.0));
        assert_eq!(cfg.nominal_kw("PM99"), None);
    }

    #[test]
    fn operating_power_applies_factor() {
        let cfg = PlantConfig::site_default();
        assert_eq!(cfg.operating_kw("PM01"), Some(18.0));
        let expected_psys: f64 = 210.5 * 0.5;
        assert!((cfg.psys_operating_kw() - expected_psys).abs() < 1e-9);
    }

    #[test]
    fn stc_rating_matches_module_mix() {
        let cfg = PlantConfig::site_default();
        // 624 * 395 Wp + 53 * 280 Wp = 261.32 kWp
        assert!((cfg.stc_kwp() - 261.32).abs() < 1e-9);
    }

    #[test]
    fn blended_beta_is_power_weighted() {
        let cfg = PlantConfig::site_default();
        let beta = cfg.blended_beta();
        let expected = (246.48 / 261.32) * -0.0036 + (14.84 / 261.32) * -0.004;
        assert!((beta - expected).abs() < 1e-12);
        assert!(beta < -0.0036 && beta > -0.004);
    }

    #[test]
    fn stc_share_is_pro_rata() {
        let cfg = PlantConfig::site_default();
        let total: f64 = cfg
            .units
            .iter()
            .map(|u| cfg.stc_share_kwp(&u.id).unwrap_or(0.0))
            .sum();
        assert!((total - cfg.stc_kwp()).abs() < 1e-9);
        let pm02 = cfg.stc_share_kwp("PM02").unwrap_or(0.0);
        assert!((pm02 - 261.32 * 60.0 / 210.5).abs() < 1e-9);
    }

    #[test]
    fn energy_tag_round_trip() {
        let cfg = PlantConfig::site_default();
        let tag = cfg.energy_tag("PM07");
        assert_eq!(tag, "PM07_ACTIVE_ENERGY_SUPPLIED_(kWh)");
        assert_eq!(cfg.unit_for_energy_tag(&tag), Some("PM07"));
        assert_eq!(cfg.unit_for_energy_tag("IRRADIANCE_PLC1(W/m^2)"), None);
    }

    #[test]
    fn tmod_lookup_by_month() {
        let cfg = PlantConfig::site_default();
        assert_eq!(cfg.tmod_for_month(1), 36.9);
        assert_eq!(cfg.tmod_for_month(7), 24.4);
        assert_eq!(cfg.tmod_for_month(12), 35.7);
    }

    #[test]
    fn valid_toml_parses() {
        let toml = r#"
[[units]]
id = "A1"
nominal_kw = 20.0

[[units]]
id = "A2"
nominal_kw = 40.0

[availability]
irradiance_threshold_wm2 = 60.0
block_hours = 1.0
operating_factor = 0.6
peer_ratio_threshold = 0.85

[performance]
irradiance_threshold_wm2 = 25.0
step_minutes = 30.0
temp_tolerance_minutes = 10
tmod_monthly_c = [30, 30, 30, 30, 30, 30, 30, 30, 30, 30, 30, 30]

[[performance.module_mix]]
name = "mono"
count = 100
unit_wp = 400.0
beta_per_c = -0.0035
"#;
        let cfg = PlantConfig::from_toml_str(toml);
        assert!(cfg.is_ok(), "valid TOML should parse: {:?}", cfg.err());
        let cfg = cfg.ok();
        assert_eq!(cfg.as_ref().map(|c| c.units.len()), Some(2));
        assert_eq!(
            cfg.as_ref()
                .map(|c| c.availability.irradiance_threshold_wm2),
            Some(60.0)
        );
        assert_eq!(cfg.as_ref().map(|c| c.stc_kwp()), Some(40.0));
    }

    #[test]
    fn invalid_toml_unknown_field() {
        let toml = r#"
[availability]
bogus_field = true
"#;
        let result = PlantConfig::from_toml_str(toml);
        assert!(result.is_err());
    }

    #[test]
    fn partial_toml_uses_site_defaults() {
        let toml = r#"
[availability]
irradiance_threshold_wm2 = 40.0
"#;
        let cfg = PlantConfig::from_toml_str(toml);
        assert!(cfg.is_ok());
        let cfg = cfg.ok();
        assert_eq!(
            cfg.as_ref()
                .map(|c| c.availability.irradiance_threshold_wm2),
            Some(40.0)
        );
        // block_hours kept default
        assert_eq!(cfg.as_ref().map(|c| c.availability.block_hours), Some(1.0));
        // unit enumeration kept default
        assert_eq!(cfg.as_ref().map(|c| c.units.len()), Some(12));
    }

    #[test]
    fn validation_catches_duplicate_unit() {
        let mut cfg = PlantConfig::site_default();
        cfg.units.push(UnitConfig {
            id: "PM01".to_string(),
            nominal_kw: 5.0,
        });
        let errors = cfg.validate();
        assert!(errors.iter().any(|e| e.field == "units.id"));
    }

    #[test]
    fn validation_catches_bad_operating_factor() {
        let mut cfg = PlantConfig::site_default();
        cfg.availability.operating_factor = 0.0;
        let errors = cfg.validate();
        assert!(
            errors
                .iter()
                .any(|e| e.field == "availability.operating_factor")
        );
    }

    #[test]
    fn validation_catches_short_tmod_table() {
        let mut cfg = PlantConfig::site_default();
        cfg.performance.tmod_monthly_c.truncate(10);
        let errors = cfg.validate();
        assert!(
            errors
                .iter()
                .any(|e| e.field == "performance.tmod_monthly_c")
        );
    }

    #[test]
    fn validation_catches_empty_units() {
        let mut cfg = PlantConfig::site_default();
        cfg.units.clear();
        let errors = cfg.validate();
        assert!(errors.iter().any(|e| e.field == "units"));
    }
}
