use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use compositor::{EffectConfig, Modulation, Param, ParamValue, PipelineSettings, RangeMode, Waveform};
use serde::de::{self, Deserializer};
use serde::ser::Serializer;
use serde::{Deserialize, Serialize};

pub const MAX_PROBE_RESOLUTION: u32 = 1024;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse configuration: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("failed to serialize configuration: {0}")]
    Serialize(#[from] toml::ser::Error),
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// A stack file: render tunables plus the ordered effect list.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct StackConfig {
    pub version: u32,
    #[serde(default)]
    pub render: RenderSettings,
    #[serde(default)]
    pub effects: Vec<EffectSpec>,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct RenderSettings {
    #[serde(default = "default_probe_resolution")]
    pub probe_resolution: u32,
    #[serde(default = "default_stats_bins")]
    pub stats_bins: usize,
    #[serde(
        default,
        deserialize_with = "deserialize_duration_opt",
        serialize_with = "serialize_duration_opt",
        skip_serializing_if = "Option::is_none"
    )]
    pub frame_interval: Option<Duration>,
}

impl Default for RenderSettings {
    fn default() -> Self {
        Self {
            probe_resolution: default_probe_resolution(),
            stats_bins: default_stats_bins(),
            frame_interval: None,
        }
    }
}

impl RenderSettings {
    pub fn pipeline_settings(&self) -> PipelineSettings {
        PipelineSettings {
            probe_resolution: self.probe_resolution,
            stats_bins: self.stats_bins,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct EffectSpec {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default)]
    pub solo: bool,
    #[serde(default)]
    pub params: BTreeMap<String, ParamSpec>,
}

/// A parameter as written in the stack file. A table with `value` (and
/// optionally `mod`) is modulated; anything else is a constant.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(untagged)]
pub enum ParamSpec {
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    Vector(Vec<f64>),
    // Last: a struct variant would also accept a one-element array.
    Modulated {
        value: f64,
        #[serde(default, rename = "mod", skip_serializing_if = "Option::is_none")]
        modulation: Option<ModulationSpec>,
    },
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct ModulationSpec {
    #[serde(rename = "type", default = "default_wave")]
    pub wave: String,
    #[serde(default = "default_one")]
    pub freq: f64,
    #[serde(default)]
    pub phase: f64,
    #[serde(default = "default_one")]
    pub scale: f64,
    #[serde(default)]
    pub offset: f64,
    #[serde(default)]
    pub range: RangeSpec,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RangeSpec {
    #[default]
    Bipolar,
    Unipolar,
}

fn default_probe_resolution() -> u32 {
    PipelineSettings::default().probe_resolution
}

fn default_stats_bins() -> usize {
    PipelineSettings::default().stats_bins
}

fn default_enabled() -> bool {
    true
}

fn default_wave() -> String {
    "none".to_string()
}

fn default_one() -> f64 {
    1.0
}

fn deserialize_duration_opt<'de, D>(deserializer: D) -> Result<Option<Duration>, D::Error>
where
    D: Deserializer<'de>,
{
    struct Visitor;
    impl<'de> de::Visitor<'de> for Visitor {
        type Value = Option<Duration>;

        fn expecting(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
            formatter.write_str("a duration as number of seconds or human-readable string")
        }

        fn visit_str<E>(self, v: &str) -> Result<Self::Value, E>
        where
            E: de::Error,
        {
            humantime::parse_duration(v)
                .map(Some)
                .map_err(|err| E::custom(format!("invalid duration '{v}': {err}")))
        }

        fn visit_i64<E>(self, v: i64) -> Result<Self::Value, E>
        where
            E: de::Error,
        {
            if v < 0 {
                return Err(E::custom("duration must be non-negative"));
            }
            Ok(Some(Duration::from_secs(v as u64)))
        }

        fn visit_f64<E>(self, v: f64) -> Result<Self::Value, E>
        where
            E: de::Error,
        {
            if !v.is_finite() || v.is_sign_negative() {
                return Err(E::custom("duration must be non-negative"));
            }
            Duration::try_from_secs_f64(v).map(Some).map_err(E::custom)
        }
    }

    deserializer.deserialize_any(Visitor)
}

fn serialize_duration_opt<S>(value: &Option<Duration>, serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    match value {
        Some(duration) => serializer.serialize_str(&humantime::format_duration(*duration).to_string()),
        None => serializer.serialize_none(),
    }
}

impl StackConfig {
    pub fn from_toml_str(input: &str) -> Result<Self, ConfigError> {
        let raw: StackConfig = toml::from_str(input)?;
        raw.validate()?;
        Ok(raw)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let raw = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&raw)
    }

    pub fn to_toml_string(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string(self)?)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.version != 1 {
            return Err(ConfigError::Invalid(format!(
                "unsupported config version {}; expected 1",
                self.version
            )));
        }

        if !(1..=MAX_PROBE_RESOLUTION).contains(&self.render.probe_resolution) {
            return Err(ConfigError::Invalid(format!(
                "render.probe_resolution must be in 1..={MAX_PROBE_RESOLUTION}, got {}",
                self.render.probe_resolution
            )));
        }

        if self.render.stats_bins < 2 {
            return Err(ConfigError::Invalid(format!(
                "render.stats_bins must be at least 2, got {}",
                self.render.stats_bins
            )));
        }

        if let Some(interval) = self.render.frame_interval {
            if interval.is_zero() {
                return Err(ConfigError::Invalid(
                    "render.frame_interval must be greater than zero".into(),
                ));
            }
        }

        for (index, effect) in self.effects.iter().enumerate() {
            if effect.kind.trim().is_empty() {
                return Err(ConfigError::Invalid(format!(
                    "effect #{index} has an empty type"
                )));
            }
            for (name, param) in &effect.params {
                param
                    .to_param()
                    .map_err(|reason| ConfigError::Invalid(format!(
                        "effect #{index} ({}) param '{name}': {reason}",
                        effect.kind
                    )))?;
            }
        }

        Ok(())
    }
}

impl EffectSpec {
    pub fn effect_config(&self) -> Result<EffectConfig, ConfigError> {
        let mut config = EffectConfig::new();
        for (name, param) in &self.params {
            let param = param.to_param().map_err(|reason| {
                ConfigError::Invalid(format!("{} param '{name}': {reason}", self.kind))
            })?;
            config.set(name.clone(), param);
        }
        Ok(config)
    }
}

impl ParamSpec {
    pub fn to_param(&self) -> Result<Param, String> {
        Ok(match self {
            ParamSpec::Modulated { value, modulation } => {
                if !value.is_finite() {
                    return Err("value must be finite".into());
                }
                match modulation {
                    None => Param::Constant(ParamValue::Float(*value)),
                    Some(spec) => Param::Modulated {
                        base: *value,
                        modulation: spec.to_modulation()?,
                    },
                }
            }
            ParamSpec::Bool(value) => Param::from(*value),
            ParamSpec::Int(value) => Param::from(*value),
            ParamSpec::Float(value) => Param::from(*value),
            ParamSpec::Text(value) => Param::from(value.as_str()),
            ParamSpec::Vector(values) => Param::from(values.clone()),
        })
    }
}

impl ModulationSpec {
    pub fn to_modulation(&self) -> Result<Modulation, String> {
        let wave = Waveform::parse(&self.wave)
            .ok_or_else(|| format!("unknown modulation type '{}'", self.wave))?;
        for (field, value) in [
            ("freq", self.freq),
            ("phase", self.phase),
            ("scale", self.scale),
            ("offset", self.offset),
        ] {
            if !value.is_finite() {
                return Err(format!("mod.{field} must be finite"));
            }
        }
        Ok(Modulation {
            wave,
            freq: self.freq,
            phase: self.phase,
            scale: self.scale,
            offset: self.offset,
            range: match self.range {
                RangeSpec::Bipolar => RangeMode::Bipolar,
                RangeSpec::Unipolar => RangeMode::Unipolar,
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
version = 1

[render]
probe_resolution = 64
stats_bins = 128
frame_interval = "16ms"

[[effects]]
type = "tint"
[effects.params]
amount = 0.5
mode = "screen"
color = [1, 0.2, 0.1]

[effects.params.hue]
value = 0.3
mod = { type = "sine", freq = 0.5, scale = 0.2, offset = 0.3, range = "unipolar" }

[[effects]]
type = "posterize"
enabled = false
solo = true
params = { levels = 5 }
"#;

    #[test]
    fn parses_sample_config() {
        let config = StackConfig::from_toml_str(SAMPLE).expect("parse config");
        assert_eq!(config.render.probe_resolution, 64);
        assert_eq!(config.render.frame_interval, Some(Duration::from_millis(16)));
        assert_eq!(config.effects.len(), 2);

        let tint = &config.effects[0];
        assert!(tint.enabled && !tint.solo);
        assert_eq!(tint.params.get("amount"), Some(&ParamSpec::Float(0.5)));
        assert_eq!(
            tint.params.get("color"),
            Some(&ParamSpec::Vector(vec![1.0, 0.2, 0.1]))
        );

        let posterize = &config.effects[1];
        assert!(!posterize.enabled && posterize.solo);
        assert_eq!(posterize.params.get("levels"), Some(&ParamSpec::Int(5)));
    }

    #[test]
    fn builds_effect_configs() {
        let config = StackConfig::from_toml_str(SAMPLE).unwrap();
        let effect = config.effects[0].effect_config().unwrap();
        assert!(effect.is_modulated());
        match effect.get("hue") {
            Some(Param::Modulated { base, modulation }) => {
                assert_eq!(*base, 0.3);
                assert_eq!(modulation.wave, Waveform::Sine);
                assert_eq!(modulation.range, RangeMode::Unipolar);
                assert_eq!(modulation.phase, 0.0);
            }
            other => panic!("unexpected hue param {other:?}"),
        }
        assert_eq!(effect.get("mode"), Some(&Param::from("screen")));
        assert!(!config.effects[1].effect_config().unwrap().is_modulated());
    }

    #[test]
    fn value_table_without_mod_is_constant() {
        let config = StackConfig::from_toml_str(
            r#"
version = 1
[[effects]]
type = "tint"
params = { amount = { value = 0.25 } }
"#,
        )
        .unwrap();
        let effect = config.effects[0].effect_config().unwrap();
        assert_eq!(effect.get("amount"), Some(&Param::from(0.25)));
    }

    #[test]
    fn single_element_array_stays_a_vector() {
        let config = StackConfig::from_toml_str(
            "version = 1\n[[effects]]\ntype = \"tint\"\nparams = { color = [0.5] }\n",
        )
        .unwrap();
        assert_eq!(
            config.effects[0].params.get("color"),
            Some(&ParamSpec::Vector(vec![0.5]))
        );
    }

    #[test]
    fn rejects_bad_values() {
        for input in [
            "version = 2",
            "version = 1\n[render]\nprobe_resolution = 0",
            "version = 1\n[render]\nprobe_resolution = 4096",
            "version = 1\n[render]\nstats_bins = 1",
            "version = 1\n[render]\nframe_interval = \"0s\"",
            "version = 1\n[[effects]]\ntype = \" \"",
            "version = 1\n[[effects]]\ntype = \"tint\"\nparams = { hue = { value = 1.0, mod = { type = \"wobble\" } } }",
        ] {
            let err = StackConfig::from_toml_str(input).unwrap_err();
            assert!(matches!(err, ConfigError::Invalid(_)), "{input}: {err}");
        }
    }

    #[test]
    fn rejects_out_of_range_interval() {
        let err = StackConfig::from_toml_str("version = 1\n[render]\nframe_interval = 1e30")
            .unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)), "{err}");
    }

    #[test]
    fn defaults_apply() {
        let config = StackConfig::from_toml_str("version = 1").unwrap();
        assert_eq!(config.render.pipeline_settings(), PipelineSettings::default());
        assert!(config.effects.is_empty());
    }

    #[test]
    fn serialized_config_reparses() {
        let config = StackConfig::from_toml_str(SAMPLE).unwrap();
        let written = config.to_toml_string().unwrap();
        assert_eq!(StackConfig::from_toml_str(&written).unwrap(), config);
    }

    #[test]
    fn loads_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("stack.toml");
        fs::write(&path, SAMPLE).unwrap();
        assert_eq!(StackConfig::load(&path).unwrap().effects.len(), 2);
        assert!(matches!(
            StackConfig::load(dir.path().join("missing.toml")),
            Err(ConfigError::Io { .. })
        ));
    }
}
