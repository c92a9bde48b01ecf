//! Effect parameters and time modulation.
//!
//! A parameter is either a constant or a base value driven by a periodic
//! waveform. Everything is resolved once per frame by [`EffectConfig::resolve`]
//! before an effect sees it.
use std::collections::BTreeMap;
use std::f64::consts::TAU;

#[derive(Debug, Clone, PartialEq)]
pub enum ParamValue {
    Float(f64),
    Int(i64),
    Bool(bool),
    Vector(Vec<f64>),
    Text(String),
}

impl From<f64> for ParamValue {
    fn from(value: f64) -> Self {
        ParamValue::Float(value)
    }
}

impl From<i64> for ParamValue {
    fn from(value: i64) -> Self {
        ParamValue::Int(value)
    }
}

impl From<bool> for ParamValue {
    fn from(value: bool) -> Self {
        ParamValue::Bool(value)
    }
}

impl From<Vec<f64>> for ParamValue {
    fn from(value: Vec<f64>) -> Self {
        ParamValue::Vector(value)
    }
}

impl From<&str> for ParamValue {
    fn from(value: &str) -> Self {
        ParamValue::Text(value.to_string())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Waveform {
    #[default]
    None,
    Sine,
    Square,
    Triangle,
    Saw,
}

impl Waveform {
    pub fn parse(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "none" => Some(Waveform::None),
            "sine" | "sin" => Some(Waveform::Sine),
            "square" => Some(Waveform::Square),
            "triangle" | "tri" => Some(Waveform::Triangle),
            "saw" | "sawtooth" => Some(Waveform::Saw),
            _ => None,
        }
    }

    /// Value in `[-1, 1]` at normalized phase `phi` in `[0, 1)`.
    fn sample(self, phi: f64) -> f64 {
        match self {
            Waveform::None => 0.0,
            Waveform::Sine => (TAU * phi).sin(),
            Waveform::Square => {
                if phi < 0.5 {
                    1.0
                } else {
                    -1.0
                }
            }
            Waveform::Triangle => 2.0 * (2.0 * phi - 1.0).abs() - 1.0,
            Waveform::Saw => 2.0 * phi - 1.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RangeMode {
    #[default]
    Bipolar,
    /// Maps the wave into `[0, 1]` before scaling.
    Unipolar,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Modulation {
    pub wave: Waveform,
    pub freq: f64,
    pub phase: f64,
    pub scale: f64,
    pub offset: f64,
    pub range: RangeMode,
}

impl Default for Modulation {
    fn default() -> Self {
        Self {
            wave: Waveform::None,
            freq: 1.0,
            phase: 0.0,
            scale: 1.0,
            offset: 0.0,
            range: RangeMode::Bipolar,
        }
    }
}

impl Modulation {
    pub fn evaluate(&self, base: f64, time: f64) -> f64 {
        if self.wave == Waveform::None {
            return base;
        }
        let phi = (time * self.freq + self.phase).rem_euclid(1.0);
        let wave = self.wave.sample(phi);
        let wave = match self.range {
            RangeMode::Bipolar => wave,
            RangeMode::Unipolar => 0.5 * (wave + 1.0),
        };
        self.offset + self.scale * wave
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Param {
    Constant(ParamValue),
    Modulated { base: f64, modulation: Modulation },
}

impl Param {
    /// Whether the resolved value depends on time.
    pub fn is_modulated(&self) -> bool {
        matches!(self, Param::Modulated { modulation, .. } if modulation.wave != Waveform::None)
    }

    pub fn resolve(&self, time: f64) -> ParamValue {
        match self {
            Param::Constant(value) => value.clone(),
            Param::Modulated { base, modulation } => {
                ParamValue::Float(modulation.evaluate(*base, time))
            }
        }
    }
}

macro_rules! constant_from {
    ($($ty:ty),*) => {
        $(
            impl From<$ty> for Param {
                fn from(value: $ty) -> Self {
                    Param::Constant(value.into())
                }
            }
        )*
    };
}

constant_from!(ParamValue, f64, i64, bool, Vec<f64>, &str);

/// Named parameters of one effect instance, ordered by name.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EffectConfig {
    params: BTreeMap<String, Param>,
}

impl EffectConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, name: impl Into<String>, param: impl Into<Param>) -> Self {
        self.set(name, param);
        self
    }

    /// Returns the previous parameter under `name`, if any.
    pub fn set(&mut self, name: impl Into<String>, param: impl Into<Param>) -> Option<Param> {
        self.params.insert(name.into(), param.into())
    }

    pub fn get(&self, name: &str) -> Option<&Param> {
        self.params.get(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Param)> {
        self.params.iter().map(|(name, param)| (name.as_str(), param))
    }

    pub fn is_modulated(&self) -> bool {
        self.params.values().any(Param::is_modulated)
    }

    pub fn resolve(&self, time: f64) -> ResolvedParams {
        ResolvedParams {
            values: self
                .params
                .iter()
                .map(|(name, param)| (name.clone(), param.resolve(time)))
                .collect(),
        }
    }
}

/// Parameter values for one frame.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResolvedParams {
    values: BTreeMap<String, ParamValue>,
}

impl ResolvedParams {
    pub fn get(&self, name: &str) -> Option<&ParamValue> {
        self.values.get(name)
    }

    pub fn float(&self, name: &str, default: f64) -> f64 {
        match self.values.get(name) {
            Some(ParamValue::Float(v)) => *v,
            Some(ParamValue::Int(v)) => *v as f64,
            Some(ParamValue::Bool(v)) => f64::from(u8::from(*v)),
            _ => default,
        }
    }

    pub fn int(&self, name: &str, default: i64) -> i64 {
        match self.values.get(name) {
            Some(ParamValue::Int(v)) => *v,
            Some(ParamValue::Float(v)) => v.round() as i64,
            Some(ParamValue::Bool(v)) => i64::from(*v),
            _ => default,
        }
    }

    pub fn bool(&self, name: &str, default: bool) -> bool {
        match self.values.get(name) {
            Some(ParamValue::Bool(v)) => *v,
            Some(ParamValue::Int(v)) => *v != 0,
            Some(ParamValue::Float(v)) => *v != 0.0,
            _ => default,
        }
    }

    pub fn vector<const N: usize>(&self, name: &str, default: [f64; N]) -> [f64; N] {
        match self.values.get(name) {
            Some(ParamValue::Vector(values)) => {
                let mut out = default;
                for (slot, value) in out.iter_mut().zip(values) {
                    *slot = *value;
                }
                out
            }
            Some(ParamValue::Float(v)) => [*v; N],
            _ => default,
        }
    }

    pub fn text<'a>(&'a self, name: &str, default: &'a str) -> &'a str {
        match self.values.get(name) {
            Some(ParamValue::Text(v)) => v.as_str(),
            _ => default,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn modulated(wave: Waveform) -> Param {
        Param::Modulated {
            base: 0.75,
            modulation: Modulation {
                wave,
                ..Modulation::default()
            },
        }
    }

    fn value_at(param: &Param, time: f64) -> f64 {
        match param.resolve(time) {
            ParamValue::Float(v) => v,
            other => panic!("expected float, got {other:?}"),
        }
    }

    #[test]
    fn each_waveform_resolves() {
        let sine = modulated(Waveform::Sine);
        assert!((value_at(&sine, 0.25) - 1.0).abs() < 1e-12);
        assert!(value_at(&sine, 0.0).abs() < 1e-12);

        let square = modulated(Waveform::Square);
        assert_eq!(value_at(&square, 0.1), 1.0);
        assert_eq!(value_at(&square, 0.6), -1.0);

        let triangle = modulated(Waveform::Triangle);
        assert_eq!(value_at(&triangle, 0.0), 1.0);
        assert_eq!(value_at(&triangle, 0.5), -1.0);

        let saw = modulated(Waveform::Saw);
        assert_eq!(value_at(&saw, 0.0), -1.0);
        assert!((value_at(&saw, 0.75) - 0.5).abs() < 1e-12);
    }

    #[test]
    fn none_waveform_is_the_base_and_not_time_dependent() {
        let param = modulated(Waveform::None);
        assert_eq!(value_at(&param, 3.3), 0.75);
        assert!(!param.is_modulated());
    }

    #[test]
    fn unipolar_scale_and_offset() {
        let param = Param::Modulated {
            base: 0.0,
            modulation: Modulation {
                wave: Waveform::Square,
                scale: 0.5,
                offset: 0.25,
                range: RangeMode::Unipolar,
                ..Modulation::default()
            },
        };
        assert_eq!(value_at(&param, 0.0), 0.75);
        assert_eq!(value_at(&param, 0.5), 0.25);
    }

    #[test]
    fn negative_time_wraps_phase() {
        let saw = modulated(Waveform::Saw);
        assert!((value_at(&saw, -0.25) - 0.5).abs() < 1e-12);
    }

    #[test]
    fn resolved_getters_coerce_and_default() {
        let config = EffectConfig::new()
            .with("amount", 0.5)
            .with("levels", 4i64)
            .with("color", vec![1.0, 0.5])
            .with("mode", "screen");
        let params = config.resolve(0.0);
        assert_eq!(params.float("amount", 0.0), 0.5);
        assert_eq!(params.float("levels", 0.0), 4.0);
        assert_eq!(params.int("missing", 7), 7);
        assert_eq!(params.vector("color", [0.0, 0.0, 9.0]), [1.0, 0.5, 9.0]);
        assert_eq!(params.text("mode", "normal"), "screen");
        assert!(!config.is_modulated());
    }
}
