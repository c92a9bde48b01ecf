//! Hash chain over the effect stack.
//!
//! Each position's chain folds the previous chain, the effect identity, the
//! effect's configuration and, for time-modulated effects, the requested
//! time. Values are written with a type tag and lengths so distinct configs
//! cannot collide through concatenation.
use xxhash_rust::xxh3::Xxh3;

use crate::param::{EffectConfig, Param, ParamValue, RangeMode, Waveform};
use crate::types::EffectId;

const XXH3_SEED: u64 = 0x5ca1_ab1e_c0de_d00d;

const TAG_ENABLED: u8 = 0xE1;
const TAG_DISABLED: u8 = 0xD0;

/// Seeded XXH3 with typed little-endian writes.
pub struct StableHasher {
    inner: Xxh3,
}

impl Default for StableHasher {
    fn default() -> Self {
        Self::new()
    }
}

impl StableHasher {
    pub fn new() -> Self {
        Self {
            inner: Xxh3::with_seed(XXH3_SEED),
        }
    }

    /// Hasher whose input starts with an earlier chain value.
    fn continuing(previous: u64) -> Self {
        let mut hasher = Self::new();
        hasher.write_u64(previous);
        hasher
    }

    pub fn write_bytes(&mut self, bytes: &[u8]) {
        self.inner.update(bytes);
    }

    pub fn write_u8(&mut self, value: u8) {
        self.write_bytes(&[value]);
    }

    pub fn write_bool(&mut self, value: bool) {
        self.write_u8(u8::from(value));
    }

    pub fn write_u64(&mut self, value: u64) {
        self.write_bytes(&value.to_le_bytes());
    }

    pub fn write_f64(&mut self, value: f64) {
        self.write_u64(value.to_bits());
    }

    pub fn write_str(&mut self, value: &str) {
        self.write_u64(value.len() as u64);
        self.write_bytes(value.as_bytes());
    }

    pub fn finish(&self) -> u64 {
        self.inner.digest()
    }
}

/// Fingerprint of one effect's parameters, independent of time.
pub fn config_hash(config: &EffectConfig) -> u64 {
    let mut hasher = StableHasher::new();
    for (name, param) in config.iter() {
        hasher.write_str(name);
        write_param(&mut hasher, param);
    }
    hasher.finish()
}

fn write_param(hasher: &mut StableHasher, param: &Param) {
    match param {
        Param::Constant(value) => {
            hasher.write_u8(0);
            write_value(hasher, value);
        }
        Param::Modulated { base, modulation } => {
            hasher.write_u8(1);
            hasher.write_f64(*base);
            hasher.write_u8(match modulation.wave {
                Waveform::None => 0,
                Waveform::Sine => 1,
                Waveform::Square => 2,
                Waveform::Triangle => 3,
                Waveform::Saw => 4,
            });
            hasher.write_f64(modulation.freq);
            hasher.write_f64(modulation.phase);
            hasher.write_f64(modulation.scale);
            hasher.write_f64(modulation.offset);
            hasher.write_u8(match modulation.range {
                RangeMode::Bipolar => 0,
                RangeMode::Unipolar => 1,
            });
        }
    }
}

fn write_value(hasher: &mut StableHasher, value: &ParamValue) {
    match value {
        ParamValue::Float(v) => {
            hasher.write_u8(0);
            hasher.write_f64(*v);
        }
        ParamValue::Int(v) => {
            hasher.write_u8(1);
            hasher.write_u64(*v as u64);
        }
        ParamValue::Bool(v) => {
            hasher.write_u8(2);
            hasher.write_bool(*v);
        }
        ParamValue::Vector(values) => {
            hasher.write_u8(3);
            hasher.write_u64(values.len() as u64);
            for v in values {
                hasher.write_f64(*v);
            }
        }
        ParamValue::Text(v) => {
            hasher.write_u8(4);
            hasher.write_str(v);
        }
    }
}

/// Chain value before the first effect; changes whenever the source does.
pub fn seed(source_generation: u64) -> u64 {
    let mut hasher = StableHasher::new();
    hasher.write_u64(source_generation);
    hasher.finish()
}

/// Chain step for an effect that runs at this position.
pub fn fold_enabled(previous: u64, id: EffectId, config: u64, time: Option<f64>) -> u64 {
    let mut hasher = StableHasher::continuing(previous);
    hasher.write_u8(TAG_ENABLED);
    hasher.write_u64(id.0);
    hasher.write_u64(config);
    if let Some(time) = time {
        hasher.write_f64(time);
    }
    hasher.finish()
}

/// Chain step for an effect that is skipped, directly or because another
/// effect is soloed.
pub fn fold_disabled(previous: u64, id: EffectId) -> u64 {
    let mut hasher = StableHasher::continuing(previous);
    hasher.write_u8(TAG_DISABLED);
    hasher.write_u64(id.0);
    hasher.finish()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hashing_is_deterministic_and_order_sensitive() {
        let mut a = StableHasher::new();
        a.write_bytes(b"ab");
        let mut b = StableHasher::new();
        b.write_bytes(b"ab");
        let mut swapped = StableHasher::new();
        swapped.write_bytes(b"ba");
        assert_eq!(a.finish(), b.finish());
        assert_ne!(a.finish(), swapped.finish());

        let mut split = StableHasher::new();
        split.write_str("a");
        split.write_str("b");
        let mut joined = StableHasher::new();
        joined.write_str("ab");
        assert_ne!(split.finish(), joined.finish());
    }

    #[test]
    fn chain_depends_on_every_earlier_step() {
        let (first, second) = (EffectId(1), EffectId(2));
        let start = seed(0);
        let ab = fold_enabled(fold_enabled(start, first, 10, None), second, 20, None);
        let ba = fold_enabled(fold_enabled(start, second, 20, None), first, 10, None);
        assert_eq!(
            ab,
            fold_enabled(fold_enabled(seed(0), first, 10, None), second, 20, None)
        );
        assert_ne!(ab, ba);
        assert_ne!(seed(0), seed(1));
    }

    #[test]
    fn config_hash_sees_every_value() {
        let base = EffectConfig::new().with("amount", 0.5).with("mode", "add");
        let changed = base.clone().with("amount", 0.6);
        let retyped = base.clone().with("amount", 1i64);
        assert_eq!(config_hash(&base), config_hash(&base.clone()));
        assert_ne!(config_hash(&base), config_hash(&changed));
        assert_ne!(config_hash(&base), config_hash(&retyped));
    }

    #[test]
    fn disabled_and_enabled_steps_differ() {
        let id = EffectId(3);
        let start = seed(0);
        assert_ne!(fold_disabled(start, id), fold_enabled(start, id, 0, None));
        assert_ne!(
            fold_enabled(start, id, 7, Some(1.0)),
            fold_enabled(start, id, 7, Some(2.0))
        );
    }
}
