//! Define sets handed to the preprocessor by callers.
//!
//! A `DefineSet` is the compile-time identity of a shader program: two sets are
//! the same program exactly when they compare equal, key by key and element by
//! element for array values.
use std::collections::BTreeMap;
use std::fmt;

/// A single define value as supplied by an effect.
#[derive(Debug, Clone, PartialEq)]
pub enum DefineValue {
    Int(i64),
    Float(f64),
    /// Rendered as `1`/`0` so that `#if FLAG` behaves.
    Bool(bool),
    Text(String),
    /// Rendered comma separated, mirroring how array defines are spliced into
    /// GLSL initialisers.
    Array(Vec<DefineValue>),
}

impl fmt::Display for DefineValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DefineValue::Int(value) => write!(f, "{value}"),
            // Positional notation with a decimal point at every magnitude.
            DefineValue::Float(value) if value.is_nan() => f.write_str("(0.0 / 0.0)"),
            DefineValue::Float(value) if value.is_infinite() => {
                let sign = if *value < 0.0 { "-" } else { "" };
                write!(f, "({sign}1.0 / 0.0)")
            }
            DefineValue::Float(value) if value.fract() == 0.0 => write!(f, "{value:.1}"),
            DefineValue::Float(value) => write!(f, "{value}"),
            DefineValue::Bool(value) => write!(f, "{}", u8::from(*value)),
            DefineValue::Text(value) => f.write_str(value),
            DefineValue::Array(values) => {
                for (index, value) in values.iter().enumerate() {
                    if index > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{value}")?;
                }
                Ok(())
            }
        }
    }
}

impl From<i64> for DefineValue {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

impl From<i32> for DefineValue {
    fn from(value: i32) -> Self {
        Self::Int(i64::from(value))
    }
}

impl From<f64> for DefineValue {
    fn from(value: f64) -> Self {
        Self::Float(value)
    }
}

impl From<bool> for DefineValue {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<&str> for DefineValue {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<String> for DefineValue {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

/// Ordered map of define name to value.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DefineSet {
    entries: BTreeMap<String, DefineValue>,
}

impl DefineSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert, used when effects assemble their defines inline.
    pub fn with(mut self, name: impl Into<String>, value: impl Into<DefineValue>) -> Self {
        self.insert(name, value);
        self
    }

    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<DefineValue>) {
        self.entries.insert(name.into(), value.into());
    }

    pub fn get(&self, name: &str) -> Option<&DefineValue> {
        self.entries.get(name)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &DefineValue)> {
        self.entries.iter().map(|(name, value)| (name.as_str(), value))
    }
}

impl<K, V> FromIterator<(K, V)> for DefineSet
where
    K: Into<String>,
    V: Into<DefineValue>,
{
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut set = DefineSet::new();
        for (name, value) in iter {
            set.insert(name, value);
        }
        set
    }
}
