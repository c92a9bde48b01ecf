use std::collections::HashMap;

/// Include-name to source text, fixed once built.
///
/// Tables are assembled when an effect's shader finishes loading and shared
/// behind an `Arc`. Entries cannot be added afterwards.
#[derive(Debug, Clone, Default)]
pub struct FragmentTable {
    fragments: HashMap<String, String>,
}

impl FragmentTable {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.fragments.get(name).map(String::as_str)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.fragments.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.fragments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fragments.is_empty()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.fragments.keys().map(String::as_str)
    }
}

impl<K, V> FromIterator<(K, V)> for FragmentTable
where
    K: Into<String>,
    V: Into<String>,
{
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self {
            fragments: iter
                .into_iter()
                .map(|(name, source)| (name.into(), source.into()))
                .collect(),
        }
    }
}
