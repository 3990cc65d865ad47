//! Configuration values and ordered tables

use std::path::{Path, PathBuf};

/// A single configuration value
#[derive(Debug, Clone)]
pub enum ConfigValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    /// A string that looked like a filesystem path, normalized
    Path(PathBuf),
    List(Vec<ConfigValue>),
    Table(ConfigTable),
}

impl PartialEq for ConfigValue {
    fn eq(&self, other: &Self) -> bool {
        use ConfigValue::*;
        match (self, other) {
            (Bool(a), Bool(b)) => a == b,
            (Int(a), Int(b)) => a == b,
            // nan never equals itself, but two parsed `nan` are the same value
            (Float(a), Float(b)) => a == b || (a.is_nan() && b.is_nan()),
            (Str(a), Str(b)) => a == b,
            (Path(a), Path(b)) => a == b,
            (List(a), List(b)) => a == b,
            (Table(a), Table(b)) => a == b,
            _ => false,
        }
    }
}

impl ConfigValue {
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            ConfigValue::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            ConfigValue::Int(i) => Some(*i),
            _ => None,
        }
    }

    /// Integers are accepted where a float is expected
    pub fn as_float(&self) -> Option<f64> {
        match self {
            ConfigValue::Float(f) => Some(*f),
            ConfigValue::Int(i) => Some(*i as f64),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            ConfigValue::Str(s) => Some(s),
            _ => None,
        }
    }

    /// Paths and plain strings both convert to a path
    pub fn as_path(&self) -> Option<&Path> {
        match self {
            ConfigValue::Path(p) => Some(p),
            ConfigValue::Str(s) => Some(Path::new(s)),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[ConfigValue]> {
        match self {
            ConfigValue::List(l) => Some(l),
            _ => None,
        }
    }

    pub fn as_table(&self) -> Option<&ConfigTable> {
        match self {
            ConfigValue::Table(t) => Some(t),
            _ => None,
        }
    }

    /// Short type name used in diagnostics
    pub fn kind(&self) -> &'static str {
        match self {
            ConfigValue::Bool(_) => "boolean",
            ConfigValue::Int(_) => "integer",
            ConfigValue::Float(_) => "float",
            ConfigValue::Str(_) => "string",
            ConfigValue::Path(_) => "path",
            ConfigValue::List(_) => "list",
            ConfigValue::Table(_) => "table",
        }
    }

    /// Convert a YAML node (module defaults) into a configuration value
    ///
    /// Returns `None` for mappings with non-string keys.
    pub fn from_yaml(value: &serde_yaml::Value) -> Option<ConfigValue> {
        use serde_yaml::Value;
        match value {
            Value::Bool(b) => Some(ConfigValue::Bool(*b)),
            Value::Number(n) => match n.as_i64() {
                Some(i) => Some(ConfigValue::Int(i)),
                None => n.as_f64().map(ConfigValue::Float),
            },
            Value::String(s) => Some(ConfigValue::Str(s.clone())),
            Value::Sequence(seq) => seq
                .iter()
                .map(ConfigValue::from_yaml)
                .collect::<Option<Vec<_>>>()
                .map(ConfigValue::List),
            Value::Mapping(map) => {
                let mut table = ConfigTable::new();
                for (k, v) in map {
                    let key = k.as_str()?.to_string();
                    table.insert(key, ConfigValue::from_yaml(v)?);
                }
                Some(ConfigValue::Table(table))
            }
            Value::Tagged(tagged) => ConfigValue::from_yaml(&tagged.value),
            // unset defaults read as empty strings
            Value::Null => Some(ConfigValue::Str(String::new())),
        }
    }
}

impl From<bool> for ConfigValue {
    fn from(v: bool) -> Self {
        ConfigValue::Bool(v)
    }
}

impl From<i64> for ConfigValue {
    fn from(v: i64) -> Self {
        ConfigValue::Int(v)
    }
}

impl From<f64> for ConfigValue {
    fn from(v: f64) -> Self {
        ConfigValue::Float(v)
    }
}

impl From<&str> for ConfigValue {
    fn from(v: &str) -> Self {
        ConfigValue::Str(v.to_string())
    }
}

impl From<PathBuf> for ConfigValue {
    fn from(v: PathBuf) -> Self {
        ConfigValue::Path(v)
    }
}

impl From<ConfigTable> for ConfigValue {
    fn from(v: ConfigTable) -> Self {
        ConfigValue::Table(v)
    }
}

/// Insertion-ordered key/value table
///
/// Section order carries meaning (it is the pipeline order), so lookups go
/// through a small vector instead of a hash map.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConfigTable {
    entries: Vec<(String, ConfigValue)>,
}

impl ConfigTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, key: &str) -> Option<&ConfigValue> {
        self.entries.iter().find(|(k, _)| k == key).map(|(_, v)| v)
    }

    pub fn get_mut(&mut self, key: &str) -> Option<&mut ConfigValue> {
        self.entries
            .iter_mut()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    /// Insert or replace a value; replacing keeps the original position
    pub fn insert(&mut self, key: impl Into<String>, value: ConfigValue) -> Option<ConfigValue> {
        let key = key.into();
        match self.get_mut(&key) {
            Some(slot) => Some(std::mem::replace(slot, value)),
            None => {
                self.entries.push((key, value));
                None
            }
        }
    }

    pub fn remove(&mut self, key: &str) -> Option<ConfigValue> {
        let idx = self.entries.iter().position(|(k, _)| k == key)?;
        Some(self.entries.remove(idx).1)
    }

    /// Rename a key in place, keeping its position
    pub fn rename(&mut self, from: &str, to: impl Into<String>) -> bool {
        match self.entries.iter_mut().find(|(k, _)| k == from) {
            Some(entry) => {
                entry.0 = to.into();
                true
            }
            None => false,
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &ConfigValue)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(k, _)| k.as_str())
    }

    /// Child tables in declaration order
    pub fn tables(&self) -> impl Iterator<Item = (&str, &ConfigTable)> {
        self.entries.iter().filter_map(|(k, v)| match v {
            ConfigValue::Table(t) => Some((k.as_str(), t)),
            _ => None,
        })
    }

    /// Get or create a child table
    ///
    /// A non-table value under the same key is replaced.
    pub fn table_mut(&mut self, key: &str) -> &mut ConfigTable {
        let idx = match self.entries.iter().position(|(k, _)| k == key) {
            Some(idx) => {
                if !matches!(self.entries[idx].1, ConfigValue::Table(_)) {
                    self.entries[idx].1 = ConfigValue::Table(ConfigTable::new());
                }
                idx
            }
            None => {
                self.entries
                    .push((key.to_string(), ConfigValue::Table(ConfigTable::new())));
                self.entries.len() - 1
            }
        };
        match &mut self.entries[idx].1 {
            ConfigValue::Table(t) => t,
            _ => unreachable!("entry was just made a table"),
        }
    }
}

impl<'a> IntoIterator for &'a ConfigTable {
    type Item = &'a (String, ConfigValue);
    type IntoIter = std::slice::Iter<'a, (String, ConfigValue)>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.iter()
    }
}
