//! Module registry - name to (defaults, constructor) table

use crate::core::{
    config::{ConfigTable, ConfigValue},
    error::PipelineError,
};
use crate::modules::{chunked, exec, seletop, topology, PipelineModule};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

/// Where a module's declared defaults come from
#[derive(Debug, Clone)]
pub enum DefaultsSource {
    /// YAML compiled into the binary
    Embedded(&'static str),
    /// YAML file read when parameters are resolved
    File(PathBuf),
}

impl DefaultsSource {
    /// Load the defaults as a parameter table
    pub fn load(&self, module: &str) -> Result<ConfigTable, PipelineError> {
        let text = match self {
            DefaultsSource::Embedded(text) => (*text).to_string(),
            DefaultsSource::File(path) => std::fs::read_to_string(path).map_err(|_| {
                PipelineError::ConfigMissing(format!(
                    "defaults file {} for module '{}'",
                    path.display(),
                    module
                ))
            })?,
        };

        let invalid = |message: String| PipelineError::InvalidValue {
            key: module.to_string(),
            message,
        };
        let yaml: serde_yaml::Value =
            serde_yaml::from_str(&text).map_err(|e| invalid(format!("bad defaults: {}", e)))?;
        if yaml.is_null() {
            return Ok(ConfigTable::new());
        }
        match ConfigValue::from_yaml(&yaml) {
            Some(ConfigValue::Table(table)) => Ok(table),
            _ => Err(invalid("defaults must be a mapping".to_string())),
        }
    }
}

/// Type for module constructors
pub type ModuleConstructor = Arc<dyn Fn() -> Box<dyn PipelineModule> + Send + Sync>;

#[derive(Clone)]
struct ModuleEntry {
    defaults: DefaultsSource,
    constructor: ModuleConstructor,
}

/// Table of known module types
///
/// Built once at process start and passed to whatever needs it.
#[derive(Clone, Default)]
pub struct ModuleRegistry {
    entries: BTreeMap<String, ModuleEntry>,
}

impl ModuleRegistry {
    /// Empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry holding the built-in modules
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register(
            topology::NAME,
            DefaultsSource::Embedded(topology::DEFAULTS),
            || Box::new(topology::Topology),
        );
        registry.register(
            exec::NAME,
            DefaultsSource::Embedded(exec::DEFAULTS),
            || Box::new(exec::Exec),
        );
        registry.register(
            chunked::NAME,
            DefaultsSource::Embedded(chunked::DEFAULTS),
            || Box::new(chunked::Chunked),
        );
        registry.register(
            seletop::NAME,
            DefaultsSource::Embedded(seletop::DEFAULTS),
            || Box::new(seletop::SeleTop),
        );
        registry
    }

    /// Register a module type, replacing any previous one of the same name
    pub fn register<F>(&mut self, name: &str, defaults: DefaultsSource, constructor: F)
    where
        F: Fn() -> Box<dyn PipelineModule> + Send + Sync + 'static,
    {
        self.entries.insert(
            name.to_string(),
            ModuleEntry {
                defaults,
                constructor: Arc::new(constructor),
            },
        );
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    /// Registered module names, sorted
    pub fn names(&self) -> Vec<&str> {
        self.entries.keys().map(String::as_str).collect()
    }

    fn entry(&self, name: &str) -> Result<&ModuleEntry, PipelineError> {
        self.entries
            .get(name)
            .ok_or_else(|| PipelineError::UnknownModule(name.to_string()))
    }

    /// Declared defaults of a module
    pub fn defaults(&self, name: &str) -> Result<ConfigTable, PipelineError> {
        self.entry(name)?.defaults.load(name)
    }

    /// Instantiate a module
    pub fn create(&self, name: &str) -> Result<Box<dyn PipelineModule>, PipelineError> {
        Ok((self.entry(name)?.constructor)())
    }

    /// Overlay user overrides on a module's defaults
    ///
    /// Every override key must be declared in the defaults. Nested tables
    /// overlay recursively, and an integer may stand in for a float.
    pub fn resolve_params(
        &self,
        name: &str,
        overrides: &ConfigTable,
    ) -> Result<ConfigTable, PipelineError> {
        let mut params = self.defaults(name)?;
        overlay(name, &mut params, overrides)?;
        Ok(params)
    }
}

impl std::fmt::Debug for ModuleRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModuleRegistry")
            .field("modules", &self.names())
            .finish()
    }
}

fn overlay(
    module: &str,
    params: &mut ConfigTable,
    overrides: &ConfigTable,
) -> Result<(), PipelineError> {
    for (key, value) in overrides {
        let Some(current) = params.get_mut(key) else {
            return Err(PipelineError::UnknownParameter {
                module: module.to_string(),
                parameter: key.to_string(),
            });
        };
        match value {
            ConfigValue::Table(patch) if matches!(current, ConfigValue::Table(_)) => {
                if let ConfigValue::Table(inner) = current {
                    overlay(module, inner, patch)?;
                }
            }
            ConfigValue::Int(i) if matches!(current, ConfigValue::Float(_)) => {
                *current = ConfigValue::Float(*i as f64);
            }
            _ => *current = value.clone(),
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::config::loads;

    #[test]
    fn test_builtins_registered() {
        let registry = ModuleRegistry::with_builtins();
        assert_eq!(registry.names(), vec!["chunked", "exec", "seletop", "topology"]);
        for name in registry.names() {
            registry.defaults(name).unwrap();
            registry.create(name).unwrap();
        }
    }

    #[test]
    fn test_unknown_module() {
        let registry = ModuleRegistry::with_builtins();
        assert!(matches!(
            registry.resolve_params("rigidbody", &ConfigTable::new()),
            Err(PipelineError::UnknownModule(ref m)) if m == "rigidbody"
        ));
    }

    #[test]
    fn test_overrides_replace_defaults() {
        let registry = ModuleRegistry::with_builtins();
        let tree = loads("[seletop]\nselect = 5\n").unwrap();
        let overrides = tree.get("seletop").and_then(ConfigValue::as_table).unwrap();

        let params = registry.resolve_params("seletop", overrides).unwrap();
        assert_eq!(params.get("select").and_then(ConfigValue::as_int), Some(5));
    }

    #[test]
    fn test_unknown_override_rejected() {
        let registry = ModuleRegistry::with_builtins();
        let tree = loads("[seletop]\nselct = 5\n").unwrap();
        let overrides = tree.get("seletop").and_then(ConfigValue::as_table).unwrap();

        assert!(matches!(
            registry.resolve_params("seletop", overrides),
            Err(PipelineError::UnknownParameter { ref parameter, .. }) if parameter == "selct"
        ));
    }

    #[test]
    fn test_nested_overlay_and_int_promotion() {
        let mut registry = ModuleRegistry::new();
        registry.register(
            "custom",
            DefaultsSource::Embedded("weight: 0.5\nlimits:\n  low: 1\n  high: 9\n"),
            || Box::new(seletop::SeleTop),
        );
        let tree = loads("[custom]\nweight = 2\n[custom.limits]\nhigh = 20\n").unwrap();
        let overrides = tree.get("custom").and_then(ConfigValue::as_table).unwrap();

        let params = registry.resolve_params("custom", overrides).unwrap();
        assert_eq!(params.get("weight"), Some(&ConfigValue::Float(2.0)));
        let limits = params.get("limits").and_then(ConfigValue::as_table).unwrap();
        assert_eq!(limits.get("low").and_then(ConfigValue::as_int), Some(1));
        assert_eq!(limits.get("high").and_then(ConfigValue::as_int), Some(20));
    }

    #[test]
    fn test_defaults_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("defaults.yaml");
        std::fs::write(&path, "threshold: 3\n").unwrap();

        let source = DefaultsSource::File(path);
        let table = source.load("custom").unwrap();
        assert_eq!(table.get("threshold").and_then(ConfigValue::as_int), Some(3));

        let missing = DefaultsSource::File(dir.path().join("nope.yaml"));
        assert!(matches!(
            missing.load("custom"),
            Err(PipelineError::ConfigMissing(_))
        ));
    }
}
