//! Pipeline configuration
//!
//! Top-level keys configure the run, first-level sections declare the
//! steps in order. See [`parser`] for the text format.

pub mod parser;
pub mod value;

pub use parser::{get_module_name, load, loads, render};
pub use value::{ConfigTable, ConfigValue};

use crate::core::error::PipelineError;
use crate::core::pipeline::Pipeline;
use crate::modules::ModuleRegistry;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Module run as the setup phase (ordinal 0)
pub const SETUP_MODULE: &str = "topology";

const RUN_KEYS: &[&str] = &[
    "run_dir",
    "mode",
    "ncores",
    "queue",
    "queue_limit",
    "job_timeout_min",
    "poll_interval_secs",
    "max_query_retries",
    "resubmit",
    "molecules",
    "clean",
];

/// Execution substrate for jobs
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionMode {
    Local,
    Slurm,
    Torque,
}

impl std::str::FromStr for ExecutionMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "local" => Ok(ExecutionMode::Local),
            "slurm" => Ok(ExecutionMode::Slurm),
            "torque" | "pbs" => Ok(ExecutionMode::Torque),
            other => Err(format!(
                "unknown mode '{}', expected one of local, slurm, torque",
                other
            )),
        }
    }
}

/// Typed run settings taken from the top-level keys
#[derive(Debug, Clone)]
pub struct RunSettings {
    /// Directory holding every step directory of the run
    pub run_dir: PathBuf,

    pub mode: ExecutionMode,

    /// Local worker processes (0 = available parallelism)
    pub ncores: usize,

    /// Queue or partition name for batch backends
    pub queue: Option<String>,

    /// Maximum outstanding queue submissions
    pub queue_limit: usize,

    /// Wall-time ceiling of a single job, in minutes
    pub job_timeout_min: u64,

    pub poll_interval: Duration,

    /// Consecutive failed status queries tolerated per job
    pub max_query_retries: u32,

    /// Resubmissions of a failed job
    pub resubmit: u32,

    /// Input files registered by the setup phase
    pub molecules: Vec<PathBuf>,

    /// Remove job scripts, logs and lists once a step succeeds
    pub clean: bool,
}

impl Default for RunSettings {
    fn default() -> Self {
        Self {
            run_dir: PathBuf::from("run1"),
            mode: ExecutionMode::Local,
            ncores: 0,
            queue: None,
            queue_limit: 100,
            job_timeout_min: 60,
            poll_interval: Duration::from_secs(1),
            max_query_retries: 5,
            resubmit: 0,
            molecules: Vec::new(),
            clean: false,
        }
    }
}

impl RunSettings {
    /// Read settings from the root table of a configuration tree
    pub fn from_table(root: &ConfigTable) -> Result<Self, PipelineError> {
        let mut settings = RunSettings::default();

        for (key, value) in root.iter() {
            if matches!(value, ConfigValue::Table(_)) {
                continue;
            }
            if !RUN_KEYS.contains(&key) {
                return Err(PipelineError::UnknownParameter {
                    module: "run".to_string(),
                    parameter: key.to_string(),
                });
            }
        }

        settings.run_dir = root
            .get("run_dir")
            .and_then(ConfigValue::as_path)
            .map(Path::to_path_buf)
            .ok_or_else(|| PipelineError::ConfigMissing("run_dir".to_string()))?;

        if let Some(mode) = root.get("mode") {
            let text = mode.as_str().ok_or_else(|| invalid("mode", "expected a string"))?;
            settings.mode = text.parse().map_err(|e: String| invalid("mode", &e))?;
        }
        if let Some(v) = root.get("ncores") {
            settings.ncores = non_negative(v, "ncores")? as usize;
        }
        if let Some(v) = root.get("queue") {
            let queue = v.as_str().ok_or_else(|| invalid("queue", "expected a string"))?;
            settings.queue = Some(queue.to_string());
        }
        if let Some(v) = root.get("queue_limit") {
            settings.queue_limit = (non_negative(v, "queue_limit")? as usize).max(1);
        }
        if let Some(v) = root.get("job_timeout_min") {
            settings.job_timeout_min = non_negative(v, "job_timeout_min")?.max(1) as u64;
        }
        if let Some(v) = root.get("poll_interval_secs") {
            let secs = v
                .as_float()
                .filter(|s| s.is_finite() && *s > 0.0)
                .ok_or_else(|| invalid("poll_interval_secs", "expected a positive number"))?;
            settings.poll_interval = Duration::from_secs_f64(secs);
        }
        if let Some(v) = root.get("max_query_retries") {
            settings.max_query_retries = non_negative(v, "max_query_retries")? as u32;
        }
        if let Some(v) = root.get("resubmit") {
            settings.resubmit = non_negative(v, "resubmit")? as u32;
        }
        if let Some(v) = root.get("molecules") {
            let items = v
                .as_list()
                .ok_or_else(|| invalid("molecules", "expected a list of paths"))?;
            settings.molecules = items
                .iter()
                .map(|item| {
                    item.as_path()
                        .map(Path::to_path_buf)
                        .ok_or_else(|| invalid("molecules", "expected a list of paths"))
                })
                .collect::<Result<_, _>>()?;
        }

        if let Some(v) = root.get("clean") {
            settings.clean = v.as_bool().ok_or_else(|| invalid("clean", "expected true or false"))?;
        }

        Ok(settings)
    }

    /// Job ceiling as a duration
    pub fn job_timeout(&self) -> Duration {
        Duration::from_secs(self.job_timeout_min * 60)
    }

    /// Concurrency budget for the selected backend
    pub fn concurrency_budget(&self) -> usize {
        match self.mode {
            ExecutionMode::Local => crate::execution::parse_ncores(self.ncores, usize::MAX),
            ExecutionMode::Slurm | ExecutionMode::Torque => self.queue_limit,
        }
    }

    /// Settings with `run_dir` and `molecules` anchored to the current
    /// directory
    ///
    /// Jobs run inside their step directory, so every path handed to them
    /// must be absolute.
    pub fn absolutized(&self) -> Result<Self, PipelineError> {
        let absolute =
            |p: &Path| std::path::absolute(p).map_err(|e| PipelineError::io(p, e));
        let mut settings = self.clone();
        settings.run_dir = absolute(self.run_dir.as_path())?;
        settings.molecules = self
            .molecules
            .iter()
            .map(|m| absolute(m.as_path()))
            .collect::<Result<_, _>>()?;
        Ok(settings)
    }

    /// Resolve relative paths against the directory of the config file
    fn rebase(&mut self, base: &Path) {
        if self.run_dir.is_relative() {
            self.run_dir = base.join(&self.run_dir);
        }
        for molecule in &mut self.molecules {
            if molecule.is_relative() {
                *molecule = base.join(&*molecule);
            }
        }
    }
}

fn invalid(key: &str, message: &str) -> PipelineError {
    PipelineError::InvalidValue {
        key: key.to_string(),
        message: message.to_string(),
    }
}

fn non_negative(value: &ConfigValue, key: &str) -> Result<i64, PipelineError> {
    value
        .as_int()
        .filter(|v| *v >= 0)
        .ok_or_else(|| invalid(key, "expected a non-negative integer"))
}

/// One configured step section, in declaration order
#[derive(Debug, Clone)]
pub struct StepSection {
    /// Section key as parsed, e.g. `exec.2`
    pub key: String,

    /// Module type name, e.g. `exec`
    pub module: String,

    /// User overrides for the module defaults
    pub overrides: ConfigTable,
}

/// Top-level pipeline configuration
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Raw parsed tree
    pub tree: ConfigTable,

    pub settings: RunSettings,

    /// Step sections; a leading `topology` section configures the setup phase
    pub sections: Vec<StepSection>,
}

impl PipelineConfig {
    /// Load pipeline configuration from a file
    ///
    /// Relative `run_dir` and `molecules` entries resolve against the
    /// directory containing the file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, PipelineError> {
        let path = path.as_ref();
        let tree = load(path)?;
        let mut config = Self::from_tree(tree)?;
        if let Some(base) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            config.settings.rebase(base);
        }
        Ok(config)
    }

    /// Parse pipeline configuration from text
    pub fn from_text(text: &str) -> Result<Self, PipelineError> {
        Self::from_tree(loads(text)?)
    }

    fn from_tree(tree: ConfigTable) -> Result<Self, PipelineError> {
        let settings = RunSettings::from_table(&tree)?;
        let sections: Vec<StepSection> = tree
            .tables()
            .map(|(key, table)| StepSection {
                key: key.to_string(),
                module: get_module_name(key).to_string(),
                overrides: table.clone(),
            })
            .collect();

        for (idx, section) in sections.iter().enumerate() {
            if section.module == SETUP_MODULE && idx != 0 {
                return Err(invalid(
                    &section.key,
                    "the setup module may only be the first section",
                ));
            }
        }

        Ok(Self {
            tree,
            settings,
            sections,
        })
    }

    /// Check that every step names a registered module and only overrides
    /// parameters the module declares
    pub fn validate(&self, registry: &ModuleRegistry) -> Result<(), PipelineError> {
        for section in &self.sections {
            registry.resolve_params(&section.module, &section.overrides)?;
        }
        if self.sections.len() <= usize::from(self.has_setup_section()) {
            return Err(PipelineError::ConfigMissing(
                "at least one step section".to_string(),
            ));
        }
        Ok(())
    }

    /// Whether the first section configures the setup phase explicitly
    pub fn has_setup_section(&self) -> bool {
        self.sections
            .first()
            .is_some_and(|s| s.module == SETUP_MODULE)
    }

    /// Convert config to a Pipeline domain model
    pub fn to_pipeline(&self, registry: &ModuleRegistry) -> Result<Pipeline, PipelineError> {
        self.validate(registry)?;
        Pipeline::from_config(self, registry)
    }
}
