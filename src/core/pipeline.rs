//! Pipeline domain model and on-disk step layout

use crate::core::{
    config::{ConfigTable, PipelineConfig, RunSettings, SETUP_MODULE},
    error::PipelineError,
    manifest::{OutputManifest, MANIFEST_FILE},
    state::{PipelineState, StepState},
    step::Step,
};
use crate::modules::ModuleRegistry;
use std::path::{Path, PathBuf};

/// Directory of the setup phase (ordinal 0)
pub const SETUP_DIR: &str = "topology";

/// Prefix of numbered step directories
pub const STEP_DIR_PREFIX: &str = "step_";

/// Directory name of the step with a given ordinal
///
/// Ordinal 0 is the setup directory, every other ordinal is
/// `step_NN` with the ordinal zero-padded to two digits.
pub fn step_dir_name(ordinal: usize) -> String {
    if ordinal == 0 {
        SETUP_DIR.to_string()
    } else {
        format!("{}{:02}", STEP_DIR_PREFIX, ordinal)
    }
}

/// Working directory of a step inside a run directory
pub fn step_dir(run_dir: &Path, ordinal: usize) -> PathBuf {
    run_dir.join(step_dir_name(ordinal))
}

/// Directory holding the manifest a step consumes
///
/// Ordinal 0 has no predecessor. Ordinal 1 reads the setup directory,
/// every later ordinal reads the directory of `ordinal - 1`.
pub fn predecessor_dir(run_dir: &Path, ordinal: usize) -> Option<PathBuf> {
    match ordinal {
        0 => None,
        n => Some(step_dir(run_dir, n - 1)),
    }
}

/// A configured pipeline run
///
/// Steps are stored in an arena indexed by ordinal.
#[derive(Debug, Clone)]
pub struct Pipeline {
    /// Run name (the run directory's file name)
    pub name: String,

    /// Run-level settings
    pub settings: RunSettings,

    /// Steps indexed by ordinal
    pub steps: Vec<Step>,

    /// Execution state
    pub state: PipelineState,
}

impl Pipeline {
    /// Create a pipeline from configuration
    ///
    /// Resolves every step's parameters up front, so configuration errors
    /// surface before anything runs.
    pub fn from_config(
        config: &PipelineConfig,
        registry: &ModuleRegistry,
    ) -> Result<Self, PipelineError> {
        let settings = config.settings.absolutized()?;
        let run_dir = &settings.run_dir;
        let mut steps = Vec::with_capacity(config.sections.len() + 1);

        if !config.has_setup_section() {
            let params = registry.resolve_params(SETUP_MODULE, &ConfigTable::new())?;
            steps.push(Step::new(0, SETUP_MODULE, SETUP_MODULE, params, step_dir(run_dir, 0)));
        }

        for section in &config.sections {
            let ordinal = steps.len();
            let params = registry.resolve_params(&section.module, &section.overrides)?;
            steps.push(Step::new(
                ordinal,
                section.key.clone(),
                section.module.clone(),
                params,
                step_dir(run_dir, ordinal),
            ));
        }

        let name = run_dir
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "run".to_string());

        Ok(Pipeline {
            name,
            settings,
            steps,
            state: PipelineState::new(),
        })
    }

    pub fn run_dir(&self) -> &Path {
        &self.settings.run_dir
    }

    /// Get a step by ordinal
    pub fn step(&self, ordinal: usize) -> Option<&Step> {
        self.steps.get(ordinal)
    }

    /// Get a mutable step by ordinal
    pub fn step_mut(&mut self, ordinal: usize) -> Option<&mut Step> {
        self.steps.get_mut(ordinal)
    }

    /// Path of the manifest consumed by a step
    pub fn predecessor_manifest_path(&self, ordinal: usize) -> Option<PathBuf> {
        predecessor_dir(self.run_dir(), ordinal).map(|dir| dir.join(MANIFEST_FILE))
    }

    /// Manifest consumed by a step
    ///
    /// Ordinal 0 gets an empty manifest; for every other ordinal a missing
    /// manifest is fatal.
    pub fn predecessor_manifest(&self, ordinal: usize) -> Result<OutputManifest, PipelineError> {
        let Some(dir) = predecessor_dir(self.run_dir(), ordinal) else {
            return Ok(OutputManifest::empty());
        };
        if !dir.join(MANIFEST_FILE).is_file() {
            let module = self
                .step(ordinal)
                .map(|s| s.module.clone())
                .unwrap_or_default();
            return Err(PipelineError::ManifestMissing {
                ordinal,
                module,
                path: dir.join(MANIFEST_FILE),
            });
        }
        OutputManifest::load(&dir)
    }

    /// Check if every step reached a terminal state
    pub fn is_complete(&self) -> bool {
        self.steps.iter().all(|s| s.state.is_terminal())
    }

    /// Check if any step failed
    pub fn has_failed(&self) -> bool {
        self.steps
            .iter()
            .any(|s| matches!(s.state, StepState::Failed { .. }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::manifest::OutputManifest;

    fn pipeline(text: &str) -> Pipeline {
        let config = PipelineConfig::from_text(text).unwrap();
        config.to_pipeline(&ModuleRegistry::with_builtins()).unwrap()
    }

    #[test]
    fn test_step_dir_names() {
        assert_eq!(step_dir_name(0), "topology");
        assert_eq!(step_dir_name(1), "step_01");
        assert_eq!(step_dir_name(12), "step_12");
        assert_eq!(step_dir_name(105), "step_105");
    }

    #[test]
    fn test_predecessor_addressing() {
        let run = Path::new("/runs/r1");
        assert_eq!(predecessor_dir(run, 0), None);
        assert_eq!(predecessor_dir(run, 1), Some(PathBuf::from("/runs/r1/topology")));
        assert_eq!(predecessor_dir(run, 2), Some(PathBuf::from("/runs/r1/step_01")));
        assert_eq!(predecessor_dir(run, 10), Some(PathBuf::from("/runs/r1/step_09")));
    }

    #[test]
    fn test_implicit_setup_step() {
        let p = pipeline("run_dir = \"/runs/r1\"\n[exec]\ncommand = \"true\"\n[exec]\ncommand = \"true\"\n");

        assert_eq!(p.steps.len(), 3);
        assert_eq!(p.steps[0].module, "topology");
        assert_eq!(p.steps[0].workdir, PathBuf::from("/runs/r1/topology"));
        assert_eq!(p.steps[1].key, "exec.1");
        assert_eq!(p.steps[2].key, "exec.2");
        assert_eq!(p.steps[2].workdir, PathBuf::from("/runs/r1/step_02"));
        assert_eq!(p.name, "r1");
    }

    #[test]
    fn test_explicit_setup_section() {
        let p = pipeline("run_dir = \"r\"\n[topology]\n[exec]\ncommand = \"true\"\n");

        assert_eq!(p.steps.len(), 2);
        assert_eq!(p.steps[0].ordinal, 0);
        assert_eq!(p.steps[1].ordinal, 1);
    }

    #[test]
    fn test_step_params_overlay_defaults() {
        let p = pipeline("run_dir = \"r\"\n[exec]\ncommand = \"echo hi\"\n");
        let params = &p.steps[1].params;

        assert_eq!(params.get("command").and_then(|v| v.as_str()), Some("echo hi"));
        assert!(params.contains_key("output_ext"));
    }

    #[test]
    fn test_predecessor_manifest_rules() {
        let dir = tempfile::tempdir().unwrap();
        let text = format!(
            "run_dir = \"{}\"\n[exec]\ncommand = \"true\"\n[exec]\ncommand = \"true\"\n",
            dir.path().display()
        );
        let p = pipeline(&text);

        assert!(p.predecessor_manifest(0).unwrap().is_empty());
        assert!(matches!(
            p.predecessor_manifest(1),
            Err(PipelineError::ManifestMissing { ordinal: 1, .. })
        ));

        let setup_dir = step_dir(dir.path(), 0);
        std::fs::create_dir_all(&setup_dir).unwrap();
        OutputManifest::new(0, "topology", vec![]).save(&setup_dir).unwrap();
        assert_eq!(p.predecessor_manifest(1).unwrap().module, "topology");

        assert!(matches!(
            p.predecessor_manifest(2),
            Err(PipelineError::ManifestMissing { ordinal: 2, ref path, .. })
                if path.ends_with("step_01/io.json")
        ));
    }
}
