//! CLI command definitions

use crate::core::config::{ExecutionMode, RunSettings};
use clap::Args;
use std::path::PathBuf;

/// Run a pipeline
#[derive(Debug, Args, Clone)]
pub struct RunCommand {
    /// Path to the pipeline configuration file
    #[arg(short, long)]
    pub config: String,

    /// Execution backend, overriding `mode`
    #[arg(long, value_enum)]
    pub mode: Option<ModeArg>,

    /// Local worker count, overriding `ncores` (0 = all cores)
    #[arg(long)]
    pub ncores: Option<usize>,

    /// Run directory, overriding `run_dir`
    #[arg(long)]
    pub run_dir: Option<PathBuf>,

    /// Don't save the run to history
    #[arg(long)]
    pub no_history: bool,
}

impl RunCommand {
    /// Apply command-line overrides on top of the configured settings
    pub fn apply(&self, settings: &mut RunSettings) {
        if let Some(mode) = self.mode {
            settings.mode = mode.into();
        }
        if let Some(ncores) = self.ncores {
            settings.ncores = ncores;
        }
        if let Some(run_dir) = &self.run_dir {
            settings.run_dir = run_dir.clone();
        }
    }
}

/// Validate a pipeline configuration
#[derive(Debug, Args, Clone)]
pub struct ValidateCommand {
    /// Path to the pipeline configuration file
    #[arg(short, long)]
    pub config: String,

    /// Print the resolved steps as JSON
    #[arg(long)]
    pub json: bool,
}

/// Show run history
#[derive(Debug, Args, Clone)]
pub struct HistoryCommand {
    /// Run name to filter by
    #[arg(short, long)]
    pub name: Option<String>,

    /// Number of recent runs to show
    #[arg(short, long, default_value_t = 10)]
    pub limit: usize,

    /// Show a specific run
    #[arg(long)]
    pub run_id: Option<String>,

    /// Show full details
    #[arg(long)]
    pub verbose: bool,

    /// Output in JSON format
    #[arg(long)]
    pub json: bool,
}

/// Execution backend argument
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum ModeArg {
    Local,
    Slurm,
    Torque,
}

impl From<ModeArg> for ExecutionMode {
    fn from(arg: ModeArg) -> Self {
        match arg {
            ModeArg::Local => ExecutionMode::Local,
            ModeArg::Slurm => ExecutionMode::Slurm,
            ModeArg::Torque => ExecutionMode::Torque,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_overrides_replace_settings() {
        let cmd = RunCommand {
            config: "x.cfg".to_string(),
            mode: Some(ModeArg::Torque),
            ncores: Some(2),
            run_dir: None,
            no_history: true,
        };
        let mut settings = RunSettings::default();
        cmd.apply(&mut settings);

        assert_eq!(settings.mode, ExecutionMode::Torque);
        assert_eq!(settings.ncores, 2);
        assert_eq!(settings.run_dir, PathBuf::from("run1"));
    }
}
