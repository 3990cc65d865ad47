//! Step domain model

use crate::core::{config::ConfigTable, state::StepState};
use std::path::PathBuf;

/// One ordinal stage of the pipeline
#[derive(Debug, Clone)]
pub struct Step {
    /// Position in the pipeline, 0 is the setup phase
    pub ordinal: usize,

    /// Section key the step came from (`exec.2`), or the module name
    pub key: String,

    /// Module type name
    pub module: String,

    /// Module defaults overlaid with the user's section
    pub params: ConfigTable,

    /// Working directory of the step
    pub workdir: PathBuf,

    /// Runtime state
    pub state: StepState,
}

impl Step {
    pub fn new(
        ordinal: usize,
        key: impl Into<String>,
        module: impl Into<String>,
        params: ConfigTable,
        workdir: PathBuf,
    ) -> Self {
        Self {
            ordinal,
            key: key.into(),
            module: module.into(),
            params,
            workdir,
            state: StepState::Pending,
        }
    }

    /// Label used in logs and messages, e.g. `2:exec`
    pub fn label(&self) -> String {
        format!("{}:{}", self.ordinal, self.module)
    }

    pub fn is_setup(&self) -> bool {
        self.ordinal == 0
    }
}
