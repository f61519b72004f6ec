use std::fs;
use std::path::Path;

use crate::toolchain::{DEFAULT_DEFINITIONS, RunRequest};
use idfx_regress_errors::{RegressError, Result, ValidationErrors};
use serde::{Deserialize, Serialize};

pub const DEFAULT_CASE_FILE: &str = "regress.json";
pub const DEFAULT_DUMP_FILE: &str = "dump.0001.dmp";
pub const DEFAULT_RANKS: usize = 2;

/// One simulation run with its own input, restart and output settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct RunSpec {
    pub input: Option<String>,
    /// Dump number to restart from.
    pub restart: Option<u32>,
    /// Falls back to the case-level `nowrite`.
    pub nowrite: Option<bool>,
}

/// What one regression test runs and compares, as stored next to the test.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct TestCase {
    /// One run per entry; empty means a single run with the default input.
    pub input_files: Vec<String>,
    /// Detailed runs, used instead of `input_files` when restarts are needed.
    pub runs: Vec<RunSpec>,
    pub dump_file: String,
    pub tolerance: f64,
    pub definitions: String,
    pub ranks: usize,
    pub nowrite: bool,
}

impl Default for TestCase {
    fn default() -> Self {
        Self {
            input_files: Vec::new(),
            runs: Vec::new(),
            dump_file: DEFAULT_DUMP_FILE.to_string(),
            tolerance: 0.0,
            definitions: DEFAULT_DEFINITIONS.to_string(),
            ranks: DEFAULT_RANKS,
            nowrite: false,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct CaseOverrides {
    pub input_files: Vec<String>,
    pub dump_file: Option<String>,
    pub tolerance: Option<f64>,
    pub definitions: Option<String>,
}

impl TestCase {
    pub fn from_json(content: &str) -> Result<Self> {
        let case: Self = serde_json::from_str(content).map_err(|error| {
            RegressError::InvalidArgument(format!("failed to parse test case: {error}"))
        })?;
        case.validate()?;
        Ok(case)
    }

    pub fn from_path(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        Self::from_json(&content).map_err(|error| match error {
            RegressError::InvalidArgument(message) => {
                RegressError::InvalidArgument(format!("{}: {message}", path.display()))
            }
            other => other,
        })
    }

    /// Load `path` when given, otherwise `regress.json` in `working_dir` if
    /// present, otherwise the defaults.
    pub fn resolve(path: Option<&Path>, working_dir: &Path) -> Result<Self> {
        match path {
            Some(path) => Self::from_path(path),
            None => {
                let default_path = working_dir.join(DEFAULT_CASE_FILE);
                if default_path.is_file() {
                    Self::from_path(&default_path)
                } else {
                    Ok(Self::default())
                }
            }
        }
    }

    pub fn with_overrides(mut self, overrides: CaseOverrides) -> Result<Self> {
        if !overrides.input_files.is_empty() {
            self.input_files = overrides.input_files;
            self.runs.clear();
        }
        if let Some(dump_file) = overrides.dump_file {
            self.dump_file = dump_file;
        }
        if let Some(tolerance) = overrides.tolerance {
            self.tolerance = tolerance;
        }
        if let Some(definitions) = overrides.definitions {
            self.definitions = definitions;
        }
        self.validate()?;
        Ok(self)
    }

    pub fn validate(&self) -> Result<()> {
        let mut errors = ValidationErrors::new();
        for (index, input_file) in self.input_files.iter().enumerate() {
            if input_file.trim().is_empty() {
                errors.push(format!("input_files[{index}]"), "must not be blank");
            }
        }
        if !self.input_files.is_empty() && !self.runs.is_empty() {
            errors.push("runs", "cannot be combined with input_files");
        }
        for (index, run) in self.runs.iter().enumerate() {
            if run.input.as_deref().is_some_and(|input| input.trim().is_empty()) {
                errors.push(format!("runs[{index}].input"), "must not be blank");
            }
        }
        if self.dump_file.trim().is_empty() {
            errors.push("dump_file", "must not be blank");
        }
        if !self.tolerance.is_finite() || self.tolerance < 0.0 {
            errors.push("tolerance", "must be a finite, non-negative number");
        }
        if self.definitions.trim().is_empty() {
            errors.push("definitions", "must not be blank");
        }
        if self.ranks == 0 {
            errors.push("ranks", "must be greater than 0");
        }
        errors.into_result()
    }

    /// Input of the first run, which names the reference before any log is read.
    pub fn first_input(&self) -> Option<String> {
        match self.runs.first() {
            Some(run) => run.input.clone(),
            None => self.input_files.first().cloned(),
        }
    }

    pub fn run_requests(&self) -> Vec<RunRequest> {
        let request = |run: &RunSpec| RunRequest {
            input_file: run.input.clone(),
            ranks: self.ranks,
            nowrite: run.nowrite.unwrap_or(self.nowrite),
            restart: run.restart,
        };
        if !self.runs.is_empty() {
            return self.runs.iter().map(request).collect();
        }
        if self.input_files.is_empty() {
            return vec![request(&RunSpec::default())];
        }
        self.input_files
            .iter()
            .map(|input_file| {
                request(&RunSpec {
                    input: Some(input_file.clone()),
                    ..RunSpec::default()
                })
            })
            .collect()
    }
}
