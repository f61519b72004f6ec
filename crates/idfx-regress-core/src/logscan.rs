//! Run-log scraping.
//!
//! The rank-0 log written by the simulation is the ground truth for what
//! actually ran: build defaults can override the requested flags, so every
//! runtime property that feeds the reference name is read back from it. Each
//! marker rule is a separate function over the full log text.

use std::fs;
use std::io;
use std::path::Path;

use crate::config::{AcceleratorTarget, Configuration, Precision, Reconstruction};
use idfx_regress_errors::{RegressError, Result};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

pub const RUN_LOG_FILE: &str = "idefix.0.log";

const SINGLE_PRECISION_MARKER: &str = "SINGLE PRECISION";
const CUDA_MARKER: &str = "Kokkos CUDA target ENABLED";
const HIP_MARKER: &str = "Kokkos HIP target ENABLED";
const LIMO3_MARKER: &str = "3rd order (LimO3)";
const PPM_MARKER: &str = "4th order (PPM)";
const MPI_MARKER: &str = "MPI ENABLED";
const INPUT_FILE_PHRASE: &str = "Input Parameters using input file ";
const PERFORMANCE_PHRASE: &str = "Main: Perfs are ";
const PERFORMANCE_UNIT: &str = " cell";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LogReport {
    pub configuration: Configuration,
    /// Cell updates per second reported at the end of the run.
    pub performance: f64,
    pub input_file: String,
}

pub fn detect_precision(log: &str) -> Precision {
    if log.contains(SINGLE_PRECISION_MARKER) {
        Precision::Single
    } else {
        Precision::Double
    }
}

pub fn detect_accelerator(log: &str) -> Result<AcceleratorTarget> {
    match (log.contains(CUDA_MARKER), log.contains(HIP_MARKER)) {
        (true, true) => Err(RegressError::extraction(
            "accelerator",
            "log reports both CUDA and HIP targets as enabled",
        )),
        (true, false) => Ok(AcceleratorTarget::Cuda),
        (false, true) => Ok(AcceleratorTarget::Hip),
        (false, false) => Ok(AcceleratorTarget::None),
    }
}

/// A log without any order marker is taken to be a linear (PLM) run.
pub fn detect_reconstruction(log: &str) -> Reconstruction {
    if log.contains(PPM_MARKER) {
        Reconstruction::Parabolic
    } else if log.contains(LIMO3_MARKER) {
        Reconstruction::LimO3
    } else {
        Reconstruction::Linear
    }
}

pub fn detect_mpi(log: &str) -> bool {
    log.contains(MPI_MARKER)
}

pub fn extract_input_file(log: &str) -> Result<String> {
    let rest = line_after(log, INPUT_FILE_PHRASE).ok_or_else(|| {
        RegressError::extraction(
            "input_file",
            format!("marker `{}` not found", INPUT_FILE_PHRASE.trim_end()),
        )
    })?;

    // The log terminates the sentence with a single punctuation character.
    let mut name = rest.to_string();
    name.pop();
    if name.is_empty() {
        return Err(RegressError::extraction(
            "input_file",
            "input file name is empty",
        ));
    }
    Ok(name)
}

pub fn extract_performance(log: &str) -> Result<f64> {
    let rest = line_after(log, PERFORMANCE_PHRASE).ok_or_else(|| {
        RegressError::extraction(
            "performance",
            format!("marker `{}` not found", PERFORMANCE_PHRASE.trim_end()),
        )
    })?;
    let end = rest.rfind(PERFORMANCE_UNIT).ok_or_else(|| {
        RegressError::extraction(
            "performance",
            format!("unit `{}` not found after the performance marker", PERFORMANCE_UNIT.trim()),
        )
    })?;

    let value = rest[..end].trim();
    value.parse::<f64>().map_err(|error| {
        RegressError::extraction(
            "performance",
            format!("`{value}` is not a number: {error}"),
        )
    })
}

/// Apply every marker rule to `log`. Runtime properties come from the log;
/// vector potential, decomposition and werror keep their requested values.
pub fn refine(requested: &Configuration, log: &str) -> Result<LogReport> {
    let input_file = extract_input_file(log)?;
    let performance = extract_performance(log)?;

    let configuration = Configuration {
        precision: detect_precision(log),
        accelerator: detect_accelerator(log)?,
        reconstruction: detect_reconstruction(log),
        mpi: detect_mpi(log),
        input_file: input_file.clone(),
        ..requested.clone()
    };

    if configuration != *requested {
        debug!(
            requested = ?requested,
            actual = ?configuration,
            "run log overrides the requested configuration"
        );
    }

    Ok(LogReport {
        configuration,
        performance,
        input_file,
    })
}

/// Read and refine from a log on disk. A missing log means the run happened
/// outside this tool, so the requested configuration is kept as is.
pub fn refine_from_path(requested: &Configuration, path: &Path) -> Result<Option<LogReport>> {
    let log = match fs::read_to_string(path) {
        Ok(log) => log,
        Err(error) if error.kind() == io::ErrorKind::NotFound => {
            info!(log = %path.display(), "no run log found, keeping requested configuration");
            return Ok(None);
        }
        Err(error) => return Err(error.into()),
    };

    let report = refine(requested, &log)?;
    info!(
        input_file = %report.input_file,
        performance = report.performance,
        "extracted run configuration from log"
    );
    Ok(Some(report))
}

fn line_after<'a>(log: &'a str, phrase: &str) -> Option<&'a str> {
    log.lines().find_map(|line| {
        line.find(phrase)
            .map(|start| &line[start + phrase.len()..])
    })
}
