use std::fmt::{self, Display};
use std::path::{Path, PathBuf};
use std::process::Command;

use crate::config::{AcceleratorTarget, Configuration, Precision, Reconstruction};
use idfx_regress_errors::{RegressError, Result};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

pub const SIMULATION_EXECUTABLE: &str = "./idefix";
pub const STANDARD_TEST_DIR: &str = "python";
pub const STANDARD_TEST_SCRIPT: &str = "testidefix.py";
pub const DEFAULT_JOBS: usize = 8;
pub const DEFAULT_DEFINITIONS: &str = "definitions.hpp";

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Configure,
    Build,
    Run,
    StandardTest,
}

impl Stage {
    pub fn label(self) -> &'static str {
        match self {
            Self::Configure => "configure",
            Self::Build => "build",
            Self::Run => "run",
            Self::StandardTest => "standard test",
        }
    }
}

/// Build-system inputs that are not part of the regression identity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildSettings {
    pub source_dir: PathBuf,
    pub cmake_options: Vec<String>,
    pub definitions: String,
    pub jobs: usize,
}

impl BuildSettings {
    pub fn new(source_dir: impl Into<PathBuf>) -> Self {
        Self {
            source_dir: source_dir.into(),
            cmake_options: Vec::new(),
            definitions: DEFAULT_DEFINITIONS.to_string(),
            jobs: DEFAULT_JOBS,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunRequest {
    pub input_file: Option<String>,
    /// Rank count used under MPI when no decomposition fixes it.
    pub ranks: usize,
    pub nowrite: bool,
    pub restart: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolCommand {
    pub program: String,
    pub args: Vec<String>,
}

impl ToolCommand {
    fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
        }
    }

    fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }
}

impl Display for ToolCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.program)?;
        for arg in &self.args {
            write!(f, " {arg}")?;
        }
        Ok(())
    }
}

pub fn configure_command(config: &Configuration, settings: &BuildSettings) -> ToolCommand {
    let mut command =
        ToolCommand::new("cmake").arg(settings.source_dir.to_string_lossy().into_owned());
    for option in &settings.cmake_options {
        command = command.arg(format!("-D{option}"));
    }

    // Fused multiply-add is disabled so device arithmetic matches the CPU.
    command = match config.accelerator {
        AcceleratorTarget::Cuda => command
            .arg("-DKokkos_ENABLE_CUDA=ON")
            .arg("-DIdefix_CXX_FLAGS=--fmad=false"),
        AcceleratorTarget::Hip => command
            .arg("-DKokkos_ENABLE_HIP=ON")
            .arg("-DIdefix_CXX_FLAGS=-ffp-contract=off"),
        AcceleratorTarget::None => command,
    };

    command = command.arg(match config.precision {
        Precision::Single => "-DIdefix_PRECISION=Single",
        Precision::Double => "-DIdefix_PRECISION=Double",
    });
    command = command.arg(if config.vector_potential {
        "-DIdefix_EVOLVE_VECTOR_POTENTIAL=ON"
    } else {
        "-DIdefix_EVOLVE_VECTOR_POTENTIAL=OFF"
    });
    if config.werror {
        command = command.arg("-DIdefix_WERROR=ON");
    }
    command = command.arg(format!("-DIdefix_DEFS={}", settings.definitions));
    command = command.arg(if config.mpi {
        "-DIdefix_MPI=ON"
    } else {
        "-DIdefix_MPI=OFF"
    });
    command.arg(match config.reconstruction {
        Reconstruction::Linear => "-DIdefix_RECONSTRUCTION=Linear",
        Reconstruction::LimO3 => "-DIdefix_RECONSTRUCTION=LimO3",
        Reconstruction::Parabolic => "-DIdefix_RECONSTRUCTION=Parabolic",
    })
}

pub fn build_command(settings: &BuildSettings) -> ToolCommand {
    ToolCommand::new("make").arg(format!("-j{}", settings.jobs.max(1)))
}

pub fn run_command(config: &Configuration, request: &RunRequest) -> ToolCommand {
    let mut args = Vec::new();
    if let Some(input_file) = &request.input_file {
        args.push("-i".to_string());
        args.push(input_file.clone());
    }

    let mut command = if config.mpi {
        let ranks = config
            .decomposition_ranks()
            .unwrap_or(request.ranks)
            .max(1);
        if let Some(decomposition) = &config.decomposition {
            args.push("-dec".to_string());
            args.extend(decomposition.iter().map(|count| count.to_string()));
        }
        ToolCommand::new("mpirun")
            .arg("-np")
            .arg(ranks.to_string())
            .arg(SIMULATION_EXECUTABLE)
    } else {
        ToolCommand::new(SIMULATION_EXECUTABLE)
    };

    if request.nowrite {
        args.push("-nowrite".to_string());
    }
    if let Some(restart) = request.restart {
        args.push("-restart".to_string());
        args.push(restart.to_string());
    }

    command.args.extend(args);
    command
}

pub fn standard_test_command(noplot: bool) -> ToolCommand {
    let command = ToolCommand::new("python3").arg(STANDARD_TEST_SCRIPT);
    if noplot {
        command.arg("-noplot")
    } else {
        command
    }
}

pub fn standard_test_dir(working_dir: &Path) -> Option<PathBuf> {
    let dir = working_dir.join(STANDARD_TEST_DIR);
    dir.join(STANDARD_TEST_SCRIPT).is_file().then_some(dir)
}

/// Runs external tools. Swapped out in tests to record invocations.
pub trait ToolRunner {
    fn run(&mut self, stage: Stage, command: &ToolCommand, cwd: &Path) -> Result<()>;
}

/// Spawns each command as a child process with inherited stdio and waits.
#[derive(Debug, Default, Clone, Copy)]
pub struct ProcessRunner;

impl ToolRunner for ProcessRunner {
    fn run(&mut self, stage: Stage, command: &ToolCommand, cwd: &Path) -> Result<()> {
        info!(stage = stage.label(), cwd = %cwd.display(), "running `{command}`");
        let status = Command::new(&command.program)
            .args(&command.args)
            .current_dir(cwd)
            .status()
            .map_err(|error| RegressError::ToolInvocation {
                stage: stage.label().to_string(),
                command: command.to_string(),
                detail: format!("failed to start: {error}"),
            })?;

        if !status.success() {
            return Err(RegressError::ToolInvocation {
                stage: stage.label().to_string(),
                command: command.to_string(),
                detail: status.to_string(),
            });
        }
        debug!(stage = stage.label(), "tool finished successfully");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings() -> BuildSettings {
        BuildSettings {
            source_dir: PathBuf::from("/opt/idefix"),
            cmake_options: vec!["Idefix_HIGH_ORDER_FARGO=ON".to_string()],
            definitions: "definitions.hpp".to_string(),
            jobs: 4,
        }
    }

    #[test]
    fn configure_command_encodes_every_flag() {
        let config = Configuration {
            precision: Precision::Single,
            accelerator: AcceleratorTarget::Cuda,
            reconstruction: Reconstruction::Parabolic,
            vector_potential: true,
            mpi: true,
            werror: true,
            ..Configuration::default()
        };

        let command = configure_command(&config, &settings());
        assert_eq!(command.program, "cmake");
        assert_eq!(
            command.args,
            vec![
                "/opt/idefix",
                "-DIdefix_HIGH_ORDER_FARGO=ON",
                "-DKokkos_ENABLE_CUDA=ON",
                "-DIdefix_CXX_FLAGS=--fmad=false",
                "-DIdefix_PRECISION=Single",
                "-DIdefix_EVOLVE_VECTOR_POTENTIAL=ON",
                "-DIdefix_WERROR=ON",
                "-DIdefix_DEFS=definitions.hpp",
                "-DIdefix_MPI=ON",
                "-DIdefix_RECONSTRUCTION=Parabolic",
            ]
        );
    }

    #[test]
    fn hip_disables_fp_contraction() {
        let config = Configuration {
            accelerator: AcceleratorTarget::Hip,
            ..Configuration::default()
        };
        let command = configure_command(&config, &settings());
        assert!(command.args.contains(&"-DKokkos_ENABLE_HIP=ON".to_string()));
        assert!(
            command
                .args
                .contains(&"-DIdefix_CXX_FLAGS=-ffp-contract=off".to_string())
        );
        assert!(command.args.contains(&"-DIdefix_MPI=OFF".to_string()));
    }

    #[test]
    fn serial_run_calls_executable_directly() {
        let request = RunRequest {
            input_file: Some("idefix-rkl.ini".to_string()),
            ranks: 2,
            nowrite: true,
            restart: Some(1),
        };
        let command = run_command(&Configuration::default(), &request);
        assert_eq!(
            command.to_string(),
            "./idefix -i idefix-rkl.ini -nowrite -restart 1"
        );
    }

    #[test]
    fn mpi_run_uses_decomposition_product() {
        let config = Configuration {
            mpi: true,
            decomposition: Some(vec![2, 2, 2]),
            ..Configuration::default()
        };
        let request = RunRequest {
            ranks: 2,
            ..RunRequest::default()
        };
        assert_eq!(
            run_command(&config, &request).to_string(),
            "mpirun -np 8 ./idefix -dec 2 2 2"
        );

        let without_dec = Configuration {
            mpi: true,
            ..Configuration::default()
        };
        assert_eq!(
            run_command(&without_dec, &request).to_string(),
            "mpirun -np 2 ./idefix"
        );
    }

    #[test]
    fn build_and_standard_test_commands() {
        assert_eq!(build_command(&settings()).to_string(), "make -j4");
        assert_eq!(
            standard_test_command(true).to_string(),
            "python3 testidefix.py -noplot"
        );
        assert_eq!(standard_test_command(false).to_string(), "python3 testidefix.py");
    }

    #[test]
    fn standard_test_dir_requires_script() {
        let dir = tempfile::tempdir().expect("create temp dir");
        assert_eq!(standard_test_dir(dir.path()), None);

        std::fs::create_dir_all(dir.path().join("python")).expect("create python dir");
        std::fs::write(dir.path().join("python/testidefix.py"), "print('ok')")
            .expect("write script");
        assert_eq!(standard_test_dir(dir.path()), Some(dir.path().join("python")));
    }

    #[cfg(unix)]
    #[test]
    fn process_runner_maps_failures_to_tool_errors() {
        let dir = tempfile::tempdir().expect("create temp dir");
        let mut runner = ProcessRunner;

        runner
            .run(Stage::Build, &ToolCommand::new("true"), dir.path())
            .expect("`true` should succeed");

        let err = runner
            .run(Stage::Build, &ToolCommand::new("false"), dir.path())
            .expect_err("`false` should fail");
        match err {
            RegressError::ToolInvocation { stage, command, .. } => {
                assert_eq!(stage, "build");
                assert_eq!(command, "false");
            }
            other => panic!("unexpected error type: {other}"),
        }

        let err = runner
            .run(
                Stage::Run,
                &ToolCommand::new("./definitely-not-here"),
                dir.path(),
            )
            .expect_err("missing executable should fail");
        assert!(err.to_string().contains("failed to start"));
    }
}
