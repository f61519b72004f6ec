use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::process;

use clap::Parser;
use idfx_regress_core::case::{CaseOverrides, TestCase};
use idfx_regress_core::config::{ConfigOptions, Configuration};
use idfx_regress_core::orchestrator::{Decision, Pipeline, PipelineOptions, PipelineOutcome};
use idfx_regress_core::reference::{Confirm, CreateOutcome, StdinConfirm};
use idfx_regress_core::sink::{CsvSliceSink, DiffSink, DiscardSink};
use idfx_regress_core::toolchain::{BuildSettings, DEFAULT_JOBS, ProcessRunner};
use idfx_regress_errors::{RegressError, Result};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

const TOLERANCE_EXIT_CODE: i32 = 2;
const FAILURE_EXIT_CODE: i32 = 1;

/// Build, run and check an Idefix test against its stored reference dump.
#[derive(Debug, Parser)]
#[command(name = "idfx-regress", version, about)]
struct Cli {
    /// Build in single precision.
    #[arg(long)]
    single: bool,

    /// Target NVIDIA GPUs through Kokkos CUDA (cannot be combined with --hip).
    #[arg(long)]
    cuda: bool,

    /// Target AMD GPUs through Kokkos HIP (cannot be combined with --cuda).
    #[arg(long)]
    hip: bool,

    /// Spatial reconstruction order (2, 3 or 4).
    #[arg(long, default_value_t = 2, allow_negative_numbers = true)]
    reconstruction: i64,

    /// Evolve the vector potential.
    #[arg(long = "vect-pot")]
    vect_pot: bool,

    #[arg(long)]
    mpi: bool,

    /// MPI domain decomposition, one count per direction.
    #[arg(long = "dec", num_args = 1..)]
    dec: Vec<u32>,

    /// Treat compiler warnings as errors.
    #[arg(long)]
    werror: bool,

    /// Extra cmake definitions, given without the leading `-D`.
    #[arg(long, num_args = 1..)]
    cmake: Vec<String>,

    /// Problem definitions header passed to cmake.
    #[arg(long)]
    definitions: Option<String>,

    /// Idefix source tree.
    #[arg(long, env = "IDEFIX_DIR")]
    source_dir: Option<PathBuf>,

    /// Test directory holding the inputs, the run log and `reference/`.
    #[arg(long, default_value = ".")]
    working_dir: PathBuf,

    #[arg(long, default_value_t = DEFAULT_JOBS)]
    jobs: usize,

    /// Test case file; defaults to `regress.json` in the working directory.
    #[arg(long)]
    case: Option<PathBuf>,

    /// Input file for each run, in order.
    #[arg(long, num_args = 1..)]
    input: Vec<String>,

    /// Dump produced by the run and compared against the reference.
    #[arg(long)]
    dump: Option<String>,

    #[arg(long)]
    tolerance: Option<f64>,

    /// Only check existing outputs, skipping configure, build and run.
    #[arg(long)]
    check: bool,

    /// Store the produced dump as the new reference.
    #[arg(long)]
    init: bool,

    /// Forward `-noplot` to the standard test.
    #[arg(long)]
    noplot: bool,

    /// Write difference maps when the comparison fails.
    #[arg(long)]
    ploterr: bool,

    #[arg(long, default_value = "regress-diff")]
    plot_dir: PathBuf,

    /// Overwrite an existing reference without prompting.
    #[arg(long)]
    yes: bool,

    /// Write the pipeline outcome as JSON.
    #[arg(long)]
    report: Option<PathBuf>,
}

impl Cli {
    fn config_options(&self, case: &TestCase) -> ConfigOptions {
        ConfigOptions {
            single: self.single,
            cuda: self.cuda,
            hip: self.hip,
            reconstruction: self.reconstruction,
            vector_potential: self.vect_pot,
            mpi: self.mpi,
            decomposition: self.dec.clone(),
            input_file: case.first_input(),
            werror: self.werror,
        }
    }

    fn case_overrides(&self) -> CaseOverrides {
        CaseOverrides {
            input_files: self.input.clone(),
            dump_file: self.dump.clone(),
            tolerance: self.tolerance,
            definitions: self.definitions.clone(),
        }
    }

    fn build_settings(&self) -> Result<BuildSettings> {
        let source_dir = match (&self.source_dir, self.check) {
            (Some(source_dir), _) => source_dir.clone(),
            (None, true) => PathBuf::new(),
            (None, false) => {
                return Err(RegressError::InvalidArgument(
                    "--source-dir (or IDEFIX_DIR) is required unless --check is given"
                        .to_string(),
                ));
            }
        };
        let mut settings = BuildSettings::new(source_dir);
        settings.cmake_options = self.cmake.clone();
        settings.jobs = self.jobs;
        Ok(settings)
    }

    fn pipeline_options(&self) -> PipelineOptions {
        PipelineOptions {
            check_only: self.check,
            init: self.init,
            noplot: self.noplot,
        }
    }
}

fn main() {
    let cli = Cli::parse();
    init_tracing();

    if let Err(error) = run(&cli) {
        error!(
            %error,
            tolerance_violation = error.is_tolerance_violation(),
            "idfx-regress failed"
        );
        eprintln!("error: {error}");
        process::exit(exit_code(&error));
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();
}

fn exit_code(error: &RegressError) -> i32 {
    if error.is_tolerance_violation() {
        TOLERANCE_EXIT_CODE
    } else {
        FAILURE_EXIT_CODE
    }
}

fn run(cli: &Cli) -> Result<()> {
    let case = TestCase::resolve(cli.case.as_deref(), &cli.working_dir)?
        .with_overrides(cli.case_overrides())?;
    let configuration = Configuration::from_options(&cli.config_options(&case))?;
    let settings = cli.build_settings()?;

    let mut runner = ProcessRunner;
    let mut pipeline = Pipeline::new(
        configuration,
        settings,
        case,
        &cli.working_dir,
        cli.pipeline_options(),
        &mut runner,
    );

    let mut sink: Box<dyn DiffSink> = if cli.ploterr {
        Box::new(CsvSliceSink::new(cli.working_dir.join(&cli.plot_dir)))
    } else {
        Box::new(DiscardSink)
    };
    let mut always_yes = |_: &str| true;
    let mut stdin_confirm = StdinConfirm;
    let confirm: &mut dyn Confirm = if cli.yes {
        &mut always_yes
    } else {
        &mut stdin_confirm
    };

    let outcome = pipeline.execute(sink.as_mut(), confirm)?;
    print_outcome(&outcome);
    if let Some(report) = &cli.report {
        write_report(report, &outcome)?;
        info!(report = %report.display(), "wrote pipeline report");
    }
    outcome.ensure_passed()
}

fn print_outcome(outcome: &PipelineOutcome) {
    match &outcome.decision {
        Decision::Compared(verdict) if verdict.passed() => {
            println!("Non-regression test succeeded with error={:e}", verdict.error);
        }
        Decision::Compared(verdict) => {
            println!(
                "Non-regression test failed with error={:e} (tolerance {:e})",
                verdict.error, verdict.tolerance
            );
        }
        Decision::Reference(CreateOutcome::Created { path, .. }) => {
            println!("Reference file {} created", path.display());
        }
        Decision::Reference(CreateOutcome::Overwritten { path, .. }) => {
            println!("Reference file {} overwritten", path.display());
        }
        Decision::Reference(CreateOutcome::Aborted { path }) => {
            println!("Reference creation aborted, {} left unchanged", path.display());
        }
    }
}

fn write_report(path: &Path, outcome: &PipelineOutcome) -> Result<()> {
    let json = serde_json::to_string_pretty(outcome).map_err(io::Error::other)?;
    fs::write(path, json)?;
    Ok(())
}
