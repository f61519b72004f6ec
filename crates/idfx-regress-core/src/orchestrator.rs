use std::path::{Path, PathBuf};

use crate::case::TestCase;
use crate::compare::{Comparator, Verdict};
use crate::config::Configuration;
use crate::dump::read_dump;
use crate::logscan::{LogReport, RUN_LOG_FILE, refine_from_path};
use crate::naming::reference_file_name;
use crate::reference::{Confirm, CreateOutcome, ReferenceStore};
use crate::sink::DiffSink;
use crate::toolchain::{
    BuildSettings, STANDARD_TEST_SCRIPT, Stage, ToolRunner, build_command, configure_command, run_command,
    standard_test_command, standard_test_dir,
};
use idfx_regress_errors::{RegressError, Result};
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PipelineOptions {
    /// Skip configure/build/run and use the log and dump already on disk.
    pub check_only: bool,
    /// Write the reference instead of comparing against it.
    pub init: bool,
    pub noplot: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "decision", rename_all = "snake_case")]
pub enum Decision {
    Compared(Verdict),
    Reference(CreateOutcome),
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PipelineOutcome {
    pub configuration: Configuration,
    pub reference_name: String,
    pub log: Option<LogReport>,
    pub decision: Decision,
}

impl PipelineOutcome {
    /// Escalate a failed comparison into `ToleranceExceeded`.
    pub fn ensure_passed(&self) -> Result<()> {
        match &self.decision {
            Decision::Compared(verdict) => verdict.clone().into_result().map(|_| ()),
            Decision::Reference(_) => Ok(()),
        }
    }
}

pub struct Pipeline<'a> {
    configuration: Configuration,
    settings: BuildSettings,
    case: TestCase,
    working_dir: PathBuf,
    options: PipelineOptions,
    runner: &'a mut dyn ToolRunner,
}

impl<'a> Pipeline<'a> {
    pub fn new(
        configuration: Configuration,
        settings: BuildSettings,
        case: TestCase,
        working_dir: impl Into<PathBuf>,
        options: PipelineOptions,
        runner: &'a mut dyn ToolRunner,
    ) -> Self {
        Self {
            configuration,
            settings,
            case,
            working_dir: working_dir.into(),
            options,
            runner,
        }
    }

    /// Current configuration; reflects the run log once one has been read.
    pub fn configuration(&self) -> &Configuration {
        &self.configuration
    }

    pub fn execute(
        &mut self,
        sink: &mut dyn DiffSink,
        confirm: &mut dyn Confirm,
    ) -> Result<PipelineOutcome> {
        let result = self.execute_stages(sink, confirm);
        match &result {
            Err(failure) => {
                error!(%failure, "regression pipeline failed\n{}", self.configuration);
            }
            Ok(PipelineOutcome {
                decision: Decision::Compared(verdict),
                ..
            }) if !verdict.passed() => {
                error!(
                    error = verdict.error,
                    tolerance = verdict.tolerance,
                    "non-regression test failed\n{}",
                    self.configuration
                );
            }
            Ok(_) => {}
        }
        result
    }

    fn execute_stages(
        &mut self,
        sink: &mut dyn DiffSink,
        confirm: &mut dyn Confirm,
    ) -> Result<PipelineOutcome> {
        let log = if self.options.check_only {
            let log = self.refine_configuration()?;
            info!("checking existing outputs\n{}", self.configuration);
            if self.configuration.accelerator.is_gpu() {
                warn!(
                    "floating point accuracy is only guaranteed when fused multiply-add is \
                     disabled at compile time; this check will likely fail otherwise"
                );
            }
            log
        } else {
            self.build()?;
            self.run_all()?
        };

        let reference_name = reference_file_name(&self.configuration);
        let store = ReferenceStore::in_working_dir(&self.working_dir);
        let test_file = self.working_dir.join(&self.case.dump_file);

        let decision = if self.options.init {
            Decision::Reference(store.create(&test_file, &self.configuration, confirm)?)
        } else {
            self.standard_test()?;
            Decision::Compared(self.compare(&store, &test_file, sink)?)
        };

        Ok(PipelineOutcome {
            configuration: self.configuration.clone(),
            reference_name,
            log,
            decision,
        })
    }

    fn build(&mut self) -> Result<()> {
        let mut settings = self.settings.clone();
        settings.definitions = self.case.definitions.clone();

        let configure = configure_command(&self.configuration, &settings);
        self.runner
            .run(Stage::Configure, &configure, &self.working_dir)?;
        let build = build_command(&settings);
        self.runner.run(Stage::Build, &build, &self.working_dir)
    }

    fn run_all(&mut self) -> Result<Option<LogReport>> {
        let mut last_log = None;
        for request in self.case.run_requests() {
            let command = run_command(&self.configuration, &request);
            self.runner.run(Stage::Run, &command, &self.working_dir)?;
            if let Some(log) = self.refine_configuration()? {
                last_log = Some(log);
            }
        }
        Ok(last_log)
    }

    fn refine_configuration(&mut self) -> Result<Option<LogReport>> {
        let log_path = self.working_dir.join(RUN_LOG_FILE);
        let report = refine_from_path(&self.configuration, &log_path)?;
        if let Some(report) = &report {
            self.configuration = report.configuration.clone();
        }
        Ok(report)
    }

    fn standard_test(&mut self) -> Result<()> {
        let Some(dir) = standard_test_dir(&self.working_dir) else {
            warn!("no standard {STANDARD_TEST_SCRIPT} for this test");
            return Ok(());
        };
        info!("running standard test");
        let command = standard_test_command(self.options.noplot);
        self.runner.run(Stage::StandardTest, &command, &dir)?;
        info!("standard test succeeded");
        Ok(())
    }

    fn compare(
        &self,
        store: &ReferenceStore,
        test_file: &Path,
        sink: &mut dyn DiffSink,
    ) -> Result<Verdict> {
        let reference = store.load_for(&self.configuration)?;
        if !test_file.is_file() {
            return Err(RegressError::MissingTestFile {
                path: test_file.to_path_buf(),
            });
        }
        let test = read_dump(test_file)?;

        let comparator = Comparator::new(self.case.tolerance)?;
        let verdict = comparator.compare(&reference, &test, sink)?;
        info!(
            error = verdict.error,
            tolerance = verdict.tolerance,
            passed = verdict.passed(),
            "non-regression comparison finished"
        );
        Ok(verdict)
    }
}
