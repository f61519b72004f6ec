use std::fs::{self, File};
use std::io::{self, BufRead, Read, Write};
use std::path::{Path, PathBuf};

use crate::config::Configuration;
use crate::dump::read_dump;
use crate::naming::reference_file_name;
use crate::state::SimulationState;
use idfx_regress_errors::{RegressError, Result};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{info, warn};

pub const REFERENCE_DIRECTORY: &str = "reference";
const CONFIRMATION: &str = "yes";

/// Asked before an existing reference is replaced.
pub trait Confirm {
    fn confirm(&mut self, prompt: &str) -> bool;
}

impl<F> Confirm for F
where
    F: FnMut(&str) -> bool,
{
    fn confirm(&mut self, prompt: &str) -> bool {
        self(prompt)
    }
}

/// Prompts on stdout and accepts only an exact `yes` line from stdin.
#[derive(Debug, Default, Clone, Copy)]
pub struct StdinConfirm;

impl Confirm for StdinConfirm {
    fn confirm(&mut self, prompt: &str) -> bool {
        let mut stdout = io::stdout();
        if write!(stdout, "{prompt}").and_then(|()| stdout.flush()).is_err() {
            return false;
        }
        let mut answer = String::new();
        match io::stdin().lock().read_line(&mut answer) {
            Ok(_) => is_confirmation(&answer),
            Err(_) => false,
        }
    }
}

fn is_confirmation(answer: &str) -> bool {
    answer.trim_end_matches(['\n', '\r']) == CONFIRMATION
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CreateOutcome {
    Created { path: PathBuf, sha256: String },
    Overwritten { path: PathBuf, sha256: String },
    Aborted { path: PathBuf },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReferenceStore {
    root: PathBuf,
}

impl ReferenceStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Store rooted at `<working_dir>/reference`.
    pub fn in_working_dir(working_dir: &Path) -> Self {
        Self::new(working_dir.join(REFERENCE_DIRECTORY))
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn path_for(&self, config: &Configuration) -> PathBuf {
        self.root.join(reference_file_name(config))
    }

    pub fn load(&self, name: &str) -> Result<SimulationState> {
        let path = self.root.join(name);
        if !path.is_file() {
            return Err(RegressError::MissingReference { path });
        }
        read_dump(&path)
    }

    pub fn load_for(&self, config: &Configuration) -> Result<SimulationState> {
        self.load(&reference_file_name(config))
    }

    /// Copy `source` into the store under the name derived from `config`.
    ///
    /// An existing reference is only replaced after `confirm` accepts the
    /// prompt. The copy is staged next to the target and checked against the
    /// source digest before it is renamed into place.
    pub fn create(
        &self,
        source: &Path,
        config: &Configuration,
        confirm: &mut dyn Confirm,
    ) -> Result<CreateOutcome> {
        if !source.is_file() {
            return Err(RegressError::MissingTestFile {
                path: source.to_path_buf(),
            });
        }

        if !self.root.is_dir() {
            info!(directory = %self.root.display(), "creating reference directory");
            fs::create_dir_all(&self.root)?;
        }

        let target = self.path_for(config);
        let existed = target.exists();
        if existed {
            let prompt = format!(
                "This will overwrite already existing reference file:\n{}\nDo you confirm? (type yes to continue): ",
                target.display()
            );
            if !confirm.confirm(&prompt) {
                warn!(reference = %target.display(), "reference creation aborted");
                return Ok(CreateOutcome::Aborted { path: target });
            }
        }

        let sha256 = stage_and_replace(source, &target)?;
        info!(reference = %target.display(), %sha256, "reference file written");

        Ok(if existed {
            CreateOutcome::Overwritten {
                path: target,
                sha256,
            }
        } else {
            CreateOutcome::Created {
                path: target,
                sha256,
            }
        })
    }
}

fn stage_and_replace(source: &Path, target: &Path) -> Result<String> {
    let file_name = target
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default();
    let staging = target.with_file_name(format!(".{file_name}.partial"));

    let staged = fs::copy(source, &staging)
        .map_err(RegressError::from)
        .and_then(|_| verify_copy(source, &staging));
    match staged {
        Ok(digest) => {
            if let Err(error) = fs::rename(&staging, target) {
                let _ = fs::remove_file(&staging);
                return Err(error.into());
            }
            Ok(digest)
        }
        Err(error) => {
            let _ = fs::remove_file(&staging);
            Err(error)
        }
    }
}

fn verify_copy(source: &Path, staged: &Path) -> Result<String> {
    let expected = sha256_hex(source)?;
    let actual = sha256_hex(staged)?;
    if expected != actual {
        return Err(io::Error::other(format!(
            "copy of `{}` is corrupt (sha256 {actual}, expected {expected})",
            source.display()
        ))
        .into());
    }
    Ok(actual)
}

fn sha256_hex(path: &Path) -> io::Result<String> {
    let mut file = File::open(path)?;
    let mut hasher = Sha256::new();
    let mut buffer = [0_u8; 8 * 1024];
    loop {
        let bytes_read = file.read(&mut buffer)?;
        if bytes_read == 0 {
            break;
        }
        hasher.update(&buffer[..bytes_read]);
    }
    Ok(format!("{:x}", hasher.finalize()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Precision, Reconstruction};
    use crate::dump::write_dump;
    use crate::state::FieldArray;

    fn sample_config() -> Configuration {
        Configuration {
            precision: Precision::Double,
            reconstruction: Reconstruction::LimO3,
            input_file: "orszag-tang".to_string(),
            ..Configuration::default()
        }
    }

    fn sample_state(value: f64) -> SimulationState {
        SimulationState::default()
            .with_field("RHO", FieldArray::from_fn(vec![2, 2, 1], |_| value))
    }

    #[test]
    fn create_then_load_round_trips_through_the_store() {
        let dir = tempfile::tempdir().expect("create temp dir");
        let source = dir.path().join("dump.0001.dmp");
        write_dump(&source, &sample_state(1.5)).expect("write test dump");
        let store = ReferenceStore::in_working_dir(dir.path());

        let outcome = store
            .create(&source, &sample_config(), &mut |_: &str| -> bool {
                panic!("no prompt expected for a new reference")
            })
            .expect("reference should be created");
        let expected_path = dir
            .path()
            .join("reference/dump.ref.double.limo3.orszag-tang.dmp");
        match outcome {
            CreateOutcome::Created { path, sha256 } => {
                assert_eq!(path, expected_path);
                assert_eq!(sha256.len(), 64);
            }
            other => panic!("unexpected outcome: {other:?}"),
        }

        let loaded = store.load_for(&sample_config()).expect("reference should load");
        assert_eq!(loaded, sample_state(1.5));
        assert!(!dir
            .path()
            .join("reference/.dump.ref.double.limo3.orszag-tang.dmp.partial")
            .exists());
    }

    #[test]
    fn declined_overwrite_leaves_reference_untouched() {
        let dir = tempfile::tempdir().expect("create temp dir");
        let store = ReferenceStore::in_working_dir(dir.path());
        let target = store.path_for(&sample_config());
        fs::create_dir_all(store.root()).expect("create reference dir");
        fs::write(&target, b"accepted reference bytes").expect("seed reference");

        let source = dir.path().join("dump.0001.dmp");
        write_dump(&source, &sample_state(2.0)).expect("write test dump");

        for answer in ["no", "Yes", "YES", "yes please", ""] {
            let mut prompts = Vec::new();
            let outcome = store
                .create(&source, &sample_config(), &mut |prompt: &str| {
                    prompts.push(prompt.to_string());
                    is_confirmation(answer)
                })
                .expect("declined overwrite is not an error");
            assert!(matches!(outcome, CreateOutcome::Aborted { .. }));
            assert_eq!(prompts.len(), 1);
            assert!(prompts[0].contains("type yes to continue"));
            assert_eq!(
                fs::read(&target).expect("read reference"),
                b"accepted reference bytes"
            );
        }
    }

    #[test]
    fn confirmed_overwrite_replaces_reference() {
        let dir = tempfile::tempdir().expect("create temp dir");
        let store = ReferenceStore::in_working_dir(dir.path());
        let target = store.path_for(&sample_config());
        fs::create_dir_all(store.root()).expect("create reference dir");
        fs::write(&target, b"stale").expect("seed reference");

        let source = dir.path().join("dump.0001.dmp");
        write_dump(&source, &sample_state(3.0)).expect("write test dump");

        let outcome = store
            .create(&source, &sample_config(), &mut |_: &str| is_confirmation("yes\n"))
            .expect("confirmed overwrite should succeed");
        assert!(matches!(outcome, CreateOutcome::Overwritten { .. }));
        assert_eq!(
            fs::read(&target).expect("read reference"),
            fs::read(&source).expect("read source")
        );
    }

    #[test]
    fn missing_source_is_reported() {
        let dir = tempfile::tempdir().expect("create temp dir");
        let store = ReferenceStore::in_working_dir(dir.path());
        let err = store
            .create(
                &dir.path().join("absent.dmp"),
                &sample_config(),
                &mut |_: &str| true,
            )
            .expect_err("missing source should fail");
        assert!(matches!(err, RegressError::MissingTestFile { .. }));
        assert!(!store.root().exists());
    }

    #[test]
    fn missing_reference_is_reported() {
        let dir = tempfile::tempdir().expect("create temp dir");
        let store = ReferenceStore::in_working_dir(dir.path());
        let err = store
            .load("dump.ref.double.plm.idefix.ini.dmp")
            .expect_err("no reference on disk");
        match err {
            RegressError::MissingReference { path } => {
                assert!(path.ends_with("reference/dump.ref.double.plm.idefix.ini.dmp"));
            }
            other => panic!("unexpected error type: {other}"),
        }
    }

    #[test]
    fn confirmation_requires_exact_yes() {
        assert!(is_confirmation("yes"));
        assert!(is_confirmation("yes\r\n"));
        assert!(!is_confirmation(" yes"));
        assert!(!is_confirmation("y"));
    }
}
