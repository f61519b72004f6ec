use std::error::Error;
use std::fmt::{self, Display};
use std::path::PathBuf;

#[derive(Debug)]
pub enum RegressError {
    InvalidArgument(String),
    Io(std::io::Error),
    Validation(ValidationErrors),
    /// An external tool (cmake, make, mpirun, the simulation, the standard
    /// test script) could not be spawned or exited unsuccessfully.
    ToolInvocation {
        stage: String,
        command: String,
        detail: String,
    },
    /// A marker expected in an existing run log was absent or unreadable.
    Extraction {
        rule: String,
        message: String,
    },
    MissingReference {
        path: PathBuf,
    },
    MissingTestFile {
        path: PathBuf,
    },
    NoCommonFields,
    FieldShapeMismatch {
        field: String,
        reference: Vec<usize>,
        test: Vec<usize>,
    },
    ToleranceExceeded {
        error: f64,
        tolerance: f64,
    },
    Decode {
        path: PathBuf,
        message: String,
    },
}

pub type Result<T> = std::result::Result<T, RegressError>;

impl RegressError {
    pub fn extraction(rule: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Extraction {
            rule: rule.into(),
            message: message.into(),
        }
    }

    pub fn decode(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        Self::Decode {
            path: path.into(),
            message: message.into(),
        }
    }

    /// True when the run completed but its result drifted from the reference.
    pub fn is_tolerance_violation(&self) -> bool {
        matches!(self, Self::ToleranceExceeded { .. })
    }
}

impl Display for RegressError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidArgument(message) => write!(f, "{message}"),
            Self::Io(error) => write!(f, "{error}"),
            Self::Validation(errors) => write!(f, "{errors}"),
            Self::ToolInvocation {
                stage,
                command,
                detail,
            } => write!(f, "{stage} failed ({detail}): `{command}`"),
            Self::Extraction { rule, message } => {
                write!(f, "run log extraction failed for {rule}: {message}")
            }
            Self::MissingReference { path } => {
                write!(f, "reference file `{}` doesn't exist", path.display())
            }
            Self::MissingTestFile { path } => {
                write!(f, "test file `{}` doesn't exist", path.display())
            }
            Self::NoCommonFields => write!(
                f,
                "there is no common 3D field between the reference and current file"
            ),
            Self::FieldShapeMismatch {
                field,
                reference,
                test,
            } => write!(
                f,
                "field `{field}` has shape {reference:?} in the reference but {test:?} in the test file"
            ),
            Self::ToleranceExceeded { error, tolerance } => {
                write!(f, "error ({error:e}) above tolerance ({tolerance:e})")
            }
            Self::Decode { path, message } => {
                write!(f, "failed to decode dump `{}`: {message}", path.display())
            }
        }
    }
}

impl Error for RegressError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Io(error) => Some(error),
            Self::Validation(errors) => Some(errors),
            _ => None,
        }
    }
}

impl From<std::io::Error> for RegressError {
    fn from(error: std::io::Error) -> Self {
        Self::Io(error)
    }
}

impl From<ValidationErrors> for RegressError {
    fn from(errors: ValidationErrors) -> Self {
        Self::Validation(errors)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationIssue {
    pub field: String,
    pub message: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ValidationErrors {
    issues: Vec<ValidationIssue>,
}

impl ValidationErrors {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, field: impl Into<String>, message: impl Into<String>) {
        self.issues.push(ValidationIssue {
            field: field.into(),
            message: message.into(),
        });
    }

    pub fn issues(&self) -> &[ValidationIssue] {
        &self.issues
    }

    pub fn len(&self) -> usize {
        self.issues.len()
    }

    pub fn is_empty(&self) -> bool {
        self.issues.is_empty()
    }

    pub fn into_result(self) -> Result<()> {
        if self.is_empty() {
            Ok(())
        } else {
            Err(RegressError::Validation(self))
        }
    }
}

impl Display for ValidationErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "validation failed")?;
        for (index, issue) in self.issues.iter().enumerate() {
            let separator = if index == 0 { ": " } else { "; " };
            write!(f, "{separator}{} {}", issue.field, issue.message)?;
        }
        Ok(())
    }
}

impl Error for ValidationErrors {}
