use std::fmt::{self, Display};

use idfx_regress_errors::{RegressError, Result, ValidationErrors};
use serde::{Deserialize, Serialize};

pub const DEFAULT_INPUT_FILE: &str = "idefix.ini";

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Precision {
    Single,
    #[default]
    Double,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AcceleratorTarget {
    #[default]
    None,
    Cuda,
    Hip,
}

/// Spatial reconstruction scheme, identified on the command line by its order.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Reconstruction {
    #[default]
    Linear,
    LimO3,
    Parabolic,
}

impl Precision {
    pub fn tag(self) -> &'static str {
        match self {
            Self::Single => "single",
            Self::Double => "double",
        }
    }
}

impl AcceleratorTarget {
    pub fn is_gpu(self) -> bool {
        !matches!(self, Self::None)
    }
}

impl Reconstruction {
    pub fn order(self) -> u8 {
        match self {
            Self::Linear => 2,
            Self::LimO3 => 3,
            Self::Parabolic => 4,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::Linear => "PLM",
            Self::LimO3 => "LimO3",
            Self::Parabolic => "PPM",
        }
    }
}

pub fn parse_reconstruction_order(order: i64) -> Result<Reconstruction> {
    match order {
        2 => Ok(Reconstruction::Linear),
        3 => Ok(Reconstruction::LimO3),
        4 => Ok(Reconstruction::Parabolic),
        _ => {
            let mut errors = ValidationErrors::new();
            errors.push(
                "reconstruction",
                format!("unsupported order `{order}` (expected 2=PLM, 3=LimO3 or 4=PPM)"),
            );
            Err(RegressError::Validation(errors))
        }
    }
}

/// Raw, unvalidated flag set as it arrives from the command line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigOptions {
    pub single: bool,
    pub cuda: bool,
    pub hip: bool,
    pub reconstruction: i64,
    pub vector_potential: bool,
    pub mpi: bool,
    pub decomposition: Vec<u32>,
    pub input_file: Option<String>,
    pub werror: bool,
}

impl Default for ConfigOptions {
    fn default() -> Self {
        Self {
            single: false,
            cuda: false,
            hip: false,
            reconstruction: 2,
            vector_potential: false,
            mpi: false,
            decomposition: Vec::new(),
            input_file: None,
            werror: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Configuration {
    pub precision: Precision,
    pub accelerator: AcceleratorTarget,
    pub reconstruction: Reconstruction,
    pub vector_potential: bool,
    pub mpi: bool,
    #[serde(default)]
    pub decomposition: Option<Vec<u32>>,
    pub input_file: String,
    #[serde(default)]
    pub werror: bool,
}

impl Default for Configuration {
    fn default() -> Self {
        Self {
            precision: Precision::Double,
            accelerator: AcceleratorTarget::None,
            reconstruction: Reconstruction::Linear,
            vector_potential: false,
            mpi: false,
            decomposition: None,
            input_file: DEFAULT_INPUT_FILE.to_string(),
            werror: false,
        }
    }
}

impl Configuration {
    /// Build the requested configuration, reporting every invalid flag at once.
    pub fn from_options(options: &ConfigOptions) -> Result<Self> {
        let mut errors = ValidationErrors::new();

        if options.cuda && options.hip {
            errors.push(
                "accelerator",
                "cuda and hip targets cannot be enabled together",
            );
        }

        let reconstruction = match parse_reconstruction_order(options.reconstruction) {
            Ok(reconstruction) => Some(reconstruction),
            Err(RegressError::Validation(issues)) => {
                for issue in issues.issues() {
                    errors.push(issue.field.clone(), issue.message.clone());
                }
                None
            }
            Err(other) => return Err(other),
        };

        for (index, count) in options.decomposition.iter().enumerate() {
            if *count == 0 {
                errors.push(format!("decomposition[{index}]"), "must be positive");
            }
        }
        if !options.decomposition.is_empty() && !options.mpi {
            errors.push("decomposition", "requires MPI to be enabled");
        }

        if options
            .input_file
            .as_deref()
            .is_some_and(|input_file| input_file.trim().is_empty())
        {
            errors.push("input_file", "must not be blank");
        }

        errors.into_result()?;

        let accelerator = if options.cuda {
            AcceleratorTarget::Cuda
        } else if options.hip {
            AcceleratorTarget::Hip
        } else {
            AcceleratorTarget::None
        };

        Ok(Self {
            precision: if options.single {
                Precision::Single
            } else {
                Precision::Double
            },
            accelerator,
            reconstruction: reconstruction.unwrap_or_default(),
            vector_potential: options.vector_potential,
            mpi: options.mpi,
            decomposition: if options.decomposition.is_empty() {
                None
            } else {
                Some(options.decomposition.clone())
            },
            input_file: options
                .input_file
                .clone()
                .unwrap_or_else(|| DEFAULT_INPUT_FILE.to_string()),
            werror: options.werror,
        })
    }

    /// Number of MPI ranks implied by the decomposition, if one was given.
    pub fn decomposition_ranks(&self) -> Option<usize> {
        self.decomposition
            .as_ref()
            .map(|counts| counts.iter().map(|count| *count as usize).product())
    }
}

impl Display for Configuration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let rule = "*".repeat(62);
        writeln!(f, "{rule}")?;
        match self.accelerator {
            AcceleratorTarget::Cuda => writeln!(f, "Nvidia Cuda enabled.")?,
            AcceleratorTarget::Hip => writeln!(f, "AMD HIP enabled.")?,
            AcceleratorTarget::None => {}
        }
        writeln!(f, "Input File: {}", self.input_file)?;
        writeln!(
            f,
            "Precision: {}",
            match self.precision {
                Precision::Single => "Single",
                Precision::Double => "Double",
            }
        )?;
        writeln!(f, "Reconstruction: {}", self.reconstruction.label())?;
        writeln!(
            f,
            "Vector Potential: {}",
            if self.vector_potential { "ON" } else { "OFF" }
        )?;
        writeln!(f, "MPI: {}", if self.mpi { "ON" } else { "OFF" })?;
        if let Some(decomposition) = &self.decomposition {
            let counts = decomposition
                .iter()
                .map(|count| count.to_string())
                .collect::<Vec<_>>();
            writeln!(f, "Decomposition: {}", counts.join(" x "))?;
        }
        write!(f, "{rule}")
    }
}
