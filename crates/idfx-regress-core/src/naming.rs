use crate::config::{Configuration, Reconstruction};

const REFERENCE_PREFIX: &str = "dump.ref";
const VECTOR_POTENTIAL_SUFFIX: &str = "vectPot";
const DUMP_EXTENSION: &str = "dmp";

/// Reference dump name for `config`.
///
/// Only precision, reconstruction, input file and vector-potential mode take
/// part: results are expected to agree across accelerators and rank layouts,
/// so every backend shares one reference.
pub fn reference_file_name(config: &Configuration) -> String {
    let mut name = format!(
        "{REFERENCE_PREFIX}.{}.{}.{}",
        config.precision.tag(),
        reconstruction_tag(config.reconstruction),
        config.input_file
    );
    if config.vector_potential {
        name.push('.');
        name.push_str(VECTOR_POTENTIAL_SUFFIX);
    }
    name.push('.');
    name.push_str(DUMP_EXTENSION);
    name
}

fn reconstruction_tag(reconstruction: Reconstruction) -> &'static str {
    match reconstruction {
        Reconstruction::Linear => "plm",
        Reconstruction::LimO3 => "limo3",
        Reconstruction::Parabolic => "ppm",
    }
}
