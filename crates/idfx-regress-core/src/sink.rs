use std::fs::{self, File};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};

use crate::state::Coordinates;
use idfx_regress_errors::Result;
use tracing::info;

/// `k = 0` plane of a reference-minus-test difference, first index fastest.
#[derive(Debug, Clone, PartialEq)]
pub struct DiffSlice {
    pub n1: usize,
    pub n2: usize,
    pub values: Vec<f64>,
}

impl DiffSlice {
    /// `None` outside the `n1 x n2` plane.
    pub fn at(&self, i: usize, j: usize) -> Option<f64> {
        if i >= self.n1 || j >= self.n2 {
            return None;
        }
        self.values.get(i + j * self.n1).copied()
    }
}

/// Receives difference maps for fields that failed comparison.
pub trait DiffSink {
    fn render(&mut self, field: &str, coordinates: &Coordinates, diff: &DiffSlice) -> Result<()>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct DiscardSink;

impl DiffSink for DiscardSink {
    fn render(&mut self, _field: &str, _coordinates: &Coordinates, _diff: &DiffSlice) -> Result<()> {
        Ok(())
    }
}

/// Writes one `<field>.csv` per failing field with `x1,x2,diff` rows, ready
/// for an external plotting tool.
#[derive(Debug, Clone)]
pub struct CsvSliceSink {
    output_dir: PathBuf,
    written: Vec<PathBuf>,
}

impl CsvSliceSink {
    pub fn new(output_dir: impl Into<PathBuf>) -> Self {
        Self {
            output_dir: output_dir.into(),
            written: Vec::new(),
        }
    }

    pub fn written(&self) -> &[PathBuf] {
        &self.written
    }

    fn file_for(&self, field: &str) -> PathBuf {
        let stem = field
            .chars()
            .map(|ch| if ch.is_ascii_alphanumeric() || ch == '-' || ch == '_' { ch } else { '_' })
            .collect::<String>();
        self.output_dir.join(format!("{stem}.csv"))
    }
}

impl DiffSink for CsvSliceSink {
    fn render(&mut self, field: &str, coordinates: &Coordinates, diff: &DiffSlice) -> Result<()> {
        fs::create_dir_all(&self.output_dir)?;
        let path = self.file_for(field);
        write_slice(&path, coordinates, diff)?;
        info!(field, csv = %path.display(), "wrote difference map");
        self.written.push(path);
        Ok(())
    }
}

fn write_slice(path: &Path, coordinates: &Coordinates, diff: &DiffSlice) -> Result<()> {
    let mut writer = BufWriter::new(File::create(path)?);
    writeln!(writer, "x1,x2,diff")?;
    for j in 0..diff.n2 {
        let x2 = axis_value(&coordinates.x2, j);
        for i in 0..diff.n1 {
            let x1 = axis_value(&coordinates.x1, i);
            let value = diff.at(i, j).ok_or_else(|| {
                io::Error::other(format!(
                    "difference slice holds {} values, expected {} x {}",
                    diff.values.len(),
                    diff.n1,
                    diff.n2
                ))
            })?;
            writeln!(writer, "{x1:e},{x2:e},{value:e}")?;
        }
    }
    writer.flush()?;
    Ok(())
}

// Falls back to the cell index when the grid is shorter than the field.
fn axis_value(axis: &[f64], index: usize) -> f64 {
    axis.get(index).copied().unwrap_or(index as f64)
}
