//! Binary dump codec.
//!
//! Layout: a 128-byte text header, then records of
//! `[16-byte NUL-padded name][i32 type][i32 ndim][ndim x i32 dims][data]`,
//! little-endian, first index fastest. A record named `eof` ends the stream.
//! Records `x1`, `x2`, `x3` carry the grid; everything else is a field.

use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::Path;

use crate::state::{Coordinates, FieldArray, SimulationState};
use idfx_regress_errors::{RegressError, Result};
use tracing::debug;

pub const HEADER_SIZE: usize = 128;
const NAME_SIZE: usize = 16;
const END_OF_FILE: &str = "eof";

const DOUBLE_TYPE: i32 = 0;
const SINGLE_TYPE: i32 = 1;
const INTEGER_TYPE: i32 = 2;
const BOOL_TYPE: i32 = 3;
// Upper bound on the shape capacity reserved before the extents are read.
const MAX_RANK_HINT: usize = 8;

pub fn read_dump(path: impl AsRef<Path>) -> Result<SimulationState> {
    let path = path.as_ref();
    let bytes = fs::read(path)?;
    let state = decode_dump(&bytes).map_err(|message| RegressError::decode(path, message))?;
    debug!(
        dump = %path.display(),
        field_count = state.fields.len(),
        "decoded dump"
    );
    Ok(state)
}

pub fn write_dump(path: impl AsRef<Path>, state: &SimulationState) -> Result<()> {
    let mut writer = BufWriter::new(File::create(path.as_ref())?);
    writer.write_all(&encode_dump(state))?;
    writer.flush()?;
    Ok(())
}

pub fn decode_dump(bytes: &[u8]) -> std::result::Result<SimulationState, String> {
    let mut cursor = Cursor { bytes, offset: 0 };
    cursor.take(HEADER_SIZE, "header")?;

    let mut state = SimulationState::default();
    loop {
        let name = cursor.name()?;
        if name == END_OF_FILE {
            break;
        }

        let data_type = cursor.i32(&name)?;
        let ndim = cursor.i32(&name)?;
        if ndim < 0 {
            return Err(format!("record `{name}` declares negative rank {ndim}"));
        }
        let mut shape = Vec::with_capacity((ndim as usize).min(MAX_RANK_HINT));
        for _ in 0..ndim {
            let extent = cursor.i32(&name)?;
            if extent < 0 {
                return Err(format!("record `{name}` declares negative extent {extent}"));
            }
            shape.push(extent as usize);
        }

        let too_large = || format!("record `{name}` is too large");
        let count = shape
            .iter()
            .try_fold(1usize, |acc, extent| acc.checked_mul(*extent))
            .ok_or_else(too_large)?;
        let values = match data_type {
            DOUBLE_TYPE => cursor
                .take(count.checked_mul(8).ok_or_else(too_large)?, &name)?
                .chunks_exact(8)
                .map(|chunk| f64::from_le_bytes(word(chunk)))
                .collect::<Vec<_>>(),
            SINGLE_TYPE => cursor
                .take(count.checked_mul(4).ok_or_else(too_large)?, &name)?
                .chunks_exact(4)
                .map(|chunk| f32::from_le_bytes(word(chunk)) as f64)
                .collect(),
            INTEGER_TYPE => cursor
                .take(count.checked_mul(4).ok_or_else(too_large)?, &name)?
                .chunks_exact(4)
                .map(|chunk| i32::from_le_bytes(word(chunk)) as f64)
                .collect(),
            BOOL_TYPE => cursor
                .take(count, &name)?
                .iter()
                .map(|byte| if *byte == 0 { 0.0 } else { 1.0 })
                .collect(),
            other => return Err(format!("record `{name}` has unknown data type {other}")),
        };

        match name.as_str() {
            "x1" => state.coordinates.x1 = values,
            "x2" => state.coordinates.x2 = values,
            "x3" => state.coordinates.x3 = values,
            _ => {
                let field = FieldArray::new(shape, values).map_err(|error| error.to_string())?;
                state.fields.insert(name, field);
            }
        }
    }

    Ok(state)
}

/// Encode `state` with every array stored as f64.
pub fn encode_dump(state: &SimulationState) -> Vec<u8> {
    let mut bytes = Vec::new();
    let mut header = b"Idefix regression dump, little endian".to_vec();
    header.resize(HEADER_SIZE, 0);
    bytes.extend_from_slice(&header);

    let Coordinates { x1, x2, x3 } = &state.coordinates;
    for (name, axis) in [("x1", x1), ("x2", x2), ("x3", x3)] {
        push_record(&mut bytes, name, &[axis.len()], axis);
    }
    for (name, field) in &state.fields {
        push_record(&mut bytes, name, field.shape(), field.values());
    }

    push_name(&mut bytes, END_OF_FILE);
    bytes
}

fn push_record(bytes: &mut Vec<u8>, name: &str, shape: &[usize], values: &[f64]) {
    push_name(bytes, name);
    bytes.extend_from_slice(&DOUBLE_TYPE.to_le_bytes());
    bytes.extend_from_slice(&(shape.len() as i32).to_le_bytes());
    for extent in shape {
        bytes.extend_from_slice(&(*extent as i32).to_le_bytes());
    }
    for value in values {
        bytes.extend_from_slice(&value.to_le_bytes());
    }
}

fn push_name(bytes: &mut Vec<u8>, name: &str) {
    let mut padded = name.as_bytes()[..name.len().min(NAME_SIZE)].to_vec();
    padded.resize(NAME_SIZE, 0);
    bytes.extend_from_slice(&padded);
}

struct Cursor<'a> {
    bytes: &'a [u8],
    offset: usize,
}

impl<'a> Cursor<'a> {
    fn take(&mut self, len: usize, what: &str) -> std::result::Result<&'a [u8], String> {
        let end = self
            .offset
            .checked_add(len)
            .filter(|end| *end <= self.bytes.len())
            .ok_or_else(|| {
                format!(
                    "truncated while reading {what}: needed {len} bytes at offset {}, file has {}",
                    self.offset,
                    self.bytes.len()
                )
            })?;
        let slice = &self.bytes[self.offset..end];
        self.offset = end;
        Ok(slice)
    }

    fn name(&mut self) -> std::result::Result<String, String> {
        let raw = self.take(NAME_SIZE, "record name")?;
        let trimmed = raw.split(|byte| *byte == 0).next().unwrap_or_default();
        String::from_utf8(trimmed.to_vec())
            .map_err(|_| format!("record name at offset {} is not UTF-8", self.offset - NAME_SIZE))
    }

    fn i32(&mut self, record: &str) -> std::result::Result<i32, String> {
        Ok(i32::from_le_bytes(word(self.take(4, record)?)))
    }
}

fn word<const N: usize>(chunk: &[u8]) -> [u8; N] {
    let mut word = [0u8; N];
    word.copy_from_slice(chunk);
    word
}
