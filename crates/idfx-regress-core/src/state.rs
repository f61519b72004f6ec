use std::collections::BTreeMap;

use idfx_regress_errors::{RegressError, Result};

/// Dense N-dimensional array stored with the first index varying fastest,
/// matching the layout the simulation writes to disk.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldArray {
    shape: Vec<usize>,
    values: Vec<f64>,
}

impl FieldArray {
    pub fn new(shape: Vec<usize>, values: Vec<f64>) -> Result<Self> {
        let expected: usize = shape.iter().product();
        if expected != values.len() {
            return Err(RegressError::InvalidArgument(format!(
                "array of shape {shape:?} needs {expected} values, got {}",
                values.len()
            )));
        }
        Ok(Self { shape, values })
    }

    pub fn from_fn(shape: Vec<usize>, mut value: impl FnMut(&[usize]) -> f64) -> Self {
        let len = shape.iter().product();
        let mut index = vec![0usize; shape.len()];
        let mut values = Vec::with_capacity(len);
        for _ in 0..len {
            values.push(value(&index));
            for (axis, extent) in shape.iter().enumerate() {
                index[axis] += 1;
                if index[axis] < *extent {
                    break;
                }
                index[axis] = 0;
            }
        }
        Self { shape, values }
    }

    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    pub fn ndim(&self) -> usize {
        self.shape.len()
    }

    pub fn values(&self) -> &[f64] {
        &self.values
    }

    pub fn get(&self, index: &[usize]) -> Option<f64> {
        if index.len() != self.shape.len() {
            return None;
        }
        let mut offset = 0usize;
        let mut stride = 1usize;
        for (position, extent) in index.iter().zip(&self.shape) {
            if position >= extent {
                return None;
            }
            offset += position * stride;
            stride *= extent;
        }
        self.values.get(offset).copied()
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Coordinates {
    pub x1: Vec<f64>,
    pub x2: Vec<f64>,
    pub x3: Vec<f64>,
}

/// Decoded dump: named fields plus the grid they live on.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SimulationState {
    pub fields: BTreeMap<String, FieldArray>,
    pub coordinates: Coordinates,
}

impl SimulationState {
    pub fn new(coordinates: Coordinates) -> Self {
        Self {
            fields: BTreeMap::new(),
            coordinates,
        }
    }

    pub fn with_field(mut self, name: impl Into<String>, field: FieldArray) -> Self {
        self.fields.insert(name.into(), field);
        self
    }

    pub fn field(&self, name: &str) -> Option<&FieldArray> {
        self.fields.get(name)
    }

    /// Volumetric (3-D) fields, in name order.
    pub fn volumetric_fields(&self) -> impl Iterator<Item = (&str, &FieldArray)> {
        self.fields
            .iter()
            .filter(|(_, field)| field.ndim() == 3)
            .map(|(name, field)| (name.as_str(), field))
    }
}
