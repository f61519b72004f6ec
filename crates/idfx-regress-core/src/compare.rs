use crate::sink::{DiffSink, DiffSlice};
use crate::state::{FieldArray, SimulationState};
use idfx_regress_errors::{RegressError, Result, ValidationErrors};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    Pass,
    Fail,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FieldDiscrepancy {
    pub field: String,
    pub rms: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Verdict {
    pub outcome: Outcome,
    /// Mean over the compared fields of each field's RMS difference.
    pub error: f64,
    pub tolerance: f64,
    pub fields: Vec<FieldDiscrepancy>,
}

impl Verdict {
    pub fn passed(&self) -> bool {
        self.outcome == Outcome::Pass
    }

    pub fn into_result(self) -> Result<Self> {
        match self.outcome {
            Outcome::Pass => Ok(self),
            Outcome::Fail => Err(RegressError::ToleranceExceeded {
                error: self.error,
                tolerance: self.tolerance,
            }),
        }
    }
}

/// Per-field RMS differences over the 3-D fields both states share.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldReport {
    pub error: f64,
    pub fields: Vec<FieldDiscrepancy>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Comparator {
    tolerance: f64,
}

impl Comparator {
    pub fn new(tolerance: f64) -> Result<Self> {
        if !tolerance.is_finite() || tolerance < 0.0 {
            let mut errors = ValidationErrors::new();
            errors.push(
                "tolerance",
                format!("must be a finite, non-negative number (got {tolerance})"),
            );
            return Err(RegressError::Validation(errors));
        }
        Ok(Self { tolerance })
    }

    pub fn tolerance(&self) -> f64 {
        self.tolerance
    }

    /// Compare and, on failure, hand each compared field's `k = 0` difference
    /// plane to `sink`. Sink failures are logged and never alter the verdict.
    pub fn compare(
        &self,
        reference: &SimulationState,
        test: &SimulationState,
        sink: &mut dyn DiffSink,
    ) -> Result<Verdict> {
        let report = measure(reference, test)?;
        // A NaN error fails.
        let outcome = if report.error <= self.tolerance {
            Outcome::Pass
        } else {
            Outcome::Fail
        };

        if outcome == Outcome::Fail {
            for (name, reference_field, test_field) in common_volumetric_fields(reference, test) {
                let diff = difference_slice(reference_field, test_field);
                if let Err(error) = sink.render(name, &reference.coordinates, &diff) {
                    warn!(field = name, %error, "difference map could not be rendered");
                }
            }
        }

        Ok(Verdict {
            outcome,
            error: report.error,
            tolerance: self.tolerance,
            fields: report.fields,
        })
    }
}

pub fn measure(reference: &SimulationState, test: &SimulationState) -> Result<FieldReport> {
    let mut fields = Vec::new();

    for (name, reference_field, test_field) in common_volumetric_fields(reference, test) {
        if reference_field.shape() != test_field.shape() {
            return Err(RegressError::FieldShapeMismatch {
                field: name.to_string(),
                reference: reference_field.shape().to_vec(),
                test: test_field.shape().to_vec(),
            });
        }
        let rms = rms_difference(reference_field.values(), test_field.values());
        debug!(field = name, rms, "compared field");
        fields.push(FieldDiscrepancy {
            field: name.to_string(),
            rms,
        });
    }

    if fields.is_empty() {
        return Err(RegressError::NoCommonFields);
    }

    let error = fields.iter().map(|field| field.rms).sum::<f64>() / fields.len() as f64;
    Ok(FieldReport { error, fields })
}

fn common_volumetric_fields<'a>(
    reference: &'a SimulationState,
    test: &'a SimulationState,
) -> impl Iterator<Item = (&'a str, &'a FieldArray, &'a FieldArray)> {
    test.volumetric_fields().filter_map(move |(name, test_field)| {
        reference
            .field(name)
            .filter(|reference_field| reference_field.ndim() == 3)
            .map(|reference_field| (name, reference_field, test_field))
    })
}

fn rms_difference(reference: &[f64], test: &[f64]) -> f64 {
    if reference.is_empty() {
        return 0.0;
    }
    let sum_sq = reference
        .iter()
        .zip(test)
        .map(|(left, right)| {
            let delta = left - right;
            delta * delta
        })
        .sum::<f64>();
    (sum_sq / reference.len() as f64).sqrt()
}

fn difference_slice(reference: &FieldArray, test: &FieldArray) -> DiffSlice {
    let shape = reference.shape();
    let (n1, n2) = (shape[0], shape[1]);
    let mut values = Vec::with_capacity(n1 * n2);
    for j in 0..n2 {
        for i in 0..n1 {
            let left = reference.get(&[i, j, 0]).unwrap_or(0.0);
            let right = test.get(&[i, j, 0]).unwrap_or(0.0);
            values.push(left - right);
        }
    }
    DiffSlice { n1, n2, values }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sink::DiscardSink;
    use crate::state::Coordinates;

    #[derive(Default)]
    struct RecordingSink {
        rendered: Vec<(String, DiffSlice)>,
    }

    impl DiffSink for RecordingSink {
        fn render(&mut self, field: &str, _: &Coordinates, diff: &DiffSlice) -> Result<()> {
            self.rendered.push((field.to_string(), diff.clone()));
            Ok(())
        }
    }

    struct FailingSink;

    impl DiffSink for FailingSink {
        fn render(&mut self, _: &str, _: &Coordinates, _: &DiffSlice) -> Result<()> {
            Err(std::io::Error::other("no display").into())
        }
    }

    fn cube(value: impl Fn(&[usize]) -> f64) -> FieldArray {
        FieldArray::from_fn(vec![4, 3, 2], value)
    }

    fn state_a() -> SimulationState {
        SimulationState::default()
            .with_field("RHO", cube(|i| 1.0 + (i[0] * i[1]) as f64))
            .with_field("VX1", cube(|i| (i[2] as f64).sin()))
            .with_field("time", FieldArray::from_fn(vec![1], |_| 0.0))
    }

    fn state_b() -> SimulationState {
        SimulationState::default()
            .with_field("RHO", cube(|i| 1.0 + (i[0] * i[1]) as f64 + 0.01 * i[2] as f64))
            .with_field("VX1", cube(|i| (i[2] as f64).cos()))
            .with_field("PRS", cube(|_| 3.0))
            .with_field("time", FieldArray::from_fn(vec![1], |_| 1.0))
    }

    #[test]
    fn identical_states_have_zero_error() {
        let state = state_a();
        let verdict = Comparator::default()
            .compare(&state, &state, &mut DiscardSink)
            .expect("comparison should succeed");
        assert_eq!(verdict.error, 0.0);
        assert!(verdict.passed());
        assert_eq!(verdict.fields.len(), 2);
    }

    #[test]
    fn error_is_symmetric() {
        let forward = measure(&state_a(), &state_b()).expect("forward comparison");
        let backward = measure(&state_b(), &state_a()).expect("backward comparison");
        assert_eq!(forward.error, backward.error);
        assert!(forward.error > 0.0);
    }

    #[test]
    fn disjoint_volumetric_fields_are_rejected() {
        let reference = SimulationState::default()
            .with_field("RHO", cube(|_| 1.0))
            .with_field("time", FieldArray::from_fn(vec![1], |_| 0.0));
        let test = SimulationState::default()
            .with_field("PRS", cube(|_| 1.0))
            .with_field("time", FieldArray::from_fn(vec![1], |_| 0.0));

        let err = Comparator::default()
            .compare(&reference, &test, &mut DiscardSink)
            .expect_err("no shared 3D field");
        assert!(matches!(err, RegressError::NoCommonFields));
    }

    #[test]
    fn same_name_with_different_rank_does_not_qualify() {
        let reference = SimulationState::default()
            .with_field("RHO", FieldArray::from_fn(vec![4, 3], |_| 1.0));
        let test = SimulationState::default().with_field("RHO", cube(|_| 1.0));

        let err = measure(&reference, &test).expect_err("rank differs");
        assert!(matches!(err, RegressError::NoCommonFields));
    }

    #[test]
    fn shape_mismatch_is_reported() {
        let reference = SimulationState::default().with_field("RHO", cube(|_| 1.0));
        let test = SimulationState::default()
            .with_field("RHO", FieldArray::from_fn(vec![2, 3, 2], |_| 1.0));

        let err = measure(&reference, &test).expect_err("shape differs");
        match err {
            RegressError::FieldShapeMismatch {
                field,
                reference,
                test,
            } => {
                assert_eq!(field, "RHO");
                assert_eq!(reference, vec![4, 3, 2]);
                assert_eq!(test, vec![2, 3, 2]);
            }
            other => panic!("unexpected error type: {other}"),
        }
    }

    #[test]
    fn tight_tolerance_fails_with_measured_error() {
        let reference = SimulationState::default().with_field("RHO", cube(|_| 1.0));
        let test = SimulationState::default().with_field("RHO", cube(|_| 1.0 + 1.0e-3));

        let verdict = Comparator::new(1.0e-10)
            .expect("valid tolerance")
            .compare(&reference, &test, &mut DiscardSink)
            .expect("comparison should succeed");
        assert_eq!(verdict.outcome, Outcome::Fail);
        assert!((verdict.error - 1.0e-3).abs() < 1.0e-12);
        assert_eq!(verdict.tolerance, 1.0e-10);

        let err = verdict.into_result().expect_err("fail verdict escalates");
        assert!(err.is_tolerance_violation());
    }

    #[test]
    fn error_is_mean_of_field_rms() {
        let reference = SimulationState::default()
            .with_field("A", cube(|_| 0.0))
            .with_field("B", cube(|_| 0.0));
        let test = SimulationState::default()
            .with_field("A", cube(|_| 2.0))
            .with_field("B", cube(|i| if i[0] % 2 == 0 { 4.0 } else { -4.0 }));

        let report = measure(&reference, &test).expect("comparison should succeed");
        assert!((report.error - 3.0).abs() < 1.0e-12);
    }

    #[test]
    fn loose_tolerance_passes_without_rendering() {
        let mut sink = RecordingSink::default();
        let verdict = Comparator::new(10.0)
            .expect("valid tolerance")
            .compare(&state_a(), &state_b(), &mut sink)
            .expect("comparison should succeed");
        assert!(verdict.passed());
        assert!(sink.rendered.is_empty());
    }

    #[test]
    fn failure_renders_every_compared_field() {
        let mut sink = RecordingSink::default();
        let verdict = Comparator::default()
            .compare(&state_a(), &state_b(), &mut sink)
            .expect("comparison should succeed");
        assert!(!verdict.passed());

        let names = sink
            .rendered
            .iter()
            .map(|(name, _)| name.as_str())
            .collect::<Vec<_>>();
        assert_eq!(names, vec!["RHO", "VX1"]);

        let (_, slice) = &sink.rendered[1];
        assert_eq!((slice.n1, slice.n2), (4, 3));
        let value = slice.at(2, 1).expect("inside the plane");
        assert!((value - (0.0f64.sin() - 0.0f64.cos())).abs() < 1.0e-12);
    }

    #[test]
    fn sink_failure_does_not_change_verdict() {
        let verdict = Comparator::default()
            .compare(&state_a(), &state_b(), &mut FailingSink)
            .expect("sink errors are not comparison errors");
        assert_eq!(verdict.outcome, Outcome::Fail);
    }

    #[test]
    fn nan_values_never_pass() {
        let reference = SimulationState::default().with_field("RHO", cube(|_| 1.0));
        let test = SimulationState::default()
            .with_field("RHO", cube(|i| if i == [0, 0, 0] { f64::NAN } else { 1.0 }));

        let verdict = Comparator::new(1.0)
            .expect("valid tolerance")
            .compare(&reference, &test, &mut DiscardSink)
            .expect("comparison should succeed");
        assert!(verdict.error.is_nan());
        assert_eq!(verdict.outcome, Outcome::Fail);
    }

    #[test]
    fn negative_tolerance_is_rejected() {
        Comparator::new(-1.0).expect_err("negative tolerance");
        Comparator::new(f64::NAN).expect_err("nan tolerance");
    }
}
