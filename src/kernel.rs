//! Travel kernels: distance to preference weight

use serde::{Deserialize, Serialize};

use crate::error::{Result, SynthError};

/// Monotone non-increasing weight of travelling `distance_km`.
pub trait TravelKernel: Send + Sync {
    fn weight(&self, distance_km: f64) -> f64;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KernelForm {
    /// Weight 1 everywhere
    Constant,
    /// `1/(1+(r/a0)^b0) + c1/(1+(r/a1)^b1)`
    Hill,
    /// `1/(1+r/a0)^b0 + c1/(1+r/a1)^b1`
    Power,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct KernelParams {
    pub form: KernelForm,
    #[serde(default = "default_scale")]
    pub a0: f64,
    #[serde(default)]
    pub b0: f64,
    #[serde(default = "default_scale")]
    pub a1: f64,
    #[serde(default)]
    pub b1: f64,
    #[serde(default)]
    pub c1: f64,
    #[serde(default)]
    pub emit_output: bool,
}

fn default_scale() -> f64 {
    1.0
}

impl KernelParams {
    pub fn constant() -> Self {
        Self {
            form: KernelForm::Constant,
            a0: 1.0,
            b0: 0.0,
            a1: 1.0,
            b1: 0.0,
            c1: 0.0,
            emit_output: false,
        }
    }

    pub fn hill(a0: f64, b0: f64) -> Self {
        Self {
            form: KernelForm::Hill,
            a0,
            b0,
            ..Self::constant()
        }
    }

    pub fn power(a0: f64, b0: f64) -> Self {
        Self {
            form: KernelForm::Power,
            a0,
            b0,
            ..Self::constant()
        }
    }

    pub fn with_tail(mut self, a1: f64, b1: f64, c1: f64) -> Self {
        self.a1 = a1;
        self.b1 = b1;
        self.c1 = c1;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.form == KernelForm::Constant {
            return Ok(());
        }
        let positive = |v: f64| v > 0.0 && v.is_finite();
        let non_negative = |v: f64| v >= 0.0 && v.is_finite();
        if !positive(self.a0) || !non_negative(self.b0) {
            return Err(SynthError::config(format!(
                "kernel requires a0 > 0 and b0 >= 0, got a0={} b0={}",
                self.a0, self.b0
            )));
        }
        if !non_negative(self.c1) {
            return Err(SynthError::config(format!(
                "kernel tail weight c1 must be >= 0, got {}",
                self.c1
            )));
        }
        if self.c1 > 0.0 && (!positive(self.a1) || !non_negative(self.b1)) {
            return Err(SynthError::config(format!(
                "kernel tail requires a1 > 0 and b1 >= 0, got a1={} b1={}",
                self.a1, self.b1
            )));
        }
        Ok(())
    }
}

impl TravelKernel for KernelParams {
    fn weight(&self, r: f64) -> f64 {
        let term = |a: f64, b: f64| match self.form {
            KernelForm::Constant => 1.0,
            KernelForm::Hill => 1.0 / (1.0 + (r / a).powf(b)),
            KernelForm::Power => 1.0 / (1.0 + r / a).powf(b),
        };
        match self.form {
            KernelForm::Constant => 1.0,
            _ if self.c1 == 0.0 => term(self.a0, self.b0),
            _ => term(self.a0, self.b0) + self.c1 * term(self.a1, self.b1),
        }
    }
}

/// Age range `[lower, upper)` in years
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AgeGroup {
    pub lower: f32,
    pub upper: f32,
}

impl AgeGroup {
    pub fn new(lower: f32, upper: f32) -> Self {
        Self { lower, upper }
    }

    pub fn contains(&self, age: f32) -> bool {
        age >= self.lower && age < self.upper
    }

    pub fn span(&self) -> f32 {
        self.upper - self.lower
    }
}

/// Kernels per (age group, parameter set), plus a reference kernel per age
/// group used when comparing travel statistics.
#[derive(Debug, Clone)]
pub struct KernelTable {
    age_groups: Vec<AgeGroup>,
    reference: Vec<KernelParams>,
    parameter_sets: Vec<Vec<KernelParams>>,
}

impl KernelTable {
    pub fn new(
        age_groups: Vec<AgeGroup>,
        reference: Vec<KernelParams>,
        parameter_sets: Vec<Vec<KernelParams>>,
    ) -> Result<Self> {
        if age_groups.is_empty() {
            return Err(SynthError::config("at least one age group is required"));
        }
        for group in &age_groups {
            if !(group.upper > group.lower) {
                return Err(SynthError::config(format!(
                    "age group [{}, {}) is empty",
                    group.lower, group.upper
                )));
            }
        }
        if reference.len() != age_groups.len() {
            return Err(SynthError::config(format!(
                "{} reference kernels for {} age groups",
                reference.len(),
                age_groups.len()
            )));
        }
        if parameter_sets.is_empty() {
            return Err(SynthError::config("at least one parameter set is required"));
        }
        for (set, kernels) in parameter_sets.iter().enumerate() {
            if kernels.len() != age_groups.len() {
                return Err(SynthError::config(format!(
                    "parameter set {set} has {} kernels for {} age groups",
                    kernels.len(),
                    age_groups.len()
                )));
            }
        }
        for params in reference.iter().chain(parameter_sets.iter().flatten()) {
            params.validate()?;
        }
        Ok(Self {
            age_groups,
            reference,
            parameter_sets,
        })
    }

    /// One age group, one parameter set, the same kernel used as reference.
    pub fn single(age_group: AgeGroup, kernel: KernelParams) -> Result<Self> {
        Self::new(vec![age_group], vec![kernel], vec![vec![kernel]])
    }

    pub fn num_age_groups(&self) -> usize {
        self.age_groups.len()
    }

    pub fn num_parameter_sets(&self) -> usize {
        self.parameter_sets.len()
    }

    pub fn age_groups(&self) -> &[AgeGroup] {
        &self.age_groups
    }

    pub fn age_group(&self, index: u16) -> Result<&AgeGroup> {
        self.age_groups
            .get(index as usize)
            .ok_or(SynthError::IndexOutOfRange {
                what: "age group",
                index: index as usize,
                len: self.age_groups.len(),
            })
    }

    pub fn kernel(&self, age_group: u16, parameter_set: u16) -> Result<&KernelParams> {
        let set = self
            .parameter_sets
            .get(parameter_set as usize)
            .ok_or(SynthError::IndexOutOfRange {
                what: "parameter set",
                index: parameter_set as usize,
                len: self.parameter_sets.len(),
            })?;
        set.get(age_group as usize)
            .ok_or(SynthError::IndexOutOfRange {
                what: "age group",
                index: age_group as usize,
                len: set.len(),
            })
    }

    pub fn reference(&self, age_group: u16) -> Result<&KernelParams> {
        self.reference
            .get(age_group as usize)
            .ok_or(SynthError::IndexOutOfRange {
                what: "age group",
                index: age_group as usize,
                len: self.reference.len(),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_constant_kernel() {
        let k = KernelParams::constant();
        assert_eq!(k.weight(0.0), 1.0);
        assert_eq!(k.weight(1.0e4), 1.0);
    }

    #[test]
    fn test_forms_are_non_increasing() {
        let kernels = [
            KernelParams::hill(2.5, 3.0),
            KernelParams::power(1.0, 2.0),
            KernelParams::hill(4.0, 2.0).with_tail(40.0, 1.5, 0.05),
            KernelParams::power(0.5, 1.2).with_tail(10.0, 0.8, 0.2),
        ];
        for k in kernels {
            k.validate().unwrap();
            let mut prev = k.weight(0.0);
            for step in 1..400 {
                let w = k.weight(step as f64 * 0.5);
                assert!(w <= prev + 1e-15, "{k:?} increased at {step}");
                assert!(w > 0.0);
                prev = w;
            }
        }
    }

    #[test]
    fn test_hill_values() {
        let k = KernelParams::hill(2.0, 2.0);
        assert_eq!(k.weight(0.0), 1.0);
        assert!((k.weight(2.0) - 0.5).abs() < 1e-12);
        let tail = KernelParams::hill(2.0, 2.0).with_tail(10.0, 1.0, 0.5);
        assert!((tail.weight(0.0) - 1.5).abs() < 1e-12);
    }

    #[test]
    fn test_validation() {
        assert!(KernelParams::hill(0.0, 2.0).validate().is_err());
        assert!(KernelParams::hill(1.0, -1.0).validate().is_err());
        assert!(KernelParams::hill(1.0, 1.0).with_tail(0.0, 1.0, 0.3).validate().is_err());
        assert!(KernelParams::hill(1.0, 1.0).with_tail(0.0, 1.0, 0.0).validate().is_ok());
        assert!(KernelParams::power(1.0, 1.0).with_tail(1.0, 1.0, -0.1).validate().is_err());
    }

    #[test]
    fn test_table_shape_checked() {
        let groups = vec![AgeGroup::new(5.0, 11.0), AgeGroup::new(18.0, 65.0)];
        let k = KernelParams::constant();
        assert!(KernelTable::new(groups.clone(), vec![k], vec![vec![k, k]]).is_err());
        assert!(KernelTable::new(groups.clone(), vec![k, k], vec![vec![k]]).is_err());
        assert!(KernelTable::new(groups.clone(), vec![k, k], vec![]).is_err());
        let table = KernelTable::new(groups, vec![k, k], vec![vec![k, k], vec![k, k]]).unwrap();
        assert_eq!(table.num_parameter_sets(), 2);
        assert!(table.kernel(1, 1).is_ok());
        assert!(table.kernel(2, 0).is_err());
        assert!(table.kernel(0, 2).is_err());
    }

    #[test]
    fn test_age_group_half_open() {
        let group = AgeGroup::new(5.0, 11.0);
        assert!(group.contains(5.0));
        assert!(group.contains(10.99));
        assert!(!group.contains(11.0));
        assert!(!group.contains(4.9));
    }
}
