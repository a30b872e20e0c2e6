//! Variance and standard deviation.
//!
//! Incremental Welford accumulation with the parallel combine from Chan et
//! al., so partial states from different row subsets merge without loss of
//! stability.

use std::marker::PhantomData;

use num_traits::AsPrimitive;
use regatta_error::{ErrorKind, RegattaError, Result};

use super::{update_states, AggregateState};
use crate::arrays::array::{primitive_dispatch, Array, PhysicalPrimitive};
use crate::arrays::bitmap::Bitmap;
use crate::arrays::datatype::DataType;
use crate::grouping::GroupMap;

#[derive(Debug, Default, Clone)]
pub struct VarianceState<T> {
    count: u64,
    mean: f64,
    m2: f64,
    _input: PhantomData<T>,
}

impl<T> VarianceState<T> {
    /// Variance with the given delta degrees of freedom; NULL when the group
    /// has too few values.
    pub fn finalize_with_ddof(&self, ddof: u32) -> (f64, bool) {
        if self.count <= ddof as u64 {
            return (0.0, false);
        }
        (self.m2 / (self.count - ddof as u64) as f64, true)
    }
}

impl<T: PhysicalPrimitive + AsPrimitive<f64>> AggregateState<T, f64> for VarianceState<T> {
    // Not reached from group-by execution today: the shuffle colocates each
    // group's rows before accumulation starts. Kept as the combine rule for
    // any future partial-state path.
    fn merge(&mut self, other: &mut Self) -> Result<()> {
        if other.count == 0 {
            return Ok(());
        }
        if self.count == 0 {
            *self = other.clone();
            return Ok(());
        }

        let total = self.count + other.count;
        let delta = other.mean - self.mean;
        self.m2 = self.m2
            + other.m2
            + delta * delta * (self.count as f64 * other.count as f64) / total as f64;
        self.mean = self.mean + delta * (other.count as f64 / total as f64);
        self.count = total;
        Ok(())
    }

    fn update(&mut self, input: T) -> Result<()> {
        self.count += 1;
        let value: f64 = input.as_();
        let delta = value - self.mean;
        self.mean += delta / self.count as f64;
        self.m2 += delta * (value - self.mean);
        Ok(())
    }

    /// Population variance; callers wanting a different ddof use
    /// [`VarianceState::finalize_with_ddof`].
    fn finalize(&mut self) -> Result<(f64, bool)> {
        Ok(self.finalize_with_ddof(0))
    }
}

/// Per-group variance (or standard deviation when `sqrt` is set).
pub fn compute_var(arr: &Array, map: &GroupMap, ddof: u32, sqrt: bool) -> Result<Array> {
    fn var_prim<T: PhysicalPrimitive + AsPrimitive<f64>>(
        arr: &Array,
        map: &GroupMap,
        ddof: u32,
        sqrt: bool,
    ) -> Result<Array> {
        let mut states: Vec<VarianceState<T>> =
            vec![VarianceState::default(); map.num_groups()];
        update_states::<T, f64, _>(&mut states, arr, map.group_ids())?;

        let mut values = Vec::with_capacity(states.len());
        let mut validity = Bitmap::with_capacity(states.len());
        for state in &states {
            let (var, valid) = state.finalize_with_ddof(ddof);
            values.push(if sqrt { var.sqrt() } else { var });
            validity.push(valid);
        }
        Array::from_primitive_values(DataType::Float64, values, validity)
    }

    if !arr.datatype().is_numeric() {
        return Err(RegattaError::with_kind(
            ErrorKind::InvalidType,
            "Variance undefined for data type",
        )
        .with_field("datatype", arr.datatype()));
    }

    primitive_dispatch!(arr.datatype().physical_type(), var_prim(arr, map, ddof, sqrt), other => {
        Err(RegattaError::with_kind(ErrorKind::InvalidType, "Variance undefined for data type")
            .with_field("physical", other))
    })
}
