//! params.rs — Named source parameters
//!
//! Everything outside the numeric kernels works with [`SourceParams`]. The flat
//! vector layout `[x, y, z, t_1 .. t_n, (bias)]` exists only at the solver
//! boundary (`to_vec` / `unflatten`).

use boom_types::Vec3;
use serde::{Deserialize, Serialize};

/// Shape of a parameter vector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParamLayout {
    /// Emission times solved for (one per event sharing the position)
    pub events: usize,
    /// Shared additive time-error term
    pub clock_bias: bool,
}

impl ParamLayout {
    pub fn dimension(&self) -> usize {
        3 + self.events + usize::from(self.clock_bias)
    }

    pub fn bias_index(&self) -> Option<usize> {
        self.clock_bias.then_some(3 + self.events)
    }
}

/// Identifies one scalar parameter (used in clamp audit records).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParamName {
    X,
    Y,
    Z,
    EmissionTime(usize),
    ClockBias,
}

/// Estimated (or guessed) source attributes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceParams {
    pub position: Vec3,
    /// One emission time per jointly solved event
    pub emission_times: Vec<f64>,
    /// Shared clock bias (seconds) when the time-error variant is solved
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub clock_bias: Option<f64>,
}

impl SourceParams {
    /// 4 parameters: x, y, z, t
    pub fn single(position: Vec3, emission_time: f64) -> Self {
        Self { position, emission_times: vec![emission_time], clock_bias: None }
    }

    /// 5 parameters: x, y, z, t, time error
    pub fn with_clock_bias(position: Vec3, emission_time: f64, bias: f64) -> Self {
        Self { position, emission_times: vec![emission_time], clock_bias: Some(bias) }
    }

    /// 3 + n parameters: one position shared by n events
    pub fn shared(position: Vec3, emission_times: Vec<f64>) -> Self {
        Self { position, emission_times, clock_bias: None }
    }

    pub fn layout(&self) -> ParamLayout {
        ParamLayout { events: self.emission_times.len(), clock_bias: self.clock_bias.is_some() }
    }

    pub fn dimension(&self) -> usize { self.layout().dimension() }

    /// Emission time of the first (often only) event
    pub fn emission_time(&self) -> f64 {
        self.emission_times.first().copied().unwrap_or(0.0)
    }

    /// Emission time with the clock bias folded in
    pub fn effective_emission_time(&self, event: usize) -> f64 {
        self.emission_times.get(event).copied().unwrap_or(0.0) + self.clock_bias.unwrap_or(0.0)
    }

    pub fn get(&self, name: ParamName) -> Option<f64> {
        match name {
            ParamName::X => Some(self.position.x),
            ParamName::Y => Some(self.position.y),
            ParamName::Z => Some(self.position.z),
            ParamName::EmissionTime(e) => self.emission_times.get(e).copied(),
            ParamName::ClockBias => self.clock_bias,
        }
    }

    pub fn set(&mut self, name: ParamName, value: f64) {
        match name {
            ParamName::X => self.position.x = value,
            ParamName::Y => self.position.y = value,
            ParamName::Z => self.position.z = value,
            ParamName::EmissionTime(e) => {
                if let Some(t) = self.emission_times.get_mut(e) { *t = value; }
            }
            ParamName::ClockBias => {
                if self.clock_bias.is_some() { self.clock_bias = Some(value); }
            }
        }
    }

    pub(crate) fn to_vec(&self) -> Vec<f64> {
        let mut v = Vec::with_capacity(self.dimension());
        v.extend_from_slice(&self.position.to_array());
        v.extend_from_slice(&self.emission_times);
        if let Some(b) = self.clock_bias { v.push(b); }
        v
    }

    pub(crate) fn unflatten(layout: ParamLayout, v: &[f64]) -> Self {
        debug_assert_eq!(v.len(), layout.dimension());
        Self {
            position: Vec3::new(v[0], v[1], v[2]),
            emission_times: v[3..3 + layout.events].to_vec(),
            clock_bias: layout.bias_index().map(|i| v[i]),
        }
    }

    pub fn is_finite(&self) -> bool {
        self.to_vec().iter().all(|x| x.is_finite())
    }
}

/// Per-parameter scale making positions (m) and times (s) commensurate:
/// a metre counts like 1/c seconds.
pub(crate) fn parameter_scale(layout: ParamLayout, speed: f64) -> Vec<f64> {
    let mut d = vec![1.0 / speed; 3];
    d.resize(layout.dimension(), 1.0);
    d
}
