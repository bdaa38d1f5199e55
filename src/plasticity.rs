use simple_error::SimpleResult;

use crate::engine::ElectricalEngine;
use crate::params::PlasticityParams;
use crate::spine::{Synapse, WEIGHT_PARAM};
use crate::types::SynapseKind;

/// Saturating Hill-type potentiation driven by the kinase readout. The weight
/// accumulates without an upper bound.
#[derive(Debug, Clone)]
pub struct PlasticityUpdater {
    hill_exponent: f64,
    half_activation: f64,
}

impl PlasticityUpdater {
    pub fn new(params: &PlasticityParams) -> Self {
        Self {
            hill_exponent: params.hill_exponent,
            half_activation: params.half_activation,
        }
    }

    pub fn compute_delta(&self, readout: f64) -> f64 {
        let readout = readout.max(0.0);
        let activation = readout.powf(self.hill_exponent);
        activation / (self.half_activation.powf(self.hill_exponent) + activation)
    }

    /// Applies one potentiation step to an AMPA synapse. The electrical engine
    /// is written first; the synapse is only touched once that succeeded, so
    /// the live weight and its history never diverge. NMDA synapses are
    /// left alone and yield `None`.
    pub fn update(
        &self,
        synapse: &mut Synapse,
        readout: f64,
        t: f64,
        electrical: &mut dyn ElectricalEngine,
    ) -> SimpleResult<Option<f64>> {
        if synapse.kind() != SynapseKind::Ampa {
            return Ok(None);
        }

        let weight = synapse.weight() + self.compute_delta(readout);

        electrical.set_param(synapse.section(), synapse.channel(), WEIGHT_PARAM, weight)?;
        synapse.commit_weight(t, weight);

        Ok(Some(weight))
    }
}
