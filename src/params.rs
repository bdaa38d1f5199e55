use serde::{Deserialize, Serialize};
use simple_error::SimpleError;

use crate::types::HashSet;

const RATIO_TOLERANCE: f64 = 1e-9;

#[derive(Default, Debug, Clone, Serialize, Deserialize)]
pub struct RunParams {
    pub clock_params: ClockParams,
    pub plasticity_params: PlasticityParams,
    pub coupling_params: CouplingParams,
    pub recording_params: RecordingParams,
    pub technical_params: TechnicalParams,
}

/// Step sizes of the electrical clock, in milliseconds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClockParams {
    pub dt_fine: f64,
    pub dt_coarse: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlasticityParams {
    pub hill_exponent: f64,
    pub half_activation: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CouplingParams {
    pub calcium_variables: Vec<String>,
    pub calcium_species: String,
    pub kinase_species: String,
    /// Converts an electrical duration into biochemical engine time units.
    pub biochemical_time_scale: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecordingParams {
    pub section_variables: Vec<String>,
    pub tracked_species: Vec<String>,
    pub electrical_interval_ticks: usize,
    pub progress_interval: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TechnicalParams {
    pub num_threads: Option<usize>,
    pub pin_threads: bool,
}

impl Default for ClockParams {
    fn default() -> Self {
        Self {
            dt_fine: 0.025,
            dt_coarse: 1.0,
        }
    }
}

impl Default for PlasticityParams {
    fn default() -> Self {
        Self {
            hill_exponent: 2.0,
            half_activation: 4.0,
        }
    }
}

impl Default for CouplingParams {
    fn default() -> Self {
        Self {
            calcium_variables: vec!["cai".to_string(), "cali".to_string()],
            calcium_species: "ca".to_string(),
            kinase_species: "CaMKIIbar".to_string(),
            biochemical_time_scale: 1e-3,
        }
    }
}

impl Default for RecordingParams {
    fn default() -> Self {
        Self {
            section_variables: ["v", "cai", "cali", "ica"]
                .iter()
                .map(|var| var.to_string())
                .collect(),
            tracked_species: [
                "ca",
                "moles_bound_ca_per_moles_cam",
                "Rbar",
                "PP2Bbar",
                "CaMKIIbar",
            ]
            .iter()
            .map(|species| species.to_string())
            .collect(),
            electrical_interval_ticks: 1,
            progress_interval: 200.0,
        }
    }
}

impl Default for TechnicalParams {
    fn default() -> Self {
        Self {
            num_threads: Some(1),
            pin_threads: false,
        }
    }
}

impl TechnicalParams {
    pub fn get_num_threads(&self) -> usize {
        self.num_threads.unwrap_or_else(num_cpus::get)
    }
}

pub fn validate_run_params(run_params: &RunParams) -> Result<(), SimpleError> {
    validate_clock_params(&run_params.clock_params)?;
    validate_plasticity_params(&run_params.plasticity_params)?;
    validate_coupling_params(&run_params.coupling_params)?;
    validate_recording_params(&run_params.recording_params)?;
    validate_technical_params(&run_params.technical_params)?;

    Ok(())
}

/// Number of fine ticks per coupling interval. Fails unless `dt_coarse` is an
/// integer multiple of `dt_fine` up to a relative tolerance.
pub fn compute_ticks_per_coupling(dt_fine: f64, dt_coarse: f64) -> Result<usize, SimpleError> {
    if !(dt_fine > 0.0) || !dt_fine.is_finite() {
        return Err(SimpleError::new("dt_fine must be strictly positive"));
    }

    if !(dt_coarse > 0.0) || !dt_coarse.is_finite() {
        return Err(SimpleError::new("dt_coarse must be strictly positive"));
    }

    let ratio = dt_coarse / dt_fine;
    let rounded = ratio.round();

    if rounded < 1.0 || (ratio - rounded).abs() > RATIO_TOLERANCE * rounded {
        return Err(SimpleError::new(format!(
            "dt_coarse ({}) must be an integer multiple of dt_fine ({})",
            dt_coarse, dt_fine
        )));
    }

    Ok(rounded as usize)
}

fn validate_clock_params(clock_params: &ClockParams) -> Result<(), SimpleError> {
    compute_ticks_per_coupling(clock_params.dt_fine, clock_params.dt_coarse)?;
    Ok(())
}

fn validate_plasticity_params(plasticity_params: &PlasticityParams) -> Result<(), SimpleError> {
    if !(plasticity_params.hill_exponent > 0.0) {
        return Err(SimpleError::new("hill_exponent must be strictly positive"));
    }

    if !(plasticity_params.half_activation > 0.0) {
        return Err(SimpleError::new(
            "half_activation must be strictly positive",
        ));
    }

    Ok(())
}

fn validate_coupling_params(coupling_params: &CouplingParams) -> Result<(), SimpleError> {
    if coupling_params.calcium_variables.is_empty() {
        return Err(SimpleError::new("calcium_variables must not be empty"));
    }

    let mut seen = HashSet::default();
    for var in &coupling_params.calcium_variables {
        if !seen.insert(var.as_str()) {
            return Err(SimpleError::new(format!(
                "duplicate calcium variable: {}",
                var
            )));
        }
    }

    if coupling_params.calcium_species.is_empty() {
        return Err(SimpleError::new("calcium_species must not be empty"));
    }

    if coupling_params.kinase_species.is_empty() {
        return Err(SimpleError::new("kinase_species must not be empty"));
    }

    if !(coupling_params.biochemical_time_scale > 0.0) {
        return Err(SimpleError::new(
            "biochemical_time_scale must be strictly positive",
        ));
    }

    Ok(())
}

fn validate_recording_params(recording_params: &RecordingParams) -> Result<(), SimpleError> {
    if recording_params.electrical_interval_ticks == 0 {
        return Err(SimpleError::new(
            "electrical_interval_ticks must be strictly positive",
        ));
    }

    if !(recording_params.progress_interval > 0.0) {
        return Err(SimpleError::new(
            "progress_interval must be strictly positive",
        ));
    }

    Ok(())
}

fn validate_technical_params(technical_params: &TechnicalParams) -> Result<(), SimpleError> {
    if let Some(num_threads) = technical_params.num_threads {
        if num_threads == 0 {
            return Err(SimpleError::new("num_threads must be strictly positive"));
        }

        if num_cpus::get() < num_threads {
            return Err(SimpleError::new(
                "num_threads must not be greater than number of available CPUs",
            ));
        }
    }

    Ok(())
}
