use spinesync::params::RunParams;

pub const NUM_SPINES: usize = 64;
pub const T_STOP: f64 = 2000.0;

pub fn get_scenario_params() -> RunParams {
    let params_yaml_str = r#"
clock_params:
  dt_fine: 0.025
  dt_coarse: 1.0
plasticity_params:
  hill_exponent: 2.0
  half_activation: 4.0
coupling_params:
  calcium_variables:
  - cai
  - cali
  calcium_species: ca
  kinase_species: CaMKIIbar
  biochemical_time_scale: 0.001
recording_params:
  section_variables:
  - v
  - cai
  tracked_species:
  - ca
  - CaMKIIbar
  electrical_interval_ticks: 40
  progress_interval: 500.0
technical_params:
  num_threads: null
  pin_threads: false
"#;

    serde_yaml::from_str(params_yaml_str).unwrap()
}
