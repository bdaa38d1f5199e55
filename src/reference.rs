//! Small built-in engines. They give the coordinator something concrete to
//! drive in the binaries and tests; the dynamics are deliberately minimal
//! relaxation kinetics integrated with explicit Euler.

use simple_error::{SimpleError, SimpleResult};

use crate::engine::{BiochemicalEngine, ElectricalEngine};
use crate::types::HashMap;

const E_REST: f64 = -70.0;
const TAU_MEMBRANE: f64 = 10.0;
const SYN_DEPOLARIZATION: f64 = 2.0;
const CA_CONDUCTANCE: f64 = 0.05;
const CAI_REST: f64 = 5e-5;
const CALI_REST: f64 = 0.0;
const CAI_INFLUX: f64 = 2e-3;
const CALI_INFLUX: f64 = 5e-4;
const TAU_CAI: f64 = 20.0;
const TAU_CALI: f64 = 50.0;

pub const SECTION_VARIABLES: [&str; 4] = ["v", "cai", "cali", "ica"];
pub const DRIVE_PARAM: &str = "drive";

#[derive(Debug, Clone)]
struct SectionState {
    name: String,
    v: f64,
    cai: f64,
    cali: f64,
    ica: f64,
}

impl SectionState {
    fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            v: E_REST,
            cai: CAI_REST,
            cali: CALI_REST,
            ica: 0.0,
        }
    }

    fn get(&self, variable: &str) -> Option<f64> {
        match variable {
            "v" => Some(self.v),
            "cai" => Some(self.cai),
            "cali" => Some(self.cali),
            "ica" => Some(self.ica),
            _ => None,
        }
    }

    fn step(&mut self, dt: f64, drive: f64) {
        self.ica = -CA_CONDUCTANCE * drive;
        self.cai += dt * (-self.ica * CAI_INFLUX - (self.cai - CAI_REST) / TAU_CAI);
        self.cali += dt * (-self.ica * CALI_INFLUX - (self.cali - CALI_REST) / TAU_CALI);
        self.v += dt * (-(self.v - E_REST) / TAU_MEMBRANE + drive * SYN_DEPOLARIZATION);
    }
}

/// Isolated passive sections with calcium pools. Each synaptic channel has a
/// `weight` and a `drive`; a section is depolarized by the sum of
/// `weight * drive` over its channels.
#[derive(Debug, Clone)]
pub struct ReferenceCompartment {
    sections: Vec<SectionState>,
    params: HashMap<(String, String, String), f64>,
}

impl ReferenceCompartment {
    pub fn new(section_names: &[&str]) -> Self {
        Self {
            sections: section_names
                .iter()
                .map(|name| SectionState::new(name))
                .collect(),
            params: HashMap::default(),
        }
    }

    pub fn add_section(&mut self, name: &str) {
        if self.section_idx(name).is_none() {
            self.sections.push(SectionState::new(name));
        }
    }

    pub fn add_channel(&mut self, section: &str, channel: &str, weight: f64) -> SimpleResult<()> {
        if self.section_idx(section).is_none() {
            return Err(SimpleError::new(format!("no such section: {}", section)));
        }

        self.params
            .insert(param_key(section, channel, "weight"), weight);
        self.params
            .insert(param_key(section, channel, DRIVE_PARAM), 0.0);

        Ok(())
    }

    fn section_idx(&self, name: &str) -> Option<usize> {
        self.sections.iter().position(|section| section.name == name)
    }

    fn section_drive(&self, section: &str) -> f64 {
        self.params
            .iter()
            .filter(|((sec, _, name), _)| sec == section && name == DRIVE_PARAM)
            .map(|((sec, channel, _), drive)| {
                let weight = self
                    .params
                    .get(&param_key(sec, channel, "weight"))
                    .copied()
                    .unwrap_or(0.0);
                weight * drive
            })
            .sum()
    }
}

fn param_key(section: &str, channel: &str, name: &str) -> (String, String, String) {
    (section.to_string(), channel.to_string(), name.to_string())
}

impl ElectricalEngine for ReferenceCompartment {
    fn advance(&mut self, dt: f64) -> SimpleResult<()> {
        if !(dt > 0.0) || !dt.is_finite() {
            return Err(SimpleError::new(format!("invalid time step: {}", dt)));
        }

        let drives: Vec<f64> = self
            .sections
            .iter()
            .map(|section| self.section_drive(&section.name))
            .collect();

        for (section, drive) in self.sections.iter_mut().zip(drives) {
            section.step(dt, drive);
        }

        Ok(())
    }

    fn get_scalar(&self, section: &str, variable: &str) -> SimpleResult<f64> {
        self.section_idx(section)
            .and_then(|idx| self.sections[idx].get(variable))
            .ok_or_else(|| {
                SimpleError::new(format!("no variable {} on section {}", variable, section))
            })
    }

    fn has_scalar(&self, section: &str, variable: &str) -> bool {
        self.get_scalar(section, variable).is_ok()
    }

    fn get_param(&self, section: &str, channel: &str, name: &str) -> SimpleResult<f64> {
        self.params
            .get(&param_key(section, channel, name))
            .copied()
            .ok_or_else(|| {
                SimpleError::new(format!(
                    "no parameter {} on channel {} of section {}",
                    name, channel, section
                ))
            })
    }

    fn set_param(
        &mut self,
        section: &str,
        channel: &str,
        name: &str,
        value: f64,
    ) -> SimpleResult<()> {
        match self.params.get_mut(&param_key(section, channel, name)) {
            Some(param) => {
                *param = value;
                Ok(())
            }
            None => Err(SimpleError::new(format!(
                "no parameter {} on channel {} of section {}",
                name, channel, section
            ))),
        }
    }

    fn has_param(&self, section: &str, channel: &str, name: &str) -> bool {
        self.params.contains_key(&param_key(section, channel, name))
    }

    fn section_names(&self) -> Vec<String> {
        self.sections
            .iter()
            .map(|section| section.name.clone())
            .collect()
    }
}

const SUB_STEP: f64 = 1e-4;
const CA_BASAL: f64 = 5e-5;
const TAU_CA: f64 = 0.02;
const CA_IN_SCALE: f64 = 1e-9;
const KD_CAM: f64 = 5e-4;
const TAU_CAM: f64 = 0.01;
const TAU_PP2B: f64 = 0.5;
const TAU_R: f64 = 0.2;
const CAMKII_TOTAL: f64 = 20.0;
const K_CAMKII_ON: f64 = 5.0;
const K_CAMKII_OFF: f64 = 0.5;

pub const CA_IN_PROCESS: &str = "ca_in";

/// Calcium → calmodulin → CaMKII/PP2B cascade with a `ca_in` influx process.
/// Time is in seconds.
#[derive(Debug, Clone)]
pub struct ReferenceKinaseNetwork {
    t: f64,
    ca: f64,
    bound_cam: f64,
    r_bar: f64,
    pp2b_bar: f64,
    camkii_bar: f64,
    ca_in_rate: f64,
}

impl ReferenceKinaseNetwork {
    pub fn new() -> Self {
        Self {
            t: 0.0,
            ca: CA_BASAL,
            bound_cam: 0.0,
            r_bar: 0.0,
            pp2b_bar: 0.0,
            camkii_bar: 0.0,
            ca_in_rate: 0.0,
        }
    }

    fn step(&mut self, h: f64) {
        let ca_n = self.ca.powi(4);
        let cam_target = ca_n / (KD_CAM.powi(4) + ca_n);

        let d_ca = self.ca_in_rate * CA_IN_SCALE - (self.ca - CA_BASAL) / TAU_CA;
        let d_cam = (cam_target - self.bound_cam) / TAU_CAM;
        let d_pp2b = (self.bound_cam - self.pp2b_bar) / TAU_PP2B;
        let d_r = (self.bound_cam * (1.0 - self.pp2b_bar) - self.r_bar) / TAU_R;
        let d_camkii = K_CAMKII_ON * self.bound_cam * (CAMKII_TOTAL - self.camkii_bar)
            - K_CAMKII_OFF * self.pp2b_bar * self.camkii_bar;

        self.ca = (self.ca + h * d_ca).max(0.0);
        self.bound_cam += h * d_cam;
        self.pp2b_bar += h * d_pp2b;
        self.r_bar += h * d_r;
        self.camkii_bar = (self.camkii_bar + h * d_camkii).max(0.0);
    }

    fn species_mut(&mut self, name: &str) -> Option<&mut f64> {
        match name {
            "ca" => Some(&mut self.ca),
            "moles_bound_ca_per_moles_cam" => Some(&mut self.bound_cam),
            "Rbar" => Some(&mut self.r_bar),
            "PP2Bbar" => Some(&mut self.pp2b_bar),
            "CaMKIIbar" => Some(&mut self.camkii_bar),
            _ => None,
        }
    }
}

impl Default for ReferenceKinaseNetwork {
    fn default() -> Self {
        Self::new()
    }
}

impl BiochemicalEngine for ReferenceKinaseNetwork {
    fn advance(&mut self, duration: f64) -> SimpleResult<()> {
        if !(duration > 0.0) || !duration.is_finite() {
            return Err(SimpleError::new(format!("invalid duration: {}", duration)));
        }

        let num_steps = (duration / SUB_STEP).ceil().max(1.0) as usize;
        let h = duration / num_steps as f64;

        for _ in 0..num_steps {
            self.step(h);
        }

        self.t += duration;
        Ok(())
    }

    fn get_species(&self, name: &str) -> SimpleResult<f64> {
        match name {
            "ca" => Ok(self.ca),
            "moles_bound_ca_per_moles_cam" => Ok(self.bound_cam),
            "Rbar" => Ok(self.r_bar),
            "PP2Bbar" => Ok(self.pp2b_bar),
            "CaMKIIbar" => Ok(self.camkii_bar),
            _ => Err(SimpleError::new(format!("no such species: {}", name))),
        }
    }

    fn set_species(&mut self, name: &str, value: f64) -> SimpleResult<()> {
        match self.species_mut(name) {
            Some(species) => {
                *species = value;
                Ok(())
            }
            None => Err(SimpleError::new(format!("no such species: {}", name))),
        }
    }

    fn has_species(&self, name: &str) -> bool {
        self.get_species(name).is_ok()
    }

    fn get_input_rate(&self, process: &str) -> SimpleResult<f64> {
        if process == CA_IN_PROCESS {
            Ok(self.ca_in_rate)
        } else {
            Err(SimpleError::new(format!("no such process: {}", process)))
        }
    }

    fn set_input_rate(&mut self, process: &str, value: f64) -> SimpleResult<()> {
        if process == CA_IN_PROCESS {
            self.ca_in_rate = value;
            Ok(())
        } else {
            Err(SimpleError::new(format!("no such process: {}", process)))
        }
    }

    fn has_process(&self, process: &str) -> bool {
        process == CA_IN_PROCESS
    }

    fn current_time(&self) -> f64 {
        self.t
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use float_cmp::assert_approx_eq;

    #[test]
    fn compartment_rests_without_drive() {
        let mut sut = ReferenceCompartment::new(&["soma"]);
        for _ in 0..100 {
            sut.advance(0.025).unwrap();
        }

        assert_approx_eq!(f64, sut.get_scalar("soma", "v").unwrap(), E_REST);
        assert_approx_eq!(f64, sut.get_scalar("soma", "cai").unwrap(), CAI_REST);
    }

    #[test]
    fn drive_raises_calcium() {
        let mut sut = ReferenceCompartment::new(&["head"]);
        sut.add_channel("head", "ampa", 1.0).unwrap();
        sut.set_param("head", "ampa", DRIVE_PARAM, 1.0).unwrap();

        for _ in 0..40 {
            sut.advance(0.025).unwrap();
        }

        assert!(sut.get_scalar("head", "cai").unwrap() > CAI_REST);
        assert!(sut.get_scalar("head", "cali").unwrap() > CALI_REST);
        assert!(sut.get_scalar("head", "ica").unwrap() < 0.0);
        assert!(sut.get_scalar("head", "v").unwrap() > E_REST);
    }

    #[test]
    fn unknown_names_fail() {
        let mut sut = ReferenceCompartment::new(&["head"]);
        assert!(sut.get_scalar("head", "nai").is_err());
        assert!(sut.get_scalar("tail", "v").is_err());
        assert!(sut.set_param("head", "ampa", "weight", 1.0).is_err());
        assert!(sut.add_channel("tail", "ampa", 1.0).is_err());
        assert!(sut.advance(0.0).is_err());
        assert!(!sut.has_param("head", "ampa", "weight"));
    }

    #[test]
    fn network_tracks_time() {
        let mut sut = ReferenceKinaseNetwork::new();
        sut.advance(0.001).unwrap();
        sut.advance(0.001).unwrap();
        assert_approx_eq!(f64, sut.current_time(), 0.002);
    }

    #[test]
    fn calcium_activates_camkii() {
        let mut sut = ReferenceKinaseNetwork::new();

        for _ in 0..100 {
            sut.set_species("ca", 2e-3).unwrap();
            sut.advance(0.001).unwrap();
        }

        assert!(sut.get_species("moles_bound_ca_per_moles_cam").unwrap() > 0.5);
        assert!(sut.get_species("CaMKIIbar").unwrap() > 1.0);
    }

    #[test]
    fn influx_process_raises_calcium() {
        let mut sut = ReferenceKinaseNetwork::new();
        sut.set_input_rate(CA_IN_PROCESS, 4.0e8).unwrap();
        sut.advance(0.001).unwrap();
        assert!(sut.get_species("ca").unwrap() > CA_BASAL);
        assert!(sut.set_input_rate("ca_out", 1.0).is_err());
    }
}
