use simple_error::SimpleError;

use crate::params::{compute_ticks_per_coupling, ClockParams};

const STOP_TICK_TOLERANCE: f64 = 1e-9;

/// Integer tick clock. Time is always derived as `tick * dt_fine`, never
/// accumulated, so coupling alignment cannot drift.
#[derive(Debug, Clone)]
pub struct SimulationClock {
    dt_fine: f64,
    dt_coarse: f64,
    ticks_per_coupling: usize,
    tick: usize,
}

impl SimulationClock {
    pub fn new(dt_fine: f64, dt_coarse: f64) -> Result<Self, SimpleError> {
        let ticks_per_coupling = compute_ticks_per_coupling(dt_fine, dt_coarse)?;

        Ok(Self {
            dt_fine,
            dt_coarse,
            ticks_per_coupling,
            tick: 0,
        })
    }

    pub fn from_params(clock_params: &ClockParams) -> Result<Self, SimpleError> {
        Self::new(clock_params.dt_fine, clock_params.dt_coarse)
    }

    pub fn dt_fine(&self) -> f64 {
        self.dt_fine
    }

    pub fn dt_coarse(&self) -> f64 {
        self.dt_coarse
    }

    pub fn ticks_per_coupling(&self) -> usize {
        self.ticks_per_coupling
    }

    pub fn tick(&self) -> usize {
        self.tick
    }

    pub fn t(&self) -> f64 {
        self.time_at(self.tick)
    }

    pub fn time_at(&self, tick: usize) -> f64 {
        tick as f64 * self.dt_fine
    }

    pub fn is_coupling_tick(&self) -> bool {
        self.tick % self.ticks_per_coupling == 0
    }

    pub fn advance(&mut self) {
        self.tick += 1;
    }

    /// First tick whose time is at or beyond `t`. Values within rounding
    /// noise of a tick boundary snap onto that boundary.
    pub fn tick_at_or_after(&self, t: f64) -> usize {
        if t <= 0.0 {
            return 0;
        }

        let exact = t / self.dt_fine;
        let rounded = exact.round();

        if (exact - rounded).abs() <= STOP_TICK_TOLERANCE * rounded.max(1.0) {
            rounded as usize
        } else {
            exact.ceil() as usize
        }
    }
}
