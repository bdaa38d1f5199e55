use simple_error::SimpleResult;

/// Fixed-step solver for the compartmental (electrical) model. Time is in
/// milliseconds.
pub trait ElectricalEngine {
    fn advance(&mut self, dt: f64) -> SimpleResult<()>;

    fn get_scalar(&self, section: &str, variable: &str) -> SimpleResult<f64>;

    fn has_scalar(&self, section: &str, variable: &str) -> bool;

    fn get_param(&self, section: &str, channel: &str, name: &str) -> SimpleResult<f64>;

    fn set_param(&mut self, section: &str, channel: &str, name: &str, value: f64)
        -> SimpleResult<()>;

    fn has_param(&self, section: &str, channel: &str, name: &str) -> bool;

    fn section_names(&self) -> Vec<String>;
}

/// Reaction-network solver owned by exactly one spine. Time is in the
/// engine's own unit (seconds for the bundled models).
pub trait BiochemicalEngine {
    fn advance(&mut self, duration: f64) -> SimpleResult<()>;

    fn get_species(&self, name: &str) -> SimpleResult<f64>;

    fn set_species(&mut self, name: &str, value: f64) -> SimpleResult<()>;

    fn has_species(&self, name: &str) -> bool;

    fn get_input_rate(&self, process: &str) -> SimpleResult<f64>;

    fn set_input_rate(&mut self, process: &str, value: f64) -> SimpleResult<()>;

    fn has_process(&self, process: &str) -> bool;

    fn current_time(&self) -> f64;
}

pub type BoxedElectricalEngine = Box<dyn ElectricalEngine + Send>;

pub type BoxedBiochemicalEngine = Box<dyn BiochemicalEngine + Send>;
