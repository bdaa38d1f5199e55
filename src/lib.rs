pub mod clock;
pub mod coordinator;
pub mod engine;
pub mod error;
pub mod params;
pub mod plasticity;
pub mod recorder;
pub mod reference;
pub mod spine;
pub mod stimulus;
pub mod storage;
pub mod types;

mod util;
