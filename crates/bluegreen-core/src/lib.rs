pub mod config;
pub mod driver;
pub mod types;

pub use config::ControllerConfig;
pub use driver::{DriverError, Provisioner, WeightSetter};
pub use types::*;
