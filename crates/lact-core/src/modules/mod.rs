pub mod bsw;
pub mod flow;
pub mod pressure;
pub mod proving;
pub mod pump;
pub mod sampler;
pub mod temperature;

pub use bsw::BswMonitor;
pub use flow::{BatchTotals, FlowMeasurement};
pub use pressure::PressureMonitor;
pub use proving::Proving;
pub use pump::PumpControl;
pub use sampler::Sampler;
pub use temperature::TemperatureMonitor;
