pub mod alarms;
pub mod controller;
pub mod error;
pub mod io;
pub mod modules;
pub mod safety;
mod safety_proptest;
pub mod setpoints;
pub mod sim;
pub mod state;
pub mod store;
pub mod tags;
pub mod timebase;

pub use alarms::{ActiveAlarm, AlarmAction, AlarmId, Annunciator, Requests, Severity};
pub use controller::{
    BatchReport, Command, Controller, ControllerHandle, Journal, NullJournal, ScanStats,
};
pub use error::CoreError;
pub use io::{scale_analog, unscale_analog, IoPort};
pub use modules::proving::{ProveRun, ProvingReport};
pub use setpoints::{SetpointStore, Setpoints};
pub use sim::{SharedSim, SkidSimulator};
pub use state::LactState;
pub use store::{TagSnapshot, TagStore};
pub use tags::{Quality, TagId, TagKind, Value};
pub use timebase::TimeBase;
