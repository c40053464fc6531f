use thiserror::Error;

use crate::state::LactState;

/// Canonical error type for the control engine.
///
/// `Io` never terminates the scan loop: affected tags carry Bad quality and
/// the interlock rules take it from there. Everything in the `Config` family
/// (unknown tag, bad setpoint) is surfaced to the caller before the loop
/// starts.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum CoreError {
    #[error("unknown tag: {0}")]
    UnknownTag(String),

    #[error("tag {tag} holds {actual}, expected {expected}")]
    TypeMismatch {
        tag: &'static str,
        expected: &'static str,
        actual: &'static str,
    },

    #[error("setpoint {name} = {value} outside [{lo}, {hi}]")]
    InvalidSetpoint { name: String, value: f64, lo: f64, hi: f64 },

    #[error("unknown setpoint: {0}")]
    UnknownSetpoint(String),

    #[error("i/o failure: {0}")]
    Io(String),

    #[error("command queue full")]
    QueueFull,

    #[error("command {command} not valid in {state}")]
    IllegalCommand {
        command: &'static str,
        state: LactState,
    },
}
