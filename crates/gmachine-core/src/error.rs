use thiserror::Error;

#[derive(Error, Debug)]
pub enum GMachineError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("Config error: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, GMachineError>;

/// Failure reported by a hardware monitoring backend
#[derive(Error, Debug)]
pub enum BackendError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Update failed: {0}")]
    Update(String),

    #[error("Driver error: {0}")]
    Driver(String),

    #[error("No sensor values from {0}")]
    NoReadings(String),

    #[error("Backend is closed")]
    Closed,
}

/// Raised once while enumerating hardware at startup
#[derive(Error, Debug)]
pub enum ProbeInitError {
    #[error("Hardware enumeration failed: {0}")]
    Enumeration(#[source] BackendError),
}

/// Per-tick probe failure
#[derive(Error, Debug)]
pub enum ProbeError {
    #[error("Sensor read failed: {0}")]
    ReadFailure(#[source] BackendError),

    #[error("Hardware probe is not capable")]
    NotCapable,
}
