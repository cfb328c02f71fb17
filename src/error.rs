use thiserror::Error;

#[derive(Error, Debug)]
pub enum SimError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON parsing error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("Invalid controller configuration: {0}")]
    InvalidController(String),

    #[error("Invalid patient configuration: {0}")]
    InvalidPatient(String),

    #[error("Simulation error: {0}")]
    Simulation(String),

    #[error("Parameter validation error: {0}")]
    Validation(String),

    #[error("Random number generation error")]
    Random,
}

pub type SimResult<T> = Result<T, SimError>;
