use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("invalid sequence: {0}")]
    InvalidSequence(String),

    #[error("invalid data: {0}")]
    InvalidData(String),

    #[error("unsupported: {0}")]
    Unsupported(String),

    #[error("fit failed: {0}")]
    Fit(String),

    #[error("no peaks found above threshold {threshold}")]
    NoPeaks { threshold: f64 },
}

impl Error {
    /// Returns `true` for errors caused by invalid caller input rather than
    /// by the environment.
    pub fn is_invalid_input(&self) -> bool {
        matches!(
            self,
            Self::InvalidSequence(_) | Self::InvalidData(_) | Self::Unsupported(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, Error>;
