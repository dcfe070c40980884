use thiserror::Error;

/// Failure raised by the rotation host while rolling the active file.
///
/// This is the only error that crosses the crate boundary: the coordinator
/// passes it through unmodified, everything else degrades to a logged,
/// skipped upload.
#[derive(Error, Debug)]
pub enum RolloverError {
    #[error("Rollover failed: {0}")]
    Failed(String),

    #[error("I/O error during rollover: {0}")]
    Io(#[from] std::io::Error),

    #[error("Rollover error: {0}")]
    Other(#[from] anyhow::Error),
}
