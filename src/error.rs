use thiserror::Error;

/// Errors raised by the sample hand-off core.
#[derive(Debug, Error)]
pub enum Error {
    /// The queue was cleaned up; no further samples are accepted.
    #[error("sample queue is closed")]
    QueueClosed,

    /// The worker already acknowledged shutdown and must not produce samples.
    #[error("worker {0} already acknowledged shutdown")]
    WorkerStopped(usize),

    #[error("histogram error: {0}")]
    Histogram(String),
}

impl From<hdrhistogram::CreationError> for Error {
    fn from(e: hdrhistogram::CreationError) -> Self {
        Error::Histogram(e.to_string())
    }
}

impl From<hdrhistogram::RecordError> for Error {
    fn from(e: hdrhistogram::RecordError) -> Self {
        Error::Histogram(e.to_string())
    }
}

impl From<hdrhistogram::AdditionError> for Error {
    fn from(e: hdrhistogram::AdditionError) -> Self {
        Error::Histogram(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, Error>;
