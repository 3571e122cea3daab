use std::{error::Error, fmt};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SpaceError {
    InvalidSettings(&'static str),
    /// Mapping another block would cross the configured ceiling.
    HeapExhausted {
        heap_bytes: usize,
        max_heap_bytes: usize,
    },
    OsAllocationFailed {
        bytes: usize,
    },
    CollectorSpawnFailed(String),
}

impl fmt::Display for SpaceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SpaceError::InvalidSettings(reason) => write!(f, "invalid space settings: {reason}"),
            SpaceError::HeapExhausted {
                heap_bytes,
                max_heap_bytes,
            } => write!(
                f,
                "heap exhausted: {heap_bytes} bytes mapped, ceiling is {max_heap_bytes} bytes"
            ),
            SpaceError::OsAllocationFailed { bytes } => {
                write!(f, "operating system refused to map {bytes} bytes")
            }
            SpaceError::CollectorSpawnFailed(reason) => {
                write!(f, "could not start collector thread: {reason}")
            }
        }
    }
}

impl Error for SpaceError {}

/// Logs the error and terminates the process. Used where continuing would hand
/// out memory the heap does not have.
#[cold]
pub(crate) fn fatal(error: &SpaceError) -> ! {
    log::error!(target: "gc", "fatal: {error}");
    eprintln!("fatal: {error}");
    std::process::abort()
}
