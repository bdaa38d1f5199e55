use simple_error::SimpleError;
use thiserror::Error;

use crate::recorder::StorageRecords;

#[derive(Debug, Error)]
pub enum SpineSyncError {
    #[error("configuration error: {0}")]
    Configuration(SimpleError),
    #[error("engine error after tick {last_completed_tick}: {source}")]
    Engine {
        last_completed_tick: usize,
        source: SimpleError,
    },
    #[error("scheduling conflict: {0}")]
    SchedulingConflict(SimpleError),
    #[error("recording error: {0}")]
    Recording(SimpleError),
    #[error("storage error: {0}")]
    Storage(String),
    #[error("run cancelled after tick {last_completed_tick}")]
    Cancelled { last_completed_tick: usize },
}

pub type Result<T> = std::result::Result<T, SpineSyncError>;

impl From<rusqlite::Error> for SpineSyncError {
    fn from(err: rusqlite::Error) -> Self {
        SpineSyncError::Storage(err.to_string())
    }
}

impl From<std::io::Error> for SpineSyncError {
    fn from(err: std::io::Error) -> Self {
        SpineSyncError::Storage(err.to_string())
    }
}

/// A run that stopped before reaching its stop time. Whatever the recorder
/// accumulated up to the failure is flushed into `records`.
#[derive(Debug, Error)]
#[error("{error}")]
pub struct RunAborted {
    pub error: SpineSyncError,
    pub records: StorageRecords,
}

impl RunAborted {
    pub fn last_completed_tick(&self) -> Option<usize> {
        match self.error {
            SpineSyncError::Engine {
                last_completed_tick,
                ..
            }
            | SpineSyncError::Cancelled {
                last_completed_tick,
            } => Some(last_completed_tick),
            _ => None,
        }
    }
}
