use thiserror::Error;

#[derive(Error, Debug)]
pub enum FlowAggError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Out of memory: {0}")]
    OutOfMemory(String),

    #[error("Input read error: {0}")]
    InputRead(String),

    #[error("Presorted input is not sorted: {0}")]
    InputUnsorted(String),

    #[error("Error writing spill file #{index}: {source}")]
    SpillWrite {
        index: usize,
        #[source]
        source: std::io::Error,
    },

    #[error("Error reading spill file #{index}: {source}")]
    SpillRead {
        index: usize,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid configuration: {0}")]
    Config(String),
}

/// Status codes reported by the driver entry points.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum ErrorCode {
    Ok = 0,
    OutOfMemoryFatal = 1,
    InputReadError = 2,
    InputUnsortedInPresortedMode = 3,
    SpillWriteError = 4,
    SpillReadError = 5,
    ConfigInvalid = 6,
}

impl FlowAggError {
    pub fn code(&self) -> ErrorCode {
        match self {
            FlowAggError::Io(_) | FlowAggError::SpillWrite { .. } => ErrorCode::SpillWriteError,
            FlowAggError::OutOfMemory(_) => ErrorCode::OutOfMemoryFatal,
            FlowAggError::InputRead(_) => ErrorCode::InputReadError,
            FlowAggError::InputUnsorted(_) => ErrorCode::InputUnsortedInPresortedMode,
            FlowAggError::SpillRead { .. } => ErrorCode::SpillReadError,
            FlowAggError::Config(_) => ErrorCode::ConfigInvalid,
        }
    }

    /// Attribute a bare I/O error to a write of spill file `index`.
    pub fn on_spill_write(self, index: usize) -> Self {
        match self {
            FlowAggError::Io(source) => FlowAggError::SpillWrite { index, source },
            other => other,
        }
    }

    /// Attribute a bare I/O error to a read of spill file `index`.
    pub fn on_spill_read(self, index: usize) -> Self {
        match self {
            FlowAggError::Io(source) => FlowAggError::SpillRead { index, source },
            other => other,
        }
    }
}

pub type Result<T> = std::result::Result<T, FlowAggError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codes() {
        assert_eq!(ErrorCode::Ok as i32, 0);
        assert_eq!(
            FlowAggError::OutOfMemory("x".into()).code(),
            ErrorCode::OutOfMemoryFatal
        );
        assert_eq!(
            FlowAggError::Config("x".into()).code(),
            ErrorCode::ConfigInvalid
        );
    }

    #[test]
    fn test_spill_attribution() {
        let err = FlowAggError::from(std::io::Error::from(std::io::ErrorKind::UnexpectedEof));
        let err = err.on_spill_read(7);
        assert!(matches!(err, FlowAggError::SpillRead { index: 7, .. }));
        assert_eq!(err.code(), ErrorCode::SpillReadError);

        // already-classified errors pass through untouched
        let err = FlowAggError::InputRead("bad".into()).on_spill_write(3);
        assert!(matches!(err, FlowAggError::InputRead(_)));
    }
}
