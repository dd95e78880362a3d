use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AppError {
    #[error("invalid_input - {0}")]
    InvalidInput(String),
    #[error("validation_error - {0}")]
    Validation(String),
    #[error("not_found - {0}")]
    NotFound(String),
    #[error("scheduling_error - {0}")]
    Scheduling(String),
    #[error("store_io_error - {0}")]
    StoreIo(String),
    #[error("invalid_data - {0}")]
    InvalidData(String),
}

impl AppError {
    pub fn invalid_input<M: Into<String>>(message: M) -> Self {
        Self::InvalidInput(message.into())
    }

    pub fn validation<M: Into<String>>(message: M) -> Self {
        Self::Validation(message.into())
    }

    pub fn not_found<M: Into<String>>(message: M) -> Self {
        Self::NotFound(message.into())
    }

    pub fn scheduling<M: Into<String>>(message: M) -> Self {
        Self::Scheduling(message.into())
    }

    pub fn store_io<M: Into<String>>(message: M) -> Self {
        Self::StoreIo(message.into())
    }

    pub fn invalid_data<M: Into<String>>(message: M) -> Self {
        Self::InvalidData(message.into())
    }

    pub fn code(&self) -> &'static str {
        match self {
            Self::InvalidInput(_) => "invalid_input",
            Self::Validation(_) => "validation_error",
            Self::NotFound(_) => "not_found",
            Self::Scheduling(_) => "scheduling_error",
            Self::StoreIo(_) => "store_io_error",
            Self::InvalidData(_) => "invalid_data",
        }
    }

    pub fn message(&self) -> &str {
        match self {
            Self::InvalidInput(message)
            | Self::Validation(message)
            | Self::NotFound(message)
            | Self::Scheduling(message)
            | Self::StoreIo(message)
            | Self::InvalidData(message) => message,
        }
    }
}
