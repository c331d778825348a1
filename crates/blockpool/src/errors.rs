//! Error handling and exit codes.

use blockpool_core::AllocError;

/// Process exit codes.
pub mod exit_codes {
    /// Successful execution.
    pub const SUCCESS: i32 = 0;
    /// Generic error.
    pub const ERROR_GENERIC: i32 = 1;
    /// An allocator refused a request.
    pub const ERROR_ALLOCATION: i32 = 3;
    /// Invalid configuration.
    pub const ERROR_CONFIG: i32 = 4;
}

/// Errors raised by the application layer.
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    /// Invalid command-line configuration.
    #[error("configuration error: {0}")]
    Config(String),

    /// An allocator refused a request.
    #[error("allocation failed: {0}")]
    Allocation(#[from] AllocError),

    /// The benchmark thread could not be started.
    #[error("failed to spawn benchmark thread: {0}")]
    Spawn(#[from] std::io::Error),
}

/// Map an application error to the process exit code.
pub fn exit_code(err: &anyhow::Error) -> i32 {
    if let Some(app) = err.downcast_ref::<AppError>() {
        return match app {
            AppError::Config(_) => exit_codes::ERROR_CONFIG,
            AppError::Allocation(_) => exit_codes::ERROR_ALLOCATION,
            AppError::Spawn(_) => exit_codes::ERROR_GENERIC,
        };
    }
    if err.downcast_ref::<AllocError>().is_some() {
        return exit_codes::ERROR_ALLOCATION;
    }
    exit_codes::ERROR_GENERIC
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_codes() {
        let config = anyhow::Error::new(AppError::Config("bad".into()));
        assert_eq!(exit_code(&config), 4);

        let alloc = anyhow::Error::new(AllocError::CapacityExceeded { capacity: 1 });
        assert_eq!(exit_code(&alloc), 3);

        let wrapped = anyhow::Error::new(AppError::from(AllocError::HeapExhausted { bytes: 8 }));
        assert_eq!(exit_code(&wrapped), 3);

        assert_eq!(exit_code(&anyhow::anyhow!("other")), 1);
        assert_eq!(exit_codes::SUCCESS, 0);
    }
}
