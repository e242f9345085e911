use thiserror::Error;

/// Common error types used across the notifier.
#[derive(Debug, Error)]
pub enum AppError {
    /// Invalid static setup. Only raised while constructing components.
    #[error("Configuration error: {0}")]
    Config(String),

    /// A template input field was absent; recovered with a placeholder.
    #[error("Template data missing: {0}")]
    TemplateData(String),

    #[error("Transient delivery failure: {0}")]
    DeliveryTransient(String),

    #[error("Delivery failed after {attempts} attempts: {reason}")]
    DeliveryPermanent { attempts: u32, reason: String },

    #[error("Queue is full ({0} messages pending)")]
    QueueFull(usize),

    #[error("Dispatcher is shut down")]
    ShutDown,
}

impl AppError {
    /// Whether the worker may schedule another attempt after this error.
    pub fn is_retryable(&self) -> bool {
        matches!(self, AppError::DeliveryTransient(_))
    }
}

pub type Result<T> = std::result::Result<T, AppError>;
