use hr_common::ProcessorType;
use hr_dispatch::DispatchError;
use hr_platform::PlatformError;
use hr_queue::QueueError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum RouterError {
    #[error("Platform error: {0}")]
    Platform(#[from] PlatformError),

    #[error("Queue error: {0}")]
    Queue(#[from] QueueError),

    #[error("Dispatch error: {0}")]
    Dispatch(#[from] DispatchError),

    #[error("Invalid job payload: {0}")]
    Payload(#[from] serde_json::Error),

    #[error("No handler registered for {0}")]
    NoHandler(ProcessorType),
}

impl RouterError {
    /// Whether running the job again could succeed
    pub fn is_retryable(&self) -> bool {
        match self {
            RouterError::Platform(e) => !(e.is_validation() || e.is_not_found()),
            RouterError::Queue(_) => true,
            RouterError::Dispatch(e) => e.is_retryable(),
            RouterError::Payload(_) | RouterError::NoHandler(_) => false,
        }
    }
}
