use thiserror::Error;

#[derive(Debug, Error)]
pub enum CardError {
    #[error("{0}")]
    Invalid(String),

    #[error("Card with UID {0} already exists")]
    AlreadyExists(String),

    #[error("Bolt card is disabled")]
    Disabled,

    #[error("{0}")]
    LimitExceeded(String),

    #[error("Card not found")]
    NotFound,

    #[error("Card usage not found")]
    UsageNotFound,

    #[error("New counter value must be greater than current counter ({current})")]
    CounterNotAdvanced { current: u32 },

    #[error("Card usage already spent")]
    AlreadySpent,

    #[error(transparent)]
    Repository(#[from] anyhow::Error),
}

impl CardError {
    pub fn invalid(reason: impl Into<String>) -> Self {
        Self::Invalid(reason.into())
    }
}
