use thiserror::Error;
use uuid::Uuid;

pub type Result<T> = std::result::Result<T, PositionError>;

#[derive(Debug, Error)]
pub enum PositionError {
    #[error("campaign {0} not found")]
    CampaignNotFound(Uuid),

    #[error("waitlist user {0} not found")]
    UserNotFound(Uuid),

    /// A persistence read or write failed. Never retried here.
    #[error("{operation} failed for {id}: {source:#}")]
    Store {
        operation: &'static str,
        id: Uuid,
        #[source]
        source: anyhow::Error,
    },
}

impl PositionError {
    pub fn store(operation: &'static str, id: Uuid) -> impl FnOnce(anyhow::Error) -> Self {
        move |source| Self::Store {
            operation,
            id,
            source,
        }
    }

    /// Callers answer these with a 404-equivalent.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::CampaignNotFound(_) | Self::UserNotFound(_))
    }
}
