use thiserror::Error;

use crate::entity::EntityError;
use crate::transport::TransportError;

/// Top-level error type for the strata-client crate.
///
/// Every failure is a returned value; nothing in the SDK panics on a wire
/// or server failure. The two paging-boundary variants are produced locally,
/// before any network call is made.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error(transparent)]
    Entity(#[from] EntityError),
    #[error("no further page")]
    NoNextPage,
    #[error("no previous page")]
    NoPreviousPage,
    #[error("no entity record in response for {path}")]
    MissingEntity { path: String },
}

impl ClientError {
    /// True for the local precondition failures returned by `advance_page`
    /// and `retreat_page` when no further/previous page exists.
    pub fn is_page_boundary(&self) -> bool {
        matches!(self, Self::NoNextPage | Self::NoPreviousPage)
    }
}

pub type ClientResult<T> = Result<T, ClientError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn page_boundary_errors_are_distinguished_from_transport() {
        assert!(ClientError::NoNextPage.is_page_boundary());
        assert!(ClientError::NoPreviousPage.is_page_boundary());

        let transport = ClientError::Transport(TransportError::Network("refused".to_string()));
        assert!(!transport.is_page_boundary());
    }
}
