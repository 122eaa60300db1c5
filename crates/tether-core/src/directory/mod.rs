//! Server directory lookup.
//!
//! When no candidate endpoints are known, a [`DirectoryResolver`] is asked
//! for a fresh list. Every kind of failure, including an empty answer, is
//! reported as [`TetherError::DirectoryUnavailable`](crate::TetherError).

mod cell;
mod http;

pub use cell::CellId;
pub use http::HttpDirectory;

use crate::endpoint::Endpoint;
use crate::{Result, TetherError};
use async_trait::async_trait;

/// Source of candidate endpoints.
///
/// Implementations make a single attempt per call and never retry.
#[async_trait]
pub trait DirectoryResolver: Send + Sync + 'static {
    async fn resolve(&self, cell_id: CellId) -> Result<Vec<Endpoint>>;
}

/// Directory answering with a fixed list.
#[derive(Debug, Clone, Default)]
pub struct StaticDirectory {
    endpoints: Vec<Endpoint>,
}

impl StaticDirectory {
    pub fn new(endpoints: impl IntoIterator<Item = Endpoint>) -> Self {
        Self {
            endpoints: endpoints.into_iter().collect(),
        }
    }
}

#[async_trait]
impl DirectoryResolver for StaticDirectory {
    async fn resolve(&self, _cell_id: CellId) -> Result<Vec<Endpoint>> {
        if self.endpoints.is_empty() {
            return Err(TetherError::directory("static server list is empty"));
        }
        Ok(self.endpoints.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_static_directory_returns_its_list() {
        let endpoints: Vec<Endpoint> = vec![
            "1.2.3.4:27015".parse().unwrap(),
            "5.6.7.8:27016".parse().unwrap(),
        ];
        let directory = StaticDirectory::new(endpoints.clone());
        assert_eq!(directory.resolve(CellId::default()).await.unwrap(), endpoints);
    }

    #[tokio::test]
    async fn test_empty_static_directory_is_unavailable() {
        let err = StaticDirectory::default()
            .resolve(CellId::new(4))
            .await
            .unwrap_err();
        assert!(err.is_fatal_for_startup());
    }
}
