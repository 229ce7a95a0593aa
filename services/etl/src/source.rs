//! Where spreadsheet resources come from.

use async_trait::async_trait;
use ida_collector::{CatalogClient, CollectorError, IdaResource};

/// Discovery and download of the resources a run processes.
#[async_trait]
pub trait ResourceSource: Send + Sync {
    /// Resources matching the target years and services.
    async fn discover(&self) -> Result<Vec<IdaResource>, CollectorError>;

    /// Raw bytes of one resource, held in memory.
    async fn fetch(&self, resource: &IdaResource) -> Result<Vec<u8>, CollectorError>;
}

#[async_trait]
impl ResourceSource for CatalogClient {
    async fn discover(&self) -> Result<Vec<IdaResource>, CollectorError> {
        CatalogClient::discover(self).await
    }

    async fn fetch(&self, resource: &IdaResource) -> Result<Vec<u8>, CollectorError> {
        self.download(resource).await
    }
}
