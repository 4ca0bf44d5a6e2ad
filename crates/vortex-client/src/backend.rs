use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use vortex_gateway::{BackendGateway, GatewayExt, Subscription};
use vortex_types::api::to_row;
use vortex_types::{ChangeFilter, Query, Record, Row};

use crate::error::{ClientError, Result};

/// Shared handle on the gateway. Every request goes through [`Backend::timed`],
/// so a hung call surfaces as [`ClientError::Timeout`] instead of blocking a view forever.
pub struct Backend<G> {
    gateway: Arc<G>,
    timeout: Duration,
}

impl<G> Clone for Backend<G> {
    fn clone(&self) -> Self {
        Self {
            gateway: self.gateway.clone(),
            timeout: self.timeout,
        }
    }
}

impl<G: BackendGateway> Backend<G> {
    pub fn new(gateway: Arc<G>, timeout: Duration) -> Self {
        Self { gateway, timeout }
    }

    pub fn gateway(&self) -> &G {
        &self.gateway
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub async fn timed<T, F>(&self, request: F) -> Result<T>
    where
        F: Future<Output = vortex_gateway::error::Result<T>>,
    {
        match tokio::time::timeout(self.timeout, request).await {
            Ok(result) => Ok(result?),
            Err(_) => Err(ClientError::Timeout(self.timeout)),
        }
    }

    pub async fn select<T: Record>(&self, query: Query) -> Result<Vec<T>> {
        self.timed(self.gateway.select_as::<T>(query)).await
    }

    pub async fn first<T: Record>(&self, query: Query) -> Result<Option<T>> {
        self.timed(self.gateway.first_as::<T>(query)).await
    }

    pub async fn count(&self, query: Query) -> Result<u64> {
        self.timed(self.gateway.count(query)).await
    }

    /// Insert one row and return it as stored.
    pub async fn insert<T: Record>(&self, row: &impl Serialize) -> Result<T> {
        let row = to_row(row).map_err(vortex_gateway::GatewayError::from)?;
        self.insert_many::<T>(vec![row])
            .await?
            .into_iter()
            .next()
            .ok_or(ClientError::NotFound)
    }

    pub async fn insert_many<T: Record>(&self, rows: Vec<Row>) -> Result<Vec<T>> {
        self.timed(self.gateway.insert_as::<T>(rows)).await
    }

    pub async fn update(&self, query: Query, patch: &impl Serialize) -> Result<u64> {
        let patch = to_row(patch).map_err(vortex_gateway::GatewayError::from)?;
        self.timed(self.gateway.update(query, patch)).await
    }

    pub async fn delete(&self, query: Query) -> Result<u64> {
        self.timed(self.gateway.delete(query)).await
    }

    pub fn subscribe(&self, filter: ChangeFilter) -> Subscription {
        self.gateway.subscribe(filter)
    }
}
