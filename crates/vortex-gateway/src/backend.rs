use std::future::Future;

use serde_json::Value;
use uuid::Uuid;

use vortex_types::api::{AuthSession, Claims, SignUpRequest};
use vortex_types::{ChangeFilter, Query, Record, Row, Table};

use crate::dispatcher::Subscription;
use crate::error::Result;

/// Request/response access to the backend tables plus row-level change feeds.
///
/// Every write is last-write-wins; no call assumes exclusive access to a row.
pub trait BackendGateway: Send + Sync + 'static {
    /// Rows matching the query, in the requested order (insertion order breaks ties).
    fn select(&self, query: Query) -> impl Future<Output = Result<Vec<Row>>> + Send;

    /// Number of rows matching the query's filters.
    fn count(&self, query: Query) -> impl Future<Output = Result<u64>> + Send;

    /// Insert rows; returns them as stored, with defaulted columns filled in.
    fn insert(&self, table: Table, rows: Vec<Row>) -> impl Future<Output = Result<Vec<Row>>> + Send;

    /// Apply `patch` to every row matching the query's filters. Returns how many changed.
    fn update(&self, query: Query, patch: Row) -> impl Future<Output = Result<u64>> + Send;

    /// Delete every row matching the query's filters. Returns how many were removed.
    fn delete(&self, query: Query) -> impl Future<Output = Result<u64>> + Send;

    /// Start receiving change events. Delivery stops when the subscription is dropped.
    fn subscribe(&self, filter: ChangeFilter) -> Subscription;
}

/// Account management on the backend.
pub trait AuthBackend: Send + Sync + 'static {
    fn sign_up(&self, request: SignUpRequest) -> impl Future<Output = Result<AuthSession>> + Send;

    fn sign_in(&self, email: &str, password: &str) -> impl Future<Output = Result<AuthSession>> + Send;

    fn verify(&self, token: &str) -> Result<Claims>;

    fn update_password(&self, user_id: Uuid, password: &str) -> impl Future<Output = Result<()>> + Send;

    /// Accepts unknown addresses silently.
    fn request_password_reset(&self, email: &str) -> impl Future<Output = Result<()>> + Send;

    fn sign_out(&self, user_id: Uuid) -> impl Future<Output = Result<()>> + Send;
}

/// Blob storage for avatars.
pub trait ObjectStorage: Send + Sync + 'static {
    /// Store `bytes` at `{bucket}/{path}` and return its public URL.
    fn put_object(
        &self,
        bucket: &str,
        path: &str,
        bytes: Vec<u8>,
        upsert: bool,
    ) -> impl Future<Output = Result<String>> + Send;
}

/// Typed helpers over [`BackendGateway`].
pub trait GatewayExt: BackendGateway {
    fn select_as<T: Record>(&self, query: Query) -> impl Future<Output = Result<Vec<T>>> + Send {
        async move {
            debug_assert_eq!(query.table, T::TABLE);
            let rows = self.select(query).await?;
            rows.into_iter().map(decode).collect()
        }
    }

    fn first_as<T: Record>(&self, query: Query) -> impl Future<Output = Result<Option<T>>> + Send {
        async move {
            let mut rows = self.select_as::<T>(query.limit(1)).await?;
            Ok(if rows.is_empty() { None } else { Some(rows.swap_remove(0)) })
        }
    }

    fn insert_as<T: Record>(&self, rows: Vec<Row>) -> impl Future<Output = Result<Vec<T>>> + Send {
        async move {
            let stored = self.insert(T::TABLE, rows).await?;
            stored.into_iter().map(decode).collect()
        }
    }
}

impl<G: BackendGateway> GatewayExt for G {}

pub fn decode<T: Record>(row: Row) -> Result<T> {
    Ok(serde_json::from_value(Value::Object(row))?)
}
