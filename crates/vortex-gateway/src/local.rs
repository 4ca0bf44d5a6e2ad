use std::sync::{Arc, Mutex};

use tracing::{debug, info, warn};
use uuid::Uuid;

use vortex_db::Database;
use vortex_types::api::{AuthSession, Claims, NewProfile, SignUpRequest, to_row};
use vortex_types::validation;
use vortex_types::{ChangeEvent, ChangeFilter, ChangeOp, Query, Row, Table};

use crate::auth::{create_token, hash_password, verify_password, verify_token};
use crate::backend::{AuthBackend, BackendGateway, ObjectStorage};
use crate::dispatcher::{Dispatcher, Subscription};
use crate::error::{GatewayError, Result};
use crate::objects::ObjectStore;

/// In-process backend over the SQLite store.
///
/// Every successful write is published on the dispatcher, one event per row,
/// before the next write commits. Subscribers therefore see events in commit order.
#[derive(Clone)]
pub struct LocalBackend {
    inner: Arc<LocalInner>,
}

struct LocalInner {
    db: Database,
    dispatcher: Dispatcher,
    objects: Option<ObjectStore>,
    jwt_secret: String,
    /// Held from commit until the write's events are published.
    commit_order: Mutex<()>,
}

impl LocalInner {
    fn publish(&self, table: Table, op: ChangeOp, rows: &[Row]) {
        for row in rows {
            self.dispatcher.publish(ChangeEvent::new(table, op, row.clone()));
        }
        if !rows.is_empty() {
            debug!("Published {} {:?} event(s) on {}", rows.len(), op, table);
        }
    }
}

impl LocalBackend {
    pub fn new(db: Database, jwt_secret: impl Into<String>, objects: Option<ObjectStore>) -> Self {
        Self {
            inner: Arc::new(LocalInner {
                db,
                dispatcher: Dispatcher::new(),
                objects,
                jwt_secret: jwt_secret.into(),
                commit_order: Mutex::new(()),
            }),
        }
    }

    /// Fresh backend with a private in-memory database and no object storage.
    pub fn open_in_memory(jwt_secret: impl Into<String>) -> Result<Self> {
        let db = Database::open_in_memory().map_err(GatewayError::from_store)?;
        Ok(Self::new(db, jwt_secret, None))
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.inner.dispatcher
    }

    /// Password reset requests recorded for an account.
    pub async fn password_resets(&self, user_id: Uuid) -> Result<u64> {
        self.blocking(move |db| db.count_password_resets(&user_id.to_string()))
            .await
    }

    /// Run a store call on the blocking pool.
    async fn blocking<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Database) -> anyhow::Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let inner = self.inner.clone();
        tokio::task::spawn_blocking(move || f(&inner.db))
            .await
            .map_err(|e| GatewayError::Join(e.to_string()))?
            .map_err(GatewayError::from_store)
    }

    /// Run a store write on the blocking pool and publish the rows it touched.
    async fn write<F>(&self, table: Table, op: ChangeOp, f: F) -> Result<Vec<Row>>
    where
        F: FnOnce(&Database) -> anyhow::Result<Vec<Row>> + Send + 'static,
    {
        let inner = self.inner.clone();
        tokio::task::spawn_blocking(move || {
            let _commit = inner
                .commit_order
                .lock()
                .map_err(|e| anyhow::anyhow!("Commit lock poisoned: {}", e))?;
            let rows = f(&inner.db)?;
            inner.publish(table, op, &rows);
            Ok::<_, anyhow::Error>(rows)
        })
        .await
        .map_err(|e| GatewayError::Join(e.to_string()))?
        .map_err(GatewayError::from_store)
    }

    fn session(&self, user_id: Uuid, email: &str) -> Result<AuthSession> {
        let (access_token, expires_at) = create_token(&self.inner.jwt_secret, user_id, email)?;
        Ok(AuthSession {
            user_id,
            email: email.to_string(),
            access_token,
            expires_at,
        })
    }
}

impl BackendGateway for LocalBackend {
    async fn select(&self, query: Query) -> Result<Vec<Row>> {
        self.blocking(move |db| db.select(&query)).await
    }

    async fn count(&self, query: Query) -> Result<u64> {
        self.blocking(move |db| db.count(&query)).await
    }

    async fn insert(&self, table: Table, rows: Vec<Row>) -> Result<Vec<Row>> {
        self.write(table, ChangeOp::Insert, move |db| db.insert(table, &rows))
            .await
    }

    async fn update(&self, query: Query, patch: Row) -> Result<u64> {
        let table = query.table;
        let updated = self
            .write(table, ChangeOp::Update, move |db| db.update(&query, &patch))
            .await?;
        Ok(updated.len() as u64)
    }

    async fn delete(&self, query: Query) -> Result<u64> {
        let table = query.table;
        let removed = self
            .write(table, ChangeOp::Delete, move |db| db.delete(&query))
            .await?;
        Ok(removed.len() as u64)
    }

    fn subscribe(&self, filter: ChangeFilter) -> Subscription {
        self.inner.dispatcher.subscribe(filter)
    }
}

impl AuthBackend for LocalBackend {
    async fn sign_up(&self, request: SignUpRequest) -> Result<AuthSession> {
        let email = validation::email(&request.email)
            .map_err(|e| GatewayError::InvalidRow(e.to_string()))?;
        let username = validation::username(&request.username)
            .map_err(|e| GatewayError::InvalidRow(e.to_string()))?;
        validation::password(&request.password)
            .map_err(|e| GatewayError::InvalidRow(e.to_string()))?;

        // Check if username is taken
        let taken = self
            .count(Query::from(Table::Profiles).eq("username", &username))
            .await?;
        if taken > 0 {
            return Err(GatewayError::Conflict(format!("username {} is taken", username)));
        }

        let lookup = email.clone();
        if self
            .blocking(move |db| db.get_account_by_email(&lookup))
            .await?
            .is_some()
        {
            return Err(GatewayError::Conflict(format!("email {} is registered", email)));
        }

        let password = request.password;
        let password_hash = tokio::task::spawn_blocking(move || hash_password(&password))
            .await
            .map_err(|e| GatewayError::Join(e.to_string()))??;

        let user_id = Uuid::new_v4();
        let display_name = request.display_name.trim();
        let profile = to_row(&NewProfile {
            user_id,
            username: username.clone(),
            display_name: (!display_name.is_empty()).then(|| display_name.to_string()),
        })?;

        let account_email = email.clone();
        self.write(Table::Profiles, ChangeOp::Insert, move |db| {
            db.create_account(&user_id.to_string(), &account_email, &password_hash, &profile)
                .map(|stored| vec![stored])
        })
        .await?;

        info!("Account created for {} ({})", username, user_id);
        self.session(user_id, &email)
    }

    async fn sign_in(&self, email: &str, password: &str) -> Result<AuthSession> {
        let email = email.trim().to_lowercase();
        let lookup = email.clone();
        let account = self
            .blocking(move |db| db.get_account_by_email(&lookup))
            .await?
            .ok_or(GatewayError::Unauthorized)?;

        let password = password.to_string();
        let hash = account.password.clone();
        tokio::task::spawn_blocking(move || verify_password(&password, &hash))
            .await
            .map_err(|e| GatewayError::Join(e.to_string()))??;

        let user_id: Uuid = account
            .id
            .parse()
            .map_err(|_| GatewayError::Storage(format!("corrupt account id {}", account.id)))?;

        info!("User {} signed in", user_id);
        self.session(user_id, &email)
    }

    fn verify(&self, token: &str) -> Result<Claims> {
        verify_token(&self.inner.jwt_secret, token)
    }

    async fn update_password(&self, user_id: Uuid, password: &str) -> Result<()> {
        validation::password(password).map_err(|e| GatewayError::InvalidRow(e.to_string()))?;

        let password = password.to_string();
        let password_hash = tokio::task::spawn_blocking(move || hash_password(&password))
            .await
            .map_err(|e| GatewayError::Join(e.to_string()))??;

        let changed = self
            .blocking(move |db| db.update_password(&user_id.to_string(), &password_hash))
            .await?;
        if !changed {
            return Err(GatewayError::NotFound);
        }

        info!("Password updated for {}", user_id);
        Ok(())
    }

    async fn request_password_reset(&self, email: &str) -> Result<()> {
        let email = email.trim().to_lowercase();
        let lookup = email.clone();
        let Some(account) = self
            .blocking(move |db| db.get_account_by_email(&lookup))
            .await?
        else {
            debug!("Password reset requested for unknown address");
            return Ok(());
        };

        let reset_id = Uuid::new_v4().to_string();
        self.blocking(move |db| db.insert_password_reset(&reset_id, &account.id))
            .await?;
        info!("Password reset requested for {}", email);
        Ok(())
    }

    async fn sign_out(&self, user_id: Uuid) -> Result<()> {
        info!("User {} signed out", user_id);
        Ok(())
    }
}

impl ObjectStorage for LocalBackend {
    async fn put_object(&self, bucket: &str, path: &str, bytes: Vec<u8>, upsert: bool) -> Result<String> {
        let Some(objects) = self.inner.objects.as_ref() else {
            warn!("Upload to {}/{} refused: object storage is not configured", bucket, path);
            return Err(GatewayError::Storage("object storage is not configured".into()));
        };
        objects.put(bucket, path, &bytes, upsert).await
    }
}
