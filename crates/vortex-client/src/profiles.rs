use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use chrono::Utc;
use tokio::sync::RwLock;
use tracing::{debug, info};
use uuid::Uuid;

use vortex_gateway::{BackendGateway, ObjectStorage};
use vortex_types::api::ProfilePatch;
use vortex_types::{Direction, Filter, Profile, Query, Table, validation};

use crate::backend::Backend;
use crate::error::Result;
use crate::session::Session;

pub const AVATAR_BUCKET: &str = "avatars";
const SEARCH_LIMIT: u32 = 20;

/// Read-only profile copies keyed by user id.
///
/// Entries are only replaced by an explicit fetch or refresh; nothing here expires on its own.
pub struct ProfileDirectory<G> {
    backend: Backend<G>,
    session: Session,
    cache: Arc<RwLock<HashMap<Uuid, Profile>>>,
}

impl<G> Clone for ProfileDirectory<G> {
    fn clone(&self) -> Self {
        Self {
            backend: self.backend.clone(),
            session: self.session.clone(),
            cache: self.cache.clone(),
        }
    }
}

impl<G: BackendGateway> ProfileDirectory<G> {
    pub fn new(backend: Backend<G>, session: Session) -> Self {
        Self {
            backend,
            session,
            cache: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    pub async fn cached(&self, user_id: Uuid) -> Option<Profile> {
        self.cache.read().await.get(&user_id).cloned()
    }

    /// Cached profile, fetched on a miss. `None` when the user has no profile.
    pub async fn get(&self, user_id: Uuid) -> Result<Option<Profile>> {
        if let Some(profile) = self.cached(user_id).await {
            return Ok(Some(profile));
        }
        self.fetch(user_id).await
    }

    /// Fetch the given users in one request and refresh their cache entries.
    pub async fn fetch_many(&self, user_ids: &[Uuid]) -> Result<HashMap<Uuid, Profile>> {
        if user_ids.is_empty() {
            return Ok(HashMap::new());
        }

        let profiles = self
            .backend
            .select::<Profile>(Query::from(Table::Profiles).is_in("user_id", user_ids))
            .await?;

        let found: HashMap<Uuid, Profile> = profiles.into_iter().map(|p| (p.user_id, p)).collect();
        let mut cache = self.cache.write().await;
        for (user_id, profile) in &found {
            cache.insert(*user_id, profile.clone());
        }
        Ok(found)
    }

    /// Drop the cached copy and fetch it again.
    pub async fn refresh(&self, user_id: Uuid) -> Result<Option<Profile>> {
        self.cache.write().await.remove(&user_id);
        self.fetch(user_id).await
    }

    /// Other users whose username or display name contains `query`, case-insensitively.
    /// Queries shorter than two characters return nothing without a request.
    pub async fn search(&self, query: &str) -> Result<Vec<Profile>> {
        let Some(needle) = validation::search_query(query) else {
            return Ok(vec![]);
        };

        let query = Query::from(Table::Profiles)
            .filter(Filter::any_of([
                Filter::contains("username", needle),
                Filter::contains("display_name", needle),
            ]))
            .neq("user_id", self.session.user_id)
            .order_by("username", Direction::Asc)
            .limit(SEARCH_LIMIT);

        let results = self.backend.select::<Profile>(query).await?;
        debug!("Search {:?} matched {} profile(s)", needle, results.len());
        Ok(results)
    }

    pub async fn update_own(&self, display_name: &str, bio: &str, status: &str) -> Result<Option<Profile>> {
        let patch = ProfilePatch {
            display_name: Some(display_name.trim().to_string()),
            bio: Some(bio.trim().to_string()),
            status: Some(status.trim().to_string()),
            ..ProfilePatch::default()
        };
        self.patch_own(&patch).await?;
        self.refresh(self.session.user_id).await
    }

    /// Mark the current user online or offline and stamp `last_seen`.
    pub async fn set_presence(&self, online: bool) -> Result<()> {
        let patch = ProfilePatch {
            is_online: Some(online),
            last_seen: Some(Utc::now()),
            ..ProfilePatch::default()
        };
        self.patch_own(&patch).await?;
        self.cache.write().await.remove(&self.session.user_id);
        Ok(())
    }

    async fn patch_own(&self, patch: &ProfilePatch) -> Result<u64> {
        self.backend
            .update(
                Query::from(Table::Profiles).eq("user_id", self.session.user_id),
                patch,
            )
            .await
    }

    async fn fetch(&self, user_id: Uuid) -> Result<Option<Profile>> {
        let profile = self
            .backend
            .first::<Profile>(Query::from(Table::Profiles).eq("user_id", user_id))
            .await?;
        if let Some(profile) = &profile {
            self.cache.write().await.insert(user_id, profile.clone());
        }
        Ok(profile)
    }
}

impl<G: BackendGateway + ObjectStorage> ProfileDirectory<G> {
    /// Store a new avatar at `{user_id}/avatar.{ext}` and point the profile at it.
    pub async fn upload_avatar(&self, file_name: &str, bytes: Vec<u8>) -> Result<String> {
        let path = avatar_path(self.session.user_id, file_name);
        let url = self
            .backend
            .timed(self.backend.gateway().put_object(AVATAR_BUCKET, &path, bytes, true))
            .await?;

        let patch = ProfilePatch {
            avatar_url: Some(url.clone()),
            ..ProfilePatch::default()
        };
        self.patch_own(&patch).await?;
        self.refresh(self.session.user_id).await?;

        info!("Avatar updated for {}", self.session.user_id);
        Ok(url)
    }
}

fn avatar_path(user_id: Uuid, file_name: &str) -> String {
    let ext = Path::new(file_name)
        .extension()
        .and_then(|ext| ext.to_str())
        .filter(|ext| !ext.is_empty() && ext.chars().all(|c| c.is_ascii_alphanumeric()))
        .map(str::to_ascii_lowercase)
        .unwrap_or_else(|| "png".to_string());
    format!("{}/avatar.{}", user_id, ext)
}
