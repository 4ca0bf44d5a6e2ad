use chrono::Utc;
use tracing::{info, warn};

use vortex_gateway::{AuthBackend, BackendGateway};
use vortex_types::api::{ProfilePatch, SignUpRequest};
use vortex_types::{Query, Table, validation};

use crate::backend::Backend;
use crate::error::{ClientError, Result};
use crate::session::Session;

/// Sign-up, sign-in and account maintenance. Produces the [`Session`] the
/// rest of the client is constructed with; it keeps no session of its own.
pub struct AuthService<G> {
    backend: Backend<G>,
}

impl<G: BackendGateway + AuthBackend> AuthService<G> {
    pub fn new(backend: Backend<G>) -> Self {
        Self { backend }
    }

    fn auth(&self) -> &G {
        self.backend.gateway()
    }

    /// Validates everything locally before any request goes out.
    /// A blank display name falls back to the username.
    pub async fn sign_up(&self, email: &str, password: &str, username: &str, display_name: &str) -> Result<Session> {
        let username = validation::username(username)?;
        validation::password(password)?;
        let email = validation::email(email)?;

        let display_name = match display_name.trim() {
            "" => username.clone(),
            name => name.to_string(),
        };
        let request = SignUpRequest {
            email,
            password: password.to_string(),
            username,
            display_name,
        };

        let session: Session = self.backend.timed(self.auth().sign_up(request)).await?.into();
        self.mark_presence(&session, true).await;
        info!("Signed up {}", session.user_id);
        Ok(session)
    }

    pub async fn sign_in(&self, email: &str, password: &str) -> Result<Session> {
        let email = validation::email(email)?;
        let session: Session = self.backend.timed(self.auth().sign_in(&email, password)).await?.into();
        self.mark_presence(&session, true).await;
        Ok(session)
    }

    /// Resume a stored session from its access token.
    pub fn restore(&self, access_token: &str) -> Result<Session> {
        let claims = self.auth().verify(access_token).map_err(|_| ClientError::SignedOut)?;
        Ok(Session {
            user_id: claims.sub,
            email: claims.email,
            access_token: access_token.to_string(),
        })
    }

    /// Marks the user offline, then ends the session.
    pub async fn sign_out(&self, session: &Session) -> Result<()> {
        self.mark_presence(session, false).await;
        self.backend.timed(self.auth().sign_out(session.user_id)).await
    }

    pub async fn change_password(&self, session: &Session, new: &str, confirm: &str) -> Result<()> {
        validation::password_change(new, confirm)?;
        self.backend
            .timed(self.auth().update_password(session.user_id, new))
            .await
    }

    pub async fn reset_password(&self, email: &str) -> Result<()> {
        let email = validation::email(email)?;
        self.backend.timed(self.auth().request_password_reset(&email)).await
    }

    async fn mark_presence(&self, session: &Session, online: bool) {
        let patch = ProfilePatch {
            is_online: Some(online),
            last_seen: Some(Utc::now()),
            ..ProfilePatch::default()
        };
        let query = Query::from(Table::Profiles).eq("user_id", session.user_id);
        if let Err(e) = self.backend.update(query, &patch).await {
            warn!("Presence update for {} failed: {}", session.user_id, e);
        }
    }
}

impl<G> Clone for AuthService<G> {
    fn clone(&self) -> Self {
        Self {
            backend: self.backend.clone(),
        }
    }
}

