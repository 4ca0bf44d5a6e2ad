use uuid::Uuid;
use vortex_types::api::AuthSession;

/// The signed-in user, handed to every view-model that acts on their behalf.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    pub user_id: Uuid,
    pub email: String,
    pub access_token: String,
}

impl From<AuthSession> for Session {
    fn from(auth: AuthSession) -> Self {
        Self {
            user_id: auth.user_id,
            email: auth.email,
            access_token: auth.access_token,
        }
    }
}
