use std::collections::HashSet;

use tracing::{error, info, warn};
use uuid::Uuid;

use vortex_gateway::BackendGateway;
use vortex_types::api::{NewChat, NewMembership, to_row};
use vortex_types::validation::ValidationError;
use vortex_types::{Chat, ChatMembership, Query, Row, Table};

use crate::backend::Backend;
use crate::error::Result;
use crate::session::Session;

/// Opens 1:1 conversations, reusing an existing one when there is one.
pub struct ChatStarter<G> {
    backend: Backend<G>,
    session: Session,
}

impl<G: BackendGateway> ChatStarter<G> {
    pub fn new(backend: Backend<G>, session: Session) -> Self {
        Self { backend, session }
    }

    /// Chat id shared with `other_user`, creating the chat and both memberships if needed.
    pub async fn start_chat(&self, other_user: Uuid) -> Result<Uuid> {
        let me = self.session.user_id;
        if other_user == me {
            return Err(ValidationError::SelfTarget.into());
        }

        if let Some(chat_id) = self.existing_chat(other_user).await? {
            info!("Reusing chat {} with {}", chat_id, other_user);
            return Ok(chat_id);
        }

        let chat = self
            .backend
            .insert::<Chat>(&NewChat { created_by: me })
            .await
            .inspect_err(|e| error!("Could not create chat with {}: {}", other_user, e))?;

        let rows = [me, other_user]
            .into_iter()
            .map(|user_id| to_row(&NewMembership { chat_id: chat.id, user_id }))
            .collect::<std::result::Result<Vec<Row>, _>>()
            .map_err(vortex_gateway::GatewayError::from)?;

        if let Err(e) = self.backend.insert_many::<ChatMembership>(rows).await {
            error!("Could not add members to chat {}: {}", chat.id, e);
            // Memberships cascade with the chat.
            if let Err(cleanup) = self.backend.delete(Query::from(Table::Chats).eq("id", chat.id)).await {
                warn!("Orphaned chat {} left behind: {}", chat.id, cleanup);
            }
            return Err(e);
        }

        info!("Created chat {} between {} and {}", chat.id, me, other_user);
        Ok(chat.id)
    }

    /// A chat whose only members are the two of us.
    async fn existing_chat(&self, other_user: Uuid) -> Result<Option<Uuid>> {
        let mine = self
            .backend
            .select::<ChatMembership>(
                Query::from(Table::ChatMemberships).eq("user_id", self.session.user_id),
            )
            .await?;
        if mine.is_empty() {
            return Ok(None);
        }
        let my_chats: Vec<Uuid> = mine.iter().map(|m| m.chat_id).collect();

        let shared = self
            .backend
            .select::<ChatMembership>(
                Query::from(Table::ChatMemberships)
                    .is_in("chat_id", &my_chats)
                    .eq("user_id", other_user),
            )
            .await?;
        let shared: HashSet<Uuid> = shared.into_iter().map(|m| m.chat_id).collect();

        for chat_id in my_chats.into_iter().filter(|id| shared.contains(id)) {
            let members = self
                .backend
                .count(Query::from(Table::ChatMemberships).eq("chat_id", chat_id))
                .await?;
            if members == 2 {
                return Ok(Some(chat_id));
            }
        }
        Ok(None)
    }
}

