use tracing::{error, info};
use uuid::Uuid;

use vortex_gateway::BackendGateway;
use vortex_types::api::NewBlock;
use vortex_types::validation::ValidationError;
use vortex_types::{Block, Direction, Profile, Query, Table};

use crate::backend::Backend;
use crate::error::{ClientError, Result};
use crate::profiles::ProfileDirectory;
use crate::session::Session;

/// A block together with the blocked user's profile, when it still exists.
#[derive(Debug, Clone, PartialEq)]
pub struct BlockedUser {
    pub block: Block,
    pub profile: Option<Profile>,
}

/// The signed-in user's blocks. A row's presence is the whole signal.
pub struct BlockList<G> {
    backend: Backend<G>,
    session: Session,
    profiles: ProfileDirectory<G>,
}

impl<G: BackendGateway> BlockList<G> {
    pub fn new(backend: Backend<G>, session: Session, profiles: ProfileDirectory<G>) -> Self {
        Self {
            backend,
            session,
            profiles,
        }
    }

    fn mine(&self) -> Query {
        Query::from(Table::Blocks).eq("blocker_id", self.session.user_id)
    }

    pub async fn is_blocked(&self, other: Uuid) -> Result<bool> {
        let count = self.backend.count(self.mine().eq("blocked_id", other)).await?;
        Ok(count > 0)
    }

    pub async fn block(&self, other: Uuid) -> Result<()> {
        if other == self.session.user_id {
            return Err(ValidationError::SelfTarget.into());
        }
        if self.is_blocked(other).await? {
            return Ok(());
        }

        let row = NewBlock {
            blocker_id: self.session.user_id,
            blocked_id: other,
        };
        self.backend
            .insert::<Block>(&row)
            .await
            .inspect_err(|e| error!("Could not block {}: {}", other, e))?;
        info!("{} blocked {}", self.session.user_id, other);
        Ok(())
    }

    pub async fn unblock(&self, other: Uuid) -> Result<()> {
        self.backend
            .delete(self.mine().eq("blocked_id", other))
            .await
            .inspect_err(|e| error!("Could not unblock {}: {}", other, e))?;
        Ok(())
    }

    /// Flip the block on `other`. Returns whether they are blocked afterwards.
    pub async fn toggle(&self, other: Uuid) -> Result<bool> {
        if self.is_blocked(other).await? {
            self.unblock(other).await?;
            Ok(false)
        } else {
            self.block(other).await?;
            Ok(true)
        }
    }

    /// Newest block first.
    pub async fn blocked_users(&self) -> Result<Vec<BlockedUser>> {
        let blocks = self
            .backend
            .select::<Block>(self.mine().order_by("created_at", Direction::Desc))
            .await?;
        let ids: Vec<Uuid> = blocks.iter().map(|b| b.blocked_id).collect();
        let profiles = self.profiles.fetch_many(&ids).await?;

        Ok(blocks
            .into_iter()
            .map(|block| BlockedUser {
                profile: profiles.get(&block.blocked_id).cloned(),
                block,
            })
            .collect())
    }

    pub async fn unblock_by_id(&self, block_id: Uuid) -> Result<()> {
        let removed = self
            .backend
            .delete(self.mine().eq("id", block_id))
            .await
            .inspect_err(|e| error!("Could not remove block {}: {}", block_id, e))?;
        if removed == 0 {
            return Err(ClientError::NotFound);
        }
        Ok(())
    }
}
