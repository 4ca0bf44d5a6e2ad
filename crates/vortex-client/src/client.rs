use std::sync::Arc;
use std::time::Duration;

use vortex_gateway::BackendGateway;

use crate::backend::Backend;
use crate::blocks::BlockList;
use crate::chat_list::ChatListProjector;
use crate::messages::ConversationSlot;
use crate::profiles::ProfileDirectory;
use crate::session::Session;
use crate::start_chat::ChatStarter;

/// Every view-model for one signed-in user, sharing a gateway and a profile cache.
pub struct Client<G> {
    pub session: Session,
    pub profiles: ProfileDirectory<G>,
    pub chats: ChatListProjector<G>,
    pub conversation: ConversationSlot<G>,
    pub starter: ChatStarter<G>,
    pub blocks: BlockList<G>,
}

impl<G: BackendGateway> Client<G> {
    pub fn new(gateway: Arc<G>, request_timeout: Duration, session: Session) -> Self {
        let backend = Backend::new(gateway, request_timeout);
        let profiles = ProfileDirectory::new(backend.clone(), session.clone());
        Self {
            chats: ChatListProjector::new(backend.clone(), session.clone(), profiles.clone()),
            conversation: ConversationSlot::new(backend.clone(), session.clone(), profiles.clone()),
            starter: ChatStarter::new(backend.clone(), session.clone()),
            blocks: BlockList::new(backend, session.clone(), profiles.clone()),
            profiles,
            session,
        }
    }
}
