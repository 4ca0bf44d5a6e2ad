use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use futures_util::future::try_join_all;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use vortex_gateway::{BackendGateway, Delivery};
use vortex_types::api::MembershipPatch;
use vortex_types::{ChangeFilter, ChatMembership, ConversationSummary, Direction, Message, Query, Table};

use crate::backend::Backend;
use crate::error::Result;
use crate::profiles::ProfileDirectory;
use crate::runtime::LiveHandle;
use crate::session::Session;

/// Which chats the list shows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ChatFilter {
    /// Everything except archived chats.
    #[default]
    All,
    Unread,
    Pinned,
    Archived,
}

impl ChatFilter {
    pub fn matches(self, summary: &ConversationSummary) -> bool {
        let membership = &summary.membership;
        match self {
            ChatFilter::All => !membership.is_archived,
            ChatFilter::Unread => summary.unread_count > 0,
            ChatFilter::Pinned => membership.is_pinned,
            ChatFilter::Archived => membership.is_archived,
        }
    }
}

/// Snapshot published to the chat list screen.
#[derive(Debug, Clone, Default)]
pub struct ChatListView {
    /// Newest activity first.
    pub conversations: Vec<ConversationSummary>,
    pub loading: bool,
    /// Set once any load has succeeded.
    pub loaded: bool,
    /// Why the most recent refresh failed. The list itself is left as it was.
    pub last_error: Option<String>,
    generation: u64,
}

impl ChatListView {
    pub fn filtered(&self, filter: ChatFilter) -> Vec<&ConversationSummary> {
        self.conversations.iter().filter(|s| filter.matches(s)).collect()
    }

    pub fn total_unread(&self) -> u64 {
        self.conversations
            .iter()
            .filter(|s| !s.membership.is_archived)
            .map(|s| s.unread_count)
            .sum()
    }

    pub fn find(&self, chat_id: Uuid) -> Option<&ConversationSummary> {
        self.conversations.iter().find(|s| s.chat_id == chat_id)
    }
}

/// Projects memberships, messages and profiles into the signed-in user's chat list.
pub struct ChatListProjector<G> {
    backend: Backend<G>,
    session: Session,
    profiles: ProfileDirectory<G>,
    state: Arc<ProjectorState>,
}

struct ProjectorState {
    tx: watch::Sender<ChatListView>,
    issued: AtomicU64,
    in_flight: AtomicU64,
}

impl<G> Clone for ChatListProjector<G> {
    fn clone(&self) -> Self {
        Self {
            backend: self.backend.clone(),
            session: self.session.clone(),
            profiles: self.profiles.clone(),
            state: self.state.clone(),
        }
    }
}

impl<G: BackendGateway> ChatListProjector<G> {
    pub fn new(backend: Backend<G>, session: Session, profiles: ProfileDirectory<G>) -> Self {
        let (tx, _) = watch::channel(ChatListView::default());
        Self {
            backend,
            session,
            profiles,
            state: Arc::new(ProjectorState {
                tx,
                issued: AtomicU64::new(0),
                in_flight: AtomicU64::new(0),
            }),
        }
    }

    pub fn watch(&self) -> watch::Receiver<ChatListView> {
        self.state.tx.subscribe()
    }

    pub fn snapshot(&self) -> ChatListView {
        self.state.tx.borrow().clone()
    }

    /// Rebuild the list for the session's user.
    ///
    /// The list is replaced only when every fetch succeeds, and only if no newer
    /// load has already landed. On failure the previous list stays in place.
    pub async fn load(&self) -> Result<()> {
        let generation = self.state.issued.fetch_add(1, Ordering::SeqCst) + 1;
        self.state.in_flight.fetch_add(1, Ordering::SeqCst);
        self.state.tx.send_modify(|view| view.loading = true);

        let result = self.project().await;
        let still_loading = self.state.in_flight.fetch_sub(1, Ordering::SeqCst) > 1;

        match result {
            Ok(conversations) => {
                let count = conversations.len();
                self.state.tx.send_modify(|view| {
                    view.loading = still_loading;
                    if generation > view.generation {
                        view.generation = generation;
                        view.conversations = conversations;
                        view.loaded = true;
                        view.last_error = None;
                    }
                });
                debug!("Chat list load #{} produced {} conversation(s)", generation, count);
                Ok(())
            }
            Err(e) => {
                warn!("Chat list unavailable for this refresh: {}", e);
                let message = e.to_string();
                self.state.tx.send_modify(|view| {
                    view.loading = still_loading;
                    view.last_error = Some(message);
                });
                Err(e)
            }
        }
    }

    async fn project(&self) -> Result<Vec<ConversationSummary>> {
        let user_id = self.session.user_id;

        let memberships = self
            .backend
            .select::<ChatMembership>(Query::from(Table::ChatMemberships).eq("user_id", user_id))
            .await?;
        if memberships.is_empty() {
            return Ok(vec![]);
        }

        // A user holding two memberships in one chat gets no entry for it.
        let mut own_count: HashMap<Uuid, usize> = HashMap::new();
        for membership in &memberships {
            *own_count.entry(membership.chat_id).or_default() += 1;
        }
        let chat_ids: Vec<Uuid> = own_count.keys().copied().collect();

        let others = self
            .backend
            .select::<ChatMembership>(
                Query::from(Table::ChatMemberships)
                    .is_in("chat_id", &chat_ids)
                    .neq("user_id", user_id),
            )
            .await?;
        let other_user = sole_other_participants(&others);

        let other_ids: Vec<Uuid> = other_user
            .values()
            .copied()
            .collect::<HashSet<_>>()
            .into_iter()
            .collect();
        let profiles = self.profiles.fetch_many(&other_ids).await?;

        let candidates: Vec<(ChatMembership, Uuid)> = memberships
            .into_iter()
            .filter(|m| own_count.get(&m.chat_id) == Some(&1))
            .filter_map(|m| {
                let other = *other_user.get(&m.chat_id)?;
                profiles.contains_key(&other).then_some((m, other))
            })
            .collect();

        let activity = try_join_all(
            candidates
                .iter()
                .map(|(membership, _)| self.chat_activity(membership.chat_id)),
        )
        .await?;

        let mut conversations: Vec<ConversationSummary> = candidates
            .into_iter()
            .zip(activity)
            .filter_map(|((membership, other), (last_message, unread_count))| {
                Some(ConversationSummary {
                    chat_id: membership.chat_id,
                    other_user: profiles.get(&other)?.clone(),
                    last_message,
                    membership,
                    unread_count,
                })
            })
            .collect();

        conversations.sort_by(|a, b| b.activity_at().cmp(&a.activity_at()));
        Ok(conversations)
    }

    /// Latest message and unread count for one chat.
    async fn chat_activity(&self, chat_id: Uuid) -> Result<(Option<Message>, u64)> {
        let last = self.backend.first::<Message>(
            Query::from(Table::Messages)
                .eq("chat_id", chat_id)
                .order_by("created_at", Direction::Desc),
        );
        let unread = self.backend.count(
            Query::from(Table::Messages)
                .eq("chat_id", chat_id)
                .eq("is_read", false)
                .neq("sender_id", self.session.user_id),
        );
        tokio::try_join!(last, unread)
    }

    /// Re-run [`load`](Self::load) whenever a message changes anywhere, the
    /// user's memberships change, or either feed reports dropped events. Release the handle when the list is hidden.
    pub fn subscribe(&self) -> LiveHandle {
        let mut messages = self.backend.subscribe(ChangeFilter::table(Table::Messages));
        let mut memberships = self.backend.subscribe(
            ChangeFilter::table(Table::ChatMemberships).with_eq("user_id", self.session.user_id),
        );
        let projector = self.clone();

        LiveHandle::spawn(format!("chat list of {}", self.session.user_id), async move {
            loop {
                let event = tokio::select! {
                    event = messages.next() => event,
                    event = memberships.next() => event,
                };
                match event {
                    Some(Delivery::Change(event)) => {
                        debug!("Chat list invalidated by {:?} on {}", event.op, event.table)
                    }
                    Some(Delivery::Missed(n)) => debug!("Chat list missed {} change(s)", n),
                    None => {
                        info!("Change feed closed, chat list no longer live");
                        break;
                    }
                }
                // Failures are already recorded on the view.
                let _ = projector.load().await;
            }
        })
    }

    /// Single-row update; the list refreshes on the next load or change event.
    pub async fn set_pinned(&self, membership_id: Uuid, pinned: bool) -> Result<()> {
        self.update_membership(
            membership_id,
            MembershipPatch {
                is_pinned: Some(pinned),
                ..MembershipPatch::default()
            },
        )
        .await
    }

    pub async fn set_archived(&self, membership_id: Uuid, archived: bool) -> Result<()> {
        self.update_membership(
            membership_id,
            MembershipPatch {
                is_archived: Some(archived),
                ..MembershipPatch::default()
            },
        )
        .await
    }

    pub async fn toggle_pinned(&self, summary: &ConversationSummary) -> Result<()> {
        self.set_pinned(summary.membership.id, !summary.membership.is_pinned).await
    }

    pub async fn toggle_archived(&self, summary: &ConversationSummary) -> Result<()> {
        self.set_archived(summary.membership.id, !summary.membership.is_archived).await
    }

    async fn update_membership(&self, membership_id: Uuid, patch: MembershipPatch) -> Result<()> {
        let query = Query::from(Table::ChatMemberships)
            .eq("id", membership_id)
            .eq("user_id", self.session.user_id);
        match self.backend.update(query, &patch).await {
            Ok(_) => Ok(()),
            Err(e) => {
                error!("Failed to update membership {}: {}", membership_id, e);
                Err(e)
            }
        }
    }
}

/// Chat id to its other participant, for chats with exactly one other member.
pub(crate) fn sole_other_participants(others: &[ChatMembership]) -> HashMap<Uuid, Uuid> {
    let mut members: HashMap<Uuid, Vec<Uuid>> = HashMap::new();
    for membership in others {
        members.entry(membership.chat_id).or_default().push(membership.user_id);
    }
    members
        .into_iter()
        .filter_map(|(chat_id, users)| match users.as_slice() {
            [only] => Some((chat_id, *only)),
            _ => None,
        })
        .collect()
}
