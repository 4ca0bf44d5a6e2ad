use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use tokio::sync::watch;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use vortex_gateway::{BackendGateway, Delivery};
use vortex_types::api::{MessagePatch, NewMessage};
use vortex_types::{
    ChangeEvent, ChangeFilter, ChangeOp, ChatMembership, Direction, Message, MessageView, Profile,
    Query, Table, validation,
};

use crate::backend::Backend;
use crate::error::{ClientError, Result};
use crate::profiles::ProfileDirectory;
use crate::runtime::LiveHandle;
use crate::session::Session;

/// Snapshot published to the conversation screen.
#[derive(Debug, Clone, Default)]
pub struct MessageThread {
    pub chat_id: Uuid,
    /// Oldest first, in arrival order for messages received live.
    pub messages: Vec<MessageView>,
    pub loading: bool,
    pub loaded: bool,
    pub last_error: Option<String>,
    window: LoadWindow,
}

/// Live changes seen while a history load is in flight.
#[derive(Debug, Clone, Default)]
struct LoadWindow {
    loads: usize,
    inserted: HashSet<Uuid>,
    updated: HashMap<Uuid, Message>,
    deleted: HashSet<Uuid>,
}

impl MessageThread {
    fn new(chat_id: Uuid) -> Self {
        Self {
            chat_id,
            ..Self::default()
        }
    }

    pub fn get(&self, message_id: Uuid) -> Option<&MessageView> {
        self.messages.iter().find(|v| v.id() == message_id)
    }

    pub fn contains(&self, message_id: Uuid) -> bool {
        self.get(message_id).is_some()
    }

    pub fn ids(&self) -> Vec<Uuid> {
        self.messages.iter().map(MessageView::id).collect()
    }

    pub fn pinned(&self) -> Vec<&MessageView> {
        self.messages.iter().filter(|v| v.message.is_pinned).collect()
    }

    fn merge_history(&mut self, history: Vec<MessageView>) {
        self.window.loads = self.window.loads.saturating_sub(1);

        let fetched: HashSet<Uuid> = history.iter().map(MessageView::id).collect();
        let mut live_order = Vec::new();
        let mut held: HashMap<Uuid, MessageView> = HashMap::new();
        for view in std::mem::take(&mut self.messages) {
            let id = view.id();
            if !fetched.contains(&id) && self.window.inserted.contains(&id) {
                live_order.push(id);
            }
            held.insert(id, view);
        }

        let mut merged = Vec::with_capacity(history.len() + live_order.len());
        for mut view in history {
            let id = view.id();
            if self.window.deleted.contains(&id) {
                continue;
            }
            if let Some(existing) = held.remove(&id) {
                apply_update(&mut view.message, existing.message);
                if view.sender_profile.is_none() {
                    view.sender_profile = existing.sender_profile;
                }
            }
            if let Some(update) = self.window.updated.get(&id) {
                apply_update(&mut view.message, update.clone());
            }
            merged.push(view);
        }
        for id in live_order {
            if let Some(view) = held.remove(&id) {
                merged.push(view);
            }
        }

        self.messages = merged;
        if self.window.loads == 0 {
            self.window = LoadWindow::default();
        }
        self.loading = self.window.loads > 0;
        self.loaded = true;
        self.last_error = None;
    }

    fn abandon_load(&mut self, reason: String) {
        self.window.loads = self.window.loads.saturating_sub(1);
        if self.window.loads == 0 {
            self.window = LoadWindow::default();
        }
        self.loading = self.window.loads > 0;
        self.last_error = Some(reason);
    }
}

/// Take `incoming` if it is at least as fresh as `current`.
/// Read and delivered flags never go back to false.
fn apply_update(current: &mut Message, incoming: Message) {
    let is_read = current.is_read || incoming.is_read;
    let is_delivered = current.is_delivered || incoming.is_delivered;
    if incoming.updated_at >= current.updated_at {
        *current = incoming;
    }
    current.is_read = is_read;
    current.is_delivered = is_delivered;
}

/// Holds one conversation's messages and folds the live change feed into them.
///
/// Loads and live events may interleave freely: inserts are merged by id,
/// deletes seen during a load are remembered so the fetched history cannot
/// bring them back, and the fresher `updated_at` wins when both sides carry a row.
pub struct MessageStreamReconciler<G> {
    backend: Backend<G>,
    session: Session,
    profiles: ProfileDirectory<G>,
    chat_id: Uuid,
    tx: Arc<watch::Sender<MessageThread>>,
}

impl<G> Clone for MessageStreamReconciler<G> {
    fn clone(&self) -> Self {
        Self {
            backend: self.backend.clone(),
            session: self.session.clone(),
            profiles: self.profiles.clone(),
            chat_id: self.chat_id,
            tx: self.tx.clone(),
        }
    }
}

impl<G: BackendGateway> MessageStreamReconciler<G> {
    pub fn new(backend: Backend<G>, session: Session, profiles: ProfileDirectory<G>, chat_id: Uuid) -> Self {
        let (tx, _) = watch::channel(MessageThread::new(chat_id));
        Self {
            backend,
            session,
            profiles,
            chat_id,
            tx: Arc::new(tx),
        }
    }

    pub fn chat_id(&self) -> Uuid {
        self.chat_id
    }

    pub fn watch(&self) -> watch::Receiver<MessageThread> {
        self.tx.subscribe()
    }

    pub fn snapshot(&self) -> MessageThread {
        self.tx.borrow().clone()
    }

    pub fn pinned(&self) -> Vec<MessageView> {
        self.tx.borrow().pinned().into_iter().cloned().collect()
    }

    /// Fetch the full history, attach sender profiles and mark other people's
    /// unread messages as read. On failure the held messages are left untouched.
    pub async fn load(&self) -> Result<()> {
        self.tx.send_modify(|thread| {
            thread.loading = true;
            thread.window.loads += 1;
        });

        match self.fetch_history().await {
            Ok(history) => {
                let count = history.len();
                self.tx.send_modify(|thread| thread.merge_history(history));
                debug!("Loaded {} message(s) for chat {}", count, self.chat_id);
                Ok(())
            }
            Err(e) => {
                warn!("Messages for chat {} unavailable: {}", self.chat_id, e);
                let reason = e.to_string();
                self.tx.send_modify(|thread| thread.abandon_load(reason));
                Err(e)
            }
        }
    }

    async fn fetch_history(&self) -> Result<Vec<MessageView>> {
        let mut messages = self
            .backend
            .select::<Message>(
                Query::from(Table::Messages)
                    .eq("chat_id", self.chat_id)
                    .order_by("created_at", Direction::Asc),
            )
            .await?;

        let sender_ids: Vec<Uuid> = messages
            .iter()
            .map(|m| m.sender_id)
            .collect::<HashSet<_>>()
            .into_iter()
            .collect();
        let profiles = match self.profiles.fetch_many(&sender_ids).await {
            Ok(profiles) => profiles,
            Err(e) => {
                warn!("Sender profiles for chat {} unavailable: {}", self.chat_id, e);
                HashMap::new()
            }
        };

        let unread: Vec<Uuid> = messages
            .iter()
            .filter(|m| m.sender_id != self.session.user_id && !m.is_read)
            .map(|m| m.id)
            .collect();
        if !unread.is_empty() {
            let query = Query::from(Table::Messages)
                .eq("chat_id", self.chat_id)
                .neq("sender_id", self.session.user_id)
                .eq("is_read", false);
            match self.backend.update(query, &MessagePatch::read()).await {
                Ok(marked) => {
                    debug!("Marked {} message(s) read in chat {}", marked, self.chat_id);
                    for message in messages.iter_mut().filter(|m| unread.contains(&m.id)) {
                        message.is_read = true;
                    }
                }
                Err(e) => warn!("Could not mark chat {} read: {}", self.chat_id, e),
            }
        }

        Ok(messages
            .into_iter()
            .map(|message| MessageView {
                sender_profile: profiles.get(&message.sender_id).cloned(),
                message,
            })
            .collect())
    }

    /// Append a newly inserted message unless it is already held.
    /// Returns whether it was appended.
    pub async fn on_insert(&self, message: Message) -> bool {
        let id = message.id;
        let sender_id = message.sender_id;
        let sender_profile = self.profiles.cached(sender_id).await;
        let has_profile = sender_profile.is_some();

        let appended = self.tx.send_if_modified(|thread| {
            if thread.contains(id) || thread.window.deleted.contains(&id) {
                return false;
            }
            if thread.window.loads > 0 {
                thread.window.inserted.insert(id);
            }
            thread.messages.push(MessageView { message, sender_profile });
            true
        });
        if !appended {
            debug!("Ignoring duplicate insert of message {}", id);
            return false;
        }

        if sender_id != self.session.user_id {
            self.acknowledge_read(id).await;
        }
        if !has_profile {
            self.attach_profile(sender_id).await;
        }
        true
    }

    /// Merge an updated row into the held message with the same id.
    /// Unknown ids are ignored. Returns whether the held list changed.
    pub fn on_update(&self, message: Message) -> bool {
        let id = message.id;
        self.tx.send_if_modified(|thread| {
            if thread.window.loads > 0 && !thread.window.deleted.contains(&id) {
                match thread.window.updated.get_mut(&id) {
                    Some(seen) => apply_update(seen, message.clone()),
                    None => {
                        thread.window.updated.insert(id, message.clone());
                    }
                }
            }
            match thread.messages.iter_mut().find(|v| v.id() == id) {
                Some(view) => {
                    apply_update(&mut view.message, message);
                    true
                }
                None => false,
            }
        })
    }

    /// Remove the message with this id. Unknown ids are ignored.
    pub fn on_delete(&self, message_id: Uuid) -> bool {
        self.tx.send_if_modified(|thread| {
            if thread.window.loads > 0 {
                thread.window.deleted.insert(message_id);
                thread.window.inserted.remove(&message_id);
                thread.window.updated.remove(&message_id);
            }
            let before = thread.messages.len();
            thread.messages.retain(|v| v.id() != message_id);
            thread.messages.len() != before
        })
    }

    pub async fn handle_event(&self, event: ChangeEvent) {
        match event.op {
            ChangeOp::Insert => match event.decode::<Message>() {
                Ok(message) => {
                    self.on_insert(message).await;
                }
                Err(e) => warn!("Undecodable message insert: {}", e),
            },
            ChangeOp::Update => match event.decode::<Message>() {
                Ok(message) => {
                    self.on_update(message);
                }
                Err(e) => warn!("Undecodable message update: {}", e),
            },
            ChangeOp::Delete => match event.row_id() {
                Some(id) => {
                    self.on_delete(id);
                }
                None => warn!("Message delete without an id"),
            },
        }
    }

    /// Follow this chat's message feed. The subscription is registered before
    /// this returns, so a [`load`](Self::load) started afterwards misses nothing.
    /// If the feed drops events the history is reloaded and merged.
    pub fn subscribe(&self) -> LiveHandle {
        let mut subscription = self
            .backend
            .subscribe(ChangeFilter::table(Table::Messages).with_eq("chat_id", self.chat_id));
        let reconciler = self.clone();

        LiveHandle::spawn(format!("chat {}", self.chat_id), async move {
            while let Some(delivery) = subscription.next().await {
                match delivery {
                    Delivery::Change(event) => reconciler.handle_event(event).await,
                    Delivery::Missed(n) => {
                        warn!("Chat {} missed {} change(s), reloading", reconciler.chat_id, n);
                        // Failures are recorded on the thread snapshot.
                        let _ = reconciler.load().await;
                    }
                }
            }
            info!("Change feed closed for chat {}", reconciler.chat_id);
        })
    }

    async fn acknowledge_read(&self, message_id: Uuid) {
        let query = Query::from(Table::Messages).eq("id", message_id);
        if let Err(e) = self.backend.update(query, &MessagePatch::read()).await {
            warn!("Read receipt for message {} failed: {}", message_id, e);
        }
    }

    async fn attach_profile(&self, sender_id: Uuid) {
        match self.profiles.get(sender_id).await {
            Ok(Some(profile)) => {
                self.tx.send_if_modified(|thread| {
                    let mut changed = false;
                    for view in thread.messages.iter_mut() {
                        if view.message.sender_id == sender_id && view.sender_profile.is_none() {
                            view.sender_profile = Some(profile.clone());
                            changed = true;
                        }
                    }
                    changed
                });
            }
            Ok(None) => debug!("No profile for sender {}", sender_id),
            Err(e) => warn!("Profile for sender {} unavailable: {}", sender_id, e),
        }
    }

    // -- Writes. Visible changes arrive through the change feed. --

    /// Rejects blank content before any request is made.
    pub async fn send(&self, content: &str) -> Result<Message> {
        self.insert_message(content, None).await
    }

    pub async fn send_reply(&self, content: &str, reply_to: Uuid) -> Result<Message> {
        self.insert_message(content, Some(reply_to)).await
    }

    async fn insert_message(&self, content: &str, reply_to: Option<Uuid>) -> Result<Message> {
        let content = validation::message_content(content)?;
        let row = NewMessage {
            chat_id: self.chat_id,
            sender_id: self.session.user_id,
            content,
            reply_to,
        };
        self.backend
            .insert::<Message>(&row)
            .await
            .inspect_err(|e| error!("Failed to send message to chat {}: {}", self.chat_id, e))
    }

    pub async fn edit(&self, message_id: Uuid, content: &str) -> Result<()> {
        let content = validation::message_content(content)?;
        self.write(
            message_id,
            MessagePatch {
                content: Some(content),
                ..MessagePatch::default()
            },
        )
        .await
    }

    pub async fn delete(&self, message_id: Uuid) -> Result<()> {
        let removed = self
            .backend
            .delete(Query::from(Table::Messages).eq("id", message_id))
            .await
            .inspect_err(|e| error!("Failed to delete message {}: {}", message_id, e))?;
        if removed == 0 {
            return Err(ClientError::NotFound);
        }
        Ok(())
    }

    /// One reaction per message; a new one replaces the old.
    pub async fn set_reaction(&self, message_id: Uuid, emoji: &str) -> Result<()> {
        self.write(
            message_id,
            MessagePatch {
                reaction: Some(emoji.to_string()),
                ..MessagePatch::default()
            },
        )
        .await
    }

    pub async fn set_pinned(&self, message_id: Uuid, pinned: bool) -> Result<()> {
        self.write(
            message_id,
            MessagePatch {
                is_pinned: Some(pinned),
                ..MessagePatch::default()
            },
        )
        .await
    }

    pub async fn toggle_pinned(&self, message_id: Uuid) -> Result<()> {
        let pinned = self
            .tx
            .borrow()
            .get(message_id)
            .map(|v| v.message.is_pinned)
            .ok_or(ClientError::NotFound)?;
        self.set_pinned(message_id, !pinned).await
    }

    async fn write(&self, message_id: Uuid, patch: MessagePatch) -> Result<()> {
        let changed = self
            .backend
            .update(Query::from(Table::Messages).eq("id", message_id), &patch)
            .await
            .inspect_err(|e| error!("Failed to update message {}: {}", message_id, e))?;
        if changed == 0 {
            return Err(ClientError::NotFound);
        }
        Ok(())
    }

    /// The other member of this chat, when there is exactly one.
    pub async fn other_participant(&self) -> Result<Option<Profile>> {
        let others = self
            .backend
            .select::<ChatMembership>(
                Query::from(Table::ChatMemberships)
                    .eq("chat_id", self.chat_id)
                    .neq("user_id", self.session.user_id),
            )
            .await?;
        match others.as_slice() {
            [other] => self.profiles.get(other.user_id).await,
            _ => Ok(None),
        }
    }
}

/// The conversation currently on screen. Opening another one releases the
/// previous subscription first.
pub struct ConversationSlot<G> {
    backend: Backend<G>,
    session: Session,
    profiles: ProfileDirectory<G>,
    current: Option<(MessageStreamReconciler<G>, LiveHandle)>,
}

impl<G: BackendGateway> ConversationSlot<G> {
    pub fn new(backend: Backend<G>, session: Session, profiles: ProfileDirectory<G>) -> Self {
        Self {
            backend,
            session,
            profiles,
            current: None,
        }
    }

    /// Switch to `chat_id`: close the old feed, subscribe to the new one, then load it.
    /// A failed load still leaves the conversation open and live.
    pub async fn open(&mut self, chat_id: Uuid) -> MessageStreamReconciler<G> {
        self.close().await;

        let reconciler = MessageStreamReconciler::new(
            self.backend.clone(),
            self.session.clone(),
            self.profiles.clone(),
            chat_id,
        );
        let live = reconciler.subscribe();
        self.current = Some((reconciler.clone(), live));

        // Failures are recorded on the thread snapshot.
        let _ = reconciler.load().await;
        reconciler
    }

    pub fn current(&self) -> Option<&MessageStreamReconciler<G>> {
        self.current.as_ref().map(|(reconciler, _)| reconciler)
    }

    pub async fn close(&mut self) {
        if let Some((reconciler, live)) = self.current.take() {
            live.close().await;
            debug!("Closed chat {}", reconciler.chat_id());
        }
    }
}
