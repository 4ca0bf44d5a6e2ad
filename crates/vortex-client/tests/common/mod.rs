#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde_json::Value;
use tokio::sync::watch;
use uuid::Uuid;

use vortex_client::{
    Backend, ChatListProjector, MessageStreamReconciler, ProfileDirectory, Session,
};
use vortex_gateway::{BackendGateway, GatewayError, GatewayExt, LocalBackend, Subscription};
use vortex_types::api::{NewChat, NewMembership, NewMessage, NewProfile, to_row};
use vortex_types::{ChangeFilter, ChatMembership, Message, Profile, Query, Row, Table};

pub const TIMEOUT: Duration = Duration::from_secs(5);

pub fn at(ts: &str) -> DateTime<Utc> {
    ts.parse().unwrap()
}

/// An in-memory backend plus helpers that write straight to it.
pub struct World {
    pub gateway: Arc<LocalBackend>,
    pub backend: Backend<LocalBackend>,
}

pub fn world() -> World {
    let gateway = Arc::new(LocalBackend::open_in_memory("test-secret").unwrap());
    let backend = Backend::new(gateway.clone(), TIMEOUT);
    World { gateway, backend }
}

impl World {
    /// A user with a profile but no account; enough for the view-models.
    pub async fn user(&self, username: &str) -> Session {
        let user_id = Uuid::new_v4();
        self.profile(user_id, username, None).await;
        Session {
            user_id,
            email: format!("{}@vortex.test", username),
            access_token: String::new(),
        }
    }

    pub async fn profile(&self, user_id: Uuid, username: &str, display_name: Option<&str>) -> Profile {
        let row = to_row(&NewProfile {
            user_id,
            username: username.to_string(),
            display_name: display_name.map(str::to_string),
        })
        .unwrap();
        self.gateway.insert_as::<Profile>(vec![row]).await.unwrap().remove(0)
    }

    pub fn profiles(&self, session: &Session) -> ProfileDirectory<LocalBackend> {
        ProfileDirectory::new(self.backend.clone(), session.clone())
    }

    pub fn projector(&self, session: &Session) -> ChatListProjector<LocalBackend> {
        ChatListProjector::new(self.backend.clone(), session.clone(), self.profiles(session))
    }

    pub fn reconciler(&self, session: &Session, chat_id: Uuid) -> MessageStreamReconciler<LocalBackend> {
        MessageStreamReconciler::new(self.backend.clone(), session.clone(), self.profiles(session), chat_id)
    }

    pub async fn chat(&self, members: &[Uuid]) -> Uuid {
        self.chat_joined(members, None).await
    }

    /// A chat with one membership per member, optionally all joined at `joined_at`.
    pub async fn chat_joined(&self, members: &[Uuid], joined_at: Option<DateTime<Utc>>) -> Uuid {
        let chat = to_row(&NewChat {
            created_by: members.first().copied().unwrap_or_else(Uuid::new_v4),
        })
        .unwrap();
        let chat_id = self
            .gateway
            .insert_as::<vortex_types::Chat>(vec![chat])
            .await
            .unwrap()
            .remove(0)
            .id;

        let rows = members
            .iter()
            .map(|&user_id| {
                let mut row = to_row(&NewMembership { chat_id, user_id }).unwrap();
                if let Some(joined_at) = joined_at {
                    row.insert("joined_at".into(), Value::String(joined_at.to_rfc3339()));
                }
                row
            })
            .collect();
        self.gateway.insert_as::<ChatMembership>(rows).await.unwrap();
        chat_id
    }

    /// A gateway that shares this world's data but can be told to fail.
    pub fn flaky(&self) -> (Arc<Flaky>, Backend<Flaky>) {
        let flaky = Arc::new(Flaky {
            inner: self.gateway.clone(),
            fail_counts: AtomicBool::new(false),
            fail_selects: Mutex::new(None),
        });
        let backend = Backend::new(flaky.clone(), TIMEOUT);
        (flaky, backend)
    }

    pub async fn post(&self, chat_id: Uuid, sender_id: Uuid, content: &str) -> Message {
        self.post_at(chat_id, sender_id, content, None, false).await
    }

    pub async fn post_at(
        &self,
        chat_id: Uuid,
        sender_id: Uuid,
        content: &str,
        created_at: Option<DateTime<Utc>>,
        is_read: bool,
    ) -> Message {
        let mut row = to_row(&NewMessage {
            chat_id,
            sender_id,
            content: content.to_string(),
            reply_to: None,
        })
        .unwrap();
        if let Some(created_at) = created_at {
            let ts = Value::String(created_at.to_rfc3339());
            row.insert("created_at".into(), ts.clone());
            row.insert("updated_at".into(), ts);
        }
        if is_read {
            row.insert("is_read".into(), Value::Bool(true));
        }
        self.gateway.insert_as::<Message>(vec![row]).await.unwrap().remove(0)
    }

    pub async fn message(&self, id: Uuid) -> Option<Message> {
        self.gateway
            .first_as::<Message>(Query::from(Table::Messages).eq("id", id))
            .await
            .unwrap()
    }

    pub async fn message_count(&self, chat_id: Uuid) -> u64 {
        self.gateway
            .count(Query::from(Table::Messages).eq("chat_id", chat_id))
            .await
            .unwrap()
    }

    pub fn subscribers(&self) -> usize {
        self.gateway.dispatcher().subscriber_count()
    }
}

pub fn message_row(chat_id: Uuid, sender_id: Uuid, content: &str) -> Row {
    to_row(&NewMessage {
        chat_id,
        sender_id,
        content: content.to_string(),
        reply_to: None,
    })
    .unwrap()
}

/// Passes everything through to the in-memory backend unless a failure is armed.
pub struct Flaky {
    inner: Arc<LocalBackend>,
    fail_counts: AtomicBool,
    fail_selects: Mutex<Option<Table>>,
}

impl Flaky {
    pub fn fail_counts(&self, fail: bool) {
        self.fail_counts.store(fail, Ordering::SeqCst);
    }

    /// Fail every select on `table`, or none with `None`.
    pub fn fail_selects(&self, table: Option<Table>) {
        *self.fail_selects.lock().unwrap() = table;
    }

    fn unavailable() -> GatewayError {
        GatewayError::Storage("backend unavailable".into())
    }
}

impl BackendGateway for Flaky {
    async fn select(&self, query: Query) -> Result<Vec<Row>, GatewayError> {
        let failing = *self.fail_selects.lock().unwrap();
        if failing == Some(query.table) {
            return Err(Self::unavailable());
        }
        self.inner.select(query).await
    }

    async fn count(&self, query: Query) -> Result<u64, GatewayError> {
        if self.fail_counts.load(Ordering::SeqCst) {
            return Err(Self::unavailable());
        }
        self.inner.count(query).await
    }

    async fn insert(&self, table: Table, rows: Vec<Row>) -> Result<Vec<Row>, GatewayError> {
        self.inner.insert(table, rows).await
    }

    async fn update(&self, query: Query, patch: Row) -> Result<u64, GatewayError> {
        self.inner.update(query, patch).await
    }

    async fn delete(&self, query: Query) -> Result<u64, GatewayError> {
        self.inner.delete(query).await
    }

    fn subscribe(&self, filter: ChangeFilter) -> Subscription {
        self.inner.subscribe(filter)
    }
}

/// Wait until the watched value satisfies `pred`, failing the test after [`TIMEOUT`].
pub async fn until<T: Clone>(rx: &mut watch::Receiver<T>, pred: impl FnMut(&T) -> bool) -> T {
    tokio::time::timeout(TIMEOUT, rx.wait_for(pred))
        .await
        .expect("condition not reached in time")
        .expect("view dropped")
        .clone()
}
