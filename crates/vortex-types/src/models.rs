use std::fmt;

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A single backend row as delivered over the gateway: a JSON object keyed by column.
pub type Row = serde_json::Map<String, serde_json::Value>;

/// Tables exposed by the backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Table {
    Profiles,
    Chats,
    ChatMemberships,
    Messages,
    Blocks,
}

impl Table {
    pub const ALL: [Table; 5] = [
        Table::Profiles,
        Table::Chats,
        Table::ChatMemberships,
        Table::Messages,
        Table::Blocks,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Table::Profiles => "profiles",
            Table::Chats => "chats",
            Table::ChatMemberships => "chat_memberships",
            Table::Messages => "messages",
            Table::Blocks => "blocks",
        }
    }
}

impl fmt::Display for Table {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A typed view of one table's rows.
pub trait Record: Serialize + DeserializeOwned + Send + Sync + 'static {
    const TABLE: Table;
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Profile {
    pub id: Uuid,
    pub user_id: Uuid,
    pub username: String,
    pub display_name: Option<String>,
    pub avatar_url: Option<String>,
    pub bio: Option<String>,
    pub status: Option<String>,
    pub is_online: bool,
    pub last_seen: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Profile {
    /// Display name when set, otherwise the username.
    pub fn name(&self) -> &str {
        match self.display_name.as_deref().map(str::trim) {
            Some(name) if !name.is_empty() => name,
            _ => &self.username,
        }
    }

    /// Up to two uppercase initials for avatar placeholders.
    pub fn initials(&self) -> String {
        let initials: String = self
            .name()
            .split_whitespace()
            .filter_map(|word| word.chars().next())
            .flat_map(char::to_uppercase)
            .take(2)
            .collect();

        if initials.is_empty() { "?".to_string() } else { initials }
    }
}

impl Record for Profile {
    const TABLE: Table = Table::Profiles;
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chat {
    pub id: Uuid,
    pub created_by: Uuid,
    pub created_at: DateTime<Utc>,
}

impl Record for Chat {
    const TABLE: Table = Table::Chats;
}

/// Join row between a user and a chat. The backend keeps (chat_id, user_id) unique.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMembership {
    pub id: Uuid,
    pub chat_id: Uuid,
    pub user_id: Uuid,
    pub is_pinned: bool,
    pub is_archived: bool,
    pub joined_at: DateTime<Utc>,
}

impl Record for ChatMembership {
    const TABLE: Table = Table::ChatMemberships;
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: Uuid,
    pub chat_id: Uuid,
    pub sender_id: Uuid,
    pub content: String,
    pub reply_to: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub is_delivered: bool,
    pub is_read: bool,
    pub is_pinned: bool,
    pub reaction: Option<String>,
}

/// Display state of a message as seen by its sender. Only ever moves forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum DeliveryState {
    Sent,
    Delivered,
    Read,
}

impl Message {
    pub fn delivery_state(&self) -> DeliveryState {
        if self.is_read {
            DeliveryState::Read
        } else if self.is_delivered {
            DeliveryState::Delivered
        } else {
            DeliveryState::Sent
        }
    }

    pub fn is_edited(&self) -> bool {
        self.updated_at > self.created_at
    }
}

impl Record for Message {
    const TABLE: Table = Table::Messages;
}

/// Presence of a row is the whole signal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Block {
    pub id: Uuid,
    pub blocker_id: Uuid,
    pub blocked_id: Uuid,
    pub created_at: DateTime<Utc>,
}

impl Record for Block {
    const TABLE: Table = Table::Blocks;
}

// -- Derived, never written back --

/// One entry of the chat list.
#[derive(Debug, Clone, PartialEq)]
pub struct ConversationSummary {
    pub chat_id: Uuid,
    pub other_user: Profile,
    pub last_message: Option<Message>,
    pub membership: ChatMembership,
    pub unread_count: u64,
}

impl ConversationSummary {
    /// Ordering key of the chat list: last activity, or when the user joined.
    pub fn activity_at(&self) -> DateTime<Utc> {
        self.last_message
            .as_ref()
            .map(|m| m.created_at)
            .unwrap_or(self.membership.joined_at)
    }
}

/// A message enriched with its sender's profile, when one could be resolved.
#[derive(Debug, Clone, PartialEq)]
pub struct MessageView {
    pub message: Message,
    pub sender_profile: Option<Profile>,
}

impl MessageView {
    pub fn id(&self) -> Uuid {
        self.message.id
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn profile(username: &str, display_name: Option<&str>) -> Profile {
        let now = Utc::now();
        Profile {
            id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
            username: username.to_string(),
            display_name: display_name.map(str::to_string),
            avatar_url: None,
            bio: None,
            status: None,
            is_online: false,
            last_seen: None,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn test_profile_name_falls_back_to_username() {
        assert_eq!(profile("neo", None).name(), "neo");
        assert_eq!(profile("neo", Some("  ")).name(), "neo");
        assert_eq!(profile("neo", Some("Thomas Anderson")).name(), "Thomas Anderson");
    }

    #[test]
    fn test_profile_initials() {
        assert_eq!(profile("neo", Some("thomas a anderson")).initials(), "TA");
        assert_eq!(profile("neo", None).initials(), "N");
    }

    #[test]
    fn test_delivery_state_is_ordered() {
        assert!(DeliveryState::Sent < DeliveryState::Delivered);
        assert!(DeliveryState::Delivered < DeliveryState::Read);
    }

    #[test]
    fn test_message_decodes_from_row_json() {
        let json = serde_json::json!({
            "id": "00000000-0000-0000-0000-000000000001",
            "chat_id": "00000000-0000-0000-0000-000000000002",
            "sender_id": "00000000-0000-0000-0000-000000000003",
            "content": "hi",
            "reply_to": null,
            "created_at": "2024-05-01T10:00:00.000000Z",
            "updated_at": "2024-05-01T10:00:00.000000Z",
            "is_delivered": true,
            "is_read": false,
            "is_pinned": false,
            "reaction": null
        });
        let message: Message = serde_json::from_value(json).unwrap();
        assert_eq!(message.content, "hi");
        assert_eq!(message.delivery_state(), DeliveryState::Delivered);
        assert!(!message.is_edited());
    }
}
