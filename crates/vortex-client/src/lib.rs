pub mod appearance;
pub mod auth;
pub mod backend;
pub mod blocks;
pub mod chat_list;
pub mod client;
pub mod config;
pub mod error;
pub mod messages;
pub mod profiles;
pub mod runtime;
pub mod session;
pub mod start_chat;

pub use appearance::{AppearanceConfig, StyleSheet, StyleTarget};
pub use auth::AuthService;
pub use backend::Backend;
pub use blocks::{BlockList, BlockedUser};
pub use chat_list::{ChatFilter, ChatListProjector, ChatListView};
pub use client::Client;
pub use config::ClientConfig;
pub use error::{ClientError, Result};
pub use messages::{ConversationSlot, MessageStreamReconciler, MessageThread};
pub use profiles::ProfileDirectory;
pub use runtime::LiveHandle;
pub use session::Session;
pub use start_chat::ChatStarter;
