pub mod api;
pub mod events;
pub mod models;
pub mod query;
pub mod validation;

pub use events::{ChangeEvent, ChangeFilter, ChangeOp};
pub use models::{
    Block, Chat, ChatMembership, ConversationSummary, DeliveryState, Message, MessageView, Profile,
    Record, Row, Table,
};
pub use query::{Direction, Filter, Order, Query};
