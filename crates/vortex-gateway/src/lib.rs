pub mod auth;
pub mod backend;
pub mod dispatcher;
pub mod error;
pub mod local;
pub mod objects;

pub use backend::{AuthBackend, BackendGateway, GatewayExt, ObjectStorage};
pub use dispatcher::{Delivery, Dispatcher, Subscription};
pub use error::GatewayError;
pub use local::LocalBackend;
pub use objects::ObjectStore;
