pub mod connection;
pub mod hub;
pub mod log;
pub mod notify;

pub use hub::{AuthenticatedConnection, BroadcastHub, HubConfig};
pub use log::{MessageLog, SqliteMessageLog};
pub use notify::NotificationSink;
