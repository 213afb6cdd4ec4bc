pub mod auth;
pub mod bot;
pub mod credentials;
pub mod error;
pub mod middleware;
pub mod notify;
pub mod sessions;
