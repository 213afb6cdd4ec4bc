use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum AuthError {
    #[error("user not found")]
    UserNotFound,
    #[error("invalid credentials")]
    InvalidCredentials,
    #[error("username and password are required")]
    MissingFields,
}

impl AuthError {
    pub fn code(&self) -> &'static str {
        match self {
            Self::UserNotFound => "UserNotFound",
            Self::InvalidCredentials => "InvalidCredentials",
            Self::MissingFields => "MissingFields",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum SessionError {
    #[error("session not found")]
    NotFound,
}

impl SessionError {
    pub fn code(&self) -> &'static str {
        match self {
            Self::NotFound => "NotFound",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PersistenceError {
    #[error("write failed: {0}")]
    WriteFailed(String),
    #[error("read failed: {0}")]
    ReadFailed(String),
}

/// Always non-fatal: callers log and move on.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum NotificationError {
    #[error("notification endpoint unreachable: {0}")]
    Unreachable(String),
}

/// Reasons a channel message is refused. Only the originating connection is told.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ChannelError {
    #[error("connection is not registered")]
    NotRegistered,
    #[error("message is empty")]
    EmptyMessage,
    #[error("message exceeds {0} characters")]
    MessageTooLong(usize),
    #[error(transparent)]
    Persistence(#[from] PersistenceError),
}

impl ChannelError {
    pub fn kind(&self) -> ChannelErrorKind {
        match self {
            Self::NotRegistered => ChannelErrorKind::NotRegistered,
            Self::EmptyMessage => ChannelErrorKind::EmptyMessage,
            Self::MessageTooLong(_) => ChannelErrorKind::MessageTooLong,
            Self::Persistence(PersistenceError::WriteFailed(_)) => ChannelErrorKind::WriteFailed,
            Self::Persistence(PersistenceError::ReadFailed(_)) => ChannelErrorKind::HistoryUnavailable,
        }
    }
}

/// Wire form of [`ChannelError`], without internal detail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChannelErrorKind {
    NotRegistered,
    EmptyMessage,
    MessageTooLong,
    WriteFailed,
    HistoryUnavailable,
}
