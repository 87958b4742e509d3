//! Core library for the reqmgr requirement tracker.
//!
//! Front ends authenticate a caller into an [`Identity`], then drive the
//! requirement lifecycle through the [`Engine`]; the [`DispatchScheduler`]
//! promotes scheduled tickets in the background over the same
//! [`Database`].

pub mod auth;
pub mod db;
pub mod engine;
pub mod error;
pub mod models;
pub mod scheduler;

// Re-export commonly used types
pub use auth::{authenticate, register_user, NewUser, PasswordScheme, PlainText};
pub use db::Database;
pub use engine::Engine;
pub use error::{Error, Result};
pub use models::{
    Identity, NewRequirement, Priority, Requirement, Role, Status, Ticket, User,
};
pub use scheduler::{DispatchNotice, DispatchScheduler, SchedulerConfig};
