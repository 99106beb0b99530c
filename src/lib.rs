//! Nudge: a community roster bot that periodically invites one consenting
//! member per server.
//!
//! # Architecture
//!
//! - **Roster**: [`roster::PermissionStore`] (SQLite) holds members,
//!   communities, memberships and admin grants;
//!   [`roster::RosterSynchronizer`] folds platform state into it.
//! - **Authorization**: [`auth::CommandAuthorizer`] gates privileged
//!   commands from persisted admin grants.
//! - **Commands**: [`handler::EventHandler`] reconciles each event, then runs
//!   the command from the [`commands`] table.
//! - **Scheduler**: [`scheduler::NotificationScheduler`] fires randomized
//!   cycles, one recipient per enabled community.
//! - **Platform**: [`gateway`] receives Discord events, [`dispatch`] sends
//!   messages; [`runtime::BotRuntime`] wires them together.

pub mod app_dirs;
pub mod auth;
pub mod commands;
pub mod config;
pub mod context;
pub mod dispatch;
pub mod error;
pub mod gateway;
pub mod handler;
pub mod logging;
pub mod roster;
pub mod runtime;
pub mod scheduler;

pub use auth::{Authorization, CommandAuthorizer};
pub use config::BotConfig;
pub use context::BotContext;
pub use dispatch::{DeliveryOutcome, MessageDispatcher};
pub use error::{BotError, ReconciliationError, Result, StoreError};
pub use handler::{EventHandler, HandleOutcome, InboundEvent};
pub use roster::{PermissionStore, RosterSynchronizer};
pub use runtime::BotRuntime;
pub use scheduler::{NotificationScheduler, SchedulerHandle, SchedulerPhase};
