//! `mailfold-events`: events, histories and their consumers.
//!
//! Pure building blocks shared by the domain modules and the infrastructure:
//! - [`Event`]: an immutable fact positioned in an aggregate's history
//! - [`History`]: the strictly contiguous, immutable event sequence of one aggregate
//! - [`execute`] / [`rehydrate`]: deterministic command execution and replay
//! - [`Reactor`]: downstream consumers driven by committed events

pub mod command;
pub mod event;
pub mod handler;
pub mod history;
pub mod reactor;

pub use command::Command;
pub use event::{DomainEvent, Event, number_events};
pub use handler::{execute, rehydrate};
pub use history::{History, HistoryError};
pub use reactor::Reactor;
