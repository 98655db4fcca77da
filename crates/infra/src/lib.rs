//! Infrastructure layer: event store, reactions, command pipeline, config.

pub mod command_dispatcher;
pub mod config;
pub mod event_store;
pub mod reactions;
