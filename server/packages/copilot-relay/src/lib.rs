//! Chat front-end for the copilot CLI agent.
//!
//! Inbound chat events go through the [`dispatcher`], which keeps per-user
//! [`conversation`] state, leases sessions from the [`session`] registry and
//! runs the agent through [`agent`]. Output is streamed to the user by the
//! [`reporter`] and shaped by the [`formatter`]. The chat platform itself is
//! behind the [`surface::ChatSurface`] trait.

pub mod agent;
pub mod cli;
pub mod config;
pub mod console;
pub mod conversation;
pub mod dispatcher;
pub mod files;
pub mod formatter;
pub mod menus;
pub mod models;
pub mod reporter;
pub mod session;
pub mod surface;
