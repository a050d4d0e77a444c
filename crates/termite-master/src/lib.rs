//! # termite-master
//!
//! The master side of a build session: the authoritative attribute
//! store over the local source tree, the filesystem service answering
//! workers on their reverse channels, and the shell-command heuristics
//! used to pre-warm worker caches.

mod attr_store;
mod server;
pub mod shell;

pub use attr_store::{AttrStore, INLINE_CONTENT_MAX};
pub use server::FsServer;
