//! Polls social accounts and RSS/Atom feeds and relays unseen items to a
//! Telegram chat.

pub mod config;
pub mod db;
pub mod hash;
pub mod model;
pub mod poller;
pub mod sink;
pub mod sources;
