//! Chat front end: an IRC connection that relays announcements and runs `!commands`.

pub mod commands;
pub mod connection;
