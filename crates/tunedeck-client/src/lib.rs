//! Client core for a media library: session, catalog synchronisation,
//! playback slot, favorites and the admin upload flow, driven by a single
//! event loop.

pub mod backend;
pub mod catalog;
pub mod core;
pub mod error;
pub mod favorites;
pub mod http;
pub mod mpv;
pub mod playback;
pub mod session;
pub mod shell;
pub mod upload;

#[cfg(test)]
mod testing;
