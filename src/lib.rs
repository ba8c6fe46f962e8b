//! DETool Library
//!
//! Local helper behind http://DETool.APP: serves the tag-settings UI,
//! persists the shared settings document, and manages the HTTP listener
//! from a system tray icon.
//!
//! Architecture:
//! - `lifecycle` owns the listener thread (start / shutdown / restart)
//! - `server` holds the routes the listener serves
//! - `tray` maps the tray menu to lifecycle actions; `tray_icon` is the
//!   Windows tray itself

pub mod config;
pub mod lifecycle;
pub mod server;
pub mod settings;
pub mod tray;
#[cfg(windows)]
pub mod tray_icon;
