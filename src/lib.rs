//! Native application host.
//!
//! Runs an application's main script in an embedded QuickJS engine and gives
//! it native windows with a web renderer, tray icons, dialogs and a small
//! set of shell, path, filesystem and process helpers. All native work is
//! serialized onto one UI thread through [`dispatcher::Dispatcher`].

pub mod app;
pub mod bridge;
pub mod config;
pub mod dialog;
pub mod dispatcher;
pub mod error;
pub mod events;
pub mod fetch;
pub mod fs_ops;
pub mod logging;
pub mod options;
pub mod paths;
pub mod platform;
pub mod process;
pub mod renderer;
pub mod rpc;
pub mod runtime;
pub mod script;
pub mod shell;
pub mod ui_cell;
pub mod window;
pub mod window_manager;

pub use error::{HostError, HostResult};
