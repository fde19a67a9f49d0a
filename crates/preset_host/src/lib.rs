//! Preset-driven restart host for a dedicated game server
//!
//! # Overview
//!
//! The host runs one server instance with a chosen preset and restarts it
//! whenever a trigger file shows up:
//! - Presets are directories under `<base>/presets/`
//! - Dropping `<anything>.asrestart` into `<base>/cfg/restart/` or
//!   `<base>/presets/<name>/restart/` restarts the server; the file body names
//!   the preset to switch to
//! - Optionally, `<base>/templates/` is expanded into `<base>/presets/` first,
//!   with `[$key]` placeholders filled from `template_cfg.json`
//!
//! # Example Template Config
//!
//! ```json
//! {
//!   "port": 9600,
//!   "server_name": "Sunday league"
//! }
//! ```

pub mod cli;
pub mod config;
pub mod error;
pub mod runtime;
pub mod shutdown;
pub mod template;

pub use cli::HostArgs;
pub use config::{ConfigError, ConfigMapping, ConfigSource, HostLayout, ValueSource};
pub use error::HostError;
pub use runtime::{
    HostConfig, Inbox, PresetPicker, PresetRegistry, ProcessError, RandomPicker, ScriptedPicker,
    ServerProcess, StdioRelay, StopPolicy, Supervisor, SupervisorError, Trigger, TriggerWatcher,
    WatchConfig, WatchError, WatchEvent, WatchState,
};
pub use shutdown::setup_shutdown;
pub use template::{ExpansionOptions, ExpansionReport, TemplateError, TemplateExpander};
