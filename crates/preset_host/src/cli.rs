//! Command-line interface for preset_host

use argh::FromArgs;
use std::path::PathBuf;

/// Run a dedicated server and restart it with another preset on demand
#[derive(FromArgs, Debug)]
pub struct HostArgs {
    /// preset to start with (default: random)
    #[argh(option, short = 'p')]
    pub preset: Option<String>,

    /// run inside the docker image: server in /app, plugins from working directory
    #[argh(switch)]
    pub docker: bool,

    /// shorthand for --log-level debug
    #[argh(switch)]
    pub debug: bool,

    /// log level (error, warn, info, debug, trace)
    #[argh(option, short = 'l', default = "String::from(\"info\")")]
    pub log_level: String,

    /// expand templates into presets before starting
    #[argh(switch)]
    pub templates: bool,

    /// resolve placeholders missing from template_cfg.json via environment variables
    #[argh(switch)]
    pub use_env_vars: bool,

    /// delete the old presets folder instead of archiving it
    #[argh(switch)]
    pub delete_old_presets: bool,

    /// base directory holding presets, templates and cfg (default: current directory)
    #[argh(option, short = 'b')]
    pub base_dir: Option<PathBuf>,

    /// server executable, skips discovery
    #[argh(option)]
    pub executable: Option<PathBuf>,

    /// expand templates and exit
    #[argh(switch)]
    pub expand_only: bool,

    /// seed for deterministic preset selection
    #[argh(option)]
    pub seed: Option<u64>,
}

impl HostArgs {
    /// Effective log filter
    pub fn log_filter(&self) -> &'static str {
        if self.debug {
            return "debug";
        }
        match self.log_level.to_lowercase().as_str() {
            "error" => "error",
            "warn" => "warn",
            "debug" => "debug",
            "trace" => "trace",
            _ => "info",
        }
    }

    /// Whether templates are expanded before (or instead of) running
    pub fn expands_templates(&self) -> bool {
        self.templates || self.expand_only
    }

    /// Requested preset, empty values ignored
    pub fn preset(&self) -> Option<String> {
        self.preset
            .as_deref()
            .map(str::trim)
            .filter(|p| !p.is_empty())
            .map(str::to_string)
    }
}
