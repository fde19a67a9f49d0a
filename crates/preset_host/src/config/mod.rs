//! Directory layout and placeholder value sources

mod source;

pub use source::*;

use std::path::{Path, PathBuf};

/// Name of every trigger inbox directory
pub const RESTART_DIR_NAME: &str = "restart";

/// Extension that marks a file as a restart trigger
pub const TRIGGER_EXTENSION: &str = "asrestart";

/// Sentinel written once at startup to confirm the watch is alive
pub const INIT_TRIGGER_NAME: &str = "init.asrestart";

/// Placeholder values consumed by template expansion
pub const TEMPLATE_CONFIG_FILE: &str = "template_cfg.json";

/// Directory layout rooted at the host's base directory
///
/// ```text
/// <base>/cfg/restart/              shared trigger inbox
/// <base>/presets/<name>/restart/   per-preset trigger inbox
/// <base>/templates/                template tree + template_cfg.json
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostLayout {
    base: PathBuf,
}

impl HostLayout {
    pub fn new(base: impl Into<PathBuf>) -> Self {
        Self { base: base.into() }
    }

    pub fn base(&self) -> &Path {
        &self.base
    }

    pub fn presets_dir(&self) -> PathBuf {
        self.base.join("presets")
    }

    pub fn templates_dir(&self) -> PathBuf {
        self.base.join("templates")
    }

    pub fn template_config(&self) -> PathBuf {
        self.templates_dir().join(TEMPLATE_CONFIG_FILE)
    }

    /// Inbox shared by all presets
    pub fn shared_inbox(&self) -> PathBuf {
        self.base.join("cfg").join(RESTART_DIR_NAME)
    }

    pub fn preset_dir(&self, name: &str) -> PathBuf {
        self.presets_dir().join(name)
    }

    /// Inbox owned by a single preset
    pub fn preset_inbox(&self, name: &str) -> PathBuf {
        self.preset_dir(name).join(RESTART_DIR_NAME)
    }
}
