//! Expands the template tree into the presets tree

use crate::config::{
    ConfigError, ConfigMapping, ConfigSource, HostLayout, ValueSource, TEMPLATE_CONFIG_FILE,
};
use crate::template::rewriter::{PlaceholderRewriter, UnresolvedPlaceholder};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;
use walkdir::WalkDir;

/// Timestamp suffix appended to archived preset directories
const ARCHIVE_TIMESTAMP_FORMAT: &str = "%Y%m%d-%H%M%S";

#[derive(Debug, Error)]
pub enum TemplateError {
    #[error("No template folder found at {}", .0.display())]
    NoTemplateFound(PathBuf),

    #[error("template_cfg.json not found at {}", .0.display())]
    NoConfigFound(PathBuf),

    #[error("Failed to load template_cfg.json: {0}")]
    Config(#[from] ConfigError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, TemplateError>;

/// Expansion policy
#[derive(Debug, Clone, Copy, Default)]
pub struct ExpansionOptions {
    /// Fall back to environment variables for keys missing from the config
    pub use_env_fallback: bool,
    /// Delete the previous presets tree instead of archiving it
    pub delete_old_presets: bool,
}

/// What an expansion run produced
#[derive(Debug, Default)]
pub struct ExpansionReport {
    /// Where the previous presets tree was moved to
    pub archived_to: Option<PathBuf>,
    pub directories: usize,
    pub files: usize,
    pub symlinks: usize,
    /// Files copied unchanged because they are not UTF-8 text
    pub raw_files: usize,
    /// Entries that could not be mirrored
    pub failed: usize,
    pub unresolved: Vec<(PathBuf, UnresolvedPlaceholder)>,
}

/// Mirrors a template tree into a fresh presets tree, substituting placeholders
#[derive(Debug, Clone)]
pub struct TemplateExpander {
    template_root: PathBuf,
    presets_root: PathBuf,
    options: ExpansionOptions,
}

impl TemplateExpander {
    pub fn new(layout: &HostLayout, options: ExpansionOptions) -> Self {
        Self::with_dirs(layout.templates_dir(), layout.presets_dir(), options)
    }

    pub fn with_dirs(
        template_root: impl Into<PathBuf>,
        presets_root: impl Into<PathBuf>,
        options: ExpansionOptions,
    ) -> Self {
        Self {
            template_root: template_root.into(),
            presets_root: presets_root.into(),
            options,
        }
    }

    /// Run the full expansion: retire old presets, load config, mirror the tree
    pub fn expand(&self) -> Result<ExpansionReport> {
        let archived_to = self.retire_old_presets();

        if !self.template_root.is_dir() {
            fs::create_dir_all(&self.template_root)?;
            return Err(TemplateError::NoTemplateFound(self.template_root.clone()));
        }

        let cfg_path = self.template_root.join(TEMPLATE_CONFIG_FILE);
        if !cfg_path.is_file() {
            return Err(TemplateError::NoConfigFound(cfg_path));
        }
        let mapping = ConfigMapping::from_file(&cfg_path)?;
        log::debug!("Loaded {} config variables from {}", mapping.len(), cfg_path.display());

        let source = ConfigSource::new(mapping, self.options.use_env_fallback);
        let mut report = self.expand_with(&source)?;
        report.archived_to = archived_to;
        Ok(report)
    }

    /// Mirror the template tree using an already-built value source
    pub fn expand_with<S: ValueSource + ?Sized>(&self, source: &S) -> Result<ExpansionReport> {
        log::info!(
            "Starting to copy '{}' into '{}'...",
            self.template_root.display(),
            self.presets_root.display()
        );

        fs::create_dir_all(&self.presets_root)?;
        let rewriter = PlaceholderRewriter::new(source);
        let mut report = ExpansionReport::default();

        for entry in WalkDir::new(&self.template_root)
            .follow_links(false)
            .sort_by_file_name()
        {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    log::warn!("Skipping unreadable template entry: {}", e);
                    report.failed += 1;
                    continue;
                }
            };

            // Root itself, and the config file that drives the expansion
            if entry.depth() == 0
                || (entry.depth() == 1 && entry.file_name() == TEMPLATE_CONFIG_FILE)
            {
                continue;
            }

            let Ok(rel_path) = entry.path().strip_prefix(&self.template_root) else {
                continue;
            };
            let dest_path = self.presets_root.join(rel_path);
            let file_type = entry.file_type();

            let outcome = if file_type.is_dir() {
                fs::create_dir_all(&dest_path).map(|_| report.directories += 1)
            } else if file_type.is_symlink() {
                copy_symlink(entry.path(), &dest_path).map(|_| report.symlinks += 1)
            } else {
                rewriter
                    .rewrite_file(entry.path(), &dest_path)
                    .map(|file_report| {
                        report.files += 1;
                        if file_report.copied_raw {
                            log::debug!("Copied non-text file unchanged: {}", rel_path.display());
                            report.raw_files += 1;
                        }
                        for placeholder in file_report.unresolved {
                            log::warn!(
                                "Unresolved placeholder '[${}]' in {}:{} ({})",
                                placeholder.key,
                                rel_path.display(),
                                placeholder.line,
                                placeholder.reason
                            );
                            report.unresolved.push((rel_path.to_path_buf(), placeholder));
                        }
                    })
            };

            if let Err(e) = outcome {
                log::warn!("Failed to mirror {}: {}", rel_path.display(), e);
                report.failed += 1;
            }
        }

        log::info!(
            "Generating presets with templates finished: {} directories, {} files, {} unresolved placeholders",
            report.directories,
            report.files,
            report.unresolved.len()
        );
        Ok(report)
    }

    /// Delete or archive an existing presets tree; failures are logged only
    fn retire_old_presets(&self) -> Option<PathBuf> {
        if !self.presets_root.exists() {
            return None;
        }

        if self.options.delete_old_presets {
            match fs::remove_dir_all(&self.presets_root) {
                Ok(()) => log::info!("Deleted old presets folder"),
                Err(e) => log::error!("Unable to delete old presets folder: {}", e),
            }
            return None;
        }

        let archive = self.archive_path();
        match fs::rename(&self.presets_root, &archive) {
            Ok(()) => {
                log::info!("Archived old presets folder to {}", archive.display());
                Some(archive)
            }
            Err(e) => {
                log::error!("Unable to move old presets folder: {}", e);
                None
            }
        }
    }

    /// `<presets><yyyyMMdd-HHmmss>`, with `-N` appended if that name is taken
    fn archive_path(&self) -> PathBuf {
        let stamp = chrono::Local::now().format(ARCHIVE_TIMESTAMP_FORMAT).to_string();
        let mut base = self.presets_root.clone().into_os_string();
        base.push(&stamp);

        let first = PathBuf::from(&base);
        if !first.exists() {
            return first;
        }

        (1..)
            .map(|n| {
                let mut name = base.clone();
                name.push(format!("-{}", n));
                PathBuf::from(name)
            })
            .find(|candidate| !candidate.exists())
            .unwrap_or(first)
    }
}

/// Recreate a symlink without following it
#[cfg(unix)]
fn copy_symlink(src: &Path, dst: &Path) -> std::io::Result<()> {
    let target = fs::read_link(src)?;
    std::os::unix::fs::symlink(target, dst)
}

#[cfg(not(unix))]
fn copy_symlink(src: &Path, _dst: &Path) -> std::io::Result<()> {
    Err(std::io::Error::new(
        std::io::ErrorKind::Unsupported,
        format!("symlinks are not mirrored on this platform: {}", src.display()),
    ))
}
