//! Preset discovery and selection

use crate::config::{HostLayout, RESTART_DIR_NAME};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::VecDeque;
use std::fs;
use std::path::{Path, PathBuf};

/// Strategy for choosing a preset when none was requested
pub trait PresetPicker: Send {
    /// Pick one of `presets`, which is sorted and non-empty
    fn pick(&mut self, presets: &[String]) -> Option<String>;
}

/// Uniform random choice
pub struct RandomPicker {
    rng: StdRng,
}

impl RandomPicker {
    pub fn new() -> Self {
        Self {
            rng: StdRng::from_os_rng(),
        }
    }

    /// Deterministic picker, same seed gives the same sequence
    pub fn seeded(seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
        }
    }
}

impl Default for RandomPicker {
    fn default() -> Self {
        Self::new()
    }
}

impl PresetPicker for RandomPicker {
    fn pick(&mut self, presets: &[String]) -> Option<String> {
        if presets.is_empty() {
            return None;
        }
        let index = self.rng.random_range(0..presets.len());
        Some(presets[index].clone())
    }
}

/// Returns names from a script, falling back to the first preset
#[derive(Debug, Default)]
pub struct ScriptedPicker {
    script: VecDeque<String>,
}

impl ScriptedPicker {
    pub fn new<I, S>(script: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            script: script.into_iter().map(Into::into).collect(),
        }
    }
}

impl PresetPicker for ScriptedPicker {
    fn pick(&mut self, presets: &[String]) -> Option<String> {
        while let Some(next) = self.script.pop_front() {
            if presets.contains(&next) {
                return Some(next);
            }
        }
        presets.first().cloned()
    }
}

/// View over the presets root
#[derive(Debug, Clone)]
pub struct PresetRegistry {
    presets_dir: PathBuf,
}

impl PresetRegistry {
    pub fn new(layout: &HostLayout) -> Self {
        Self {
            presets_dir: layout.presets_dir(),
        }
    }

    pub fn presets_dir(&self) -> &Path {
        &self.presets_dir
    }

    /// Names of all preset directories, sorted
    pub fn list(&self) -> std::io::Result<Vec<String>> {
        let mut presets = Vec::new();
        for entry in fs::read_dir(&self.presets_dir)? {
            let entry = entry?;
            if !entry.file_type()?.is_dir() {
                continue;
            }
            match entry.file_name().into_string() {
                Ok(name) => presets.push(name),
                Err(name) => log::warn!("Ignoring preset with non UTF-8 name: {:?}", name),
            }
        }
        presets.sort();
        Ok(presets)
    }

    /// Whether `name` is a plain directory name of an existing preset
    pub fn exists(&self, name: &str) -> bool {
        is_valid_preset_name(name) && self.presets_dir.join(name).is_dir()
    }

    /// Pick a preset with `picker`; `None` when the presets root is empty or missing
    pub fn pick(&self, picker: &mut dyn PresetPicker) -> Option<String> {
        match self.list() {
            Ok(presets) if !presets.is_empty() => picker.pick(&presets),
            Ok(_) => None,
            Err(e) => {
                log::warn!(
                    "Cannot list presets in {}: {}",
                    self.presets_dir.display(),
                    e
                );
                None
            }
        }
    }

    /// Create each preset's restart inbox and return `(preset, inbox)` pairs
    pub fn ensure_inboxes(&self) -> std::io::Result<Vec<(String, PathBuf)>> {
        let mut inboxes = Vec::new();
        for name in self.list()? {
            let inbox = self.presets_dir.join(&name).join(RESTART_DIR_NAME);
            fs::create_dir_all(&inbox)?;
            inboxes.push((name, inbox));
        }
        Ok(inboxes)
    }
}

/// A preset name must be a single path component
pub fn is_valid_preset_name(name: &str) -> bool {
    !name.is_empty()
        && name != "."
        && name != ".."
        && !name.contains(['/', '\\'])
        && !name.contains('\0')
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry_with(presets: &[&str]) -> (tempfile::TempDir, PresetRegistry) {
        let dir = tempfile::tempdir().unwrap();
        let layout = HostLayout::new(dir.path());
        for name in presets {
            fs::create_dir_all(layout.preset_dir(name)).unwrap();
        }
        fs::write(layout.presets_dir().join("notes.txt"), "not a preset").ok();
        (dir, PresetRegistry::new(&layout))
    }

    #[test]
    fn test_list_only_directories_sorted() {
        let (_dir, registry) = registry_with(&["C", "A", "B"]);

        assert_eq!(registry.list().unwrap(), vec!["A", "B", "C"]);
    }

    #[test]
    fn test_pick_from_members() {
        let (_dir, registry) = registry_with(&["A", "B", "C"]);
        let mut picker = RandomPicker::new();

        for _ in 0..20 {
            let picked = registry.pick(&mut picker).unwrap();
            assert!(["A", "B", "C"].contains(&picked.as_str()));
        }
    }

    #[test]
    fn test_seeded_pick_is_deterministic() {
        let (_dir, registry) = registry_with(&["A", "B", "C"]);

        let first = registry.pick(&mut RandomPicker::seeded(7));
        for _ in 0..10 {
            assert_eq!(registry.pick(&mut RandomPicker::seeded(7)), first);
        }
    }

    #[test]
    fn test_pick_empty_or_missing() {
        let (_dir, registry) = registry_with(&[]);
        assert_eq!(registry.pick(&mut RandomPicker::new()), None);

        let missing = PresetRegistry::new(&HostLayout::new("/nonexistent/preset_host"));
        assert_eq!(missing.pick(&mut RandomPicker::new()), None);
    }

    #[test]
    fn test_scripted_picker_skips_unknown() {
        let mut picker = ScriptedPicker::new(["gone", "B"]);
        let presets = vec!["A".to_string(), "B".to_string()];

        assert_eq!(picker.pick(&presets), Some("B".into()));
        assert_eq!(picker.pick(&presets), Some("A".into()));
    }

    #[test]
    fn test_exists_rejects_paths() {
        let (_dir, registry) = registry_with(&["race"]);

        assert!(registry.exists("race"));
        assert!(!registry.exists("qualifying"));
        assert!(!registry.exists("../race"));
        assert!(!registry.exists(".."));
        assert!(!registry.exists(""));
    }

    #[test]
    fn test_ensure_inboxes() {
        let (_dir, registry) = registry_with(&["A", "B"]);

        let inboxes = registry.ensure_inboxes().unwrap();

        assert_eq!(inboxes.len(), 2);
        for (_, inbox) in inboxes {
            assert!(inbox.is_dir());
            assert!(inbox.ends_with(RESTART_DIR_NAME));
        }
    }
}
