//! Prompt templates.
//!
//! Every prompt sent to the LLM and the injection payload itself are
//! rendered from plain-text templates with `{{placeholder}}` markers.
//! Built-in defaults are compiled into the binary; a file of the same name
//! under the template directory overrides the default. Templates are the
//! tuning surface — behavior changes without code changes.

use std::collections::HashMap;
use std::fs;
use std::path::PathBuf;
use std::sync::Mutex;

/// The template slots tacit knows about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TemplateKind {
    /// Transcript reflection: propose, evaluate, merge.
    Reflection,
    /// Injection payload wrapper shown to the assistant.
    Playbook,
    /// Tag and temperature inference from a prompt.
    Tagger,
    /// One-time per-session working guidance.
    TaskGuidance,
    /// Legacy text to when/do up-conversion.
    Migration,
}

impl TemplateKind {
    /// File name of the override for this template.
    #[must_use]
    pub const fn file_name(self) -> &'static str {
        match self {
            Self::Reflection => "reflection.txt",
            Self::Playbook => "playbook.txt",
            Self::Tagger => "tagger.txt",
            Self::TaskGuidance => "task_guidance.txt",
            Self::Migration => "migration.txt",
        }
    }

    /// The built-in default text.
    #[must_use]
    pub const fn default_text(self) -> &'static str {
        match self {
            Self::Reflection => include_str!("defaults/reflection.txt"),
            Self::Playbook => include_str!("defaults/playbook.txt"),
            Self::Tagger => include_str!("defaults/tagger.txt"),
            Self::TaskGuidance => include_str!("defaults/task_guidance.txt"),
            Self::Migration => include_str!("defaults/migration.txt"),
        }
    }

    /// All template kinds, for installers.
    #[must_use]
    pub const fn all() -> [Self; 5] {
        [
            Self::Reflection,
            Self::Playbook,
            Self::Tagger,
            Self::TaskGuidance,
            Self::Migration,
        ]
    }
}

/// Loads templates with per-process caching and directory overrides.
#[derive(Debug)]
pub struct TemplateStore {
    dir: Option<PathBuf>,
    cache: Mutex<HashMap<TemplateKind, String>>,
}

impl TemplateStore {
    /// Creates a store backed only by the built-in defaults.
    #[must_use]
    pub fn builtin() -> Self {
        Self {
            dir: None,
            cache: Mutex::new(HashMap::new()),
        }
    }

    /// Creates a store that prefers files under `dir`.
    #[must_use]
    pub fn with_dir(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: Some(dir.into()),
            cache: Mutex::new(HashMap::new()),
        }
    }

    /// Returns the template text, consulting the override directory once
    /// and caching the result for the life of the process.
    #[must_use]
    pub fn get(&self, kind: TemplateKind) -> String {
        if let Ok(mut cache) = self.cache.lock() {
            if let Some(text) = cache.get(&kind) {
                return text.clone();
            }
            let text = self.read_uncached(kind);
            cache.insert(kind, text.clone());
            return text;
        }
        self.read_uncached(kind)
    }

    fn read_uncached(&self, kind: TemplateKind) -> String {
        if let Some(dir) = &self.dir {
            let path = dir.join(kind.file_name());
            if let Ok(text) = fs::read_to_string(&path) {
                tracing::debug!(template = kind.file_name(), "loaded template override");
                return text;
            }
        }
        kind.default_text().to_string()
    }
}

/// Substitutes `{{name}}` placeholders in a template.
///
/// Unknown placeholders are left in place so that a typo in an override
/// file is visible rather than silently blanked.
#[must_use]
pub fn render(template: &str, vars: &[(&str, &str)]) -> String {
    let mut out = template.to_string();
    for (name, value) in vars {
        out = out.replace(&format!("{{{{{name}}}}}"), value);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::TempDir;

    #[test]
    fn test_render_substitutes_placeholders() {
        let out = render("Hello {{name}}, tags: {{tags}}", &[("name", "world"), ("tags", "a,b")]);
        assert_eq!(out, "Hello world, tags: a,b");
    }

    #[test]
    fn test_render_leaves_unknown_placeholders() {
        let out = render("{{known}} and {{unknown}}", &[("known", "yes")]);
        assert_eq!(out, "yes and {{unknown}}");
    }

    #[test]
    fn test_builtin_defaults_have_placeholders() {
        assert!(TemplateKind::Tagger.default_text().contains("{{prompt}}"));
        assert!(TemplateKind::Reflection.default_text().contains("{{trajectories}}"));
        assert!(TemplateKind::Playbook.default_text().contains("{{key_points}}"));
        assert!(TemplateKind::Migration.default_text().contains("{{text}}"));
    }

    #[test]
    fn test_override_directory_wins() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(TemplateKind::Tagger.file_name());
        let mut file = std::fs::File::create(&path).unwrap();
        write!(file, "custom tagger {{{{prompt}}}}").unwrap();

        let store = TemplateStore::with_dir(dir.path());
        assert_eq!(store.get(TemplateKind::Tagger), "custom tagger {{prompt}}");
        // Non-overridden templates fall back to the default.
        assert_eq!(
            store.get(TemplateKind::Migration),
            TemplateKind::Migration.default_text()
        );
    }

    #[test]
    fn test_cache_is_stable_after_first_read() {
        let dir = TempDir::new().unwrap();
        let store = TemplateStore::with_dir(dir.path());
        let first = store.get(TemplateKind::Playbook);

        // Writing an override after the first read has no effect this process.
        std::fs::write(dir.path().join(TemplateKind::Playbook.file_name()), "late").unwrap();
        assert_eq!(store.get(TemplateKind::Playbook), first);
    }
}
