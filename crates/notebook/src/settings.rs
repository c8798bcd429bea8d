//! Settings persistence for inline execution.
//!
//! Settings are stored in a JSON file in the user's config directory:
//! - macOS: ~/Library/Application Support/runt-notebook/inline-settings.json
//! - Linux: ~/.config/runt-notebook/inline-settings.json
//! - Windows: C:\Users\<User>\AppData\Roaming\runt-notebook\inline-settings.json

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Result;
use chunk_text::ChunkType;
use serde::{Deserialize, Deserializer, Serialize};

/// Pin documents under `directory` to the kernel named `kernel`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KernelHint {
    pub directory: PathBuf,
    pub kernel: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Settings {
    /// Render `text/html` outputs. When off, HTML falls through to the next
    /// representation in the bundle.
    #[serde(default = "default_true")]
    pub render_html: bool,

    /// Chunk type used when a command does not name one
    #[serde(default)]
    pub default_chunk_type: ChunkType,

    /// Quiet period before a burst of edits counts as settled
    #[serde(default = "default_change_debounce_ms")]
    pub change_debounce_ms: u64,

    #[serde(default, deserialize_with = "deserialize_kernel_hints")]
    pub kernel_hints: Vec<KernelHint>,
}

fn default_true() -> bool {
    true
}

fn default_change_debounce_ms() -> u64 {
    300
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            render_html: true,
            default_chunk_type: ChunkType::Paragraph,
            change_debounce_ms: default_change_debounce_ms(),
            kernel_hints: vec![],
        }
    }
}

impl Settings {
    pub fn change_debounce(&self) -> Duration {
        Duration::from_millis(self.change_debounce_ms)
    }

    /// The kernel pinned for `path`, longest matching directory first.
    pub fn kernel_hint_for(&self, path: &Path) -> Option<&str> {
        self.kernel_hints
            .iter()
            .filter(|hint| path.starts_with(&hint.directory))
            .max_by_key(|hint| hint.directory.components().count())
            .map(|hint| hint.kernel.as_str())
    }
}

/// Deserialize kernel hints that accept both:
/// - A string: `"~/work/data=python3, ~/work/web=deno"`
/// - A JSON array: `[{"directory": "~/work/data", "kernel": "python3"}]`
fn deserialize_kernel_hints<'de, D>(deserializer: D) -> std::result::Result<Vec<KernelHint>, D::Error>
where
    D: Deserializer<'de>,
{
    use serde::de;

    struct KernelHintsVisitor;

    impl<'de> de::Visitor<'de> for KernelHintsVisitor {
        type Value = Vec<KernelHint>;

        fn expecting(&self, formatter: &mut std::fmt::Formatter) -> std::fmt::Result {
            formatter.write_str("a `dir=kernel` list string or an array of hints")
        }

        fn visit_str<E: de::Error>(self, v: &str) -> std::result::Result<Vec<KernelHint>, E> {
            v.split(',')
                .map(str::trim)
                .filter(|entry| !entry.is_empty())
                .map(|entry| {
                    let (directory, kernel) = entry
                        .split_once('=')
                        .ok_or_else(|| E::custom(format!("kernel hint without `=`: {}", entry)))?;
                    Ok(KernelHint {
                        directory: expand_home(directory.trim()),
                        kernel: kernel.trim().to_string(),
                    })
                })
                .collect()
        }

        fn visit_seq<A: de::SeqAccess<'de>>(
            self,
            mut seq: A,
        ) -> std::result::Result<Vec<KernelHint>, A::Error> {
            let mut hints = Vec::new();
            while let Some(hint) = seq.next_element::<KernelHint>()? {
                hints.push(KernelHint {
                    directory: expand_home(&hint.directory.to_string_lossy()),
                    kernel: hint.kernel.trim().to_string(),
                });
            }
            Ok(hints)
        }
    }

    deserializer.deserialize_any(KernelHintsVisitor)
}

fn expand_home(directory: &str) -> PathBuf {
    match directory.strip_prefix("~/") {
        Some(rest) => dirs::home_dir()
            .map(|home| home.join(rest))
            .unwrap_or_else(|| PathBuf::from(directory)),
        None => PathBuf::from(directory),
    }
}

/// Get the path to the settings file
pub fn settings_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("runt-notebook")
        .join("inline-settings.json")
}

/// Load settings from disk, returning defaults if file doesn't exist
pub fn load_settings() -> Settings {
    load_settings_from(&settings_path())
}

pub fn load_settings_from(path: &Path) -> Settings {
    if path.exists() {
        std::fs::read_to_string(path)
            .ok()
            .and_then(|s| serde_json::from_str(&s).ok())
            .unwrap_or_default()
    } else {
        Settings::default()
    }
}

/// Save settings to disk
pub fn save_settings(settings: &Settings) -> Result<()> {
    save_settings_to(&settings_path(), settings)
}

pub fn save_settings_to(path: &Path, settings: &Settings) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, serde_json::to_string_pretty(settings)?)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_default_settings() {
        let settings = Settings::default();
        assert!(settings.render_html);
        assert_eq!(settings.default_chunk_type, ChunkType::Paragraph);
        assert_eq!(settings.change_debounce(), Duration::from_millis(300));
        assert!(settings.kernel_hints.is_empty());
    }

    #[test]
    fn test_missing_fields_use_defaults() {
        let parsed: Settings = serde_json::from_str(r#"{"default_chunk_type": "cell"}"#).unwrap();
        assert_eq!(parsed.default_chunk_type, ChunkType::Cell);
        assert!(parsed.render_html);
        assert_eq!(parsed.change_debounce_ms, 300);
    }

    #[test]
    fn test_kernel_hints_string_format() {
        let json = r#"{"kernel_hints": "/work/data=python3, /work/web = deno"}"#;
        let parsed: Settings = serde_json::from_str(json).unwrap();
        assert_eq!(
            parsed.kernel_hints,
            vec![
                KernelHint {
                    directory: PathBuf::from("/work/data"),
                    kernel: "python3".into()
                },
                KernelHint {
                    directory: PathBuf::from("/work/web"),
                    kernel: "deno".into()
                },
            ]
        );
    }

    #[test]
    fn test_kernel_hints_array_format() {
        let json = r#"{"kernel_hints": [{"directory": "/work", "kernel": "julia-1.10"}]}"#;
        let parsed: Settings = serde_json::from_str(json).unwrap();
        assert_eq!(parsed.kernel_hints.len(), 1);
        assert_eq!(parsed.kernel_hints[0].kernel, "julia-1.10");
    }

    #[test]
    fn test_kernel_hint_string_requires_separator() {
        let json = r#"{"kernel_hints": "/work/data"}"#;
        assert!(serde_json::from_str::<Settings>(json).is_err());
    }

    #[test]
    fn test_longest_prefix_wins() {
        let settings = Settings {
            kernel_hints: vec![
                KernelHint {
                    directory: PathBuf::from("/work"),
                    kernel: "python3".into(),
                },
                KernelHint {
                    directory: PathBuf::from("/work/web"),
                    kernel: "deno".into(),
                },
            ],
            ..Settings::default()
        };
        assert_eq!(settings.kernel_hint_for(Path::new("/work/web/app.ts")), Some("deno"));
        assert_eq!(settings.kernel_hint_for(Path::new("/work/etl.py")), Some("python3"));
        assert_eq!(settings.kernel_hint_for(Path::new("/elsewhere/x.py")), None);
    }

    #[test]
    fn test_save_and_load_round_trip() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("nested").join("inline-settings.json");
        let settings = Settings {
            render_html: false,
            default_chunk_type: ChunkType::Cell,
            ..Settings::default()
        };
        save_settings_to(&path, &settings).unwrap();
        assert_eq!(load_settings_from(&path), settings);
    }

    #[test]
    fn test_unreadable_file_gives_defaults() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("inline-settings.json");
        std::fs::write(&path, "{ not json").unwrap();
        assert_eq!(load_settings_from(&path), Settings::default());
        assert_eq!(
            load_settings_from(&temp.path().join("missing.json")),
            Settings::default()
        );
    }

    #[test]
    fn test_settings_path_is_valid() {
        assert!(settings_path().ends_with("runt-notebook/inline-settings.json"));
    }
}
