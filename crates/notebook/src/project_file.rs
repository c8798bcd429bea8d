//! Project file detection for kernel selection, with "closest wins"
//! semantics.
//!
//! A single walk-up from the document's directory checks every known project
//! file at each level, so a nearby `deno.json` beats a distant
//! `pyproject.toml`.

use std::path::{Path, PathBuf};

/// The type of project file detected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProjectFileKind {
    PyprojectToml,
    DenoJson,
    JuliaProject,
}

impl ProjectFileKind {
    /// Kernel language the project implies.
    pub fn language(self) -> &'static str {
        match self {
            ProjectFileKind::PyprojectToml => "python",
            ProjectFileKind::DenoJson => "typescript",
            ProjectFileKind::JuliaProject => "julia",
        }
    }
}

/// A detected project file with its path and kind.
#[derive(Debug, Clone)]
pub struct DetectedProjectFile {
    pub path: PathBuf,
    pub kind: ProjectFileKind,
}

/// Filenames in tiebreaker order within one directory.
const CANDIDATES: &[(&str, ProjectFileKind)] = &[
    ("pyproject.toml", ProjectFileKind::PyprojectToml),
    ("deno.json", ProjectFileKind::DenoJson),
    ("deno.jsonc", ProjectFileKind::DenoJson),
    ("Project.toml", ProjectFileKind::JuliaProject),
];

/// Walk up from `start_path` and return the closest project file.
///
/// Stops at the home directory or a `.git` boundary.
pub fn find_nearest_project_file(start_path: &Path) -> Option<DetectedProjectFile> {
    find_nearest_project_file_within(start_path, dirs::home_dir().as_deref())
}

fn find_nearest_project_file_within(
    start_path: &Path,
    home_dir: Option<&Path>,
) -> Option<DetectedProjectFile> {
    let start_dir = if start_path.is_file() {
        start_path.parent()?
    } else {
        start_path
    };

    let mut current = start_dir.to_path_buf();
    loop {
        for (filename, kind) in CANDIDATES {
            let candidate = current.join(filename);
            if candidate.exists() {
                return Some(DetectedProjectFile {
                    path: candidate,
                    kind: *kind,
                });
            }
        }

        if home_dir == Some(current.as_path()) || current.join(".git").exists() {
            return None;
        }

        match current.parent() {
            Some(parent) if parent != current => current = parent.to_path_buf(),
            _ => return None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn write_file(dir: &Path, name: &str, content: &str) {
        std::fs::write(dir.join(name), content).unwrap();
    }

    #[test]
    fn test_closest_wins() {
        let temp = TempDir::new().unwrap();
        let project = temp.path().join("project");
        let scripts = project.join("scripts");
        std::fs::create_dir_all(&scripts).unwrap();

        write_file(&project, "pyproject.toml", "[project]\nname = \"test\"");
        write_file(&scripts, "deno.json", "{}");

        let found = find_nearest_project_file_within(&scripts, None).unwrap();
        assert_eq!(found.kind, ProjectFileKind::DenoJson);
        assert_eq!(found.path, scripts.join("deno.json"));
        assert_eq!(found.kind.language(), "typescript");
    }

    #[test]
    fn test_starts_from_file_parent() {
        let temp = TempDir::new().unwrap();
        write_file(temp.path(), "Project.toml", "name = \"Demo\"");
        write_file(temp.path(), "analysis.jl", "1 + 1");

        let found =
            find_nearest_project_file_within(&temp.path().join("analysis.jl"), None).unwrap();
        assert_eq!(found.kind, ProjectFileKind::JuliaProject);
    }

    #[test]
    fn test_tiebreaker_same_dir() {
        let temp = TempDir::new().unwrap();
        write_file(temp.path(), "deno.json", "{}");
        write_file(temp.path(), "pyproject.toml", "[project]");

        let found = find_nearest_project_file_within(temp.path(), None).unwrap();
        assert_eq!(found.kind, ProjectFileKind::PyprojectToml);
    }

    #[test]
    fn test_stops_at_git_root() {
        let temp = TempDir::new().unwrap();
        let repo = temp.path().join("repo");
        let src = repo.join("src");
        std::fs::create_dir_all(&src).unwrap();
        std::fs::create_dir_all(repo.join(".git")).unwrap();
        write_file(temp.path(), "pyproject.toml", "[project]");

        assert!(find_nearest_project_file_within(&src, None).is_none());
    }

    #[test]
    fn test_stops_at_home() {
        let temp = TempDir::new().unwrap();
        let home = temp.path().join("home");
        let notes = home.join("notes");
        std::fs::create_dir_all(&notes).unwrap();
        write_file(temp.path(), "pyproject.toml", "[project]");

        assert!(find_nearest_project_file_within(&notes, Some(&home)).is_none());
    }
}
