//! `#include` resolution.

use std::path::PathBuf;

use hashbrown::HashMap;

/// A loaded source text and the name it is reported under.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceFile {
    pub name: String,
    pub text: String,
}

/// Resolves the name given in `#include "name"` to source text.
pub trait SourceLoader {
    /// Returns `None` when no library provides `name`.
    fn load(&mut self, name: &str) -> Option<SourceFile>;
}

/// Searches an ordered list of directories for `<name>.nss`; the first
/// directory containing the file wins.
#[derive(Debug, Clone, Default)]
pub struct DirectoryLoader {
    dirs: Vec<PathBuf>,
}

impl DirectoryLoader {
    pub fn new(dirs: Vec<PathBuf>) -> Self {
        Self { dirs }
    }
}

impl SourceLoader for DirectoryLoader {
    fn load(&mut self, name: &str) -> Option<SourceFile> {
        let file_name = if name.to_ascii_lowercase().ends_with(".nss") {
            name.to_string()
        } else {
            format!("{}.nss", name)
        };
        for dir in &self.dirs {
            let path = dir.join(&file_name);
            match std::fs::read(&path) {
                Ok(bytes) => {
                    tracing::debug!(path = %path.display(), "Resolved include");
                    return Some(SourceFile {
                        name: path.display().to_string(),
                        text: decode_source(&bytes),
                    });
                }
                Err(err) => {
                    tracing::trace!(path = %path.display(), %err, "Include candidate skipped");
                }
            }
        }
        None
    }
}

/// Include libraries held in memory, keyed by include name.
#[derive(Debug, Clone, Default)]
pub struct MemoryLoader {
    files: HashMap<String, String>,
}

impl MemoryLoader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, name: &str, text: &str) -> Self {
        self.insert(name, text);
        self
    }

    pub fn insert(&mut self, name: &str, text: &str) {
        self.files.insert(name.to_string(), text.to_string());
    }
}

impl SourceLoader for MemoryLoader {
    fn load(&mut self, name: &str) -> Option<SourceFile> {
        self.files.get(name).map(|text| SourceFile {
            name: name.to_string(),
            text: text.clone(),
        })
    }
}

/// Script sources are UTF-8 or, for files written by the original
/// toolset, Latin-1.
pub fn decode_source(bytes: &[u8]) -> String {
    match std::str::from_utf8(bytes) {
        Ok(text) => text.to_string(),
        Err(_) => bytes.iter().map(|&b| b as char).collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_memory_loader() {
        let mut loader = MemoryLoader::new().with("k_inc_utility", "int X = 1;");
        assert_eq!(
            loader.load("k_inc_utility").map(|f| f.text),
            Some("int X = 1;".to_string())
        );
        assert_eq!(loader.load("missing"), None);
    }

    #[test]
    fn test_decode_latin1_fallback() {
        assert_eq!(decode_source(b"caf\xe9"), "café");
        assert_eq!(decode_source("café".as_bytes()), "café");
    }

    #[test]
    fn test_directory_loader_first_match_wins() {
        let base = std::env::temp_dir().join(format!("nwscript-inc-{}", std::process::id()));
        let first = base.join("first");
        let second = base.join("second");
        std::fs::create_dir_all(&first).unwrap();
        std::fs::create_dir_all(&second).unwrap();
        std::fs::write(second.join("lib.nss"), "// second").unwrap();
        std::fs::write(first.join("lib.nss"), "// first").unwrap();

        let mut loader = DirectoryLoader::new(vec![first.clone(), second.clone()]);
        assert_eq!(loader.load("lib").map(|f| f.text), Some("// first".to_string()));

        let mut loader = DirectoryLoader::new(vec![second, first]);
        assert_eq!(loader.load("lib").map(|f| f.text), Some("// second".to_string()));

        std::fs::remove_dir_all(&base).unwrap();
    }
}
