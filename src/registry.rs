// src/registry.rs
//! Flat-file list of polled sources, one id per line.

use std::io::ErrorKind;
use std::path::PathBuf;

use tokio::sync::Mutex;

#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("{0} is already in the list.")]
    AlreadyPresent(String),
    #[error("{0} is not in the list.")]
    NotFound(String),
    #[error("invalid source name {0:?}")]
    InvalidName(String),
    #[error("registry file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

#[derive(Debug)]
pub struct SourceRegistry {
    path: PathBuf,
    // Serializes read-modify-write inside this process.
    write_lock: Mutex<()>,
}

impl SourceRegistry {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    /// Entries in file order. A missing file is an empty registry.
    pub async fn list(&self) -> Result<Vec<String>, RegistryError> {
        match tokio::fs::read_to_string(&self.path).await {
            Ok(s) => Ok(parse_entries(&s)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(Vec::new()),
            Err(e) => Err(self.io(e)),
        }
    }

    pub async fn add(&self, name: &str) -> Result<(), RegistryError> {
        let name = validate(name)?;
        let _g = self.write_lock.lock().await;
        let mut entries = self.list().await?;
        if entries.iter().any(|e| e == name) {
            return Err(RegistryError::AlreadyPresent(name.to_string()));
        }
        entries.push(name.to_string());
        self.rewrite(&entries).await?;
        tracing::info!(source = name, "source added");
        Ok(())
    }

    pub async fn remove(&self, name: &str) -> Result<(), RegistryError> {
        let name = name.trim();
        let _g = self.write_lock.lock().await;
        let mut entries = self.list().await?;
        let before = entries.len();
        entries.retain(|e| e != name);
        if entries.len() == before {
            return Err(RegistryError::NotFound(name.to_string()));
        }
        self.rewrite(&entries).await?;
        tracing::info!(source = name, "source removed");
        Ok(())
    }

    async fn rewrite(&self, entries: &[String]) -> Result<(), RegistryError> {
        if let Some(dir) = self.path.parent().filter(|d| !d.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(dir).await.map_err(|e| self.io(e))?;
        }
        let mut body = entries.join("\n");
        if !body.is_empty() {
            body.push('\n');
        }
        tokio::fs::write(&self.path, body).await.map_err(|e| self.io(e))
    }

    fn io(&self, source: std::io::Error) -> RegistryError {
        RegistryError::Io {
            path: self.path.display().to_string(),
            source,
        }
    }
}

fn parse_entries(s: &str) -> Vec<String> {
    s.lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .map(String::from)
        .collect()
}

fn validate(name: &str) -> Result<&str, RegistryError> {
    let n = name.trim();
    if n.is_empty() || n.chars().any(char::is_whitespace) {
        return Err(RegistryError::InvalidName(name.to_string()));
    }
    Ok(n)
}

/// Numbered listing used by the admin surface.
pub fn format_listing(entries: &[String]) -> String {
    if entries.is_empty() {
        return "No source registered.".to_string();
    }
    entries
        .iter()
        .enumerate()
        .map(|(i, e)| format!("{}. {e}", i + 1))
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blank_lines_are_ignored() {
        assert_eq!(parse_entries("pics\n\n  earthporn \r\n\n"), vec!["pics", "earthporn"]);
    }

    #[test]
    fn names_with_whitespace_are_rejected() {
        assert!(matches!(validate("two words"), Err(RegistryError::InvalidName(_))));
        assert!(matches!(validate("   "), Err(RegistryError::InvalidName(_))));
        assert_eq!(validate(" pics ").unwrap(), "pics");
    }

    #[test]
    fn listing_is_numbered() {
        assert_eq!(format_listing(&[]), "No source registered.");
        let l = format_listing(&["a".into(), "b".into()]);
        assert_eq!(l, "1. a\n2. b");
    }

    #[tokio::test]
    async fn add_twice_conflicts_and_remove_twice_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let reg = SourceRegistry::new(dir.path().join("subs.txt"));
        assert!(reg.list().await.unwrap().is_empty());

        reg.add("pics").await.unwrap();
        assert!(matches!(reg.add("pics").await, Err(RegistryError::AlreadyPresent(_))));
        assert_eq!(reg.list().await.unwrap(), vec!["pics"]);

        reg.remove("pics").await.unwrap();
        assert!(matches!(reg.remove("pics").await, Err(RegistryError::NotFound(_))));
        assert!(reg.list().await.unwrap().is_empty());
    }
}
