//! Document sources for ingestion.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tracing::{debug, warn};
use walkdir::WalkDir;

use crate::document::{Document, SOURCE_KEY, TITLE_KEY};
use crate::error::{RagError, Result};

/// A source of [`Document`]s.
#[async_trait]
pub trait DocumentLoader: Send + Sync {
    /// Load every document from the source.
    ///
    /// # Errors
    ///
    /// Returns [`RagError::Loader`] if the source as a whole cannot be read.
    /// Individual unreadable items are skipped.
    async fn load(&self) -> Result<Vec<Document>>;
}

/// Loads text files from a directory tree.
///
/// Each file becomes one [`Document`] whose id and `source` metadata are the
/// path relative to the root (with `/` separators) and whose `title` is the
/// file name. Files that are not valid UTF-8 are skipped with a warning.
///
/// ```rust,ignore
/// use kb_rag::{DirectoryLoader, DocumentLoader};
///
/// let docs = DirectoryLoader::new("./knowledge").with_extensions(["md", "txt"]).load().await?;
/// ```
#[derive(Debug, Clone)]
pub struct DirectoryLoader {
    root: PathBuf,
    extensions: Vec<String>,
}

impl DirectoryLoader {
    /// Load every file under `root`.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into(), extensions: Vec::new() }
    }

    /// Only load files with one of these extensions (case-insensitive, with or without the dot).
    pub fn with_extensions<I, S>(mut self, extensions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.extensions = extensions
            .into_iter()
            .map(|ext| ext.as_ref().trim_start_matches('.').to_ascii_lowercase())
            .filter(|ext| !ext.is_empty())
            .collect();
        self
    }

    fn accepts(&self, path: &Path) -> bool {
        if self.extensions.is_empty() {
            return true;
        }
        path.extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| self.extensions.iter().any(|e| e.eq_ignore_ascii_case(ext)))
    }

    fn load_blocking(&self) -> Result<Vec<Document>> {
        if !self.root.is_dir() {
            return Err(RagError::Loader {
                source_path: self.root.display().to_string(),
                message: "not a directory".to_string(),
            });
        }

        let mut files = WalkDir::new(&self.root)
            .into_iter()
            .filter_map(|entry| match entry {
                Ok(entry) => Some(entry),
                Err(e) => {
                    warn!(root = %self.root.display(), error = %e, "skipping unreadable entry");
                    None
                }
            })
            .filter(|entry| entry.file_type().is_file())
            .filter(|entry| self.accepts(entry.path()))
            .map(|entry| entry.into_path())
            .collect::<Vec<_>>();
        files.sort();

        let mut documents = Vec::with_capacity(files.len());
        for path in files {
            let text = match std::fs::read_to_string(&path) {
                Ok(text) => text,
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "skipping unreadable file");
                    continue;
                }
            };

            let relative = path.strip_prefix(&self.root).unwrap_or(&path);
            let id = relative
                .components()
                .map(|c| c.as_os_str().to_string_lossy())
                .collect::<Vec<_>>()
                .join("/");
            let title = path
                .file_name()
                .map(|name| name.to_string_lossy().into_owned())
                .unwrap_or_else(|| id.clone());

            let mut document = Document::new(id.clone(), text)
                .with_metadata(SOURCE_KEY, id)
                .with_metadata(TITLE_KEY, title);
            document.source_uri = Some(path.display().to_string());
            documents.push(document);
        }

        debug!(root = %self.root.display(), count = documents.len(), "loaded documents");
        Ok(documents)
    }
}

#[async_trait]
impl DocumentLoader for DirectoryLoader {
    async fn load(&self) -> Result<Vec<Document>> {
        let loader = self.clone();
        tokio::task::spawn_blocking(move || loader.load_blocking()).await.map_err(|e| {
            RagError::Loader {
                source_path: self.root.display().to_string(),
                message: format!("loader task failed: {e}"),
            }
        })?
    }
}

/// Serves a fixed list of documents.
#[derive(Debug, Clone, Default)]
pub struct StaticLoader {
    documents: Vec<Document>,
}

impl StaticLoader {
    /// Serve `documents` as-is.
    pub fn new(documents: Vec<Document>) -> Self {
        Self { documents }
    }
}

#[async_trait]
impl DocumentLoader for StaticLoader {
    async fn load(&self) -> Result<Vec<Document>> {
        Ok(self.documents.clone())
    }
}

#[cfg(test)]
mod tests {
    use std::fs;

    use super::*;

    #[tokio::test]
    async fn loads_matching_files_in_path_order() {
        let temp = tempfile::tempdir().unwrap();
        let root = temp.path();
        fs::create_dir_all(root.join("Finance/q3")).unwrap();
        fs::write(root.join("Finance/q3/report.MD"), "quarterly numbers").unwrap();
        fs::write(root.join("a.txt"), "alpha").unwrap();
        fs::write(root.join("image.png"), "not text").unwrap();

        let docs = DirectoryLoader::new(root).with_extensions([".md", "txt"]).load().await.unwrap();

        assert_eq!(docs.len(), 2);
        assert_eq!(docs[0].id, "Finance/q3/report.MD");
        assert_eq!(docs[0].title(), "report.MD");
        assert_eq!(
            docs[0].metadata.get(SOURCE_KEY).map(String::as_str),
            Some("Finance/q3/report.MD")
        );
        assert_eq!(docs[1].id, "a.txt");
        assert_eq!(docs[1].text, "alpha");
    }

    #[tokio::test]
    async fn skips_non_utf8_files() {
        let temp = tempfile::tempdir().unwrap();
        fs::write(temp.path().join("bad.txt"), [0xff, 0xfe, 0x00]).unwrap();
        fs::write(temp.path().join("good.txt"), "ok").unwrap();

        let docs = DirectoryLoader::new(temp.path()).load().await.unwrap();
        assert_eq!(docs.len(), 1);
        assert_eq!(docs[0].id, "good.txt");
    }

    #[tokio::test]
    async fn missing_root_is_a_loader_error() {
        let temp = tempfile::tempdir().unwrap();
        let err = DirectoryLoader::new(temp.path().join("absent")).load().await.unwrap_err();
        assert!(matches!(err, RagError::Loader { .. }));
    }
}
