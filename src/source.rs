// SPDX-License-Identifier: MIT OR Apache-2.0

//! Document sources using the ignore crate (same walker as ripgrep)

use ignore::WalkBuilder;
use std::path::{Component, Path, PathBuf};
use std::sync::mpsc;
use tracing::{debug, warn};

use crate::errors::{RagError, Result};

/// Default extensions picked up from the scraped pages directory.
pub const DEFAULT_EXTENSIONS: &[&str] = &["txt"];

/// A raw text document handed to the chunker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Document {
    /// Stable source identifier (path relative to the source root, `/`-separated)
    pub source_id: String,
    /// Raw document text
    pub text: String,
}

impl Document {
    pub fn new(source_id: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            source_id: source_id.into(),
            text: text.into(),
        }
    }

    /// Length of the text in bytes.
    pub fn byte_len(&self) -> usize {
        self.text.len()
    }
}

/// Something that can enumerate the documents to ingest.
pub trait DocumentSource {
    fn list_documents(&self) -> Result<Vec<Document>>;
}

impl DocumentSource for Vec<Document> {
    fn list_documents(&self) -> Result<Vec<Document>> {
        Ok(self.clone())
    }
}

/// Directory source that respects .gitignore
pub struct DirectorySource {
    root: PathBuf,
    extensions: Vec<String>,
}

impl DirectorySource {
    pub fn new(root: impl AsRef<Path>) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
            extensions: DEFAULT_EXTENSIONS.iter().map(|e| e.to_string()).collect(),
        }
    }

    /// Replace the accepted file extensions (case-insensitive, without the dot).
    pub fn with_extensions<I, S>(mut self, extensions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.extensions = extensions
            .into_iter()
            .map(|e| e.as_ref().trim_start_matches('.').to_lowercase())
            .collect();
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn extensions(&self) -> &[String] {
        &self.extensions
    }

    /// List matching file paths, sorted.
    pub fn list_files(&self) -> Result<Vec<PathBuf>> {
        if !self.root.is_dir() {
            return Err(RagError::io(
                &self.root,
                std::io::Error::new(std::io::ErrorKind::NotFound, "source directory not found"),
            ));
        }

        let (tx, rx) = mpsc::channel();

        let walker = WalkBuilder::new(&self.root)
            .hidden(false)
            .git_ignore(true)
            .git_exclude(true)
            .require_git(false)
            .build_parallel();

        let extensions = self.extensions.clone();

        walker.run(|| {
            let tx = tx.clone();
            let extensions = extensions.clone();

            Box::new(move |entry| {
                if let Ok(entry) = entry {
                    let path = entry.path();
                    if path.is_file() {
                        if let Some(ext) = path.extension().and_then(|e| e.to_str()) {
                            if extensions.contains(&ext.to_lowercase()) {
                                let _ = tx.send(path.to_path_buf());
                            }
                        }
                    }
                }
                ignore::WalkState::Continue
            })
        });

        drop(tx);
        let mut files: Vec<PathBuf> = rx.into_iter().collect();
        files.sort();
        Ok(files)
    }

}

/// Source id of `path`: its components below `root` joined with `/`.
///
/// Paths outside `root` keep all their components. `.` components are dropped.
pub fn source_id_for(root: &Path, path: &Path) -> String {
    let root: PathBuf = root
        .components()
        .filter(|c| !matches!(c, Component::CurDir))
        .collect();
    let path: PathBuf = path
        .components()
        .filter(|c| !matches!(c, Component::CurDir))
        .collect();
    path.strip_prefix(&root)
        .unwrap_or(&path)
        .components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}

impl DocumentSource for DirectorySource {
    fn list_documents(&self) -> Result<Vec<Document>> {
        let mut documents = Vec::new();
        for path in self.list_files()? {
            let bytes = std::fs::read(&path).map_err(|e| RagError::io(&path, e))?;
            if bytes.contains(&0) {
                warn!(path = %path.display(), "skipping binary file");
                continue;
            }
            let text = match String::from_utf8(bytes) {
                Ok(text) => text,
                Err(_) => {
                    warn!(path = %path.display(), "skipping non-UTF-8 file");
                    continue;
                }
            };
            documents.push(Document::new(source_id_for(&self.root, &path), text));
        }

        if documents.is_empty() {
            return Err(RagError::NoDocuments(self.root.clone()));
        }

        debug!(root = %self.root.display(), count = documents.len(), "listed documents");
        Ok(documents)
    }
}
