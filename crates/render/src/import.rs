//! Content import
//!
//! Documents often arrive through handles that do not outlive the process
//! (a picked file stream, a one-shot pipe). Before a document can be rendered
//! it is copied into a durable file under the importer's directory, and that
//! file's path becomes the document identity.

use crate::source::{DocumentId, OpenError};
use std::fmt;
use std::fs::{self, File};
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use uuid::Uuid;

const FILE_PREFIX: &str = "roadbook-";
const FILE_EXTENSION: &str = "pdf";
const PARTIAL_EXTENSION: &str = "pdf.part";

/// Externally supplied document content
pub enum ContentHandle {
    /// A file on the local file system
    Path(PathBuf),
    /// A possibly single-use byte stream
    Stream(Box<dyn Read + Send>),
}

impl ContentHandle {
    pub fn from_path(path: impl Into<PathBuf>) -> Self {
        ContentHandle::Path(path.into())
    }

    pub fn from_reader(reader: impl Read + Send + 'static) -> Self {
        ContentHandle::Stream(Box::new(reader))
    }
}

impl fmt::Debug for ContentHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ContentHandle::Path(path) => f.debug_tuple("Path").field(path).finish(),
            ContentHandle::Stream(_) => f.write_str("Stream(..)"),
        }
    }
}

/// Materializes content handles into stable local documents
pub trait ContentImportSource: Send + Sync {
    /// Copy the handle's bytes into a durable local file and return its identity
    fn import(&self, handle: ContentHandle) -> Result<DocumentId, OpenError>;

    /// Remove a previously imported document that is no longer active
    ///
    /// Identities this importer did not produce are left alone.
    fn discard(&self, identity: &DocumentId);
}

/// Imports documents into a directory, one uniquely named file per import
///
/// Each import writes to a `.part` file and renames it into place, so a
/// failed or interrupted copy never disturbs the currently active document.
#[derive(Debug, Clone)]
pub struct FileImporter {
    dir: PathBuf,
}

impl FileImporter {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Whether `path` is a document previously imported by this importer
    pub fn owns(&self, path: &Path) -> bool {
        path.parent() == Some(self.dir.as_path())
            && path
                .file_name()
                .and_then(|name| name.to_str())
                .is_some_and(|name| name.starts_with(FILE_PREFIX) && name.ends_with(".pdf"))
    }

    fn new_target(&self) -> PathBuf {
        self.dir.join(format!("{FILE_PREFIX}{}.{FILE_EXTENSION}", Uuid::new_v4()))
    }
}

impl ContentImportSource for FileImporter {
    fn import(&self, handle: ContentHandle) -> Result<DocumentId, OpenError> {
        if let ContentHandle::Path(path) = &handle {
            if self.owns(path) && path.is_file() {
                tracing::debug!(path = %path.display(), "document already imported");
                return Ok(DocumentId::from_path(path));
            }
        }

        fs::create_dir_all(&self.dir).map_err(|e| OpenError::from_io(&self.dir, e))?;

        let target = self.new_target();
        let partial = target.with_extension(PARTIAL_EXTENSION);

        let copied = match handle {
            ContentHandle::Path(path) => {
                let mut source = File::open(&path).map_err(|e| OpenError::from_io(&path, e))?;
                copy_into(&mut source, &partial)
            }
            ContentHandle::Stream(mut reader) => copy_into(&mut reader, &partial),
        };

        let bytes = match copied {
            Ok(bytes) => bytes,
            Err(err) => {
                let _ = fs::remove_file(&partial);
                return Err(OpenError::Io(err));
            }
        };

        if bytes == 0 {
            let _ = fs::remove_file(&partial);
            return Err(OpenError::Invalid("document is empty".to_string()));
        }

        commit(&partial, &target)?;
        tracing::info!(path = %target.display(), bytes, "imported document");

        Ok(DocumentId::from_path(&target))
    }

    fn discard(&self, identity: &DocumentId) {
        let path = identity.as_path();
        if !self.owns(path) {
            return;
        }

        match fs::remove_file(path) {
            Ok(()) => tracing::debug!(path = %path.display(), "discarded imported document"),
            Err(err) if err.kind() == io::ErrorKind::NotFound => {}
            Err(err) => {
                tracing::warn!(path = %path.display(), error = %err, "failed to discard document")
            }
        }
    }
}

fn copy_into(reader: &mut dyn Read, path: &Path) -> io::Result<u64> {
    let mut file = File::create(path)?;
    let bytes = io::copy(reader, &mut file)?;
    file.sync_all()?;
    Ok(bytes)
}

/// Move a finished copy into place, removing it if the move fails
fn commit(partial: &Path, target: &Path) -> Result<(), OpenError> {
    fs::rename(partial, target).map_err(|err| {
        let _ = fs::remove_file(partial);
        OpenError::from_io(target, err)
    })
}
