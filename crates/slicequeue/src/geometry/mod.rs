//! Geometry store: uploaded model files on disk and their `files` records.

use std::io::Write;
use std::path::{Path, PathBuf};

use log::warn;

use crate::db::{file_repo, Database, DatabaseError};
use crate::error::StorageError;

/// Attempts at a fresh name before giving up. Names carry a v4 UUID, so a
/// second attempt only happens if something else wrote the same name.
const NAME_ATTEMPTS: usize = 8;

pub struct GeometryStore {
    db: Database,
    media_directory: PathBuf,
}

impl GeometryStore {
    pub fn new<P: AsRef<Path>>(db: Database, media_directory: P) -> Self {
        Self {
            db,
            media_directory: media_directory.as_ref().to_path_buf(),
        }
    }

    pub fn media_directory(&self) -> &Path {
        &self.media_directory
    }

    /// Writes an uploaded model under the media directory as
    /// `{MATERIAL}-{COLOR}-{uuid}-{filename}` and returns its full path.
    ///
    /// The file is created with `create_new`, so an existing file is never
    /// overwritten.
    pub fn write_upload(
        &self,
        original_name: &str,
        material_name: &str,
        color: &str,
        content: &[u8],
    ) -> Result<PathBuf, StorageError> {
        let filename = sanitize_filename(original_name)?;
        self.ensure_directory()?;

        for _ in 0..NAME_ATTEMPTS {
            let stored = stored_name(
                material_name,
                color,
                &uuid::Uuid::new_v4().to_string(),
                &filename,
            );
            let path = self.media_directory.join(stored);

            match std::fs::OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(&path)
            {
                Ok(mut file) => {
                    file.write_all(content)
                        .and_then(|_| file.sync_all())
                        .map_err(|e| StorageError::WriteFile {
                            path: path.clone(),
                            source: e,
                        })?;
                    return Ok(path);
                }
                Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => continue,
                Err(e) => {
                    return Err(StorageError::WriteFile { path, source: e });
                }
            }
        }

        Err(StorageError::NameExhausted(self.media_directory.clone()))
    }

    /// On-disk location of a file record.
    pub fn resolve(&self, file_id: i64) -> Result<Option<PathBuf>, DatabaseError> {
        Ok(file_repo::find_by_id(&self.db, file_id)?.map(|f| PathBuf::from(f.full_path)))
    }

    /// Deletes files from disk, skipping ones already gone. Failures are
    /// logged and returned; the caller has already dropped the records.
    pub fn remove_files(&self, paths: &[PathBuf]) -> Vec<StorageError> {
        let mut errors = Vec::new();
        for path in paths {
            match std::fs::remove_file(path) {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => {
                    warn!("Failed to remove {}: {}", path.display(), e);
                    errors.push(StorageError::RemoveFile {
                        path: path.clone(),
                        source: e,
                    });
                }
            }
        }
        errors
    }

    fn ensure_directory(&self) -> Result<(), StorageError> {
        if !self.media_directory.exists() {
            std::fs::create_dir_all(&self.media_directory).map_err(|e| {
                StorageError::CreateDirectory {
                    path: self.media_directory.clone(),
                    source: e,
                }
            })?;
        }
        Ok(())
    }
}

fn name_component(value: &str) -> String {
    value.trim().to_uppercase().replace(' ', "_")
}

/// Builds the stored file name. Material and color are upper-cased, and
/// spaces become underscores in every component.
pub fn stored_name(material_name: &str, color: &str, id: &str, filename: &str) -> String {
    format!(
        "{}-{}-{}-{}",
        name_component(material_name),
        name_component(color),
        id,
        filename.replace(' ', "_")
    )
}

/// Keeps only the final path component of a client-supplied name.
fn sanitize_filename(original: &str) -> Result<String, StorageError> {
    let name = original
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or_default()
        .trim();
    if name.is_empty() || name == "." || name == ".." {
        return Err(StorageError::InvalidFilename(original.to_string()));
    }
    Ok(name.to_string())
}
