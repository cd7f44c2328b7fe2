//! Local file browsing for the GUI's file tree

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use serde::Serialize;

use mars_core::prelude::*;

/// One visible directory entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FileEntry {
    pub name: String,
    pub path: PathBuf,
    pub is_directory: bool,
}

/// Why a listing or read failed, in the words shown to the user
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FileAccessError {
    #[error("Path not found: {}", .0.display())]
    NotFound(PathBuf),

    #[error("File not found")]
    FileNotFound,

    #[error("Permission denied")]
    PermissionDenied,

    #[error("{0}")]
    Other(String),
}

/// List `dir`, hiding dot-entries; directories first, then case-insensitive by name
pub fn list_directory(dir: &Path) -> std::result::Result<Vec<FileEntry>, FileAccessError> {
    if !dir.exists() {
        return Err(FileAccessError::NotFound(dir.to_path_buf()));
    }

    let entries = std::fs::read_dir(dir).map_err(|e| match e.kind() {
        ErrorKind::PermissionDenied => FileAccessError::PermissionDenied,
        _ => FileAccessError::Other(e.to_string()),
    })?;

    let mut items: Vec<FileEntry> = entries
        .filter_map(|entry| entry.ok())
        .filter_map(|entry| {
            let name = entry.file_name().to_string_lossy().into_owned();
            if name.starts_with('.') {
                return None;
            }
            // Follow symlinks so a linked directory still expands
            let is_directory = entry.path().is_dir();
            Some(FileEntry {
                name,
                path: entry.path(),
                is_directory,
            })
        })
        .collect();

    items.sort_by(|a, b| {
        b.is_directory
            .cmp(&a.is_directory)
            .then_with(|| a.name.to_lowercase().cmp(&b.name.to_lowercase()))
    });
    trace!("Listed {} entries in {:?}", items.len(), dir);
    Ok(items)
}

/// Read a text file, replacing invalid UTF-8
pub fn read_text_file(path: &Path) -> std::result::Result<String, FileAccessError> {
    if !path.is_file() {
        return Err(FileAccessError::FileNotFound);
    }
    let bytes = std::fs::read(path).map_err(|e| match e.kind() {
        ErrorKind::PermissionDenied => FileAccessError::PermissionDenied,
        ErrorKind::NotFound => FileAccessError::FileNotFound,
        _ => FileAccessError::Other(e.to_string()),
    })?;
    Ok(String::from_utf8_lossy(&bytes).into_owned())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_listing_order_and_hidden_entries() {
        let temp = tempdir().unwrap();
        std::fs::write(temp.path().join("b.txt"), "").unwrap();
        std::fs::write(temp.path().join("A.txt"), "").unwrap();
        std::fs::write(temp.path().join(".env"), "").unwrap();
        std::fs::create_dir(temp.path().join("zeta")).unwrap();
        std::fs::create_dir(temp.path().join("Alpha")).unwrap();
        std::fs::create_dir(temp.path().join(".git")).unwrap();

        let names: Vec<_> = list_directory(temp.path())
            .unwrap()
            .into_iter()
            .map(|e| (e.name, e.is_directory))
            .collect();

        assert_eq!(
            names,
            vec![
                ("Alpha".to_string(), true),
                ("zeta".to_string(), true),
                ("A.txt".to_string(), false),
                ("b.txt".to_string(), false),
            ]
        );
    }

    #[test]
    fn test_entry_serializes_camel_case() {
        let entry = FileEntry {
            name: "src".to_string(),
            path: PathBuf::from("/p/src"),
            is_directory: true,
        };
        assert_eq!(
            serde_json::to_value(&entry).unwrap(),
            serde_json::json!({"name": "src", "path": "/p/src", "isDirectory": true})
        );
    }

    #[test]
    fn test_missing_directory() {
        let err = list_directory(Path::new("/definitely/not/here")).unwrap_err();
        assert_eq!(err.to_string(), "Path not found: /definitely/not/here");
    }

    #[test]
    fn test_read_text_file_lossy() {
        let temp = tempdir().unwrap();
        let path = temp.path().join("data.txt");
        std::fs::write(&path, b"ok \xff end").unwrap();

        assert_eq!(read_text_file(&path).unwrap(), "ok \u{fffd} end");
        assert_eq!(
            read_text_file(&temp.path().join("nope")).unwrap_err(),
            FileAccessError::FileNotFound
        );
        assert_eq!(
            read_text_file(temp.path()).unwrap_err().to_string(),
            "File not found"
        );
    }
}
