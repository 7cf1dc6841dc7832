//! Deterministic placement of documents and attachments inside a backend
//!
//! ```text
//! <root>/<stem>/<name>                      document
//! <root>/<stem>/attachments/<name>          attachment of that document
//! ```

use std::path::Path;

use super::{path_segments, StorageError, StorageResult};

const ATTACHMENTS_DIR: &str = "attachments";

#[derive(Debug, Clone)]
pub struct StorageLayout {
    root: String,
}

impl StorageLayout {
    pub fn new(root: &str) -> StorageResult<Self> {
        let root = path_segments(root)?.join("/");
        Ok(Self { root })
    }

    pub fn root(&self) -> &str {
        &self.root
    }

    /// Check that a display name is a plain file name and return its stem
    pub fn validate_name(name: &str) -> StorageResult<&str> {
        let invalid = |reason: &str| StorageError::InvalidPath(format!("{:?} {}", name, reason));

        if name.trim().is_empty() {
            return Err(invalid("is empty"));
        }
        if name.contains(['/', '\\']) {
            return Err(invalid("must not contain path separators"));
        }
        if name.chars().any(|c| c.is_control()) {
            return Err(invalid("contains control characters"));
        }
        // leading dots are reserved for in-flight part files
        if name.starts_with('.') {
            return Err(invalid("must not start with a dot"));
        }

        Path::new(name)
            .file_stem()
            .and_then(|stem| stem.to_str())
            .filter(|stem| !stem.is_empty())
            .ok_or_else(|| invalid("has no file stem"))
    }

    fn join(&self, parts: &[&str]) -> String {
        let mut path = self.root.clone();
        for part in parts {
            if !path.is_empty() {
                path.push('/');
            }
            path.push_str(part);
        }
        path
    }

    /// Directory holding a document and its attachments
    pub fn document_directory(&self, name: &str) -> StorageResult<String> {
        let stem = Self::validate_name(name)?;
        Ok(self.join(&[stem]))
    }

    pub fn document_path(&self, name: &str) -> StorageResult<String> {
        let stem = Self::validate_name(name)?;
        Ok(self.join(&[stem, name]))
    }

    /// Stored path of an attachment, placed next to its parent document
    pub fn attachment_path(&self, document_stored_path: &str, name: &str) -> StorageResult<String> {
        Self::validate_name(name)?;
        let directory = document_directory_of(document_stored_path)?;
        Ok(format!("{}/{}/{}", directory, ATTACHMENTS_DIR, name))
    }
}

/// Directory of a document given its stored path
pub fn document_directory_of(stored_path: &str) -> StorageResult<String> {
    let mut segments = path_segments(stored_path)?;
    if segments.len() < 2 {
        return Err(StorageError::InvalidPath(format!(
            "{} is not a document path",
            stored_path
        )));
    }
    segments.pop();
    Ok(segments.join("/"))
}

/// Directory of the document owning an attachment, given the attachment's
/// stored path
pub fn owning_directory_of(attachment_path: &str) -> StorageResult<String> {
    let mut segments = path_segments(attachment_path)?;
    let len = segments.len();
    if len < 3 || segments[len - 2] != ATTACHMENTS_DIR {
        return Err(StorageError::InvalidPath(format!(
            "{} is not an attachment path",
            attachment_path
        )));
    }
    segments.truncate(len - 2);
    Ok(segments.join("/"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_document_layout() {
        let layout = StorageLayout::new("/uploads/").unwrap();
        assert_eq!(layout.root(), "uploads");
        assert_eq!(layout.document_directory("invoice.pdf").unwrap(), "uploads/invoice");
        assert_eq!(layout.document_path("invoice.pdf").unwrap(), "uploads/invoice/invoice.pdf");
        assert_eq!(layout.document_path("README").unwrap(), "uploads/README/README");
    }

    #[test]
    fn test_attachment_layout() {
        let layout = StorageLayout::new("uploads").unwrap();
        let parent = layout.document_path("contract.pdf").unwrap();
        assert_eq!(
            layout.attachment_path(&parent, "scan.png").unwrap(),
            "uploads/contract/attachments/scan.png"
        );
        assert_eq!(document_directory_of(&parent).unwrap(), "uploads/contract");
    }

    #[test]
    fn test_attachment_belongs_to_document_directory() {
        let layout = StorageLayout::new("uploads").unwrap();
        let parent = layout.document_path("case.pdf").unwrap();
        let attachment = layout.attachment_path(&parent, "late.png").unwrap();
        assert_eq!(owning_directory_of(&attachment).unwrap(), document_directory_of(&parent).unwrap());

        assert!(owning_directory_of("uploads/case/case.pdf").is_err());
        assert!(owning_directory_of("attachments/x.png").is_err());
    }

    #[test]
    fn test_empty_root() {
        let layout = StorageLayout::new("").unwrap();
        assert_eq!(layout.document_path("a.pdf").unwrap(), "a/a.pdf");
    }

    #[test]
    fn test_rejects_unsafe_names() {
        for name in ["", "  ", "../x.pdf", "a/b.pdf", "a\\b.pdf", ".pdf", "..", ".", "a\nb.pdf"] {
            assert!(
                StorageLayout::validate_name(name).is_err(),
                "{:?} should be rejected",
                name
            );
        }
        assert_eq!(StorageLayout::validate_name("report.final.pdf").unwrap(), "report.final");
    }

    #[test]
    fn test_same_stem_shares_directory() {
        let layout = StorageLayout::new("uploads").unwrap();
        assert_eq!(
            layout.document_directory("a.pdf").unwrap(),
            layout.document_directory("a.png").unwrap()
        );
    }
}
