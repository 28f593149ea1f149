//! File layout for downloaded attachments

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

use crate::airtable::api::AttachmentRef;

/// Longest path component written, in bytes; NAME_MAX is 255 on common filesystems
const MAX_COMPONENT_BYTES: usize = 200;

/// Suffixes longer than this are not treated as an extension
const MAX_EXTENSION_BYTES: usize = 16;

/// Directory holding downloaded attachments
///
/// Directory structure:
/// ```text
/// attachments/
///   appXXXXXXXXXXXXXX/
///     attAAAAAAAAAAAAAA_invoice.pdf
///     attBBBBBBBBBBBBBB_invoice.pdf   # same name, different record
/// ```
///
/// Prefixing with the attachment id keeps same-named files from different
/// records apart.
#[derive(Debug, Clone)]
pub struct AttachmentDir {
    root: PathBuf,
}

impl AttachmentDir {
    /// Create the attachment root if needed
    pub fn new(root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(&root).with_context(|| {
            format!("Failed to create attachment directory: {}", root.display())
        })?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Directory for one base's attachments
    pub fn base_dir(&self, base_id: &str) -> PathBuf {
        self.root
            .join(truncate_bytes(&sanitize_filename(base_id), MAX_COMPONENT_BYTES))
    }

    /// Destination path of an attachment
    pub fn path_for(&self, base_id: &str, attachment: &AttachmentRef) -> PathBuf {
        self.base_dir(base_id)
            .join(component_name(&attachment.id, &attachment.filename))
    }

    /// Whether the attachment was already downloaded by an earlier run
    pub fn contains(&self, base_id: &str, attachment: &AttachmentRef) -> bool {
        self.path_for(base_id, attachment).is_file()
    }
}

/// Make a remote filename safe to use as a single path component
///
/// Path separators, control characters and characters that are reserved on
/// common filesystems become `_`. Leading dots are stripped so nothing ends
/// up hidden or resolves to `.`/`..`.
pub fn sanitize_filename(name: &str) -> String {
    let cleaned: String = name
        .chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => '_',
            c if c.is_control() => '_',
            c => c,
        })
        .collect();

    let trimmed = cleaned.trim().trim_start_matches('.');
    if trimmed.is_empty() {
        return "attachment".to_string();
    }

    trimmed.to_string()
}

/// Longest prefix of `s` that fits in `max` bytes without splitting a char
fn truncate_bytes(s: &str, max: usize) -> &str {
    if s.len() <= max {
        return s;
    }
    let mut end = max;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}

/// `<id>_<name>` cut to the component budget
///
/// The id is kept whole (up to half the budget) so names stay unique; a
/// long filename loses the end of its stem but keeps its extension.
fn component_name(id: &str, filename: &str) -> String {
    let id = sanitize_filename(id);
    let id = truncate_bytes(&id, MAX_COMPONENT_BYTES / 2);
    let name = sanitize_filename(filename);

    let budget = MAX_COMPONENT_BYTES - id.len() - 1;
    if name.len() <= budget {
        return format!("{id}_{name}");
    }

    let (stem, ext) = match name.rfind('.') {
        Some(i) if i > 0 && name.len() - i <= MAX_EXTENSION_BYTES => name.split_at(i),
        _ => (name.as_str(), ""),
    };
    let stem = truncate_bytes(stem, budget - ext.len());
    format!("{id}_{stem}{ext}")
}
