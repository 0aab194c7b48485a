//! In-memory archive entries flowing from the normalizer to the synchronizer.

/// Content of a single entry, classified by file extension.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EntryContent {
    /// UTF-8 text
    Text(String),
    /// Opaque bytes, never decoded
    Binary(Vec<u8>),
}

/// One file destined for the repository working tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveEntry {
    /// Relative, slash-separated path. Never empty, no `..` segment, no leading `/`.
    pub path: String,
    pub content: EntryContent,
}

impl ArchiveEntry {
    pub fn text(path: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            content: EntryContent::Text(content.into()),
        }
    }

    pub fn binary(path: impl Into<String>, content: impl Into<Vec<u8>>) -> Self {
        Self {
            path: path.into(),
            content: EntryContent::Binary(content.into()),
        }
    }

    /// Text content, or `None` for binary entries.
    pub fn as_text(&self) -> Option<&str> {
        match &self.content {
            EntryContent::Text(text) => Some(text),
            EntryContent::Binary(_) => None,
        }
    }

    /// Raw bytes as they will be stored in the blob.
    pub fn as_bytes(&self) -> &[u8] {
        match &self.content {
            EntryContent::Text(text) => text.as_bytes(),
            EntryContent::Binary(bytes) => bytes,
        }
    }
}

/// Repository visibility requested on creation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Visibility {
    #[default]
    Public,
    Private,
}

impl Visibility {
    pub fn is_private(&self) -> bool {
        matches!(self, Visibility::Private)
    }
}
