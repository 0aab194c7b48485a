//! Archive normalizer.
//!
//! Turns an uploaded ZIP into the in-memory file list that becomes the
//! repository working tree. Nothing touches the filesystem: entries are read
//! straight out of the upload buffer.

mod manifest;

pub use manifest::manifest_warnings;

use std::collections::HashMap;
use std::io::{Cursor, Read};

use zip::ZipArchive;

use crate::errors::AppError;
use crate::models::{ArchiveEntry, EntryContent};

/// Extensions stored as UTF-8 text. Everything else is kept as opaque bytes.
const TEXT_EXTENSIONS: &[&str] = &[
    "txt", "js", "ts", "jsx", "tsx", "json", "html", "css", "scss", "sass", "less", "py", "java",
    "c", "cpp", "h", "hpp", "cs", "go", "rs", "rb", "php", "md", "yml", "yaml", "xml", "svg", "sh",
    "bash", "zsh", "vue", "svelte", "astro", "sql", "graphql", "toml", "ini", "cfg", "conf",
    "gitignore",
];

/// Multi-part suffix that also counts as text.
const TEXT_SUFFIX_ENV_EXAMPLE: &str = ".env.example";

/// Why an entry was refused by the security filter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectReason {
    PathTraversal,
    AbsolutePath,
    /// Empty or `.` segments, e.g. `src//a.js`.
    MalformedPath,
}

/// An entry dropped because its name is unsafe.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RejectedEntry {
    pub name: String,
    pub reason: RejectReason,
}

impl std::fmt::Display for RejectedEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.reason {
            RejectReason::PathTraversal => write!(f, "Blocked path traversal: {}", self.name),
            RejectReason::AbsolutePath => write!(f, "Blocked absolute path: {}", self.name),
            RejectReason::MalformedPath => write!(f, "Blocked malformed path: {}", self.name),
        }
    }
}

/// Output of [`normalize`].
#[derive(Debug, Clone)]
pub struct NormalizedArchive {
    pub entries: Vec<ArchiveEntry>,
    pub rejected: Vec<RejectedEntry>,
    /// Non-security notices (unreadable or duplicate entries).
    pub notices: Vec<String>,
    /// Wrapper folder stripped from every path, e.g. `my-project/`.
    pub wrapper: Option<String>,
}

impl NormalizedArchive {
    /// All warnings to surface to the caller, security rejections first.
    pub fn warnings(&self) -> Vec<String> {
        self.rejected
            .iter()
            .map(ToString::to_string)
            .chain(self.notices.iter().cloned())
            .collect()
    }
}

/// Check a raw entry name against the security filter.
///
/// Runs on the untouched name, before any prefix stripping or joining.
pub fn check_entry_name(name: &str) -> Result<(), RejectReason> {
    if name
        .split(|c| c == '/' || c == '\\')
        .any(|segment| segment == "..")
    {
        return Err(RejectReason::PathTraversal);
    }
    if name.starts_with('/') || name.starts_with('\\') {
        return Err(RejectReason::AbsolutePath);
    }
    if name
        .split(|c| c == '/' || c == '\\')
        .any(|segment| segment.is_empty() || segment == ".")
    {
        return Err(RejectReason::MalformedPath);
    }
    Ok(())
}

/// Convenience exclusions: hidden files, macOS metadata, installed dependencies.
fn is_excluded(name: &str) -> bool {
    if name.contains("__MACOSX") {
        return true;
    }
    let segments: Vec<&str> = name.split('/').collect();
    if segments.iter().any(|s| s.starts_with('.')) {
        return true;
    }
    // `node_modules` only counts as a directory segment.
    segments
        .iter()
        .take(segments.len().saturating_sub(1))
        .any(|s| *s == "node_modules")
}

/// Whether a path is stored as text, decided purely by its extension.
pub fn is_text_path(path: &str) -> bool {
    let lower = path.to_ascii_lowercase();
    if lower.ends_with(TEXT_SUFFIX_ENV_EXAMPLE) {
        return true;
    }
    let file_name = lower.rsplit('/').next().unwrap_or(&lower);
    match file_name.rsplit_once('.') {
        Some((_, ext)) => TEXT_EXTENSIONS.contains(&ext),
        None => false,
    }
}

/// Detect a single wrapper folder shared by every entry.
///
/// The candidate comes from the first entry only; it is accepted when every
/// entry starts with it, otherwise nothing is stripped.
pub fn detect_wrapper<'a, I>(mut names: I) -> Option<String>
where
    I: Iterator<Item = &'a str> + Clone,
{
    let first = names.clone().next()?;
    let (top, _) = first.split_once('/')?;
    let candidate = format!("{}/", top);
    if names.all(|name| name.starts_with(&candidate)) {
        Some(candidate)
    } else {
        None
    }
}

/// Parse and filter an uploaded archive into repository entries.
pub fn normalize(bytes: &[u8]) -> Result<NormalizedArchive, AppError> {
    let mut archive = ZipArchive::new(Cursor::new(bytes))
        .map_err(|e| AppError::InvalidArchive(format!("Not a valid ZIP archive: {}", e)))?;

    let mut rejected = Vec::new();
    let mut notices = Vec::new();
    let mut candidates: Vec<(String, Vec<u8>)> = Vec::new();

    for index in 0..archive.len() {
        let mut file = match archive.by_index(index) {
            Ok(file) => file,
            Err(e) => {
                tracing::warn!(index, error = %e, "Skipping unreadable archive entry");
                notices.push(format!("Skipped unreadable entry #{}: {}", index, e));
                continue;
            }
        };

        let name = file.name().to_string();
        if file.is_dir() || name.ends_with('/') {
            continue;
        }

        if let Err(reason) = check_entry_name(&name) {
            let entry = RejectedEntry { name, reason };
            tracing::warn!(entry = %entry, "Rejected unsafe archive entry");
            rejected.push(entry);
            continue;
        }

        if is_excluded(&name) {
            tracing::debug!(name = %name, "Excluded archive entry");
            continue;
        }

        let mut content = Vec::with_capacity(file.size() as usize);
        if let Err(e) = file.read_to_end(&mut content) {
            tracing::warn!(name = %name, error = %e, "Failed to read archive entry");
            notices.push(format!("Skipped unreadable entry {}: {}", name, e));
            continue;
        }
        candidates.push((name, content));
    }

    let wrapper = detect_wrapper(candidates.iter().map(|(name, _)| name.as_str()));
    if let Some(prefix) = &wrapper {
        tracing::info!(wrapper = %prefix, "Detected wrapper folder");
    }

    let mut entries: Vec<ArchiveEntry> = Vec::with_capacity(candidates.len());
    let mut positions: HashMap<String, usize> = HashMap::new();

    for (name, content) in candidates {
        let path = match &wrapper {
            Some(prefix) => name[prefix.len()..].to_string(),
            None => name,
        };
        if path.is_empty() {
            continue;
        }

        let content = if is_text_path(&path) {
            EntryContent::Text(String::from_utf8_lossy(&content).into_owned())
        } else {
            EntryContent::Binary(content)
        };
        let entry = ArchiveEntry { path, content };

        match positions.get(&entry.path) {
            Some(&pos) => {
                notices.push(format!("Duplicate entry replaced: {}", entry.path));
                entries[pos] = entry;
            }
            None => {
                positions.insert(entry.path.clone(), entries.len());
                entries.push(entry);
            }
        }
    }

    if entries.is_empty() {
        return Err(AppError::InvalidArchive(
            "ZIP file is empty or contains no valid files".to_string(),
        ));
    }

    tracing::info!(
        files = entries.len(),
        rejected = rejected.len(),
        "Archive normalized"
    );

    Ok(NormalizedArchive {
        entries,
        rejected,
        notices,
        wrapper,
    })
}
