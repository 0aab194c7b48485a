//! Non-blocking sanity checks on package manifests.

use serde_json::Value;

use crate::models::ArchiveEntry;

/// Extensions that count as recognizable source code.
const SOURCE_EXTENSIONS: &[&str] = &[
    ".js", ".ts", ".jsx", ".tsx", ".py", ".java", ".go", ".rs", ".rb", ".php", ".c", ".cpp", ".cs",
    ".html", ".css", ".vue", ".svelte",
];

/// Inspect manifests for dependencies that cannot resolve outside the uploader's machine.
pub fn manifest_warnings(entries: &[ArchiveEntry]) -> Vec<String> {
    let mut warnings = Vec::new();

    if let Some(text) = find_text(entries, "package.json") {
        warnings.extend(package_json_warnings(text));
    }
    if let Some(text) = find_text(entries, "requirements.txt") {
        warnings.extend(requirements_warnings(text));
    }

    let has_source = entries
        .iter()
        .any(|e| SOURCE_EXTENSIONS.iter().any(|ext| e.path.ends_with(ext)));
    if !has_source {
        warnings.push("No recognizable source files found (.js, .ts, .py, ...)".to_string());
    }

    warnings
}

fn find_text<'a>(entries: &'a [ArchiveEntry], path: &str) -> Option<&'a str> {
    entries
        .iter()
        .find(|e| e.path == path)
        .and_then(ArchiveEntry::as_text)
}

fn package_json_warnings(text: &str) -> Vec<String> {
    let manifest: Value = match serde_json::from_str(text) {
        Ok(value) => value,
        Err(e) => {
            tracing::debug!(error = %e, "package.json did not parse");
            return vec!["package.json could not be parsed".to_string()];
        }
    };

    ["dependencies", "devDependencies"]
        .iter()
        .filter_map(|section| manifest.get(section).and_then(Value::as_object))
        .flat_map(|deps| deps.iter())
        .filter_map(|(name, version)| {
            let version = match version {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            (version.starts_with("file:") || version.starts_with("link:")).then(|| {
                format!(
                    "Local dependency found: {} ({}) - will not resolve on GitHub",
                    name, version
                )
            })
        })
        .collect()
}

fn requirements_warnings(text: &str) -> Vec<String> {
    text.lines()
        .filter(|line| {
            line.contains("-e file:") || line.contains("file://") || line.starts_with("./")
        })
        .map(|line| format!("Local Python dependency: {}", line.trim()))
        .collect()
}
