//! Attribution badge for free-tier deployments.

use crate::models::{ArchiveEntry, EntryContent};

/// Snippet inserted into every HTML page of a free-tier deployment.
pub const BADGE_SNIPPET: &str = r#"
<!-- Deployed with Zip-Ship -->
<div id="zipship-badge" style="position:fixed;bottom:12px;right:12px;z-index:9999;font-family:system-ui,sans-serif;font-size:12px;">
  <a href="https://zip-ship-revolution.com/?utm_source=user_site" target="_blank" rel="noopener"
     style="display:flex;align-items:center;gap:6px;padding:6px 12px;background:rgba(10,14,39,0.85);color:#00F0FF;text-decoration:none;border-radius:6px;border:1px solid rgba(0,240,255,0.3);">
    <span>Deployed with Zip-Ship</span>
  </a>
</div>
"#;

const BODY_CLOSE: &str = "</body>";

/// Insert the badge before the last `</body>` (any case), or append it.
pub fn inject_badge(content: &str) -> String {
    // ASCII lowercasing keeps byte offsets aligned with the original.
    match content.to_ascii_lowercase().rfind(BODY_CLOSE) {
        Some(pos) => {
            let mut out = String::with_capacity(content.len() + BADGE_SNIPPET.len());
            out.push_str(&content[..pos]);
            out.push_str(BADGE_SNIPPET);
            out.push_str(&content[pos..]);
            out
        }
        None => format!("{}{}", content, BADGE_SNIPPET),
    }
}

fn is_html(entry: &ArchiveEntry) -> bool {
    entry.path.to_ascii_lowercase().ends_with(".html")
}

/// Apply [`inject_badge`] to every text `.html` entry; everything else passes through.
pub fn inject_badges(entries: Vec<ArchiveEntry>) -> Vec<ArchiveEntry> {
    entries
        .into_iter()
        .map(|entry| match &entry.content {
            EntryContent::Text(text) if is_html(&entry) => {
                tracing::debug!(path = %entry.path, "Injecting badge");
                ArchiveEntry::text(entry.path.clone(), inject_badge(text))
            }
            _ => entry,
        })
        .collect()
}
