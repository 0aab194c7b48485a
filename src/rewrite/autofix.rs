//! AI-assisted project fixing.
//!
//! A curated slice of the project is sent to a [`TextGenerator`]; the reply is
//! expected to carry a JSON change-set. Every failure degrades to "no changes"
//! plus a warning, never to a failed deployment.

use std::collections::HashMap;
use std::sync::Arc;

use serde::Deserialize;

use super::llm::TextGenerator;
use crate::archive::check_entry_name;
use crate::models::{ArchiveEntry, EntryContent};

/// Most files whose content is shown to the generator.
const MAX_CONTEXT_FILES: usize = 10;
/// Byte budget per file shown to the generator.
const MAX_FILE_BYTES: usize = 2000;

const CONTEXT_FILES: &[&str] = &[
    "package.json",
    "package-lock.json",
    "next.config.js",
    "next.config.ts",
    "next.config.mjs",
    "tsconfig.json",
    "vercel.json",
    ".nvmrc",
    ".node-version",
    "app/favicon.ico",
    "public/favicon.ico",
];

const SYSTEM_PROMPT: &str = r#"You are an expert at repairing software projects before they are pushed to GitHub. Analyze the project files and fix common problems automatically.

COMMON PROBLEMS TO FIX:
1. Next.js version mismatches (@next/swc vs next version)
2. Missing or corrupt favicon.ico
3. Missing package-lock.json or yarn.lock
4. Missing .env.example files
5. Missing or broken next.config.js/ts
6. Missing or broken tsconfig.json
7. Incompatible Node.js versions in package.json
8. Missing or wrong Vercel/Netlify configuration

RULES:
- Read package.json to detect the framework (Next.js, React, Vue, ...)
- Check version compatibility between dependencies
- Fix real errors only, never change working features
- Return ONLY valid JSON

OUTPUT FORMAT (JSON):
{
  "hasIssues": true/false,
  "issues": ["list of detected problems"],
  "fixes": [
    {
      "file": "path/to/file",
      "action": "create" | "modify" | "delete",
      "content": "new file content (for create/modify)",
      "reason": "why this change is needed"
    }
  ]
}"#;

/// Structural contract for the generator's reply.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FixAnalysis {
    has_issues: bool,
    #[serde(default)]
    issues: Vec<String>,
    #[serde(default)]
    fixes: Vec<Fix>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "action", rename_all = "lowercase")]
enum Fix {
    Create {
        file: String,
        content: String,
        #[serde(default)]
        reason: String,
    },
    Modify {
        file: String,
        content: String,
        #[serde(default)]
        reason: String,
    },
    Delete {
        file: String,
        #[serde(default)]
        reason: String,
    },
}

impl Fix {
    fn file(&self) -> &str {
        match self {
            Fix::Create { file, .. } | Fix::Modify { file, .. } | Fix::Delete { file, .. } => file,
        }
    }
}

/// Result of an auto-fix pass.
#[derive(Debug, Clone)]
pub struct AutoFixOutcome {
    /// Entries to deploy; the input list when nothing was applied.
    pub entries: Vec<ArchiveEntry>,
    /// Whether the generator's change-set was applied.
    pub applied: bool,
    /// Human-readable description of each applied change.
    pub changes: Vec<String>,
    pub warnings: Vec<String>,
}

impl AutoFixOutcome {
    fn unchanged(entries: Vec<ArchiveEntry>, warning: String) -> Self {
        Self {
            entries,
            applied: false,
            changes: Vec::new(),
            warnings: vec![warning],
        }
    }
}

/// Runs the auto-fix stage against a [`TextGenerator`].
#[derive(Clone)]
pub struct AutoFixer {
    generator: Arc<dyn TextGenerator>,
}

impl AutoFixer {
    pub fn new(generator: Arc<dyn TextGenerator>) -> Self {
        Self { generator }
    }

    pub async fn run(&self, entries: Vec<ArchiveEntry>) -> AutoFixOutcome {
        if !entries.iter().any(|e| e.path == "package.json") {
            return AutoFixOutcome::unchanged(
                entries,
                "AI fix skipped: no package.json found, not a Node.js project".to_string(),
            );
        }

        let prompt = build_prompt(&entries);
        let reply = match self.generator.complete(SYSTEM_PROMPT, &prompt).await {
            Ok(reply) => reply,
            Err(e) => {
                tracing::warn!(error = %e, "AI fix collaborator failed");
                return AutoFixOutcome::unchanged(entries, format!("AI analysis failed: {}", e));
            }
        };

        let analysis = match parse_analysis(&reply) {
            Some(analysis) => analysis,
            None => {
                tracing::warn!(reply_len = reply.len(), "AI fix reply did not match contract");
                return AutoFixOutcome::unchanged(
                    entries,
                    "AI analysis failed: response could not be parsed".to_string(),
                );
            }
        };

        for issue in &analysis.issues {
            tracing::info!(issue = %issue, "AI fix reported issue");
        }

        if !analysis.has_issues || analysis.fixes.is_empty() {
            return AutoFixOutcome {
                entries,
                applied: false,
                changes: vec!["No issues found - project looks good".to_string()],
                warnings: Vec::new(),
            };
        }

        let (entries, changes, warnings) = apply_fixes(&entries, analysis.fixes);
        tracing::info!(changes = changes.len(), "AI fix applied");
        AutoFixOutcome {
            applied: !changes.is_empty(),
            entries,
            changes,
            warnings,
        }
    }
}

/// Compose the user prompt: every path plus truncated content of the curated files.
fn build_prompt(entries: &[ArchiveEntry]) -> String {
    let all_paths = entries
        .iter()
        .map(|e| e.path.as_str())
        .collect::<Vec<_>>()
        .join("\n");

    let context = entries
        .iter()
        .filter(|e| is_context_file(&e.path))
        .take(MAX_CONTEXT_FILES)
        .map(|e| {
            let body = match &e.content {
                EntryContent::Text(text) => truncate_on_char_boundary(text, MAX_FILE_BYTES),
                EntryContent::Binary(bytes) => format!("<binary file, {} bytes>", bytes.len()),
            };
            format!("--- {} ---\n{}", e.path, body)
        })
        .collect::<Vec<_>>()
        .join("\n\n");

    format!(
        "Analyze this project and fix its problems:\n\nALL FILES IN THE PROJECT:\n{}\n\nCONTENT OF RELEVANT FILES:\n{}\n\nReturn the analysis and fixes as JSON.",
        all_paths, context
    )
}

fn is_context_file(path: &str) -> bool {
    CONTEXT_FILES.contains(&path) || path.ends_with(".env.example")
}

fn truncate_on_char_boundary(text: &str, max_bytes: usize) -> String {
    if text.len() <= max_bytes {
        return text.to_string();
    }
    let mut end = max_bytes;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    text[..end].to_string()
}

/// Pull the outermost `{ ... }` span out of free-form text and validate it.
fn parse_analysis(reply: &str) -> Option<FixAnalysis> {
    let start = reply.find('{')?;
    let end = reply.rfind('}')?;
    if end < start {
        return None;
    }
    serde_json::from_str(&reply[start..=end]).ok()
}

/// Apply a change-set onto a fresh path→content association seeded from `original`.
fn apply_fixes(
    original: &[ArchiveEntry],
    fixes: Vec<Fix>,
) -> (Vec<ArchiveEntry>, Vec<String>, Vec<String>) {
    let mut order: Vec<String> = original.iter().map(|e| e.path.clone()).collect();
    let mut contents: HashMap<String, EntryContent> = original
        .iter()
        .map(|e| (e.path.clone(), e.content.clone()))
        .collect();
    let mut changes = Vec::new();
    let mut warnings = Vec::new();

    for fix in fixes {
        let file = fix.file();
        if file.is_empty() || check_entry_name(file).is_err() {
            warnings.push(format!("AI fix ignored unsafe path: {}", file));
            continue;
        }

        match fix {
            Fix::Create {
                file,
                content,
                reason,
            }
            | Fix::Modify {
                file,
                content,
                reason,
            } => {
                let verb = if contents.contains_key(&file) {
                    "Modified"
                } else {
                    order.push(file.clone());
                    "Created"
                };
                changes.push(format!("{}: {} - {}", verb, file, reason));
                contents.insert(file, EntryContent::Text(content));
            }
            Fix::Delete { file, reason } => {
                if contents.remove(&file).is_some() {
                    changes.push(format!("Deleted: {} - {}", file, reason));
                }
            }
        }
    }

    let entries = order
        .into_iter()
        .filter_map(|path| {
            contents
                .remove(&path)
                .map(|content| ArchiveEntry { path, content })
        })
        .collect();

    (entries, changes, warnings)
}
