//! Optional content rewriting between normalization and synchronization.
//!
//! Both stages take the full entry list and hand back a replacement list.

mod autofix;
mod badge;
mod llm;

pub use autofix::{AutoFixOutcome, AutoFixer};
pub use badge::{inject_badge, inject_badges, BADGE_SNIPPET};
pub use llm::{OpenAiClient, TextGenerator};

#[cfg(test)]
pub use llm::MockTextGenerator;
