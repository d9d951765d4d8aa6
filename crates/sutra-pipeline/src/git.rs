// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::path::Path;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Maximum characters kept from a diff preview before the sentinel.
pub const DIFF_PREVIEW_LIMIT: usize = 8_000;
pub const DIFF_TRUNCATION_SENTINEL: &str = "... (truncated)";

/// Git operations the pipeline needs.  Pure I/O wrapper; failures bubble up
/// as errors.
#[async_trait]
pub trait GitRunner: Send + Sync {
    /// Run a git subcommand and return its stdout.
    async fn exec(&self, args: &[&str], cwd: &Path) -> anyhow::Result<String>;

    /// True when `cwd` is inside a git working tree.
    async fn detect_repo(&self, cwd: &Path) -> bool;

    /// `git diff HEAD` equivalent.
    async fn diff(&self, cwd: &Path) -> anyhow::Result<String>;
}

// ─── Branch naming ────────────────────────────────────────────────────────────

/// Kebab-case slug for branch names: lowercase alphanumerics joined by
/// single dashes, capped at 40 characters on a word boundary.
pub fn slugify(task: &str) -> String {
    let mut slug = String::new();
    let mut dash_pending = false;
    for c in task.chars() {
        if c.is_ascii_alphanumeric() {
            if dash_pending && !slug.is_empty() {
                slug.push('-');
            }
            dash_pending = false;
            slug.push(c.to_ascii_lowercase());
        } else {
            dash_pending = true;
        }
    }
    if slug.len() > 40 {
        let cut = slug[..40].rfind('-').unwrap_or(40);
        slug.truncate(cut);
    }
    slug
}

/// Expand `{prefix}` and `{slug}` in the branch template.
pub fn branch_name(template: &str, prefix: &str, slug: &str) -> String {
    template.replace("{prefix}", prefix).replace("{slug}", slug)
}

// ─── Diff helpers ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiffStats {
    pub files_changed: usize,
    pub insertions: usize,
    pub deletions: usize,
}

/// Count files and +/- lines in a unified diff.  Header lines (`+++`/`---`)
/// are not content changes.
pub fn parse_diff_stats(diff: &str) -> DiffStats {
    let mut stats = DiffStats::default();
    for line in diff.lines() {
        if line.starts_with("diff --git ") {
            stats.files_changed += 1;
        } else if line.starts_with('+') && !line.starts_with("+++") {
            stats.insertions += 1;
        } else if line.starts_with('-') && !line.starts_with("---") {
            stats.deletions += 1;
        }
    }
    stats
}

/// Cap a diff preview at [`DIFF_PREVIEW_LIMIT`] characters, appending the
/// truncation sentinel when anything was cut.
pub fn truncate_diff(diff: &str) -> String {
    if diff.chars().count() <= DIFF_PREVIEW_LIMIT {
        return diff.to_string();
    }
    let kept: String = diff.chars().take(DIFF_PREVIEW_LIMIT).collect();
    format!("{kept}{DIFF_TRUNCATION_SENTINEL}")
}

// ─── Unit tests ───────────────────────────────────────────────────────────────
