//! Which filesystem paths never produce watch events.

use std::path::Path;

/// Names of OS metadata files and tool directories, matched exactly
/// (case-insensitive) against every path component.
const IGNORED_NAMES: &[&str] = &[
    ".ds_store",
    "thumbs.db",
    "desktop.ini",
    ".git",
    ".svn",
    ".idea",
    ".vscode",
    "node_modules",
];

/// Editor swap and lock files
const IGNORED_PATTERNS: &[&str] = &["*.swp", "*.swx", "*~", ".~lock.*"];

/// Path filter applied to raw watcher events.
///
/// A path is ignored when any of its components below the watched root
/// matches a built-in name, a built-in pattern or a user pattern. Patterns
/// support `*` as a wildcard and are case-insensitive.
#[derive(Debug, Clone, Default)]
pub struct IgnoreFilter {
    patterns: Vec<String>,
}

impl IgnoreFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_patterns<I, S>(patterns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut filter = Self::new();
        for pattern in patterns {
            filter.add_pattern(pattern.as_ref());
        }
        filter
    }

    pub fn add_pattern(&mut self, pattern: &str) {
        let pattern = pattern.trim().to_lowercase();
        if !pattern.is_empty() && !self.patterns.contains(&pattern) {
            self.patterns.push(pattern);
        }
    }

    /// Returns true if the pattern was present.
    pub fn remove_pattern(&mut self, pattern: &str) -> bool {
        let pattern = pattern.trim().to_lowercase();
        let before = self.patterns.len();
        self.patterns.retain(|p| p != &pattern);
        self.patterns.len() != before
    }

    pub fn patterns(&self) -> &[String] {
        &self.patterns
    }

    /// Returns true if events for `path` should be dropped.
    pub fn should_ignore(&self, path: &Path) -> bool {
        path.components().any(|c| {
            let name = c.as_os_str().to_string_lossy().to_lowercase();
            self.ignores_name(&name)
        })
    }

    /// Like [`should_ignore`](Self::should_ignore) but only looks at the part
    /// of `path` below `root`.
    pub fn should_ignore_under(&self, root: &Path, path: &Path) -> bool {
        match path.strip_prefix(root) {
            Ok(rel) => self.should_ignore(rel),
            Err(_) => self.should_ignore(path),
        }
    }

    fn ignores_name(&self, name: &str) -> bool {
        IGNORED_NAMES.contains(&name)
            || IGNORED_PATTERNS.iter().any(|p| matches_pattern(name, p))
            || self.patterns.iter().any(|p| matches_pattern(name, p))
    }
}

/// Glob match with `*` wildcards. Without a `*` the whole name must match.
fn matches_pattern(text: &str, pattern: &str) -> bool {
    if !pattern.contains('*') {
        return text == pattern;
    }

    let parts: Vec<&str> = pattern.split('*').collect();
    let first = parts[0];
    let last = parts[parts.len() - 1];
    if !text.starts_with(first) {
        return false;
    }
    if text.len() < first.len() + last.len() || !text.ends_with(last) {
        return false;
    }

    let mut pos = first.len();
    let end = text.len() - last.len();
    for part in &parts[1..parts.len() - 1] {
        if part.is_empty() {
            continue;
        }
        match text[pos..end].find(part) {
            Some(found) => pos += found + part.len(),
            None => return false,
        }
    }
    true
}
