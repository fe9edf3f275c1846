use regex::Regex;
use std::collections::HashMap;
use std::sync::RwLock;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum WhitelistError {
    #[error("invalid regex pattern '{pattern}': {source}")]
    InvalidRegex {
        pattern: String,
        #[source]
        source: regex::Error,
    },
    #[error("pattern cannot be empty")]
    EmptyPattern,
}

enum WhitelistPattern {
    Literal(String),
    Regex { raw: String, compiled: Regex },
}

impl WhitelistPattern {
    fn matches(&self, normalized: &str) -> bool {
        match self {
            WhitelistPattern::Literal(s) => s == normalized,
            WhitelistPattern::Regex { compiled, .. } => compiled.is_match(normalized),
        }
    }

    fn raw(&self) -> &str {
        match self {
            WhitelistPattern::Literal(s) => s,
            WhitelistPattern::Regex { raw, .. } => raw,
        }
    }
}

/// Matches concrete shell commands against an explicit allowlist (§4.5).
///
/// Patterns are literal by default — metacharacters in a literal pattern are
/// never interpreted. A pattern prefixed `regex:` is compiled and anchored to
/// a full, case-insensitive match, so `git status` whitelisted as a regex can
/// never also absorb `git status && rm -rf /`.
pub struct WhitelistManager {
    patterns: RwLock<Vec<WhitelistPattern>>,
    cache: RwLock<HashMap<String, bool>>,
}

impl Default for WhitelistManager {
    fn default() -> Self {
        Self::new()
    }
}

impl WhitelistManager {
    pub fn new() -> Self {
        Self {
            patterns: RwLock::new(Vec::new()),
            cache: RwLock::new(HashMap::new()),
        }
    }

    /// Adds a pattern, interpreting a `regex:` prefix as an explicit opt-in
    /// to regex matching; everything else is literal.
    pub fn add(&mut self, raw: &str) -> Result<(), WhitelistError> {
        if raw.trim().is_empty() {
            return Err(WhitelistError::EmptyPattern);
        }
        if let Some(expr) = raw.strip_prefix("regex:") {
            self.add_regex(expr)
        } else {
            self.add_literal(raw);
            Ok(())
        }
    }

    pub fn add_literal(&mut self, pattern: &str) {
        let normalized = normalize_command(pattern);
        self.patterns.get_mut().unwrap().push(WhitelistPattern::Literal(normalized));
        self.cache.get_mut().unwrap().clear();
    }

    pub fn add_regex(&mut self, pattern: &str) -> Result<(), WhitelistError> {
        let anchored = format!("(?i)^(?:{pattern})$");
        let compiled = Regex::new(&anchored).map_err(|source| WhitelistError::InvalidRegex {
            pattern: pattern.to_string(),
            source,
        })?;
        self.patterns.get_mut().unwrap().push(WhitelistPattern::Regex {
            raw: pattern.to_string(),
            compiled,
        });
        self.cache.get_mut().unwrap().clear();
        Ok(())
    }

    pub fn remove(&mut self, raw: &str) -> bool {
        let mut patterns = self.patterns.get_mut().unwrap();
        let before = patterns.len();
        patterns.retain(|p| p.raw() != raw);
        self.cache.get_mut().unwrap().clear();
        patterns.len() != before
    }

    pub fn clear(&mut self) {
        self.patterns.get_mut().unwrap().clear();
        self.cache.get_mut().unwrap().clear();
    }

    pub fn len(&self) -> usize {
        self.patterns.read().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether `command` matches any whitelist pattern. Commands are
    /// shell-token-normalized before matching, so shell operators appended to
    /// an otherwise-whitelisted prefix (`git status && rm -rf /`) never match
    /// — normalization preserves them as literal tokens that break equality
    /// against the pattern, and the anchored regex match rejects the tail.
    pub fn is_whitelisted(&self, command: &str) -> bool {
        let normalized = normalize_command(command);

        if let Some(hit) = self.cache.read().unwrap().get(&normalized) {
            return *hit;
        }

        let result = self
            .patterns
            .read()
            .unwrap()
            .iter()
            .any(|p| p.matches(&normalized));

        self.cache.write().unwrap().insert(normalized, result);
        result
    }
}

/// Collapses whitespace and strips quoting the way a shell tokenizer would,
/// so `echo 'hello world'` and `echo hello world` normalize identically.
/// Falls back to plain whitespace collapsing when the command does not
/// tokenize (unbalanced quotes) rather than erroring.
fn normalize_command(command: &str) -> String {
    match shell_words::split(command.trim()) {
        Ok(tokens) if !tokens.is_empty() => tokens.join(" "),
        _ => command.split_whitespace().collect::<Vec<_>>().join(" "),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn literal_exact_match_only() {
        let mut wl = WhitelistManager::new();
        wl.add_literal("git status");
        assert!(wl.is_whitelisted("git status"));
        assert!(!wl.is_whitelisted("git log"));
        assert!(!wl.is_whitelisted("git status --short"));
    }

    #[test]
    fn regex_prefix_enables_regex_matching() {
        let mut wl = WhitelistManager::new();
        wl.add("regex:git (status|log|diff)").unwrap();
        assert!(wl.is_whitelisted("git status"));
        assert!(wl.is_whitelisted("GIT LOG"));
        assert!(!wl.is_whitelisted("git push"));
    }

    #[test]
    fn invalid_regex_is_rejected_not_panicking() {
        let mut wl = WhitelistManager::new();
        assert!(wl.add_regex("git[").is_err());
    }

    #[test]
    fn literal_pattern_never_auto_promotes_to_regex() {
        let mut wl = WhitelistManager::new();
        wl.add_literal("git.*");
        assert!(wl.is_whitelisted("git.*"));
        assert!(!wl.is_whitelisted("git status"));
    }

    #[test]
    fn appended_operators_never_match_whitelisted_prefix() {
        let mut wl = WhitelistManager::new();
        wl.add("regex:git status").unwrap();
        assert!(wl.is_whitelisted("git status"));
        assert!(!wl.is_whitelisted("git status && rm -rf /"));
        assert!(!wl.is_whitelisted("git status; rm -rf /"));
        assert!(!wl.is_whitelisted("git status | sudo bash"));
    }

    #[test]
    fn command_substitution_and_background_jobs_do_not_bypass() {
        let mut wl = WhitelistManager::new();
        wl.add_literal("echo hello");
        assert!(wl.is_whitelisted("echo hello"));
        assert!(!wl.is_whitelisted("echo hello $(rm -rf /)"));
        assert!(!wl.is_whitelisted("echo hello & rm -rf /"));
    }

    #[test]
    fn quoting_is_normalized_consistently() {
        let mut wl = WhitelistManager::new();
        wl.add_literal("echo hello world");
        assert!(wl.is_whitelisted("echo 'hello world'"));
        assert!(wl.is_whitelisted("echo \"hello world\""));
    }

    #[test]
    fn clearing_drops_patterns_and_cache() {
        let mut wl = WhitelistManager::new();
        wl.add_literal("git status");
        assert!(wl.is_whitelisted("git status"));
        wl.clear();
        assert!(wl.is_empty());
        assert!(!wl.is_whitelisted("git status"));
    }
}
