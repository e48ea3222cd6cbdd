//! Pathname glob matching
//!
//! Compiles shell-style globs into anchored regular expressions for
//! matching request paths.

use regex::Regex;

/// A compiled pathname glob.
///
/// Globs are rooted at `/` (a missing leading slash is implied) and
/// support three wildcard forms:
///
/// * `**` matches any run of characters, including `/`
/// * `*` matches within a single path segment; right after a `/` it also
///   refuses to match a leading dot, so `/*.js` skips dotfiles
/// * `?` matches a single character within a segment; right after a `/`
///   it matches any single character
///
/// Every other character matches literally.
#[derive(Debug, Clone)]
pub struct GlobMatcher {
    source: String,
    regex: Option<Regex>,
}

impl GlobMatcher {
    /// Compile a glob. A glob that fails to compile yields a matcher that
    /// matches nothing rather than an error.
    #[must_use]
    pub fn new(glob: &str) -> Self {
        let pattern = translate(glob);
        let regex = match Regex::new(&pattern) {
            Ok(regex) => Some(regex),
            Err(error) => {
                tracing::debug!(glob, %error, "glob failed to compile; matching nothing");
                None
            }
        };
        Self {
            source: glob.to_string(),
            regex,
        }
    }

    /// Check whether a request path matches this glob.
    #[must_use]
    pub fn is_match(&self, path: &str) -> bool {
        self.regex.as_ref().is_some_and(|regex| regex.is_match(path))
    }

    /// The glob text this matcher was compiled from.
    #[must_use]
    pub fn source(&self) -> &str {
        &self.source
    }
}

impl PartialEq for GlobMatcher {
    /// Matchers compare by their glob text, not the compiled automaton.
    fn eq(&self, other: &Self) -> bool {
        self.source == other.source
    }
}

impl Eq for GlobMatcher {}

/// Translate a glob into an anchored regular expression.
fn translate(glob: &str) -> String {
    let rooted = if glob.starts_with('/') {
        glob.to_string()
    } else {
        format!("/{glob}")
    };

    let mut pattern = String::with_capacity(rooted.len() + 8);
    pattern.push('^');

    let mut chars = rooted.chars().peekable();
    // The previous literal character decides how `*` and `?` behave.
    let mut prev = None;
    while let Some(ch) = chars.next() {
        match ch {
            '*' if chars.peek() == Some(&'*') => {
                chars.next();
                pattern.push_str(".*");
                prev = Some('*');
            }
            '*' => {
                if prev == Some('/') {
                    pattern.push_str("[^.][^/]*");
                } else {
                    pattern.push_str("[^/]*");
                }
                prev = Some('*');
            }
            '?' => {
                if prev == Some('/') {
                    pattern.push('.');
                } else {
                    pattern.push_str("[^/]");
                }
                prev = Some('?');
            }
            other => {
                pattern.push_str(&regex::escape(&other.to_string()));
                prev = Some(other);
            }
        }
    }

    pattern.push('$');
    pattern
}
