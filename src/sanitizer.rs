//! Validation of operator-supplied subprocess arguments.
//!
//! Extra capture and encoder parameters come straight from configuration and
//! end up in a subprocess argument vector. They are split with shell-word
//! rules here and never re-interpreted by a shell afterwards.

use crate::error::SanitizationError;

/// Substrings that are never allowed in any argument.
pub const FORBIDDEN_PATTERNS: [&str; 10] = [";", "&", "|", "`", "$(", ")", "{", "}", ">", "<"];

/// Starts a shell comment when it opens an unquoted word.
pub const COMMENT_MARKER: &str = "#";

/// Options the capture driver sets itself.
pub const CAPTURE_RESERVED_OPTIONS: [&str; 4] = ["--output", "-o", "--width", "--height"];

/// Options the video assembler sets itself.
pub const ENCODE_RESERVED_OPTIONS: [&str; 8] =
    ["-i", "-f", "-y", "-vf", "-r", "-c:v", "-crf", "-pix_fmt"];

/// An already tokenized, validated argument list.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ArgumentList(Vec<String>);

impl ArgumentList {
    pub fn as_slice(&self) -> &[String] {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, String> {
        self.0.iter()
    }
}

impl<'a> IntoIterator for &'a ArgumentList {
    type Item = &'a String;
    type IntoIter = std::slice::Iter<'a, String>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

/// Sanitize extra capture parameters.
///
/// Rejects the whole input if it contains a shell metacharacter, a word
/// starting with `#`, or tries to set `--output`, `--width` or `--height`.
///
/// # Examples
///
/// ```rust
/// use prusa_timelapse::sanitizer::sanitize;
///
/// let args = sanitize("--shutter 20000 --gain '1.5'").unwrap();
/// assert_eq!(args.as_slice(), ["--shutter", "20000", "--gain", "1.5"]);
/// assert!(sanitize("--shutter 1; rm -rf /").is_err());
/// ```
pub fn sanitize(raw: &str) -> Result<ArgumentList, SanitizationError> {
    sanitize_with_reserved(raw, &CAPTURE_RESERVED_OPTIONS)
}

/// Sanitize extra parameters against a caller-specific set of reserved options.
///
/// A reserved option matches either as a whole token or in `option=value` form.
pub fn sanitize_with_reserved(
    raw: &str,
    reserved: &[&str],
) -> Result<ArgumentList, SanitizationError> {
    // Split output alone is not enough: an unquoted word starting with `#`
    // opens a comment and shell-words silently drops the rest of the line.
    for word in raw.split_whitespace() {
        if let Some(pattern) = find_forbidden(word) {
            return Err(SanitizationError::ForbiddenPattern {
                token: word.to_string(),
                pattern,
            });
        }
        if word.starts_with(COMMENT_MARKER) {
            return Err(SanitizationError::ForbiddenPattern {
                token: word.to_string(),
                pattern: COMMENT_MARKER,
            });
        }
    }

    let tokens = shell_words::split(raw).map_err(|e| SanitizationError::Unparseable {
        input: raw.to_string(),
        reason: e.to_string(),
    })?;

    for token in &tokens {
        if let Some(pattern) = find_forbidden(token) {
            return Err(SanitizationError::ForbiddenPattern {
                token: token.clone(),
                pattern,
            });
        }

        if let Some(option) = reserved.iter().find(|option| is_option(token, option)) {
            return Err(SanitizationError::ReservedOption {
                option: option.to_string(),
            });
        }
    }

    Ok(ArgumentList(tokens))
}

fn find_forbidden(text: &str) -> Option<&'static str> {
    FORBIDDEN_PATTERNS
        .iter()
        .find(|pattern| text.contains(**pattern))
        .copied()
}

fn is_option(token: &str, option: &str) -> bool {
    token == option
        || token
            .strip_prefix(option)
            .is_some_and(|rest| rest.starts_with('='))
}
