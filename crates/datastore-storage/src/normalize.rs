//! Key and namespace normalization.
//!
//! Keys and namespaces are dot-joined paths. Callers may pass them either as
//! a single string (used verbatim) or as a sequence of segments (empty
//! segments dropped, the rest joined with `.`). Both forms address the same
//! entry: `["a", "b", "c"]` and `"a.b.c"` are equivalent.

use crate::error::{StorageError, StorageResult};

/// Path separator for keys and namespaces.
pub const SEPARATOR: char = '.';

/// Input accepted wherever a key, prefix or namespace is expected.
pub trait KeySegments {
    /// Canonical dot-joined form, `None` when the input is empty.
    fn join_segments(self) -> Option<String>;
}

fn verbatim(s: &str) -> Option<String> {
    if s.is_empty() {
        None
    } else {
        Some(s.to_owned())
    }
}

fn joined<I, S>(segments: I) -> Option<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut out = String::new();
    for segment in segments {
        let segment = segment.as_ref();
        if segment.is_empty() {
            continue;
        }
        if !out.is_empty() {
            out.push(SEPARATOR);
        }
        out.push_str(segment);
    }
    verbatim(&out)
}

impl KeySegments for &str {
    fn join_segments(self) -> Option<String> {
        verbatim(self)
    }
}

impl KeySegments for String {
    fn join_segments(self) -> Option<String> {
        if self.is_empty() { None } else { Some(self) }
    }
}

impl KeySegments for &String {
    fn join_segments(self) -> Option<String> {
        verbatim(self)
    }
}

impl<S: AsRef<str>> KeySegments for &[S] {
    fn join_segments(self) -> Option<String> {
        joined(self)
    }
}

impl<S: AsRef<str>, const N: usize> KeySegments for [S; N] {
    fn join_segments(self) -> Option<String> {
        joined(self)
    }
}

impl<S: AsRef<str>, const N: usize> KeySegments for &[S; N] {
    fn join_segments(self) -> Option<String> {
        joined(self)
    }
}

impl<S: AsRef<str>> KeySegments for Vec<S> {
    fn join_segments(self) -> Option<String> {
        joined(self)
    }
}

impl<S: AsRef<str>> KeySegments for &Vec<S> {
    fn join_segments(self) -> Option<String> {
        joined(self)
    }
}

impl<T: KeySegments> KeySegments for Option<T> {
    fn join_segments(self) -> Option<String> {
        self.and_then(KeySegments::join_segments)
    }
}

/// Normalize a key or namespace input.
///
/// Empty input (including a sequence whose segments are all empty) yields
/// `None`. Strings are returned verbatim.
#[must_use]
pub fn normalize(input: impl KeySegments) -> Option<String> {
    input.join_segments()
}

/// Normalize an input that must name a key.
///
/// # Errors
///
/// Returns [`StorageError::InvalidKey`] if the key is empty after
/// normalization or contains a null byte.
pub fn normalize_key(input: impl KeySegments) -> StorageResult<String> {
    let key = normalize(input)
        .ok_or_else(|| StorageError::InvalidKey("key must not be empty".into()))?;
    if key.contains('\0') {
        return Err(StorageError::InvalidKey(
            "key must not contain null bytes".into(),
        ));
    }
    Ok(key)
}
