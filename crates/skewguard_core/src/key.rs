//! Lock key validation and inner/outer derivation.

use crate::error::{LockError, LockResult};
use std::fmt;

/// Maximum length of a caller-supplied key, in characters.
pub const MAX_KEY_LEN: usize = 250;

/// Suffix appended to a key to name its outer lock.
///
/// Caller keys may not end with it, so an outer resource can never be
/// mistaken for some other key's inner resource.
pub const OUTER_SUFFIX: &str = "_OUT";

/// A lock resource name that is safe to embed in command text.
///
/// The only way to build one from caller input is [`SanitizedKey::new`],
/// which validates the key and escapes it as a quoted literal.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SanitizedKey {
    raw: String,
    literal: String,
}

impl SanitizedKey {
    /// Validates a caller key and prepares its quoted literal.
    ///
    /// # Errors
    ///
    /// Returns [`LockError::InvalidKey`] if the key is empty, longer than
    /// [`MAX_KEY_LEN`] characters, or ends with [`OUTER_SUFFIX`].
    pub fn new(key: &str) -> LockResult<Self> {
        if key.is_empty() {
            return Err(LockError::invalid_key("key must not be empty"));
        }
        let len = key.chars().count();
        if len > MAX_KEY_LEN {
            return Err(LockError::invalid_key(format!(
                "key is {len} characters, maximum is {MAX_KEY_LEN}"
            )));
        }
        if key.ends_with(OUTER_SUFFIX) {
            return Err(LockError::invalid_key(format!(
                "key must not end with the reserved suffix {OUTER_SUFFIX:?}"
            )));
        }
        Ok(Self::escape(key.to_string()))
    }

    fn escape(raw: String) -> Self {
        let literal = format!("'{}'", raw.replace('\'', "''"));
        Self { raw, literal }
    }

    /// Returns the resource name as given.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// Returns the resource name as a quoted command literal.
    #[must_use]
    pub fn literal(&self) -> &str {
        &self.literal
    }
}

impl fmt::Display for SanitizedKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

impl AsRef<str> for SanitizedKey {
    fn as_ref(&self) -> &str {
        &self.raw
    }
}

/// Validates `key` and escapes it for command text.
///
/// Shorthand for [`SanitizedKey::new`].
pub fn sanitize(key: &str) -> LockResult<SanitizedKey> {
    SanitizedKey::new(key)
}

/// The two resource names used for one logical key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockKeys {
    inner: SanitizedKey,
    outer: SanitizedKey,
}

impl LockKeys {
    /// Derives the inner (`key`) and outer (`key` + [`OUTER_SUFFIX`]) names.
    ///
    /// # Errors
    ///
    /// Returns [`LockError::InvalidKey`] if `key` fails validation.
    pub fn derive(key: &str) -> LockResult<Self> {
        let inner = SanitizedKey::new(key)?;
        let outer = SanitizedKey::escape(format!("{}{OUTER_SUFFIX}", inner.as_str()));
        Ok(Self { inner, outer })
    }

    /// Returns the inner resource, held by the session handed to the caller.
    #[must_use]
    pub fn inner(&self) -> &SanitizedKey {
        &self.inner
    }

    /// Returns the outer resource, held only during the handshake.
    #[must_use]
    pub fn outer(&self) -> &SanitizedKey {
        &self.outer
    }

    /// Consumes the pair and returns the inner resource.
    #[must_use]
    pub fn into_inner(self) -> SanitizedKey {
        self.inner
    }
}
