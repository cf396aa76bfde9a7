//! Wildcard byte signatures.
//!
//! Internal functions of a stripped host have no name left in the binary, but their
//! prologue bytes usually survive across rebuilds. A [`Signature`] describes such a prologue
//! with `??` wildcards over the bytes that change between builds (relocated addresses, stack
//! sizes), e.g. `"55 8B EC ?? 6A FF"`.

use std::{fmt, str::FromStr};

use crate::{Error, Result};

/// A byte pattern in which individual positions may be wildcards.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Signature {
    pattern: Vec<Option<u8>>,
}

impl Signature {
    /// Parse a space-separated pattern of hex bytes and `??` wildcards.
    ///
    /// # Errors
    /// Returns [`Error::Config`] if a token is not a hex byte or wildcard, if the pattern is
    /// empty, or if it consists only of wildcards.
    pub fn parse(pattern: &str) -> Result<Self> {
        let mut parsed = Vec::new();
        for token in pattern.split_whitespace() {
            match token {
                "?" | "??" => parsed.push(None),
                byte if byte.len() == 2 => {
                    let value = u8::from_str_radix(byte, 16).map_err(|_| {
                        Error::Config(format!("Invalid signature byte '{byte}' in '{pattern}'"))
                    })?;
                    parsed.push(Some(value));
                }
                other => {
                    return Err(Error::Config(format!(
                        "Invalid signature token '{other}' in '{pattern}'"
                    )))
                }
            }
        }

        if parsed.is_empty() {
            return Err(Error::Config("Empty signature".to_string()));
        }

        if parsed.iter().all(Option::is_none) {
            return Err(Error::Config(format!(
                "Signature '{pattern}' consists only of wildcards"
            )));
        }

        Ok(Signature { pattern: parsed })
    }

    /// Number of bytes covered by the pattern
    #[must_use]
    pub fn len(&self) -> usize {
        self.pattern.len()
    }

    /// Always `false`, parsing refuses empty patterns
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.pattern.is_empty()
    }

    /// Returns `true` if the pattern matches `data` starting at `offset`
    #[must_use]
    pub fn matches_at(&self, data: &[u8], offset: usize) -> bool {
        let Some(end) = offset.checked_add(self.pattern.len()) else {
            return false;
        };
        let Some(window) = data.get(offset..end) else {
            return false;
        };

        self.matches(window)
    }

    /// Every offset in `data` where the pattern matches, in ascending order
    #[must_use]
    pub fn find_all(&self, data: &[u8]) -> Vec<usize> {
        data.windows(self.pattern.len())
            .enumerate()
            .filter(|(_, window)| self.matches(window))
            .map(|(offset, _)| offset)
            .collect()
    }

    fn matches(&self, window: &[u8]) -> bool {
        self.pattern
            .iter()
            .zip(window)
            .all(|(expected, actual)| expected.map_or(true, |byte| byte == *actual))
    }
}

impl FromStr for Signature {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Signature::parse(s)
    }
}

impl fmt::Display for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (index, byte) in self.pattern.iter().enumerate() {
            if index > 0 {
                f.write_str(" ")?;
            }
            match byte {
                Some(byte) => write!(f, "{byte:02X}")?,
                None => f.write_str("??")?,
            }
        }
        Ok(())
    }
}
