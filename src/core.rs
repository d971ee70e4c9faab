//! Wire-level primitives shared by the framer and the client state machine.

use std::fmt::{Display, Formatter};

use thiserror::Error;

/// Literal mode, i.e., sync or non-sync.
///
/// "In the case of literals transmitted from client to server, the client MUST wait to receive a
/// command continuation request (...) before sending the octet data (and the remainder of the
/// command)." ([RFC 3501](https://www.rfc-editor.org/rfc/rfc3501.html))
///
/// Non-synchronizing literals (`{3+}` and the length-bounded `{3-}` form) don't require the
/// continuation request. ([RFC 7888](https://www.rfc-editor.org/rfc/rfc7888.html))
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum LiteralMode {
    /// A synchronizing literal, e.g., `{3}\r\nfoo`.
    Sync,
    /// A non-synchronizing literal, e.g., `{3+}\r\nfoo`.
    NonSync,
}

/// A command tag.
///
/// "Each client command is prefixed with an identifier (typically a short alphanumeric string,
/// e.g., A0001, A0002, etc.) called a "tag". A different tag is generated by the client for each
/// command." ([RFC 3501](https://www.rfc-editor.org/rfc/rfc3501.html))
#[derive(Clone, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct Tag(String);

impl Tag {
    pub fn verify(value: impl AsRef<[u8]>) -> Result<(), TagError> {
        let value = value.as_ref();

        if value.is_empty() {
            return Err(TagError::Empty);
        }

        if let Some(position) = value.iter().position(|b| !is_tag_char(*b)) {
            return Err(TagError::ByteNotAllowed {
                found: value[position],
                position,
            });
        };

        Ok(())
    }

    pub fn inner(&self) -> &str {
        self.0.as_ref()
    }
}

impl TryFrom<&[u8]> for Tag {
    type Error = TagError;

    fn try_from(value: &[u8]) -> Result<Self, Self::Error> {
        Self::verify(value)?;

        // Safety: `unwrap` can't fail due to `verify`.
        Ok(Self(std::str::from_utf8(value).unwrap().to_owned()))
    }
}

impl TryFrom<Vec<u8>> for Tag {
    type Error = TagError;

    fn try_from(value: Vec<u8>) -> Result<Self, Self::Error> {
        Self::verify(&value)?;

        // Safety: `unwrap` can't fail due to `verify`.
        Ok(Self(String::from_utf8(value).unwrap()))
    }
}

impl TryFrom<&str> for Tag {
    type Error = TagError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        Self::verify(value)?;

        Ok(Self(value.to_owned()))
    }
}

impl TryFrom<String> for Tag {
    type Error = TagError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::verify(&value)?;

        Ok(Self(value))
    }
}

impl AsRef<str> for Tag {
    fn as_ref(&self) -> &str {
        self.0.as_ref()
    }
}

impl Display for Tag {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Clone, Copy, Debug, Eq, Error, Hash, PartialEq)]
pub enum TagError {
    #[error("Must not be empty")]
    Empty,
    #[error("Invalid byte b'\\x{found:02x}' at index {position}")]
    ByteNotAllowed { found: u8, position: usize },
}

/// `tag = 1*<any ASTRING-CHAR except "+">`
///
/// Spelled out: printable ASCII (no SP, no controls, no 8-bit) minus the specials that delimit
/// other productions -- `(` `)` `{` `%` `*` `"` `\` -- and minus `+`, which would make a tag
/// indistinguishable from a continuation request. `]` is fine, tags are astrings.
fn is_tag_char(byte: u8) -> bool {
    matches!(byte, 0x21..=0x7e)
        && !matches!(
            byte,
            b'(' | b')' | b'{' | b'%' | b'*' | b'"' | b'\\' | b'+'
        )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tag_validation() {
        assert!(Tag::try_from("A1").is_ok());
        assert!(Tag::try_from("abc123").is_ok());
        assert!(Tag::try_from("]").is_ok());

        assert_eq!(Tag::try_from(""), Err(TagError::Empty));
        assert_eq!(
            Tag::try_from("A+"),
            Err(TagError::ByteNotAllowed {
                found: b'+',
                position: 1
            })
        );
        assert_eq!(
            Tag::try_from("A 1"),
            Err(TagError::ByteNotAllowed {
                found: b' ',
                position: 1
            })
        );
        assert_eq!(
            Tag::try_from("A{1}"),
            Err(TagError::ByteNotAllowed {
                found: b'{',
                position: 1
            })
        );
    }

    #[test]
    fn tag_display_roundtrip() {
        let tag = Tag::try_from("A1337").unwrap();
        assert_eq!(tag.to_string(), "A1337");
        assert_eq!(tag.inner(), "A1337");
    }
}
