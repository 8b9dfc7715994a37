//! Buyer email address type.

use core::fmt;

use serde::{Deserialize, Serialize};

/// Errors that can occur when parsing an [`Email`].
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum EmailError {
    /// The input is empty after trimming.
    #[error("email cannot be empty")]
    Empty,
    /// The input is too long.
    #[error("email must be at most {max} characters")]
    TooLong {
        /// Maximum allowed length.
        max: usize,
    },
    /// The input does not contain an @ symbol.
    #[error("email must contain an @ symbol")]
    MissingAtSymbol,
    /// The input contains more than one @ symbol.
    #[error("email must contain exactly one @ symbol")]
    MultipleAtSymbols,
    /// The input contains whitespace between its characters.
    #[error("email cannot contain whitespace")]
    ContainsWhitespace,
    /// The local part (before @) is empty.
    #[error("email local part cannot be empty")]
    EmptyLocalPart,
    /// The domain part (after @) is empty.
    #[error("email domain cannot be empty")]
    EmptyDomain,
}

/// An email address as typed into the checkout or sign-up form.
///
/// Surrounding whitespace is trimmed and the domain is lowercased; the local
/// part is kept as entered.
///
/// ## Examples
///
/// ```
/// use bioapp_core::Email;
///
/// let email = Email::parse("  Ana@Example.MX ").unwrap();
/// assert_eq!(email.as_str(), "Ana@example.mx");
///
/// assert!(Email::parse("").is_err());
/// assert!(Email::parse("a@b@c").is_err());
/// assert!(Email::parse("@bioapp.mx").is_err());
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(try_from = "String", into = "String")]
pub struct Email(String);

impl Email {
    /// Maximum length of an email address (RFC 5321).
    pub const MAX_LENGTH: usize = 254;

    /// Parse an `Email` from user input.
    ///
    /// # Errors
    ///
    /// Returns an error if the trimmed input is empty, longer than 254
    /// characters, contains whitespace, does not contain exactly one `@`, or
    /// has an empty local part or domain.
    pub fn parse(s: &str) -> Result<Self, EmailError> {
        let s = s.trim();
        if s.is_empty() {
            return Err(EmailError::Empty);
        }

        if s.len() > Self::MAX_LENGTH {
            return Err(EmailError::TooLong {
                max: Self::MAX_LENGTH,
            });
        }

        if s.chars().any(char::is_whitespace) {
            return Err(EmailError::ContainsWhitespace);
        }

        let (local, domain) = s.split_once('@').ok_or(EmailError::MissingAtSymbol)?;
        if domain.contains('@') {
            return Err(EmailError::MultipleAtSymbols);
        }
        if local.is_empty() {
            return Err(EmailError::EmptyLocalPart);
        }
        if domain.is_empty() {
            return Err(EmailError::EmptyDomain);
        }

        Ok(Self(format!("{local}@{}", domain.to_ascii_lowercase())))
    }

    /// Returns the email address as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns the local part of the email (before the @).
    #[must_use]
    pub fn local_part(&self) -> &str {
        self.0.split_once('@').map_or("", |(local, _)| local)
    }

    /// Returns the domain part of the email (after the @).
    #[must_use]
    pub fn domain(&self) -> &str {
        self.0.split_once('@').map_or("", |(_, domain)| domain)
    }
}

impl fmt::Display for Email {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::str::FromStr for Email {
    type Err = EmailError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for Email {
    type Error = EmailError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<Email> for String {
    fn from(email: Email) -> Self {
        email.0
    }
}

impl AsRef<str> for Email {
    fn as_ref(&self) -> &str {
        &self.0
    }
}
