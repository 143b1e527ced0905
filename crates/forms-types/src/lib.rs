//! Validated primitives shared by the form engine crates.

/// Why a string is not a usable intent name.
#[derive(Debug, PartialEq, Eq, thiserror::Error)]
pub enum IntentNameError {
    #[error("intent name cannot be empty")]
    Empty,
    #[error("intent name '{0}' contains whitespace")]
    Whitespace(String),
}

/// Name of a form session intent, such as `HTS_RETROSPECTIVE` or the wildcard `*`.
///
/// Surrounding whitespace is trimmed; the remaining name must be a single non-empty token so it
/// can be compared against `availableIntents` and behaviour `intent` keys as-is.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IntentName(String);

impl IntentName {
    pub fn new(input: impl AsRef<str>) -> Result<Self, IntentNameError> {
        let trimmed = input.as_ref().trim();
        if trimmed.is_empty() {
            return Err(IntentNameError::Empty);
        }
        if trimmed.chars().any(char::is_whitespace) {
            return Err(IntentNameError::Whitespace(trimmed.to_owned()));
        }
        Ok(Self(trimmed.to_owned()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}
