//! Form identifiers.
//!
//! Forms are fetched either by uuid or by name. The distinction matters to the fetch
//! collaborator, which queries different endpoints for each.

use crate::{OpenmrsError, OpenmrsResult};
use std::fmt;

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum FormIdentifier {
    Uuid(uuid::Uuid),
    Name(String),
}

impl FormIdentifier {
    /// Classify an identifier string.
    ///
    /// Anything that parses as a UUID is a uuid; any other non-blank string is a name.
    pub fn parse(input: &str) -> OpenmrsResult<Self> {
        let trimmed = input.trim();
        if trimmed.is_empty() {
            return Err(OpenmrsError::InvalidInput(
                "form identifier cannot be empty".into(),
            ));
        }
        match uuid::Uuid::parse_str(trimmed) {
            Ok(uuid) => Ok(FormIdentifier::Uuid(uuid)),
            Err(_) => Ok(FormIdentifier::Name(trimmed.to_string())),
        }
    }

    pub fn is_uuid(&self) -> bool {
        matches!(self, FormIdentifier::Uuid(_))
    }
}

impl fmt::Display for FormIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FormIdentifier::Uuid(uuid) => write!(f, "{}", uuid.hyphenated()),
            FormIdentifier::Name(name) => f.write_str(name),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_uuid_and_name() {
        let by_uuid = FormIdentifier::parse("a4f91c6d-3b2e-4c5f-9d7a-1e8b6c0a9f12").expect("uuid");
        let by_name = FormIdentifier::parse(" HTS POC ").expect("name");

        assert!(by_uuid.is_uuid());
        assert_eq!(by_uuid.to_string(), "a4f91c6d-3b2e-4c5f-9d7a-1e8b6c0a9f12");
        assert_eq!(by_name, FormIdentifier::Name("HTS POC".into()));
    }

    #[test]
    fn rejects_blank_identifier() {
        assert!(matches!(FormIdentifier::parse("  "), Err(OpenmrsError::InvalidInput(_))));
    }
}
