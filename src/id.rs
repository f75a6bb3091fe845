use std::{borrow::Borrow, fmt, ops::Deref, str::FromStr};

use non_empty_string::NonEmptyString;
use serde::{Deserialize, Serialize};

/// A validated identifier for nodes, registers, fields, pins, packages and
/// functions.
///
/// The first character must be an ASCII letter or `_`, the remaining
/// characters ASCII alphanumerics or `_`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Id(NonEmptyString);

impl Id {
    /// Creates a new `Id` from a string.
    ///
    /// # Errors
    ///
    /// Returns [`InvalidIdError`] if the string is empty or is not a valid
    /// identifier.
    pub fn new(s: String) -> Result<Self, InvalidIdError> {
        let non_empty = NonEmptyString::new(s.clone()).map_err(|_| InvalidIdError(s.clone()))?;

        let mut chars = s.chars();
        let head_ok = chars
            .next()
            .is_some_and(|c| c.is_ascii_alphabetic() || c == '_');
        if !head_ok || !chars.all(|c| c.is_ascii_alphanumeric() || c == '_') {
            return Err(InvalidIdError(s));
        }

        Ok(Self(non_empty))
    }

    /// Returns the string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }
}

impl TryFrom<String> for Id {
    type Error = InvalidIdError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl TryFrom<&str> for Id {
    type Error = InvalidIdError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        Self::new(value.to_string())
    }
}

impl From<Id> for String {
    fn from(id: Id) -> Self {
        id.as_str().to_string()
    }
}

impl AsRef<str> for Id {
    fn as_ref(&self) -> &str {
        self.0.as_str()
    }
}

impl Borrow<str> for Id {
    fn borrow(&self) -> &str {
        self.0.as_str()
    }
}

impl Deref for Id {
    type Target = str;

    fn deref(&self) -> &Self::Target {
        self.0.as_str()
    }
}

impl fmt::Display for Id {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for Id {
    type Err = InvalidIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s.to_string())
    }
}

/// Error returned when a string is not a valid identifier.
#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
#[error(
    "Invalid identifier '{0}': must start with a letter or '_' and contain only letters, digits \
     or '_'"
)]
pub struct InvalidIdError(String);

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use test_case::test_case;

    use super::*;

    #[test_case("tdi"; "lowercase")]
    #[test_case("PORTA"; "uppercase")]
    #[test_case("_reserved"; "leading underscore")]
    #[test_case("reg1_ctrl"; "digits and underscore")]
    fn accepts_valid_identifiers(s: &str) {
        assert_eq!(Id::try_from(s).unwrap().as_str(), s);
    }

    #[test_case(""; "empty")]
    #[test_case("1abc"; "leading digit")]
    #[test_case("a-b"; "dash")]
    #[test_case("a b"; "space")]
    fn rejects_invalid_identifiers(s: &str) {
        assert_eq!(Id::try_from(s), Err(InvalidIdError(s.to_string())));
    }

    #[test]
    fn map_keyed_by_id_can_be_queried_by_str() {
        let mut map = BTreeMap::new();
        map.insert(Id::try_from("pin1").unwrap(), 7);
        assert_eq!(map.get("pin1"), Some(&7));
        assert_eq!(map.get("pin2"), None);
    }

    #[test]
    fn serde_round_trips_through_string() {
        #[derive(Debug, Serialize, Deserialize, PartialEq)]
        struct Wrapper {
            id: Id,
        }

        let parsed: Wrapper = toml::from_str("id = \"ahb\"").unwrap();
        assert_eq!(parsed.id.as_str(), "ahb");

        let err = toml::from_str::<Wrapper>("id = \"9x\"");
        assert!(err.is_err());
    }
}
