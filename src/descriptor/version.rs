//! Descriptor versions: `major.minor.micro[.qualifier]`

use crate::error::{fail, DfiError, DfiResult};
use serde::de::{self, Deserializer, Visitor};
use serde::{Deserialize, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

const JSON_PREFIX: &str = "version<";
const JSON_SUFFIX: &str = ">";

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Version {
    pub major: u32,
    pub minor: u32,
    pub micro: u32,
    pub qualifier: Option<String>,
}

impl Version {
    pub fn new(major: u32, minor: u32, micro: u32) -> Self {
        Self {
            major,
            minor,
            micro,
            qualifier: None,
        }
    }

    pub fn with_qualifier(mut self, qualifier: impl Into<String>) -> Self {
        self.qualifier = Some(qualifier.into());
        self
    }

    /// A provider at `self` can serve a consumer built against `required`:
    /// same major version and not older
    pub fn is_compatible_with(&self, required: &Version) -> bool {
        self.major == required.major && self >= required
    }

    /// The `version<...>` literal used in JSON output
    pub fn to_json_literal(&self) -> String {
        format!("{}{}{}", JSON_PREFIX, self, JSON_SUFFIX)
    }

    pub fn from_json_literal(literal: &str) -> DfiResult<Self> {
        match literal
            .strip_prefix(JSON_PREFIX)
            .and_then(|rest| rest.strip_suffix(JSON_SUFFIX))
        {
            Some(inner) => inner.parse(),
            None => fail(DfiError::InvalidVersion {
                value: literal.to_string(),
                reason: "expected version<...> literal".to_string(),
            }),
        }
    }
}

impl FromStr for Version {
    type Err = DfiError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = |reason: &str| {
            fail(DfiError::InvalidVersion {
                value: s.to_string(),
                reason: reason.to_string(),
            })
        };

        let mut parts = s.splitn(4, '.');
        let mut numbers = [0u32; 3];
        for (slot, label) in numbers.iter_mut().zip(["major", "minor", "micro"]) {
            let part = match parts.next() {
                Some(part) if !part.is_empty() => part,
                _ => return invalid(&format!("missing {} component", label)),
            };
            if !part.bytes().all(|b| b.is_ascii_digit()) {
                return invalid(&format!("{} component is not a number", label));
            }
            *slot = match part.parse() {
                Ok(number) => number,
                Err(_) => return invalid(&format!("{} component out of range", label)),
            };
        }

        let qualifier = match parts.next() {
            None => None,
            Some(q) if !q.is_empty() && q.chars().all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-') => {
                Some(q.to_string())
            }
            Some(_) => return invalid("invalid qualifier"),
        };

        Ok(Version {
            major: numbers[0],
            minor: numbers[1],
            micro: numbers[2],
            qualifier,
        })
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.micro)?;
        if let Some(qualifier) = &self.qualifier {
            write!(f, ".{}", qualifier)?;
        }
        Ok(())
    }
}

impl Serialize for Version {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_json_literal())
    }
}

struct VersionVisitor;

impl Visitor<'_> for VersionVisitor {
    type Value = Version;

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("a version<major.minor.micro[.qualifier]> literal")
    }

    fn visit_str<E: de::Error>(self, v: &str) -> Result<Version, E> {
        Version::from_json_literal(v).map_err(E::custom)
    }
}

impl<'de> Deserialize<'de> for Version {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        deserializer.deserialize_str(VersionVisitor)
    }
}
