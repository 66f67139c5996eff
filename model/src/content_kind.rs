use std::fmt::{Display, Write};

use serde::de::Error;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Content classes, in the order they appear in softmax vectors and in the
/// reference database `class` column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ContentKind {
    Advertisement,
    Speech,
    Music,
    Jingle,
}

impl ContentKind {
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Advertisement => "Advertisement",
            Self::Speech => "Speech",
            Self::Music => "Music",
            Self::Jingle => "Jingle",
        }
    }

    #[must_use]
    pub const fn index(&self) -> usize {
        match self {
            Self::Advertisement => 0,
            Self::Speech => 1,
            Self::Music => 2,
            Self::Jingle => 3,
        }
    }

    #[must_use]
    pub const fn from_index(index: usize) -> Option<Self> {
        match index {
            0 => Some(Self::Advertisement),
            1 => Some(Self::Speech),
            2 => Some(Self::Music),
            3 => Some(Self::Jingle),
            _ => None,
        }
    }
}

impl TryFrom<&str> for ContentKind {
    type Error = anyhow::Error;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        match value {
            "Advertisement" => Ok(Self::Advertisement),
            "Speech" => Ok(Self::Speech),
            "Music" => Ok(Self::Music),
            "Jingle" => Ok(Self::Jingle),
            _ => anyhow::bail!("Unknown content kind: {value}"),
        }
    }
}

impl Display for ContentKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if f.alternate() {
            f.write_str(self.name())
        } else {
            f.write_char(self.name().chars().next().unwrap())
        }
    }
}

/// A classification that may have failed the confidence gate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Sure(ContentKind),
    Unsure,
}

impl Verdict {
    #[must_use]
    pub const fn kind(&self) -> Option<ContentKind> {
        match self {
            Self::Sure(kind) => Some(*kind),
            Self::Unsure => None,
        }
    }

    #[must_use]
    pub const fn is_sure(&self) -> bool {
        matches!(self, Self::Sure(_))
    }
}

impl Display for Verdict {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Sure(kind) => kind.fmt(f),
            Self::Unsure => f.write_str("unsure"),
        }
    }
}

impl Serialize for Verdict {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Self::Sure(kind) => serializer.serialize_str(kind.name()),
            Self::Unsure => serializer.serialize_str("unsure"),
        }
    }
}

impl<'de> Deserialize<'de> for Verdict {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = String::deserialize(deserializer)?;
        if value == "unsure" {
            Ok(Self::Unsure)
        } else {
            ContentKind::try_from(value.as_str())
                .map(Self::Sure)
                .map_err(D::Error::custom)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_index_roundtrip() {
        for index in 0..4 {
            let kind = ContentKind::from_index(index).unwrap();
            assert_eq!(kind.index(), index);
        }
        assert!(ContentKind::from_index(4).is_none());
    }

    #[test]
    fn verdict_serializes_as_name_or_unsure() {
        assert_eq!(
            serde_json::to_string(&Verdict::Sure(ContentKind::Music)).unwrap(),
            r#""Music""#
        );
        assert_eq!(serde_json::to_string(&Verdict::Unsure).unwrap(), r#""unsure""#);
    }
}
