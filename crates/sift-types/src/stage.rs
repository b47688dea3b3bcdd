//! Publication stage of indexed content.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::SiftError;

/// Publication stage a document was indexed under.
///
/// Versioned content is indexed once per stage. Unversioned content has a
/// single document that carries every viewing label, so it matches queries
/// run under either stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    Draft,
    Live,
    Unversioned,
}

impl Stage {
    /// Label used in the document identity and the stage field.
    pub fn label(&self) -> &'static str {
        match self {
            Stage::Draft => "Stage",
            Stage::Live => "Live",
            Stage::Unversioned => "Unversioned",
        }
    }

    /// Labels written to the stage field of a document in this stage.
    pub fn index_labels(&self) -> &'static [&'static str] {
        match self {
            Stage::Draft => &["Stage"],
            Stage::Live => &["Live"],
            Stage::Unversioned => &["Live", "Stage"],
        }
    }

    /// Label a query must match when viewing content in this stage.
    ///
    /// Unversioned is not a viewing context; it reads as Live.
    pub fn viewing_label(&self) -> &'static str {
        match self {
            Stage::Draft => "Stage",
            Stage::Live | Stage::Unversioned => "Live",
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Draft => "draft",
            Stage::Live => "live",
            Stage::Unversioned => "unversioned",
        }
    }

    /// Parse an identity suffix back into a stage.
    pub fn from_label(label: &str) -> Option<Stage> {
        match label {
            "Stage" => Some(Stage::Draft),
            "Live" => Some(Stage::Live),
            "Unversioned" => Some(Stage::Unversioned),
            _ => None,
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for Stage {
    type Err = SiftError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "draft" | "stage" => Ok(Stage::Draft),
            "live" => Ok(Stage::Live),
            "unversioned" => Ok(Stage::Unversioned),
            other => Err(SiftError::InvalidInput(format!("unknown stage: {other}"))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_labels() {
        assert_eq!(Stage::Draft.label(), "Stage");
        assert_eq!(Stage::Live.label(), "Live");
        assert_eq!(Stage::Unversioned.index_labels(), &["Live", "Stage"]);
    }

    #[test]
    fn test_label_round_trip() {
        for stage in [Stage::Draft, Stage::Live, Stage::Unversioned] {
            assert_eq!(Stage::from_label(stage.label()), Some(stage));
        }
        assert_eq!(Stage::from_label(""), None);
    }

    #[test]
    fn test_unversioned_views_as_live() {
        assert_eq!(Stage::Unversioned.viewing_label(), "Live");
        assert_eq!(Stage::Draft.viewing_label(), "Stage");
    }

    #[test]
    fn test_from_str() {
        assert_eq!("Draft".parse::<Stage>().unwrap(), Stage::Draft);
        assert_eq!("stage".parse::<Stage>().unwrap(), Stage::Draft);
        assert_eq!("LIVE".parse::<Stage>().unwrap(), Stage::Live);
        assert!("published".parse::<Stage>().is_err());
    }
}
