//! Session descriptions exchanged during signaling.

use std::fmt;

use serde::{Deserialize, Serialize};

/// The role of a session description in offer/answer negotiation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum DescriptionType {
    #[default]
    Unspec,
    Offer,
    Answer,
    Pranswer,
    Rollback,
}

impl DescriptionType {
    /// The type string used on the wire.
    pub fn as_str(&self) -> &'static str {
        match self {
            DescriptionType::Unspec => "unspec",
            DescriptionType::Offer => "offer",
            DescriptionType::Answer => "answer",
            DescriptionType::Pranswer => "pranswer",
            DescriptionType::Rollback => "rollback",
        }
    }

    /// Parses a type string. Unrecognized strings map to `Unspec`.
    pub fn from_type_string(value: &str) -> Self {
        match value {
            "offer" => DescriptionType::Offer,
            "answer" => DescriptionType::Answer,
            "pranswer" => DescriptionType::Pranswer,
            "rollback" => DescriptionType::Rollback,
            _ => DescriptionType::Unspec,
        }
    }
}

impl fmt::Display for DescriptionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An immutable SDP blob and its type.
///
/// The SDP is opaque to this crate. The type is kept exactly as given, so a
/// description built from an unknown type string forwards that string
/// unchanged while [`Description::description_type`] reports `Unspec`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Description {
    sdp: String,
    #[serde(rename = "type")]
    kind: String,
}

impl Description {
    /// Creates a description of a known type.
    pub fn new(sdp: impl Into<String>, kind: DescriptionType) -> Self {
        Self {
            sdp: sdp.into(),
            kind: kind.as_str().to_string(),
        }
    }

    /// Creates a description from a free-form type string.
    pub fn with_type_string(sdp: impl Into<String>, kind: impl Into<String>) -> Self {
        Self {
            sdp: sdp.into(),
            kind: kind.into(),
        }
    }

    pub fn sdp(&self) -> &str {
        &self.sdp
    }

    pub fn description_type(&self) -> DescriptionType {
        DescriptionType::from_type_string(&self.kind)
    }

    /// The type string as given at construction.
    pub fn type_string(&self) -> &str {
        &self.kind
    }
}

impl fmt::Display for Description {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.sdp)
    }
}
