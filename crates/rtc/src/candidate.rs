//! ICE candidates exchanged during signaling.

use std::fmt;

use serde::{Deserialize, Serialize};

/// An immutable ICE candidate line and the media id it belongs to.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Candidate {
    candidate: String,
    mid: String,
}

impl Candidate {
    pub fn new(candidate: impl Into<String>, mid: impl Into<String>) -> Self {
        Self {
            candidate: candidate.into(),
            mid: mid.into(),
        }
    }

    /// The candidate line, without the `a=` prefix.
    pub fn candidate(&self) -> &str {
        &self.candidate
    }

    pub fn mid(&self) -> &str {
        &self.mid
    }
}

/// Formats the candidate as an SDP attribute line.
impl fmt::Display for Candidate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "a={}", self.candidate)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_accessors() {
        let candidate = Candidate::new("candidate:1 1 UDP 2122252543 10.0.0.1 5000 typ host", "0");
        assert_eq!(candidate.mid(), "0");
        assert!(candidate.candidate().starts_with("candidate:1"));
    }

    #[test]
    fn test_display_adds_attribute_prefix() {
        let candidate = Candidate::new("candidate:1 1 UDP 1 127.0.0.1 9 typ host", "data");
        assert_eq!(
            candidate.to_string(),
            "a=candidate:1 1 UDP 1 127.0.0.1 9 typ host"
        );
    }

    #[test]
    fn test_json_shape() {
        let candidate = Candidate::new("candidate:x", "0");
        let json = serde_json::to_value(&candidate).unwrap();
        assert_eq!(json["candidate"], "candidate:x");
        assert_eq!(json["mid"], "0");
    }
}
