//! Directory entities

use crate::domain::shared::value_objects::PeerId;
use serde::{Deserialize, Serialize};

/// Another participant as announced by the directory
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Participant {
    pub id: PeerId,
    #[serde(rename = "name", default)]
    pub display_name: String,
}

impl Participant {
    pub fn new(id: PeerId, display_name: impl Into<String>) -> Self {
        Self {
            id,
            display_name: display_name.into(),
        }
    }

    /// Name to show, falling back to the id when the peer never set one
    pub fn label(&self) -> &str {
        if self.display_name.trim().is_empty() {
            self.id.as_str()
        } else {
            &self.display_name
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_label_falls_back_to_id() {
        let named = Participant::new(PeerId::new("p1"), "Alice");
        let anonymous = Participant::new(PeerId::new("p2"), "  ");

        assert_eq!(named.label(), "Alice");
        assert_eq!(anonymous.label(), "p2");
    }

    #[test]
    fn test_wire_shape() {
        let p: Participant = serde_json::from_str(r#"{"id":"p1","name":"Alice"}"#).unwrap();
        assert_eq!(p.id, PeerId::new("p1"));
        assert_eq!(p.display_name, "Alice");

        let unnamed: Participant = serde_json::from_str(r#"{"id":"p2"}"#).unwrap();
        assert_eq!(unnamed.label(), "p2");
    }
}
