//! Memory deltas: structured create, update, resolve and abandon operations.
//!
//! Deltas are proposed by the refiner and applied only by
//! [`MemoryStore::apply_batch`](crate::store::MemoryStore::apply_batch).

use serde::{Deserialize, Serialize};

use crate::error::{MemoryError, Result};
use crate::types::{PlotStatus, RecordRef};

/// Which record family a delta targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeltaKind {
    /// A character record.
    Character,
    /// A plot point record.
    Plot,
}

/// The operation a delta performs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeltaOp {
    /// Create a new record.
    Create,
    /// Change fields of (or record a new state for) an existing record.
    Update,
    /// Mark a plot point resolved.
    Resolve,
    /// Mark a plot point abandoned.
    Abandon,
}

/// Free-form fields carried by a delta.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DeltaFields {
    /// Character name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Character or plot description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// New character state.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<String>,
    /// Names of characters involved in a plot thread.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub characters: Vec<String>,
}

/// A proposed change to the memory store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryDelta {
    /// Target family.
    pub kind: DeltaKind,
    /// Operation.
    pub op: DeltaOp,
    /// Target id; absent for creates.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<u64>,
    /// Operation payload.
    #[serde(default)]
    pub fields: DeltaFields,
}

impl MemoryDelta {
    /// A character create.
    #[must_use]
    pub fn create_character(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            kind: DeltaKind::Character,
            op: DeltaOp::Create,
            id: None,
            fields: DeltaFields {
                name: Some(name.into()),
                description: Some(description.into()),
                ..DeltaFields::default()
            },
        }
    }

    /// A character state update.
    #[must_use]
    pub fn update_character(id: u64, state: impl Into<String>) -> Self {
        Self {
            kind: DeltaKind::Character,
            op: DeltaOp::Update,
            id: Some(id),
            fields: DeltaFields {
                state: Some(state.into()),
                ..DeltaFields::default()
            },
        }
    }

    /// A plot create.
    #[must_use]
    pub fn create_plot(description: impl Into<String>) -> Self {
        Self {
            kind: DeltaKind::Plot,
            op: DeltaOp::Create,
            id: None,
            fields: DeltaFields {
                description: Some(description.into()),
                ..DeltaFields::default()
            },
        }
    }

    /// A plot resolve.
    #[must_use]
    pub fn resolve_plot(id: u64) -> Self {
        Self {
            kind: DeltaKind::Plot,
            op: DeltaOp::Resolve,
            id: Some(id),
            fields: DeltaFields::default(),
        }
    }

    /// A plot abandon.
    #[must_use]
    pub fn abandon_plot(id: u64) -> Self {
        Self {
            kind: DeltaKind::Plot,
            op: DeltaOp::Abandon,
            id: Some(id),
            fields: DeltaFields::default(),
        }
    }

    /// Status a plot delta moves its target to, if any.
    #[must_use]
    pub fn target_status(&self) -> Option<PlotStatus> {
        match (self.kind, self.op) {
            (DeltaKind::Plot, DeltaOp::Resolve) => Some(PlotStatus::Resolved),
            (DeltaKind::Plot, DeltaOp::Abandon) => Some(PlotStatus::Abandoned),
            _ => None,
        }
    }

    /// Check the delta's shape without looking at the store.
    ///
    /// # Errors
    ///
    /// Returns [`MemoryError::InvalidRecord`] when a required id or field is
    /// missing, or when a character is resolved/abandoned.
    pub fn validate_shape(&self) -> Result<()> {
        match (self.kind, self.op) {
            (DeltaKind::Character, DeltaOp::Resolve | DeltaOp::Abandon) => Err(
                MemoryError::InvalidRecord(format!("characters cannot be {:?}d", self.op).to_lowercase()),
            ),
            (DeltaKind::Character, DeltaOp::Create) if is_blank(self.fields.name.as_deref()) => {
                Err(MemoryError::InvalidRecord("character create requires a name".into()))
            }
            (DeltaKind::Plot, DeltaOp::Create) if is_blank(self.fields.description.as_deref()) => {
                Err(MemoryError::InvalidRecord("plot create requires a description".into()))
            }
            (DeltaKind::Plot, DeltaOp::Update | DeltaOp::Resolve | DeltaOp::Abandon)
                if self.id.is_none() =>
            {
                Err(MemoryError::InvalidRecord(format!(
                    "plot {:?} requires an id",
                    self.op
                )))
            }
            (DeltaKind::Character, DeltaOp::Update)
                if self.id.is_none() && is_blank(self.fields.name.as_deref()) =>
            {
                Err(MemoryError::InvalidRecord(
                    "character update requires an id or a name".into(),
                ))
            }
            _ => Ok(()),
        }
    }
}

fn is_blank(value: Option<&str>) -> bool {
    value.is_none_or(|v| v.trim().is_empty())
}

/// A delta as it was committed, with the record it touched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppliedDelta {
    /// The delta, with `id` filled in for creates.
    pub delta: MemoryDelta,
    /// The record that was written.
    pub record: RecordRef,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_extraction_shape() {
        let json = r#"{"kind":"plot","op":"resolve","id":4,"fields":{}}"#;
        let delta: MemoryDelta = serde_json::from_str(json).expect("parse");
        assert_eq!(delta, MemoryDelta::resolve_plot(4));
        assert_eq!(delta.target_status(), Some(PlotStatus::Resolved));
    }

    #[test]
    fn unknown_op_is_a_parse_failure() {
        let json = r#"{"kind":"plot","op":"explode","id":4}"#;
        assert!(serde_json::from_str::<MemoryDelta>(json).is_err());
    }

    #[test]
    fn shape_validation_rejects_bad_deltas() {
        let mut resolve_character = MemoryDelta::resolve_plot(1);
        resolve_character.kind = DeltaKind::Character;
        assert!(resolve_character.validate_shape().is_err());

        let mut anonymous = MemoryDelta::create_character("", "nobody");
        assert!(anonymous.validate_shape().is_err());
        anonymous.fields.name = Some("Mara".into());
        assert!(anonymous.validate_shape().is_ok());

        let mut unanchored = MemoryDelta::resolve_plot(1);
        unanchored.id = None;
        assert!(unanchored.validate_shape().is_err());
    }
}
