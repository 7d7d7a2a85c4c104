//! Profile-field catalog types.
//!
//! Fields are owned by an external catalog; the engine consumes only the
//! field id and its data-kind tag. The catalog may contain kinds this engine
//! does not evaluate (dates, textareas, ...), which is why [`FieldDef`]
//! carries the raw tag and decoding it is a separate, possibly tolerant step.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{Error, Result};

// ─── FieldKind ───────────────────────────────────────────────────────────────

/// The field data kinds the engine can evaluate.
#[derive(
  Debug,
  Clone,
  Copy,
  PartialEq,
  Eq,
  Serialize,
  Deserialize,
  strum::Display,
  strum::EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum FieldKind {
  /// Stored as `"1"` / `"0"`.
  Checkbox,
  /// One option out of a fixed set; stored as the option string.
  Menu,
  /// Free text.
  Text,
}

impl FieldKind {
  /// Tolerant decode: `None` for tags this engine does not evaluate.
  /// Catalog scans use this to skip unsupported fields silently.
  pub fn from_tag(tag: &str) -> Option<Self> { tag.parse().ok() }

  /// Strict decode: an unrecognized tag is a configuration error. Used when
  /// a specific persisted rule must be loaded unambiguously.
  pub fn from_tag_strict(tag: &str) -> Result<Self> {
    tag.parse().map_err(|_| Error::UnknownFieldKind(tag.to_owned()))
  }
}

// ─── FieldDef ────────────────────────────────────────────────────────────────

/// A catalog entry as reported by [`crate::store::FieldCatalog`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FieldDef {
  pub field_id: Uuid,
  pub name:     String,
  /// Raw data-kind tag; decode with [`FieldKind::from_tag`].
  pub kind_tag: String,
}

// ─── Values ──────────────────────────────────────────────────────────────────

/// One user's stored field values, keyed by field id. Values are raw strings;
/// their semantics belong to the matcher for the field's kind. Unset fields
/// are absent from the map.
pub type FieldValueMap = BTreeMap<Uuid, String>;
