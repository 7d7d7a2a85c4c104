//! Field matchers — does a raw stored value satisfy a rule's criterion?
//!
//! One variant per supported field kind. The variant doubles as the rule's
//! data-kind dispatch: a rule over a checkbox field carries a
//! [`FieldMatcher::Checkbox`], and so on. Matching is side-effect-free.

use serde::{Deserialize, Serialize};

use crate::{Error, Result, field::FieldKind};

// ─── MatchMode ───────────────────────────────────────────────────────────────

/// How a text criterion is compared. Only meaningful for text fields;
/// checkbox and menu rules persist the default mode and ignore it.
#[derive(
  Debug,
  Clone,
  Copy,
  PartialEq,
  Eq,
  Default,
  Serialize,
  Deserialize,
  strum::Display,
  strum::EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum MatchMode {
  /// Case-insensitive full-string equality after trimming both sides.
  #[default]
  Exact,
  /// Case-insensitive substring test.
  Contains,
}

impl MatchMode {
  pub fn from_tag(tag: &str) -> Option<Self> { tag.parse().ok() }

  pub fn from_tag_strict(tag: &str) -> Result<Self> {
    tag.parse().map_err(|_| Error::UnknownMatchMode(tag.to_owned()))
  }
}

// ─── FieldMatcher ────────────────────────────────────────────────────────────

/// A rule's configured criterion, specialised per field kind.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum FieldMatcher {
  /// Raw value coerced to 0/1; matches on exact equality with `expected`.
  Checkbox { expected: bool },
  /// Byte-for-byte equality with the configured option string.
  Menu { option: String },
  /// Case-insensitive text comparison, per [`MatchMode`].
  Text { mode: MatchMode, pattern: String },
}

impl FieldMatcher {
  // ── Construction ──────────────────────────────────────────────────────────

  /// Assemble the matcher for a known kind. The criterion string is
  /// interpreted per kind: `"1"`-coercion for checkboxes, verbatim text
  /// otherwise.
  pub fn build(kind: FieldKind, mode: MatchMode, value: &str) -> Self {
    match kind {
      FieldKind::Checkbox => Self::Checkbox { expected: coerce_bool(value) },
      FieldKind::Menu => Self::Menu { option: value.to_owned() },
      FieldKind::Text => Self::Text { mode, pattern: value.to_owned() },
    }
  }

  /// Strict factory from raw persisted tags; an unrecognized kind or mode
  /// tag is a configuration error.
  pub fn from_parts(
    kind_tag: &str,
    mode_tag: &str,
    value: &str,
  ) -> Result<Self> {
    let kind = FieldKind::from_tag_strict(kind_tag)?;
    let mode = MatchMode::from_tag_strict(mode_tag)?;
    Ok(Self::build(kind, mode, value))
  }

  /// Tolerant factory: `None` when either tag is unrecognized. Used when
  /// scanning rows against a catalog that may contain unsupported kinds.
  pub fn try_from_parts(
    kind_tag: &str,
    mode_tag: &str,
    value: &str,
  ) -> Option<Self> {
    let kind = FieldKind::from_tag(kind_tag)?;
    let mode = MatchMode::from_tag(mode_tag)?;
    Some(Self::build(kind, mode, value))
  }

  // ── Persisted shape ───────────────────────────────────────────────────────

  pub fn kind(&self) -> FieldKind {
    match self {
      Self::Checkbox { .. } => FieldKind::Checkbox,
      Self::Menu { .. } => FieldKind::Menu,
      Self::Text { .. } => FieldKind::Text,
    }
  }

  /// The mode stored in the `match_mode` column.
  pub fn mode(&self) -> MatchMode {
    match self {
      Self::Text { mode, .. } => *mode,
      _ => MatchMode::default(),
    }
  }

  /// The criterion stored in the `match_value` column.
  pub fn value_text(&self) -> String {
    match self {
      Self::Checkbox { expected } => {
        if *expected { "1" } else { "0" }.to_owned()
      }
      Self::Menu { option } => option.clone(),
      Self::Text { pattern, .. } => pattern.clone(),
    }
  }

  // ── Evaluation ────────────────────────────────────────────────────────────

  /// Whether `raw` satisfies this matcher's criterion.
  ///
  /// Empty or whitespace-only text values never match, so an unset field
  /// cannot match an empty criterion.
  pub fn matches(&self, raw: &str) -> bool {
    match self {
      Self::Checkbox { expected } => coerce_bool(raw) == *expected,
      Self::Menu { option } => raw == option,
      Self::Text { mode, pattern } => {
        if raw.trim().is_empty() {
          return false;
        }
        match mode {
          MatchMode::Exact => {
            raw.trim().to_lowercase() == pattern.trim().to_lowercase()
          }
          MatchMode::Contains => {
            raw.to_lowercase().contains(&pattern.to_lowercase())
          }
        }
      }
    }
  }
}

/// `"1"` is 1; anything else, including an unset (empty) value, is 0.
fn coerce_bool(raw: &str) -> bool { raw.trim() == "1" }
