//! Encoding and decoding helpers between Rust domain types and the
//! plain-text representations stored in SQLite columns.
//!
//! UUIDs are stored as hyphenated lowercase strings; timestamps as RFC 3339.

use chrono::{DateTime, Utc};
use muster_core::rule::RuleRow;
use uuid::Uuid;

use crate::Result;

// ─── Uuid ────────────────────────────────────────────────────────────────────

pub fn encode_uuid(id: Uuid) -> String { id.hyphenated().to_string() }

pub fn decode_uuid(s: &str) -> Result<Uuid> { Ok(Uuid::parse_str(s)?) }

// ─── DateTime<Utc> ───────────────────────────────────────────────────────────

pub fn encode_dt(dt: DateTime<Utc>) -> String { dt.to_rfc3339() }

// ─── bool ────────────────────────────────────────────────────────────────────

pub fn encode_bool(b: bool) -> i64 { i64::from(b) }

// ─── Row types ───────────────────────────────────────────────────────────────

/// Raw strings read directly from a `rules` row.
pub struct RawRuleRow {
  pub rule_id:     String,
  pub field_id:    String,
  pub match_mode:  String,
  pub match_value: String,
  pub group_id:    String,
  pub sort_order:  i64,
}

impl RawRuleRow {
  pub fn into_row(self) -> Result<RuleRow> {
    Ok(RuleRow {
      rule_id:     decode_uuid(&self.rule_id)?,
      field_id:    decode_uuid(&self.field_id)?,
      match_mode:  self.match_mode,
      match_value: self.match_value,
      group_id:    decode_uuid(&self.group_id)?,
      sort_order:  self.sort_order,
    })
  }
}
