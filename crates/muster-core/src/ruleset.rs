//! Loading and evaluating the ordered rule set.

use std::collections::{BTreeMap, BTreeSet};

use tracing::debug;
use uuid::Uuid;

use crate::{
  Error, Result,
  field::FieldValueMap,
  rule::Rule,
  store::{FieldCatalog, RuleStore},
};

/// The ordered, currently-active rule set: persisted rows joined against the
/// field catalog, minus rules whose target group is not managed.
///
/// Never cached across calls — the filter is recomputed on every load, so
/// re-managing a group reactivates its rules without touching the rows.
#[derive(Debug, Clone, Default)]
pub struct RuleSet {
  rules:     Vec<Rule>,
  field_ids: Vec<Uuid>,
}

impl RuleSet {
  /// Load the active rule set. Rows whose field vanished from the catalog
  /// or whose tags do not decode are skipped (the tolerant path); rows
  /// whose target group is not in `managed` are inert and skipped too.
  pub async fn load<F, R>(
    catalog: &F,
    rules: &R,
    managed: &BTreeSet<Uuid>,
  ) -> Result<Self>
  where
    F: FieldCatalog,
    R: RuleStore,
  {
    let fields = catalog.list_fields().await.map_err(Error::store)?;
    let kind_tags: BTreeMap<Uuid, &str> =
      fields.iter().map(|f| (f.field_id, f.kind_tag.as_str())).collect();

    let mut out = Self::default();
    for row in rules.list_rule_rows().await.map_err(Error::store)? {
      let Some(kind_tag) = kind_tags.get(&row.field_id) else {
        debug!(rule_id = %row.rule_id, field_id = %row.field_id,
               "skipping rule: field not in catalog");
        continue;
      };
      let Some(rule) = Rule::try_from_row(&row, kind_tag) else {
        debug!(rule_id = %row.rule_id, "skipping rule: unsupported kind or mode");
        continue;
      };
      if !managed.contains(&rule.group_id) {
        debug!(rule_id = %row.rule_id, group_id = %rule.group_id,
               "skipping rule: target group not managed");
        continue;
      }
      if !out.field_ids.contains(&rule.field_id) {
        out.field_ids.push(rule.field_id);
      }
      out.rules.push(rule);
    }
    Ok(out)
  }

  /// The surviving rules, in ascending sort order.
  pub fn rules(&self) -> &[Rule] { &self.rules }

  /// Distinct field ids referenced by the active rules, in first-reference
  /// order. Drives the bulk value fetches.
  pub fn field_ids(&self) -> &[Uuid] { &self.field_ids }

  pub fn is_empty(&self) -> bool { self.rules.is_empty() }

  /// The target group of the earliest matching rule, if any.
  pub fn resolve_first(&self, values: &FieldValueMap) -> Option<Uuid> {
    self.rules.iter().find_map(|r| r.matches(values))
  }

  /// The deduplicated target groups of every matching rule.
  pub fn resolve_all(&self, values: &FieldValueMap) -> BTreeSet<Uuid> {
    self.rules.iter().filter_map(|r| r.matches(values)).collect()
  }
}
