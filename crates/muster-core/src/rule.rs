//! Rules — the central entity: an ordered mapping from a profile field and
//! criterion to a target group.
//!
//! A rule owns the persistence of its own row and self-selects its row out
//! of a batch form submission. Evaluation is side-effect-free.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing::debug;
use uuid::Uuid;

use crate::{
  Error, Result,
  field::{FieldKind, FieldValueMap},
  matcher::{FieldMatcher, MatchMode},
  store::{FieldCatalog, RuleStore},
};

// ─── Persisted shape ─────────────────────────────────────────────────────────

/// A rule as persisted by [`RuleStore`]. The field's data kind is not
/// stored; it is re-joined from the catalog on every load, so a field
/// changing kind (or vanishing) inactivates its rules instead of corrupting
/// them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuleRow {
  pub rule_id:     Uuid,
  pub field_id:    Uuid,
  pub match_mode:  String,
  pub match_value: String,
  pub group_id:    Uuid,
  pub sort_order:  i64,
}

// ─── Rule ────────────────────────────────────────────────────────────────────

/// One field-matching rule: assigns `group_id` when the matcher accepts the
/// value stored for `field_id`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rule {
  /// `None` until first persisted.
  pub rule_id:    Option<Uuid>,
  pub field_id:   Uuid,
  pub matcher:    FieldMatcher,
  pub group_id:   Uuid,
  pub sort_order: i64,
}

impl Rule {
  pub fn new(
    field_id: Uuid,
    matcher: FieldMatcher,
    group_id: Uuid,
    sort_order: i64,
  ) -> Self {
    Self { rule_id: None, field_id, matcher, group_id, sort_order }
  }

  // ── Loading ───────────────────────────────────────────────────────────────

  /// Tolerant row decode: `None` when the kind or mode tag is unrecognized.
  /// The rule set loader uses this to skip rows for vanished or
  /// incompatible fields.
  pub fn try_from_row(row: &RuleRow, kind_tag: &str) -> Option<Self> {
    let matcher =
      FieldMatcher::try_from_parts(kind_tag, &row.match_mode, &row.match_value)?;
    Some(Self {
      rule_id:    Some(row.rule_id),
      field_id:   row.field_id,
      matcher,
      group_id:   row.group_id,
      sort_order: row.sort_order,
    })
  }

  /// Strict row decode: unrecognized tags are configuration errors.
  pub fn from_row_strict(row: &RuleRow, kind_tag: &str) -> Result<Self> {
    let matcher =
      FieldMatcher::from_parts(kind_tag, &row.match_mode, &row.match_value)?;
    Ok(Self {
      rule_id:    Some(row.rule_id),
      field_id:   row.field_id,
      matcher,
      group_id:   row.group_id,
      sort_order: row.sort_order,
    })
  }

  /// Load one persisted rule unambiguously: the row must exist, its field
  /// must still be in the catalog, and all tags must decode.
  pub async fn load<R, F>(rules: &R, catalog: &F, rule_id: Uuid) -> Result<Self>
  where
    R: RuleStore,
    F: FieldCatalog,
  {
    let row = rules
      .get_rule_row(rule_id)
      .await
      .map_err(Error::store)?
      .ok_or(Error::RuleNotFound(rule_id))?;
    let fields = catalog.list_fields().await.map_err(Error::store)?;
    let def = fields
      .iter()
      .find(|f| f.field_id == row.field_id)
      .ok_or(Error::FieldNotFound(row.field_id))?;
    Self::from_row_strict(&row, &def.kind_tag)
  }

  // ── Evaluation ────────────────────────────────────────────────────────────

  /// The configured target group if this rule's matcher accepts the value
  /// stored for its field. A missing value is "no match", never an error.
  pub fn matches(&self, values: &FieldValueMap) -> Option<Uuid> {
    let raw = values.get(&self.field_id)?;
    self.matcher.matches(raw).then_some(self.group_id)
  }

  // ── Persistence ───────────────────────────────────────────────────────────

  fn row_with_id(&self, rule_id: Uuid) -> RuleRow {
    RuleRow {
      rule_id,
      field_id:    self.field_id,
      match_mode:  self.matcher.mode().to_string(),
      match_value: self.matcher.value_text(),
      group_id:    self.group_id,
      sort_order:  self.sort_order,
    }
  }

  /// Insert (assigning a fresh id) when never persisted, else update all
  /// mutable attributes keyed by id.
  pub async fn persist<R: RuleStore>(&mut self, rules: &R) -> Result<()> {
    match self.rule_id {
      Some(id) => rules
        .update_rule_row(&self.row_with_id(id))
        .await
        .map_err(Error::store),
      None => {
        let id = Uuid::new_v4();
        rules
          .insert_rule_row(&self.row_with_id(id))
          .await
          .map_err(Error::store)?;
        self.rule_id = Some(id);
        Ok(())
      }
    }
  }

  /// Remove the persisted row. A no-op for rules never persisted.
  pub async fn delete<R: RuleStore>(&self, rules: &R) -> Result<()> {
    match self.rule_id {
      Some(id) => rules.delete_rule_row(id).await.map_err(Error::store),
      None => Ok(()),
    }
  }

  // ── Batch form update ─────────────────────────────────────────────────────

  /// Offer a full form submission to this rule. The rule self-selects the
  /// row addressed to it (its own id, or the `New` row when never
  /// persisted); all other rows are ignored.
  ///
  /// A set delete flag deletes the row and reports `Changed`. Otherwise all
  /// mutable attributes are overwritten from the edit and persisted,
  /// reporting `Changed` only if the row is new or any attribute differed.
  pub async fn apply_batch_update<R: RuleStore>(
    &mut self,
    rules: &R,
    kinds: &BTreeMap<Uuid, FieldKind>,
    batch: &RuleBatchUpdate,
  ) -> Result<BatchOutcome> {
    let key = match self.rule_id {
      Some(id) => RowKey::Existing(id),
      None => RowKey::New,
    };
    let Some((position, edit)) = batch.row_for(key) else {
      return Ok(BatchOutcome::Unchanged);
    };

    if edit.delete {
      if self.rule_id.is_none() {
        // A new row submitted with its delete flag set never existed.
        return Ok(BatchOutcome::Unchanged);
      }
      self.delete(rules).await?;
      debug!(rule_id = ?self.rule_id, "rule deleted via batch update");
      return Ok(BatchOutcome::Changed);
    }

    let kind = kinds
      .get(&edit.field_id)
      .copied()
      .ok_or(Error::FieldNotFound(edit.field_id))?;
    let edited = Self {
      rule_id:    self.rule_id,
      field_id:   edit.field_id,
      matcher:    FieldMatcher::build(kind, edit.match_mode, &edit.match_value),
      group_id:   edit.group_id,
      sort_order: position,
    };

    // One canonical equality predicate over all mutable attributes decides
    // changed vs unchanged; a never-persisted rule is always a change.
    if self.rule_id.is_some() && *self == edited {
      return Ok(BatchOutcome::Unchanged);
    }

    *self = edited;
    self.persist(rules).await?;
    Ok(BatchOutcome::Changed)
  }
}

// ─── Batch payload ───────────────────────────────────────────────────────────

/// Identifies which persisted row a [`RuleRowEdit`] addresses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "lowercase")]
pub enum RowKey {
  Existing(Uuid),
  New,
}

/// One edited row of the admin rule form.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuleRowEdit {
  pub key:         RowKey,
  pub field_id:    Uuid,
  pub match_mode:  MatchMode,
  pub match_value: String,
  pub group_id:    Uuid,
  /// Remove this row instead of updating it.
  #[serde(default)]
  pub delete:      bool,
}

/// A full form submission: one ordered sequence of row edits. A row's
/// position in the sequence becomes its sort order. Rows are keyed by
/// identity; if a key occurs twice, the first occurrence wins.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RuleBatchUpdate {
  pub rows: Vec<RuleRowEdit>,
}

impl RuleBatchUpdate {
  /// The edit addressed to `key`, with its position in the sequence.
  fn row_for(&self, key: RowKey) -> Option<(i64, &RuleRowEdit)> {
    self
      .rows
      .iter()
      .position(|e| e.key == key)
      .map(|i| (i as i64, &self.rows[i]))
  }
}

/// Whether [`Rule::apply_batch_update`] wrote anything.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchOutcome {
  Changed,
  Unchanged,
}

// ─── Form orchestration ──────────────────────────────────────────────────────

/// Apply a full admin form submission: every persisted rule is offered the
/// payload and self-selects its row, and the `New` row (if present and not
/// deleted) is inserted. Returns whether anything changed — the caller's cue
/// to schedule a full sync.
///
/// This is the strict loading path: a persisted rule whose field vanished or
/// whose tags do not decode is a configuration error here, not a skip.
pub async fn apply_rule_form<R, F>(
  rules: &R,
  catalog: &F,
  batch: &RuleBatchUpdate,
) -> Result<bool>
where
  R: RuleStore,
  F: FieldCatalog,
{
  let fields = catalog.list_fields().await.map_err(Error::store)?;
  let kinds: BTreeMap<Uuid, FieldKind> = fields
    .iter()
    .filter_map(|f| FieldKind::from_tag(&f.kind_tag).map(|k| (f.field_id, k)))
    .collect();

  let mut changed = false;

  for row in rules.list_rule_rows().await.map_err(Error::store)? {
    // Delete short-circuits before matcher construction, so a stale rule
    // can always be removed through the form.
    if let Some((_, edit)) = batch.row_for(RowKey::Existing(row.rule_id))
      && edit.delete
    {
      rules.delete_rule_row(row.rule_id).await.map_err(Error::store)?;
      changed = true;
      continue;
    }

    let def = fields
      .iter()
      .find(|f| f.field_id == row.field_id)
      .ok_or(Error::FieldNotFound(row.field_id))?;
    let mut rule = Rule::from_row_strict(&row, &def.kind_tag)?;
    if rule.apply_batch_update(rules, &kinds, batch).await?
      == BatchOutcome::Changed
    {
      changed = true;
    }
  }

  if let Some((position, edit)) = batch.row_for(RowKey::New)
    && !edit.delete
  {
    let kind = kinds
      .get(&edit.field_id)
      .copied()
      .ok_or(Error::FieldNotFound(edit.field_id))?;
    let mut draft = Rule::new(
      edit.field_id,
      FieldMatcher::build(kind, edit.match_mode, &edit.match_value),
      edit.group_id,
      position,
    );
    draft.persist(rules).await?;
    changed = true;
  }

  Ok(changed)
}
