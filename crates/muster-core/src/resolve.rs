//! Single-user rule resolution.
//!
//! Deliberately reloads rules and values fresh on every call: this path runs
//! synchronously after one user's profile change, and correctness beats
//! latency there. The field values are fetched in a single bulk call scoped
//! to the fields the active rules actually reference.

use std::collections::BTreeSet;

use uuid::Uuid;

use crate::{
  Error, Result,
  ruleset::RuleSet,
  store::{FieldCatalog, MembershipStore, RuleStore},
};

/// The target group of the earliest (by sort order) rule matching this
/// user's values, or `None` when no rule applies.
pub async fn resolve_first_for_user<F, R, G>(
  catalog: &F,
  rules: &R,
  groups: &G,
  user_id: Uuid,
) -> Result<Option<Uuid>>
where
  F: FieldCatalog,
  R: RuleStore,
  G: MembershipStore,
{
  let managed = groups.managed_group_ids().await.map_err(Error::store)?;
  let rule_set = RuleSet::load(catalog, rules, &managed).await?;
  if rule_set.is_empty() {
    return Ok(None);
  }
  let values = catalog
    .field_values(user_id, rule_set.field_ids())
    .await
    .map_err(Error::store)?;
  Ok(rule_set.resolve_first(&values))
}

/// The deduplicated target groups of every rule matching this user's
/// values.
pub async fn resolve_all_for_user<F, R, G>(
  catalog: &F,
  rules: &R,
  groups: &G,
  user_id: Uuid,
) -> Result<BTreeSet<Uuid>>
where
  F: FieldCatalog,
  R: RuleStore,
  G: MembershipStore,
{
  let managed = groups.managed_group_ids().await.map_err(Error::store)?;
  let rule_set = RuleSet::load(catalog, rules, &managed).await?;
  if rule_set.is_empty() {
    return Ok(BTreeSet::new());
  }
  let values = catalog
    .field_values(user_id, rule_set.field_ids())
    .await
    .map_err(Error::store)?;
  Ok(rule_set.resolve_all(&values))
}
