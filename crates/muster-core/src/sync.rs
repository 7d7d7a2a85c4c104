//! Membership synchronization: diff rule-implied groups against current
//! membership and apply the difference.
//!
//! The bulk pass is linear in (users × rules): one wide value projection
//! over the population, one membership scan, and a two-pointer merge-walk
//! over the two user-id-ordered sequences. No transaction spans a pass;
//! every add/remove call is independent, and the whole computation is
//! idempotent, so a rerun after a partial failure converges.

use std::collections::BTreeSet;

use tracing::{debug, info};
use uuid::Uuid;

use crate::{
  Error, Result,
  ruleset::RuleSet,
  store::{
    FieldCatalog, Membership, MembershipStore, RuleStore, UserFieldValues,
  },
};

// ─── Change records ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
  Add,
  Remove,
}

/// One membership mutation the synchronizer wants applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MembershipChange {
  pub kind:     ChangeKind,
  pub user_id:  Uuid,
  pub group_id: Uuid,
}

/// Counts from one synchronization pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncReport {
  pub users_scanned: usize,
  pub added:         usize,
  pub removed:       usize,
}

// ─── Planning ────────────────────────────────────────────────────────────────

fn diff_user(
  user_id: Uuid,
  target: &BTreeSet<Uuid>,
  current: &BTreeSet<Uuid>,
  out: &mut Vec<MembershipChange>,
) {
  for &group_id in target.difference(current) {
    out.push(MembershipChange { kind: ChangeKind::Add, user_id, group_id });
  }
  for &group_id in current.difference(target) {
    out.push(MembershipChange { kind: ChangeKind::Remove, user_id, group_id });
  }
}

/// Compute the membership changes for the whole population. Pure.
///
/// Both inputs must be in ascending user-id order, and `current` must be
/// restricted to managed groups. A user with no matching values yields an
/// empty target set and is therefore removed from every managed group they
/// are in.
pub fn plan_changes(
  rule_set: &RuleSet,
  population: &[UserFieldValues],
  current: &[Membership],
) -> Vec<MembershipChange> {
  let mut changes = Vec::new();
  let mut next = 0;

  for user in population {
    // Membership rows for user ids missing from the population cannot be
    // evaluated. The population is contractually the whole user table, so
    // these only appear if storage broke its own referential integrity.
    while next < current.len() && current[next].user_id < user.user_id {
      debug!(user_id = %current[next].user_id,
             "membership row for user missing from population; skipped");
      next += 1;
    }

    let mut in_groups = BTreeSet::new();
    while next < current.len() && current[next].user_id == user.user_id {
      in_groups.insert(current[next].group_id);
      next += 1;
    }

    let target = rule_set.resolve_all(&user.values);
    diff_user(user.user_id, &target, &in_groups, &mut changes);
  }

  changes
}

async fn apply<G: MembershipStore>(
  groups: &G,
  changes: &[MembershipChange],
  report: &mut SyncReport,
) -> Result<()> {
  for change in changes {
    match change.kind {
      ChangeKind::Add => {
        groups
          .add_member(change.group_id, change.user_id)
          .await
          .map_err(Error::store)?;
        report.added += 1;
      }
      ChangeKind::Remove => {
        groups
          .remove_member(change.group_id, change.user_id)
          .await
          .map_err(Error::store)?;
        report.removed += 1;
      }
    }
    debug!(user_id = %change.user_id, group_id = %change.group_id,
           kind = ?change.kind, "membership updated");
  }
  Ok(())
}

// ─── Entry points ────────────────────────────────────────────────────────────

/// Reconcile the whole population against the current rule set.
pub async fn sync_all<F, R, G>(
  catalog: &F,
  rules: &R,
  groups: &G,
) -> Result<SyncReport>
where
  F: FieldCatalog,
  R: RuleStore,
  G: MembershipStore,
{
  let managed = groups.managed_group_ids().await.map_err(Error::store)?;
  if managed.is_empty() {
    return Ok(SyncReport::default());
  }

  let rule_set = RuleSet::load(catalog, rules, &managed).await?;
  let population = catalog
    .field_values_bulk(rule_set.field_ids())
    .await
    .map_err(Error::store)?;
  let managed_ids: Vec<Uuid> = managed.iter().copied().collect();
  let current =
    groups.memberships(&managed_ids).await.map_err(Error::store)?;

  let changes = plan_changes(&rule_set, &population, &current);
  let mut report =
    SyncReport { users_scanned: population.len(), ..Default::default() };
  apply(groups, &changes, &mut report).await?;

  info!(users = report.users_scanned, added = report.added,
        removed = report.removed, "bulk sync complete");
  Ok(report)
}

/// Reconcile one user, e.g. after a profile change.
pub async fn sync_user<F, R, G>(
  catalog: &F,
  rules: &R,
  groups: &G,
  user_id: Uuid,
) -> Result<SyncReport>
where
  F: FieldCatalog,
  R: RuleStore,
  G: MembershipStore,
{
  let managed = groups.managed_group_ids().await.map_err(Error::store)?;
  if managed.is_empty() {
    // Nothing can be added or removed; skip the degenerate membership query.
    return Ok(SyncReport::default());
  }

  let rule_set = RuleSet::load(catalog, rules, &managed).await?;
  let target = if rule_set.is_empty() {
    BTreeSet::new()
  } else {
    let values = catalog
      .field_values(user_id, rule_set.field_ids())
      .await
      .map_err(Error::store)?;
    rule_set.resolve_all(&values)
  };

  let managed_ids: Vec<Uuid> = managed.iter().copied().collect();
  let in_groups: BTreeSet<Uuid> = groups
    .memberships_for_user(&managed_ids, user_id)
    .await
    .map_err(Error::store)?
    .into_iter()
    .map(|m| m.group_id)
    .collect();

  let mut changes = Vec::new();
  diff_user(user_id, &target, &in_groups, &mut changes);

  let mut report = SyncReport { users_scanned: 1, ..Default::default() };
  apply(groups, &changes, &mut report).await?;
  Ok(report)
}
