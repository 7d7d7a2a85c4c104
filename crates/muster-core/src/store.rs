//! Collaborator traits the engine calls, and their supporting row types.
//!
//! The traits are implemented by storage backends (e.g.
//! `muster-store-sqlite`); the engine depends only on these abstractions.
//! All methods return `Send` futures so the engine can run inside
//! multi-threaded async runtimes.

use std::{collections::BTreeSet, future::Future};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
  field::{FieldDef, FieldValueMap},
  rule::RuleRow,
};

// ─── Stream row types ────────────────────────────────────────────────────────

/// One user of the population paired with their stored values for the
/// requested fields. Users with no stored values appear with an empty map.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserFieldValues {
  pub user_id: Uuid,
  pub values:  FieldValueMap,
}

/// A (user, group) membership edge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Membership {
  pub user_id:  Uuid,
  pub group_id: Uuid,
}

// ─── Field catalog ───────────────────────────────────────────────────────────

/// The external profile-field catalog and per-user value store.
pub trait FieldCatalog: Send + Sync {
  type Error: std::error::Error + Send + Sync + 'static;

  /// All catalog entries, including kinds this engine does not evaluate.
  fn list_fields(
    &self,
  ) -> impl Future<Output = Result<Vec<FieldDef>, Self::Error>> + Send + '_;

  /// One user's values for the given fields, in a single fetch. Unset
  /// fields are simply absent from the map.
  fn field_values<'a>(
    &'a self,
    user_id: Uuid,
    field_ids: &'a [Uuid],
  ) -> impl Future<Output = Result<FieldValueMap, Self::Error>> + Send + 'a;

  /// The whole population paired with their values for the given fields,
  /// one entry per user in ascending user-id order. Users with no stored
  /// values are included with an empty map; the bulk synchronizer relies
  /// on both properties.
  fn field_values_bulk<'a>(
    &'a self,
    field_ids: &'a [Uuid],
  ) -> impl Future<Output = Result<Vec<UserFieldValues>, Self::Error>> + Send + 'a;
}

// ─── Group membership ────────────────────────────────────────────────────────

/// The external group/membership store.
pub trait MembershipStore: Send + Sync {
  type Error: std::error::Error + Send + Sync + 'static;

  /// Ids of the groups this system manages. Only these participate as rule
  /// targets or in synchronization.
  fn managed_group_ids(
    &self,
  ) -> impl Future<Output = Result<BTreeSet<Uuid>, Self::Error>> + Send + '_;

  /// Current membership edges within `group_ids`, in ascending user-id
  /// order. The merge-walk in [`crate::sync`] depends on that ordering.
  fn memberships<'a>(
    &'a self,
    group_ids: &'a [Uuid],
  ) -> impl Future<Output = Result<Vec<Membership>, Self::Error>> + Send + 'a;

  /// One user's membership edges within `group_ids`.
  fn memberships_for_user<'a>(
    &'a self,
    group_ids: &'a [Uuid],
    user_id: Uuid,
  ) -> impl Future<Output = Result<Vec<Membership>, Self::Error>> + Send + 'a;

  fn add_member(
    &self,
    group_id: Uuid,
    user_id: Uuid,
  ) -> impl Future<Output = Result<(), Self::Error>> + Send + '_;

  fn remove_member(
    &self,
    group_id: Uuid,
    user_id: Uuid,
  ) -> impl Future<Output = Result<(), Self::Error>> + Send + '_;
}

// ─── Rule persistence ────────────────────────────────────────────────────────

/// CRUD over persisted rule rows.
pub trait RuleStore: Send + Sync {
  type Error: std::error::Error + Send + Sync + 'static;

  /// All persisted rows in ascending sort order.
  fn list_rule_rows(
    &self,
  ) -> impl Future<Output = Result<Vec<RuleRow>, Self::Error>> + Send + '_;

  fn get_rule_row(
    &self,
    rule_id: Uuid,
  ) -> impl Future<Output = Result<Option<RuleRow>, Self::Error>> + Send + '_;

  fn insert_rule_row<'a>(
    &'a self,
    row: &'a RuleRow,
  ) -> impl Future<Output = Result<(), Self::Error>> + Send + 'a;

  /// Overwrite all mutable attributes of the row with this id.
  fn update_rule_row<'a>(
    &'a self,
    row: &'a RuleRow,
  ) -> impl Future<Output = Result<(), Self::Error>> + Send + 'a;

  fn delete_rule_row(
    &self,
    rule_id: Uuid,
  ) -> impl Future<Output = Result<(), Self::Error>> + Send + '_;
}
