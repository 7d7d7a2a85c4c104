//! In-memory implementation of the collaborator traits for unit tests.

use std::{
  collections::{BTreeMap, BTreeSet},
  convert::Infallible,
  sync::{
    Mutex,
    atomic::{AtomicUsize, Ordering},
  },
};

use uuid::Uuid;

use crate::{
  field::{FieldDef, FieldValueMap},
  rule::RuleRow,
  store::{
    FieldCatalog, Membership, MembershipStore, RuleStore, UserFieldValues,
  },
  sync::{ChangeKind, MembershipChange},
};

/// An in-memory backend implementing all three collaborator traits.
/// Membership mutations issued through the trait are recorded so tests can
/// assert on exactly which calls a sync pass made.
#[derive(Default)]
pub struct MemBackend {
  fields:    Mutex<Vec<FieldDef>>,
  users:     Mutex<BTreeSet<Uuid>>,
  values:    Mutex<BTreeMap<(Uuid, Uuid), String>>,
  groups:    Mutex<BTreeMap<Uuid, bool>>,
  members:   Mutex<BTreeSet<(Uuid, Uuid)>>,
  rows:      Mutex<BTreeMap<Uuid, RuleRow>>,
  mutations: Mutex<Vec<MembershipChange>>,
  queries:   AtomicUsize,
}

impl MemBackend {
  pub fn new() -> Self { Self::default() }

  // ── Seeding ───────────────────────────────────────────────────────────────

  pub fn add_field(&self, name: &str, kind_tag: &str) -> Uuid {
    let field_id = Uuid::new_v4();
    self.fields.lock().unwrap().push(FieldDef {
      field_id,
      name: name.to_owned(),
      kind_tag: kind_tag.to_owned(),
    });
    field_id
  }

  pub fn remove_field(&self, field_id: Uuid) {
    self.fields.lock().unwrap().retain(|f| f.field_id != field_id);
  }

  pub fn add_user(&self) -> Uuid {
    let user_id = Uuid::new_v4();
    self.users.lock().unwrap().insert(user_id);
    user_id
  }

  pub fn set_value(&self, user_id: Uuid, field_id: Uuid, value: &str) {
    self
      .values
      .lock()
      .unwrap()
      .insert((user_id, field_id), value.to_owned());
  }

  pub fn add_group(&self, managed: bool) -> Uuid {
    let group_id = Uuid::new_v4();
    self.groups.lock().unwrap().insert(group_id, managed);
    group_id
  }

  /// Seed a membership edge directly, without recording a mutation.
  pub fn insert_member(&self, group_id: Uuid, user_id: Uuid) {
    self.members.lock().unwrap().insert((user_id, group_id));
  }

  // ── Inspection ────────────────────────────────────────────────────────────

  pub fn is_member(&self, group_id: Uuid, user_id: Uuid) -> bool {
    self.members.lock().unwrap().contains(&(user_id, group_id))
  }

  /// Drain the record of membership calls issued through the trait.
  pub fn take_mutations(&self) -> Vec<MembershipChange> {
    std::mem::take(&mut self.mutations.lock().unwrap())
  }

  /// Number of read queries issued through the traits.
  pub fn query_count(&self) -> usize { self.queries.load(Ordering::SeqCst) }

  fn count_query(&self) { self.queries.fetch_add(1, Ordering::SeqCst); }
}

impl FieldCatalog for MemBackend {
  type Error = Infallible;

  async fn list_fields(&self) -> Result<Vec<FieldDef>, Infallible> {
    self.count_query();
    Ok(self.fields.lock().unwrap().clone())
  }

  async fn field_values(
    &self,
    user_id: Uuid,
    field_ids: &[Uuid],
  ) -> Result<FieldValueMap, Infallible> {
    self.count_query();
    let values = self.values.lock().unwrap();
    Ok(
      field_ids
        .iter()
        .filter_map(|&f| values.get(&(user_id, f)).map(|v| (f, v.clone())))
        .collect(),
    )
  }

  async fn field_values_bulk(
    &self,
    field_ids: &[Uuid],
  ) -> Result<Vec<UserFieldValues>, Infallible> {
    self.count_query();
    let users = self.users.lock().unwrap();
    let values = self.values.lock().unwrap();
    Ok(
      users
        .iter()
        .map(|&user_id| UserFieldValues {
          user_id,
          values: field_ids
            .iter()
            .filter_map(|&f| {
              values.get(&(user_id, f)).map(|v| (f, v.clone()))
            })
            .collect(),
        })
        .collect(),
    )
  }
}

impl MembershipStore for MemBackend {
  type Error = Infallible;

  async fn managed_group_ids(&self) -> Result<BTreeSet<Uuid>, Infallible> {
    self.count_query();
    Ok(
      self
        .groups
        .lock()
        .unwrap()
        .iter()
        .filter(|&(_, &managed)| managed)
        .map(|(&id, _)| id)
        .collect(),
    )
  }

  async fn memberships(
    &self,
    group_ids: &[Uuid],
  ) -> Result<Vec<Membership>, Infallible> {
    self.count_query();
    Ok(
      self
        .members
        .lock()
        .unwrap()
        .iter()
        .filter(|(_, g)| group_ids.contains(g))
        .map(|&(user_id, group_id)| Membership { user_id, group_id })
        .collect(),
    )
  }

  async fn memberships_for_user(
    &self,
    group_ids: &[Uuid],
    user_id: Uuid,
  ) -> Result<Vec<Membership>, Infallible> {
    self.count_query();
    Ok(
      self
        .members
        .lock()
        .unwrap()
        .iter()
        .filter(|&&(u, g)| u == user_id && group_ids.contains(&g))
        .map(|&(user_id, group_id)| Membership { user_id, group_id })
        .collect(),
    )
  }

  async fn add_member(
    &self,
    group_id: Uuid,
    user_id: Uuid,
  ) -> Result<(), Infallible> {
    self.members.lock().unwrap().insert((user_id, group_id));
    self.mutations.lock().unwrap().push(MembershipChange {
      kind: ChangeKind::Add,
      user_id,
      group_id,
    });
    Ok(())
  }

  async fn remove_member(
    &self,
    group_id: Uuid,
    user_id: Uuid,
  ) -> Result<(), Infallible> {
    self.members.lock().unwrap().remove(&(user_id, group_id));
    self.mutations.lock().unwrap().push(MembershipChange {
      kind: ChangeKind::Remove,
      user_id,
      group_id,
    });
    Ok(())
  }
}

impl RuleStore for MemBackend {
  type Error = Infallible;

  async fn list_rule_rows(&self) -> Result<Vec<RuleRow>, Infallible> {
    self.count_query();
    let mut rows: Vec<RuleRow> =
      self.rows.lock().unwrap().values().cloned().collect();
    rows.sort_by_key(|r| (r.sort_order, r.rule_id));
    Ok(rows)
  }

  async fn get_rule_row(
    &self,
    rule_id: Uuid,
  ) -> Result<Option<RuleRow>, Infallible> {
    self.count_query();
    Ok(self.rows.lock().unwrap().get(&rule_id).cloned())
  }

  async fn insert_rule_row(&self, row: &RuleRow) -> Result<(), Infallible> {
    self.rows.lock().unwrap().insert(row.rule_id, row.clone());
    Ok(())
  }

  async fn update_rule_row(&self, row: &RuleRow) -> Result<(), Infallible> {
    self.rows.lock().unwrap().insert(row.rule_id, row.clone());
    Ok(())
  }

  async fn delete_rule_row(&self, rule_id: Uuid) -> Result<(), Infallible> {
    self.rows.lock().unwrap().remove(&rule_id);
    Ok(())
  }
}
