//! Integration tests for `SqliteStore` against an in-memory database,
//! driving the engine end-to-end through the collaborator traits.

use muster_core::{
  field::FieldKind,
  matcher::{FieldMatcher, MatchMode},
  resolve::{resolve_all_for_user, resolve_first_for_user},
  rule::{RowKey, Rule, RuleBatchUpdate, RuleRowEdit, apply_rule_form},
  store::{FieldCatalog, MembershipStore, RuleStore},
  sync::{SyncReport, sync_all, sync_user},
};
use uuid::Uuid;

use crate::SqliteStore;

async fn store() -> SqliteStore {
  SqliteStore::open_in_memory()
    .await
    .expect("in-memory store")
}

async fn persist_rule(
  s: &SqliteStore,
  field_id: Uuid,
  kind: FieldKind,
  mode: MatchMode,
  value: &str,
  group_id: Uuid,
  sort_order: i64,
) -> Rule {
  let mut rule =
    Rule::new(field_id, FieldMatcher::build(kind, mode, value), group_id, sort_order);
  rule.persist(s).await.unwrap();
  rule
}

// ─── Catalog ─────────────────────────────────────────────────────────────────

#[tokio::test]
async fn add_and_list_fields() {
  let s = store().await;
  s.add_field("Department", "menu").await.unwrap();
  s.add_field("Newsletter", "checkbox").await.unwrap();
  s.add_field("Joined", "datetime").await.unwrap();

  let fields = s.list_fields().await.unwrap();
  assert_eq!(fields.len(), 3);
  let dept = fields.iter().find(|f| f.name == "Department").unwrap();
  assert_eq!(dept.kind_tag, "menu");
}

#[tokio::test]
async fn set_field_value_upserts_and_empty_clears() {
  let s = store().await;
  let field = s.add_field("Department", "menu").await.unwrap();
  let user = s.add_user("alice").await.unwrap();

  s.set_field_value(user, field, "Sales").await.unwrap();
  s.set_field_value(user, field, "Marketing").await.unwrap();
  let values = s.field_values(user, &[field]).await.unwrap();
  assert_eq!(values.get(&field).map(String::as_str), Some("Marketing"));

  s.set_field_value(user, field, "").await.unwrap();
  let values = s.field_values(user, &[field]).await.unwrap();
  assert!(values.is_empty());
}

#[tokio::test]
async fn bulk_values_cover_the_whole_population_in_ascending_order() {
  let s = store().await;
  let field = s.add_field("Department", "menu").await.unwrap();
  let other = s.add_field("Title", "text").await.unwrap();

  let mut users = Vec::new();
  for name in ["carol", "alice", "bob"] {
    users.push(s.add_user(name).await.unwrap());
  }
  s.set_field_value(users[0], field, "Sales").await.unwrap();
  s.set_field_value(users[0], other, "Director").await.unwrap();
  s.set_field_value(users[1], field, "Marketing").await.unwrap();
  // users[2] has no values at all.

  let rows = s.field_values_bulk(&[field]).await.unwrap();
  assert_eq!(rows.len(), 3);

  let ids: Vec<Uuid> = rows.iter().map(|r| r.user_id).collect();
  let mut sorted = ids.clone();
  sorted.sort();
  assert_eq!(ids, sorted);

  for row in &rows {
    // Only the requested field is projected.
    assert!(!row.values.contains_key(&other));
    if row.user_id == users[2] {
      assert!(row.values.is_empty());
    }
  }
}

// ─── Rule rows ───────────────────────────────────────────────────────────────

#[tokio::test]
async fn rule_rows_roundtrip_and_list_in_sort_order() {
  let s = store().await;
  let field = s.add_field("Department", "menu").await.unwrap();
  let group = s.add_group("Sales team", true).await.unwrap();

  let second =
    persist_rule(&s, field, FieldKind::Menu, MatchMode::Exact, "Sales", group, 5)
      .await;
  let first =
    persist_rule(&s, field, FieldKind::Menu, MatchMode::Exact, "HR", group, 1)
      .await;

  let rows = s.list_rule_rows().await.unwrap();
  assert_eq!(rows.len(), 2);
  assert_eq!(rows[0].rule_id, first.rule_id.unwrap());
  assert_eq!(rows[1].rule_id, second.rule_id.unwrap());

  let fetched = s.get_rule_row(first.rule_id.unwrap()).await.unwrap().unwrap();
  assert_eq!(fetched.match_value, "HR");
  assert_eq!(fetched.match_mode, "exact");

  s.delete_rule_row(first.rule_id.unwrap()).await.unwrap();
  assert!(s.get_rule_row(first.rule_id.unwrap()).await.unwrap().is_none());
  assert_eq!(s.list_rule_rows().await.unwrap().len(), 1);
}

// ─── Resolution ──────────────────────────────────────────────────────────────

#[tokio::test]
async fn resolves_first_and_all_through_the_store() {
  let s = store().await;
  let field = s.add_field("Department", "menu").await.unwrap();
  let g1 = s.add_group("Sales", true).await.unwrap();
  let g2 = s.add_group("All staff", true).await.unwrap();
  persist_rule(&s, field, FieldKind::Menu, MatchMode::Exact, "Sales", g1, 0).await;
  persist_rule(&s, field, FieldKind::Menu, MatchMode::Exact, "Sales", g2, 1).await;

  let user = s.add_user("alice").await.unwrap();
  s.set_field_value(user, field, "Sales").await.unwrap();

  let first = resolve_first_for_user(&s, &s, &s, user).await.unwrap();
  assert_eq!(first, Some(g1));

  let all = resolve_all_for_user(&s, &s, &s, user).await.unwrap();
  assert_eq!(all.len(), 2);
  assert!(all.contains(&g1) && all.contains(&g2));

  let stranger = s.add_user("bob").await.unwrap();
  let first = resolve_first_for_user(&s, &s, &s, stranger).await.unwrap();
  assert_eq!(first, None);
}

// ─── Bulk sync ───────────────────────────────────────────────────────────────

#[tokio::test]
async fn sync_all_reconciles_and_is_idempotent() {
  let s = store().await;
  let field = s.add_field("Department", "menu").await.unwrap();
  let g_sales = s.add_group("Sales", true).await.unwrap();
  let g_hr = s.add_group("HR", true).await.unwrap();
  persist_rule(&s, field, FieldKind::Menu, MatchMode::Exact, "Sales", g_sales, 0)
    .await;
  persist_rule(&s, field, FieldKind::Menu, MatchMode::Exact, "HR", g_hr, 1).await;

  let alice = s.add_user("alice").await.unwrap();
  let bob = s.add_user("bob").await.unwrap();
  let carol = s.add_user("carol").await.unwrap();
  s.set_field_value(alice, field, "Sales").await.unwrap();
  s.set_field_value(bob, field, "HR").await.unwrap();
  // carol has no values but lingers in Sales.
  s.add_member(g_sales, carol).await.unwrap();

  let report = sync_all(&s, &s, &s).await.unwrap();
  assert_eq!(report.users_scanned, 3);
  assert_eq!(report.added, 2);
  assert_eq!(report.removed, 1);

  assert_eq!(s.group_members(g_sales).await.unwrap(), vec![alice]);
  assert_eq!(s.group_members(g_hr).await.unwrap(), vec![bob]);

  // Second pass with nothing changed issues no membership calls.
  let report = sync_all(&s, &s, &s).await.unwrap();
  assert_eq!((report.added, report.removed), (0, 0));
}

#[tokio::test]
async fn clearing_a_value_removes_the_membership_on_the_next_pass() {
  let s = store().await;
  let field = s.add_field("Department", "menu").await.unwrap();
  let group = s.add_group("Sales", true).await.unwrap();
  persist_rule(&s, field, FieldKind::Menu, MatchMode::Exact, "Sales", group, 0)
    .await;

  let user = s.add_user("alice").await.unwrap();
  s.set_field_value(user, field, "Sales").await.unwrap();
  sync_all(&s, &s, &s).await.unwrap();
  assert_eq!(s.group_members(group).await.unwrap(), vec![user]);

  s.set_field_value(user, field, "").await.unwrap();
  let report = sync_all(&s, &s, &s).await.unwrap();
  assert_eq!((report.added, report.removed), (0, 1));
  assert!(s.group_members(group).await.unwrap().is_empty());
}

#[tokio::test]
async fn unmanaging_a_group_makes_its_rules_inert_until_remanaged() {
  let s = store().await;
  let field = s.add_field("Newsletter", "checkbox").await.unwrap();
  let group = s.add_group("Subscribers", false).await.unwrap();
  persist_rule(&s, field, FieldKind::Checkbox, MatchMode::Exact, "1", group, 0)
    .await;

  let user = s.add_user("alice").await.unwrap();
  s.set_field_value(user, field, "1").await.unwrap();

  // Unmanaged target: the rule row exists but nothing happens.
  sync_all(&s, &s, &s).await.unwrap();
  assert!(s.group_members(group).await.unwrap().is_empty());

  // Re-managing reactivates the same row without recreating it.
  s.set_group_managed(group, true).await.unwrap();
  let report = sync_all(&s, &s, &s).await.unwrap();
  assert_eq!(report.added, 1);
  assert_eq!(s.group_members(group).await.unwrap(), vec![user]);
  assert_eq!(s.list_rule_rows().await.unwrap().len(), 1);
}

#[tokio::test]
async fn checkbox_rules_distinguish_set_and_unset() {
  let s = store().await;
  let field = s.add_field("Newsletter", "checkbox").await.unwrap();
  let group = s.add_group("Subscribers", true).await.unwrap();
  persist_rule(&s, field, FieldKind::Checkbox, MatchMode::Exact, "1", group, 0)
    .await;

  let yes = s.add_user("alice").await.unwrap();
  let no = s.add_user("bob").await.unwrap();
  s.set_field_value(yes, field, "1").await.unwrap();
  s.set_field_value(no, field, "0").await.unwrap();

  sync_all(&s, &s, &s).await.unwrap();
  assert_eq!(s.group_members(group).await.unwrap(), vec![yes]);
}

// ─── Single-user sync ────────────────────────────────────────────────────────

#[tokio::test]
async fn sync_user_is_quiet_when_membership_already_matches() {
  let s = store().await;
  let field = s.add_field("Team", "menu").await.unwrap();
  let g1 = s.add_group("G1", true).await.unwrap();
  let g2 = s.add_group("G2", true).await.unwrap();
  persist_rule(&s, field, FieldKind::Menu, MatchMode::Exact, "Opt 1", g1, 0).await;
  let mut rule_b =
    persist_rule(&s, field, FieldKind::Menu, MatchMode::Exact, "Opt 2", g2, 1)
      .await;

  let user = s.add_user("alice").await.unwrap();
  s.set_field_value(user, field, "Opt 1").await.unwrap();
  s.add_member(g1, user).await.unwrap();

  let report = sync_user(&s, &s, &s, user).await.unwrap();
  assert_eq!((report.added, report.removed), (0, 0));

  // Rule B re-targeted at Opt 1: the user gains G2 and keeps G1.
  rule_b.matcher =
    FieldMatcher::build(FieldKind::Menu, MatchMode::Exact, "Opt 1");
  rule_b.persist(&s).await.unwrap();

  let report = sync_user(&s, &s, &s, user).await.unwrap();
  assert_eq!((report.added, report.removed), (1, 0));
  assert_eq!(s.group_members(g1).await.unwrap(), vec![user]);
  assert_eq!(s.group_members(g2).await.unwrap(), vec![user]);
}

#[tokio::test]
async fn sync_user_early_returns_without_managed_groups() {
  let s = store().await;
  s.add_group("Unmanaged", false).await.unwrap();
  let user = s.add_user("alice").await.unwrap();

  let report = sync_user(&s, &s, &s, user).await.unwrap();
  assert_eq!(report, SyncReport::default());
}

// ─── Batch form update ───────────────────────────────────────────────────────

#[tokio::test]
async fn form_delete_removes_exactly_one_rule() {
  let s = store().await;
  let field = s.add_field("Team", "menu").await.unwrap();
  let g1 = s.add_group("G1", true).await.unwrap();
  let g2 = s.add_group("G2", true).await.unwrap();
  let keep =
    persist_rule(&s, field, FieldKind::Menu, MatchMode::Exact, "Opt 1", g1, 0)
      .await;
  let gone =
    persist_rule(&s, field, FieldKind::Menu, MatchMode::Exact, "Opt 2", g2, 1)
      .await;
  let before = s.list_rule_rows().await.unwrap();

  let batch = RuleBatchUpdate {
    rows: vec![RuleRowEdit {
      key:         RowKey::Existing(gone.rule_id.unwrap()),
      field_id:    field,
      match_mode:  MatchMode::Exact,
      match_value: "Opt 2".into(),
      group_id:    g2,
      delete:      true,
    }],
  };
  let changed = apply_rule_form(&s, &s, &batch).await.unwrap();
  assert!(changed);

  let after = s.list_rule_rows().await.unwrap();
  assert_eq!(after.len(), 1);
  assert_eq!(
    after[0],
    before
      .into_iter()
      .find(|r| r.rule_id == keep.rule_id.unwrap())
      .unwrap()
  );
}

#[tokio::test]
async fn form_resubmission_without_edits_changes_nothing() {
  let s = store().await;
  let field = s.add_field("Team", "menu").await.unwrap();
  let group = s.add_group("G1", true).await.unwrap();
  let rule =
    persist_rule(&s, field, FieldKind::Menu, MatchMode::Exact, "Opt 1", group, 0)
      .await;

  let batch = RuleBatchUpdate {
    rows: vec![RuleRowEdit {
      key:         RowKey::Existing(rule.rule_id.unwrap()),
      field_id:    field,
      match_mode:  MatchMode::Exact,
      match_value: "Opt 1".into(),
      group_id:    group,
      delete:      false,
    }],
  };
  let changed = apply_rule_form(&s, &s, &batch).await.unwrap();
  assert!(!changed);
}

#[tokio::test]
async fn form_new_row_inserts_a_rule_that_syncs() {
  let s = store().await;
  let field = s.add_field("Title", "text").await.unwrap();
  let group = s.add_group("Engineers", true).await.unwrap();
  let user = s.add_user("alice").await.unwrap();
  s.set_field_value(user, field, "Software Engineer").await.unwrap();

  let batch = RuleBatchUpdate {
    rows: vec![RuleRowEdit {
      key:         RowKey::New,
      field_id:    field,
      match_mode:  MatchMode::Contains,
      match_value: "engineer".into(),
      group_id:    group,
      delete:      false,
    }],
  };
  let changed = apply_rule_form(&s, &s, &batch).await.unwrap();
  assert!(changed);

  let report = sync_all(&s, &s, &s).await.unwrap();
  assert_eq!(report.added, 1);
  assert_eq!(s.group_members(group).await.unwrap(), vec![user]);
}
