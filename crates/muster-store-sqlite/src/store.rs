//! [`SqliteStore`] — the SQLite implementation of the collaborator traits.

use std::{collections::BTreeSet, path::Path};

use chrono::Utc;
use rusqlite::OptionalExtension as _;
use uuid::Uuid;

use muster_core::{
  field::{FieldDef, FieldValueMap},
  rule::RuleRow,
  store::{
    FieldCatalog, Membership, MembershipStore, RuleStore, UserFieldValues,
  },
};

use crate::{
  Error, Result,
  encode::{RawRuleRow, decode_uuid, encode_bool, encode_dt, encode_uuid},
  schema::SCHEMA,
};

/// A comma-separated list of `?` placeholders for an `IN (...)` clause.
fn in_list(n: usize) -> String { vec!["?"; n].join(", ") }

// ─── Store ───────────────────────────────────────────────────────────────────

/// A muster store backed by a single SQLite file.
///
/// Cloning is cheap — the inner connection is reference-counted.
#[derive(Clone)]
pub struct SqliteStore {
  conn: tokio_rusqlite::Connection,
}

impl SqliteStore {
  /// Open (or create) a store at `path` and run schema initialisation.
  pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
    let conn = tokio_rusqlite::Connection::open(path).await?;
    let store = Self { conn };
    store.init_schema().await?;
    Ok(store)
  }

  /// Open an in-memory store — useful for testing.
  pub async fn open_in_memory() -> Result<Self> {
    let conn = tokio_rusqlite::Connection::open_in_memory().await?;
    let store = Self { conn };
    store.init_schema().await?;
    Ok(store)
  }

  async fn init_schema(&self) -> Result<()> {
    self
      .conn
      .call(|conn| {
        conn.execute_batch(SCHEMA)?;
        Ok(())
      })
      .await?;
    Ok(())
  }

  // ── Population / catalog admin ────────────────────────────────────────────

  /// Create a user and return its id.
  pub async fn add_user(&self, name: &str) -> Result<Uuid> {
    let user_id = Uuid::new_v4();
    let id_str = encode_uuid(user_id);
    let at_str = encode_dt(Utc::now());
    let name = name.to_owned();

    self
      .conn
      .call(move |conn| {
        conn.execute(
          "INSERT INTO users (user_id, name, created_at) VALUES (?1, ?2, ?3)",
          rusqlite::params![id_str, name, at_str],
        )?;
        Ok(())
      })
      .await?;

    Ok(user_id)
  }

  /// Create a catalog field with the given raw kind tag.
  pub async fn add_field(&self, name: &str, kind_tag: &str) -> Result<Uuid> {
    let field_id = Uuid::new_v4();
    let id_str = encode_uuid(field_id);
    let name = name.to_owned();
    let kind = kind_tag.to_owned();

    self
      .conn
      .call(move |conn| {
        conn.execute(
          "INSERT INTO fields (field_id, name, kind) VALUES (?1, ?2, ?3)",
          rusqlite::params![id_str, name, kind],
        )?;
        Ok(())
      })
      .await?;

    Ok(field_id)
  }

  /// Upsert one stored value. An empty string clears the value entirely —
  /// an unset field must be absent from value maps, not empty.
  pub async fn set_field_value(
    &self,
    user_id: Uuid,
    field_id: Uuid,
    value: &str,
  ) -> Result<()> {
    let user_str = encode_uuid(user_id);
    let field_str = encode_uuid(field_id);
    let value = value.to_owned();

    self
      .conn
      .call(move |conn| {
        if value.is_empty() {
          conn.execute(
            "DELETE FROM field_values WHERE user_id = ?1 AND field_id = ?2",
            rusqlite::params![user_str, field_str],
          )?;
        } else {
          conn.execute(
            "INSERT INTO field_values (user_id, field_id, value)
             VALUES (?1, ?2, ?3)
             ON CONFLICT (user_id, field_id) DO UPDATE SET value = excluded.value",
            rusqlite::params![user_str, field_str, value],
          )?;
        }
        Ok(())
      })
      .await?;
    Ok(())
  }

  /// Create a group and return its id.
  pub async fn add_group(&self, name: &str, managed: bool) -> Result<Uuid> {
    let group_id = Uuid::new_v4();
    let id_str = encode_uuid(group_id);
    let name = name.to_owned();
    let managed = encode_bool(managed);

    self
      .conn
      .call(move |conn| {
        conn.execute(
          "INSERT INTO groups (group_id, name, managed) VALUES (?1, ?2, ?3)",
          rusqlite::params![id_str, name, managed],
        )?;
        Ok(())
      })
      .await?;

    Ok(group_id)
  }

  /// Flip whether a group is managed by this system.
  pub async fn set_group_managed(
    &self,
    group_id: Uuid,
    managed: bool,
  ) -> Result<()> {
    let id_str = encode_uuid(group_id);
    let managed = encode_bool(managed);

    self
      .conn
      .call(move |conn| {
        conn.execute(
          "UPDATE groups SET managed = ?2 WHERE group_id = ?1",
          rusqlite::params![id_str, managed],
        )?;
        Ok(())
      })
      .await?;
    Ok(())
  }

  /// Current member ids of one group, in ascending user-id order.
  pub async fn group_members(&self, group_id: Uuid) -> Result<Vec<Uuid>> {
    let id_str = encode_uuid(group_id);

    let raws: Vec<String> = self
      .conn
      .call(move |conn| {
        let mut stmt = conn.prepare(
          "SELECT user_id FROM memberships WHERE group_id = ?1 ORDER BY user_id",
        )?;
        let rows = stmt
          .query_map(rusqlite::params![id_str], |row| row.get(0))?
          .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
      })
      .await?;

    raws.iter().map(|s| decode_uuid(s)).collect()
  }
}

// ─── FieldCatalog impl ───────────────────────────────────────────────────────

impl FieldCatalog for SqliteStore {
  type Error = Error;

  async fn list_fields(&self) -> Result<Vec<FieldDef>> {
    let raws: Vec<(String, String, String)> = self
      .conn
      .call(|conn| {
        let mut stmt =
          conn.prepare("SELECT field_id, name, kind FROM fields ORDER BY name")?;
        let rows = stmt
          .query_map([], |row| {
            Ok((row.get(0)?, row.get(1)?, row.get(2)?))
          })?
          .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
      })
      .await?;

    raws
      .into_iter()
      .map(|(id, name, kind_tag)| {
        Ok(FieldDef { field_id: decode_uuid(&id)?, name, kind_tag })
      })
      .collect()
  }

  async fn field_values(
    &self,
    user_id: Uuid,
    field_ids: &[Uuid],
  ) -> Result<FieldValueMap> {
    if field_ids.is_empty() {
      return Ok(FieldValueMap::new());
    }

    let sql = format!(
      "SELECT field_id, value FROM field_values
       WHERE user_id = ? AND field_id IN ({})",
      in_list(field_ids.len())
    );
    let mut params = vec![encode_uuid(user_id)];
    params.extend(field_ids.iter().copied().map(encode_uuid));

    let raws: Vec<(String, String)> = self
      .conn
      .call(move |conn| {
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
          .query_map(rusqlite::params_from_iter(params.iter()), |row| {
            Ok((row.get(0)?, row.get(1)?))
          })?
          .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
      })
      .await?;

    raws
      .into_iter()
      .map(|(field_str, value)| Ok((decode_uuid(&field_str)?, value)))
      .collect()
  }

  async fn field_values_bulk(
    &self,
    field_ids: &[Uuid],
  ) -> Result<Vec<UserFieldValues>> {
    // One wide projection over the whole population: every user appears,
    // valueless users with NULL joins. Ascending user-id order is load-
    // bearing for the synchronizer's merge-walk.
    let (sql, params) = if field_ids.is_empty() {
      (
        "SELECT user_id, NULL, NULL FROM users ORDER BY user_id".to_owned(),
        Vec::new(),
      )
    } else {
      (
        format!(
          "SELECT u.user_id, fv.field_id, fv.value
           FROM users u
           LEFT JOIN field_values fv
             ON fv.user_id = u.user_id AND fv.field_id IN ({})
           ORDER BY u.user_id",
          in_list(field_ids.len())
        ),
        field_ids.iter().copied().map(encode_uuid).collect::<Vec<_>>(),
      )
    };

    let raws: Vec<(String, Option<String>, Option<String>)> = self
      .conn
      .call(move |conn| {
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
          .query_map(rusqlite::params_from_iter(params.iter()), |row| {
            Ok((row.get(0)?, row.get(1)?, row.get(2)?))
          })?
          .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
      })
      .await?;

    let mut out: Vec<UserFieldValues> = Vec::new();
    for (user_str, field_str, value) in raws {
      let user_id = decode_uuid(&user_str)?;
      if out.last().map(|u| u.user_id) != Some(user_id) {
        out.push(UserFieldValues { user_id, values: FieldValueMap::new() });
      }
      if let (Some(field_str), Some(value)) = (field_str, value)
        && let Some(entry) = out.last_mut()
      {
        entry.values.insert(decode_uuid(&field_str)?, value);
      }
    }
    Ok(out)
  }
}

// ─── MembershipStore impl ────────────────────────────────────────────────────

impl MembershipStore for SqliteStore {
  type Error = Error;

  async fn managed_group_ids(&self) -> Result<BTreeSet<Uuid>> {
    let raws: Vec<String> = self
      .conn
      .call(|conn| {
        let mut stmt =
          conn.prepare("SELECT group_id FROM groups WHERE managed = 1")?;
        let rows = stmt
          .query_map([], |row| row.get(0))?
          .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
      })
      .await?;

    raws.iter().map(|s| decode_uuid(s)).collect()
  }

  async fn memberships(&self, group_ids: &[Uuid]) -> Result<Vec<Membership>> {
    if group_ids.is_empty() {
      return Ok(Vec::new());
    }

    let sql = format!(
      "SELECT user_id, group_id FROM memberships
       WHERE group_id IN ({})
       ORDER BY user_id, group_id",
      in_list(group_ids.len())
    );
    let params: Vec<String> =
      group_ids.iter().copied().map(encode_uuid).collect();

    let raws: Vec<(String, String)> = self
      .conn
      .call(move |conn| {
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
          .query_map(rusqlite::params_from_iter(params.iter()), |row| {
            Ok((row.get(0)?, row.get(1)?))
          })?
          .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
      })
      .await?;

    raws
      .into_iter()
      .map(|(user_str, group_str)| {
        Ok(Membership {
          user_id:  decode_uuid(&user_str)?,
          group_id: decode_uuid(&group_str)?,
        })
      })
      .collect()
  }

  async fn memberships_for_user(
    &self,
    group_ids: &[Uuid],
    user_id: Uuid,
  ) -> Result<Vec<Membership>> {
    if group_ids.is_empty() {
      return Ok(Vec::new());
    }

    let sql = format!(
      "SELECT user_id, group_id FROM memberships
       WHERE user_id = ? AND group_id IN ({})
       ORDER BY group_id",
      in_list(group_ids.len())
    );
    let mut params = vec![encode_uuid(user_id)];
    params.extend(group_ids.iter().copied().map(encode_uuid));

    let raws: Vec<(String, String)> = self
      .conn
      .call(move |conn| {
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
          .query_map(rusqlite::params_from_iter(params.iter()), |row| {
            Ok((row.get(0)?, row.get(1)?))
          })?
          .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
      })
      .await?;

    raws
      .into_iter()
      .map(|(user_str, group_str)| {
        Ok(Membership {
          user_id:  decode_uuid(&user_str)?,
          group_id: decode_uuid(&group_str)?,
        })
      })
      .collect()
  }

  async fn add_member(&self, group_id: Uuid, user_id: Uuid) -> Result<()> {
    let group_str = encode_uuid(group_id);
    let user_str = encode_uuid(user_id);

    self
      .conn
      .call(move |conn| {
        // OR IGNORE: concurrent sync passes may race on the same edge, and
        // re-adding an existing member must stay a no-op.
        conn.execute(
          "INSERT OR IGNORE INTO memberships (group_id, user_id) VALUES (?1, ?2)",
          rusqlite::params![group_str, user_str],
        )?;
        Ok(())
      })
      .await?;
    Ok(())
  }

  async fn remove_member(&self, group_id: Uuid, user_id: Uuid) -> Result<()> {
    let group_str = encode_uuid(group_id);
    let user_str = encode_uuid(user_id);

    self
      .conn
      .call(move |conn| {
        conn.execute(
          "DELETE FROM memberships WHERE group_id = ?1 AND user_id = ?2",
          rusqlite::params![group_str, user_str],
        )?;
        Ok(())
      })
      .await?;
    Ok(())
  }
}

// ─── RuleStore impl ──────────────────────────────────────────────────────────

impl RuleStore for SqliteStore {
  type Error = Error;

  async fn list_rule_rows(&self) -> Result<Vec<RuleRow>> {
    let raws: Vec<RawRuleRow> = self
      .conn
      .call(|conn| {
        let mut stmt = conn.prepare(
          "SELECT rule_id, field_id, match_mode, match_value, group_id, sort_order
           FROM rules ORDER BY sort_order, rule_id",
        )?;
        let rows = stmt
          .query_map([], |row| {
            Ok(RawRuleRow {
              rule_id:     row.get(0)?,
              field_id:    row.get(1)?,
              match_mode:  row.get(2)?,
              match_value: row.get(3)?,
              group_id:    row.get(4)?,
              sort_order:  row.get(5)?,
            })
          })?
          .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
      })
      .await?;

    raws.into_iter().map(RawRuleRow::into_row).collect()
  }

  async fn get_rule_row(&self, rule_id: Uuid) -> Result<Option<RuleRow>> {
    let id_str = encode_uuid(rule_id);

    let raw: Option<RawRuleRow> = self
      .conn
      .call(move |conn| {
        Ok(
          conn
            .query_row(
              "SELECT rule_id, field_id, match_mode, match_value, group_id, sort_order
               FROM rules WHERE rule_id = ?1",
              rusqlite::params![id_str],
              |row| {
                Ok(RawRuleRow {
                  rule_id:     row.get(0)?,
                  field_id:    row.get(1)?,
                  match_mode:  row.get(2)?,
                  match_value: row.get(3)?,
                  group_id:    row.get(4)?,
                  sort_order:  row.get(5)?,
                })
              },
            )
            .optional()?,
        )
      })
      .await?;

    raw.map(RawRuleRow::into_row).transpose()
  }

  async fn insert_rule_row(&self, row: &RuleRow) -> Result<()> {
    let rule_str = encode_uuid(row.rule_id);
    let field_str = encode_uuid(row.field_id);
    let group_str = encode_uuid(row.group_id);
    let match_mode = row.match_mode.clone();
    let match_value = row.match_value.clone();
    let sort_order = row.sort_order;

    self
      .conn
      .call(move |conn| {
        conn.execute(
          "INSERT INTO rules (rule_id, field_id, match_mode, match_value, group_id, sort_order)
           VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
          rusqlite::params![
            rule_str, field_str, match_mode, match_value, group_str, sort_order,
          ],
        )?;
        Ok(())
      })
      .await?;
    Ok(())
  }

  async fn update_rule_row(&self, row: &RuleRow) -> Result<()> {
    let rule_str = encode_uuid(row.rule_id);
    let field_str = encode_uuid(row.field_id);
    let group_str = encode_uuid(row.group_id);
    let match_mode = row.match_mode.clone();
    let match_value = row.match_value.clone();
    let sort_order = row.sort_order;

    self
      .conn
      .call(move |conn| {
        conn.execute(
          "UPDATE rules
           SET field_id = ?2, match_mode = ?3, match_value = ?4,
               group_id = ?5, sort_order = ?6
           WHERE rule_id = ?1",
          rusqlite::params![
            rule_str, field_str, match_mode, match_value, group_str, sort_order,
          ],
        )?;
        Ok(())
      })
      .await?;
    Ok(())
  }

  async fn delete_rule_row(&self, rule_id: Uuid) -> Result<()> {
    let id_str = encode_uuid(rule_id);

    self
      .conn
      .call(move |conn| {
        conn.execute(
          "DELETE FROM rules WHERE rule_id = ?1",
          rusqlite::params![id_str],
        )?;
        Ok(())
      })
      .await?;
    Ok(())
  }
}
