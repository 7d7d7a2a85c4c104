//! SQL schema for the muster SQLite store.
//!
//! Executed once at connection startup. Future migrations will be gated on
//! the `user_version` pragma.

/// Full schema DDL; idempotent thanks to `CREATE TABLE IF NOT EXISTS`.
///
/// UUID columns hold hyphenated lowercase strings, so their TEXT ordering
/// equals `uuid::Uuid` byte ordering — the `ORDER BY user_id` bulk queries
/// depend on that.
pub const SCHEMA: &str = "
PRAGMA journal_mode = WAL;
PRAGMA foreign_keys = ON;

CREATE TABLE IF NOT EXISTS users (
    user_id    TEXT PRIMARY KEY,
    name       TEXT NOT NULL,
    created_at TEXT NOT NULL    -- ISO 8601 UTC
);

CREATE TABLE IF NOT EXISTS fields (
    field_id TEXT PRIMARY KEY,
    name     TEXT NOT NULL,
    kind     TEXT NOT NULL      -- 'checkbox' | 'menu' | 'text' | other (not evaluated)
);

CREATE TABLE IF NOT EXISTS field_values (
    user_id  TEXT NOT NULL REFERENCES users(user_id),
    field_id TEXT NOT NULL REFERENCES fields(field_id),
    value    TEXT NOT NULL,
    PRIMARY KEY (user_id, field_id)
);

CREATE TABLE IF NOT EXISTS groups (
    group_id TEXT PRIMARY KEY,
    name     TEXT NOT NULL,
    managed  INTEGER NOT NULL DEFAULT 0
);

CREATE TABLE IF NOT EXISTS memberships (
    group_id TEXT NOT NULL REFERENCES groups(group_id),
    user_id  TEXT NOT NULL REFERENCES users(user_id),
    PRIMARY KEY (group_id, user_id)
);

-- No foreign keys on field_id/group_id: a vanished field or group makes a
-- rule inert, it never breaks the row.
CREATE TABLE IF NOT EXISTS rules (
    rule_id     TEXT PRIMARY KEY,
    field_id    TEXT NOT NULL,
    match_mode  TEXT NOT NULL,
    match_value TEXT NOT NULL,
    group_id    TEXT NOT NULL,
    sort_order  INTEGER NOT NULL
);

CREATE INDEX IF NOT EXISTS memberships_user_idx   ON memberships(user_id);
CREATE INDEX IF NOT EXISTS field_values_field_idx ON field_values(field_id);
CREATE INDEX IF NOT EXISTS rules_sort_idx         ON rules(sort_order);

PRAGMA user_version = 1;
";
