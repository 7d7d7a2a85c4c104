//! muster command-line driver.
//!
//! Reads `config.toml` (or the path specified with `--config`), opens the
//! SQLite store, and runs the requested synchronization or
//! rule-administration command.
//!
//! This binary is the trigger surface: a profile-change hook calls
//! `muster sync-user <id>`, and `muster rules apply` runs a full sync after
//! any change to the rule set.

use std::path::{Path, PathBuf};

use anyhow::Context as _;
use clap::{Parser, Subcommand};
use muster_core::{
  field::FieldKind,
  rule::{RuleBatchUpdate, apply_rule_form},
  store::{FieldCatalog, MembershipStore, RuleStore},
  sync::{sync_all, sync_user},
};
use muster_store_sqlite::SqliteStore;
use serde::Deserialize;
use tracing::level_filters::LevelFilter;
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

#[derive(Parser)]
#[command(author, version, about = "Rule-based cohort membership synchronizer")]
struct Cli {
  /// Path to the TOML configuration file.
  #[arg(short, long, default_value = "config.toml")]
  config: PathBuf,

  #[command(subcommand)]
  command: Command,
}

#[derive(Subcommand)]
enum Command {
  /// Reconcile the whole user population against the rule set.
  SyncAll,
  /// Reconcile one user, e.g. after a profile change.
  SyncUser { user_id: Uuid },
  /// Inspect or edit the rule set.
  Rules {
    #[command(subcommand)]
    command: RulesCommand,
  },
}

#[derive(Subcommand)]
enum RulesCommand {
  /// Print every persisted rule and whether it is currently active.
  List,
  /// Apply a batch of row edits from a JSON file, then sync if anything
  /// changed.
  Apply {
    /// Path to a JSON-encoded batch payload.
    file: PathBuf,
  },
}

#[derive(Debug, Clone, Deserialize)]
struct Settings {
  /// Path of the SQLite database file.
  store_path: PathBuf,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
  // Initialise tracing.
  tracing_subscriber::fmt()
    .with_env_filter(
      EnvFilter::builder()
        .with_default_directive(LevelFilter::INFO.into())
        .from_env_lossy(),
    )
    .init();

  let cli = Cli::parse();

  // Load configuration.
  let settings = config::Config::builder()
    .add_source(config::File::from(cli.config).required(false))
    .add_source(config::Environment::with_prefix("MUSTER"))
    .build()
    .context("failed to read config file")?;
  let settings: Settings = settings
    .try_deserialize()
    .context("failed to deserialise settings")?;

  let store_path = expand_tilde(&settings.store_path);
  let store = SqliteStore::open(&store_path)
    .await
    .with_context(|| format!("failed to open store at {store_path:?}"))?;

  match cli.command {
    Command::SyncAll => {
      let report = sync_all(&store, &store, &store).await?;
      println!(
        "scanned {} users: {} added, {} removed",
        report.users_scanned, report.added, report.removed
      );
    }
    Command::SyncUser { user_id } => {
      let report = sync_user(&store, &store, &store, user_id).await?;
      println!(
        "{user_id}: {} added, {} removed",
        report.added, report.removed
      );
    }
    Command::Rules { command } => match command {
      RulesCommand::List => list_rules(&store).await?,
      RulesCommand::Apply { file } => apply_rules(&store, &file).await?,
    },
  }

  Ok(())
}

/// Print every persisted rule row, flagging the ones the loader would skip.
async fn list_rules(store: &SqliteStore) -> anyhow::Result<()> {
  let fields = store.list_fields().await?;
  let managed = store.managed_group_ids().await?;
  let rows = store.list_rule_rows().await?;

  if rows.is_empty() {
    println!("no rules configured");
    return Ok(());
  }

  for row in rows {
    let field = fields.iter().find(|f| f.field_id == row.field_id);
    let status = match field {
      None => "inert: field vanished",
      Some(f) if FieldKind::from_tag(&f.kind_tag).is_none() => {
        "inert: unsupported field kind"
      }
      Some(_) if !managed.contains(&row.group_id) => "inert: group not managed",
      Some(_) => "active",
    };
    let field_name = field.map(|f| f.name.as_str()).unwrap_or("?");
    println!(
      "{:>4}  {}  {} {:?} -> {}  [{}]",
      row.sort_order,
      field_name,
      row.match_mode,
      row.match_value,
      row.group_id,
      status
    );
  }
  Ok(())
}

/// Apply a batch payload and, if anything changed, run a full sync.
async fn apply_rules(store: &SqliteStore, file: &Path) -> anyhow::Result<()> {
  let payload = std::fs::read_to_string(file)
    .with_context(|| format!("failed to read {file:?}"))?;
  let batch: RuleBatchUpdate =
    serde_json::from_str(&payload).context("failed to parse batch payload")?;

  let changed = apply_rule_form(store, store, &batch).await?;
  if !changed {
    println!("no changes");
    return Ok(());
  }

  tracing::info!("rule set changed; running full sync");
  let report = sync_all(store, store, store).await?;
  println!(
    "rules updated; scanned {} users: {} added, {} removed",
    report.users_scanned, report.added, report.removed
  );
  Ok(())
}

/// Expand a leading `~` to the user's home directory.
fn expand_tilde(path: &Path) -> PathBuf {
  let s = path.to_string_lossy();
  if let Some(rest) = s.strip_prefix("~/")
    && let Ok(home) = std::env::var("HOME")
  {
    return PathBuf::from(home).join(rest);
  }
  path.to_path_buf()
}
