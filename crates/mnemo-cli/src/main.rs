use std::path::PathBuf;

use anyhow::{anyhow, Result};
use clap::{Args, Parser, Subcommand};
use mnemo_api::{default_namespaces, ApiConfig, MemoryApi};
use mnemo_core::{MemoryId, UpdateFields};
use serde_json::Value;
use ulid::Ulid;

const CLI_CONTRACT_VERSION: &str = "cli.v1";

#[derive(Debug, Parser)]
#[command(name = "mnemo")]
#[command(about = "Path-addressed versioned memory store with session review")]
struct Cli {
    #[arg(long, default_value = "./mnemo.sqlite3")]
    db: PathBuf,

    #[arg(long, default_value = "./snapshots")]
    snapshots: PathBuf,

    /// Session id grouping this invocation's snapshots; a fresh id is
    /// generated when not given.
    #[arg(long)]
    session: Option<String>,

    /// Valid namespaces, comma separated.
    #[arg(long = "namespace", value_delimiter = ',')]
    namespaces: Vec<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Apply pending schema migrations and report the version.
    Migrate,
    Create(CreateArgs),
    Read(AddressArgs),
    Update(UpdateArgs),
    Delete(AddressArgs),
    Alias(AliasArgs),
    Children(ChildrenArgs),
    Orphans {
        #[command(subcommand)]
        command: OrphanCommand,
    },
    Review {
        #[command(subcommand)]
        command: ReviewCommand,
    },
}

#[derive(Debug, Args)]
struct CreateArgs {
    #[arg(long, default_value = "core")]
    ns: String,
    #[arg(long, default_value = "")]
    parent: String,
    #[arg(long)]
    content: String,
    #[arg(long, default_value_t = 0)]
    priority: i64,
    #[arg(long)]
    name: Option<String>,
    #[arg(long)]
    disclosure: Option<String>,
}

#[derive(Debug, Args)]
struct AddressArgs {
    #[arg(long, default_value = "core")]
    ns: String,
    #[arg(long)]
    path: String,
}

#[derive(Debug, Args)]
struct UpdateArgs {
    #[arg(long, default_value = "core")]
    ns: String,
    #[arg(long)]
    path: String,
    #[arg(long)]
    content: Option<String>,
    #[arg(long)]
    priority: Option<i64>,
    #[arg(long)]
    disclosure: Option<String>,
}

#[derive(Debug, Args)]
struct AliasArgs {
    #[arg(long, default_value = "core")]
    ns: String,
    #[arg(long)]
    path: String,
    #[arg(long, default_value = "core")]
    target_ns: String,
    #[arg(long)]
    target_path: String,
    #[arg(long, default_value_t = 0)]
    priority: i64,
    #[arg(long)]
    disclosure: Option<String>,
}

#[derive(Debug, Args)]
struct ChildrenArgs {
    #[arg(long, default_value = "core")]
    ns: String,
    /// List children of this memory id across all of its aliases; when
    /// omitted, list the namespace root.
    #[arg(long)]
    memory_id: Option<i64>,
}

#[derive(Debug, Subcommand)]
enum OrphanCommand {
    List,
    Show {
        #[arg(long)]
        id: i64,
    },
    /// Permanently delete an orphan, repairing the version chain.
    Purge {
        #[arg(long)]
        id: i64,
        /// Skip the still-an-orphan re-check (reviewer override).
        #[arg(long, default_value_t = false)]
        skip_orphan_check: bool,
    },
}

#[derive(Debug, Subcommand)]
enum ReviewCommand {
    Sessions,
    Snapshots {
        #[arg(long)]
        session: String,
    },
    Show {
        #[arg(long)]
        session: String,
        #[arg(long)]
        resource: String,
    },
    Diff {
        #[arg(long)]
        session: String,
        #[arg(long)]
        resource: String,
    },
    Rollback {
        #[arg(long)]
        session: String,
        #[arg(long)]
        resource: String,
    },
    DeleteSnapshot {
        #[arg(long)]
        session: String,
        #[arg(long)]
        resource: String,
    },
    ClearSession {
        #[arg(long)]
        session: String,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let session_id = cli.session.clone().unwrap_or_else(generate_session_id);
    let namespaces =
        if cli.namespaces.is_empty() { default_namespaces() } else { cli.namespaces.clone() };

    let mut api = MemoryApi::open(ApiConfig {
        db_path: cli.db.clone(),
        snapshot_dir: cli.snapshots.clone(),
        session_id,
        namespaces,
    })?;

    run(cli.command, &mut api)
}

fn generate_session_id() -> String {
    format!("sess_{}", Ulid::new().to_string().to_lowercase())
}

fn run(command: Command, api: &mut MemoryApi) -> Result<()> {
    match command {
        // Opening the API already migrated; report where we landed.
        Command::Migrate => emit_json(serde_json::json!({
            "schema_version": mnemo_store_sqlite::LATEST_SCHEMA_VERSION,
            "session_id": api.session_id(),
        })),
        Command::Create(args) => {
            let created = api.create(
                &args.parent,
                &args.ns,
                &args.content,
                args.priority,
                args.name.as_deref(),
                args.disclosure.as_deref(),
            )?;
            emit_json(serde_json::to_value(&created)?)
        }
        Command::Read(args) => {
            let memory = api
                .read(&args.path, &args.ns)?
                .ok_or_else(|| anyhow!("'{}://{}' not found", args.ns, args.path))?;
            emit_json(serde_json::to_value(&memory)?)
        }
        Command::Update(args) => {
            let fields = UpdateFields {
                content: args.content,
                priority: args.priority,
                disclosure: args.disclosure,
            };
            let outcome = api.update(&args.path, &args.ns, fields)?;
            emit_json(serde_json::to_value(&outcome)?)
        }
        Command::Delete(args) => {
            let removed = api.delete(&args.path, &args.ns)?;
            emit_json(serde_json::to_value(&removed)?)
        }
        Command::Alias(args) => {
            let created = api.add_alias(
                &args.path,
                &args.ns,
                &args.target_path,
                &args.target_ns,
                args.priority,
                args.disclosure.as_deref(),
            )?;
            emit_json(serde_json::to_value(&created)?)
        }
        Command::Children(args) => {
            let children = match args.memory_id {
                Some(id) => api.children_of(MemoryId(id))?,
                None => api.children_at_root(&args.ns)?,
            };
            emit_json(serde_json::to_value(&children)?)
        }
        Command::Orphans { command } => run_orphans(command, api),
        Command::Review { command } => run_review(command, api),
    }
}

fn run_orphans(command: OrphanCommand, api: &mut MemoryApi) -> Result<()> {
    match command {
        OrphanCommand::List => {
            let orphans = api.list_orphans()?;
            emit_json(serde_json::to_value(&orphans)?)
        }
        OrphanCommand::Show { id } => {
            let detail = api
                .orphan_detail(MemoryId(id))?
                .ok_or_else(|| anyhow!("memory {id} not found"))?;
            emit_json(serde_json::to_value(&detail)?)
        }
        OrphanCommand::Purge { id, skip_orphan_check } => {
            let outcome = api.permanently_delete(MemoryId(id), !skip_orphan_check)?;
            emit_json(serde_json::to_value(&outcome)?)
        }
    }
}

fn run_review(command: ReviewCommand, api: &mut MemoryApi) -> Result<()> {
    match command {
        ReviewCommand::Sessions => {
            let sessions = api.list_sessions()?;
            emit_json(serde_json::to_value(&sessions)?)
        }
        ReviewCommand::Snapshots { session } => {
            let snapshots = api.list_snapshots(&session)?;
            emit_json(serde_json::to_value(&snapshots)?)
        }
        ReviewCommand::Show { session, resource } => {
            let record = api
                .get_snapshot(&session, &resource)?
                .ok_or_else(|| anyhow!("snapshot for '{resource}' not found in '{session}'"))?;
            emit_json(serde_json::to_value(&record)?)
        }
        ReviewCommand::Diff { session, resource } => {
            let diff = api.diff(&session, &resource)?;
            emit_json(serde_json::to_value(&diff)?)
        }
        ReviewCommand::Rollback { session, resource } => {
            let outcome = api.rollback(&session, &resource)?;
            emit_json(serde_json::to_value(&outcome)?)
        }
        ReviewCommand::DeleteSnapshot { session, resource } => {
            let deleted = api.delete_snapshot(&session, &resource)?;
            if !deleted {
                return Err(anyhow!("snapshot for '{resource}' not found in '{session}'"));
            }
            emit_json(serde_json::json!({ "session_id": session, "resource_id": resource, "deleted": true }))
        }
        ReviewCommand::ClearSession { session } => {
            let count = api.clear_session(&session)?;
            emit_json(serde_json::json!({ "session_id": session, "snapshots_deleted": count }))
        }
    }
}

fn emit_json(value: Value) -> Result<()> {
    let wrapped = match value {
        Value::Object(mut object) => {
            object.insert(
                "contract_version".to_string(),
                Value::String(CLI_CONTRACT_VERSION.to_string()),
            );
            Value::Object(object)
        }
        other => serde_json::json!({
            "contract_version": CLI_CONTRACT_VERSION,
            "payload": other
        }),
    };
    println!("{}", serde_json::to_string_pretty(&wrapped)?);
    Ok(())
}
