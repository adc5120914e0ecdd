mod ops;

use anyhow::{bail, Context as _, Result};
use clap::{Parser, Subcommand};
use keel_model::{Action, Kind};
use keel_store::Query;
use ops::Context;
use serde_json::Value;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "keel", version, about = "Keel resource store utilities")]
struct Cli {
    /// TOML configuration file; defaults apply when omitted
    #[arg(long, global = true, env = "KEEL_CONFIG")]
    config: Option<PathBuf>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create every table and trigger (safe to repeat)
    Init,
    /// Ping the database; exits non-zero when unreachable
    Health,
    /// Print the configuration JSON schema
    Schema,
    /// Create or replace the resources of a JSON file (object or array)
    Apply {
        #[arg(long, short)]
        file: PathBuf,
    },
    /// Print one resource
    Get {
        kind: Kind,
        name: String,
        #[arg(long, short)]
        project: Option<String>,
    },
    /// List resources of a kind
    List {
        kind: Kind,
        #[arg(long, short)]
        project: Option<String>,
        /// Only names starting with this prefix
        #[arg(long)]
        prefix: Option<String>,
        /// Drop the spec of every resource
        #[arg(long)]
        metadata_only: bool,
        #[arg(long)]
        offset: Option<u64>,
        #[arg(long)]
        limit: Option<u64>,
    },
    /// Delete one resource; deleting a project removes its resources too
    Delete {
        kind: Kind,
        name: String,
        #[arg(long, short)]
        project: Option<String>,
    },
    /// Most recent write time across the tables of the given kinds
    LastUpdate {
        #[arg(required = true)]
        kinds: Vec<Kind>,
    },
    /// Evaluate a permission with the current roles and bindings
    Can {
        user: String,
        #[arg(value_parser = parse_action)]
        action: Action,
        kind: Kind,
        #[arg(long, short)]
        project: Option<String>,
    },
}

fn parse_action(raw: &str) -> Result<Action, String> {
    serde_json::from_value(Value::String(raw.to_ascii_lowercase()))
        .map_err(|_| format!("unknown action {raw:?} (expected *, read, create, update or delete)"))
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let cfg = keel_config::load_or_default(cli.config.as_deref())?;
    keel_otel::init(&cfg.log);

    match cli.command {
        Commands::Schema => print_json(&keel_config::config_schema_json())?,
        Commands::Health => {
            let store = ops::open_store(&cfg)?;
            if !store.health_check() {
                bail!("database {} is not reachable", cfg.database.path.display());
            }
            println!("ok");
        }
        Commands::Init => {
            Context::open(&cfg)?;
            println!("initialized {}", cfg.database.path.display());
        }
        Commands::Apply { file } => {
            let ctx = Context::open(&cfg)?;
            let content = std::fs::read_to_string(&file)
                .with_context(|| format!("reading {}", file.display()))?;
            let docs = match serde_json::from_str(&content)
                .with_context(|| format!("parsing {}", file.display()))?
            {
                Value::Array(docs) => docs,
                doc => vec![doc],
            };
            let mut applied = Vec::with_capacity(docs.len());
            for doc in docs {
                applied.push(ctx.apply(doc)?);
            }
            print_json(&Value::Array(applied))?;
        }
        Commands::Get {
            kind,
            name,
            project,
        } => {
            let ctx = Context::open(&cfg)?;
            print_json(&ctx.get(kind, ops::parameters(project, name))?)?;
        }
        Commands::List {
            kind,
            project,
            prefix,
            metadata_only,
            offset,
            limit,
        } => {
            let ctx = Context::open(&cfg)?;
            let mut query = Query::new(kind);
            if let Some(prefix) = prefix {
                query = query.with_name_prefix(prefix);
            }
            if metadata_only {
                query = query.metadata_only();
            }
            if offset.is_some() || limit.is_some() {
                query = query.paginate(offset.unwrap_or(0), limit.unwrap_or(u64::MAX >> 1));
            }
            print_json(&ctx.list(query, ops::parameters(project, String::new()))?)?;
        }
        Commands::Delete {
            kind,
            name,
            project,
        } => {
            let ctx = Context::open(&cfg)?;
            ctx.delete(kind, ops::parameters(project, name))?;
        }
        Commands::LastUpdate { kinds } => {
            let ctx = Context::open(&cfg)?;
            let stamp = ctx.store.latest_update_time(&kinds)?;
            println!("{}", stamp.to_rfc3339());
        }
        Commands::Can {
            user,
            action,
            kind,
            project,
        } => {
            let ctx = Context::open(&cfg)?;
            let allowed = ctx.rbac.authorization().has_permission(
                &user,
                action,
                project.as_deref(),
                kind,
            );
            println!("{}", if allowed { "allow" } else { "deny" });
        }
    }
    Ok(())
}

fn print_json(value: &Value) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
