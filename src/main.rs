use std::path::PathBuf;
use std::time::Duration;

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

use kestrel_approval::{ApprovalQueue, ApprovalRecord, RecordLog, Whitelist};
use kestrel_core::config::KestrelConfig;

#[derive(Parser)]
#[command(name = "kestrel", version, about = "Inspect and decide workflow approvals")]
struct Cli {
    /// Path to config file
    #[arg(short, long, default_value = "kestrel.toml")]
    config: PathBuf,

    /// Approval store directory (overrides [approval].store_dir)
    #[arg(long, env = "KESTREL_STORE")]
    store: Option<PathBuf>,

    /// Print records as JSON
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List pending approvals
    Pending {
        /// Only this session
        #[arg(short, long)]
        session: Option<String>,
    },
    /// Show one record (id or unique id prefix)
    Show { id: String },
    /// List every record of a session
    History { session: String },
    /// Approve a pending record
    Approve {
        id: String,
        #[arg(short, long)]
        approver: String,
        /// Whitelist the record's scope for this many seconds (default from config)
        #[arg(long)]
        ttl_secs: Option<u64>,
        #[arg(long)]
        comment: Option<String>,
    },
    /// Deny a pending record
    Deny {
        id: String,
        #[arg(short, long)]
        approver: String,
        #[arg(short, long)]
        reason: String,
    },
    /// Check whether a session (or session + tool) is whitelisted
    Whitelisted {
        session: String,
        #[arg(long)]
        tool: Option<String>,
    },
    /// Rewrite the record log with one line per record
    Compact,
    /// Show effective configuration
    Config,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut config = if cli.config.exists() {
        KestrelConfig::load(&cli.config)?
    } else {
        KestrelConfig::default()
    };
    if let Some(store) = &cli.store {
        config.approval.store_dir = store.display().to_string();
    }

    let default_filter = config
        .log
        .filter
        .clone()
        .unwrap_or_else(|| "kestrel=info,warn".to_string());
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_env("KESTREL_LOG")
                .or_else(|_| EnvFilter::try_from_default_env())
                .unwrap_or_else(|_| EnvFilter::new(default_filter)),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    if let Commands::Config = cli.command {
        println!("{}", toml::to_string_pretty(&config)?);
        return Ok(());
    }

    let store = config.approval.store_path();
    debug!(store = %store.display(), "Opening approval store");
    let log = RecordLog::open(&store)
        .with_context(|| format!("opening approval store {}", store.display()))?
        .with_fsync(config.approval.fsync);
    let queue = ApprovalQueue::new(log, Whitelist::new()).with_scope(config.approval.whitelist_scope);

    let result = dispatch(&cli, &config, &queue);
    queue.close()?;
    result
}

fn dispatch(cli: &Cli, config: &KestrelConfig, queue: &ApprovalQueue) -> anyhow::Result<()> {
    match &cli.command {
        Commands::Pending { session } => {
            let records = match session {
                Some(session) => queue.list_pending(session)?,
                None => queue.list_all_pending()?,
            };
            if cli.json {
                println!("{}", serde_json::to_string_pretty(&records)?);
            } else if records.is_empty() {
                println!("No pending approvals.");
            } else {
                for record in &records {
                    println!("{}", summary_line(record));
                }
            }
        }
        Commands::Show { id } => {
            let id = resolve_id(queue, id)?;
            let record = queue
                .get(&id)?
                .with_context(|| format!("record {} disappeared", id))?;
            print_record(&record, cli.json)?;
        }
        Commands::History { session } => {
            let records = queue.records(session)?;
            if cli.json {
                println!("{}", serde_json::to_string_pretty(&records)?);
            } else {
                for record in &records {
                    println!("{}", summary_line(record));
                }
            }
        }
        Commands::Approve {
            id,
            approver,
            ttl_secs,
            comment,
        } => {
            let id = resolve_id(queue, id)?;
            let ttl = ttl_secs
                .map(Duration::from_secs)
                .unwrap_or_else(|| config.approval.default_ttl());
            let record = queue.approve_with_comment(&id, approver, comment.as_deref(), ttl)?;
            info!(record_id = %record.id, "Approved");
            print_record(&record, cli.json)?;
        }
        Commands::Deny {
            id,
            approver,
            reason,
        } => {
            let id = resolve_id(queue, id)?;
            let record = queue.deny(&id, approver, reason)?;
            info!(record_id = %record.id, "Denied");
            print_record(&record, cli.json)?;
        }
        Commands::Whitelisted { session, tool } => {
            let covered = match tool {
                Some(tool) => queue.is_tool_whitelisted(session, tool),
                None => queue.is_whitelisted(session),
            };
            if cli.json {
                println!("{}", serde_json::json!({ "session": session, "tool": tool, "whitelisted": covered }));
            } else {
                println!("{}", if covered { "whitelisted" } else { "not whitelisted" });
            }
        }
        Commands::Compact => {
            queue.compact()?;
            println!("Compacted {}", config.approval.store_path().display());
        }
        Commands::Config => {}
    }
    Ok(())
}

fn resolve_id(queue: &ApprovalQueue, prefix: &str) -> anyhow::Result<String> {
    match queue.find_by_prefix(prefix)? {
        Some(id) => Ok(id),
        None => bail!("no approval record matches '{}'", prefix),
    }
}

fn summary_line(record: &ApprovalRecord) -> String {
    let short: String = record.id.chars().take(8).collect();
    let mut line = format!(
        "{}  {:<8}  {}  {}  {}",
        short,
        record.decision,
        record.requested_at.format("%Y-%m-%d %H:%M:%S"),
        record.session_id,
        record.tool
    );
    if let Some(reason) = &record.reason {
        line.push_str(&format!("  ({})", reason));
    }
    line
}

fn print_record(record: &ApprovalRecord, json: bool) -> anyhow::Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(record)?);
        return Ok(());
    }
    println!("id:         {}", record.id);
    println!("session:    {}", record.session_id);
    println!("tool:       {}", record.tool);
    println!("decision:   {}", record.decision);
    println!("requested:  {}", record.requested_at.to_rfc3339());
    if let Some(at) = record.decided_at() {
        println!("decided:    {}", at.to_rfc3339());
    }
    if let Some(approver) = &record.approver {
        println!("approver:   {}", approver);
    }
    if record.auto {
        println!("auto:       yes");
    }
    if let Some(reason) = &record.reason {
        println!("reason:     {}", reason);
    }
    if let Some(comment) = &record.comment {
        println!("comment:    {}", comment);
    }
    if let Some(expires) = &record.expires_at {
        println!("whitelist:  until {}", expires.to_rfc3339());
    }
    for path in &record.paths {
        println!("path:       {}", path.display());
    }
    if !record.params.is_null() {
        println!("params:     {}", record.params);
    }
    Ok(())
}
