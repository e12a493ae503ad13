//! blocksync command-line driver.
//!
//! Runs a short editing session against an in-memory store and prints the
//! resulting document and stream. Useful for watching the engine's logs.
//!
//! Usage:
//!   cargo run -p blocksync-cli
//!   RUST_LOG=blocksync_client=debug cargo run -p blocksync-cli -- --write-delay-ms 20
//!   cargo run -p blocksync-cli -- --fail-creates --json

use std::path::PathBuf;
use std::rc::Rc;
use std::time::Duration;

use anyhow::Result;
use clap::Parser;
use serde_json::json;
use tracing_subscriber::{EnvFilter, fmt};

use blocksync_client::{
    MemoryStore, NoticeState, RowStream, SessionUpdate, StoreError, StoreOp, SyncConfig, SyncSession, open_session,
};
use blocksync_types::{BlockChange, BlockId, BlockKind, Collection};

/// Drive a blocksync session over an in-memory store.
#[derive(Parser, Debug)]
#[command(name = "blocksync")]
#[command(about = "Run a blocksync editing session against an in-memory store")]
struct Args {
    /// TOML file with engine settings
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Make the remote reject block creation
    #[arg(long)]
    fail_creates: bool,

    /// Hold every remote write this long
    #[arg(long, default_value_t = 0)]
    write_delay_ms: u64,

    /// Print rows as JSON instead of an outline
    #[arg(long)]
    json: bool,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    // Logs go to stderr; stdout carries the result
    fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into()))
        .with_writer(std::io::stderr)
        .with_ansi(false)
        .init();

    let args = Args::parse();
    let config = match &args.config {
        Some(path) => SyncConfig::load(path)?,
        None => SyncConfig::default(),
    };

    let local_set = tokio::task::LocalSet::new();
    local_set.run_until(run(args, config)).await
}

async fn run(args: Args, config: SyncConfig) -> Result<()> {
    let store = MemoryStore::with_ids("b_", 100);
    store.set_write_delay(Duration::from_millis(args.write_delay_ms));
    seed(&store, &config.blocks_collection);

    let mut session = open_session(Rc::new(store.clone()), config).await?;
    let mut notices = session.notices();
    tracing::info!(blocks = session.blocks().len(), "session open");

    // ── Edit the document ────────────────────────────────────────────────
    if args.fail_creates {
        store.fail_next(StoreOp::Create, StoreError::Rejected("creation disabled".into()));
    }
    session.set_form_fields(["email", "name", "phone"]);
    session.focus(&BlockId::new("f1"));
    let draft = session.insert_block(BlockKind::Field)?;
    tracing::info!(draft = %draft.id.short(), field = ?draft.field_id, "inserted field");
    session.set_field(&BlockId::new("s1"), &BlockChange::Title("Contact details".into()))?;
    session.insert_block(BlockKind::Section)?;
    report(session.settle().await);

    // ── Edit a stream ────────────────────────────────────────────────────
    let responses = Collection::Responses;
    session.attach_stream(RowStream::new(responses.clone())).await?;
    session.set_cell(&responses, "r1", "email", json!("ada@example.com"))?;
    store.external_insert(&responses, json!({"id": "r3", "email": "grace@example.com"}));
    report(session.settle().await);

    print_document(&session, args.json)?;
    print_stream(&session, &responses, args.json)?;

    let failed = notices
        .drain()
        .into_iter()
        .filter(|n| matches!(n.state, NoticeState::Failed(_)))
        .count();
    tracing::info!(
        failed,
        failed_writes = session.ledger().failed_digests().count(),
        "session settled"
    );
    Ok(())
}

fn seed(store: &MemoryStore, blocks: &Collection) {
    store.seed(
        blocks,
        vec![
            json!({"id": "s1", "type": "section", "local_index": 0, "title_html": "Contact"}),
            json!({"id": "f1", "type": "field", "parent_id": "s1", "local_index": 1, "form_field_id": "email"}),
            json!({"id": "t1", "type": "text", "parent_id": "s1", "local_index": 2, "body_html": "<p>Thanks!</p>"}),
        ],
    );
    store.seed(
        &Collection::Responses,
        vec![
            json!({"id": "r1", "email": "ada@old.example"}),
            json!({"id": "r2", "email": "alan@example.com"}),
        ],
    );
}

fn report(updates: Vec<SessionUpdate>) {
    for update in updates {
        match update {
            SessionUpdate::Resolved { draft, block, rewritten } => {
                tracing::info!(draft = %draft.short(), %block, rewritten, "draft resolved")
            }
            SessionUpdate::CreateFailed { draft, reason } => {
                tracing::warn!(draft = %draft.short(), %reason, "create failed")
            }
            SessionUpdate::WriteResolved { digest, success } => {
                tracing::debug!(digest = %digest.short(), success, "write resolved")
            }
            SessionUpdate::Merged { collection, key, result } => {
                tracing::info!(%collection, %key, ?result, "remote change merged")
            }
            other => tracing::trace!(?other, "update"),
        }
    }
}

fn print_document(session: &SyncSession, as_json: bool) -> Result<()> {
    if as_json {
        let rows: Vec<_> = session.blocks().iter().map(|b| b.to_row()).collect();
        println!("{}", serde_json::to_string_pretty(&rows)?);
        return Ok(());
    }
    for node in session.document().hierarchy() {
        println!("{:>2} {} {}", node.block.local_index, node.block.kind, node.block.id);
        for child in &node.children {
            println!("{:>2}   {} {}", child.local_index, child.kind, child.id);
        }
    }
    Ok(())
}

fn print_stream(session: &SyncSession, collection: &Collection, as_json: bool) -> Result<()> {
    let Some(stream) = session.stream(collection) else {
        return Ok(());
    };
    println!("{collection} ({} rows)", stream.count());
    for row in stream.rows() {
        if as_json {
            println!("{}", serde_json::to_string(&row.fields)?);
        } else {
            let email = row.get("email").and_then(|v| v.as_str()).unwrap_or("-");
            println!("  {} {}", row.key, email);
        }
    }
    Ok(())
}
