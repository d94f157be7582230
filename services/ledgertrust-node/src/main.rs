use anyhow::{bail, Context};
use ledgertrust_core::{logging, AccountId, EventId, LedgerId, TimelineEvent, TrustConfig, TrustVerdict};
use ledgertrust_trust_db::TrustDatabase;
use ledgertrust_verifier::{LedgerTrustService, MemoryEventStore};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

const NODE_PROTOCOL_VERSION: u32 = 1;
const NODE_RUNTIME_VERSION: u32 = 1;
const DEFAULT_LOCAL_ACCOUNT: &str = "@ledgertrust:localhost";

#[derive(Debug, Serialize)]
struct NodeVersionHandshake {
    version: &'static str,
    runtime_version: u32,
    protocol_version: u32,
}

/// Recorded timelines to replay.
#[derive(Debug, Deserialize)]
struct TimelineFixture {
    /// Account the node publishes markers as
    local_account: Option<AccountId>,
    ledgers: Vec<LedgerFixture>,
}

#[derive(Debug, Deserialize)]
struct LedgerFixture {
    ledger: LedgerId,
    events: Vec<TimelineEvent>,
    #[serde(default)]
    reactions: Vec<ReactionFixture>,
}

#[derive(Debug, Deserialize)]
struct ReactionFixture {
    event_id: EventId,
    symbol: String,
    sender: AccountId,
}

#[derive(Debug, Serialize)]
struct VerdictReport {
    ledger: LedgerId,
    event_id: EventId,
    verdict: TrustVerdict,
}

struct Args {
    config: Option<PathBuf>,
    timeline: PathBuf,
    in_memory: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args: Vec<String> = std::env::args().collect();

    if args.iter().any(|arg| arg == "--version-json") {
        let handshake = NodeVersionHandshake {
            version: env!("CARGO_PKG_VERSION"),
            runtime_version: NODE_RUNTIME_VERSION,
            protocol_version: NODE_PROTOCOL_VERSION,
        };
        println!("{}", serde_json::to_string(&handshake)?);
        return Ok(());
    }

    let args = parse_args(&args)?;
    let config = match &args.config {
        Some(path) => TrustConfig::from_file(path)
            .with_context(|| format!("loading config {}", path.display()))?,
        None => TrustConfig::default(),
    };
    logging::init_with(config.log_format);

    let raw = std::fs::read_to_string(&args.timeline)
        .with_context(|| format!("reading timeline {}", args.timeline.display()))?;
    let fixture: TimelineFixture = serde_json::from_str(&raw).context("parsing timeline")?;

    let local_account = match fixture.local_account {
        Some(account) => account,
        None => AccountId::new(DEFAULT_LOCAL_ACCOUNT)?,
    };
    let store = Arc::new(MemoryEventStore::new(local_account));
    for ledger in &fixture.ledgers {
        for event in &ledger.events {
            store.insert(&ledger.ledger, event.clone())?;
        }
        for reaction in &ledger.reactions {
            store.add_reaction(&ledger.ledger, &reaction.event_id, &reaction.symbol, &reaction.sender)?;
        }
    }

    let db = if args.in_memory {
        TrustDatabase::open_in_memory()?
    } else {
        TrustDatabase::open(&config.database_path)?
    };
    let service = LedgerTrustService::new(store.clone(), Arc::new(db), &config);

    info!(
        ledgers = fixture.ledgers.len(),
        in_memory = args.in_memory,
        "[ledgertrust-node] replay started"
    );

    let mut report = Vec::new();
    for ledger in &fixture.ledgers {
        for event in ledger.events.iter().filter(|event| event.is_summary()) {
            let Some(verdict) = service.check_event(&ledger.ledger, &event.event_id).await? else {
                continue;
            };
            info!(ledger = %ledger.ledger, event_id = %event.event_id, verdict = %verdict, "Summary verified");
            report.push(VerdictReport {
                ledger: ledger.ledger.clone(),
                event_id: event.event_id.clone(),
                verdict,
            });
        }
        let published = service.retry_pending_markers(&ledger.ledger).await?;
        if published > 0 {
            info!(ledger = %ledger.ledger, published, "Late rejection markers published");
        }
    }

    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

fn parse_args(args: &[String]) -> anyhow::Result<Args> {
    let mut config = None;
    let mut timeline = None;
    let mut in_memory = false;

    let mut args_iter = args.iter().skip(1);
    while let Some(arg) = args_iter.next() {
        match arg.as_str() {
            "--config" => match args_iter.next() {
                Some(path) => config = Some(PathBuf::from(path)),
                None => bail!("--config was provided without a path"),
            },
            "--timeline" => match args_iter.next() {
                Some(path) => timeline = Some(PathBuf::from(path)),
                None => bail!("--timeline was provided without a path"),
            },
            "--in-memory" => in_memory = true,
            other => bail!("unknown argument {other}"),
        }
    }

    let Some(timeline) = timeline else {
        bail!("missing required --timeline <path> argument");
    };
    Ok(Args {
        config,
        timeline,
        in_memory,
    })
}
