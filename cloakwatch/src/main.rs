// cloakwatch/src/main.rs
//
// Cloakwatch — ad cloaking / landing-page divergence detection and scoring
//
// Four operational modes:
//   batch   — load an ad feed, run one scheduled batch, print the report
//   tail    — follow a live JSONL ad feed, scoring each record on arrival
//   replay  — replay a captured feed at scaled speed (testing/research)
//   eval    — labeled-dataset evaluation harness
//
// Usage:
//   cloakwatch --mode batch --feed ads.jsonl --task-type divergence-test
//   cloakwatch --mode tail  --feed /var/feed/ads.jsonl
//   cloakwatch --mode replay --feed captured.jsonl --speed 10.0
//   cloakwatch --mode eval  --feed labeled.jsonl --eval-threshold 61

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Result;
use chrono::Utc;
use clap::{Parser, ValueEnum};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use cloakwatch::alerts::Alerter;
use cloakwatch::batch::{AdOutcome, BatchDriver, BatchOptions};
use cloakwatch::engine::suspicion::SuspicionScorer;
use cloakwatch::engine::winning;
use cloakwatch::eval;
use cloakwatch::notify::NotifyHub;
use cloakwatch::records::{
    self as records, Ad, AdFeedRecord, RiskBand, ScheduleType, SuspicionAssessment, TaskRequest,
    TaskType,
};
use cloakwatch::signals::divergence::NormalizePolicy;
use cloakwatch::state::store::AdState;

// ── CLI ───────────────────────────────────────────────────────────────────────

#[derive(Parser)]
#[command(
    name    = "cloakwatch",
    about   = "Ad cloaking / landing-page divergence detection and scoring",
    version = env!("CARGO_PKG_VERSION"),
)]
struct Cli {
    #[arg(long, value_enum, default_value = "batch")]
    mode: Mode,

    #[arg(long, default_value = "/tmp/cloakwatch_feed.jsonl",
          help = "Ad feed JSONL path")]
    feed: PathBuf,

    #[arg(long, default_value = "1.0", help = "Replay speed multiplier")]
    speed: f64,

    #[arg(long, default_value = "/tmp/cloakwatch_output",
          help = "Alert/audit output directory")]
    output: PathBuf,

    #[arg(long, value_enum, default_value = "divergence-test",
          help = "Scheduled task type (batch mode)")]
    task_type: TaskType,

    #[arg(long, value_enum, default_value = "daily",
          help = "Schedule type reported by the trigger (batch mode)")]
    schedule: ScheduleType,

    #[arg(long, default_value = "8", help = "Worker pool size")]
    concurrency: usize,

    #[arg(long, default_value = "300", help = "Wall-clock budget per run, seconds")]
    budget_secs: u64,

    #[arg(long, default_value = "10", help = "Per-ad snapshot fetch timeout, seconds")]
    timeout_secs: u64,

    #[arg(long, default_value = "default", help = "Tenant for emitted alerts")]
    tenant: String,

    #[arg(long, default_value = "61", help = "Positive threshold for eval mode")]
    eval_threshold: u8,
}

#[derive(Clone, ValueEnum)]
enum Mode {
    Batch,  // one scheduled run over a loaded feed
    Tail,   // follow a live JSONL feed
    Replay, // replay a static JSONL feed at scaled speed
    Eval,   // labeled-dataset evaluation
}

// ── Terminal output ───────────────────────────────────────────────────────────

fn print_banner() {
    println!("\x1b[1m");
    println!("   ██████╗██╗      ██████╗  █████╗ ██╗  ██╗");
    println!("  ██╔════╝██║     ██╔═══██╗██╔══██╗██║ ██╔╝");
    println!("  ██║     ██║     ██║   ██║███████║█████╔╝ ");
    println!("  ██║     ██║     ██║   ██║██╔══██║██╔═██╗   W A T C H");
    println!("  ╚██████╗███████╗╚██████╔╝██║  ██║██║  ██╗");
    println!("   ╚═════╝╚══════╝ ╚═════╝ ╚═╝  ╚═╝╚═╝  ╚═╝");
    println!("\x1b[0m");
    println!("  \x1b[90mLanding-page divergence detection and ad scoring\x1b[0m\n");
}

fn print_flag(assessment: &SuspicionAssessment, ad: &Ad) {
    let (color, icon) = match assessment.band {
        RiskBand::HighProbability => ("\x1b[91;1m", "🔴"),
        RiskBand::Medium => ("\x1b[93;1m", "🟡"),
        RiskBand::Low => ("\x1b[92m", "🟢"),
    };
    let reset = "\x1b[0m";
    let ev = assessment
        .top_evidence
        .iter()
        .take(3)
        .cloned()
        .collect::<Vec<_>>()
        .join(" | ");

    println!("\n{}{} {}{}", color, icon, assessment.band, reset);
    println!("  Ad        : {}{}{}", color, ad.id, reset);
    println!("  Advertiser: {}", ad.advertiser_id);
    println!("  Domain    : {}", ad.domain);
    println!("  Score     : {}{}{}", color, assessment.score, reset);
    println!("  Evidence  : {}", ev);
}

fn print_batch_summary(state: &AdState, report: &records::BatchReport) {
    println!("\n\x1b[1m── batch report ──\x1b[0m");
    println!("  success      : {}", report.success);
    println!("  processed    : {}", report.processed_count);
    println!("  divergences  : {}", report.divergences_found);
    println!("  errors       : {}", report.errors_count);
    println!("  skipped      : {}", report.skipped_count);
    println!("  invalid urls : {}", report.invalid_targets);
    println!("  completed at : {}", report.completed_at);

    let mut ads = state.all_ads();
    ads.sort_by(|a, b| b.suspicion_score.cmp(&a.suspicion_score));
    if !ads.is_empty() {
        println!("\n\x1b[1m── top suspects ──\x1b[0m");
        for ad in ads.iter().take(10) {
            let band = RiskBand::from_score(ad.suspicion_score);
            let cloaked = if ad.is_cloaked { " [cloaked]" } else { "" };
            println!(
                "  {:3}  {:16}  {:24}  {}{}",
                ad.suspicion_score, band, ad.domain, ad.id, cloaked
            );
        }
    }

    let stats = winning::stats(state.all_ads().iter(), Utc::now());
    println!("\n\x1b[1m── winning tiers ──\x1b[0m");
    println!(
        "  champions={} strong={} promising={} testing={}  avg={:.1}",
        stats.champions, stats.strong, stats.promising, stats.testing, stats.avg_total
    );
}

async fn print_stats_loop(state: Arc<AdState>, start: Instant) {
    loop {
        tokio::time::sleep(Duration::from_secs(30)).await;
        let elapsed = start.elapsed().as_secs_f64();
        let checks = state.total_checks.load(std::sync::atomic::Ordering::Relaxed);
        let div = state
            .total_divergences
            .load(std::sync::atomic::Ordering::Relaxed);
        println!(
            "\n\x1b[1m── stats  uptime={:.0}s  ads={}  checks={}  divergences={}  unread_alerts={} ──\x1b[0m",
            elapsed,
            state.n_ads(),
            checks,
            div,
            state.unread_alerts()
        );
    }
}

// ── Feed sources ──────────────────────────────────────────────────────────────

async fn tail_jsonl(path: PathBuf, tx: mpsc::Sender<AdFeedRecord>, seek_end: bool) -> Result<()> {
    let file = tokio::fs::File::open(&path).await?;
    let mut lines = BufReader::new(file).lines();

    if seek_end {
        while lines.next_line().await?.is_some() {} // consume existing
    }

    info!("Tailing {}", path.display());
    loop {
        match lines.next_line().await? {
            Some(line) => {
                let line = line.trim().to_string();
                if line.is_empty() {
                    continue;
                }
                match serde_json::from_str::<AdFeedRecord>(&line) {
                    Ok(rec) => {
                        if tx.send(rec).await.is_err() {
                            break;
                        }
                    }
                    Err(e) => warn!("Parse error: {e}"),
                }
            }
            None => tokio::time::sleep(Duration::from_millis(50)).await,
        }
    }
    Ok(())
}

async fn replay_jsonl(path: PathBuf, tx: mpsc::Sender<AdFeedRecord>, speed: f64) -> Result<()> {
    let content = tokio::fs::read_to_string(&path).await?;
    let mut records: Vec<(f64, AdFeedRecord)> = Vec::new();

    for line in content.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if let Ok(rec) = serde_json::from_str::<AdFeedRecord>(line) {
            let ts = rec
                .snapshots
                .first()
                .map(|s| s.captured_at)
                .unwrap_or(rec.ad.start_date)
                .timestamp_millis() as f64;
            records.push((ts, rec));
        }
    }

    if records.is_empty() {
        return Ok(());
    }
    records.sort_by(|a, b| a.0.partial_cmp(&b.0).unwrap());

    let base_ts = records[0].0;
    let base_wall = Instant::now();

    for (ts, rec) in records {
        let offset = (ts - base_ts) / speed / 1000.0;
        let target = base_wall + Duration::from_secs_f64(offset);
        let now = Instant::now();
        if target > now {
            tokio::time::sleep(target - now).await;
        }
        if tx.send(rec).await.is_err() {
            break;
        }
    }
    Ok(())
}

async fn load_feed(path: &PathBuf, driver: &Arc<BatchDriver<AdState>>) -> Result<usize> {
    let content = tokio::fs::read_to_string(path).await?;
    let mut n = 0usize;
    for line in content.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        match serde_json::from_str::<AdFeedRecord>(line) {
            Ok(rec) => {
                driver.ingest(&rec).await;
                n += 1;
            }
            Err(e) => warn!("Feed parse error: {e}"),
        }
    }
    Ok(n)
}

// ── Main ──────────────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env().add_directive("cloakwatch=info".parse()?),
        )
        .compact()
        .init();

    let cli = Cli::parse();
    print_banner();

    if let Mode::Eval = cli.mode {
        println!("  Mode: \x1b[96mEVAL\x1b[0m  |  {}\n", cli.feed.display());
        let result = eval::Evaluator::new(cli.eval_threshold)
            .run_dataset(&cli.feed)
            .await?;
        eval::report::print_markdown(&result);
        return Ok(());
    }

    // Explicit per-process state: created here, cleared before exit.
    let state = Arc::new(AdState::new());
    let hub = Arc::new(NotifyHub::new());
    let alerter = Arc::new(Alerter::new(Arc::clone(&state), Some(cli.output.clone())));
    let driver = Arc::new(BatchDriver::new(
        Arc::clone(&state),
        Arc::clone(&state),
        SuspicionScorer::default(),
        alerter,
        Arc::clone(&hub),
        NormalizePolicy::default(),
        BatchOptions {
            concurrency: cli.concurrency,
            per_ad_timeout: Duration::from_secs(cli.timeout_secs),
            wall_budget: Duration::from_secs(cli.budget_secs),
            ..BatchOptions::default()
        },
        cli.tenant.clone(),
    ));
    let start = Instant::now();

    match cli.mode {
        Mode::Batch => {
            println!("  Mode: \x1b[96mBATCH\x1b[0m  |  {}", cli.feed.display());
            println!("  Output: \x1b[90m{}\x1b[0m\n", cli.output.display());

            let n = load_feed(&cli.feed, &driver).await?;
            info!("Loaded {n} feed records");

            let report = driver
                .run(TaskRequest {
                    task_type: cli.task_type,
                    schedule_type: cli.schedule,
                })
                .await;
            print_batch_summary(&state, &report);
            state.clear();
        }

        Mode::Tail | Mode::Replay => {
            let (tx, mut rx) = mpsc::channel::<AdFeedRecord>(16384);

            match cli.mode {
                Mode::Tail => {
                    println!("  Mode: \x1b[96mTAIL\x1b[0m  |  {}", cli.feed.display());
                    println!("  Output: \x1b[90m{}\x1b[0m\n", cli.output.display());
                    let path = cli.feed.clone();
                    tokio::spawn(async move {
                        tail_jsonl(path, tx, true).await.ok();
                    });
                }
                _ => {
                    println!(
                        "  Mode: \x1b[93mREPLAY\x1b[0m  |  {}  speed={:.1}x",
                        cli.feed.display(),
                        cli.speed
                    );
                    println!("  Output: \x1b[90m{}\x1b[0m\n", cli.output.display());
                    let path = cli.feed.clone();
                    let speed = cli.speed;
                    tokio::spawn(async move {
                        replay_jsonl(path, tx, speed).await.ok();
                    });
                }
            }

            tokio::spawn(print_stats_loop(Arc::clone(&state), start));
            tokio::spawn(Arc::clone(&state).housekeeping_loop());

            println!("  Press Ctrl+C to stop.\n");

            // One task per record — ads are independent, order is irrelevant
            while let Some(rec) = rx.recv().await {
                let d = Arc::clone(&driver);
                tokio::spawn(async move {
                    d.ingest(&rec).await;
                    if let AdOutcome::Scored(a) = d.process_ad(&rec.ad.id).await {
                        if a.band != RiskBand::Low {
                            print_flag(&a, &rec.ad);
                        }
                    }
                });
            }

            state.clear();
        }

        Mode::Eval => unreachable!(),
    }

    Ok(())
}
