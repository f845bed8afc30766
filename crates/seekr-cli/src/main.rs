use std::io::{self, BufRead, Read, Write};
use std::path::{Path, PathBuf};
use std::str::FromStr;

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Duration, Utc};
use clap::{Parser, Subcommand, ValueEnum};
use seekr_core::{JobDraft, TriageStatus, UnknownTriageStatus};
use seekr_storage::{JobQuery, JobStore, SortKey, SqliteJobStore, TriageFilter};
use seekr_sync::{AuditReport, GroupSummary, JobSync, SyncConfig};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "seekr-cli")]
#[command(about = "Seek job tracker: ingest, deduplicate and browse scraped listings")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Create or upgrade the jobs table.
    Migrate,
    /// Upsert candidates from a JSON array or JSON-lines file ("-" for stdin).
    Ingest {
        path: PathBuf,
        #[arg(long)]
        json: bool,
    },
    /// Remove rows that share an identity key, keeping the earliest seen.
    Sweep {
        #[arg(long)]
        dry_run: bool,
        /// Skip the confirmation prompt.
        #[arg(long, short)]
        yes: bool,
    },
    /// Report duplicates without changing anything.
    Audit {
        #[arg(long)]
        json: bool,
    },
    /// Recompute every row's region from its location.
    BackfillRegions,
    /// Print the region a location string resolves to.
    Region { location: String },
    Query {
        #[arg(long)]
        search: Option<String>,
        #[arg(long)]
        region: Option<String>,
        #[arg(long)]
        job_type: Option<String>,
        /// all, unreviewed, yes, no or gsv.
        #[arg(long, default_value = "all")]
        triage: TriageFilter,
        #[arg(long)]
        since_days: Option<i64>,
        #[arg(long, value_enum, default_value_t = SortArg::FirstSeen)]
        sort: SortArg,
        #[arg(long, default_value_t = 50)]
        limit: u32,
        #[arg(long, default_value_t = 0)]
        offset: u32,
        #[arg(long)]
        json: bool,
    },
    Stats {
        #[arg(long)]
        json: bool,
    },
    /// Set a triage verdict: yes, no, gsv or clear.
    Triage { id: i64, verdict: Verdict },
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum SortArg {
    FirstSeen,
    DateListed,
}

impl From<SortArg> for SortKey {
    fn from(arg: SortArg) -> Self {
        match arg {
            SortArg::FirstSeen => SortKey::FirstSeen,
            SortArg::DateListed => SortKey::DateListed,
        }
    }
}

/// A triage status, or `clear` to remove one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Verdict(Option<TriageStatus>);

impl FromStr for Verdict {
    type Err = UnknownTriageStatus;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.trim().eq_ignore_ascii_case("clear") {
            return Ok(Verdict(None));
        }
        s.parse().map(|status| Verdict(Some(status)))
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();
    let config = SyncConfig::from_env();

    match cli.command.unwrap_or(Commands::Stats { json: false }) {
        Commands::Migrate => {
            open_store(&config).await?;
            println!("migrations applied: {}", config.database_url);
        }
        Commands::Ingest { path, json } => {
            let text = read_input(&path).await?;
            let drafts = parse_drafts(&text).with_context(|| format!("parsing {}", path.display()))?;
            let sync = JobSync::from_config(open_store(&config).await?, &config)?;
            let summary = sync.ingest(drafts).await;
            if json {
                println!("{}", serde_json::to_string_pretty(&summary)?);
            } else {
                println!(
                    "ingest complete: run_id={} candidates={} inserted={} updated={} rejected={} failed={}",
                    summary.run_id,
                    summary.candidates,
                    summary.inserted,
                    summary.updated,
                    summary.rejected,
                    summary.failed
                );
                for failure in &summary.failures {
                    println!("  #{} {}: {}", failure.index, failure.url.as_deref().unwrap_or("-"), failure.reason);
                }
            }
        }
        Commands::Sweep { dry_run, yes } => {
            let store = open_store(&config).await?;
            let rule = config.identity_rule();
            let plan = seekr_sync::plan(&store, &rule).await?;
            if plan.is_empty() {
                println!("No duplicates found. Database is clean.");
                return Ok(());
            }

            println!(
                "{} duplicate groups, {} rows to remove (description prefix {} chars)",
                plan.groups.len(),
                plan.planned_removals(),
                rule.description_prefix_len
            );
            for group in plan.groups.iter().take(20) {
                println!(
                    "  {} @ {} ({}): keep #{}, remove {:?}",
                    group.title,
                    group.company,
                    group.location,
                    group.keeper.id,
                    group.removals.iter().map(|r| r.id).collect::<Vec<_>>()
                );
            }

            if !dry_run && !yes && !confirm(&format!("Remove {} rows?", plan.planned_removals()))? {
                println!("Cancelled.");
                return Ok(());
            }

            let outcome = seekr_sync::resolve(&store, &plan, dry_run).await;
            let report_dir = seekr_sync::write_sweep_report(&config.reports_dir, &plan, &outcome).await?;
            if outcome.dry_run {
                println!("dry run: {} rows would be removed", outcome.planned);
            } else {
                println!(
                    "sweep complete: removed={} already_gone={} failed={} remaining={}",
                    outcome.removed,
                    outcome.already_gone,
                    outcome.failures.len(),
                    store.count().await?
                );
            }
            println!("report: {}", report_dir.display());
            if !outcome.is_complete() {
                bail!("{} removals failed; rerun the sweep to finish", outcome.failures.len());
            }
        }
        Commands::Audit { json } => {
            let store = open_store(&config).await?;
            let report = seekr_sync::audit(&store, &config.identity_rule()).await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                print_audit(&report);
            }
        }
        Commands::BackfillRegions => {
            let store = open_store(&config).await?;
            let table = config.load_region_table()?;
            let summary = seekr_sync::backfill_regions(&store, &table).await?;
            println!(
                "region backfill: updated={} unchanged={} failed={}",
                summary.updated, summary.unchanged, summary.failed
            );
            for (region, count) in summary.ranked() {
                println!("  {region:<28} {count:>6}");
            }
        }
        Commands::Region { location } => {
            let table = config.load_region_table()?;
            println!("{}", table.region_for(&location));
        }
        Commands::Query {
            search,
            region,
            job_type,
            triage,
            since_days,
            sort,
            limit,
            offset,
            json,
        } => {
            let store = open_store(&config).await?;
            let query = JobQuery {
                search,
                region,
                job_type,
                triage,
                first_seen_since: since_days.map(|days| days_before(Utc::now(), days)).transpose()?,
                sort: sort.into(),
                limit: Some(limit),
                offset,
            };
            let jobs = store.query(&query).await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&jobs)?);
            } else {
                for job in &jobs {
                    println!(
                        "{:>6}  {}  {:<4}  {:<24}  {} @ {} ({})",
                        job.id,
                        job.first_seen.format("%Y-%m-%d"),
                        job.triage_status.map(|s| s.as_str()).unwrap_or("-"),
                        job.region,
                        job.title,
                        job.company,
                        job.location
                    );
                }
                println!("{} jobs", jobs.len());
            }
        }
        Commands::Stats { json } => {
            let store = open_store(&config).await?;
            let stats = store.stats(Utc::now()).await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&stats)?);
            } else {
                println!("total:          {}", stats.total);
                println!("new today:      {}", stats.new_today);
                println!("new this week:  {}", stats.new_this_week);
                println!(
                    "triage:         yes={} no={} gsv={} unreviewed={}",
                    stats.triage_yes, stats.triage_no, stats.triage_gsv, stats.unreviewed
                );
                println!("top companies:");
                for (company, count) in &stats.top_companies {
                    println!("  {company:<40} {count:>5}");
                }
                println!("top locations:");
                for (location, count) in &stats.top_locations {
                    println!("  {location:<40} {count:>5}");
                }
            }
        }
        Commands::Triage { id, verdict } => {
            let store = open_store(&config).await?;
            store.set_triage(id, verdict.0).await?;
            println!(
                "job {id}: {}",
                verdict.0.map(|s| s.as_str()).unwrap_or("cleared")
            );
        }
    }

    Ok(())
}

fn days_before(now: DateTime<Utc>, days: i64) -> Result<DateTime<Utc>> {
    Duration::try_days(days)
        .and_then(|span| now.checked_sub_signed(span))
        .with_context(|| format!("--since-days {days} is out of range"))
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .try_init();
}

async fn open_store(config: &SyncConfig) -> Result<SqliteJobStore> {
    let store = SqliteJobStore::connect(&config.database_url)
        .await
        .with_context(|| format!("opening {}", config.database_url))?;
    store.migrate().await.context("applying migrations")?;
    tracing::debug!(url = %config.database_url, "database ready");
    Ok(store)
}

async fn read_input(path: &Path) -> Result<String> {
    if path.as_os_str() == "-" {
        let mut text = String::new();
        io::stdin().read_to_string(&mut text).context("reading stdin")?;
        return Ok(text);
    }
    tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("reading {}", path.display()))
}

/// A JSON array of drafts, or one draft object per line.
fn parse_drafts(text: &str) -> Result<Vec<JobDraft>> {
    let trimmed = text.trim_start();
    if trimmed.starts_with('[') {
        return serde_json::from_str(trimmed).context("expected a JSON array of job objects");
    }
    trimmed
        .lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty())
        .map(|(n, line)| serde_json::from_str::<JobDraft>(line).with_context(|| format!("line {}", n + 1)))
        .collect()
}

fn confirm(prompt: &str) -> Result<bool> {
    print!("{prompt} (yes/no): ");
    io::stdout().flush()?;
    let mut answer = String::new();
    io::stdin().lock().read_line(&mut answer)?;
    Ok(matches!(answer.trim().to_ascii_lowercase().as_str(), "y" | "yes"))
}

fn print_groups(heading: &str, groups: &[GroupSummary]) {
    println!("\n{heading}: {}", groups.len());
    for group in groups.iter().take(10) {
        println!(
            "  {} @ {} ({}): {} rows {:?}",
            group.title,
            group.company,
            group.location,
            group.count(),
            group.ids
        );
    }
}

fn print_audit(report: &AuditReport) {
    println!("total jobs:        {}", report.total_jobs);
    println!("unique urls:       {}", report.unique_urls);
    println!("unique identities: {}", report.unique_identities);
    println!("removable by sweep: {}", report.removable());
    print_groups("exact duplicates (all columns but url)", &report.exact_duplicates);
    print_groups("content duplicates (identity key)", &report.content_duplicates);
    print_groups("url duplicates", &report.url_duplicates);
    println!("\nsame listing, different descriptions: {}", report.listing_variants.len());
    for variant in report.listing_variants.iter().take(10) {
        println!(
            "  {} @ {} ({}): {} rows, {} prefixes, min similarity {:.2}",
            variant.title,
            variant.company,
            variant.location,
            variant.ids.len(),
            variant.distinct_prefixes,
            variant.min_similarity
        );
    }
}
