mod cli;

use anyhow::Context;
use chrono::{Duration as ChronoDuration, Utc};
use clap::Parser;
use cli::{Cli, Commands, DncCommands, ScheduleCommands};
use colored::*;
use indicatif::{ProgressBar, ProgressStyle};
use lead_compliance::{
    checkers::CheckerRegistry,
    compliance::{BatchHandle, BatchProcessor, CheckContext, ComplianceEngine, FailPolicy},
    config::Config,
    gateway::{BulkAddOutcome, LeadDecision, LeadGate, SuppressionList},
    notify::Notifiers,
    ratelimit::RateLimiters,
    schedule::Scheduler,
    storage::{AuditStore, Database, NewSuppression},
    utils, ComplianceVerdict,
};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

/// API key charged for commands issued from this binary
const CLI_API_KEY: &str = "cli";

/// How long to wait for webhook and Telegram deliveries before exiting
const NOTIFY_DRAIN_TIMEOUT: Duration = Duration::from_secs(10);

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| "lead_compliance=debug,info".into()),
        )
        .init();

    let cli = Cli::parse();

    let config = match Config::load(cli.config.as_deref()) {
        Ok(cfg) => cfg,
        Err(e) => {
            error!("Failed to load configuration: {}", e);
            std::process::exit(1);
        }
    };

    let services = match Services::build(&config) {
        Ok(services) => services,
        Err(e) => {
            error!("{}", format!("Error: {:#}", e).red());
            std::process::exit(1);
        }
    };

    let result = run(cli.command, &config, &services).await;
    services.notifiers.drain(NOTIFY_DRAIN_TIMEOUT).await;

    if let Err(e) = result {
        error!("{}", format!("Error: {:#}", e).red());
        std::process::exit(1);
    }
}

/// Everything a command handler may need, wired once from configuration
struct Services {
    db: Arc<Database>,
    limiters: Arc<RateLimiters>,
    engine: Arc<ComplianceEngine>,
    processor: Arc<BatchProcessor>,
    scheduler: Scheduler,
    gate: LeadGate,
    suppressions: SuppressionList,
    notifiers: Notifiers,
    policy: FailPolicy,
}

impl Services {
    fn build(config: &Config) -> anyhow::Result<Self> {
        let db = Arc::new(
            Database::new(&config.database.path)
                .with_context(|| format!("opening database at {}", config.database.path))?,
        );
        let limiters = Arc::new(RateLimiters::from_config(&config.rate_limit));
        let notifiers = Notifiers::from_config(&config.notifications)?;

        let registry = CheckerRegistry::from_config(config, db.clone(), &limiters)?;
        let engine = Arc::new(ComplianceEngine::new(registry, config.checker_timeout()));

        let store: Arc<dyn AuditStore> = db.clone();
        let processor = Arc::new(
            BatchProcessor::new(engine.clone(), store, config.batch.concurrency, config.batch.max_items)
                .with_notifiers(notifiers.clone()),
        );

        let policy = FailPolicy::fail_closed_for(config.engine.fail_closed_sources.iter());
        let gate = LeadGate::new(
            engine.clone(),
            db.clone(),
            limiters.clone(),
            processor.clone(),
            policy.clone(),
        );

        Ok(Self {
            scheduler: Scheduler::new(db.clone(), processor.clone()),
            suppressions: SuppressionList::new(db.clone(), notifiers.clone()),
            notifiers,
            gate,
            policy,
            db,
            limiters,
            engine,
            processor,
        })
    }
}

async fn run(command: Commands, config: &Config, services: &Services) -> anyhow::Result<()> {
    match command {
        Commands::Init => initialize(config, services),
        Commands::Check { identifier, format } => check_identifier(services, &identifier, &format).await,
        Commands::Admit { phone, api_key } => admit_lead(services, &api_key, &phone).await,
        Commands::Batch { file, concurrency, label } => run_batch(services, &file, concurrency, label).await,
        Commands::Resume { job_id } => resume_batch(services, &job_id).await,
        Commands::Job { job_id, items, format } => show_job(services, &job_id, items, &format),
        Commands::Jobs { limit } => list_jobs(services, limit),
        Commands::Dnc { action } => manage_dnc(services, action),
        Commands::Schedule { action } => manage_schedules(services, action).await,
        Commands::Stats { format } => show_stats(services, &format),
    }
}

fn initialize(config: &Config, services: &Services) -> anyhow::Result<()> {
    println!("{}", "=== Lead Compliance ===".cyan().bold());
    println!("Database:          {}", config.database.path);
    println!("Checker timeout:   {} ms", config.engine.checker_timeout_ms);
    println!("Batch concurrency: {}", config.batch.concurrency);
    println!("Batch max items:   {}", config.batch.max_items);
    println!(
        "Inbound limit:     {} per {}s",
        config.rate_limit.inbound.limit, config.rate_limit.inbound.window_secs
    );
    println!(
        "Outbound limit:    {} per {}s",
        config.rate_limit.outbound.limit, config.rate_limit.outbound.window_secs
    );

    let sources = services.engine.registry().sources();
    if sources.is_empty() {
        println!("{}", "No checkers enabled".yellow());
    } else {
        println!("Checkers:          {}", sources.join(", "));
    }
    if !config.engine.fail_closed_sources.is_empty() {
        println!("Fail closed:       {}", config.engine.fail_closed_sources.join(", "));
    }

    println!("\n{}", "Database initialized".green());
    Ok(())
}

async fn check_identifier(services: &Services, raw: &str, format: &str) -> anyhow::Result<()> {
    services.limiters.check_inbound(CLI_API_KEY, 1)?;

    let verdict = services.engine.check_compliance(raw, &CheckContext::new()).await?;
    services.db.record_verdict(&verdict, None)?;

    if format == "json" {
        println!("{}", serde_json::to_string_pretty(&verdict)?);
        return Ok(());
    }

    print_verdict(&verdict, &services.policy);
    Ok(())
}

async fn admit_lead(services: &Services, api_key: &str, phone: &str) -> anyhow::Result<()> {
    let decision = services.gate.admit(api_key, phone).await?;

    match &decision {
        LeadDecision::Accepted { .. } => println!("{}", "ACCEPTED".green().bold()),
        LeadDecision::Rejected { reasons, .. } => {
            println!("{}", "REJECTED".red().bold());
            for reason in reasons {
                println!("  - {}", reason);
            }
        }
    }
    println!("Request: {}", decision.verdict().request_id);
    Ok(())
}

fn print_verdict(verdict: &ComplianceVerdict, policy: &FailPolicy) {
    println!("\n{}", "=== Compliance Verdict ===".cyan().bold());
    println!("Identifier: {} ({})", verdict.identifier, verdict.identifier.kind());
    println!("Request:    {}", verdict.request_id);
    println!("Checked:    {}", utils::format_timestamp(&verdict.timestamp));
    println!("Verdict:    {}", utils::format_verdict(verdict.is_compliant));

    if verdict.is_compliant && !verdict.is_compliant_with(policy) {
        println!("{}", "A fail-closed source errored; callers will reject this identifier".yellow());
    }

    if verdict.results.is_empty() {
        println!("{}", "No checker accepts this identifier kind".yellow());
        return;
    }

    println!();
    utils::print_table_border(90);
    utils::print_table_row(&["Source", "Result", "Latency", "Detail"], &[22, 12, 10, 40]);
    utils::print_table_border(90);

    for result in &verdict.results {
        let status = if result.errored {
            "errored".yellow().to_string()
        } else if result.is_compliant {
            "clear".green().to_string()
        } else {
            "blocked".red().to_string()
        };
        let detail = if result.errored {
            let failure = result.errored_reason.map(|f| f.to_string()).unwrap_or_default();
            format!("{}: {}", failure, result.error_detail.as_deref().unwrap_or(""))
        } else {
            result.reasons.join("; ")
        };

        utils::print_table_row(
            &[
                &result.source,
                &status,
                &format!("{} ms", result.latency_ms),
                &utils::truncate(&detail, 40),
            ],
            &[22, 12, 10, 40],
        );
    }
    utils::print_table_border(90);
}

async fn run_batch(
    services: &Services,
    file: &str,
    concurrency: Option<usize>,
    label: Option<String>,
) -> anyhow::Result<()> {
    let identifiers = utils::read_lines(file).with_context(|| format!("reading {}", file))?;
    println!("Read {} identifiers from {}", identifiers.len(), file);

    let handle = match concurrency {
        Some(n) if n > 0 => {
            services.limiters.check_inbound(CLI_API_KEY, identifiers.len().max(1) as u32)?;
            let processor = BatchProcessor::clone(&services.processor).with_concurrency(n);
            processor.submit(identifiers, label).await?
        }
        _ => services.gate.submit_batch(CLI_API_KEY, identifiers, label).await?,
    };

    follow_batch(handle).await
}

async fn resume_batch(services: &Services, job_id: &str) -> anyhow::Result<()> {
    let handle = services.processor.resume(job_id).await?;
    follow_batch(handle).await
}

/// Drive a progress bar until the batch settles or is cancelled with Ctrl-C
async fn follow_batch(handle: BatchHandle) -> anyhow::Result<()> {
    let job_id = handle.job_id().to_string();
    let mut progress = handle.progress();
    let initial = progress.borrow().clone();

    let bar = ProgressBar::new(initial.total as u64);
    bar.set_style(
        ProgressStyle::with_template("{spinner:.cyan} [{bar:40.cyan/blue}] {pos}/{len} {msg}")?
            .progress_chars("=> "),
    );
    bar.set_position(initial.processed as u64);

    let watcher = {
        let bar = bar.clone();
        tokio::spawn(async move {
            while progress.changed().await.is_ok() {
                let snapshot = progress.borrow_and_update().clone();
                bar.set_position(snapshot.processed as u64);
                bar.set_message(format!("{} failed", snapshot.failed));
            }
        })
    };

    let cancel = handle.cancel_handle();
    let interrupt = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, stopping after in-flight items");
            cancel.cancel();
        }
    });

    let result = handle.wait().await;
    interrupt.abort();
    let _ = watcher.await;
    bar.finish_and_clear();

    let job = result?;
    println!("\n{}", "=== Batch Summary ===".cyan().bold());
    println!("Job:        {}", job.id);
    println!("Status:     {}", utils::format_status(job.status));
    println!("Processed:  {}/{}", job.processed_items, job.total_items);
    println!("Successful: {}", job.successful_items.to_string().green());
    println!("Failed:     {}", job.failed_items.to_string().red());

    if !job.status.is_terminal() {
        println!(
            "\n{} {}",
            "Batch interrupted. Continue with".yellow(),
            format!("lead-compliance resume {}", job_id).cyan()
        );
    }
    Ok(())
}

fn show_job(services: &Services, job_id: &str, with_items: bool, format: &str) -> anyhow::Result<()> {
    let job = services
        .db
        .job(job_id)?
        .ok_or_else(|| anyhow::anyhow!("batch job {} not found", job_id))?;
    let items = if with_items { services.db.items(job_id)? } else { Vec::new() };

    if format == "json" {
        let body = serde_json::json!({ "job": job, "items": items });
        println!("{}", serde_json::to_string_pretty(&body)?);
        return Ok(());
    }

    println!("\n{}", "=== Batch Job ===".cyan().bold());
    println!("Id:         {}", job.id);
    if let Some(label) = &job.label {
        println!("Label:      {}", label);
    }
    println!("Status:     {}", utils::format_status(job.status));
    println!("Progress:   {}/{}", job.processed_items, job.total_items);
    println!("Successful: {}", job.successful_items);
    println!("Failed:     {}", job.failed_items);
    println!("Created:    {}", utils::format_timestamp(&job.created_at));
    if let Some(started) = &job.started_at {
        println!("Started:    {}", utils::format_timestamp(started));
    }
    if let Some(completed) = &job.completed_at {
        println!("Completed:  {}", utils::format_timestamp(completed));
    }

    if with_items {
        println!();
        utils::print_table_border(90);
        utils::print_table_row(&["#", "Input", "Status", "Outcome"], &[6, 28, 10, 40]);
        utils::print_table_border(90);
        for item in &items {
            let outcome = match (&item.verdict, &item.error) {
                (Some(verdict), _) => utils::format_verdict(verdict.is_compliant).to_string(),
                (None, Some(error)) => utils::truncate(error, 40),
                (None, None) => String::new(),
            };
            utils::print_table_row(
                &[
                    &item.position.to_string(),
                    &utils::truncate(&item.raw_input, 28),
                    item.status.as_str(),
                    &outcome,
                ],
                &[6, 28, 10, 40],
            );
        }
        utils::print_table_border(90);
    }
    Ok(())
}

fn list_jobs(services: &Services, limit: usize) -> anyhow::Result<()> {
    let jobs = services.db.list_jobs(limit)?;
    if jobs.is_empty() {
        println!("{}", "No batch jobs yet".yellow());
        return Ok(());
    }

    utils::print_table_border(100);
    utils::print_table_row(&["Id", "Status", "Progress", "Failed", "Created"], &[38, 12, 12, 8, 24]);
    utils::print_table_border(100);
    for job in &jobs {
        utils::print_table_row(
            &[
                &job.id,
                &utils::format_status(job.status).to_string(),
                &format!("{}/{}", job.processed_items, job.total_items),
                &job.failed_items.to_string(),
                &utils::format_timestamp(&job.created_at),
            ],
            &[38, 12, 12, 8, 24],
        );
    }
    utils::print_table_border(100);
    Ok(())
}

fn manage_dnc(services: &Services, action: DncCommands) -> anyhow::Result<()> {
    match action {
        DncCommands::Add {
            identifier,
            reason,
            source,
            expires_days,
        } => {
            let entry = NewSuppression {
                identifier,
                reason,
                source,
                added_by: Some(CLI_API_KEY.to_string()),
                metadata: None,
                expires_at: expires_days.map(|days| Utc::now() + ChronoDuration::days(days)),
            };
            let added = services.suppressions.add(&entry)?;
            println!("{} {} ({})", "Suppressed".green(), added.identifier, added.reason);
        }

        DncCommands::Remove { identifier, yes } => {
            if !yes && !utils::confirm_action(&format!("Revoke suppression for {}?", identifier)) {
                println!("{}", "Cancelled".yellow());
                return Ok(());
            }
            if services.suppressions.remove(&identifier)? {
                println!("{} {}", "Revoked".green(), identifier);
            } else {
                println!("{} {}", "No active entry for".yellow(), identifier);
            }
        }

        DncCommands::Import { file } => {
            let lines = utils::read_lines(&file).with_context(|| format!("reading {}", file))?;
            let mut entries = Vec::with_capacity(lines.len());
            let mut unreadable = 0usize;
            for (n, line) in lines.iter().enumerate() {
                match serde_json::from_str::<NewSuppression>(line) {
                    Ok(entry) => entries.push(entry),
                    Err(e) => {
                        unreadable += 1;
                        println!("{} line {}: {}", "skip".red(), n + 1, e);
                    }
                }
            }

            let report = services.suppressions.bulk_add(entries);
            for outcome in &report.outcomes {
                match outcome {
                    BulkAddOutcome::Added { input, identifier } => {
                        println!("{} {} -> {}", "added".green(), input, identifier)
                    }
                    BulkAddOutcome::Failed { input, error } => {
                        println!("{} {}: {}", "failed".red(), input, error)
                    }
                }
            }
            println!(
                "\nAdded {}, failed {}, unreadable {}",
                report.added.to_string().green(),
                report.failed.to_string().red(),
                unreadable
            );
        }

        DncCommands::List { limit } => {
            let entries = services.db.list_suppressions(limit)?;
            if entries.is_empty() {
                println!("{}", "Suppression list is empty".yellow());
                return Ok(());
            }
            utils::print_table_border(100);
            utils::print_table_row(&["Identifier", "Kind", "Status", "Reason", "Added"], &[26, 12, 9, 26, 24]);
            utils::print_table_border(100);
            for entry in &entries {
                utils::print_table_row(
                    &[
                        &entry.identifier,
                        entry.kind.as_str(),
                        entry.status.as_str(),
                        &utils::truncate(&entry.reason, 26),
                        &utils::format_timestamp(&entry.added_at),
                    ],
                    &[26, 12, 9, 26, 24],
                );
            }
            utils::print_table_border(100);
        }
    }
    Ok(())
}

async fn manage_schedules(services: &Services, action: ScheduleCommands) -> anyhow::Result<()> {
    match action {
        ScheduleCommands::Add { name, file, cadence } => {
            let identifiers = utils::read_lines(&file).with_context(|| format!("reading {}", file))?;
            let schedule = services.scheduler.create(&name, identifiers, &cadence, None)?;
            println!(
                "{} {} ({}), next run {}",
                "Scheduled".green(),
                schedule.name,
                schedule.cadence,
                utils::format_timestamp(&schedule.next_run)
            );
        }

        ScheduleCommands::List => {
            let schedules = services.db.list_schedules()?;
            if schedules.is_empty() {
                println!("{}", "No schedules".yellow());
                return Ok(());
            }
            utils::print_table_border(120);
            utils::print_table_row(&["Id", "Name", "Cadence", "Items", "Enabled", "Next run"], &[38, 20, 16, 6, 8, 24]);
            utils::print_table_border(120);
            for schedule in &schedules {
                utils::print_table_row(
                    &[
                        &schedule.id,
                        &utils::truncate(&schedule.name, 20),
                        &schedule.cadence,
                        &schedule.identifiers.len().to_string(),
                        if schedule.enabled { "yes" } else { "no" },
                        &utils::format_timestamp(&schedule.next_run),
                    ],
                    &[38, 20, 16, 6, 8, 24],
                );
            }
            utils::print_table_border(120);
        }

        ScheduleCommands::Enable { id } => {
            services.db.set_schedule_enabled(&id, true)?;
            println!("{} {}", "Enabled".green(), id);
        }

        ScheduleCommands::Disable { id } => {
            services.db.set_schedule_enabled(&id, false)?;
            println!("{} {}", "Disabled".yellow(), id);
        }

        ScheduleCommands::RunDue => {
            let summary = services.scheduler.run_due(Utc::now()).await?;
            println!(
                "Processed {}, succeeded {}, failed {}",
                summary.processed,
                summary.succeeded.to_string().green(),
                summary.failed.to_string().red()
            );
        }

        ScheduleCommands::Watch { interval } => run_schedule_watch(services, interval).await?,
    }
    Ok(())
}

async fn run_schedule_watch(services: &Services, interval: u64) -> anyhow::Result<()> {
    println!("{}", "Starting schedule watcher...".cyan().bold());
    println!("Interval: {} seconds", interval);
    println!("Press Ctrl+C to stop\n");

    let interval = Duration::from_secs(interval.max(1));
    loop {
        match services.scheduler.run_due(Utc::now()).await {
            Ok(summary) if summary.processed > 0 => info!(
                "Ran {} schedules: {} succeeded, {} failed",
                summary.processed, summary.succeeded, summary.failed
            ),
            Ok(_) => {}
            Err(e) => error!("Schedule scan failed: {}", e),
        }
        services.limiters.inbound.purge_idle();
        services.limiters.outbound.purge_idle();

        tokio::select! {
            _ = tokio::time::sleep(interval) => {}
            _ = tokio::signal::ctrl_c() => {
                println!("\n{}", "Schedule watcher stopped".yellow());
                return Ok(());
            }
        }
    }
}

fn show_stats(services: &Services, format: &str) -> anyhow::Result<()> {
    let stats = services.db.get_stats()?;

    if format == "json" {
        println!("{}", serde_json::to_string_pretty(&stats)?);
        return Ok(());
    }

    println!("\n{}", "=== Statistics ===".cyan().bold());
    println!("Verdicts:            {}", stats.total_verdicts);
    println!("  compliant:         {}", stats.compliant_verdicts.to_string().green());
    println!(
        "  blocked:           {}",
        stats.total_verdicts.saturating_sub(stats.compliant_verdicts).to_string().red()
    );
    println!("Errored checks:      {}", stats.errored_checks);
    println!("Batch jobs:          {}", stats.batch_jobs);
    println!("  in progress:       {}", stats.active_batch_jobs);
    println!("Active suppressions: {}", stats.active_suppressions);
    println!("Schedules:           {}", stats.schedules);
    Ok(())
}
