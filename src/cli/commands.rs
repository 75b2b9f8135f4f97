use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "lead-compliance")]
#[command(about = "Contact compliance checks against DNC, litigation and TCPA sources")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Path to an extra configuration file
    #[arg(short, long, global = true)]
    pub config: Option<String>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Initialize database and show configuration
    Init,

    /// Check a single phone number, email or postal code
    Check {
        identifier: String,

        /// Output format (table, json)
        #[arg(short, long, default_value = "table")]
        format: String,
    },

    /// Decide whether a phone lead may be accepted
    Admit {
        phone: String,

        /// API key the request is charged to
        #[arg(long, default_value = "cli")]
        api_key: String,
    },

    /// Check every identifier in a file (one per line)
    Batch {
        file: String,

        /// Concurrent items, overriding batch.concurrency
        #[arg(short, long)]
        concurrency: Option<usize>,

        /// Label stored with the job
        #[arg(short, long)]
        label: Option<String>,
    },

    /// Resume an interrupted batch
    Resume { job_id: String },

    /// Show a batch job
    Job {
        job_id: String,

        /// Include per-item results
        #[arg(short, long)]
        items: bool,

        /// Output format (table, json)
        #[arg(short, long, default_value = "table")]
        format: String,
    },

    /// List recent batch jobs
    Jobs {
        #[arg(short, long, default_value = "20")]
        limit: usize,
    },

    /// Manage the internal do-not-contact list
    Dnc {
        #[command(subcommand)]
        action: DncCommands,
    },

    /// Manage recurring batches
    Schedule {
        #[command(subcommand)]
        action: ScheduleCommands,
    },

    /// Show statistics
    Stats {
        /// Output format (table, json)
        #[arg(short, long, default_value = "table")]
        format: String,
    },
}

#[derive(Subcommand)]
pub enum DncCommands {
    /// Add one identifier
    Add {
        identifier: String,

        #[arg(short, long)]
        reason: Option<String>,

        #[arg(short, long)]
        source: Option<String>,

        /// Expire the entry after this many days
        #[arg(long)]
        expires_days: Option<i64>,
    },

    /// Revoke an identifier
    Remove {
        identifier: String,

        /// Skip confirmation prompt
        #[arg(short, long)]
        yes: bool,
    },

    /// Bulk add from a JSON-lines file
    Import { file: String },

    /// Show recent entries
    List {
        #[arg(short, long, default_value = "50")]
        limit: usize,
    },
}

#[derive(Subcommand)]
pub enum ScheduleCommands {
    /// Create a recurring batch from a file of identifiers
    Add {
        name: String,
        file: String,

        /// daily, weekly, monthly, or a five-field cron expression
        #[arg(long, default_value = "daily")]
        cadence: String,
    },

    /// List schedules
    List,

    /// Re-enable a schedule
    Enable { id: String },

    /// Stop a schedule from running
    Disable { id: String },

    /// Run every schedule that is due now
    RunDue,

    /// Run due schedules forever
    Watch {
        /// Poll interval in seconds
        #[arg(short, long, default_value = "60")]
        interval: u64,
    },
}
