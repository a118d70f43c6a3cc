use clap::{ArgAction, Args, Parser, Subcommand};
use engine::context::ConsumerMode;
use engine::stack_api::ModuleKind;
use std::path::PathBuf;

/// Move and mutate content on a hosted CMS stack in resumable bulk runs.
#[derive(Debug, Parser)]
#[command(
    name = "stackshift",
    version,
    about = "Export, publish, unpublish and update stack content in resumable, rate-limited bulk runs"
)]
pub struct Cli {
    #[command(flatten)]
    pub global: GlobalArgs,

    #[command(subcommand)]
    pub command: Command,
}

/// Options shared by every command. Values given here override the
/// configuration file.
#[derive(Debug, Clone, Default, Args)]
pub struct GlobalArgs {
    /// Configuration file (defaults to ./stackshift.toml when present)
    #[arg(long, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Continue an interrupted run from its checkpoint file
    #[arg(long, global = true, value_name = "CHECKPOINT")]
    pub resume: Option<PathBuf>,

    /// Replay the failed items of an earlier run's error log
    #[arg(long, global = true, value_name = "ERROR_LOG", conflicts_with = "resume")]
    pub retry_failed: Option<PathBuf>,

    /// Directory for success/error logs and checkpoints
    #[arg(long, global = true, value_name = "DIR")]
    pub log_dir: Option<PathBuf>,

    /// Maximum number of items in flight at once
    #[arg(long, global = true)]
    pub concurrency: Option<usize>,

    /// Items per dispatched batch
    #[arg(long, global = true)]
    pub batch_size: Option<usize>,

    /// Items requested per page
    #[arg(long, global = true)]
    pub page_size: Option<u64>,

    /// Minimum wall-clock duration of one batch, in milliseconds
    #[arg(long, global = true, value_name = "MS")]
    pub min_batch_ms: Option<u64>,

    /// Increase log verbosity (-v debug, -vv trace)
    #[arg(short, long, global = true, action = ArgAction::Count)]
    pub verbose: u8,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Write stack modules to a local directory
    Export(ExportArgs),
    /// Publish entries or assets to environments
    Publish(PublishArgs),
    /// Unpublish entries or assets from environments
    Unpublish(PublishArgs),
    /// Merge a JSON patch into every entry of a content type
    Update(UpdateArgs),
}

impl Command {
    /// Task name used in log file names and checkpoints.
    pub fn task(&self) -> &'static str {
        match self {
            Command::Export(_) => "export",
            Command::Publish(_) => "publish",
            Command::Unpublish(_) => "unpublish",
            Command::Update(_) => "update",
        }
    }
}

#[derive(Debug, Clone, Args)]
pub struct ExportArgs {
    /// Target directory
    #[arg(long)]
    pub dir: PathBuf,

    /// Modules to export (default: all)
    #[arg(long = "module", value_name = "MODULE", value_delimiter = ',')]
    pub modules: Vec<ModuleKind>,

    /// Restrict entries to these content types (default: all)
    #[arg(long = "content-type", value_name = "UID")]
    pub content_types: Vec<String>,

    /// Export entries in these locales (default: the master locale)
    #[arg(long = "locale", value_name = "CODE")]
    pub locales: Vec<String>,
}

impl ExportArgs {
    /// Selected modules in export order.
    pub fn modules(&self) -> Vec<ModuleKind> {
        ModuleKind::ALL
            .into_iter()
            .filter(|m| self.modules.is_empty() || self.modules.contains(m))
            .collect()
    }
}

#[derive(Debug, Clone, Args)]
pub struct PublishArgs {
    /// Target environments
    #[arg(long = "environment", value_name = "ENV", required = true)]
    pub environments: Vec<String>,

    /// Locales to publish
    #[arg(long = "locale", value_name = "CODE", required = true)]
    pub locales: Vec<String>,

    /// Restrict entries to these content types (default: all)
    #[arg(long = "content-type", value_name = "UID")]
    pub content_types: Vec<String>,

    /// entries and/or assets (default: entries)
    #[arg(long = "module", value_name = "MODULE", value_delimiter = ',')]
    pub modules: Vec<ModuleKind>,

    /// Send one bulk request per batch
    #[arg(long, overrides_with = "no_bulk")]
    pub bulk: bool,

    /// Send one request per item
    #[arg(long, overrides_with = "bulk")]
    pub no_bulk: bool,
}

impl PublishArgs {
    pub fn modules(&self) -> Vec<ModuleKind> {
        if self.modules.is_empty() {
            vec![ModuleKind::Entries]
        } else {
            self.modules.clone()
        }
    }

    /// Consumer mode chosen on the command line, if any.
    pub fn consumer_mode(&self) -> Option<ConsumerMode> {
        match (self.bulk, self.no_bulk) {
            (true, _) => Some(ConsumerMode::Bulk),
            (_, true) => Some(ConsumerMode::Single),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Args)]
pub struct UpdateArgs {
    /// Content type whose entries are updated
    #[arg(long = "content-type", value_name = "UID")]
    pub content_type: String,

    /// JSON object merged into each entry
    #[arg(long, value_name = "FILE")]
    pub patch: PathBuf,

    /// Update the localized version in this locale
    #[arg(long, value_name = "CODE")]
    pub locale: Option<String>,
}
