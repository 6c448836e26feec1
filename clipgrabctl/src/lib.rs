pub mod commands;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use chrono::Utc;
use clap::{Args, CommandFactory, Parser, Subcommand, ValueEnum};
use clap_complete::Shell;
use clipgrab_core::resolver::ProviderError;
use clipgrab_core::{
    cleanup_expired, load_config, sweep_stale_work_dirs, task_progress, AcquisitionPipeline,
    AcquisitionRequest, AcquisitionService, ClipgrabConfig, FixtureSourceProvider,
    HttpSourceProvider, LinkClassifier, LocalArtifactStore, ProgressEvent, ServiceResponse,
    SourceProvider, SourceResolver, SqliteTaskLedger, TaskFilter, TaskLedger, TaskStatus,
};
use serde::Serialize;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::info;

use commands::{
    Classification, CleanupArgs, CleanupSummary, FetchArgs, LinkArgs, Resolution, TaskDetail,
    TaskList, TaskListArgs, TaskShowArgs, TasksCommands,
};

pub type Result<T> = std::result::Result<T, AppError>;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("config error: {0}")]
    Config(#[from] clipgrab_core::ConfigError),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serialization error: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error(transparent)]
    Link(#[from] clipgrab_core::LinkError),
    #[error(transparent)]
    Resolve(#[from] clipgrab_core::ResolveError),
    #[error("source provider error: {0}")]
    Provider(#[from] ProviderError),
    #[error("ledger error: {0}")]
    Ledger(#[from] clipgrab_core::LedgerError),
    #[error("storage error: {0}")]
    Storage(#[from] clipgrab_core::StorageError),
    #[error(transparent)]
    Pipeline(#[from] clipgrab_core::PipelineError),
    #[error("acquisition failed ({kind})")]
    AcquisitionFailed { kind: String },
}

#[derive(Parser, Debug)]
#[command(author, version, about = "clipgrab acquisition control interface", long_about = None)]
pub struct Cli {
    /// Path to clipgrab.toml
    #[arg(long, default_value = "configs/clipgrab.toml")]
    pub config: PathBuf,
    /// Data directory override (replaces paths.base_dir)
    #[arg(long)]
    pub data_dir: Option<PathBuf>,
    /// Alternative path for tasks.sqlite
    #[arg(long)]
    pub ledger_db: Option<PathBuf>,
    /// Answer upstream requests from a fixture file instead of the network
    #[arg(long)]
    pub fixtures: Option<PathBuf>,
    /// Output format
    #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
    pub format: OutputFormat,
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Identify the platform and link shape
    Classify(LinkArgs),
    /// Resolve a link into a playable media source
    Resolve(LinkArgs),
    /// Run the full acquisition and store the artifact
    Fetch(FetchArgs),
    /// Inspect the task ledger
    #[command(subcommand)]
    Tasks(TasksCommands),
    /// Delete expired artifacts and stale work directories
    Cleanup(CleanupArgs),
    /// Print shell completions
    Completions(CompletionsArgs),
}

#[derive(Args, Debug)]
pub struct CompletionsArgs {
    pub shell: Shell,
}

pub async fn run(cli: Cli) -> Result<()> {
    if let Commands::Completions(args) = &cli.command {
        clap_complete::generate(
            args.shell,
            &mut Cli::command(),
            "clipgrabctl",
            &mut std::io::stdout(),
        );
        return Ok(());
    }

    let context = AppContext::new(&cli)?;
    match &cli.command {
        Commands::Classify(args) => render(&context.classify(&args.link)?, cli.format)?,
        Commands::Resolve(args) => render(&context.resolve(&args.link).await?, cli.format)?,
        Commands::Fetch(args) => {
            let response = context.fetch(args).await?;
            render(&response, cli.format)?;
            if let ServiceResponse::Failure { kind, .. } = response {
                return Err(AppError::AcquisitionFailed { kind });
            }
        }
        Commands::Tasks(TasksCommands::List(args)) => {
            render(&context.task_list(args)?, cli.format)?
        }
        Commands::Tasks(TasksCommands::Show(args)) => {
            render(&context.task_show(args)?, cli.format)?
        }
        Commands::Cleanup(args) => render(&context.cleanup(args).await?, cli.format)?,
        Commands::Completions(_) => {}
    }
    Ok(())
}

fn render<T>(value: &T, format: OutputFormat) -> Result<()>
where
    T: Serialize + DisplayFallback,
{
    match format {
        OutputFormat::Text => {
            println!("{}", value.display());
            Ok(())
        }
        OutputFormat::Json => {
            let json = serde_json::to_string_pretty(value)?;
            println!("{}", json);
            Ok(())
        }
    }
}

pub(crate) trait DisplayFallback {
    fn display(&self) -> String;
}

struct AppContext {
    config: ClipgrabConfig,
    fixtures: Option<PathBuf>,
    ledger_db: PathBuf,
}

impl AppContext {
    fn new(cli: &Cli) -> Result<Self> {
        let mut config = load_config(&cli.config)?;
        if let Some(data_dir) = &cli.data_dir {
            config.paths.base_dir = data_dir.to_string_lossy().to_string();
        }
        let ledger_db = cli
            .ledger_db
            .clone()
            .unwrap_or_else(|| config.ledger_db());
        Ok(Self {
            config,
            fixtures: cli.fixtures.clone(),
            ledger_db,
        })
    }

    fn provider(&self) -> Result<Arc<dyn SourceProvider>> {
        let provider: Arc<dyn SourceProvider> = match &self.fixtures {
            Some(path) => {
                info!(fixtures = %path.display(), "serving upstream responses from fixtures");
                Arc::new(FixtureSourceProvider::from_file(path)?)
            }
            None => Arc::new(HttpSourceProvider::new(&self.config.resolver)?),
        };
        Ok(provider)
    }

    fn ledger(&self) -> Result<SqliteTaskLedger> {
        let ledger = SqliteTaskLedger::builder()
            .path(&self.ledger_db)
            .expiry_hours(self.config.ledger.expiry_hours)
            .build()?;
        ledger.initialize()?;
        Ok(ledger)
    }

    fn store(&self) -> Result<LocalArtifactStore> {
        Ok(LocalArtifactStore::new(self.config.storage_dir())?)
    }

    fn classify(&self, raw: &str) -> Result<Classification> {
        let classifier = LinkClassifier::new();
        let link = classifier.classify(raw)?;
        let content_id = classifier
            .signature(link.platform)
            .and_then(|signature| signature.extract_id(&link.normalized_url));
        Ok(Classification {
            risk_level: link.platform.risk_level(),
            link,
            content_id,
        })
    }

    async fn resolve(&self, raw: &str) -> Result<Resolution> {
        let link = LinkClassifier::new().classify(raw)?;
        let resolver = SourceResolver::new(self.provider()?, self.config.resolver.clone());
        let source = resolver.resolve(&link).await?;
        Ok(Resolution { source })
    }

    async fn fetch(&self, args: &FetchArgs) -> Result<ServiceResponse> {
        let pipeline = AcquisitionPipeline::from_config(&self.config, self.provider()?)?;
        let mut service = AcquisitionService::new(
            pipeline,
            Arc::new(self.store()?),
            Arc::new(self.ledger()?),
            self.config.ledger.expiry_hours,
        );
        if let Some(seconds) = args.deadline_seconds {
            service = service.with_deadline(Duration::from_secs(seconds));
        }

        let (sender, mut receiver) = mpsc::channel::<ProgressEvent>(32);
        let reporter = tokio::spawn(async move {
            while let Some(event) = receiver.recv().await {
                info!(request_id = %event.request_id, stage = ?event.stage, percent = event.percent, "progress");
            }
        });
        let response = service
            .handle_with_progress(&AcquisitionRequest::new(args.link.clone()), Some(sender))
            .await;
        let _ = reporter.await;
        Ok(response)
    }

    fn task_list(&self, args: &TaskListArgs) -> Result<TaskList> {
        let status = args
            .status
            .as_deref()
            .map(str::parse::<TaskStatus>)
            .transpose()?;
        let rows = self.ledger()?.list(&TaskFilter {
            status,
            limit: Some(args.limit),
        })?;
        Ok(TaskList { rows })
    }

    fn task_show(&self, args: &TaskShowArgs) -> Result<TaskDetail> {
        let ledger = self.ledger()?;
        let progress = task_progress(&ledger, &args.task_id)?;
        let entry = ledger.find(&args.task_id)?;
        Ok(TaskDetail { progress, entry })
    }

    async fn cleanup(&self, args: &CleanupArgs) -> Result<CleanupSummary> {
        let ledger = self.ledger()?;
        let store = self.store()?;
        let expired = cleanup_expired(&ledger, &store, Utc::now()).await?;
        let swept = if args.skip_sweep {
            Vec::new()
        } else {
            let max_age = Duration::from_secs(self.config.ledger.stale_work_dir_minutes * 60);
            sweep_stale_work_dirs(&self.config.work_dir(), max_age, SystemTime::now())?
        };
        Ok(CleanupSummary { expired, swept })
    }
}
