use anyhow::{Context, Result};
use stagerun::cli::commands::{HistoryCommand, RunCommand, ValidateCommand};
use stagerun::cli::output::*;
use stagerun::cli::{Cli, Command};
use stagerun::core::config::PipelineConfig;
use stagerun::core::ExecutionStatus;
use stagerun::execution::{ExecutionEngine, ExecutionEvent};
use stagerun::modules::ModuleRegistry;
use stagerun::persistence::{InMemoryPersistence, PersistenceBackend, RunSummary};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use tracing::{error, warn, Level};
use tracing_subscriber::FmtSubscriber;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::from_args();

    // Initialize logging
    let log_level = if cli.verbose { Level::DEBUG } else { Level::INFO };
    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)
        .context("Failed to set logging subscriber")?;

    match &cli.command {
        Command::Run(cmd) => run_pipeline(cmd).await?,
        Command::Validate(cmd) => validate_pipeline(cmd)?,
        Command::History(cmd) => show_history(cmd).await?,
    }

    Ok(())
}

#[cfg(feature = "sqlite")]
async fn open_history() -> Result<Arc<dyn PersistenceBackend>> {
    let store = stagerun::persistence::SqliteRunStore::with_default_path()
        .await
        .context("Failed to open run history")?;
    Ok(Arc::new(store))
}

#[cfg(not(feature = "sqlite"))]
async fn open_history() -> Result<Arc<dyn PersistenceBackend>> {
    warn!("Built without the sqlite feature; run history is not kept");
    Ok(Arc::new(InMemoryPersistence::new()))
}

async fn run_pipeline(cmd: &RunCommand) -> Result<()> {
    let registry = Arc::new(ModuleRegistry::with_builtins());

    let mut config = PipelineConfig::from_file(&cmd.config)
        .with_context(|| format!("Failed to load pipeline config {}", cmd.config))?;
    cmd.apply(&mut config.settings);

    let mut pipeline = config
        .to_pipeline(&registry)
        .context("Invalid pipeline configuration")?;

    println!(
        "{} Loaded {} step(s) into {}",
        INFO,
        style(pipeline.steps.len()).cyan(),
        style(pipeline.run_dir().display()).bold()
    );

    let history: Arc<dyn PersistenceBackend> = if cmd.no_history {
        Arc::new(InMemoryPersistence::new())
    } else {
        open_history().await?
    };

    let mut engine =
        ExecutionEngine::for_settings(registry, &pipeline.settings).with_persistence(history);

    let reporter = Arc::new(ConsoleReporter::new());
    engine.add_event_handler(move |event: ExecutionEvent| reporter.handle(&event));

    // First Ctrl-C cancels the jobs of the running step
    let interrupt = engine.interrupt_flag();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, cancelling outstanding jobs");
            interrupt.store(true, Ordering::SeqCst);
        }
    });

    println!();
    match engine.execute(&mut pipeline).await {
        Ok(summary) => {
            println!(
                "\n{} {} completed {} ({} step(s))",
                CHECK,
                style(&summary.name).bold(),
                style("successfully").green(),
                summary.completed_steps
            );
            Ok(())
        }
        Err(e) => {
            println!(
                "\n{} {} {}",
                CROSS,
                style(&pipeline.name).bold(),
                style("failed").red()
            );
            error!("{}", e);
            std::process::exit(1);
        }
    }
}

fn validate_pipeline(cmd: &ValidateCommand) -> Result<()> {
    println!("{} Validating pipeline...", INFO);
    let registry = ModuleRegistry::with_builtins();

    let result = PipelineConfig::from_file(&cmd.config).and_then(|config| config.to_pipeline(&registry));

    match result {
        Ok(pipeline) => {
            println!("{} Pipeline configuration is valid!", CHECK);
            println!("  Run directory: {}", style(pipeline.run_dir().display()).bold());
            println!("  Mode: {}", style(format!("{:?}", pipeline.settings.mode).to_lowercase()).cyan());
            println!("  Steps: {}", style(pipeline.steps.len()).cyan());
            for step in &pipeline.steps {
                println!("    {} {}", style(step.ordinal).dim(), step.key);
            }

            if cmd.json {
                let steps: Vec<_> = pipeline
                    .steps
                    .iter()
                    .map(|step| {
                        serde_json::json!({
                            "ordinal": step.ordinal,
                            "key": step.key,
                            "module": step.module,
                            "workdir": step.workdir,
                        })
                    })
                    .collect();
                let data = serde_json::json!({
                    "run_dir": pipeline.run_dir(),
                    "mode": pipeline.settings.mode,
                    "steps": steps,
                });
                println!("\n{}", serde_json::to_string_pretty(&data)?);
            }
            Ok(())
        }
        Err(e) => {
            println!("{} Validation failed:", CROSS);
            println!("  {}", style(e).red());
            std::process::exit(1);
        }
    }
}

async fn show_history(cmd: &HistoryCommand) -> Result<()> {
    let store = open_history().await?;

    if let Some(run_id) = &cmd.run_id {
        let run_id = uuid::Uuid::parse_str(run_id).context("Invalid run ID format")?;
        match store.load_run(run_id).await? {
            Some(summary) => print_run_details(&summary, cmd.verbose)?,
            None => println!("{} Run not found", WARN),
        }
        return Ok(());
    }

    let names = match &cmd.name {
        Some(name) => vec![name.clone()],
        None => store.list_names().await?,
    };
    let mut runs = Vec::new();
    for name in &names {
        runs.extend(store.list_runs(name).await?);
    }
    runs.sort_by(|a, b| b.started_at.cmp(&a.started_at));
    runs.truncate(cmd.limit);

    if runs.is_empty() {
        println!("{} No runs found", INFO);
        return Ok(());
    }

    if cmd.json {
        let data = serde_json::json!({ "runs": runs });
        println!("{}", serde_json::to_string_pretty(&data)?);
        return Ok(());
    }

    println!("{} Run history (showing latest {}):", INFO, cmd.limit);
    for summary in &runs {
        println!("  {}", format_run_summary(summary));
    }

    Ok(())
}

fn print_run_details(summary: &RunSummary, verbose: bool) -> Result<()> {
    println!("{} Run Details", INFO);
    println!("  ID: {}", style(summary.run_id).cyan());
    println!("  Name: {}", style(&summary.name).bold());
    println!("  Directory: {}", summary.run_dir.display());
    println!("  Status: {}", format_status(summary.status));
    println!("  Started: {}", style(summary.started_at.to_rfc3339()).dim());
    if let Some(completed) = summary.completed_at {
        println!("  Completed: {}", style(completed.to_rfc3339()).dim());
        if let Ok(duration) = completed.signed_duration_since(summary.started_at).to_std() {
            println!("  Duration: {}", style(format_duration(duration)).dim());
        }
    }
    println!(
        "  Progress: {} ({}/{})",
        style(format!("{:.0}%", summary.progress() * 100.0)).cyan(),
        summary.completed_steps,
        summary.total_steps
    );
    if summary.status != ExecutionStatus::Completed {
        if let Some(error) = &summary.error {
            println!("  Error: {}", style(error).red());
        }
    }

    println!();
    for step in &summary.steps {
        println!("  {}", format_step_summary(step));
    }

    if verbose {
        println!("\n  {}", style("Full details:").bold());
        let json = serde_json::to_string_pretty(summary)?;
        for line in json.lines() {
            println!("    {}", line);
        }
    }

    Ok(())
}
