use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use futures::future::join_all;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use testagon::config::{Config, PROJECT_CONFIG_FILE};
use testagon::critic::{Critic, CriticVerdict};
use testagon::llm::{OpenAiClient, ReasoningService};
use testagon::orchestrator::{source_for_test_path, GenerationOrchestrator, GenerationSummary};
use testagon::runner::PytestRunner;
use testagon::scanner::ProjectScanner;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(
    name = "testagon",
    about = "Generate, validate and triage pytest suites with a reasoning model",
    version
)]
struct Cli {
    /// Project root (defaults to current directory)
    #[arg(long, global = true, default_value = ".")]
    path: PathBuf,

    /// Verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Create the test directory and a project config file
    Init,
    /// Generate tests for every source file in the project
    Generate {
        /// Run the critic on every generated file afterwards
        #[arg(long)]
        auto: bool,
        /// Do not write invariants into source docstrings
        #[arg(long)]
        skip_invariants: bool,
    },
    /// Run the generated test suite
    Test,
    /// Run generated tests and classify their failures
    Critic {
        /// A single generated test file (defaults to all of them)
        test_file: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let root = cli
        .path
        .canonicalize()
        .with_context(|| format!("Project path {} does not exist", cli.path.display()))?;
    let mut config = Config::load(&root);

    match cli.command {
        Commands::Init => run_init(&root, &config),
        Commands::Generate {
            auto,
            skip_invariants,
        } => {
            if skip_invariants {
                config.invariants = false;
            }
            run_generate(&root, config, auto).await
        }
        Commands::Test => run_test(&root, &config),
        Commands::Critic { test_file } => run_critic(&root, &config, test_file).await,
    }
}

fn init_logging(verbose: bool) {
    let default = if verbose { "testagon=debug" } else { "testagon=info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn build_service(config: &Config) -> Result<Arc<dyn ReasoningService>> {
    let client = OpenAiClient::from_config(config)?;
    tracing::debug!("Using model {}", client.model());
    Ok(Arc::new(client))
}

fn run_init(root: &Path, config: &Config) -> Result<()> {
    let test_root = config.test_root(root);
    std::fs::create_dir_all(&test_root)
        .with_context(|| format!("Failed to create {}", test_root.display()))?;
    println!("Test directory: {}", test_root.display());

    let config_path = root.join(PROJECT_CONFIG_FILE);
    if config_path.exists() {
        println!("Config already present: {}", config_path.display());
    } else {
        let written = config.save_project(root)?;
        println!("Wrote {}", written.display());
    }

    if config.api_key.is_none() {
        println!("Set TESTAGON_API_KEY (or add it to .env) before running 'testagon generate'.");
    }
    Ok(())
}

async fn run_generate(root: &Path, config: Config, auto: bool) -> Result<()> {
    let service = build_service(&config)?;
    let config = Arc::new(config);

    let summary = GenerationOrchestrator::new(root, Arc::clone(&config), Arc::clone(&service))
        .run()
        .await?;
    print_summary(root, &summary);

    if auto {
        let targets: Vec<(PathBuf, PathBuf)> = summary
            .succeeded()
            .map(|u| (u.test_path.clone(), u.source.resolve(root)))
            .collect();
        let structure = project_structure(root, &config)?;
        critique(root, &config, service.as_ref(), &targets, &structure).await;
    }

    let failed = summary.failed().count();
    if failed > 0 {
        bail!("{} of {} unit(s) failed", failed, summary.units.len());
    }
    Ok(())
}

fn print_summary(root: &Path, summary: &GenerationSummary) {
    println!();
    println!(
        "Generated {} of {} test file(s)",
        summary.succeeded().count(),
        summary.units.len()
    );
    for unit in &summary.units {
        let shown = unit.test_path.strip_prefix(root).unwrap_or(&unit.test_path);
        match &unit.result {
            Ok(success) if !success.generated.validated => println!(
                "  ! {} -> {} (syntax still invalid after {} repair attempt(s))",
                unit.source,
                shown.display(),
                success.generated.repair_attempts
            ),
            Ok(_) => println!("  + {} -> {}", unit.source, shown.display()),
            Err(reason) => println!("  x {}: {}", unit.source, reason),
        }
    }
}

fn run_test(root: &Path, config: &Config) -> Result<()> {
    let test_root = config.test_root(root);
    let status = PytestRunner::from_config(root, config)
        .run_attached(&test_root)
        .with_context(|| format!("Failed to run '{}'", config.pytest_command))?;
    if !status.success() {
        bail!("test run failed ({})", status);
    }
    Ok(())
}

async fn run_critic(root: &Path, config: &Config, test_file: Option<PathBuf>) -> Result<()> {
    let service = build_service(config)?;
    let test_root = config.test_root(root);

    let test_files = match test_file {
        Some(file) => vec![root.join(file)],
        None => ProjectScanner::new(&test_root)
            .scan()
            .with_context(|| format!("Failed to scan {}", test_root.display()))?
            .files
            .into_iter()
            .filter(|p| {
                p.has_extension(&config.source_extension)
                    && p.file_name()
                        .map(|n| n.starts_with(&config.test_prefix))
                        .unwrap_or(false)
            })
            .map(|p| p.resolve(&test_root))
            .collect(),
    };

    let mut targets = Vec::new();
    for test_path in test_files {
        let Some(source) = source_for_test_path(root, &test_root, &test_path, &config.test_prefix)
        else {
            bail!(
                "{} is not a generated test file under {}",
                test_path.display(),
                test_root.display()
            );
        };
        targets.push((test_path, source));
    }

    if targets.is_empty() {
        println!("No generated tests found under {}", test_root.display());
        return Ok(());
    }

    let structure = project_structure(root, config)?;
    let problems = critique(root, config, service.as_ref(), &targets, &structure).await;
    if problems > 0 {
        bail!("{} test file(s) could not be critiqued", problems);
    }
    Ok(())
}

fn project_structure(root: &Path, config: &Config) -> Result<String> {
    let listing = ProjectScanner::new(root)
        .exclude(&config.test_dir)
        .scan()
        .with_context(|| format!("Failed to scan {}", root.display()))?;
    Ok(listing.structure())
}

/// Critique every `(test, source)` pair concurrently. Returns how many could
/// not be critiqued.
async fn critique(
    root: &Path,
    config: &Config,
    service: &dyn ReasoningService,
    targets: &[(PathBuf, PathBuf)],
    structure: &str,
) -> usize {
    let runner = PytestRunner::from_config(root, config);
    let critic = Critic::new(service, &runner);

    let verdicts = join_all(
        targets
            .iter()
            .map(|(test, source)| critic.run_and_classify(test, source, structure)),
    )
    .await;

    let mut problems = 0;
    for ((test, _), verdict) in targets.iter().zip(verdicts) {
        let shown = test.strip_prefix(root).unwrap_or(test);
        println!();
        match verdict {
            Ok(CriticVerdict::AllPassed) => println!("{}: all tests passed", shown.display()),
            Ok(CriticVerdict::UnableToExecute { reason }) => {
                problems += 1;
                println!("{}: could not execute tests\n  {}", shown.display(), reason);
            }
            Ok(CriticVerdict::Classified(feedback)) => {
                println!("{}: {} failing test(s)", shown.display(), feedback.len());
                for item in &feedback.source_defects {
                    println!(
                        "  [source] {}\n    {}\n    fix: {}",
                        item.test_name, item.explanation, item.suggestion
                    );
                }
                for item in &feedback.test_defects {
                    println!(
                        "  [test]   {}\n    {}\n    fix: {}",
                        item.test_name, item.explanation, item.suggestion
                    );
                }
            }
            Err(e) => {
                problems += 1;
                println!("{}: classification failed: {}", shown.display(), e);
            }
        }
    }
    problems
}
