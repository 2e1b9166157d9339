use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use stagehand::artifact::artifacts_of;
use stagehand::dag::to_dot;
use stagehand::{
    ArtifactRegistry, CancellationToken, Config, DeclaredDependencyProvider, DependencyProvider,
    DependencyResolverProcessor, DiscoveredManifest, ErrorCode, FileArtifact,
    FileArtifactProcessor, FileSystem, FileUnitProcessor, JsonArtifactRegistry, LocalFileSystem,
    Pipeline, StagehandError, Unit, build_dependency_nodes, discover_manifests, load_manifests,
    resolve_dependencies,
};

#[derive(Parser)]
#[command(name = "stagehand")]
#[command(about = "Resolve unit manifests and materialize the files they declare")]
struct Cli {
    /// Enable debug logging
    #[arg(short, long, global = true)]
    verbose: bool,
    /// Read configuration from this file instead of the user config dir
    #[arg(long, global = true, value_name = "FILE")]
    config: Option<PathBuf>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List all discovered units
    List {
        /// Directory to scan for manifests
        #[arg(long, value_name = "DIR")]
        dir: Option<PathBuf>,
    },
    /// Print units in dependency order
    Resolve {
        #[arg(long, value_name = "DIR")]
        dir: Option<PathBuf>,
        /// Print the dependency graph in Graphviz DOT format
        #[arg(long)]
        dot: bool,
    },
    /// Run the full pipeline and write the declared files
    Apply {
        #[arg(long, value_name = "DIR")]
        dir: Option<PathBuf>,
        /// Registry file tracking generated artifacts
        #[arg(long, value_name = "FILE")]
        registry: Option<PathBuf>,
        /// Preview the artifacts without touching the disk
        #[arg(long)]
        dry_run: bool,
        /// Abort the run after this many seconds
        #[arg(long, value_name = "SECONDS")]
        timeout: Option<u64>,
    },
    /// Inspect the artifact registry
    Registry {
        #[command(subcommand)]
        registry_command: RegistryCommands,
    },
}

#[derive(Subcommand)]
enum RegistryCommands {
    /// List registered artifacts per processor
    List {
        #[arg(long, value_name = "DIR")]
        dir: Option<PathBuf>,
        #[arg(long, value_name = "FILE")]
        registry: Option<PathBuf>,
    },
}

fn init_logging(verbose: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

fn load_config(path: Option<&Path>) -> anyhow::Result<Config> {
    let config = match path {
        Some(path) => Config::load_path(path)?,
        None => Config::load()?,
    };
    tracing::debug!("Loaded configuration: {:?}", config);
    Ok(config)
}

fn providers() -> Vec<Box<dyn DependencyProvider>> {
    vec![Box::new(DeclaredDependencyProvider)]
}

fn manifest_dir(
    fs: &dyn FileSystem,
    config: &Config,
    dir: Option<PathBuf>,
) -> anyhow::Result<PathBuf> {
    Ok(fs
        .abs(&config.manifest_dir(dir))
        .map_err(StagehandError::Io)?)
}

fn discover_units(
    fs: &dyn FileSystem,
    dir: &Path,
) -> anyhow::Result<(Vec<DiscoveredManifest>, Vec<Unit>)> {
    let discovered = discover_manifests(fs, dir)
        .map_err(StagehandError::Io)
        .with_context(|| format!("Failed to discover manifests in {}", dir.display()))?;
    let units = load_manifests(fs, &discovered)?;
    Ok((discovered, units))
}

fn list_units(config: &Config, dir: Option<PathBuf>) -> anyhow::Result<()> {
    let fs = LocalFileSystem::new();
    let dir = manifest_dir(&fs, config, dir)?;

    let (discovered, units) = discover_units(&fs, &dir)?;
    if units.is_empty() {
        println!("No units found in {}", dir.display());
        return Ok(());
    }

    println!(
        "Found {} unit(s) in {} manifest(s):",
        units.len(),
        discovered.len()
    );
    let nodes = build_dependency_nodes(&units, &providers())?;
    for node in &nodes {
        let unit = &node.unit;
        let location = Path::new(&unit.source.location);
        let relative = location.strip_prefix(&dir).unwrap_or(location);
        let description = unit
            .description
            .as_ref()
            .map(|d| format!(" - {}", d))
            .unwrap_or_default();
        println!(
            "  - {} [{}] ({}){}",
            unit.id,
            unit.kind,
            relative.display(),
            description
        );

        if !node.dependencies.is_empty() {
            let mut dependencies: Vec<String> =
                node.dependencies.iter().map(|d| d.to_string()).collect();
            dependencies.sort();
            println!("    depends on: {}", dependencies.join(", "));
        }
    }

    Ok(())
}

fn resolve_units(config: &Config, dir: Option<PathBuf>, dot: bool) -> anyhow::Result<()> {
    let fs = LocalFileSystem::new();
    let dir = manifest_dir(&fs, config, dir)?;

    let (_, units) = discover_units(&fs, &dir)?;
    let nodes = build_dependency_nodes(&units, &providers())?;

    if dot {
        println!("{}", to_dot(&nodes));
        return Ok(());
    }

    let resolved = resolve_dependencies(nodes).map_err(StagehandError::from)?;
    for (idx, unit) in resolved.units().iter().enumerate() {
        println!("{}. {}", idx + 1, unit.id);
    }

    Ok(())
}

fn apply_units(
    config: &Config,
    dir: Option<PathBuf>,
    registry: Option<PathBuf>,
    dry_run: bool,
    timeout: Option<u64>,
) -> anyhow::Result<()> {
    let fs: Arc<dyn FileSystem> = Arc::new(LocalFileSystem::new());
    let dir = manifest_dir(fs.as_ref(), config, dir)?;
    let registry_path = config.registry_file(registry, &dir);

    let (discovered, units) = discover_units(fs.as_ref(), &dir)?;
    tracing::info!(
        "Loaded {} unit(s) from {} manifest(s)",
        units.len(),
        discovered.len()
    );

    let registry: Arc<dyn ArtifactRegistry> = Arc::new(JsonArtifactRegistry::new(&registry_path));
    let pipeline = Pipeline::new(registry)
        .with_processor(DependencyResolverProcessor::new(providers()))
        .with_processor(FileUnitProcessor)
        .with_artifact_processor(FileArtifactProcessor::new(Arc::clone(&fs)));

    let ctx = match timeout {
        Some(seconds) => CancellationToken::with_timeout(Duration::from_secs(seconds)),
        None => CancellationToken::new(),
    };

    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(config.max_concurrent())
        .build()
        .context("Failed to build worker pool")?;

    if dry_run {
        let (units, artifacts) = pool.install(|| pipeline.process_units(&ctx, units))?;
        println!("Dry run: {} unit(s) in order", units.len());
        for (idx, unit) in units.iter().enumerate() {
            println!("  {}. {}", idx + 1, unit.id);
        }
        let files = artifacts_of::<FileArtifact>(&artifacts);
        println!("Planned {} file artifact(s):", files.len());
        for file in files {
            println!("  - {}", file.describe());
        }
        return Ok(());
    }

    let summary = pool.install(|| pipeline.run(&ctx, units))?;
    println!(
        "Applied {} unit(s), {} artifact(s)",
        summary.units, summary.artifacts
    );
    Ok(())
}

fn list_registry(
    config: &Config,
    dir: Option<PathBuf>,
    registry: Option<PathBuf>,
) -> anyhow::Result<()> {
    let dir = manifest_dir(&LocalFileSystem::new(), config, dir)?;
    let registry = JsonArtifactRegistry::new(config.registry_file(registry, &dir));
    registry.load().map_err(StagehandError::from)?;

    let snapshot = registry.snapshot();
    let namespaces: Vec<_> = snapshot
        .entries
        .into_iter()
        .map(|(processor, entries)| (processor, entries.unwrap_or_default()))
        .filter(|(_, entries)| !entries.is_empty())
        .collect();

    if namespaces.is_empty() {
        println!("No artifacts registered in {}", registry.path().display());
        return Ok(());
    }

    for (processor, entries) in namespaces {
        println!("{} ({} artifact(s)):", processor, entries.len());
        for entry in entries {
            match entry.metadata_str("writeMode") {
                Some(mode) => println!("  - {} [{}]", entry.artifact_id, mode),
                None => println!("  - {}", entry.artifact_id),
            }
        }
    }

    Ok(())
}

fn exit_code(error: &anyhow::Error) -> exitcode::ExitCode {
    let Some(code) = error.downcast_ref::<StagehandError>().map(StagehandError::code) else {
        return exitcode::SOFTWARE;
    };

    match code {
        ErrorCode::Validation
        | ErrorCode::UnresolvedDependency
        | ErrorCode::CircularDependency
        | ErrorCode::Manifest => exitcode::DATAERR,
        ErrorCode::Io
        | ErrorCode::Registry
        | ErrorCode::Cleanup
        | ErrorCode::CleanupRollback
        | ErrorCode::Write => exitcode::IOERR,
        ErrorCode::Config => exitcode::CONFIG,
        ErrorCode::Cancelled | ErrorCode::Internal => exitcode::SOFTWARE,
    }
}

fn run(cli: Cli) -> anyhow::Result<()> {
    let config = load_config(cli.config.as_deref())?;

    match cli.command {
        Commands::List { dir } => list_units(&config, dir),
        Commands::Resolve { dir, dot } => resolve_units(&config, dir, dot),
        Commands::Apply {
            dir,
            registry,
            dry_run,
            timeout,
        } => apply_units(&config, dir, registry, dry_run, timeout),
        Commands::Registry { registry_command } => match registry_command {
            RegistryCommands::List { dir, registry } => list_registry(&config, dir, registry),
        },
    }
}

fn main() {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    if let Err(e) = run(cli) {
        eprintln!("Error: {:#}", e);
        std::process::exit(exit_code(&e));
    }
}
