use std::process::ExitCode;

use clap::{Args, Parser, Subcommand};
use glam::DVec3;
use miette::IntoDiagnostic;
use tracing::info;
use tracing_subscriber::EnvFilter;

use image360_loader::annotation;
use image360_loader::backend::GraphQueryHttpClient;
use image360_loader::config::ConfigLoader;
use image360_loader::domain::InstanceRef;
use image360_loader::error::Image360Error;
use image360_loader::loader::CollectionLoader;
use image360_loader::output::{CollectionResult, JsonOutput, LoadResult, PolygonResult};
use image360_loader::version::FormatVersion;

#[derive(Parser)]
#[command(name = "image360")]
#[command(about = "Batched loader for 360° image collections")]
#[command(version, author)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    #[command(about = "Load image collections from the graph backend")]
    Collections(CollectionsArgs),
    #[command(about = "Work with stored annotation geometry")]
    Annotation(AnnotationArgs),
}

#[derive(Args)]
struct CollectionsArgs {
    #[command(subcommand)]
    command: CollectionsCommand,
}

#[derive(Subcommand)]
enum CollectionsCommand {
    #[command(about = "Load historical image sets for one or more collections")]
    Load(LoadArgs),
}

#[derive(Args)]
struct LoadArgs {
    /// Collections as `space:externalId`; defaults to the config's list.
    specifiers: Vec<String>,

    #[arg(long)]
    config: Option<String>,
}

#[derive(Args)]
struct AnnotationArgs {
    #[command(subcommand)]
    command: AnnotationCommand,
}

#[derive(Subcommand)]
enum AnnotationCommand {
    #[command(about = "Reconstruct annotation polygons from raw vertex data")]
    Polygons(PolygonArgs),
}

#[derive(Args)]
struct PolygonArgs {
    /// Image Euler rotation as `x,y,z` radians.
    #[arg(
        long,
        value_delimiter = ',',
        allow_negative_numbers = true,
        default_value = "0,0,0"
    )]
    rotation: Vec<f64>,

    #[arg(long)]
    format_version: Option<String>,

    #[arg(allow_negative_numbers = true)]
    numbers: Vec<f64>,
}

#[tokio::main]
async fn main() -> ExitCode {
    if let Err(report) = run().await {
        eprintln!("{report:?}");
        if let Some(error) = report.downcast_ref::<Image360Error>() {
            return ExitCode::from(map_exit_code(error));
        }
        return ExitCode::from(1);
    }
    ExitCode::SUCCESS
}

fn map_exit_code(error: &Image360Error) -> u8 {
    match error {
        Image360Error::MissingConfig | Image360Error::ConfigRead(_) => 2,
        Image360Error::BackendHttp(_)
        | Image360Error::BackendStatus { .. }
        | Image360Error::BatchAborted => 3,
        Image360Error::AnnotationFormat(_)
        | Image360Error::InvalidProperty { .. }
        | Image360Error::Schema(_)
        | Image360Error::CursorInvariant(_) => 4,
        Image360Error::InvalidIdentifier(_)
        | Image360Error::InvalidVersion(_)
        | Image360Error::ConfigParse(_) => 1,
    }
}

async fn run() -> miette::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    match cli.command {
        Commands::Collections(args) => match args.command {
            CollectionsCommand::Load(args) => run_load(args).await,
        },
        Commands::Annotation(args) => match args.command {
            AnnotationCommand::Polygons(args) => run_polygons(args),
        },
    }
}

async fn run_load(args: LoadArgs) -> miette::Result<()> {
    let resolved = ConfigLoader::resolve(args.config.as_deref())?;
    let collections = if args.specifiers.is_empty() {
        resolved.collections.clone()
    } else {
        args.specifiers
            .iter()
            .map(|value| value.parse::<InstanceRef>())
            .collect::<Result<Vec<_>, _>>()?
    };

    let client = GraphQueryHttpClient::new(&resolved.backend())?;
    let loader = CollectionLoader::new(client, resolved.loader());
    info!(collections = collections.len(), "loading collections");

    let mut loaded = Vec::with_capacity(collections.len());
    for (identifier, outcome) in loader.load_many(collections).await {
        loaded.push(CollectionResult {
            identifier,
            sets: outcome?,
        });
    }

    JsonOutput::print_load(&LoadResult {
        loaded_at: chrono::Utc::now().to_rfc3339(),
        collections: loaded,
    })
    .into_diagnostic()?;
    Ok(())
}

fn run_polygons(args: PolygonArgs) -> miette::Result<()> {
    let rotation = match args.rotation.as_slice() {
        [x, y, z] => DVec3::new(*x, *y, *z),
        _ => {
            return Err(Image360Error::annotation("rotation needs exactly three angles").into());
        }
    };
    let polygons = annotation::reconstruct(args.format_version.as_deref(), rotation, &args.numbers)?;
    JsonOutput::print_polygons(&PolygonResult {
        format_version: FormatVersion::parse_or_default(args.format_version.as_deref()),
        polygons,
    })
    .into_diagnostic()?;
    Ok(())
}
