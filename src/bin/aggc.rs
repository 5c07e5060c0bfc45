//! Aggregate Schema Compiler CLI
//!
//! Compiles a schema and prints what emitters would consume. Every command
//! compiles first: diagnostics are printed and the command fails when the
//! schema has errors.

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;

use aggregate_schema::config::CONFIG_FILE_NAME;
use aggregate_schema::{compile, CompileError, CompiledModel, CompilerConfig, JsonSource, ShapeKind};

#[derive(Parser)]
#[command(name = "aggc")]
#[command(about = "Compile aggregate schemas into shapes, keys and emission order")]
struct Cli {
    /// Config file (defaults to aggregate-schema.toml lookup)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Validate a schema and print its diagnostics
    Check {
        /// Schema file or directory
        schema: PathBuf,
    },

    /// Print derived shapes as JSON
    Shapes {
        schema: PathBuf,
        /// Only this aggregate path (e.g. Order/Lines)
        #[arg(short, long)]
        aggregate: Option<String>,
        /// Only this shape kind
        #[arg(short, long)]
        kind: Option<ShapeKind>,
        /// Inline Child shapes into their parent
        #[arg(long)]
        caller_view: bool,
    },

    /// Print the emission order
    Order { schema: PathBuf },

    /// Print flattened keys
    Keys { schema: PathBuf },

    /// Export the aggregate graph in GraphViz format
    Dot {
        schema: PathBuf,
        /// Output file (stdout when omitted)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Write a default config file
    InitConfig {
        #[arg(default_value = CONFIG_FILE_NAME)]
        path: PathBuf,
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    if let Err(e) = run(cli) {
        eprintln!("Error: {:#}", e);
        std::process::exit(1);
    }
}

fn run(cli: Cli) -> anyhow::Result<()> {
    if let Commands::InitConfig { path, force } = &cli.command {
        if path.exists() && !force {
            bail!("{} already exists (use --force to overwrite)", path.display());
        }
        CompilerConfig::default().save(path)?;
        println!("✅ Wrote {}", path.display());
        return Ok(());
    }

    let config = CompilerConfig::load_from(cli.config.as_deref()).context("loading configuration")?;

    match cli.command {
        Commands::Check { schema } => {
            let model = load_and_compile(&schema, &config)?;
            print!("{}", model.diagnostics().format_all());
            println!(
                "✅ {} aggregates, {} relationships, {} warning(s)",
                model.graph().aggregate_count(),
                model.relationships().len(),
                model.diagnostics().warning_count()
            );
            println!("   fingerprint {}", model.fingerprint());
        }

        Commands::Shapes {
            schema,
            aggregate,
            kind,
            caller_view,
        } => {
            let model = load_and_compile(&schema, &config)?;
            let aggregates = match aggregate {
                Some(path) => match model.graph().find(&path) {
                    Some(id) => vec![id],
                    None => bail!("no aggregate at path '{}'", path),
                },
                None => model.emission_order().to_vec(),
            };
            let kinds = match kind {
                Some(kind) => vec![kind],
                None => ShapeKind::ALL.to_vec(),
            };

            let mut shapes = Vec::new();
            for id in aggregates {
                for kind in &kinds {
                    shapes.push(if caller_view {
                        model.caller_view(id, *kind)
                    } else {
                        model.get_shape(id, *kind).clone()
                    });
                }
            }
            println!("{}", serde_json::to_string_pretty(&shapes)?);
        }

        Commands::Order { schema } => {
            let model = load_and_compile(&schema, &config)?;
            for (i, path) in model.emission_order_paths().iter().enumerate() {
                println!("{:>3}. {}", i + 1, path);
            }
        }

        Commands::Keys { schema } => {
            let model = load_and_compile(&schema, &config)?;
            for aggregate in model.graph().aggregates() {
                let columns: Vec<String> = model
                    .flatten_key(aggregate.id)
                    .iter()
                    .map(|c| format!("{}:{}", c.name, c.primitive))
                    .collect();
                println!(
                    "{} ({}) [{}]",
                    aggregate.path,
                    aggregate.kind.label(),
                    columns.join(", ")
                );
            }
        }

        Commands::Dot { schema, output } => {
            let model = load_and_compile(&schema, &config)?;
            let dot = model.graph().to_dot();
            match output {
                Some(path) => {
                    std::fs::write(&path, dot)?;
                    println!("✅ Exported DOT to: {}", path.display());
                }
                None => print!("{}", dot),
            }
        }

        Commands::InitConfig { .. } => unreachable!("handled before loading configuration"),
    }

    Ok(())
}

/// Compile, printing every diagnostic when the schema is rejected
fn load_and_compile(schema: &Path, config: &CompilerConfig) -> anyhow::Result<CompiledModel> {
    let source = JsonSource::from_path(schema)
        .with_context(|| format!("loading schema from {}", schema.display()))?;

    match compile(&source, config) {
        Ok(model) => Ok(model),
        Err(CompileError::Rejected(diagnostics)) => {
            eprint!("{}", diagnostics.format_all());
            bail!(
                "❌ schema rejected: {} error(s), {} warning(s)",
                diagnostics.error_count(),
                diagnostics.warning_count()
            )
        }
        Err(e) => Err(e.into()),
    }
}
