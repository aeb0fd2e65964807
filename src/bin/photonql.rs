//! PhotonQL command-line translator
//!
//! Reads a translation request (a document type and a host expression tree,
//! as JSON) and prints the rendered query as relaxed extended JSON.
//!
//! # Examples
//!
//! ```bash
//! # Translate a predicate lambda into a filter document
//! photonql filter --input request.json
//!
//! # Translate a query chain, targeting an older server
//! photonql --server-version 4.4 pipeline < request.json
//!
//! # Show the effective options
//! photonql --config photonql.toml config
//! ```
//!
//! A request looks like:
//!
//! ```json
//! { "document_type": { ... }, "expression": { ... }, "class_maps": [] }
//! ```

use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use photonql::expression::{Expr, Type};
use photonql::render::{pipeline_to_relaxed_json, to_relaxed_json};
use photonql::serialization::{ClassMap, SerializerRegistry};
use photonql::{QueryTranslator, ServerVersion, TranslationOptions};
use serde::Deserialize;
use serde_json::{json, Value};
use std::io::Read;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// PhotonQL - typed query expressions to MongoDB query documents
#[derive(Parser, Debug)]
#[command(name = "photonql")]
#[command(version = photonql::VERSION)]
#[command(about = "PhotonQL - typed query expressions to MongoDB query documents", long_about = None)]
struct Cli {
    /// Subcommand to execute
    #[command(subcommand)]
    command: Commands,

    /// Options file (TOML)
    #[arg(long, global = true, env = "PHOTONQL_CONFIG")]
    config: Option<PathBuf>,

    /// Target server version (overrides the options file)
    #[arg(long, global = true)]
    server_version: Option<ServerVersion>,

    /// Skip the simplifier
    #[arg(long, global = true)]
    no_simplify: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, global = true, default_value = "warn")]
    log_level: String,

    /// Disable colored output
    #[arg(long, global = true)]
    no_color: bool,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Translate a predicate lambda into a filter document
    Filter(RequestArgs),

    /// Translate a query chain into pipeline stages and its finalizer
    Pipeline(RequestArgs),

    /// Translate a selector lambda into a find projection
    Projection(RequestArgs),

    /// Translate a field access lambda into a dotted path
    FieldPath(RequestArgs),

    /// Print the effective options as TOML
    Config,
}

/// Where to read the request from
#[derive(Args, Debug)]
struct RequestArgs {
    /// Request file (reads stdin when omitted)
    #[arg(short, long)]
    input: Option<PathBuf>,

    /// Pretty-print the output
    #[arg(long)]
    pretty: bool,
}

/// A translation request.
#[derive(Debug, Deserialize)]
struct Request {
    /// Type of the documents the expression runs over
    document_type: Type,
    expression: Expr,
    #[serde(default)]
    class_maps: Vec<ClassMap>,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    setup_logging(&cli);

    let mut options = TranslationOptions::load(cli.config.as_deref())
        .context("failed to load translation options")?;
    if let Some(version) = cli.server_version {
        options = options.with_compatibility_level(version);
    }
    if cli.no_simplify {
        options = options.without_simplification();
    }
    debug!(?options, "effective options");

    match cli.command {
        Commands::Filter(args) => run(&args, &options, filter_command),
        Commands::Pipeline(args) => run(&args, &options, pipeline_command),
        Commands::Projection(args) => run(&args, &options, projection_command),
        Commands::FieldPath(args) => run(&args, &options, field_path_command),
        Commands::Config => {
            print!("{}", options.to_toml()?);
            Ok(())
        }
    }
}

/// Logs go to stderr so the translated query can be piped
fn setup_logging(cli: &Cli) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level));

    tracing_subscriber::registry()
        .with(
            fmt::layer()
                .with_writer(std::io::stderr)
                .with_ansi(!cli.no_color),
        )
        .with(filter)
        .init();
}

fn run<F>(args: &RequestArgs, options: &TranslationOptions, command: F) -> anyhow::Result<()>
where
    F: FnOnce(&QueryTranslator, &Request) -> anyhow::Result<Value>,
{
    let request = read_request(args)?;
    let registry = SerializerRegistry::new();
    for class_map in &request.class_maps {
        registry
            .register_class_map(class_map.clone())
            .with_context(|| format!("invalid class map for {}", class_map.type_name))?;
    }
    let translator = QueryTranslator::with_options(Arc::new(registry), options.clone());
    let output = command(&translator, &request)?;

    let text = if args.pretty {
        serde_json::to_string_pretty(&output)?
    } else {
        serde_json::to_string(&output)?
    };
    println!("{}", text);
    Ok(())
}

fn read_request(args: &RequestArgs) -> anyhow::Result<Request> {
    let text = match &args.input {
        Some(path) => std::fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?,
        None => {
            let mut text = String::new();
            std::io::stdin()
                .read_to_string(&mut text)
                .context("failed to read the request from stdin")?;
            text
        }
    };
    let request: Request = serde_json::from_str(&text).context("invalid request")?;
    info!(document_type = %request.document_type, "translating request");
    Ok(request)
}

fn filter_command(translator: &QueryTranslator, request: &Request) -> anyhow::Result<Value> {
    let serializer = translator.registry().get_serializer(&request.document_type)?;
    let filter = translator.translate_filter(&request.expression, &serializer)?;
    Ok(to_relaxed_json(filter))
}

fn pipeline_command(translator: &QueryTranslator, request: &Request) -> anyhow::Result<Value> {
    let serializer = translator.registry().get_serializer(&request.document_type)?;
    let query = translator.translate_executable(&request.expression, &serializer)?;
    Ok(json!({
        "pipeline": pipeline_to_relaxed_json(query.render_with(translator.options().implicit_and)),
        "finalizer": query.finalizer.to_string(),
        "output_type": query.output_serializer.value_type().to_string(),
    }))
}

fn projection_command(translator: &QueryTranslator, request: &Request) -> anyhow::Result<Value> {
    let serializer = translator.registry().get_serializer(&request.document_type)?;
    let projection = translator.translate_projection(&request.expression, &serializer)?;
    Ok(json!({
        "projection": projection.projection.map(to_relaxed_json),
        "output_type": projection.output_serializer.value_type().to_string(),
    }))
}

fn field_path_command(translator: &QueryTranslator, request: &Request) -> anyhow::Result<Value> {
    let serializer = translator.registry().get_serializer(&request.document_type)?;
    let (path, field_serializer) =
        translator.translate_field_path(&request.expression, &serializer)?;
    Ok(json!({
        "path": path,
        "type": field_serializer.value_type().to_string(),
    }))
}
