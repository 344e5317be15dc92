use std::io::Read;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use kform_core::{ResourceList, RestMapper, Transformer, DEFAULT_FIELD_MANAGER};
use kform_transform::{builtin, builtin_kinds, BuiltinMapper};
use tracing::{debug, error, info};

#[derive(Parser, Debug)]
#[command(name = "kformctl", version, about = "kform CLI: typed transforms over Kubernetes manifests")]
struct Cli {
    /// Output format
    #[arg(short = 'o', long = "output", value_enum, global = true, default_value_t = Output::Yaml)]
    output: Output,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
enum Output { Yaml, Json }

#[derive(Subcommand, Debug)]
enum Commands {
    /// Load manifests, run the transform pipeline and print the result
    Render {
        /// Manifest file(s); "-" reads stdin
        #[arg(short = 'f', long = "filename", required = true)]
        files: Vec<PathBuf>,
        /// Namespace for every namespaced resource
        #[arg(long = "namespace")]
        namespace: Option<String>,
        /// Label to add, e.g. app=web (repeatable)
        #[arg(long = "label", value_parser = parse_pair)]
        labels: Vec<(String, String)>,
        /// Annotation to add, e.g. owner=team-a (repeatable)
        #[arg(long = "annotation", value_parser = parse_pair)]
        annotations: Vec<(String, String)>,
        /// Image override, e.g. nginx=nginx:1.27 (repeatable)
        #[arg(long = "image", value_parser = parse_pair)]
        images: Vec<(String, String)>,
        /// Replica override by workload name, e.g. web=3 (repeatable)
        #[arg(long = "replicas", value_parser = parse_replicas)]
        replicas: Vec<(String, i32)>,
    },
    /// List kinds with typed transformers
    Kinds,
}

fn init_tracing() {
    let env = std::env::var("KFORM_LOG").unwrap_or_else(|_| "info".to_string());
    let filter = tracing_subscriber::EnvFilter::from_str(&env).unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    // stdout carries manifests
    tracing_subscriber::fmt().with_env_filter(filter).with_target(true).with_writer(std::io::stderr).init();
}

fn parse_pair(s: &str) -> Result<(String, String), String> {
    match s.split_once('=') {
        Some((k, v)) if !k.is_empty() => Ok((k.to_string(), v.to_string())),
        _ => Err(format!("expected key=value, got `{}`", s)),
    }
}

fn parse_replicas(s: &str) -> Result<(String, i32), String> {
    let (name, count) = parse_pair(s)?;
    match count.parse::<i32>() {
        Ok(n) if n >= 0 => Ok((name, n)),
        _ => Err(format!("expected a non-negative replica count, got `{}`", count)),
    }
}

fn read_input(path: &Path) -> Result<String> {
    if path == Path::new("-") {
        let mut buf = String::new();
        std::io::stdin().read_to_string(&mut buf).context("reading stdin")?;
        return Ok(buf);
    }
    std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))
}

fn load(files: &[PathBuf]) -> Result<ResourceList> {
    let mut resources = Vec::new();
    for path in files {
        let text = read_input(path)?;
        // JSON is valid YAML, one loader covers both
        let list = ResourceList::from_yaml(&text).with_context(|| format!("loading {}", path.display()))?;
        debug!(file = %path.display(), count = list.len(), "loaded");
        resources.extend(list.into_resources());
    }
    let field_manager = std::env::var("KFORM_FIELD_MANAGER").unwrap_or_else(|_| DEFAULT_FIELD_MANAGER.to_string());
    Ok(ResourceList::new(resources).with_mapper(BuiltinMapper::shared()).with_field_manager(field_manager))
}

struct RenderOpts {
    namespace: Option<String>,
    labels: Vec<(String, String)>,
    annotations: Vec<(String, String)>,
    images: Vec<(String, String)>,
    replicas: Vec<(String, i32)>,
}

/// Namespace, then labels, annotations, images, replicas.
fn pipeline(opts: RenderOpts, mapper: Option<Arc<dyn RestMapper>>) -> Vec<Transformer> {
    let mut steps: Vec<Transformer> = Vec::new();
    if let Some(ns) = opts.namespace {
        steps.push(builtin::set_namespace(ns, mapper));
    }
    if !opts.labels.is_empty() {
        steps.push(builtin::add_labels(opts.labels));
    }
    if !opts.annotations.is_empty() {
        steps.push(builtin::add_annotations(opts.annotations));
    }
    for (name, new_ref) in opts.images.iter() {
        steps.extend(builtin::set_image(name, new_ref));
    }
    for (name, count) in opts.replicas.iter() {
        steps.extend(builtin::set_replicas(name, *count));
    }
    steps
}

fn print_list(list: &ResourceList, output: Output) -> Result<()> {
    match output {
        Output::Yaml => print!("{}", list.to_yaml()?),
        Output::Json => println!("{}", list.to_json_pretty()?),
    }
    Ok(())
}

fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();

    match cli.command {
        Commands::Render { files, namespace, labels, annotations, images, replicas } => {
            let list = load(&files)?;
            let opts = RenderOpts { namespace, labels, annotations, images, replicas };
            let steps = pipeline(opts, list.mapper().cloned());
            info!(resources = list.len(), steps = steps.len(), "render invoked");
            let out = match list.transform(&steps) {
                Ok(out) => out,
                Err(e) => {
                    error!(error = ?e, "transform failed");
                    return Err(e).context("transforming manifests");
                }
            };
            print_list(&out, cli.output)?;
        }
        Commands::Kinds => {
            let kinds = builtin_kinds();
            match cli.output {
                Output::Yaml => {
                    for k in kinds {
                        let scope = if k.namespaced { "namespaced" } else { "cluster" };
                        println!("{} • {} • {} • {}", k.api_version(), k.gvk.kind, scope, k.plural);
                    }
                }
                Output::Json => {
                    let rows: Vec<_> = kinds
                        .iter()
                        .map(|k| serde_json::json!({
                            "apiVersion": k.api_version(),
                            "kind": k.gvk.kind,
                            "plural": k.plural,
                            "namespaced": k.namespaced,
                        }))
                        .collect();
                    println!("{}", serde_json::to_string_pretty(&rows)?);
                }
            }
        }
    }
    Ok(())
}
