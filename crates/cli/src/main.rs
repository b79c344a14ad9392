use std::path::{Path, PathBuf};
use std::str::FromStr;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use serde_json::Value as Json;
use strata_api::{BuildConfig, BuildContext, BuildResult, InProcApi, LoadRestrictor, ResultDiff, StrataApi, Tier};
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "stratactl", version, about = "Strata CLI: tiered, id-keyed kustomize output")]
struct Cli {
    /// Output format
    #[arg(short = 'o', long = "output", value_enum, global = true, default_value_t = Output::Human)]
    output: Output,

    /// Directory overlays are staged in and relative paths resolve against (default: cwd)
    #[arg(long = "base-dir", env = "STRATA_BASE_DIR", global = true)]
    base_dir: Option<PathBuf>,

    /// kustomize binary to run
    #[arg(long = "kustomize-bin", env = "STRATA_KUSTOMIZE_BIN", global = true, default_value = strata_build::config::DEFAULT_KUSTOMIZE_BIN)]
    kustomize_bin: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
enum Output { Human, Json }

#[derive(Subcommand, Debug)]
enum Commands {
    /// Build an existing kustomization directory
    Build {
        path: PathBuf,
        /// "none" lets the build load files outside the root
        #[arg(long = "load-restrictor", value_parser = LoadRestrictor::from_str)]
        load_restrictor: Option<LoadRestrictor>,
    },
    /// Compose an overlay from an attribute file (YAML or JSON) and build it
    Overlay {
        attrs: PathBuf,
    },
    /// Build a directory and compare it with a previously saved JSON result
    Diff {
        previous: PathBuf,
        path: PathBuf,
        #[arg(long = "load-restrictor", value_parser = LoadRestrictor::from_str)]
        load_restrictor: Option<LoadRestrictor>,
    },
}

fn init_tracing() {
    let env = std::env::var("STRATA_LOG").unwrap_or_else(|_| "info".to_string());
    let filter = tracing_subscriber::EnvFilter::from_str(&env).unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    // stdout carries command output
    tracing_subscriber::fmt().with_env_filter(filter).with_target(true).with_writer(std::io::stderr).init();
}

fn metrics_addr(raw: Option<&str>) -> Result<Option<std::net::SocketAddr>> {
    match raw.map(str::trim).filter(|s| !s.is_empty()) {
        None => Ok(None),
        Some(addr) => addr
            .parse()
            .map(Some)
            .with_context(|| format!("invalid STRATA_METRICS_ADDR {:?}; expected host:port", addr)),
    }
}

fn init_metrics() {
    let raw = std::env::var("STRATA_METRICS_ADDR").ok();
    match metrics_addr(raw.as_deref()) {
        Ok(None) => {}
        Ok(Some(sock)) => match metrics_exporter_prometheus::PrometheusBuilder::new().with_http_listener(sock).install() {
            Ok(()) => {
                strata_api::describe_metrics();
                tracing::info!(addr = %sock, "Prometheus metrics exporter listening");
            }
            Err(e) => tracing::warn!(error = %e, "failed to install metrics exporter"),
        },
        Err(e) => tracing::warn!(error = %format!("{:#}", e), "metrics disabled"),
    }
}

/// Attribute files are YAML; JSON parses as YAML too.
fn read_attrs(path: &Path) -> Result<Json> {
    let text = std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    let val: serde_yaml::Value = serde_yaml::from_str(&text).with_context(|| format!("parsing {}", path.display()))?;
    serde_json::to_value(val).with_context(|| format!("converting {} to JSON", path.display()))
}

fn read_result(path: &Path) -> Result<BuildResult> {
    let text = std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    serde_json::from_str(&text).with_context(|| format!("parsing build result {}", path.display()))
}

fn render_result(res: &BuildResult) -> String {
    let mut out = String::new();
    for (tier, ids) in res.ids_prio.iter() {
        out.push_str(&format!("tier {} ({})\n", tier.index(), ids.len()));
        for id in ids {
            out.push_str(&format!("  {}\n", id));
        }
    }
    out.push_str(&format!("{} manifests • fingerprint {}\n", res.len(), res.fingerprint));
    out
}

fn render_diff(d: &ResultDiff) -> String {
    if d.is_empty() {
        return format!("no changes • {} unchanged\n", d.unchanged);
    }
    let mut out = String::new();
    for id in d.apply_order() {
        match d.changed.iter().find(|c| c.id == id) {
            Some(c) => out.push_str(&format!(
                "~ {} (+{} ~{} -{})\n",
                id, c.summary.adds, c.summary.updates, c.summary.removes
            )),
            None => out.push_str(&format!("+ {}\n", id)),
        }
    }
    for id in d.delete_order() {
        out.push_str(&format!("- {}\n", id));
    }
    let tiers: Vec<String> = Tier::ALL
        .iter()
        .map(|t| format!("{}", d.added.tier(*t).len() + d.changed.iter().filter(|c| c.tier == *t).count()))
        .collect();
    out.push_str(&format!(
        "{} added • {} changed • {} removed • {} unchanged • per tier [{}]\n",
        d.added.len(),
        d.changed.len(),
        d.removed.len(),
        d.unchanged,
        tiers.join(", ")
    ));
    out
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    init_metrics();
    let cli = Cli::parse();

    let cfg = BuildConfig {
        kustomize_bin: cli.kustomize_bin.clone(),
        max_output_bytes: strata_build::config::max_output_bytes(),
        base_dir: cli.base_dir.clone().unwrap_or_else(strata_build::config::base_dir),
    };
    let api = InProcApi::new(BuildContext::from_config(&cfg));

    match cli.command {
        Commands::Build { path, load_restrictor } => {
            let restrictor = load_restrictor.unwrap_or_default();
            info!(path = %path.display(), restrictor = %restrictor, "build invoked");
            let res = api.build_path(&path, restrictor).await?;
            match cli.output {
                Output::Human => print!("{}", render_result(&res)),
                Output::Json => println!("{}", serde_json::to_string_pretty(&res)?),
            }
        }
        Commands::Overlay { attrs } => {
            info!(attrs = %attrs.display(), "overlay invoked");
            let attrs = read_attrs(&attrs)?;
            let res = api.build_overlay(&attrs).await?;
            match cli.output {
                Output::Human => print!("{}", render_result(&res)),
                Output::Json => println!("{}", serde_json::to_string_pretty(&res)?),
            }
        }
        Commands::Diff { previous, path, load_restrictor } => {
            info!(previous = %previous.display(), path = %path.display(), "diff invoked");
            let prev = read_result(&previous)?;
            let next = api.build_path(&path, load_restrictor.unwrap_or_default()).await?;
            let diff = api.diff(&prev, &next).await?;
            match cli.output {
                Output::Human => print!("{}", render_diff(&diff)),
                Output::Json => println!("{}", serde_json::to_string_pretty(&diff)?),
            }
        }
    }
    Ok(())
}
