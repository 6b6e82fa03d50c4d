use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::str::FromStr;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{ArgAction, Parser, Subcommand, ValueEnum};
use kubelint_core::{ManifestPackage, SourceKind};
use kubelint_registry::{CachedRegistry, CombinedRegistry, LocalRegistry, RegistryQueryExecutor};
use kubelint_rules::{parse_yaml_documents, EngineConfig, FsRuleSourceLoader, RuleEngineResult, RulesRuntime};
use tracing::{info, warn};

mod report;

#[derive(Parser, Debug)]
#[command(name = "kubelint", version, about = "Validate Kubernetes manifests against Kubevious rules")]
struct Cli {
    /// Output format
    #[arg(short = 'o', long = "output", value_enum, global = true, default_value_t = Output::Human)]
    output: Output,

    /// Only report rules applied to this namespace (cluster-wide rules are always shown)
    #[arg(long = "ns", global = true)]
    namespace: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
enum Output {
    Human,
    Json,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run rules against manifests (files or directories of .yaml/.yml/.json)
    Guard {
        /// Manifests to validate
        #[arg(required = true)]
        manifests: Vec<PathBuf>,
        /// Additional rule manifests (ClusterRule, Rule, RuleApplicator, Library)
        #[arg(long = "rules")]
        rules: Vec<PathBuf>,
        /// Also query the live cluster of the current kube context
        #[arg(long = "live-k8s", action = ArgAction::SetTrue)]
        live_k8s: bool,
    },
}

fn init_tracing() {
    let env = std::env::var("KUBELINT_LOG").unwrap_or_else(|_| "info".to_string());
    let filter = tracing_subscriber::EnvFilter::from_str(&env).unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).with_target(true).with_writer(std::io::stderr).init();
}

fn init_metrics() {
    if let Ok(addr) = std::env::var("KUBELINT_METRICS_ADDR") {
        if let Ok(sock) = addr.parse::<std::net::SocketAddr>() {
            let builder = metrics_exporter_prometheus::PrometheusBuilder::new();
            match builder.with_http_listener(sock).install() {
                Ok(_) => tracing::info!(addr = %addr, "Prometheus metrics exporter listening"),
                Err(e) => tracing::warn!(error = %e, "failed to install metrics exporter"),
            }
        } else {
            tracing::warn!(addr = %addr, "invalid KUBELINT_METRICS_ADDR; expected host:port");
        }
    }
}

fn is_manifest_file(path: &Path) -> bool {
    matches!(path.extension().and_then(|e| e.to_str()), Some("yaml" | "yml" | "json"))
}

/// Expand directories (one level, sorted) into manifest files.
async fn expand(paths: &[PathBuf]) -> Result<Vec<PathBuf>> {
    let mut out = Vec::new();
    for path in paths {
        let meta = tokio::fs::metadata(path).await.with_context(|| format!("reading {}", path.display()))?;
        if !meta.is_dir() {
            out.push(path.clone());
            continue;
        }
        let mut dir = tokio::fs::read_dir(path).await.with_context(|| format!("listing {}", path.display()))?;
        let mut files = Vec::new();
        while let Some(entry) = dir.next_entry().await? {
            let p = entry.path();
            if is_manifest_file(&p) {
                files.push(p);
            }
        }
        files.sort();
        out.extend(files);
    }
    Ok(out)
}

/// Load every document of `paths` into `package`; returns the number of rejected documents.
async fn load_manifests(package: &ManifestPackage, paths: &[PathBuf]) -> Result<usize> {
    let mut rejected = 0;
    for path in expand(paths).await? {
        let shown = path.to_string_lossy().into_owned();
        let text = tokio::fs::read_to_string(&path).await.with_context(|| format!("reading {shown}"))?;
        let docs = parse_yaml_documents(&text, &shown)?;
        let source = package.add_source(SourceKind::File, shown.clone());
        for doc in docs {
            if let Err(e) = package.add_manifest(&source, doc) {
                warn!(path = %shown, error = %e, "skipping invalid manifest");
                rejected += 1;
            }
        }
    }
    Ok(rejected)
}

async fn registry_for(package: &ManifestPackage, live_k8s: bool) -> Result<Arc<dyn RegistryQueryExecutor>> {
    let local = LocalRegistry::from_package(package);
    if !live_k8s {
        return Ok(Arc::new(local));
    }
    let remote = kubelint_kubehub::RemoteRegistry::connect().await?;
    Ok(Arc::new(CachedRegistry::new(CombinedRegistry::new(local, remote))))
}

async fn guard(cli: &Cli, manifests: &[PathBuf], rules: &[PathBuf], live_k8s: bool) -> Result<ExitCode> {
    let package = ManifestPackage::new();
    let mut rejected = load_manifests(&package, manifests).await?;
    rejected += load_manifests(&package, rules).await?;
    info!(manifests = package.len(), rejected, live_k8s, "manifests loaded");

    let package = Arc::new(package);
    let registry = registry_for(&package, live_k8s).await?;
    let config = EngineConfig::from_env();
    let runtime = RulesRuntime::init(config, Arc::clone(&package), registry, &FsRuleSourceLoader::new()).await;
    let mut result = runtime.execute();
    if let Some(ns) = cli.namespace.as_deref() {
        let rules = result.rules.into_iter().filter(|r| r.namespace.as_deref().map_or(true, |n| n == ns)).collect();
        result = RuleEngineResult::new(rules, result.skipped_rules);
    }

    match cli.output {
        Output::Human => print!("{}", report::human(&result, &package)),
        Output::Json => println!("{}", serde_json::to_string_pretty(&report::json(&result, &package))?),
    }
    Ok(if report::is_clean(&result) { ExitCode::SUCCESS } else { ExitCode::FAILURE })
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    init_tracing();
    init_metrics();
    let cli = Cli::parse();

    match &cli.command {
        Commands::Guard { manifests, rules, live_k8s } => {
            info!(manifests = manifests.len(), rules = rules.len(), "guard invoked");
            guard(&cli, manifests, rules, *live_k8s).await
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn invalid_documents_are_counted_not_fatal() {
        let dir = std::env::temp_dir().join(format!("kubelint-load-{}", std::process::id()));
        tokio::fs::create_dir_all(&dir).await.unwrap();
        let file = dir.join("mixed.yaml");
        let text = "apiVersion: v1\nkind: ConfigMap\nmetadata:\n  name: a\n  namespace: ns1\n---\nmetadata:\n  name: no-kind\n";
        tokio::fs::write(&file, text).await.unwrap();
        tokio::fs::write(dir.join("notes.txt"), "ignored").await.unwrap();

        let package = ManifestPackage::new();
        let rejected = load_manifests(&package, &[dir.clone()]).await.unwrap();
        assert_eq!(rejected, 1);
        assert_eq!(package.len(), 1);
        assert_eq!(package.sources().len(), 1);
        tokio::fs::remove_dir_all(&dir).await.unwrap();
    }
}
