//! Command-line interface
//!
//! Two analysis entry points share the same output document: `analyze`
//! resolves destination clusters from Argo CD cluster secrets and runs the
//! selected closure strategy over one or all applications; `run-query`
//! walks the instance graph of the local cluster directly from the
//! Application custom resources.

mod logging;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Result, bail};
use clap::{Parser, Subcommand};

use crate::argocd::{self, ClusterRegistry};
use crate::graph::{ApiServerBackend, GraphWalker, TrackingMethod};
use crate::resource::GroupedResourceKinds;
use crate::tracker::{
    CacheClosureStrategy, ClosureStrategy, GraphClosureStrategy, RelationSource, run_analysis,
};

pub use logging::init_logging;

/// Discovers the resource kinds related to Argo CD applications and emits a
/// resource.inclusions document.
#[derive(Parser, Debug)]
#[command(name = "argo-resource-tracker")]
#[command(about = "Analyze resource relationships for Argo CD applications", long_about = None)]
pub struct Args {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Analyze applications and print the resource.inclusions document
    Analyze(AnalyzeArgs),
    /// Discover application-related kinds with graph queries only
    RunQuery(RunQueryArgs),
    /// Print version information
    Version,
}

#[derive(clap::Args, Debug)]
pub struct AnalyzeArgs {
    /// Application name (required unless --all-apps)
    #[arg(long, short = 'a')]
    pub app: Option<String>,

    /// Analyze all applications in the application namespace
    #[arg(long)]
    pub all_apps: bool,

    /// Namespace holding the Application resources
    #[arg(long, alias = "appNamespace", default_value = "argocd")]
    pub app_namespace: String,

    /// Argo CD control-plane namespace (holds the cluster secrets)
    #[arg(long, short = 'n', default_value = "argocd")]
    pub namespace: String,

    /// Path to kubeconfig for control-plane access
    #[arg(long)]
    pub kubeconfig: Option<PathBuf>,

    /// Relationship backend
    #[arg(long, value_enum, default_value_t = RelationSource::ResourceGraph)]
    pub relation_source: RelationSource,

    /// Log level: one of trace|debug|info|warn|error
    #[arg(long, default_value = "info")]
    pub loglevel: String,
}

#[derive(clap::Args, Debug)]
pub struct RunQueryArgs {
    /// Log level: one of trace|debug|info|warn|error
    #[arg(long, default_value = "info")]
    pub loglevel: String,

    /// Path to kubeconfig for cluster access
    #[arg(long)]
    pub kubeconfig: Option<PathBuf>,

    /// How Argo CD tracks managed resources
    #[arg(long, value_enum, default_value_t = TrackingMethod::Label)]
    pub tracking_method: TrackingMethod,

    /// Only this application (default: all applications)
    #[arg(long)]
    pub app_name: Option<String>,

    /// Namespace to list applications in (default: all namespaces)
    #[arg(long, default_value = "")]
    pub app_namespace: String,
}

/// Dispatch the parsed command line.
pub async fn run(args: Args) -> Result<()> {
    match args.command {
        Command::Analyze(args) => {
            init_logging(&args.loglevel)?;
            run_analyze(args).await
        }
        Command::RunQuery(args) => {
            init_logging(&args.loglevel)?;
            run_query(args).await
        }
        Command::Version => {
            println!("{} {}", env!("CARGO_PKG_NAME"), env!("CARGO_PKG_VERSION"));
            Ok(())
        }
    }
}

async fn run_analyze(args: AnalyzeArgs) -> Result<()> {
    let client = crate::kube::create_client(args.kubeconfig.as_deref()).await?;

    let apps = if args.all_apps {
        argocd::list_applications(client.clone(), &args.app_namespace).await?
    } else if let Some(name) = &args.app {
        vec![argocd::get_application(client.clone(), &args.app_namespace, name).await?]
    } else {
        bail!("either --app or --all-apps must be specified");
    };
    tracing::info!(
        "analyze: relation_source={:?} apps={} app_namespace={}",
        args.relation_source,
        apps.len(),
        args.app_namespace
    );

    let strategy: Arc<dyn ClosureStrategy> = match args.relation_source {
        RelationSource::ResourceGraph => {
            let clusters = ClusterRegistry::new(client.clone(), &args.namespace);
            Arc::new(CacheClosureStrategy::new(clusters))
        }
        RelationSource::Graph => {
            Arc::new(GraphClosureStrategy::new(client.clone(), TrackingMethod::Label).await?)
        }
    };

    let outcome = run_analysis(strategy, apps).await;
    // Partial output is still rendered when some bundles failed
    print!("{}", outcome.kinds.render_yaml()?);
    match outcome.first_error {
        Some(e) => Err(e),
        None => Ok(()),
    }
}

async fn run_query(args: RunQueryArgs) -> Result<()> {
    tracing::info!("Starting query executor");
    let client = crate::kube::create_client(args.kubeconfig.as_deref()).await?;

    let mut apps = argocd::list_applications(client.clone(), &args.app_namespace).await?;
    if let Some(name) = &args.app_name {
        apps.retain(|app| &app.name == name);
    }

    let backend = ApiServerBackend::new(client, args.tracking_method).await?;
    let mut walker = GraphWalker::new(Box::new(backend));
    let mut grouped = GroupedResourceKinds::new();
    for app in &apps {
        tracing::info!("Querying Argo CD application {}", app.name);
        // All namespaces: tracked resources may live outside the app's own
        let related = walker.application_closure(&app.name, "").await?;
        for info in related {
            if info.api_version.is_empty() {
                continue;
            }
            grouped.add_api_version_kind(&info.api_version, &info.kind);
        }
    }

    print!("{}", grouped.render_yaml()?);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_analyze_accepts_camel_case_namespace_alias() {
        let args =
            Args::try_parse_from(["argo-resource-tracker", "analyze", "--appNamespace", "team-a"])
                .unwrap();
        let Command::Analyze(analyze) = args.command else {
            panic!("expected analyze command");
        };
        assert_eq!(analyze.app_namespace, "team-a");
    }

    #[test]
    fn test_analyze_kebab_case_namespace_flag() {
        let args = Args::try_parse_from([
            "argo-resource-tracker",
            "analyze",
            "--app-namespace",
            "team-b",
        ])
        .unwrap();
        let Command::Analyze(analyze) = args.command else {
            panic!("expected analyze command");
        };
        assert_eq!(analyze.app_namespace, "team-b");
    }
}
