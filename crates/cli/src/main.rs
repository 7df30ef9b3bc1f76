use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use clap::{ArgAction, Parser, Subcommand, ValueEnum};
use kube::core::DynamicObject;
use serde::Serialize;
use tokio::signal;
use tracing::{info, warn};
use vsync_controller::{
    CancellationToken, ClientError, Collaborators, NoopRecorder, PhysicalTranslator, PlaneClient,
    ResourceDescriptor, SyncConfig, SyncController,
};
use vsync_core::diff_summary;
use vsync_kubehub::{client_for_context, KubePlane, KubeRecorder};
use vsync_patch::{NameResolver, PhysicalNames, VirtualNames};

#[derive(Parser, Debug)]
#[command(name = "vsyncctl", version, about = "Sync custom resources between a virtual and a physical plane")]
struct Cli {
    /// Output format
    #[arg(short = 'o', long = "output", value_enum, global = true, default_value_t = Output::Human)]
    output: Output,

    /// Mapping configuration file
    #[arg(long, global = true, env = "VSYNC_CONFIG", default_value = "vsync.yaml")]
    config: PathBuf,

    /// Virtual cluster instance name, part of every physical name
    #[arg(long, global = true, env = "VSYNC_SUFFIX", default_value = "vsync")]
    suffix: String,

    /// Namespace physical objects are created in
    #[arg(long = "target-namespace", global = true, env = "VSYNC_TARGET_NAMESPACE", default_value = "default")]
    target_namespace: String,

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
    /// Load the config and build every mapping
    Validate,
    /// Resolve a name across planes
    Resolve {
        name: String,
        /// Virtual namespace the name lives in
        #[arg(long = "ns")]
        namespace: String,
        /// Map a physical name back to its virtual name
        #[arg(long, action = ArgAction::SetTrue)]
        reverse: bool,
        /// Virtual names in --ns that cannot be parsed back (repeatable)
        #[arg(long = "known")]
        known: Vec<String>,
    },
    /// Run the patch rules of a mapping offline and print the result
    Transform {
        /// Kind (or apiVersion/Kind) of the mapping to use
        #[arg(long)]
        kind: String,
        /// YAML file with the virtual object
        #[arg(long)]
        object: PathBuf,
        /// YAML file with the physical object (required with --reverse)
        #[arg(long)]
        counterpart: Option<PathBuf>,
        /// Apply reverse rules instead of forward rules
        #[arg(long, action = ArgAction::SetTrue)]
        reverse: bool,
    },
    /// Reconcile one virtual object against its physical counterpart
    Sync {
        name: String,
        #[arg(long = "ns")]
        namespace: String,
        #[arg(long)]
        kind: String,
        #[arg(long = "virtual-context", env = "VSYNC_VIRTUAL_CONTEXT")]
        virtual_context: Option<String>,
        #[arg(long = "physical-context", env = "VSYNC_PHYSICAL_CONTEXT")]
        physical_context: Option<String>,
    },
}

fn init_tracing() {
    let env = std::env::var("VSYNC_LOG").unwrap_or_else(|_| "info".to_string());
    let filter = tracing_subscriber::EnvFilter::from_str(&env).unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).with_target(true).with_writer(std::io::stderr).init();
}

fn init_metrics() {
    if let Ok(addr) = std::env::var("VSYNC_METRICS_ADDR") {
        if let Ok(sock) = addr.parse::<std::net::SocketAddr>() {
            let builder = metrics_exporter_prometheus::PrometheusBuilder::new();
            match builder.with_http_listener(sock).install() {
                Ok(_) => info!(addr = %addr, "Prometheus metrics exporter listening"),
                Err(e) => warn!(error = %e, "failed to install metrics exporter"),
            }
        } else {
            warn!(addr = %addr, "invalid VSYNC_METRICS_ADDR; expected host:port");
        }
    }
}

#[derive(Serialize)]
struct MappingSummary {
    gvk: String,
    selector_requirements: usize,
    patches: usize,
    reverse_patches: usize,
}

impl From<&ResourceDescriptor> for MappingSummary {
    fn from(d: &ResourceDescriptor) -> Self {
        Self {
            gvk: d.gvk_key(),
            selector_requirements: d.selector().map(|s| s.len()).unwrap_or(0),
            patches: d.patches().len(),
            reverse_patches: d.reverse_patches().len(),
        }
    }
}

/// Plane for offline runs; any write is an error.
struct OfflinePlane;

#[async_trait]
impl PlaneClient<DynamicObject> for OfflinePlane {
    async fn create(&self, _cancel: &CancellationToken, _obj: &DynamicObject) -> Result<(), ClientError> {
        Err(ClientError::Other("offline: create not available".into()))
    }

    async fn patch(&self, _cancel: &CancellationToken, _current: &DynamicObject, _target: &DynamicObject) -> Result<(), ClientError> {
        Err(ClientError::Other("offline: patch not available".into()))
    }

    async fn delete(&self, _cancel: &CancellationToken, _obj: &DynamicObject) -> Result<(), ClientError> {
        Err(ClientError::Other("offline: delete not available".into()))
    }
}

fn read_object(path: &PathBuf) -> Result<DynamicObject> {
    let raw = std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    serde_yaml::from_str(&raw).with_context(|| format!("parsing {} as an object", path.display()))
}

fn load_descriptor(cfg_path: &PathBuf, kind: &str) -> Result<ResourceDescriptor> {
    let cfg = SyncConfig::load(cfg_path)?;
    cfg.descriptor_for(kind)?
        .ok_or_else(|| anyhow!("no mapping for kind {} in {}", kind, cfg_path.display()))
}

fn emit<T: Serialize>(output: Output, value: &T, human: impl FnOnce()) -> Result<()> {
    match output {
        Output::Human => human(),
        Output::Json => println!("{}", serde_json::to_string_pretty(value)?),
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    init_metrics();
    let cli = Cli::parse();
    let names = Arc::new(PhysicalNames::new(cli.suffix.clone()));

    match cli.command {
        Commands::Validate => {
            let cfg = SyncConfig::load(&cli.config)?;
            let descriptors = cfg.descriptors().with_context(|| format!("validating {}", cli.config.display()))?;
            let summary: Vec<MappingSummary> = descriptors.iter().map(MappingSummary::from).collect();
            emit(cli.output, &summary, || {
                for m in summary.iter() {
                    println!(
                        "{} • selector {} • patches {} • reversePatches {}",
                        m.gvk, m.selector_requirements, m.patches, m.reverse_patches
                    );
                }
            })?;
        }
        Commands::Resolve { name, namespace, reverse, known } => {
            let resolved = if reverse {
                VirtualNames::new(names.clone())
                    .with_known(known.iter().map(|k| (namespace.as_str(), k.as_str())))
                    .resolve(&name, &namespace)?
            } else {
                names.resolve(&name, &namespace)?
            };
            let value = serde_json::json!({ "input": name, "namespace": namespace, "reverse": reverse, "resolved": resolved });
            emit(cli.output, &value, || println!("{}", resolved))?;
        }
        Commands::Transform { kind, object, counterpart, reverse } => {
            let descriptor = Arc::new(load_descriptor(&cli.config, &kind)?);
            let translator = Arc::new(PhysicalTranslator::new(names.clone(), cli.target_namespace.clone()));
            let ctrl = SyncController::<DynamicObject>::new(
                descriptor,
                Collaborators {
                    translator,
                    virtual_plane: Arc::new(OfflinePlane),
                    physical_plane: Arc::new(OfflinePlane),
                    recorder: Arc::new(NoopRecorder),
                    forward_names: names.clone(),
                    reverse_names: Arc::new(VirtualNames::new(names.clone())),
                },
            );
            let virtual_obj = read_object(&object)?;
            let out = if reverse {
                let path = counterpart.ok_or_else(|| anyhow!("--reverse needs --counterpart"))?;
                let physical = read_object(&path)?;
                ctrl.reverse(&virtual_obj, &physical)?
            } else {
                ctrl.forward(&virtual_obj)?
            };
            let summary = diff_summary(&serde_json::to_value(&out)?, &serde_json::to_value(&virtual_obj)?);
            info!(adds = summary.adds, updates = summary.updates, removes = summary.removes, reverse, "transformed");
            match cli.output {
                Output::Human => print!("{}", serde_yaml::to_string(&out)?),
                Output::Json => println!("{}", serde_json::to_string_pretty(&out)?),
            }
        }
        Commands::Sync { name, namespace, kind, virtual_context, physical_context } => {
            let descriptor = Arc::new(load_descriptor(&cli.config, &kind)?);
            let gvk = descriptor.gvk();
            let vclient = client_for_context(virtual_context.as_deref()).await?;
            let pclient = client_for_context(physical_context.as_deref()).await?;
            let vplane = Arc::new(KubePlane::discover(vclient.clone(), &gvk).await.context("virtual plane")?);
            let pplane = Arc::new(KubePlane::discover(pclient.clone(), &gvk).await.context("physical plane")?);
            let translator = Arc::new(PhysicalTranslator::new(names.clone(), cli.target_namespace.clone()));
            let recorder = Arc::new(KubeRecorder::new(vclient, vplane.api_resource().clone()));

            let virtual_obj = vplane.get(Some(&namespace), &name).await?;
            let pkey = translator.physical_key(Some(&namespace), &name)?;
            let physical_obj = pplane.get(pkey.namespace.as_deref(), &pkey.name).await?;

            let ctrl = SyncController::<DynamicObject>::new(
                descriptor,
                Collaborators {
                    translator,
                    virtual_plane: vplane,
                    physical_plane: pplane,
                    recorder,
                    forward_names: names.clone(),
                    reverse_names: Arc::new(VirtualNames::new(names.clone())),
                },
            );
            let cancel = CancellationToken::new();
            tokio::spawn({
                let cancel = cancel.clone();
                async move {
                    if signal::ctrl_c().await.is_ok() {
                        warn!("interrupted; cancelling");
                        cancel.cancel();
                    }
                }
            });
            let outcome = ctrl.sync(&cancel, virtual_obj.as_ref(), physical_obj.as_ref()).await?;
            info!(kind = %kind, ns = %namespace, name = %name, outcome = outcome.as_str(), "sync finished");
            let value = serde_json::json!({
                "name": name,
                "namespace": namespace,
                "physical": pkey.to_string(),
                "outcome": outcome.as_str(),
            });
            emit(cli.output, &value, || println!("{}/{} -> {}: {}", namespace, name, pkey, outcome.as_str()))?;
        }
    }

    Ok(())
}
