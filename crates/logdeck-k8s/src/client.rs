use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use k8s_openapi::api::apps::v1::ReplicaSet;
use k8s_openapi::api::core::v1::Pod;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::Api;
use kube::api::{ListParams, LogParams};
use kube::config::{KubeConfigOptions, Kubeconfig};
use tracing::{debug, info, warn};

use logdeck_types::{ContainerInfo, PodInfo, PodStatus};

use crate::overrides::ContainerOverrides;
use crate::pod_logs::PodLogSource;

/// Where to find the cluster
#[derive(Clone, Debug)]
pub struct KubeOptions {
    pub kubeconfig: PathBuf,
    pub context: Option<String>,
    pub namespace: Option<String>,
}

/// Pod log request knobs shared by every pod
#[derive(Clone, Debug, Default)]
pub struct LogOptions {
    pub follow: bool,
    pub previous: bool,
    pub since: Option<Duration>,
    pub tail: Option<i64>,
}

impl LogOptions {
    fn params(&self, container: Option<String>) -> LogParams {
        LogParams {
            container,
            follow: self.follow,
            previous: self.previous,
            since_seconds: self
                .since
                .map(|since| since.as_secs() as i64)
                .filter(|secs| *secs > 0),
            tail_lines: self.tail.filter(|tail| *tail >= 0),
            ..Default::default()
        }
    }
}

/// Kubernetes client wrapper, with a snapshot of the namespace's pods and
/// live replica sets taken at connect time
pub struct KubeClient {
    client: kube::Client,
    namespace: String,
    replica_sets: Vec<ReplicaSet>,
    pods: HashMap<String, Pod>,
    overrides: ContainerOverrides,
    log_options: LogOptions,
}

impl KubeClient {
    /// Load the kubeconfig and snapshot the namespace
    pub async fn connect(
        options: &KubeOptions,
        overrides: ContainerOverrides,
        log_options: LogOptions,
    ) -> Result<Self> {
        let kubeconfig = Kubeconfig::read_from(&options.kubeconfig).with_context(|| {
            format!("Failed to read kubeconfig {}", options.kubeconfig.display())
        })?;

        let config = kube::Config::from_custom_kubeconfig(
            kubeconfig,
            &KubeConfigOptions {
                context: options.context.clone(),
                ..Default::default()
            },
        )
        .await
        .context("Failed to create config from kubeconfig")?;

        let namespace = options
            .namespace
            .clone()
            .unwrap_or_else(|| config.default_namespace.clone());

        let client = kube::Client::try_from(config).context("Failed to create client")?;

        let replica_sets: Api<ReplicaSet> = Api::namespaced(client.clone(), &namespace);
        let replica_sets = replica_sets
            .list(&ListParams::default())
            .await
            .context(format!("Failed to list replica sets in {}", namespace))?
            .items
            .into_iter()
            .filter(|rs| rs.status.as_ref().is_some_and(|s| s.replicas > 0))
            .collect();

        let pods: Api<Pod> = Api::namespaced(client.clone(), &namespace);
        let pods = pods
            .list(&ListParams::default())
            .await
            .context(format!("Failed to list pods in {}", namespace))?
            .items
            .into_iter()
            .filter_map(|pod| Some((pod.metadata.name.clone()?, pod)))
            .collect();

        Ok(Self {
            client,
            namespace,
            replica_sets,
            pods,
            overrides,
            log_options,
        })
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// Pods owned by live replica sets of `deployment`.
    ///
    /// A `deploy/` container override is carried over to each pod unless
    /// the pod has its own.
    pub fn deployment_pods(&mut self, deployment: &str) -> Result<Vec<String>> {
        let names = owned_pods(&self.replica_sets, &self.pods, deployment);

        if let Some(container) = self
            .overrides
            .matches(&format!("deploy/{}", deployment))
            .map(str::to_string)
        {
            for name in &names {
                self.overrides
                    .try_add(&format!("pod/{}", name), &container)?;
            }
        }

        debug!(deployment, pods = names.len(), "resolved deployment");
        Ok(names)
    }

    /// Pods matching a label selector
    pub async fn label_selector_pods(&self, selector: &str) -> Result<Vec<String>> {
        let pods: Api<Pod> = Api::namespaced(self.client.clone(), &self.namespace);
        let list = pods
            .list(&ListParams::default().labels(selector))
            .await
            .context(format!("Failed to list pods for selector {}", selector))?;

        Ok(list
            .items
            .into_iter()
            .filter_map(|pod| pod.metadata.name)
            .collect())
    }

    /// Snapshot of a pod's state
    pub fn pod_info(&self, name: &str) -> Option<PodInfo> {
        self.pods.get(name).map(|pod| pod_to_info(pod, &self.namespace))
    }

    /// Open the log stream of one pod
    pub async fn pod_logs(&self, name: &str) -> Result<PodLogSource> {
        let info = self
            .pod_info(name)
            .ok_or_else(|| anyhow!("pod {:?} not found", name))?;

        if self.log_options.follow && info.status != PodStatus::Running {
            warn!(pod = name, status = ?info.status, "following a pod that is not running");
        }

        let container = self.overrides.matches(&format!("pod/{}", name)).map(str::to_string);
        if let Some(container) = &container {
            if !info.containers.is_empty() && !info.containers.iter().any(|c| &c.name == container) {
                warn!(pod = name, container = %container, "container override does not name a known container");
            }
        }

        let pods: Api<Pod> = Api::namespaced(self.client.clone(), &info.namespace);
        let params = self.log_options.params(container.clone());
        let stream = pods
            .log_stream(name, &params)
            .await
            .context(format!("Failed to stream logs of pod {}", name))?;

        info!(pod = name, container = ?container, "streaming pod logs");
        Ok(PodLogSource::new(format!("pod/{}", name), stream))
    }
}

/// Names of pods owned by a replica set that a `deployment` owns
fn owned_pods(replica_sets: &[ReplicaSet], pods: &HashMap<String, Pod>, deployment: &str) -> Vec<String> {
    let owned_by = |meta: &ObjectMeta, kind: &str, names: &[&str]| {
        meta.owner_references
            .iter()
            .flatten()
            .any(|r| r.kind == kind && names.contains(&r.name.as_str()))
    };

    let replica_set_names: Vec<&str> = replica_sets
        .iter()
        .filter(|rs| owned_by(&rs.metadata, "Deployment", &[deployment]))
        .filter_map(|rs| rs.metadata.name.as_deref())
        .collect();

    let mut names: Vec<String> = pods
        .iter()
        .filter(|(_, pod)| owned_by(&pod.metadata, "ReplicaSet", &replica_set_names))
        .map(|(name, _)| name.clone())
        .collect();
    names.sort();
    names
}

/// Convert a k8s Pod to PodInfo
fn pod_to_info(pod: &Pod, namespace: &str) -> PodInfo {
    let name = pod.metadata.name.clone().unwrap_or_default();
    let namespace = pod
        .metadata
        .namespace
        .clone()
        .unwrap_or_else(|| namespace.to_string());
    let mut info = PodInfo::new(name, namespace);

    if let Some(labels) = &pod.metadata.labels {
        info.labels = labels.clone().into_iter().collect();
    }

    if let Some(spec) = &pod.spec {
        info.containers = spec
            .containers
            .iter()
            .map(|c| ContainerInfo::new(c.name.clone()))
            .collect();
    }

    if let Some(status) = &pod.status {
        info.status = status
            .phase
            .as_deref()
            .map(PodStatus::from)
            .unwrap_or(PodStatus::Unknown);

        for cs in status.container_statuses.iter().flatten() {
            if let Some(container) = info.containers.iter_mut().find(|c| c.name == cs.name) {
                container.ready = cs.ready;
                container.restart_count = cs.restart_count;
            }
        }
    }

    info
}
