use anyhow::Context;
use futures::future::BoxFuture;
use futures::io::AsyncBufRead;
use k8s_openapi::api::core::v1::Pod;
use kube::api::{ListParams, LogParams};
use kube::{Api, Client, ResourceExt, config};
use std::pin::Pin;

/// Raw per-pod log byte stream, line-split by the reader task.
pub type LogByteStream = Pin<Box<dyn AsyncBufRead + Send>>;

/// Options forwarded to the API server when opening a pod log stream.
/// Timestamps are always requested; the pipeline depends on the leading
/// timestamp token.
#[derive(Debug, Clone, Default)]
pub struct LogStreamOptions {
    pub follow: bool,
    pub tail_lines: Option<i64>,
    pub since_seconds: Option<i64>,
    pub since_time: Option<chrono::DateTime<chrono::Utc>>,
}

/// Cluster access as the pipeline sees it: list pods by label selector and
/// open a log byte stream for one pod. Tests provide an in-memory fake.
pub trait PodDiscovery: Send + Sync {
    fn list_pods<'a>(
        &'a self,
        namespace: &'a str,
        label_selector: &'a str,
    ) -> BoxFuture<'a, anyhow::Result<Vec<String>>>;

    fn open_log_stream<'a>(
        &'a self,
        namespace: &'a str,
        pod_name: &'a str,
        options: &'a LogStreamOptions,
    ) -> BoxFuture<'a, anyhow::Result<LogByteStream>>;
}

/// Kubernetes-backed discovery.
#[derive(Clone)]
pub struct KubeDiscovery {
    client: Client,
}

impl KubeDiscovery {
    /// Build a client from an explicit kubeconfig path, or infer the
    /// configuration from the environment.
    pub async fn connect(kubeconfig: Option<&str>) -> anyhow::Result<Self> {
        let config = match kubeconfig {
            Some(path) => {
                let kubeconfig = config::Kubeconfig::read_from(path)
                    .with_context(|| format!("reading kubeconfig {path}"))?;
                config::Config::from_custom_kubeconfig(
                    kubeconfig,
                    &config::KubeConfigOptions::default(),
                )
                .await
                .with_context(|| format!("loading kubeconfig {path}"))?
            }
            None => config::Config::infer()
                .await
                .context("inferring cluster configuration")?,
        };
        let client = Client::try_from(config).context("creating Kubernetes client")?;
        Ok(Self { client })
    }
}

impl PodDiscovery for KubeDiscovery {
    fn list_pods<'a>(
        &'a self,
        namespace: &'a str,
        label_selector: &'a str,
    ) -> BoxFuture<'a, anyhow::Result<Vec<String>>> {
        Box::pin(async move {
            let api: Api<Pod> = Api::namespaced(self.client.clone(), namespace);
            let params = ListParams::default().labels(label_selector);
            let pods = api.list(&params).await.with_context(|| {
                format!("listing pods in {namespace} with labels {label_selector}")
            })?;
            Ok(pods.iter().map(|pod| pod.name_any()).collect())
        })
    }

    fn open_log_stream<'a>(
        &'a self,
        namespace: &'a str,
        pod_name: &'a str,
        options: &'a LogStreamOptions,
    ) -> BoxFuture<'a, anyhow::Result<LogByteStream>> {
        Box::pin(async move {
            let api: Api<Pod> = Api::namespaced(self.client.clone(), namespace);
            let params = LogParams {
                follow: options.follow,
                tail_lines: options.tail_lines,
                since_seconds: options.since_seconds,
                since_time: options.since_time,
                timestamps: true,
                ..Default::default()
            };
            let stream = api
                .log_stream(pod_name, &params)
                .await
                .with_context(|| format!("opening log stream for {namespace}/{pod_name}"))?;
            Ok(Box::pin(stream) as LogByteStream)
        })
    }
}
