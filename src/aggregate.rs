use anyhow::{Context, Result};
use chrono::{SecondsFormat, Utc};
use serde_json::json;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use logdeck_k8s::KubeClient;
use logdeck_logs::{GcloudFetcher, HttpSource, Multiplexer, Schedule, gcloud_source};
use logdeck_types::{LEVEL_KEY, MSG_KEY, PID_KEY, TIME_KEY};

use crate::config::AggregateConfig;

/// Stream every selected source to stdout until they all end or we are
/// interrupted
pub async fn run(config: AggregateConfig) -> Result<()> {
    let cancel = CancellationToken::new();
    spawn_interrupt_handler(cancel.clone());

    let mut stdout = tokio::io::stdout();
    if config.pid {
        write_pid_record(&mut stdout).await?;
    }

    let mux = build_multiplexer(&config).await?;
    info!(sources = mux.len(), follow = config.follow, "streaming logs");

    let handle = mux.spawn(cancel);
    let written = handle
        .pipe_to(&mut stdout)
        .await
        .context("Failed to write logs to stdout")?;

    debug!(lines = written, "all sources ended");
    Ok(())
}

async fn build_multiplexer(config: &AggregateConfig) -> Result<Multiplexer> {
    let mut mux = Multiplexer::new(config.follow);

    if let Some(kube) = &config.kube {
        let mut client =
            KubeClient::connect(kube, config.overrides.clone(), config.log_options.clone()).await?;

        let mut pods = config.pods.clone();
        for deployment in &config.deployments {
            let deployment_pods = client.deployment_pods(deployment)?;
            if deployment_pods.is_empty() {
                warn!(deployment = %deployment, namespace = client.namespace(), "deployment has no pods");
            }
            pods.extend(deployment_pods);
        }
        for selector in &config.labels {
            pods.extend(client.label_selector_pods(selector).await?);
        }

        for pod in &pods {
            mux.add(client.pod_logs(pod).await?);
        }
    }

    if let Some(project) = &config.gcloud_project {
        let schedule = Schedule::new(config.follow, config.gcloud_poll);
        let tail = config
            .log_options
            .tail
            .and_then(|tail| u32::try_from(tail).ok())
            .filter(|tail| *tail > 0);

        for log_name in &config.gcloud {
            let fetcher = GcloudFetcher::new(project.clone()).with_freshness(config.log_options.since);
            mux.add(gcloud_source(fetcher, log_name, schedule, tail));
        }
    }

    if let Some(addr) = &config.listen {
        let source = HttpSource::bind(addr, config.follow).await?;
        info!(addr = %source.local_addr(), "listening for pushed logs");
        mux.add(source);
    }

    Ok(mux)
}

/// One wire record announcing our pid, so a dashboard reading our output
/// can interrupt us
async fn write_pid_record<W>(out: &mut W) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    let record = json!({
        LEVEL_KEY: "trace",
        MSG_KEY: "logdeck aggregate pid",
        TIME_KEY: Utc::now().to_rfc3339_opts(SecondsFormat::Nanos, true),
        PID_KEY: std::process::id(),
    });

    let mut line = serde_json::to_vec(&record)?;
    line.push(b'\n');
    out.write_all(&line).await?;
    out.flush().await?;
    Ok(())
}

/// Cancel `cancel` on the first Ctrl-C
pub fn spawn_interrupt_handler(cancel: CancellationToken) {
    tokio::spawn(async move {
        tokio::select! {
            _ = cancel.cancelled() => {}
            result = tokio::signal::ctrl_c() => {
                match result {
                    Ok(()) => info!("interrupted, closing sources"),
                    Err(e) => warn!(error = %e, "failed to listen for interrupts"),
                }
                cancel.cancel();
            }
        }
    });
}
