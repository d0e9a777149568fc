//! `comfystudio-runner` -- submit one generation and follow it to the end.
//!
//! Connection settings come from [`ClientConfig::from_env`], the job from
//! [`JobSpec::from_env`]. Exits non-zero when the submission fails or the
//! backend reports a generation error.

use anyhow::{bail, Context};
use comfystudio_client::config::ClientConfig;
use comfystudio_client::events::StudioEvent;
use comfystudio_client::session::Studio;
use comfystudio_core::node::NodeStatus;
use comfystudio_runner::job::{JobSpec, ProjectTarget};
use tokio::sync::broadcast::error::RecvError;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "comfystudio_runner=info,comfystudio_client=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = ClientConfig::from_env();
    let job = JobSpec::from_env()?;

    tracing::info!(
        api_url = %config.api_url,
        poll_interval = ?config.poll_interval,
        "Starting comfystudio-runner",
    );

    let studio = Studio::from_config(&config).context("Failed to build HTTP client")?;

    match studio.api().health().await {
        Ok(health) if health.is_ok() => {}
        Ok(health) => tracing::warn!(status = %health.status, "Store reports degraded health"),
        Err(e) => tracing::warn!(error = %e, "Health check failed"),
    }

    let result = run(&studio, &job).await;
    studio.shutdown().await;
    result
}

async fn run(studio: &Studio, job: &JobSpec) -> anyhow::Result<()> {
    studio
        .refresh_catalogs()
        .await
        .context("Failed to load catalogues")?;

    let project_id = resolve_project(studio, &job.project).await?;
    studio
        .open_project(&project_id)
        .await
        .with_context(|| format!("Failed to open project {project_id}"))?;

    let models = studio.state().read().await.models.clone();
    let mut applied = Ok(());
    studio
        .edit(|editor| applied = job.apply(editor, &models))
        .await?;
    applied?;
    if job.seed.is_none() {
        studio.randomize_seed().await?;
    }

    let mut events = studio.subscribe();
    let node = studio.generate().await.context("Generation request failed")?;
    tracing::info!(node_id = %node.id, prompt = %node.params.prompt, "Node queued");

    if !node.is_terminal() {
        follow(studio, &mut events, &node.id).await?;
    }

    let Some(node) = studio.node(&node.id).await else {
        bail!("Node {} disappeared from the session", node.id);
    };
    match node.status {
        NodeStatus::Completed => {
            let url = studio.output_url(&node.id).await.unwrap_or_default();
            println!("{url}");
            Ok(())
        }
        NodeStatus::Error => bail!(
            "Generation failed: {}",
            node.error.as_deref().unwrap_or("unknown error")
        ),
        status => bail!("Node stopped in state {status}"),
    }
}

/// Open the project by id, or find or create it by name.
async fn resolve_project(studio: &Studio, target: &ProjectTarget) -> anyhow::Result<String> {
    match target {
        ProjectTarget::Id(id) => Ok(id.clone()),
        ProjectTarget::Name(name) => {
            let existing = studio
                .list_projects()
                .await?
                .into_iter()
                .find(|p| &p.name == name);
            match existing {
                Some(summary) => Ok(summary.id),
                None => Ok(studio.create_project(name).await?.id),
            }
        }
    }
}

/// Log progress until the node finishes or the user interrupts.
async fn follow(
    studio: &Studio,
    events: &mut tokio::sync::broadcast::Receiver<StudioEvent>,
    node_id: &str,
) -> anyhow::Result<()> {
    loop {
        let event = tokio::select! {
            _ = tokio::signal::ctrl_c() => bail!("Interrupted"),
            event = events.recv() => event,
        };

        match event {
            Ok(StudioEvent::SelectedNodeProgress { node_id: id, status, progress, .. })
                if id == node_id =>
            {
                tracing::info!(node_id, status = %status, progress = %format!("{:.0}%", progress * 100.0), "Progress");
            }
            Ok(StudioEvent::NodeCompleted { node_id: id, filename, .. }) if id == node_id => {
                tracing::info!(node_id, filename = %filename, "Generation completed");
                return Ok(());
            }
            Ok(StudioEvent::NodeFailed { node_id: id, error, .. }) if id == node_id => {
                tracing::error!(node_id, error = %error, "Generation failed");
                return Ok(());
            }
            Ok(StudioEvent::PollFailed { error, .. }) => {
                tracing::debug!(error = %error, "Poll failed");
            }
            Ok(_) => {}
            Err(RecvError::Lagged(skipped)) => {
                tracing::warn!(skipped, "Event receiver lagged");
                if studio.node(node_id).await.is_some_and(|n| n.is_terminal()) {
                    return Ok(());
                }
            }
            Err(RecvError::Closed) => bail!("Event channel closed"),
        }
    }
}
