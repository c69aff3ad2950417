use std::path::Path;
use std::sync::Arc;

use anyhow::Context;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use uplift_core::domain::{EventKind, Payload, StageEvent, TargetId, UploadTask};
use uplift_core::impls::{ChannelEventSink, InMemoryRemote};
use uplift_core::{Pipeline, PipelineConfig};

/// 拡張子から media type を推定する（デモ用の最小セット）
fn media_type_for(path: &Path) -> &'static str {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase);
    match ext.as_deref() {
        Some("png") => "image/png",
        Some("jpg") | Some("jpeg") => "image/jpeg",
        Some("gif") => "image/gif",
        Some("webp") => "image/webp",
        Some("svg") => "image/svg+xml",
        _ => "application/octet-stream",
    }
}

fn load_tasks(paths: &[String]) -> anyhow::Result<Vec<UploadTask>> {
    if paths.is_empty() {
        // ファイル指定がなければダミーのアセットを作る
        return Ok(UploadTask::batch((0..8).map(|i| {
            (
                format!("demo-{i}.png"),
                Payload::new(vec![i as u8; 1024 * (i + 1)], "image/png"),
            )
        })));
    }

    let mut items = Vec::with_capacity(paths.len());
    for raw in paths {
        let path = Path::new(raw);
        let bytes = std::fs::read(path).with_context(|| format!("reading {raw}"))?;
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| raw.clone());
        items.push((name, Payload::new(bytes, media_type_for(path))));
    }
    Ok(UploadTask::batch(items))
}

fn load_config() -> anyhow::Result<PipelineConfig> {
    let config = match std::env::var("UPLIFT_CONFIG") {
        Ok(path) => PipelineConfig::from_json_file(&path)
            .with_context(|| format!("loading config from {path}"))?,
        Err(_) => PipelineConfig::default(),
    };
    Ok(config.apply_env_overrides()?)
}

fn render(event: &StageEvent) {
    match &event.kind {
        EventKind::Transition => {
            println!("[#{:>3}] {:<24} {}", event.original_index, event.name, event.stage)
        }
        EventKind::Retrying { attempt, delay_ms } => println!(
            "[#{:>3}] {:<24} {} retry after {}ms (attempt {}, status {:?})",
            event.original_index,
            event.name,
            event.stage,
            delay_ms,
            attempt,
            event.last_http_status
        ),
        EventKind::Progress { fraction } => tracing::trace!(
            index = event.original_index,
            fraction,
            "transfer progress"
        ),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "uplift_core=info,uplift_cli=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = load_config()?;
    let args: Vec<String> = std::env::args().skip(1).collect();
    let tasks = load_tasks(&args)?;

    let target =
        TargetId::new(std::env::var("UPLIFT_TARGET").unwrap_or_else(|_| "demo-gallery".into()));
    let base_position = match std::env::var("UPLIFT_BASE_POSITION") {
        Ok(v) => v.parse().context("UPLIFT_BASE_POSITION must be an integer")?,
        Err(_) => 0,
    };
    let flakiness = match std::env::var("UPLIFT_DEMO_FLAKINESS") {
        Ok(v) => v.parse().context("UPLIFT_DEMO_FLAKINESS must be a number")?,
        Err(_) => 0.2,
    };

    tracing::info!(tasks = tasks.len(), %target, base_position, flakiness, "uploading");

    let (sink, mut events) = ChannelEventSink::channel();
    let printer = tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            render(&event);
        }
    });

    let report = Pipeline::builder()
        .config(config)
        .remote(InMemoryRemote::new().with_flakiness(flakiness))
        .event_sink(Arc::new(sink))
        .target(target)
        .base_position(base_position)
        .tasks(tasks)
        .build()?
        .run()
        .await?;

    // sink は pipeline と一緒に drop 済みなので printer はキューを吐き切って終わる
    printer.await?;

    println!("{}", serde_json::to_string_pretty(&report)?);

    if report.has_fatal_error {
        anyhow::bail!(
            "{} task(s) failed: {:?}",
            report.counts.failed,
            report.failed_indices()
        );
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn media_type_from_extension() {
        assert_eq!(media_type_for(Path::new("a/b/Cover.PNG")), "image/png");
        assert_eq!(media_type_for(Path::new("x.jpeg")), "image/jpeg");
        assert_eq!(media_type_for(Path::new("README")), "application/octet-stream");
    }

    #[test]
    fn demo_tasks_are_indexed_in_order() {
        let tasks = load_tasks(&[]).unwrap();
        assert_eq!(tasks.len(), 8);
        assert!(tasks.iter().enumerate().all(|(i, t)| t.original_index() == i));
    }
}
