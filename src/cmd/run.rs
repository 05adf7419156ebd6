//! Local analysis of a single alert file, `alertflow run`.

use std::path::Path;
use std::time::Duration;

use alertflow::config::AlertflowConfig;
use alertflow::coordinator::TriggerContext;
use alertflow::dag::one_click_stages;
use alertflow::engine::Engine;
use alertflow::progress::Subscription;
use alertflow::ui::{StageProgressUi, UiMode};
use alertflow_common::{Stage, StageRun};
use anyhow::{Context, Result, bail};
use serde_json::Value;

/// How long to keep draining buffered events once the run has returned.
const DRAIN_WINDOW: Duration = Duration::from_millis(20);

pub struct RunArgs<'a> {
    pub alert_file: &'a Path,
    pub stage: Option<&'a str>,
    pub alert_id: Option<&'a str>,
    pub organization: &'a str,
    pub ui: &'a str,
    pub verbose: bool,
}

/// Read an alert document and pick its id: explicit flag, then the
/// document's `id` field, then the file stem.
pub fn load_alert(path: &Path, alert_id: Option<&str>) -> Result<(String, Value)> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read alert file: {}", path.display()))?;
    let alert: Value = serde_json::from_str(&content)
        .with_context(|| format!("Alert file is not valid JSON: {}", path.display()))?;
    if !alert.is_object() {
        bail!("Alert file must contain a JSON object: {}", path.display());
    }

    let id = alert_id
        .map(str::to_string)
        .or_else(|| match alert.get("id") {
            Some(Value::String(s)) if !s.is_empty() => Some(s.clone()),
            Some(Value::Number(n)) => Some(n.to_string()),
            _ => None,
        })
        .or_else(|| {
            path.file_stem()
                .map(|stem| stem.to_string_lossy().into_owned())
        })
        .context("Could not determine an alert id; pass --alert-id")?;
    Ok((id, alert))
}

pub async fn cmd_run(config: AlertflowConfig, args: RunArgs<'_>) -> Result<()> {
    let (alert_id, alert) = load_alert(args.alert_file, args.alert_id)?;
    let mode = UiMode::parse(args.ui);
    let engine = Engine::from_config(&config)?;
    let context = TriggerContext::new(args.organization, alert).requested_by("cli");
    let mut events = engine.progress.subscribe(&alert_id, None)?;

    match args.stage {
        Some(stage) => {
            let stage: Stage = stage.parse()?;
            let ui = StageProgressUi::new(&alert_id, 1, mode, args.verbose);
            let handle = engine.coordinator.trigger_stage(&alert_id, stage, context)?;
            let run = render_until(&ui, &mut events, handle.wait()).await?;
            print_run(mode, &run)?;
            if !run.is_succeeded() {
                bail!(
                    "Stage {} {}: {}",
                    stage,
                    run.state,
                    run.error_summary.as_deref().unwrap_or("no result")
                );
            }
        }
        None => {
            let total = one_click_stages(engine.coordinator.settings().orchestration.stage()).len();
            let ui = StageProgressUi::new(&alert_id, total, mode, args.verbose);
            let summary = render_until(
                &ui,
                &mut events,
                engine.coordinator.trigger_one_click(&alert_id, context),
            )
            .await?;
            ui.finish(&summary);
            if summary.failed > 0 {
                bail!("{} of {} stages failed", summary.failed, summary.total_stages);
            }
        }
    }
    Ok(())
}

/// Drive `work` to completion while rendering progress events.
async fn render_until<T, E>(
    ui: &StageProgressUi,
    events: &mut Subscription,
    work: impl std::future::Future<Output = Result<T, E>>,
) -> Result<T>
where
    E: Into<anyhow::Error>,
{
    tokio::pin!(work);
    let outcome = loop {
        tokio::select! {
            result = &mut work => break result.map_err(Into::into)?,
            Some(Ok(event)) = events.next() => ui.handle_event(&event),
        }
    };
    while let Ok(Some(Ok(event))) = tokio::time::timeout(DRAIN_WINDOW, events.next()).await {
        ui.handle_event(&event);
    }
    Ok(outcome)
}

fn print_run(mode: UiMode, run: &StageRun) -> Result<()> {
    match mode {
        UiMode::Json => println!("{}", serde_json::to_string(run)?),
        _ => {
            if let Some(result) = &run.result {
                println!("{}", serde_json::to_string_pretty(result)?);
            }
            if let Some(confidence) = run.confidence {
                println!("confidence: {}", confidence);
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write as _;
    use tempfile::NamedTempFile;

    #[test]
    fn test_load_alert_prefers_flag_then_id_field() {
        let mut file = NamedTempFile::new().unwrap();
        write!(file, r#"{{"id": "ALERT-9", "title": "x"}}"#).unwrap();

        let (id, alert) = load_alert(file.path(), None).unwrap();
        assert_eq!(id, "ALERT-9");
        assert_eq!(alert["title"], "x");

        let (id, _) = load_alert(file.path(), Some("A1")).unwrap();
        assert_eq!(id, "A1");
    }

    #[test]
    fn test_load_alert_falls_back_to_file_stem() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("vpn-bruteforce.json");
        std::fs::write(&path, r#"{"title": "x"}"#).unwrap();
        let (id, _) = load_alert(&path, None).unwrap();
        assert_eq!(id, "vpn-bruteforce");
    }

    #[test]
    fn test_load_alert_rejects_non_objects() {
        let mut file = NamedTempFile::new().unwrap();
        write!(file, "[1, 2]").unwrap();
        assert!(load_alert(file.path(), None).is_err());
    }
}
