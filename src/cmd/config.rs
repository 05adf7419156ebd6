//! Configuration view and validation commands, `alertflow config`.

use std::path::{Path, PathBuf};

use alertflow::config::{AlertflowConfig, AlertflowToml, CONFIG_FILE};
use alertflow_common::Stage;
use anyhow::Result;

use super::super::ConfigCommands;

pub fn cmd_config(config_path: Option<&Path>, command: Option<ConfigCommands>) -> Result<()> {
    match command {
        None | Some(ConfigCommands::Show) => show(config_path),
        Some(ConfigCommands::Validate) => validate(config_path),
        Some(ConfigCommands::Init) => init(config_path),
    }
}

fn show(config_path: Option<&Path>) -> Result<()> {
    let config = AlertflowConfig::load(config_path)?;
    let toml = &config.toml;

    println!();
    println!("Alertflow Configuration");
    println!("=======================");
    println!();
    match &config.source {
        Some(path) => println!("Config file: {}", path.display()),
        None => println!("No {} found, using defaults.", CONFIG_FILE),
    }
    println!();

    println!("[engine]");
    println!("  max_concurrency_per_org = {}", toml.engine.max_concurrency_per_org);
    println!("  claim_ttl_secs = {}", toml.engine.claim_ttl_secs);
    println!("  backlog_capacity = {}", toml.engine.backlog_capacity);
    println!("  timeline_timeout_ms = {}", toml.engine.timeline_timeout_ms);
    println!();

    println!("[retry]");
    println!("  max_attempts = {}", toml.retry.max_attempts);
    println!("  base_delay_ms = {}", toml.retry.base_delay_ms);
    println!("  max_delay_ms = {}", toml.retry.max_delay_ms);
    println!("  jitter_ratio = {}", toml.retry.jitter_ratio);
    println!();

    println!("[provider]");
    println!("  kind = \"{}\"", toml.provider.kind);
    if let Some(url) = &toml.provider.base_url {
        println!("  base_url = \"{}\"", url);
    }
    println!("  model = \"{}\"", toml.provider.model);
    println!();

    println!("[orchestration]");
    println!("  protocol = \"{}\"", toml.orchestration.protocol);
    println!("  max_iocs = {}", toml.orchestration.max_iocs);
    println!();

    println!("[server]");
    println!("  bind = \"{}\"", config.bind_addr());
    println!();

    println!("Effective stage settings:");
    for stage in Stage::ALL {
        let settings = config.stage_settings(stage);
        println!(
            "  {:<24} timeout = {}s, manual_minutes = {}",
            stage.to_string(),
            settings.timeout.as_secs(),
            settings.manual_minutes
        );
    }
    println!();
    Ok(())
}

fn validate(config_path: Option<&Path>) -> Result<()> {
    println!();
    println!("Validating configuration...");
    println!();

    let config = AlertflowConfig::load(config_path)?;
    if config.source.is_none() {
        println!("No {} found. Using defaults (valid).", CONFIG_FILE);
        return Ok(());
    }

    let warnings = config.validate();
    if warnings.is_empty() {
        println!("Configuration is valid.");
    } else {
        println!("Configuration warnings:");
        for warning in warnings {
            println!("  - {}", warning);
        }
    }
    println!();
    Ok(())
}

fn init(config_path: Option<&Path>) -> Result<()> {
    let path = config_path
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from(CONFIG_FILE));
    if path.exists() {
        println!("{} already exists at {}", CONFIG_FILE, path.display());
        println!("Delete it first if you want to recreate it.");
        return Ok(());
    }

    AlertflowToml::default().save(&path)?;

    println!("Created {}", path.display());
    println!();
    println!("You can now customize:");
    println!("  - [engine] concurrency, claim TTL and progress backlog");
    println!("  - [provider] kind = \"http\" with base_url and model");
    println!("  - [stages.<name>] timeout_secs and manual_minutes");
    println!();
    Ok(())
}
