//! mqtt-exporter - Prometheus exporter for MQTT messages
//!
//! This binary subscribes to MQTT topics and provides a
//! Prometheus-compatible metrics endpoint.

use anyhow::Result;
use clap::Parser;
use tracing::info;

use mqtt_exporter::cli::{Cli, OutputFormat};
use mqtt_exporter::config::Config;
use mqtt_exporter::server;
use mqtt_exporter::transformer::RuleSummary;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    mqtt_exporter::init_logging(&cli.log_level.to_string())?;

    let mut config = Config::load(&cli.config)?;
    cli.apply_overrides(&mut config);
    // Overrides may have invalidated a value that passed on load
    config.validate()?;

    if cli.validate {
        let engine = server::build_engine(&config)?;
        print_validation(&config, engine.rules().rule_count(), cli.output_format)?;
        return Ok(());
    }

    if cli.dry_run {
        let engine = server::build_engine(&config)?;
        print_rules(&engine.rules().describe(), cli.output_format)?;
        return Ok(());
    }

    info!(
        version = env!("CARGO_PKG_VERSION"),
        config = %cli.config.display(),
        "Starting mqtt-exporter"
    );

    server::run(config).await
}

fn print_validation(config: &Config, rules: usize, format: OutputFormat) -> Result<()> {
    let report = serde_json::json!({
        "valid": true,
        "broker": config.mqtt.broker,
        "topics": config.topics.len(),
        "rules": rules,
    });

    match format {
        OutputFormat::Text => {
            println!("Configuration is valid");
            println!("  broker: {}", config.mqtt.broker);
            println!("  topics: {}", config.topics.len());
            println!("  rules:  {}", rules);
        }
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&report)?),
        OutputFormat::Yaml => print!("{}", serde_yaml::to_string(&report)?),
    }

    Ok(())
}

fn print_rules(rules: &[RuleSummary], format: OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Text => {
            for rule in rules {
                println!("{} -> {}", rule.topic, rule.metric);
                if let Some(pattern) = &rule.pattern {
                    println!("  match: {}", pattern);
                }
                println!(
                    "  value: {}",
                    rule.value.as_deref().unwrap_or("<numeric payload>")
                );
                for (name, template) in &rule.labels {
                    println!("  label {}: {}", name, template);
                }
            }
            println!("{} rule(s)", rules.len());
        }
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(rules)?),
        OutputFormat::Yaml => print!("{}", serde_yaml::to_string(rules)?),
    }

    Ok(())
}
