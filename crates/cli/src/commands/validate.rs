//! `validate` command implementation.

use anyhow::{Context, Result};
use contracts::{DeliveryTarget, ProxyBlueprint};
use serde::Serialize;
use tracing::info;

use crate::cli::ValidateArgs;

/// Validation result for JSON output
#[derive(Serialize)]
struct ValidationResult {
    valid: bool,
    config_path: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    warnings: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    summary: Option<ConfigSummary>,
}

#[derive(Serialize)]
struct ConfigSummary {
    bus_group: String,
    service: String,
    rtp_listen: String,
    codec: String,
    drop_policy: String,
}

/// Execute the `validate` command
pub fn run_validate(args: &ValidateArgs) -> Result<()> {
    info!(config = %args.config.display(), "Validating configuration");

    let result = validate_config(args);

    if args.json {
        let json = serde_json::to_string_pretty(&result)
            .context("Failed to serialize validation result")?;
        println!("{}", json);
    } else {
        print_validation_result(&result);
    }

    if result.valid {
        Ok(())
    } else {
        anyhow::bail!("Configuration validation failed")
    }
}

fn validate_config(args: &ValidateArgs) -> ValidationResult {
    let config_path = args.config.display().to_string();

    if !args.config.exists() {
        return ValidationResult {
            valid: false,
            config_path,
            error: Some(format!("File not found: {}", args.config.display())),
            warnings: None,
            summary: None,
        };
    }

    match config_loader::ConfigLoader::load_from_path(&args.config) {
        Ok(blueprint) => {
            let warnings = collect_warnings(&blueprint);
            ValidationResult {
                valid: true,
                config_path,
                error: None,
                warnings: (!warnings.is_empty()).then_some(warnings),
                summary: Some(ConfigSummary {
                    bus_group: blueprint.bus.multicast_group.to_string(),
                    service: blueprint.bus.service.clone(),
                    rtp_listen: blueprint.rtp.listen.to_string(),
                    codec: blueprint.session.codec.clone(),
                    drop_policy: format!("{:?}", blueprint.sinks.drop_policy),
                }),
            }
        }
        Err(e) => ValidationResult {
            valid: false,
            config_path,
            error: Some(e.to_string()),
            warnings: None,
            summary: None,
        },
    }
}

/// Collect configuration warnings (non-fatal issues)
fn collect_warnings(blueprint: &ProxyBlueprint) -> Vec<String> {
    let mut warnings = Vec::new();

    if blueprint.bus.interface.is_unspecified() {
        warnings.push(
            "bus.interface is 0.0.0.0 - the OS picks the interface that joins the group"
                .to_string(),
        );
    }

    if blueprint.bus.delivery_target == DeliveryTarget::SelfReported {
        warnings.push(
            "bus.delivery_target = self_reported trusts the host peers announce".to_string(),
        );
    }

    if blueprint.bus.peer_ttl_ms < blueprint.bus.announce_interval_ms * 2 {
        warnings.push(
            "bus.peer_ttl_ms is less than two announce intervals - one lost announcement evicts a peer"
                .to_string(),
        );
    }

    if blueprint.sinks.max_consecutive_drops == 0 {
        warnings.push("sinks.max_consecutive_drops = 0 - slow sessions are never disconnected".to_string());
    }

    warnings
}

fn print_validation_result(result: &ValidationResult) {
    if result.valid {
        println!("✓ Configuration is valid: {}", result.config_path);

        if let Some(ref summary) = result.summary {
            println!("\n  Bus group: {}", summary.bus_group);
            println!("  Service: {}", summary.service);
            println!("  RTP listen: {}", summary.rtp_listen);
            println!("  Codec: {}", summary.codec);
            println!("  Drop policy: {}", summary.drop_policy);
        }

        if let Some(ref warnings) = result.warnings {
            println!("\n⚠ Warnings:");
            for warning in warnings {
                println!("  - {}", warning);
            }
        }
    } else {
        println!("✗ Configuration is invalid: {}", result.config_path);
        if let Some(ref error) = result.error {
            println!("\n  Error: {}", error);
        }
    }
}
