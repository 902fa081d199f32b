//! Configuration loading with CLI overrides.

use anyhow::{Context, Result};
use contracts::ProxyBlueprint;
use tracing::info;

use crate::cli::BusOverrides;

/// Load the blueprint (or defaults), then apply bus overrides and re-validate.
pub fn load_blueprint(overrides: &BusOverrides) -> Result<ProxyBlueprint> {
    let mut blueprint = match &overrides.config {
        Some(path) => {
            if !path.exists() {
                anyhow::bail!("Configuration file not found: {}", path.display());
            }
            info!(config = %path.display(), "Loading configuration");
            config_loader::ConfigLoader::load_from_path(path)
                .with_context(|| format!("Failed to load config from {}", path.display()))?
        }
        None => {
            info!("No configuration file given, using defaults");
            ProxyBlueprint::default()
        }
    };

    if let Some(group) = overrides.bus_group {
        info!(group = %group, "Overriding bus group from CLI");
        blueprint.bus.multicast_group = group;
    }
    if let Some(interface) = overrides.interface {
        info!(interface = %interface, "Overriding bus interface from CLI");
        blueprint.bus.interface = interface;
    }
    if let Some(ref service) = overrides.service {
        info!(service = %service, "Overriding service name from CLI");
        blueprint.bus.service = service.clone();
    }

    Ok(blueprint)
}

/// Validate after every override has been applied
pub fn finish(blueprint: ProxyBlueprint) -> Result<ProxyBlueprint> {
    config_loader::validate(&blueprint).context("Configuration invalid after CLI overrides")?;
    Ok(blueprint)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults_without_config() {
        let bp = finish(load_blueprint(&BusOverrides::default()).unwrap()).unwrap();
        assert_eq!(bp.bus.service, "webrtc-proxy");
    }

    #[test]
    fn test_overrides_apply_over_file() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(file, "[bus]\nservice = \"from-file\"").unwrap();

        let overrides = BusOverrides {
            config: Some(file.path().to_path_buf()),
            service: Some("from-cli".into()),
            bus_group: Some("239.9.9.9:9000".parse().unwrap()),
            ..Default::default()
        };
        let bp = finish(load_blueprint(&overrides).unwrap()).unwrap();
        assert_eq!(bp.bus.service, "from-cli");
        assert_eq!(bp.bus.multicast_group.port(), 9000);
    }

    #[test]
    fn test_invalid_override_rejected() {
        let overrides = BusOverrides {
            bus_group: Some("10.0.0.1:9000".parse().unwrap()),
            ..Default::default()
        };
        assert!(finish(load_blueprint(&overrides).unwrap()).is_err());
    }

    #[test]
    fn test_missing_file() {
        let overrides = BusOverrides {
            config: Some("/nonexistent/proxy.toml".into()),
            ..Default::default()
        };
        assert!(load_blueprint(&overrides).is_err());
    }
}
