// ABOUTME: Config scaffolding for new installs.
// ABOUTME: Creates a flotilla.yml template.

use std::path::Path;

use crate::error::{Error, Result};
use crate::types::{AppName, ImageRef};

use super::CONFIG_FILENAME;

pub fn init_config(dir: &Path, name: Option<&str>, image: Option<&str>, force: bool) -> Result<()> {
    let config_path = dir.join(CONFIG_FILENAME);

    if config_path.exists() && !force {
        return Err(Error::AlreadyExists(config_path));
    }

    let name = AppName::new(name.unwrap_or("web"))
        .map_err(|e| Error::InvalidConfig(e.to_string()))?;
    let image = ImageRef::parse(image.unwrap_or("nginx:latest"))
        .map_err(|e| Error::InvalidConfig(e.to_string()))?;

    std::fs::write(&config_path, template_yaml(&name, &image))?;
    tracing::info!(path = %config_path.display(), "wrote configuration template");
    Ok(())
}

fn template_yaml(name: &AppName, image: &ImageRef) -> String {
    format!(
        r#"logs_dir: /var/lib/flotilla/logs
mode: self-hosted
queue:
  concurrency: 3
  job_timeout: 30m
servers:
  edge-1: deploy@server.example.com:22
  # edge-2:
  #   host: 10.0.0.6
  #   user: deploy
  #   orchestrator:
  #     cluster: kubernetes
  #     kubernetes:
  #       kubeconfig: /etc/flotilla/kubeconfig
applications:
  - name: {}
    image: {}
    server: edge-1
    replicas: 1
    port: 80
    preview:
      enabled: false
      limit: 3
      wildcard_domain: "*.traefik.me"
"#,
        name, image
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;

    #[test]
    fn template_parses_back() {
        let yaml = template_yaml(
            &AppName::new("api").unwrap(),
            &ImageRef::parse("ghcr.io/acme/api:1.0").unwrap(),
        );
        let config = Config::from_yaml(&yaml).unwrap();
        assert_eq!(config.applications.first().name.as_str(), "api");
        assert!(config.servers.contains_key("edge-1"));
    }
}
