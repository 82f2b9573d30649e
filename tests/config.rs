// ABOUTME: Integration tests for configuration parsing and validation.
// ABOUTME: Tests YAML parsing, server shorthand, env var interpolation, discovery, and seeding.

use flotilla::config::*;
use flotilla::control::ControlPlane;
use flotilla::deploy::DispatchMode;
use flotilla::error::Error;
use flotilla::orchestrator::ClusterSelection;
use flotilla::store::TargetStore;
use flotilla::types::{ApplicationId, ServerId};
use std::collections::BTreeMap;
use std::time::Duration;

const FULL: &str = r#"
logs_dir: /srv/flotilla/logs
mode: hosted
organization: acme
local_ip: 192.0.2.10
queue:
  concurrency: 5
  job_timeout: 10m
servers:
  edge-1: deploy@203.0.113.7:2222
  edge-2:
    host: 10.0.0.6
    ip: 198.51.100.6
    orchestrator:
      cluster: kubernetes
      kubernetes:
        api_endpoint: https://10.0.0.6:6443
applications:
  - name: api
    image: registry.example.com/api:v4
    server: edge-1
    replicas: 3
    port: 8080
    repository: shop
    owner: acme
    branch: main
    env:
      RUST_LOG: info
    preview:
      enabled: true
      limit: 2
      labels: [preview]
      wildcard_domain: "*.preview.example.com"
  - name: web
    image: nginx:1.27
compose:
  - name: metrics
    server: edge-2
    command: docker stack deploy -c metrics.yml metrics
"#;

mod parsing {
    use super::*;

    #[test]
    fn parse_full_config() {
        let config = Config::from_yaml(FULL).unwrap();
        assert_eq!(config.mode, DispatchMode::Hosted);
        assert_eq!(config.organization, "acme");
        assert_eq!(config.queue.concurrency, 5);
        assert_eq!(config.queue.job_timeout, Duration::from_secs(600));
        assert_eq!(config.applications.len(), 2);
        assert_eq!(config.compose.len(), 1);

        let api = config.application("api").unwrap();
        assert_eq!(api.replicas, 3);
        assert_eq!(api.server.as_deref(), Some("edge-1"));
        assert!(api.preview.enabled);
        assert_eq!(api.preview.limit, 2);
        assert_eq!(api.preview.wildcard(), "*.preview.example.com");

        let web = config.application("web").unwrap();
        assert_eq!(web.replicas, 1);
        assert!(!web.preview.enabled);
        assert_eq!(web.preview.wildcard(), "*.traefik.me");
    }

    #[test]
    fn servers_accept_shorthand_and_mappings() {
        let config = Config::from_yaml(FULL).unwrap();

        let edge1 = &config.servers["edge-1"];
        assert_eq!(edge1.host, "203.0.113.7");
        assert_eq!(edge1.port, 2222);
        assert_eq!(edge1.user.as_deref(), Some("deploy"));
        assert_eq!(edge1.orchestrator.cluster, ClusterSelection::Auto);

        let edge2 = config.servers["edge-2"].to_server("edge-2");
        assert_eq!(edge2.ip, "198.51.100.6");
        assert_eq!(edge2.ssh.user, "root");
        assert_eq!(edge2.orchestrator.cluster, ClusterSelection::Kubernetes);
        assert!(edge2.orchestrator.has_kubernetes_connection());
    }

    #[test]
    fn invalid_image_returns_error() {
        let yaml = r#"
applications:
  - name: api
    image: "invalid image!"
"#;
        assert!(Config::from_yaml(yaml).is_err());
    }

    #[test]
    fn invalid_app_name_returns_error() {
        let yaml = r#"
applications:
  - name: Api_Server
    image: nginx
"#;
        assert!(Config::from_yaml(yaml).is_err());
    }

    #[test]
    fn duplicate_names_return_error() {
        let yaml = r#"
applications:
  - name: api
    image: nginx
compose:
  - name: api
    command: docker stack deploy -c api.yml api
"#;
        let err = Config::from_yaml(yaml).unwrap_err();
        assert!(matches!(err, Error::InvalidConfig(ref m) if m.contains("duplicate")));
    }

    #[test]
    fn zero_concurrency_returns_error() {
        let yaml = r#"
queue:
  concurrency: 0
applications:
  - name: api
    image: nginx
"#;
        assert!(matches!(
            Config::from_yaml(yaml),
            Err(Error::InvalidConfig(_))
        ));
    }

    #[test]
    fn missing_applications_returns_error() {
        assert!(Config::from_yaml("mode: hosted\n").is_err());
    }
}

mod env_vars {
    use super::*;

    #[test]
    fn env_reference_with_default() {
        let yaml = r#"
applications:
  - name: api
    image: nginx
    env:
      OPTIONAL:
        env: FLOTILLA_OPTIONAL_VAR
        default: "fallback"
"#;
        let config = Config::from_yaml(yaml).unwrap();
        assert_eq!(
            config.applications.head.env.get("OPTIONAL"),
            Some(&EnvValue::Host {
                env: "FLOTILLA_OPTIONAL_VAR".into(),
                default: Some("fallback".into()),
            })
        );
    }

    #[test]
    fn resolve_env_values() {
        let mut env_map = BTreeMap::new();
        env_map.insert("KEY".to_string(), EnvValue::Plain("literal".to_string()));
        env_map.insert(
            "FROM_ENV".to_string(),
            EnvValue::Host {
                env: "FLOTILLA_TEST_VAR".to_string(),
                default: None,
            },
        );
        env_map.insert(
            "WITH_DEFAULT".to_string(),
            EnvValue::Host {
                env: "FLOTILLA_MISSING_VAR".to_string(),
                default: Some("default_value".to_string()),
            },
        );

        temp_env::with_var("FLOTILLA_TEST_VAR", Some("from_environment"), || {
            let resolved = EnvValue::resolve_all(&env_map).unwrap();

            assert_eq!(resolved.get("KEY"), Some(&"literal".to_string()));
            assert_eq!(
                resolved.get("FROM_ENV"),
                Some(&"from_environment".to_string())
            );
            assert_eq!(
                resolved.get("WITH_DEFAULT"),
                Some(&"default_value".to_string())
            );
        });
    }

    #[test]
    fn missing_variable_fails_seeding() {
        let yaml = r#"
applications:
  - name: api
    image: nginx
    env:
      SECRET:
        env: FLOTILLA_UNSET_SECRET
"#;
        let config = Config::from_yaml(yaml).unwrap();
        temp_env::with_var_unset("FLOTILLA_UNSET_SECRET", || {
            let store = flotilla::store::MemoryStore::new();
            let err = config.seed(&store).unwrap_err();
            assert!(matches!(err, Error::MissingEnvVar(ref v) if v == "FLOTILLA_UNSET_SECRET"));
        });
    }
}

mod discovery {
    use super::*;

    const MINIMAL: &str = "applications:\n  - name: web\n    image: nginx\n";

    #[test]
    fn finds_alternate_file_names() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join(".flotilla")).unwrap();
        std::fs::write(dir.path().join(CONFIG_FILENAME_DIR), MINIMAL).unwrap();

        let config = Config::discover(dir.path()).unwrap();
        assert!(config.application("web").is_some());
    }

    #[test]
    fn primary_file_wins() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(CONFIG_FILENAME), MINIMAL).unwrap();
        std::fs::write(
            dir.path().join(CONFIG_FILENAME_ALT),
            "applications:\n  - name: other\n    image: nginx\n",
        )
        .unwrap();

        let config = Config::discover(dir.path()).unwrap();
        assert!(config.application("web").is_some());
        assert!(config.application("other").is_none());
    }

    #[test]
    fn missing_file_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            Config::discover(dir.path()),
            Err(Error::ConfigNotFound(_))
        ));
    }

    #[test]
    fn init_template_parses() {
        let dir = tempfile::tempdir().unwrap();
        init_config(dir.path(), Some("shop"), Some("ghcr.io/acme/shop:v2"), false).unwrap();

        let config = Config::discover(dir.path()).unwrap();
        let shop = config.application("shop").unwrap();
        assert_eq!(shop.image.to_string(), "ghcr.io/acme/shop:v2");

        let err = init_config(dir.path(), None, None, false).unwrap_err();
        assert!(matches!(err, Error::AlreadyExists(_)));
        init_config(dir.path(), None, None, true).unwrap();
        assert!(Config::discover(dir.path()).unwrap().application("web").is_some());
    }
}

mod seeding {
    use super::*;

    #[tokio::test]
    async fn control_plane_loads_every_target() {
        let config = Config::from_yaml(FULL).unwrap();
        let control = ControlPlane::from_config(&config).unwrap();

        let api = control
            .stores()
            .targets
            .get_application(&ApplicationId::new("api"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(api.organization_id.as_str(), "acme");
        assert_eq!(api.server_id, Some(ServerId::new("edge-1")));
        assert_eq!(api.env["RUST_LOG"], "info");

        let servers = control.stores().targets.list_servers().await.unwrap();
        assert_eq!(servers.len(), 2);
        assert_eq!(control.queue_status().waiting(), 0);
        control.shutdown().await;
    }
}
