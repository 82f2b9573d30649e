// ABOUTME: Integration tests for type-safe identifiers and validated types.
// ABOUTME: Image references, RFC 1123 app names, preview names, and phantom-typed ids.

use flotilla::types::*;
use proptest::prelude::*;

mod image_ref_tests {
    use super::*;

    #[test]
    fn parse_simple_name() {
        let img = ImageRef::parse("nginx").unwrap();
        assert_eq!(img.name(), "nginx");
        assert_eq!(img.tag(), Some("latest"));
        assert!(img.registry().is_none());
        assert!(img.digest().is_none());
    }

    #[test]
    fn parse_name_with_tag() {
        let img = ImageRef::parse("nginx:1.25").unwrap();
        assert_eq!(img.name(), "nginx");
        assert_eq!(img.tag(), Some("1.25"));
    }

    #[test]
    fn parse_with_registry() {
        let img = ImageRef::parse("registry.example.com/myapp:v1.2.3").unwrap();
        assert_eq!(img.registry(), Some("registry.example.com"));
        assert_eq!(img.name(), "myapp");
        assert_eq!(img.tag(), Some("v1.2.3"));
    }

    #[test]
    fn parse_with_org() {
        let img = ImageRef::parse("ghcr.io/org/repo:latest").unwrap();
        assert_eq!(img.registry(), Some("ghcr.io"));
        assert_eq!(img.name(), "org/repo");
        assert_eq!(img.tag(), Some("latest"));
    }

    #[test]
    fn parse_with_digest() {
        let digest = "sha256:abc123def456";
        let img = ImageRef::parse(&format!("nginx@{}", digest)).unwrap();
        assert_eq!(img.name(), "nginx");
        assert_eq!(img.digest(), Some(digest));
        assert!(img.tag().is_none());
    }

    #[test]
    fn parse_full_reference() {
        let img = ImageRef::parse("ghcr.io/org/repo:v1@sha256:abc123").unwrap();
        assert_eq!(img.registry(), Some("ghcr.io"));
        assert_eq!(img.name(), "org/repo");
        assert_eq!(img.tag(), Some("v1"));
        assert_eq!(img.digest(), Some("sha256:abc123"));
    }

    #[test]
    fn parse_empty_returns_error() {
        assert!(ImageRef::parse("").is_err());
    }

    #[test]
    fn parse_invalid_chars_returns_error() {
        assert!(ImageRef::parse("invalid image!").is_err());
    }

    #[test]
    fn display_formats_correctly() {
        let img = ImageRef::parse("ghcr.io/org/repo:v1").unwrap();
        assert_eq!(img.to_string(), "ghcr.io/org/repo:v1");
    }
}

mod app_name_tests {
    use super::*;

    #[test]
    fn valid_dns_name() {
        let name = AppName::new("shop-api-2").unwrap();
        assert_eq!(name.as_str(), "shop-api-2");
    }

    #[test]
    fn empty_returns_error() {
        assert!(matches!(AppName::new(""), Err(AppNameError::Empty)));
    }

    #[test]
    fn too_long_returns_error() {
        assert!(matches!(
            AppName::new(&"a".repeat(64)),
            Err(AppNameError::TooLong)
        ));
        assert!(AppName::new(&"a".repeat(63)).is_ok());
    }

    #[test]
    fn hyphen_edges_return_error() {
        assert!(matches!(
            AppName::new("-api"),
            Err(AppNameError::StartsWithHyphen)
        ));
        assert!(matches!(
            AppName::new("api-"),
            Err(AppNameError::EndsWithHyphen)
        ));
    }

    #[test]
    fn uppercase_and_symbols_return_error() {
        assert!(matches!(AppName::new("Api"), Err(AppNameError::NotLowercase)));
        assert!(matches!(
            AppName::new("api_v2"),
            Err(AppNameError::InvalidChar('_'))
        ));
    }

    #[test]
    fn preview_names_differ_per_call() {
        let base = AppName::new("api").unwrap();
        let a = base.preview();
        let b = base.preview();
        assert!(a.as_str().starts_with("preview-api-"));
        assert_eq!(a.as_str().len(), "preview-api-".len() + 6);
        assert_ne!(a, b);
    }

    proptest! {
        #[test]
        fn preview_names_stay_valid(base in "[a-z][a-z0-9-]{0,61}[a-z0-9]") {
            let preview = AppName::new(&base).unwrap().preview();
            prop_assert!(preview.as_str().len() <= 63);
            prop_assert!(preview.as_str().starts_with("preview-"));
            prop_assert!(AppName::new(preview.as_str()).is_ok());
        }
    }
}

mod id_tests {
    use super::*;

    #[test]
    fn ids_store_their_value() {
        let id = ApplicationId::new("api");
        assert_eq!(id.as_str(), "api");
        assert_eq!(id.to_string(), "api");
        assert_eq!(ServerId::from("edge-1").into_inner(), "edge-1");
    }

    #[test]
    fn generated_ids_differ() {
        assert_ne!(RollbackId::generate(), RollbackId::generate());
        assert_ne!(JobId::generate(), JobId::generate());
    }
}
