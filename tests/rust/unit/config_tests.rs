//! Engine configuration loading

#[cfg(test)]
mod engine_config_tests {
    use std::io::Write;

    use featurestore::config::{ConfigError, EngineConfig};
    use serial_test::serial;

    fn yaml_file(contents: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_yaml_overrides_and_defaults() {
        let file = yaml_file(
            "alias_prefix: T\nenvelope_property_name: extent\nfallback_bbox: [-180, -90, 180, 90]\n",
        );
        let config = EngineConfig::from_yaml_file(file.path()).unwrap();
        assert_eq!(config.alias_prefix, "T");
        assert_eq!(config.envelope_property_name, "extent");
        assert_eq!(config.default_max_features, 1000);

        let envelope = config.fallback_envelope();
        assert_eq!((envelope.min_x, envelope.max_y), (-180.0, 90.0));
        assert_eq!(envelope.srs.as_deref(), Some("EPSG:4326"));
    }

    #[test]
    fn test_invalid_yaml_values_fail_validation() {
        let file = yaml_file("alias_prefix: \"X-\"\n");
        assert!(matches!(
            EngineConfig::from_yaml_file(file.path()),
            Err(ConfigError::Validation(_))
        ));
    }

    #[test]
    #[serial]
    fn test_environment_configuration() {
        std::env::set_var("FEATURESTORE_MAX_FEATURES", "25");
        std::env::set_var("FEATURESTORE_ENVELOPE_PROPERTY", "bounds");
        let config = EngineConfig::from_env();
        std::env::remove_var("FEATURESTORE_MAX_FEATURES");
        std::env::remove_var("FEATURESTORE_ENVELOPE_PROPERTY");

        let config = config.unwrap();
        assert_eq!(config.default_max_features, 25);
        assert_eq!(config.envelope_property_name, "bounds");
    }
}
