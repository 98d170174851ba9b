#[cfg(test)]
mod tests {
    use cmap_config::ConfigLoader;
    use cmap_config::schema::*;
    use std::collections::HashMap;
    use std::io::Write;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key: &str| map.get(key).cloned()
    }

    // ── Default tests ──────────────────────────────────────────

    #[test]
    fn test_routing_config_defaults() {
        let config = RoutingConfig::default();
        assert_eq!(config.inbox_capacity, 100);
        assert_eq!(config.outbound_capacity, 1000);
        assert_eq!(config.remote_queue_capacity, 1000);
        assert_eq!(config.remote_port, 10000);
    }

    #[test]
    fn test_service_defaults() {
        let config = AgencyConfig::default();
        assert_eq!(config.directory.url, "http://ams:9000");
        assert_eq!(config.logger.url, "http://logger:11000");
        assert!(!config.logger.enabled);
        assert_eq!(config.server.listen, "0.0.0.0:10000");
        assert_eq!(config.logging.level, "error");
        assert!(config.agency.hostname.is_none());
        assert_eq!(config.agency.isolation, "process");
        assert_eq!(config.df.url, "http://df:12000");
        assert!(!config.df.enabled);
    }

    #[test]
    fn test_defaults_validate_cleanly() {
        let warnings = AgencyConfig::default().validate().unwrap();
        assert!(warnings.is_empty());
    }

    // ── TOML tests ─────────────────────────────────────────────

    #[test]
    fn test_config_toml_roundtrip() {
        let config = AgencyConfig::default();
        let toml_str = toml::to_string_pretty(&config).unwrap();
        let restored = ConfigLoader::parse(&toml_str).unwrap();
        assert_eq!(restored.server.listen, config.server.listen);
        assert_eq!(restored.routing.inbox_capacity, config.routing.inbox_capacity);
    }

    #[test]
    fn test_partial_toml_applies_defaults() {
        let toml_str = r#"
[agency]
hostname = "mas-3-im-1-agency-4"
startup_delay_ms = 250

[routing]
inbox_capacity = 16
"#;
        let config = ConfigLoader::parse(toml_str).unwrap();
        assert_eq!(config.agency.hostname.as_deref(), Some("mas-3-im-1-agency-4"));
        assert_eq!(config.agency.startup_delay_ms, 250);
        assert_eq!(config.routing.inbox_capacity, 16);
        assert_eq!(config.routing.remote_port, 10000);
        assert_eq!(config.directory.timeout_secs, 5);
    }

    #[test]
    fn test_invalid_toml_is_rejected() {
        assert!(ConfigLoader::parse("[routing\ninbox_capacity = ").is_err());
    }

    // ── Validation tests ───────────────────────────────────────

    #[test]
    fn test_zero_capacity_is_error() {
        let mut config = AgencyConfig::default();
        config.routing.inbox_capacity = 0;
        let err = config.validate().unwrap_err();
        assert!(err.contains("routing.inbox_capacity"));
    }

    #[test]
    fn test_non_http_url_is_error() {
        let mut config = AgencyConfig::default();
        config.directory.url = "ams:9000".into();
        let err = config.validate().unwrap_err();
        assert!(err.contains("directory.url"));
    }

    #[test]
    fn test_unknown_isolation_is_error() {
        let mut config = AgencyConfig::default();
        config.agency.isolation = "fork".into();
        let err = config.validate().unwrap_err();
        assert!(err.contains("agency.isolation"));

        config.agency.isolation = "thread".into();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_unknown_log_level_is_warning() {
        let mut config = AgencyConfig::default();
        config.logging.level = "chatty".into();
        let warnings = config.validate().unwrap();
        assert_eq!(warnings.len(), 1);
        assert_eq!(warnings[0].severity, WarningSeverity::Warning);
        assert!(warnings[0].to_string().contains("logging.level"));
    }

    // ── Environment overrides ──────────────────────────────────

    #[test]
    fn test_clonemap_log_level_switch() {
        let config =
            ConfigLoader::apply_env_overrides(AgencyConfig::default(), env(&[("CLONEMAP_LOG_LEVEL", "info")]));
        assert_eq!(config.logging.level, "info");

        let mut start = AgencyConfig::default();
        start.logging.level = "debug".into();
        let config = ConfigLoader::apply_env_overrides(start, env(&[("CLONEMAP_LOG_LEVEL", "verbose")]));
        assert_eq!(config.logging.level, "error");
    }

    #[test]
    fn test_clonemap_logging_switch() {
        let on = ConfigLoader::apply_env_overrides(AgencyConfig::default(), env(&[("CLONEMAP_LOGGING", "ON")]));
        assert!(on.logger.enabled);

        let mut start = AgencyConfig::default();
        start.logger.enabled = true;
        let off = ConfigLoader::apply_env_overrides(start, env(&[("CLONEMAP_LOGGING", "OFF")]));
        assert!(!off.logger.enabled);
    }

    #[test]
    fn test_service_url_overrides() {
        let config = ConfigLoader::apply_env_overrides(
            AgencyConfig::default(),
            env(&[
                ("CMAP_DIRECTORY_URL", "http://dir:1"),
                ("CMAP_LOGGER_URL", "http://log:2"),
                ("CMAP_SERVER_LISTEN", "127.0.0.1:9999"),
                ("CMAP_HOSTNAME", "mas-0-im-0-agency-0"),
                ("CMAP_DF_URL", "http://df:3"),
                ("CMAP_AGENT_ISOLATION", "thread"),
                ("CMAP_DEFAULT_BEHAVIOR", "echo"),
            ]),
        );
        assert_eq!(config.agency.default_behavior, "echo");
        assert_eq!(config.df.url, "http://df:3");
        assert_eq!(config.agency.isolation, "thread");
        assert_eq!(config.directory.url, "http://dir:1");
        assert_eq!(config.logger.url, "http://log:2");
        assert_eq!(config.server.listen, "127.0.0.1:9999");
        assert_eq!(config.agency.hostname.as_deref(), Some("mas-0-im-0-agency-0"));
    }

    // ── Loader tests ───────────────────────────────────────────

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[server]\nlisten = \"127.0.0.1:10001\"").unwrap();
        let loader = ConfigLoader::load(Some(file.path())).unwrap();
        assert_eq!(loader.path(), file.path());
        assert_eq!(loader.get().server.listen, "127.0.0.1:10001");
    }

    #[test]
    fn test_load_missing_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("absent.toml");
        let loader = ConfigLoader::load(Some(&path)).unwrap();
        assert_eq!(loader.get().routing.inbox_capacity, 100);
    }

    #[test]
    fn test_load_rejects_invalid_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[routing]\noutbound_capacity = 0").unwrap();
        assert!(ConfigLoader::load(Some(file.path())).is_err());
    }
}
