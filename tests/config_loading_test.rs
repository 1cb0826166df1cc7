//! Config loading priority: defaults, then a config file layered on top,
//! mirroring the chain `main.rs` drives from its `--config` flag.

use sentinelfs_core::config::Config;

#[test]
fn default_config_has_sane_sentinelfs_fields() {
	let config = Config::default();
	assert_eq!(config.tcp_port, 8080);
	assert!(config.respect_ignore_files);
	assert!(config.session_code.is_empty());
	assert!(config.node_id.is_empty());
	assert_eq!(config.checkpoint_max_retries, 3);
	assert_eq!(config.max_versions_per_path, 10);
}

#[test]
fn partial_toml_fills_remaining_fields_from_default() {
	let partial = r#"
		sessionCode = "movie-night"
		tcpPort = 9090
	"#;
	let config: Config = toml::from_str(partial).expect("partial config should parse");
	assert_eq!(config.session_code, "movie-night");
	assert_eq!(config.tcp_port, 9090);
	// Everything else falls back to Config::default() via #[serde(default)].
	assert!(config.respect_ignore_files);
	assert_eq!(config.checkpoint_max_retries, 3);
}

#[test]
fn full_round_trip_through_toml_preserves_sentinelfs_fields() {
	let mut config = Config::default();
	config.session_code = "session-42".to_string();
	config.node_id = "node-xyz".to_string();
	config.max_upload_bytes_per_s = Some(1_048_576);
	config.bandwidth_allowed_hours = vec![9, 10, 11, 17, 18];

	let text = toml::to_string(&config).expect("config should serialize");
	let restored: Config = toml::from_str(&text).expect("config should round-trip");

	assert_eq!(restored.session_code, "session-42");
	assert_eq!(restored.node_id, "node-xyz");
	assert_eq!(restored.max_upload_bytes_per_s, Some(1_048_576));
	assert_eq!(restored.bandwidth_allowed_hours, vec![9, 10, 11, 17, 18]);
}
