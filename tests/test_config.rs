use std::time::Duration;

use miniwebd::config::{Config, DEFAULT_LISTEN_ADDR};

#[test]
fn test_config_listen_address_from_env() {
    // The variable is process-wide, so both cases live in one test.
    unsafe {
        std::env::remove_var("LISTEN");
    }
    assert_eq!(Config::load().server.listen_addr, DEFAULT_LISTEN_ADDR);

    unsafe {
        std::env::set_var("LISTEN", "0.0.0.0:3000");
    }
    assert_eq!(Config::load().server.listen_addr, "0.0.0.0:3000");
    unsafe {
        std::env::remove_var("LISTEN");
    }
}

#[test]
fn test_config_defaults() {
    let cfg = Config::default();
    assert_eq!(cfg.connection.max_header_length, 1024);
    assert_eq!(cfg.connection.max_headers_length, 4096);
    assert_eq!(cfg.connection.silent_limit(), Duration::from_secs(30));
    assert_eq!(cfg.websocket.ping_period(), Duration::from_secs(30));
    assert!(!cfg.websocket.allow_unmasked);
    assert_eq!(cfg.server.sweep_interval(), Duration::from_secs(1));
    assert!(cfg.server.server_name.starts_with("miniwebd/"));
    assert_eq!(cfg.upload.max_file_size, u64::MAX);
}

#[test]
fn test_config_empty_yaml_is_default() {
    let cfg = Config::from_yaml_str("  \n").unwrap();
    assert_eq!(cfg.server.listen_addr, DEFAULT_LISTEN_ADDR);
}

#[test]
fn test_config_partial_yaml() {
    let yaml = r#"
server:
  listen_addr: "127.0.0.1:9000"
connection:
  max_post_body_length: 1024
websocket:
  allow_unmasked: true
  ping_interval: 5
upload:
  temp_root: /var/tmp/uploads
"#;
    let cfg = Config::from_yaml_str(yaml).unwrap();

    assert_eq!(cfg.server.listen_addr, "127.0.0.1:9000");
    assert_eq!(cfg.connection.max_post_body_length, 1024);
    assert_eq!(cfg.connection.max_header_length, 1024);
    assert!(cfg.websocket.allow_unmasked);
    assert_eq!(cfg.websocket.ping_period(), Duration::from_secs(5));
    assert_eq!(cfg.upload.root(), std::path::PathBuf::from("/var/tmp/uploads"));
}

#[test]
fn test_config_invalid_yaml() {
    let err = Config::from_yaml_str("connection:\n  max_header_length: lots\n").unwrap_err();
    assert!(err.to_string().contains("invalid configuration"));
}

#[test]
fn test_config_from_missing_file() {
    let err = Config::from_file("/nonexistent/miniwebd.yaml").unwrap_err();
    assert!(err.to_string().contains("failed to read config file"));
}

#[test]
fn test_config_clone() {
    let cfg1 = Config::default();
    let cfg2 = cfg1.clone();
    assert_eq!(cfg1.server.listen_addr, cfg2.server.listen_addr);
}
