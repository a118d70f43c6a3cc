use claims::{assert_err, assert_matches};
use stackshift::cli::GlobalArgs;
use stackshift::config::{ConfigError, load_config};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;
use tempfile::TempDir;

/// `load_config` reads the process environment, so tests that load a config
/// hold this lock.
static ENV_LOCK: Mutex<()> = Mutex::new(());

fn env_lock() -> MutexGuard<'static, ()> {
    ENV_LOCK.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Environment variable set for as long as the guard lives.
struct ScopedVar {
    name: &'static str,
    _lock: MutexGuard<'static, ()>,
}

impl ScopedVar {
    fn set(name: &'static str, value: &str) -> Self {
        let lock = env_lock();
        unsafe {
            std::env::set_var(name, value);
        }
        Self { name, _lock: lock }
    }
}

impl Drop for ScopedVar {
    fn drop(&mut self) {
        unsafe {
            std::env::remove_var(self.name);
        }
    }
}

fn write_config(dir: &TempDir, contents: &str) -> std::path::PathBuf {
    let path = dir.path().join("stackshift.toml");
    std::fs::write(&path, contents).unwrap();
    path
}

#[test]
fn test_file_values_are_read() {
    let _env = env_lock();
    let dir = TempDir::new().unwrap();
    let path = write_config(
        &dir,
        r#"
[stack]
base_url = "https://eu-api.contentstack.com"
branch = "develop"

[bulk]
batch_size = 5
concurrency = 3
page_size = 50
min_batch_ms = 250
consumer = "single"

[limits]
requests_per_second = 5

[logging]
level = "debug"
"#,
    );

    let config = load_config(Some(&path)).unwrap();

    assert!(config.validate().is_ok());
    assert_eq!(config.stack().base_url(), "https://eu-api.contentstack.com");
    assert_eq!(config.stack().branch(), Some("develop"));
    assert_eq!(config.bulk().batch_size(), 5);
    assert_eq!(config.bulk().concurrency(), 3);
    assert_eq!(config.bulk().page_size(), 50);
    assert_eq!(config.bulk().min_batch_duration(), Duration::from_millis(250));
    assert_eq!(config.bulk().consumer(), "single");
    assert_eq!(config.limits().requests_per_second, 5);
    assert_eq!(config.logging().level(), "debug");
}

#[test]
fn test_environment_overrides_file() {
    let dir = TempDir::new().unwrap();
    let path = write_config(&dir, "[http]\ntimeout_secs = 20\n");
    let _retries = ScopedVar::set("STACKSHIFT__HTTP__MAX_RETRIES", "7");

    let config = load_config(Some(&path)).unwrap();

    assert_eq!(config.http().timeout(), Duration::from_secs(20));
    assert_eq!(config.http().retry_policy().max_retries, 7);
}

#[test]
fn test_explicit_file_must_exist() {
    let _env = env_lock();
    let dir = TempDir::new().unwrap();
    let result = load_config(Some(&dir.path().join("absent.toml")));
    assert_matches!(result, Err(ConfigError::Load(_)));
}

#[test]
fn test_flags_are_validated_after_override() {
    let _env = env_lock();
    let dir = TempDir::new().unwrap();
    let path = write_config(&dir, "[bulk]\npage_size = 100\n");
    let mut config = load_config(Some(&path)).unwrap();

    config.apply_overrides(&GlobalArgs {
        page_size: Some(1000),
        ..Default::default()
    });

    let errors = assert_err!(config.validate());
    assert_eq!(errors.len(), 1);
    assert!(ConfigError::Invalid(errors).to_string().contains("Page size out of range"));
}
