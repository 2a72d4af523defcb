use std::path::PathBuf;

use jobspool::config::Config;
use jobspool::{Disposition, QueueConfig};

#[test]
fn config_from_env_applies_directory_override() {
    unsafe {
        std::env::set_var("JOBSPOOL_DIR", "/tmp/jobspool-env-test");
        std::env::remove_var("JOBSPOOL_CONFIG");
    }

    let config = Config::from_env().unwrap();
    assert!(!config.log_level.is_empty());
    assert_eq!(
        config.queue(None).unwrap().directory,
        PathBuf::from("/tmp/jobspool-env-test")
    );
    assert_eq!(
        config
            .queue(Some(PathBuf::from("/tmp/cli-wins")))
            .unwrap()
            .directory,
        PathBuf::from("/tmp/cli-wins")
    );

    // Clean up
    unsafe {
        std::env::remove_var("JOBSPOOL_DIR");
    }
}

#[test]
fn queue_config_loads_from_toml_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("queue.toml");
    std::fs::write(
        &path,
        r#"
        directory = "/srv/jobs"
        concurrency = 8
        retry_failed_jobs = true
        max_job_failures = 5
        on_success = "destroy"
        prettify_json = true
        "#,
    )
    .unwrap();

    let config = QueueConfig::from_toml_file(&path).unwrap();
    assert_eq!(config.directory, PathBuf::from("/srv/jobs"));
    assert_eq!(config.concurrency, 8);
    assert!(config.retry_failed_jobs);
    assert_eq!(config.max_job_failures, 5);
    assert_eq!(config.on_success, Disposition::Destroy);
    assert!(config.prettify_json);
}

#[test]
fn invalid_toml_is_a_config_error() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("queue.toml");
    std::fs::write(&path, "concurrency = \"lots\"").unwrap();

    let result = QueueConfig::from_toml_file(&path);
    assert!(matches!(result, Err(jobspool::Error::Config(_))));
}

#[test]
fn missing_file_is_a_config_error() {
    let result = QueueConfig::from_toml_file(std::path::Path::new("/nonexistent/queue.toml"));
    assert!(matches!(result, Err(jobspool::Error::Config(_))));
}
