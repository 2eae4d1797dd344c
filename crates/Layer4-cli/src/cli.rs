//! Non-interactive command handlers

use anyhow::Result;
use rctl_foundation::{JsonStore, RctlConfig, RCTL_CONFIG_FILE};
use rctl_task::{wait_async, ExecOptions, Session, Task, TaskError, TaskInfo};
use std::path::Path;
use std::time::Duration;
use tracing::{debug, info};

/// Exit status reported when a command timed out
const TIMEOUT_EXIT_CODE: i32 = 124;

/// Options of `rctl run`
#[derive(Debug, Clone)]
pub struct RunOptions {
    pub timeout: Option<Duration>,
    pub output_timeout: Option<Duration>,
    pub expected_exit_code: Option<i32>,
    pub separate_stderr: bool,
}

/// Run a single command, streaming its output. Returns the process exit status to use.
pub async fn run(config: &RctlConfig, command: &str, options: RunOptions) -> Result<i32> {
    let session = Session::local_with_config(config);

    let mut exec = ExecOptions::new()
        .on_stdout(|_, line| println!("{}", line))
        .on_timeout(|task| eprintln!("⏱ Timed out: {}", task.command()));
    exec.expected_exit_code = options.expected_exit_code;
    if options.separate_stderr {
        exec = exec.on_stderr(|_, line| eprintln!("{}", line));
    }
    if let Some(timeout) = options.timeout {
        exec = exec.timeout(timeout);
    }
    if let Some(timeout) = options.output_timeout {
        exec = exec.output_timeout(timeout);
    }

    let task = session.execute(command, exec)?;
    wait_async(task.as_ref()).await;
    session.close()?;

    let code = match task.error() {
        None => task.exit_code().unwrap_or(0),
        Some(TaskError::Timeout) => {
            eprintln!("Error: {}", TaskError::Timeout);
            TIMEOUT_EXIT_CODE
        }
        Some(e) => {
            eprintln!("Error: {}", e);
            task.exit_code().filter(|code| *code != 0).unwrap_or(1)
        }
    };
    debug!("Command finished with status {}", code);
    Ok(code)
}

/// Run all commands concurrently on one session and print a state table
pub async fn run_parallel(
    config: &RctlConfig,
    commands: &[String],
    timeout: Option<Duration>,
) -> Result<i32> {
    let session = Session::local_with_config(config);

    let mut tasks = Vec::with_capacity(commands.len());
    for (index, command) in commands.iter().enumerate() {
        let mut exec = ExecOptions::new()
            .on_stdout(move |_, line| println!("[{}] {}", index, line));
        if let Some(timeout) = timeout {
            exec = exec.timeout(timeout);
        }
        tasks.push(session.execute(command, exec)?);
    }
    info!("Started {} commands", tasks.len());

    for task in &tasks {
        wait_async(task.as_ref()).await;
    }
    session.close()?;

    let infos: Vec<TaskInfo> = tasks.iter().map(|task| task.info()).collect();
    print_table(&infos);

    let failed = infos.iter().filter(|info| !info.state.is_success()).count();
    if failed > 0 {
        eprintln!("\n{} of {} commands failed", failed, infos.len());
        return Ok(1);
    }
    Ok(0)
}

/// Copy `src` to `dest` on the local machine
pub async fn copy(config: &RctlConfig, src: &Path, dest: &Path, chunk_size: usize) -> Result<i32> {
    let session = Session::local_with_config(config);

    let task = if session.is_dir(src)? {
        session.copy_dir(src, &session, dest, chunk_size)?
    } else {
        session.copy_file(src, &session, dest, chunk_size)?
    };
    wait_async(task.as_ref()).await;
    session.close()?;

    task.raise_if_error()?;
    println!("✓ Copied {} -> {}", src.display(), dest.display());
    Ok(0)
}

// ============================================================================
// Config
// ============================================================================

/// Print the effective configuration and the files it was read from
pub fn config_show(config: &RctlConfig, layers: &[(&str, JsonStore)]) -> Result<i32> {
    for (scope, store) in layers {
        let state = if store.exists(RCTL_CONFIG_FILE) {
            "loaded"
        } else {
            "absent"
        };
        println!(
            "# {:<8} {} ({})",
            scope,
            store.file_path(RCTL_CONFIG_FILE).display(),
            state
        );
    }
    println!("{}", serde_json::to_string_pretty(config)?);
    Ok(0)
}

/// Set `key` in the config file of `store`, creating the file if needed
pub fn config_set(store: &JsonStore, key: &str, value: &str) -> Result<i32> {
    let mut config = RctlConfig::load_from(store)?;
    config.set(key, value)?;
    store.save(RCTL_CONFIG_FILE, &config)?;
    println!("✓ {} = {}", key, value);
    Ok(0)
}

/// Remove `key` from the config file of `store`
pub fn config_unset(store: &JsonStore, key: &str) -> Result<i32> {
    let mut config = RctlConfig::load_from(store)?;
    config.unset(key)?;
    store.save(RCTL_CONFIG_FILE, &config)?;
    println!("✓ {} unset", key);
    Ok(0)
}

/// Delete the config file of `store`
pub fn config_reset(store: &JsonStore) -> Result<i32> {
    let path = store.file_path(RCTL_CONFIG_FILE);
    if store.remove(RCTL_CONFIG_FILE)? {
        println!("✓ Removed {}", path.display());
    } else {
        println!("Nothing to remove at {}", path.display());
    }
    Ok(0)
}

fn print_table(infos: &[TaskInfo]) {
    println!(
        "\n{:<10} {:<12} {:<6} {:<10} {}",
        "ID", "State", "Code", "Duration", "Command"
    );
    println!("{}", "-".repeat(70));

    for info in infos {
        let code = info
            .exit_code
            .map(|code| code.to_string())
            .unwrap_or_else(|| "-".to_string());
        let state = format!("{} {}", info.state.symbol(), info.state);
        println!(
            "{:<10} {:<12} {:<6} {:<10} {}",
            info.id.to_string(),
            state,
            code,
            format!("{:.2}s", info.duration().as_secs_f64()),
            truncate(&info.label, 40)
        );
    }
}

fn truncate(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else {
        let head: String = s.chars().take(max_len.saturating_sub(3)).collect();
        format!("{}...", head)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncate() {
        assert_eq!(truncate("short", 10), "short");
        assert_eq!(truncate("a much longer command line", 10), "a much ...");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_run_reports_exit_status() {
        let config = RctlConfig::new();
        let options = RunOptions {
            timeout: None,
            output_timeout: None,
            expected_exit_code: None,
            separate_stderr: false,
        };
        assert_eq!(run(&config, "exit 3", options.clone()).await.unwrap(), 3);

        let checked = RunOptions {
            expected_exit_code: Some(0),
            ..options.clone()
        };
        assert_eq!(run(&config, "exit 5", checked).await.unwrap(), 5);

        let timed = RunOptions {
            timeout: Some(Duration::from_millis(100)),
            ..options
        };
        assert_eq!(
            run(&config, "sleep 10", timed).await.unwrap(),
            TIMEOUT_EXIT_CODE
        );
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_parallel_fails_if_any_fails() {
        let config = RctlConfig::new();
        let ok = vec!["true".to_string(), "echo hi".to_string()];
        assert_eq!(run_parallel(&config, &ok, None).await.unwrap(), 0);

        let mixed = vec!["true".to_string(), "exit 2".to_string()];
        assert_eq!(run_parallel(&config, &mixed, None).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_copy_file() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("in.txt");
        let dest = dir.path().join("out.txt");
        std::fs::write(&src, "payload").unwrap();

        let code = copy(&RctlConfig::new(), &src, &dest, 3).await.unwrap();
        assert_eq!(code, 0);
        assert_eq!(std::fs::read_to_string(&dest).unwrap(), "payload");
    }

    #[test]
    fn test_config_set_unset_reset() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonStore::new(dir.path().join(".rctl"));

        config_set(&store, "exec.timeoutSecs", "2.5").unwrap();
        config_set(&store, "copy.chunkSize", "4096").unwrap();
        let saved = RctlConfig::load_from(&store).unwrap();
        assert_eq!(saved.exec.timeout(), Some(Duration::from_millis(2500)));
        assert_eq!(saved.copy.chunk_size(), 4096);

        config_unset(&store, "exec.timeoutSecs").unwrap();
        let saved = RctlConfig::load_from(&store).unwrap();
        assert!(saved.exec.timeout_secs.is_none());
        assert_eq!(saved.copy.chunk_size(), 4096);

        assert_eq!(config_show(&saved, &[("project", store.clone())]).unwrap(), 0);

        config_reset(&store).unwrap();
        assert!(!store.exists(RCTL_CONFIG_FILE));
        config_reset(&store).unwrap();
    }

    #[test]
    fn test_config_set_rejects_invalid_value() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonStore::new(dir.path());

        assert!(config_set(&store, "exec.timeoutSecs", "-1").is_err());
        assert!(config_set(&store, "exec.bogus", "1").is_err());
        assert!(!store.exists(RCTL_CONFIG_FILE));
    }
}
