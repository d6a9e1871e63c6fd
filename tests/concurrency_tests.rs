//! Concurrent execution through one shared sandbox.

use std::sync::Arc;
use std::time::Duration;

use agent_tool_sandbox_rs::prelude::*;

fn shared_sandbox(dir: &std::path::Path) -> Arc<Sandbox> {
    let config = SandboxConfig::builder()
        .work_dir(dir)
        .allowed_tools(["echo", "sleep"])
        .timeout(Duration::from_secs(10))
        .build();
    Arc::new(Sandbox::new(config).unwrap())
}

/// Each concurrent run sees only its own output.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_runs_keep_output_separate() {
    let dir = tempfile::tempdir().unwrap();
    let sandbox = shared_sandbox(dir.path());

    let handles: Vec<_> = (0..16)
        .map(|i| {
            let sandbox = Arc::clone(&sandbox);
            tokio::spawn(async move {
                let result = sandbox.execute(&format!("echo run-{i}")).await.unwrap();
                (i, result)
            })
        })
        .collect();

    for handle in handles {
        let (i, result) = handle.await.unwrap();
        assert!(result.is_success(), "run {i} failed: {result:?}");
        assert_eq!(result.stdout.trim(), format!("run-{i}"));
    }
}

/// A slow command does not hold up others; the spawn lock is released
/// before waiting.
#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_slow_command_does_not_block_others() {
    let dir = tempfile::tempdir().unwrap();
    let sandbox = shared_sandbox(dir.path());

    let slow = {
        let sandbox = Arc::clone(&sandbox);
        tokio::spawn(async move { sandbox.execute("sleep 2").await })
    };
    tokio::time::sleep(Duration::from_millis(100)).await;

    let started = std::time::Instant::now();
    let quick = sandbox.execute("echo quick").await.unwrap();
    assert!(quick.is_success());
    assert!(started.elapsed() < Duration::from_millis(1500));

    assert!(slow.await.unwrap().unwrap().is_success());
}

#[test]
fn test_sandbox_is_send_and_sync() {
    fn assert_send_sync<T: Send + Sync>() {}
    assert_send_sync::<Sandbox>();
    assert_send_sync::<PromptInjectionDetector>();
}
