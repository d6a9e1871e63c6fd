//! Basic example of running whitelisted tools in the sandbox.
//!
//! Run with: cargo run --example basic_execution
//!
//! Set `RUST_LOG=agent_tool_sandbox_rs=debug` to see validation and spawn logs.

use std::time::Duration;

use agent_tool_sandbox_rs::prelude::*;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    // Configure the sandbox
    let config = SandboxConfig::builder()
        .timeout(Duration::from_secs(5))
        .max_memory(512 * 1024 * 1024) // 512MB
        .allow_tool("echo")
        .allow_tool("sleep")
        .validate_path_arguments(true)
        .build();

    println!("Creating sandbox in {}", config.work_dir.display());
    let sandbox = Sandbox::new(config)?;
    println!(
        "Resource limiter: {} ({:?})",
        sandbox.limiter().name(),
        sandbox.limiter().enforcement()
    );

    println!("\n=== Test 1: Simple command ===");
    let result = sandbox.execute("echo hello from the sandbox").await?;
    println!("stdout: {}", result.stdout.trim_end());
    println!("exit_code: {}", result.exit_code);
    println!("duration: {:?}", result.duration);

    println!("\n=== Test 2: Non-zero exit ===");
    let result = sandbox.execute("ls no-such-file").await?;
    println!("success: {}", result.success);
    println!("exit_code: {}", result.exit_code);
    println!("stderr: {}", result.stderr.trim_end());

    println!("\n=== Test 3: Rejected before spawning ===");
    for command in ["echo hi; rm -rf /", "rm -rf /", "cat /etc/shadow", ""] {
        match sandbox.execute(command).await {
            Ok(result) => println!("{command:?}: unexpectedly ran ({})", result.exit_code),
            Err(e) => println!("{command:?}: {e}"),
        }
    }

    println!("\n=== Test 4: Timeout ===");
    let result = sandbox.execute("sleep 30").await?;
    println!("timed out: {}", result.is_timeout());
    println!("duration: {:?}", result.duration);
    if let Err(e) = result.into_result() {
        println!("as error: {e}");
    }

    Ok(())
}
