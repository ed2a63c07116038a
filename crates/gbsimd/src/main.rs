// gbsimd: GB28181 设备模拟器守护进程
// 启动后在标准输入提供一个简单的运维口：status / heartbeat / register /
// unregister / quit，Ctrl-C 触发优雅停机

mod simulator;

use anyhow::Result;
use clap::Parser;
use gbsim_config::SimConfig;
use simulator::Simulator;
use std::path::PathBuf;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, Level};

#[derive(Parser)]
#[command(name = "gbsimd", version, about = "GB28181 networked camera simulator")]
struct Cli {
    /// 配置文件路径
    #[arg(short, long, default_value = "gbsim.toml")]
    config: PathBuf,

    /// 覆盖配置中的日志级别
    #[arg(long)]
    log_level: Option<String>,
}

fn init_logging(level: &str) -> Result<()> {
    let level: Level = level
        .parse()
        .map_err(|_| anyhow::anyhow!("invalid log level: {}", level))?;
    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_target(false)
        .init();
    Ok(())
}

/// 处理一条控制台命令，返回 true 表示退出
async fn handle_command(sim: &Simulator, line: &str) -> bool {
    let mut parts = line.split_whitespace();
    let cmd = match parts.next() {
        Some(cmd) => cmd,
        None => return false,
    };
    let arg = parts.next();

    match (cmd, arg) {
        ("status", _) => match serde_json::to_string_pretty(&sim.snapshot().await) {
            Ok(json) => println!("{}", json),
            Err(e) => eprintln!("snapshot failed: {}", e),
        },
        ("heartbeat", Some(id)) => match sim.send_heartbeat(id).await {
            Ok(()) => println!("heartbeat sent for {}", id),
            Err(e) => eprintln!("heartbeat failed: {}", e),
        },
        ("register", Some(id)) => match sim.register(id).await {
            Ok(()) => println!("{} registered", id),
            Err(e) => eprintln!("register failed: {}", e),
        },
        ("unregister", Some(id)) => match sim.unregister(id).await {
            Ok(()) => println!("{} unregistered", id),
            Err(e) => eprintln!("unregister failed: {}", e),
        },
        ("quit", _) | ("exit", _) => return true,
        _ => {
            eprintln!("commands: status | heartbeat <id> | register <id> | unregister <id> | quit")
        }
    }
    false
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let cfg = SimConfig::load(&cli.config)?;
    let level = cli.log_level.clone().unwrap_or_else(|| cfg.log.level.clone());
    init_logging(&level)?;

    info!(
        config = %cli.config.display(),
        platform = %format!("{}:{}", cfg.platform.host, cfg.platform.port),
        devices = cfg.devices.len(),
        "gbsimd starting"
    );

    let sim = Simulator::start(cfg).await?;
    info!(snapshot = %sim.snapshot().await, "devices online");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("shutdown signal received");
                break;
            }
            line = lines.next_line() => {
                match line {
                    Ok(Some(line)) => {
                        if handle_command(&sim, line.trim()).await {
                            break;
                        }
                    }
                    // 标准输入关闭（例如后台运行），只等待停机信号
                    _ => {
                        tokio::signal::ctrl_c().await?;
                        info!("shutdown signal received");
                        break;
                    }
                }
            }
        }
    }

    sim.stop().await;
    Ok(())
}
