//! bee-pilot - 浏览器任务编排引擎
//!
//! 入口：初始化日志、创建引擎，提交一个目标，打印状态快照与最终结果。

use std::path::PathBuf;

use anyhow::Context;
use bee_pilot::core::{create_engine, Command, EngineOutcome};
use bee_pilot::workflow::Mode;
use clap::Parser;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser, Debug)]
#[command(name = "bee-pilot", version, about = "Hierarchical browser task orchestration")]
struct Cli {
    /// 额外的配置文件（覆盖 config/default.toml）
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// 跳过 Router，直接指定 action / research
    #[arg(short, long)]
    mode: Option<Mode>,

    /// 只打印最终结果，不打印中间状态
    #[arg(short, long)]
    quiet: bool,

    /// 用户目标
    #[arg(required = true)]
    goal: Vec<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // 日志：默认 info，可通过 RUST_LOG 覆盖；写到 stderr，stdout 留给结果
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr))
        .init();

    let (cmd_tx, mut status_rx, mut report_rx) =
        create_engine(cli.config).await.context("Failed to create engine")?;

    let goal = cli.goal.join(" ");
    cmd_tx
        .send(Command::Submit { goal, mode: cli.mode })
        .context("Engine stopped before accepting the request")?;

    let mut watching = !cli.quiet;
    let report = loop {
        tokio::select! {
            changed = status_rx.changed(), if watching => {
                if changed.is_err() {
                    watching = false;
                    continue;
                }
                let snapshot = status_rx.borrow_and_update().clone();
                println!("{}", serde_json::to_string(&snapshot).context("Failed to encode status")?);
            }
            report = report_rx.recv() => break report,
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("interrupt received, cancelling");
                let _ = cmd_tx.send(Command::Cancel);
            }
        }
    };
    let _ = cmd_tx.send(Command::Quit);

    let report = report.context("Engine stopped without a result")?;
    let outcome = report.result.with_context(|| format!("Request \"{}\" failed", report.goal))?;
    match &outcome {
        EngineOutcome::Action(a) => {
            println!("{}", a.summary);
            if !a.completed {
                anyhow::bail!("action workflow did not complete every task");
            }
        }
        EngineOutcome::Research(r) => println!("{}", r.report),
    }
    Ok(())
}
