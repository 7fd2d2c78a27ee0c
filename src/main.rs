use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Arg, ArgMatches, Command};
use import_orchestrator::{Application, ShutdownManager};
use orchestrator_config::{AppConfig, LogFormat};
use orchestrator_infrastructure::{init_logging, init_metrics, LoggingConfig};
use tokio::signal;
use tracing::{error, info, warn};

/// 关闭时等待后台组件退出的时间
const SHUTDOWN_GRACE: Duration = Duration::from_secs(30);

#[tokio::main]
async fn main() -> Result<()> {
    let matches = Command::new("import-orchestrator")
        .version(env!("CARGO_PKG_VERSION"))
        .about("导入编排与资源协调服务")
        .arg(
            Arg::new("config")
                .short('c')
                .long("config")
                .value_name("FILE")
                .help("配置文件路径，缺省时按默认路径查找"),
        )
        .arg(
            Arg::new("worker-id")
                .long("worker-id")
                .value_name("ID")
                .help("覆盖配置中的 worker ID"),
        )
        .arg(
            Arg::new("log-level")
                .short('l')
                .long("log-level")
                .value_name("LEVEL")
                .help("日志级别")
                .value_parser(["trace", "debug", "info", "warn", "error"]),
        )
        .arg(
            Arg::new("log-format")
                .long("log-format")
                .value_name("FORMAT")
                .help("日志格式")
                .value_parser(["json", "pretty", "compact"]),
        )
        .get_matches();

    let config_path = matches.get_one::<String>("config").map(String::as_str);
    let mut config = AppConfig::load(config_path)
        .with_context(|| format!("加载配置失败: {}", config_path.unwrap_or("<默认路径>")))?;
    apply_overrides(&mut config, &matches)?;

    init_logging(LoggingConfig {
        level: config.observability.log_level.clone(),
        format: config.observability.log_format,
        ..LoggingConfig::default()
    })?;

    info!("启动导入编排服务");
    if let Some(path) = config_path {
        info!("配置文件: {path}");
    }

    if config.observability.metrics_enabled {
        init_metrics(&config.observability.metrics_bind_address)?;
    }

    let app = Application::new(config).await?;
    let shutdown_manager = ShutdownManager::new();

    let token = shutdown_manager.token();
    let app_handle = tokio::spawn(async move {
        if let Err(e) = app.run(token).await {
            error!("应用运行失败: {e}");
        }
    });

    wait_for_shutdown_signal().await;
    info!("收到关闭信号，开始优雅关闭...");

    if shutdown_manager
        .shutdown_and_wait(app_handle, SHUTDOWN_GRACE)
        .await
    {
        info!("应用已优雅关闭");
    } else {
        warn!("应用关闭超时，强制退出");
    }

    info!("导入编排服务已退出");
    Ok(())
}

/// 命令行参数优先于配置文件与环境变量
fn apply_overrides(config: &mut AppConfig, matches: &ArgMatches) -> Result<()> {
    if let Some(id) = matches.get_one::<String>("worker-id") {
        config.worker.worker_id = id.clone();
    }
    if let Some(level) = matches.get_one::<String>("log-level") {
        config.observability.log_level = level.clone();
    }
    if let Some(format) = matches.get_one::<String>("log-format") {
        config.observability.log_format = format
            .parse::<LogFormat>()
            .map_err(|e| anyhow::anyhow!(e))?;
    }
    Ok(())
}

/// 等待关闭信号
async fn wait_for_shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("安装Ctrl+C信号处理器失败: {e}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                error!("安装SIGTERM信号处理器失败: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("收到Ctrl+C信号");
        },
        _ = terminate => {
            info!("收到SIGTERM信号");
        },
    }
}
