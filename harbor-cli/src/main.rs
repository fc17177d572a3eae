use clap::Parser;
use harbor_cli::{Cli, CliApp, Commands, run_init, setup_logging};
use harbor_core::HarborError;
use tracing::error;

#[tokio::main]
async fn main() {
    // 解析命令行参数
    let cli = Cli::parse();

    // 设置日志记录，guard 需存活到进程结束以刷新文件日志
    let _log_guard = setup_logging(cli.verbose);

    // `init` 命令不需要预先加载配置
    if let Commands::Init { force } = cli.command {
        if let Err(e) = run_init(&cli.config, force).await {
            error!("❌ 初始化失败: {}", e);
            std::process::exit(1);
        }
        return;
    }

    let app = match CliApp::new(&cli.config).await {
        Ok(app) => app,
        Err(HarborError::ConfigNotFound) => {
            error!("❌ 配置文件 '{}' 未找到。", cli.config.display());
            error!("👉 请先运行 'harbor init' 命令来创建配置文件。");
            std::process::exit(1);
        }
        Err(e) => {
            error!("❌ 应用初始化失败: {}", e);
            std::process::exit(1);
        }
    };

    if let Err(e) = app.run_command(cli.command).await {
        error!("❌ 操作失败: {:#}", e);
        std::process::exit(1);
    }
}
