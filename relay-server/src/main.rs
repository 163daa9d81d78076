use relay_server::{Config, RelayServer, print_banner, setup_environment};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // 1. 设置环境 (dotenv, 日志)
    setup_environment();

    // 打印横幅
    print_banner();

    tracing::info!("TableTab relay starting...");

    // 2. 加载配置
    let config = Config::from_env();

    // 3. 启动 relay (ctrl-c 触发优雅关闭)
    let server = RelayServer::new(config);

    let shutdown = server.shutdown_token().clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Received ctrl-c");
            shutdown.cancel();
        }
    });

    server.run().await?;

    Ok(())
}
