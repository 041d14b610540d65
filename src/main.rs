//! 商户系统主入口
//! 装配请求管道、后台清理任务与到期扫描器

use merchant_system::{
    auth::JwtVerifier,
    config::AppConfig,
    context::RequestContextStore,
    db,
    handlers::health,
    middleware::{audit::AuditPolicy, rate_limit::RateLimiters, AppState},
    repository::{PgAuditRepository, PgMerchantRepository},
    routes,
    services::{AuditService, ExpiryScanner, SubscriptionService},
    telemetry,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::signal;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // ===== CLI 参数处理 =====
    let args: Vec<String> = std::env::args().collect();

    if args.len() > 1 {
        match args[1].as_str() {
            "--version" => {
                println!("merchant-system {}", env!("CARGO_PKG_VERSION"));
                return Ok(());
            }
            "--help" => {
                print_help();
                return Ok(());
            }
            _ => {
                eprintln!("未知参数: {}", args[1]);
                print_help();
                std::process::exit(1);
            }
        }
    }

    // 加载 .env 文件（开发环境）
    // 生产环境应该直接设置环境变量，不依赖 .env 文件
    if let Ok(profile) = std::env::var("MERCHANT_ENV") {
        dotenv::from_filename(format!(".env.{}", profile)).ok();
    } else {
        dotenv::from_filename(".env.local").ok();
        dotenv::dotenv().ok();
    }

    // 设置应用启动时间
    health::set_start_time();

    // 1. 加载配置
    let config = AppConfig::from_env().map_err(|e| {
        eprintln!("Configuration error: {}", e);
        anyhow::anyhow!("Failed to load configuration: {}", e)
    })?;

    // 2. 初始化日志与指标
    telemetry::init_telemetry(&config);
    telemetry::init_metrics();

    tracing::info!(version = env!("CARGO_PKG_VERSION"), "Merchant system starting...");

    // 3. 数据库连接池 + 迁移
    let db_pool = db::create_pool(&config.database).await?;
    db::run_migrations(&db_pool).await?;

    tracing::info!("Database initialized");

    // 4. 构建应用状态
    let context_store = Arc::new(RequestContextStore::new());
    let rate_limiters = Arc::new(RateLimiters::from_config(&config.rate_limit));
    let merchant_store = Arc::new(PgMerchantRepository::new(db_pool.clone()));
    let audit_store = Arc::new(PgAuditRepository::new(db_pool.clone()));

    let subscription_service = Arc::new(SubscriptionService::new(merchant_store.clone()));
    let audit_service = Arc::new(AuditService::new(audit_store));
    let expiry_scanner = Arc::new(ExpiryScanner::new(
        merchant_store.clone(),
        Duration::from_secs(config.subscription.min_scan_interval_secs),
    ));

    let app_state = Arc::new(AppState {
        db: db_pool.clone(),
        context_store: context_store.clone(),
        rate_limiters: rate_limiters.clone(),
        token_verifier: Arc::new(JwtVerifier::from_config(&config)?),
        merchant_store,
        subscription_service,
        audit_service,
        expiry_scanner: expiry_scanner.clone(),
        audit_policy: Arc::new(AuditPolicy::from_config(&config.audit)),
        config: config.clone(),
    });

    // 5. 启动后台任务：上下文清理、限流桶清理、订阅到期扫描
    //    三者都幂等，负载高时跳过一轮不影响正确性
    context_store.spawn_sweeper(Duration::from_secs(60));
    rate_limiters.spawn_sweeper(Duration::from_secs(config.rate_limit.sweep_interval_secs));
    expiry_scanner.spawn_timer(Duration::from_secs(config.subscription.scan_interval_secs));

    // 6. 构建路由。领域 CRUD（订单/商品/客户）由独立服务提供，
    //    这里以空路由占位
    let app = routes::create_router(app_state, axum::Router::new());

    // 7. 启动服务器
    let addr = &config.server.addr;
    let listener = TcpListener::bind(addr).await?;

    tracing::info!(addr = %addr, "Server listening");

    // 8. 优雅关闭
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(config.server.graceful_shutdown_timeout_secs))
        .await?;

    tracing::info!("Server shutdown complete");
    Ok(())
}

/// 优雅关闭信号处理
async fn shutdown_signal(timeout_secs: u64) {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Ctrl+C received, starting graceful shutdown");
        },
        _ = terminate => {
            tracing::info!("Terminate signal received, starting graceful shutdown");
        },
    }

    // 超时后强制关闭
    tokio::time::sleep(tokio::time::Duration::from_secs(timeout_secs)).await;
    tracing::warn!("Graceful shutdown timeout reached, forcing exit");
}

/// 打印帮助信息
fn print_help() {
    println!("merchant-system {}", env!("CARGO_PKG_VERSION"));
    println!();
    println!("用法: merchant-system [选项]");
    println!();
    println!("选项:");
    println!("  --version     打印版本信息并退出");
    println!("  --help        打印此帮助信息并退出");
    println!();
    println!("环境变量:");
    println!("  所有配置通过环境变量完成（前缀 MERCHANT_）");
}
