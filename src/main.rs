// ==========================================
// 分块事务批处理引擎 - 命令行入口
// ==========================================
// 用法: txn-batch-engine <batch-file.{csv,json}> [db_path]
// 流程: 加载批次 -> 异步提交 -> 轮询至终态 -> 输出结果与指标 -> 优雅关闭
// ==========================================

use std::time::Duration;

use anyhow::{bail, Context};
use txn_batch_engine::app::{get_default_db_path, AppContext};
use txn_batch_engine::importer::load_batch_file;
use txn_batch_engine::{logging, APP_NAME, VERSION};

const POLL_INTERVAL: Duration = Duration::from_millis(200);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    logging::init();

    let mut args = std::env::args().skip(1);
    let Some(batch_file) = args.next() else {
        bail!("用法: txn-batch-engine <batch-file.{{csv,json}}> [db_path]");
    };
    let db_path = args.next().unwrap_or_else(get_default_db_path);

    tracing::info!("==================================================");
    tracing::info!("{} v{}", APP_NAME, VERSION);
    tracing::info!("使用数据库: {}", db_path);
    tracing::info!("==================================================");

    let transactions =
        load_batch_file(&batch_file).with_context(|| format!("无法加载批次文件: {}", batch_file))?;

    let ctx = AppContext::init(db_path).context("无法初始化应用上下文")?;
    let api = ctx.transaction_api.clone();

    let outcome = async {
        let submitted = api.submit_batch(transactions)?;
        tracing::info!(batch_id = %submitted.batch_id, total = submitted.total, "批次已提交");

        let record = loop {
            let record = api.get_batch_status(&submitted.batch_id)?;
            if record.status.is_terminal() {
                break record;
            }
            tokio::time::sleep(POLL_INTERVAL).await;
        };

        println!("{}", serde_json::to_string_pretty(&record)?);
        let metrics = api.current_metrics().await?;
        println!("{}", serde_json::to_string_pretty(&metrics)?);
        anyhow::Ok(())
    }
    .await;

    // 无论成功与否都要排空并关闭
    ctx.shutdown().await.context("关闭失败")?;
    outcome
}
