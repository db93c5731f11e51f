//! corfu-lite - in-process shared log demo
//!
//! Starts a sequencer and a log unit, runs concurrent writers against one
//! stream and reads the stream back.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result, bail};
use clap::Parser;
use tracing::{Level, info, warn};
use tracing_subscriber::FmtSubscriber;

use corfu_lite::{LocalLog, RuntimeOptions, StreamId};

/// 共享日志演示配置
#[derive(Parser, Debug)]
#[command(name = "corfu-lite")]
#[command(about = "corfu-lite - shared log with per stream views")]
struct Args {
    /// JSON 配置文件，命令行参数覆盖其中的值
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// 数据目录，不指定时只保存在内存中
    #[arg(short, long)]
    data_dir: Option<PathBuf>,

    /// Stream 名称
    #[arg(short, long, default_value = "demo")]
    stream: String,

    /// 并发写入者数量
    #[arg(short, long, default_value = "8")]
    writers: usize,

    /// 每个写入者追加的记录数
    #[arg(short, long, default_value = "16")]
    records: usize,

    /// 用线性扫描代替 backpointer 读取
    #[arg(long)]
    scan: bool,

    /// 打开客户端读缓存
    #[arg(long)]
    cache: bool,

    /// 日志级别
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let level = match args.log_level.as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let subscriber = FmtSubscriber::builder().with_max_level(level).finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let mut options = match &args.config {
        Some(path) => RuntimeOptions::from_json_file(path)?,
        None => RuntimeOptions::default(),
    };
    if args.data_dir.is_some() {
        options.log_unit.data_dir = args.data_dir.clone();
    }
    if args.scan {
        options.backpointers_enabled = false;
    }
    if args.cache {
        options.cache_enabled = true;
    }

    info!("Stream: {}", args.stream);
    info!("Writers: {} x {} records", args.writers, args.records);
    info!("Data directory: {:?}", options.log_unit.data_dir);
    info!(
        "Read strategy: {}",
        if options.backpointers_enabled {
            "backpointers"
        } else {
            "scan"
        }
    );

    let log = LocalLog::new(options).context("open local log")?;
    let stream_id = StreamId::from_name(&args.stream);
    if log.options().sequencer.require_recovery || log.options().log_unit.data_dir.is_some() {
        log.recover_sequencer(&[stream_id]).await?;
    }

    let runtime = Arc::new(log.runtime().await?);
    let existing = runtime.stream(&args.stream).read_all().await?.len();
    if existing > 0 {
        info!("Stream {} already holds {} records", args.stream, existing);
    }

    let started = Instant::now();
    let mut handles = Vec::with_capacity(args.writers);
    for writer in 0..args.writers {
        let runtime = runtime.clone();
        let name = args.stream.clone();
        let records = args.records;
        handles.push(tokio::spawn(async move {
            let view = runtime.stream(&name);
            let mut addresses = Vec::with_capacity(records);
            for i in 0..records {
                let payload = format!("writer-{}-record-{}", writer, i);
                addresses.push(view.write(payload).await?);
            }
            Ok::<_, corfu_lite::StreamError>(addresses)
        }));
    }

    let mut written = 0;
    for result in futures::future::join_all(handles).await {
        written += result?.context("writer failed")?.len();
    }
    info!("Appended {} records in {:?}", written, started.elapsed());

    let reader = runtime.stream(&args.stream);
    let records = reader.read_all().await?;
    let total = records.len();
    if total != existing + written {
        bail!(
            "read back {} records, expected {}",
            total,
            existing + written
        );
    }

    if let Some(last) = records.last().and_then(|r| r.payload()) {
        info!("Last record: {}", String::from_utf8_lossy(last));
    }
    match log.log_unit.contiguous() {
        Some(tail) => info!("Log is contiguous up to {}", tail),
        None => warn!("Log has no decided prefix"),
    }
    info!("Read back {} records in {:?}", total, started.elapsed());

    Ok(())
}
