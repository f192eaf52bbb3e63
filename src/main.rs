use std::path::PathBuf;
use std::time::Duration;
use anyhow::Context;
use clap::Parser;
use crossterm::event::{self, Event, KeyCode, KeyEvent, KeyEventKind};
use crossterm::terminal::{disable_raw_mode, enable_raw_mode};
use futures::future::join_all;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;
use chunkline::config::AppConfig;
use chunkline::utils::format_bytes;
use chunkline::{FileSource, UploadEvent, UploadManager, UploadOutcome, UploadSource};

/// 分片上传命令行
#[derive(Parser, Debug)]
#[command(version, about)]
struct Cli {
    /// 配置文件路径
    #[arg(short, long, default_value = "config.toml")]
    config: PathBuf,

    /// 覆盖配置文件中的分类
    #[arg(long)]
    category: Option<String>,

    /// 要上传的文件
    #[arg(required = true)]
    files: Vec<PathBuf>,
}

const EVENT_FLUSH_TIMEOUT: Duration = Duration::from_millis(500);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = AppConfig::load(&cli.config)
        .with_context(|| format!("failed to load {}", cli.config.display()))?;

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level)),
        )
        .init();

    let transport = config.transport()?;
    let manager = UploadManager::new(std::sync::Arc::new(transport), config.chunked_config())?;
    let category = cli.category.unwrap_or_else(|| config.category.clone());

    let event_handle = tokio::spawn(handle_event(manager.subscribe_events()));

    let mut handles = Vec::new();
    for path in &cli.files {
        let source = FileSource::open(path)
            .await
            .with_context(|| format!("cannot upload {}", path.display()))?;
        let size = format_bytes(source.len());
        let (id, handle) = manager.spawn(source, category.clone());
        info!(upload_id = %id, file = %path.display(), %size, "queued");
        handles.push(handle);
    }

    let (key_tx, mut key_rx) = mpsc::unbounded_channel();
    let keyboard = tokio::task::spawn_blocking(move || read_keys(key_tx));

    let uploads = join_all(handles);
    tokio::pin!(uploads);

    let outcomes = loop {
        tokio::select! {
            outcomes = &mut uploads => break outcomes,
            Some(code) = key_rx.recv() => {
                if !handle_key(&manager, code) {
                    for task in manager.store().tasks() {
                        manager.cancel(task.id);
                    }
                }
            }
        }
    };

    drop(key_rx);
    if let Err(e) = keyboard.await? {
        warn!("keyboard input unavailable: {}", e);
    }
    drop(manager);
    flush_events(event_handle).await;

    let mut failed = 0;
    for outcome in outcomes {
        match outcome {
            Ok(UploadOutcome::Success) => {}
            Ok(other) => {
                warn!(outcome = ?other, "upload did not succeed");
                failed += 1;
            }
            Err(e) => {
                warn!("upload task panicked: {}", e);
                failed += 1;
            }
        }
    }

    if failed > 0 {
        anyhow::bail!("{failed} of {} uploads did not succeed", cli.files.len());
    }
    println!("All uploads finished");
    Ok(())
}

/// 在阻塞线程中读取按键，接收端关闭后退出
fn read_keys(key_tx: mpsc::UnboundedSender<KeyCode>) -> anyhow::Result<()> {
    enable_raw_mode()?;

    let result = (|| -> anyhow::Result<()> {
        while !key_tx.is_closed() {
            if !event::poll(Duration::from_millis(100))? {
                continue;
            }
            if let Event::Key(KeyEvent { code, kind, .. }) = event::read()? {
                if kind == KeyEventKind::Press && key_tx.send(code).is_err() {
                    break;
                }
            }
        }
        Ok(())
    })();

    disable_raw_mode()?;
    result
}

/// 处理一个按键，返回 false 表示要退出
fn handle_key(manager: &UploadManager, code: KeyCode) -> bool {
    let store = manager.store();
    match code {
        KeyCode::Char('q') => {
            println!("Quitting...\r");
            return false;
        }
        KeyCode::Char('c') => {
            println!("Cancel is sent\r");
            for task in store.tasks() {
                manager.cancel(task.id);
            }
        }
        KeyCode::Char('m') => {
            for task in store.tasks() {
                store.toggle_minimize(task.id);
            }
        }
        KeyCode::Char('l') => {
            println!("============== All Task ==============\r");
            for task in store.tasks() {
                if task.minimized {
                    println!("{} [{}] {}%\r", task.file_name, task.status, task.progress);
                } else {
                    println!(
                        "{} ({}) [{}] {}% {}{}\r",
                        task.file_name,
                        format_bytes(task.file_size),
                        task.status,
                        task.progress,
                        task.speed,
                        task.error.as_deref().map(|e| format!(" - {e}")).unwrap_or_default()
                    );
                }
            }
            println!("============== All Task ==============\r");
        }
        _ => {}
    }
    true
}

/// 等待已发出的事件打印完
///
/// 延迟清理任务还持有 store，事件通道不一定会关闭，所以只等一小段时间。
async fn flush_events(mut handle: JoinHandle<usize>) {
    match tokio::time::timeout(EVENT_FLUSH_TIMEOUT, &mut handle).await {
        Ok(Ok(printed)) => debug!(printed, "event printer finished"),
        Ok(Err(e)) => warn!("event printer failed: {}", e),
        Err(_) => handle.abort(),
    }
}

/// 打印事件直到通道关闭，返回打印的事件数
async fn handle_event(mut event_rx: broadcast::Receiver<UploadEvent>) -> usize {
    let mut printed = 0;
    loop {
        let event = match event_rx.recv().await {
            Ok(event) => event,
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                warn!(skipped, "event receiver lagged");
                continue;
            }
            Err(broadcast::error::RecvError::Closed) => break,
        };
        printed += 1;

        match event {
            UploadEvent::TaskAdded { upload_id, file_name } => {
                println!("Upload {upload_id}: added {file_name}\r");
            }
            UploadEvent::StateChanged { upload_id, old_state, new_state } => {
                println!("Upload {upload_id}: {old_state} -> {new_state}\r");
            }
            UploadEvent::Completed { upload_id } => {
                println!("Upload {upload_id}: completed\r");
            }
            UploadEvent::Failed { upload_id, message, .. } => {
                println!("Upload {upload_id} failed: {message}\r");
            }
            UploadEvent::Cancelled { upload_id } => {
                println!("Upload {upload_id}: cancelled\r");
            }
            UploadEvent::Removed { upload_id } => {
                println!("Upload {upload_id}: removed\r");
            }
        }
    }
    printed
}
