use std::io::{self, Write};

use async_trait::async_trait;
use env_logger::Builder;
use pingora::{
    server::{ListenFds, ShutdownWatch},
    services::Service,
};
use tokio::{
    fs::{create_dir_all, metadata, File, OpenOptions},
    io::{AsyncWriteExt, BufWriter},
    sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender},
};

use crate::{
    config,
    core::{ErrorContext, PipelineResult},
};

/// `Write` half handed to env_logger; every record becomes one channel message
pub struct AsyncWriter {
    sender: UnboundedSender<Vec<u8>>,
}

impl Write for AsyncWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let data = buf.to_vec();
        self.sender.send(data).map_err(io::Error::other)?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// File log sink, drained by a pingora background service
pub struct Logger {
    sender: UnboundedSender<Vec<u8>>,
    receiver: UnboundedReceiver<Vec<u8>>,
    config: config::Log,
}

impl Logger {
    pub fn new(config: config::Log) -> Self {
        let (sender, receiver) = unbounded_channel::<Vec<u8>>();
        Self {
            sender,
            receiver,
            config,
        }
    }

    fn create_async_writer(&self) -> AsyncWriter {
        AsyncWriter {
            sender: self.sender.clone(),
        }
    }

    /// Install env_logger writing into this sink
    pub fn init_env_logger(&self) -> PipelineResult<()> {
        let writer = self.create_async_writer();
        Builder::from_env(env_logger::Env::default())
            .filter(None, self.config.level_filter())
            .target(env_logger::Target::Pipe(Box::new(writer)))
            .try_init()
            .with_context("Failed to install logger")
    }
}

async fn open_log_file(path: &str) -> PipelineResult<BufWriter<File>> {
    if let Some(parent) = std::path::Path::new(path).parent() {
        if metadata(parent).await.is_err() {
            create_dir_all(parent)
                .await
                .with_context("Failed to create log path")?;
        }
    }

    let file = OpenOptions::new()
        .append(true)
        .create(true)
        .open(path)
        .await
        .with_context("Failed to open or create log file")?;

    Ok(BufWriter::new(file))
}

#[async_trait]
impl Service for Logger {
    async fn start_service(&mut self, _fds: Option<ListenFds>, mut shutdown: ShutdownWatch) {
        let mut file = match open_log_file(&self.config.path).await {
            Ok(file) => file,
            Err(e) => {
                eprintln!("{e}, file logging disabled");
                return;
            }
        };

        loop {
            tokio::select! {
                biased;
                // Shutdown signal handling
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        log::info!("Shutdown signal received, stopping write log");
                        break;
                    }
                },

                data = self.receiver.recv() => {
                    match data {
                        Some(data) => {
                            if let Err(e) = file.write_all(&data).await {
                                eprintln!("Failed to write to log file: {e}");
                            }
                        }
                        None => {
                            log::info!("Log channel closed, stopping write log");
                            break;
                        }
                    }
                }
            }
        }

        if let Err(e) = file.flush().await {
            eprintln!("Failed to flush log file: {e}");
        }
    }

    fn name(&self) -> &'static str {
        "log sync"
    }

    fn threads(&self) -> Option<usize> {
        Some(1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_writer_forwards_records() {
        let mut logger = Logger::new(config::Log {
            path: "/tmp/gqlpipe-test.log".to_string(),
            level: "debug".to_string(),
        });
        let mut writer = logger.create_async_writer();

        writer.write_all(b"first\n").unwrap();
        writer.write_all(b"second\n").unwrap();

        assert_eq!(logger.receiver.try_recv().unwrap(), b"first\n".to_vec());
        assert_eq!(logger.receiver.try_recv().unwrap(), b"second\n".to_vec());
    }

    #[tokio::test]
    async fn test_open_log_file_creates_parent() {
        let dir = std::env::temp_dir().join(format!("gqlpipe-log-{}", uuid::Uuid::new_v4()));
        let path = dir.join("nested").join("gqlpipe.log");

        let mut file = open_log_file(path.to_str().unwrap()).await.unwrap();
        file.write_all(b"hello\n").await.unwrap();
        file.flush().await.unwrap();

        assert_eq!(tokio::fs::read_to_string(&path).await.unwrap(), "hello\n");
        let _ = tokio::fs::remove_dir_all(&dir).await;
    }
}
