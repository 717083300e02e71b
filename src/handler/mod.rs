//! 日志输出处理器模块

use std::sync::Arc;
use async_trait::async_trait;
use tokio::runtime::{Builder, Runtime};

use crate::error::{AlertError, LogError};

/// 告警投递能力
///
/// 只有 WARN 及以上的记录会被投递。实现方在日志器的告警运行时上执行，
/// 返回的错误不会传回日志调用方。
#[async_trait]
pub trait AlertSink: Send + Sync + 'static {
    /// 以 from 为发件人显示名投递一条消息
    async fn send(&self, from: &str, msg: &[u8]) -> Result<(), AlertError>;
}

/// 告警派发器，持有独立的 tokio 运行时
///
/// 每条告警都是一个分离的任务，没有重试，也不等待结果。
pub(crate) struct AlertDispatcher {
    sink: Arc<dyn AlertSink>,
    runtime: Option<Runtime>,
}

impl AlertDispatcher {
    pub(crate) fn new(sink: Arc<dyn AlertSink>) -> Result<Self, LogError> {
        let runtime = Builder::new_multi_thread()
            .worker_threads(1)
            .thread_name("logd-alert")
            .enable_all()
            .build()
            .map_err(LogError::Runtime)?;

        Ok(Self {
            sink,
            runtime: Some(runtime),
        })
    }

    pub(crate) fn dispatch(&self, from: String, msg: Vec<u8>) {
        let Some(runtime) = &self.runtime else {
            return;
        };
        let sink = Arc::clone(&self.sink);
        runtime.spawn(async move {
            if let Err(e) = sink.send(&from, &msg).await {
                eprintln!("[logd-alert] 告警发送失败: {}", e);
            }
        });
    }
}

impl Drop for AlertDispatcher {
    fn drop(&mut self) {
        // 不等待未完成的告警，也允许在异步上下文中释放
        if let Some(runtime) = self.runtime.take() {
            runtime.shutdown_background();
        }
    }
}

pub mod file;
pub mod mail;

pub use file::DailyFile;
pub use mail::SmtpMailer;
