//! 错误类型

use std::io;
use thiserror::Error;

/// 日志器错误
#[derive(Debug, Error)]
pub enum LogError {
    #[error("日志写入失败: {0}")]
    Io(#[from] io::Error),

    /// 后台消费线程已停止，队列不再接收数据
    #[error("日志消费线程已停止")]
    Disconnected,

    #[error("{0}")]
    Config(String),

    #[error("创建告警运行时失败: {0}")]
    Runtime(io::Error),
}

/// 告警投递错误
#[derive(Debug, Error)]
pub enum AlertError {
    #[error("告警连接失败: {0}")]
    Io(#[from] io::Error),

    #[error("无效的主机名: {0}")]
    InvalidHost(String),

    /// 服务器在某一阶段返回了非预期的应答
    #[error("SMTP {stage} 被拒绝: {reply}")]
    Rejected { stage: &'static str, reply: String },

    #[error("SMTP 协议错误: {0}")]
    Protocol(String),
}
