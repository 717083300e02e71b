//! logd - 异步日志库
//!
//! 级别/行为标志位过滤、单消费线程异步写入、按天切分文件并压缩清理旧日志、
//! WARN 及以上级别的邮件告警。
//!
//! # 使用示例
//!
//! ```rust,no_run
//! use logd::{Flags, Level, LoggerBuilder};
//!
//! logd::info("服务启动");
//! logd::infof!("监听端口 {}", 8080);
//!
//! let logger = LoggerBuilder::new()
//!     .with_flags(Flags::STD | Flags::ASYNC | Flags::DAILY)
//!     .with_log_dir("./logs")
//!     .with_level(Level::Info)
//!     .build()
//!     .unwrap();
//! logger.warn("磁盘空间不足");
//! logger.wait_flush();
//! ```

pub mod config;
pub mod core;
pub mod error;
pub mod format;
pub mod handler;
pub mod producer_consumer;

use std::fmt;
use std::fs::OpenOptions;
use std::io::Write;
use std::panic::Location;
use std::path::{Path, PathBuf};

// 重新导出主要类型
pub use crate::config::{Compression, Flags, Level, LogConfig, SmtpConfig};
pub use crate::core::{Logger, LoggerBuilder, ExitHook, caller_stack, set_std_logger, std_logger};
pub use crate::error::{AlertError, LogError};
pub use crate::handler::{AlertSink, SmtpMailer};

// 格式化日志宏，输出到默认日志器

#[macro_export]
macro_rules! printf {
    ($($arg:tt)*) => ($crate::printf(format_args!($($arg)*)));
}

#[macro_export]
macro_rules! debugf {
    ($($arg:tt)*) => ($crate::debugf(format_args!($($arg)*)));
}

#[macro_export]
macro_rules! infof {
    ($($arg:tt)*) => ($crate::infof(format_args!($($arg)*)));
}

#[macro_export]
macro_rules! warnf {
    ($($arg:tt)*) => ($crate::warnf(format_args!($($arg)*)));
}

#[macro_export]
macro_rules! errorf {
    ($($arg:tt)*) => ($crate::errorf(format_args!($($arg)*)));
}

#[macro_export]
macro_rules! fatalf {
    ($($arg:tt)*) => ($crate::fatalf(format_args!($($arg)*)));
}

//----------------------------------- 默认实例封装 ---------------------------------

/// 重定向默认日志器到文件（为空时使用 app.log）
pub fn redirect_log_file(logfile: Option<&Path>, flags: Flags) -> Result<(), LogError> {
    let logfile = logfile.unwrap_or_else(|| Path::new("app.log"));
    let file = OpenOptions::new().create(true).append(true).open(logfile)?;

    let logger = LoggerBuilder::new()
        .with_flags(flags)
        .with_channel_len(crate::core::DEFAULT_CHANNEL_LEN)
        .with_output(file)
        .build()?;
    set_std_logger(logger);
    Ok(())
}

/// 生产环境配置：输出到文件，只保留 WARN/ERROR/FATAL，可选邮件告警
///
/// logfile 为空时保持当前默认日志器不变。
pub fn reset(logfile: impl AsRef<Path>, smtp: Option<SmtpConfig>) -> Result<(), LogError> {
    let logfile = logfile.as_ref();
    if logfile.as_os_str().is_empty() {
        return Ok(());
    }

    let flags = Flags::WARN | Flags::ERROR | Flags::FATAL | Flags::DATE | Flags::TIME | Flags::SHORT_FILE;
    let file = OpenOptions::new().create(true).append(true).open(logfile)?;

    let mut builder = LoggerBuilder::new()
        .with_flags(flags)
        .with_channel_len(crate::core::DEFAULT_CHANNEL_LEN)
        .with_output(file);
    if let Some(smtp) = smtp {
        builder = builder.with_smtp(smtp);
    }
    set_std_logger(builder.build()?);
    Ok(())
}

#[track_caller]
pub fn print(msg: &str) {
    std_logger().print(msg)
}

#[track_caller]
pub fn printf(args: fmt::Arguments<'_>) {
    std_logger().printf(args)
}

#[track_caller]
pub fn debug(msg: &str) {
    std_logger().debug(msg)
}

#[track_caller]
pub fn debugf(args: fmt::Arguments<'_>) {
    std_logger().debugf(args)
}

#[track_caller]
pub fn info(msg: &str) {
    std_logger().info(msg)
}

#[track_caller]
pub fn infof(args: fmt::Arguments<'_>) {
    std_logger().infof(args)
}

#[track_caller]
pub fn warn(msg: &str) {
    std_logger().warn(msg)
}

#[track_caller]
pub fn warnf(args: fmt::Arguments<'_>) {
    std_logger().warnf(args)
}

#[track_caller]
pub fn error(msg: &str) {
    std_logger().error(msg)
}

#[track_caller]
pub fn errorf(args: fmt::Arguments<'_>) {
    std_logger().errorf(args)
}

/// 输出消息和调用栈两条 FATAL 记录后退出进程
#[track_caller]
pub fn fatal(msg: &str) {
    fatal_with_stack(Location::caller(), msg)
}

#[track_caller]
pub fn fatalf(args: fmt::Arguments<'_>) {
    fatal_with_stack(Location::caller(), &args.to_string())
}

fn fatal_with_stack(caller: &Location<'_>, msg: &str) {
    let logger = std_logger();
    let stack = caller_stack();
    for content in [msg, stack.as_str()] {
        if let Err(e) = logger.output(Level::Fatal, Some(caller), content) {
            eprintln!("[logd] 日志输出失败: {}", e);
        }
    }
    logger.exit(1);
}

#[track_caller]
pub fn breakpoint() {
    std_logger().breakpoint()
}

pub fn set_level(level: Level) {
    std_logger().set_level(level)
}

pub fn set_flags(flags: Flags) {
    std_logger().set_flags(flags)
}

pub fn set_output<W: Write + Send + 'static>(out: W) {
    std_logger().set_output(out)
}

pub fn set_obj(obj: impl Into<String>) {
    std_logger().set_obj(obj)
}

pub fn set_log_dir(dir: impl Into<PathBuf>) {
    std_logger().set_log_dir(dir)
}

pub fn wait_flush() {
    std_logger().wait_flush()
}
