//! 日志核心模块 - 标志位过滤、同步/异步投递、告警派发

use std::backtrace::Backtrace;
use std::fmt;
use std::io::{self, Write};
use std::panic::Location;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use chrono::{DateTime, Local};
use once_cell::sync::Lazy;
use parking_lot::{Mutex, RwLock};

use crate::config::{Compression, Flags, Level, LogConfig, SmtpConfig};
use crate::error::LogError;
use crate::format::format_record;
use crate::handler::file::spawn_rotation;
use crate::handler::{AlertDispatcher, AlertSink, DailyFile, SmtpMailer};
use crate::producer_consumer::RecordWorker;

/// 全局默认日志器
static STD: Lazy<RwLock<Arc<Logger>>> = Lazy::new(|| RwLock::new(Arc::new(Logger::standard())));

/// 默认队列容量
pub const DEFAULT_CHANNEL_LEN: usize = 1000;

/// 进程退出函数，fatal 输出后调用
pub type ExitHook = Arc<dyn Fn(i32) + Send + Sync>;

/// 受锁保护的可变配置
pub(crate) struct State {
    pub(crate) obj: String,
    pub(crate) dir: Option<PathBuf>,
    pub(crate) out: Option<Box<dyn Write + Send>>,
    /// 同步模式下使用的当天文件
    pub(crate) file: DailyFile,
}

/// 日志器与消费线程共享的部分
pub(crate) struct Shared {
    flags: AtomicU32,
    /// 每次修改日志目录加一，消费线程据此判断是否需要持锁检查
    dir_version: AtomicUsize,
    pub(crate) state: Mutex<State>,
    compression: Compression,
}

impl Shared {
    pub(crate) fn new(flags: Flags, state: State, compression: Compression) -> Self {
        Self {
            flags: AtomicU32::new(flags.bits()),
            dir_version: AtomicUsize::new(0),
            state: Mutex::new(state),
            compression,
        }
    }

    pub(crate) fn flags(&self) -> Flags {
        Flags::from_bits(self.flags.load(Ordering::Acquire))
    }

    /// 调用方必须持有 state 锁
    fn store_flags(&self, flags: Flags) {
        self.flags.store(flags.bits(), Ordering::Release);
    }

    pub(crate) fn dir_version(&self) -> usize {
        self.dir_version.load(Ordering::Acquire)
    }

    /// 修改日志目录，None 表示不输出到文件
    pub(crate) fn set_log_dir(&self, dir: Option<PathBuf>) {
        let mut state = self.state.lock();
        state.dir = dir;
        self.dir_version.fetch_add(1, Ordering::AcqRel);
    }

    /// 需要时切换到当天文件，切换后按需派发轮转
    pub(crate) fn roll_over(
        &self,
        dir: Option<&Path>,
        obj: &str,
        daily: &mut DailyFile,
        now: DateTime<Local>,
    ) -> io::Result<()> {
        if daily.roll_over(dir, obj, now)? && self.flags().contains(Flags::DAILY) {
            if let Some(dir) = dir {
                spawn_rotation(dir.to_path_buf(), now.into(), self.compression);
            }
        }
        Ok(())
    }

    /// 写入输出流，持锁仅限于本次写入
    pub(crate) fn write_output(&self, data: &[u8]) -> io::Result<()> {
        let mut state = self.state.lock();
        match state.out.as_mut() {
            Some(out) => {
                out.write_all(data)?;
                out.flush()
            }
            None => Ok(()),
        }
    }
}

/// 工作目录名，作为日志文件前缀和告警发件人
pub fn default_object_name() -> String {
    std::env::current_dir()
        .ok()
        .and_then(|dir| dir.file_name().map(|name| name.to_string_lossy().into_owned()))
        .unwrap_or_else(|| "logd".to_string())
}

fn process_exit(code: i32) {
    std::process::exit(code)
}

/// 当前调用栈
pub fn caller_stack() -> String {
    Backtrace::force_capture().to_string()
}

/// 日志器
pub struct Logger {
    shared: Arc<Shared>,
    worker: Option<RecordWorker>,
    alert: Option<AlertDispatcher>,
    exit_hook: ExitHook,
}

impl Logger {
    /// 默认实例: 同步输出到 stdout，标准标志位
    fn standard() -> Self {
        let state = State {
            obj: default_object_name(),
            dir: None,
            out: Some(Box::new(io::stdout())),
            file: DailyFile::new(),
        };
        Self {
            shared: Arc::new(Shared::new(Flags::STD, state, Compression::default())),
            worker: None,
            alert: None,
            exit_hook: Arc::new(process_exit),
        }
    }

    pub fn builder() -> LoggerBuilder {
        LoggerBuilder::new()
    }

    pub fn flags(&self) -> Flags {
        self.shared.flags()
    }

    /// 该级别当前是否启用
    pub fn enabled(&self, level: Level) -> bool {
        self.flags().enables(level)
    }

    pub fn object_name(&self) -> String {
        self.shared.state.lock().obj.clone()
    }

    /// 异步队列中尚未写出的记录数
    pub fn pending(&self) -> usize {
        self.worker.as_ref().map_or(0, RecordWorker::pending)
    }

    /// 格式化并投递一条记录
    ///
    /// caller 为 None 表示无法确定调用位置，此时记录被静默丢弃并返回 Ok。
    pub fn output(&self, level: Level, caller: Option<&Location<'_>>, content: &str) -> Result<(), LogError> {
        let Some(caller) = caller else {
            return Ok(());
        };

        let now = Local::now();
        let flags = self.flags();
        let buf = format_record(flags, level.name(), now, caller.file(), caller.line(), content);

        if level >= Level::Warn {
            if let Some(alert) = &self.alert {
                alert.dispatch(self.object_name(), buf.clone());
            }
        }

        match &self.worker {
            Some(worker) if flags.contains(Flags::ASYNC) => worker.send(buf),
            _ => self.write_sync(&buf, now),
        }
    }

    fn write_sync(&self, buf: &[u8], now: DateTime<Local>) -> Result<(), LogError> {
        let mut guard = self.shared.state.lock();
        let State { obj, dir, out, file } = &mut *guard;

        self.shared.roll_over(dir.as_deref(), obj, file, now)?;
        file.write_all(buf)?;
        if let Some(out) = out.as_mut() {
            out.write_all(buf)?;
            out.flush()?;
        }
        Ok(())
    }

    fn emit(&self, level: Level, caller: &Location<'_>, content: &str) {
        if let Err(e) = self.output(level, Some(caller), content) {
            eprintln!("[logd] 日志输出失败: {}", e);
        }
    }

    /// 等待异步队列排空
    pub fn wait_flush(&self) {
        if let Some(worker) = &self.worker {
            worker.wait_flush();
        }
    }

    /// 排空队列后调用退出函数
    pub fn exit(&self, code: i32) {
        self.wait_flush();
        (self.exit_hook)(code);
    }

    // print

    #[track_caller]
    pub fn print(&self, msg: &str) {
        self.emit(Level::Info, Location::caller(), msg);
    }

    #[track_caller]
    pub fn printf(&self, args: fmt::Arguments<'_>) {
        self.emit(Level::Info, Location::caller(), &args.to_string());
    }

    // debug

    #[track_caller]
    pub fn debug(&self, msg: &str) {
        if self.enabled(Level::Debug) {
            self.emit(Level::Debug, Location::caller(), msg);
        }
    }

    #[track_caller]
    pub fn debugf(&self, args: fmt::Arguments<'_>) {
        if self.enabled(Level::Debug) {
            self.emit(Level::Debug, Location::caller(), &args.to_string());
        }
    }

    // info

    #[track_caller]
    pub fn info(&self, msg: &str) {
        if self.enabled(Level::Info) {
            self.emit(Level::Info, Location::caller(), msg);
        }
    }

    #[track_caller]
    pub fn infof(&self, args: fmt::Arguments<'_>) {
        if self.enabled(Level::Info) {
            self.emit(Level::Info, Location::caller(), &args.to_string());
        }
    }

    // warn

    #[track_caller]
    pub fn warn(&self, msg: &str) {
        if self.enabled(Level::Warn) {
            self.emit(Level::Warn, Location::caller(), msg);
        }
    }

    #[track_caller]
    pub fn warnf(&self, args: fmt::Arguments<'_>) {
        if self.enabled(Level::Warn) {
            self.emit(Level::Warn, Location::caller(), &args.to_string());
        }
    }

    // error，附带调用栈

    #[track_caller]
    pub fn error(&self, msg: &str) {
        if self.enabled(Level::Error) {
            self.emit(Level::Error, Location::caller(), &format!("{}\n{}", msg, caller_stack()));
        }
    }

    #[track_caller]
    pub fn errorf(&self, args: fmt::Arguments<'_>) {
        if self.enabled(Level::Error) {
            self.emit(Level::Error, Location::caller(), &format!("{}\n{}", args, caller_stack()));
        }
    }

    // fatal，不受级别过滤，输出后退出进程

    #[track_caller]
    pub fn fatal(&self, msg: &str) {
        self.emit(Level::Fatal, Location::caller(), msg);
        self.exit(1);
    }

    #[track_caller]
    pub fn fatalf(&self, args: fmt::Arguments<'_>) {
        self.emit(Level::Fatal, Location::caller(), &args.to_string());
        self.exit(1);
    }

    /// 在调用处打一条 DEBUG 标记，不受级别过滤
    #[track_caller]
    pub fn breakpoint(&self) {
        self.emit(Level::Debug, Location::caller(), "breakpoint");
    }

    // 配置修改，均在锁内完成

    pub fn set_output<W: Write + Send + 'static>(&self, out: W) {
        self.shared.state.lock().out = Some(Box::new(out));
    }

    /// 关闭输出流，只写文件
    pub fn clear_output(&self) {
        self.shared.state.lock().out = None;
    }

    pub fn set_obj(&self, obj: impl Into<String>) {
        self.shared.state.lock().obj = obj.into();
    }

    /// 空路径表示不输出到文件
    pub fn set_log_dir(&self, dir: impl Into<PathBuf>) {
        let dir = dir.into();
        self.shared.set_log_dir((!dir.as_os_str().is_empty()).then_some(dir));
    }

    /// 启用 level 及更严重的级别，保留行为位
    pub fn set_level(&self, level: Level) {
        let _state = self.shared.state.lock();
        self.shared.store_flags(self.shared.flags().with_threshold(level));
    }

    pub fn set_flags(&self, flags: Flags) {
        let _state = self.shared.state.lock();
        self.shared.store_flags(flags);
    }
}

impl fmt::Debug for Logger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Logger")
            .field("flags", &self.flags())
            .field("async", &self.worker.is_some())
            .field("alert", &self.alert.is_some())
            .finish()
    }
}

/// 日志构建器
pub struct LoggerBuilder {
    config: LogConfig,
    output: Option<Box<dyn Write + Send>>,
    alert: Option<Arc<dyn AlertSink>>,
    exit_hook: Option<ExitHook>,
}

impl LoggerBuilder {
    /// 创建新的日志构建器
    pub fn new() -> Self {
        Self::from_config(LogConfig::default())
    }

    pub fn from_config(config: LogConfig) -> Self {
        Self {
            config,
            output: None,
            alert: None,
            exit_hook: None,
        }
    }

    pub fn with_flags(mut self, flags: Flags) -> Self {
        self.config.flags = flags;
        self
    }

    /// 设置级别阈值，保留其它标志位
    pub fn with_level(mut self, level: Level) -> Self {
        self.config.flags = self.config.flags.with_threshold(level);
        self
    }

    pub fn with_channel_len(mut self, len: usize) -> Self {
        self.config.channel_len = len;
        self
    }

    pub fn with_log_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.log_dir = Some(dir.into());
        self
    }

    pub fn with_object_name(mut self, name: impl Into<String>) -> Self {
        self.config.object_name = Some(name.into());
        self
    }

    pub fn with_compression(mut self, compression: Compression) -> Self {
        self.config.compression = compression;
        self
    }

    /// 是否在没有自定义输出时写 stdout
    pub fn with_stdout(mut self, enabled: bool) -> Self {
        self.config.stdout = enabled;
        self
    }

    /// 自定义输出，优先于 stdout
    pub fn with_output<W: Write + Send + 'static>(mut self, out: W) -> Self {
        self.output = Some(Box::new(out));
        self
    }

    pub fn with_smtp(mut self, smtp: SmtpConfig) -> Self {
        self.config.smtp = Some(smtp);
        self
    }

    /// 自定义告警通道，优先于 SMTP 配置
    pub fn with_alert_sink<S: AlertSink>(mut self, sink: S) -> Self {
        self.alert = Some(Arc::new(sink));
        self
    }

    pub fn with_exit_hook<F>(mut self, hook: F) -> Self
    where
        F: Fn(i32) + Send + Sync + 'static,
    {
        self.exit_hook = Some(Arc::new(hook));
        self
    }

    /// 构建日志器，异步模式下启动唯一的消费线程
    pub fn build(self) -> Result<Logger, LogError> {
        self.config.validate().map_err(LogError::Config)?;
        let LoggerBuilder { config, output, alert, exit_hook } = self;

        let out = output.or_else(|| {
            config.stdout.then(|| Box::new(io::stdout()) as Box<dyn Write + Send>)
        });
        let state = State {
            obj: config.object_name.clone().unwrap_or_else(default_object_name),
            dir: config.log_dir.clone(),
            out,
            file: DailyFile::new(),
        };
        let shared = Arc::new(Shared::new(config.flags, state, config.compression));

        let worker = if config.flags.contains(Flags::ASYNC) {
            Some(RecordWorker::new(Arc::clone(&shared), config.channel_len)?)
        } else {
            None
        };

        let sink = alert.or_else(|| {
            config.smtp.clone().map(|smtp| Arc::new(SmtpMailer::new(smtp)) as Arc<dyn AlertSink>)
        });
        let alert = sink.map(AlertDispatcher::new).transpose()?;

        Ok(Logger {
            shared,
            worker,
            alert,
            exit_hook: exit_hook.unwrap_or_else(|| Arc::new(process_exit)),
        })
    }
}

impl Default for LoggerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// 获取全局默认日志器
pub fn std_logger() -> Arc<Logger> {
    STD.read().clone()
}

/// 替换全局默认日志器，返回旧实例
pub fn set_std_logger(logger: Logger) -> Arc<Logger> {
    std::mem::replace(&mut *STD.write(), Arc::new(logger))
}
