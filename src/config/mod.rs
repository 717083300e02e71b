//! 配置模块 - 级别/标志位定义与构造期配置

use serde::{Serialize, Deserialize};
use std::fmt;
use std::ops::{BitAnd, BitOr, BitOrAssign, Not};
use std::path::PathBuf;

/// 日志级别
///
/// 每个级别在 [`Flags`] 中占用一个独立的位，而不是一个数值序号。
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Level {
    Debug,
    Info,
    Warn,
    Error,
    Fatal,
}

impl Level {
    /// 所有级别，从最低到最高
    pub const ALL: [Level; 5] = [Level::Debug, Level::Info, Level::Warn, Level::Error, Level::Fatal];

    /// 该级别对应的标志位
    pub fn bit(self) -> Flags {
        Flags(1 << self as u32)
    }

    /// 从标志位反查级别
    pub fn from_bit(bit: Flags) -> Option<Level> {
        Level::ALL.into_iter().find(|level| level.bit() == bit)
    }

    pub fn name(self) -> &'static str {
        match self {
            Level::Debug => "DEBUG",
            Level::Info => "INFO",
            Level::Warn => "WARN",
            Level::Error => "ERROR",
            Level::Fatal => "FATAL",
        }
    }
}

impl fmt::Display for Level {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// 级别与行为标志位
///
/// 低 5 位是级别位，其余为格式/投递行为位，两者互不影响。
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Flags(u32);

impl Flags {
    pub const DEBUG: Flags = Flags(1 << 0);
    pub const INFO: Flags = Flags(1 << 1);
    pub const WARN: Flags = Flags(1 << 2);
    pub const ERROR: Flags = Flags(1 << 3);
    pub const FATAL: Flags = Flags(1 << 4);
    /// 异步输出日志
    pub const ASYNC: Flags = Flags(1 << 5);
    /// 2006/01/02
    pub const DATE: Flags = Flags(1 << 6);
    /// 15:04:05
    pub const TIME: Flags = Flags(1 << 7);
    /// 15:04:05.123123
    pub const MICROSECONDS: Flags = Flags(1 << 8);
    /// /a/b/c/d.rs:23
    pub const LONG_FILE: Flags = Flags(1 << 9);
    /// d.rs:23
    pub const SHORT_FILE: Flags = Flags(1 << 10);
    /// 时间以 UTC 输出
    pub const UTC: Flags = Flags(1 << 11);
    /// 按天轮转并清理旧文件
    pub const DAILY: Flags = Flags(1 << 12);

    pub const ALL: Flags = Flags(0b1_1111);
    /// 2020/01/02 15:00:01.123412 d.rs:23
    pub const STD: Flags = Flags(Self::DATE.0 | Self::MICROSECONDS.0 | Self::SHORT_FILE.0 | Self::ALL.0);

    pub const fn empty() -> Flags {
        Flags(0)
    }

    pub const fn from_bits(bits: u32) -> Flags {
        Flags(bits)
    }

    pub const fn bits(self) -> u32 {
        self.0
    }

    pub const fn contains(self, other: Flags) -> bool {
        self.0 & other.0 == other.0
    }

    pub(crate) const fn intersects(self, other: Flags) -> bool {
        self.0 & other.0 != 0
    }

    /// 该级别是否启用
    pub const fn enables(self, level: Level) -> bool {
        self.0 & (1 << level as u32) != 0
    }

    /// 单调阈值过滤：启用 level 及所有更严重的级别，关闭更低的级别，保留行为位
    pub fn with_threshold(self, level: Level) -> Flags {
        let shift = level as u32;
        Flags(((self.0 >> shift) | (Self::ALL.0 >> shift)) << shift)
    }
}

impl BitOr for Flags {
    type Output = Flags;

    fn bitor(self, rhs: Flags) -> Flags {
        Flags(self.0 | rhs.0)
    }
}

impl BitOrAssign for Flags {
    fn bitor_assign(&mut self, rhs: Flags) {
        self.0 |= rhs.0;
    }
}

impl BitAnd for Flags {
    type Output = Flags;

    fn bitand(self, rhs: Flags) -> Flags {
        Flags(self.0 & rhs.0)
    }
}

impl Not for Flags {
    type Output = Flags;

    fn not(self) -> Flags {
        Flags(!self.0)
    }
}

impl fmt::Debug for Flags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        const NAMES: [(Flags, &str); 13] = [
            (Flags::DEBUG, "DEBUG"),
            (Flags::INFO, "INFO"),
            (Flags::WARN, "WARN"),
            (Flags::ERROR, "ERROR"),
            (Flags::FATAL, "FATAL"),
            (Flags::ASYNC, "ASYNC"),
            (Flags::DATE, "DATE"),
            (Flags::TIME, "TIME"),
            (Flags::MICROSECONDS, "MICROSECONDS"),
            (Flags::LONG_FILE, "LONG_FILE"),
            (Flags::SHORT_FILE, "SHORT_FILE"),
            (Flags::UTC, "UTC"),
            (Flags::DAILY, "DAILY"),
        ];
        let names: Vec<&str> = NAMES
            .iter()
            .filter(|(flag, _)| self.contains(*flag))
            .map(|(_, name)| *name)
            .collect();
        write!(f, "Flags({:#x}: {})", self.0, names.join(" | "))
    }
}

/// 旧日志压缩方式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Compression {
    /// 调用外部 gzip 命令，生成 .gz
    #[default]
    Gzip,
    /// 进程内 lz4 压缩，生成 .lz4
    Lz4,
}

impl Compression {
    pub fn extension(self) -> &'static str {
        match self {
            Compression::Gzip => "gz",
            Compression::Lz4 => "lz4",
        }
    }
}

/// SMTP 告警配置
#[derive(Clone, Serialize, Deserialize)]
pub struct SmtpConfig {
    /// 发件箱: xx@163.com
    pub from: String,
    /// 发件授权码
    pub key: String,
    /// 主机地址: smtp.example.com
    pub host: String,
    /// 主机端口: 465
    pub port: u16,
    /// 收件人列表
    pub to: Vec<String>,
    /// 邮件标题
    pub subject: String,
}

impl Default for SmtpConfig {
    fn default() -> Self {
        Self {
            from: String::new(),
            key: String::new(),
            host: String::new(),
            port: 465,
            to: Vec::new(),
            subject: "告警[logd]".to_string(),
        }
    }
}

impl fmt::Debug for SmtpConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SmtpConfig")
            .field("from", &self.from)
            .field("key", &"<redacted>")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("to", &self.to)
            .field("subject", &self.subject)
            .finish()
    }
}

/// 日志器配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// 是否输出到标准输出
    pub stdout: bool,
    /// 日志输出目录，为空不输出到文件
    pub log_dir: Option<PathBuf>,
    /// 异步队列容量
    pub channel_len: usize,
    /// 级别与行为标志位
    pub flags: Flags,
    /// 日志对象名，为空时取工作目录名
    pub object_name: Option<String>,
    /// 旧日志压缩方式
    pub compression: Compression,
    /// 告警邮件
    pub smtp: Option<SmtpConfig>,
}

impl LogConfig {
    /// 验证配置的有效性
    pub fn validate(&self) -> Result<(), String> {
        if self.flags.contains(Flags::ASYNC) && self.channel_len == 0 {
            return Err("配置错误: 异步模式下队列容量不能为 0".to_string());
        }
        if let Some(smtp) = &self.smtp {
            if smtp.host.is_empty() {
                return Err("配置错误: SMTP 主机地址不能为空".to_string());
            }
            if smtp.to.is_empty() {
                return Err("配置错误: 告警收件人不能为空".to_string());
            }
        }
        Ok(())
    }
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            stdout: true,
            log_dir: None,
            channel_len: 1000,
            flags: Flags::STD,
            object_name: None,
            compression: Compression::Gzip,
            smtp: None,
        }
    }
}
