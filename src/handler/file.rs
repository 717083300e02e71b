//! 按天切分的日志文件与旧文件轮转

use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::process::Command;
use std::thread;
use std::time::{Duration, SystemTime};
use chrono::{DateTime, Local, NaiveDate};

use crate::config::Compression;

/// 日志文件后缀
pub const LOG_SUFFIX: &str = ".log";

const HOUR: u64 = 60 * 60;
/// 超过该时长的 .log 文件被压缩
pub const COMPRESS_AFTER_HOURS: u64 = 24;
/// 超过该时长的文件被删除
pub const DELETE_AFTER_HOURS: u64 = 24 * 30;

/// `<dir>/<obj>_<YYYY-MM-DD>.log`
pub fn dated_path(dir: &Path, obj: &str, date: NaiveDate) -> PathBuf {
    dir.join(format!("{}_{}{}", obj, date.format("%Y-%m-%d"), LOG_SUFFIX))
}

/// 当天的日志文件
///
/// 异步模式下只由后台消费线程持有，同步模式下位于日志器锁内。
#[derive(Debug, Default)]
pub struct DailyFile {
    file: Option<File>,
    opened_on: Option<NaiveDate>,
    dir: Option<PathBuf>,
}

impl DailyFile {
    pub fn new() -> Self {
        Self::default()
    }

    /// 没有打开的文件，或日期已经变化
    pub fn needs_reopen(&self, today: NaiveDate) -> bool {
        self.file.is_none() || self.opened_on != Some(today)
    }

    /// 打开（创建或追加，不截断）指定日期的文件
    pub fn open(&mut self, dir: &Path, obj: &str, date: NaiveDate) -> io::Result<PathBuf> {
        let path = dated_path(dir, obj, date);
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        self.file = Some(file);
        self.opened_on = Some(date);
        self.dir = Some(dir.to_path_buf());
        Ok(path)
    }

    /// 关闭当前文件，之后的写入被忽略
    pub fn close(&mut self) {
        self.file = None;
        self.opened_on = None;
        self.dir = None;
    }

    /// 需要时切换到今天的文件，返回是否打开了新文件
    ///
    /// dir 为 None 时关闭已打开的文件；目录变化时立即在新目录下打开。
    pub fn roll_over(&mut self, dir: Option<&Path>, obj: &str, now: DateTime<Local>) -> io::Result<bool> {
        let Some(dir) = dir else {
            self.close();
            return Ok(false);
        };

        let today = now.date_naive();
        if self.needs_reopen(today) || self.dir.as_deref() != Some(dir) {
            self.open(dir, obj, today)?;
            return Ok(true);
        }
        Ok(false)
    }

    pub fn write_all(&mut self, data: &[u8]) -> io::Result<()> {
        match self.file.as_mut() {
            Some(file) => file.write_all(data),
            None => Ok(()),
        }
    }

    pub fn is_open(&self) -> bool {
        self.file.is_some()
    }

    pub fn opened_on(&self) -> Option<NaiveDate> {
        self.opened_on
    }

    /// 改写当前文件的日期标记，用于模拟跨天
    #[cfg(test)]
    pub(crate) fn set_opened_on(&mut self, date: NaiveDate) {
        self.opened_on = Some(date);
    }
}

/// 文件年龄（按小时取整）
fn age_hours(now: SystemTime, modified: SystemTime) -> u64 {
    now.duration_since(modified).unwrap_or(Duration::ZERO).as_secs() / HOUR
}

/// 压缩单个文件，原文件被压缩产物替换
pub fn compress_file(path: &Path, compression: Compression) -> io::Result<PathBuf> {
    let mut target = path.as_os_str().to_owned();
    target.push(".");
    target.push(compression.extension());
    let target = PathBuf::from(target);

    match compression {
        Compression::Gzip => {
            let status = Command::new("gzip").arg(path).status()?;
            if !status.success() {
                return Err(io::Error::new(
                    io::ErrorKind::Other,
                    format!("gzip {} 失败: {}", path.display(), status),
                ));
            }
        }
        Compression::Lz4 => {
            let mut source = File::open(path)?;
            let mut encoder = lz4::EncoderBuilder::new().level(4).build(File::create(&target)?)?;
            io::copy(&mut source, &mut encoder)?;
            let (_, result) = encoder.finish();
            result?;
            fs::remove_file(path)?;
        }
    }
    Ok(target)
}

/// 遍历目录：删除超过 30 天的文件，压缩超过 24 小时的 .log 文件
///
/// 遇到第一个错误即中止本次遍历，剩余文件留待下一次轮转。
pub fn rotate_dir(dir: &Path, now: SystemTime, compression: Compression) -> io::Result<()> {
    let mut entries = fs::read_dir(dir)?.collect::<io::Result<Vec<_>>>()?;
    entries.sort_by_key(|entry| entry.file_name());

    for entry in entries {
        let metadata = entry.metadata()?;
        if !metadata.is_file() {
            continue;
        }
        let age = age_hours(now, metadata.modified()?);
        let path = entry.path();

        if age > DELETE_AFTER_HOURS {
            fs::remove_file(&path)?;
        } else if age > COMPRESS_AFTER_HOURS && entry.file_name().to_string_lossy().ends_with(LOG_SUFFIX) {
            compress_file(&path, compression)?;
        }
    }
    Ok(())
}

/// 在独立线程上执行轮转，不阻塞日志写入，也不等待其结果
pub fn spawn_rotation(dir: PathBuf, now: SystemTime, compression: Compression) {
    let spawned = thread::Builder::new()
        .name("logd-rotate".to_string())
        .spawn(move || {
            if let Err(e) = rotate_dir(&dir, now, compression) {
                eprintln!("[logd-rotate] 轮转 {} 失败: {}", dir.display(), e);
            }
        });
    if let Err(e) = spawned {
        eprintln!("[logd-rotate] 启动轮转线程失败: {}", e);
    }
}
