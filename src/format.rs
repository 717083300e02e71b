//! 日志头格式化
//!
//! 格式: date, time(hour:minute:second.microsecond), [LEVEL], shortfile:line: <content>

use std::io::Write;
use chrono::{DateTime, Datelike, Local, Timelike, Utc};

use crate::config::Flags;

/// 终端颜色码
pub const RED: u8 = 91;
pub const GREEN: u8 = 92;
pub const YELLOW: u8 = 93;
pub const BLUE: u8 = 94;
pub const MAGENTA: u8 = 95;

const RESET: &str = "\x1b[0m";

/// 渲染带颜色的级别标签，未知级别原样输出
pub fn color_level(level: &str) -> String {
    let level = level.to_uppercase();
    let color = match level.as_str() {
        "DEBUG" => GREEN,
        "INFO" => BLUE,
        "WARN" => MAGENTA,
        "ERROR" => YELLOW,
        "FATAL" => RED,
        _ => return level,
    };
    format!("\x1b[{}m[{:>5}]{}", color, level, RESET)
}

/// 取路径最后一段
pub fn short_file(file: &str) -> &str {
    match file.rfind(['/', '\\']) {
        Some(idx) if idx > 0 => &file[idx + 1..],
        _ => file,
    }
}

/// 渲染日志头，纯函数
pub fn format_header(flags: Flags, level: &str, time: DateTime<Local>, file: &str, line: u32) -> Vec<u8> {
    let mut buf = Vec::with_capacity(64);

    if flags.intersects(Flags::DATE | Flags::TIME | Flags::MICROSECONDS) {
        // UTC 只影响时钟数值
        let t = if flags.contains(Flags::UTC) {
            time.with_timezone(&Utc).naive_local()
        } else {
            time.naive_local()
        };

        if flags.contains(Flags::DATE) {
            let _ = write!(buf, "{:04}/{:02}/{:02} ", t.year(), t.month(), t.day());
        }
        if flags.intersects(Flags::TIME | Flags::MICROSECONDS) {
            let _ = write!(buf, "{:02}:{:02}:{:02}", t.hour(), t.minute(), t.second());
            if flags.contains(Flags::MICROSECONDS) {
                let _ = write!(buf, ".{:06}", (t.nanosecond() / 1_000) % 1_000_000);
            }
            buf.push(b' ');
        }
    }

    buf.extend_from_slice(color_level(level).as_bytes());
    buf.push(b' ');

    if flags.intersects(Flags::SHORT_FILE | Flags::LONG_FILE) {
        let file = if flags.contains(Flags::SHORT_FILE) { short_file(file) } else { file };
        let _ = write!(buf, "{}:{}: ", file, line);
    }

    buf
}

/// 日志头 + 正文，保证以换行结尾
pub fn format_record(flags: Flags, level: &str, time: DateTime<Local>, file: &str, line: u32, content: &str) -> Vec<u8> {
    let mut buf = format_header(flags, level, time, file, line);
    buf.reserve(content.len() + 1);
    buf.extend_from_slice(content.as_bytes());
    if !content.ends_with('\n') {
        buf.push(b'\n');
    }
    buf
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn fixed_time() -> DateTime<Local> {
        Utc.with_ymd_and_hms(2024, 3, 7, 9, 5, 3)
            .unwrap()
            .checked_add_signed(chrono::Duration::microseconds(42))
            .unwrap()
            .with_timezone(&Local)
    }

    fn text(buf: Vec<u8>) -> String {
        String::from_utf8(buf).unwrap()
    }

    #[test]
    fn test_color_level() {
        assert_eq!(color_level("info"), "\x1b[94m[ INFO]\x1b[0m");
        assert_eq!(color_level("ERROR"), "\x1b[93m[ERROR]\x1b[0m");
        assert_eq!(color_level("FATAL"), "\x1b[91m[FATAL]\x1b[0m");
        assert_eq!(color_level("trace"), "TRACE");
    }

    #[test]
    fn test_short_file() {
        assert_eq!(short_file("/a/b/c/d.rs"), "d.rs");
        assert_eq!(short_file("src\\core.rs"), "core.rs");
        assert_eq!(short_file("d.rs"), "d.rs");
    }

    #[test]
    fn test_header_utc_full() {
        let flags = Flags::DATE | Flags::MICROSECONDS | Flags::SHORT_FILE | Flags::UTC;
        let header = text(format_header(flags, "WARN", fixed_time(), "src/db/mongo.rs", 88));
        assert_eq!(header, "2024/03/07 09:05:03.000042 \x1b[95m[ WARN]\x1b[0m mongo.rs:88: ");
    }

    #[test]
    fn test_header_long_file_only() {
        let header = text(format_header(Flags::LONG_FILE, "DEBUG", fixed_time(), "src/db/mongo.rs", 7));
        assert_eq!(header, "\x1b[92m[DEBUG]\x1b[0m src/db/mongo.rs:7: ");
    }

    #[test]
    fn test_header_without_location() {
        let header = text(format_header(Flags::TIME | Flags::UTC, "INFO", fixed_time(), "x.rs", 1));
        assert_eq!(header, "09:05:03 \x1b[94m[ INFO]\x1b[0m ");
    }

    #[test]
    fn test_header_is_deterministic() {
        let flags = Flags::STD | Flags::TIME;
        let first = format_header(flags, "ERROR", fixed_time(), "a/b.rs", 3);
        for _ in 0..10 {
            assert_eq!(format_header(flags, "ERROR", fixed_time(), "a/b.rs", 3), first);
        }
    }

    #[test]
    fn test_utc_flag_changes_only_clock() {
        let utc_time = Utc.with_ymd_and_hms(2024, 3, 7, 20, 30, 0).unwrap();
        let time = utc_time.with_timezone(&Local);
        let flags = Flags::DATE | Flags::TIME | Flags::SHORT_FILE;

        let local = text(format_header(flags, "INFO", time, "/x/d.rs", 12));
        let utc = text(format_header(flags | Flags::UTC, "INFO", time, "/x/d.rs", 12));

        let suffix = "\x1b[94m[ INFO]\x1b[0m d.rs:12: ";
        assert_eq!(utc, format!("2024/03/07 20:30:00 {}", suffix));
        assert_eq!(local, format!("{} {}", time.format("%Y/%m/%d %H:%M:%S"), suffix));
    }

    #[test]
    fn test_record_ends_with_newline() {
        let record = text(format_record(Flags::empty(), "INFO", fixed_time(), "a.rs", 1, "hello"));
        assert_eq!(record, "\x1b[94m[ INFO]\x1b[0m hello\n");
        let record = text(format_record(Flags::empty(), "INFO", fixed_time(), "a.rs", 1, "hello\n"));
        assert_eq!(record, "\x1b[94m[ INFO]\x1b[0m hello\n");
    }
}
