//! 生产者消费者模式实现
//! 所有调用方把格式化好的记录放入有界队列，唯一的后台线程按到达顺序写出

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::thread;
use std::time::Duration;
use chrono::{DateTime, Local};
use crossbeam_channel::{Sender, Receiver, bounded};

use crate::core::Shared;
use crate::error::LogError;
use crate::handler::DailyFile;

/// 后台写入线程
///
/// 当天的日志文件只归这个线程所有，写文件时不需要加锁。
pub struct RecordWorker {
    sender: Option<Sender<Vec<u8>>>,
    pending: Arc<AtomicUsize>,
    halted: Arc<AtomicBool>,
    worker_thread: Option<thread::JoinHandle<()>>,
}

impl RecordWorker {
    /// 创建队列并启动消费线程
    pub(crate) fn new(shared: Arc<Shared>, capacity: usize) -> Result<Self, LogError> {
        Self::with_clock(shared, capacity, Local::now)
    }

    /// 同 new，由 clock 决定记录写入哪一天的文件
    pub(crate) fn with_clock<C>(shared: Arc<Shared>, capacity: usize, clock: C) -> Result<Self, LogError>
    where
        C: Fn() -> DateTime<Local> + Send + 'static,
    {
        let (sender, receiver) = bounded(capacity);
        let pending = Arc::new(AtomicUsize::new(0));
        let halted = Arc::new(AtomicBool::new(false));

        let worker_pending = Arc::clone(&pending);
        let worker_halted = Arc::clone(&halted);
        let worker_thread = thread::Builder::new()
            .name("logd-worker".to_string())
            .spawn(move || Self::worker_thread(shared, receiver, worker_pending, worker_halted, clock))?;

        Ok(Self {
            sender: Some(sender),
            pending,
            halted,
            worker_thread: Some(worker_thread),
        })
    }

    fn worker_thread<C>(
        shared: Arc<Shared>,
        receiver: Receiver<Vec<u8>>,
        pending: Arc<AtomicUsize>,
        halted: Arc<AtomicBool>,
        clock: C,
    ) where
        C: Fn() -> DateTime<Local>,
    {
        let mut daily = DailyFile::new();
        // 上次持锁时看到的目录版本，以及当时是否设置了目录
        let mut seen: Option<(usize, bool)> = None;

        while let Ok(data) = receiver.recv() {
            let now = clock();
            let stale = match seen {
                Some((version, has_dir)) => {
                    version != shared.dir_version() || (has_dir && daily.needs_reopen(now.date_naive()))
                }
                None => true,
            };
            if stale {
                // 只在切换文件句柄的窗口内持锁
                let state = shared.state.lock();
                seen = Some((shared.dir_version(), state.dir.is_some()));
                if let Err(e) = shared.roll_over(state.dir.as_deref(), &state.obj, &mut daily, now) {
                    eprintln!("[logd-worker] 打开日志文件失败，消费线程停止: {}", e);
                    halted.store(true, Ordering::SeqCst);
                    pending.fetch_sub(1, Ordering::SeqCst);
                    return;
                }
            }

            if let Err(e) = daily.write_all(&data) {
                eprintln!("[logd-worker] 写入日志文件失败: {}", e);
            }
            if let Err(e) = shared.write_output(&data) {
                eprintln!("[logd-worker] 写入输出失败: {}", e);
            }

            pending.fetch_sub(1, Ordering::SeqCst);
        }
    }

    /// 放入队列，队列满时阻塞
    pub fn send(&self, data: Vec<u8>) -> Result<(), LogError> {
        let sender = self.sender.as_ref().ok_or(LogError::Disconnected)?;
        self.pending.fetch_add(1, Ordering::SeqCst);
        sender.send(data).map_err(|_| {
            self.pending.fetch_sub(1, Ordering::SeqCst);
            LogError::Disconnected
        })
    }

    /// 已入队但尚未写出的记录数
    pub fn pending(&self) -> usize {
        self.pending.load(Ordering::SeqCst)
    }

    /// 消费线程是否已因错误停止
    pub fn is_halted(&self) -> bool {
        self.halted.load(Ordering::SeqCst)
    }

    /// 轮询直到队列排空，调用前应停止产生新日志
    pub fn wait_flush(&self) {
        while self.pending() > 0 && !self.is_halted() {
            thread::sleep(Duration::from_micros(50));
        }
    }
}

impl Drop for RecordWorker {
    fn drop(&mut self) {
        // 关闭队列，消费线程写完剩余数据后退出
        drop(self.sender.take());

        if let Some(thread) = self.worker_thread.take() {
            let _ = thread.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::sync::atomic::AtomicI64;
    use chrono::Duration as ChronoDuration;
    use crate::core::tests::{shared_with_buffer, SharedBuffer};
    use crate::handler::file::dated_path;

    #[test]
    fn test_worker_preserves_order() {
        let buffer = SharedBuffer::default();
        let shared = shared_with_buffer(&buffer, None);
        let worker = RecordWorker::new(shared, 4).unwrap();

        for i in 0..100 {
            worker.send(format!("{}\n", i).into_bytes()).unwrap();
        }
        worker.wait_flush();
        assert_eq!(worker.pending(), 0);

        let expected: String = (0..100).map(|i| format!("{}\n", i)).collect();
        assert_eq!(buffer.contents(), expected);
    }

    #[test]
    fn test_worker_drains_on_drop() {
        let buffer = SharedBuffer::default();
        let shared = shared_with_buffer(&buffer, None);
        let worker = RecordWorker::new(shared, 16).unwrap();
        worker.send(b"last words\n".to_vec()).unwrap();
        drop(worker);
        assert_eq!(buffer.contents(), "last words\n");
    }

    #[test]
    fn test_worker_halts_when_file_cannot_open() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("missing");
        let buffer = SharedBuffer::default();
        let shared = shared_with_buffer(&buffer, Some(missing));
        let worker = RecordWorker::new(shared, 1).unwrap();

        worker.send(b"lost\n".to_vec()).unwrap();
        // 消费线程停止后不会永久阻塞
        worker.wait_flush();
        assert!(worker.is_halted());
        assert_eq!(buffer.contents(), "");

        let mut result = Ok(());
        for _ in 0..10 {
            result = worker.send(b"again\n".to_vec());
            if result.is_err() {
                break;
            }
        }
        assert!(matches!(result, Err(LogError::Disconnected)));
    }

    #[test]
    fn test_worker_switches_file_at_midnight() {
        let dir = tempfile::tempdir().unwrap();
        let buffer = SharedBuffer::default();
        let shared = shared_with_buffer(&buffer, Some(dir.path().to_path_buf()));

        // 时钟先停在昨天，再拨到今天
        let offset_days = Arc::new(AtomicI64::new(-1));
        let clock_offset = Arc::clone(&offset_days);
        let worker = RecordWorker::with_clock(shared, 4, move || {
            Local::now() + ChronoDuration::days(clock_offset.load(Ordering::SeqCst))
        })
        .unwrap();

        worker.send(b"late night\n".to_vec()).unwrap();
        worker.wait_flush();
        offset_days.store(0, Ordering::SeqCst);
        worker.send(b"next morning\n".to_vec()).unwrap();
        worker.wait_flush();

        let today = Local::now().date_naive();
        let yesterday = today - ChronoDuration::days(1);
        let old = fs::read_to_string(dated_path(dir.path(), "test", yesterday)).unwrap();
        let new = fs::read_to_string(dated_path(dir.path(), "test", today)).unwrap();
        assert_eq!(old, "late night\n");
        assert_eq!(new, "next morning\n");
        assert!(!worker.is_halted());
    }

    #[test]
    fn test_worker_stops_file_output_when_dir_cleared() {
        let dir = tempfile::tempdir().unwrap();
        let buffer = SharedBuffer::default();
        let shared = shared_with_buffer(&buffer, Some(dir.path().to_path_buf()));
        let worker = RecordWorker::new(Arc::clone(&shared), 4).unwrap();

        worker.send(b"before\n".to_vec()).unwrap();
        worker.wait_flush();
        shared.set_log_dir(None);
        worker.send(b"after\n".to_vec()).unwrap();
        worker.wait_flush();

        let path = dated_path(dir.path(), "test", Local::now().date_naive());
        assert_eq!(fs::read_to_string(path).unwrap(), "before\n");
        // 输出流不受影响
        assert_eq!(buffer.contents(), "before\nafter\n");
    }
}
