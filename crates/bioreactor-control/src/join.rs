//! 有界超时的线程 join
//!
//! `std::thread::JoinHandle::join` 没有超时参数，
//! 这里借一条 crossbeam 通道把 join 挪到守护线程里做，
//! 调用方只在通道上等待有限时间。超时不是致命错误：
//! 工作线程被放生，之后自行结束。

use std::thread::JoinHandle;
use std::time::Duration;

use tracing::warn;

/// 带超时的 join 扩展
pub trait JoinTimeout {
    /// 等待线程结束至多 `timeout`，超时返回 false（线程被放生）
    fn join_timeout(self, timeout: Duration) -> bool;
}

impl JoinTimeout for JoinHandle<()> {
    fn join_timeout(self, timeout: Duration) -> bool {
        let (done_tx, done_rx) = crossbeam_channel::bounded::<()>(1);
        std::thread::spawn(move || {
            if self.join().is_err() {
                warn!("worker thread panicked before join");
            }
            let _ = done_tx.send(());
        });
        if done_rx.recv_timeout(timeout).is_ok() {
            true
        } else {
            warn!(?timeout, "worker did not finish in time, detaching");
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::JoinTimeout;
    use std::time::Duration;

    #[test]
    fn test_join_fast_thread() {
        let handle = std::thread::spawn(|| {});
        assert!(handle.join_timeout(Duration::from_secs(1)));
    }

    #[test]
    fn test_join_timeout_on_slow_thread() {
        let handle = std::thread::spawn(|| {
            std::thread::sleep(Duration::from_millis(500));
        });
        assert!(!handle.join_timeout(Duration::from_millis(20)));
    }
}
