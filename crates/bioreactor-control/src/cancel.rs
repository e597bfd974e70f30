//! 协作式取消标志
//!
//! stop / pause / resume 三个原子标志由外部调用方置位，
//! 工作线程在每个控制周期与每个加减速台阶检查，
//! 检查顺序固定为 stop → pause → resume。

use std::sync::atomic::{AtomicBool, Ordering};

/// 轴的取消/暂停标志组
#[derive(Debug, Default)]
pub struct CancelFlags {
    stop: AtomicBool,
    pause: AtomicBool,
    resume: AtomicBool,
    paused: AtomicBool,
}

impl CancelFlags {
    pub fn new() -> Self {
        Self::default()
    }

    /// 请求停止（优先级最高，压过 pause/resume）
    pub fn request_stop(&self) {
        self.stop.store(true, Ordering::Release);
    }

    /// 请求暂停，同时清掉未消费的 resume
    pub fn request_pause(&self) {
        self.resume.store(false, Ordering::Release);
        self.pause.store(true, Ordering::Release);
    }

    /// 请求恢复，同时清掉未消费的 pause
    pub fn request_resume(&self) {
        self.pause.store(false, Ordering::Release);
        self.resume.store(true, Ordering::Release);
    }

    pub fn stop_requested(&self) -> bool {
        self.stop.load(Ordering::Acquire)
    }

    pub fn pause_requested(&self) -> bool {
        self.pause.load(Ordering::Acquire)
    }

    pub fn resume_requested(&self) -> bool {
        self.resume.load(Ordering::Acquire)
    }

    /// 工作线程确认进入暂停态（消费 pause 请求）
    pub fn mark_paused(&self) {
        self.pause.store(false, Ordering::Release);
        self.paused.store(true, Ordering::Release);
    }

    /// 工作线程确认离开暂停态（消费 resume 请求）
    pub fn mark_resumed(&self) {
        self.resume.store(false, Ordering::Release);
        self.paused.store(false, Ordering::Release);
    }

    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::Acquire)
    }

    /// 全部清零（运动结束或停止完成后）
    pub fn reset(&self) {
        self.stop.store(false, Ordering::Release);
        self.pause.store(false, Ordering::Release);
        self.resume.store(false, Ordering::Release);
        self.paused.store(false, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::CancelFlags;

    #[test]
    fn test_pause_clears_resume() {
        let flags = CancelFlags::new();
        flags.request_resume();
        flags.request_pause();
        assert!(flags.pause_requested());
        assert!(!flags.resume_requested());
    }

    #[test]
    fn test_resume_clears_pause() {
        let flags = CancelFlags::new();
        flags.request_pause();
        flags.request_resume();
        assert!(flags.resume_requested());
        assert!(!flags.pause_requested());
    }

    #[test]
    fn test_mark_paused_consumes_request() {
        let flags = CancelFlags::new();
        flags.request_pause();
        flags.mark_paused();
        assert!(!flags.pause_requested());
        assert!(flags.is_paused());
        flags.request_resume();
        flags.mark_resumed();
        assert!(!flags.is_paused());
    }

    #[test]
    fn test_reset_clears_everything() {
        let flags = CancelFlags::new();
        flags.request_stop();
        flags.request_pause();
        flags.mark_paused();
        flags.reset();
        assert!(!flags.stop_requested());
        assert!(!flags.pause_requested());
        assert!(!flags.is_paused());
    }
}
