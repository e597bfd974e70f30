//! 事件协作接口
//!
//! 替代原生推送通道的抽象：上层（WebSocket、UI）实现 [`EventSink`]，
//! 控制层在关键节点调用。全部 fire-and-forget，
//! 实现方的失败绝不允许影响运动控制。

use crate::types::MeasurementSample;

/// 运动事件接收方
pub trait EventSink: Send + Sync {
    /// 分段开始执行
    fn on_segment_started(&self, _index: usize) {}

    /// 一批样本持久化成功
    fn on_samples(&self, _batch: &[MeasurementSample]) {}

    /// 运动结束（自然结束或被停止）
    fn on_stopped(&self) {}

    /// 倾斜场景完成了一个往返周期
    fn on_repetition(&self, _count: u32) {}
}

/// 丢弃所有事件的空实现
#[derive(Debug, Default, Clone, Copy)]
pub struct NullEventSink;

impl EventSink for NullEventSink {}
