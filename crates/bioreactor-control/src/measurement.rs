//! 测量缓冲管线
//!
//! 运动线程把样本推进互斥 FIFO，独立的落盘线程按固定间隔
//! 原子地抽干整个缓冲批量写入存储。写入失败时整批原样插回队头，
//! 顺序不变，下个周期连同新样本一起重试——样本恰好持久化一次，
//! 且保持生产顺序。

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tracing::warn;

use crate::events::EventSink;
use crate::storage::Storage;
use crate::types::MeasurementSample;

/// 互斥保护的样本 FIFO
#[derive(Default)]
pub struct MeasurementQueue {
    inner: Mutex<VecDeque<MeasurementSample>>,
}

impl MeasurementQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// 入队一个样本
    pub fn push(&self, sample: MeasurementSample) {
        self.inner.lock().push_back(sample);
    }

    /// 原子地取走当前全部缓冲样本（保持顺序）
    pub fn drain(&self) -> Vec<MeasurementSample> {
        self.inner.lock().drain(..).collect()
    }

    /// 把一个批次完整插回队头（持久化失败时）
    ///
    /// 批内顺序与原生产顺序一致，且排在其后入队的新样本之前。
    pub fn requeue_front(&self, batch: Vec<MeasurementSample>) {
        let mut queue = self.inner.lock();
        for sample in batch.into_iter().rev() {
            queue.push_front(sample);
        }
    }

    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().is_empty()
    }
}

/// 抽干一次缓冲并落盘，返回是否有样本被成功持久化
///
/// 失败批次重新排队且只记日志，绝不向运动线程传播。
pub fn flush_once(
    queue: &MeasurementQueue,
    storage: &dyn Storage,
    events: &dyn EventSink,
) -> bool {
    let batch = queue.drain();
    if batch.is_empty() {
        return false;
    }
    match storage.persist_measurements_batch(&batch) {
        Ok(_) => {
            events.on_samples(&batch);
            true
        },
        Err(e) => {
            warn!(batch_len = batch.len(), "measurement batch persist failed: {}", e);
            queue.requeue_front(batch);
            false
        },
    }
}

/// 落盘线程主体：`running` 为真时按 `interval` 周期落盘，
/// 退出前再做一次收尾抽干。
pub fn run_flush_loop(
    queue: Arc<MeasurementQueue>,
    storage: Arc<dyn Storage>,
    events: Arc<dyn EventSink>,
    running: Arc<AtomicBool>,
    interval: Duration,
) {
    while running.load(Ordering::Acquire) {
        flush_once(&queue, storage.as_ref(), events.as_ref());
        std::thread::sleep(interval);
    }
    flush_once(&queue, storage.as_ref(), events.as_ref());
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::NullEventSink;
    use crate::storage::MemoryStorage;
    use crate::types::{Direction, SamplePayload};

    fn sample(time_s: f64) -> MeasurementSample {
        MeasurementSample {
            entry_id: 1,
            payload: SamplePayload::Rotary {
                speed_rpm: 2.0,
                direction: Direction::Cw,
            },
            time_s,
        }
    }

    #[test]
    fn test_drain_preserves_order() {
        let queue = MeasurementQueue::new();
        for i in 0..5 {
            queue.push(sample(f64::from(i)));
        }
        let batch = queue.drain();
        assert_eq!(batch.len(), 5);
        assert!(batch.windows(2).all(|w| w[0].time_s < w[1].time_s));
        assert!(queue.is_empty());
    }

    #[test]
    fn test_requeue_front_keeps_failed_batch_before_new_samples() {
        let queue = MeasurementQueue::new();
        queue.push(sample(0.0));
        queue.push(sample(1.0));
        let failed = queue.drain();
        queue.push(sample(2.0));
        queue.requeue_front(failed);

        let times: Vec<f64> = queue.drain().iter().map(|s| s.time_s).collect();
        assert_eq!(times, vec![0.0, 1.0, 2.0]);
    }

    #[test]
    fn test_flush_failure_requeues_and_next_flush_persists() {
        let queue = MeasurementQueue::new();
        let storage = MemoryStorage::new();
        let entry = storage.create_entry("run", None).unwrap();
        let _ = entry;
        queue.push(sample(0.0));
        queue.push(sample(1.0));

        storage.fail_next_batches(1);
        assert!(!flush_once(&queue, &storage, &NullEventSink));
        assert_eq!(queue.len(), 2);

        queue.push(sample(2.0));
        assert!(flush_once(&queue, &storage, &NullEventSink));
        assert!(queue.is_empty());
        let persisted = storage.measurements(1, 100).unwrap();
        let times: Vec<f64> = persisted.iter().map(|s| s.time_s).collect();
        assert_eq!(times, vec![0.0, 1.0, 2.0]);
    }

    #[test]
    fn test_concurrent_writer_flusher_exactly_once() {
        let queue = Arc::new(MeasurementQueue::new());
        let storage = Arc::new(MemoryStorage::new());
        storage.create_entry("run", None).unwrap();
        let running = Arc::new(AtomicBool::new(true));

        let flusher = {
            let queue = queue.clone();
            let storage = storage.clone();
            let running = running.clone();
            std::thread::spawn(move || {
                run_flush_loop(
                    queue,
                    storage,
                    Arc::new(NullEventSink),
                    running,
                    Duration::from_millis(1),
                )
            })
        };

        for i in 0..1000 {
            queue.push(sample(f64::from(i)));
            if i % 97 == 0 {
                storage.fail_next_batches(1);
            }
        }
        running.store(false, Ordering::Release);
        flusher.join().unwrap();
        // 收尾时可能还压着未消费的注入失败，补抽到空为止
        while !queue.is_empty() {
            flush_once(&queue, storage.as_ref(), &NullEventSink);
        }

        let persisted = storage.measurements(1, 10_000).unwrap();
        assert_eq!(persisted.len(), 1000);
        // 顺序保持、无重复
        assert!(persisted.windows(2).all(|w| w[0].time_s < w[1].time_s));
    }
}
