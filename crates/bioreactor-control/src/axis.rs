//! 速度轴共享控制器（旋转 / 蠕动泵共用骨架）
//!
//! 两个速度轴的区别只在单位换算、驱动器设置与节奏参数，
//! 由 [`SpeedProfile`] 注入；分段执行、加减速、暂停/恢复、
//! 停止与测量管线在这里统一实现。
//!
//! ## 线程模型
//!
//! `start()` 启动两条工作线程：运动线程按分段驱动设备并生产样本，
//! 落盘线程周期性抽干样本队列写入存储。控制方法（pause/resume/stop）
//! 只翻原子标志，运动线程在每个控制周期协作式响应。

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use arc_swap::ArcSwap;
use parking_lot::Mutex;
use tracing::{debug, error, info, warn};

use postep_protocol::{Direction, SettingsPatch};
use postep_usb::{DeviceManager, SharedDevice};

use crate::cancel::CancelFlags;
use crate::error::ControlError;
use crate::events::EventSink;
use crate::join::JoinTimeout;
use crate::measurement::{run_flush_loop, MeasurementQueue};
use crate::ramp::{ramp_down, ramp_to, RampOutcome};
use crate::storage::Storage;
use crate::types::{
    AxisSnapshot, Entry, EntryId, MeasurementSample, MotorStatus, MovementSegment, SamplePayload,
};

/// 运动线程的控制周期
pub const CONTROL_TICK: Duration = Duration::from_millis(50);

/// 暂停等待环的采样周期（零值样本）
pub const PAUSE_TICK: Duration = Duration::from_millis(200);

/// 停止时等待工作线程结束的上限
pub const WORKER_JOIN_TIMEOUT: Duration = Duration::from_secs(3);

/// 轴专属参数注入点
pub trait SpeedProfile: Send + Sync + 'static {
    /// 轴名（日志用）
    fn axis_name(&self) -> &'static str;

    /// 每次 start 前显式断言的驱动器设置
    fn settings_patch(&self) -> SettingsPatch;

    /// 加减速台阶延时
    fn ramp_delay(&self) -> Duration;

    /// 落盘周期
    fn flush_interval(&self) -> Duration;

    /// 轴单位（RPM）→ 设备速度单位
    fn device_speed(&self, magnitude: f64) -> u32;

    /// 设备速度单位 → 轴单位（样本与快照的取值）
    fn unit_value(&self, device_speed: f64) -> f64;

    /// 由设备速度生成样本负载
    fn sample(&self, device_speed: f64, direction: Direction) -> SamplePayload;
}

struct AxisShared<P: SpeedProfile> {
    profile: P,
    manager: Arc<DeviceManager>,
    storage: Arc<dyn Storage>,
    events: Arc<dyn EventSink>,
    queue: Arc<MeasurementQueue>,
    flags: CancelFlags,
    snapshot: ArcSwap<AxisSnapshot>,
    running: Arc<AtomicBool>,
    current_speed: AtomicU32,
}

impl<P: SpeedProfile> AxisShared<P> {
    fn publish(&self, f: impl FnOnce(&mut AxisSnapshot)) {
        let mut snap = (**self.snapshot.load()).clone();
        f(&mut snap);
        self.snapshot.store(Arc::new(snap));
    }

    fn current_speed(&self) -> u32 {
        self.current_speed.load(Ordering::Acquire)
    }

    fn push_sample(&self, entry_id: EntryId, device_speed: u32, direction: Direction, start: Instant) {
        self.queue.push(MeasurementSample {
            entry_id,
            payload: self.profile.sample(f64::from(device_speed), direction),
            time_s: start.elapsed().as_secs_f64(),
        });
    }

    /// 运动线程主体：异常路径收敛到 Error 快照，正常路径收敛到 Idle
    fn run_motion(&self, device: &SharedDevice, entry_id: EntryId, segments: &[MovementSegment]) {
        let result = self.drive_segments(device, entry_id, segments);
        match result {
            Ok(()) => {
                self.publish(|s| {
                    s.status = MotorStatus::Idle;
                    s.is_moving = false;
                    s.speed = 0.0;
                    s.active_entry_id = None;
                });
                info!(axis = self.profile.axis_name(), "motion finished");
            },
            Err(e) => {
                error!(axis = self.profile.axis_name(), "motion worker failed: {}", e);
                self.safe_stop(device);
                // 设备通信失败只标记轴状态，初始化状态保持
                self.publish(|s| {
                    s.status = MotorStatus::Error;
                    s.is_moving = false;
                    s.speed = 0.0;
                    s.active_entry_id = None;
                });
            },
        }
        self.current_speed.store(0, Ordering::Release);
        // 标志先于运行权归还复位，下一轮 start 不能看到残留标志
        self.flags.reset();
        self.running.store(false, Ordering::Release);
        self.events.on_stopped();
    }

    /// 尽力而为的安全停车（错误路径，忽略二次失败）
    fn safe_stop(&self, device: &SharedDevice) {
        let mut dev = device.lock();
        if let Err(e) = dev.set_requested_speed(0, Direction::Cw) {
            warn!("safe stop: zero speed failed: {}", e);
        }
        if let Err(e) = dev.stop_trajectory() {
            warn!("safe stop: stop trajectory failed: {}", e);
        }
        if let Err(e) = dev.run_sleep(false) {
            warn!("safe stop: sleep failed: {}", e);
        }
    }

    fn drive_segments(
        &self,
        device: &SharedDevice,
        entry_id: EntryId,
        segments: &[MovementSegment],
    ) -> Result<(), ControlError> {
        let start = Instant::now();
        let mut prev_direction = Direction::Cw;

        'segments: for (index, segment) in segments.iter().enumerate() {
            self.events.on_segment_started(index);
            let direction = segment.direction;
            let target = self.profile.device_speed(segment.magnitude);
            debug!(
                axis = self.profile.axis_name(),
                index, target, ?direction, "segment started"
            );

            let mut emit = |speed: u32| self.push_sample(entry_id, speed, direction, start);
            let (speed, outcome) = ramp_to(
                device,
                &self.flags,
                self.current_speed(),
                target,
                direction,
                prev_direction,
                self.profile.ramp_delay(),
                &mut emit,
            )?;
            self.current_speed.store(speed, Ordering::Release);
            prev_direction = direction;
            self.publish(|s| {
                s.direction = direction;
                s.speed = self.profile.unit_value(f64::from(speed));
            });
            if outcome == RampOutcome::Aborted && self.flags.stop_requested() {
                break 'segments;
            }

            let mut remaining = segment.duration_s;
            let mut seg_start = Instant::now();
            loop {
                if self.flags.stop_requested() {
                    break 'segments;
                }
                if self.flags.pause_requested() {
                    // 暂停瞬间的已运行时长，恢复时从剩余时长接着计
                    let elapsed_at_pause = seg_start.elapsed().as_secs_f64();
                    ramp_down(
                        device,
                        self.current_speed(),
                        direction,
                        self.profile.ramp_delay(),
                        &mut emit,
                    )?;
                    self.current_speed.store(0, Ordering::Release);
                    device.lock().run_sleep(false)?;
                    self.flags.mark_paused();
                    self.publish(|s| {
                        s.speed = 0.0;
                        s.is_moving = false;
                    });
                    info!(axis = self.profile.axis_name(), "paused");

                    loop {
                        if self.flags.stop_requested() {
                            break 'segments;
                        }
                        if self.flags.resume_requested() {
                            device.lock().run_sleep(true)?;
                            self.flags.mark_resumed();
                            self.publish(|s| s.is_moving = true);
                            let (speed, outcome) = ramp_to(
                                device,
                                &self.flags,
                                0,
                                target,
                                direction,
                                direction,
                                self.profile.ramp_delay(),
                                &mut emit,
                            )?;
                            self.current_speed.store(speed, Ordering::Release);
                            self.publish(|s| {
                                s.speed = self.profile.unit_value(f64::from(speed))
                            });
                            if outcome == RampOutcome::Aborted
                                && self.flags.stop_requested()
                            {
                                break 'segments;
                            }
                            if remaining > 0.0 {
                                remaining = (remaining - elapsed_at_pause).max(0.0);
                            }
                            seg_start = Instant::now();
                            info!(axis = self.profile.axis_name(), remaining, "resumed");
                            break;
                        }
                        std::thread::sleep(PAUSE_TICK);
                        emit(0);
                    }
                    continue;
                }

                let status = device.lock().read_stream()?;
                self.manager.update_position(status.position);
                self.publish(|s| s.position = status.position);
                emit(self.current_speed());

                if segment.duration_s > 0.0 && seg_start.elapsed().as_secs_f64() >= remaining {
                    break;
                }
                std::thread::sleep(CONTROL_TICK);
            }
        }

        let mut emit = |speed: u32| self.push_sample(entry_id, speed, prev_direction, start);
        ramp_down(
            device,
            self.current_speed(),
            prev_direction,
            self.profile.ramp_delay(),
            &mut emit,
        )?;
        self.current_speed.store(0, Ordering::Release);
        let mut dev = device.lock();
        dev.stop_trajectory()?;
        dev.run_sleep(false)?;
        Ok(())
    }
}

struct WorkerHandles {
    motion: Option<JoinHandle<()>>,
    flush: Option<JoinHandle<()>>,
}

/// 速度轴控制器
pub struct SpeedAxisController<P: SpeedProfile> {
    shared: Arc<AxisShared<P>>,
    workers: Mutex<WorkerHandles>,
}

impl<P: SpeedProfile> SpeedAxisController<P> {
    pub fn new(
        profile: P,
        manager: Arc<DeviceManager>,
        storage: Arc<dyn Storage>,
        events: Arc<dyn EventSink>,
    ) -> Self {
        SpeedAxisController {
            shared: Arc::new(AxisShared {
                profile,
                manager,
                storage,
                events,
                queue: Arc::new(MeasurementQueue::new()),
                flags: CancelFlags::new(),
                snapshot: ArcSwap::from_pointee(AxisSnapshot::default()),
                running: Arc::new(AtomicBool::new(false)),
                current_speed: AtomicU32::new(0),
            }),
            workers: Mutex::new(WorkerHandles {
                motion: None,
                flush: None,
            }),
        }
    }

    /// 轴初始化：读一帧实时流校准位置缓存
    pub fn initialize(&self) -> Result<(), ControlError> {
        let device = self.shared.manager.handle()?;
        let status = device.lock().read_stream()?;
        self.shared.manager.update_position(status.position);
        self.shared.publish(|s| {
            s.position = status.position;
            s.initialized = true;
        });
        info!(
            axis = self.shared.profile.axis_name(),
            position = status.position,
            "axis initialized"
        );
        Ok(())
    }

    /// 创建条目并把设备置入运行态（持有运行权的一方调用）
    fn prepare_start(
        &self,
        entry_name: &str,
        scenario_name: Option<&str>,
    ) -> Result<(EntryId, SharedDevice), ControlError> {
        let entry_id = self
            .shared
            .storage
            .create_entry(entry_name, scenario_name)?;
        let device = self.shared.manager.handle()?;
        {
            let mut dev = device.lock();
            dev.run_sleep(true)?;
            dev.patch_driver_settings(&self.shared.profile.settings_patch())?;
        }
        Ok((entry_id, device))
    }

    /// 按分段序列启动运动
    ///
    /// 运行权以原子交换抢占：并发调用至多一个获准，
    /// 其余返回 `Ok(false)` 且不改变任何状态（也不创建条目）。
    /// 获准方创建记录条目、断言轴专属驱动器设置、
    /// 启动运动与落盘线程后立刻返回 `Ok(true)`。
    pub fn start(
        &self,
        entry_name: &str,
        scenario_name: Option<&str>,
        segments: Vec<MovementSegment>,
    ) -> Result<bool, ControlError> {
        if self
            .shared
            .running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            warn!(
                axis = self.shared.profile.axis_name(),
                "start rejected: already moving"
            );
            return Ok(false);
        }

        let (entry_id, device) = match self.prepare_start(entry_name, scenario_name) {
            Ok(prepared) => prepared,
            Err(e) => {
                // 准备阶段失败必须交还运行权
                self.shared.running.store(false, Ordering::Release);
                return Err(e);
            },
        };

        self.shared.flags.reset();
        self.shared.publish(|s| {
            s.status = MotorStatus::Moving;
            s.is_moving = true;
            s.speed = 0.0;
            s.active_entry_id = Some(entry_id);
        });
        info!(
            axis = self.shared.profile.axis_name(),
            entry_id, "motion starting"
        );

        let mut workers = self.workers.lock();
        workers.motion = Some({
            let shared = self.shared.clone();
            let device = device.clone();
            std::thread::spawn(move || shared.run_motion(&device, entry_id, &segments))
        });
        workers.flush = Some({
            let queue = self.shared.queue.clone();
            let storage = self.shared.storage.clone();
            let events = self.shared.events.clone();
            let running = self.shared.running.clone();
            let interval = self.shared.profile.flush_interval();
            std::thread::spawn(move || run_flush_loop(queue, storage, events, running, interval))
        });
        Ok(true)
    }

    /// 请求暂停（仅运动中有效）
    pub fn pause(&self) -> bool {
        if self.status().is_moving && !self.shared.flags.is_paused() {
            self.shared.flags.request_pause();
            true
        } else {
            false
        }
    }

    /// 请求恢复（仅暂停中有效）
    ///
    /// 恢复总是从暂停的分段与剩余时长继续，
    /// `segment_index` 仅作接口兼容保留，传入的索引被忽略。
    pub fn resume(&self, segment_index: Option<usize>) -> bool {
        if let Some(index) = segment_index {
            debug!(
                axis = self.shared.profile.axis_name(),
                index, "segment index ignored on resume"
            );
        }
        if self.shared.flags.is_paused() {
            self.shared.flags.request_resume();
            true
        } else {
            false
        }
    }

    /// 停止运动并等待工作线程结束（有界 3 s）
    pub fn stop(&self) -> bool {
        let snap = self.status();
        if !snap.is_moving && !self.shared.flags.is_paused() {
            return false;
        }
        self.shared.flags.request_stop();
        let mut workers = self.workers.lock();
        if let Some(handle) = workers.motion.take() {
            handle.join_timeout(WORKER_JOIN_TIMEOUT);
        }
        if let Some(handle) = workers.flush.take() {
            handle.join_timeout(WORKER_JOIN_TIMEOUT);
        }
        self.shared.flags.reset();
        self.shared.publish(|s| {
            s.status = MotorStatus::Idle;
            s.is_moving = false;
            s.speed = 0.0;
            s.active_entry_id = None;
        });
        true
    }

    /// 无锁读取当前状态快照
    pub fn status(&self) -> AxisSnapshot {
        (**self.shared.snapshot.load()).clone()
    }

    /// 等待当前运动自然结束（测试与关停用）
    pub fn wait_idle(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        loop {
            let mut workers = self.workers.lock();
            let done = match (&workers.motion, &workers.flush) {
                (None, None) => true,
                _ => {
                    let motion_done = workers
                        .motion
                        .as_ref()
                        .is_none_or(JoinHandle::is_finished);
                    let flush_done =
                        workers.flush.as_ref().is_none_or(JoinHandle::is_finished);
                    if motion_done && flush_done {
                        workers.motion = None;
                        workers.flush = None;
                    }
                    motion_done && flush_done
                },
            };
            drop(workers);
            if done {
                return true;
            }
            if Instant::now() >= deadline {
                return false;
            }
            std::thread::sleep(Duration::from_millis(10));
        }
    }

    // 存储透传

    pub fn entries(&self) -> Result<Vec<Entry>, ControlError> {
        Ok(self.shared.storage.entries()?)
    }

    pub fn measurements(
        &self,
        entry_id: EntryId,
        limit: usize,
    ) -> Result<Vec<MeasurementSample>, ControlError> {
        Ok(self.shared.storage.measurements(entry_id, limit)?)
    }

    pub(crate) fn storage(&self) -> &Arc<dyn Storage> {
        &self.shared.storage
    }

    pub(crate) fn manager(&self) -> &Arc<DeviceManager> {
        &self.shared.manager
    }

    pub(crate) fn profile(&self) -> &P {
        &self.shared.profile
    }
}
