//! 倾斜轴控制器
//!
//! 位置轴：目标以度给出，经微步与减速比换算成设备步数，
//! 用轨迹移动（而非恒速）驱动。场景执行完整往返周期
//! （max → 0 → min → 0，带三段驻留），周期数可计数或无限。

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use arc_swap::ArcSwap;
use parking_lot::Mutex;
use tracing::{debug, error, info, warn};

use postep_protocol::{Direction, MotionLimits, SettingsPatch};
use postep_usb::{DeviceManager, SharedDevice};

use crate::cancel::CancelFlags;
use crate::error::ControlError;
use crate::events::EventSink;
use crate::join::JoinTimeout;
use crate::measurement::{run_flush_loop, MeasurementQueue};
use crate::storage::Storage;
use crate::types::{
    AxisSnapshot, EndPosition, Entry, EntryId, MeasurementSample, MotorStatus, SamplePayload,
    TiltScenario,
};

/// 步进电机整步角（度）
pub const STEPPER_STEP_ANGLE: f64 = 1.8;

/// 倾斜机构减速比
pub const GEAR_RATIO: f64 = 50.0;

/// 位置轮询周期
pub const POSITION_TICK: Duration = Duration::from_millis(10);

/// 归位恒速
pub const HOMING_SPEED: u32 = 400;

/// 归位后反向退开限位开关的时长
pub const HOMING_BACKOFF: Duration = Duration::from_millis(900);

/// 倾斜轴落盘周期
pub const TILT_FLUSH_INTERVAL: Duration = Duration::from_millis(200);

/// 停止时等待工作线程结束的上限
const WORKER_JOIN_TIMEOUT: Duration = Duration::from_secs(3);

/// 倾斜轴行程配置（度）
#[derive(Debug, Clone, Copy)]
pub struct TiltConfig {
    pub min_tilt_deg: i32,
    pub max_tilt_deg: i32,
}

impl Default for TiltConfig {
    fn default() -> Self {
        // 默认行程宽到等同于不限位
        TiltConfig {
            min_tilt_deg: -2_000_000,
            max_tilt_deg: 2_000_000,
        }
    }
}

/// 微步细分对应的每度步数：2^µstep / 1.8
pub fn steps_per_degree(microstepping: u8) -> f64 {
    1.0 / (STEPPER_STEP_ANGLE / f64::from(1u32 << microstepping))
}

struct TiltShared {
    manager: Arc<DeviceManager>,
    storage: Arc<dyn Storage>,
    events: Arc<dyn EventSink>,
    queue: Arc<MeasurementQueue>,
    flags: CancelFlags,
    snapshot: ArcSwap<AxisSnapshot>,
    running: Arc<AtomicBool>,
    config: TiltConfig,
    /// 当前微步下的每度步数（start/home 时更新）
    calculated_steps: Mutex<f64>,
    /// 正在记录的条目与运动起点时刻
    recording: Mutex<Option<(EntryId, Instant)>>,
}

impl TiltShared {
    fn publish(&self, f: impl FnOnce(&mut AxisSnapshot)) {
        let mut snap = (**self.snapshot.load()).clone();
        f(&mut snap);
        self.snapshot.store(Arc::new(snap));
    }

    fn snapshot(&self) -> AxisSnapshot {
        (**self.snapshot.load()).clone()
    }

    /// 行程边界换算到设备步数
    fn bounds_steps(&self) -> (i32, i32) {
        let steps = *self.calculated_steps.lock();
        (
            (f64::from(self.config.min_tilt_deg) * steps * GEAR_RATIO) as i32,
            (f64::from(self.config.max_tilt_deg) * steps * GEAR_RATIO) as i32,
        )
    }

    fn push_angle_sample(&self, position: i32) {
        let Some((entry_id, start)) = *self.recording.lock() else {
            return;
        };
        let steps = *self.calculated_steps.lock();
        self.queue.push(MeasurementSample {
            entry_id,
            payload: SamplePayload::Tilt {
                angle: f64::from(position) / steps / GEAR_RATIO,
                state: self.snapshot().status,
            },
            time_s: start.elapsed().as_secs_f64(),
        });
    }

    /// 轨迹移动到目标步数并轮询到位
    ///
    /// 每个轮询周期产一个角度样本（有记录条目时）。
    /// 暂停会停掉轨迹并原地等待，恢复时重发轨迹并重置期限。
    fn move_to(
        &self,
        device: &SharedDevice,
        target: i32,
        timeout: Duration,
    ) -> Result<(), ControlError> {
        let (min_steps, max_steps) = self.bounds_steps();
        if target < min_steps || target > max_steps {
            return Err(ControlError::OutOfRange {
                target,
                min: min_steps,
                max: max_steps,
            });
        }

        device.lock().move_to(target)?;
        let mut deadline = Some(Instant::now() + timeout);
        loop {
            if self.flags.stop_requested() {
                break;
            }
            if self.flags.pause_requested() {
                device.lock().stop_trajectory()?;
                self.flags.mark_paused();
                self.publish(|s| s.is_moving = false);
                deadline = None;
                info!("tilt paused mid-move");
            }
            if self.flags.resume_requested() && self.flags.is_paused() {
                device.lock().move_to(target)?;
                self.flags.mark_resumed();
                self.publish(|s| s.is_moving = true);
                deadline = Some(Instant::now() + timeout);
                info!("tilt resumed mid-move");
            }

            let status = device.lock().read_stream()?;
            self.manager.update_position(status.position);
            self.publish(|s| s.position = status.position);
            self.push_angle_sample(status.position);
            if status.position == target {
                break;
            }

            if let Some(deadline) = deadline {
                if Instant::now() > deadline {
                    device.lock().stop_trajectory()?;
                    warn!(target, "tilt move timed out");
                    return Err(ControlError::Timeout { target });
                }
            }
            std::thread::sleep(POSITION_TICK);
        }
        Ok(())
    }

    /// 驻留等待：可被暂停挂起、被停止打断
    ///
    /// 返回 false 表示观测到停止。
    fn standstill(&self, duration_s: f64) -> bool {
        let deadline = Instant::now() + Duration::from_secs_f64(duration_s.max(0.0));
        loop {
            if self.flags.stop_requested() {
                return false;
            }
            if self.flags.pause_requested() {
                self.flags.mark_paused();
                self.publish(|s| s.is_moving = false);
            }
            if self.flags.is_paused() {
                if self.flags.resume_requested() {
                    self.flags.mark_resumed();
                    self.publish(|s| s.is_moving = true);
                } else {
                    std::thread::sleep(Duration::from_millis(50));
                    continue;
                }
            }
            if Instant::now() >= deadline {
                return true;
            }
            std::thread::sleep(Duration::from_millis(50));
        }
    }

    /// 场景线程主体：周期数计数的完整往返
    fn run_scenario(&self, device: &SharedDevice, scenario: &TiltScenario) {
        if let Err(e) = self.drive_scenario(device, scenario) {
            error!("tilt scenario worker failed: {}", e);
            let mut dev = device.lock();
            if let Err(e) = dev.stop_trajectory() {
                warn!("safe stop: stop trajectory failed: {}", e);
            }
            if let Err(e) = dev.run_sleep(false) {
                warn!("safe stop: sleep failed: {}", e);
            }
            drop(dev);
            self.publish(|s| {
                s.status = MotorStatus::Error;
                s.is_moving = false;
                s.active_entry_id = None;
            });
        } else {
            self.publish(|s| {
                s.status = MotorStatus::Idle;
                s.is_moving = false;
                s.active_entry_id = None;
            });
            info!("tilt scenario finished");
        }
        *self.recording.lock() = None;
        // 标志先于运行权归还复位，下一轮 start 不能看到残留标志
        self.flags.reset();
        self.running.store(false, Ordering::Release);
        self.events.on_stopped();
    }

    fn drive_scenario(
        &self,
        device: &SharedDevice,
        scenario: &TiltScenario,
    ) -> Result<(), ControlError> {
        let steps = *self.calculated_steps.lock();
        let min_steps = (f64::from(scenario.min_tilt) * steps * GEAR_RATIO) as i32;
        let max_steps = (f64::from(scenario.max_tilt) * steps * GEAR_RATIO) as i32;
        let move_timeout = Duration::from_secs_f64(scenario.move_duration_s + 10.0);

        // 移动时长反推轨迹速度
        let req_speed = 540.0 * f64::from(1u32 << scenario.microstepping)
            / scenario.move_duration_s;
        {
            let mut dev = device.lock();
            dev.set_limits(MotionLimits {
                max_speed: req_speed as u32,
                max_accel: 20_000,
                max_decel: 5_000,
                end_switch: None,
            });
            dev.reset_position_zero()?;
        }
        self.move_to(device, 0, move_timeout)?;

        let cycles = if scenario.repetitions == 0 {
            u32::MAX
        } else {
            scenario.repetitions
        };
        'cycles: for cycle in 1..=cycles {
            if self.flags.stop_requested() {
                break;
            }
            self.events.on_repetition(cycle);
            debug!(cycle, "tilt cycle started");
            let waypoints = [
                (max_steps, scenario.standstill_right_s),
                (0, scenario.standstill_horizontal_s),
                (min_steps, scenario.standstill_left_s),
                (0, scenario.standstill_horizontal_s),
            ];
            for (target, standstill_s) in waypoints {
                if self.flags.stop_requested() {
                    break 'cycles;
                }
                self.move_to(device, target, move_timeout)?;
                if !self.standstill(standstill_s) {
                    break 'cycles;
                }
            }
        }

        // 回到中位，再停靠到配置的结束位置
        if !self.flags.stop_requested() {
            self.move_to(device, 0, move_timeout)?;
            let end_target = match scenario.end_position {
                EndPosition::Min => min_steps,
                EndPosition::Center => 0,
                EndPosition::Max => max_steps,
            };
            self.move_to(device, end_target, move_timeout)?;
        }

        let mut dev = device.lock();
        dev.stop_trajectory()?;
        dev.run_sleep(false)?;
        Ok(())
    }
}

struct WorkerHandles {
    scenario: Option<JoinHandle<()>>,
    flush: Option<JoinHandle<()>>,
}

/// 倾斜轴控制器
pub struct TiltController {
    shared: Arc<TiltShared>,
    workers: Mutex<WorkerHandles>,
}

impl TiltController {
    pub fn new(
        manager: Arc<DeviceManager>,
        storage: Arc<dyn Storage>,
        events: Arc<dyn EventSink>,
    ) -> Self {
        Self::with_config(manager, storage, events, TiltConfig::default())
    }

    pub fn with_config(
        manager: Arc<DeviceManager>,
        storage: Arc<dyn Storage>,
        events: Arc<dyn EventSink>,
        config: TiltConfig,
    ) -> Self {
        TiltController {
            shared: Arc::new(TiltShared {
                manager,
                storage,
                events,
                queue: Arc::new(MeasurementQueue::new()),
                flags: CancelFlags::new(),
                snapshot: ArcSwap::from_pointee(AxisSnapshot::default()),
                running: Arc::new(AtomicBool::new(false)),
                config,
                calculated_steps: Mutex::new(steps_per_degree(2)),
                recording: Mutex::new(None),
            }),
            workers: Mutex::new(WorkerHandles {
                scenario: None,
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
        info!(position = status.position, "tilt axis initialized");
        Ok(())
    }

    /// 手动轨迹移动（步数目标）
    ///
    /// 越界在任何设备 I/O 前被拒绝。
    pub fn move_to(&self, target: i32, timeout: Duration) -> Result<(), ControlError> {
        let (min_steps, max_steps) = self.shared.bounds_steps();
        if target < min_steps || target > max_steps {
            return Err(ControlError::OutOfRange {
                target,
                min: min_steps,
                max: max_steps,
            });
        }
        let device = self.shared.manager.handle()?;
        self.shared.publish(|s| {
            s.status = MotorStatus::Moving;
            s.is_moving = true;
        });
        let result = self.shared.move_to(&device, target, timeout);
        self.shared.publish(|s| {
            if result.is_ok() {
                s.status = MotorStatus::Idle;
            }
            s.is_moving = false;
        });
        result
    }

    /// 归位：恒速压向限位开关，释放后清零并退开
    pub fn home(&self) -> Result<(), ControlError> {
        let device = self.shared.manager.handle()?;
        {
            let mut dev = device.lock();
            dev.run_sleep(true)?;
            dev.patch_driver_settings(&SettingsPatch {
                step_mode: Some(2),
                microstep: Some(2),
                ..Default::default()
            })?;
        }
        *self.shared.calculated_steps.lock() = steps_per_degree(2);

        device.lock().set_requested_speed(HOMING_SPEED, Direction::Cw)?;
        loop {
            let status = device.lock().read_stream()?;
            if !status.end_switch {
                std::thread::sleep(Duration::from_millis(50));
                device.lock().set_requested_speed(0, Direction::Cw)?;
                break;
            }
        }
        device.lock().reset_position_zero()?;

        // 反向退开开关再清零
        device.lock().set_requested_speed(HOMING_SPEED, Direction::Ccw)?;
        std::thread::sleep(HOMING_BACKOFF);
        let mut dev = device.lock();
        dev.set_requested_speed(0, Direction::Ccw)?;
        dev.run_sleep(false)?;
        dev.reset_position_zero()?;
        drop(dev);

        self.shared.manager.update_position(0);
        self.shared.publish(|s| {
            s.position = 0;
            s.status = MotorStatus::Idle;
            s.is_moving = false;
        });
        info!("tilt homed");
        Ok(())
    }

    /// 创建条目并把设备置入运行态（持有运行权的一方调用）
    fn prepare_start(
        &self,
        entry_name: &str,
        scenario: &TiltScenario,
    ) -> Result<(EntryId, SharedDevice), ControlError> {
        let entry_id = self
            .shared
            .storage
            .create_entry(entry_name, Some(&scenario.name))?;
        let device = self.shared.manager.handle()?;
        {
            let mut dev = device.lock();
            dev.run_sleep(true)?;
            dev.patch_driver_settings(&SettingsPatch {
                step_mode: Some(4),
                microstep: Some(scenario.microstepping),
                ..Default::default()
            })?;
        }
        Ok((entry_id, device))
    }

    /// 按倾斜场景启动
    ///
    /// 场景倾角越界时返回 `Ok(false)`，不改变状态。
    /// 运行权以原子交换抢占：并发调用至多一个获准，
    /// 其余同样返回 `Ok(false)` 且不创建条目。
    pub fn start(&self, entry_name: &str, scenario: &TiltScenario) -> Result<bool, ControlError> {
        if scenario.min_tilt < self.shared.config.min_tilt_deg
            || scenario.max_tilt > self.shared.config.max_tilt_deg
        {
            warn!(
                min = scenario.min_tilt,
                max = scenario.max_tilt,
                "tilt start rejected: scenario exceeds travel range"
            );
            return Ok(false);
        }
        if self
            .shared
            .running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            warn!("tilt start rejected: already moving");
            return Ok(false);
        }

        let (entry_id, device) = match self.prepare_start(entry_name, scenario) {
            Ok(prepared) => prepared,
            Err(e) => {
                // 准备阶段失败必须交还运行权
                self.shared.running.store(false, Ordering::Release);
                return Err(e);
            },
        };
        *self.shared.calculated_steps.lock() = steps_per_degree(scenario.microstepping);

        self.shared.flags.reset();
        *self.shared.recording.lock() = Some((entry_id, Instant::now()));
        self.shared.publish(|s| {
            s.status = MotorStatus::Moving;
            s.is_moving = true;
            s.active_entry_id = Some(entry_id);
        });
        info!(entry_id, scenario = %scenario.name, "tilt scenario starting");

        let mut workers = self.workers.lock();
        workers.scenario = Some({
            let shared = self.shared.clone();
            let device = device.clone();
            let scenario = scenario.clone();
            std::thread::spawn(move || shared.run_scenario(&device, &scenario))
        });
        workers.flush = Some({
            let queue = self.shared.queue.clone();
            let storage = self.shared.storage.clone();
            let events = self.shared.events.clone();
            let running = self.shared.running.clone();
            std::thread::spawn(move || {
                run_flush_loop(queue, storage, events, running, TILT_FLUSH_INTERVAL)
            })
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
    pub fn resume(&self) -> bool {
        if self.shared.flags.is_paused() {
            self.shared.flags.request_resume();
            true
        } else {
            false
        }
    }

    /// 停止场景并等待工作线程结束（有界 3 s）
    pub fn stop(&self) -> bool {
        let snap = self.status();
        if !snap.is_moving && !self.shared.flags.is_paused() {
            return false;
        }
        self.shared.flags.request_stop();
        let mut workers = self.workers.lock();
        if let Some(handle) = workers.scenario.take() {
            handle.join_timeout(WORKER_JOIN_TIMEOUT);
        }
        if let Some(handle) = workers.flush.take() {
            handle.join_timeout(WORKER_JOIN_TIMEOUT);
        }
        self.shared.flags.reset();
        self.shared.publish(|s| {
            s.status = MotorStatus::Idle;
            s.is_moving = false;
            s.active_entry_id = None;
        });
        true
    }

    /// 无锁读取当前状态快照
    pub fn status(&self) -> AxisSnapshot {
        self.shared.snapshot()
    }

    /// 等待当前场景自然结束（测试与关停用）
    pub fn wait_idle(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        loop {
            let mut workers = self.workers.lock();
            let scenario_done = workers
                .scenario
                .as_ref()
                .is_none_or(JoinHandle::is_finished);
            let flush_done = workers.flush.as_ref().is_none_or(JoinHandle::is_finished);
            if scenario_done && flush_done {
                workers.scenario = None;
                workers.flush = None;
                return true;
            }
            drop(workers);
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

    pub fn save_scenario(&self, scenario: &TiltScenario) -> Result<(), ControlError> {
        Ok(self.shared.storage.save_tilt_scenario(scenario)?)
    }

    pub fn scenarios(&self) -> Result<Vec<TiltScenario>, ControlError> {
        Ok(self.shared.storage.tilt_scenarios()?)
    }

    pub fn scenario(&self, name: &str) -> Result<Option<TiltScenario>, ControlError> {
        Ok(self.shared.storage.tilt_scenario(name)?)
    }

    pub fn remove_scenario(&self, name: &str) -> Result<bool, ControlError> {
        Ok(self.shared.storage.remove_tilt_scenario(name)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_steps_per_degree() {
        // 2^2 / 1.8
        assert!((steps_per_degree(2) - 4.0 / 1.8).abs() < 1e-9);
        assert!((steps_per_degree(0) - 1.0 / 1.8).abs() < 1e-9);
    }

    #[test]
    fn test_default_config_is_effectively_unbounded() {
        let config = TiltConfig::default();
        assert!(config.min_tilt_deg < -1_000_000);
        assert!(config.max_tilt_deg > 1_000_000);
    }
}
