//! 蠕动泵轴控制器
//!
//! 对外单位是流量（mL/min），内部统一换算：
//! 流量 →(标定斜率)→ RPM →(传动系数)→ 设备速度。
//! 分段在执行前按当前标定改写成 RPM，样本再换算回流量。

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tracing::info;

use postep_protocol::{Direction, SettingsPatch};
use postep_usb::DeviceManager;

use crate::axis::{SpeedAxisController, SpeedProfile};
use crate::calibration::{
    compute_slope, flow_from_device_speed, rpm_from_flow, FLOW_RATIO_CONSTANT,
};
use crate::error::ControlError;
use crate::events::EventSink;
use crate::ramp::{ramp_down, RAMP_STEP};
use crate::storage::Storage;
use crate::types::{
    Calibration, CalibrationRef, MovementSegment, PeristalticScenario, SamplePayload,
    TubeConfiguration,
};

/// 蠕动泵轴参数（持有当前运行的标定斜率）
pub struct PeristalticProfile {
    slope: Mutex<f64>,
}

impl PeristalticProfile {
    fn new() -> Self {
        PeristalticProfile {
            slope: Mutex::new(1.0),
        }
    }

    fn set_slope(&self, slope: f64) {
        *self.slope.lock() = slope;
    }

    fn slope(&self) -> f64 {
        *self.slope.lock()
    }
}

impl SpeedProfile for PeristalticProfile {
    fn axis_name(&self) -> &'static str {
        "peristaltic"
    }

    fn settings_patch(&self) -> SettingsPatch {
        SettingsPatch {
            step_mode: Some(2),
            microstep: Some(4),
            ..Default::default()
        }
    }

    fn ramp_delay(&self) -> Duration {
        Duration::from_millis(20)
    }

    fn flush_interval(&self) -> Duration {
        Duration::from_millis(500)
    }

    fn device_speed(&self, magnitude: f64) -> u32 {
        // 分段已改写成 RPM
        (magnitude * FLOW_RATIO_CONSTANT) as u32
    }

    fn unit_value(&self, device_speed: f64) -> f64 {
        flow_from_device_speed(device_speed, self.slope())
    }

    fn sample(&self, device_speed: f64, direction: Direction) -> SamplePayload {
        SamplePayload::Peristaltic {
            flow_ml_min: self.unit_value(device_speed),
            direction,
        }
    }
}

/// 蠕动泵轴控制器
pub struct PeristalticController {
    inner: SpeedAxisController<PeristalticProfile>,
    rpm_calibration_stopped: AtomicBool,
}

impl PeristalticController {
    pub fn new(
        manager: Arc<DeviceManager>,
        storage: Arc<dyn Storage>,
        events: Arc<dyn EventSink>,
    ) -> Self {
        PeristalticController {
            inner: SpeedAxisController::new(PeristalticProfile::new(), manager, storage, events),
            rpm_calibration_stopped: AtomicBool::new(false),
        }
    }

    /// 解析标定引用为斜率
    fn resolve_slope(&self, reference: &CalibrationRef) -> Result<f64, ControlError> {
        let slope = match reference {
            CalibrationRef::Saved(name) => self
                .inner
                .storage()
                .calibration(name)?
                .map(|c| c.slope)
                .ok_or_else(|| ControlError::UnknownCalibration(name.clone()))?,
            CalibrationRef::Tube(name) => self
                .inner
                .storage()
                .tube_configuration(name)?
                .map(|t| t.flow_rate)
                .ok_or_else(|| ControlError::UnknownCalibration(name.clone()))?,
        };
        Ok(slope)
    }

    /// 按蠕动泵场景启动
    ///
    /// 分段的 `magnitude`（流量）先按标定斜率改写成 RPM，
    /// 之后走通用速度轴逻辑。
    pub fn start(
        &self,
        entry_name: &str,
        scenario: &PeristalticScenario,
    ) -> Result<bool, ControlError> {
        let slope = self.resolve_slope(&scenario.calibration)?;
        self.inner.profile().set_slope(slope);
        let segments: Vec<MovementSegment> = scenario
            .segments
            .iter()
            .map(|segment| MovementSegment {
                magnitude: rpm_from_flow(segment.magnitude, slope),
                ..*segment
            })
            .collect();
        info!(slope, "peristaltic scenario resolved");
        self.inner
            .start(entry_name, Some(&scenario.name), segments)
    }

    /// 标定量杯运行：以固定 RPM 驱动一段时间（不产样本）
    ///
    /// 同步执行，协作式停止走 [`stop_rpm_calibration`]。
    ///
    /// [`stop_rpm_calibration`]: Self::stop_rpm_calibration
    pub fn run_rpm_calibration(
        &self,
        duration: Duration,
        rpm: f64,
        direction: Direction,
    ) -> Result<(), ControlError> {
        let device = self.inner.manager().handle()?;
        {
            let mut dev = device.lock();
            dev.patch_driver_settings(&self.inner.profile().settings_patch())?;
            dev.run_sleep(true)?;
        }
        self.rpm_calibration_stopped.store(false, Ordering::Release);
        let target = (rpm * FLOW_RATIO_CONSTANT) as u32;
        let delay = self.inner.profile().ramp_delay();

        let stopped = &self.rpm_calibration_stopped;
        let mut speed = 0u32;
        while speed < target && !stopped.load(Ordering::Acquire) {
            speed = (speed + RAMP_STEP).min(target);
            device.lock().set_requested_speed(speed, direction)?;
            std::thread::sleep(delay);
        }

        let deadline = Instant::now() + duration;
        while Instant::now() < deadline && !stopped.load(Ordering::Acquire) {
            std::thread::sleep(Duration::from_millis(50));
        }

        ramp_down(&device, speed, direction, delay, &mut |_| {})?;
        device.lock().run_sleep(false)?;
        info!(rpm, "rpm calibration run finished");
        Ok(())
    }

    /// 请求停止正在进行的标定运行
    pub fn stop_rpm_calibration(&self) {
        self.rpm_calibration_stopped.store(true, Ordering::Release);
    }

    /// 拟合并保存标定
    pub fn save_calibration(
        &self,
        name: &str,
        duration_s: u32,
        low_rpm: u32,
        high_rpm: u32,
        low_rpm_volume: f64,
        high_rpm_volume: f64,
        diameter_mm: f64,
    ) -> Result<f64, ControlError> {
        let slope = compute_slope(duration_s, low_rpm, high_rpm, low_rpm_volume, high_rpm_volume);
        self.inner.storage().save_calibration(&Calibration {
            name: name.to_owned(),
            duration_s,
            low_rpm,
            high_rpm,
            low_rpm_volume,
            high_rpm_volume,
            slope,
            diameter_mm,
        })?;
        Ok(slope)
    }

    // 标定 / 软管 / 场景 CRUD 透传

    pub fn calibrations(&self) -> Result<Vec<Calibration>, ControlError> {
        Ok(self.inner.storage().calibrations()?)
    }

    pub fn remove_calibration(&self, name: &str) -> Result<bool, ControlError> {
        Ok(self.inner.storage().remove_calibration(name)?)
    }

    pub fn save_tube_configuration(&self, tube: &TubeConfiguration) -> Result<(), ControlError> {
        Ok(self.inner.storage().save_tube_configuration(tube)?)
    }

    pub fn tube_configurations(&self) -> Result<Vec<TubeConfiguration>, ControlError> {
        Ok(self.inner.storage().tube_configurations()?)
    }

    pub fn save_scenario(&self, scenario: &PeristalticScenario) -> Result<(), ControlError> {
        Ok(self.inner.storage().save_peristaltic_scenario(scenario)?)
    }

    pub fn scenarios(&self) -> Result<Vec<PeristalticScenario>, ControlError> {
        Ok(self.inner.storage().peristaltic_scenarios()?)
    }

    pub fn remove_scenario(&self, name: &str) -> Result<bool, ControlError> {
        Ok(self.inner.storage().remove_peristaltic_scenario(name)?)
    }
}

impl std::ops::Deref for PeristalticController {
    type Target = SpeedAxisController<PeristalticProfile>;

    fn deref(&self) -> &Self::Target {
        &self.inner
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flow_to_device_speed_chain() {
        let profile = PeristalticProfile::new();
        profile.set_slope(0.5);
        // 2.0 mL/min @ slope 0.5 → 4 RPM → 设备速度 21
        let rpm = rpm_from_flow(2.0, 0.5);
        assert!((rpm - 4.0).abs() < 1e-9);
        assert_eq!(profile.device_speed(rpm), 21);
        // 样本换算回流量
        let flow = profile.unit_value(21.0);
        assert!((flow - 21.0 / FLOW_RATIO_CONSTANT * 0.5).abs() < 1e-9);
    }

    #[test]
    fn test_settings_patch_asserts_pump_mode() {
        let patch = PeristalticProfile::new().settings_patch();
        assert_eq!(patch.step_mode, Some(2));
        assert_eq!(patch.microstep, Some(4));
    }
}
