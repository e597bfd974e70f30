//! 旋转轴控制器
//!
//! 速度单位：RPM，设备速度 = RPM × 100。

use std::sync::Arc;
use std::time::Duration;

use postep_protocol::{Direction, SettingsPatch};
use postep_usb::DeviceManager;

use crate::axis::{SpeedAxisController, SpeedProfile};
use crate::error::ControlError;
use crate::events::EventSink;
use crate::storage::Storage;
use crate::types::{RotationScenario, SamplePayload};

/// RPM → 设备速度的固定倍率
pub const RPM_TO_DEVICE_SPEED: f64 = 100.0;

/// 旋转轴参数
pub struct RotaryProfile;

impl SpeedProfile for RotaryProfile {
    fn axis_name(&self) -> &'static str {
        "rotary"
    }

    fn settings_patch(&self) -> SettingsPatch {
        SettingsPatch {
            step_mode: Some(2),
            microstep: Some(2),
            ..Default::default()
        }
    }

    fn ramp_delay(&self) -> Duration {
        Duration::from_millis(50)
    }

    fn flush_interval(&self) -> Duration {
        Duration::from_millis(500)
    }

    fn device_speed(&self, magnitude: f64) -> u32 {
        (magnitude * RPM_TO_DEVICE_SPEED) as u32
    }

    fn unit_value(&self, device_speed: f64) -> f64 {
        device_speed / RPM_TO_DEVICE_SPEED
    }

    fn sample(&self, device_speed: f64, direction: Direction) -> SamplePayload {
        SamplePayload::Rotary {
            speed_rpm: self.unit_value(device_speed),
            direction,
        }
    }
}

/// 旋转轴控制器
pub struct RotaryController {
    inner: SpeedAxisController<RotaryProfile>,
}

impl RotaryController {
    pub fn new(
        manager: Arc<DeviceManager>,
        storage: Arc<dyn Storage>,
        events: Arc<dyn EventSink>,
    ) -> Self {
        RotaryController {
            inner: SpeedAxisController::new(RotaryProfile, manager, storage, events),
        }
    }

    /// 按旋转场景启动
    pub fn start(&self, entry_name: &str, scenario: &RotationScenario) -> Result<bool, ControlError> {
        self.inner
            .start(entry_name, Some(&scenario.name), scenario.segments.clone())
    }

    // 场景 CRUD 透传

    pub fn save_scenario(&self, scenario: &RotationScenario) -> Result<(), ControlError> {
        Ok(self.inner.storage().save_rotation_scenario(scenario)?)
    }

    pub fn scenarios(&self) -> Result<Vec<RotationScenario>, ControlError> {
        Ok(self.inner.storage().rotation_scenarios()?)
    }

    pub fn scenario(&self, name: &str) -> Result<Option<RotationScenario>, ControlError> {
        Ok(self.inner.storage().rotation_scenario(name)?)
    }

    pub fn remove_scenario(&self, name: &str) -> Result<bool, ControlError> {
        Ok(self.inner.storage().remove_rotation_scenario(name)?)
    }
}

impl std::ops::Deref for RotaryController {
    type Target = SpeedAxisController<RotaryProfile>;

    fn deref(&self) -> &Self::Target {
        &self.inner
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rpm_conversion() {
        let profile = RotaryProfile;
        assert_eq!(profile.device_speed(4.0), 400);
        assert!((profile.unit_value(400.0) - 4.0).abs() < 1e-9);
    }

    #[test]
    fn test_settings_patch_asserts_rotary_mode() {
        let patch = RotaryProfile.settings_patch();
        assert_eq!(patch.step_mode, Some(2));
        assert_eq!(patch.microstep, Some(2));
        assert!(patch.fullscale_current.is_none());
    }
}
