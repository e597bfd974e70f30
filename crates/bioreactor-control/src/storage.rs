//! 持久化协作接口
//!
//! 控制层不关心存储后端（SQL、文件或内存），
//! 只要求批量写入是全有或全无的：失败的批次会被完整重排队。
//! [`MemoryStorage`] 供测试与演示使用，并支持注入失败。

use std::collections::HashMap;

use parking_lot::Mutex;
use thiserror::Error;

use crate::types::{
    Calibration, Entry, EntryId, MeasurementSample, PeristalticScenario, RotationScenario,
    TiltScenario, TubeConfiguration,
};

/// 持久化失败（可恢复：调用方重排队并在下个周期重试）
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Persistence error: {0}")]
pub struct PersistenceError(pub String);

/// 存储后端接口
///
/// `persist_measurements_batch` 必须是全有或全无：
/// 返回 Err 时不得留下部分写入的样本。
pub trait Storage: Send + Sync {
    /// 创建记录条目，返回其 ID
    fn create_entry(
        &self,
        name: &str,
        scenario_name: Option<&str>,
    ) -> Result<EntryId, PersistenceError>;

    /// 批量持久化样本（全有或全无），返回写入条数
    fn persist_measurements_batch(
        &self,
        batch: &[MeasurementSample],
    ) -> Result<usize, PersistenceError>;

    fn entries(&self) -> Result<Vec<Entry>, PersistenceError>;

    fn measurements(
        &self,
        entry_id: EntryId,
        limit: usize,
    ) -> Result<Vec<MeasurementSample>, PersistenceError>;

    // 场景 CRUD（按名覆盖即更新）

    fn save_tilt_scenario(&self, scenario: &TiltScenario) -> Result<(), PersistenceError>;
    fn tilt_scenario(&self, name: &str) -> Result<Option<TiltScenario>, PersistenceError>;
    fn tilt_scenarios(&self) -> Result<Vec<TiltScenario>, PersistenceError>;
    fn remove_tilt_scenario(&self, name: &str) -> Result<bool, PersistenceError>;

    fn save_rotation_scenario(&self, scenario: &RotationScenario) -> Result<(), PersistenceError>;
    fn rotation_scenario(&self, name: &str) -> Result<Option<RotationScenario>, PersistenceError>;
    fn rotation_scenarios(&self) -> Result<Vec<RotationScenario>, PersistenceError>;
    fn remove_rotation_scenario(&self, name: &str) -> Result<bool, PersistenceError>;

    fn save_peristaltic_scenario(
        &self,
        scenario: &PeristalticScenario,
    ) -> Result<(), PersistenceError>;
    fn peristaltic_scenario(
        &self,
        name: &str,
    ) -> Result<Option<PeristalticScenario>, PersistenceError>;
    fn peristaltic_scenarios(&self) -> Result<Vec<PeristalticScenario>, PersistenceError>;
    fn remove_peristaltic_scenario(&self, name: &str) -> Result<bool, PersistenceError>;

    // 标定与软管配置

    fn save_calibration(&self, calibration: &Calibration) -> Result<(), PersistenceError>;
    fn calibration(&self, name: &str) -> Result<Option<Calibration>, PersistenceError>;
    fn calibrations(&self) -> Result<Vec<Calibration>, PersistenceError>;
    fn remove_calibration(&self, name: &str) -> Result<bool, PersistenceError>;

    fn save_tube_configuration(&self, tube: &TubeConfiguration) -> Result<(), PersistenceError>;
    fn tube_configuration(&self, name: &str)
        -> Result<Option<TubeConfiguration>, PersistenceError>;
    fn tube_configurations(&self) -> Result<Vec<TubeConfiguration>, PersistenceError>;
}

#[derive(Default)]
struct MemoryInner {
    next_entry_id: EntryId,
    entries: Vec<Entry>,
    measurements: HashMap<EntryId, Vec<MeasurementSample>>,
    tilt_scenarios: HashMap<String, TiltScenario>,
    rotation_scenarios: HashMap<String, RotationScenario>,
    peristaltic_scenarios: HashMap<String, PeristalticScenario>,
    calibrations: HashMap<String, Calibration>,
    tubes: HashMap<String, TubeConfiguration>,
    /// 接下来 N 次批量写入直接失败（测试注入）
    fail_next_batches: u32,
}

/// 内存存储实现
#[derive(Default)]
pub struct MemoryStorage {
    inner: Mutex<MemoryInner>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// 注入：接下来 `count` 次批量写入返回失败
    pub fn fail_next_batches(&self, count: u32) {
        self.inner.lock().fail_next_batches = count;
    }

    /// 指定条目当前持久化的样本总数
    pub fn measurement_count(&self, entry_id: EntryId) -> usize {
        self.inner
            .lock()
            .measurements
            .get(&entry_id)
            .map_or(0, Vec::len)
    }
}

impl Storage for MemoryStorage {
    fn create_entry(
        &self,
        name: &str,
        scenario_name: Option<&str>,
    ) -> Result<EntryId, PersistenceError> {
        let mut inner = self.inner.lock();
        inner.next_entry_id += 1;
        let id = inner.next_entry_id;
        inner.entries.push(Entry {
            id,
            name: name.to_owned(),
            scenario_name: scenario_name.map(str::to_owned),
        });
        Ok(id)
    }

    fn persist_measurements_batch(
        &self,
        batch: &[MeasurementSample],
    ) -> Result<usize, PersistenceError> {
        let mut inner = self.inner.lock();
        if inner.fail_next_batches > 0 {
            inner.fail_next_batches -= 1;
            return Err(PersistenceError("injected batch failure".into()));
        }
        for sample in batch {
            inner
                .measurements
                .entry(sample.entry_id)
                .or_default()
                .push(*sample);
        }
        Ok(batch.len())
    }

    fn entries(&self) -> Result<Vec<Entry>, PersistenceError> {
        Ok(self.inner.lock().entries.clone())
    }

    fn measurements(
        &self,
        entry_id: EntryId,
        limit: usize,
    ) -> Result<Vec<MeasurementSample>, PersistenceError> {
        Ok(self
            .inner
            .lock()
            .measurements
            .get(&entry_id)
            .map(|samples| samples.iter().take(limit).copied().collect())
            .unwrap_or_default())
    }

    fn save_tilt_scenario(&self, scenario: &TiltScenario) -> Result<(), PersistenceError> {
        self.inner
            .lock()
            .tilt_scenarios
            .insert(scenario.name.clone(), scenario.clone());
        Ok(())
    }

    fn tilt_scenario(&self, name: &str) -> Result<Option<TiltScenario>, PersistenceError> {
        Ok(self.inner.lock().tilt_scenarios.get(name).cloned())
    }

    fn tilt_scenarios(&self) -> Result<Vec<TiltScenario>, PersistenceError> {
        Ok(self.inner.lock().tilt_scenarios.values().cloned().collect())
    }

    fn remove_tilt_scenario(&self, name: &str) -> Result<bool, PersistenceError> {
        Ok(self.inner.lock().tilt_scenarios.remove(name).is_some())
    }

    fn save_rotation_scenario(&self, scenario: &RotationScenario) -> Result<(), PersistenceError> {
        self.inner
            .lock()
            .rotation_scenarios
            .insert(scenario.name.clone(), scenario.clone());
        Ok(())
    }

    fn rotation_scenario(&self, name: &str) -> Result<Option<RotationScenario>, PersistenceError> {
        Ok(self.inner.lock().rotation_scenarios.get(name).cloned())
    }

    fn rotation_scenarios(&self) -> Result<Vec<RotationScenario>, PersistenceError> {
        Ok(self
            .inner
            .lock()
            .rotation_scenarios
            .values()
            .cloned()
            .collect())
    }

    fn remove_rotation_scenario(&self, name: &str) -> Result<bool, PersistenceError> {
        Ok(self.inner.lock().rotation_scenarios.remove(name).is_some())
    }

    fn save_peristaltic_scenario(
        &self,
        scenario: &PeristalticScenario,
    ) -> Result<(), PersistenceError> {
        self.inner
            .lock()
            .peristaltic_scenarios
            .insert(scenario.name.clone(), scenario.clone());
        Ok(())
    }

    fn peristaltic_scenario(
        &self,
        name: &str,
    ) -> Result<Option<PeristalticScenario>, PersistenceError> {
        Ok(self.inner.lock().peristaltic_scenarios.get(name).cloned())
    }

    fn peristaltic_scenarios(&self) -> Result<Vec<PeristalticScenario>, PersistenceError> {
        Ok(self
            .inner
            .lock()
            .peristaltic_scenarios
            .values()
            .cloned()
            .collect())
    }

    fn remove_peristaltic_scenario(&self, name: &str) -> Result<bool, PersistenceError> {
        Ok(self
            .inner
            .lock()
            .peristaltic_scenarios
            .remove(name)
            .is_some())
    }

    fn save_calibration(&self, calibration: &Calibration) -> Result<(), PersistenceError> {
        self.inner
            .lock()
            .calibrations
            .insert(calibration.name.clone(), calibration.clone());
        Ok(())
    }

    fn calibration(&self, name: &str) -> Result<Option<Calibration>, PersistenceError> {
        Ok(self.inner.lock().calibrations.get(name).cloned())
    }

    fn calibrations(&self) -> Result<Vec<Calibration>, PersistenceError> {
        Ok(self.inner.lock().calibrations.values().cloned().collect())
    }

    fn remove_calibration(&self, name: &str) -> Result<bool, PersistenceError> {
        Ok(self.inner.lock().calibrations.remove(name).is_some())
    }

    fn save_tube_configuration(&self, tube: &TubeConfiguration) -> Result<(), PersistenceError> {
        self.inner
            .lock()
            .tubes
            .insert(tube.name.clone(), tube.clone());
        Ok(())
    }

    fn tube_configuration(
        &self,
        name: &str,
    ) -> Result<Option<TubeConfiguration>, PersistenceError> {
        Ok(self.inner.lock().tubes.get(name).cloned())
    }

    fn tube_configurations(&self) -> Result<Vec<TubeConfiguration>, PersistenceError> {
        Ok(self.inner.lock().tubes.values().cloned().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Direction, SamplePayload};

    fn sample(entry_id: EntryId, time_s: f64) -> MeasurementSample {
        MeasurementSample {
            entry_id,
            payload: SamplePayload::Rotary {
                speed_rpm: 1.0,
                direction: Direction::Cw,
            },
            time_s,
        }
    }

    #[test]
    fn test_entry_ids_are_sequential() {
        let storage = MemoryStorage::new();
        let a = storage.create_entry("run a", None).unwrap();
        let b = storage.create_entry("run b", Some("scenario")).unwrap();
        assert_eq!(b, a + 1);
        assert_eq!(storage.entries().unwrap().len(), 2);
    }

    #[test]
    fn test_injected_failure_is_all_or_nothing() {
        let storage = MemoryStorage::new();
        let entry = storage.create_entry("run", None).unwrap();
        storage.fail_next_batches(1);
        let batch = vec![sample(entry, 0.0), sample(entry, 0.1)];
        assert!(storage.persist_measurements_batch(&batch).is_err());
        assert_eq!(storage.measurement_count(entry), 0);
        assert_eq!(storage.persist_measurements_batch(&batch).unwrap(), 2);
        assert_eq!(storage.measurement_count(entry), 2);
    }

    #[test]
    fn test_measurements_respects_limit() {
        let storage = MemoryStorage::new();
        let entry = storage.create_entry("run", None).unwrap();
        let batch: Vec<_> = (0..10).map(|i| sample(entry, f64::from(i))).collect();
        storage.persist_measurements_batch(&batch).unwrap();
        assert_eq!(storage.measurements(entry, 3).unwrap().len(), 3);
    }

    #[test]
    fn test_scenario_save_is_upsert() {
        let storage = MemoryStorage::new();
        let mut scenario = RotationScenario {
            name: "spin".into(),
            segments: vec![],
        };
        storage.save_rotation_scenario(&scenario).unwrap();
        scenario.segments.push(crate::types::MovementSegment {
            duration_s: 5.0,
            direction: Direction::Cw,
            magnitude: 2.0,
        });
        storage.save_rotation_scenario(&scenario).unwrap();
        assert_eq!(storage.rotation_scenarios().unwrap().len(), 1);
        assert_eq!(
            storage
                .rotation_scenario("spin")
                .unwrap()
                .unwrap()
                .segments
                .len(),
            1
        );
    }
}
