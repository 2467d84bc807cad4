//! "生成完成"判定 - 业务能力层
//!
//! 判定方式可插拔：显式完成标记、生成区域校验和稳定，或二者之一。

use sha2::{Digest, Sha256};

use crate::models::interaction_config::CompletionMode;

/// 单次轮询看到的页面情况
#[derive(Debug, Clone, Default)]
pub struct Observation {
    pub marker_present: bool,
    /// 生成区域截图，空表示还没有内容
    pub region: Vec<u8>,
}

pub trait CompletionDetector: Send {
    /// 每轮等待开始时调用
    fn reset(&mut self);

    /// 提交前的区域内容；与它相同的截图不算生成结果
    fn set_baseline(&mut self, _region: &[u8]) {}

    fn observe(&mut self, observation: &Observation) -> bool;

    /// 是否需要截取生成区域（避免无谓截图）
    fn wants_region(&self) -> bool;

    fn wants_marker(&self) -> bool;
}

/// 只看显式完成标记
#[derive(Debug, Default)]
pub struct MarkerDetector;

impl CompletionDetector for MarkerDetector {
    fn reset(&mut self) {}

    fn observe(&mut self, observation: &Observation) -> bool {
        observation.marker_present
    }

    fn wants_region(&self) -> bool {
        false
    }

    fn wants_marker(&self) -> bool {
        true
    }
}

/// 区域校验和连续 `required` 次不变视为完成
///
/// 区域必须先离开提交前的基线（例如上传后的源图预览）才开始计数。
#[derive(Debug)]
pub struct StabilityDetector {
    required: u32,
    baseline: Option<Vec<u8>>,
    last: Option<Vec<u8>>,
    unchanged: u32,
}

impl StabilityDetector {
    pub fn new(required: u32) -> Self {
        Self {
            required: required.max(1),
            baseline: None,
            last: None,
            unchanged: 0,
        }
    }
}

impl CompletionDetector for StabilityDetector {
    fn reset(&mut self) {
        self.last = None;
        self.unchanged = 0;
    }

    fn set_baseline(&mut self, region: &[u8]) {
        self.baseline = (!region.is_empty()).then(|| Sha256::digest(region).to_vec());
    }

    fn observe(&mut self, observation: &Observation) -> bool {
        if observation.region.is_empty() {
            self.reset();
            return false;
        }
        let digest = Sha256::digest(&observation.region);
        if self.baseline.as_deref() == Some(digest.as_slice()) {
            self.reset();
            return false;
        }
        if self.last.as_deref() == Some(digest.as_slice()) {
            self.unchanged += 1;
        } else {
            self.last = Some(digest.to_vec());
            self.unchanged = 0;
        }
        self.unchanged >= self.required
    }

    fn wants_region(&self) -> bool {
        true
    }

    fn wants_marker(&self) -> bool {
        false
    }
}

/// 标记或稳定，先到先算
#[derive(Debug)]
pub struct MarkerOrStability {
    stability: StabilityDetector,
}

impl CompletionDetector for MarkerOrStability {
    fn reset(&mut self) {
        self.stability.reset();
    }

    fn set_baseline(&mut self, region: &[u8]) {
        self.stability.set_baseline(region);
    }

    fn observe(&mut self, observation: &Observation) -> bool {
        // 两个判定都要喂，保持稳定计数连续
        let stable = self.stability.observe(observation);
        observation.marker_present || stable
    }

    fn wants_region(&self) -> bool {
        true
    }

    fn wants_marker(&self) -> bool {
        true
    }
}

pub fn detector_for(mode: CompletionMode, stable_polls: u32) -> Box<dyn CompletionDetector> {
    match mode {
        CompletionMode::Marker => Box::new(MarkerDetector),
        CompletionMode::Stability => Box::new(StabilityDetector::new(stable_polls)),
        CompletionMode::MarkerOrStability => Box::new(MarkerOrStability {
            stability: StabilityDetector::new(stable_polls),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn region(bytes: &[u8]) -> Observation {
        Observation {
            marker_present: false,
            region: bytes.to_vec(),
        }
    }

    #[test]
    fn test_stability_needs_consecutive_unchanged_polls() {
        let mut d = StabilityDetector::new(2);
        assert!(!d.observe(&region(b"a")));
        assert!(!d.observe(&region(b"a")));
        // 中途变化，计数清零
        assert!(!d.observe(&region(b"b")));
        assert!(!d.observe(&region(b"b")));
        assert!(d.observe(&region(b"b")));
    }

    #[test]
    fn test_empty_region_never_counts_as_stable() {
        let mut d = StabilityDetector::new(1);
        for _ in 0..5 {
            assert!(!d.observe(&region(b"")));
        }
    }

    #[test]
    fn test_baseline_region_never_counts_as_stable() {
        let mut d = detector_for(CompletionMode::MarkerOrStability, 2);
        d.set_baseline(b"thumbnail");
        for _ in 0..6 {
            assert!(!d.observe(&region(b"thumbnail")));
        }
        // 区域变化后才开始计数
        assert!(!d.observe(&region(b"generated")));
        assert!(!d.observe(&region(b"generated")));
        assert!(d.observe(&region(b"generated")));
    }

    #[test]
    fn test_marker_or_stability() {
        let mut d = detector_for(CompletionMode::MarkerOrStability, 3);
        assert!(!d.observe(&region(b"x")));
        assert!(d.observe(&Observation {
            marker_present: true,
            region: Vec::new(),
        }));

        let mut marker_only = detector_for(CompletionMode::Marker, 1);
        assert!(!marker_only.wants_region());
        assert!(!marker_only.observe(&region(b"x")));
        assert!(!marker_only.observe(&region(b"x")));
    }
}
