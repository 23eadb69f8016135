//! Rolling frame-rate and memory sampling.
//!
//! The monitor only reports; the [`CapabilityDetector`](crate::capability::CapabilityDetector)
//! decides what a report means for the tier.

use std::collections::VecDeque;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::PerformanceThresholds;

/// Sustained condition detected by the monitor.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PerformanceFeedback {
    SustainedLowFps { fps: f32 },
    MemoryPressure { ratio: f32 },
}

/// Snapshot of the rolling window.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct PerformanceMetrics {
    pub fps: Option<f32>,
    pub frames_sampled: usize,
    pub memory_ratio: Option<f32>,
    pub reports: u32,
}

#[derive(Debug, Clone)]
pub struct PerformanceMonitor {
    thresholds: PerformanceThresholds,
    frames: VecDeque<f64>,
    memory_ratio: Option<f32>,
    low_fps_since: Option<f64>,
    pressure_since: Option<f64>,
    reports: u32,
}

impl PerformanceMonitor {
    pub fn new(thresholds: PerformanceThresholds) -> Self {
        Self {
            thresholds,
            frames: VecDeque::with_capacity(thresholds.sample_capacity),
            memory_ratio: None,
            low_fps_since: None,
            pressure_since: None,
            reports: 0,
        }
    }

    /// Frames per second over the rolling window, once two frames are known.
    pub fn fps(&self) -> Option<f32> {
        let first = *self.frames.front()?;
        let last = *self.frames.back()?;
        let span = last - first;
        if self.frames.len() < 2 || span <= 0.0 {
            return None;
        }
        Some(((self.frames.len() - 1) as f64 * 1000.0 / span) as f32)
    }

    pub fn metrics(&self) -> PerformanceMetrics {
        PerformanceMetrics {
            fps: self.fps(),
            frames_sampled: self.frames.len(),
            memory_ratio: self.memory_ratio,
            reports: self.reports,
        }
    }

    /// Record one animation frame. Returns feedback once a condition has held
    /// for the sustained window; the window then starts over.
    pub fn record_frame(
        &mut self,
        now_ms: f64,
        memory_ratio: Option<f32>,
    ) -> Option<PerformanceFeedback> {
        if self.frames.back().is_some_and(|last| now_ms < *last) {
            // Clock went backwards (host restarted its timer).
            self.reset();
        }
        if self.frames.len() == self.thresholds.sample_capacity {
            self.frames.pop_front();
        }
        self.frames.push_back(now_ms);
        if memory_ratio.is_some() {
            self.memory_ratio = memory_ratio;
        }

        let window = self.thresholds.sustained_window_ms;

        if let Some(ratio) = self.memory_ratio.filter(|r| *r > self.thresholds.max_memory_ratio) {
            let since = *self.pressure_since.get_or_insert(now_ms);
            if now_ms - since >= window {
                self.pressure_since = None;
                return Some(self.report(PerformanceFeedback::MemoryPressure { ratio }));
            }
        } else {
            self.pressure_since = None;
        }

        match self.fps() {
            Some(fps) if fps < self.thresholds.min_fps => {
                let since = *self.low_fps_since.get_or_insert(now_ms);
                if now_ms - since >= window {
                    self.frames.clear();
                    self.frames.push_back(now_ms);
                    self.low_fps_since = None;
                    return Some(self.report(PerformanceFeedback::SustainedLowFps { fps }));
                }
            }
            _ => self.low_fps_since = None,
        }
        None
    }

    fn report(&mut self, feedback: PerformanceFeedback) -> PerformanceFeedback {
        self.reports += 1;
        debug!(?feedback, "sustained performance condition");
        feedback
    }

    /// Forget the window. Used when the page is hidden, since browsers throttle
    /// frame callbacks in background tabs.
    pub fn reset(&mut self) {
        self.frames.clear();
        self.low_fps_since = None;
        self.pressure_since = None;
    }
}
