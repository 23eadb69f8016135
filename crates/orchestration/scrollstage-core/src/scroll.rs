//! Smoothed scroll position, scroll broadcast and debounced geometry refresh.
//!
//! The synchronizer runs in one of two modes. In `Smooth` mode a
//! [`SmoothScroller`] eases a virtual offset toward the native position. If
//! the smoother fails to initialise, or smoothing is disallowed, the
//! synchronizer runs in `Native` mode and reports the native position
//! unchanged, so user input always moves the page.

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::config::{PageConfig, SmoothingConfig};

/// Smooth-scroll engine contract.
pub trait SmoothScroller {
    fn init(&mut self) -> anyhow::Result<()>;

    /// Native position the virtual offset should ease toward.
    fn set_target(&mut self, y: f32);

    /// Jump without easing.
    fn jump(&mut self, y: f32);

    /// Advance by `dt_ms` and return the current virtual offset.
    fn step(&mut self, dt_ms: f64) -> f32;

    fn destroy(&mut self);
}

/// Exponential smoothing toward the native position.
#[derive(Clone, Debug)]
pub struct LerpSmoother {
    lerp: f32,
    epsilon: f32,
    current: f32,
    target: f32,
}

impl LerpSmoother {
    pub fn new(config: &SmoothingConfig) -> Self {
        Self {
            lerp: config.lerp,
            epsilon: config.settle_epsilon_px,
            current: 0.0,
            target: 0.0,
        }
    }
}

impl SmoothScroller for LerpSmoother {
    fn init(&mut self) -> anyhow::Result<()> {
        anyhow::ensure!(
            self.lerp > 0.0 && self.lerp <= 1.0,
            "lerp factor {} outside (0, 1]",
            self.lerp
        );
        Ok(())
    }

    fn set_target(&mut self, y: f32) {
        self.target = y;
    }

    fn jump(&mut self, y: f32) {
        self.target = y;
        self.current = y;
    }

    fn step(&mut self, dt_ms: f64) -> f32 {
        // `lerp` is defined per 60 Hz frame; scale it to the real frame time.
        let frames = (dt_ms / (1000.0 / 60.0)) as f32;
        let alpha = 1.0 - (1.0 - self.lerp).powf(frames.max(0.0));
        self.current += (self.target - self.current) * alpha;
        if (self.target - self.current).abs() < self.epsilon {
            self.current = self.target;
        }
        self.current
    }

    fn destroy(&mut self) {
        self.current = self.target;
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScrollMode {
    Smooth,
    Native,
}

/// Trailing-edge timer. Rescheduling pushes the deadline out, so a burst of
/// events fires once.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Debounce {
    pub delay_ms: f64,
    deadline: Option<f64>,
}

impl Debounce {
    pub const fn new(delay_ms: f64) -> Self {
        Self {
            delay_ms,
            deadline: None,
        }
    }

    pub fn schedule(&mut self, now_ms: f64) {
        self.deadline = Some(now_ms + self.delay_ms);
    }

    pub fn cancel(&mut self) {
        self.deadline = None;
    }

    #[inline]
    pub fn is_pending(&self) -> bool {
        self.deadline.is_some()
    }

    /// `true` exactly once, on the first call at or after the deadline.
    pub fn fire(&mut self, now_ms: f64) -> bool {
        match self.deadline {
            Some(deadline) if now_ms >= deadline => {
                self.deadline = None;
                true
            }
            _ => false,
        }
    }
}

/// Payload of a `scroll:update` broadcast.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct ScrollUpdate {
    /// Reported (possibly smoothed) scroll offset in px.
    pub scroll_y: f32,
    /// Page progress in `[0, 1]`.
    pub progress: f32,
    /// `1` down, `-1` up.
    pub direction: i8,
    /// px per second.
    pub velocity: f32,
}

#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct ScrollTick {
    pub update: Option<ScrollUpdate>,
    /// Geometry must be refreshed before controllers read it this tick.
    pub refresh_due: bool,
}

pub struct ScrollSynchronizer {
    smoothing: SmoothingConfig,
    smoother: Option<Box<dyn SmoothScroller>>,
    mode: ScrollMode,
    native_y: f32,
    position: f32,
    last_reported: Option<f32>,
    last_tick_ms: Option<f64>,
    direction: i8,
    max_scroll: f32,
    resize: Debounce,
    orientation: Debounce,
    refresh_requested: bool,
    destroyed: bool,
}

impl std::fmt::Debug for ScrollSynchronizer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScrollSynchronizer")
            .field("mode", &self.mode)
            .field("native_y", &self.native_y)
            .field("position", &self.position)
            .field("max_scroll", &self.max_scroll)
            .field("destroyed", &self.destroyed)
            .finish()
    }
}

impl ScrollSynchronizer {
    /// Build the synchronizer and try to start smoothing. Any failure leaves
    /// it in `Native` mode.
    pub fn new(config: &PageConfig, smoother: Option<Box<dyn SmoothScroller>>) -> Self {
        let mut sync = Self {
            smoothing: config.smoothing,
            smoother: None,
            mode: ScrollMode::Native,
            native_y: 0.0,
            position: 0.0,
            last_reported: None,
            last_tick_ms: None,
            direction: 1,
            max_scroll: 0.0,
            resize: Debounce::new(config.resize_debounce_ms),
            orientation: Debounce::new(config.orientation_delay_ms),
            refresh_requested: false,
            destroyed: false,
        };
        if let Some(smoother) = smoother {
            sync.attach_smoother(smoother);
        }
        sync
    }

    /// Start a smoother. On init failure the synchronizer stays native.
    pub fn attach_smoother(&mut self, mut smoother: Box<dyn SmoothScroller>) {
        if self.destroyed {
            return;
        }
        if !self.smoothing.enabled {
            debug!("smooth scrolling disabled by config");
            return;
        }
        match smoother.init() {
            Ok(()) => {
                smoother.jump(self.native_y);
                self.smoother = Some(smoother);
                self.mode = ScrollMode::Smooth;
                info!("smooth scrolling active");
            }
            Err(err) => {
                warn!(error = %err, "smooth scrolling failed to start; using native scroll");
            }
        }
    }

    pub fn mode(&self) -> ScrollMode {
        self.mode
    }

    /// Reported scroll offset. Equals the native offset in `Native` mode.
    pub fn position(&self) -> f32 {
        self.position
    }

    pub fn native_position(&self) -> f32 {
        self.native_y
    }

    pub fn is_destroyed(&self) -> bool {
        self.destroyed
    }

    /// Drop to native scrolling (reduced motion, low tier). Not reversible.
    pub fn disable_smoothing(&mut self) {
        if let Some(mut smoother) = self.smoother.take() {
            smoother.destroy();
            info!("smooth scrolling disabled; using native scroll");
        }
        self.mode = ScrollMode::Native;
        self.position = self.native_y;
    }

    /// Document and viewport extent; bounds progress and `scroll_to`.
    pub fn set_bounds(&mut self, document_height: f32, viewport_height: f32) {
        self.max_scroll = (document_height - viewport_height).max(0.0);
    }

    pub fn on_native_scroll(&mut self, y: f32) {
        if self.destroyed {
            return;
        }
        self.native_y = y;
        match self.smoother.as_mut() {
            Some(smoother) => smoother.set_target(y),
            None => self.position = y,
        }
    }

    /// Wheel delta in smooth mode. Returns the new target the host should
    /// apply to the native scroller, or `None` when the browser handles it.
    pub fn on_wheel(&mut self, delta_y: f32) -> Option<f32> {
        if self.destroyed || self.mode != ScrollMode::Smooth {
            return None;
        }
        let target = (self.native_y + delta_y * self.smoothing.wheel_multiplier).clamp(0.0, self.max_scroll);
        self.on_native_scroll(target);
        Some(target)
    }

    /// Jump to an offset (anchor navigation). Returns the clamped offset.
    pub fn scroll_to(&mut self, y: f32) -> f32 {
        let y = if self.max_scroll > 0.0 {
            y.clamp(0.0, self.max_scroll)
        } else {
            y.max(0.0)
        };
        self.native_y = y;
        self.position = y;
        if let Some(smoother) = self.smoother.as_mut() {
            smoother.jump(y);
        }
        y
    }

    pub fn on_resize(&mut self, now_ms: f64) {
        if self.destroyed {
            return;
        }
        // A pending orientation refresh already covers this gesture.
        if !self.orientation.is_pending() {
            self.resize.schedule(now_ms);
        }
    }

    pub fn on_orientation_change(&mut self, now_ms: f64) {
        if self.destroyed {
            return;
        }
        self.resize.cancel();
        self.orientation.schedule(now_ms);
    }

    /// Immediate refresh on the next tick (a section's height changed).
    pub fn request_refresh(&mut self) {
        if !self.destroyed {
            self.refresh_requested = true;
        }
    }

    pub fn has_pending_refresh(&self) -> bool {
        self.refresh_requested || self.resize.is_pending() || self.orientation.is_pending()
    }

    pub fn tick(&mut self, now_ms: f64) -> ScrollTick {
        if self.destroyed {
            return ScrollTick::default();
        }
        let dt_ms = self.last_tick_ms.map_or(0.0, |last| (now_ms - last).max(0.0));
        self.last_tick_ms = Some(now_ms);

        if let Some(smoother) = self.smoother.as_mut() {
            self.position = smoother.step(dt_ms);
        }

        let resize_fired = self.resize.fire(now_ms);
        let orientation_fired = self.orientation.fire(now_ms);
        let refresh_due = std::mem::take(&mut self.refresh_requested) || resize_fired || orientation_fired;

        let update = match self.last_reported {
            Some(last) if last == self.position => None,
            last => {
                let delta = self.position - last.unwrap_or(self.position);
                if delta > 0.0 {
                    self.direction = 1;
                } else if delta < 0.0 {
                    self.direction = -1;
                }
                let velocity = if dt_ms > 0.0 {
                    (delta as f64 * 1000.0 / dt_ms) as f32
                } else {
                    0.0
                };
                let progress = if self.max_scroll > 0.0 {
                    (self.position / self.max_scroll).clamp(0.0, 1.0)
                } else {
                    0.0
                };
                self.last_reported = Some(self.position);
                Some(ScrollUpdate {
                    scroll_y: self.position,
                    progress,
                    direction: self.direction,
                    velocity,
                })
            }
        };

        ScrollTick {
            update,
            refresh_due,
        }
    }

    /// Stop smoothing and drop pending timers. Safe to call repeatedly.
    pub fn destroy(&mut self) {
        if self.destroyed {
            return;
        }
        self.destroyed = true;
        if let Some(mut smoother) = self.smoother.take() {
            smoother.destroy();
        }
        self.mode = ScrollMode::Native;
        self.resize.cancel();
        self.orientation.cancel();
        self.refresh_requested = false;
        debug!("scroll synchronizer destroyed");
    }
}
