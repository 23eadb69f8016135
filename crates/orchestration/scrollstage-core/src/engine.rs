//! Animation engine contract and an in-process headless engine.
//!
//! The orchestrator never reaches for a global engine object: an
//! [`AnimationEngine`] instance is created once by the host and injected into
//! the [`AnimationEngineContext`](crate::context::AnimationEngineContext).
//! Plugin availability is reported as a typed [`EngineCapabilities`]
//! descriptor instead of probing for properties.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::error::EngineInitError;
use crate::ids::TimelineId;
use crate::style::{Ease, ResolvedStyle, StyleProps, StyleWrite};
use crate::text::SplitMode;
use crate::trigger::ScrubMode;

/// Plugins the engine finished loading.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineCapabilities {
    pub has_scrub: bool,
    pub has_text_split: bool,
    pub has_smoothing: bool,
}

impl EngineCapabilities {
    pub const fn full() -> Self {
        Self {
            has_scrub: true,
            has_text_split: true,
            has_smoothing: true,
        }
    }
}

/// Result of polling asynchronous engine initialisation.
#[derive(Clone, Debug, PartialEq)]
pub enum InitPoll {
    Pending,
    Ready(EngineCapabilities),
    Failed(EngineInitError),
}

/// One tween inside a timeline, placed on the normalised `[0, 1]` timeline axis.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TimelineStep {
    pub target: String,
    #[serde(default)]
    pub from: StyleProps,
    #[serde(default)]
    pub to: StyleProps,
    #[serde(default)]
    pub ease: Ease,
    /// Start position on the timeline.
    #[serde(default)]
    pub at: f32,
    /// Length on the timeline.
    #[serde(default = "default_span")]
    pub span: f32,
}

fn default_span() -> f32 {
    1.0
}

/// Text split the engine must apply before the timeline can run.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SplitRequest {
    pub target: String,
    pub mode: SplitMode,
    pub fragments: usize,
}

/// Everything an engine needs to build one scroll-bound timeline.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TimelineSpec {
    pub label: String,
    pub steps: Vec<TimelineStep>,
    pub scrub: ScrubMode,
    /// Clock duration for non-scrubbed playback.
    pub duration_s: f32,
    /// Selector pinned while the timeline is active.
    pub pin: Option<String>,
    pub split: Option<SplitRequest>,
}

impl TimelineSpec {
    pub fn new(label: &str) -> Self {
        Self {
            label: label.to_string(),
            steps: Vec::new(),
            scrub: ScrubMode::None,
            duration_s: 1.0,
            pin: None,
            split: None,
        }
    }

    pub fn with_step(mut self, step: TimelineStep) -> Self {
        self.steps.push(step);
        self
    }

    /// Capability check: returns the name of the first missing plugin.
    pub fn missing_capability(&self, caps: &EngineCapabilities) -> Option<&'static str> {
        if self.scrub.is_scrubbed() && !caps.has_scrub {
            return Some("scroll-trigger scrub");
        }
        if self.split.is_some() && !caps.has_text_split {
            return Some("text split");
        }
        None
    }

    /// Every target this timeline animates, in first-appearance order.
    pub fn targets(&self) -> Vec<&str> {
        let mut out: Vec<&str> = Vec::new();
        for step in &self.steps {
            if !out.contains(&step.target.as_str()) {
                out.push(step.target.as_str());
            }
        }
        out
    }

    /// Styles at a given timeline progress.
    ///
    /// Steps are applied in order. A step that has not started yet only
    /// contributes its `from` state when it is the first step on its target.
    pub fn sample(&self, progress: f32) -> Vec<StyleWrite> {
        self.targets()
            .into_iter()
            .map(|target| {
                let mut style = ResolvedStyle::default();
                let mut first = true;
                for step in self.steps.iter().filter(|s| s.target == target) {
                    if !first && progress < step.at {
                        continue;
                    }
                    first = false;
                    let local = if step.span <= 0.0 {
                        if progress >= step.at {
                            1.0
                        } else {
                            0.0
                        }
                    } else {
                        ((progress - step.at) / step.span).clamp(0.0, 1.0)
                    };
                    let props = StyleProps::lerp(&step.from, &step.to, step.ease.apply(local));
                    style.apply(&props);
                }
                StyleWrite {
                    selector: target.to_string(),
                    style,
                }
            })
            .collect()
    }
}

/// Engine-facing command record. Adapters that drive an out-of-process engine
/// forward these; the headless engine keeps them as an audit log.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum EngineCommand {
    Create {
        timeline: TimelineId,
        spec: TimelineSpec,
    },
    Progress {
        timeline: TimelineId,
        progress: f32,
    },
    Play {
        timeline: TimelineId,
    },
    Pause {
        timeline: TimelineId,
    },
    Kill {
        timeline: TimelineId,
    },
    ClockPaused {
        paused: bool,
    },
}

/// Contract the orchestrator needs from an animation engine.
pub trait AnimationEngine {
    /// Poll plugin loading. Called repeatedly while the context is `Loading`.
    fn poll_init(&mut self) -> InitPoll;

    fn create_timeline(&mut self, spec: &TimelineSpec) -> TimelineId;

    /// Seek (or, for lagged scrub, retarget) a timeline.
    fn set_progress(&mut self, timeline: TimelineId, progress: f32);

    fn play(&mut self, timeline: TimelineId);

    fn pause(&mut self, timeline: TimelineId);

    /// Destroy a timeline and revert its inline styles. Unknown ids are ignored.
    fn kill(&mut self, timeline: TimelineId);

    /// Pause or resume the global animation clock.
    fn set_clock_paused(&mut self, paused: bool);

    /// Advance the clock by `dt_s` seconds and report timelines that completed.
    fn advance(&mut self, dt_s: f32) -> Vec<TimelineId>;

    /// Current styles for engines that compute them in-process.
    fn rendered_styles(&self) -> Vec<StyleWrite> {
        Vec::new()
    }
}

#[derive(Clone, Debug)]
enum InitScript {
    Ready { pending_polls: u32 },
    Fail(EngineInitError),
    Never,
}

#[derive(Clone, Debug)]
struct HeadlessTimeline {
    spec: TimelineSpec,
    progress: f32,
    target: f32,
    playing: bool,
}

/// Deterministic in-process engine. Computes styles itself and records every
/// command it receives.
#[derive(Clone, Debug)]
pub struct HeadlessEngine {
    caps: EngineCapabilities,
    script: InitScript,
    next_timeline: u32,
    timelines: IndexMap<TimelineId, HeadlessTimeline>,
    clock_paused: bool,
    log: Vec<EngineCommand>,
}

impl Default for HeadlessEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl HeadlessEngine {
    /// Engine that is ready on the first poll with every plugin.
    pub fn new() -> Self {
        Self::with_capabilities(EngineCapabilities::full())
    }

    pub fn with_capabilities(caps: EngineCapabilities) -> Self {
        Self {
            caps,
            script: InitScript::Ready { pending_polls: 0 },
            next_timeline: 0,
            timelines: IndexMap::new(),
            clock_paused: false,
            log: Vec::new(),
        }
    }

    /// Engine that reports `Pending` for `polls` polls before becoming ready.
    pub fn delayed(polls: u32) -> Self {
        Self {
            script: InitScript::Ready {
                pending_polls: polls,
            },
            ..Self::new()
        }
    }

    /// Engine whose plugin load fails.
    pub fn failing(err: EngineInitError) -> Self {
        Self {
            script: InitScript::Fail(err),
            ..Self::new()
        }
    }

    /// Engine that never finishes loading.
    pub fn never_ready() -> Self {
        Self {
            script: InitScript::Never,
            ..Self::new()
        }
    }

    pub fn commands(&self) -> &[EngineCommand] {
        &self.log
    }

    pub fn live_timelines(&self) -> usize {
        self.timelines.len()
    }

    pub fn progress(&self, timeline: TimelineId) -> Option<f32> {
        self.timelines.get(&timeline).map(|t| t.progress)
    }

    pub fn is_clock_paused(&self) -> bool {
        self.clock_paused
    }

    pub fn labels(&self) -> Vec<&str> {
        self.timelines
            .values()
            .map(|t| t.spec.label.as_str())
            .collect()
    }
}

impl AnimationEngine for HeadlessEngine {
    fn poll_init(&mut self) -> InitPoll {
        match &mut self.script {
            InitScript::Ready { pending_polls } if *pending_polls > 0 => {
                *pending_polls -= 1;
                InitPoll::Pending
            }
            InitScript::Ready { .. } => InitPoll::Ready(self.caps),
            InitScript::Fail(err) => InitPoll::Failed(err.clone()),
            InitScript::Never => InitPoll::Pending,
        }
    }

    fn create_timeline(&mut self, spec: &TimelineSpec) -> TimelineId {
        let id = TimelineId(self.next_timeline);
        self.next_timeline = self.next_timeline.wrapping_add(1);
        self.timelines.insert(
            id,
            HeadlessTimeline {
                spec: spec.clone(),
                progress: 0.0,
                target: 0.0,
                playing: false,
            },
        );
        self.log.push(EngineCommand::Create {
            timeline: id,
            spec: spec.clone(),
        });
        id
    }

    fn set_progress(&mut self, timeline: TimelineId, progress: f32) {
        let progress = progress.clamp(0.0, 1.0);
        if let Some(tl) = self.timelines.get_mut(&timeline) {
            tl.target = progress;
            if !matches!(tl.spec.scrub, ScrubMode::Lag(_)) {
                tl.progress = progress;
            }
            self.log.push(EngineCommand::Progress { timeline, progress });
        }
    }

    fn play(&mut self, timeline: TimelineId) {
        if let Some(tl) = self.timelines.get_mut(&timeline) {
            tl.playing = true;
            self.log.push(EngineCommand::Play { timeline });
        }
    }

    fn pause(&mut self, timeline: TimelineId) {
        if let Some(tl) = self.timelines.get_mut(&timeline) {
            tl.playing = false;
            self.log.push(EngineCommand::Pause { timeline });
        }
    }

    fn kill(&mut self, timeline: TimelineId) {
        if self.timelines.shift_remove(&timeline).is_some() {
            self.log.push(EngineCommand::Kill { timeline });
        }
    }

    fn set_clock_paused(&mut self, paused: bool) {
        if self.clock_paused != paused {
            self.clock_paused = paused;
            self.log.push(EngineCommand::ClockPaused { paused });
        }
    }

    fn advance(&mut self, dt_s: f32) -> Vec<TimelineId> {
        let mut completed = Vec::new();
        if self.clock_paused || dt_s <= 0.0 {
            return completed;
        }
        for (id, tl) in self.timelines.iter_mut() {
            match tl.spec.scrub {
                ScrubMode::Lag(lag) => {
                    let k = (dt_s / lag).min(1.0);
                    tl.progress += (tl.target - tl.progress) * k;
                }
                ScrubMode::Bool => {}
                ScrubMode::None => {
                    if !tl.playing {
                        continue;
                    }
                    let duration = tl.spec.duration_s.max(f32::EPSILON);
                    tl.progress += dt_s / duration;
                    if tl.progress >= 1.0 {
                        tl.progress = 1.0;
                        tl.playing = false;
                        completed.push(*id);
                    }
                }
            }
        }
        completed
    }

    fn rendered_styles(&self) -> Vec<StyleWrite> {
        self.timelines
            .values()
            .flat_map(|tl| tl.spec.sample(tl.progress))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fade(target: &str) -> TimelineStep {
        TimelineStep {
            target: target.to_string(),
            from: StyleProps::opacity(0.0),
            to: StyleProps::opacity(1.0),
            ease: Ease::Linear,
            at: 0.0,
            span: 1.0,
        }
    }

    #[test]
    fn delayed_engine_reports_pending_first() {
        let mut e = HeadlessEngine::delayed(2);
        assert_eq!(e.poll_init(), InitPoll::Pending);
        assert_eq!(e.poll_init(), InitPoll::Pending);
        assert_eq!(e.poll_init(), InitPoll::Ready(EngineCapabilities::full()));
    }

    #[test]
    fn clock_driven_timeline_completes_once() {
        let mut e = HeadlessEngine::new();
        let spec = TimelineSpec {
            duration_s: 0.5,
            ..TimelineSpec::new("fade").with_step(fade("#a"))
        };
        let id = e.create_timeline(&spec);
        assert!(e.advance(1.0).is_empty(), "not playing yet");
        e.play(id);
        assert!(e.advance(0.25).is_empty());
        assert_eq!(e.advance(0.3), vec![id]);
        assert!(e.advance(0.3).is_empty());
        assert_eq!(e.progress(id), Some(1.0));
    }

    #[test]
    fn paused_clock_freezes_timelines() {
        let mut e = HeadlessEngine::new();
        let id = e.create_timeline(&TimelineSpec::new("fade").with_step(fade("#a")));
        e.play(id);
        e.set_clock_paused(true);
        assert!(e.advance(5.0).is_empty());
        assert_eq!(e.progress(id), Some(0.0));
        e.set_clock_paused(false);
        assert_eq!(e.advance(1.0), vec![id]);
    }

    #[test]
    fn lagged_scrub_catches_up() {
        let mut e = HeadlessEngine::new();
        let spec = TimelineSpec {
            scrub: ScrubMode::Lag(1.0),
            ..TimelineSpec::new("lag").with_step(fade("#a"))
        };
        let id = e.create_timeline(&spec);
        e.set_progress(id, 1.0);
        assert_eq!(e.progress(id), Some(0.0));
        e.advance(0.5);
        let p = e.progress(id).unwrap();
        assert!((p - 0.5).abs() < 1e-5, "{p}");
    }

    #[test]
    fn sample_holds_later_steps_until_started() {
        let spec = TimelineSpec::new("two")
            .with_step(TimelineStep {
                span: 0.5,
                ..fade("#a")
            })
            .with_step(TimelineStep {
                target: "#a".into(),
                from: StyleProps::x(0.0),
                to: StyleProps::x(100.0),
                ease: Ease::Linear,
                at: 0.5,
                span: 0.5,
            });
        let early = spec.sample(0.25);
        assert_eq!(early.len(), 1);
        assert!((early[0].style.opacity - 0.5).abs() < 1e-6);
        assert_eq!(early[0].style.x, 0.0);
        let late = spec.sample(0.75);
        assert_eq!(late[0].style.opacity, 1.0);
        assert!((late[0].style.x - 50.0).abs() < 1e-4);
    }

    #[test]
    fn missing_capability_is_named() {
        let spec = TimelineSpec {
            scrub: ScrubMode::Bool,
            ..TimelineSpec::new("s")
        };
        let caps = EngineCapabilities {
            has_scrub: false,
            ..EngineCapabilities::full()
        };
        assert_eq!(spec.missing_capability(&caps), Some("scroll-trigger scrub"));
        assert_eq!(spec.missing_capability(&EngineCapabilities::full()), None);
    }
}
