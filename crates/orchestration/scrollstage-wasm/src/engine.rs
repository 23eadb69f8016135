//! Engine adapter for a JS-side animation library.
//!
//! The orchestrator's calls are queued as [`EngineCommand`]s for the host to
//! replay against the real library once per frame. Readiness and timeline
//! completion flow back in through the `report_*` methods.

use std::collections::VecDeque;

use scrollstage_core::{
    AnimationEngine, EngineCapabilities, EngineCommand, EngineInitError, InitPoll, TimelineId,
    TimelineSpec,
};

#[derive(Debug, Default)]
pub struct QueuedEngine {
    init: Option<Result<EngineCapabilities, EngineInitError>>,
    next_timeline: u32,
    commands: Vec<EngineCommand>,
    completed: VecDeque<TimelineId>,
}

impl QueuedEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn report_ready(&mut self, caps: EngineCapabilities) {
        self.init = Some(Ok(caps));
    }

    pub fn report_failed(&mut self, err: EngineInitError) {
        self.init = Some(Err(err));
    }

    pub fn report_complete(&mut self, timeline: TimelineId) {
        if !self.completed.contains(&timeline) {
            self.completed.push_back(timeline);
        }
    }

    pub fn drain_commands(&mut self) -> Vec<EngineCommand> {
        std::mem::take(&mut self.commands)
    }
}

impl AnimationEngine for QueuedEngine {
    fn poll_init(&mut self) -> InitPoll {
        match &self.init {
            None => InitPoll::Pending,
            Some(Ok(caps)) => InitPoll::Ready(*caps),
            Some(Err(err)) => InitPoll::Failed(err.clone()),
        }
    }

    fn create_timeline(&mut self, spec: &TimelineSpec) -> TimelineId {
        let timeline = TimelineId(self.next_timeline);
        self.next_timeline = self.next_timeline.wrapping_add(1);
        self.commands.push(EngineCommand::Create {
            timeline,
            spec: spec.clone(),
        });
        timeline
    }

    fn set_progress(&mut self, timeline: TimelineId, progress: f32) {
        let progress = progress.clamp(0.0, 1.0);
        // Only the latest seek per timeline matters to the host.
        if let Some(EngineCommand::Progress {
            timeline: last,
            progress: p,
        }) = self.commands.last_mut()
        {
            if *last == timeline {
                *p = progress;
                return;
            }
        }
        self.commands.push(EngineCommand::Progress { timeline, progress });
    }

    fn play(&mut self, timeline: TimelineId) {
        self.commands.push(EngineCommand::Play { timeline });
    }

    fn pause(&mut self, timeline: TimelineId) {
        self.commands.push(EngineCommand::Pause { timeline });
    }

    fn kill(&mut self, timeline: TimelineId) {
        self.completed.retain(|t| *t != timeline);
        self.commands.push(EngineCommand::Kill { timeline });
    }

    fn set_clock_paused(&mut self, paused: bool) {
        self.commands.push(EngineCommand::ClockPaused { paused });
    }

    fn advance(&mut self, _dt_s: f32) -> Vec<TimelineId> {
        self.completed.drain(..).collect()
    }
}
