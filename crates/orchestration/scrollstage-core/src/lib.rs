//! Scrollstage Core (engine-agnostic)
//!
//! Orchestration for scroll-driven, long-form pages: a single animation
//! engine context with scoped cleanup, a scroll synchronizer, capability
//! detection with tiered degradation, an asset load scheduler, per-section
//! animation controllers and a frame-rate monitor. Hosts own the DOM and the
//! clock; they feed callbacks in and apply [`PageFrame`]s out.

pub mod assets;
pub mod capability;
pub mod config;
pub mod context;
pub mod engine;
pub mod error;
pub mod events;
pub mod geometry;
pub mod ids;
pub mod page;
pub mod performance;
pub mod registry;
pub mod scroll;
pub mod section;
pub mod style;
pub mod text;
pub mod trigger;

// Re-exports for hosts and bindings
pub use assets::{
    AssetKind, AssetLoadScheduler, AssetLoadState, AssetPriority, AssetRequest, AssetSpec,
    ConfigProvider, FallbackVisual, LoadDecision, LoadingMode, TierConfigProvider,
};
pub use capability::{
    detect, CapabilityDetector, CapabilityProfile, ConnectionClass, ImageFormat, SensorReadings,
    Tier,
};
pub use config::{AssetPolicy, Breakpoints, PageConfig, PerformanceThresholds, SmoothingConfig};
pub use context::{AnimationEngineContext, EngineState, TeardownReport};
pub use engine::{
    AnimationEngine, EngineCapabilities, EngineCommand, HeadlessEngine, InitPoll, SplitRequest,
    TimelineSpec, TimelineStep,
};
pub use error::{
    AnchorMissingError, AssetLoadError, CleanupError, ConfigError, EngineInitError, MeasureError,
    PageError, RefreshGeometryError, SectionError,
};
pub use events::{AnalyticsSink, EventBus, PageEvent};
pub use geometry::{DomProbe, Rect, StaticLayout, Viewport, ViewportClass};
pub use ids::{AssetId, HandleId, ScopeId, TimelineId};
pub use page::{
    FallbackAction, Page, PageFallback, PageFrame, PageHealth, SectionBoundary, SectionFault,
};
pub use performance::{PerformanceFeedback, PerformanceMetrics, PerformanceMonitor};
pub use registry::{cleanup, AnimationHandle, Cleanup, CleanupRegistry, HandleState};
pub use scroll::{LerpSmoother, ScrollMode, ScrollSynchronizer, ScrollUpdate, SmoothScroller};
pub use section::{
    AnchorSpec, ArmEnv, BindingKind, BindingSpec, ControllerState, DomMutation, MutationQueue,
    SectionAnimationController, SectionSpec, SectionState,
};
pub use style::{Ease, ResolvedStyle, StyleProps, StyleWrite};
pub use text::SplitMode;
pub use trigger::{Direction, EndPosition, ScrubMode, TriggerPosition};
