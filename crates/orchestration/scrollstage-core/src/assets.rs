//! Lazy/eager asset loading driven by capability tier and visibility.
//!
//! Load state only moves forward (`Idle → Requested → Loaded | Errored`).
//! The single way back is [`AssetLoadScheduler::retry`], and only from
//! `Errored`.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::capability::{CapabilityProfile, ImageFormat, Tier};
use crate::config::AssetPolicy;
use crate::error::AssetLoadError;
use crate::geometry::{visible_ratio, DomProbe, Rect};
use crate::ids::{AssetId, IdAllocator};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AssetKind {
    Image,
    Video,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AssetPriority {
    Eager,
    Lazy,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AssetLoadState {
    Idle,
    Requested,
    Loaded,
    Errored,
}

impl AssetLoadState {
    #[inline]
    pub fn name(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Requested => "requested",
            Self::Loaded => "loaded",
            Self::Errored => "errored",
        }
    }

    /// Forward transitions. `Errored → Requested` is not one of them.
    #[inline]
    pub fn can_advance_to(&self, next: AssetLoadState) -> bool {
        matches!(
            (self, next),
            (Self::Idle, Self::Requested)
                | (Self::Requested, Self::Loaded)
                | (Self::Requested, Self::Errored)
        )
    }
}

/// When the host should start fetching.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoadingMode {
    /// Fetch right away.
    Immediate,
    /// Fetch once the element nears the viewport.
    OnVisible,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VideoPreload {
    None,
    Metadata,
    Auto,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageConfig {
    /// Encoder quality, 1..=100.
    pub quality: u8,
    pub format: ImageFormat,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct VideoConfig {
    pub quality: u8,
    pub preload: VideoPreload,
    pub autoplay: bool,
}

/// Per-kind loading parameters for the current profile.
pub trait ConfigProvider {
    fn optimal_image_config(&self, profile: &CapabilityProfile, is_above_fold: bool) -> ImageConfig;

    fn optimal_video_config(&self, profile: &CapabilityProfile, is_above_fold: bool) -> VideoConfig;
}

/// Default provider: quality by tier, best decodable image format, and
/// conservative video preloading on weak devices.
#[derive(Clone, Copy, Debug, Default)]
pub struct TierConfigProvider;

impl TierConfigProvider {
    fn quality(tier: Tier, is_above_fold: bool) -> u8 {
        match (tier, is_above_fold) {
            (Tier::High, _) => 90,
            (Tier::Mid, true) => 80,
            (Tier::Mid, false) => 75,
            (Tier::Low, true) => 60,
            (Tier::Low, false) => 50,
        }
    }
}

impl ConfigProvider for TierConfigProvider {
    fn optimal_image_config(&self, profile: &CapabilityProfile, is_above_fold: bool) -> ImageConfig {
        ImageConfig {
            quality: Self::quality(profile.tier, is_above_fold),
            format: profile.preferred_image_format,
        }
    }

    fn optimal_video_config(&self, profile: &CapabilityProfile, is_above_fold: bool) -> VideoConfig {
        let preload = match (profile.tier, is_above_fold) {
            (Tier::Low, _) => VideoPreload::None,
            (_, true) => VideoPreload::Auto,
            (_, false) => VideoPreload::Metadata,
        };
        VideoConfig {
            quality: Self::quality(profile.tier, is_above_fold),
            preload,
            autoplay: profile.tier != Tier::Low && !profile.reduced_motion,
        }
    }
}

/// Output of [`AssetLoadScheduler::decide`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoadDecision {
    pub priority: AssetPriority,
    pub quality: u8,
    pub loading_mode: LoadingMode,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image: Option<ImageConfig>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub video: Option<VideoConfig>,
}

/// Static stand-in rendered for an errored asset. Always keeps the reserved box.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FallbackVisual {
    Poster { url: String, width: f32, height: f32 },
    SolidBlock { width: f32, height: f32 },
}

/// Host-supplied description of an asset to schedule.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AssetSpec {
    pub url: String,
    pub kind: AssetKind,
    /// Element the asset renders into; measured for visibility.
    pub selector: String,
    #[serde(default)]
    pub above_fold: bool,
    #[serde(default)]
    pub poster: Option<String>,
    /// Reserved layout box (width, height) in CSS pixels.
    #[serde(default)]
    pub reserved: Option<(f32, f32)>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AssetDescriptor {
    pub id: AssetId,
    pub url: String,
    pub kind: AssetKind,
    pub selector: String,
    pub priority: AssetPriority,
    pub load_state: AssetLoadState,
    pub decision: LoadDecision,
    pub poster: Option<String>,
    pub reserved: Option<(f32, f32)>,
    pub retries: u32,
    pub last_error: Option<AssetLoadError>,
}

/// A fetch the host must start.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AssetRequest {
    pub id: AssetId,
    pub url: String,
    pub decision: LoadDecision,
}

/// A recorded load-state change, surfaced as an `asset:state` event.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AssetTransition {
    pub id: AssetId,
    pub url: String,
    pub state: AssetLoadState,
}

pub struct AssetLoadScheduler {
    policy: AssetPolicy,
    profile: CapabilityProfile,
    provider: Box<dyn ConfigProvider>,
    ids: IdAllocator,
    assets: IndexMap<AssetId, AssetDescriptor>,
    requests: Vec<AssetRequest>,
    transitions: Vec<AssetTransition>,
}

impl std::fmt::Debug for AssetLoadScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AssetLoadScheduler")
            .field("policy", &self.policy)
            .field("tier", &self.profile.tier)
            .field("assets", &self.assets.len())
            .field("pending_requests", &self.requests.len())
            .finish()
    }
}

impl AssetLoadScheduler {
    pub fn new(policy: AssetPolicy, profile: CapabilityProfile) -> Self {
        Self::with_provider(policy, profile, Box::new(TierConfigProvider))
    }

    pub fn with_provider(
        policy: AssetPolicy,
        profile: CapabilityProfile,
        provider: Box<dyn ConfigProvider>,
    ) -> Self {
        Self {
            policy,
            profile,
            provider,
            ids: IdAllocator::new(),
            assets: IndexMap::new(),
            requests: Vec::new(),
            transitions: Vec::new(),
        }
    }

    /// Loading decision for `kind` at the current tier. Above-fold content is
    /// always eager; only its quality follows the tier.
    pub fn decide(&self, kind: AssetKind, is_above_fold: bool) -> LoadDecision {
        let (priority, loading_mode) = if is_above_fold {
            (AssetPriority::Eager, LoadingMode::Immediate)
        } else {
            (AssetPriority::Lazy, LoadingMode::OnVisible)
        };
        match kind {
            AssetKind::Image => {
                let image = self.provider.optimal_image_config(&self.profile, is_above_fold);
                LoadDecision {
                    priority,
                    quality: image.quality,
                    loading_mode,
                    image: Some(image),
                    video: None,
                }
            }
            AssetKind::Video => {
                let video = self.provider.optimal_video_config(&self.profile, is_above_fold);
                LoadDecision {
                    priority,
                    quality: video.quality,
                    loading_mode,
                    image: None,
                    video: Some(video),
                }
            }
        }
    }

    /// Register an asset. Above-fold assets are requested immediately.
    pub fn register(&mut self, spec: AssetSpec) -> AssetId {
        let id = self.ids.alloc_asset();
        let decision = self.decide(spec.kind, spec.above_fold);
        self.assets.insert(
            id,
            AssetDescriptor {
                id,
                url: spec.url,
                kind: spec.kind,
                selector: spec.selector,
                priority: decision.priority,
                load_state: AssetLoadState::Idle,
                decision,
                poster: spec.poster,
                reserved: spec.reserved,
                retries: 0,
                last_error: None,
            },
        );
        if decision.priority == AssetPriority::Eager {
            if let Err(err) = self.request(id) {
                debug!(error = %err, "eager asset not requested");
            }
        }
        id
    }

    pub fn get(&self, id: AssetId) -> Option<&AssetDescriptor> {
        self.assets.get(&id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &AssetDescriptor> {
        self.assets.values()
    }

    pub fn len(&self) -> usize {
        self.assets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.assets.is_empty()
    }

    pub fn profile(&self) -> &CapabilityProfile {
        &self.profile
    }

    fn transition(&mut self, id: AssetId, next: AssetLoadState) -> Result<(), AssetLoadError> {
        let asset = self
            .assets
            .get_mut(&id)
            .ok_or(AssetLoadError::UnknownAsset(id.0))?;
        if !asset.load_state.can_advance_to(next) {
            return Err(AssetLoadError::InvalidTransition {
                from: asset.load_state.name().to_string(),
                to: next.name().to_string(),
            });
        }
        asset.load_state = next;
        self.transitions.push(AssetTransition {
            id,
            url: asset.url.clone(),
            state: next,
        });
        Ok(())
    }

    fn request(&mut self, id: AssetId) -> Result<(), AssetLoadError> {
        self.transition(id, AssetLoadState::Requested)?;
        if let Some(asset) = self.assets.get(&id) {
            debug!(url = %asset.url, quality = asset.decision.quality, "asset requested");
            self.requests.push(AssetRequest {
                id,
                url: asset.url.clone(),
                decision: asset.decision,
            });
        }
        Ok(())
    }

    /// Intersection report for one asset. Returns `true` when this report
    /// moved the asset to `Requested`.
    pub fn on_intersection(&mut self, id: AssetId, ratio: f32) -> bool {
        let idle = self
            .assets
            .get(&id)
            .is_some_and(|a| a.load_state == AssetLoadState::Idle);
        idle && ratio >= self.policy.intersection_threshold && self.request(id).is_ok()
    }

    /// Measure every idle asset against the viewport (grown by the pre-load
    /// margin) and request the ones that crossed the threshold.
    pub fn scan_visibility(&mut self, dom: &dyn DomProbe, viewport: &Rect) -> Vec<AssetId> {
        let idle: Vec<(AssetId, String)> = self
            .assets
            .values()
            .filter(|a| a.load_state == AssetLoadState::Idle)
            .map(|a| (a.id, a.selector.clone()))
            .collect();
        let mut requested = Vec::new();
        for (id, selector) in idle {
            match dom.measure(&selector) {
                Ok(rect) => {
                    let ratio = visible_ratio(&rect, viewport, self.policy.preload_margin_px);
                    if self.on_intersection(id, ratio) {
                        requested.push(id);
                    }
                }
                Err(err) => debug!(%selector, error = %err, "asset element not measurable yet"),
            }
        }
        requested
    }

    pub fn mark_loaded(&mut self, id: AssetId) -> Result<(), AssetLoadError> {
        self.transition(id, AssetLoadState::Loaded)
    }

    pub fn mark_errored(&mut self, id: AssetId, error: AssetLoadError) -> Result<(), AssetLoadError> {
        self.transition(id, AssetLoadState::Errored)?;
        warn!(error = %error, "asset failed; showing fallback");
        if let Some(asset) = self.assets.get_mut(&id) {
            asset.last_error = Some(error);
        }
        Ok(())
    }

    /// Explicit retry: the only path from `Errored` back to `Requested`.
    pub fn retry(&mut self, id: AssetId) -> Result<(), AssetLoadError> {
        let asset = self
            .assets
            .get_mut(&id)
            .ok_or(AssetLoadError::UnknownAsset(id.0))?;
        if asset.load_state != AssetLoadState::Errored {
            return Err(AssetLoadError::InvalidTransition {
                from: asset.load_state.name().to_string(),
                to: AssetLoadState::Requested.name().to_string(),
            });
        }
        asset.load_state = AssetLoadState::Requested;
        asset.retries += 1;
        asset.last_error = None;
        let (url, decision) = (asset.url.clone(), asset.decision);
        self.transitions.push(AssetTransition {
            id,
            url: url.clone(),
            state: AssetLoadState::Requested,
        });
        self.requests.push(AssetRequest { id, url, decision });
        Ok(())
    }

    /// Fallback visual for an errored asset; `None` while it is not errored.
    pub fn fallback(&self, id: AssetId) -> Option<FallbackVisual> {
        let asset = self.assets.get(&id)?;
        if asset.load_state != AssetLoadState::Errored {
            return None;
        }
        let (width, height) = asset.reserved.unwrap_or((0.0, 0.0));
        Some(match (asset.kind, &asset.poster) {
            (AssetKind::Video, Some(url)) => FallbackVisual::Poster {
                url: url.clone(),
                width,
                height,
            },
            _ => FallbackVisual::SolidBlock { width, height },
        })
    }

    /// New capability profile. Decisions are refreshed for assets not yet
    /// requested; in-flight and loaded assets keep theirs.
    pub fn set_profile(&mut self, profile: CapabilityProfile) {
        self.profile = profile;
        let idle: Vec<(AssetId, AssetKind, bool)> = self
            .assets
            .values()
            .filter(|a| a.load_state == AssetLoadState::Idle)
            .map(|a| (a.id, a.kind, a.priority == AssetPriority::Eager))
            .collect();
        for (id, kind, above_fold) in idle {
            let decision = self.decide(kind, above_fold);
            if let Some(asset) = self.assets.get_mut(&id) {
                asset.decision = decision;
            }
        }
    }

    pub fn drain_requests(&mut self) -> Vec<AssetRequest> {
        std::mem::take(&mut self.requests)
    }

    pub fn drain_transitions(&mut self) -> Vec<AssetTransition> {
        std::mem::take(&mut self.transitions)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capability::{detect, ConnectionClass, SensorReadings};
    use crate::geometry::{StaticLayout, Viewport};

    fn profile(tier_cores: u32) -> CapabilityProfile {
        detect(&SensorReadings {
            core_count: tier_cores,
            memory_gb: Some(8.0),
            connection: ConnectionClass::FourG,
            reduced_motion: false,
            supports_avif: false,
            supports_webp: true,
        })
    }

    fn image(url: &str, selector: &str, above_fold: bool) -> AssetSpec {
        AssetSpec {
            url: url.into(),
            kind: AssetKind::Image,
            selector: selector.into(),
            above_fold,
            poster: None,
            reserved: Some((400.0, 300.0)),
        }
    }

    #[test]
    fn above_fold_is_eager_even_on_low_tier() {
        let low = profile(2);
        assert_eq!(low.tier, Tier::Low);
        let mut s = AssetLoadScheduler::new(AssetPolicy::default(), low);
        let hero = s.register(image("/hero.webp", "#hero", true));
        let d = s.get(hero).unwrap();
        assert_eq!(d.priority, AssetPriority::Eager);
        assert_eq!(d.load_state, AssetLoadState::Requested);
        assert!(d.decision.quality < 90);
        assert_eq!(d.decision.image.unwrap().format, ImageFormat::Webp);
        assert_eq!(s.drain_requests().len(), 1);
    }

    #[test]
    fn lazy_assets_wait_for_threshold_with_margin() {
        let mut s = AssetLoadScheduler::new(AssetPolicy::default(), profile(8));
        let id = s.register(image("/a.webp", "#a", false));
        assert_eq!(s.get(id).unwrap().load_state, AssetLoadState::Idle);

        let mut layout = StaticLayout::new(4000.0).with_node("#a", Rect::new(0.0, 840.0, 100.0, 100.0));
        let vp = Viewport::new(1000.0, 800.0).rect_at(0.0);
        // 40px below the fold: the 50px margin exposes exactly 10%.
        assert_eq!(s.scan_visibility(&layout, &vp), vec![id]);

        let late = s.register(image("/b.webp", "#b", false));
        layout.set_rect("#b", Rect::new(0.0, 900.0, 100.0, 100.0));
        assert!(s.scan_visibility(&layout, &vp).is_empty());
        assert!(!s.on_intersection(late, 0.05));
        assert!(s.on_intersection(late, 0.1));
    }

    #[test]
    fn load_state_is_monotonic() {
        let mut s = AssetLoadScheduler::new(AssetPolicy::default(), profile(8));
        let id = s.register(image("/a.webp", "#a", true));
        s.mark_loaded(id).unwrap();
        assert!(s.retry(id).is_err());
        assert!(matches!(
            s.mark_errored(id, AssetLoadError::Decode { url: "/a.webp".into(), reason: "x".into() }),
            Err(AssetLoadError::InvalidTransition { .. })
        ));
        assert_eq!(s.get(id).unwrap().load_state, AssetLoadState::Loaded);
        assert!(!s.on_intersection(id, 1.0));
    }

    #[test]
    fn retry_only_after_error_and_fallback_keeps_box() {
        let mut s = AssetLoadScheduler::new(AssetPolicy::default(), profile(8));
        let id = s.register(AssetSpec {
            url: "/intro.mp4".into(),
            kind: AssetKind::Video,
            selector: "#intro".into(),
            above_fold: true,
            poster: Some("/intro.jpg".into()),
            reserved: Some((1280.0, 720.0)),
        });
        assert_eq!(s.fallback(id), None);
        s.mark_errored(
            id,
            AssetLoadError::Network {
                url: "/intro.mp4".into(),
                reason: "timeout".into(),
            },
        )
        .unwrap();
        assert_eq!(
            s.fallback(id),
            Some(FallbackVisual::Poster {
                url: "/intro.jpg".into(),
                width: 1280.0,
                height: 720.0
            })
        );
        s.drain_requests();
        s.retry(id).unwrap();
        assert_eq!(s.get(id).unwrap().retries, 1);
        assert_eq!(s.drain_requests().len(), 1);
        assert!(s.retry(id).is_err());
        let states: Vec<_> = s.drain_transitions().into_iter().map(|t| t.state).collect();
        assert_eq!(
            states,
            vec![AssetLoadState::Requested, AssetLoadState::Errored, AssetLoadState::Requested]
        );
    }

    #[test]
    fn image_fallback_is_solid_block() {
        let mut s = AssetLoadScheduler::new(AssetPolicy::default(), profile(8));
        let id = s.register(image("/a.webp", "#a", true));
        s.mark_errored(id, AssetLoadError::Decode { url: "/a.webp".into(), reason: "bad".into() })
            .unwrap();
        assert_eq!(
            s.fallback(id),
            Some(FallbackVisual::SolidBlock {
                width: 400.0,
                height: 300.0
            })
        );
    }

    #[test]
    fn profile_change_only_touches_idle_assets() {
        let mut s = AssetLoadScheduler::new(AssetPolicy::default(), profile(8));
        let eager = s.register(image("/a.webp", "#a", true));
        let lazy = s.register(image("/b.webp", "#b", false));
        s.set_profile(profile(2));
        assert_eq!(s.get(eager).unwrap().decision.quality, 90);
        assert_eq!(s.get(lazy).unwrap().decision.quality, 50);
    }
}
