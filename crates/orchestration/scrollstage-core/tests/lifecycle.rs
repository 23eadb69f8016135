use std::cell::RefCell;
use std::rc::Rc;

use scrollstage_core::{
    AnalyticsSink, AssetKind, AssetLoadError, AssetLoadState, AssetSpec, BindingKind, BindingSpec,
    ConnectionClass, ControllerState, DomMutation, EngineCommand, FallbackVisual, HeadlessEngine,
    Page, PageConfig, PageEvent, Rect, SectionSpec, SensorReadings, StaticLayout, Tier, TimelineId,
    Viewport,
};

fn init_tracing() {
    let default_filter = "scrollstage_core=debug";
    let filter = std::env::var("RUST_LOG").unwrap_or_else(|_| default_filter.to_string());
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_test_writer()
        .try_init();
}

fn layout() -> StaticLayout {
    StaticLayout::new(5000.0)
        .with_node("#hero", Rect::new(0.0, 0.0, 1440.0, 900.0))
        .with_node("#gallery", Rect::new(0.0, 900.0, 1440.0, 900.0))
        .with_scroll_width("#gallery-track", Rect::new(0.0, 1000.0, 1440.0, 600.0), 4000.0)
        .with_node("#press img", Rect::new(0.0, 3000.0, 600.0, 400.0))
        .with_node("#press video", Rect::new(0.0, 3600.0, 600.0, 400.0))
}

fn page() -> Page<HeadlessEngine> {
    let mut page = Page::new(
        PageConfig::default(),
        HeadlessEngine::new(),
        SensorReadings::default(),
        Viewport::new(1440.0, 900.0),
    )
    .expect("page");
    page.start();
    page
}

fn hero() -> SectionSpec {
    SectionSpec::new("hero", "#hero").with_binding(BindingSpec::new("fade", BindingKind::Entrance))
}

fn gallery() -> SectionSpec {
    SectionSpec::new("gallery", "#gallery")
        .with_anchor("#gallery-track")
        .with_binding(BindingSpec::new(
            "slide",
            BindingKind::HorizontalScroll {
                track: "#gallery-track".into(),
            },
        ))
        .with_binding(BindingSpec::new("rise", BindingKind::Scrub))
}

#[test]
fn mount_churn_cleans_up_exactly_once_newest_first() {
    init_tracing();
    let dom = layout();
    let mut page = page();

    for _ in 0..25 {
        page.mount_section(gallery(), &dom).unwrap();
        let report = page.unmount_section("gallery").unwrap();
        assert!(report.errors.is_empty());
        assert!(page.context().registry().is_empty());
        assert_eq!(page.context().registry().live_scope_count(), 0);
        assert_eq!(page.engine().live_timelines(), 0);
    }

    let frame = page.tick(0.0, &dom, None);
    let pins = frame
        .mutations
        .iter()
        .filter(|m| matches!(m, DomMutation::Pin { .. }))
        .count();
    let unpins = frame
        .mutations
        .iter()
        .filter(|m| matches!(m, DomMutation::Unpin { .. }))
        .count();
    assert_eq!((pins, unpins), (25, 25));

    // First cycle: slide (0) then rise (1) were created; teardown kills rise first.
    let kills: Vec<TimelineId> = page
        .engine()
        .commands()
        .iter()
        .filter_map(|c| match c {
            EngineCommand::Kill { timeline } => Some(*timeline),
            _ => None,
        })
        .take(2)
        .collect();
    assert_eq!(kills, vec![TimelineId(1), TimelineId(0)]);
}

#[test]
fn hidden_page_pauses_the_clock() {
    init_tracing();
    let dom = layout();
    let mut page = page();
    page.mount_section(hero(), &dom).unwrap();
    page.tick(0.0, &dom, None);
    assert_eq!(page.section("hero").unwrap().state(), ControllerState::Playing);

    page.handle_visibility(false);
    assert!(page.engine().is_clock_paused());
    page.tick(500.0, &dom, None);
    assert_eq!(page.engine().progress(TimelineId(0)), Some(0.0));

    page.handle_visibility(true);
    page.tick(1000.0, &dom, None);
    assert!(page.engine().progress(TimelineId(0)).unwrap() > 0.4);
    page.tick(1600.0, &dom, None);
    let hero = page.section("hero").unwrap();
    assert_eq!(hero.state(), ControllerState::Settled);
    assert!(hero.section_state().has_animated);
}

#[test]
fn lazy_assets_advance_monotonically() {
    init_tracing();
    let dom = layout();
    let mut page = page();
    let img = page.register_asset(AssetSpec {
        url: "/press/cover.avif".into(),
        kind: AssetKind::Image,
        selector: "#press img".into(),
        above_fold: false,
        poster: None,
        reserved: Some((600.0, 400.0)),
    });
    let video = page.register_asset(AssetSpec {
        url: "/press/reel.mp4".into(),
        kind: AssetKind::Video,
        selector: "#press video".into(),
        above_fold: false,
        poster: Some("/press/reel.jpg".into()),
        reserved: Some((600.0, 400.0)),
    });

    let frame = page.tick(0.0, &dom, None);
    assert!(frame.asset_requests.is_empty());

    page.handle_scroll(2800.0);
    let frame = page.tick(16.0, &dom, None);
    assert_eq!(frame.asset_requests.len(), 2);
    assert!(frame.events.contains(&PageEvent::AssetState {
        url: "/press/cover.avif".into(),
        state: AssetLoadState::Requested,
    }));

    page.handle_scroll(2900.0);
    assert!(page.tick(32.0, &dom, None).asset_requests.is_empty());

    page.asset_loaded(img).unwrap();
    assert!(matches!(
        page.retry_asset(img),
        Err(AssetLoadError::InvalidTransition { .. })
    ));
    assert!(page
        .asset_failed(img, AssetLoadError::Network {
            url: "/press/cover.avif".into(),
            reason: "late".into(),
        })
        .is_err());
    assert_eq!(page.assets().get(img).unwrap().load_state, AssetLoadState::Loaded);

    page.asset_failed(
        video,
        AssetLoadError::Decode {
            url: "/press/reel.mp4".into(),
            reason: "codec".into(),
        },
    )
    .unwrap();
    assert_eq!(
        page.asset_fallback(video),
        Some(FallbackVisual::Poster {
            url: "/press/reel.jpg".into(),
            width: 600.0,
            height: 400.0,
        })
    );
    page.retry_asset(video).unwrap();
    let frame = page.tick(48.0, &dom, None);
    assert_eq!(frame.asset_requests.len(), 1);
    assert_eq!(frame.asset_requests[0].id, video);
}

#[test]
fn performance_degradation_is_never_undone() {
    init_tracing();
    let dom = layout();
    let mut page = page();
    page.mount_section(hero(), &dom).unwrap();
    assert_eq!(page.profile().tier, Tier::High);

    // 10 fps for two seconds.
    let mut degraded = None;
    for i in 0..=21 {
        let frame = page.tick(i as f64 * 100.0, &dom, None);
        if let Some(PageEvent::CapabilityTier { tier }) = frame
            .events
            .iter()
            .find(|e| matches!(e, PageEvent::CapabilityTier { .. }))
        {
            degraded = Some(*tier);
        }
    }
    assert_eq!(degraded, Some(Tier::Mid));
    assert_eq!(page.section("hero").unwrap().builds(), 2);

    page.handle_network_change(ConnectionClass::FourG);
    assert_eq!(page.profile().tier, Tier::Mid);
    page.handle_network_change(ConnectionClass::Slow2g);
    assert_eq!(page.profile().tier, Tier::Low);
    page.handle_network_change(ConnectionClass::FourG);
    assert_eq!(page.profile().tier, Tier::Mid);
}

struct Recorder(Rc<RefCell<Vec<&'static str>>>);

impl AnalyticsSink for Recorder {
    fn track(&mut self, event: &PageEvent) -> anyhow::Result<()> {
        self.0.borrow_mut().push(event.name());
        Ok(())
    }
}

struct Offline;

impl AnalyticsSink for Offline {
    fn track(&mut self, _event: &PageEvent) -> anyhow::Result<()> {
        anyhow::bail!("beacon endpoint unreachable")
    }
}

#[test]
fn failing_sink_does_not_disturb_animation_or_other_sinks() {
    init_tracing();
    let dom = layout();
    let seen = Rc::new(RefCell::new(Vec::new()));
    let mut page = Page::new(
        PageConfig::default(),
        HeadlessEngine::new(),
        SensorReadings::default(),
        Viewport::new(1440.0, 900.0),
    )
    .unwrap()
    .with_sink(Box::new(Offline))
    .with_sink(Box::new(Recorder(seen.clone())));
    page.start();
    page.mount_section(hero(), &dom).unwrap();

    let frame = page.tick(0.0, &dom, None);
    assert_eq!(page.section("hero").unwrap().state(), ControllerState::Playing);
    let names: Vec<&str> = frame.events.iter().map(PageEvent::name).collect();
    assert_eq!(*seen.borrow(), names);
    assert!(names.contains(&"capability:tier"));
    assert!(names.contains(&"section:enter"));
    assert!(names.contains(&"scroll:update"));
}
