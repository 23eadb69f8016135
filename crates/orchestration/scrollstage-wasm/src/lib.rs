use js_sys::Function;
use serde_wasm_bindgen as swb;
use wasm_bindgen::prelude::*;

use scrollstage_core::{
    AssetId, AssetLoadError, AssetSpec, ConnectionClass, EngineCapabilities, EngineInitError,
    LerpSmoother, Page, PageConfig, SectionSpec, SensorReadings, StaticLayout, TimelineId,
    Viewport,
};

mod engine;
mod sink;

pub use engine::QueuedEngine;
pub use sink::JsSink;

fn jsvalue_is_undefined_or_null(v: &JsValue) -> bool {
    v.is_undefined() || v.is_null()
}

fn from_js_or_default<T>(value: JsValue, what: &str) -> Result<T, JsError>
where
    T: Default + serde::de::DeserializeOwned,
{
    if jsvalue_is_undefined_or_null(&value) {
        Ok(T::default())
    } else {
        swb::from_value(value).map_err(|e| JsError::new(&format!("{what} error: {e}")))
    }
}

fn to_js<T: serde::Serialize + ?Sized>(value: &T, what: &str) -> Result<JsValue, JsError> {
    swb::to_value(value).map_err(|e| JsError::new(&format!("{what} error: {e}")))
}

/// A scroll-driven page. The host forwards DOM callbacks, replays
/// `drain_engine_commands()` against its animation library, and applies the
/// frame returned by `tick()`.
#[wasm_bindgen]
pub struct ScrollstagePage {
    page: Page<QueuedEngine>,
    layout: StaticLayout,
}

#[wasm_bindgen]
impl ScrollstagePage {
    /// Create a page. `config` and `readings` accept partial objects or
    /// undefined/null for defaults.
    ///   new ScrollstagePage({ resize_debounce_ms: 200 }, { core_count: 8 }, innerWidth, innerHeight)
    #[wasm_bindgen(constructor)]
    pub fn new(
        config: JsValue,
        readings: JsValue,
        width: f32,
        height: f32,
    ) -> Result<ScrollstagePage, JsError> {
        #[cfg(feature = "console_error")]
        console_error_panic_hook::set_once();

        let cfg: PageConfig = from_js_or_default(config, "config")?;
        let readings: SensorReadings = from_js_or_default(readings, "sensor readings")?;
        let page = Page::new(cfg, QueuedEngine::new(), readings, Viewport::new(width, height))
            .map_err(|e| JsError::new(&e.to_string()))?;
        Ok(ScrollstagePage {
            page,
            layout: StaticLayout::default(),
        })
    }

    /// Begin engine initialisation. Returns the engine state name.
    #[wasm_bindgen]
    pub fn start(&mut self) -> String {
        self.page.start().name().to_string()
    }

    /// The JS engine finished loading. `caps` is `{ has_scrub, has_text_split, has_smoothing }`.
    #[wasm_bindgen(js_name = engine_ready)]
    pub fn engine_ready(&mut self, caps: JsValue) -> Result<(), JsError> {
        let caps: EngineCapabilities = if jsvalue_is_undefined_or_null(&caps) {
            EngineCapabilities::full()
        } else {
            swb::from_value(caps).map_err(|e| JsError::new(&format!("capabilities error: {e}")))?
        };
        self.page.engine_mut().report_ready(caps);
        Ok(())
    }

    #[wasm_bindgen(js_name = engine_failed)]
    pub fn engine_failed(&mut self, reason: String) {
        self.page
            .engine_mut()
            .report_failed(EngineInitError::Unavailable { reason });
    }

    #[wasm_bindgen(js_name = timeline_complete)]
    pub fn timeline_complete(&mut self, timeline: u32) {
        self.page.engine_mut().report_complete(TimelineId(timeline));
    }

    /// Commands queued for the JS engine since the last call.
    #[wasm_bindgen(js_name = drain_engine_commands)]
    pub fn drain_engine_commands(&mut self) -> Result<JsValue, JsError> {
        let commands = self.page.engine_mut().drain_commands();
        to_js(&commands, "engine commands")
    }

    /// Replace the measured layout snapshot used for every geometry read.
    #[wasm_bindgen(js_name = set_layout)]
    pub fn set_layout(&mut self, layout: JsValue) -> Result<(), JsError> {
        self.layout = swb::from_value(layout).map_err(|e| JsError::new(&format!("layout error: {e}")))?;
        Ok(())
    }

    /// Register and arm a section from its spec (JSON object or string).
    #[wasm_bindgen(js_name = mount_section)]
    pub fn mount_section(&mut self, spec: JsValue) -> Result<(), JsError> {
        let spec: SectionSpec = match spec.as_string() {
            Some(json) => serde_json::from_str(&json)
                .map_err(|e| JsError::new(&format!("section spec parse error: {e}")))?,
            None => swb::from_value(spec)
                .map_err(|e| JsError::new(&format!("section spec error: {e}")))?,
        };
        self.page
            .mount_section(spec, &self.layout)
            .map_err(|e| JsError::new(&e.to_string()))
    }

    /// Returns the number of cleanups that ran.
    #[wasm_bindgen(js_name = unmount_section)]
    pub fn unmount_section(&mut self, id: String) -> Result<u32, JsError> {
        let report = self
            .page
            .unmount_section(&id)
            .map_err(|e| JsError::new(&e.to_string()))?;
        Ok(report.invoked as u32)
    }

    /// Returns the controller state after the retry.
    #[wasm_bindgen(js_name = retry_section)]
    pub fn retry_section(&mut self, id: String) -> Result<JsValue, JsError> {
        let state = self
            .page
            .retry_section(&id, &self.layout)
            .map_err(|e| JsError::new(&e.to_string()))?;
        to_js(&state, "controller state")
    }

    /// Turn on lerp smoothing. Ignored for reduced motion and low-tier devices.
    #[wasm_bindgen(js_name = enable_smoothing)]
    pub fn enable_smoothing(&mut self) {
        let smoother = LerpSmoother::new(&self.page.config().smoothing);
        self.page.attach_smoother(Box::new(smoother));
    }

    #[wasm_bindgen(js_name = set_sink)]
    pub fn set_sink(&mut self, callback: Function) {
        self.page.add_sink(Box::new(JsSink::new(callback)));
    }

    #[wasm_bindgen]
    pub fn scroll(&mut self, y: f32) {
        self.page.handle_scroll(y);
    }

    /// Returns the native scroll offset to apply, or undefined when the browser scrolls.
    #[wasm_bindgen]
    pub fn wheel(&mut self, delta_y: f32) -> Option<f32> {
        self.page.handle_wheel(delta_y)
    }

    #[wasm_bindgen(js_name = scroll_to)]
    pub fn scroll_to(&mut self, y: f32) -> f32 {
        self.page.scroll_to(y)
    }

    #[wasm_bindgen]
    pub fn resize(&mut self, width: f32, height: f32, now_ms: f64) {
        self.page.handle_resize(width, height, now_ms);
    }

    #[wasm_bindgen(js_name = orientation_change)]
    pub fn orientation_change(&mut self, width: f32, height: f32, now_ms: f64) {
        self.page.handle_orientation_change(width, height, now_ms);
    }

    #[wasm_bindgen]
    pub fn visibility(&mut self, visible: bool) {
        self.page.handle_visibility(visible);
    }

    /// `effectiveType` string from the Network Information API.
    #[wasm_bindgen(js_name = network_change)]
    pub fn network_change(&mut self, effective_type: String) {
        let connection = effective_type
            .parse::<ConnectionClass>()
            .unwrap_or(ConnectionClass::Unknown);
        self.page.handle_network_change(connection);
    }

    #[wasm_bindgen(js_name = reduced_motion_change)]
    pub fn reduced_motion_change(&mut self, reduced: bool) {
        self.page.handle_reduced_motion_change(reduced);
    }

    #[wasm_bindgen(js_name = layout_changed)]
    pub fn layout_changed(&mut self) {
        self.page.notify_layout_changed();
    }

    #[wasm_bindgen(js_name = register_asset)]
    pub fn register_asset(&mut self, spec: JsValue) -> Result<u32, JsError> {
        let spec: AssetSpec =
            swb::from_value(spec).map_err(|e| JsError::new(&format!("asset spec error: {e}")))?;
        Ok(self.page.register_asset(spec).0)
    }

    #[wasm_bindgen(js_name = asset_loaded)]
    pub fn asset_loaded(&mut self, id: u32) -> Result<(), JsError> {
        self.page
            .asset_loaded(AssetId(id))
            .map_err(|e| JsError::new(&e.to_string()))
    }

    #[wasm_bindgen(js_name = asset_failed)]
    pub fn asset_failed(&mut self, id: u32, reason: String) -> Result<(), JsError> {
        let url = self
            .page
            .assets()
            .get(AssetId(id))
            .map(|a| a.url.clone())
            .unwrap_or_default();
        self.page
            .asset_failed(AssetId(id), AssetLoadError::Network { url, reason })
            .map_err(|e| JsError::new(&e.to_string()))
    }

    #[wasm_bindgen(js_name = retry_asset)]
    pub fn retry_asset(&mut self, id: u32) -> Result<(), JsError> {
        self.page
            .retry_asset(AssetId(id))
            .map_err(|e| JsError::new(&e.to_string()))
    }

    /// Fallback visual for an errored asset, or null.
    #[wasm_bindgen(js_name = asset_fallback)]
    pub fn asset_fallback(&self, id: u32) -> Result<JsValue, JsError> {
        match self.page.asset_fallback(AssetId(id)) {
            Some(fallback) => to_js(&fallback, "fallback"),
            None => Ok(JsValue::NULL),
        }
    }

    /// Advance one animation frame. Returns the PageFrame JSON.
    #[wasm_bindgen]
    pub fn tick(&mut self, now_ms: f64, memory_ratio: Option<f32>) -> Result<JsValue, JsError> {
        let frame = self.page.tick(now_ms, &self.layout, memory_ratio);
        to_js(&frame, "frame")
    }

    #[wasm_bindgen]
    pub fn health(&self) -> Result<JsValue, JsError> {
        to_js(self.page.health(), "health")
    }

    /// Switch to the page fallback UI. Returns the fallback description.
    #[wasm_bindgen]
    pub fn escalate(&mut self, reason: String) -> Result<JsValue, JsError> {
        self.page.escalate(&reason);
        to_js(self.page.health(), "health")
    }

    /// Tear everything down. Returns the DOM mutations that undo pins and splits.
    #[wasm_bindgen]
    pub fn teardown(&mut self) -> Result<JsValue, JsError> {
        let (_, mutations) = self.page.teardown();
        to_js(&mutations, "mutations")
    }
}

/// Numeric ABI version for compatibility checks at init.
#[wasm_bindgen]
pub fn abi_version() -> u32 {
    1
}
