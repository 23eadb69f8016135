use js_sys::Function;
use serde_wasm_bindgen as swb;
use wasm_bindgen::JsValue;

use scrollstage_core::{AnalyticsSink, PageEvent};

/// Forwards page events to a JS callback `(event) => void`.
pub struct JsSink {
    f: Function,
}

impl JsSink {
    pub fn new(f: Function) -> Self {
        Self { f }
    }
}

impl AnalyticsSink for JsSink {
    fn track(&mut self, event: &PageEvent) -> anyhow::Result<()> {
        let value = swb::to_value(event).map_err(|e| anyhow::anyhow!("event encode error: {e}"))?;
        self.f
            .call1(&JsValue::UNDEFINED, &value)
            .map_err(|e| anyhow::anyhow!("analytics callback threw: {e:?}"))?;
        Ok(())
    }
}
