use anyhow::Result;
use context::Context;
use std::sync::Arc;
use winit::window::Window;

use crate::app::input::{KeyAction, KeyNotice};

mod context;

pub struct Renderer {
    context: Context,
}

impl Renderer {
    pub fn new(window: Arc<Window>, validation: bool) -> Result<Self> {
        // SAFETY: Context::create loads the Vulkan library and requires the
        // window to outlive the context, which the engine guarantees.
        let context = unsafe { Context::create(&window, validation)? };
        tracing::info!(
            "Renderer ready on `{}` (graphics queue {:?})",
            context.device_name(),
            context.graphics_queue()
        );

        Ok(Self { context })
    }

    pub fn key_callback(&mut self, notice: &KeyNotice) {
        if notice.action == KeyAction::Press {
            tracing::info!(
                "Key pressed! {:?} ({:?}, modifiers {:?}) on `{}`",
                notice.key,
                notice.physical_key,
                notice.modifiers,
                self.context.device_name()
            );
        }
    }
}
