mod engine;
pub mod input;

use crate::app::engine::Engine;
use crate::config::AppConfig;
use winit::{
    application::ApplicationHandler,
    dpi::PhysicalSize,
    event::WindowEvent,
    event_loop::ActiveEventLoop,
    window::{WindowAttributes, WindowId},
};

pub struct App {
    config: AppConfig,
    engine: Option<Engine>,
    startup_error: Option<anyhow::Error>,
}

impl App {
    pub fn new(config: AppConfig) -> Self {
        tracing::info!("Initialising {}..", config.title);
        Self {
            config,
            engine: None,
            startup_error: None,
        }
    }

    /// The error that stopped startup, if any.
    pub fn take_startup_error(&mut self) -> Option<anyhow::Error> {
        self.startup_error.take()
    }

    fn window_attributes(&self) -> WindowAttributes {
        WindowAttributes::default()
            .with_title(self.config.title.clone())
            .with_inner_size(PhysicalSize::new(self.config.width, self.config.height))
    }
}

impl ApplicationHandler for App {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.engine.is_some() || self.startup_error.is_some() {
            return;
        }

        match Engine::new(event_loop, self.window_attributes(), self.config.validation) {
            Ok(engine) => {
                tracing::info!("{} initialised successfully.", self.config.title);
                self.engine = Some(engine);
            }
            Err(error) => {
                tracing::error!("Failed to initialise {}: {:#}", self.config.title, error);
                self.startup_error = Some(error);
                event_loop.exit();
            }
        }
    }

    fn window_event(
        &mut self,
        event_loop: &ActiveEventLoop,
        window_id: WindowId,
        event: WindowEvent,
    ) {
        if let Some(engine) = self.engine.as_mut() {
            engine.window_event(event_loop, window_id, event);
        }
    }

    fn about_to_wait(&mut self, _: &ActiveEventLoop) {
        if let Some(engine) = self.engine.as_mut() {
            engine.tick();
        }
    }

    fn suspended(&mut self, _: &ActiveEventLoop) {
        self.engine = None;
    }
}
