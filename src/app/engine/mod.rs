use anyhow::Result;
use renderer::Renderer;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use winit::keyboard::ModifiersState;
use winit::window::WindowAttributes;
use winit::{
    event::WindowEvent,
    event_loop::ActiveEventLoop,
    window::{Window, WindowId},
};

use crate::app::input::KeyNotice;

mod renderer;

pub struct Engine {
    // Dropped before `windows`: each renderer's surface requirements were
    // derived from a live window.
    renderers: HashMap<WindowId, Renderer>,
    windows: HashMap<WindowId, Arc<Window>>,
    modifiers: HashMap<WindowId, ModifiersState>,
    primary_window_id: WindowId,
    clock: FrameClock,
}

impl Engine {
    pub fn new(
        event_loop: &ActiveEventLoop,
        attributes: WindowAttributes,
        validation: bool,
    ) -> Result<Self> {
        let primary_window = Arc::new(event_loop.create_window(attributes)?);
        let primary_window_id = primary_window.id();

        let renderer = Renderer::new(primary_window.clone(), validation)?;

        Ok(Self {
            renderers: HashMap::from([(primary_window_id, renderer)]),
            windows: HashMap::from([(primary_window_id, primary_window)]),
            modifiers: HashMap::new(),
            primary_window_id,
            clock: FrameClock::new(Instant::now()),
        })
    }

    pub fn window_event(
        &mut self,
        event_loop: &ActiveEventLoop,
        window_id: WindowId,
        event: WindowEvent,
    ) {
        match event {
            WindowEvent::CloseRequested => {
                if window_id == self.primary_window_id {
                    event_loop.exit();
                } else {
                    self.renderers.remove(&window_id);
                    self.windows.remove(&window_id);
                    self.modifiers.remove(&window_id);
                }
            }
            WindowEvent::ModifiersChanged(modifiers) => {
                self.modifiers.insert(window_id, modifiers.state());
            }
            WindowEvent::KeyboardInput { event, .. } => {
                let modifiers = self.modifiers.get(&window_id).copied().unwrap_or_default();
                if let Some(renderer) = self.renderers.get_mut(&window_id) {
                    renderer.key_callback(&KeyNotice::from_event(&event, modifiers));
                }
            }
            // TODO: handle resize / redraw once the swapchain exists
            _ => {}
        }
    }

    /// Called once per event loop iteration.
    pub fn tick(&mut self) {
        let delta = self.clock.tick(Instant::now());
        tracing::trace!("Frame delta {:?}", delta);
    }
}

/// Measures the time between successive ticks.
#[derive(Debug)]
struct FrameClock {
    previous: Instant,
}

impl FrameClock {
    fn new(now: Instant) -> Self {
        Self { previous: now }
    }

    fn tick(&mut self, now: Instant) -> Duration {
        let delta = now.saturating_duration_since(self.previous);
        self.previous = now;
        delta
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clock_reports_elapsed_between_ticks() {
        let start = Instant::now();
        let mut clock = FrameClock::new(start);

        assert_eq!(clock.tick(start + Duration::from_millis(16)), Duration::from_millis(16));
        assert_eq!(clock.tick(start + Duration::from_millis(40)), Duration::from_millis(24));
    }

    #[test]
    fn clock_never_goes_negative() {
        let start = Instant::now() + Duration::from_secs(1);
        let mut clock = FrameClock::new(start);

        assert_eq!(clock.tick(start - Duration::from_millis(5)), Duration::ZERO);
    }
}
