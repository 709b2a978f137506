use crate::app::App;
use crate::config::AppConfig;
use anyhow::Result;
use winit::event_loop::EventLoop;

mod app;
mod config;

fn main() -> Result<()> {
    tracing_subscriber::fmt::init();
    let config = AppConfig::default().with_env_overrides()?;
    let mut app = App::new(config);
    let event_loop = EventLoop::new()?;

    event_loop.run_app(&mut app)?;

    // A failed startup exits the loop early; surface it as the exit status.
    match app.take_startup_error() {
        Some(error) => Err(error),
        None => Ok(()),
    }
}
