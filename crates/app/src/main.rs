//! frameflow demo: a grid of instanced cubes drawn through the frame
//! pipelining and upload core.

mod demo;

use std::time::Duration;

use anyhow::{Context, Result};
use tracing::{error, info};
use winit::application::ApplicationHandler;
use winit::event_loop::ControlFlow;
use winit::window::WindowId;

use frameflow_core::{RendererConfig, Timer};
use frameflow_platform::{ActiveEventLoop, EventLoop, Window, WindowEvent, aspect_ratio};
use frameflow_renderer::{Renderer, ShaderSet};

use demo::{DemoScene, orbit_camera};

const CONFIG_PATH: &str = "frameflow.toml";
const STATS_INTERVAL: Duration = Duration::from_secs(2);

/// Everything created once the event loop hands us a window.
struct Running {
    // Dropped before the window so the surface never outlives it.
    scene: DemoScene,
    renderer: Renderer,
    window: Window,
}

struct App {
    config: RendererConfig,
    shaders: ShaderSet,
    running: Option<Running>,
    timer: Timer,
    since_stats: Duration,
    failure: Option<anyhow::Error>,
}

impl App {
    fn new(config: RendererConfig, shaders: ShaderSet) -> Self {
        Self {
            config,
            shaders,
            running: None,
            timer: Timer::new(),
            since_stats: Duration::ZERO,
            failure: None,
        }
    }

    fn start(&self, event_loop: &ActiveEventLoop) -> Result<Running> {
        let window =
            Window::new(event_loop, &self.config.window).context("Failed to create window")?;
        let mut renderer = Renderer::new(&window, self.config.clone(), &self.shaders)
            .context("Failed to create renderer")?;
        let scene = DemoScene::new(&mut renderer).context("Failed to build demo scene")?;
        Ok(Running {
            scene,
            renderer,
            window,
        })
    }

    fn redraw(&mut self) -> Result<()> {
        let Some(running) = self.running.as_mut() else {
            return Ok(());
        };

        let delta = self.timer.tick();
        let time = self.timer.elapsed_secs();

        let extent = running.renderer.extent();
        running
            .renderer
            .set_camera(orbit_camera(time, aspect_ratio(extent.width, extent.height)));

        let items = running.scene.update(time);
        running.renderer.draw_frame(items)?;

        self.since_stats += delta;
        if self.since_stats >= STATS_INTERVAL {
            self.since_stats = Duration::ZERO;
            let stats = running.renderer.stats();
            info!(
                "{:.1} fps | {} draws, {} instances, {} dropped | {} frames, {} recreations",
                self.timer.average_fps(),
                stats.draw_calls,
                stats.instances,
                stats.dropped_instances,
                stats.frames,
                stats.surface_recreations,
            );
        }
        Ok(())
    }

    fn fail(&mut self, event_loop: &ActiveEventLoop, err: anyhow::Error) {
        error!("{:#}", err);
        self.failure = Some(err);
        event_loop.exit();
    }
}

impl ApplicationHandler for App {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.running.is_some() {
            return;
        }
        match self.start(event_loop) {
            Ok(running) => {
                info!("Initialization complete, entering main loop");
                self.timer.reset();
                self.running = Some(running);
            }
            Err(e) => self.fail(event_loop, e),
        }
    }

    fn window_event(&mut self, event_loop: &ActiveEventLoop, _id: WindowId, event: WindowEvent) {
        match event {
            WindowEvent::CloseRequested => {
                info!("Close requested, shutting down");
                event_loop.exit();
            }
            WindowEvent::Resized(size) => {
                if let Some(running) = self.running.as_mut() {
                    running.window.resize(size.width, size.height);
                    running.renderer.resize(size.width, size.height);
                }
            }
            WindowEvent::RedrawRequested => {
                if let Err(e) = self.redraw() {
                    self.fail(event_loop, e);
                }
            }
            _ => {}
        }
    }

    fn about_to_wait(&mut self, _event_loop: &ActiveEventLoop) {
        if let Some(running) = self.running.as_ref() {
            running.window.request_redraw();
        }
    }

    fn exiting(&mut self, _event_loop: &ActiveEventLoop) {
        if let Some(running) = self.running.take() {
            info!("Shutting down after {} frames", running.renderer.stats().frames);
        }
    }
}

fn main() -> Result<()> {
    frameflow_core::init_logging();
    info!("Starting frameflow");

    let config = RendererConfig::load(CONFIG_PATH)
        .with_context(|| format!("Failed to load {}", CONFIG_PATH))?;
    let shaders = ShaderSet::load(&config.shaders)
        .context("Failed to load shaders (compile shaders/*.vert and *.frag with glslc)")?;

    let event_loop = EventLoop::new()?;
    event_loop.set_control_flow(ControlFlow::Poll);

    let mut app = App::new(config, shaders);
    event_loop.run_app(&mut app)?;

    match app.failure.take() {
        Some(err) => Err(err),
        None => Ok(()),
    }
}
