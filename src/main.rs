// =============================================================================
// VULKAN MESH RENDERER
// =============================================================================
//
// Draws two spinning quads through a single render pass and a single
// graphics pipeline, with N frames in flight.
//
// ARCHITECTURE OVERVIEW:
// ┌─────────────────────────────────────────────────────────────────┐
// │  App (window, timing, scene updates)                            │
// │    └── Renderer (frame pacing, per-image resources)             │
// │          └── Pipeline + Meshes + Descriptors                    │
// │                └── Swapchain + Depth buffer                     │
// │                      └── Device + Surface + Instance            │
// └─────────────────────────────────────────────────────────────────┘
//
// FRAME FLOW:
// 1. Advance the spin angle and push new model matrices
// 2. Wait for this slot's fence
// 3. Acquire a swapchain image
// 4. Record commands and update the uniform buffer for that image
// 5. Submit, then present
//
// =============================================================================

mod backend;
mod config;
mod renderer;
mod scene;

use anyhow::{Context, Result};
use config::Config;
use renderer::Renderer;
use std::process::ExitCode;
use std::time::Instant;
use winit::{
    application::ApplicationHandler,
    event::WindowEvent,
    event_loop::{ActiveEventLoop, EventLoop},
    window::{Window, WindowAttributes, WindowId},
};

// =============================================================================
// ENTRY POINT
// =============================================================================

fn main() -> ExitCode {
    // Load configuration from config.toml; problems are logged once the
    // logger exists
    let (config, config_error) = Config::load();

    init_logging(&config);
    log::info!("Starting Vulkan mesh renderer");
    if let Some(e) = config_error {
        log::warn!("Failed to load config.toml: {:#}. Using defaults.", e);
    }
    log::debug!("Config: {:?}", config);
    log::info!(
        "Window: {}x{}, {} frames in flight",
        config.window.width,
        config.window.height,
        config.max_frames_in_flight()
    );

    match run(config) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            log::error!("Fatal: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

fn run(config: Config) -> Result<()> {
    let event_loop = EventLoop::new().context("Failed to create event loop")?;
    let mut app = App::new(config);
    event_loop
        .run_app(&mut app)
        .context("Event loop terminated abnormally")?;

    match app.error.take() {
        Some(e) => Err(e),
        None => Ok(()),
    }
}

/// Level comes from config; RUST_LOG overrides it
fn init_logging(config: &Config) {
    use env_logger::Builder;

    let (level, unknown_level) = match config.log_level() {
        Ok(level) => (level, false),
        Err(_) => (log::LevelFilter::Info, true),
    };

    let mut builder = Builder::new();
    builder.filter_level(level);
    builder.parse_default_env();
    builder.init();

    if unknown_level {
        log::warn!("Unknown log level '{}', using info", config.debug.log_level);
    }
}

// =============================================================================
// APPLICATION STATE
// =============================================================================

/// Owns the window and the renderer for the lifetime of the event loop.
///
/// Field order matters for Drop: the renderer (and its surface) must go
/// before the window it presents to.
struct App {
    config: Config,
    renderer: Option<Renderer>,
    window: Option<Window>,

    /// Spin angle in degrees
    angle: f32,
    last_frame_time: Instant,

    /// First fatal error, reported after the event loop returns
    error: Option<anyhow::Error>,
}

impl App {
    fn new(config: Config) -> Self {
        Self {
            config,
            renderer: None,
            window: None,
            angle: 0.0,
            last_frame_time: Instant::now(),
            error: None,
        }
    }

    /// Build the renderer and upload the scene
    fn init_renderer(&self, window: &Window) -> Result<Renderer> {
        let size = window.inner_size();
        let mut renderer = Renderer::new(window, (size.width, size.height), &self.config)
            .context("Failed to initialize Vulkan")?;

        for mesh in scene::meshes() {
            renderer
                .add_mesh(&mesh.vertices, &mesh.indices)
                .context("Failed to upload mesh")?;
        }

        renderer.set_view_projection(scene::view_projection(
            &self.config.camera,
            renderer.extent(),
        ));

        log::info!(
            "Renderer ready: {} meshes, depth {:?}, validation {}",
            renderer.mesh_count(),
            renderer.depth_format(),
            if renderer.validation_enabled() { "on" } else { "off" }
        );

        Ok(renderer)
    }

    fn fail(&mut self, event_loop: &ActiveEventLoop, error: anyhow::Error) {
        self.record_error(error);
        event_loop.exit();
    }

    /// Keep the first fatal error and release the renderer; no frame is
    /// drawn after this.
    fn record_error(&mut self, error: anyhow::Error) {
        if self.error.is_none() {
            self.error = Some(error);
        }
        if let Some(renderer) = self.renderer.take() {
            if let Err(e) = renderer.wait_idle() {
                log::warn!("wait_idle failed after fatal error: {}", e);
            }
        }
    }

    // =========================================================================
    // RENDER LOOP
    // =========================================================================

    fn render_frame(&mut self) -> Result<()> {
        if self.error.is_some() {
            return Ok(());
        }
        let Some(renderer) = self.renderer.as_mut() else {
            return Ok(());
        };

        let now = Instant::now();
        let dt = now.duration_since(self.last_frame_time).as_secs_f32();
        self.last_frame_time = now;

        self.angle = scene::advance_angle(self.angle, dt);
        for (id, model) in scene::model_transforms(self.angle).into_iter().enumerate() {
            renderer.update_model(id, model);
        }

        match renderer.draw() {
            Ok(()) => Ok(()),
            Err(e) if e.is_recoverable() => {
                log::error!("Swapchain out of date and recreation is not supported");
                Err(e.into())
            }
            Err(e) => Err(anyhow::Error::new(e).context("Frame failed")),
        }
    }
}

// =============================================================================
// EVENT HANDLING
// =============================================================================

impl ApplicationHandler for App {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.window.is_some() {
            return;
        }

        let window_attributes = WindowAttributes::default()
            .with_title(&self.config.window.title)
            .with_inner_size(winit::dpi::PhysicalSize::new(
                self.config.window.width,
                self.config.window.height,
            ))
            .with_resizable(false);

        let window = match event_loop.create_window(window_attributes) {
            Ok(w) => w,
            Err(e) => {
                self.fail(event_loop, anyhow::Error::new(e).context("Failed to create window"));
                return;
            }
        };

        match self.init_renderer(&window) {
            Ok(renderer) => {
                self.renderer = Some(renderer);
                self.window = Some(window);
                self.last_frame_time = Instant::now();
            }
            Err(e) => self.fail(event_loop, e),
        }
    }

    fn window_event(&mut self, event_loop: &ActiveEventLoop, _id: WindowId, event: WindowEvent) {
        match event {
            WindowEvent::CloseRequested => {
                log::info!("Close requested, shutting down...");
                event_loop.exit();
            }

            WindowEvent::RedrawRequested => {
                if let Err(e) = self.render_frame() {
                    self.fail(event_loop, e);
                }
            }

            WindowEvent::KeyboardInput { event, .. } => {
                use winit::keyboard::{KeyCode, PhysicalKey};

                if event.state.is_pressed()
                    && event.physical_key == PhysicalKey::Code(KeyCode::Escape)
                {
                    log::info!("ESC pressed, exiting...");
                    event_loop.exit();
                }
            }

            _ => {}
        }
    }

    /// Request continuous redraws
    fn about_to_wait(&mut self, _event_loop: &ActiveEventLoop) {
        if let Some(ref window) = self.window {
            window.request_redraw();
        }
    }

    fn exiting(&mut self, _event_loop: &ActiveEventLoop) {
        // Drop GPU objects while the window still exists
        if let Some(renderer) = self.renderer.take() {
            if let Err(e) = renderer.wait_idle() {
                log::warn!("wait_idle failed on exit: {}", e);
            }
        }
        log::info!("Cleanup complete");
    }
}
