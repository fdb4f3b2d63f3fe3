//! vkinterop demo binary.
//!
//! Renders one of the sample scenes either into a window or, with
//! `--headless`, against the hardware-free GPU context for a fixed number of
//! frames. The `encode` scene shares its offscreen targets with a logging
//! encoder through exported device memory.

mod encoder;
mod scenes;

use std::ffi::CString;
use std::path::PathBuf;

use anyhow::{Context, Result, bail};
use ash::vk;
use clap::Parser;
use tracing::{error, info};
use winit::application::ApplicationHandler;
use winit::event::WindowEvent;
use winit::event_loop::{ActiveEventLoop, ControlFlow, EventLoop};
use winit::window::WindowId;

use vkinterop_core::{PresentModePreference, RendererConfig};
use vkinterop_platform::{Window, surface_extent};
use vkinterop_renderer::{ExternalImageConsumer, FrameStatus, Renderer};
use vkinterop_rhi::{HeadlessContext, RhiError, VulkanContext, VulkanContextDesc};

use encoder::LoggingEncoder;
use scenes::{DemoScene, SceneKind, Shaders, load_texture};

const HEADLESS_FRAMES: u64 = 120;
const HEADLESS_FRAME_TIME: f32 = 1.0 / 60.0;
const FPS_LOG_INTERVAL: u64 = 600;

#[derive(Parser, Debug)]
#[command(name = "vkinterop", version, about = "Multi-pass Vulkan demo with GPU image export")]
struct Cli {
    /// Scene to render
    #[arg(long, value_enum, default_value_t = SceneKind::RenderToTexture)]
    scene: SceneKind,

    /// Run against the simulated GPU instead of opening a window
    #[arg(long)]
    headless: bool,

    /// Stop after this many frames (headless default: 120)
    #[arg(long)]
    frames: Option<u64>,

    #[arg(long)]
    width: Option<u32>,

    #[arg(long)]
    height: Option<u32>,

    /// Image to texture the quads with; a checkerboard otherwise
    #[arg(long)]
    texture: Option<PathBuf>,

    /// Directory holding the compiled `.spv` shaders
    #[arg(long, default_value = "shaders/spirv")]
    shader_dir: PathBuf,
}

impl Cli {
    fn config(&self) -> Result<RendererConfig> {
        let mut config = RendererConfig::default()
            .with_env_overrides()
            .context("invalid VKINTEROP_* environment override")?;
        if let Some(width) = self.width {
            config.window_width = width;
        }
        if let Some(height) = self.height {
            config.window_height = height;
        }
        config.enable_interop = self.scene.needs_interop();
        config.validate()?;
        Ok(config)
    }

    fn scene(&self, placeholder_shaders: bool, close_handles: bool) -> Result<DemoScene> {
        let shaders = Shaders::load(&self.shader_dir, placeholder_shaders)?;
        let texture = load_texture(self.texture.as_ref())?;
        let encoder: Option<Box<dyn ExternalImageConsumer>> = self
            .scene
            .needs_interop()
            .then(|| Box::new(LoggingEncoder::new(close_handles)) as _);
        Ok(DemoScene::new(self.scene, shaders, texture, encoder))
    }
}

fn present_mode(preference: PresentModePreference) -> vk::PresentModeKHR {
    match preference {
        PresentModePreference::Mailbox => vk::PresentModeKHR::MAILBOX,
        PresentModePreference::Fifo => vk::PresentModeKHR::FIFO,
        PresentModePreference::Immediate => vk::PresentModeKHR::IMMEDIATE,
    }
}

fn run_headless(cli: &Cli, config: RendererConfig) -> Result<()> {
    let frames = cli.frames.unwrap_or(HEADLESS_FRAMES);
    let extent = vk::Extent2D {
        width: config.window_width,
        height: config.window_height,
    };
    let gpu = HeadlessContext::default();
    let scene = cli.scene(true, false)?;

    let mut renderer = Renderer::new(gpu.clone(), scene, config, extent)?;
    let mut presented = 0u64;
    for frame in 0..frames {
        if let FrameStatus::Presented { .. } = renderer.draw_frame_at(frame as f32 * HEADLESS_FRAME_TIME)? {
            presented += 1;
        }
    }
    let rebuilds = renderer.lifecycle().rebuild_count();
    renderer.shutdown()?;
    drop(renderer);

    let leaked = gpu.live_objects();
    if !leaked.is_empty() {
        bail!("{} GPU objects still alive after shutdown: {:?}", leaked.len(), leaked);
    }
    let violations = gpu.violations();
    if !violations.is_empty() {
        bail!("GPU usage violations: {violations:?}");
    }

    info!(frames, presented, rebuilds, "Headless run complete");
    Ok(())
}

struct App {
    cli: Cli,
    config: RendererConfig,
    // Dropped before the window it presents to.
    renderer: Option<Renderer<VulkanContext, DemoScene>>,
    window: Option<Window>,
    failure: Option<anyhow::Error>,
}

impl App {
    fn new(cli: Cli, config: RendererConfig) -> Self {
        Self {
            cli,
            config,
            renderer: None,
            window: None,
            failure: None,
        }
    }

    fn init(&self, event_loop: &ActiveEventLoop) -> Result<(Window, Renderer<VulkanContext, DemoScene>)> {
        let config = &self.config;
        let window = Window::new(event_loop, config.window_width, config.window_height, &config.title)?;

        let desc = VulkanContextDesc {
            app_name: CString::new(config.title.clone())?,
            enable_validation: config.enable_validation,
            enable_interop: config.enable_interop,
            preferred_present_mode: present_mode(config.present_mode),
            allocation_callbacks: None,
        };
        let extensions = window.required_extensions()?;
        let gpu = VulkanContext::new(desc, &extensions, |entry, instance| {
            window
                .create_surface(entry, instance)
                .map_err(|e| RhiError::Surface(e.to_string()))
        })?;

        let scene = self.cli.scene(false, true)?;
        let renderer = Renderer::new(gpu, scene, config.clone(), window.extent())?;
        Ok((window, renderer))
    }

    fn fail(&mut self, event_loop: &ActiveEventLoop, error: anyhow::Error) {
        error!("{error:#}");
        self.failure = Some(error);
        event_loop.exit();
    }

    fn shutdown(&mut self) {
        if let Some(mut renderer) = self.renderer.take() {
            info!(
                frames = renderer.timer().frames(),
                fps = renderer.timer().average_fps(),
                rebuilds = renderer.lifecycle().rebuild_count(),
                "Shutting down"
            );
            if let Err(e) = renderer.shutdown() {
                error!("Shutdown failed: {e}");
            }
        }
        self.window = None;
    }
}

impl ApplicationHandler for App {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.window.is_some() {
            return;
        }
        match self.init(event_loop) {
            Ok((window, renderer)) => {
                info!("Initialization complete, entering main loop");
                self.renderer = Some(renderer);
                self.window = Some(window);
            }
            Err(e) => self.fail(event_loop, e.context("failed to initialize")),
        }
    }

    fn window_event(&mut self, event_loop: &ActiveEventLoop, _id: WindowId, event: WindowEvent) {
        match event {
            WindowEvent::CloseRequested => {
                info!("Close requested, shutting down");
                event_loop.exit();
            }
            WindowEvent::Resized(size) => {
                info!("Window resized to {}x{}", size.width, size.height);
                if let Some(ref mut renderer) = self.renderer {
                    renderer.resize(surface_extent(size));
                }
            }
            WindowEvent::RedrawRequested => {
                // Nothing to present to until the window is restored.
                if self.window.as_ref().is_some_and(Window::is_minimized) {
                    return;
                }
                let Some(ref mut renderer) = self.renderer else {
                    return;
                };
                if let Err(e) = renderer.draw_frame() {
                    self.fail(event_loop, anyhow::Error::new(e).context("render error"));
                    return;
                }

                let frames = renderer.timer().frames();
                if frames > 0 && frames % FPS_LOG_INTERVAL == 0 {
                    info!(frames, fps = renderer.timer().average_fps(), "Frame rate");
                }
                if self.cli.frames.is_some_and(|limit| frames >= limit) {
                    event_loop.exit();
                }
            }
            _ => {}
        }
    }

    fn about_to_wait(&mut self, event_loop: &ActiveEventLoop) {
        let Some(ref window) = self.window else {
            return;
        };
        // Sleep until the next event while there is nothing to draw into.
        if window.is_minimized() {
            event_loop.set_control_flow(ControlFlow::Wait);
        } else {
            event_loop.set_control_flow(ControlFlow::Poll);
            window.request_redraw();
        }
    }

    fn exiting(&mut self, _event_loop: &ActiveEventLoop) {
        self.shutdown();
    }
}

fn run_windowed(cli: Cli, config: RendererConfig) -> Result<()> {
    let event_loop = EventLoop::new()?;
    event_loop.set_control_flow(ControlFlow::Poll);

    let mut app = App::new(cli, config);
    event_loop.run_app(&mut app)?;
    app.shutdown();

    match app.failure {
        Some(e) => Err(e),
        None => Ok(()),
    }
}

fn main() -> Result<()> {
    vkinterop_core::init_logging();
    let cli = Cli::parse();
    let config = cli.config()?;
    info!(scene = ?cli.scene, headless = cli.headless, "Starting vkinterop");

    if cli.headless {
        run_headless(&cli, config)
    } else {
        run_windowed(cli, config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_defaults() {
        let cli = Cli::parse_from(["vkinterop"]);
        assert_eq!(cli.scene, SceneKind::RenderToTexture);
        assert!(!cli.headless);
        assert_eq!(cli.shader_dir, PathBuf::from("shaders/spirv"));
    }

    #[test]
    fn test_encode_scene_enables_interop() {
        let cli = Cli::parse_from(["vkinterop", "--scene", "encode", "--width", "320"]);
        let config = cli.config().unwrap();
        assert!(config.enable_interop);
        assert_eq!(config.window_width, 320);
    }

    #[test]
    fn test_zero_width_rejected() {
        let cli = Cli::parse_from(["vkinterop", "--width", "0"]);
        assert!(cli.config().is_err());
    }

    #[test]
    fn test_headless_run_with_placeholder_shaders() {
        let cli = Cli::parse_from([
            "vkinterop",
            "--headless",
            "--scene",
            "multiple-objects",
            "--frames",
            "8",
            "--shader-dir",
            "does/not/exist",
        ]);
        let config = cli.config().unwrap();
        run_headless(&cli, config).unwrap();
    }

    #[test]
    fn test_present_mode_mapping() {
        assert_eq!(present_mode(PresentModePreference::Fifo), vk::PresentModeKHR::FIFO);
        assert_eq!(present_mode(PresentModePreference::Mailbox), vk::PresentModeKHR::MAILBOX);
    }
}
