// SPDX-License-Identifier: CEPL-1.0
#![deny(unsafe_op_in_unsafe_fn)]
use anyhow::{bail, Context, Result};
use bytemuck::{Pod, Zeroable};
use clap::{Parser, ValueEnum};
use prism_core::init_tracing;
use prism_render::{
    Backend, BufferDesc, ClearDesc, Device, DrawDesc, ElementType, Pass, PipelineDesc, Program,
    Pipeline, ProgramDesc, RenderSize, Settings, Swapchain, TraceBackend, VertexInput,
};
use prism_render_gl::GlBackend;
use tracing::{error, info, warn};

use prism_platform::winit::{
    application::ApplicationHandler,
    event::WindowEvent,
    event_loop::{ActiveEventLoop, ControlFlow, EventLoop},
    raw_window_handle::{HasDisplayHandle, HasWindowHandle},
    window::{Window, WindowId},
};

use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum BackendChoice {
    Gl,
    /// Headless, logs what it would have drawn.
    Trace,
}

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Choose renderer backend
    #[arg(long, value_enum, default_value = "gl")]
    backend: BackendChoice,
    /// Queue API calls and run them at present time
    #[arg(long)]
    defer: bool,
    /// Exit after this many presented frames
    #[arg(long)]
    frames: Option<u32>,
    #[arg(long, default_value = "prism.toml")]
    config: PathBuf,
}

#[derive(Debug, Deserialize, Clone, Copy)]
#[serde(default)]
struct RenderCfg {
    clear_color: [f32; 4],
    #[serde(flatten)]
    settings: Settings,
}

impl Default for RenderCfg {
    fn default() -> Self {
        RenderCfg {
            clear_color: [0.02, 0.02, 0.04, 1.0],
            settings: Settings::default(),
        }
    }
}

#[derive(Debug, Deserialize, Default)]
struct AppCfg {
    #[serde(default)]
    render: RenderCfg,
}

fn load_cfg(path: &Path) -> AppCfg {
    let Ok(s) = fs::read_to_string(path) else {
        return AppCfg::default();
    };
    match toml::from_str::<AppCfg>(&s) {
        Ok(cfg) => cfg,
        Err(e) => {
            warn!("ignoring {}: {e}", path.display());
            AppCfg::default()
        }
    }
}

#[repr(C)]
#[derive(Clone, Copy, Pod, Zeroable)]
struct Vertex {
    pos: [f32; 2],
    color: [f32; 3],
}

const TRIANGLE: [Vertex; 3] = [
    Vertex {
        pos: [0.0, 0.6],
        color: [1.0, 0.0, 0.0],
    },
    Vertex {
        pos: [-0.5, -0.4],
        color: [0.0, 1.0, 0.0],
    },
    Vertex {
        pos: [0.5, -0.4],
        color: [0.0, 0.0, 1.0],
    },
];

const VERTEX_SRC: &str = r#"#version 330 core
layout(location = 0) in vec2 aPos;
layout(location = 1) in vec3 aColor;
out vec3 vColor;
void main() {
  gl_Position = vec4(aPos, 0.0, 1.0);
  vColor = aColor;
}"#;

const PIXEL_SRC: &str = r#"#version 330 core
in vec3 vColor;
out vec4 outColor;
void main(){ outColor = vec4(vColor, 1.0); }"#;

type DynDevice = Device<Box<dyn Backend>>;

/// Everything the demo draws with.
struct Scene {
    swapchain: Swapchain,
    pass: Pass,
    program: Program,
    pipeline: Pipeline,
    draw: DrawDesc,
    clear: ClearDesc,
}

impl Scene {
    fn new(device: &DynDevice, size: RenderSize, clear_color: [f32; 4]) -> Result<Self> {
        let swapchain = device.swapchain_new(size.width, size.height);
        let pass = device.pass_swapchain_new(swapchain)?;
        let program = device.program_new(ProgramDesc {
            vertex: VERTEX_SRC.into(),
            pixel: PIXEL_SRC.into(),
            geometry: None,
        })?;
        let pipeline = device.pipeline_new(PipelineDesc {
            cull: false,
            depth: false,
            ..PipelineDesc::default()
        });
        let vertices = device.buffer_new(BufferDesc::vertex(bytemuck::cast_slice(&TRIANGLE)))?;

        let stride = std::mem::size_of::<Vertex>();
        let mut draw = DrawDesc {
            elements_count: TRIANGLE.len() as u32,
            ..DrawDesc::default()
        };
        draw.vertex_buffers[0] = Some(VertexInput {
            buffer: vertices,
            element: ElementType::Float2,
            offset: 0,
            stride,
        });
        draw.vertex_buffers[1] = Some(VertexInput {
            buffer: vertices,
            element: ElementType::Float3,
            offset: std::mem::offset_of!(Vertex, color),
            stride,
        });

        Ok(Self {
            swapchain,
            pass,
            program,
            pipeline,
            draw,
            clear: ClearDesc {
                color: clear_color,
                ..ClearDesc::default()
            },
        })
    }

    fn render(&self, device: &DynDevice) -> Result<()> {
        device.pass_begin(self.pass)?;
        device.clear(self.pass, self.clear)?;
        device.use_pipeline(self.pass, self.pipeline)?;
        device.use_program(self.pass, self.program)?;
        device.draw(self.pass, self.draw)?;
        device.pass_end(self.pass)?;
        device.swapchain_present(self.swapchain)?;
        Ok(())
    }

    fn free(self, device: &DynDevice) -> Result<()> {
        for input in self.draw.vertex_buffers.iter().flatten().take(1) {
            device.buffer_free(input.buffer)?;
        }
        device.pipeline_free(self.pipeline)?;
        device.program_free(self.program)?;
        device.pass_free(self.pass)?;
        device.swapchain_free(self.swapchain)?;
        Ok(())
    }
}

struct App {
    cfg: AppCfg,
    max_frames: Option<u32>,
    window: Option<Window>,
    device: Option<DynDevice>,
    scene: Option<Scene>,
    render_size: RenderSize,

    exiting: bool,
    paused: bool,
    presented: u32,
    frames: u32,
    last_fps_instant: std::time::Instant,
}

impl App {
    fn start(&mut self, window: &Window) -> Result<()> {
        let settings = self.cfg.render.settings;
        let wh = window.window_handle().context("window_handle")?;
        let dh = window.display_handle().context("display_handle")?;
        let backend: Box<dyn Backend> =
            Box::new(GlBackend::new(&wh, &dh, self.render_size, &settings)?);
        let device = Device::new(backend, settings);
        let scene = Scene::new(&device, self.render_size, self.cfg.render.clear_color)?;
        info!(
            "backend = {}, deferred = {}",
            device.name(),
            settings.defer_api_calls
        );
        self.device = Some(device);
        self.scene = Some(scene);
        Ok(())
    }

    fn shutdown(&mut self) {
        if let (Some(device), Some(scene)) = (self.device.take(), self.scene.take()) {
            if let Err(e) = scene.free(&device) {
                error!("scene teardown: {e}");
            }
            device.dispose();
        }
    }
}

impl ApplicationHandler for App {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.window.is_none() {
            let window = match prism_platform::open_window(event_loop, "prism", (1280, 720)) {
                Ok(window) => window,
                Err(e) => {
                    error!("create_window failed: {e}");
                    event_loop.exit();
                    return;
                }
            };
            let size = window.inner_size();
            self.render_size = RenderSize {
                width: size.width.max(1),
                height: size.height.max(1),
            };

            if let Err(e) = self.start(&window) {
                error!("renderer init failed: {e:#}");
                event_loop.exit();
                return;
            }
            self.window = Some(window);
        }

        event_loop.set_control_flow(match self.cfg.render.settings.vsync {
            prism_render::VsyncMode::On => ControlFlow::Wait,
            prism_render::VsyncMode::Off => ControlFlow::Poll,
        });

        self.paused = self.render_size.width == 0 || self.render_size.height == 0;
        info!("resumed → paused={}", self.paused);

        if !self.paused {
            if let Some(w) = &self.window {
                w.request_redraw();
            }
        }
    }

    fn window_event(
        &mut self,
        event_loop: &ActiveEventLoop,
        window_id: WindowId,
        event: WindowEvent,
    ) {
        if let Some(window) = &self.window {
            if window_id != window.id() {
                return;
            }
        }

        match event {
            WindowEvent::CloseRequested => {
                info!("CloseRequested");
                self.exiting = true;
                self.shutdown();
                self.window = None;
                event_loop.exit();
            }

            WindowEvent::Resized(new_size) => {
                self.render_size = RenderSize {
                    width: new_size.width,
                    height: new_size.height,
                };
                self.paused = self.render_size.width == 0 || self.render_size.height == 0;
                info!(
                    "Resized → {}x{} (paused={})",
                    self.render_size.width, self.render_size.height, self.paused
                );

                if !self.paused {
                    if let (Some(device), Some(scene)) = (&self.device, &self.scene) {
                        if let Err(e) = device.swapchain_resize(
                            scene.swapchain,
                            self.render_size.width,
                            self.render_size.height,
                        ) {
                            error!("resize error: {e}");
                        }
                    }
                    if let Some(w) = &self.window {
                        w.request_redraw();
                    }
                }
            }

            WindowEvent::Occluded(occluded) => {
                self.paused =
                    occluded || self.render_size.width == 0 || self.render_size.height == 0;
                info!("Occluded={} → paused={}", occluded, self.paused);
            }

            WindowEvent::RedrawRequested => {
                if self.exiting || self.paused {
                    return;
                }

                if let (Some(device), Some(scene)) = (&self.device, &self.scene) {
                    match scene.render(device) {
                        Ok(()) => {
                            self.frames = self.frames.saturating_add(1);
                            self.presented = self.presented.saturating_add(1);
                        }
                        Err(e) => error!("render error: {e}"),
                    }
                }

                if self.max_frames.is_some_and(|max| self.presented >= max) {
                    info!("presented {} frames, exiting", self.presented);
                    self.exiting = true;
                    self.shutdown();
                    event_loop.exit();
                }
            }

            _ => {}
        }
    }

    fn about_to_wait(&mut self, event_loop: &ActiveEventLoop) {
        if self.exiting {
            return;
        }

        if self.paused {
            event_loop.set_control_flow(ControlFlow::Wait);
            self.frames = 0;
            return;
        }

        if let Some(w) = &self.window {
            w.request_redraw();
        }

        let now = std::time::Instant::now();
        if now.duration_since(self.last_fps_instant).as_secs_f32() >= 1.0 {
            info!("fps ~ {}", self.frames);
            self.frames = 0;
            self.last_fps_instant = now;
        }
    }
}

/// Renders the scene without a window and reports what the backend saw.
fn run_headless(settings: Settings, clear_color: [f32; 4], frames: u32) -> Result<()> {
    let device: DynDevice = Device::new(Box::new(TraceBackend::new()), settings);
    let size = RenderSize {
        width: 1280,
        height: 720,
    };
    let scene = Scene::new(&device, size, clear_color)?;
    for _ in 0..frames {
        scene.render(&device)?;
    }
    scene.free(&device)?;
    device.flush();
    if device.live_handles() != 0 {
        bail!("{} handles still alive after teardown", device.live_handles());
    }
    device.dispose();
    info!("headless run finished after {frames} frames");
    Ok(())
}

fn main() -> Result<()> {
    init_tracing();
    let args = Args::parse();
    let mut cfg = load_cfg(&args.config);
    if args.defer {
        cfg.render.settings.defer_api_calls = true;
    }

    if args.backend == BackendChoice::Trace {
        return run_headless(
            cfg.render.settings,
            cfg.render.clear_color,
            args.frames.unwrap_or(3),
        );
    }

    let event_loop: EventLoop<()> = EventLoop::new()?;
    let mut app = App {
        cfg,
        max_frames: args.frames,
        window: None,
        device: None,
        scene: None,
        render_size: RenderSize {
            width: 1,
            height: 1,
        },
        exiting: false,
        paused: false,
        presented: 0,
        frames: 0,
        last_fps_instant: std::time::Instant::now(),
    };

    event_loop.run_app(&mut app)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_reads_render_settings() {
        let cfg: AppCfg = toml::from_str(
            "[render]\nclear_color = [1.0, 0.0, 0.0, 1.0]\ndefer_api_calls = true\nvsync = \"off\"\n",
        )
        .expect("config");
        assert_eq!(cfg.render.clear_color, [1.0, 0.0, 0.0, 1.0]);
        assert!(cfg.render.settings.defer_api_calls);
        assert_eq!(cfg.render.settings.vsync, prism_render::VsyncMode::Off);
    }

    #[test]
    fn headless_scene_tears_down_cleanly() {
        run_headless(Settings::deferred(), [0.0; 4], 2).expect("headless run");
        run_headless(Settings::default(), [0.0; 4], 2).expect("headless run");
    }
}
