//! Off-screen and windowed render core: device and target lifecycle, MSAA,
//! depth management, the frame loop and screenshot capture.

use image::codecs::jpeg::JpegEncoder;
use image::RgbaImage;
use pollster::block_on;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use winit::window::{Fullscreen, Window};

pub const TARGET_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Rgba8Unorm;
pub const DEFAULT_BACKGROUND: wgpu::Color = wgpu::Color {
    r: 0.0,
    g: 0.545,
    b: 0.545,
    a: 1.0,
};

#[derive(Debug, Error)]
pub enum RenderError {
    #[error("no suitable graphics adapter found")]
    NoAdapter,
    #[error("adapter does not support the required capabilities: {0}")]
    Unsupported(String),
    #[error("device request failed: {0}")]
    Device(#[from] wgpu::RequestDeviceError),
    #[error("surface error: {0}")]
    Surface(#[from] wgpu::SurfaceError),
    #[error("surface creation failed: {0}")]
    CreateSurface(#[from] wgpu::CreateSurfaceError),
    #[error("capture failed: {0}")]
    Capture(String),
    #[error("jpeg encoding failed: {0}")]
    Encode(#[from] image::ImageError),
}

/// What the core draws each frame. Implementations issue draw calls into
/// the prepared render pass and may react to resizes and ticks.
pub trait Scene {
    fn draw(&mut self, ctx: &mut SceneContext<'_, '_>);
    fn resized(&mut self, _device: &wgpu::Device, _width: u32, _height: u32) {}
    fn on_tick(&mut self, _dt: f32) {}
}

pub struct SceneContext<'a, 'p> {
    pub device: &'a wgpu::Device,
    pub queue: &'a wgpu::Queue,
    pub pass: &'a mut wgpu::RenderPass<'p>,
    pub width: u32,
    pub height: u32,
}

/// Sliding-window frame-rate meter.
pub struct FrameMonitor {
    frames: VecDeque<Instant>,
}

impl FrameMonitor {
    pub fn new() -> Self {
        Self {
            frames: VecDeque::new(),
        }
    }

    pub fn tick(&mut self) {
        let now = Instant::now();
        self.frames.push_back(now);
        while let Some(&front) = self.frames.front() {
            if now - front > Duration::from_secs(1) {
                self.frames.pop_front();
            } else {
                break;
            }
        }
    }

    pub fn frames_per_second(&self) -> f32 {
        self.frames.len() as f32
    }
}

impl Default for FrameMonitor {
    fn default() -> Self {
        Self::new()
    }
}

struct Targets {
    /// Single-sampled color target; also the readback source.
    render_buffer: wgpu::Texture,
    render_view: wgpu::TextureView,
    /// Multisampled color target, resolved into `render_buffer`.
    msaa_view: Option<wgpu::TextureView>,
    _depth_buffer: wgpu::Texture,
    depth_view: wgpu::TextureView,
}

pub struct RenderCore {
    // dropped before the device (declaration order), mirroring the
    // sprite → buffers → views → context → swap-chain teardown sequence
    targets: Option<Targets>,
    overlay: Option<Box<dyn FnMut(&wgpu::Device, &wgpu::Queue)>>,
    tick_subscribers: Vec<Box<dyn FnMut(f32)>>,

    device: wgpu::Device,
    queue: wgpu::Queue,
    surface: Option<wgpu::Surface<'static>>,
    window: Option<Arc<Window>>,
    _instance: wgpu::Instance,

    width: u32,
    height: u32,
    resized: bool,
    is_dirty: bool,
    sample_count: u32,
    depth_format: wgpu::TextureFormat,
    pub background: wgpu::Color,
    pub sync_interval: bool,

    frame_monitor: FrameMonitor,
    stopwatch: Option<Instant>,
    previous_elapsed: f32,
}

impl RenderCore {
    /// Initializes for off-screen rendering (no window).
    pub fn new_offscreen(width: u32, height: u32) -> Result<Self, RenderError> {
        let instance = wgpu::Instance::new(wgpu::InstanceDescriptor::default());
        let adapter = request_adapter(&instance, None)?;
        Self::from_adapter(instance, adapter, None, None, width, height)
    }

    /// Initializes for on-screen rendering into the given window.
    pub fn new_onscreen(window: Arc<Window>) -> Result<Self, RenderError> {
        let instance = wgpu::Instance::new(wgpu::InstanceDescriptor::default());
        let surface = instance.create_surface(window.clone())?;
        let adapter = request_adapter(&instance, Some(&surface))?;
        let size = window.inner_size();
        Self::from_adapter(
            instance,
            adapter,
            Some(surface),
            Some(window),
            size.width.max(1),
            size.height.max(1),
        )
    }

    fn from_adapter(
        instance: wgpu::Instance,
        adapter: wgpu::Adapter,
        surface: Option<wgpu::Surface<'static>>,
        window: Option<Arc<Window>>,
        width: u32,
        height: u32,
    ) -> Result<Self, RenderError> {
        let sample_count = probe_sample_count(&adapter);
        let depth_format = if adapter
            .get_downlevel_capabilities()
            .flags
            .contains(wgpu::DownlevelFlags::compliant())
        {
            wgpu::TextureFormat::Depth32Float
        } else {
            wgpu::TextureFormat::Depth16Unorm
        };

        let (device, queue) = block_on(adapter.request_device(
            &wgpu::DeviceDescriptor {
                label: None,
                required_features: wgpu::Features::empty(),
                required_limits: wgpu::Limits::default().using_resolution(adapter.limits()),
                memory_hints: Default::default(),
            },
            None,
        ))?;

        Ok(Self {
            targets: None,
            overlay: None,
            tick_subscribers: Vec::new(),
            device,
            queue,
            surface,
            window,
            _instance: instance,
            width,
            height,
            resized: true,
            is_dirty: false,
            sample_count,
            depth_format,
            background: DEFAULT_BACKGROUND,
            sync_interval: true,
            frame_monitor: FrameMonitor::new(),
            stopwatch: None,
            previous_elapsed: 0.0,
        })
    }

    pub fn device(&self) -> &wgpu::Device {
        &self.device
    }

    pub fn queue(&self) -> &wgpu::Queue {
        &self.queue
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn set_width(&mut self, width: u32) {
        if self.width != width {
            self.width = width;
            self.resized = true;
        }
    }

    pub fn set_height(&mut self, height: u32) {
        if self.height != height {
            self.height = height;
            self.resized = true;
        }
    }

    pub fn aspect_ratio(&self) -> f32 {
        self.width as f32 / self.height as f32
    }

    pub fn sample_count(&self) -> u32 {
        self.sample_count
    }

    pub fn depth_format(&self) -> wgpu::TextureFormat {
        self.depth_format
    }

    pub fn is_dirty(&self) -> bool {
        self.is_dirty
    }

    pub fn set_dirty(&mut self) {
        self.is_dirty = true;
    }

    pub fn frames_per_second(&self) -> f32 {
        self.frame_monitor.frames_per_second()
    }

    pub fn elapsed(&self) -> f32 {
        self.stopwatch.map_or(0.0, |s| s.elapsed().as_secs_f32())
    }

    pub fn subscribe_tick(&mut self, subscriber: impl FnMut(f32) + 'static) {
        self.tick_subscribers.push(Box::new(subscriber));
    }

    /// Installs an overlay pass flushed after the scene each frame.
    pub fn set_overlay(&mut self, overlay: impl FnMut(&wgpu::Device, &wgpu::Queue) + 'static) {
        self.overlay = Some(Box::new(overlay));
    }

    fn resize(&mut self, scene: &mut dyn Scene) {
        if self.width == 0 || self.height == 0 {
            return;
        }

        // full teardown before recreating: old buffers and views go first
        self.targets = None;

        if let Some(surface) = &self.surface {
            surface.configure(
                &self.device,
                &wgpu::SurfaceConfiguration {
                    usage: wgpu::TextureUsages::RENDER_ATTACHMENT
                        | wgpu::TextureUsages::COPY_SRC,
                    format: TARGET_FORMAT,
                    width: self.width,
                    height: self.height,
                    present_mode: if self.sync_interval {
                        wgpu::PresentMode::Fifo
                    } else {
                        wgpu::PresentMode::Immediate
                    },
                    desired_maximum_frame_latency: 2,
                    alpha_mode: wgpu::CompositeAlphaMode::Auto,
                    view_formats: vec![],
                },
            );
        }

        let extent = wgpu::Extent3d {
            width: self.width,
            height: self.height,
            depth_or_array_layers: 1,
        };

        let render_buffer = self.device.create_texture(&wgpu::TextureDescriptor {
            label: Some("render-buffer"),
            size: extent,
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: TARGET_FORMAT,
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT
                | wgpu::TextureUsages::TEXTURE_BINDING
                | wgpu::TextureUsages::COPY_SRC,
            view_formats: &[],
        });
        let render_view = render_buffer.create_view(&wgpu::TextureViewDescriptor::default());

        let msaa_view = (self.sample_count > 1).then(|| {
            self.device
                .create_texture(&wgpu::TextureDescriptor {
                    label: Some("msaa-buffer"),
                    size: extent,
                    mip_level_count: 1,
                    sample_count: self.sample_count,
                    dimension: wgpu::TextureDimension::D2,
                    format: TARGET_FORMAT,
                    usage: wgpu::TextureUsages::RENDER_ATTACHMENT,
                    view_formats: &[],
                })
                .create_view(&wgpu::TextureViewDescriptor::default())
        });

        let depth_buffer = self.device.create_texture(&wgpu::TextureDescriptor {
            label: Some("depth-buffer"),
            size: extent,
            mip_level_count: 1,
            sample_count: self.sample_count,
            dimension: wgpu::TextureDimension::D2,
            format: self.depth_format,
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT,
            view_formats: &[],
        });
        let depth_view = depth_buffer.create_view(&wgpu::TextureViewDescriptor::default());

        self.targets = Some(Targets {
            render_buffer,
            render_view,
            msaa_view,
            _depth_buffer: depth_buffer,
            depth_view,
        });

        scene.resized(&self.device, self.width, self.height);
    }

    /// Runs one frame: resize if needed, tick, clear, scene draw, overlay,
    /// present.
    pub fn draw(&mut self, scene: &mut dyn Scene) -> Result<(), RenderError> {
        self.is_dirty = false;

        if self.resized {
            self.resize(scene);
            self.resized = false;
        }

        let stopwatch = *self.stopwatch.get_or_insert_with(Instant::now);
        let elapsed = stopwatch.elapsed().as_secs_f32();
        let dt = elapsed - self.previous_elapsed;
        self.previous_elapsed = elapsed;
        scene.on_tick(dt);
        for subscriber in &mut self.tick_subscribers {
            subscriber(dt);
        }

        self.frame_monitor.tick();

        let targets = self
            .targets
            .as_ref()
            .ok_or_else(|| RenderError::Capture("draw before targets exist".into()))?;

        let frame = match &self.surface {
            Some(surface) => Some(surface.get_current_texture()?),
            None => None,
        };
        let present_view = frame
            .as_ref()
            .map(|f| f.texture.create_view(&wgpu::TextureViewDescriptor::default()));

        // off-screen draws into the readback buffer; on-screen draws (or
        // resolves) into the swap-chain frame and blits a copy for capture
        let (color_view, resolve_view) = match (&targets.msaa_view, &present_view) {
            (Some(msaa), Some(present)) => (msaa, Some(present)),
            (Some(msaa), None) => (msaa, Some(&targets.render_view)),
            (None, Some(present)) => (present, None),
            (None, None) => (&targets.render_view, None),
        };

        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("frame-encoder"),
            });
        {
            let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some("frame-pass"),
                color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                    view: color_view,
                    resolve_target: resolve_view,
                    ops: wgpu::Operations {
                        load: wgpu::LoadOp::Clear(self.background),
                        store: wgpu::StoreOp::Store,
                    },
                })],
                depth_stencil_attachment: Some(wgpu::RenderPassDepthStencilAttachment {
                    view: &targets.depth_view,
                    depth_ops: Some(wgpu::Operations {
                        load: wgpu::LoadOp::Clear(1.0),
                        store: wgpu::StoreOp::Store,
                    }),
                    stencil_ops: None,
                }),
                timestamp_writes: None,
                occlusion_query_set: None,
            });
            pass.set_viewport(0.0, 0.0, self.width as f32, self.height as f32, 0.0, 1.0);
            let mut ctx = SceneContext {
                device: &self.device,
                queue: &self.queue,
                pass: &mut pass,
                width: self.width,
                height: self.height,
            };
            scene.draw(&mut ctx);
        }

        // keep the readback buffer current when drawing straight into the
        // swap-chain frame (single-sampled on-screen path)
        if let (Some(frame), None) = (&frame, &targets.msaa_view) {
            encoder.copy_texture_to_texture(
                frame.texture.as_image_copy(),
                targets.render_buffer.as_image_copy(),
                wgpu::Extent3d {
                    width: self.width,
                    height: self.height,
                    depth_or_array_layers: 1,
                },
            );
        }
        self.queue.submit(Some(encoder.finish()));

        if let Some(overlay) = &mut self.overlay {
            overlay(&self.device, &self.queue);
        }

        if let Some(frame) = frame {
            frame.present();
        }
        Ok(())
    }

    /// Renders one frame at `multiplier`× the current resolution and
    /// returns it as an in-memory JPEG. Width and height are only mutated
    /// for the duration of the call.
    pub fn shot(&mut self, scene: &mut dyn Scene, multiplier: u32) -> Result<Vec<u8>, RenderError> {
        let width = self.width;
        let height = self.height;

        self.set_width(width * multiplier);
        self.set_height(height * multiplier);
        let result = self.draw(scene).and_then(|_| self.read_back());

        self.set_width(width);
        self.set_height(height);
        result
    }

    fn read_back(&self) -> Result<Vec<u8>, RenderError> {
        let targets = self
            .targets
            .as_ref()
            .ok_or_else(|| RenderError::Capture("no render buffer".into()))?;
        let size = targets.render_buffer.size();
        let bytes_per_row = (size.width * 4).div_ceil(256) * 256;

        let output = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("shot-output"),
            size: bytes_per_row as u64 * size.height as u64,
            usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });

        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("shot-encoder"),
            });
        encoder.copy_texture_to_buffer(
            wgpu::ImageCopyTexture {
                texture: &targets.render_buffer,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            wgpu::ImageCopyBuffer {
                buffer: &output,
                layout: wgpu::ImageDataLayout {
                    offset: 0,
                    bytes_per_row: Some(bytes_per_row),
                    rows_per_image: Some(size.height),
                },
            },
            size,
        );
        self.queue.submit(Some(encoder.finish()));

        let slice = output.slice(..);
        let (tx, rx) = std::sync::mpsc::channel();
        slice.map_async(wgpu::MapMode::Read, move |r| {
            tx.send(r).ok();
        });
        self.device.poll(wgpu::Maintain::Wait);
        rx.recv()
            .map_err(|e| RenderError::Capture(e.to_string()))?
            .map_err(|e| RenderError::Capture(e.to_string()))?;

        let view = slice.get_mapped_range();
        let mut rgba = Vec::with_capacity((size.width * size.height * 4) as usize);
        for row in view.chunks(bytes_per_row as usize) {
            rgba.extend_from_slice(&row[..(size.width * 4) as usize]);
        }
        drop(view);
        output.unmap();

        let image = RgbaImage::from_raw(size.width, size.height, rgba)
            .ok_or_else(|| RenderError::Capture("row unpadding mismatch".into()))?;
        let mut jpeg = Vec::new();
        let rgb = image::DynamicImage::ImageRgba8(image).to_rgb8();
        JpegEncoder::new_with_quality(&mut jpeg, 95).encode_image(&rgb)?;
        Ok(jpeg)
    }

    /* fullscreen: meaningful only with a window; no-ops off-screen */

    pub fn enter_fullscreen(&mut self) {
        if let Some(window) = &self.window {
            window.set_fullscreen(Some(Fullscreen::Borderless(None)));
        }
    }

    pub fn exit_fullscreen(&mut self) {
        if let Some(window) = &self.window {
            window.set_fullscreen(None);
        }
    }

    pub fn toggle_fullscreen(&mut self) {
        if let Some(window) = &self.window {
            if window.fullscreen().is_some() {
                window.set_fullscreen(None);
            } else {
                window.set_fullscreen(Some(Fullscreen::Borderless(None)));
            }
        }
    }
}

fn request_adapter(
    instance: &wgpu::Instance,
    surface: Option<&wgpu::Surface<'_>>,
) -> Result<wgpu::Adapter, RenderError> {
    block_on(instance.request_adapter(&wgpu::RequestAdapterOptions {
        power_preference: wgpu::PowerPreference::HighPerformance,
        force_fallback_adapter: false,
        compatible_surface: surface,
    }))
    .ok_or(RenderError::NoAdapter)
}

/// 4× MSAA when the adapter supports it for the target format, else 1.
fn probe_sample_count(adapter: &wgpu::Adapter) -> u32 {
    let features = adapter.get_texture_format_features(TARGET_FORMAT);
    if features.flags.sample_count_supported(4) {
        4
    } else {
        1
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frame_monitor_counts_recent_frames() {
        let mut monitor = FrameMonitor::new();
        for _ in 0..5 {
            monitor.tick();
        }
        assert_eq!(monitor.frames_per_second(), 5.0);
    }
}
