//! Mutable holder for a texture resource plus an optional override, with
//! last-request-wins replacement. Decoding happens on worker threads; GPU
//! resources are only created when the owner pumps completions on the
//! render thread.

use crossbeam_channel::{unbounded, Receiver, Sender};
use image::RgbaImage;
use std::path::Path;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Slot {
    Base,
    Override,
}

struct Completion {
    slot: Slot,
    generation: u64,
    image: Option<RgbaImage>,
}

pub struct TextureEntry<R> {
    name: String,
    base: Option<R>,
    override_: Option<R>,
    base_gen: u64,
    override_gen: u64,
    /// Loads spawned but not yet seen by [`TextureEntry::pump`].
    in_flight: usize,
    tx: Sender<Completion>,
    rx: Receiver<Completion>,
}

impl<R> TextureEntry<R> {
    pub fn new(name: impl Into<String>) -> Self {
        let (tx, rx) = unbounded();
        Self {
            name: name.into(),
            base: None,
            override_: None,
            base_gen: 0,
            override_gen: 0,
            in_flight: 0,
            tx,
            rx,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Override if set, base otherwise.
    pub fn effective(&self) -> Option<&R> {
        self.override_.as_ref().or(self.base.as_ref())
    }

    pub fn base(&self) -> Option<&R> {
        self.base.as_ref()
    }

    pub fn override_resource(&self) -> Option<&R> {
        self.override_.as_ref()
    }

    /// Kicks off a background base load. The generation counter is bumped
    /// before the worker starts, so a load that finishes after a newer
    /// request is discarded on completion.
    pub fn set_base_async<F>(&mut self, loader: F)
    where
        F: FnOnce() -> Option<RgbaImage> + Send + 'static,
    {
        self.base_gen += 1;
        self.spawn(Slot::Base, self.base_gen, loader);
    }

    pub fn set_override_async<F>(&mut self, loader: F)
    where
        F: FnOnce() -> Option<RgbaImage> + Send + 'static,
    {
        self.override_gen += 1;
        self.spawn(Slot::Override, self.override_gen, loader);
    }

    pub fn set_base_from_file(&mut self, path: &Path) {
        let path = path.to_path_buf();
        self.set_base_async(move || image::open(&path).ok().map(|i| i.to_rgba8()));
    }

    pub fn set_override_from_file(&mut self, path: &Path) {
        let path = path.to_path_buf();
        self.set_override_async(move || image::open(&path).ok().map(|i| i.to_rgba8()));
    }

    /// Drops the override, so the base shows through again.
    pub fn clear_override(&mut self) {
        self.override_gen += 1;
        self.override_ = None;
    }

    fn spawn<F>(&mut self, slot: Slot, generation: u64, loader: F)
    where
        F: FnOnce() -> Option<RgbaImage> + Send + 'static,
    {
        self.in_flight += 1;
        let tx = self.tx.clone();
        std::thread::spawn(move || {
            let image = loader();
            tx.send(Completion {
                slot,
                generation,
                image,
            })
            .ok();
        });
    }

    /// Installs finished loads. Call on the thread that owns the device;
    /// `installer` turns decoded pixels into the live resource. A failed
    /// base load keeps the previous base, a failed override load clears
    /// the override.
    pub fn pump(&mut self, mut installer: impl FnMut(RgbaImage) -> Option<R>) {
        while let Ok(done) = self.rx.try_recv() {
            self.in_flight = self.in_flight.saturating_sub(1);
            match done.slot {
                Slot::Base => {
                    if done.generation != self.base_gen {
                        continue;
                    }
                    if let Some(image) = done.image {
                        if let Some(resource) = installer(image) {
                            self.base = Some(resource);
                        }
                    }
                }
                Slot::Override => {
                    if done.generation != self.override_gen {
                        continue;
                    }
                    match done.image {
                        Some(image) => self.override_ = installer(image),
                        None => self.override_ = None,
                    }
                }
            }
        }
    }

    /// True while a spawned load has not yet been pumped. Counts loads
    /// whose worker has not sent its result yet, not just queued
    /// completions, so callers can wait for everything they requested.
    pub fn has_pending(&self) -> bool {
        self.in_flight > 0
    }

    /// Releases both resources; getters return None afterwards.
    pub fn dispose(&mut self) {
        self.base_gen += 1;
        self.override_gen += 1;
        self.base = None;
        self.override_ = None;
    }
}

/// A texture living on the GPU, ready to be bound by a material.
pub struct GpuTexture {
    pub texture: wgpu::Texture,
    pub view: wgpu::TextureView,
}

impl GpuTexture {
    pub fn upload(device: &wgpu::Device, queue: &wgpu::Queue, image: &RgbaImage) -> Self {
        let size = wgpu::Extent3d {
            width: image.width(),
            height: image.height(),
            depth_or_array_layers: 1,
        };
        let texture = device.create_texture(&wgpu::TextureDescriptor {
            label: None,
            size,
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: wgpu::TextureFormat::Rgba8UnormSrgb,
            usage: wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST,
            view_formats: &[],
        });
        queue.write_texture(
            wgpu::ImageCopyTexture {
                texture: &texture,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            image,
            wgpu::ImageDataLayout {
                offset: 0,
                bytes_per_row: Some(4 * image.width()),
                rows_per_image: Some(image.height()),
            },
            size,
        );
        let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
        Self { texture, view }
    }

    /// 1×1 solid-color texture used for unbound material slots.
    pub fn solid(device: &wgpu::Device, queue: &wgpu::Queue, rgba: [u8; 4]) -> Self {
        let image = RgbaImage::from_pixel(1, 1, image::Rgba(rgba));
        Self::upload(device, queue, &image)
    }
}
