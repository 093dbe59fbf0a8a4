//! The "maps" car material: texture slot binding and shader parameters
//! derived from the source material's shader name and float properties.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::texture::{GpuTexture, TextureEntry};

pub const HAS_NORMAL_MAP: u32 = 1;
pub const IS_CARPAINT: u32 = 2;
pub const HAS_DETAILS_MAP: u32 = 4;
pub const USE_NORMAL_ALPHA_AS_ALPHA: u32 = 8;

/// Material description as read from the car's model data.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MaterialDesc {
    pub name: String,
    pub shader_name: String,
    pub properties: HashMap<String, f32>,
    /// Slot name ("txDiffuse", "txNormal", "txMaps", "txDetail",
    /// "txNormalDetail") to texture filename.
    pub textures: HashMap<String, String>,
}

impl MaterialDesc {
    pub fn property(&self, name: &str) -> f32 {
        self.properties.get(name).copied().unwrap_or(0.0)
    }
}

/// Feature flags from shader-name substrings and material properties.
/// Damage shaders skip the normal map even when one is assigned.
pub fn derive_flags(desc: &MaterialDesc) -> u32 {
    let mut flags = 0;
    if !desc.shader_name.contains("damage") && desc.textures.contains_key("txNormal") {
        flags |= HAS_NORMAL_MAP;
    }
    if desc.property("isAdditive") == 2.0 {
        flags |= IS_CARPAINT;
    }
    if desc.property("useDetail") > 0.0 {
        flags |= HAS_DETAILS_MAP;
    }
    if desc.shader_name.contains("_AT") {
        flags |= USE_NORMAL_ALPHA_AS_ALPHA;
    }
    flags
}

#[repr(C)]
#[derive(Debug, Copy, Clone, bytemuck::Pod, bytemuck::Zeroable)]
pub struct MapsMaterialUniform {
    pub flags: u32,
    pub details_uv_multiplier: f32,
    pub details_normal_blend: f32,
    pub _padding: f32,
}

/// Pipeline and layouts shared by all maps materials.
pub struct MapsPipeline {
    pub pipeline: wgpu::RenderPipeline,
    pub material_layout: wgpu::BindGroupLayout,
    pub camera_layout: wgpu::BindGroupLayout,
    pub sampler: wgpu::Sampler,
    /// Bound into unused slots so the bind group is always complete.
    pub fallback_white: GpuTexture,
    pub fallback_flat_normal: GpuTexture,
}

#[repr(C)]
#[derive(Debug, Copy, Clone, bytemuck::Pod, bytemuck::Zeroable, Serialize, Deserialize)]
pub struct Vertex {
    pub position: [f32; 3],
    pub normal: [f32; 3],
    pub tex_coords: [f32; 2],
}

#[repr(C)]
#[derive(Debug, Copy, Clone, bytemuck::Pod, bytemuck::Zeroable)]
pub struct CameraUniform {
    pub view_proj: [[f32; 4]; 4],
    pub eye: [f32; 3],
    pub exposure: f32,
}

impl MapsPipeline {
    pub fn new(device: &wgpu::Device, queue: &wgpu::Queue, format: wgpu::TextureFormat,
               depth_format: wgpu::TextureFormat, sample_count: u32) -> Self {
        let material_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("maps-material-layout"),
            entries: &[
                wgpu::BindGroupLayoutEntry {
                    binding: 0,
                    visibility: wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Buffer {
                        ty: wgpu::BufferBindingType::Uniform,
                        has_dynamic_offset: false,
                        min_binding_size: wgpu::BufferSize::new(std::mem::size_of::<
                            MapsMaterialUniform,
                        >() as _),
                    },
                    count: None,
                },
                texture_entry(1),
                texture_entry(2),
                texture_entry(3),
                texture_entry(4),
                texture_entry(5),
                wgpu::BindGroupLayoutEntry {
                    binding: 6,
                    visibility: wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Sampler(wgpu::SamplerBindingType::Filtering),
                    count: None,
                },
            ],
        });

        let camera_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("maps-camera-layout"),
            entries: &[wgpu::BindGroupLayoutEntry {
                binding: 0,
                visibility: wgpu::ShaderStages::VERTEX_FRAGMENT,
                ty: wgpu::BindingType::Buffer {
                    ty: wgpu::BufferBindingType::Uniform,
                    has_dynamic_offset: false,
                    min_binding_size: wgpu::BufferSize::new(
                        std::mem::size_of::<CameraUniform>() as _
                    ),
                },
                count: None,
            }],
        });

        let shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("maps-shader"),
            source: wgpu::ShaderSource::Wgsl(std::borrow::Cow::Borrowed(include_str!(
                "../shaders/maps.wgsl"
            ))),
        });

        let layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("maps-pipeline-layout"),
            bind_group_layouts: &[&camera_layout, &material_layout],
            push_constant_ranges: &[],
        });

        let pipeline = device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
            label: Some("maps-pipeline"),
            layout: Some(&layout),
            vertex: wgpu::VertexState {
                module: &shader,
                entry_point: Some("vs_main"),
                buffers: &[wgpu::VertexBufferLayout {
                    array_stride: std::mem::size_of::<Vertex>() as wgpu::BufferAddress,
                    step_mode: wgpu::VertexStepMode::Vertex,
                    attributes: &wgpu::vertex_attr_array![0 => Float32x3, 1 => Float32x3, 2 => Float32x2],
                }],
                compilation_options: wgpu::PipelineCompilationOptions::default(),
            },
            fragment: Some(wgpu::FragmentState {
                module: &shader,
                entry_point: Some("fs_main"),
                targets: &[Some(wgpu::ColorTargetState {
                    format,
                    blend: Some(wgpu::BlendState::ALPHA_BLENDING),
                    write_mask: wgpu::ColorWrites::ALL,
                })],
                compilation_options: wgpu::PipelineCompilationOptions::default(),
            }),
            primitive: wgpu::PrimitiveState {
                cull_mode: Some(wgpu::Face::Back),
                ..Default::default()
            },
            depth_stencil: Some(wgpu::DepthStencilState {
                format: depth_format,
                depth_write_enabled: true,
                depth_compare: wgpu::CompareFunction::LessEqual,
                stencil: wgpu::StencilState::default(),
                bias: wgpu::DepthBiasState::default(),
            }),
            multisample: wgpu::MultisampleState {
                count: sample_count,
                ..Default::default()
            },
            multiview: None,
            cache: None,
        });

        let sampler = device.create_sampler(&wgpu::SamplerDescriptor {
            label: Some("maps-sampler"),
            address_mode_u: wgpu::AddressMode::Repeat,
            address_mode_v: wgpu::AddressMode::Repeat,
            mag_filter: wgpu::FilterMode::Linear,
            min_filter: wgpu::FilterMode::Linear,
            mipmap_filter: wgpu::FilterMode::Linear,
            ..Default::default()
        });

        Self {
            pipeline,
            material_layout,
            camera_layout,
            sampler,
            fallback_white: GpuTexture::solid(device, queue, [255, 255, 255, 255]),
            fallback_flat_normal: GpuTexture::solid(device, queue, [128, 128, 255, 255]),
        }
    }
}

fn texture_entry(binding: u32) -> wgpu::BindGroupLayoutEntry {
    wgpu::BindGroupLayoutEntry {
        binding,
        visibility: wgpu::ShaderStages::FRAGMENT,
        ty: wgpu::BindingType::Texture {
            multisampled: false,
            view_dimension: wgpu::TextureViewDimension::D2,
            sample_type: wgpu::TextureSampleType::Float { filterable: true },
        },
        count: None,
    }
}

pub struct MapsMaterial {
    name: String,
    flags: u32,
    details_uv_multiplier: f32,
    details_normal_blend: f32,
    pub base: TextureEntry<GpuTexture>,
    pub normal: TextureEntry<GpuTexture>,
    pub maps: TextureEntry<GpuTexture>,
    pub detail: TextureEntry<GpuTexture>,
    pub detail_normal: TextureEntry<GpuTexture>,
    uniform_buffer: Option<wgpu::Buffer>,
    bind_group: Option<wgpu::BindGroup>,
}

impl MapsMaterial {
    pub fn new(desc: &MaterialDesc) -> Self {
        Self {
            name: desc.name.clone(),
            flags: derive_flags(desc),
            details_uv_multiplier: desc.property("detailUVMultiplier"),
            details_normal_blend: desc.property("detailNormalBlend"),
            base: TextureEntry::new(desc.textures.get("txDiffuse").cloned().unwrap_or_default()),
            normal: TextureEntry::new(desc.textures.get("txNormal").cloned().unwrap_or_default()),
            maps: TextureEntry::new(desc.textures.get("txMaps").cloned().unwrap_or_default()),
            detail: TextureEntry::new(desc.textures.get("txDetail").cloned().unwrap_or_default()),
            detail_normal: TextureEntry::new(
                desc.textures
                    .get("txNormalDetail")
                    .cloned()
                    .unwrap_or_default(),
            ),
            uniform_buffer: None,
            bind_group: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn flags(&self) -> u32 {
        self.flags
    }

    /// Installs any finished texture loads; call on the render thread.
    pub fn pump_textures(&mut self, device: &wgpu::Device, queue: &wgpu::Queue) {
        let mut changed = false;
        for entry in [
            &mut self.base,
            &mut self.normal,
            &mut self.maps,
            &mut self.detail,
            &mut self.detail_normal,
        ] {
            if entry.has_pending() {
                entry.pump(|image| {
                    changed = true;
                    Some(GpuTexture::upload(device, queue, &image))
                });
            }
        }
        if changed {
            self.bind_group = None;
        }
    }

    /// Uploads the shader constant struct and (re)binds the textures.
    pub fn prepare(&mut self, device: &wgpu::Device, queue: &wgpu::Queue, shared: &MapsPipeline) {
        // blend is meaningless without a detail normal texture
        let blend = if self.detail_normal.effective().is_some() {
            self.details_normal_blend
        } else {
            0.0
        };
        let uniform = MapsMaterialUniform {
            flags: self.flags,
            details_uv_multiplier: self.details_uv_multiplier,
            details_normal_blend: blend,
            _padding: 0.0,
        };

        let buffer = self.uniform_buffer.get_or_insert_with(|| {
            device.create_buffer(&wgpu::BufferDescriptor {
                label: Some("maps-material-uniform"),
                size: std::mem::size_of::<MapsMaterialUniform>() as u64,
                usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
                mapped_at_creation: false,
            })
        });
        queue.write_buffer(buffer, 0, bytemuck::cast_slice(&[uniform]));

        if self.bind_group.is_none() {
            let base = self
                .base
                .effective()
                .unwrap_or(&shared.fallback_white);
            let normal = self
                .normal
                .effective()
                .unwrap_or(&shared.fallback_flat_normal);
            let maps = self.maps.effective().unwrap_or(&shared.fallback_white);
            let detail = self.detail.effective().unwrap_or(&shared.fallback_white);
            let detail_normal = self
                .detail_normal
                .effective()
                .unwrap_or(&shared.fallback_flat_normal);

            self.bind_group = Some(device.create_bind_group(&wgpu::BindGroupDescriptor {
                label: Some("maps-material-bind-group"),
                layout: &shared.material_layout,
                entries: &[
                    wgpu::BindGroupEntry {
                        binding: 0,
                        resource: buffer.as_entire_binding(),
                    },
                    wgpu::BindGroupEntry {
                        binding: 1,
                        resource: wgpu::BindingResource::TextureView(&base.view),
                    },
                    wgpu::BindGroupEntry {
                        binding: 2,
                        resource: wgpu::BindingResource::TextureView(&normal.view),
                    },
                    wgpu::BindGroupEntry {
                        binding: 3,
                        resource: wgpu::BindingResource::TextureView(&maps.view),
                    },
                    wgpu::BindGroupEntry {
                        binding: 4,
                        resource: wgpu::BindingResource::TextureView(&detail.view),
                    },
                    wgpu::BindGroupEntry {
                        binding: 5,
                        resource: wgpu::BindingResource::TextureView(&detail_normal.view),
                    },
                    wgpu::BindGroupEntry {
                        binding: 6,
                        resource: wgpu::BindingResource::Sampler(&shared.sampler),
                    },
                ],
            }));
        }
    }

    /// Dispatches the maps technique for `index_count` indices. The mesh's
    /// vertex and index buffers must already be set on the pass.
    pub fn draw(&self, pass: &mut wgpu::RenderPass<'_>, shared: &MapsPipeline, index_count: u32) {
        let bind_group = match &self.bind_group {
            Some(bg) => bg,
            None => return,
        };
        pass.set_pipeline(&shared.pipeline);
        pass.set_bind_group(1, bind_group, &[]);
        pass.draw_indexed(0..index_count, 0, 0..1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn desc(shader: &str, props: &[(&str, f32)], textures: &[&str]) -> MaterialDesc {
        MaterialDesc {
            name: "test".into(),
            shader_name: shader.into(),
            properties: props.iter().map(|(k, v)| (k.to_string(), *v)).collect(),
            textures: textures
                .iter()
                .map(|t| (t.to_string(), format!("{t}.dds")))
                .collect(),
        }
    }

    #[test]
    fn carpaint_flag_needs_exact_two() {
        let d = desc("ksPerPixelMultiMap", &[("isAdditive", 2.0)], &[]);
        assert_ne!(derive_flags(&d) & IS_CARPAINT, 0);
        let d = desc("ksPerPixelMultiMap", &[("isAdditive", 1.0)], &[]);
        assert_eq!(derive_flags(&d) & IS_CARPAINT, 0);
    }

    #[test]
    fn damage_shader_skips_normal_map() {
        let d = desc("ksPerPixelMultiMap_damage", &[], &["txNormal"]);
        assert_eq!(derive_flags(&d) & HAS_NORMAL_MAP, 0);
        let d = desc("ksPerPixelMultiMap", &[], &["txNormal"]);
        assert_ne!(derive_flags(&d) & HAS_NORMAL_MAP, 0);
    }

    #[test]
    fn at_shader_uses_normal_alpha() {
        let d = desc("ksPerPixelMultiMap_AT", &[], &[]);
        assert_ne!(derive_flags(&d) & USE_NORMAL_ALPHA_AS_ALPHA, 0);
    }

    #[test]
    fn detail_flag_from_use_detail() {
        let d = desc("ksPerPixelMultiMap", &[("useDetail", 1.0)], &[]);
        assert_ne!(derive_flags(&d) & HAS_DETAILS_MAP, 0);
        let d = desc("ksPerPixelMultiMap", &[("useDetail", 0.0)], &[]);
        assert_eq!(derive_flags(&d) & HAS_DETAILS_MAP, 0);
    }
}
