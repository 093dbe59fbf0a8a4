//! In-process shot procedure: renders the car model off-screen once per
//! skin, swapping override textures between shots, and writes the captures
//! into a fresh staging directory.

use glam::{Mat4, Vec3};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use wgpu::util::DeviceExt;

use crate::material::{CameraUniform, MapsMaterial, MapsPipeline, MaterialDesc, Vertex};
use crate::render::{RenderCore, RenderError, Scene, SceneContext, TARGET_FORMAT};
use crate::shoot::{CancellationToken, ShootProgress, ShotMode, ShotProcedure, ShotProperties};
use crate::utils::{parse_vec3, CameraParams};

const TEXTURE_WAIT_LIMIT: Duration = Duration::from_secs(20);

/// Geometry for one draw call plus its material description.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct MeshData {
    pub vertices: Vec<Vertex>,
    pub indices: Vec<u32>,
    pub material: MaterialDesc,
}

/// CPU-side car model as extracted from the kn5 data.
#[derive(Debug, Clone, Default, serde::Serialize, serde::Deserialize)]
pub struct CarModel {
    pub meshes: Vec<MeshData>,
}

struct GpuMesh {
    vertex_buffer: wgpu::Buffer,
    index_buffer: wgpu::Buffer,
    index_count: u32,
    material: MapsMaterial,
}

struct CarScene {
    pipeline: MapsPipeline,
    meshes: Vec<GpuMesh>,
    camera: CameraParams,
    camera_buffer: wgpu::Buffer,
    camera_bind_group: wgpu::BindGroup,
}

impl CarScene {
    fn new(core: &RenderCore, model: &CarModel, textures_dir: &Path) -> Self {
        let device = core.device();
        let pipeline = MapsPipeline::new(
            device,
            core.queue(),
            TARGET_FORMAT,
            core.depth_format(),
            core.sample_count(),
        );

        let meshes = model
            .meshes
            .iter()
            .map(|mesh| {
                let mut material = MapsMaterial::new(&mesh.material);
                for entry in [
                    &mut material.base,
                    &mut material.normal,
                    &mut material.maps,
                    &mut material.detail,
                    &mut material.detail_normal,
                ] {
                    if entry.name().is_empty() {
                        continue;
                    }
                    let path = textures_dir.join(entry.name());
                    if path.is_file() {
                        entry.set_base_from_file(&path);
                    }
                }
                GpuMesh {
                    vertex_buffer: device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
                        label: Some("car-vertices"),
                        contents: bytemuck::cast_slice(&mesh.vertices),
                        usage: wgpu::BufferUsages::VERTEX,
                    }),
                    index_buffer: device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
                        label: Some("car-indices"),
                        contents: bytemuck::cast_slice(&mesh.indices),
                        usage: wgpu::BufferUsages::INDEX,
                    }),
                    index_count: mesh.indices.len() as u32,
                    material,
                }
            })
            .collect();

        let camera_buffer = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("car-camera"),
            size: std::mem::size_of::<CameraUniform>() as u64,
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        let camera_bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("car-camera-bind-group"),
            layout: &pipeline.camera_layout,
            entries: &[wgpu::BindGroupEntry {
                binding: 0,
                resource: camera_buffer.as_entire_binding(),
            }],
        });

        Self {
            pipeline,
            meshes,
            camera: CameraParams::default(),
            camera_buffer,
            camera_bind_group,
        }
    }

    fn pump(&mut self, device: &wgpu::Device, queue: &wgpu::Queue) {
        for mesh in &mut self.meshes {
            mesh.material.pump_textures(device, queue);
            mesh.material.prepare(device, queue, &self.pipeline);
        }
    }

    fn has_pending_textures(&self) -> bool {
        self.meshes.iter().any(|m| {
            [
                &m.material.base,
                &m.material.normal,
                &m.material.maps,
                &m.material.detail,
                &m.material.detail_normal,
            ]
            .iter()
            .any(|e| e.has_pending())
        })
    }

    /// Applies a skin: files in the skin folder matching a slot's texture
    /// name override it, everything else falls back to the base.
    fn apply_skin(&mut self, skin_dir: &Path) {
        for mesh in &mut self.meshes {
            for entry in [
                &mut mesh.material.base,
                &mut mesh.material.normal,
                &mut mesh.material.maps,
                &mut mesh.material.detail,
                &mut mesh.material.detail_normal,
            ] {
                if entry.name().is_empty() {
                    continue;
                }
                let candidate = skin_dir.join(entry.name());
                if candidate.is_file() {
                    entry.set_override_from_file(&candidate);
                } else {
                    entry.clear_override();
                }
            }
        }
    }

    fn camera_uniform(&self, aspect: f32) -> CameraUniform {
        let eye = Vec3::from(self.camera.position);
        let target = Vec3::from(self.camera.look_at);
        let view = Mat4::look_at_rh(eye, target, Vec3::Y);
        let proj = Mat4::perspective_rh(self.camera.fov.to_radians(), aspect, 0.05, 500.0);
        CameraUniform {
            view_proj: (proj * view).to_cols_array_2d(),
            eye: eye.to_array(),
            exposure: self.camera.exposure.unwrap_or(94.5),
        }
    }
}

impl Scene for CarScene {
    fn draw(&mut self, ctx: &mut SceneContext<'_, '_>) {
        let aspect = ctx.width as f32 / ctx.height.max(1) as f32;
        let uniform = self.camera_uniform(aspect);
        ctx.queue
            .write_buffer(&self.camera_buffer, 0, bytemuck::cast_slice(&[uniform]));

        ctx.pass.set_bind_group(0, &self.camera_bind_group, &[]);
        for mesh in &self.meshes {
            ctx.pass.set_vertex_buffer(0, mesh.vertex_buffer.slice(..));
            ctx.pass
                .set_index_buffer(mesh.index_buffer.slice(..), wgpu::IndexFormat::Uint32);
            mesh.material.draw(ctx.pass, &self.pipeline, mesh.index_count);
        }
    }
}

/// Renders previews without launching the simulator.
pub struct EmbeddedShot {
    core: RenderCore,
    scene: CarScene,
    /// Supersampling factor applied at capture time.
    pub multiplier: u32,
}

impl EmbeddedShot {
    pub fn new(
        width: u32,
        height: u32,
        model: &CarModel,
        textures_dir: &Path,
    ) -> Result<Self, RenderError> {
        let core = RenderCore::new_offscreen(width, height)?;
        let scene = CarScene::new(&core, model, textures_dir);
        Ok(Self {
            core,
            scene,
            multiplier: 1,
        })
    }

    fn wait_for_textures(&mut self) -> Result<(), RenderError> {
        let begin = Instant::now();
        loop {
            self.scene.pump(self.core.device(), self.core.queue());
            if !self.scene.has_pending_textures() {
                return Ok(());
            }
            if begin.elapsed() > TEXTURE_WAIT_LIMIT {
                return Err(RenderError::Capture("texture loads timed out".into()));
            }
            std::thread::sleep(Duration::from_millis(5));
        }
    }

    fn shoot_one(&mut self, destination: &Path) -> Result<(), RenderError> {
        self.wait_for_textures()?;
        let jpeg = self.core.shot(&mut self.scene, self.multiplier.max(1))?;
        std::fs::write(destination, jpeg)
            .map_err(|e| RenderError::Capture(e.to_string()))?;
        Ok(())
    }
}

/// Camera for a shot: the fixed preset, or the classic orbit derived
/// from the dx/dy angles and distance around the car.
pub fn camera_from_props(props: &ShotProperties) -> CameraParams {
    let defaults = CameraParams::default();
    let exposure =
        (props.fixed_camera_exposure != 0.0).then_some(props.fixed_camera_exposure as f32);
    match props.mode {
        ShotMode::Fixed => CameraParams {
            position: parse_vec3(&props.fixed_camera_position).unwrap_or(defaults.position),
            look_at: parse_vec3(&props.fixed_camera_look_at).unwrap_or(defaults.look_at),
            fov: props.fixed_camera_fov as f32,
            exposure,
        },
        ShotMode::ClassicManual => {
            let target = Vec3::new(0.0, 0.7, 0.0);
            let yaw = (props.classic_camera_dx as f32).to_radians();
            let pitch = (props.classic_camera_dy as f32).to_radians();
            let offset = Vec3::new(
                pitch.cos() * yaw.sin(),
                pitch.sin(),
                pitch.cos() * yaw.cos(),
            ) * props.classic_camera_distance as f32;
            CameraParams {
                position: target + offset,
                look_at: target,
                fov: props.fixed_camera_fov as f32,
                exposure,
            }
        }
    }
}

/// Staging directory for captures; removed on drop unless handed over
/// via [`StagingDir::keep`].
pub struct StagingDir {
    path: PathBuf,
    kept: bool,
}

impl StagingDir {
    pub fn create() -> std::io::Result<Self> {
        let path = std::env::temp_dir().join(format!("previews-{}", uuid::Uuid::new_v4()));
        std::fs::create_dir_all(&path)?;
        Ok(Self { path, kept: false })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Transfers ownership of the directory to the caller.
    pub fn keep(mut self) -> PathBuf {
        self.kept = true;
        self.path.clone()
    }
}

impl Drop for StagingDir {
    fn drop(&mut self) {
        if !self.kept {
            std::fs::remove_dir_all(&self.path).ok();
        }
    }
}

impl ShotProcedure for EmbeddedShot {
    fn shoot(
        &mut self,
        props: &ShotProperties,
        progress: &mut dyn FnMut(ShootProgress),
        cancellation: &CancellationToken,
    ) -> anyhow::Result<Option<PathBuf>> {
        self.scene.camera = camera_from_props(props);

        let skins_dir = props
            .ac_root
            .join("content")
            .join("cars")
            .join(&props.car_id)
            .join("skins");
        let skin_ids: Vec<String> = match &props.skin_ids {
            Some(ids) => ids.clone(),
            None => {
                let mut ids: Vec<String> = std::fs::read_dir(&skins_dir)?
                    .flatten()
                    .filter(|e| e.path().is_dir())
                    .filter_map(|e| e.file_name().into_string().ok())
                    .collect();
                ids.sort();
                ids
            }
        };

        // dropping the guard on cancellation or error removes any
        // partial captures
        let staging = StagingDir::create()?;

        for (index, skin_id) in skin_ids.iter().enumerate() {
            if cancellation.is_cancelled() {
                return Ok(None);
            }
            progress(ShootProgress {
                skin_id: skin_id.clone(),
                skin_index: index,
                total_skins: skin_ids.len(),
            });

            self.scene.apply_skin(&skins_dir.join(skin_id));
            self.shoot_one(&staging.path().join(format!("{skin_id}.jpg")))?;
        }

        if cancellation.is_cancelled() {
            return Ok(None);
        }
        Ok(Some(staging.keep()))
    }
}
