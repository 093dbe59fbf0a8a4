//! Car-preview screenshot pipeline: persistent settings storage, async
//! texture overrides, an off-screen render core with JPEG capture, and the
//! session that shoots one preview per skin and commits the results.

pub mod commit;
pub mod embedded;
pub mod material;
pub mod paths;
pub mod presets;
pub mod render;
pub mod save_helper;
pub mod shoot;
pub mod storage;
pub mod texture;
pub mod utils;

pub use commit::{apply_previews, CommitReport};
pub use embedded::{CarModel, EmbeddedShot, MeshData};
pub use paths::{AcPaths, DocumentsPaths};
pub use render::{RenderCore, RenderError, Scene, SceneContext};
pub use save_helper::SaveHelper;
pub use shoot::{
    CancellationToken, Phase, Prompter, ShootProgress, ShootSession, ShotProcedure,
    ShotProperties,
};
pub use storage::Storage;
pub use texture::TextureEntry;
pub use utils::{CameraParams, CarRef, PpFilterRef, ShowroomRef, SkinRef};
