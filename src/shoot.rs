//! Shoot session: options, the Options → Waiting → Result | Error state
//! machine, and the contract of the external shot procedure.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::paths::AcPaths;
use crate::save_helper::SaveHelper;
use crate::storage::Storage;
use crate::utils::{format_vec3, parse_vec3, CameraParams, CarRef, PpFilterRef, ShowroomRef};

pub const SAVE_KEY: &str = "__AutoUpdatePreviews";

/// Payload of the built-in preview filter, installed on first use.
pub const BUILT_IN_FILTER_NAME: &str = "AT-Previews Special";
pub const BUILT_IN_FILTER_FILENAME: &str = "AT-Previews Special.ini";
pub const BUILT_IN_FILTER_CONTENT: &[u8] =
    include_bytes!("../assets/AT-Previews Special.ini");

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Options,
    Waiting,
    Result,
    Error,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShotMode {
    Fixed,
    ClassicManual,
}

/// Parameters handed to the shot procedure.
#[derive(Debug, Clone)]
pub struct ShotProperties {
    pub ac_root: PathBuf,
    pub car_id: String,
    pub showroom_id: String,
    /// None means every skin the car has.
    pub skin_ids: Option<Vec<String>>,
    /// Filter by filename stem.
    pub filter: String,
    pub fxaa: Option<bool>,
    pub mode: ShotMode,
    pub use_bmp: bool,
    pub disable_watermark: bool,
    pub disable_sweet_fx: bool,
    pub classic_camera_dx: f64,
    pub classic_camera_dy: f64,
    pub classic_camera_distance: f64,
    pub fixed_camera_position: String,
    pub fixed_camera_look_at: String,
    pub fixed_camera_fov: f64,
    /// 0 means unset.
    pub fixed_camera_exposure: f64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShootProgress {
    pub skin_id: String,
    pub skin_index: usize,
    pub total_skins: usize,
}

#[derive(Debug, Clone)]
pub struct ShootResult {
    pub staging_dir: PathBuf,
    /// Skin id to captured file, as found in the staging directory.
    pub captured: Vec<(String, PathBuf)>,
    pub elapsed: Duration,
}

#[derive(Clone, Debug, Default)]
pub struct CancellationToken(Arc<AtomicBool>);

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

/// Produces one image per skin under a fresh staging directory and returns
/// it, or None when cancelled before anything useful happened.
pub trait ShotProcedure {
    fn shoot(
        &mut self,
        props: &ShotProperties,
        progress: &mut dyn FnMut(ShootProgress),
        cancellation: &CancellationToken,
    ) -> anyhow::Result<Option<PathBuf>>;
}

/// UI-side collaborator for confirmations. A headless host can answer
/// everything with `false`.
pub trait Prompter {
    /// "X isn't installed. Install it?" Returning true triggers the
    /// download via [`ShowroomProvider`].
    fn install_showroom(&mut self, name: &str, id: &str, information_url: &str) -> bool;

    /// A precondition is missing; true means "open options".
    fn missing_option(&mut self, message: &str) -> bool;
}

/// Downloads and installs a showroom into the content tree.
pub trait ShowroomProvider {
    fn install(&mut self, id: &str) -> anyhow::Result<ShowroomRef>;
}

/// Lookup into the (externally managed) content catalog.
pub trait ContentResolver {
    fn showroom_by_id(&self, id: &str) -> Option<ShowroomRef>;
    fn filter_by_id(&self, id: &str) -> Option<PpFilterRef>;
}

/// Canned install prompts for showrooms the preset may reference.
pub fn known_showroom_prompt(id: &str) -> Option<(&'static str, &'static str)> {
    match id {
        "at_studio_black" => Some((
            "Studio Black Showroom (AT Previews Special)",
            "http://www.racedepartment.com/downloads/studio-black-showroom.4353/",
        )),
        "at_previews" => Some((
            "Kunos Previews Showroom (AT Previews Special)",
            "http://www.assettocorsa.net/assetto-corsa-v1-5-dev-diary-part-33/",
        )),
        _ => None,
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum FilterChoice {
    /// The bundled "AT-Previews Special" filter.
    BuiltIn,
    Installed(PpFilterRef),
}

impl FilterChoice {
    pub fn id(&self) -> String {
        match self {
            FilterChoice::BuiltIn => BUILT_IN_FILTER_FILENAME.to_lowercase(),
            FilterChoice::Installed(f) => f.id.clone(),
        }
    }

    pub fn name(&self) -> String {
        match self {
            FilterChoice::BuiltIn => BUILT_IN_FILTER_NAME.to_string(),
            FilterChoice::Installed(f) => f.name(),
        }
    }
}

/// Writes the built-in filter payload into `system/cfg/ppfilters` unless a
/// file of matching length is already there.
pub fn ensure_built_in_filter(paths: &AcPaths) -> std::io::Result<PathBuf> {
    let destination = paths.pp_filter_file(BUILT_IN_FILTER_FILENAME);
    if let Ok(meta) = destination.metadata() {
        if meta.len() == BUILT_IN_FILTER_CONTENT.len() as u64 {
            return Ok(destination);
        }
    }
    if let Some(parent) = destination.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(&destination, BUILT_IN_FILTER_CONTENT)?;
    Ok(destination)
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct SavedShoot {
    showroom_id: Option<String>,
    filter_id: Option<String>,
    camera_position: String,
    camera_look_at: String,
    camera_fov: f64,
    camera_exposure: Option<f64>,
    disable_sweet_fx: bool,
    disable_watermark: bool,
    resize_previews: bool,
}

#[derive(Debug, Clone)]
pub struct ShootOptions {
    pub showroom: Option<ShowroomRef>,
    pub filter: Option<FilterChoice>,
    pub camera: CameraParams,
    pub disable_sweet_fx: bool,
    pub disable_watermark: bool,
    pub resize_previews: bool,
}

impl Default for ShootOptions {
    fn default() -> Self {
        Self {
            showroom: None,
            filter: Some(FilterChoice::BuiltIn),
            camera: CameraParams::default(),
            disable_sweet_fx: true,
            disable_watermark: true,
            resize_previews: true,
        }
    }
}

pub struct ShootSession {
    paths: AcPaths,
    car: CarRef,
    /// Subset of skin ids to shoot; None = all.
    skin_ids: Option<Vec<String>>,
    pub options: ShootOptions,
    phase: Phase,
    status: String,
    error_message: Option<String>,
    result: Option<ShootResult>,
    cancellation: CancellationToken,
    save: SaveHelper,
}

impl ShootSession {
    pub fn new(
        paths: AcPaths,
        car: CarRef,
        skin_ids: Option<Vec<String>>,
        storage: Arc<Storage>,
    ) -> Self {
        Self {
            paths,
            car,
            skin_ids,
            options: ShootOptions::default(),
            phase: Phase::Options,
            status: String::new(),
            error_message: None,
            result: None,
            cancellation: CancellationToken::new(),
            save: SaveHelper::new(SAVE_KEY, storage),
        }
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn status(&self) -> &str {
        &self.status
    }

    pub fn error_message(&self) -> Option<&str> {
        self.error_message.as_deref()
    }

    pub fn result(&self) -> Option<&ShootResult> {
        self.result.as_ref()
    }

    pub fn cancellation(&self) -> CancellationToken {
        self.cancellation.clone()
    }

    pub fn can_start(&self) -> bool {
        self.options.showroom.is_some() && self.options.filter.is_some()
    }

    /* option setters; each schedules a debounced save */

    pub fn set_showroom(&mut self, showroom: Option<ShowroomRef>) {
        if self.options.showroom != showroom {
            self.options.showroom = showroom;
            self.save_later();
        }
    }

    pub fn set_filter(&mut self, filter: Option<FilterChoice>) {
        if self.options.filter != filter {
            self.options.filter = filter;
            self.save_later();
        }
    }

    pub fn set_camera(&mut self, camera: CameraParams) {
        if !camera.is_valid() {
            log::warn!("ignoring invalid camera parameters");
            return;
        }
        if self.options.camera != camera {
            self.options.camera = camera;
            self.save_later();
        }
    }

    pub fn set_disable_sweet_fx(&mut self, value: bool) {
        if self.options.disable_sweet_fx != value {
            self.options.disable_sweet_fx = value;
            self.save_later();
        }
    }

    pub fn set_disable_watermark(&mut self, value: bool) {
        if self.options.disable_watermark != value {
            self.options.disable_watermark = value;
            self.save_later();
        }
    }

    pub fn set_resize_previews(&mut self, value: bool) {
        if self.options.resize_previews != value {
            self.options.resize_previews = value;
            self.save_later();
        }
    }

    fn save_later(&self) {
        let snapshot = self.snapshot();
        self.save.save_later(move || Some(snapshot));
    }

    /// Flushes the current options immediately (normally the debounced
    /// path is enough).
    pub fn save_now(&self) {
        self.save.save(&self.snapshot());
    }

    fn snapshot(&self) -> SavedShoot {
        SavedShoot {
            showroom_id: self.options.showroom.as_ref().map(|s| s.id.clone()),
            filter_id: self.options.filter.as_ref().map(|f| f.id()),
            camera_position: format_vec3(self.options.camera.position),
            camera_look_at: format_vec3(self.options.camera.look_at),
            camera_fov: self.options.camera.fov as f64,
            camera_exposure: self.options.camera.exposure.map(|e| e as f64),
            disable_sweet_fx: self.options.disable_sweet_fx,
            disable_watermark: self.options.disable_watermark,
            resize_previews: self.options.resize_previews,
        }
    }

    /// Restores saved options, or resets to defaults when nothing was
    /// saved. A preset referencing a showroom that is not installed
    /// triggers the install prompt; declining leaves the showroom unset.
    pub fn restore(
        &mut self,
        resolver: &dyn ContentResolver,
        prompter: &mut dyn Prompter,
        provider: &mut dyn ShowroomProvider,
    ) {
        let saved: Option<SavedShoot> = if self.save.has_saved_data() {
            self.save.load()
        } else {
            None
        };
        let saved = match saved {
            Some(s) => s,
            None => {
                self.options = ShootOptions::default();
                return;
            }
        };

        let defaults = ShootOptions::default();

        self.options.showroom = match &saved.showroom_id {
            Some(id) => match resolver.showroom_by_id(id) {
                Some(showroom) => Some(showroom),
                None => {
                    let mut installed = None;
                    if let Some((name, url)) = known_showroom_prompt(id) {
                        if prompter.install_showroom(name, id, url) {
                            match provider.install(id) {
                                Ok(showroom) => installed = Some(showroom),
                                Err(e) => log::warn!("cannot install showroom {id}: {e}"),
                            }
                        }
                    }
                    installed
                }
            },
            None => None,
        };

        self.options.filter = match &saved.filter_id {
            Some(id) if *id == FilterChoice::BuiltIn.id() => Some(FilterChoice::BuiltIn),
            Some(id) => resolver.filter_by_id(id).map(FilterChoice::Installed),
            None => None,
        };

        let camera = CameraParams {
            position: parse_vec3(&saved.camera_position).unwrap_or(defaults.camera.position),
            look_at: parse_vec3(&saved.camera_look_at).unwrap_or(defaults.camera.look_at),
            fov: saved.camera_fov as f32,
            // saved zero means "use showroom default"
            exposure: saved
                .camera_exposure
                .filter(|e| *e != 0.0)
                .map(|e| e as f32),
        };
        self.options.camera = if camera.is_valid() {
            camera
        } else {
            log::warn!("saved camera parameters are invalid, using defaults");
            defaults.camera
        };
        self.options.disable_sweet_fx = saved.disable_sweet_fx;
        self.options.disable_watermark = saved.disable_watermark;
        self.options.resize_previews = saved.resize_previews;
    }

    /// Builds the parameter struct handed to the shot procedure.
    pub fn shot_properties(&self, manual_mode: bool) -> Option<ShotProperties> {
        let showroom = self.options.showroom.as_ref()?;
        let filter = self.options.filter.as_ref()?;
        Some(ShotProperties {
            ac_root: self.paths.root().to_path_buf(),
            car_id: self.car.id.clone(),
            showroom_id: showroom.id.clone(),
            skin_ids: self.skin_ids.clone(),
            filter: filter.name(),
            fxaa: None,
            mode: if manual_mode {
                ShotMode::ClassicManual
            } else {
                ShotMode::Fixed
            },
            use_bmp: true,
            disable_watermark: self.options.disable_watermark,
            disable_sweet_fx: self.options.disable_sweet_fx,
            classic_camera_dx: 0.0,
            classic_camera_dy: 0.0,
            classic_camera_distance: 5.5,
            fixed_camera_position: format_vec3(self.options.camera.position),
            fixed_camera_look_at: format_vec3(self.options.camera.look_at),
            fixed_camera_fov: self.options.camera.fov as f64,
            fixed_camera_exposure: self.options.camera.exposure.unwrap_or(0.0) as f64,
        })
    }

    /// Runs one shooting pass. Returns the phase reached. Preconditions
    /// failing keep the session in Options (after asking the prompter);
    /// cancellation returns to Options without touching anything.
    pub fn start(
        &mut self,
        manual_mode: bool,
        procedure: &mut dyn ShotProcedure,
        prompter: &mut dyn Prompter,
        mut on_progress: impl FnMut(&ShootProgress),
    ) -> Phase {
        if self.options.showroom.is_none() {
            prompter.missing_option("Showroom is missing. Open options?");
            self.phase = Phase::Options;
            return self.phase;
        }
        if self.options.filter.is_none() {
            prompter.missing_option("Filter is missing. Open options?");
            self.phase = Phase::Options;
            return self.phase;
        }

        if self.options.filter == Some(FilterChoice::BuiltIn) {
            if let Err(e) = ensure_built_in_filter(&self.paths) {
                self.error_message = Some(format!("Cannot install built-in filter: {e}"));
                self.phase = Phase::Error;
                return self.phase;
            }
        }

        self.status = "Please wait…".to_string();
        self.phase = Phase::Waiting;
        self.cancellation = CancellationToken::new();

        let props = match self.shot_properties(manual_mode) {
            Some(p) => p,
            None => {
                self.phase = Phase::Options;
                return self.phase;
            }
        };

        let begin = Instant::now();
        let mut status = String::new();
        let outcome = procedure.shoot(
            &props,
            &mut |p| {
                status = format!(
                    "Now updating: {} ({}/{})",
                    p.skin_id,
                    p.skin_index + 1,
                    p.total_skins
                );
                on_progress(&p);
            },
            &self.cancellation,
        );
        self.status = status;

        match outcome {
            Ok(Some(staging_dir)) => {
                let captured = enumerate_staging(&staging_dir);
                self.result = Some(ShootResult {
                    staging_dir,
                    captured,
                    elapsed: begin.elapsed(),
                });
                self.phase = Phase::Result;
            }
            Ok(None) => {
                if self.cancellation.is_cancelled() {
                    // not an error; session simply returns to options
                    self.phase = Phase::Options;
                } else {
                    log::warn!("cannot update previews, result is null");
                    self.error_message = Some("Something went wrong.".to_string());
                    self.phase = Phase::Error;
                }
            }
            Err(e) => {
                log::warn!("cannot update previews: {e}");
                self.error_message = Some(format!("{e}."));
                self.phase = Phase::Error;
            }
        }
        self.phase
    }

    pub fn cancel(&mut self) {
        self.cancellation.cancel();
    }

    /// Copies the captured previews into the skin folders.
    pub fn commit(&mut self) -> Option<crate::commit::CommitReport> {
        let result = match (&self.phase, &self.result) {
            (Phase::Result, Some(r)) => r.clone(),
            _ => return None,
        };
        Some(crate::commit::apply_previews(
            &result.staging_dir,
            &self.car.location,
            self.options.resize_previews,
        ))
    }

    /// Leaves the staging directory alone and returns to options.
    pub fn discard(&mut self) {
        self.phase = Phase::Options;
    }
}

impl Drop for ShootSession {
    fn drop(&mut self) {
        // staging is kept for post-mortem inspection until the session
        // goes away; committed results have already been copied out
        if let Some(result) = &self.result {
            std::fs::remove_dir_all(&result.staging_dir).ok();
        }
    }
}

fn enumerate_staging(staging_dir: &Path) -> Vec<(String, PathBuf)> {
    let mut captured = Vec::new();
    if let Ok(entries) = std::fs::read_dir(staging_dir) {
        for entry in entries.flatten() {
            let path = entry.path();
            if !path.is_file() {
                continue;
            }
            if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                captured.push((stem.to_lowercase(), path.clone()));
            }
        }
    }
    captured.sort();
    captured
}
