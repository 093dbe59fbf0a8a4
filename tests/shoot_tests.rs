use ac_previews::paths::AcPaths;
use ac_previews::shoot::{
    ensure_built_in_filter, CancellationToken, ContentResolver, FilterChoice, Phase, Prompter,
    ShootProgress, ShootSession, ShotProcedure, ShotProperties, ShowroomProvider,
    BUILT_IN_FILTER_CONTENT, BUILT_IN_FILTER_FILENAME, SAVE_KEY,
};
use ac_previews::storage::Storage;
use ac_previews::utils::{CameraParams, CarRef, PpFilterRef, ShowroomRef};
use glam::Vec3;
use std::path::PathBuf;
use std::sync::Arc;
use tempfile::TempDir;

enum Behavior {
    /// Writes one file per skin into a staging dir under this root.
    Produce(PathBuf),
    Fail(String),
    CancelEarly,
    ReturnNothing,
}

struct FakeProcedure {
    behavior: Behavior,
    seen: Vec<ShotProperties>,
}

impl FakeProcedure {
    fn new(behavior: Behavior) -> Self {
        Self {
            behavior,
            seen: Vec::new(),
        }
    }
}

impl ShotProcedure for FakeProcedure {
    fn shoot(
        &mut self,
        props: &ShotProperties,
        progress: &mut dyn FnMut(ShootProgress),
        cancellation: &CancellationToken,
    ) -> anyhow::Result<Option<PathBuf>> {
        self.seen.push(props.clone());
        match &self.behavior {
            Behavior::Produce(root) => {
                let staging = root.join("staging");
                std::fs::create_dir_all(&staging)?;
                let skins = props.skin_ids.clone().unwrap_or_default();
                for (index, skin_id) in skins.iter().enumerate() {
                    progress(ShootProgress {
                        skin_id: skin_id.clone(),
                        skin_index: index,
                        total_skins: skins.len(),
                    });
                    std::fs::write(staging.join(format!("{skin_id}.jpg")), b"jpeg")?;
                }
                Ok(Some(staging))
            }
            Behavior::Fail(message) => anyhow::bail!("{message}"),
            Behavior::CancelEarly => {
                cancellation.cancel();
                Ok(None)
            }
            Behavior::ReturnNothing => Ok(None),
        }
    }
}

#[derive(Default)]
struct MapResolver {
    showrooms: Vec<ShowroomRef>,
    filters: Vec<PpFilterRef>,
}

impl ContentResolver for MapResolver {
    fn showroom_by_id(&self, id: &str) -> Option<ShowroomRef> {
        self.showrooms.iter().find(|s| s.id == id).cloned()
    }

    fn filter_by_id(&self, id: &str) -> Option<PpFilterRef> {
        self.filters.iter().find(|f| f.id == id).cloned()
    }
}

#[derive(Default)]
struct RecordingPrompter {
    missing: Vec<String>,
    install_requests: Vec<String>,
    accept_install: bool,
}

impl Prompter for RecordingPrompter {
    fn install_showroom(&mut self, name: &str, _id: &str, _url: &str) -> bool {
        self.install_requests.push(name.to_string());
        self.accept_install
    }

    fn missing_option(&mut self, message: &str) -> bool {
        self.missing.push(message.to_string());
        false
    }
}

struct NoDownloads;

impl ShowroomProvider for NoDownloads {
    fn install(&mut self, id: &str) -> anyhow::Result<ShowroomRef> {
        anyhow::bail!("no network in tests, asked for {id}")
    }
}

fn test_session(dir: &TempDir) -> (AcPaths, ShootSession) {
    let root = dir.path().join("ac");
    let car_dir = root.join("content").join("cars").join("test_car");
    for skin in ["blue", "red"] {
        std::fs::create_dir_all(car_dir.join("skins").join(skin)).unwrap();
    }
    let paths = AcPaths::new(&root);
    let car = CarRef::new("test_car", car_dir);
    let session = ShootSession::new(
        paths.clone(),
        car,
        Some(vec!["blue".into(), "red".into()]),
        Arc::new(Storage::in_memory()),
    );
    (paths, session)
}

fn showroom(id: &str) -> ShowroomRef {
    ShowroomRef::new(id, format!("/tmp/showrooms/{id}"))
}

#[test]
fn missing_showroom_keeps_options_phase() {
    let dir = tempfile::tempdir().unwrap();
    let (_, mut session) = test_session(&dir);
    session.set_showroom(None);

    let mut procedure = FakeProcedure::new(Behavior::ReturnNothing);
    let mut prompter = RecordingPrompter::default();
    let phase = session.start(false, &mut procedure, &mut prompter, |_| {});

    assert_eq!(phase, Phase::Options);
    assert!(procedure.seen.is_empty());
    assert!(prompter.missing[0].contains("Showroom"));
}

#[test]
fn successful_run_reaches_result() {
    let dir = tempfile::tempdir().unwrap();
    let (paths, mut session) = test_session(&dir);
    session.set_showroom(Some(showroom("at_previews")));

    let mut procedure = FakeProcedure::new(Behavior::Produce(dir.path().to_path_buf()));
    let mut prompter = RecordingPrompter::default();
    let mut progressed = Vec::new();
    let phase = session.start(false, &mut procedure, &mut prompter, |p| {
        progressed.push(p.skin_id.clone());
    });

    assert_eq!(phase, Phase::Result);
    assert_eq!(progressed, ["blue", "red"]);
    assert_eq!(session.status(), "Now updating: red (2/2)");

    let result = session.result().unwrap();
    let stems: Vec<&str> = result.captured.iter().map(|(s, _)| s.as_str()).collect();
    assert_eq!(stems, ["blue", "red"]);
    assert!(result.elapsed.as_nanos() > 0);

    // shooting with the default filter installs it
    assert!(paths.pp_filter_file(BUILT_IN_FILTER_FILENAME).is_file());

    let props = &procedure.seen[0];
    assert_eq!(props.car_id, "test_car");
    assert_eq!(props.showroom_id, "at_previews");
    assert_eq!(props.filter, "AT-Previews Special");
    assert!(props.use_bmp);
    assert_eq!(props.classic_camera_distance, 5.5);
    assert_eq!(props.fxaa, None);
}

#[test]
fn procedure_error_reaches_error_phase() {
    let dir = tempfile::tempdir().unwrap();
    let (_, mut session) = test_session(&dir);
    session.set_showroom(Some(showroom("at_previews")));

    let mut procedure = FakeProcedure::new(Behavior::Fail("device lost".into()));
    let mut prompter = RecordingPrompter::default();
    let phase = session.start(false, &mut procedure, &mut prompter, |_| {});

    assert_eq!(phase, Phase::Error);
    assert!(session.error_message().unwrap().contains("device lost"));
    assert!(session.result().is_none());
}

#[test]
fn cancellation_returns_to_options_without_result() {
    let dir = tempfile::tempdir().unwrap();
    let (_, mut session) = test_session(&dir);
    session.set_showroom(Some(showroom("at_previews")));

    let mut procedure = FakeProcedure::new(Behavior::CancelEarly);
    let mut prompter = RecordingPrompter::default();
    let phase = session.start(false, &mut procedure, &mut prompter, |_| {});

    assert_eq!(phase, Phase::Options);
    assert!(session.result().is_none());
    assert!(session.error_message().is_none());
}

#[test]
fn silent_null_result_is_an_error() {
    let dir = tempfile::tempdir().unwrap();
    let (_, mut session) = test_session(&dir);
    session.set_showroom(Some(showroom("at_previews")));

    let mut procedure = FakeProcedure::new(Behavior::ReturnNothing);
    let mut prompter = RecordingPrompter::default();
    let phase = session.start(false, &mut procedure, &mut prompter, |_| {});

    assert_eq!(phase, Phase::Error);
    assert_eq!(session.error_message(), Some("Something went wrong."));
}

#[test]
fn built_in_filter_install_skips_matching_length() {
    let dir = tempfile::tempdir().unwrap();
    let paths = AcPaths::new(dir.path());

    let installed = ensure_built_in_filter(&paths).unwrap();
    assert_eq!(std::fs::read(&installed).unwrap(), BUILT_IN_FILTER_CONTENT);

    // user-edited file of the same byte length stays untouched
    let edited = vec![b'x'; BUILT_IN_FILTER_CONTENT.len()];
    std::fs::write(&installed, &edited).unwrap();
    ensure_built_in_filter(&paths).unwrap();
    assert_eq!(std::fs::read(&installed).unwrap(), edited);

    // a truncated file is repaired
    std::fs::write(&installed, b"broken").unwrap();
    ensure_built_in_filter(&paths).unwrap();
    assert_eq!(std::fs::read(&installed).unwrap(), BUILT_IN_FILTER_CONTENT);
}

#[test]
fn options_round_trip_through_storage() {
    let dir = tempfile::tempdir().unwrap();
    let storage = Arc::new(Storage::in_memory());

    let root = dir.path().join("ac");
    let car_dir = root.join("content").join("cars").join("test_car");
    std::fs::create_dir_all(&car_dir).unwrap();
    let paths = AcPaths::new(&root);
    let car = CarRef::new("test_car", &car_dir);

    let camera = CameraParams {
        position: Vec3::new(1.0, 2.0, 3.0),
        look_at: Vec3::new(0.0, 0.5, 0.0),
        fov: 42.0,
        exposure: Some(90.0),
    };

    {
        let mut session =
            ShootSession::new(paths.clone(), car.clone(), None, Arc::clone(&storage));
        session.set_showroom(Some(showroom("at_studio_black")));
        session.set_filter(Some(FilterChoice::BuiltIn));
        session.set_camera(camera);
        session.set_disable_sweet_fx(false);
        session.set_resize_previews(false);
        session.save_now();
    }

    let mut restored = ShootSession::new(paths, car, None, storage);
    let resolver = MapResolver {
        showrooms: vec![showroom("at_studio_black")],
        filters: vec![],
    };
    let mut prompter = RecordingPrompter::default();
    restored.restore(&resolver, &mut prompter, &mut NoDownloads);

    assert_eq!(
        restored.options.showroom.as_ref().map(|s| s.id.as_str()),
        Some("at_studio_black")
    );
    assert_eq!(restored.options.filter, Some(FilterChoice::BuiltIn));
    assert_eq!(restored.options.camera, camera);
    assert!(!restored.options.disable_sweet_fx);
    assert!(!restored.options.resize_previews);
    assert!(restored.options.disable_watermark);
}

#[test]
fn zero_exposure_restores_as_unset() {
    let dir = tempfile::tempdir().unwrap();
    let storage = Arc::new(Storage::in_memory());
    storage.set(
        SAVE_KEY,
        r#"{"ShowroomId":null,"FilterId":null,"CameraPosition":"1, 2, 3","CameraLookAt":"0, 0, 0","CameraFov":25.0,"CameraExposure":0.0,"DisableSweetFx":true,"DisableWatermark":true,"ResizePreviews":true}"#,
    );

    let root = dir.path().join("ac");
    let car_dir = root.join("content").join("cars").join("test_car");
    std::fs::create_dir_all(&car_dir).unwrap();
    let mut session = ShootSession::new(
        AcPaths::new(&root),
        CarRef::new("test_car", car_dir),
        None,
        storage,
    );
    let mut prompter = RecordingPrompter::default();
    session.restore(&MapResolver::default(), &mut prompter, &mut NoDownloads);

    assert_eq!(session.options.camera.exposure, None);
    assert_eq!(session.options.camera.fov, 25.0);
}

#[test]
fn restore_prompts_for_known_missing_showroom() {
    let dir = tempfile::tempdir().unwrap();
    let storage = Arc::new(Storage::in_memory());
    storage.set(
        SAVE_KEY,
        r#"{"ShowroomId":"at_studio_black","FilterId":null,"CameraPosition":"1, 2, 3","CameraLookAt":"0, 0, 0","CameraFov":30.0,"CameraExposure":null,"DisableSweetFx":true,"DisableWatermark":true,"ResizePreviews":true}"#,
    );

    let root = dir.path().join("ac");
    let car_dir = root.join("content").join("cars").join("test_car");
    std::fs::create_dir_all(&car_dir).unwrap();
    let mut session = ShootSession::new(
        AcPaths::new(&root),
        CarRef::new("test_car", car_dir),
        None,
        storage,
    );

    // declining the install leaves the showroom unset
    let mut prompter = RecordingPrompter::default();
    session.restore(&MapResolver::default(), &mut prompter, &mut NoDownloads);

    assert_eq!(prompter.install_requests.len(), 1);
    assert!(prompter.install_requests[0].contains("Studio Black"));
    assert!(session.options.showroom.is_none());
}

#[test]
fn invalid_camera_parameters_are_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let (_, mut session) = test_session(&dir);
    let before = session.options.camera;

    session.set_camera(CameraParams {
        fov: 0.0,
        ..CameraParams::default()
    });
    assert_eq!(session.options.camera, before);

    session.set_camera(CameraParams {
        fov: f32::NAN,
        ..CameraParams::default()
    });
    assert_eq!(session.options.camera, before);

    session.set_camera(CameraParams {
        exposure: Some(-1.0),
        ..CameraParams::default()
    });
    assert_eq!(session.options.camera, before);
}

#[test]
fn invalid_saved_camera_restores_defaults() {
    let dir = tempfile::tempdir().unwrap();
    let storage = Arc::new(Storage::in_memory());
    storage.set(
        SAVE_KEY,
        r#"{"ShowroomId":null,"FilterId":null,"CameraPosition":"1, 2, 3","CameraLookAt":"0, 0, 0","CameraFov":-10.0,"CameraExposure":null,"DisableSweetFx":true,"DisableWatermark":true,"ResizePreviews":true}"#,
    );

    let root = dir.path().join("ac");
    let car_dir = root.join("content").join("cars").join("test_car");
    std::fs::create_dir_all(&car_dir).unwrap();
    let mut session = ShootSession::new(
        AcPaths::new(&root),
        CarRef::new("test_car", car_dir),
        None,
        storage,
    );
    let mut prompter = RecordingPrompter::default();
    session.restore(&MapResolver::default(), &mut prompter, &mut NoDownloads);

    assert_eq!(session.options.camera, CameraParams::default());
}

#[test]
fn defaults_when_nothing_saved() {
    let dir = tempfile::tempdir().unwrap();
    let (_, mut session) = test_session(&dir);
    let mut prompter = RecordingPrompter::default();
    session.restore(&MapResolver::default(), &mut prompter, &mut NoDownloads);

    assert!(session.options.showroom.is_none());
    assert_eq!(session.options.filter, Some(FilterChoice::BuiltIn));
    assert_eq!(session.options.camera, CameraParams::default());
    assert!(session.options.disable_sweet_fx);
    assert!(session.options.disable_watermark);
    assert!(session.options.resize_previews);
}
