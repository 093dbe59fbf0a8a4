use ac_previews::embedded::{camera_from_props, StagingDir};
use ac_previews::shoot::{ShotMode, ShotProperties};
use glam::Vec3;

fn props(mode: ShotMode) -> ShotProperties {
    ShotProperties {
        ac_root: "/tmp/ac".into(),
        car_id: "test_car".into(),
        showroom_id: "at_previews".into(),
        skin_ids: None,
        filter: "AT-Previews Special".into(),
        fxaa: None,
        mode,
        use_bmp: true,
        disable_watermark: true,
        disable_sweet_fx: true,
        classic_camera_dx: 0.0,
        classic_camera_dy: 0.0,
        classic_camera_distance: 5.5,
        fixed_camera_position: "1, 2, 3".into(),
        fixed_camera_look_at: "0, 0.7, 0.5".into(),
        fixed_camera_fov: 30.0,
        fixed_camera_exposure: 94.5,
    }
}

#[test]
fn fixed_mode_uses_the_preset_camera() {
    let camera = camera_from_props(&props(ShotMode::Fixed));
    assert_eq!(camera.position, Vec3::new(1.0, 2.0, 3.0));
    assert_eq!(camera.look_at, Vec3::new(0.0, 0.7, 0.5));
    assert_eq!(camera.fov, 30.0);
    assert_eq!(camera.exposure, Some(94.5));
}

#[test]
fn classic_manual_orbits_at_distance() {
    let camera = camera_from_props(&props(ShotMode::ClassicManual));
    // dx = dy = 0 puts the eye straight behind the target
    assert!((camera.position - Vec3::new(0.0, 0.7, 5.5)).length() < 1e-5);
    assert_eq!(camera.look_at, Vec3::new(0.0, 0.7, 0.0));

    let mut raised = props(ShotMode::ClassicManual);
    raised.classic_camera_dy = 90.0;
    let camera = camera_from_props(&raised);
    assert!((camera.position - Vec3::new(0.0, 0.7 + 5.5, 0.0)).length() < 1e-4);

    let mut side = props(ShotMode::ClassicManual);
    side.classic_camera_dx = 90.0;
    let camera = camera_from_props(&side);
    assert!((camera.position - Vec3::new(5.5, 0.7, 0.0)).length() < 1e-4);
}

#[test]
fn zero_exposure_means_showroom_default() {
    let mut p = props(ShotMode::Fixed);
    p.fixed_camera_exposure = 0.0;
    assert_eq!(camera_from_props(&p).exposure, None);
}

#[test]
fn dropped_staging_directory_is_removed() {
    let staging = StagingDir::create().unwrap();
    let path = staging.path().to_path_buf();
    std::fs::write(path.join("red.jpg"), b"jpeg").unwrap();

    // cancellation and errors drop the guard without keeping it
    drop(staging);
    assert!(!path.exists());
}

#[test]
fn kept_staging_directory_survives() {
    let staging = StagingDir::create().unwrap();
    let path = staging.keep();
    assert!(path.is_dir());
    std::fs::remove_dir_all(path).unwrap();
}
