use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use ac_previews::shoot::{ContentResolver, FilterChoice, Prompter, ShowroomProvider};
use ac_previews::utils::{CarRef, PpFilterRef, ShowroomRef};
use ac_previews::{AcPaths, CarModel, EmbeddedShot, Phase, ShootSession, Storage};

const USAGE: &str = "\
usage: shoot_previews [options] <ac-root> <car-id> <model.json>

options:
    --skin <id>         shoot only this skin (repeatable)
    --showroom <id>     showroom id (default: at_previews)
    --filter <stem>     installed filter stem; omit for the built-in one
    --width <px>        capture width (default: 1022)
    --height <px>       capture height (default: 575)
    --no-resize         publish captures without downscaling
    --manual            use the classic orbit camera instead of the preset
    --data <file>       settings file (default: ac_previews.data)
    --restart           relaunch with the remaining arguments and exit
";

struct Args {
    ac_root: PathBuf,
    car_id: String,
    model: PathBuf,
    skins: Vec<String>,
    showroom: String,
    filter: Option<String>,
    width: u32,
    height: u32,
    resize: bool,
    manual: bool,
    data: PathBuf,
}

fn parse_args() -> anyhow::Result<Args> {
    let mut positional = Vec::new();
    let mut skins = Vec::new();
    let mut showroom = "at_previews".to_string();
    let mut filter = None;
    let mut width = 1022;
    let mut height = 575;
    let mut resize = true;
    let mut manual = false;
    let mut data = PathBuf::from("ac_previews.data");

    let mut args = std::env::args().skip(1);
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--skin" => skins.push(required(&mut args, "--skin")?),
            "--showroom" => showroom = required(&mut args, "--showroom")?,
            "--filter" => filter = Some(required(&mut args, "--filter")?),
            "--width" => width = required(&mut args, "--width")?.parse()?,
            "--height" => height = required(&mut args, "--height")?.parse()?,
            "--no-resize" => resize = false,
            "--manual" => manual = true,
            "--data" => data = required(&mut args, "--data")?.into(),
            "--restart" => {
                restart(args.collect())?;
                std::process::exit(0);
            }
            "--help" | "-h" => {
                print!("{USAGE}");
                std::process::exit(0);
            }
            other if other.starts_with('-') => {
                anyhow::bail!("unknown option {other}");
            }
            other => positional.push(other.to_string()),
        }
    }

    if positional.len() != 3 {
        anyhow::bail!("expected <ac-root> <car-id> <model.json>");
    }
    let mut positional = positional.into_iter();
    Ok(Args {
        ac_root: positional.next().unwrap_or_default().into(),
        car_id: positional.next().unwrap_or_default(),
        model: positional.next().unwrap_or_default().into(),
        skins,
        showroom,
        filter,
        width,
        height,
        resize,
        manual,
        data,
    })
}

fn required(args: &mut impl Iterator<Item = String>, flag: &str) -> anyhow::Result<String> {
    args.next()
        .ok_or_else(|| anyhow::anyhow!("{flag} needs a value"))
}

/// Relaunches this executable with the given arguments and returns once
/// the child has been spawned.
fn restart(forwarded: Vec<String>) -> anyhow::Result<()> {
    let exe = std::env::current_exe()?;
    std::process::Command::new(exe).args(forwarded).spawn()?;
    Ok(())
}

/// Resolves showrooms and filters straight off the installation tree.
struct FsResolver {
    paths: AcPaths,
}

impl ContentResolver for FsResolver {
    fn showroom_by_id(&self, id: &str) -> Option<ShowroomRef> {
        let location = self.paths.showroom_dir(id);
        location.is_dir().then(|| ShowroomRef {
            id: id.to_string(),
            location,
        })
    }

    fn filter_by_id(&self, id: &str) -> Option<PpFilterRef> {
        let location = self.paths.pp_filter_file(&format!("{id}.ini"));
        location
            .is_file()
            .then(|| PpFilterRef::new(id, location.clone()))
    }
}

/// Headless host: declines every prompt.
struct SilentPrompter;

impl Prompter for SilentPrompter {
    fn install_showroom(&mut self, name: &str, _id: &str, url: &str) -> bool {
        log::warn!("showroom \"{name}\" is not installed, get it at {url}");
        false
    }

    fn missing_option(&mut self, message: &str) -> bool {
        log::warn!("{message}");
        false
    }
}

struct NoDownloads;

impl ShowroomProvider for NoDownloads {
    fn install(&mut self, _id: &str) -> anyhow::Result<ShowroomRef> {
        anyhow::bail!("downloads are not available in headless mode")
    }
}

fn run(args: Args) -> anyhow::Result<()> {
    let paths = AcPaths::new(&args.ac_root);
    let car = CarRef::new(&args.car_id, paths.car_dir(&args.car_id));
    anyhow::ensure!(
        car.location.is_dir(),
        "car {} not found under {}",
        args.car_id,
        paths.cars_dir().display()
    );

    let model: CarModel = serde_json::from_reader(std::io::BufReader::new(
        std::fs::File::open(&args.model)?,
    ))?;
    let textures_dir = car.location.join("texture");
    let mut procedure = EmbeddedShot::new(args.width, args.height, &model, &textures_dir)?;

    let storage = Arc::new(Storage::new(Some(args.data.clone()), false));
    let resolver = FsResolver {
        paths: paths.clone(),
    };
    let skins = (!args.skins.is_empty()).then(|| args.skins.clone());
    let mut session = ShootSession::new(paths, car, skins, storage);
    let mut prompter = SilentPrompter;
    session.restore(&resolver, &mut prompter, &mut NoDownloads);

    session.set_showroom(resolver.showroom_by_id(&args.showroom));
    session.set_filter(Some(match &args.filter {
        Some(stem) => match resolver.filter_by_id(stem) {
            Some(filter) => FilterChoice::Installed(filter),
            None => anyhow::bail!("filter {stem} is not installed"),
        },
        None => FilterChoice::BuiltIn,
    }));
    session.set_resize_previews(args.resize);

    let phase = session.start(args.manual, &mut procedure, &mut prompter, |progress| {
        log::info!(
            "updating {} ({}/{})",
            progress.skin_id,
            progress.skin_index + 1,
            progress.total_skins
        );
    });

    match phase {
        Phase::Result => {
            let result = session
                .result()
                .ok_or_else(|| anyhow::anyhow!("no result after shooting"))?;
            log::info!(
                "{} previews captured in {:.1?}",
                result.captured.len(),
                result.elapsed
            );
            let report = session
                .commit()
                .ok_or_else(|| anyhow::anyhow!("commit failed"))?;
            for (skin_id, reason) in &report.failed {
                log::warn!("{skin_id}: {reason}");
            }
            log::info!("{} previews applied", report.applied.len());
            session.save_now();
            Ok(())
        }
        Phase::Error => {
            anyhow::bail!(
                "{}",
                session.error_message().unwrap_or("unknown error")
            )
        }
        _ => anyhow::bail!("shooting did not produce a result"),
    }
}

fn main() -> ExitCode {
    env_logger::init();
    let args = match parse_args() {
        Ok(args) => args,
        Err(e) => {
            eprintln!("error: {e}");
            eprint!("{USAGE}");
            return ExitCode::FAILURE;
        }
    };
    match run(args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            log::error!("{e}");
            ExitCode::FAILURE
        }
    }
}
