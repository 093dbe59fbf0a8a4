use std::path::{Path, PathBuf};

/// Filesystem layout under the simulator's installation root.
#[derive(Debug, Clone)]
pub struct AcPaths {
    root: PathBuf,
}

impl AcPaths {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn cars_dir(&self) -> PathBuf {
        self.root.join("content").join("cars")
    }

    pub fn car_dir(&self, car_id: &str) -> PathBuf {
        self.cars_dir().join(car_id)
    }

    pub fn car_skins_dir(&self, car_id: &str) -> PathBuf {
        self.car_dir(car_id).join("skins")
    }

    pub fn car_skin_dir(&self, car_id: &str, skin_id: &str) -> PathBuf {
        self.car_skins_dir(car_id).join(skin_id)
    }

    pub fn showrooms_dir(&self) -> PathBuf {
        self.root.join("content").join("showroom")
    }

    pub fn showroom_dir(&self, showroom_id: &str) -> PathBuf {
        self.showrooms_dir().join(showroom_id)
    }

    pub fn system_cfg_dir(&self) -> PathBuf {
        self.root.join("system").join("cfg")
    }

    pub fn pp_filters_dir(&self) -> PathBuf {
        self.system_cfg_dir().join("ppfilters")
    }

    pub fn pp_filter_file(&self, filename: &str) -> PathBuf {
        self.pp_filters_dir().join(filename)
    }

    pub fn launcher_exe(&self) -> PathBuf {
        self.root.join("AssettoCorsa.exe")
    }
}

/// Layout under the user's documents directory.
#[derive(Debug, Clone)]
pub struct DocumentsPaths {
    base: PathBuf,
}

impl DocumentsPaths {
    pub fn new(base: impl Into<PathBuf>) -> Self {
        Self { base: base.into() }
    }

    pub fn cfg_dir(&self) -> PathBuf {
        self.base.join("cfg")
    }

    pub fn showroom_start_ini(&self) -> PathBuf {
        self.cfg_dir().join("showroom_start.ini")
    }

    pub fn video_ini(&self) -> PathBuf {
        self.cfg_dir().join("video.ini")
    }

    pub fn race_ini(&self) -> PathBuf {
        self.cfg_dir().join("race.ini")
    }

    pub fn assists_ini(&self) -> PathBuf {
        self.cfg_dir().join("assists.ini")
    }

    pub fn race_out_json(&self) -> PathBuf {
        self.base.join("out").join("race_out.json")
    }

    pub fn log_file(&self) -> PathBuf {
        self.base.join("logs").join("log.txt")
    }

    pub fn screens_dir(&self) -> PathBuf {
        self.base.join("screens")
    }

    pub fn replays_dir(&self) -> PathBuf {
        self.base.join("replay")
    }
}
