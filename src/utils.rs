use glam::Vec3;
use std::path::{Path, PathBuf};

/// Parses a comma-separated vector string like "-3.867643, 1.423590, 4.70381".
pub fn parse_vec3(s: &str) -> Option<Vec3> {
    let mut parts = s.split(',').map(|p| p.trim().parse::<f32>());
    let x = parts.next()?.ok()?;
    let y = parts.next()?.ok()?;
    let z = parts.next()?.ok()?;
    if parts.next().is_some() {
        return None;
    }
    Some(Vec3::new(x, y, z))
}

pub fn format_vec3(v: Vec3) -> String {
    format!("{}, {}, {}", v.x, v.y, v.z)
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CameraParams {
    pub position: Vec3,
    pub look_at: Vec3,
    /// Vertical field of view in degrees.
    pub fov: f32,
    /// None means "use showroom default".
    pub exposure: Option<f32>,
}

impl CameraParams {
    pub fn is_valid(&self) -> bool {
        self.fov.is_finite()
            && self.fov > 0.0
            && self.exposure.map_or(true, |e| e.is_finite() && e >= 0.0)
    }
}

impl Default for CameraParams {
    fn default() -> Self {
        Self {
            position: Vec3::new(-3.867_643, 1.423_59, 4.703_81),
            look_at: Vec3::new(0.0, 0.7, 0.5),
            fov: 30.0,
            exposure: Some(94.5),
        }
    }
}

/// ARGB color as stored by the preset store (packed little-endian i32).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Color {
    pub a: u8,
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

impl Color {
    pub fn pack(&self) -> i32 {
        i32::from_le_bytes([self.a, self.r, self.g, self.b])
    }

    pub fn unpack(value: i32) -> Self {
        let [a, r, g, b] = value.to_le_bytes();
        Self { a, r, g, b }
    }
}

/// Read-only reference to a car in the content tree.
#[derive(Debug, Clone)]
pub struct CarRef {
    pub id: String,
    pub location: PathBuf,
    pub selected_skin_id: Option<String>,
}

impl CarRef {
    pub fn new(id: impl Into<String>, location: impl Into<PathBuf>) -> Self {
        Self {
            id: id.into(),
            location: location.into(),
            selected_skin_id: None,
        }
    }

    pub fn skins_dir(&self) -> PathBuf {
        self.location.join("skins")
    }

    /// Enumerates skin folders on disk, sorted by id.
    pub fn list_skins(&self) -> Vec<SkinRef> {
        let mut skins = Vec::new();
        if let Ok(entries) = std::fs::read_dir(self.skins_dir()) {
            for entry in entries.flatten() {
                let path = entry.path();
                if !path.is_dir() {
                    continue;
                }
                if let Some(id) = path.file_name().and_then(|n| n.to_str()) {
                    skins.push(SkinRef {
                        id: id.to_string(),
                        location: path.clone(),
                    });
                }
            }
        }
        skins.sort_by(|a, b| a.id.cmp(&b.id));
        skins
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SkinRef {
    pub id: String,
    pub location: PathBuf,
}

impl SkinRef {
    pub fn preview_path(&self) -> PathBuf {
        self.location.join("preview.jpg")
    }

    pub fn livery_path(&self) -> PathBuf {
        self.location.join("livery.png")
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShowroomRef {
    pub id: String,
    pub location: PathBuf,
}

impl ShowroomRef {
    pub fn new(id: impl Into<String>, location: impl Into<PathBuf>) -> Self {
        Self {
            id: id.into(),
            location: location.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PpFilterRef {
    pub id: String,
    pub location: PathBuf,
}

impl PpFilterRef {
    pub fn new(id: impl Into<String>, location: impl Into<PathBuf>) -> Self {
        Self {
            id: id.into(),
            location: location.into(),
        }
    }

    /// Filter name passed to the shot procedure: the filename stem.
    pub fn name(&self) -> String {
        Path::new(&self.location)
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or(&self.id)
            .to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vec3_round_trip() {
        let v = parse_vec3("-3.867643, 1.423590, 4.70381").unwrap();
        assert!((v.x + 3.867643).abs() < 1e-5);
        let back = parse_vec3(&format_vec3(v)).unwrap();
        assert_eq!(v, back);
    }

    #[test]
    fn vec3_rejects_garbage() {
        assert!(parse_vec3("1, 2").is_none());
        assert!(parse_vec3("1, 2, 3, 4").is_none());
        assert!(parse_vec3("a, b, c").is_none());
    }

    #[test]
    fn color_pack_unpack() {
        let c = Color {
            a: 0xff,
            r: 0x12,
            g: 0x34,
            b: 0x56,
        };
        assert_eq!(Color::unpack(c.pack()), c);
    }
}
