/// Camera registry — the active camera list loaded once per run from the
/// `cameras` table, plus the per-camera last-seen content hash used for
/// duplicate-frame detection.
use anyhow::{bail, Result};

use crate::db::Database;

#[derive(Debug, Clone)]
pub struct Camera {
    pub name: String,
    pub url: String,
    pub camera_type: Option<String>,
    /// md5 hex of the most recently fetched frame. Updated on every
    /// successful fetch, changed or not.
    pub last_md5: Option<String>,
}

pub struct CameraRegistry {
    cameras: Vec<Camera>,
}

impl CameraRegistry {
    pub fn load(db: &Database, restrict_type: Option<&str>) -> Result<Self> {
        let cameras: Vec<Camera> = db
            .get_active_cameras(restrict_type)?
            .into_iter()
            .map(|row| Camera {
                name: row.name,
                url: row.url,
                camera_type: row.camera_type,
                last_md5: None,
            })
            .collect();
        if cameras.is_empty() {
            bail!("no active cameras match the given filter");
        }
        Ok(Self { cameras })
    }

    #[cfg(test)]
    pub fn from_cameras(cameras: Vec<Camera>) -> Self {
        Self { cameras }
    }

    pub fn len(&self) -> usize {
        self.cameras.len()
    }

    pub fn cameras(&self) -> &[Camera] {
        &self.cameras
    }

    /// Round-robin access: `counter % len`.
    pub fn at_counter_mut(&mut self, counter: i64) -> &mut Camera {
        let index = (counter.rem_euclid(self.cameras.len() as i64)) as usize;
        &mut self.cameras[index]
    }

    pub fn find_mut(&mut self, name: &str) -> Option<&mut Camera> {
        self.cameras.iter_mut().find(|c| c.name == name)
    }

    pub fn find(&self, name: &str) -> Option<&Camera> {
        self.cameras.iter().find(|c| c.name == name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cam(name: &str) -> Camera {
        Camera {
            name: name.to_string(),
            url: format!("http://{name}/latest.jpg"),
            camera_type: None,
            last_md5: None,
        }
    }

    #[test]
    fn counter_indexing_cycles_all_cameras() {
        let mut reg = CameraRegistry::from_cameras(vec![cam("a"), cam("b"), cam("c")]);
        // L selections visit all L cameras exactly once.
        for cycle in 0..3 {
            let mut seen = Vec::new();
            for i in 0..3 {
                seen.push(reg.at_counter_mut(cycle * 3 + i).name.clone());
            }
            seen.sort();
            assert_eq!(seen, vec!["a", "b", "c"]);
        }
    }

    #[test]
    fn single_camera_always_selected() {
        let mut reg = CameraRegistry::from_cameras(vec![cam("solo")]);
        for counter in 0..5 {
            assert_eq!(reg.at_counter_mut(counter).name, "solo");
        }
    }
}
