use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use super::{MediaError, MediaHandle, MediaStore};

/// Media store that keeps each asset's descriptor as JSON beside it
/// (`<asset>.json`). The asset itself doubles as the decoded audio.
#[derive(Debug, Clone, Copy, Default)]
pub struct SidecarMediaStore;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Descriptor {
    pub filename: String,
    pub path_to_file: String,
    pub size: u64,
    pub slice_start: Vec<f64>,
    pub slice_stop: Vec<f64>,
    pub slice_type: Vec<i64>,
    pub oneshot: bool,
    pub tempo_match: bool,
    pub splice_playback: i64,
}

pub struct SidecarHandle {
    asset: PathBuf,
    sidecar: PathBuf,
    descriptor: Descriptor,
}

fn sidecar_path(asset: &Path) -> PathBuf {
    let mut name = asset.as_os_str().to_owned();
    name.push(".json");
    PathBuf::from(name)
}

impl MediaStore for SidecarMediaStore {
    fn get(&self, path: &Path) -> Result<Box<dyn MediaHandle>, MediaError> {
        let metadata = match std::fs::metadata(path) {
            Ok(m) if m.is_file() => m,
            Ok(_) => return Err(MediaError::NotFound(path.to_path_buf())),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(MediaError::NotFound(path.to_path_buf()))
            }
            Err(e) => return Err(e.into()),
        };

        let sidecar = sidecar_path(path);
        let descriptor = match std::fs::read(&sidecar) {
            Ok(bytes) => serde_json::from_slice(&bytes).map_err(|e| MediaError::Decode {
                path: sidecar.clone(),
                reason: e.to_string(),
            })?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Descriptor {
                filename: path
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_default(),
                path_to_file: path.display().to_string(),
                size: metadata.len(),
                ..Default::default()
            },
            Err(e) => return Err(e.into()),
        };

        let handle = SidecarHandle {
            asset: path.to_path_buf(),
            sidecar,
            descriptor,
        };
        handle.save()?;
        Ok(Box::new(handle))
    }
}

impl SidecarHandle {
    fn save(&self) -> Result<(), MediaError> {
        let json = serde_json::to_vec_pretty(&self.descriptor).map_err(|e| MediaError::Decode {
            path: self.sidecar.clone(),
            reason: e.to_string(),
        })?;
        let tmp = self.sidecar.with_extension("json.tmp");
        std::fs::write(&tmp, json)?;
        std::fs::rename(&tmp, &self.sidecar)?;
        Ok(())
    }
}

impl MediaHandle for SidecarHandle {
    fn descriptor(&self) -> Result<serde_json::Value, MediaError> {
        serde_json::to_value(&self.descriptor).map_err(|e| MediaError::Encode {
            path: self.sidecar.clone(),
            reason: e.to_string(),
        })
    }

    fn decoded_path(&self) -> PathBuf {
        self.asset.clone()
    }

    /// The sidecar store does not classify slices; every slice gets type 0.
    fn set_slices(&mut self, starts: &[f64], stops: &[f64]) -> Result<Vec<i64>, MediaError> {
        if starts.len() != stops.len() {
            return Err(MediaError::InvalidRequest(format!(
                "{} slice starts but {} slice stops",
                starts.len(),
                stops.len()
            )));
        }
        if let Some((start, stop)) = starts.iter().zip(stops).find(|(start, stop)| start > stop) {
            return Err(MediaError::InvalidRequest(format!(
                "slice starts at {start} after it stops at {stop}"
            )));
        }
        self.descriptor.slice_start = starts.to_vec();
        self.descriptor.slice_stop = stops.to_vec();
        self.descriptor.slice_type = vec![0; starts.len()];
        self.save()?;
        Ok(self.descriptor.slice_type.clone())
    }

    fn set_oneshot(&mut self, enabled: bool) -> Result<(), MediaError> {
        self.descriptor.oneshot = enabled;
        self.save()
    }

    fn set_tempo_match(&mut self, enabled: bool) -> Result<(), MediaError> {
        self.descriptor.tempo_match = enabled;
        self.save()
    }

    fn set_splice_playback(&mut self, mode: i64) -> Result<(), MediaError> {
        self.descriptor.splice_playback = mode;
        self.save()
    }
}
