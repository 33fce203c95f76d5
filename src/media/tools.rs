//! Adapters that delegate analysis, merging and packaging to external
//! command-line tools.

use std::path::{Path, PathBuf};
use std::process::{Command, Output};

use super::{MediaError, Merger, OnsetDetector, Packer};
use crate::storage::base_name;

fn run(mut cmd: Command) -> Result<Output, String> {
    let program = cmd.get_program().to_string_lossy().into_owned();
    let output = cmd
        .output()
        .map_err(|e| format!("could not run {program}: {e}"))?;
    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(format!("{program} exited with {}: {}", output.status, stderr.trim()));
    }
    Ok(output)
}

/// Onset detection via `aubioonset`-style tools: `<program> -i <file> -t <threshold>`
/// printing one timestamp (seconds) per line.
#[derive(Debug, Clone)]
pub struct CommandOnsetDetector {
    program: String,
}

impl CommandOnsetDetector {
    pub fn new(program: &str) -> Self {
        Self {
            program: program.to_string(),
        }
    }
}

/// Sensitivity arrives as a 0..=100 dial; the tool wants a 0.0..=1.0 threshold
/// where lower means more onsets.
fn threshold_for(sensitivity: i64) -> f64 {
    1.0 - (sensitivity.clamp(0, 100) as f64 / 100.0)
}

fn parse_onsets(stdout: &str) -> Result<Vec<f64>, MediaError> {
    stdout
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(|line| {
            line.parse::<f64>()
                .map_err(|_| MediaError::Analysis(format!("unexpected output line {line:?}")))
        })
        .collect()
}

impl OnsetDetector for CommandOnsetDetector {
    fn detect(&self, path: &Path, sensitivity: i64) -> Result<Vec<f64>, MediaError> {
        let mut cmd = Command::new(&self.program);
        cmd.arg("-i")
            .arg(path)
            .arg("-t")
            .arg(format!("{:.2}", threshold_for(sensitivity)));
        let output = run(cmd).map_err(MediaError::Analysis)?;
        parse_onsets(&String::from_utf8_lossy(&output.stdout))
    }
}

/// Concatenation via `sox in1 in2 ... out`.
#[derive(Debug, Clone)]
pub struct CommandMerger {
    program: String,
}

impl CommandMerger {
    pub fn new(program: &str) -> Self {
        Self {
            program: program.to_string(),
        }
    }
}

impl Merger for CommandMerger {
    fn merge(&self, inputs: &[PathBuf], output: &Path) -> Result<(), MediaError> {
        if inputs.is_empty() {
            return Err(MediaError::Merge("nothing to merge".into()));
        }
        if let Some(missing) = inputs.iter().find(|p| !p.is_file()) {
            return Err(MediaError::NotFound(missing.clone()));
        }
        let mut cmd = Command::new(&self.program);
        cmd.args(inputs).arg(output);
        run(cmd).map_err(MediaError::Merge)?;
        Ok(())
    }
}

/// Workspace archiving via `zip -r -q <archive> <entries...>`.
#[derive(Debug, Clone)]
pub struct CommandPacker {
    program: String,
}

impl CommandPacker {
    pub fn new(program: &str) -> Self {
        Self {
            program: program.to_string(),
        }
    }
}

/// Entries named by a download selection.
///
/// Accepts a JSON array of names or an object with a `files` array. An empty
/// body, `null`, or an empty list selects the whole workspace (returned as an
/// empty vec).
pub fn selected_entries(selection: &[u8]) -> Result<Vec<String>, MediaError> {
    if selection.iter().all(u8::is_ascii_whitespace) {
        return Ok(Vec::new());
    }
    let value: serde_json::Value = serde_json::from_slice(selection)
        .map_err(|e| MediaError::InvalidRequest(format!("selection is not JSON: {e}")))?;
    let names = match &value {
        serde_json::Value::Null => return Ok(Vec::new()),
        serde_json::Value::Array(items) => items,
        serde_json::Value::Object(map) => match map.get("files") {
            Some(serde_json::Value::Array(items)) => items,
            None | Some(serde_json::Value::Null) => return Ok(Vec::new()),
            Some(_) => {
                return Err(MediaError::InvalidRequest("selection `files` must be a list".into()))
            }
        },
        _ => return Err(MediaError::InvalidRequest("unsupported selection shape".into())),
    };
    names
        .iter()
        .map(|item| {
            let name = item
                .as_str()
                .ok_or_else(|| MediaError::InvalidRequest("selection entries must be strings".into()))?;
            base_name(name).map_err(|e| MediaError::InvalidRequest(e.to_string()))
        })
        .collect()
}

/// Fresh archive path for one download of `workspace`.
fn archive_path(out_dir: &Path, workspace: &str) -> PathBuf {
    out_dir.join(format!("{workspace}-{}.zip", uuid::Uuid::new_v4()))
}

impl Packer for CommandPacker {
    fn pack(&self, dir: &Path, selection: &[u8], out_dir: &Path) -> Result<PathBuf, MediaError> {
        if !dir.is_dir() {
            return Err(MediaError::NotFound(dir.to_path_buf()));
        }
        let entries = selected_entries(selection)?;
        if let Some(missing) = entries.iter().find(|e| !dir.join(e).exists()) {
            return Err(MediaError::NotFound(dir.join(missing)));
        }

        std::fs::create_dir_all(out_dir)?;
        let out_dir = std::fs::canonicalize(out_dir)?;
        let workspace = dir
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "workspace".into());
        let archive = archive_path(&out_dir, &workspace);

        let mut cmd = Command::new(&self.program);
        cmd.current_dir(dir).arg("-r").arg("-q").arg(&archive);
        if entries.is_empty() {
            cmd.arg(".");
        } else {
            cmd.args(&entries);
        }
        run(cmd).map_err(MediaError::Pack)?;
        Ok(archive)
    }
}
