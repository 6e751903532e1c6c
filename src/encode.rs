//! Video encoding through the system `ffmpeg`

use crate::{Error, Result};
use async_trait::async_trait;
use log::debug;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::Stdio;

/// Inputs of one encoder run
#[derive(Debug, Clone)]
pub struct EncodeJob {
    /// Concat manifest listing the frames and their durations
    pub manifest_path: PathBuf,
    /// Where the encoded video is written
    pub output_path: PathBuf,
    /// Output frame rate
    pub fps: u32,
}

/// Turns a frame timing manifest into one video file.
///
/// Implementations must only return `Ok` once `job.output_path` is complete.
#[async_trait]
pub trait VideoEncoder: Send + Sync {
    async fn encode(&self, job: &EncodeJob) -> Result<()>;
}

/// Encoder that spawns `ffmpeg` with the concat demuxer, H.264 (`ultrafast`
/// preset) and `yuv420p` output.
#[derive(Debug, Clone)]
pub struct FfmpegEncoder {
    program: PathBuf,
}

impl FfmpegEncoder {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
        }
    }

    pub fn program(&self) -> &Path {
        &self.program
    }
}

impl Default for FfmpegEncoder {
    fn default() -> Self {
        Self::new("ffmpeg")
    }
}

/// Command-line arguments for encoding `job`.
pub fn ffmpeg_args(job: &EncodeJob) -> Vec<OsString> {
    let mut args: Vec<OsString> = ["-y", "-loglevel", "error", "-f", "concat", "-safe", "0", "-i"]
        .iter()
        .map(OsString::from)
        .collect();
    args.push(job.manifest_path.clone().into_os_string());
    args.push("-vf".into());
    args.push(format!("fps={}", job.fps).into());
    // h264 + yuv420p for broad compatibility
    for arg in [
        "-c:v",
        "libx264",
        "-preset",
        "ultrafast",
        "-pix_fmt",
        "yuv420p",
        "-movflags",
        "+faststart",
    ] {
        args.push(arg.into());
    }
    args.push(job.output_path.clone().into_os_string());
    args
}

#[async_trait]
impl VideoEncoder for FfmpegEncoder {
    async fn encode(&self, job: &EncodeJob) -> Result<()> {
        debug!(
            "Encoding {} -> {}",
            job.manifest_path.display(),
            job.output_path.display()
        );

        // kill_on_drop: a caller timing out drops this future and takes the
        // child process down with it.
        let output = tokio::process::Command::new(&self.program)
            .args(ffmpeg_args(job))
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| {
                Error::EncodeFailed(format!(
                    "failed to spawn {} (is it installed and on PATH?): {}",
                    self.program.display(),
                    e
                ))
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(Error::EncodeFailed(format!(
                "ffmpeg exited with status {}: {}",
                output.status,
                stderr.trim()
            )));
        }

        match tokio::fs::metadata(&job.output_path).await {
            Ok(meta) if meta.len() > 0 => Ok(()),
            _ => Err(Error::EncodeFailed(format!(
                "ffmpeg produced no output at {}",
                job.output_path.display()
            ))),
        }
    }
}

/// Return `true` when `program` can be invoked.
pub fn is_ffmpeg_available(program: &Path) -> bool {
    std::process::Command::new(program)
        .arg("-version")
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .map(|s| s.success())
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn job(dir: &Path) -> EncodeJob {
        EncodeJob {
            manifest_path: dir.join("filelist.txt"),
            output_path: dir.join("output.mp4"),
            fps: 30,
        }
    }

    #[test]
    fn args_use_concat_input_and_h264() {
        let job = job(Path::new("/w"));
        let args: Vec<String> = ffmpeg_args(&job)
            .into_iter()
            .map(|a| a.into_string().unwrap())
            .collect();
        let joined = args.join(" ");
        assert!(joined.starts_with("-y "));
        assert!(joined.contains("-f concat -safe 0 -i /w/filelist.txt"));
        assert!(joined.contains("-vf fps=30"));
        assert!(joined.contains("-c:v libx264 -preset ultrafast -pix_fmt yuv420p"));
        assert_eq!(args.last().map(String::as_str), Some("/w/output.mp4"));
    }

    #[tokio::test]
    async fn missing_program_is_encode_failed() {
        let tmp = tempfile::tempdir().unwrap();
        let encoder = FfmpegEncoder::new(tmp.path().join("no-such-ffmpeg"));
        let res = encoder.encode(&job(tmp.path())).await;
        assert!(matches!(res, Err(Error::EncodeFailed(_))));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn non_zero_exit_is_encode_failed() {
        let tmp = tempfile::tempdir().unwrap();
        let encoder = FfmpegEncoder::new("false");
        let res = encoder.encode(&job(tmp.path())).await;
        match res {
            Err(Error::EncodeFailed(msg)) => assert!(msg.contains("exited with status")),
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn success_without_output_is_encode_failed() {
        let tmp = tempfile::tempdir().unwrap();
        let encoder = FfmpegEncoder::new("true");
        let res = encoder.encode(&job(tmp.path())).await;
        match res {
            Err(Error::EncodeFailed(msg)) => assert!(msg.contains("no output")),
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[test]
    #[ignore] // Requires ffmpeg to be installed
    fn ffmpeg_is_detected() {
        assert!(is_ffmpeg_available(Path::new("ffmpeg")));
    }
}
