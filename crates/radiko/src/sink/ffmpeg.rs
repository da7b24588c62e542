use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, Command};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::SinkConfig;
use crate::sink::{MediaSink, SinkReport};
use crate::RecordError;

type StderrTail = Arc<Mutex<VecDeque<String>>>;

/// Pipes the stream into an ffmpeg process that remuxes the AAC frames into
/// an MP4 audio container at the output path.
pub struct FfmpegSink {
    child: Child,
    stdin: Option<ChildStdin>,
    stderr_tail: StderrTail,
    stderr_task: Option<JoinHandle<()>>,
    output: PathBuf,
    config: SinkConfig,
    segments_written: u64,
    bytes_written: u64,
}

impl FfmpegSink {
    pub fn build_args(config: &SinkConfig, output: &Path) -> Vec<String> {
        vec![
            "-hide_banner".to_string(),
            "-loglevel".to_string(),
            config.ffmpeg_loglevel.clone(),
            "-fflags".to_string(),
            "+discardcorrupt".to_string(),
            "-i".to_string(),
            "pipe:0".to_string(),
            "-acodec".to_string(),
            "copy".to_string(),
            "-vn".to_string(),
            "-bsf:a".to_string(),
            "aac_adtstoasc".to_string(),
            "-y".to_string(),
            output.to_string_lossy().to_string(),
        ]
    }

    pub fn spawn(config: SinkConfig, output: impl Into<PathBuf>) -> Result<Self, RecordError> {
        let output = output.into();
        let args = Self::build_args(&config, &output);
        debug!(ffmpeg = %config.ffmpeg_path.display(), ?args, "Spawning encoder");

        let mut command = Command::new(&config.ffmpeg_path);
        command
            .args(&args)
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        // A terminal Ctrl-C must reach only the recorder; the encoder is
        // ended by closing its input in `finalize`.
        #[cfg(unix)]
        command.process_group(0);

        let mut child = command
            .spawn()
            .map_err(|e| {
                if e.kind() == std::io::ErrorKind::NotFound {
                    RecordError::SinkError(format!(
                        "ffmpeg not found at {}",
                        config.ffmpeg_path.display()
                    ))
                } else {
                    RecordError::SinkError(format!("failed to start ffmpeg: {e}"))
                }
            })?;

        let stdin = child.stdin.take();
        let stderr_tail: StderrTail = Arc::new(Mutex::new(VecDeque::new()));
        let stderr_task = child.stderr.take().map(|stderr| {
            let tail = stderr_tail.clone();
            let keep = config.stderr_tail_lines.max(1);
            tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    debug!(target: "ffmpeg", "{line}");
                    let mut buf = tail.lock();
                    if buf.len() == keep {
                        buf.pop_front();
                    }
                    buf.push_back(line);
                }
            })
        });

        Ok(Self {
            child,
            stdin,
            stderr_tail,
            stderr_task,
            output,
            config,
            segments_written: 0,
            bytes_written: 0,
        })
    }

    /// Waits briefly for the stderr reader so the tail includes the last
    /// lines the process printed before exiting.
    async fn failure_detail(&mut self) -> String {
        if let Some(task) = self.stderr_task.take() {
            let _ = tokio::time::timeout(std::time::Duration::from_secs(1), task).await;
        }
        let tail = self.stderr_tail.lock();
        if tail.is_empty() {
            "no output".to_string()
        } else {
            tail.iter().cloned().collect::<Vec<_>>().join(" | ")
        }
    }
}

#[async_trait]
impl MediaSink for FfmpegSink {
    async fn write_segment(&mut self, data: &[u8]) -> Result<(), RecordError> {
        let Some(stdin) = self.stdin.as_mut() else {
            return Err(RecordError::SinkError("encoder input already closed".into()));
        };
        if let Err(e) = stdin.write_all(data).await {
            let detail = self.failure_detail().await;
            return Err(RecordError::SinkError(format!(
                "writing to ffmpeg failed: {e} ({detail})"
            )));
        }
        self.segments_written += 1;
        self.bytes_written += data.len() as u64;
        Ok(())
    }

    async fn health_check(&mut self) -> Result<(), RecordError> {
        match self.child.try_wait() {
            Ok(None) => Ok(()),
            Ok(Some(status)) => {
                let detail = self.failure_detail().await;
                Err(RecordError::SinkError(format!(
                    "ffmpeg exited early with {status}: {detail}"
                )))
            }
            Err(e) => Err(RecordError::SinkError(format!(
                "cannot query ffmpeg status: {e}"
            ))),
        }
    }

    async fn finalize(&mut self) -> Result<SinkReport, RecordError> {
        if let Some(mut stdin) = self.stdin.take() {
            if let Err(e) = stdin.shutdown().await {
                debug!(error = %e, "Closing encoder input failed");
            }
        }

        let status =
            match tokio::time::timeout(self.config.finalize_timeout, self.child.wait()).await {
                Ok(Ok(status)) => status,
                Ok(Err(e)) => {
                    return Err(RecordError::SinkError(format!(
                        "waiting for ffmpeg failed: {e}"
                    )));
                }
                Err(_) => {
                    warn!(timeout = ?self.config.finalize_timeout, "ffmpeg did not exit, killing it");
                    if let Err(e) = self.child.kill().await {
                        warn!(error = %e, "Failed to kill ffmpeg");
                    }
                    return Err(RecordError::SinkError(format!(
                        "ffmpeg did not finish within {:?}",
                        self.config.finalize_timeout
                    )));
                }
            };

        if !status.success() {
            let detail = self.failure_detail().await;
            return Err(RecordError::SinkError(format!(
                "ffmpeg exited with {status}: {detail}"
            )));
        }

        info!(
            output = %self.output.display(),
            segments = self.segments_written,
            bytes = self.bytes_written,
            "Encoder finished"
        );
        Ok(SinkReport {
            segments_written: self.segments_written,
            bytes_written: self.bytes_written,
            output: Some(self.output.clone()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn remux_arguments() {
        let args = FfmpegSink::build_args(&SinkConfig::default(), Path::new("/tmp/show.m4a"));
        let joined = args.join(" ");
        assert!(joined.contains("-fflags +discardcorrupt -i pipe:0"));
        assert!(joined.contains("-acodec copy -vn -bsf:a aac_adtstoasc"));
        assert!(joined.ends_with("-y /tmp/show.m4a"));
    }

    #[tokio::test]
    async fn missing_binary_is_a_sink_error() {
        let config = SinkConfig {
            ffmpeg_path: PathBuf::from("/nonexistent/ffmpeg"),
            ..Default::default()
        };
        let err = FfmpegSink::spawn(config, "/tmp/out.m4a").err().unwrap();
        assert!(err.to_string().contains("not found"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn early_exit_is_reported_by_health_check() {
        let config = SinkConfig {
            ffmpeg_path: PathBuf::from("false"),
            ..Default::default()
        };
        let mut sink = FfmpegSink::spawn(config, "/tmp/out.m4a").unwrap();
        let mut result = Ok(());
        for _ in 0..100 {
            result = sink.health_check().await;
            if result.is_err() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        assert!(matches!(result, Err(RecordError::SinkError(_))));
    }

    /// The stand-in encoder drains its input, then exits 0 only when it leads
    /// its own process group.
    #[cfg(target_os = "linux")]
    #[tokio::test]
    async fn encoder_runs_in_its_own_process_group() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let script = dir.path().join("fake-ffmpeg");
        std::fs::write(
            &script,
            "#!/bin/sh\ncat > /dev/null\n[ \"$(cut -d' ' -f5 /proc/$$/stat)\" = \"$$\" ]\n",
        )
        .unwrap();
        std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();

        let config = SinkConfig {
            ffmpeg_path: script,
            ..Default::default()
        };
        let mut sink = FfmpegSink::spawn(config, dir.path().join("out.m4a")).unwrap();
        sink.write_segment(b"frames").await.unwrap();
        let report = sink.finalize().await.unwrap();
        assert_eq!(report.segments_written, 1);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn clean_exit_finalizes() {
        let config = SinkConfig {
            ffmpeg_path: PathBuf::from("true"),
            ..Default::default()
        };
        let mut sink = FfmpegSink::spawn(config, "/tmp/out.m4a").unwrap();
        let report = sink.finalize().await.unwrap();
        assert_eq!(report.segments_written, 0);
        assert_eq!(report.output, Some(PathBuf::from("/tmp/out.m4a")));
    }
}
