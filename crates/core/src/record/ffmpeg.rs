use std::{
    collections::HashSet,
    io::{BufRead, BufReader, Read, Write},
    path::{Path, PathBuf},
    process::{Child, ChildStdin, Command, Stdio},
    thread::{self, JoinHandle},
};

use crossbeam_channel::{Receiver, Sender};

use super::{
    codec::{EncoderBackend, MediaCapability, SegmentEncoder},
    ExportOptions,
};
use crate::{shader::Frame, Result, VizError};

const AUDIO_ENCODER: &str = "libopus";

/// Encodes through an external `ffmpeg` binary, fed raw RGBA on stdin.
///
/// Detection records which encoders the binary was built with so codec
/// negotiation only offers what will actually work.
#[derive(Debug, Clone)]
pub struct FfmpegBackend {
    program: PathBuf,
    encoders: HashSet<String>,
}

impl FfmpegBackend {
    /// Runs `<program> -encoders`. Returns `None` when the binary is missing
    /// or fails.
    pub fn detect(program: impl AsRef<Path>) -> Option<Self> {
        let program = program.as_ref().to_path_buf();
        let output = Command::new(&program)
            .args(["-hide_banner", "-encoders"])
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .output();
        match output {
            Ok(output) if output.status.success() => {
                let encoders = parse_encoder_list(&String::from_utf8_lossy(&output.stdout));
                tracing::debug!(program = %program.display(), encoders = encoders.len(), "detected ffmpeg");
                Some(Self { program, encoders })
            }
            Ok(output) => {
                tracing::debug!(program = %program.display(), status = %output.status, "ffmpeg encoder listing failed");
                None
            }
            Err(err) => {
                tracing::debug!(program = %program.display(), %err, "ffmpeg not available");
                None
            }
        }
    }

    pub fn with_encoders<I, S>(program: impl Into<PathBuf>, encoders: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            program: program.into(),
            encoders: encoders.into_iter().map(Into::into).collect(),
        }
    }

    pub fn program(&self) -> &Path {
        &self.program
    }

    fn video_encoder(capability: MediaCapability) -> Option<(&'static str, &'static str)> {
        match capability {
            MediaCapability::WebmVp9Opus => Some(("libvpx-vp9", "webm")),
            MediaCapability::WebmVp8Opus => Some(("libvpx", "webm")),
            MediaCapability::MatroskaH264Opus => Some(("libx264", "matroska")),
            MediaCapability::Generic => None,
        }
    }

    fn arguments(
        video_encoder: &str,
        container: &str,
        options: &ExportOptions,
    ) -> Vec<String> {
        let size = format!("{}x{}", options.width, options.height);
        let rate = options.frame_rate.to_string();
        let bitrate = options.bitrate.to_string();
        [
            "-hide_banner",
            "-loglevel",
            "error",
            "-f",
            "rawvideo",
            "-pix_fmt",
            "rgba",
            "-s",
            size.as_str(),
            "-r",
            rate.as_str(),
            "-i",
            "-",
            // Silent track so the container carries the negotiated audio codec.
            "-f",
            "lavfi",
            "-i",
            "anullsrc=channel_layout=stereo:sample_rate=48000",
            "-shortest",
            "-c:v",
            video_encoder,
            "-b:v",
            bitrate.as_str(),
            "-pix_fmt",
            "yuv420p",
            "-c:a",
            AUDIO_ENCODER,
            "-f",
            container,
            "pipe:1",
        ]
        .into_iter()
        .map(str::to_string)
        .collect()
    }
}

impl EncoderBackend for FfmpegBackend {
    fn name(&self) -> &str {
        "ffmpeg"
    }

    fn supports(&self, capability: MediaCapability) -> bool {
        Self::video_encoder(capability).is_some_and(|(video, _)| {
            self.encoders.contains(video) && self.encoders.contains(AUDIO_ENCODER)
        })
    }

    fn open(
        &self,
        capability: MediaCapability,
        options: &ExportOptions,
    ) -> Result<Box<dyn SegmentEncoder>> {
        let (video, container) = Self::video_encoder(capability)
            .filter(|_| self.supports(capability))
            .ok_or_else(|| VizError::UnsupportedCapability(capability.to_string()))?;

        let mut child = Command::new(&self.program)
            .args(Self::arguments(video, container, options))
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|err| VizError::Encoder(format!("failed to start ffmpeg: {err}")))?;

        let stdin = child.stdin.take();
        let (Some(stdin), Some(stdout), Some(stderr)) =
            (stdin, child.stdout.take(), child.stderr.take())
        else {
            let _ = child.kill();
            let _ = child.wait();
            return Err(VizError::Encoder("ffmpeg pipes unavailable".into()));
        };

        let (chunk_tx, chunks) = crossbeam_channel::unbounded();
        let stdout_reader = spawn_stdout_reader(stdout, chunk_tx)?;
        let stderr_reader = spawn_stderr_reader(stderr)?;
        tracing::info!(%capability, encoder = video, "ffmpeg encoder started");

        Ok(Box::new(FfmpegEncoder {
            child,
            stdin: Some(stdin),
            chunks,
            stdout_reader: Some(stdout_reader),
            stderr_reader: Some(stderr_reader),
            frame_len: options.width as usize * options.height as usize * 4,
        }))
    }
}

fn spawn_stdout_reader(
    mut stdout: impl Read + Send + 'static,
    chunks: Sender<Vec<u8>>,
) -> Result<JoinHandle<()>> {
    let handle = thread::Builder::new()
        .name("ffmpeg-stdout".into())
        .spawn(move || {
            let mut buf = vec![0; 64 * 1024];
            loop {
                match stdout.read(&mut buf) {
                    Ok(0) => break,
                    Ok(n) => {
                        if chunks.send(buf[..n].to_vec()).is_err() {
                            break;
                        }
                    }
                    Err(err) => {
                        tracing::warn!(%err, "failed to read ffmpeg output");
                        break;
                    }
                }
            }
        })?;
    Ok(handle)
}

fn spawn_stderr_reader(stderr: impl Read + Send + 'static) -> Result<JoinHandle<String>> {
    let handle = thread::Builder::new()
        .name("ffmpeg-stderr".into())
        .spawn(move || {
            let mut log = String::new();
            for line in BufReader::new(stderr).lines().map_while(|line| line.ok()) {
                tracing::debug!(target: "ffmpeg", "{line}");
                log.push_str(&line);
                log.push('\n');
            }
            log
        })?;
    Ok(handle)
}

struct FfmpegEncoder {
    child: Child,
    stdin: Option<ChildStdin>,
    chunks: Receiver<Vec<u8>>,
    stdout_reader: Option<JoinHandle<()>>,
    stderr_reader: Option<JoinHandle<String>>,
    frame_len: usize,
}

impl FfmpegEncoder {
    fn drain(&self) -> Vec<u8> {
        self.chunks.try_iter().flatten().collect()
    }
}

impl SegmentEncoder for FfmpegEncoder {
    fn encode(&mut self, frame: &Frame) -> Result<Vec<u8>> {
        if frame.pixels.len() != self.frame_len {
            return Err(VizError::Encoder(format!(
                "expected {} bytes of RGBA, got {}",
                self.frame_len,
                frame.pixels.len()
            )));
        }
        let stdin = self
            .stdin
            .as_mut()
            .ok_or_else(|| VizError::Encoder("ffmpeg input already closed".into()))?;
        stdin
            .write_all(&frame.pixels)
            .map_err(|err| VizError::Encoder(format!("ffmpeg stdin write failed: {err}")))?;
        Ok(self.drain())
    }

    fn finish(mut self: Box<Self>) -> Result<Vec<u8>> {
        // Closing stdin is the end-of-stream signal.
        drop(self.stdin.take());
        let status = self.child.wait()?;
        if let Some(reader) = self.stdout_reader.take() {
            let _ = reader.join();
        }
        let log = self
            .stderr_reader
            .take()
            .and_then(|reader| reader.join().ok())
            .unwrap_or_default();

        if !status.success() {
            return Err(VizError::Encoder(format!(
                "ffmpeg exited with {status}: {}",
                log.trim()
            )));
        }
        Ok(self.drain())
    }
}

impl Drop for FfmpegEncoder {
    fn drop(&mut self) {
        if self.stdin.is_some() {
            let _ = self.child.kill();
            let _ = self.child.wait();
        }
    }
}

/// Names listed by `ffmpeg -encoders`, after its legend.
pub fn parse_encoder_list(output: &str) -> HashSet<String> {
    output
        .lines()
        .skip_while(|line| !line.trim_start().starts_with("---"))
        .skip(1)
        .filter_map(|line| {
            let mut fields = line.split_whitespace();
            let flags = fields.next()?;
            let name = fields.next()?;
            (flags.len() == 6).then(|| name.to_string())
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = "\
Encoders:
 V..... = Video
 A..... = Audio
 ------
 V....D libvpx               libvpx VP8 (codec vp8)
 V....D libvpx-vp9           libvpx VP9 (codec vp9)
 A....D libopus              libopus Opus (codec opus)
 V....D rawvideo             raw video
";

    #[test]
    fn parses_encoder_names_after_the_legend() {
        let encoders = parse_encoder_list(SAMPLE);
        assert!(encoders.contains("libvpx-vp9"));
        assert!(encoders.contains("libopus"));
        assert!(!encoders.contains("Video"));
        assert_eq!(encoders.len(), 4);
    }

    #[test]
    fn supports_needs_video_and_audio_encoders() {
        let backend = FfmpegBackend::with_encoders("ffmpeg", parse_encoder_list(SAMPLE));
        assert!(backend.supports(MediaCapability::WebmVp9Opus));
        assert!(backend.supports(MediaCapability::WebmVp8Opus));
        assert!(!backend.supports(MediaCapability::MatroskaH264Opus));
        assert!(!backend.supports(MediaCapability::Generic));

        let silent = FfmpegBackend::with_encoders("ffmpeg", ["libvpx-vp9"]);
        assert!(!silent.supports(MediaCapability::WebmVp9Opus));
    }

    #[test]
    fn missing_binary_is_not_offered() {
        assert!(FfmpegBackend::detect("/nonexistent/ffmpeg-binary").is_none());
    }

    #[test]
    fn arguments_feed_rgba_from_stdin() {
        let options = ExportOptions {
            width: 640,
            height: 360,
            frame_rate: 30,
            duration_seconds: 5,
            bitrate: 1_000_000,
        };
        let args = FfmpegBackend::arguments("libvpx-vp9", "webm", &options);
        let joined = args.join(" ");
        assert!(joined.contains("-pix_fmt rgba -s 640x360 -r 30 -i -"));
        assert!(joined.contains("-c:v libvpx-vp9 -b:v 1000000"));
        assert!(joined.ends_with("-f webm pipe:1"));
    }
}
