//! Transcoder command line construction.

use std::path::Path;

use crate::config::SupervisorConfig;
use crate::credentials::{with_credentials, Credentials};
use crate::quality::{QualityProfile, VideoMode};

/// Chunk files are named `segment_00000.ts`, `segment_00001.ts`, ...
pub const SEGMENT_PREFIX: &str = "segment_";
pub const SEGMENT_EXT: &str = "ts";
const SEGMENT_PATTERN: &str = "segment_%05d.ts";

/// Everything needed to (re)build a stream's command line identically.
#[derive(Debug, Clone)]
pub struct LaunchSpec {
    pub id: String,
    /// Credential-free source URI
    pub source_uri: String,
    pub credentials: Option<Credentials>,
    pub quality: QualityProfile,
    pub max_bitrate_kbps: Option<u32>,
}

/// Whether `name` is a chunk file written by the transcoder.
pub fn is_segment_file(name: &str) -> bool {
    name.starts_with(SEGMENT_PREFIX)
        && Path::new(name)
            .extension()
            .map(|ext| ext == SEGMENT_EXT)
            .unwrap_or(false)
}

/// Build the transcoder arguments for `spec`, excluding the program and
/// any configured prefix arguments.
pub fn transcoder_args(config: &SupervisorConfig, spec: &LaunchSpec) -> Vec<String> {
    let stream_dir = config.stream_dir(&spec.id);
    let segment_pattern = stream_dir.join(SEGMENT_PATTERN);
    let manifest = config.manifest_path(&spec.id);
    let chunk = config.chunk_duration_secs.to_string();

    let mut args: Vec<String> = [
        "-hide_banner",
        "-nostdin",
        "-loglevel",
        "warning",
        // Input: TCP interleaved RTSP, bounded socket timeout, minimal buffering
        "-rtsp_transport",
        "tcp",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect();

    // ffmpeg expects microseconds
    args.push("-timeout".into());
    args.push(config.source_timeout_ms.saturating_mul(1000).to_string());
    args.extend(
        ["-fflags", "nobuffer", "-flags", "low_delay"]
            .iter()
            .map(|s| s.to_string()),
    );
    args.push("-i".into());
    args.push(with_credentials(&spec.source_uri, spec.credentials.as_ref()));

    match spec.quality.video_mode(spec.max_bitrate_kbps) {
        VideoMode::Copy => {
            args.extend(["-c:v", "copy"].iter().map(|s| s.to_string()));
        }
        VideoMode::Encode(params) => {
            args.extend(
                [
                    "-c:v",
                    "libx264",
                    "-preset",
                    params.preset,
                    "-tune",
                    "zerolatency",
                    "-pix_fmt",
                    "yuv420p",
                ]
                .iter()
                .map(|s| s.to_string()),
            );
            args.push("-crf".into());
            args.push(params.crf.to_string());
            args.push("-maxrate".into());
            args.push(format!("{}k", params.max_bitrate_kbps));
            args.push("-bufsize".into());
            args.push(format!("{}k", params.max_bitrate_kbps * 2));
            // Keyframe on every chunk boundary so segments cut cleanly
            args.push("-force_key_frames".into());
            args.push(format!("expr:gte(t,n_forced*{})", chunk));
        }
    }

    // AAC for browser compatibility
    args.extend(["-c:a", "aac"].iter().map(|s| s.to_string()));

    args.extend(["-f", "hls", "-hls_time"].iter().map(|s| s.to_string()));
    args.push(chunk);
    args.push("-hls_list_size".into());
    args.push(config.retained_chunks.to_string());
    args.extend(
        [
            "-hls_flags",
            "delete_segments+append_list+omit_endlist",
            "-hls_allow_cache",
            "0",
            "-start_number",
            "0",
            "-hls_segment_filename",
        ]
        .iter()
        .map(|s| s.to_string()),
    );
    args.push(segment_pattern.to_string_lossy().into_owned());
    args.push("-y".into());
    args.push(manifest.to_string_lossy().into_owned());

    args
}
