use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use capscr_record::{
    list_monitors, Config, FfmpegTranscoder, OutputKind, Recorder, Rectangle, ScreenSource,
    PROGRESS_COMPLETE, PROGRESS_INDETERMINATE,
};

#[derive(Parser, Debug)]
#[command(name = "capscr-record", version, about = "Record the screen to GIF or video")]
struct Args {
    /// gif, avi or ffmpeg
    #[arg(short, long)]
    output: Option<OutputKind>,

    #[arg(long)]
    fps: Option<u32>,

    /// Seconds to record; 0 records until Enter is pressed
    #[arg(short, long)]
    duration: Option<u32>,

    /// Capture rectangle as x,y,width,height
    #[arg(short, long)]
    region: Option<Rectangle>,

    #[arg(short, long)]
    monitor: Option<u32>,

    /// Output file; generated from the filename template when omitted
    #[arg(long)]
    out: Option<PathBuf>,

    /// GIF or encoder quality, 0-100
    #[arg(short, long)]
    quality: Option<u8>,

    /// Re-encode the container output with ffmpeg
    #[arg(long)]
    transcode: bool,

    #[arg(long)]
    list_monitors: bool,

    /// Persist the effective settings as the new defaults
    #[arg(long)]
    save_config: bool,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(io::stderr)
        .init();

    let args = Args::parse();

    if args.list_monitors {
        for monitor in list_monitors()? {
            println!(
                "{}\t{}\t{}x{}+{}+{}{}",
                monitor.id,
                monitor.name,
                monitor.width,
                monitor.height,
                monitor.x,
                monitor.y,
                if monitor.is_primary { "\tprimary" } else { "" }
            );
        }
        return Ok(());
    }

    let mut config = Config::load().unwrap_or_else(|e| {
        tracing::warn!("Failed to load config, using defaults: {}", e);
        Config::default()
    });
    apply_overrides(&mut config, &args);
    config.validate()?;
    if args.save_config {
        config.save()?;
    }

    let kind = config.recording.output;
    if args.transcode && !kind.is_container() {
        tracing::warn!("--transcode only applies to container output, ignoring");
    }
    let transcode = args.transcode && kind.is_container();

    let target = match &args.out {
        Some(path) => path.clone(),
        None => {
            config.ensure_output_dir()?;
            config.output_path(if transcode { OutputKind::Ffmpeg } else { kind })
        }
    };

    let source = match config.recording.monitor {
        Some(id) => ScreenSource::with_monitor(id),
        None => ScreenSource::new(),
    };
    let screen = source.monitor_info()?.bounds();

    let mut recording = config.recording_config(screen);
    if kind.is_container() && !transcode {
        recording.cache_path = target.clone();
    }

    let recorder = Arc::new(Recorder::new(recording, source)?);
    recorder.on_progress(print_progress);
    watch_stdin(Arc::clone(&recorder));

    if recorder.duration_secs() == 0 {
        eprintln!("Recording {}, press Enter to stop", kind.display_name());
    } else {
        eprintln!(
            "Recording {} for {}s, press Enter to stop early",
            kind.display_name(),
            recorder.duration_secs()
        );
    }
    recorder.start_recording()?;

    if let Some(stats) = recorder.last_session() {
        tracing::info!(
            "Captured {} frames in {:.1}s ({} late)",
            stats.frames_submitted,
            stats.elapsed.as_secs_f64(),
            stats.late_frames
        );
    }

    match kind {
        OutputKind::Gif => {
            recorder.save_as_animated_image(&target, config.output.gif_quality)?;
        }
        OutputKind::Avi | OutputKind::Ffmpeg if transcode => {
            let encoder = FfmpegTranscoder::new(
                config.encoder.ffmpeg_path.clone(),
                config.encoder.codec,
                config.encoder.quality,
            );
            recorder.encode_using_external_encoder(&encoder, &target)?;
            if let Err(e) = std::fs::remove_file(recorder.cache_path()) {
                tracing::debug!("Could not remove intermediate file: {}", e);
            }
        }
        OutputKind::Avi | OutputKind::Ffmpeg => {}
    }

    recorder.dispose();
    println!("{}", target.display());
    Ok(())
}

fn apply_overrides(config: &mut Config, args: &Args) {
    if let Some(kind) = args.output {
        config.recording.output = kind;
    }
    if let Some(fps) = args.fps {
        config.recording.fps = fps;
    }
    if let Some(duration) = args.duration {
        config.recording.duration_secs = duration;
    }
    if let Some(region) = args.region {
        config.recording.region = Some(region);
    }
    if let Some(monitor) = args.monitor {
        config.recording.monitor = Some(monitor);
    }
    if let Some(quality) = args.quality {
        config.output.gif_quality = quality;
        config.encoder.quality = quality;
    }
}

fn print_progress(value: i32) {
    let mut stderr = io::stderr().lock();
    let _ = match value {
        PROGRESS_INDETERMINATE => writeln!(stderr, "Encoding..."),
        PROGRESS_COMPLETE => writeln!(stderr, "\rDone      "),
        percent => write!(stderr, "\rEncoding {:3}%", percent),
    };
    let _ = stderr.flush();
}

fn watch_stdin(recorder: Arc<Recorder>) {
    let spawned = thread::Builder::new()
        .name("capscr-stdin".to_string())
        .spawn(move || {
            let mut line = String::new();
            // EOF only ends an unbounded recording
            if let Ok(0) = io::stdin().lock().read_line(&mut line) {
                if recorder.duration_secs() != 0 {
                    return;
                }
            }
            // start_recording clears a stop requested before the session began
            while !recorder.is_recording() {
                thread::sleep(Duration::from_millis(10));
            }
            recorder.stop_recording();
        });
    if let Err(e) = spawned {
        tracing::warn!("Failed to watch stdin: {}", e);
    }
}
