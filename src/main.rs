//! ### English
//! `dmatex` binary: runs the streaming pipeline from the command line.
//!
//! With source files it decodes and streams them, switching to the secondary
//! source when a line arrives on stdin. With `--pattern` it streams the
//! animated gradient and needs no files. Exit code 0 on a completed run,
//! 1 on any pipeline failure.
//!
//! ### 中文
//! `dmatex` 可执行文件：从命令行运行流式流水线。
//!
//! 给定源文件时解码并流式显示它们，stdin 收到一行时切换到次源。
//! 使用 `--pattern` 时流式显示动画渐变，不需要任何文件。运行完成时
//! 退出码为 0，流水线失败时为 1。

use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use clap::Parser;
use dpi::PhysicalSize;
use tracing_subscriber::EnvFilter;

use dmatex_engine::{
    BackendKind, Pipeline, PipelineCommand, PipelineConfig, PixelFormat, ProducerKind,
};

/// ### English
/// Zero-copy external-buffer texture streaming.
///
/// ### 中文
/// 零拷贝外部缓冲纹理流。
#[derive(Debug, Parser)]
#[command(name = "dmatex", version, about)]
struct Cli {
    /// Primary source image (JPEG or PNG)
    #[arg(required_unless_present = "pattern")]
    primary: Option<PathBuf>,

    /// Secondary source, switched in when a line arrives on stdin
    secondary: Option<PathBuf>,

    /// Stream the animated test pattern instead of decoding sources
    #[arg(long)]
    pattern: bool,

    /// Frame width for the pattern producer
    #[arg(long, default_value_t = 640)]
    width: u32,

    /// Frame height for the pattern producer
    #[arg(long, default_value_t = 480)]
    height: u32,

    /// Pixel format of produced frames
    #[arg(long, value_enum, default_value_t = PixelFormat::Rgba8888)]
    format: PixelFormat,

    /// Graphics backend
    #[arg(long, value_enum, default_value_t = BackendKind::Auto)]
    backend: BackendKind,

    /// Stop after this many drawn frames (default: run until stdin closes)
    #[arg(long)]
    frames: Option<u64>,

    /// Target display rate
    #[arg(long, default_value_t = 60)]
    fps: u32,

    /// Startup window for the first frame, in milliseconds
    #[arg(long, default_value_t = 2000)]
    startup_timeout_ms: u64,
}

impl Cli {
    fn into_config(self) -> PipelineConfig {
        let (producer, sources) = if self.pattern {
            (ProducerKind::Pattern, Vec::new())
        } else {
            let mut sources = Vec::new();
            sources.extend(self.primary);
            sources.extend(self.secondary);
            (ProducerKind::Decode, sources)
        };

        PipelineConfig {
            size: PhysicalSize::new(self.width, self.height),
            format: self.format,
            backend: self.backend,
            producer,
            sources,
            frames: self.frames,
            fps: self.fps,
            startup_timeout: Duration::from_millis(self.startup_timeout_ms),
        }
    }
}

/// ### English
/// Forwards stdin lines as pipeline commands: each line switches to the
/// secondary source, EOF stops the run.
///
/// ### 中文
/// 把 stdin 的行转发为流水线命令：每行切换到次源，EOF 则停止运行。
fn spawn_stdin_listener(commands: crossbeam_channel::Sender<PipelineCommand>) {
    let result = std::thread::Builder::new()
        .name("dmatex-stdin".to_string())
        .spawn(move || {
            let mut line = String::new();
            loop {
                line.clear();
                match std::io::stdin().read_line(&mut line) {
                    Ok(0) | Err(_) => {
                        let _ = commands.send(PipelineCommand::Stop);
                        return;
                    }
                    Ok(_) => {
                        let _ = commands.send(PipelineCommand::UseSecondary);
                    }
                }
            }
        });
    if let Err(err) = result {
        tracing::warn!(error = %err, "stdin listener could not start");
    }
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(err) => {
            let failed = err.use_stderr();
            let _ = err.print();
            // Usage errors exit 1; --help and --version are not failures.
            return if failed {
                ExitCode::FAILURE
            } else {
                ExitCode::SUCCESS
            };
        }
    };
    // Without a frame budget the run ends when stdin closes.
    let interactive = cli.frames.is_none();
    let config = cli.into_config();

    let mut pipeline = Pipeline::new(config);
    if let Err(err) = pipeline.init() {
        tracing::error!(error = %err, "pipeline initialization failed");
        return ExitCode::FAILURE;
    }

    let (tx, rx) = crossbeam_channel::unbounded();
    if interactive {
        spawn_stdin_listener(tx);
    }

    match pipeline.run(&rx) {
        Ok(summary) => {
            println!(
                "rendered {} frames in {:.2}s ({:.1} fps), produced {}, dropped {}, import failures {}",
                summary.frames_drawn,
                summary.elapsed.as_secs_f64(),
                summary.fps(),
                summary.frames_produced,
                summary.frames_dropped,
                summary.imports_failed,
            );
            ExitCode::SUCCESS
        }
        Err(err) => {
            tracing::error!(error = %err, "pipeline run failed");
            ExitCode::FAILURE
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_primary_without_pattern_is_a_usage_error() {
        let err = Cli::try_parse_from(["dmatex"]).unwrap_err();
        // Real usage errors go to stderr and map to exit code 1 in main.
        assert!(err.use_stderr());
    }

    #[test]
    fn help_is_not_treated_as_a_failure() {
        let err = Cli::try_parse_from(["dmatex", "--help"]).unwrap_err();
        assert!(!err.use_stderr());
    }

    #[test]
    fn pattern_mode_parses_without_sources() {
        let cli = Cli::try_parse_from(["dmatex", "--pattern", "--frames", "3"]).unwrap();
        assert!(cli.pattern);
        let config = cli.into_config();
        assert_eq!(config.producer, ProducerKind::Pattern);
        assert_eq!(config.frames, Some(3));
        assert!(config.sources.is_empty());
    }
}
