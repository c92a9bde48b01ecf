use std::path::{Path, PathBuf};

use clap::{Args, Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(name = "vandal", author, version, about = "Layered image effects compositor")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run an image through an effect stack and write PNG frames.
    Render(RenderArgs),
    /// Preprocess every shader in a shader directory and report errors.
    CheckShaders(CheckShadersArgs),
}

#[derive(Args, Debug)]
pub struct RenderArgs {
    /// Source image (png, jpeg, bmp or gif).
    #[arg(long, value_name = "PATH")]
    pub image: PathBuf,

    /// Effect stack TOML file.
    #[arg(long, value_name = "FILE")]
    pub stack: PathBuf,

    /// Output PNG. With several `--time` values frames are numbered (`out-0000.png`, ...).
    #[arg(long, value_name = "PATH")]
    pub out: PathBuf,

    /// Time in seconds to evaluate modulated parameters at; repeat for several frames.
    #[arg(long = "time", value_name = "SECONDS")]
    pub times: Vec<f64>,

    /// GPU backend: `headless` (reference device) or `wgpu`.
    #[arg(
        long,
        value_name = "BACKEND",
        value_parser = parse_backend,
        default_value = "headless"
    )]
    pub backend: Backend,

    /// Load shaders from a directory with a `manifest.json` instead of the built-in set.
    #[arg(long, value_name = "DIR")]
    pub shaders: Option<PathBuf>,

    /// Renders per frame to wait for shaders that are still loading.
    #[arg(long, value_name = "COUNT", default_value_t = 240)]
    pub max_attempts: u32,
}

#[derive(Args, Debug)]
pub struct CheckShadersArgs {
    /// Shader directory containing `manifest.json`.
    #[arg(long, value_name = "DIR")]
    pub shaders: PathBuf,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backend {
    Headless,
    Wgpu,
}

pub fn parse() -> Cli {
    Cli::parse()
}

pub fn parse_backend(value: &str) -> Result<Backend, String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err("backend must not be empty".to_string());
    }

    match trimmed.to_ascii_lowercase().as_str() {
        "headless" | "cpu" | "reference" => Ok(Backend::Headless),
        "wgpu" | "gpu" => {
            if cfg!(feature = "wgpu") {
                Ok(Backend::Wgpu)
            } else {
                Err("wgpu support is not enabled in this build".to_string())
            }
        }
        other => Err(format!(
            "unknown backend '{other}'; expected headless or wgpu"
        )),
    }
}

/// Output path for frame `index` of `total`. A single frame keeps `out` as is.
pub fn frame_path(out: &Path, index: usize, total: usize) -> PathBuf {
    if total <= 1 {
        return out.to_path_buf();
    }
    let stem = out
        .file_stem()
        .and_then(|stem| stem.to_str())
        .unwrap_or("frame");
    let name = match out.extension().and_then(|ext| ext.to_str()) {
        Some(ext) => format!("{stem}-{index:04}.{ext}"),
        None => format!("{stem}-{index:04}.png"),
    };
    out.with_file_name(name)
}
