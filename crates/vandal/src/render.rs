use std::thread;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use compositor::{FrameStats, GpuDevice, HeadlessDevice, Pipeline, PixelBuffer, ShaderLibrary};
use scheduler::{FrameLoop, FrameTasks};
use stackconfig::StackConfig;

use crate::cli::{frame_path, Backend, RenderArgs};

/// Pause between renders while shaders are still loading, unless the stack
/// file sets its own frame interval.
const RETRY_INTERVAL: Duration = Duration::from_millis(5);

pub fn run(args: RenderArgs) -> Result<()> {
    let config = StackConfig::load(&args.stack)
        .with_context(|| format!("failed to load stack {}", args.stack.display()))?;
    let source = image::open(&args.image)
        .with_context(|| format!("failed to read image {}", args.image.display()))?;

    let shaders = match &args.shaders {
        Some(dir) => ShaderLibrary::open(dir)
            .with_context(|| format!("failed to open shader directory {}", dir.display()))?,
        None => ShaderLibrary::embedded(),
    };
    let device = build_device(args.backend)?;
    let mut pipeline = Pipeline::new(device, shaders, config.render.pipeline_settings());
    pipeline.set_source(PixelBuffer::from_image(&source));

    for spec in &config.effects {
        let effect_config = spec.effect_config()?;
        let id = pipeline
            .add_effect(&spec.kind, effect_config)
            .with_context(|| format!("failed to add effect '{}'", spec.kind))?;
        if !spec.enabled {
            pipeline.set_enabled(id, false)?;
        }
        if spec.solo {
            pipeline.set_solo(id, true)?;
        }
    }
    tracing::info!(
        image = %args.image.display(),
        width = source.width(),
        height = source.height(),
        effects = config.effects.len(),
        backend = ?args.backend,
        "loaded stack"
    );

    let times = if args.times.is_empty() {
        vec![0.0]
    } else {
        args.times.clone()
    };
    let frame_loop = FrameLoop::new(config.render.frame_interval.or(Some(RETRY_INTERVAL)));

    for (index, &time) in times.iter().enumerate() {
        let path = frame_path(&args.out, index, times.len());
        let mut task = FrameTask {
            pipeline: &mut pipeline,
            time,
            attempts: 0,
            max_attempts: args.max_attempts.max(1),
            result: None,
        };

        frame_loop.mark_image_dirty();
        while frame_loop.is_dirty() {
            if frame_loop.tick_if_due(Instant::now(), &mut task)?.is_none() {
                thread::sleep(Duration::from_millis(1));
            }
        }

        let (pixels, stats) = task
            .result
            .with_context(|| format!("no frame was rendered for time {time}"))?;
        pixels
            .to_rgba8()?
            .save(&path)
            .with_context(|| format!("failed to write {}", path.display()))?;
        tracing::info!(
            frame = index,
            time,
            attempts = task.attempts,
            path = %path.display(),
            %stats,
            "wrote frame"
        );
    }

    let device = pipeline.device().stats();
    tracing::info!(
        backend = pipeline.device().backend_name(),
        compiles = device.programs_compiled,
        draws = device.draws,
        uploads = device.texture_uploads,
        "render finished"
    );
    Ok(())
}

fn build_device(backend: Backend) -> Result<Box<dyn GpuDevice>> {
    match backend {
        Backend::Headless => Ok(Box::new(HeadlessDevice::new())),
        #[cfg(feature = "wgpu")]
        Backend::Wgpu => {
            let device =
                compositor::WgpuDevice::new().context("failed to initialise wgpu device")?;
            tracing::info!(adapter = device.adapter_name(), "using wgpu backend");
            Ok(Box::new(device))
        }
        #[cfg(not(feature = "wgpu"))]
        Backend::Wgpu => anyhow::bail!("wgpu support is not enabled in this build"),
    }
}

/// Renders one frame, re-dirtying itself while effects soft-fault.
struct FrameTask<'a> {
    pipeline: &'a mut Pipeline,
    time: f64,
    attempts: u32,
    max_attempts: u32,
    result: Option<(PixelBuffer, FrameStats)>,
}

impl FrameTasks for FrameTask<'_> {
    fn render_image(&mut self, frame: &FrameLoop) -> Result<()> {
        self.attempts += 1;
        let (pixels, stats) = self.pipeline.render_frame(self.time)?;
        if stats.soft_faults > 0 {
            if self.attempts < self.max_attempts {
                tracing::debug!(
                    attempt = self.attempts,
                    soft_faults = stats.soft_faults,
                    "effects not ready; rendering again"
                );
                frame.mark_image_dirty();
            } else {
                tracing::warn!(
                    attempts = self.attempts,
                    soft_faults = stats.soft_faults,
                    "effects still not ready; writing frame without them"
                );
            }
        }
        self.result = Some((pixels, stats));
        Ok(())
    }
}
