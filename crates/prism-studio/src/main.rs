use anyhow::{Context, Result};
use prism_engine::context::{ContextConfig, RenderContext};
use prism_engine::coords::RotationMode;
use prism_engine::device::{GpuInit, GraphicsDevice, HeadlessDevice, WgpuDevice};
use prism_engine::logging::{init_logging, LoggingConfig};
use prism_engine::node::{
    Filter, FrameSink, ProcessingNode, RawDataSource, RawFrame, SourceConfig,
};

const WIDTH: u32 = 640;
const HEIGHT: u32 = 360;
const FRAMES: u32 = 120;

fn open_device() -> Box<dyn GraphicsDevice> {
    match WgpuDevice::new_blocking(GpuInit::default()) {
        Ok(device) => {
            let info = device.adapter_info();
            log::info!("using adapter {} ({:?})", info.name, info.backend);
            Box::new(device)
        }
        Err(e) => {
            log::warn!("no usable GPU adapter ({e:#}), falling back to the headless device");
            Box::new(HeadlessDevice::new())
        }
    }
}

/// Moving diagonal gradient, tightly packed RGBA.
fn test_pattern(frame: u32) -> Vec<u8> {
    let mut pixels = Vec::with_capacity((WIDTH * HEIGHT * 4) as usize);
    for y in 0..HEIGHT {
        for x in 0..WIDTH {
            let v = ((x + y + frame * 4) % 256) as u8;
            pixels.extend_from_slice(&[v, 255 - v, (y % 256) as u8, 255]);
        }
    }
    pixels
}

fn main() -> Result<()> {
    init_logging(LoggingConfig::default());

    let context = RenderContext::new(open_device(), ContextConfig::default())
        .context("creating the render context")?;

    // Sensor mounted sideways: the filter turns 640x360 into 360x640.
    let source = RawDataSource::new(
        &context,
        SourceConfig {
            rotation: RotationMode::RotateRight,
            ..SourceConfig::new(WIDTH, HEIGHT)
        },
    )?;
    let filter = Filter::passthrough(&context).context("building the passthrough filter")?;
    let sink = FrameSink::with_callback(&context, |f| {
        log::trace!("sink got frame {} ({}x{})", f.time.frame_index, f.frame.width(), f.frame.height());
    });

    source.targets().add_target(filter.clone())?;
    filter.targets().add_target(sink.clone())?;

    let mut consumed = 0;
    for i in 0..FRAMES {
        source.push(RawFrame::new(test_pattern(i)))?;
        if let Some(frame) = sink.take_frame() {
            consumed += 1;
            sink.release_frame(frame)?;
        }
    }

    // Drain frames still queued.
    context.run_sync(|| ())?;
    if let Some(frame) = sink.take_frame() {
        log::info!(
            "last frame {} is {}x{}",
            frame.time.frame_index,
            frame.frame.width(),
            frame.frame.height()
        );
        consumed += 1;
        sink.release_frame(frame)?;
    }

    let stats = context.framebuffer_cache().stats();
    log::info!(
        "{FRAMES} frames pushed, {consumed} consumed, {} dropped at the sink",
        sink.frames_dropped()
    );
    log::info!(
        "framebuffer cache: {} hits, {} misses, {} created, {} destroyed, {} idle, {} checked out",
        stats.hits,
        stats.misses,
        stats.created,
        stats.destroyed,
        stats.available,
        stats.checked_out
    );

    source.end_processing();
    context.shutdown();
    Ok(())
}
