//! End-to-end coverage of the streaming chain on the software backend:
//! allocate, fill, export, import, mailbox handoff, slot binding, draw, and
//! readback, without any GPU or display server.

#![cfg(unix)]

use std::sync::Arc;
use std::time::Duration;

use dpi::PhysicalSize;

use dmatex_engine::engine::gpu::software::SoftwareContext;
use dmatex_engine::{
    BackendKind, DescriptorImporter, DestructionProbe, FrameAllocator, FrameMailbox, FrameRequest,
    GpuContext, ImportedImage, MemfdAllocator, Pipeline, PipelineCommand, PipelineConfig,
    PipelineState, PixelFormat, ProducerKind, SlotPair,
};

fn exported_frame(
    allocator: &mut MemfdAllocator,
    width: u32,
    height: u32,
    mut fill: impl FnMut(u32, &mut [u8]),
) -> dmatex_engine::ExportDescriptor {
    let mut alloc = allocator
        .allocate(FrameRequest {
            size: PhysicalSize::new(width, height),
            format: PixelFormat::Rgba8888,
        })
        .unwrap();
    alloc.map_for_write().unwrap().fill_rows(&mut fill);
    alloc.unmap_and_export().unwrap()
}

/// Allocate → fill → export → import → bind → draw → read back, one frame.
#[test]
fn full_chain_shows_the_produced_pixels() {
    let mut allocator = MemfdAllocator::new();
    let descriptor = exported_frame(&mut allocator, 64, 64, |y, row| {
        for (x, pixel) in row.chunks_exact_mut(4).enumerate() {
            pixel.copy_from_slice(&[x as u8, y as u8, 0, 255]);
        }
    });

    let mut ctx = SoftwareContext::new(PhysicalSize::new(64, 64));
    let image = ctx.importer().import(descriptor).unwrap();

    let mut pair = SlotPair::create(&mut ctx).unwrap();
    pair.accept(&mut ctx, image).unwrap();
    ctx.draw(pair.front()).unwrap();
    ctx.present().unwrap();
    pair.release_retired();

    assert_eq!(ctx.pixel(10, 20), [10, 20, 0, 255]);
    assert_eq!(ctx.pixel(63, 0), [63, 0, 0, 255]);
}

/// Width 60 forces a padded pitch (240 → 256). A consumer addressing rows by
/// width instead of pitch would shear every row after the first.
#[test]
fn padded_pitch_does_not_shear_the_image() {
    let mut allocator = MemfdAllocator::new();
    let descriptor = exported_frame(&mut allocator, 60, 32, |y, row| {
        for (x, pixel) in row.chunks_exact_mut(4).enumerate() {
            pixel.copy_from_slice(&[x as u8, y as u8, 200, 255]);
        }
    });
    assert!(descriptor.layout().pitch > descriptor.layout().row_len() as u32);

    let mut ctx = SoftwareContext::new(PhysicalSize::new(60, 32));
    let image = ctx.importer().import(descriptor).unwrap();
    let mut pair = SlotPair::create(&mut ctx).unwrap();
    pair.accept(&mut ctx, image).unwrap();
    ctx.draw(pair.front()).unwrap();

    for y in [0u32, 1, 15, 31] {
        assert_eq!(ctx.pixel(0, y), [0, y as u8, 200, 255], "row {y} shifted");
        assert_eq!(ctx.pixel(59, y), [59, y as u8, 200, 255], "row {y} shifted");
    }
}

/// The other half of the stride guard: writing rows with the nominal width
/// as the stride on a padded-pitch allocation must come out demonstrably
/// wrong — every row after the first is shifted by the accumulated padding.
#[test]
fn width_stride_writes_shear_on_a_padded_pitch_allocation() {
    let mut allocator = MemfdAllocator::new();
    let mut alloc = allocator
        .allocate(FrameRequest {
            size: PhysicalSize::new(60, 8),
            format: PixelFormat::Rgba8888,
        })
        .unwrap();
    let layout = alloc.layout();
    assert!(layout.pitch as usize > layout.row_len());

    {
        let mut region = alloc.map_for_write().unwrap();
        let bytes = region.bytes_mut();
        // The stride bug: rows addressed by width * 4 instead of the pitch.
        let bad_stride = 60 * 4;
        for y in 0..8usize {
            for x in 0..60usize {
                let offset = y * bad_stride + x * 4;
                bytes[offset..offset + 4].copy_from_slice(&[x as u8, y as u8, 0, 255]);
            }
        }
    }
    let descriptor = alloc.unmap_and_export().unwrap();

    let mut ctx = SoftwareContext::new(PhysicalSize::new(60, 8));
    let image = ctx.importer().import(descriptor).unwrap();
    let mut pair = SlotPair::create(&mut ctx).unwrap();
    pair.accept(&mut ctx, image).unwrap();
    ctx.draw(pair.front()).unwrap();

    // Row 0 happens to land correctly...
    assert_eq!(ctx.pixel(10, 0), [10, 0, 0, 255]);
    // ...but with pitch 256 and stride 240, each later row reads 16 bytes
    // (4 pixels) into the previous mistakenly-packed row: a diagonal shear.
    assert_ne!(ctx.pixel(0, 1), [0, 1, 0, 255]);
    assert_eq!(ctx.pixel(0, 1), [4, 1, 0, 255]);
    assert_eq!(ctx.pixel(0, 2), [8, 2, 0, 255]);
}

/// Five produced frames, two consumer ticks: only the frames actually taken
/// are ever bound, and every superseded frame is destroyed, not leaked.
#[test]
fn slow_consumer_gets_latest_frames_and_leaks_nothing() {
    let mut allocator = MemfdAllocator::new();
    let mailbox = Arc::new(FrameMailbox::new());
    let probe = DestructionProbe::new();
    let mut ctx = SoftwareContext::new(PhysicalSize::new(8, 8));
    let importer = ctx.importer();

    let mut deposit_tagged = |tag: u8| {
        let descriptor = exported_frame(&mut allocator, 8, 8, |_, row| {
            for pixel in row.chunks_exact_mut(4) {
                pixel.copy_from_slice(&[tag, 0, 0, 255]);
            }
        });
        let mut image = importer.import(descriptor).unwrap();
        image.set_probe(probe.clone());
        mailbox.deposit(image);
    };

    let mut pair = SlotPair::create(&mut ctx).unwrap();

    for tag in 1..=3 {
        deposit_tagged(tag);
    }
    let image = mailbox.try_take().unwrap();
    pair.accept(&mut ctx, image).unwrap();
    ctx.draw(pair.front()).unwrap();
    pair.release_retired();
    assert_eq!(ctx.pixel(0, 0), [3, 0, 0, 255]);

    for tag in 4..=5 {
        deposit_tagged(tag);
    }
    pair.accept(&mut ctx, mailbox.try_take().unwrap()).unwrap();
    ctx.draw(pair.front()).unwrap();
    pair.release_retired();
    assert_eq!(ctx.pixel(0, 0), [5, 0, 0, 255]);

    // Frames 1, 2, and 4 were overwritten in the mailbox and destroyed.
    assert_eq!(mailbox.dropped(), 3);
    assert_eq!(probe.destroyed(), 3);
    // Frames 3 and 5 live on in the slot pair.
    drop(pair);
    assert_eq!(probe.destroyed(), 5);
}

/// An image dropped before binding reports a lifetime bug instead of being
/// sampled through a dangling backing.
#[test]
fn binding_a_dead_image_is_an_error_not_a_crash() {
    let mut ctx = SoftwareContext::new(PhysicalSize::new(8, 8));
    let mut pair = SlotPair::create(&mut ctx).unwrap();
    let dead = ImportedImage::detached(dmatex_engine::ImageLayout {
        size: PhysicalSize::new(8, 8),
        format: PixelFormat::Rgba8888,
        pitch: 32,
    });
    assert!(pair.accept(&mut ctx, dead).is_err());
}

#[test]
fn pattern_pipeline_runs_to_its_frame_budget() {
    let mut pipeline = Pipeline::new(PipelineConfig {
        size: PhysicalSize::new(32, 32),
        backend: BackendKind::Software,
        producer: ProducerKind::Pattern,
        frames: Some(8),
        fps: 240,
        ..PipelineConfig::default()
    });
    pipeline.init().unwrap();

    let (_tx, rx) = crossbeam_channel::unbounded();
    let summary = pipeline.run(&rx).unwrap();
    assert_eq!(summary.frames_drawn, 8);
    assert_eq!(summary.imports_failed, 0);
    assert!(summary.fps() > 0.0);
    assert_eq!(pipeline.state(), PipelineState::Stopped);
}

#[test]
fn decode_pipeline_streams_files_and_accepts_the_switch_command() {
    let dir = std::env::temp_dir();
    let primary = dir.join(format!("dmatex-test-primary-{}.png", std::process::id()));
    let secondary = dir.join(format!("dmatex-test-secondary-{}.png", std::process::id()));
    image::RgbaImage::from_pixel(16, 16, image::Rgba([255, 0, 0, 255]))
        .save(&primary)
        .unwrap();
    image::RgbaImage::from_pixel(16, 16, image::Rgba([0, 0, 255, 255]))
        .save(&secondary)
        .unwrap();

    let mut pipeline = Pipeline::new(PipelineConfig {
        size: PhysicalSize::new(16, 16),
        backend: BackendKind::Software,
        producer: ProducerKind::Decode,
        sources: vec![primary.clone(), secondary.clone()],
        frames: Some(12),
        fps: 240,
        startup_timeout: Duration::from_secs(2),
        ..PipelineConfig::default()
    });
    pipeline.init().unwrap();

    let (tx, rx) = crossbeam_channel::unbounded();
    tx.send(PipelineCommand::UseSecondary).unwrap();
    let summary = pipeline.run(&rx).unwrap();
    assert_eq!(summary.frames_drawn, 12);
    assert!(summary.frames_produced >= 1);

    let _ = std::fs::remove_file(&primary);
    let _ = std::fs::remove_file(&secondary);
}
