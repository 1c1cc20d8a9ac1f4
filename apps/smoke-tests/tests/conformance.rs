use std::fs;
use std::path::Path;

use anyhow::Result;
use image::{DynamicImage, ImageBuffer, Rgb};
use texcap_core::{
    run_batch, BatchSettings, Dimensions, EffectiveMethod, FailureReason, RequestedMethod,
    SavingsModel, TextureDescriptor,
};
use texcap_fs::{read_sidecar, LooseFileBackend};

fn write_sample_png(path: &Path, width: u32, height: u32) -> Result<()> {
    let img = ImageBuffer::from_fn(width, height, |x, y| {
        if (x + y) % 2 == 0 {
            Rgb([255, 255, 255])
        } else {
            Rgb([10, 10, 10])
        }
    });
    DynamicImage::ImageRgb8(img).save(path)?;
    Ok(())
}

fn descriptor(path: &Path, with_source: bool) -> Result<TextureDescriptor> {
    let (width, height) = image::image_dimensions(path)?;
    Ok(TextureDescriptor {
        name: path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default(),
        path: Some(path.to_path_buf()),
        source_path: with_source.then(|| path.to_path_buf()),
        dimensions: Dimensions::new(width, height),
    })
}

fn settings(target_cap: u32, apply: bool) -> BatchSettings {
    BatchSettings {
        target_cap,
        method: RequestedMethod::Auto,
        apply,
        savings: SavingsModel::default(),
    }
}

#[test]
fn plan_and_apply_agree_on_loose_files() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let diffuse = dir.path().join("rock_diffuse.png");
    let icon = dir.path().join("icon.png");
    write_sample_png(&diffuse, 64, 32)?;
    write_sample_png(&icon, 16, 16)?;
    let textures = vec![descriptor(&diffuse, true)?, descriptor(&icon, true)?];
    let backend = LooseFileBackend::default();

    let planned = run_batch(&backend, &textures, &settings(16, false), None)?;
    assert_eq!(planned.summary.processed, 2);
    assert_eq!(planned.summary.reduced, 1);
    let reduced = &planned.results[0].outcome;
    assert_eq!(reduced.method, EffectiveMethod::ProportionalResize);
    assert_eq!(reduced.final_dimensions, Dimensions::new(16, 8));
    assert!(matches!(
        planned.results[1].outcome.reason,
        Some(FailureReason::AlreadyWithinTarget { .. })
    ));
    // Dry run leaves every file as it was.
    assert_eq!(image::image_dimensions(&diffuse)?, (64, 32));

    let applied = run_batch(&backend, &textures, &settings(16, true), None)?;
    assert_eq!(applied.summary.reduced, 1);
    assert_eq!(image::image_dimensions(&diffuse)?, (16, 8));
    assert_eq!(image::image_dimensions(&icon)?, (16, 16));

    // A second pass over the reduced files finds nothing left to do.
    let textures = vec![descriptor(&diffuse, true)?, descriptor(&icon, true)?];
    let replanned = run_batch(&backend, &textures, &settings(16, false), None)?;
    assert_eq!(replanned.summary.reduced, 0);
    assert_eq!(replanned.summary.memory_saved_bytes, 0);
    Ok(())
}

#[test]
fn mip_bias_fallback_writes_a_sidecar() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let normal = dir.path().join("rock_normal.png");
    write_sample_png(&normal, 64, 32)?;
    let textures = vec![descriptor(&normal, false)?];
    let backend = LooseFileBackend::default();

    let before = fs::read(&normal)?;
    let report = run_batch(&backend, &textures, &settings(16, true), None)?;

    let outcome = &report.results[0].outcome;
    assert_eq!(outcome.method, EffectiveMethod::MipBias);
    assert_eq!(outcome.mip_bias_level, Some(2));
    assert_eq!(outcome.estimated_file_saved_bytes, 0);

    // The texture itself is untouched; the bias lives in the sidecar.
    assert_eq!(fs::read(&normal)?, before);
    let sidecar = read_sidecar(&normal)?;
    assert_eq!(sidecar.mip_bias_level, 2);
    assert_eq!(sidecar.effective_dimensions, Dimensions::new(16, 8));
    Ok(())
}

#[test]
fn apply_failures_keep_the_batch_alive() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let present = dir.path().join("rock_diffuse.png");
    write_sample_png(&present, 64, 32)?;
    let missing = dir.path().join("ghost.png");
    let mut broken = descriptor(&present, true)?;
    broken.name = "ghost".to_string();
    broken.path = Some(missing.clone());
    broken.source_path = Some(missing);
    let textures = vec![broken, descriptor(&present, true)?];
    let backend = LooseFileBackend::default();

    let report = run_batch(&backend, &textures, &settings(16, true), None)?;

    assert!(!report.results[0].outcome.succeeded);
    assert_eq!(
        report.results[0].outcome.reason,
        Some(FailureReason::SourceUnavailable)
    );
    assert!(report.results[1].outcome.succeeded);
    assert_eq!(image::image_dimensions(&present)?, (16, 8));
    Ok(())
}
