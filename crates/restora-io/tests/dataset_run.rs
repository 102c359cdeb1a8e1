//! End-to-end dataset runs against temporary directories.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::path::{Path, PathBuf};
use std::sync::Arc;

use restora_io::{Dataset, DirectoryReporter, ExternalCommand, ExternalStage, write_png};
use restora_pipeline::{
    BaselineLoader, DegradationSpec, DynamicImage, Mode, ModelLoader, ModeParams, NoiseLevel,
    Orchestrator, PipelineError, PipelineRequest, RgbImage, SeedPolicy, StageError, StageRegistry,
    run_dataset,
};

fn textured(seed: u32) -> DynamicImage {
    DynamicImage::ImageRgb8(RgbImage::from_fn(24, 20, |x, y| {
        let v = (x * 11 + y * 7 + seed * 31) % 256;
        image::Rgb([v as u8, (255 - v) as u8, ((x * y) % 256) as u8])
    }))
}

/// Clean images that double as their own references.
fn write_dataset(root: &Path) -> PathBuf {
    let hq = root.join("hq");
    std::fs::create_dir_all(&hq).unwrap();
    for (i, name) in ["b.png", "a.png"].into_iter().enumerate() {
        write_png(&hq.join(name), &textured(i as u32)).unwrap();
    }
    hq
}

fn builtin() -> StageRegistry {
    let loader: Arc<dyn ModelLoader> = Arc::new(BaselineLoader);
    StageRegistry::builtin(&loader)
}

#[test]
fn denoising_run_writes_images_and_log() {
    let root = tempfile::tempdir().unwrap();
    let clean = write_dataset(root.path());
    let items = Dataset::discover(&clean, Some(&clean))
        .unwrap()
        .load()
        .unwrap();
    assert_eq!(items[0].name, "a.png");

    let template = PipelineRequest::from_mode_names(["Denoising"], false)
        .unwrap()
        .with_degradation(DegradationSpec {
            noise_level: NoiseLevel::new(15).unwrap(),
            clip: false,
            seed: SeedPolicy::PerImage { base: 7 },
        });
    let out = root.path().join("results/denoise");
    let mut reporter = DirectoryReporter::create(&out, "denoise").unwrap();
    let report = run_dataset(
        &Orchestrator::new(builtin()),
        &template,
        items,
        "denoise",
        &mut reporter,
    )
    .unwrap();

    assert!(out.join("a_00_dn_median_color_s30.png").is_file());
    assert!(out.join("b_00_dn_median_color_s30.png").is_file());
    let log = std::fs::read_to_string(out.join("denoise.log")).unwrap();
    let lines: Vec<&str> = log.lines().collect();
    assert_eq!(lines.len(), 3);
    assert!(lines[0].starts_with("a.png - PSNR: "));
    assert!(lines[2].starts_with("Average PSNR/SSIM - denoise_dn_median_color_s30 - PSNR: "));

    let summary = report.steps().next().unwrap();
    assert_eq!(summary.samples.len(), 2);
    for sample in &summary.samples {
        assert!(sample.psnr.is_finite() && sample.psnr > 10.0);
        assert!(sample.ssim > 0.0 && sample.ssim < 1.0);
    }
}

#[test]
fn chained_super_resolution_crops_scale_border() {
    let root = tempfile::tempdir().unwrap();
    let lq = root.path().join("lq");
    let hq = root.path().join("hq");
    std::fs::create_dir_all(&lq).unwrap();
    std::fs::create_dir_all(&hq).unwrap();
    let high = textured(3);
    write_png(&hq.join("x.png"), &high).unwrap();
    write_png(
        &lq.join("x.png"),
        &high.resize_exact(12, 10, image::imageops::FilterType::Triangle),
    )
    .unwrap();

    let items = Dataset::discover(&lq, Some(&hq)).unwrap().load().unwrap();
    let template = PipelineRequest::from_mode_names(["SuperResolution", "Deblocking"], true).unwrap();
    let out = root.path().join("sr");
    let mut reporter = DirectoryReporter::create(&out, "sr").unwrap();
    let report = run_dataset(
        &Orchestrator::new(builtin()),
        &template,
        items,
        "sr",
        &mut reporter,
    )
    .unwrap();

    assert!(out.join("x_00_sr_x2_psnr.png").is_file());
    assert!(out.join("x_01_db_gaussian.png").is_file());
    let borders: Vec<u32> = report
        .steps()
        .map(|s| s.samples[0].border)
        .collect();
    assert_eq!(borders, vec![2, 0]);
}

#[cfg(unix)]
#[test]
fn external_stage_failure_keeps_earlier_outputs_and_log() {
    let root = tempfile::tempdir().unwrap();
    let clean = write_dataset(root.path());
    let items = Dataset::discover(&clean, None).unwrap().load().unwrap();

    let mut registry = builtin();
    registry.replace(
        Mode::Deblocking,
        Box::new(ExternalStage::new(
            Mode::Deblocking,
            ExternalCommand {
                program: "false".into(),
                args: Vec::new(),
                weights: None,
            },
        )),
    );
    let out = root.path().join("fail");
    let mut reporter = DirectoryReporter::create(&out, "fail").unwrap();
    let err = run_dataset(
        &Orchestrator::new(registry),
        &PipelineRequest::from_mode_names(["SuperResolution", "Deblocking"], false)
            .unwrap()
            .with_params(ModeParams::default()),
        items,
        "fail",
        &mut reporter,
    )
    .unwrap_err();

    assert!(matches!(
        err,
        PipelineError::Stage {
            step: 1,
            mode: Mode::Deblocking,
            source: StageError::External { .. },
            ..
        }
    ));
    assert_eq!(reporter.written(), 1);
    assert!(out.join("a_00_sr_x2_psnr.png").is_file());
    assert!(!out.join("b_00_sr_x2_psnr.png").exists());
    assert!(out.join("fail.log").is_file());
}
