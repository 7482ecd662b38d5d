mod common;

use common::{FakeCapture, flight};
use radcal::{
    align::{Alignment, WarpMatrix, WarpMode},
    batch::{BatchExecutor, BatchOptions, OutputLayout, Outcome},
    irradiance::Irradiance,
};
use rstest::rstest;
use std::fs;

fn layout() -> (tempfile::TempDir, OutputLayout) {
    let dir = tempfile::tempdir().expect("temp dir");
    let layout = OutputLayout::new(dir.path());
    layout.create_dirs(true).expect("creatable");
    (dir, layout)
}

#[test]
fn output_layout() {
    let layout = OutputLayout::new("out");

    assert_eq!(layout.stack_path("abc"), std::path::Path::new("out/stacks/abc.tif"));
    assert_eq!(
        layout.thumbnail_path("abc"),
        std::path::Path::new("out/thumbnail/abc.jpg")
    );
    assert_eq!(layout.ledger_path(), std::path::Path::new("out/stacks/log.csv"));
    assert_eq!(
        layout.warp_matrices_path(),
        std::path::Path::new("out/stacks/warp_matrices.txt")
    );
}

#[test]
fn existing_stack_is_checked_before_band_count() {
    let (_dir, layout) = layout();
    let alignment = Alignment::identity(5, 1);
    let executor = BatchExecutor::new(&layout, None, &alignment, BatchOptions::default());
    fs::write(layout.stack_path("odd"), b"").expect("writable");

    let mut capture = FakeCapture::flight("odd", 3);
    assert!(matches!(executor.process(&mut capture, 5), Outcome::Exists(_)));
    assert_eq!(capture.calibrations, 0);
}

#[rstest]
#[case(4)]
#[case(6)]
fn band_mismatch_is_skipped(#[case] bands: usize) {
    let (_dir, layout) = layout();
    let alignment = Alignment::identity(5, 1);
    let executor = BatchExecutor::new(&layout, None, &alignment, BatchOptions::default());

    let mut capture = FakeCapture::flight("odd", bands);
    assert!(matches!(
        executor.process(&mut capture, 5),
        Outcome::BandMismatch { expected: 5, found } if found == bands
    ));
    assert!(!layout.stack_path("odd").exists());
    assert!(!layout.thumbnail_path("odd").exists());
}

#[test]
fn calibrated_capture_writes_both_outputs() {
    let (_dir, layout) = layout();
    let alignment = Alignment::identity(5, 1);
    let irradiance = Irradiance::new(vec![1., 2., 3., 4., 5.]);
    let executor =
        BatchExecutor::new(&layout, Some(&irradiance), &alignment, BatchOptions::default());

    let mut capture = FakeCapture::flight("cap", 5);
    capture.loaded = true;
    let outcome = executor.process(&mut capture, 5);

    match outcome {
        Outcome::Calibrated { stack, thumbnail } => {
            assert_eq!(stack, layout.stack_path("cap"));
            assert_eq!(thumbnail, Some(layout.thumbnail_path("cap")));
            assert_eq!(
                fs::read_to_string(thumbnail.expect("enabled")).expect("readable"),
                "cap [2, 1, 0]"
            );
        }
        other => panic!("unexpected outcome {other:?}"),
    }
    assert_eq!(executor.irradiance(), Some([1., 2., 3., 4., 5., 0.].as_slice()));
    assert!(!capture.loaded);
}

#[test]
fn failed_preview_leaves_no_stack_behind() {
    let (_dir, layout) = layout();
    // Band 2 did not converge but is the red channel of the preview.
    let alignment = Alignment::new(
        WarpMode::Translation,
        1,
        "cap",
        vec![WarpMatrix::identity(); 5],
        &[0, 1, 3, 4],
    );
    let executor = BatchExecutor::new(&layout, None, &alignment, BatchOptions::default());
    let mut capture = FakeCapture::flight("cap", 5);

    for _ in 0..2 {
        assert!(matches!(executor.process(&mut capture, 5), Outcome::Failed(_)));
        assert!(!layout.stack_path("cap").exists());
        assert!(!layout.stack_path("cap").with_extension("tif.partial").exists());
    }
    assert_eq!(capture.calibrations, 2);

    let options = BatchOptions {
        thumbnails: false,
        ..BatchOptions::default()
    };
    let executor = BatchExecutor::new(&layout, None, &alignment, options);
    assert!(matches!(executor.process(&mut capture, 5), Outcome::Calibrated { .. }));
    assert_eq!(
        fs::read_to_string(layout.stack_path("cap")).expect("readable"),
        "cap [0, 1, 3, 4]"
    );
}

#[test]
fn canonical_band_count_comes_from_first_capture() {
    let (_dir, layout) = layout();
    let alignment = Alignment::identity(4, 1);
    let executor = BatchExecutor::new(&layout, None, &alignment, BatchOptions::default());

    let mut captures = vec![
        FakeCapture::flight("a", 4),
        FakeCapture::flight("b", 5),
        FakeCapture::flight("c", 4),
    ];
    let report = executor.run(&mut captures);

    assert_eq!(report.len(), 3);
    assert_eq!(report.calibrated(), 2);
    assert_eq!(report.mismatched(), 1);
    assert!(matches!(report.outcomes[1].1, Outcome::BandMismatch { expected: 4, found: 5 }));
}

#[test]
fn empty_batch_has_empty_report() {
    let (_dir, layout) = layout();
    let alignment = Alignment::identity(5, 1);
    let executor = BatchExecutor::new(&layout, None, &alignment, BatchOptions::default());

    assert!(executor.run::<FakeCapture>(&mut []).is_empty());
    assert!(executor.par_run::<FakeCapture>(&mut []).is_empty());
}

#[test]
fn parallel_batch_releases_every_capture() {
    let (_dir, layout) = layout();
    let alignment = Alignment::identity(5, 1);
    let executor = BatchExecutor::new(&layout, None, &alignment, BatchOptions::default());

    let mut captures = flight(16);
    captures.iter_mut().for_each(|capture| capture.loaded = true);
    let report = executor.par_run(&mut captures);

    assert_eq!(report.calibrated(), 16);
    assert!(captures.iter().all(|capture| !capture.loaded));
    for (i, (id, _)) in report.outcomes.iter().enumerate() {
        assert_eq!(id, &format!("cap{i:02}"));
    }
}
