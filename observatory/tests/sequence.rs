//! Imaging sequences against a recording INDI bus and a mock guider.


use std::path::Path;
use std::sync::Arc;

use hardware::devices::mock::{MockBus, SentCommand};
use hardware::indi::{IndiError, SwitchState};
use hardware::phd2::mock::{GuiderCall, MockGuider};
use observatory::config::DitherMode;
use observatory::{Command, ObservatoryError, Outcome, SequenceReport, SequenceRequest};
use test_helpers::{mount_site, observatory, test_config, Answer, HIGH_TARGET, LOW_TARGET};

const FITS: &[u8] = b"SIMPLE  =                    T";

fn request(base: &Path, target: &str, count: u32) -> Command {
    Command::Sequence(SequenceRequest {
        target: target.to_string(),
        base_directory: base.to_path_buf(),
        filter_name: "R".to_string(),
        exposure_count: count,
        exposure_time: 0.5,
        slew: true,
    })
}

fn camera_bus() -> Arc<MockBus> {
    Arc::new(
        MockBus::new()
            .with_property(mount_site())
            .with_exposure_blob(FITS.to_vec()),
    )
}

fn report(outcome: Outcome) -> SequenceReport {
    match outcome {
        Outcome::Sequence(report) => report,
        other => panic!("expected a sequence report, got {other:?}"),
    }
}

/// Elements switched on for manual motion, in order.
fn motion_pulses(bus: &MockBus) -> Vec<String> {
    bus.sent()
        .into_iter()
        .filter_map(|cmd| match cmd {
            SentCommand::Switch {
                property, elements, ..
            } if property.starts_with("TELESCOPE_MOTION") && elements[0].1 == SwitchState::On => {
                Some(elements[0].0.clone())
            }
            _ => None,
        })
        .collect()
}

#[test]
fn test_guided_sequence_with_mount_dither() {
    let base = tempfile::tempdir().unwrap();
    let bus = camera_bus();
    let guider = Arc::new(MockGuider::new());
    let obs = observatory(bus.clone(), test_config()).with_guider(guider.clone());

    let report = report(obs.execute(&request(base.path(), HIGH_TARGET, 3)).unwrap());

    let dir_name = report.directory.file_name().unwrap().to_string_lossy().to_string();
    assert!(dir_name.starts_with("Polar_Test_Star_"), "{dir_name}");
    assert!(dir_name.ends_with("UT"));
    assert_eq!(report.directory.parent(), Some(base.path()));

    assert_eq!(report.images.len(), 3);
    for (index, image) in report.images.iter().enumerate() {
        let name = image.file_name().unwrap().to_string_lossy().to_string();
        assert!(name.starts_with("R_"), "{name}");
        assert!(name.ends_with(&format!("UT_{:04}.fits", index + 1)), "{name}");
        assert_eq!(std::fs::read(image).unwrap(), FITS);
    }

    assert_eq!(
        guider.calls(),
        vec![
            GuiderCall::SetDecGuideMode("Auto".to_string()),
            GuiderCall::Start,
            GuiderCall::Stop
        ]
    );

    // slew before imaging, filter selected once, one dither between frames
    assert_eq!(bus.sent_to("EQUATORIAL_EOD_COORD").len(), 1);
    let filter = bus.sent_to("FILTER_SLOT");
    assert_eq!(filter.len(), 1);
    assert!(matches!(&filter[0], SentCommand::Number { elements, .. } if elements[0].1 == 2.0));
    assert_eq!(
        motion_pulses(&bus),
        vec!["MOTION_NORTH", "MOTION_WEST", "MOTION_SOUTH", "MOTION_EAST"]
    );
}

#[test]
fn test_guider_dither_mode() {
    let base = tempfile::tempdir().unwrap();
    let bus = camera_bus();
    let guider = Arc::new(MockGuider::new());
    let mut config = test_config();
    config.dither.mode = DitherMode::Guider;
    let obs = observatory(bus.clone(), config).with_guider(guider.clone());

    report(obs.execute(&request(base.path(), HIGH_TARGET, 3)).unwrap());

    let dithers: Vec<GuiderCall> = guider
        .calls()
        .into_iter()
        .filter(|call| matches!(call, GuiderCall::Dither(_)))
        .collect();
    assert_eq!(dithers, vec![GuiderCall::Dither(3.0), GuiderCall::Dither(3.0)]);
    assert!(motion_pulses(&bus).is_empty());
}

#[test]
fn test_single_frame_never_dithers() {
    let base = tempfile::tempdir().unwrap();
    let bus = camera_bus();
    let obs = observatory(bus.clone(), test_config());

    let report = report(obs.execute(&request(base.path(), HIGH_TARGET, 1)).unwrap());

    assert_eq!(report.images.len(), 1);
    assert!(motion_pulses(&bus).is_empty());
}

#[test]
fn test_guiding_stopped_after_camera_failure() {
    let base = tempfile::tempdir().unwrap();
    let bus = Arc::new(
        MockBus::new()
            .with_property(mount_site())
            .with_alert("ZWO CCD ASI183MM Pro", "CCD_EXPOSURE"),
    );
    let guider = Arc::new(MockGuider::new());
    let obs = observatory(bus, test_config()).with_guider(guider.clone());

    let err = obs
        .execute(&request(base.path(), HIGH_TARGET, 2))
        .unwrap_err();

    assert!(matches!(err, ObservatoryError::Indi(IndiError::PropertyAlert { .. })));
    assert_eq!(guider.calls().last(), Some(&GuiderCall::Stop));
}

#[test]
fn test_required_guiding_failure_aborts() {
    let base = tempfile::tempdir().unwrap();
    let bus = camera_bus();
    let mut config = test_config();
    config.guiding.required = true;
    let obs = observatory(bus.clone(), config).with_guider(Arc::new(MockGuider::failing_start()));

    let err = obs
        .execute(&request(base.path(), HIGH_TARGET, 2))
        .unwrap_err();

    assert!(matches!(err, ObservatoryError::Guider(_)));
    assert!(bus.sent_to("CCD_EXPOSURE").is_empty());
}

#[test]
fn test_required_guiding_without_guider() {
    let base = tempfile::tempdir().unwrap();
    let mut config = test_config();
    config.guiding.required = true;
    let obs = observatory(camera_bus(), config);

    assert!(matches!(
        obs.execute(&request(base.path(), HIGH_TARGET, 1)),
        Err(ObservatoryError::Guider(_))
    ));
}

#[test]
fn test_optional_guiding_failure_images_unguided() {
    let base = tempfile::tempdir().unwrap();
    let bus = camera_bus();
    let guider = Arc::new(MockGuider::failing_start());
    let obs = observatory(bus, test_config()).with_guider(guider.clone());

    let report = report(obs.execute(&request(base.path(), HIGH_TARGET, 2)).unwrap());

    assert_eq!(report.images.len(), 2);
    assert_eq!(
        guider.calls(),
        vec![
            GuiderCall::SetDecGuideMode("Auto".to_string()),
            GuiderCall::Start,
            GuiderCall::Stop
        ]
    );
}

#[test]
fn test_rejected_before_touching_hardware() {
    let base = tempfile::tempdir().unwrap();
    let bus = camera_bus();
    let obs = observatory(bus.clone(), test_config());

    let unknown_filter = Command::Sequence(SequenceRequest {
        filter_name: "Ha".to_string(),
        ..match request(base.path(), HIGH_TARGET, 1) {
            Command::Sequence(request) => request,
            _ => unreachable!(),
        }
    });
    assert!(matches!(
        obs.execute(&unknown_filter),
        Err(ObservatoryError::UnknownFilter { .. })
    ));
    assert!(matches!(
        obs.execute(&request(base.path(), HIGH_TARGET, 0)),
        Err(ObservatoryError::InvalidParameter(_))
    ));
    assert!(bus.sent().is_empty());
}

#[test]
fn test_low_altitude_declined() {
    let base = tempfile::tempdir().unwrap();
    let bus = camera_bus();
    let guider = Arc::new(MockGuider::new());
    let obs = observatory(bus.clone(), test_config())
        .with_guider(guider.clone())
        .with_confirm(Box::new(Answer(false)));

    let outcome = obs.execute(&request(base.path(), LOW_TARGET, 3)).unwrap();

    assert_eq!(outcome, Outcome::Aborted);
    assert!(bus.sent().is_empty());
    assert!(guider.calls().is_empty());
    assert_eq!(std::fs::read_dir(base.path()).unwrap().count(), 0);
}
