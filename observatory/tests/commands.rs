//! Single commands against a recording INDI bus.


use std::sync::Arc;

use hardware::devices::mock::{MockBus, SentCommand};
use hardware::devices::FocusDirection;
use hardware::indi::{IndiError, SwitchState};
use observatory::plan::{parse_plan, run_plan};
use observatory::{Command, ObservatoryError, Outcome};
use test_helpers::{mount_site, observatory, test_config, Answer, HIGH_TARGET, LOW_TARGET, MOUNT};

fn switch(element: &str, state: SwitchState) -> (String, SwitchState) {
    (element.to_string(), state)
}

#[test]
fn test_set_light_off() {
    let bus = Arc::new(MockBus::new());
    let obs = observatory(bus.clone(), test_config());

    let outcome = obs
        .execute(&Command::SetLight {
            state: "off".to_string(),
        })
        .unwrap();

    assert_eq!(outcome, Outcome::Done);
    assert_eq!(
        bus.sent(),
        vec![SentCommand::Switch {
            device: "Red Light".to_string(),
            property: "LIGHT_STATE".to_string(),
            elements: vec![
                switch("LIGHT_OFF", SwitchState::On),
                switch("LIGHT_ON", SwitchState::Off),
            ],
        }]
    );
}

#[test]
fn test_cover_and_roof_states() {
    let bus = Arc::new(MockBus::new());
    let obs = observatory(bus.clone(), test_config());

    obs.execute(&Command::TelescopeCover {
        state: "Open".to_string(),
    })
    .unwrap();
    obs.execute(&Command::Roof {
        state: "closed".to_string(),
    })
    .unwrap();

    let sent = bus.sent();
    assert!(matches!(&sent[0], SentCommand::Switch { device, elements, .. }
        if device == "Telescope Cover" && elements.contains(&switch("COVER_OPEN", SwitchState::On))));
    assert!(matches!(&sent[1], SentCommand::Switch { device, elements, .. }
        if device == "Observatory Roof" && elements.contains(&switch("ROOF_CLOSED", SwitchState::On))));
}

#[test]
fn test_unknown_accessory_state_sends_nothing() {
    let bus = Arc::new(MockBus::new());
    let obs = observatory(bus.clone(), test_config());

    let err = obs
        .execute(&Command::Roof {
            state: "ajar".to_string(),
        })
        .unwrap_err();

    assert!(matches!(err, ObservatoryError::Indi(IndiError::InvalidArgument(_))));
    assert!(err.to_string().contains("closed, open"));
    assert!(bus.sent().is_empty());
}

#[test]
fn test_target_slews_in_hours() {
    let bus = Arc::new(MockBus::new().with_property(mount_site()));
    let obs = observatory(bus.clone(), test_config());

    let outcome = obs
        .execute(&Command::Target {
            target_name: HIGH_TARGET.to_string(),
        })
        .unwrap();

    assert_eq!(outcome, Outcome::Done);
    let coords = bus.sent_to("EQUATORIAL_EOD_COORD");
    let [SentCommand::Number { elements, .. }] = coords.as_slice() else {
        panic!("expected one coordinate command, got {coords:?}");
    };
    let ra_hours = elements[0].1;
    // 120° J2000 is 8h, moved a little by precession
    assert!((ra_hours - 8.0).abs() < 0.1, "RA {ra_hours}h");
    assert!((elements[1].1 - 75.0).abs() < 0.5);
}

#[test]
fn test_low_target_declined() {
    let bus = Arc::new(MockBus::new().with_property(mount_site()));
    let obs = observatory(bus.clone(), test_config()).with_confirm(Box::new(Answer(false)));

    let outcome = obs
        .execute(&Command::Target {
            target_name: LOW_TARGET.to_string(),
        })
        .unwrap();

    assert_eq!(outcome, Outcome::Aborted);
    assert!(bus.sent().is_empty());
}

#[test]
fn test_low_target_accepted() {
    let bus = Arc::new(MockBus::new().with_property(mount_site()));
    let obs = observatory(bus.clone(), test_config()).with_confirm(Box::new(Answer(true)));

    obs.execute(&Command::Target {
        target_name: LOW_TARGET.to_string(),
    })
    .unwrap();

    assert_eq!(bus.sent_to("EQUATORIAL_EOD_COORD").len(), 1);
}

#[test]
fn test_site_falls_back_to_config() {
    let bus = Arc::new(MockBus::new());
    let obs = observatory(bus.clone(), test_config());
    assert!(matches!(
        obs.execute(&Command::Target {
            target_name: HIGH_TARGET.to_string()
        }),
        Err(ObservatoryError::NoSite)
    ));

    let mut config = test_config();
    config.site = Some(ephemeris::ObserverSite::new(60.0, 10.0, 0.0));
    let obs = observatory(bus.clone(), config);
    let site = obs.site().unwrap();
    assert_eq!(site.latitude_deg, 60.0);
    assert!(obs
        .execute(&Command::Target {
            target_name: HIGH_TARGET.to_string()
        })
        .is_ok());
}

#[test]
fn test_unknown_target() {
    let bus = Arc::new(MockBus::new().with_property(mount_site()));
    let obs = observatory(bus.clone(), test_config());
    let err = obs
        .execute(&Command::Target {
            target_name: "Nowhere".to_string(),
        })
        .unwrap_err();
    assert!(matches!(err, ObservatoryError::Ephemeris(ephemeris::EphemerisError::ObjectNotFound(_))));
    assert!(bus.sent().is_empty());
}

#[test]
fn test_focus_uses_configured_defaults() {
    let bus = Arc::new(MockBus::new());
    let obs = observatory(bus.clone(), test_config());

    obs.execute(&Command::Focus {
        direction: None,
        steps: None,
    })
    .unwrap();
    obs.execute(&Command::Focus {
        direction: Some(FocusDirection::Inward),
        steps: Some(25),
    })
    .unwrap();

    let motion = bus.sent_to("FOCUS_MOTION");
    assert!(matches!(&motion[0], SentCommand::Switch { elements, .. }
        if elements.contains(&switch("FOCUS_OUTWARD", SwitchState::On))));
    assert!(matches!(&motion[1], SentCommand::Switch { elements, .. }
        if elements.contains(&switch("FOCUS_INWARD", SwitchState::On))));

    let steps: Vec<f64> = bus
        .sent_to("REL_FOCUS_POSITION")
        .into_iter()
        .filter_map(|cmd| match cmd {
            SentCommand::Number { elements, .. } => Some(elements[0].1),
            _ => None,
        })
        .collect();
    assert_eq!(steps, vec![100.0, 25.0]);
}

#[test]
fn test_show_missing_image() {
    let dir = tempfile::tempdir().unwrap();
    let obs = observatory(Arc::new(MockBus::new()), test_config());
    let err = obs
        .execute(&Command::ShowImage {
            directory: dir.path().to_path_buf(),
            image_name: "R_20240807_2230UT_0001".to_string(),
        })
        .unwrap_err();
    assert!(matches!(err, ObservatoryError::ImageNotFound(path)
        if path == dir.path().join("R_20240807_2230UT_0001.fits")));
}

#[test]
fn test_plan_stops_at_first_failure() {
    let commands = parse_plan(
        r#"[
            {"command": "roof", "state": "open"},
            {"command": "roof", "state": "ajar"},
            {"command": "set_light", "state": "on"}
        ]"#,
    )
    .unwrap();

    let bus = Arc::new(MockBus::new());
    let obs = observatory(bus.clone(), test_config());
    let summary = run_plan(&obs, &commands, false);
    assert!(!summary.succeeded());
    assert_eq!(summary.completed, 1);
    assert_eq!(summary.skipped, 1);
    assert_eq!(summary.failures[0].0, 2);
    assert!(bus.sent_to("LIGHT_STATE").is_empty());

    let bus = Arc::new(MockBus::new());
    let obs = observatory(bus.clone(), test_config());
    let summary = run_plan(&obs, &commands, true);
    assert_eq!(summary.completed, 2);
    assert_eq!(summary.failures.len(), 1);
    assert_eq!(bus.sent_to("LIGHT_STATE").len(), 1);
}

#[test]
fn test_mount_site_reported_by_driver() {
    let bus = Arc::new(MockBus::new().with_property(mount_site()));
    let obs = observatory(bus, test_config());
    let site = obs.site().unwrap();
    assert_eq!(site.longitude_deg, 10.0);
    assert_eq!(obs.mount().device(), MOUNT);
}

#[test]
fn test_mount_site_wins_over_config() {
    let bus = Arc::new(MockBus::new().with_property(mount_site()));
    let mut config = test_config();
    config.site = Some(ephemeris::ObserverSite::new(10.0, 20.0, 0.0));
    let obs = observatory(bus, config);
    let site = obs.site().unwrap();
    assert_eq!(site.latitude_deg, 60.0);
    assert_eq!(site.longitude_deg, 10.0);
}
