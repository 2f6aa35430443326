/// Integration tests for IPC communication
/// These tests verify that commands and responses serialize correctly
/// and can be sent over IPC boundaries
use common::{
    BackdropError, ClipId, Command, ControllerStatus, DaemonStatus, Response, SlotStatus,
    TransitionPhase,
};

fn sample_status() -> ControllerStatus {
    ControllerStatus {
        phase: TransitionPhase::Transitioning,
        trigger_mode: "complete-clip".to_string(),
        crossfade_secs: 1.3,
        playlist_index: 7,
        playlist_len: 25,
        current_clip: Some(ClipId::new("/srv/bg/bg_02.mp4")),
        next_clip: Some(ClipId::new("/srv/bg/bg_04.mp4")),
        completed_transitions: 7,
        consecutive_failures: 0,
        showing_poster: false,
        poster: Some("/srv/bg/bg-poster.jpg".to_string()),
        resident: 3,
        loading: 1,
        max_resident: 3,
        warming_up: false,
        max_opacity: 0.3,
        slots: vec![
            SlotStatus {
                label: "a".to_string(),
                role: "current".to_string(),
                clip: Some(ClipId::new("/srv/bg/bg_02.mp4")),
                state: "fading-out".to_string(),
                opacity: 0.25,
                z_index: -998,
            },
            SlotStatus {
                label: "b".to_string(),
                role: "next".to_string(),
                clip: Some(ClipId::new("/srv/bg/bg_04.mp4")),
                state: "fading-in".to_string(),
                opacity: 0.75,
                z_index: -999,
            },
        ],
    }
}

#[test]
fn test_control_commands_roundtrip() {
    for command in [
        Command::Ping,
        Command::Query,
        Command::ListClips,
        Command::Skip,
        Command::Resume,
        Command::Kill,
    ] {
        let json = serde_json::to_string(&command).unwrap();
        let deserialized: Command = serde_json::from_str(&json).unwrap();
        assert_eq!(format!("{:?}", deserialized), format!("{:?}", command));
    }
}

#[test]
fn test_status_response_roundtrip() {
    let response = Response::Status(DaemonStatus {
        version: "0.1.0".to_string(),
        uptime_secs: 3600,
        backend: "simulated".to_string(),
        controller: Some(sample_status()),
    });

    let json = serde_json::to_string(&response).unwrap();
    let deserialized: Response = serde_json::from_str(&json).unwrap();

    match deserialized {
        Response::Status(status) => {
            assert_eq!(status.backend, "simulated");
            let controller = status.controller.unwrap();
            assert_eq!(controller.phase, TransitionPhase::Transitioning);
            assert_eq!(controller.playlist_index, 7);
            assert_eq!(controller.slots.len(), 2);
            assert!(!controller.warming_up);
            assert_eq!(controller.max_opacity, 0.3);
            let total: f32 = controller.slots.iter().map(|s| s.opacity).sum();
            assert!((total - 1.0).abs() < 1e-6);
        }
        _ => panic!("Wrong response type"),
    }
}

#[test]
fn test_clip_ids_serialize_as_strings() {
    let response = Response::Clips(vec![ClipId::new("bg_01.mp4"), ClipId::new("bg_02.mp4")]);
    let json = serde_json::to_string(&response).unwrap();
    assert_eq!(json, r#"{"Clips":["bg_01.mp4","bg_02.mp4"]}"#);
}

#[test]
fn test_error_response() {
    let response = Response::Error(BackdropError::Media(
        "Playback is running; nothing to resume".to_string(),
    ));
    let json = serde_json::to_string(&response).unwrap();
    let deserialized: Response = serde_json::from_str(&json).unwrap();

    match deserialized {
        Response::Error(e) => assert!(e.to_string().contains("nothing to resume")),
        _ => panic!("Wrong response type"),
    }
}

#[test]
fn test_status_before_first_tick() {
    let json = r#"{"Status":{"version":"0.1.0","uptime_secs":0,"backend":"gstreamer","controller":null}}"#;
    let response: Response = serde_json::from_str(json).unwrap();
    assert!(matches!(
        response,
        Response::Status(DaemonStatus { controller: None, .. })
    ));
}

#[test]
fn test_invalid_command_rejected() {
    assert!(serde_json::from_str::<Command>(r#""PlaylistNext""#).is_err());
}
