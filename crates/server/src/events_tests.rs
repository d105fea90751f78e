// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;

#[test]
fn connected_frame_matches_wire_contract() -> anyhow::Result<()> {
    let event = StreamEvent::Connected { channel: "ml_training_status".to_owned() };
    let json: serde_json::Value = serde_json::from_str(&serde_json::to_string(&event)?)?;
    assert_eq!(json["event"], "connected");
    assert_eq!(json["channel"], "ml_training_status");
    Ok(())
}

#[test]
fn sensor_update_is_snake_case_tagged() -> anyhow::Result<()> {
    let event = StreamEvent::SensorUpdate {
        cow_id: Uuid::nil(),
        device_id: "feeder-1".to_owned(),
        timestamp: Utc::now(),
        weight: Some(6.9),
        temperature_c: None,
    };
    let json: serde_json::Value = serde_json::from_str(&serde_json::to_string(&event)?)?;
    assert_eq!(json["event"], "sensor_update");
    assert_eq!(json["device_id"], "feeder-1");
    // Absent optionals are omitted, not null.
    assert!(json.get("temperature_c").is_none());
    Ok(())
}

#[test]
fn channel_key_names() {
    let cow = Uuid::new_v4();
    assert_eq!(ChannelKey::Animal(cow).name(), cow.to_string());
    assert_eq!(ChannelKey::System("global_alerts".into()).name(), "global_alerts");
}
