// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Canned channel profiles for common device families.
//!
//! Used by the device simulator and tests; real firmware builds its own
//! channels from hardware capabilities.

use super::{Channel, NumberSpec, Parameter};

/// Full wireless-receiver input strip: preamp controls, RF controls, and
/// the locked sensor set.
#[must_use]
pub fn wireless_receiver_channel() -> Channel {
    Channel::new()
        .with("gain", Parameter::number(0.0, NumberSpec::db(Some(1.0), -5.0, 50.0)))
        .with(
            "pad",
            Parameter::boolean(false).with_aux("padLevel", serde_json::json!(-10)),
        )
        .with("lowcut", Parameter::number(0.0, NumberSpec::hz(Some(1.0), 0.0, 100.0)))
        .with("lowcutEnable", Parameter::boolean(false))
        .with("polarity", Parameter::boolean(false))
        .with("phantomPower", Parameter::boolean(false))
        .with("rfEnable", Parameter::boolean(true))
        .with(
            "transmitPower",
            Parameter::enumeration("high", &["low", "medium", "high"]),
        )
        .with("transmitterConnected", Parameter::boolean(true).locked())
        .with("squelch", Parameter::number(-60.0, NumberSpec::db(Some(1.0), -80.0, -20.0)))
        .with("subDevice", Parameter::text("handheld").locked())
        .with(
            "audioLevel",
            Parameter::number(-20.5, NumberSpec::db(None, -120.0, 0.0)).locked(),
        )
        .with(
            "rfLevel",
            Parameter::number(-45.2, NumberSpec::db(None, -120.0, 0.0)).locked(),
        )
        .with("batteryLevel", Parameter::number(85.0, NumberSpec::percent()).locked())
}

/// Minimal stage-box input strip: preamp controls plus the audio meter.
#[must_use]
pub fn stage_box_channel() -> Channel {
    Channel::new()
        .with("gain", Parameter::number(0.0, NumberSpec::db(Some(1.0), -5.0, 50.0)))
        .with(
            "pad",
            Parameter::boolean(false).with_aux("padLevel", serde_json::json!(-20)),
        )
        .with("lowcut", Parameter::number(0.0, NumberSpec::hz(Some(1.0), 0.0, 100.0)))
        .with("phantomPower", Parameter::boolean(false))
        .with(
            "audioLevel",
            Parameter::number(-60.0, NumberSpec::db(None, -120.0, 0.0)).locked(),
        )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ParamKind;

    #[test]
    fn test_wireless_receiver_profile_shape() {
        let channel = wireless_receiver_channel();
        assert_eq!(channel.len(), 14);

        let battery = channel.get("batteryLevel").expect("batteryLevel");
        assert!(battery.locked && battery.continuous);
        match &battery.kind {
            ParamKind::Number(spec) => {
                assert_eq!(spec.unit.as_deref(), Some("%"));
                assert_eq!((spec.min_value, spec.max_value), (0.0, 100.0));
            }
            other => panic!("batteryLevel should be numeric, got {:?}", other),
        }

        let pad = channel.get("pad").expect("pad");
        assert_eq!(pad.aux["padLevel"], serde_json::json!(-10));
    }

    #[test]
    fn test_stage_box_profile_shape() {
        let channel = stage_box_channel();
        assert!(channel.contains("gain"));
        assert!(channel.get("audioLevel").expect("audioLevel").continuous);
        assert!(!channel.contains("rfLevel"));
    }
}
