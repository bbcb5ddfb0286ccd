//! WiZ `setPilot` wire command.
//!
//! Field names and shapes are the bulb firmware's contract and must not
//! change: `{"method":"setPilot","params":{"r":..,"g":..,"b":..,"dimming":..}}`
//! or `{"method":"setPilot","params":{"state":false}}`.

use serde::Serialize;

use super::color::Rgb;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PilotCommand {
    method: &'static str,
    params: PilotParams,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
enum PilotParams {
    Color { r: u8, g: u8, b: u8, dimming: u8 },
    Power { state: bool },
}

impl PilotCommand {
    pub fn set_color(color: Rgb, dimming: i32) -> Self {
        Self {
            method: "setPilot",
            params: PilotParams::Color {
                r: color[0].clamp(0, 255) as u8,
                g: color[1].clamp(0, 255) as u8,
                b: color[2].clamp(0, 255) as u8,
                dimming: dimming.clamp(0, 255) as u8,
            },
        }
    }

    pub fn power_off() -> Self {
        Self {
            method: "setPilot",
            params: PilotParams::Power { state: false },
        }
    }

    pub fn encode(&self) -> serde_json::Result<Vec<u8>> {
        serde_json::to_vec(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn color_command_matches_firmware_contract() {
        let cmd = PilotCommand::set_color([255, 128, 0], 200);
        let json: serde_json::Value =
            serde_json::from_slice(&cmd.encode().unwrap()).unwrap();
        assert_eq!(json["method"], "setPilot");
        assert_eq!(json["params"]["r"], 255);
        assert_eq!(json["params"]["g"], 128);
        assert_eq!(json["params"]["b"], 0);
        assert_eq!(json["params"]["dimming"], 200);
    }

    #[test]
    fn power_off_command_carries_only_state() {
        let cmd = PilotCommand::power_off();
        let text = String::from_utf8(cmd.encode().unwrap()).unwrap();
        assert_eq!(text, r#"{"method":"setPilot","params":{"state":false}}"#);
    }

    #[test]
    fn out_of_range_channels_clamped_at_construction() {
        let cmd = PilotCommand::set_color([-50, 999, 12], 400);
        let json: serde_json::Value =
            serde_json::from_slice(&cmd.encode().unwrap()).unwrap();
        assert_eq!(json["params"]["r"], 0);
        assert_eq!(json["params"]["g"], 255);
        assert_eq!(json["params"]["b"], 12);
        assert_eq!(json["params"]["dimming"], 255);
    }
}
