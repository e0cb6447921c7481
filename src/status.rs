//! Builds the documents the responder serves: the server-list status JSON
//! and disconnect reasons for join attempts. Pure functions of the lifecycle
//! snapshot and config, nothing here touches the network.

use serde::Serialize;

use crate::{
    config::StatusConfig,
    lifecycle::{Phase, Snapshot},
};

#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
pub struct StatusResponse {
    pub version: Version,
    pub players: Players,
    pub description: Description,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub favicon: Option<String>,
}

#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
pub struct Version {
    pub name: String,
    pub protocol: i32,
}

#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
pub struct Players {
    pub max: i32,
    pub online: i32,
}

#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
pub struct Description {
    pub text: String,
}

pub fn build_status(snapshot: &Snapshot, config: &StatusConfig) -> StatusResponse {
    let motd = match snapshot.phase {
        Phase::Stopped if snapshot.fault.is_some() => &config.motd_fault,
        Phase::Stopped | Phase::Stopping => &config.motd_asleep,
        Phase::Starting
        | Phase::AwaitingNetworkAddress
        | Phase::RebindingAddress
        | Phase::AwaitingBackingReady => &config.motd_starting,
        Phase::Active | Phase::Draining => &config.motd_running,
    };

    // nobody is ever "on" a hibernating server
    let (online, max) = match snapshot.phase {
        Phase::Active | Phase::Draining => (
            snapshot.occupancy.unwrap_or_default() as i32,
            config.max_players,
        ),
        _ => (0, 0),
    };

    StatusResponse {
        version: Version {
            name: config.version_name.clone(),
            protocol: config.protocol,
        },
        players: Players { max, online },
        description: Description {
            text: legacy_codes(motd),
        },
        favicon: config.favicon.clone(),
    }
}

#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
pub struct DisconnectReason {
    pub text: String,
}

pub fn build_disconnect(snapshot: &Snapshot, config: &StatusConfig) -> DisconnectReason {
    let text = if snapshot.phase == Phase::Stopped {
        &config.kick_asleep
    } else {
        &config.kick_starting
    };
    DisconnectReason {
        text: legacy_codes(text),
    }
}

/// `&` color codes become the section-sign form clients render. Line breaks
/// get a reset in front so colors don't bleed across lines.
pub fn legacy_codes(text: &str) -> String {
    text.replace('\n', "&r\n").replace('&', "\u{a7}")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snapshot(phase: Phase) -> Snapshot {
        Snapshot {
            phase,
            instance_id: "i-mc".to_string(),
            public_address: "203.0.113.9".parse().unwrap(),
            occupancy: None,
            fault: None,
        }
    }

    #[test]
    fn test_color_codes_are_translated() {
        assert_eq!(legacy_codes("&b&lHI"), "\u{a7}b\u{a7}lHI");
        assert_eq!(legacy_codes("a\nb"), "a\u{a7}r\nb");
    }

    #[test]
    fn test_hibernating_status_is_empty_and_marked() {
        let status = build_status(&snapshot(Phase::Stopped), &StatusConfig::default());
        assert_eq!(status.players, Players { max: 0, online: 0 });
        assert!(status.description.text.contains("HIBERNATING"));
        assert!(status.description.text.contains('\u{a7}'));
        assert_eq!(status.version.name, "1.17.2");
        assert_eq!(status.version.protocol, 736);
    }

    #[test]
    fn test_starting_phases_share_the_warming_up_motd() {
        for phase in [
            Phase::Starting,
            Phase::AwaitingNetworkAddress,
            Phase::RebindingAddress,
            Phase::AwaitingBackingReady,
        ] {
            let status = build_status(&snapshot(phase), &StatusConfig::default());
            assert!(status.description.text.contains("WARMING UP"), "{phase:?}");
            assert_eq!(status.players.online, 0);
        }
    }

    #[test]
    fn test_active_status_reports_occupancy() {
        let mut snapshot = snapshot(Phase::Active);
        snapshot.occupancy = Some(3);
        let status = build_status(&snapshot, &StatusConfig::default());
        assert_eq!(status.players.online, 3);
        assert_eq!(status.players.max, 20);
        assert!(status.description.text.contains("ONLINE"));
    }

    #[test]
    fn test_fault_shows_through_when_stopped() {
        let mut snapshot = snapshot(Phase::Stopped);
        snapshot.fault = Some("gave up waiting".to_string());
        let status = build_status(&snapshot, &StatusConfig::default());
        assert!(status.description.text.contains("FAULTED"));
    }

    #[test]
    fn test_favicon_is_omitted_from_json_when_unset() {
        let status = build_status(&snapshot(Phase::Stopped), &StatusConfig::default());
        let json = serde_json::to_value(&status).unwrap();
        assert!(json.get("favicon").is_none());
        assert!(json["description"]["text"].is_string());
    }

    #[test]
    fn test_disconnect_reason_depends_on_phase() {
        let config = StatusConfig::default();
        let asleep = build_disconnect(&snapshot(Phase::Stopped), &config);
        assert!(asleep.text.contains("not actually on"));

        let starting = build_disconnect(&snapshot(Phase::Starting), &config);
        assert!(starting.text.contains("starting"));
    }
}
