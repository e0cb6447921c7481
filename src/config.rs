use std::{net::Ipv4Addr, time::Duration};

use serde::Deserialize;
use tracing::warn;

#[derive(Deserialize, Clone)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Directory to additionally write daily-rotated debug logs to. Console
    /// logging is controlled by RUST_LOG either way.
    #[serde(default)]
    pub logging_dir: Option<String>,

    #[serde(default)]
    pub listen: ListenConfig,

    pub instance: InstanceConfig,

    pub probe: ProbeConfig,

    pub control: ControlConfig,

    #[serde(default)]
    pub status: StatusConfig,

    #[serde(default)]
    pub orchestrator: OrchestratorConfig,
}

#[derive(Deserialize, Clone)]
#[serde(deny_unknown_fields)]
pub struct ListenConfig {
    pub addr: String,
    pub port: u16,

    /// How long a connected client may sit silent before its session is
    /// dropped. Defaults to 10 seconds.
    #[serde(default = "default_read_timeout_secs")]
    pub read_timeout_secs: u64,
}

impl Default for ListenConfig {
    fn default() -> Self {
        Self {
            addr: "0.0.0.0".to_string(),
            port: 25565,
            read_timeout_secs: default_read_timeout_secs(),
        }
    }
}

impl ListenConfig {
    pub fn read_timeout(&self) -> Duration {
        Duration::from_secs(self.read_timeout_secs)
    }
}

#[derive(Deserialize, Clone)]
#[serde(deny_unknown_fields)]
pub struct InstanceConfig {
    /// The cloud instance running the real server.
    pub id: String,

    /// The instance this process runs on. The public address is handed back
    /// to it whenever the real server sleeps.
    pub responder_id: String,

    /// Reassignable public address players connect to. It follows whichever
    /// of the two instances should be taking traffic.
    pub public_address: Ipv4Addr,
}

#[derive(Deserialize, Clone)]
#[serde(deny_unknown_fields)]
pub struct ProbeConfig {
    /// Host the real server is reachable at once it's up. Usually a private
    /// address or internal hostname, since the public one points at us while
    /// it sleeps.
    pub addr: String,
    pub port: u16,

    /// Protocol version sent in the probe handshake. Servers answer status
    /// queries regardless, so the default of 754 (1.16.5) rarely matters.
    #[serde(default = "default_probe_protocol_version")]
    pub protocol_version: i32,

    /// Budget for one whole probe, connect included. Defaults to 5 seconds.
    #[serde(default = "default_probe_timeout_secs")]
    pub timeout_secs: u64,
}

impl ProbeConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// Commands the orchestrator shells out to for each control plane operation,
/// run through `sh -c`. `{instance}` and `{address}` are substituted first.
/// Each command must block until the operation has actually taken effect,
/// e.g. `aws ec2 start-instances --instance-ids {instance} && aws ec2 wait
/// instance-running --instance-ids {instance}`.
#[derive(Deserialize, Clone)]
#[serde(deny_unknown_fields)]
pub struct ControlConfig {
    pub start_command: String,
    pub stop_command: String,
    pub rebind_command: String,
}

#[derive(Deserialize, Clone)]
#[serde(deny_unknown_fields)]
pub struct StatusConfig {
    /// Version label shown in the client's server list.
    pub version_name: String,
    /// Protocol number reported alongside it. A mismatch with the client just
    /// greys out the entry, pings still work.
    pub protocol: i32,

    /// Player cap to report while the real server is up.
    pub max_players: i32,

    /// MOTDs by lifecycle phase. `&` color codes are translated to the wire
    /// format, and line breaks reset formatting.
    pub motd_asleep: String,
    pub motd_starting: String,
    pub motd_running: String,
    pub motd_fault: String,

    /// Disconnect reasons for join attempts, also `&`-coded.
    pub kick_asleep: String,
    pub kick_starting: String,

    /// Server list icon as a `data:image/png;base64,` URI for a 64x64 png.
    #[serde(default)]
    pub favicon: Option<String>,
}

impl Default for StatusConfig {
    fn default() -> Self {
        Self {
            version_name: "1.17.2".to_string(),
            protocol: 736,
            max_players: 20,
            motd_asleep: "                   &fserver status:\n                   &b&lHIBERNATING"
                .to_string(),
            motd_starting: "                   &fserver status:\n                   &6&lWARMING UP"
                .to_string(),
            motd_running: "                   &fserver status:\n                   &a&lONLINE"
                .to_string(),
            motd_fault: "                   &fserver status:\n                   &4&lFAULTED"
                .to_string(),
            kick_asleep:
                "This server is not actually on! It is starting now, come back in a minute or two."
                    .to_string(),
            kick_starting: "The server is still starting, hang on.".to_string(),
            favicon: None,
        }
    }
}

impl StatusConfig {
    /// Drops a favicon that isn't a `data:image/png;base64,` URI. Clients
    /// silently discard anything else, so a typo'd value would only show up
    /// as a mysteriously missing icon.
    pub fn sanitize_favicon(&mut self) {
        if let Some(favicon) = &self.favicon
            && !favicon.starts_with("data:image/png;base64,")
        {
            warn!("status.favicon is not a png data uri, ignoring it");
            self.favicon = None;
        }
    }
}

#[derive(Deserialize, Clone)]
#[serde(deny_unknown_fields)]
pub struct OrchestratorConfig {
    /// Attempts per control plane operation before the wake cycle is
    /// abandoned. Defaults to 4.
    #[serde(default = "default_retry_limit")]
    pub retry_limit: u32,

    /// First retry delay; it doubles per attempt up to the max.
    #[serde(default = "default_backoff_millis")]
    pub backoff_millis: u64,
    #[serde(default = "default_backoff_max_millis")]
    pub backoff_max_millis: u64,

    /// How often the real server is probed while we wait for it to come up,
    /// and how long until we give up on it entirely.
    #[serde(default = "default_ready_poll_millis")]
    pub ready_poll_millis: u64,
    #[serde(default = "default_ready_timeout_secs")]
    pub ready_timeout_secs: u64,

    /// Occupancy poll interval once the server is up.
    #[serde(default = "default_occupancy_poll_millis")]
    pub occupancy_poll_millis: u64,

    /// Tear the server back down if nobody has joined for this long after it
    /// came up. Defaults to 30 minutes.
    #[serde(default = "default_empty_server_timeout_secs")]
    pub empty_server_timeout_secs: u64,

    /// Grace period after the last player leaves, with one final occupancy
    /// check at the end, so a rejoining player doesn't get rugpulled.
    #[serde(default = "default_drain_grace_secs")]
    pub drain_grace_secs: u64,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            retry_limit: default_retry_limit(),
            backoff_millis: default_backoff_millis(),
            backoff_max_millis: default_backoff_max_millis(),
            ready_poll_millis: default_ready_poll_millis(),
            ready_timeout_secs: default_ready_timeout_secs(),
            occupancy_poll_millis: default_occupancy_poll_millis(),
            empty_server_timeout_secs: default_empty_server_timeout_secs(),
            drain_grace_secs: default_drain_grace_secs(),
        }
    }
}

impl OrchestratorConfig {
    pub fn backoff(&self) -> Duration {
        Duration::from_millis(self.backoff_millis)
    }

    pub fn backoff_max(&self) -> Duration {
        Duration::from_millis(self.backoff_max_millis)
    }

    pub fn ready_poll(&self) -> Duration {
        Duration::from_millis(self.ready_poll_millis)
    }

    pub fn ready_timeout(&self) -> Duration {
        Duration::from_secs(self.ready_timeout_secs)
    }

    pub fn occupancy_poll(&self) -> Duration {
        Duration::from_millis(self.occupancy_poll_millis)
    }

    pub fn empty_server_timeout(&self) -> Duration {
        Duration::from_secs(self.empty_server_timeout_secs)
    }

    pub fn drain_grace(&self) -> Duration {
        Duration::from_secs(self.drain_grace_secs)
    }
}

fn default_read_timeout_secs() -> u64 {
    10
}
fn default_probe_protocol_version() -> i32 {
    754
}
fn default_probe_timeout_secs() -> u64 {
    5
}
fn default_retry_limit() -> u32 {
    4
}
fn default_backoff_millis() -> u64 {
    2000
}
fn default_backoff_max_millis() -> u64 {
    60_000
}
fn default_ready_poll_millis() -> u64 {
    2000
}
fn default_ready_timeout_secs() -> u64 {
    300
}
fn default_occupancy_poll_millis() -> u64 {
    10_000
}
fn default_empty_server_timeout_secs() -> u64 {
    1800
}
fn default_drain_grace_secs() -> u64 {
    60
}
