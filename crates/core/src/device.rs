//! Device seam: the LCD actuator and the operational sensors.
//!
//! The agent touches local hardware in exactly two places — applying
//! `<lcd>` configuration text to the display, and sampling the sensors and
//! interface counters for the `<get>` reply. Both go through the [`Device`]
//! trait so the engine stays testable on a development host.

use std::net::Ipv6Addr;

use parking_lot::Mutex;

/// Sentinel reported by the temperature sensor when no reading is
/// available; rendered as `N/A` in the operational-state block.
pub const TEMP_UNAVAILABLE: i32 = -100;

/// Local hardware as seen by the protocol engine.
pub trait Device: Send + Sync {
    /// Show a line of text on the device display.
    fn show_text(&self, text: &str);

    /// Seconds since the temperature reading was last refreshed.
    fn last_temp_update(&self) -> i64;

    /// Temperature in °C, or [`TEMP_UNAVAILABLE`].
    fn temperature_c(&self) -> i32;

    /// Seconds since boot.
    fn sys_uptime(&self) -> i64;

    /// The device's global IPv6 address.
    fn global_ip(&self) -> Ipv6Addr;

    fn packets_sent(&self) -> u64;
    fn packets_received(&self) -> u64;
    fn fail_sent(&self) -> u64;
    fn fail_received(&self) -> u64;
    fn octets_sent(&self) -> u64;
    fn octets_received(&self) -> u64;
    fn mcast_sent(&self) -> u64;
    fn mcast_received(&self) -> u64;
}

/// Device stub for hosts with no real hardware behind the agent.
///
/// Sensors read zero, the temperature reads unavailable, and LCD text goes
/// to the log (the last line is kept for inspection). The CLI runs with
/// this unless embedding code installs a real implementation via
/// [`Server::with_device`](crate::Server::with_device).
#[derive(Debug, Default)]
pub struct StubDevice {
    last_text: Mutex<Option<String>>,
}

impl StubDevice {
    pub fn new() -> Self {
        Self::default()
    }

    /// The most recent LCD line, if any.
    pub fn last_text(&self) -> Option<String> {
        self.last_text.lock().clone()
    }
}

impl Device for StubDevice {
    fn show_text(&self, text: &str) {
        tracing::info!(text, "lcd");
        *self.last_text.lock() = Some(text.to_string());
    }

    fn last_temp_update(&self) -> i64 {
        0
    }

    fn temperature_c(&self) -> i32 {
        TEMP_UNAVAILABLE
    }

    fn sys_uptime(&self) -> i64 {
        0
    }

    fn global_ip(&self) -> Ipv6Addr {
        Ipv6Addr::UNSPECIFIED
    }

    fn packets_sent(&self) -> u64 {
        0
    }

    fn packets_received(&self) -> u64 {
        0
    }

    fn fail_sent(&self) -> u64 {
        0
    }

    fn fail_received(&self) -> u64 {
        0
    }

    fn octets_sent(&self) -> u64 {
        0
    }

    fn octets_received(&self) -> u64 {
        0
    }

    fn mcast_sent(&self) -> u64 {
        0
    }

    fn mcast_received(&self) -> u64 {
        0
    }
}
