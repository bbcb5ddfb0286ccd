//! Per-fixture command dispatch: rate limiting, de-duplication, routing.

use std::collections::HashMap;
use std::net::{IpAddr, SocketAddr};
use std::time::{Duration, Instant};

use crate::config::FixtureConfig;

use super::color::{clamp_channels, Rgb};
use super::command::PilotCommand;
use super::transport::Transport;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOutcome {
    Sent,
    Skipped,
}

/// Send history for one fixture, created lazily on first dispatch.
#[derive(Debug, Default)]
struct FixtureState {
    last_color: Option<Rgb>,
    last_send: Option<Instant>,
    palette_index: usize,
}

/// Owns all per-fixture dispatch state; nothing else reads or writes it.
pub struct Dispatcher<T: Transport> {
    transport: T,
    udp_port: u16,
    min_interval: Duration,
    effects_enabled: bool,
    states: HashMap<IpAddr, FixtureState>,
}

impl<T: Transport> Dispatcher<T> {
    pub fn new(
        transport: T,
        udp_port: u16,
        min_update_interval_ms: u64,
        effects_enabled: bool,
    ) -> Self {
        Self {
            transport,
            udp_port,
            min_interval: Duration::from_millis(min_update_interval_ms),
            effects_enabled,
            states: HashMap::new(),
        }
    }

    /// Sends a color/brightness command to the fixture, unless it is inside
    /// its minimum update interval. A repeat of the fixture's last color
    /// under cycling effects substitutes the next palette entry instead.
    /// Skips leave the fixture's state untouched.
    pub fn dispatch_color(
        &mut self,
        fixture: &FixtureConfig,
        color: Rgb,
        brightness: i32,
        now: Instant,
    ) -> DispatchOutcome {
        if self.rate_limited(fixture.ip, now) {
            log::debug!("Skipping command to {}: minimum update interval", fixture.ip);
            return DispatchOutcome::Skipped;
        }

        let color = clamp_channels(color);
        let state = self.states.entry(fixture.ip).or_default();

        // Resolve first, commit only after the send succeeds.
        let (resolved, advanced_index) =
            if self.effects_enabled && state.last_color == Some(color) {
                let index = (state.palette_index + 1) % fixture.colors.len();
                log::debug!(
                    "Repeat color for {}, cycling to palette entry {}",
                    fixture.ip,
                    index
                );
                (clamp_channels(fixture.colors[index]), Some(index))
            } else {
                (color, None)
            };

        let command = PilotCommand::set_color(resolved, brightness);
        if !self.send(fixture.ip, &command) {
            return DispatchOutcome::Skipped;
        }

        let state = self.states.entry(fixture.ip).or_default();
        if let Some(index) = advanced_index {
            state.palette_index = index;
        }
        state.last_color = Some(resolved);
        state.last_send = Some(now);
        DispatchOutcome::Sent
    }

    /// Sends a power-off command, under the same per-fixture rate limit.
    pub fn dispatch_off(&mut self, fixture: &FixtureConfig, now: Instant) -> DispatchOutcome {
        if self.rate_limited(fixture.ip, now) {
            log::debug!("Skipping off command to {}: minimum update interval", fixture.ip);
            return DispatchOutcome::Skipped;
        }

        if !self.send(fixture.ip, &PilotCommand::power_off()) {
            return DispatchOutcome::Skipped;
        }

        let state = self.states.entry(fixture.ip).or_default();
        state.last_send = Some(now);
        DispatchOutcome::Sent
    }

    #[cfg(test)]
    pub(crate) fn transport(&self) -> &T {
        &self.transport
    }

    fn rate_limited(&self, ip: IpAddr, now: Instant) -> bool {
        self.states
            .get(&ip)
            .and_then(|s| s.last_send)
            .map(|last| now.saturating_duration_since(last) < self.min_interval)
            .unwrap_or(false)
    }

    fn send(&self, ip: IpAddr, command: &PilotCommand) -> bool {
        let payload = match command.encode() {
            Ok(payload) => payload,
            Err(err) => {
                log::error!("Failed to encode command for {}: {}", ip, err);
                return false;
            }
        };
        let addr = SocketAddr::new(ip, self.udp_port);
        match self.transport.send(addr, &payload) {
            Ok(()) => true,
            Err(err) => {
                log::warn!("Failed to send command to {}: {}", addr, err);
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Effect;
    use crate::light::transport::TransportError;
    use std::cell::RefCell;

    #[derive(Default)]
    struct RecordingTransport {
        sent: RefCell<Vec<(SocketAddr, Vec<u8>)>>,
    }

    impl Transport for RecordingTransport {
        fn send(&self, addr: SocketAddr, payload: &[u8]) -> Result<(), TransportError> {
            self.sent.borrow_mut().push((addr, payload.to_vec()));
            Ok(())
        }
    }

    struct FailingTransport;

    impl Transport for FailingTransport {
        fn send(&self, _addr: SocketAddr, _payload: &[u8]) -> Result<(), TransportError> {
            Err(TransportError::Io(std::io::Error::other("network down")))
        }
    }

    fn fixture() -> FixtureConfig {
        FixtureConfig {
            ip: "192.168.1.42".parse().unwrap(),
            effect: Effect::ChangeColor,
            colors: vec![[255, 0, 0], [0, 255, 0], [0, 0, 255]],
        }
    }

    fn dispatcher(effects_enabled: bool) -> Dispatcher<RecordingTransport> {
        Dispatcher::new(RecordingTransport::default(), 38899, 100, effects_enabled)
    }

    #[test]
    fn sends_within_interval_are_skipped() {
        let mut d = dispatcher(false);
        let f = fixture();
        let t0 = Instant::now();

        assert_eq!(d.dispatch_color(&f, [255, 0, 0], 255, t0), DispatchOutcome::Sent);
        assert_eq!(
            d.dispatch_color(&f, [0, 255, 0], 255, t0 + Duration::from_millis(50)),
            DispatchOutcome::Skipped
        );
        assert_eq!(
            d.dispatch_color(&f, [0, 255, 0], 255, t0 + Duration::from_millis(100)),
            DispatchOutcome::Sent
        );
        assert_eq!(d.transport.sent.borrow().len(), 2);
    }

    #[test]
    fn rate_limit_is_per_fixture() {
        let mut d = dispatcher(false);
        let a = fixture();
        let mut b = fixture();
        b.ip = "192.168.1.43".parse().unwrap();
        let t0 = Instant::now();

        assert_eq!(d.dispatch_color(&a, [255, 0, 0], 255, t0), DispatchOutcome::Sent);
        // Different address, same instant: not limited.
        assert_eq!(d.dispatch_color(&b, [255, 0, 0], 255, t0), DispatchOutcome::Sent);
    }

    #[test]
    fn skipped_dispatch_leaves_state_untouched() {
        let mut d = dispatcher(true);
        let f = fixture();
        let t0 = Instant::now();

        d.dispatch_color(&f, [255, 0, 0], 255, t0);
        // Skipped repeat must not advance the rotation index.
        d.dispatch_color(&f, [255, 0, 0], 255, t0 + Duration::from_millis(10));
        assert_eq!(d.states[&f.ip].palette_index, 0);

        // After the interval, the repeat cycles to entry 1 exactly once.
        d.dispatch_color(&f, [255, 0, 0], 255, t0 + Duration::from_millis(200));
        assert_eq!(d.states[&f.ip].palette_index, 1);
        assert_eq!(d.states[&f.ip].last_color, Some([0, 255, 0]));
    }

    #[test]
    fn repeat_color_substitutes_next_palette_entry() {
        let mut d = dispatcher(true);
        let f = fixture();
        let t0 = Instant::now();

        d.dispatch_color(&f, [255, 0, 0], 200, t0);
        d.dispatch_color(&f, [255, 0, 0], 200, t0 + Duration::from_millis(150));

        let sent = d.transport.sent.borrow();
        let second: serde_json::Value = serde_json::from_slice(&sent[1].1).unwrap();
        assert_eq!(second["params"]["g"], 255);
        assert_eq!(second["params"]["r"], 0);
    }

    #[test]
    fn rotation_index_wraps_at_palette_length() {
        let mut d = dispatcher(true);
        let f = fixture();
        let t0 = Instant::now();
        let step = Duration::from_millis(150);

        // Each repeat of the last-sent color advances the index by one.
        d.dispatch_color(&f, [255, 0, 0], 255, t0); // sends red
        d.dispatch_color(&f, [255, 0, 0], 255, t0 + step); // cycles to green (1)
        d.dispatch_color(&f, [0, 255, 0], 255, t0 + 2 * step); // cycles to blue (2)
        d.dispatch_color(&f, [0, 0, 255], 255, t0 + 3 * step); // wraps to red (0)
        assert_eq!(d.states[&f.ip].palette_index, 0);
        assert_eq!(d.states[&f.ip].last_color, Some([255, 0, 0]));
    }

    #[test]
    fn dedupe_disabled_resends_same_color() {
        let mut d = dispatcher(false);
        let f = fixture();
        let t0 = Instant::now();

        d.dispatch_color(&f, [255, 0, 0], 255, t0);
        d.dispatch_color(&f, [255, 0, 0], 255, t0 + Duration::from_millis(150));
        let sent = d.transport.sent.borrow();
        assert_eq!(sent[0].1, sent[1].1);
    }

    #[test]
    fn off_command_respects_rate_limit_and_records_send() {
        let mut d = dispatcher(false);
        let f = fixture();
        let t0 = Instant::now();

        assert_eq!(d.dispatch_off(&f, t0), DispatchOutcome::Sent);
        assert_eq!(
            d.dispatch_off(&f, t0 + Duration::from_millis(10)),
            DispatchOutcome::Skipped
        );
        let sent = d.transport.sent.borrow();
        let json: serde_json::Value = serde_json::from_slice(&sent[0].1).unwrap();
        assert_eq!(json["params"]["state"], false);
    }

    #[test]
    fn transport_failure_is_a_skip_without_state_mutation() {
        let mut d = Dispatcher::new(FailingTransport, 38899, 100, false);
        let f = fixture();
        let t0 = Instant::now();

        assert_eq!(
            d.dispatch_color(&f, [255, 0, 0], 255, t0),
            DispatchOutcome::Skipped
        );
        // No send timestamp recorded, so the next attempt is not rate limited.
        assert!(!d.rate_limited(f.ip, t0 + Duration::from_millis(1)));
    }

    #[test]
    fn commands_target_configured_port() {
        let mut d = dispatcher(false);
        let f = fixture();
        d.dispatch_color(&f, [1, 2, 3], 255, Instant::now());
        let sent = d.transport.sent.borrow();
        assert_eq!(sent[0].0.port(), 38899);
        assert_eq!(sent[0].0.ip(), f.ip);
    }
}
