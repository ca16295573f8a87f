//! The server's simulation context
//!
//! [`LockstepHost`] owns the peer registry and the tick scheduler and reacts
//! to letters popped from the inbox. It never touches a socket: everything it
//! wants to send is staged as an `(address, letter)` pair and handed to the
//! outbox queue by [`LockstepHost::flush`] at the end of each pass. Releasing a
//! peer drops whatever is still staged for it.

use crate::client_manager::ClientManager;
use crate::scheduler::TickScheduler;
use log::{debug, error, info, warn};
use shared::config::PROTOCOL_VERSION;
use shared::{
    ClientHello, ControlSnapshot, DesyncNotice, Envelope, LetterKind, LockstepConfig,
    QueueClosed, QueueProducer, SyncChecksum, SyncVerdict, TeamAssignment, TickSource, Welcome,
};
use std::net::SocketAddr;
use std::time::Instant;

/// An addressed letter waiting for the send task
pub type Outgoing = (SocketAddr, Envelope);

/// Point-in-time view of the server for logs and tests
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ServerDiagnostics {
    pub current_sequence_id: u64,
    /// `(client_id, ticks behind)` ordered by client id
    pub peer_latencies: Vec<(u32, i64)>,
    pub last_desync_tick: Option<u64>,
}

pub struct LockstepHost<W> {
    config: LockstepConfig,
    clients: ClientManager,
    scheduler: TickScheduler<W>,
    staged: Vec<Outgoing>,
    outbox: QueueProducer<Outgoing>,
}

impl<W: TickSource> LockstepHost<W> {
    pub fn new(
        world: W,
        config: LockstepConfig,
        max_clients: usize,
        outbox: QueueProducer<Outgoing>,
        start: Instant,
    ) -> Self {
        Self {
            scheduler: TickScheduler::new(world, &config, start),
            clients: ClientManager::new(max_clients),
            config,
            staged: Vec::new(),
            outbox,
        }
    }

    /// Reacts to one inbound letter.
    ///
    /// Letters from addresses that are not registered are dropped unless they
    /// are a `Hello`; this is also what cancels anything still queued from a
    /// peer that has just left. Failures here only ever affect the sending
    /// peer.
    pub fn handle_letter(&mut self, letter: Envelope, now: Instant) {
        let Some(addr) = letter.sender() else {
            warn!("Dropping {:?} letter without a sender", letter.kind());
            return;
        };

        if letter.kind() == LetterKind::Hello {
            self.handle_hello(&letter, addr, now);
            return;
        }

        let Some(client_id) = self.clients.find_client_by_addr(addr) else {
            debug!(
                "Discarding {:?} from unregistered address {}",
                letter.kind(),
                addr
            );
            return;
        };

        match letter.kind() {
            LetterKind::Goodbye => {
                let reason = letter.goodbye_reason().unwrap_or_default();
                info!("Client {} said goodbye: {}", client_id, reason);
                self.release(client_id);
            }

            LetterKind::IAmAlive => match letter.body::<ControlSnapshot>(LetterKind::IAmAlive) {
                Ok(controls) => {
                    let Some(peer) = self.clients.get_mut(client_id) else {
                        return;
                    };
                    peer.acknowledge(letter.sequence_id(), now);
                    let team_id = peer.team_id;
                    self.scheduler.world_mut().submit_controls(team_id, controls);
                }
                Err(e) => warn!("Bad heartbeat from client {}: {}", client_id, e),
            },

            LetterKind::Sync => match letter.sync_checksum() {
                Ok(checksum) => {
                    if let Some(peer) = self.clients.get_mut(client_id) {
                        peer.acknowledge(letter.sequence_id(), now);
                    }
                    self.handle_sync(client_id, addr, letter.sequence_id(), checksum);
                }
                Err(e) => warn!("Bad sync from client {}: {}", client_id, e),
            },

            other => {
                warn!("Unexpected {:?} letter from client {}", other, client_id);
            }
        }
    }

    fn handle_hello(&mut self, letter: &Envelope, addr: SocketAddr, now: Instant) {
        let hello = match letter.body::<ClientHello>(LetterKind::Hello) {
            Ok(hello) => hello,
            Err(e) => {
                warn!("Malformed hello from {}: {}", addr, e);
                return;
            }
        };

        info!(
            "Client connecting from {} (version: {})",
            addr, hello.client_version
        );

        let current = self.scheduler.current();
        if hello.client_version != PROTOCOL_VERSION {
            self.send(addr, Envelope::goodbye(current, "Protocol version mismatch"));
            return;
        }

        // A hello from a known address is a reconnect: start it over.
        if let Some(existing_id) = self.clients.find_client_by_addr(addr) {
            info!("Removing existing client {} from {}", existing_id, addr);
            self.release(existing_id);
        }

        // Nothing is registered until the snapshot exists.
        let snapshot = match self.scheduler.world_mut().snapshot() {
            Ok(snapshot) => snapshot,
            Err(e) => {
                error!("Cannot snapshot the world for {}: {}", addr, e);
                self.send(addr, Envelope::goodbye(current, "Snapshot unavailable"));
                return;
            }
        };

        let Some(client_id) = self.clients.add_client(addr, current, now) else {
            self.send(addr, Envelope::goodbye(current, "Server full"));
            return;
        };
        let team_id = self
            .clients
            .get(client_id)
            .map(|peer| peer.team_id)
            .unwrap_or(client_id);

        let welcome = Welcome {
            client_id,
            team_id,
            snapshot,
        };
        let letters = Envelope::welcome(current, &welcome).and_then(|welcome| {
            let assignment =
                Envelope::team_assign(current, TeamAssignment { client_id, team_id })?;
            Ok([welcome, assignment])
        });

        match letters {
            Ok(letters) => {
                self.scheduler.world_mut().join(team_id);
                for letter in letters {
                    self.send(addr, letter);
                }
            }
            Err(e) => {
                error!("Cannot encode welcome for client {}: {}", client_id, e);
                self.clients.remove_client(&client_id);
                self.send(addr, Envelope::goodbye(current, "Welcome failed"));
            }
        }
    }

    fn handle_sync(
        &mut self,
        client_id: u32,
        addr: SocketAddr,
        sequence_id: u64,
        checksum: SyncChecksum,
    ) {
        match self.scheduler.verify(sequence_id, checksum) {
            SyncVerdict::Match => {}
            SyncVerdict::Unknown => {
                debug!(
                    "No checksum on record for tick {} (client {})",
                    sequence_id, client_id
                );
            }
            SyncVerdict::Mismatch { local, remote } => {
                let notice = DesyncNotice {
                    server_checksum: local,
                    client_checksum: remote,
                };
                match Envelope::desync_report(sequence_id, notice) {
                    Ok(report) => self.send(addr, report),
                    Err(e) => error!("Cannot encode desync report for tick {}: {}", sequence_id, e),
                }
            }
        }
    }

    /// Drops silent peers and advances the world if a tick is due.
    ///
    /// Returns the id of the tick that was broadcast, if any.
    pub fn update(&mut self, now: Instant) -> Option<u64> {
        for peer in self.clients.check_timeouts(now, self.config.peer_timeout) {
            warn!("Client {} timed out", peer.id);
            self.staged.retain(|(addr, _)| *addr != peer.addr);
            self.scheduler.world_mut().leave(peer.team_id);
        }

        let tick = match self.scheduler.poll(now) {
            Ok(Some(tick)) => tick,
            Ok(None) => return None,
            Err(e) => {
                // The id was not consumed, so the next deadline retries it.
                error!("{}", e);
                return None;
            }
        };

        let sequence_id = tick.envelope.sequence_id();
        for (_, addr) in self.clients.get_client_addrs() {
            self.send(addr, tick.envelope.clone());
        }

        if sequence_id % 60 == 0 && !self.clients.is_empty() {
            debug!(
                "Tick {}: {} clients, latencies {:?}",
                sequence_id,
                self.clients.len(),
                self.clients.latencies(sequence_id)
            );
        }

        Some(sequence_id)
    }

    /// Hands every staged letter to the outbox, oldest first.
    ///
    /// Returns how many letters were handed over.
    pub fn flush(&mut self) -> Result<usize, QueueClosed> {
        let count = self.staged.len();
        for outgoing in self.staged.drain(..) {
            self.outbox.push(outgoing)?;
        }
        Ok(count)
    }

    fn release(&mut self, client_id: u32) {
        if let Some(peer) = self.clients.remove_client(&client_id) {
            self.staged.retain(|(addr, _)| *addr != peer.addr);
            self.scheduler.world_mut().leave(peer.team_id);
        }
    }

    fn send(&mut self, addr: SocketAddr, letter: Envelope) {
        self.staged.push((addr, letter));
    }

    pub fn diagnostics(&self) -> ServerDiagnostics {
        let current = self.scheduler.current();
        ServerDiagnostics {
            current_sequence_id: current,
            peer_latencies: self.clients.latencies(current),
            last_desync_tick: self.scheduler.last_desync_tick(),
        }
    }

    pub fn clients(&self) -> &ClientManager {
        &self.clients
    }

    pub fn world(&self) -> &W {
        self.scheduler.world()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared::demo::{DemoAuthority, DemoWorld};
    use shared::{LockstepWorld, QueueConsumer, TransportQueue, WorldError};
    use std::time::Duration;

    const PERIOD: Duration = Duration::from_millis(10);

    fn addr(port: u16) -> SocketAddr {
        SocketAddr::from(([127, 0, 0, 1], port))
    }

    fn test_config() -> LockstepConfig {
        LockstepConfig {
            tick_period: PERIOD,
            sub_steps_per_tick: 4,
            peer_timeout: Duration::from_secs(1),
            ..LockstepConfig::default()
        }
    }

    fn host(
        max_clients: usize,
        start: Instant,
    ) -> (LockstepHost<DemoAuthority>, QueueConsumer<Outgoing>) {
        let (outbox, sent) = TransportQueue::unbounded();
        (
            LockstepHost::new(
                DemoAuthority::new(5, 4),
                test_config(),
                max_clients,
                outbox,
                start,
            ),
            sent,
        )
    }

    fn hello_from(port: u16) -> Envelope {
        Envelope::client_hello(PROTOCOL_VERSION)
            .unwrap()
            .with_sender(addr(port))
    }

    fn drain<W: TickSource>(
        host: &mut LockstepHost<W>,
        sent: &mut QueueConsumer<Outgoing>,
    ) -> Vec<Outgoing> {
        host.flush().unwrap();
        std::iter::from_fn(|| sent.try_pop()).collect()
    }

    /// A world that cannot produce a snapshot
    #[derive(Default)]
    struct NoSnapshot {
        joined: Vec<u32>,
    }

    impl TickSource for NoSnapshot {
        fn advance_one_tick(&mut self, _tick_index: u64) -> Result<Vec<u8>, WorldError> {
            Ok(Vec::new())
        }

        fn sync_state(&self) -> Vec<u8> {
            Vec::new()
        }

        fn snapshot(&mut self) -> Result<Vec<u8>, WorldError> {
            Err(WorldError {
                tick: 0,
                reason: "too big".to_string(),
            })
        }

        fn join(&mut self, team_id: u32) {
            self.joined.push(team_id);
        }

        fn leave(&mut self, _team_id: u32) {}

        fn submit_controls(&mut self, _team_id: u32, _controls: ControlSnapshot) {}
    }

    #[test]
    fn test_hello_gets_welcome_and_team() {
        let start = Instant::now();
        let (mut host, mut sent) = host(4, start);

        host.handle_letter(hello_from(9000), start);

        let letters = drain(&mut host, &mut sent);
        assert_eq!(letters.len(), 2);
        assert_eq!(letters[0].0, addr(9000));
        assert_eq!(letters[0].1.kind(), LetterKind::Hello);
        assert_eq!(letters[0].1.sequence_id(), 0);
        let welcome: Welcome = letters[0].1.body(LetterKind::Hello).unwrap();
        assert_eq!(welcome.client_id, 1);

        let assignment: TeamAssignment = letters[1].1.body(LetterKind::TeamAssign).unwrap();
        assert_eq!(assignment.team_id, welcome.team_id);

        // The join lands with the next tick, like every other command
        assert_eq!(host.world().world().unit_count(), 0);
        assert_eq!(host.update(start + PERIOD), Some(1));
        assert_eq!(host.world().world().unit_count(), 1);
    }

    #[test]
    fn test_failed_snapshot_refuses_only_that_peer() {
        let start = Instant::now();
        let (outbox, mut sent) = TransportQueue::unbounded();
        let mut host = LockstepHost::new(NoSnapshot::default(), test_config(), 4, outbox, start);

        host.handle_letter(hello_from(9000), start);

        let letters = drain(&mut host, &mut sent);
        assert_eq!(letters.len(), 1);
        assert_eq!(letters[0].0, addr(9000));
        assert_eq!(letters[0].1.goodbye_reason().unwrap(), "Snapshot unavailable");
        assert!(host.clients().is_empty());
        assert!(host.world().joined.is_empty());

        // The server keeps ticking
        assert_eq!(host.update(start + PERIOD), Some(1));
        assert_eq!(host.update(start + PERIOD * 2), Some(2));
    }

    #[test]
    fn test_server_full() {
        let start = Instant::now();
        let (mut host, mut sent) = host(1, start);

        host.handle_letter(hello_from(9000), start);
        drain(&mut host, &mut sent);
        host.handle_letter(hello_from(9001), start);

        let letters = drain(&mut host, &mut sent);
        assert_eq!(letters.len(), 1);
        assert_eq!(letters[0].1.goodbye_reason().unwrap(), "Server full");
        assert_eq!(host.clients().len(), 1);
    }

    #[test]
    fn test_version_mismatch_is_refused() {
        let start = Instant::now();
        let (mut host, mut sent) = host(4, start);

        let hello = Envelope::client_hello(PROTOCOL_VERSION + 1)
            .unwrap()
            .with_sender(addr(9000));
        host.handle_letter(hello, start);

        let letters = drain(&mut host, &mut sent);
        assert_eq!(letters[0].1.kind(), LetterKind::Goodbye);
        assert!(host.clients().is_empty());
    }

    #[test]
    fn test_ticks_broadcast_to_every_peer() {
        let start = Instant::now();
        let (mut host, mut sent) = host(4, start);

        host.handle_letter(hello_from(9000), start);
        host.handle_letter(hello_from(9001), start);
        drain(&mut host, &mut sent);

        assert_eq!(host.update(start + PERIOD), Some(1));
        let letters = drain(&mut host, &mut sent);
        assert_eq!(letters.len(), 2);
        assert!(letters
            .iter()
            .all(|(_, letter)| letter.kind() == LetterKind::WorldUpdate && letter.sequence_id() == 1));
    }

    #[test]
    fn test_nothing_leaves_before_flush() {
        let start = Instant::now();
        let (mut host, mut sent) = host(4, start);

        host.handle_letter(hello_from(9000), start);
        assert!(sent.try_pop().is_none());
        assert_eq!(host.flush().unwrap(), 2);
        assert_eq!(host.flush().unwrap(), 0);
    }

    #[test]
    fn test_unregistered_letters_are_discarded() {
        let start = Instant::now();
        let (mut host, mut sent) = host(4, start);

        let stray = Envelope::sync(3, SyncChecksum::new(1)).with_sender(addr(9000));
        host.handle_letter(stray, start);
        assert!(drain(&mut host, &mut sent).is_empty());
        assert_eq!(host.diagnostics().last_desync_tick, None);
    }

    #[test]
    fn test_goodbye_cancels_later_letters() {
        let start = Instant::now();
        let (mut host, mut sent) = host(4, start);

        host.handle_letter(hello_from(9000), start);
        host.update(start + PERIOD);
        drain(&mut host, &mut sent);
        assert_eq!(host.world().world().unit_count(), 1);

        host.handle_letter(Envelope::goodbye(1, "bye").with_sender(addr(9000)), start);
        assert!(host.clients().is_empty());

        let late_sync = Envelope::sync(1, SyncChecksum::new(0)).with_sender(addr(9000));
        host.handle_letter(late_sync, start);
        assert!(drain(&mut host, &mut sent).is_empty());

        // The unit leaves with the next tick, which goes to nobody
        assert_eq!(host.update(start + PERIOD * 2), Some(2));
        assert_eq!(host.world().world().unit_count(), 0);
        assert!(drain(&mut host, &mut sent).is_empty());
    }

    #[test]
    fn test_goodbye_drops_letters_not_yet_sent() {
        let start = Instant::now();
        let (mut host, mut sent) = host(4, start);

        host.handle_letter(hello_from(9000), start);
        host.handle_letter(hello_from(9001), start);
        host.update(start + PERIOD);
        host.handle_letter(Envelope::goodbye(1, "bye").with_sender(addr(9000)), start);

        let letters = drain(&mut host, &mut sent);
        assert!(letters.iter().all(|(to, _)| *to == addr(9001)));
        assert_eq!(letters.len(), 3);
    }

    #[test]
    fn test_heartbeat_acknowledges_and_submits_controls() {
        let start = Instant::now();
        let (mut host, _sent) = host(4, start);

        host.handle_letter(hello_from(9000), start);
        for n in 1..=3 {
            host.update(start + PERIOD * n);
        }

        let controls = ControlSnapshot {
            target_x: 40,
            target_y: 8,
            unit_move: true,
            ..ControlSnapshot::default()
        };
        let heartbeat = Envelope::i_am_alive(2, &controls)
            .unwrap()
            .with_sender(addr(9000));
        host.handle_letter(heartbeat, start + PERIOD * 3);

        assert_eq!(host.diagnostics().peer_latencies, vec![(1, 1)]);

        host.update(start + PERIOD * 4);
        let unit = host.world().world().unit(1).unwrap();
        assert_eq!((unit.target_x, unit.target_y), (40, 8));
    }

    #[test]
    fn test_mismatched_sync_is_reported() {
        let start = Instant::now();
        let (mut host, mut sent) = host(4, start);

        host.handle_letter(hello_from(9000), start);
        let welcome: Welcome = drain(&mut host, &mut sent)[0]
            .1
            .body(LetterKind::Hello)
            .unwrap();
        host.update(start + PERIOD);
        let update = drain(&mut host, &mut sent).remove(0).1;

        // A faithful replica produces the same checksum
        let mut replica = DemoWorld::new(0);
        replica.restore(&welcome.snapshot).unwrap();
        replica.apply_tick(update.payload(), 1).unwrap();
        let good = SyncChecksum::of_state(&replica.sync_state());

        host.handle_letter(Envelope::sync(1, good).with_sender(addr(9000)), start);
        assert!(drain(&mut host, &mut sent).is_empty());

        let bad = SyncChecksum::new(good.value() ^ 0xFF);
        host.handle_letter(Envelope::sync(1, bad).with_sender(addr(9000)), start);
        let letters = drain(&mut host, &mut sent);
        assert_eq!(letters.len(), 1);
        let notice: DesyncNotice = letters[0].1.body(LetterKind::DesyncReport).unwrap();
        assert_eq!(notice.server_checksum, good);
        assert_eq!(notice.client_checksum, bad);
        assert_eq!(host.diagnostics().last_desync_tick, Some(1));
    }

    #[test]
    fn test_timeout_releases_peer_and_ticking_continues() {
        let start = Instant::now();
        let (mut host, mut sent) = host(4, start);

        host.handle_letter(hello_from(9000), start);
        let later = start + Duration::from_secs(2);
        assert_eq!(host.update(later), Some(1));
        assert!(host.clients().is_empty());
        // The unflushed welcome went with the peer
        assert!(drain(&mut host, &mut sent).is_empty());
        assert_eq!(host.update(later + PERIOD), Some(2));
    }

    #[test]
    fn test_flush_reports_closed_outbox() {
        let start = Instant::now();
        let (mut host, sent) = host(4, start);
        drop(sent);

        host.handle_letter(hello_from(9000), start);
        assert_eq!(host.flush(), Err(QueueClosed));
    }
}
