//! Client connection lifecycle
//!
//! [`LockstepClient`] is everything the client does between sockets: the
//! handshake, the per-frame catch-up, sync and heartbeat letters, and
//! resynchronization after a fatal error. Incoming letters arrive through two
//! queues (ticks and control); outgoing letters go into the outbox.

use crate::diagnostics::ClientDiagnostics;
use crate::heartbeat::HeartbeatAggregator;
use crate::reconciler::CatchUpReconciler;
use log::{error, info, warn};
use shared::config::PROTOCOL_VERSION;
use shared::{
    Cadence, ControlSource, DesyncNotice, Envelope, LetterKind, LockstepConfig, LockstepError,
    LockstepWorld, QueueConsumer, QueueProducer, TeamAssignment, Welcome,
};
use std::time::{Duration, Instant};

/// How long to wait for a welcome before saying hello again.
pub const HELLO_RETRY: Duration = Duration::from_secs(1);

/// Snapshot of the client for callers outside the frame loop
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClientStatus {
    pub client_id: Option<u32>,
    pub team_id: Option<u32>,
    pub last_applied: u64,
    pub latency_ticks: i64,
    pub last_desync_tick: Option<u64>,
    pub sessions_started: u32,
}

struct Session<W> {
    client_id: u32,
    team_id: u32,
    reconciler: CatchUpReconciler<W>,
    heartbeat: HeartbeatAggregator,
}

pub struct LockstepClient<W, C> {
    config: LockstepConfig,
    input: C,

    tick_inbox: QueueConsumer<Envelope>,
    // Feeds letters that arrived before the welcome back into the inbox
    tick_requeue: QueueProducer<Envelope>,
    outbox: QueueProducer<Envelope>,

    hello: Cadence,
    session: Option<Session<W>>,
    diagnostics: ClientDiagnostics,
    sessions_started: u32,
}

impl<W, C> LockstepClient<W, C>
where
    W: LockstepWorld + Default,
    C: ControlSource,
{
    pub fn new(
        config: LockstepConfig,
        input: C,
        tick_inbox: (QueueProducer<Envelope>, QueueConsumer<Envelope>),
        outbox: QueueProducer<Envelope>,
        now: Instant,
    ) -> Self {
        let (tick_requeue, tick_inbox) = tick_inbox;
        Self {
            diagnostics: ClientDiagnostics::new(config.lag_warning_ticks),
            config,
            input,
            tick_inbox,
            tick_requeue,
            outbox,
            hello: Cadence::starting_now(HELLO_RETRY, now),
            session: None,
            sessions_started: 0,
        }
    }

    /// Reacts to one letter from the control queue.
    pub fn handle_control(&mut self, letter: Envelope, now: Instant) -> Result<(), LockstepError> {
        match letter.kind() {
            LetterKind::Hello => match letter.body::<Welcome>(LetterKind::Hello) {
                Ok(welcome) => self.start_session(letter.sequence_id(), welcome, now)?,
                Err(e) => warn!("Malformed welcome: {}", e),
            },

            LetterKind::TeamAssign => match letter.body::<TeamAssignment>(LetterKind::TeamAssign) {
                Ok(assignment) => {
                    self.diagnostics.observe_server_id(letter.sequence_id());
                    if let Some(session) = self.session.as_mut() {
                        if session.client_id == assignment.client_id {
                            info!("Controlling team {}", assignment.team_id);
                            session.team_id = assignment.team_id;
                        }
                    }
                }
                Err(e) => warn!("Malformed team assignment: {}", e),
            },

            LetterKind::Goodbye => {
                let reason = letter.goodbye_reason().unwrap_or_default();
                warn!("Disconnected: {}", reason);
                self.session = None;
                self.hello = Cadence::new(HELLO_RETRY, now);
            }

            LetterKind::DesyncReport => match letter.body::<DesyncNotice>(LetterKind::DesyncReport) {
                Ok(notice) => {
                    self.diagnostics.observe_server_id(letter.sequence_id());
                    self.diagnostics.record_desync(letter.sequence_id(), &notice);
                }
                Err(e) => warn!("Malformed desync report: {}", e),
            },

            other => warn!("Unexpected {:?} letter from server", other),
        }

        Ok(())
    }

    fn start_session(
        &mut self,
        baseline: u64,
        welcome: Welcome,
        now: Instant,
    ) -> Result<(), LockstepError> {
        let mut world = W::default();
        if let Err(e) = world.restore(&welcome.snapshot) {
            error!("Could not restore snapshot: {}", e);
            return self.resynchronize(now);
        }

        // Ticks up to the baseline are already in the snapshot. Anything
        // newer may have overtaken the welcome and must be kept.
        let mut fresh = Vec::new();
        while let Some(letter) = self.tick_inbox.try_pop() {
            if letter.sequence_id() > baseline {
                fresh.push(letter);
            }
        }
        for letter in fresh {
            self.tick_requeue.push(letter)?;
        }

        info!(
            "Connected! Client ID: {} (team {}, joining at tick {})",
            welcome.client_id, welcome.team_id, baseline
        );

        self.session = Some(Session {
            client_id: welcome.client_id,
            team_id: welcome.team_id,
            reconciler: CatchUpReconciler::new(world, &self.config, baseline, now),
            heartbeat: HeartbeatAggregator::new(self.config.heartbeat_period, now),
        });
        self.diagnostics.reset(baseline);
        self.sessions_started += 1;
        Ok(())
    }

    /// Runs the client for one rendered frame.
    ///
    /// Fatal session errors are handled here by resynchronizing; only a
    /// closed queue is returned to the caller.
    pub fn frame(&mut self, now: Instant) -> Result<(), LockstepError> {
        let Some(session) = self.session.as_mut() else {
            if self.hello.poll(now) {
                info!("Connecting to server...");
                self.outbox.push(Envelope::client_hello(PROTOCOL_VERSION)?)?;
            }
            return Ok(());
        };

        match session.reconciler.frame(now, &mut self.tick_inbox) {
            Ok(report) => {
                for (sequence_id, checksum) in report.checksums {
                    self.outbox.push(Envelope::sync(sequence_id, checksum))?;
                }
            }
            Err(e) if e.is_fatal() => {
                error!("Session lost: {}", e);
                return self.resynchronize(now);
            }
            Err(e) => warn!("{}", e),
        }

        let last_applied = session.reconciler.last_applied();
        session.heartbeat.update(self.input.current_control_snapshot());
        if let Some(controls) = session.heartbeat.poll(now, self.input.input_suppressed()) {
            self.outbox.push(Envelope::i_am_alive(last_applied, &controls)?)?;
        }

        let backlog = session.reconciler.held_len() + self.tick_inbox.len();
        self.diagnostics.observe_frame(last_applied, backlog);
        Ok(())
    }

    /// Drops the replica, tells the server, and says hello again right away.
    fn resynchronize(&mut self, now: Instant) -> Result<(), LockstepError> {
        if let Some(letter) = self.goodbye("Resynchronizing") {
            self.outbox.push(letter)?;
        }
        self.session = None;
        self.hello = Cadence::starting_now(HELLO_RETRY, now);
        Ok(())
    }

    /// The letter to send when leaving, if connected.
    pub fn goodbye(&self, reason: &str) -> Option<Envelope> {
        self.session
            .as_ref()
            .map(|session| Envelope::goodbye(session.reconciler.last_applied(), reason))
    }

    pub fn is_connected(&self) -> bool {
        self.session.is_some()
    }

    pub fn world(&self) -> Option<&W> {
        self.session.as_ref().map(|session| session.reconciler.world())
    }

    pub fn diagnostics(&self) -> &ClientDiagnostics {
        &self.diagnostics
    }

    pub fn status(&self) -> ClientStatus {
        ClientStatus {
            client_id: self.session.as_ref().map(|session| session.client_id),
            team_id: self.session.as_ref().map(|session| session.team_id),
            last_applied: self
                .session
                .as_ref()
                .map_or(0, |session| session.reconciler.last_applied()),
            latency_ticks: self.diagnostics.current_latency_ticks(),
            last_desync_tick: self.diagnostics.last_desync_tick(),
            sessions_started: self.sessions_started,
        }
    }
}
