//! Server network layer: UDP I/O tasks around the simulation loop

use crate::host::{LockstepHost, Outgoing, ServerDiagnostics};
use log::{error, info, warn};
use shared::{
    Envelope, LockstepConfig, QueueConsumer, QueueProducer, TickSource, TransportQueue,
    MAX_DATAGRAM_SIZE,
};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::net::UdpSocket;
use tokio::sync::watch;
use tokio::time::{interval, MissedTickBehavior};

pub type ServerError = Box<dyn std::error::Error + Send + Sync>;

/// Main server coordinating networking and the lockstep simulation
///
/// Two background tasks do all the socket work: one decodes datagrams into
/// the inbox, one drains the outbox. The loop in [`Server::run`] is the only
/// place that touches the registry or the world.
pub struct Server<W> {
    socket: Arc<UdpSocket>,
    host: LockstepHost<W>,
    service_interval: Duration,

    // Communication queues
    inbox_tx: QueueProducer<Envelope>,
    inbox: QueueConsumer<Envelope>,
    outbox: Option<QueueConsumer<Outgoing>>,
    diagnostics: watch::Sender<ServerDiagnostics>,
}

impl<W: TickSource + Send + 'static> Server<W> {
    pub async fn new(
        addr: &str,
        world: W,
        config: LockstepConfig,
        max_clients: usize,
    ) -> Result<Self, ServerError> {
        config.validate()?;

        let socket = Arc::new(UdpSocket::bind(addr).await?);
        info!("Server listening on {}", socket.local_addr()?);

        let (inbox_tx, inbox) = TransportQueue::unbounded();
        let (outbox_tx, outbox) = TransportQueue::unbounded();
        let (diagnostics, _) = watch::channel(ServerDiagnostics::default());

        // Poll well inside a tick so the deadline is hit closely.
        let service_interval = (config.tick_period / 10).max(Duration::from_millis(1));

        Ok(Server {
            socket,
            host: LockstepHost::new(world, config, max_clients, outbox_tx, Instant::now()),
            service_interval,
            inbox_tx,
            inbox,
            outbox: Some(outbox),
            diagnostics,
        })
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.socket.local_addr()
    }

    /// Diagnostics are republished after every pass of the main loop.
    pub fn subscribe_diagnostics(&self) -> watch::Receiver<ServerDiagnostics> {
        self.diagnostics.subscribe()
    }

    /// Spawns task that continuously listens for incoming letters
    fn spawn_network_receiver(&self) {
        let socket = Arc::clone(&self.socket);
        let inbox = self.inbox_tx.clone();

        tokio::spawn(async move {
            let mut buffer = vec![0u8; MAX_DATAGRAM_SIZE];

            loop {
                match socket.recv_from(&mut buffer).await {
                    Ok((len, addr)) => match Envelope::decode(&buffer[..len]) {
                        Ok(letter) => {
                            if inbox.push(letter.with_sender(addr)).is_err() {
                                info!("Inbox closed, stopping receiver");
                                break;
                            }
                        }
                        Err(e) => warn!("Failed to decode letter from {}: {}", addr, e),
                    },
                    Err(e) => {
                        error!("Error receiving datagram: {}", e);
                        tokio::time::sleep(Duration::from_millis(10)).await;
                    }
                }
            }
        });
    }

    /// Spawns task that processes the outgoing letter queue
    fn spawn_network_sender(&mut self) {
        let socket = Arc::clone(&self.socket);
        let Some(mut outbox) = self.outbox.take() else {
            return;
        };

        tokio::spawn(async move {
            while let Some((addr, letter)) = outbox.recv().await {
                match letter.encode() {
                    Ok(data) => {
                        if let Err(e) = socket.send_to(&data, addr).await {
                            error!("Failed to send letter to {}: {}", addr, e);
                        }
                    }
                    Err(e) => error!("Failed to encode {:?} letter: {}", letter.kind(), e),
                }
            }
        });
    }

    /// Runs one pass of the simulation loop: drain the inbox, tick, then hand
    /// this pass's letters to the send task.
    fn service(&mut self, now: Instant) -> Result<(), ServerError> {
        while let Some(letter) = self.inbox.try_pop() {
            self.host.handle_letter(letter, now);
        }
        self.host.update(now);
        self.host.flush()?;
        self.diagnostics.send_replace(self.host.diagnostics());
        Ok(())
    }

    /// Main server loop coordinating all operations
    pub async fn run(&mut self) -> Result<(), ServerError> {
        self.spawn_network_receiver();
        self.spawn_network_sender();

        let mut service_timer = interval(self.service_interval);
        service_timer.set_missed_tick_behavior(MissedTickBehavior::Skip);

        let shutdown = tokio::signal::ctrl_c();
        tokio::pin!(shutdown);

        info!("Server started successfully");

        loop {
            tokio::select! {
                _ = service_timer.tick() => {
                    self.service(Instant::now())?;
                },
                _ = &mut shutdown => {
                    info!("Server shutting down");
                    break;
                }
            }
        }

        Ok(())
    }
}
