//! Client network layer: UDP I/O tasks around the frame loop

use crate::session::{ClientStatus, LockstepClient};
use log::{error, info, warn};
use shared::{
    ControlSource, Envelope, LockstepConfig, LockstepWorld, QueueConsumer, QueueProducer,
    TransportQueue, MAX_DATAGRAM_SIZE,
};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::net::UdpSocket;
use tokio::sync::watch;
use tokio::time::{interval, MissedTickBehavior};

pub type ClientError = Box<dyn std::error::Error + Send + Sync>;

pub struct Client<W, C> {
    socket: Arc<UdpSocket>,
    server_addr: SocketAddr,
    core: LockstepClient<W, C>,
    frame_interval: Duration,

    // Communication queues
    tick_tx: QueueProducer<Envelope>,
    control_tx: QueueProducer<Envelope>,
    control: QueueConsumer<Envelope>,
    outbox: Option<QueueConsumer<Envelope>>,
    status: watch::Sender<ClientStatus>,
}

impl<W, C> Client<W, C>
where
    W: LockstepWorld + Default + Send + 'static,
    C: ControlSource + Send + 'static,
{
    pub async fn new(
        server_addr: &str,
        input: C,
        config: LockstepConfig,
        frame_interval: Duration,
    ) -> Result<Self, ClientError> {
        config.validate()?;

        let server_addr: SocketAddr = server_addr.parse()?;
        let bind_addr = if server_addr.is_ipv4() {
            "0.0.0.0:0"
        } else {
            "[::]:0"
        };
        let socket = Arc::new(UdpSocket::bind(bind_addr).await?);

        let tick_inbox = TransportQueue::unbounded();
        let tick_tx = tick_inbox.0.clone();
        let (control_tx, control) = TransportQueue::unbounded();
        let (outbox_tx, outbox) = TransportQueue::unbounded();
        let (status, _) = watch::channel(ClientStatus::default());

        Ok(Client {
            socket,
            server_addr,
            core: LockstepClient::new(config, input, tick_inbox, outbox_tx, Instant::now()),
            frame_interval,
            tick_tx,
            control_tx,
            control,
            outbox: Some(outbox),
            status,
        })
    }

    pub fn subscribe_status(&self) -> watch::Receiver<ClientStatus> {
        self.status.subscribe()
    }

    /// Spawns task that routes incoming letters: ticks to the tick inbox,
    /// everything else to the control queue
    fn spawn_network_receiver(&self) {
        let socket = Arc::clone(&self.socket);
        let server_addr = self.server_addr;
        let tick_tx = self.tick_tx.clone();
        let control_tx = self.control_tx.clone();

        tokio::spawn(async move {
            let mut buffer = vec![0u8; MAX_DATAGRAM_SIZE];

            loop {
                match socket.recv_from(&mut buffer).await {
                    Ok((len, addr)) => {
                        if addr != server_addr {
                            warn!("Ignoring datagram from {}", addr);
                            continue;
                        }

                        let letter = match Envelope::decode(&buffer[..len]) {
                            Ok(letter) => letter.with_sender(addr),
                            Err(e) => {
                                warn!("Failed to decode letter: {}", e);
                                continue;
                            }
                        };

                        let queue = if letter.is_sequenced() {
                            &tick_tx
                        } else {
                            &control_tx
                        };
                        if queue.push(letter).is_err() {
                            info!("Client queues closed, stopping receiver");
                            break;
                        }
                    }
                    Err(e) => {
                        error!("Error receiving datagram: {}", e);
                        tokio::time::sleep(Duration::from_millis(10)).await;
                    }
                }
            }
        });
    }

    /// Spawns task that sends queued letters to the server
    fn spawn_network_sender(&mut self) {
        let socket = Arc::clone(&self.socket);
        let server_addr = self.server_addr;
        let Some(mut outbox) = self.outbox.take() else {
            return;
        };

        tokio::spawn(async move {
            while let Some(letter) = outbox.recv().await {
                if let Err(e) = send_letter(&socket, &letter, server_addr).await {
                    error!("Failed to send {:?} letter: {}", letter.kind(), e);
                }
            }
        });
    }

    fn frame(&mut self, now: Instant) -> Result<(), ClientError> {
        while let Some(letter) = self.control.try_pop() {
            self.core.handle_control(letter, now)?;
        }
        self.core.frame(now)?;
        self.status.send_replace(self.core.status());
        Ok(())
    }

    pub async fn run(&mut self) -> Result<(), ClientError> {
        self.spawn_network_receiver();
        self.spawn_network_sender();

        let mut frame_timer = interval(self.frame_interval);
        frame_timer.set_missed_tick_behavior(MissedTickBehavior::Skip);

        let shutdown = tokio::signal::ctrl_c();
        tokio::pin!(shutdown);

        info!("Starting client...");

        loop {
            tokio::select! {
                _ = frame_timer.tick() => {
                    self.frame(Instant::now())?;
                },
                _ = &mut shutdown => {
                    info!("Client shutting down");
                    break;
                }
            }
        }

        if let Some(goodbye) = self.core.goodbye("Client closing") {
            send_letter(&self.socket, &goodbye, self.server_addr).await?;
        }

        Ok(())
    }
}

async fn send_letter(
    socket: &UdpSocket,
    letter: &Envelope,
    addr: SocketAddr,
) -> Result<(), ClientError> {
    let data = letter.encode()?;
    socket.send_to(&data, addr).await?;
    Ok(())
}
