//! Delivery station: the single writer of a session's outbound channel.
//!
//! Every sentence of every epoch passes through here, so metadata/audio pairs
//! can never interleave and stop markers are ordered against packets:
//! - packets of an epoch that already got its stop are dropped
//! - at most one stop is emitted per epoch
//! - an older epoch still open is stopped before the first packet of a newer one

use crate::pipeline::types::{Delivery, OutboundPacket, PipelineEvent, StationControl};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, trace};

/// Senders feeding a running delivery station.
#[derive(Debug, Clone)]
pub struct DeliveryHandle {
    /// Ordered sentence/turn-end stream from generation pipelines.
    pub data: mpsc::Sender<Delivery>,
    /// Out-of-band epoch closes from the session actor.
    pub control: mpsc::UnboundedSender<StationControl>,
}

impl DeliveryHandle {
    /// Requests an immediate stop for `epoch`. Returns false once the station
    /// has exited.
    pub fn close_epoch(&self, epoch: u64) -> bool {
        self.control.send(StationControl::Close { epoch }).is_ok()
    }
}

pub struct DeliveryStation {
    session: String,
    output: mpsc::Sender<OutboundPacket>,
    events: mpsc::UnboundedSender<PipelineEvent>,
    /// Highest epoch a stop has been emitted for.
    closed_through: u64,
    /// Epoch with at least one delivered packet and no stop yet.
    open_epoch: Option<u64>,
    output_gone: bool,
}

impl DeliveryStation {
    pub fn new(
        session: &str,
        output: mpsc::Sender<OutboundPacket>,
        events: mpsc::UnboundedSender<PipelineEvent>,
    ) -> Self {
        Self {
            session: session.to_string(),
            output,
            events,
            closed_through: 0,
            open_epoch: None,
            output_gone: false,
        }
    }

    /// Spawns the station with a data queue of `capacity` items.
    pub fn spawn(self, capacity: usize) -> (DeliveryHandle, JoinHandle<()>) {
        let (data_tx, data_rx) = mpsc::channel(capacity.max(1));
        let (control_tx, control_rx) = mpsc::unbounded_channel();
        let task = tokio::spawn(self.run(data_rx, control_rx));
        (
            DeliveryHandle {
                data: data_tx,
                control: control_tx,
            },
            task,
        )
    }

    /// Runs until every data sender is dropped.
    pub async fn run(
        mut self,
        mut data: mpsc::Receiver<Delivery>,
        mut control: mpsc::UnboundedReceiver<StationControl>,
    ) {
        loop {
            tokio::select! {
                biased;
                Some(StationControl::Close { epoch }) = control.recv() => {
                    self.close(epoch).await;
                }
                item = data.recv() => match item {
                    Some(delivery) => self.handle(delivery).await,
                    None => break,
                },
            }
        }
        debug!(session = %self.session, "delivery station stopped");
    }

    async fn handle(&mut self, delivery: Delivery) {
        let epoch = delivery.epoch();
        if epoch <= self.closed_through {
            trace!(session = %self.session, epoch, "dropping stale delivery");
            return;
        }

        match delivery {
            Delivery::Sentence {
                epoch,
                ordinal,
                sentence,
                audio,
            } => {
                if let Some(open) = self.open_epoch
                    && open < epoch
                {
                    self.close(open).await;
                }
                if self.open_epoch != Some(epoch) {
                    self.open_epoch = Some(epoch);
                    self.notify(PipelineEvent::FirstDelivery { epoch });
                }
                debug!(
                    session = %self.session,
                    epoch,
                    ordinal,
                    has_audio = audio.is_some(),
                    "delivering sentence"
                );
                self.emit(OutboundPacket::Sentence { sentence, audio }).await;
            }
            Delivery::EndTurn { epoch } => self.close(epoch).await,
        }
    }

    async fn close(&mut self, epoch: u64) {
        if epoch <= self.closed_through {
            return;
        }
        self.closed_through = epoch;
        if self.open_epoch.is_some_and(|open| open <= epoch) {
            self.open_epoch = None;
        }
        self.notify(PipelineEvent::TurnEnded { epoch });
        debug!(session = %self.session, epoch, "stop");
        self.emit(OutboundPacket::Stop).await;
    }

    fn notify(&self, event: PipelineEvent) {
        if self.events.send(event).is_err() {
            trace!(session = %self.session, "session actor gone");
        }
    }

    async fn emit(&mut self, packet: OutboundPacket) {
        if self.output_gone {
            return;
        }
        if self.output.send(packet).await.is_err() {
            debug!(session = %self.session, "outbound receiver dropped");
            self.output_gone = true;
        }
    }
}
