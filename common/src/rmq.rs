use std::sync::atomic::AtomicUsize;
use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwap;
use async_stream::stream;
use futures::{Stream, StreamExt};
use lapin::message::Delivery;
use lapin::options::{
    BasicConsumeOptions, BasicPublishOptions, BasicQosOptions, ConfirmSelectOptions,
};
use lapin::publisher_confirm::Confirmation;
use lapin::topology::TopologyDefinition;
use lapin::types::FieldTable;
use lapin::{BasicProperties, Channel, Connection, ConnectionProperties};
use tracing::{info_span, Instrument};

use crate::config::BrokerConfig;
use crate::prelude::FutureTimeout;

/// Delivery mode 2 marks a message as persistent on durable queues.
const DELIVERY_MODE_PERSISTENT: u8 = 2;

const PUBLISH_ATTEMPTS: u32 = 3;

#[derive(Debug, thiserror::Error)]
pub enum BrokerError {
    #[error("amqp: {0}")]
    Amqp(#[from] lapin::Error),
    #[error("timed out talking to the broker")]
    Timeout,
    #[error("no connections available")]
    NoConnections,
    #[error("broker nacked the publish")]
    PublishNacked,
}

impl From<tokio::time::error::Elapsed> for BrokerError {
    fn from(_: tokio::time::error::Elapsed) -> Self {
        Self::Timeout
    }
}

/// A pool of AMQP connections. Channels are cheap and created per use; the
/// underlying connections are kept alive, watched for errors and replaced
/// with their topology restored when they break.
pub struct ConnectionPool {
    uri: String,
    timeout: Duration,
    properties: ConnectionProperties,
    error_queue: tokio::sync::mpsc::Sender<usize>,
    error_queue_rx: tokio::sync::Mutex<tokio::sync::mpsc::Receiver<usize>>,
    new_connection_waker: tokio::sync::broadcast::Sender<()>,
    connections: Vec<ArcSwap<Connection>>,
    acquire_idx: AtomicUsize,
}

impl ConnectionPool {
    pub async fn connect(config: &BrokerConfig, timeout: Duration) -> Result<Self, BrokerError> {
        let pool_size = config.pool_size.max(1);
        let connections = Vec::with_capacity(pool_size);
        let (tx, rx) = tokio::sync::mpsc::channel(pool_size);

        let mut pool = Self {
            uri: config.uri(),
            properties: ConnectionProperties::default(),
            timeout,
            connections,
            error_queue: tx,
            error_queue_rx: tokio::sync::Mutex::new(rx),
            new_connection_waker: tokio::sync::broadcast::channel(1).0,
            acquire_idx: AtomicUsize::new(0),
        };

        for i in 0..pool_size {
            let conn = pool.new_connection(i, None).await?;
            pool.connections.push(ArcSwap::from(Arc::new(conn)));
        }

        Ok(pool)
    }

    /// Replaces broken connections until the pool itself gives up. Run this
    /// next to the worker future; it returning an error means the broker is
    /// gone for good and the process should exit.
    pub async fn handle_reconnects(&self) -> Result<(), BrokerError> {
        loop {
            let idx = self
                .error_queue_rx
                .lock()
                .await
                .recv()
                .await
                .expect("error queue closed");
            let conn = async {
                loop {
                    let conn = match self
                        .new_connection(idx, Some(self.connections[idx].load().topology()))
                        .await
                    {
                        Ok(conn) => conn,
                        Err(err) => {
                            tracing::error!("failed to reconnect: {}", err);
                            tokio::time::sleep(Duration::from_secs(1)).await;
                            continue;
                        }
                    };

                    tracing::info!("reconnected to the broker");
                    break conn;
                }
            }
            .instrument(info_span!("reconnect broker", idx))
            .timeout(self.timeout)
            .await?;

            self.connections[idx].store(Arc::new(conn));
            self.new_connection_waker.send(()).ok();
        }
    }

    async fn new_connection(
        &self,
        idx: usize,
        topology: Option<TopologyDefinition>,
    ) -> Result<Connection, BrokerError> {
        let conn = Connection::connect(&self.uri, self.properties.clone())
            .timeout(self.timeout)
            .await??;

        if let Some(topology) = topology {
            conn.restore(topology).await?;
        }

        let sender = self.error_queue.clone();
        conn.on_error(move |e| {
            tracing::error!("broker connection error: {:?}", e);

            if let Err(err) = sender.try_send(idx) {
                tracing::error!("failed to schedule reconnect: {}", err);
            }
        });

        Ok(conn)
    }

    /// Consumes a queue, with the prefetch window applied, yielding
    /// deliveries until the pool is dropped. Connection resets are handled
    /// internally by re-consuming on a fresh channel.
    pub fn consume(
        &self,
        queue_name: impl ToString,
        consumer_tag: impl ToString,
        prefetch: u16,
    ) -> impl Stream<Item = Result<Delivery, BrokerError>> + '_ {
        let queue_name = queue_name.to_string();
        let consumer_tag = consumer_tag.to_string();

        stream!({
            'connection_loop: loop {
                let channel = match self.acquire().await {
                    Ok(channel) => channel,
                    Err(e) => {
                        yield Err(e);
                        continue 'connection_loop;
                    }
                };

                if let Err(e) = channel.basic_qos(prefetch, BasicQosOptions::default()).await {
                    yield Err(e.into());
                    continue 'connection_loop;
                }

                let mut consumer = match channel
                    .basic_consume(
                        &queue_name,
                        &consumer_tag,
                        BasicConsumeOptions::default(),
                        FieldTable::default(),
                    )
                    .await
                {
                    Ok(consumer) => consumer,
                    Err(e) => {
                        yield Err(e.into());
                        continue 'connection_loop;
                    }
                };

                loop {
                    match consumer.next().await {
                        Some(Ok(delivery)) => {
                            yield Ok(delivery);
                        }
                        Some(Err(e)) => match e {
                            lapin::Error::IOError(e) => {
                                if e.kind() == std::io::ErrorKind::ConnectionReset {
                                    continue 'connection_loop;
                                }
                            }
                            _ => {
                                yield Err(e.into());
                            }
                        },
                        None => {
                            continue 'connection_loop;
                        }
                    }
                }
            }
        })
    }

    pub async fn acquire(&self) -> Result<Channel, BrokerError> {
        let mut done = false;
        loop {
            let mut conn = None;
            let start_idx = self
                .acquire_idx
                .fetch_add(1, std::sync::atomic::Ordering::Relaxed)
                % self.connections.len();
            for c in self.connections[start_idx..]
                .iter()
                .chain(self.connections[..start_idx].iter())
            {
                let loaded = c.load();
                if loaded.status().connected() {
                    conn = Some(loaded.clone());
                    break;
                }
            }

            if let Some(conn) = conn {
                let channel = conn.create_channel().await?;
                return Ok(channel);
            }

            if done {
                return Err(BrokerError::NoConnections);
            }

            done = true;
            self.new_connection_waker
                .subscribe()
                .recv()
                .timeout(self.timeout)
                .await?
                .ok();
        }
    }

    /// Publishes a message and waits for the broker to confirm it. Workers
    /// rely on this to sequence database commit, publish and ack; returning
    /// `Ok` means the broker took responsibility for the message.
    pub async fn publish(
        &self,
        correlation_id: &str,
        exchange: &str,
        routing_key: &str,
        durable: bool,
        body: &[u8],
    ) -> Result<(), BrokerError> {
        let channel = self.acquire().await?;
        channel
            .confirm_select(ConfirmSelectOptions::default())
            .await?;

        let mut properties = BasicProperties::default()
            .with_content_type("application/json".into())
            .with_correlation_id(correlation_id.into());
        if durable {
            properties = properties.with_delivery_mode(DELIVERY_MODE_PERSISTENT);
        }

        let confirm = channel
            .basic_publish(
                exchange,
                routing_key,
                BasicPublishOptions::default(),
                body,
                properties,
            )
            .await?;

        match confirm.await? {
            Confirmation::Nack(_) => Err(BrokerError::PublishNacked),
            Confirmation::Ack(_) | Confirmation::NotRequested => Ok(()),
        }
    }

    /// `publish` with a bounded retry, for the path where the database has
    /// already committed and dropping the message would strand the file.
    pub async fn publish_with_retry(
        &self,
        correlation_id: &str,
        exchange: &str,
        routing_key: &str,
        durable: bool,
        body: &[u8],
    ) -> Result<(), BrokerError> {
        let mut backoff = Duration::from_millis(500);

        for attempt in 1..=PUBLISH_ATTEMPTS {
            match self
                .publish(correlation_id, exchange, routing_key, durable, body)
                .await
            {
                Ok(()) => return Ok(()),
                Err(err) if attempt < PUBLISH_ATTEMPTS => {
                    tracing::warn!(attempt, error = %err, "publish failed, retrying");
                    tokio::time::sleep(backoff).await;
                    backoff *= 2;
                }
                Err(err) => return Err(err),
            }
        }

        Err(BrokerError::NoConnections)
    }

    /// Closes every pooled connection. Part of the shutdown sequence, after
    /// the workers have stopped consuming.
    pub async fn close(&self) {
        for c in &self.connections {
            let conn = c.load();
            if let Err(err) = conn.close(200, "shutting down").await {
                tracing::debug!("error closing broker connection: {}", err);
            }
        }
    }
}
