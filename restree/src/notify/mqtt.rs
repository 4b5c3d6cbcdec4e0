use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::anyhow;
use async_trait::async_trait;
use futures::channel::mpsc;
use futures::{SinkExt, StreamExt};
use ntex::service::fn_service;
use ntex::time::Seconds;
use ntex::util::Ready;
use ntex_mqtt::v3;
use tokio::sync::{oneshot, Mutex};

use crate::error::{Error, Result};
use crate::notify::MqttSender;
use crate::types::{parse_mqtt_endpoint, NotificationPayload, MQTT_DEFAULT_PORT};
use crate::utils::generate_name;

type HashMap<K, V> = std::collections::HashMap<K, V, ahash::RandomState>;

#[derive(Debug, Clone)]
pub struct MqttOptions {
    /// Broker port assumed when an `mqtt://host` endpoint omits one.
    pub default_port: u16,
    pub connect_timeout: Duration,
    pub keepalive: Duration,
    /// Prefix of the generated per-connection client id.
    pub client_id_prefix: String,
    /// Capacity of each connection's command channel.
    pub channel_capacity: usize,
}

impl Default for MqttOptions {
    #[inline]
    fn default() -> Self {
        Self {
            default_port: MQTT_DEFAULT_PORT,
            connect_timeout: Duration::from_secs(8),
            keepalive: Duration::from_secs(60),
            client_id_prefix: "restree".into(),
            channel_capacity: 100,
        }
    }
}

#[derive(Debug)]
pub(crate) enum Command {
    Publish(ntex::util::ByteString, ntex::util::Bytes),
    Close,
}

/// Send-capable handle to one broker connection. Publishing goes through
/// the connection's command loop, so a slow broker blocks only its own
/// loop.
#[derive(Clone, Debug)]
pub(crate) struct CommandMailbox {
    client_id: String,
    closed: Arc<AtomicBool>,
    cmd_tx: mpsc::Sender<Command>,
}

impl CommandMailbox {
    fn new(client_id: String, closed: Arc<AtomicBool>, cmd_tx: mpsc::Sender<Command>) -> Self {
        Self { client_id, closed, cmd_tx }
    }

    #[inline]
    pub(crate) fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    #[inline]
    pub(crate) async fn send(&self, cmd: Command) -> Result<()> {
        self.cmd_tx.clone().send(cmd).await.map_err(|e| Error::Transport(anyhow!(e)))?;
        Ok(())
    }

    #[inline]
    pub(crate) async fn stop(&self) -> Result<()> {
        self.send(Command::Close).await
    }
}

struct ConnectRequest {
    host: String,
    port: u16,
    reply: oneshot::Sender<Result<CommandMailbox>>,
}

/// Pooled MQTT publisher keyed by `(host, port)`.
///
/// One async lock guards lookup, stale-entry eviction and insert; a cached
/// connection is reused only after a liveness re-check. Connecting happens
/// while the lock is held, so concurrent publishes to the same broker never
/// race into duplicate connections. Publishing itself runs outside the
/// lock.
///
/// ntex-mqtt client futures are not `Send`, so connections are established
/// and their loops run on the binary's local task set; `start_connector`
/// must be called once from that context before the first publish.
pub struct MqttConnectionPool {
    opts: MqttOptions,
    conns: Mutex<HashMap<(String, u16), CommandMailbox>>,
    connect_tx: tokio::sync::mpsc::UnboundedSender<ConnectRequest>,
    connect_rx: parking_lot::Mutex<Option<tokio::sync::mpsc::UnboundedReceiver<ConnectRequest>>>,
}

impl MqttConnectionPool {
    pub fn new(opts: MqttOptions) -> Self {
        let (connect_tx, connect_rx) = tokio::sync::mpsc::unbounded_channel();
        Self {
            opts,
            conns: Mutex::new(HashMap::default()),
            connect_tx,
            connect_rx: parking_lot::Mutex::new(Some(connect_rx)),
        }
    }

    /// Spawns the connect worker on the current local task set.
    pub fn start_connector(&self) {
        if let Some(mut rx) = self.connect_rx.lock().take() {
            let opts = self.opts.clone();
            ntex::rt::spawn(async move {
                log::info!("start mqtt connect worker");
                while let Some(req) = rx.recv().await {
                    let res = connect(&opts, &req.host, req.port).await;
                    let _ = req.reply.send(res);
                }
                log::info!("exit mqtt connect worker");
            });
        }
    }

    async fn get_or_create(&self, host: &str, port: u16) -> Result<CommandMailbox> {
        let key = (host.to_string(), port);
        let mut conns = self.conns.lock().await;
        if let Some(mailbox) = conns.get(&key) {
            if !mailbox.is_closed() {
                return Ok(mailbox.clone());
            }
            // stale entry, reconnect below
            conns.remove(&key);
        }
        if self.connect_rx.lock().is_some() {
            return Err(Error::Transport(anyhow!("mqtt connect worker is not running")));
        }
        let (reply, rx) = oneshot::channel();
        self.connect_tx
            .send(ConnectRequest { host: host.to_string(), port, reply })
            .map_err(|_| Error::Transport(anyhow!("mqtt connect worker stopped")))?;
        let mailbox =
            rx.await.map_err(|_| Error::Transport(anyhow!("mqtt connect worker stopped")))??;
        conns.insert(key, mailbox.clone());
        Ok(mailbox)
    }
}

#[async_trait]
impl MqttSender for MqttConnectionPool {
    async fn publish(&self, endpoint: &str, topic: &str, payload: &NotificationPayload) -> Result<()> {
        let (host, port) = parse_mqtt_endpoint(endpoint, self.opts.default_port)?;
        let mailbox = self.get_or_create(&host, port).await?;
        let body = serde_json::to_vec(payload)?;
        mailbox
            .send(Command::Publish(
                ntex::util::ByteString::from(topic),
                ntex::util::Bytes::from(body),
            ))
            .await
    }

    async fn close(&self) {
        let mut conns = self.conns.lock().await;
        for ((host, port), mailbox) in conns.drain() {
            if let Err(e) = mailbox.stop().await {
                log::debug!("{} disconnect from {}:{} failed, {:?}", mailbox.client_id, host, port, e);
            }
        }
    }
}

async fn connect(opts: &MqttOptions, host: &str, port: u16) -> Result<CommandMailbox> {
    let addr = format!("{}:{}", host, port);
    // Fresh client id per connect; brokers kick duplicate ids.
    let client_id = generate_name(&opts.client_id_prefix).to_string();

    let builder = v3::client::MqttConnector::new(addr.clone())
        .client_id(ntex::util::ByteString::from(client_id.clone()))
        .keep_alive(Seconds(opts.keepalive.as_secs() as u16))
        .handshake_timeout(Seconds(opts.connect_timeout.as_secs() as u16));

    let client = builder.connect().await.map_err(|e| {
        log::warn!("{} connect to {} failed, {}", client_id, addr, e);
        Error::Transport(anyhow!("broker {} unavailable, {}", addr, e))
    })?;
    log::info!("{} connected to {}", client_id, addr);

    let sink = client.sink();
    let closed = Arc::new(AtomicBool::new(false));
    let (cmd_tx, cmd_rx) = mpsc::channel::<Command>(opts.channel_capacity);
    let mailbox = CommandMailbox::new(client_id.clone(), closed.clone(), cmd_tx);

    ntex::rt::spawn(ev_loop(client, closed.clone(), client_id.clone()));
    ntex::rt::spawn(cmd_loop(sink, cmd_rx, closed, client_id));
    Ok(mailbox)
}

async fn ev_loop(client: v3::client::Client, closed: Arc<AtomicBool>, client_id: String) {
    let id = client_id.clone();
    if let Err(e) = client
        .start(fn_service(move |control: v3::client::Control<()>| match control {
            v3::client::Control::Publish(publish) => {
                log::debug!("{} publish received: {:?}", id, publish);
                Ready::Ok(publish.ack())
            }
            v3::client::Control::Error(msg) => {
                log::info!("{} codec error: {:?}", id, msg);
                Ready::Ok(msg.ack())
            }
            v3::client::Control::ProtocolError(msg) => {
                log::info!("{} protocol error: {:?}", id, msg);
                Ready::Ok(msg.ack())
            }
            v3::client::Control::PeerGone(msg) => {
                log::info!("{} peer closed connection: {:?}", id, msg.err());
                Ready::Ok(msg.ack())
            }
            v3::client::Control::Closed(msg) => {
                log::info!("{} server closed connection", id);
                Ready::Ok(msg.ack())
            }
        }))
        .await
    {
        log::warn!("{} client event loop error, {:?}", client_id, e);
    }
    // liveness is re-checked lazily on next use; the stale pool entry is
    // evicted then
    closed.store(true, Ordering::SeqCst);
    log::info!("{} mqtt connection closed", client_id);
}

async fn cmd_loop(
    sink: v3::MqttSink,
    mut cmd_rx: mpsc::Receiver<Command>,
    closed: Arc<AtomicBool>,
    client_id: String,
) {
    while !closed.load(Ordering::SeqCst) {
        match cmd_rx.next().await {
            None => break,
            Some(Command::Close) => {
                sink.close();
                closed.store(true, Ordering::SeqCst);
                break;
            }
            Some(Command::Publish(topic, payload)) => {
                let pkt = v3::codec::Publish {
                    dup: false,
                    retain: false,
                    qos: ntex_mqtt::QoS::AtLeastOnce,
                    topic,
                    packet_id: None,
                    payload,
                };
                if let Err(e) = sink.publish_pkt(pkt).send_at_least_once().await {
                    log::warn!("{} publish failed, {}", client_id, e);
                }
            }
        }
    }
    log::info!("{} exit mqtt publish loop", client_id);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{
        ContentInstance, EventFilter, EventKind, NotificationPayload, NotificationResourceInfo,
        Subscription,
    };
    use crate::utils::{format_datetime, now};

    fn payload() -> NotificationPayload {
        let ci =
            ContentInstance::new("ci".into(), "a".into(), "c".into(), "t".into(), "x".into());
        let sub = Subscription::new(
            "s".into(),
            "a".into(),
            "c".into(),
            EventFilter::Both,
            "mqtt://broker.local".into(),
        );
        NotificationPayload::new(
            EventKind::Creation,
            &sub,
            NotificationResourceInfo::from(&ci),
            format_datetime(&now()),
        )
    }

    #[tokio::test]
    async fn test_publish_without_connector_is_unavailable() {
        let pool = MqttConnectionPool::new(MqttOptions::default());
        let err = pool.publish("mqtt://broker.local", "/a/c", &payload()).await.unwrap_err();
        assert!(matches!(err, Error::Transport(_)));
    }

    #[tokio::test]
    async fn test_stale_entry_is_evicted() {
        let pool = MqttConnectionPool::new(MqttOptions::default());
        let (cmd_tx, _cmd_rx) = mpsc::channel(1);
        let dead = CommandMailbox::new("x".into(), Arc::new(AtomicBool::new(true)), cmd_tx);
        pool.conns.lock().await.insert(("broker.local".to_string(), 1883), dead);

        // the dead entry is dropped before the (failing) reconnect attempt
        let err = pool.get_or_create("broker.local", 1883).await.unwrap_err();
        assert!(matches!(err, Error::Transport(_)));
        assert!(pool.conns.lock().await.is_empty());
    }

    #[tokio::test]
    async fn test_bad_endpoint_is_rejected() {
        let pool = MqttConnectionPool::new(MqttOptions::default());
        let err = pool.publish("http://broker.local", "/a/c", &payload()).await.unwrap_err();
        assert!(matches!(err, Error::Transport(_)));
    }
}
