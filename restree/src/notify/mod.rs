use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;

use crate::error::Result;
use crate::store::ResourceStore;
use crate::types::{
    container_path, ContentInstance, EndpointScheme, EventKind, NotificationPayload,
    NotificationResourceInfo, parse_endpoint, Subscription,
};
use crate::utils::{format_datetime, now};

use self::audit::AuditWriter;

pub mod audit;
pub mod http;
pub mod mqtt;

/// A content-instance lifecycle event handed to the dispatch engine.
#[derive(Debug, Clone)]
pub struct Event {
    pub kind: EventKind,
    pub instance: ContentInstance,
}

impl Event {
    #[inline]
    pub fn creation(instance: ContentInstance) -> Self {
        Self { kind: EventKind::Creation, instance }
    }

    #[inline]
    pub fn deletion(instance: ContentInstance) -> Self {
        Self { kind: EventKind::Deletion, instance }
    }
}

/// Webhook transport seam. The default implementation posts JSON with a
/// bounded timeout; send failures are reported, never retried.
#[async_trait]
pub trait HttpSender: Sync + Send {
    async fn send(&self, endpoint: &str, payload: &NotificationPayload) -> Result<()>;
}

/// Broker transport seam. The default implementation is the pooled MQTT
/// publisher; publish failures are reported, never retried.
#[async_trait]
pub trait MqttSender: Sync + Send {
    async fn publish(&self, endpoint: &str, topic: &str, payload: &NotificationPayload) -> Result<()>;
    /// Best-effort disconnect of all broker connections at shutdown.
    async fn close(&self);
}

/// Resolves matching subscriptions for an event, builds per-subscription
/// payloads, persists an audit copy of each, and fans out through the
/// transport senders.
///
/// Each dispatch is one-shot and fire-and-forget: no state machine, no
/// redelivery. The aggregate completes once every individual send has
/// succeeded or failed on its own; one failure neither cancels nor delays
/// the others.
pub struct Dispatcher {
    store: Arc<dyn ResourceStore>,
    http: Arc<dyn HttpSender>,
    mqtt: Arc<dyn MqttSender>,
    audit: Arc<AuditWriter>,
}

impl Dispatcher {
    #[inline]
    pub fn new(
        store: Arc<dyn ResourceStore>,
        http: Arc<dyn HttpSender>,
        mqtt: Arc<dyn MqttSender>,
        audit: Arc<AuditWriter>,
    ) -> Self {
        Self { store, http, mqtt, audit }
    }

    /// Launches a dispatch as a detached task. The triggering request never
    /// awaits it; failures are logged on an independent channel.
    pub fn spawn(self: &Arc<Self>, event: Event) {
        let this = self.clone();
        tokio::spawn(async move {
            let kind = event.kind;
            let path = event.instance.path();
            if let Err(e) = this.dispatch(event).await {
                log::warn!("{} dispatch for {} failed, {:?}", kind.name(), path, e);
            }
        });
    }

    pub async fn dispatch(&self, event: Event) -> Result<()> {
        let instance = &event.instance;
        let app = &instance.application_resource_name;
        let container = &instance.container_resource_name;

        let subscriptions = self.store.subscriptions_for_container(app, container).await?;
        let (http_subs, mqtt_subs) = partition(subscriptions, event.kind);
        if http_subs.is_empty() && mqtt_subs.is_empty() {
            return Ok(());
        }

        // triggeredAt is dispatch time, not the instance's creation time.
        let triggered_at = format_datetime(&now());
        let resource = NotificationResourceInfo::from(instance);
        let topic = container_path(app, container);

        let mut sends: Vec<Pin<Box<dyn Future<Output = ()> + Send>>> = Vec::new();
        for sub in http_subs {
            let payload = NotificationPayload::new(event.kind, &sub, resource.clone(), triggered_at.clone());
            self.persist(app, &payload).await;
            let http = self.http.clone();
            let endpoint = sub.endpoint.clone();
            sends.push(Box::pin(async move {
                if let Err(e) = http.send(&endpoint, &payload).await {
                    log::warn!("http notification to {} failed, {:?}", endpoint, e);
                }
            }));
        }
        for sub in mqtt_subs {
            let payload = NotificationPayload::new(event.kind, &sub, resource.clone(), triggered_at.clone());
            self.persist(app, &payload).await;
            let mqtt = self.mqtt.clone();
            let endpoint = sub.endpoint.clone();
            let topic = topic.clone();
            sends.push(Box::pin(async move {
                if let Err(e) = mqtt.publish(&endpoint, &topic, &payload).await {
                    log::warn!("mqtt notification to {} on topic {} failed, {:?}", endpoint, topic, e);
                }
            }));
        }

        futures::future::join_all(sends).await;
        Ok(())
    }

    /// Audit-write failures never surface beyond a log line.
    async fn persist(&self, app: &str, payload: &NotificationPayload) {
        if let Err(e) = self.audit.save(app, payload).await {
            log::warn!("failed to persist notification record for {}, {:?}", app, e);
        }
    }
}

/// Retains subscriptions matching the event kind with a non-empty endpoint
/// and splits them by endpoint scheme.
fn partition(
    subscriptions: Vec<Subscription>,
    kind: EventKind,
) -> (Vec<Subscription>, Vec<Subscription>) {
    let mut http_subs = Vec::new();
    let mut mqtt_subs = Vec::new();
    for sub in subscriptions {
        if !sub.evt.matches(kind) || sub.endpoint.trim().is_empty() {
            continue;
        }
        match parse_endpoint(&sub.endpoint) {
            Ok(EndpointScheme::Http) | Ok(EndpointScheme::Https) => http_subs.push(sub),
            Ok(EndpointScheme::Mqtt) => mqtt_subs.push(sub),
            Err(e) => {
                log::warn!("subscription {} has an unusable endpoint, {:?}", sub.resource_name, e)
            }
        }
    }
    (http_subs, mqtt_subs)
}

#[cfg(test)]
pub(crate) mod tests {
    use std::time::Duration;

    use tokio::sync::mpsc;
    use tokio::sync::Notify;

    use super::*;
    use crate::store::DefaultResourceStore;
    use crate::types::{Application, Container, EventFilter};

    #[derive(Debug, Clone)]
    pub(crate) struct SentNotification {
        pub kind: EventKind,
        pub endpoint: String,
        pub topic: Option<String>,
        pub payload: NotificationPayload,
    }

    fn kind_of(payload: &NotificationPayload) -> EventKind {
        if payload.event_code == 1 {
            EventKind::Creation
        } else {
            EventKind::Deletion
        }
    }

    pub(crate) struct MockHttpSender {
        tx: mpsc::UnboundedSender<SentNotification>,
        stall: Option<(String, Arc<Notify>)>,
    }

    #[async_trait]
    impl HttpSender for MockHttpSender {
        async fn send(&self, endpoint: &str, payload: &NotificationPayload) -> Result<()> {
            if let Some((slow, gate)) = &self.stall {
                if endpoint == slow {
                    gate.notified().await;
                }
            }
            let _ = self.tx.send(SentNotification {
                kind: kind_of(payload),
                endpoint: endpoint.to_string(),
                topic: None,
                payload: payload.clone(),
            });
            Ok(())
        }
    }

    pub(crate) struct MockMqttSender {
        tx: mpsc::UnboundedSender<SentNotification>,
    }

    #[async_trait]
    impl MqttSender for MockMqttSender {
        async fn publish(
            &self,
            endpoint: &str,
            topic: &str,
            payload: &NotificationPayload,
        ) -> Result<()> {
            let _ = self.tx.send(SentNotification {
                kind: kind_of(payload),
                endpoint: endpoint.to_string(),
                topic: Some(topic.to_string()),
                payload: payload.clone(),
            });
            Ok(())
        }

        async fn close(&self) {}
    }

    fn audit_writer() -> Arc<AuditWriter> {
        Arc::new(AuditWriter::new(tempfile::tempdir().unwrap().into_path()))
    }

    pub(crate) fn watching_dispatcher(
        store: Arc<dyn ResourceStore>,
    ) -> (Arc<Dispatcher>, mpsc::UnboundedReceiver<SentNotification>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let http = Arc::new(MockHttpSender { tx: tx.clone(), stall: None });
        let mqtt = Arc::new(MockMqttSender { tx });
        (Arc::new(Dispatcher::new(store, http, mqtt, audit_writer())), rx)
    }

    async fn seeded_store() -> Arc<dyn ResourceStore> {
        let store = Arc::new(DefaultResourceStore::new());
        store.insert_application(Application::new("a".into())).await.unwrap();
        store.insert_container(Container::new("c".into(), "a".into())).await.unwrap();
        store
    }

    async fn add_sub(store: &Arc<dyn ResourceStore>, name: &str, evt: EventFilter, endpoint: &str) {
        store
            .insert_subscription(Subscription::new(
                name.into(),
                "a".into(),
                "c".into(),
                evt,
                endpoint.into(),
            ))
            .await
            .unwrap();
    }

    fn instance() -> ContentInstance {
        ContentInstance::new("ci".into(), "a".into(), "c".into(), "text/plain".into(), "21".into())
    }

    #[tokio::test]
    async fn test_event_filter_routes_to_one_transport() {
        let store = seeded_store().await;
        add_sub(&store, "s1", EventFilter::Creation, "http://x").await;
        add_sub(&store, "s2", EventFilter::Deletion, "mqtt://y").await;
        let (dispatcher, mut rx) = watching_dispatcher(store);

        dispatcher.dispatch(Event::creation(instance())).await.unwrap();
        let sent = rx.recv().await.unwrap();
        assert_eq!(sent.kind, EventKind::Creation);
        assert_eq!(sent.endpoint, "http://x");
        assert_eq!(sent.topic, None);
        assert!(rx.try_recv().is_err(), "creation must not reach the deletion subscription");

        dispatcher.dispatch(Event::deletion(instance())).await.unwrap();
        let sent = rx.recv().await.unwrap();
        assert_eq!(sent.kind, EventKind::Deletion);
        assert_eq!(sent.endpoint, "mqtt://y");
        assert_eq!(sent.topic.as_deref(), Some("/a/c"));
        assert!(rx.try_recv().is_err(), "deletion must not reach the creation subscription");
    }

    #[tokio::test]
    async fn test_both_filter_notified_twice() {
        let store = seeded_store().await;
        add_sub(&store, "s1", EventFilter::Both, "http://x").await;
        let (dispatcher, mut rx) = watching_dispatcher(store);

        dispatcher.dispatch(Event::creation(instance())).await.unwrap();
        dispatcher.dispatch(Event::deletion(instance())).await.unwrap();
        assert_eq!(rx.recv().await.unwrap().kind, EventKind::Creation);
        assert_eq!(rx.recv().await.unwrap().kind, EventKind::Deletion);
    }

    #[tokio::test]
    async fn test_empty_endpoint_is_skipped() {
        let store = seeded_store().await;
        add_sub(&store, "s1", EventFilter::Both, "").await;
        let (dispatcher, mut rx) = watching_dispatcher(store);
        dispatcher.dispatch(Event::creation(instance())).await.unwrap();
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_payload_contents() {
        let store = seeded_store().await;
        add_sub(&store, "s1", EventFilter::Creation, "http://x").await;
        let (dispatcher, mut rx) = watching_dispatcher(store);
        dispatcher.dispatch(Event::creation(instance())).await.unwrap();
        let sent = rx.recv().await.unwrap();

        let p = &sent.payload;
        p.validate().unwrap();
        assert_eq!(p.event_type, "creation");
        assert_eq!(p.event_code, 1);
        assert_eq!(&*p.subscription.resource_name, "s1");
        assert_eq!(p.subscription.evt, EventFilter::Creation);
        assert_eq!(&*p.subscription.endpoint, "http://x");
        assert_eq!(&*p.resource.resource_name, "ci");
        assert_eq!(p.resource.path, "/a/c/ci");
        assert!(!p.triggered_at.is_empty());
    }

    #[tokio::test]
    async fn test_slow_endpoint_does_not_delay_others() {
        let store = seeded_store().await;
        for i in 0..9 {
            add_sub(&store, &format!("s{i}"), EventFilter::Creation, &format!("http://fast/{i}")).await;
        }
        add_sub(&store, "slow", EventFilter::Creation, "http://stuck").await;

        let (tx, mut rx) = mpsc::unbounded_channel();
        let gate = Arc::new(Notify::new());
        let http = Arc::new(MockHttpSender {
            tx: tx.clone(),
            stall: Some(("http://stuck".to_string(), gate.clone())),
        });
        let mqtt = Arc::new(MockMqttSender { tx });
        let dispatcher = Arc::new(Dispatcher::new(store, http, mqtt, audit_writer()));

        let handle = tokio::spawn({
            let dispatcher = dispatcher.clone();
            async move { dispatcher.dispatch(Event::creation(instance())).await }
        });

        // all nine healthy endpoints are served while one hangs
        let mut fast = 0;
        while fast < 9 {
            let sent =
                tokio::time::timeout(Duration::from_secs(5), rx.recv()).await.unwrap().unwrap();
            assert_ne!(sent.endpoint, "http://stuck");
            fast += 1;
        }
        assert!(!handle.is_finished());

        gate.notify_one();
        let sent = tokio::time::timeout(Duration::from_secs(5), rx.recv()).await.unwrap().unwrap();
        assert_eq!(sent.endpoint, "http://stuck");
        handle.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_no_subscriptions_is_a_noop() {
        let store = seeded_store().await;
        let (dispatcher, mut rx) = watching_dispatcher(store);
        dispatcher.dispatch(Event::creation(instance())).await.unwrap();
        assert!(rx.try_recv().is_err());
    }
}
