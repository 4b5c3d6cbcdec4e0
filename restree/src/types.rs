use std::fmt;
use std::str::FromStr;

use anyhow::anyhow;
use bytestring::ByteString;
use serde::de::{self, Deserializer};
use serde::ser::Serializer;
use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::{Error, Result};
use crate::utils::{datetime_format, format_datetime, now, Timestamp};

/// Resource names are unique within their parent scope and show up in
/// canonical paths, so they are kept as cheaply cloneable byte strings.
pub type ResourceName = ByteString;

/// Default broker port used when an `mqtt://` endpoint omits one.
pub const MQTT_DEFAULT_PORT: u16 = 1883;

/// The four kinds of resources in the tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ResourceType {
    #[serde(rename = "application")]
    Application,
    #[serde(rename = "container")]
    Container,
    #[serde(rename = "content-instance")]
    ContentInstance,
    #[serde(rename = "subscription")]
    Subscription,
}

impl ResourceType {
    #[inline]
    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceType::Application => "application",
            ResourceType::Container => "container",
            ResourceType::ContentInstance => "content-instance",
            ResourceType::Subscription => "subscription",
        }
    }
}

impl fmt::Display for ResourceType {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Top-level namespace resource owning containers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Application {
    pub resource_name: ResourceName,
    #[serde(with = "datetime_format")]
    pub creation_datetime: Timestamp,
    pub res_type: ResourceType,
}

impl Application {
    #[inline]
    pub fn new(resource_name: ResourceName) -> Self {
        Self { resource_name, creation_datetime: now(), res_type: ResourceType::Application }
    }

    #[inline]
    pub fn path(&self) -> String {
        format!("/{}", self.resource_name)
    }
}

/// Grouping resource owning content-instances and subscriptions; exactly one
/// parent application.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Container {
    pub resource_name: ResourceName,
    #[serde(with = "datetime_format")]
    pub creation_datetime: Timestamp,
    pub res_type: ResourceType,
    pub application_resource_name: ResourceName,
}

impl Container {
    #[inline]
    pub fn new(resource_name: ResourceName, application_resource_name: ResourceName) -> Self {
        Self {
            resource_name,
            creation_datetime: now(),
            res_type: ResourceType::Container,
            application_resource_name,
        }
    }

    #[inline]
    pub fn path(&self) -> String {
        container_path(&self.application_resource_name, &self.resource_name)
    }
}

/// Immutable record representing one state/event sample. Create and delete
/// are the only mutating operations, and the only notification triggers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContentInstance {
    pub resource_name: ResourceName,
    #[serde(with = "datetime_format")]
    pub creation_datetime: Timestamp,
    pub res_type: ResourceType,
    pub container_resource_name: ResourceName,
    pub application_resource_name: ResourceName,
    pub content_type: ByteString,
    pub content: ByteString,
}

impl ContentInstance {
    #[inline]
    pub fn new(
        resource_name: ResourceName,
        application_resource_name: ResourceName,
        container_resource_name: ResourceName,
        content_type: ByteString,
        content: ByteString,
    ) -> Self {
        Self {
            resource_name,
            creation_datetime: now(),
            res_type: ResourceType::ContentInstance,
            container_resource_name,
            application_resource_name,
            content_type,
            content,
        }
    }

    #[inline]
    pub fn path(&self) -> String {
        format!(
            "/{}/{}/{}",
            self.application_resource_name, self.container_resource_name, self.resource_name
        )
    }
}

/// Registration of an endpoint notified on content-instance creation and/or
/// deletion within one container.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Subscription {
    pub resource_name: ResourceName,
    #[serde(with = "datetime_format")]
    pub creation_datetime: Timestamp,
    pub res_type: ResourceType,
    pub container_resource_name: ResourceName,
    pub application_resource_name: ResourceName,
    pub evt: EventFilter,
    pub endpoint: ByteString,
}

impl Subscription {
    #[inline]
    pub fn new(
        resource_name: ResourceName,
        application_resource_name: ResourceName,
        container_resource_name: ResourceName,
        evt: EventFilter,
        endpoint: ByteString,
    ) -> Self {
        Self {
            resource_name,
            creation_datetime: now(),
            res_type: ResourceType::Subscription,
            container_resource_name,
            application_resource_name,
            evt,
            endpoint,
        }
    }

    #[inline]
    pub fn path(&self) -> String {
        format!(
            "/{}/{}/subs/{}",
            self.application_resource_name, self.container_resource_name, self.resource_name
        )
    }
}

/// Canonical path of a container, also the MQTT topic notifications for that
/// container are published to.
#[inline]
pub fn container_path(app: &str, container: &str) -> String {
    format!("/{app}/{container}")
}

/// The two notification-triggering events.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    Creation,
    Deletion,
}

impl EventKind {
    #[inline]
    pub fn code(&self) -> u8 {
        match self {
            EventKind::Creation => 1,
            EventKind::Deletion => 2,
        }
    }

    #[inline]
    pub fn name(&self) -> &'static str {
        match self {
            EventKind::Creation => "creation",
            EventKind::Deletion => "deletion",
        }
    }
}

/// Subscription event filter: 1=creation, 2=deletion, 3=both.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventFilter {
    Creation,
    Deletion,
    Both,
}

impl EventFilter {
    #[inline]
    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            1 => Some(EventFilter::Creation),
            2 => Some(EventFilter::Deletion),
            3 => Some(EventFilter::Both),
            _ => None,
        }
    }

    #[inline]
    pub fn value(&self) -> u8 {
        match self {
            EventFilter::Creation => 1,
            EventFilter::Deletion => 2,
            EventFilter::Both => 3,
        }
    }

    #[inline]
    pub fn matches(&self, kind: EventKind) -> bool {
        matches!(self, EventFilter::Both) || self.value() == kind.code()
    }
}

impl Serialize for EventFilter {
    #[inline]
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u8(self.value())
    }
}

impl<'de> Deserialize<'de> for EventFilter {
    #[inline]
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let code = u8::deserialize(deserializer)?;
        EventFilter::from_code(code)
            .ok_or_else(|| de::Error::custom(format!("evt must be 1, 2 or 3, got {code}")))
    }
}

/// Schemes a subscription endpoint may carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndpointScheme {
    Http,
    Https,
    Mqtt,
}

/// Validates a subscription endpoint: an absolute URI with scheme http,
/// https or mqtt and a non-empty host.
pub fn parse_endpoint(endpoint: &str) -> Result<EndpointScheme> {
    let url = Url::parse(endpoint)
        .map_err(|_| Error::validation("endpoint must be an absolute URI (http://, https:// or mqtt://)"))?;
    let scheme = match url.scheme() {
        "http" => EndpointScheme::Http,
        "https" => EndpointScheme::Https,
        "mqtt" => EndpointScheme::Mqtt,
        _ => {
            return Err(Error::validation(
                "endpoint must be an absolute URI (http://, https:// or mqtt://)",
            ))
        }
    };
    if url.host_str().map(str::is_empty).unwrap_or(true) {
        return Err(Error::validation("endpoint must include a host"));
    }
    Ok(scheme)
}

/// Splits an `mqtt://host[:port]` endpoint into broker host and port,
/// falling back to `default_port` when none is given.
pub fn parse_mqtt_endpoint(endpoint: &str, default_port: u16) -> Result<(String, u16)> {
    let url = Url::parse(endpoint).map_err(|e| Error::Transport(anyhow!("{endpoint}, {e}")))?;
    if url.scheme() != "mqtt" {
        return Err(Error::Transport(anyhow!("not an mqtt endpoint, {endpoint}")));
    }
    let host =
        url.host_str().filter(|h| !h.is_empty()).ok_or_else(|| Error::Transport(anyhow!("missing broker host, {endpoint}")))?;
    Ok((host.to_string(), url.port().unwrap_or(default_port)))
}

/// Typed discovery marker, parsed once at the HTTP surface; selects listing
/// children instead of fetching one resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiscoveryKind {
    Application,
    Container,
    ContentInstance,
    Subscription,
}

impl FromStr for DiscoveryKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "application" => Ok(DiscoveryKind::Application),
            "container" => Ok(DiscoveryKind::Container),
            "content-instance" => Ok(DiscoveryKind::ContentInstance),
            "subscription" => Ok(DiscoveryKind::Subscription),
            _ => Err(Error::validation(
                "discovery kind must be application, container, content-instance or subscription",
            )),
        }
    }
}

/// Outbound notification, also the persisted audit record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationPayload {
    pub event_type: String,
    pub event_code: u8,
    pub subscription: NotificationSubscriptionInfo,
    pub resource: NotificationResourceInfo,
    pub triggered_at: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationSubscriptionInfo {
    pub resource_name: ResourceName,
    pub evt: EventFilter,
    pub endpoint: ByteString,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationResourceInfo {
    pub resource_name: ResourceName,
    pub creation_datetime: String,
    pub res_type: ResourceType,
    pub container_resource_name: ResourceName,
    pub application_resource_name: ResourceName,
    pub content_type: ByteString,
    pub content: ByteString,
    pub path: String,
}

impl NotificationPayload {
    #[inline]
    pub fn new(
        kind: EventKind,
        subscription: &Subscription,
        resource: NotificationResourceInfo,
        triggered_at: String,
    ) -> Self {
        Self {
            event_type: kind.name().to_string(),
            event_code: kind.code(),
            subscription: NotificationSubscriptionInfo {
                resource_name: subscription.resource_name.clone(),
                evt: subscription.evt,
                endpoint: subscription.endpoint.clone(),
            },
            resource,
            triggered_at,
        }
    }

    /// Checks the record against the fixed notification schema. Runs before
    /// every audit write and before every send.
    pub fn validate(&self) -> Result<()> {
        match (self.event_type.as_str(), self.event_code) {
            ("creation", 1) | ("deletion", 2) => {}
            _ => {
                return Err(Error::validation(format!(
                    "eventType {:?} does not match eventCode {}",
                    self.event_type, self.event_code
                )))
            }
        }
        if self.subscription.resource_name.is_empty() {
            return Err(Error::validation("subscription.resourceName must not be empty"));
        }
        if self.subscription.endpoint.is_empty() {
            return Err(Error::validation("subscription.endpoint must not be empty"));
        }
        let r = &self.resource;
        if r.res_type != ResourceType::ContentInstance {
            return Err(Error::validation("resource.resType must be content-instance"));
        }
        if r.resource_name.is_empty()
            || r.container_resource_name.is_empty()
            || r.application_resource_name.is_empty()
        {
            return Err(Error::validation("resource names must not be empty"));
        }
        if !r.path.starts_with('/') {
            return Err(Error::validation("resource.path must be a canonical path"));
        }
        if self.triggered_at.is_empty() {
            return Err(Error::validation("triggeredAt must not be empty"));
        }
        Ok(())
    }
}

impl From<&ContentInstance> for NotificationResourceInfo {
    #[inline]
    fn from(ci: &ContentInstance) -> Self {
        Self {
            resource_name: ci.resource_name.clone(),
            creation_datetime: format_datetime(&ci.creation_datetime),
            res_type: ci.res_type,
            container_resource_name: ci.container_resource_name.clone(),
            application_resource_name: ci.application_resource_name.clone(),
            content_type: ci.content_type.clone(),
            content: ci.content.clone(),
            path: ci.path(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn instance() -> ContentInstance {
        ContentInstance::new(
            "ci1".into(),
            "app1".into(),
            "cont1".into(),
            "application/json".into(),
            "{\"temp\":21}".into(),
        )
    }

    fn subscription(evt: EventFilter, endpoint: &str) -> Subscription {
        Subscription::new("sub1".into(), "app1".into(), "cont1".into(), evt, endpoint.into())
    }

    #[test]
    fn test_canonical_paths() {
        let app = Application::new("app1".into());
        assert_eq!(app.path(), "/app1");

        let cont = Container::new("cont1".into(), "app1".into());
        assert_eq!(cont.path(), "/app1/cont1");

        assert_eq!(instance().path(), "/app1/cont1/ci1");
        assert_eq!(subscription(EventFilter::Both, "http://x").path(), "/app1/cont1/subs/sub1");
        assert_eq!(container_path("app1", "cont1"), "/app1/cont1");
    }

    #[test]
    fn test_event_filter_matches() {
        assert!(EventFilter::Creation.matches(EventKind::Creation));
        assert!(!EventFilter::Creation.matches(EventKind::Deletion));
        assert!(EventFilter::Deletion.matches(EventKind::Deletion));
        assert!(!EventFilter::Deletion.matches(EventKind::Creation));
        assert!(EventFilter::Both.matches(EventKind::Creation));
        assert!(EventFilter::Both.matches(EventKind::Deletion));
    }

    #[test]
    fn test_event_filter_serde() {
        assert_eq!(serde_json::to_string(&EventFilter::Both).unwrap(), "3");
        let f: EventFilter = serde_json::from_str("2").unwrap();
        assert_eq!(f, EventFilter::Deletion);
        assert!(serde_json::from_str::<EventFilter>("4").is_err());
    }

    #[test]
    fn test_parse_endpoint() {
        assert_eq!(parse_endpoint("http://example.com/hook").unwrap(), EndpointScheme::Http);
        assert_eq!(parse_endpoint("https://example.com:8443/a").unwrap(), EndpointScheme::Https);
        assert_eq!(parse_endpoint("mqtt://broker.local").unwrap(), EndpointScheme::Mqtt);
        assert!(parse_endpoint("not-a-url").is_err());
        assert!(parse_endpoint("ftp://example.com").is_err());
        assert!(parse_endpoint("").is_err());
    }

    #[test]
    fn test_parse_mqtt_endpoint() {
        assert_eq!(
            parse_mqtt_endpoint("mqtt://broker.local:2883", MQTT_DEFAULT_PORT).unwrap(),
            ("broker.local".to_string(), 2883)
        );
        assert_eq!(
            parse_mqtt_endpoint("mqtt://broker.local", MQTT_DEFAULT_PORT).unwrap(),
            ("broker.local".to_string(), MQTT_DEFAULT_PORT)
        );
        assert!(parse_mqtt_endpoint("http://broker.local", MQTT_DEFAULT_PORT).is_err());
    }

    #[test]
    fn test_discovery_kind_from_str() {
        assert_eq!("application".parse::<DiscoveryKind>().unwrap(), DiscoveryKind::Application);
        assert_eq!("Content-Instance".parse::<DiscoveryKind>().unwrap(), DiscoveryKind::ContentInstance);
        assert!("applications".parse::<DiscoveryKind>().is_err());
    }

    #[test]
    fn test_notification_payload_validate() {
        let ci = instance();
        let sub = subscription(EventFilter::Creation, "http://example.com/hook");
        let payload = NotificationPayload::new(
            EventKind::Creation,
            &sub,
            NotificationResourceInfo::from(&ci),
            format_datetime(&now()),
        );
        payload.validate().unwrap();

        let mut bad = payload.clone();
        bad.event_code = 2;
        assert!(bad.validate().is_err());

        let mut bad = payload.clone();
        bad.subscription.endpoint = "".into();
        assert!(bad.validate().is_err());

        let json = serde_json::to_value(&payload).unwrap();
        assert_eq!(json["eventType"], "creation");
        assert_eq!(json["eventCode"], 1);
        assert_eq!(json["subscription"]["evt"], 1);
        assert_eq!(json["resource"]["path"], "/app1/cont1/ci1");
        assert_eq!(json["resource"]["resType"], "content-instance");
    }
}
