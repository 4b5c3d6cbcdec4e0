#![deny(unsafe_code)]

use std::fmt;
use std::net::SocketAddr;
use std::ops::Deref;
use std::sync::Arc;
use std::time::Duration;

use anyhow::anyhow;
use config::{Config, File};
use once_cell::sync::OnceCell;
use serde::de::{self, Deserialize, Deserializer};

use self::logging::Log;
pub use self::options::Options;

pub mod logger;
pub mod logging;
pub mod options;

pub type Result<T> = anyhow::Result<T>;

static SETTINGS: OnceCell<Settings> = OnceCell::new();

#[derive(Clone)]
pub struct Settings(Arc<Inner>);

#[derive(Debug, Clone, serde::Deserialize)]
pub struct Inner {
    #[serde(default)]
    pub http: Http,
    #[serde(default)]
    pub mqtt: Mqtt,
    #[serde(default)]
    pub notify: Notify,
    #[serde(default)]
    pub log: Log,
    #[serde(default, skip)]
    pub opts: Options,
}

impl Deref for Settings {
    type Target = Inner;
    fn deref(&self) -> &Self::Target {
        self.0.as_ref()
    }
}

impl Settings {
    fn new(opts: Options) -> Result<Self> {
        let mut builder = Config::builder()
            .add_source(File::with_name("/etc/restree/restree").required(false))
            .add_source(File::with_name("/etc/restree").required(false))
            .add_source(File::with_name("restree").required(false))
            .add_source(config::Environment::with_prefix("restree").try_parsing(true));

        if let Some(cfg) = opts.cfg_name.as_ref() {
            builder = builder.add_source(File::with_name(cfg).required(false));
        }

        let mut inner: Inner = builder.build()?.try_deserialize()?;

        // Command line configuration overriding file configuration
        if let Some(laddr) = opts.http_laddr {
            inner.http.laddr = laddr;
        }

        inner.opts = opts;
        Ok(Self(Arc::new(inner)))
    }

    #[inline]
    pub fn instance() -> &'static Self {
        match SETTINGS.get() {
            Some(c) => c,
            None => {
                unreachable!("Settings not initialized");
            }
        }
    }

    #[inline]
    pub fn init(opts: Options) -> Result<&'static Self> {
        SETTINGS.set(Settings::new(opts)?).map_err(|_| anyhow!("Settings init failed"))?;
        SETTINGS.get().ok_or_else(|| anyhow!("Settings init failed"))
    }

    #[inline]
    pub fn logs(&self) {
        log::info!("http.laddr is {}", self.http.laddr);
        log::info!("mqtt config is {:?}", self.mqtt);
        log::info!("notify config is {:?}", self.notify);
    }
}

impl fmt::Debug for Settings {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "Settings ...")?;
        Ok(())
    }
}

#[derive(Debug, Clone, serde::Deserialize)]
pub struct Http {
    /// Listen address of the resource API.
    #[serde(default = "Http::laddr_default")]
    pub laddr: SocketAddr,
}

impl Default for Http {
    #[inline]
    fn default() -> Self {
        Self { laddr: Self::laddr_default() }
    }
}

impl Http {
    #[inline]
    fn laddr_default() -> SocketAddr {
        ([0, 0, 0, 0], 8880).into()
    }
}

#[derive(Debug, Clone, serde::Deserialize)]
pub struct Mqtt {
    //Broker port assumed when an mqtt endpoint omits one.
    #[serde(default = "Mqtt::default_port_default")]
    pub default_port: u16,
    #[serde(default = "Mqtt::connect_timeout_default", deserialize_with = "deserialize_duration")]
    pub connect_timeout: Duration,
    #[serde(default = "Mqtt::keepalive_default", deserialize_with = "deserialize_duration")]
    pub keepalive: Duration,
    #[serde(default = "Mqtt::client_id_prefix_default")]
    pub client_id_prefix: String,
    //Capacity of each broker connection's command channel.
    #[serde(default = "Mqtt::channel_capacity_default")]
    pub channel_capacity: usize,
}

impl Default for Mqtt {
    #[inline]
    fn default() -> Self {
        Self {
            default_port: Self::default_port_default(),
            connect_timeout: Self::connect_timeout_default(),
            keepalive: Self::keepalive_default(),
            client_id_prefix: Self::client_id_prefix_default(),
            channel_capacity: Self::channel_capacity_default(),
        }
    }
}

impl Mqtt {
    #[inline]
    fn default_port_default() -> u16 {
        1883
    }
    #[inline]
    fn connect_timeout_default() -> Duration {
        Duration::from_secs(8)
    }
    #[inline]
    fn keepalive_default() -> Duration {
        Duration::from_secs(60)
    }
    #[inline]
    fn client_id_prefix_default() -> String {
        "restree".into()
    }
    #[inline]
    fn channel_capacity_default() -> usize {
        100
    }
}

#[derive(Debug, Clone, serde::Deserialize)]
pub struct Notify {
    //Per-call timeout of webhook sends.
    #[serde(default = "Notify::http_timeout_default", deserialize_with = "deserialize_duration")]
    pub http_timeout: Duration,
    //Directory notification audit records are appended under.
    #[serde(default = "Notify::audit_dir_default")]
    pub audit_dir: String,
}

impl Default for Notify {
    #[inline]
    fn default() -> Self {
        Self { http_timeout: Self::http_timeout_default(), audit_dir: Self::audit_dir_default() }
    }
}

impl Notify {
    #[inline]
    fn http_timeout_default() -> Duration {
        Duration::from_secs(5)
    }
    #[inline]
    fn audit_dir_default() -> String {
        "./data/notifications".into()
    }
}

/// Accepts `30`, `"30s"`, `"5m"`, `"1h"` style values.
pub fn to_duration(text: &str) -> Duration {
    let text = text.trim().to_ascii_lowercase();
    if let Ok(secs) = text.parse::<u64>() {
        return Duration::from_secs(secs);
    }
    let (num, unit) = text.split_at(text.len().saturating_sub(1));
    let num = num.trim().parse::<u64>().unwrap_or(0);
    match unit {
        "s" => Duration::from_secs(num),
        "m" => Duration::from_secs(num * 60),
        "h" => Duration::from_secs(num * 3600),
        _ => Duration::from_secs(0),
    }
}

pub fn deserialize_duration<'de, D>(deserializer: D) -> std::result::Result<Duration, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(serde::Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Secs(u64),
        Text(String),
    }
    match Raw::deserialize(deserializer)? {
        Raw::Secs(secs) => Ok(Duration::from_secs(secs)),
        Raw::Text(text) => {
            if text.trim().is_empty() {
                Err(de::Error::custom("empty duration"))
            } else {
                Ok(to_duration(&text))
            }
        }
    }
}
