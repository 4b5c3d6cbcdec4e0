#![deny(unsafe_code)]

//! Resource-directory middleware core.
//!
//! Clients register a small resource hierarchy (application → container →
//! {content-instance, subscription}) and receive notifications over HTTP
//! webhooks or MQTT whenever content-instances are created or deleted inside
//! a container they watch.
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! use restree::manager::ResourceManager;
//! use restree::notify::audit::AuditWriter;
//! use restree::notify::http::DefaultHttpSender;
//! use restree::notify::mqtt::{MqttConnectionPool, MqttOptions};
//! use restree::notify::Dispatcher;
//! use restree::store::{DefaultResourceStore, ResourceStore};
//!
//! # fn demo() -> restree::Result<()> {
//! let store: Arc<dyn ResourceStore> = Arc::new(DefaultResourceStore::default());
//! let http = Arc::new(DefaultHttpSender::new(Duration::from_secs(5))?);
//! let mqtt = Arc::new(MqttConnectionPool::new(MqttOptions::default()));
//! let audit = Arc::new(AuditWriter::new("./data/notifications"));
//! let dispatcher = Arc::new(Dispatcher::new(store.clone(), http, mqtt, audit));
//! let manager = ResourceManager::new(store, dispatcher);
//! # let _ = manager;
//! # Ok(())
//! # }
//! ```

pub mod discovery; // Child-path listing selected by a typed discovery kind
pub mod error; // Error taxonomy and crate-wide Result alias
pub mod manager; // Resource lifecycle and cascading deletion
pub mod notify; // Subscription matching and notification fan-out
pub mod store; // Resource store contract and default in-memory store
pub mod types; // Resource tree entities, events, payloads
pub mod utils; // Timestamps and resource-name generation

pub use error::{Error, Result};
