#![deny(unsafe_code)]

use std::sync::Arc;

use structopt::StructOpt;
use tokio::sync::oneshot;

use restree::discovery::DiscoveryEngine;
use restree::manager::ResourceManager;
use restree::notify::audit::AuditWriter;
use restree::notify::http::DefaultHttpSender;
use restree::notify::mqtt::{MqttConnectionPool, MqttOptions};
use restree::notify::{Dispatcher, MqttSender};
use restree::store::{DefaultResourceStore, ResourceStore};
use restree_conf::logger::logger_init;
use restree_conf::{Options, Settings};

mod api;

#[ntex::main]
async fn main() {
    //init config
    let settings = Settings::init(Options::from_args()).expect("settings init failed");

    //init log
    logger_init(&settings.log).expect("logger init failed");
    settings.logs();

    let store: Arc<dyn ResourceStore> = Arc::new(DefaultResourceStore::new());

    let http_sender = Arc::new(
        DefaultHttpSender::new(settings.notify.http_timeout).expect("http sender init failed"),
    );
    let pool = Arc::new(MqttConnectionPool::new(MqttOptions {
        default_port: settings.mqtt.default_port,
        connect_timeout: settings.mqtt.connect_timeout,
        keepalive: settings.mqtt.keepalive,
        client_id_prefix: settings.mqtt.client_id_prefix.clone(),
        channel_capacity: settings.mqtt.channel_capacity,
    }));
    //broker connections are opened lazily on first publish
    pool.start_connector();

    let audit = Arc::new(AuditWriter::new(settings.notify.audit_dir.clone()));
    let dispatcher = Arc::new(Dispatcher::new(store.clone(), http_sender, pool.clone(), audit));
    let manager = Arc::new(ResourceManager::new(store.clone(), dispatcher));
    let discovery = Arc::new(DiscoveryEngine::new(store));

    let state = Arc::new(api::ServerState { manager, discovery });
    let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
    let server = tokio::spawn(api::listen_and_serve(settings.http.laddr, state, shutdown_rx));

    tokio::signal::ctrl_c().await.expect("failed to listen for the shutdown signal");
    log::info!("shutdown signal received");
    let _ = shutdown_tx.send(());

    //best-effort disconnect of pooled broker connections
    pool.close().await;

    match server.await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => log::error!("http server error, {:?}", e),
        Err(e) => log::error!("http server task failed, {:?}", e),
    }
}
