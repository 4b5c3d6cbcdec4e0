use std::sync::Arc;

use crate::error::{Error, Result};
use crate::store::ResourceStore;
use crate::types::DiscoveryKind;

/// Lists child resource paths instead of returning one resource body.
///
/// Results are canonical paths ordered by creation time; content-instances
/// are ordered by container, then creation time.
pub struct DiscoveryEngine {
    store: Arc<dyn ResourceStore>,
}

impl DiscoveryEngine {
    #[inline]
    pub fn new(store: Arc<dyn ResourceStore>) -> Self {
        Self { store }
    }

    pub async fn applications(&self) -> Result<Vec<String>> {
        Ok(self.store.list_applications().await?.iter().map(|a| a.path()).collect())
    }

    pub async fn containers(&self, app: &str) -> Result<Vec<String>> {
        if !self.store.application_exists(app).await? {
            return Err(Error::NotFound("application"));
        }
        Ok(self.store.list_containers(app).await?.iter().map(|c| c.path()).collect())
    }

    pub async fn content_instances(&self, app: &str) -> Result<Vec<String>> {
        if !self.store.application_exists(app).await? {
            return Err(Error::NotFound("application"));
        }
        Ok(self.store.list_content_instances(app).await?.iter().map(|ci| ci.path()).collect())
    }

    pub async fn subscriptions(&self, app: &str, container: &str) -> Result<Vec<String>> {
        if !self.store.container_exists(app, container).await? {
            return Err(Error::NotFound("container"));
        }
        Ok(self.store.list_subscriptions(app, container).await?.iter().map(|s| s.path()).collect())
    }

    /// Enum-dispatched entry point for the HTTP surface: the discovery kind
    /// arrives as a typed value, scoped by how much of the tree the request
    /// path names.
    pub async fn discover(
        &self,
        kind: DiscoveryKind,
        app: Option<&str>,
        container: Option<&str>,
    ) -> Result<Vec<String>> {
        match (kind, app, container) {
            (DiscoveryKind::Application, None, None) => self.applications().await,
            (DiscoveryKind::Container, Some(app), None) => self.containers(app).await,
            (DiscoveryKind::ContentInstance, Some(app), None) => self.content_instances(app).await,
            (DiscoveryKind::Subscription, Some(app), Some(container)) => {
                self.subscriptions(app, container).await
            }
            _ => Err(Error::validation("discovery kind does not apply to this path")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::DefaultResourceStore;
    use crate::types::{Application, Container, ContentInstance, EventFilter, Subscription};

    async fn engine() -> DiscoveryEngine {
        let store: Arc<dyn ResourceStore> = Arc::new(DefaultResourceStore::new());
        store.insert_application(Application::new("plants".into())).await.unwrap();
        store.insert_container(Container::new("soil".into(), "plants".into())).await.unwrap();
        store.insert_container(Container::new("light".into(), "plants".into())).await.unwrap();
        store
            .insert_content_instance(ContentInstance::new(
                "m1".into(),
                "plants".into(),
                "soil".into(),
                "text/plain".into(),
                "40".into(),
            ))
            .await
            .unwrap();
        store
            .insert_subscription(Subscription::new(
                "watcher".into(),
                "plants".into(),
                "soil".into(),
                EventFilter::Both,
                "http://example.com/hook".into(),
            ))
            .await
            .unwrap();
        DiscoveryEngine::new(store)
    }

    #[tokio::test]
    async fn test_discovery_returns_paths_only() {
        let engine = engine().await;
        assert_eq!(engine.applications().await.unwrap(), vec!["/plants"]);
        let containers = engine.containers("plants").await.unwrap();
        assert!(containers.contains(&"/plants/soil".to_string()));
        assert!(containers.contains(&"/plants/light".to_string()));
        assert_eq!(engine.content_instances("plants").await.unwrap(), vec!["/plants/soil/m1"]);
        assert_eq!(
            engine.subscriptions("plants", "soil").await.unwrap(),
            vec!["/plants/soil/subs/watcher"]
        );
    }

    #[tokio::test]
    async fn test_discovery_for_missing_ancestor_is_not_found() {
        let engine = engine().await;
        assert!(matches!(
            engine.containers("ghost").await.unwrap_err(),
            Error::NotFound("application")
        ));
        assert!(matches!(
            engine.subscriptions("plants", "ghost").await.unwrap_err(),
            Error::NotFound("container")
        ));
    }

    #[tokio::test]
    async fn test_discover_scoping() {
        let engine = engine().await;
        let apps = engine.discover(DiscoveryKind::Application, None, None).await.unwrap();
        assert_eq!(apps, vec!["/plants"]);
        let err = engine.discover(DiscoveryKind::Subscription, Some("plants"), None).await.unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
        let err = engine.discover(DiscoveryKind::Application, Some("plants"), None).await.unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
    }
}
