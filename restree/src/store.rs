use async_trait::async_trait;
use parking_lot::RwLock;

use crate::error::{Error, Result};
use crate::types::{Application, Container, ContentInstance, ResourceName, Subscription};

type HashMap<K, V> = std::collections::HashMap<K, V, ahash::RandomState>;

/// Persistence contract consumed by the lifecycle manager, the dispatch
/// engine and the discovery engine.
///
/// Uniqueness within the parent scope is enforced by the store itself, and
/// `remove_application` / `remove_container` delete the whole subtree as one
/// transaction: the cascade never becomes a sequence of independent calls a
/// caller would have to compensate.
#[async_trait]
pub trait ResourceStore: Sync + Send {
    async fn application_exists(&self, app: &str) -> Result<bool>;
    async fn get_application(&self, app: &str) -> Result<Option<Application>>;
    async fn insert_application(&self, app: Application) -> Result<()>;
    async fn rename_application(&self, old: &str, new: ResourceName) -> Result<Application>;
    /// Removes the application and, transitively, its containers,
    /// content-instances and subscriptions.
    async fn remove_application(&self, app: &str) -> Result<()>;

    async fn container_exists(&self, app: &str, container: &str) -> Result<bool>;
    async fn get_container(&self, app: &str, container: &str) -> Result<Option<Container>>;
    async fn insert_container(&self, container: Container) -> Result<()>;
    async fn rename_container(&self, app: &str, old: &str, new: ResourceName) -> Result<Container>;
    /// Removes the container and its content-instances and subscriptions.
    async fn remove_container(&self, app: &str, container: &str) -> Result<()>;

    async fn get_content_instance(
        &self,
        app: &str,
        container: &str,
        name: &str,
    ) -> Result<Option<ContentInstance>>;
    async fn insert_content_instance(&self, instance: ContentInstance) -> Result<()>;
    async fn remove_content_instance(&self, app: &str, container: &str, name: &str) -> Result<()>;

    async fn get_subscription(
        &self,
        app: &str,
        container: &str,
        name: &str,
    ) -> Result<Option<Subscription>>;
    async fn insert_subscription(&self, subscription: Subscription) -> Result<()>;
    async fn remove_subscription(&self, app: &str, container: &str, name: &str) -> Result<()>;

    /// All subscriptions scoped to one container, unfiltered.
    async fn subscriptions_for_container(
        &self,
        app: &str,
        container: &str,
    ) -> Result<Vec<Subscription>>;

    async fn list_applications(&self) -> Result<Vec<Application>>;
    async fn list_containers(&self, app: &str) -> Result<Vec<Container>>;
    /// Every content-instance under every container of the application,
    /// ordered by container, then creation time.
    async fn list_content_instances(&self, app: &str) -> Result<Vec<ContentInstance>>;
    async fn list_subscriptions(&self, app: &str, container: &str) -> Result<Vec<Subscription>>;
}

#[derive(Default)]
struct StoreInner {
    applications: HashMap<String, Application>,
    containers: HashMap<(String, String), Container>,
    instances: HashMap<(String, String, String), ContentInstance>,
    subscriptions: HashMap<(String, String, String), Subscription>,
}

/// In-memory resource store. One write lock guards every mutation, which
/// makes cascade deletes and renames atomic.
#[derive(Default)]
pub struct DefaultResourceStore {
    inner: RwLock<StoreInner>,
}

impl DefaultResourceStore {
    #[inline]
    pub fn new() -> Self {
        Self::default()
    }
}

#[inline]
fn key2(app: &str, container: &str) -> (String, String) {
    (app.to_string(), container.to_string())
}

#[inline]
fn key3(app: &str, container: &str, name: &str) -> (String, String, String) {
    (app.to_string(), container.to_string(), name.to_string())
}

#[async_trait]
impl ResourceStore for DefaultResourceStore {
    async fn application_exists(&self, app: &str) -> Result<bool> {
        Ok(self.inner.read().applications.contains_key(app))
    }

    async fn get_application(&self, app: &str) -> Result<Option<Application>> {
        Ok(self.inner.read().applications.get(app).cloned())
    }

    async fn insert_application(&self, app: Application) -> Result<()> {
        let mut inner = self.inner.write();
        if inner.applications.contains_key(&*app.resource_name) {
            return Err(Error::Conflict("application"));
        }
        inner.applications.insert(app.resource_name.to_string(), app);
        Ok(())
    }

    async fn rename_application(&self, old: &str, new: ResourceName) -> Result<Application> {
        let mut inner = self.inner.write();
        if !inner.applications.contains_key(old) {
            return Err(Error::NotFound("application"));
        }
        if inner.applications.contains_key(&*new) {
            return Err(Error::Conflict("application"));
        }
        let mut app = inner.applications.remove(old).expect("checked above");
        app.resource_name = new.clone();
        inner.applications.insert(new.to_string(), app.clone());

        // Descendants are keyed by name, so the key change propagates to
        // them inside the same critical section.
        let containers = std::mem::take(&mut inner.containers);
        inner.containers = containers
            .into_iter()
            .map(|((a, c), mut cont)| {
                if a == old {
                    cont.application_resource_name = new.clone();
                    ((new.to_string(), c), cont)
                } else {
                    ((a, c), cont)
                }
            })
            .collect();
        let instances = std::mem::take(&mut inner.instances);
        inner.instances = instances
            .into_iter()
            .map(|((a, c, n), mut ci)| {
                if a == old {
                    ci.application_resource_name = new.clone();
                    ((new.to_string(), c, n), ci)
                } else {
                    ((a, c, n), ci)
                }
            })
            .collect();
        let subscriptions = std::mem::take(&mut inner.subscriptions);
        inner.subscriptions = subscriptions
            .into_iter()
            .map(|((a, c, n), mut sub)| {
                if a == old {
                    sub.application_resource_name = new.clone();
                    ((new.to_string(), c, n), sub)
                } else {
                    ((a, c, n), sub)
                }
            })
            .collect();
        Ok(app)
    }

    async fn remove_application(&self, app: &str) -> Result<()> {
        let mut inner = self.inner.write();
        if inner.applications.remove(app).is_none() {
            return Err(Error::NotFound("application"));
        }
        inner.instances.retain(|(a, _, _), _| a != app);
        inner.subscriptions.retain(|(a, _, _), _| a != app);
        inner.containers.retain(|(a, _), _| a != app);
        Ok(())
    }

    async fn container_exists(&self, app: &str, container: &str) -> Result<bool> {
        Ok(self.inner.read().containers.contains_key(&key2(app, container)))
    }

    async fn get_container(&self, app: &str, container: &str) -> Result<Option<Container>> {
        Ok(self.inner.read().containers.get(&key2(app, container)).cloned())
    }

    async fn insert_container(&self, container: Container) -> Result<()> {
        let mut inner = self.inner.write();
        if !inner.applications.contains_key(&*container.application_resource_name) {
            return Err(Error::NotFound("application"));
        }
        let key = key2(&container.application_resource_name, &container.resource_name);
        if inner.containers.contains_key(&key) {
            return Err(Error::Conflict("container"));
        }
        inner.containers.insert(key, container);
        Ok(())
    }

    async fn rename_container(&self, app: &str, old: &str, new: ResourceName) -> Result<Container> {
        let mut inner = self.inner.write();
        let old_key = key2(app, old);
        if !inner.containers.contains_key(&old_key) {
            return Err(Error::NotFound("container"));
        }
        if inner.containers.contains_key(&key2(app, &new)) {
            return Err(Error::Conflict("container"));
        }
        let mut cont = inner.containers.remove(&old_key).expect("checked above");
        cont.resource_name = new.clone();
        inner.containers.insert(key2(app, &new), cont.clone());

        let instances = std::mem::take(&mut inner.instances);
        inner.instances = instances
            .into_iter()
            .map(|((a, c, n), mut ci)| {
                if a == app && c == old {
                    ci.container_resource_name = new.clone();
                    ((a, new.to_string(), n), ci)
                } else {
                    ((a, c, n), ci)
                }
            })
            .collect();
        let subscriptions = std::mem::take(&mut inner.subscriptions);
        inner.subscriptions = subscriptions
            .into_iter()
            .map(|((a, c, n), mut sub)| {
                if a == app && c == old {
                    sub.container_resource_name = new.clone();
                    ((a, new.to_string(), n), sub)
                } else {
                    ((a, c, n), sub)
                }
            })
            .collect();
        Ok(cont)
    }

    async fn remove_container(&self, app: &str, container: &str) -> Result<()> {
        let mut inner = self.inner.write();
        let key = key2(app, container);
        if !inner.containers.contains_key(&key) {
            return Err(Error::NotFound("container"));
        }
        inner.instances.retain(|(a, c, _), _| !(a == app && c == container));
        inner.subscriptions.retain(|(a, c, _), _| !(a == app && c == container));
        inner.containers.remove(&key);
        Ok(())
    }

    async fn get_content_instance(
        &self,
        app: &str,
        container: &str,
        name: &str,
    ) -> Result<Option<ContentInstance>> {
        Ok(self.inner.read().instances.get(&key3(app, container, name)).cloned())
    }

    async fn insert_content_instance(&self, instance: ContentInstance) -> Result<()> {
        let mut inner = self.inner.write();
        let parent =
            key2(&instance.application_resource_name, &instance.container_resource_name);
        if !inner.containers.contains_key(&parent) {
            return Err(Error::NotFound("container"));
        }
        let key = (parent.0, parent.1, instance.resource_name.to_string());
        if inner.instances.contains_key(&key) {
            return Err(Error::Conflict("content-instance"));
        }
        inner.instances.insert(key, instance);
        Ok(())
    }

    async fn remove_content_instance(&self, app: &str, container: &str, name: &str) -> Result<()> {
        let mut inner = self.inner.write();
        if inner.instances.remove(&key3(app, container, name)).is_none() {
            return Err(Error::NotFound("content-instance"));
        }
        Ok(())
    }

    async fn get_subscription(
        &self,
        app: &str,
        container: &str,
        name: &str,
    ) -> Result<Option<Subscription>> {
        Ok(self.inner.read().subscriptions.get(&key3(app, container, name)).cloned())
    }

    async fn insert_subscription(&self, subscription: Subscription) -> Result<()> {
        let mut inner = self.inner.write();
        let parent = key2(
            &subscription.application_resource_name,
            &subscription.container_resource_name,
        );
        if !inner.containers.contains_key(&parent) {
            return Err(Error::NotFound("container"));
        }
        let key = (parent.0, parent.1, subscription.resource_name.to_string());
        if inner.subscriptions.contains_key(&key) {
            return Err(Error::Conflict("subscription"));
        }
        inner.subscriptions.insert(key, subscription);
        Ok(())
    }

    async fn remove_subscription(&self, app: &str, container: &str, name: &str) -> Result<()> {
        let mut inner = self.inner.write();
        if inner.subscriptions.remove(&key3(app, container, name)).is_none() {
            return Err(Error::NotFound("subscription"));
        }
        Ok(())
    }

    async fn subscriptions_for_container(
        &self,
        app: &str,
        container: &str,
    ) -> Result<Vec<Subscription>> {
        let inner = self.inner.read();
        let mut subs: Vec<_> = inner
            .subscriptions
            .iter()
            .filter(|((a, c, _), _)| a == app && c == container)
            .map(|(_, s)| s.clone())
            .collect();
        subs.sort_by(|x, y| {
            (x.creation_datetime, &x.resource_name).cmp(&(y.creation_datetime, &y.resource_name))
        });
        Ok(subs)
    }

    async fn list_applications(&self) -> Result<Vec<Application>> {
        let inner = self.inner.read();
        let mut apps: Vec<_> = inner.applications.values().cloned().collect();
        apps.sort_by(|x, y| {
            (x.creation_datetime, &x.resource_name).cmp(&(y.creation_datetime, &y.resource_name))
        });
        Ok(apps)
    }

    async fn list_containers(&self, app: &str) -> Result<Vec<Container>> {
        let inner = self.inner.read();
        let mut conts: Vec<_> =
            inner.containers.iter().filter(|((a, _), _)| a == app).map(|(_, c)| c.clone()).collect();
        conts.sort_by(|x, y| {
            (x.creation_datetime, &x.resource_name).cmp(&(y.creation_datetime, &y.resource_name))
        });
        Ok(conts)
    }

    async fn list_content_instances(&self, app: &str) -> Result<Vec<ContentInstance>> {
        let inner = self.inner.read();
        let mut cis: Vec<_> = inner
            .instances
            .iter()
            .filter(|((a, _, _), _)| a == app)
            .map(|(_, ci)| ci.clone())
            .collect();
        cis.sort_by(|x, y| {
            (&x.container_resource_name, x.creation_datetime, &x.resource_name).cmp(&(
                &y.container_resource_name,
                y.creation_datetime,
                &y.resource_name,
            ))
        });
        Ok(cis)
    }

    async fn list_subscriptions(&self, app: &str, container: &str) -> Result<Vec<Subscription>> {
        self.subscriptions_for_container(app, container).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::EventFilter;

    async fn seeded() -> DefaultResourceStore {
        let store = DefaultResourceStore::new();
        store.insert_application(Application::new("app1".into())).await.unwrap();
        store.insert_container(Container::new("cont1".into(), "app1".into())).await.unwrap();
        store
            .insert_content_instance(ContentInstance::new(
                "ci1".into(),
                "app1".into(),
                "cont1".into(),
                "text/plain".into(),
                "on".into(),
            ))
            .await
            .unwrap();
        store
            .insert_subscription(Subscription::new(
                "sub1".into(),
                "app1".into(),
                "cont1".into(),
                EventFilter::Both,
                "http://example.com/hook".into(),
            ))
            .await
            .unwrap();
        store
    }

    #[tokio::test]
    async fn test_duplicate_application_conflicts() {
        let store = DefaultResourceStore::new();
        store.insert_application(Application::new("app1".into())).await.unwrap();
        let err = store.insert_application(Application::new("app1".into())).await.unwrap_err();
        assert!(matches!(err, Error::Conflict("application")));
        assert_eq!(store.list_applications().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_insert_requires_ancestors() {
        let store = DefaultResourceStore::new();
        let err =
            store.insert_container(Container::new("cont1".into(), "ghost".into())).await.unwrap_err();
        assert!(matches!(err, Error::NotFound("application")));

        store.insert_application(Application::new("app1".into())).await.unwrap();
        let err = store
            .insert_content_instance(ContentInstance::new(
                "ci1".into(),
                "app1".into(),
                "ghost".into(),
                "t".into(),
                "c".into(),
            ))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::NotFound("container")));
    }

    #[tokio::test]
    async fn test_remove_container_cascades() {
        let store = seeded().await;
        store.remove_container("app1", "cont1").await.unwrap();
        assert!(store.get_container("app1", "cont1").await.unwrap().is_none());
        assert!(store.get_content_instance("app1", "cont1", "ci1").await.unwrap().is_none());
        assert!(store.get_subscription("app1", "cont1", "sub1").await.unwrap().is_none());
        // the application survives
        assert!(store.application_exists("app1").await.unwrap());
    }

    #[tokio::test]
    async fn test_remove_application_cascades() {
        let store = seeded().await;
        store.insert_container(Container::new("cont2".into(), "app1".into())).await.unwrap();
        store.remove_application("app1").await.unwrap();
        assert!(!store.application_exists("app1").await.unwrap());
        assert!(store.get_container("app1", "cont1").await.unwrap().is_none());
        assert!(store.get_container("app1", "cont2").await.unwrap().is_none());
        assert!(store.get_content_instance("app1", "cont1", "ci1").await.unwrap().is_none());
        assert!(store.get_subscription("app1", "cont1", "sub1").await.unwrap().is_none());
        // name becomes reusable
        store.insert_application(Application::new("app1".into())).await.unwrap();
    }

    #[tokio::test]
    async fn test_rename_application_propagates() {
        let store = seeded().await;
        let before = store.get_application("app1").await.unwrap().unwrap();
        let renamed = store.rename_application("app1", "app2".into()).await.unwrap();
        assert_eq!(&*renamed.resource_name, "app2");
        assert_eq!(renamed.creation_datetime, before.creation_datetime);

        assert!(store.get_application("app1").await.unwrap().is_none());
        let cont = store.get_container("app2", "cont1").await.unwrap().unwrap();
        assert_eq!(&*cont.application_resource_name, "app2");
        let ci = store.get_content_instance("app2", "cont1", "ci1").await.unwrap().unwrap();
        assert_eq!(&*ci.application_resource_name, "app2");
        let sub = store.get_subscription("app2", "cont1", "sub1").await.unwrap().unwrap();
        assert_eq!(&*sub.application_resource_name, "app2");
    }

    #[tokio::test]
    async fn test_rename_container_propagates() {
        let store = seeded().await;
        store.rename_container("app1", "cont1", "contA".into()).await.unwrap();
        assert!(store.get_container("app1", "cont1").await.unwrap().is_none());
        let ci = store.get_content_instance("app1", "contA", "ci1").await.unwrap().unwrap();
        assert_eq!(&*ci.container_resource_name, "contA");
        let sub = store.get_subscription("app1", "contA", "sub1").await.unwrap().unwrap();
        assert_eq!(&*sub.container_resource_name, "contA");
    }

    #[tokio::test]
    async fn test_rename_conflicts() {
        let store = seeded().await;
        store.insert_application(Application::new("app2".into())).await.unwrap();
        let err = store.rename_application("app1", "app2".into()).await.unwrap_err();
        assert!(matches!(err, Error::Conflict("application")));
        let err = store.rename_application("ghost", "app3".into()).await.unwrap_err();
        assert!(matches!(err, Error::NotFound("application")));
    }

    #[tokio::test]
    async fn test_list_content_instances_ordering() {
        let store = seeded().await;
        store.insert_container(Container::new("acont".into(), "app1".into())).await.unwrap();
        store
            .insert_content_instance(ContentInstance::new(
                "ci2".into(),
                "app1".into(),
                "acont".into(),
                "t".into(),
                "c".into(),
            ))
            .await
            .unwrap();
        let cis = store.list_content_instances("app1").await.unwrap();
        let containers: Vec<&str> = cis.iter().map(|ci| &*ci.container_resource_name).collect();
        assert_eq!(containers, vec!["acont", "cont1"]);
    }
}
