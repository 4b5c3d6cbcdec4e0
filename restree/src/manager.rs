use std::sync::Arc;

use bytestring::ByteString;

use crate::error::{Error, Result};
use crate::notify::{Dispatcher, Event};
use crate::store::ResourceStore;
use crate::types::{
    parse_endpoint, Application, Container, ContentInstance, EventFilter, ResourceName, Subscription,
};
use crate::utils::generate_name;

/// Lifecycle and cascade manager for the resource tree.
///
/// Validation, ancestor and uniqueness checks run before any write. After a
/// successful content-instance create or delete the event is handed to the
/// dispatch engine on a detached task; the caller only ever awaits its own
/// store write.
pub struct ResourceManager {
    store: Arc<dyn ResourceStore>,
    dispatcher: Arc<Dispatcher>,
}

impl ResourceManager {
    #[inline]
    pub fn new(store: Arc<dyn ResourceStore>, dispatcher: Arc<Dispatcher>) -> Self {
        Self { store, dispatcher }
    }

    pub async fn create_application(&self, name: Option<ByteString>) -> Result<Application> {
        let name = resolve_name(name, "app")?;
        let app = Application::new(name);
        self.store.insert_application(app.clone()).await?;
        Ok(app)
    }

    pub async fn get_application(&self, app: &str) -> Result<Application> {
        self.store.get_application(app).await?.ok_or(Error::NotFound("application"))
    }

    pub async fn rename_application(&self, old: &str, new: ByteString) -> Result<Application> {
        validate_rename(old, &new)?;
        self.store.rename_application(old, new).await
    }

    pub async fn delete_application(&self, app: &str) -> Result<()> {
        self.store.remove_application(app).await
    }

    pub async fn create_container(&self, app: &str, name: Option<ByteString>) -> Result<Container> {
        let name = resolve_name(name, "cont")?;
        if !self.store.application_exists(app).await? {
            return Err(Error::NotFound("application"));
        }
        let container = Container::new(name, ByteString::from(app));
        self.store.insert_container(container.clone()).await?;
        Ok(container)
    }

    pub async fn get_container(&self, app: &str, container: &str) -> Result<Container> {
        self.store.get_container(app, container).await?.ok_or(Error::NotFound("container"))
    }

    pub async fn rename_container(
        &self,
        app: &str,
        old: &str,
        new: ByteString,
    ) -> Result<Container> {
        validate_rename(old, &new)?;
        self.store.rename_container(app, old, new).await
    }

    pub async fn delete_container(&self, app: &str, container: &str) -> Result<()> {
        self.store.remove_container(app, container).await
    }

    pub async fn create_content_instance(
        &self,
        app: &str,
        container: &str,
        content_type: ByteString,
        content: ByteString,
        name: Option<ByteString>,
    ) -> Result<ContentInstance> {
        if content_type.trim().is_empty() {
            return Err(Error::validation("contentType must not be empty"));
        }
        if content.trim().is_empty() {
            return Err(Error::validation("content must not be empty"));
        }
        let name = resolve_name(name, "ci")?;
        if !self.store.container_exists(app, container).await? {
            return Err(Error::NotFound("container"));
        }
        let instance = ContentInstance::new(
            name,
            ByteString::from(app),
            ByteString::from(container),
            content_type,
            content,
        );
        self.store.insert_content_instance(instance.clone()).await?;
        self.dispatcher.spawn(Event::creation(instance.clone()));
        Ok(instance)
    }

    pub async fn get_content_instance(
        &self,
        app: &str,
        container: &str,
        name: &str,
    ) -> Result<ContentInstance> {
        self.store
            .get_content_instance(app, container, name)
            .await?
            .ok_or(Error::NotFound("content-instance"))
    }

    pub async fn delete_content_instance(
        &self,
        app: &str,
        container: &str,
        name: &str,
    ) -> Result<()> {
        // Snapshot before the row goes away; the deletion notification
        // carries the pre-deletion state.
        let instance = self.get_content_instance(app, container, name).await?;
        self.store.remove_content_instance(app, container, name).await?;
        self.dispatcher.spawn(Event::deletion(instance));
        Ok(())
    }

    pub async fn create_subscription(
        &self,
        app: &str,
        container: &str,
        evt: u8,
        endpoint: ByteString,
        name: Option<ByteString>,
    ) -> Result<Subscription> {
        let evt = EventFilter::from_code(evt)
            .ok_or_else(|| Error::validation("evt must be 1 (creation), 2 (deletion) or 3 (both)"))?;
        parse_endpoint(&endpoint)?;
        let name = resolve_name(name, "sub")?;
        if !self.store.container_exists(app, container).await? {
            return Err(Error::NotFound("container"));
        }
        let subscription =
            Subscription::new(name, ByteString::from(app), ByteString::from(container), evt, endpoint);
        self.store.insert_subscription(subscription.clone()).await?;
        Ok(subscription)
    }

    pub async fn get_subscription(
        &self,
        app: &str,
        container: &str,
        name: &str,
    ) -> Result<Subscription> {
        self.store.get_subscription(app, container, name).await?.ok_or(Error::NotFound("subscription"))
    }

    pub async fn delete_subscription(&self, app: &str, container: &str, name: &str) -> Result<()> {
        self.store.remove_subscription(app, container, name).await
    }
}

/// Uses the client-supplied name when present, otherwise generates one.
fn resolve_name(name: Option<ByteString>, prefix: &str) -> Result<ResourceName> {
    match name {
        Some(name) if !name.trim().is_empty() => {
            validate_name(&name)?;
            Ok(name)
        }
        _ => Ok(generate_name(prefix)),
    }
}

fn validate_name(name: &str) -> Result<()> {
    if name.contains('/') || name.contains(char::is_whitespace) {
        return Err(Error::validation("resourceName must not contain '/' or whitespace"));
    }
    Ok(())
}

fn validate_rename(old: &str, new: &str) -> Result<()> {
    let new = new.trim();
    if new.is_empty() {
        return Err(Error::validation("resourceName is required for a rename"));
    }
    validate_name(new)?;
    if new.eq_ignore_ascii_case(old) {
        return Err(Error::validation("the new resourceName must differ from the current one"));
    }
    Ok(())
}
