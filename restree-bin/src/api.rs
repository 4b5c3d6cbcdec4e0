use std::net::SocketAddr;
use std::sync::Arc;

use bytestring::ByteString;
use salvo::affix;
use salvo::http::header::{HeaderValue, LOCATION};
use salvo::prelude::*;
use serde::{Deserialize, Serialize};
use tokio::sync::oneshot;

use restree::discovery::DiscoveryEngine;
use restree::manager::ResourceManager;
use restree::types::DiscoveryKind;
use restree::Error;

pub(crate) struct ServerState {
    pub manager: Arc<ResourceManager>,
    pub discovery: Arc<DiscoveryEngine>,
}

fn route(state: Arc<ServerState>) -> Router {
    Router::new()
        .hoop(affix::inject(state))
        .hoop(api_logger)
        .get(discover_root)
        .post(create_application)
        .push(
            Router::with_path("<app>")
                .get(get_application)
                .put(rename_application)
                .delete(delete_application)
                .post(create_container)
                .push(
                    Router::with_path("<container>")
                        .get(get_container)
                        .put(rename_container)
                        .delete(delete_container)
                        .post(create_child)
                        .push(Router::with_path("subs").push(
                            Router::with_path("<sub>")
                                .get(get_subscription)
                                .delete(delete_subscription),
                        ))
                        .push(
                            Router::with_path("<name>")
                                .get(get_content_instance)
                                .delete(delete_content_instance),
                        ),
                ),
        )
}

pub(crate) async fn listen_and_serve(
    laddr: SocketAddr,
    state: Arc<ServerState>,
    rx: oneshot::Receiver<()>,
) -> restree::Result<()> {
    log::info!("HTTP API listening on {}", laddr);
    Server::new(TcpListener::bind(laddr))
        .try_serve_with_graceful_shutdown(route(state), async {
            rx.await.ok();
        })
        .await
        .map_err(|e| Error::Anyhow(anyhow::Error::new(e)))?;
    Ok(())
}

/// Body of every create/rename request; irrelevant fields are ignored per
/// resource kind.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct CreateParams {
    resource_name: Option<String>,
    res_type: Option<String>,
    content_type: Option<String>,
    content: Option<String>,
    evt: Option<u8>,
    endpoint: Option<String>,
}

#[handler]
async fn api_logger(req: &mut Request) {
    log::debug!("{} {}", req.method(), req.uri());
}

#[inline]
fn state_of(depot: &mut Depot) -> Arc<ServerState> {
    depot.obtain::<Arc<ServerState>>().cloned().unwrap()
}

/// CRUD status contract: 400 validation, 404 missing, 409 collision; no
/// internal detail beyond the category message.
fn render_error(res: &mut Response, e: Error) {
    match e {
        Error::Validation(_) => {
            res.set_status_error(StatusError::bad_request().with_detail(e.to_string()))
        }
        Error::NotFound(_) => res.set_status_code(StatusCode::NOT_FOUND),
        Error::Conflict(_) => res.set_status_code(StatusCode::CONFLICT),
        _ => res.set_status_error(StatusError::service_unavailable().with_detail(e.to_string())),
    }
}

fn render_created<T: Serialize + Send + Sync>(res: &mut Response, path: String, body: &T) {
    res.set_status_code(StatusCode::CREATED);
    if let Ok(loc) = HeaderValue::from_str(&path) {
        res.headers_mut().insert(LOCATION, loc);
    }
    res.render(Json(body));
}

/// Parses the typed discovery marker once; everything downstream dispatches
/// on the enum.
fn discovery_kind(req: &Request) -> Result<Option<DiscoveryKind>, Error> {
    match req.headers().get("x-discovery") {
        None => Ok(None),
        Some(value) => {
            let value =
                value.to_str().map_err(|_| Error::validation("invalid x-discovery header"))?;
            value.parse::<DiscoveryKind>().map(Some)
        }
    }
}

async fn parse_body(req: &mut Request) -> Result<CreateParams, Error> {
    req.parse_json::<CreateParams>()
        .await
        .map_err(|_| Error::validation("request body must be a JSON object"))
}

#[handler]
async fn discover_root(req: &mut Request, depot: &mut Depot, res: &mut Response) {
    let state = state_of(depot);
    match discovery_kind(req) {
        Ok(Some(kind)) => match state.discovery.discover(kind, None, None).await {
            Ok(paths) => res.render(Json(paths)),
            Err(e) => render_error(res, e),
        },
        // nothing is addressed by the bare root
        Ok(None) => res.set_status_code(StatusCode::NOT_FOUND),
        Err(e) => render_error(res, e),
    }
}

#[handler]
async fn create_application(req: &mut Request, depot: &mut Depot, res: &mut Response) {
    let state = state_of(depot);
    let params = match parse_body(req).await {
        Ok(params) => params,
        Err(e) => return render_error(res, e),
    };
    match state.manager.create_application(params.resource_name.map(ByteString::from)).await {
        Ok(app) => render_created(res, app.path(), &app),
        Err(e) => render_error(res, e),
    }
}

#[handler]
async fn get_application(req: &mut Request, depot: &mut Depot, res: &mut Response) {
    let state = state_of(depot);
    let Some(app) = req.param::<String>("app") else {
        return res.set_status_error(StatusError::bad_request());
    };
    match discovery_kind(req) {
        Ok(Some(kind)) => match state.discovery.discover(kind, Some(&app), None).await {
            Ok(paths) => res.render(Json(paths)),
            Err(e) => render_error(res, e),
        },
        Ok(None) => match state.manager.get_application(&app).await {
            Ok(application) => res.render(Json(application)),
            Err(e) => render_error(res, e),
        },
        Err(e) => render_error(res, e),
    }
}

#[handler]
async fn rename_application(req: &mut Request, depot: &mut Depot, res: &mut Response) {
    let state = state_of(depot);
    let Some(app) = req.param::<String>("app") else {
        return res.set_status_error(StatusError::bad_request());
    };
    let params = match parse_body(req).await {
        Ok(params) => params,
        Err(e) => return render_error(res, e),
    };
    let Some(new_name) = params.resource_name else {
        return render_error(res, Error::validation("resourceName is required for a rename"));
    };
    match state.manager.rename_application(&app, ByteString::from(new_name)).await {
        Ok(application) => res.render(Json(application)),
        Err(e) => render_error(res, e),
    }
}

#[handler]
async fn delete_application(req: &mut Request, depot: &mut Depot, res: &mut Response) {
    let state = state_of(depot);
    let Some(app) = req.param::<String>("app") else {
        return res.set_status_error(StatusError::bad_request());
    };
    match state.manager.delete_application(&app).await {
        Ok(()) => res.set_status_code(StatusCode::OK),
        Err(e) => render_error(res, e),
    }
}

#[handler]
async fn create_container(req: &mut Request, depot: &mut Depot, res: &mut Response) {
    let state = state_of(depot);
    let Some(app) = req.param::<String>("app") else {
        return res.set_status_error(StatusError::bad_request());
    };
    let params = match parse_body(req).await {
        Ok(params) => params,
        Err(e) => return render_error(res, e),
    };
    match state.manager.create_container(&app, params.resource_name.map(ByteString::from)).await {
        Ok(container) => render_created(res, container.path(), &container),
        Err(e) => render_error(res, e),
    }
}

#[handler]
async fn get_container(req: &mut Request, depot: &mut Depot, res: &mut Response) {
    let state = state_of(depot);
    let (Some(app), Some(container)) =
        (req.param::<String>("app"), req.param::<String>("container"))
    else {
        return res.set_status_error(StatusError::bad_request());
    };
    match discovery_kind(req) {
        Ok(Some(kind)) => {
            match state.discovery.discover(kind, Some(&app), Some(&container)).await {
                Ok(paths) => res.render(Json(paths)),
                Err(e) => render_error(res, e),
            }
        }
        Ok(None) => match state.manager.get_container(&app, &container).await {
            Ok(body) => res.render(Json(body)),
            Err(e) => render_error(res, e),
        },
        Err(e) => render_error(res, e),
    }
}

#[handler]
async fn rename_container(req: &mut Request, depot: &mut Depot, res: &mut Response) {
    let state = state_of(depot);
    let (Some(app), Some(container)) =
        (req.param::<String>("app"), req.param::<String>("container"))
    else {
        return res.set_status_error(StatusError::bad_request());
    };
    let params = match parse_body(req).await {
        Ok(params) => params,
        Err(e) => return render_error(res, e),
    };
    let Some(new_name) = params.resource_name else {
        return render_error(res, Error::validation("resourceName is required for a rename"));
    };
    match state.manager.rename_container(&app, &container, ByteString::from(new_name)).await {
        Ok(body) => res.render(Json(body)),
        Err(e) => render_error(res, e),
    }
}

#[handler]
async fn delete_container(req: &mut Request, depot: &mut Depot, res: &mut Response) {
    let state = state_of(depot);
    let (Some(app), Some(container)) =
        (req.param::<String>("app"), req.param::<String>("container"))
    else {
        return res.set_status_error(StatusError::bad_request());
    };
    match state.manager.delete_container(&app, &container).await {
        Ok(()) => res.set_status_code(StatusCode::OK),
        Err(e) => render_error(res, e),
    }
}

/// `POST /{app}/{container}` creates a content-instance or a subscription,
/// selected by the body's `resType`.
#[handler]
async fn create_child(req: &mut Request, depot: &mut Depot, res: &mut Response) {
    let state = state_of(depot);
    let (Some(app), Some(container)) =
        (req.param::<String>("app"), req.param::<String>("container"))
    else {
        return res.set_status_error(StatusError::bad_request());
    };
    let params = match parse_body(req).await {
        Ok(params) => params,
        Err(e) => return render_error(res, e),
    };
    match params.res_type.as_deref() {
        Some("content-instance") => {
            let outcome = state
                .manager
                .create_content_instance(
                    &app,
                    &container,
                    params.content_type.map(ByteString::from).unwrap_or_default(),
                    params.content.map(ByteString::from).unwrap_or_default(),
                    params.resource_name.map(ByteString::from),
                )
                .await;
            match outcome {
                Ok(instance) => render_created(res, instance.path(), &instance),
                Err(e) => render_error(res, e),
            }
        }
        Some("subscription") => {
            let outcome = state
                .manager
                .create_subscription(
                    &app,
                    &container,
                    params.evt.unwrap_or(0),
                    params.endpoint.map(ByteString::from).unwrap_or_default(),
                    params.resource_name.map(ByteString::from),
                )
                .await;
            match outcome {
                Ok(subscription) => render_created(res, subscription.path(), &subscription),
                Err(e) => render_error(res, e),
            }
        }
        _ => render_error(
            res,
            Error::validation("resType must be content-instance or subscription"),
        ),
    }
}

#[handler]
async fn get_content_instance(req: &mut Request, depot: &mut Depot, res: &mut Response) {
    let state = state_of(depot);
    let (Some(app), Some(container), Some(name)) = (
        req.param::<String>("app"),
        req.param::<String>("container"),
        req.param::<String>("name"),
    ) else {
        return res.set_status_error(StatusError::bad_request());
    };
    match state.manager.get_content_instance(&app, &container, &name).await {
        Ok(instance) => res.render(Json(instance)),
        Err(e) => render_error(res, e),
    }
}

#[handler]
async fn delete_content_instance(req: &mut Request, depot: &mut Depot, res: &mut Response) {
    let state = state_of(depot);
    let (Some(app), Some(container), Some(name)) = (
        req.param::<String>("app"),
        req.param::<String>("container"),
        req.param::<String>("name"),
    ) else {
        return res.set_status_error(StatusError::bad_request());
    };
    match state.manager.delete_content_instance(&app, &container, &name).await {
        Ok(()) => res.set_status_code(StatusCode::OK),
        Err(e) => render_error(res, e),
    }
}

#[handler]
async fn get_subscription(req: &mut Request, depot: &mut Depot, res: &mut Response) {
    let state = state_of(depot);
    let (Some(app), Some(container), Some(name)) = (
        req.param::<String>("app"),
        req.param::<String>("container"),
        req.param::<String>("sub"),
    ) else {
        return res.set_status_error(StatusError::bad_request());
    };
    match state.manager.get_subscription(&app, &container, &name).await {
        Ok(subscription) => res.render(Json(subscription)),
        Err(e) => render_error(res, e),
    }
}

#[handler]
async fn delete_subscription(req: &mut Request, depot: &mut Depot, res: &mut Response) {
    let state = state_of(depot);
    let (Some(app), Some(container), Some(name)) = (
        req.param::<String>("app"),
        req.param::<String>("container"),
        req.param::<String>("sub"),
    ) else {
        return res.set_status_error(StatusError::bad_request());
    };
    match state.manager.delete_subscription(&app, &container, &name).await {
        Ok(()) => res.set_status_code(StatusCode::OK),
        Err(e) => render_error(res, e),
    }
}
