//! The server module owns the RPC surface.  It serves the store's operations as JSON over HTTP,
//! and hands subscriptions to the subscription pipeline.

pub mod apply;
mod error;
mod store;
mod subscribe;

pub use apply::{CommandApplier, DeviceCallback};
pub use error::{Error, Result};
pub use store::{Store, GNMI_VERSION, SUPPORTED_ENCODINGS};
pub use subscribe::{
    subscribe, QueueItem, SubscribeOptions, SubscribeStream, DEFAULT_TIMEOUT,
};

use actix_web::body::BoxBody;
use actix_web::http::StatusCode;
use actix_web::{
    error::InternalError, error::ResponseError, web, App, HttpRequest, HttpResponse, HttpServer,
    Responder,
};
use apitypes::{
    CapabilityResponse, Code, GetRequest, GetResponse, SetRequest, SetResponse, Status,
    SubscribeRequest, SubscribeResponse,
};
use bytes::Bytes;
use datastore::ModelSchema;
use futures::stream;
use log::{info, warn};
use snafu::ResultExt;
use std::fs;
use std::path::PathBuf;
use std::time::Duration;
use tokio::sync::mpsc;

/// Everything the binary decided about how to run the server.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub bind_address: String,
    pub schema_path: PathBuf,
    pub config_path: Option<PathBuf>,
    pub apply_command: Option<PathBuf>,
    pub subscribe_timeout: Duration,
    pub threads: usize,
}

type StoreData = web::Data<Store<ModelSchema>>;

// =^..^=   =^..^=   =^..^=   =^..^=   =^..^=   =^..^=   =^..^=   =^..^=   =^..^=

// Router

/// This is the primary interface of the module.  It loads the schema and initial config, builds
/// the store that every request shares, and runs the HTTP server until it's stopped.
pub async fn serve(config: ServerConfig) -> Result<()> {
    let schema = ModelSchema::from_file(&config.schema_path).context(error::SchemaLoadSnafu)?;
    let initial = match &config.config_path {
        Some(path) => Some(fs::read(path).context(error::ConfigReadSnafu { path })?),
        None => None,
    };
    let callback = config.apply_command.as_ref().map(|program| {
        Box::new(CommandApplier::new(program, Vec::<String>::new())) as Box<dyn DeviceCallback>
    });

    let store = web::Data::new(Store::new(schema, initial.as_deref(), callback)?);
    let options = web::Data::new(SubscribeOptions {
        timeout: config.subscribe_timeout,
    });

    let http_server = HttpServer::new(move || {
        App::new()
            // This makes the store available to API methods merely by having a Data parameter.
            .app_data(store.clone())
            .app_data(options.clone())
            .configure(routes)
    })
    .workers(config.threads)
    .bind(&config.bind_address)
    .context(error::BindAddressSnafu {
        addr: &config.bind_address,
    })?;

    http_server.run().await.context(error::ServerStartSnafu)
}

fn routes(cfg: &mut web::ServiceConfig) {
    cfg
        // In our implementation of ResponseError on our own error type below, we include the
        // error message in the response.  If actix rejects a request early because it doesn't
        // fit our messages, though, it doesn't even get to the ResponseError implementation.
        // This configuration of the Json extractor gives those a Status body, too.
        .app_data(web::JsonConfig::default().error_handler(|err, _req| {
            let status = Status::new(Code::InvalidArgument, err.to_string());
            InternalError::from_response(err, HttpResponse::BadRequest().json(status)).into()
        }))
        .route("/capabilities", web::get().to(capabilities))
        .route("/get", web::post().to(get))
        .route("/set", web::post().to(set))
        .route("/subscribe", web::post().to(subscribe_stream));
}

// =^..^=   =^..^=   =^..^=   =^..^=   =^..^=   =^..^=   =^..^=   =^..^=   =^..^=

// Handlers

async fn capabilities(store: StoreData) -> CapabilityBody {
    info!("Capabilities requested");
    CapabilityBody(store.capabilities())
}

async fn get(req: web::Json<GetRequest>, store: StoreData) -> Result<GetBody> {
    info!("Get of {} path(s)", req.path.len());
    store.get(&req).map(GetBody)
}

async fn set(req: web::Json<SetRequest>, store: StoreData) -> Result<SetBody> {
    info!(
        "Set with {} delete(s), {} replace(s), {} update(s)",
        req.delete.len(),
        req.replace.len(),
        req.update.len()
    );
    store.set(&req).map(SetBody)
}

/// HTTP carries a single subscribe request, so the request stream ends after it.  Responses are
/// streamed back one JSON document per line; if the subscription fails, the last line is the
/// error.
async fn subscribe_stream(
    req: web::Json<SubscribeRequest>,
    store: StoreData,
    options: web::Data<SubscribeOptions>,
) -> HttpResponse {
    info!("Subscribe requested");
    let (req_tx, req_rx) = mpsc::unbounded_channel();
    let (resp_tx, resp_rx) = mpsc::unbounded_channel();
    // The receiver is still here, so this can't fail.
    let _ = req_tx.send(req.into_inner());
    drop(req_tx);

    let pipeline = tokio::spawn(subscribe::subscribe(
        store.into_inner(),
        SubscribeStream::new(req_rx, resp_tx),
        **options,
    ));

    let body = stream::unfold(Some((resp_rx, pipeline)), |state| async move {
        let (mut responses, pipeline) = state?;
        if let Some(response) = responses.recv().await {
            return Some((frame(&response), Some((responses, pipeline))));
        }
        let status = match pipeline.await {
            Ok(Ok(())) => return None,
            Ok(Err(e)) => {
                warn!("Subscription ended with error: {}", e);
                Status::new(e.code(), e.to_string())
            }
            Err(e) => Status::new(Code::Internal, e.to_string()),
        };
        Some((frame(&SubscribeResponse::Error(status)), None))
    });

    HttpResponse::Ok()
        .content_type("application/x-ndjson")
        .streaming(body)
}

fn frame(response: &SubscribeResponse) -> Result<Bytes> {
    let mut line = serde_json::to_vec(response).context(error::ResponseSerializationSnafu)?;
    line.push(b'\n');
    Ok(Bytes::from(line))
}

// =^..^=   =^..^=   =^..^=   =^..^=   =^..^=   =^..^=   =^..^=   =^..^=   =^..^=

// Helpers for handler methods called by the router

impl ResponseError for error::Error {
    /// Maps the protocol status of our errors to the HTTP status they should return.
    fn status_code(&self) -> StatusCode {
        match self.code() {
            Code::Ok => StatusCode::OK,
            Code::InvalidArgument => StatusCode::BAD_REQUEST,
            Code::NotFound => StatusCode::NOT_FOUND,
            Code::Aborted => StatusCode::CONFLICT,
            Code::Unimplemented => StatusCode::NOT_IMPLEMENTED,
            Code::DeadlineExceeded => StatusCode::GATEWAY_TIMEOUT,
            Code::Unavailable => StatusCode::SERVICE_UNAVAILABLE,
            // Client closed request
            Code::Cancelled => {
                StatusCode::from_u16(499).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR)
            }
            Code::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    // Include the error message in the response, and for all error types.
    fn error_response(&self) -> HttpResponse {
        HttpResponse::build(self.status_code()).json(Status::new(self.code(), self.to_string()))
    }
}

// Can also override how our errors are rendered, and by content type, using
// actix_web::dev::ServiceResponse, but the JSON Status body is enough for our callers.

/// Helper macro for implementing the actix-web Responder trait for a type.
/// $for: the type for which we implement Responder.
/// $self: just pass "self"  (macro hygiene requires this)
/// $serialize_expr: the thing to serialize for a response; this is just "self" again if $for
///    implements Serialize, or is "self.0" for a newtype over something implementing Serialize
macro_rules! impl_responder_for {
    ($for:ident, $self:ident, $serialize_expr:expr) => (
        impl Responder for $for {
            type Body = BoxBody;

            fn respond_to($self, _req: &HttpRequest) -> HttpResponse<Self::Body> {
                match serde_json::to_string(&$serialize_expr)
                    .context(error::ResponseSerializationSnafu)
                {
                    Ok(body) => HttpResponse::Ok()
                        .content_type("application/json")
                        .body(body),
                    Err(e) => e.error_response(),
                }
            }
        }
    )
}

/// This lets us respond from our handler methods with a CapabilityResponse
struct CapabilityBody(CapabilityResponse);
impl_responder_for!(CapabilityBody, self, self.0);

/// This lets us respond from our handler methods with a GetResponse (or Result<GetResponse>)
struct GetBody(GetResponse);
impl_responder_for!(GetBody, self, self.0);

/// This lets us respond from our handler methods with a SetResponse (or Result<SetResponse>)
struct SetBody(SetResponse);
impl_responder_for!(SetBody, self, self.0);

#[cfg(test)]
mod test {
    use super::*;
    use actix_web::test;
    use apitypes::{
        Encoding, Path, Subscription, SubscriptionList, SubscriptionListMode, TypedValue, Update,
    };
    use serde_json::json;

    fn app_data() -> (StoreData, web::Data<SubscribeOptions>) {
        let store = store::test::store(json!({
            "system": {"config": {"hostname": "switch_a"}},
            "interfaces": {"interface": [{"name": "eth0", "config": {"name": "eth0", "mtu": 1500}}]}
        }));
        (
            web::Data::new(store),
            web::Data::new(SubscribeOptions::default()),
        )
    }

    fn path(s: &str) -> Path {
        s.parse().unwrap()
    }

    fn get_request(p: &str) -> GetRequest {
        GetRequest {
            path: vec![path(p)],
            encoding: Encoding::JsonIetf,
            ..Default::default()
        }
    }

    fn subscribe_request(p: &str, mode: SubscriptionListMode) -> SubscribeRequest {
        SubscribeRequest::Subscribe(SubscriptionList {
            subscription: vec![Subscription {
                path: path(p),
                mode: Default::default(),
                sample_interval: 0,
            }],
            mode,
            ..Default::default()
        })
    }

    fn lines(body: &[u8]) -> Vec<SubscribeResponse> {
        body.split(|b| *b == b'\n')
            .filter(|line| !line.is_empty())
            .map(|line| serde_json::from_slice(line).unwrap())
            .collect()
    }

    #[actix_web::test]
    async fn capabilities_route() {
        let (store, options) = app_data();
        let app =
            test::init_service(App::new().app_data(store).app_data(options).configure(routes))
                .await;
        let req = test::TestRequest::get().uri("/capabilities").to_request();
        let caps: CapabilityResponse = test::call_and_read_body_json(&app, req).await;
        assert_eq!(caps.gnmi_version, GNMI_VERSION);
        assert_eq!(caps.supported_models.len(), 4);
    }

    #[actix_web::test]
    async fn set_then_get() {
        let (store, options) = app_data();
        let app =
            test::init_service(App::new().app_data(store).app_data(options).configure(routes))
                .await;

        let set_req = SetRequest {
            update: vec![Update {
                path: path("/interfaces/interface[name=eth0]/config/mtu"),
                val: TypedValue::UintVal(9000),
            }],
            ..Default::default()
        };
        let req = test::TestRequest::post()
            .uri("/set")
            .set_json(&set_req)
            .to_request();
        let response: SetResponse = test::call_and_read_body_json(&app, req).await;
        assert_eq!(response.response.len(), 1);

        let req = test::TestRequest::post()
            .uri("/get")
            .set_json(get_request("/interfaces/interface[name=eth0]/config/mtu"))
            .to_request();
        let response: GetResponse = test::call_and_read_body_json(&app, req).await;
        assert_eq!(
            response.notification[0].update[0].val,
            TypedValue::UintVal(9000)
        );
    }

    #[actix_web::test]
    async fn errors_carry_status() {
        let (store, options) = app_data();
        let app =
            test::init_service(App::new().app_data(store).app_data(options).configure(routes))
                .await;

        let req = test::TestRequest::post()
            .uri("/get")
            .set_json(get_request("/system/clock"))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
        let status: Status = test::read_body_json(resp).await;
        assert_eq!(status.code, Code::NotFound);

        let set_req = SetRequest {
            update: vec![Update {
                path: path("/interfaces/interface[name=eth0]/config/mtu"),
                val: TypedValue::StringVal("big".to_string()),
            }],
            ..Default::default()
        };
        let req = test::TestRequest::post()
            .uri("/set")
            .set_json(&set_req)
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

        // Doesn't even parse
        let req = test::TestRequest::post()
            .uri("/get")
            .insert_header(("content-type", "application/json"))
            .set_payload("{\"path\": 7}")
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        let status: Status = test::read_body_json(resp).await;
        assert_eq!(status.code, Code::InvalidArgument);
    }

    #[actix_web::test]
    async fn subscribe_once_streams_lines() {
        let (store, options) = app_data();
        let app =
            test::init_service(App::new().app_data(store).app_data(options).configure(routes))
                .await;
        let req = test::TestRequest::post()
            .uri("/subscribe")
            .set_json(subscribe_request("/interfaces", SubscriptionListMode::Once))
            .to_request();
        let body = test::call_and_read_body(&app, req).await;
        let responses = lines(&body);
        assert_eq!(responses.len(), 2);
        match &responses[0] {
            SubscribeResponse::Update(notification) => {
                let mut paths: Vec<String> = notification
                    .update
                    .iter()
                    .map(|u| u.path.to_string())
                    .collect();
                paths.sort();
                assert_eq!(
                    paths,
                    vec![
                        "/interfaces/interface[name=eth0]/config/mtu",
                        "/interfaces/interface[name=eth0]/config/name",
                        "/interfaces/interface[name=eth0]/name",
                    ]
                );
            }
            other => panic!("expected an update, got {:?}", other),
        }
        assert_eq!(responses[1], SubscribeResponse::SyncResponse(true));
    }

    #[actix_web::test]
    async fn subscribe_error_is_last_line() {
        let (store, options) = app_data();
        let app =
            test::init_service(App::new().app_data(store).app_data(options).configure(routes))
                .await;
        let req = test::TestRequest::post()
            .uri("/subscribe")
            .set_json(subscribe_request("/system", SubscriptionListMode::Stream))
            .to_request();
        let body = test::call_and_read_body(&app, req).await;
        match lines(&body).as_slice() {
            [SubscribeResponse::Error(status)] => assert_eq!(status.code, Code::Unimplemented),
            other => panic!("expected one error, got {:?}", other),
        }
    }
}
