use hyper::server::conn::AddrStream;
use hyper::service::{make_service_fn, service_fn};
use hyper::{Body, Method, Request, Response, Server};
use log::{error, info};
use onboarding::{
    read_body, LocalBlobStore, Onboarding, OnboardingConfig, PgRegistry, MAX_BODY_BYTES,
};
use std::convert::Infallible;
use std::error::Error;
use std::net::SocketAddr;
use std::sync::Arc;

type Handler = Onboarding<PgRegistry, LocalBlobStore>;

fn reply(status: u16, text: String) -> Response<Body> {
    let mut response = Response::new(Body::from(text));
    if let Ok(code) = hyper::StatusCode::from_u16(status) {
        *response.status_mut() = code;
    }
    response
}

async fn handle(req: Request<Body>, onboarding: Arc<Handler>) -> Result<Response<Body>, Infallible> {
    if req.method() != Method::POST {
        return Ok(reply(405, "Only POST is supported".to_owned()));
    }

    let raw = match read_body(req.into_body(), MAX_BODY_BYTES).await {
        Ok(raw) => raw,
        Err(err) => {
            error!("Rejected request body: {}", err);
            return Ok(reply(err.status(), err.to_string()));
        }
    };

    let result = onboarding.handle(&raw).await;
    Ok(reply(result.status, result.body))
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    env_logger::init();

    let config = OnboardingConfig::from_env()?;

    let registry = PgRegistry::connect(&config.db).await?;
    registry.ensure_schema().await?;
    let blobs = LocalBlobStore::new(
        &config.source_dir,
        &config.destination_dir,
        &config.destination_url,
    )?;

    let onboarding = Arc::new(Onboarding::new(registry, blobs, &config.user_name));

    let make_service = make_service_fn(move |_conn: &AddrStream| {
        // each connection gets its own handle on the shared context
        let ctx = Arc::clone(&onboarding);
        let service = service_fn(move |req| handle(req, ctx.clone()));

        async move { Ok::<_, Infallible>(service) }
    });

    let addr = SocketAddr::from(([0, 0, 0, 0], 3000));
    info!("Onboarding function listening on {}", addr);

    Server::bind(&addr).serve(make_service).await?;

    Ok(())
}
