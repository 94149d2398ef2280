use axum::Router;
use axum::extract::Request;
use axum::routing::get;
use tower_rater::AdmissionGate;
use tower_rater::RateLimitConfig;
use tower_rater::RateLimitLayer;
use tower_rater::Upstream;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    // 1. Quota: 30 requests a minute per client, 15 more in a burst
    let config = RateLimitConfig::from_params("rate=30r/m burst=15")?
        .with_prefix("demo")
        .with_headers(true);

    // 2. The counting backend, resolved once at startup
    let backend = Upstream::resolve("counters", "127.0.0.1:6379")?;

    // 3. Key every request on the client's API key, falling back to the path
    let key = |req: &Request| {
        req.headers()
            .get("x-api-key")
            .map(|v| v.as_bytes().to_vec())
            .or_else(|| Some(req.uri().path().as_bytes().to_vec()))
    };
    let gate = AdmissionGate::new(config, key, backend)?;

    // 4. Build the Router
    let app = Router::new()
        .route("/", get(|| async { "Hello, Rater!" }))
        .layer(RateLimitLayer::new(gate));

    // 5. Serve
    let listener = tokio::net::TcpListener::bind("127.0.0.1:3000").await?;
    println!("📡 Listening on http://127.0.0.1:3000");

    axum::serve(listener, app).await?;
    Ok(())
}
