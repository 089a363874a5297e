use fetch_x::{
    transport_fn, Coordinator, FetchConfig, RequestDescriptor, Response, StatePatch, TransportFailure,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    fetch_x::init_logging();

    // A flaky upstream: every third call succeeds, the others ask us to back off.
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&calls);
    let transport = transport_fn(move |request: RequestDescriptor| {
        let n = counter.fetch_add(1, Ordering::SeqCst);
        async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            if n % 3 == 2 {
                Ok(Response::ok(format!("{{\"url\":\"{}\",\"call\":{}}}", request.url, n)))
            } else {
                Err(TransportFailure::status(503, "upstream busy").with_header("Retry-After", "1"))
            }
        }
    });

    let config = FetchConfig::from_toml_str(
        r#"
        cache_time = 30

        [retry]
        retries = 3
        delay = 200
        backoff = 2.0
        "#,
    )?;
    let client = Coordinator::builder(transport).with_config(config).build()?;

    let request = RequestDescriptor::get("https://api.example.com/items").with_param("page", "1");
    let _subscription = client.subscribe(request.cache_key(), |patch: &StatePatch| {
        println!("state: fetching={:?} data={:?}", patch.is_fetching, patch.data.as_ref().and_then(Response::text));
    });

    // Five concurrent callers, one upstream execution.
    let replies = futures::future::join_all((0..5).map(|_| client.fetch(request.clone()))).await;
    for reply in replies {
        tracing::info!("reply: {:?}", reply?.data.as_ref().and_then(Response::text));
    }

    let cached = client.fetch(request).await?;
    tracing::info!(
        "second fetch served from cache: {}, upstream calls: {}",
        cached.from_cache,
        calls.load(Ordering::SeqCst)
    );

    client.shutdown();
    Ok(())
}
