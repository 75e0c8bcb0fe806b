//! HttpFetcher against a mock server.

use harbinger::{
    Fetcher, MemoryCache, PreloadConfig, PreloadCoordinator, PreloadError, PreloadOptions,
    ResourceKey,
};
use harbinger_http::{HttpConfig, HttpFetcher};
use std::sync::Arc;
use std::time::Duration;
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn key(server: &MockServer, route: &str) -> ResourceKey {
    ResourceKey::from(format!("{}{}", server.uri(), route))
}

#[tokio::test]
async fn fetches_page_with_navigation_headers() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/about"))
        .and(header("x-requested-with", "harbinger"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<html>about</html>"))
        .expect(1)
        .mount(&server)
        .await;

    let fetcher = HttpFetcher::new(HttpConfig::default()).unwrap();
    let page = fetcher.fetch(&key(&server, "/about#team")).await.unwrap();

    assert_eq!(page.status, 200);
    assert_eq!(page.text(), Some("<html>about</html>"));
}

#[tokio::test]
async fn server_errors_map_to_server_error() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/broken"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    let fetcher = HttpFetcher::new(HttpConfig::default()).unwrap();
    let k = key(&server, "/broken");
    let err = fetcher.fetch(&k).await.unwrap_err();

    assert_eq!(err, PreloadError::ServerError { key: k, status: 500 });
}

#[tokio::test]
async fn missing_pages_are_transport_failures() {
    let server = MockServer::start().await;

    let fetcher = HttpFetcher::new(HttpConfig::default()).unwrap();
    let err = fetcher.fetch(&key(&server, "/missing")).await.unwrap_err();

    assert!(matches!(err, PreloadError::Transport(_)));
}

#[tokio::test]
async fn coordinator_requests_each_page_once() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/next"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_string("<html>next</html>")
                .set_delay(Duration::from_millis(50)),
        )
        .expect(1)
        .mount(&server)
        .await;

    let coordinator = PreloadCoordinator::builder(PreloadConfig::default())
        .cache(Arc::new(MemoryCache::new()))
        .fetcher(Arc::new(HttpFetcher::new(HttpConfig::default()).unwrap()))
        .build()
        .unwrap();

    let k = key(&server, "/next");
    let first = coordinator.schedule(k.clone(), PreloadOptions::low());
    let second = coordinator.schedule(k.clone(), PreloadOptions::high());
    let (a, b) = tokio::join!(first.resolve(), second.resolve());
    assert_eq!(a.unwrap(), b.unwrap());

    // Served from cache now
    let third = coordinator.schedule(k, PreloadOptions::high());
    assert!(third.is_cached());
}
