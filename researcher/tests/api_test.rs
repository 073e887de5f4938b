use std::sync::Arc;

use mockito::{Matcher, Mock, ServerGuard};
use rocket::http::{ContentType, Header, Status};
use rocket::local::asynchronous::Client;
use serde_json::Value;
use sqlx::SqlitePool;

use common::init_db_pool;
use researcher::fetcher::PageFetcher;
use researcher::history::{HistoryStore, ResearchPayload, ResearchRecord};
use researcher::llm::remote::RemoteLlmProvider;
use researcher::llm::summarizer::SummarizerSettings;
use researcher::llm::LlmProvider;
use researcher::research::Researcher;
use researcher::search::SearchClient;
use researcher::server::build_rocket;

const LOCAL_ORIGIN: &str = "http://localhost:3000";

struct TestApp {
    client: Client,
    pool: SqlitePool,
    _dir: tempfile::TempDir,
}

async fn setup_app(server: &ServerGuard, fail_on_save_error: bool) -> TestApp {
    setup_app_with_origins(server, fail_on_save_error, vec![LOCAL_ORIGIN.to_string()]).await
}

async fn setup_app_with_origins(server: &ServerGuard, fail_on_save_error: bool, origins: Vec<String>) -> TestApp {
    let dir = tempfile::tempdir().expect("tempdir");
    let db_path = dir.path().join(format!("history_{}.db", uuid::Uuid::new_v4()));
    let pool = init_db_pool(&db_path.to_string_lossy()).await.expect("init pool");
    let history = HistoryStore::new(pool.clone());
    history.init().await.expect("init history");

    let fetcher = PageFetcher::new("Mozilla/5.0", 5).expect("fetcher");
    let search = SearchClient::new(format!("{}/html/", server.url()), fetcher.clone());
    let llm = RemoteLlmProvider::new(format!("{}/v1/chat/completions", server.url()), "test-key", "test-model")
        .with_defaults(5, 256, 0.3);

    let researcher = Researcher {
        search,
        fetcher,
        llm: Some(Arc::new(llm) as Arc<dyn LlmProvider>),
        history,
        summary: SummarizerSettings::default(),
        max_content_length: 8000,
        max_results: 20,
        fail_on_save_error,
    };

    let figment = rocket::Config::figment().merge(("log_level", "off"));
    let rocket = build_rocket(figment, researcher, origins);
    let client = Client::tracked(rocket).await.expect("valid rocket instance");

    TestApp {
        client,
        pool,
        _dir: dir,
    }
}

fn results_page(server_url: &str, count: usize) -> String {
    let mut html = String::from("<html><body><div class=\"results\">");
    for n in 1..=count {
        let target = format!("{}/page/{}", server_url, n);
        // every other hit is wrapped in a redirect link
        let href = if n % 2 == 0 {
            let encoded: String = url::form_urlencoded::byte_serialize(target.as_bytes()).collect();
            format!("/l/?uddg={}&amp;rut=xyz", encoded)
        } else {
            target
        };
        html.push_str(&format!(
            r#"<div class="result"><h2 class="result__title"><a class="result__a" href="{}">Result {}</a></h2><a class="result__snippet">Snippet {}</a></div>"#,
            href, n, n
        ));
    }
    html.push_str("</div></body></html>");
    html
}

async fn mock_search(server: &mut ServerGuard, query: &str, body: String) -> Mock {
    server
        .mock("GET", "/html/")
        .match_query(Matcher::UrlEncoded("q".into(), query.into()))
        .with_status(200)
        .with_header("content-type", "text/html; charset=utf-8")
        .with_body(body)
        .create_async()
        .await
}

async fn mock_page(server: &mut ServerGuard, path: &str, content_type: &str, body: &str) -> Mock {
    server
        .mock("GET", path)
        .with_status(200)
        .with_header("content-type", content_type)
        .with_body(body)
        .create_async()
        .await
}

fn completion_body(content: &str) -> String {
    serde_json::json!({
        "model": "test-model",
        "choices": [{ "message": { "role": "assistant", "content": content } }],
        "usage": { "prompt_tokens": 120, "completion_tokens": 40, "total_tokens": 160 }
    })
    .to_string()
}

async fn history_len(pool: &SqlitePool) -> i64 {
    sqlx::query_scalar("SELECT COUNT(*) FROM research_history")
        .fetch_one(pool)
        .await
        .expect("count history")
}

async fn post_research(client: &Client, body: &str) -> (Status, Value) {
    let response = client
        .post("/research")
        .header(ContentType::JSON)
        .body(body)
        .dispatch()
        .await;
    let status = response.status();
    let json = response.into_json::<Value>().await.expect("json body");
    (status, json)
}

const BULLETS: &str = "- Rust has no GC\n- Go has a GC\n- Both compile to native code\n- Rust wins CPU-bound benchmarks\n- Go compiles faster";

#[tokio::test]
async fn research_enriches_summarizes_and_records() {
    let mut server = mockito::Server::new_async().await;
    let url = server.url();

    let search = mock_search(&mut server, "rust vs go performance", results_page(&url, 3)).await;
    let page1 = mock_page(
        &mut server,
        "/page/1",
        "text/html; charset=utf-8",
        "<html><body><nav>menu</nav><article>Rust benchmarks show lower latency.</article></body></html>",
    )
    .await;
    let page2 = mock_page(
        &mut server,
        "/page/2",
        "text/html",
        "<html><body><main><p>Go has a fast garbage collector.</p></main><footer>c</footer></body></html>",
    )
    .await;
    let page3 = mock_page(&mut server, "/page/3", "application/pdf", "%PDF-1.7").await;

    let llm = server
        .mock("POST", "/v1/chat/completions")
        .match_header("authorization", "Bearer test-key")
        .match_body(Matcher::AllOf(vec![
            Matcher::Regex("Rust benchmarks show lower latency.".into()),
            Matcher::Regex("Go has a fast garbage collector.".into()),
            // page 3 is not HTML, so its snippet stands in for the content
            Matcher::Regex("Excerpt: Snippet 3".into()),
        ]))
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(completion_body(BULLETS))
        .create_async()
        .await;

    let app = setup_app(&server, false).await;

    let (status, body) = post_research(&app.client, r#"{"text": "rust vs go performance", "num_results": 3}"#).await;
    assert_eq!(status, Status::Ok);

    let payload: ResearchPayload = serde_json::from_value(body).expect("payload shape");
    assert_eq!(payload.query, "rust vs go performance");
    assert_eq!(payload.results.len(), 3);
    assert_eq!(payload.results[0].url, format!("{}/page/1", url));
    assert_eq!(payload.results[1].url, format!("{}/page/2", url));
    assert_eq!(payload.results[2].snippet, "Snippet 3");
    assert_eq!(payload.summary, BULLETS);

    for mock in [search, page1, page2, page3, llm] {
        mock.assert_async().await;
    }

    let response = app.client.get("/history").dispatch().await;
    assert_eq!(response.status(), Status::Ok);
    let records: Vec<ResearchRecord> = response.into_json().await.expect("history json");
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].query, "rust vs go performance");
    assert_eq!(records[0].results, payload);

    let response = app.client.get(format!("/history/{}", records[0].id)).dispatch().await;
    assert_eq!(response.status(), Status::Ok);
    let record: ResearchRecord = response.into_json().await.expect("record json");
    assert_eq!(record, records[0]);
}

#[tokio::test]
async fn result_count_never_exceeds_request() {
    let mut server = mockito::Server::new_async().await;
    let url = server.url();

    let _search = mock_search(&mut server, "sqlite wal", results_page(&url, 6)).await;
    let mut _pages = Vec::new();
    for n in 1..=6 {
        _pages.push(mock_page(&mut server, &format!("/page/{}", n), "text/html", "<p>text</p>").await);
    }
    let _llm = server
        .mock("POST", "/v1/chat/completions")
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(completion_body("- ok"))
        .create_async()
        .await;

    let app = setup_app(&server, false).await;

    let (status, body) = post_research(&app.client, r#"{"text": "sqlite wal", "num_results": 2}"#).await;
    assert_eq!(status, Status::Ok);
    assert_eq!(body["results"].as_array().map(Vec::len), Some(2));

    // default is five
    let (status, body) = post_research(&app.client, r#"{"text": "sqlite wal"}"#).await;
    assert_eq!(status, Status::Ok);
    assert_eq!(body["results"].as_array().map(Vec::len), Some(5));

    // fewer blocks than requested
    let (status, body) = post_research(&app.client, r#"{"text": "sqlite wal", "num_results": 10}"#).await;
    assert_eq!(status, Status::Ok);
    assert_eq!(body["results"].as_array().map(Vec::len), Some(6));

    assert_eq!(history_len(&app.pool).await, 3);
}

#[tokio::test]
async fn no_search_results_is_not_found_and_not_recorded() {
    let mut server = mockito::Server::new_async().await;

    let _search = mock_search(
        &mut server,
        "zxqv nothing",
        "<html><body><div class=\"no-results\">No results.</div></body></html>".to_string(),
    )
    .await;
    let llm = server
        .mock("POST", "/v1/chat/completions")
        .expect(0)
        .create_async()
        .await;

    let app = setup_app(&server, false).await;

    let (status, body) = post_research(&app.client, r#"{"text": "zxqv nothing"}"#).await;
    assert_eq!(status, Status::NotFound);
    assert_eq!(body["detail"], "No search results found");
    assert_eq!(history_len(&app.pool).await, 0);

    llm.assert_async().await;
}

#[tokio::test]
async fn search_engine_failure_is_not_found() {
    let mut server = mockito::Server::new_async().await;
    let _search = server
        .mock("GET", "/html/")
        .match_query(Matcher::Any)
        .with_status(502)
        .create_async()
        .await;

    let app = setup_app(&server, false).await;

    let (status, _) = post_research(&app.client, r#"{"text": "anything"}"#).await;
    assert_eq!(status, Status::NotFound);
    assert_eq!(history_len(&app.pool).await, 0);
}

#[tokio::test]
async fn summarizer_failure_still_succeeds() {
    let mut server = mockito::Server::new_async().await;
    let url = server.url();

    let _search = mock_search(&mut server, "tokio runtime", results_page(&url, 1)).await;
    let _page = mock_page(&mut server, "/page/1", "text/html", "<article>Tokio is async.</article>").await;
    let _llm = server
        .mock("POST", "/v1/chat/completions")
        .with_status(500)
        .with_body("upstream exploded")
        .create_async()
        .await;

    let app = setup_app(&server, false).await;

    let (status, body) = post_research(&app.client, r#"{"text": "tokio runtime"}"#).await;
    assert_eq!(status, Status::Ok);

    let summary = body["summary"].as_str().expect("summary string");
    assert!(summary.starts_with("Failed to generate summary: "));
    assert!(summary.contains("500"));
    assert!(summary.contains("upstream exploded"));
    assert_eq!(history_len(&app.pool).await, 1);
}

#[tokio::test]
async fn save_failure_policy() {
    for fail_on_save_error in [false, true] {
        let mut server = mockito::Server::new_async().await;
        let url = server.url();

        let _search = mock_search(&mut server, "closed pool", results_page(&url, 1)).await;
        let _page = mock_page(&mut server, "/page/1", "text/html", "<p>body</p>").await;
        let _llm = server
            .mock("POST", "/v1/chat/completions")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(completion_body("- fine"))
            .create_async()
            .await;

        let app = setup_app(&server, fail_on_save_error).await;
        app.pool.close().await;

        let (status, body) = post_research(&app.client, r#"{"text": "closed pool"}"#).await;
        if fail_on_save_error {
            assert_eq!(status, Status::InternalServerError);
            let detail = body["detail"].as_str().expect("detail");
            assert!(detail.contains("failed to insert research record"));
        } else {
            assert_eq!(status, Status::Ok);
            assert_eq!(body["summary"], "- fine");
        }
    }
}

#[tokio::test]
async fn invalid_requests_get_json_errors() {
    let server = mockito::Server::new_async().await;
    let app = setup_app(&server, false).await;

    let (status, body) = post_research(&app.client, r#"{"text": "   "}"#).await;
    assert_eq!(status, Status::BadRequest);
    assert_eq!(body["detail"], "Query text must not be empty");

    let (status, _) = post_research(&app.client, r#"{"text": "rust", "num_results": 0}"#).await;
    assert_eq!(status, Status::BadRequest);

    let (status, body) = post_research(&app.client, r#"{"num_results": 3}"#).await;
    assert_eq!(status, Status::UnprocessableEntity);
    assert!(body["detail"].is_string());

    let (status, body) = post_research(&app.client, "{not json").await;
    assert_eq!(status, Status::BadRequest);
    assert!(body["detail"].is_string());

    assert_eq!(history_len(&app.pool).await, 0);
}

#[tokio::test]
async fn unknown_history_ids_are_not_found() {
    let server = mockito::Server::new_async().await;
    let app = setup_app(&server, false).await;

    for path in ["/history/1", "/history/999999", "/history/-3", "/history/abc"] {
        let response = app.client.get(path).dispatch().await;
        assert_eq!(response.status(), Status::NotFound, "{}", path);
        let body: Value = response.into_json().await.expect("json body");
        assert_eq!(body["detail"], "Not found");
    }

    let response = app.client.get("/history").dispatch().await;
    assert_eq!(response.status(), Status::Ok);
    assert_eq!(response.into_string().await.as_deref(), Some("[]"));
}

#[tokio::test]
async fn history_lists_newest_first() {
    let server = mockito::Server::new_async().await;
    let app = setup_app(&server, false).await;

    let store = HistoryStore::new(app.pool.clone());
    for q in ["one", "two", "three"] {
        let payload = ResearchPayload {
            query: q.to_string(),
            results: Vec::new(),
            summary: format!("summary of {}", q),
        };
        store.save(q, &payload).await.expect("save");
    }

    let records: Vec<ResearchRecord> = app
        .client
        .get("/history")
        .dispatch()
        .await
        .into_json()
        .await
        .expect("history json");

    let queries: Vec<_> = records.iter().map(|r| r.query.as_str()).collect();
    assert_eq!(queries, vec!["three", "two", "one"]);
    assert!(records.windows(2).all(|w| w[0].timestamp >= w[1].timestamp));
}

#[tokio::test]
async fn liveness_and_cors() {
    let server = mockito::Server::new_async().await;
    let app = setup_app(&server, false).await;

    let response = app
        .client
        .get("/")
        .header(Header::new("Origin", LOCAL_ORIGIN))
        .dispatch()
        .await;
    assert_eq!(response.status(), Status::Ok);
    assert_eq!(
        response.headers().get_one("Access-Control-Allow-Origin"),
        Some(LOCAL_ORIGIN)
    );
    let body: Value = response.into_json().await.expect("json body");
    assert_eq!(body["message"], "API is live");

    let response = app
        .client
        .get("/")
        .header(Header::new("Origin", "https://evil.example"))
        .dispatch()
        .await;
    assert!(response.headers().get_one("Access-Control-Allow-Origin").is_none());

    let response = app
        .client
        .options("/research")
        .header(Header::new("Origin", LOCAL_ORIGIN))
        .header(Header::new("Access-Control-Request-Method", "POST"))
        .header(Header::new("Access-Control-Request-Headers", "content-type"))
        .dispatch()
        .await;
    assert_eq!(response.status(), Status::NoContent);
    assert_eq!(
        response.headers().get_one("Access-Control-Allow-Headers"),
        Some("content-type")
    );
    assert!(response
        .headers()
        .get_one("Access-Control-Allow-Methods")
        .unwrap_or_default()
        .contains("POST"));
}

#[tokio::test]
async fn wildcard_origin_allows_any_caller() {
    let server = mockito::Server::new_async().await;
    let app = setup_app_with_origins(&server, false, vec!["*".to_string()]).await;

    for origin in ["https://anywhere.example", LOCAL_ORIGIN] {
        let response = app
            .client
            .get("/")
            .header(Header::new("Origin", origin))
            .dispatch()
            .await;
        assert_eq!(response.status(), Status::Ok);
        assert_eq!(response.headers().get_one("Access-Control-Allow-Origin"), Some("*"));
        assert!(response.headers().get_one("Vary").is_none());
    }

    let response = app.client.get("/history").dispatch().await;
    assert!(response.headers().get_one("Access-Control-Allow-Origin").is_none());
}
