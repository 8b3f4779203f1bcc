use axum::body::{Body, Bytes};
use axum::http::{Request, StatusCode};
use axum::Router;
use http_body_util::BodyExt;
use lexbarrel_core::config::IndexConfig;
use lexbarrel_core::document::CleanedDocument;
use lexbarrel_core::forward::build_forward_index;
use lexbarrel_core::inverted::build_inverted_index;
use lexbarrel_core::lexicon::{build_lexicon, Lexicon};
use lexbarrel_core::persist::IndexPaths;
use lexbarrel_core::progress::{ProgressLog, Stage};
use lexbarrel_core::ranker::{QueryEncoder, SemanticScorer, VectorIndex};
use lexbarrel_core::trie::Trie;
use serde_json::Value;
use std::sync::Arc;
use tempfile::tempdir;
use tower::ServiceExt;

fn build_tiny_index(dir: &std::path::Path, docs: Vec<CleanedDocument>) {
    let paths = IndexPaths::new(dir);
    let config = IndexConfig::default();
    let input = || docs.iter().cloned().map(Ok);

    let mut lexicon = Lexicon::open_or_new(&paths).unwrap();
    let mut lexicon_log = ProgressLog::open(&paths, Stage::Lexicon).unwrap();
    build_lexicon(&paths, &config, &mut lexicon, &mut lexicon_log, input()).unwrap();
    let mut forward_log = ProgressLog::open(&paths, Stage::Forward).unwrap();
    build_forward_index(&paths, &config, &lexicon, &lexicon_log, &mut forward_log, input()).unwrap();
    build_inverted_index(&paths, &config, &mut lexicon).unwrap();
    Trie::from_lexicon(&lexicon).save(&paths).unwrap();
}

fn corpus() -> Vec<CleanedDocument> {
    vec![
        CleanedDocument::new("a.json", [("title", "virus transmission"), ("text", "virus")]),
        CleanedDocument::new("b.json", [("text", "virus vaccine")]),
        CleanedDocument::new("c.json", [("abstract", "vaccine trial")]),
    ]
}

async fn call(app: Router, req: Request<Body>) -> (StatusCode, Bytes) {
    let resp = app.oneshot(req).await.unwrap();
    let status = resp.status();
    let body = resp.into_body().collect().await.unwrap().to_bytes();
    (status, body)
}

async fn get(app: Router, uri: &str) -> (StatusCode, Bytes) {
    call(app, Request::get(uri).body(Body::empty()).unwrap()).await
}

fn doc_ids(json: &Value) -> Vec<&str> {
    json["results"].as_array().unwrap().iter().map(|r| r["doc_id"].as_str().unwrap()).collect()
}

#[tokio::test]
async fn search_returns_ranked_results() {
    let dir = tempdir().unwrap();
    build_tiny_index(dir.path(), corpus());
    let app = server::build_app(dir.path()).unwrap();

    let (status, body) = get(app.clone(), "/search?q=VIRUS&alpha=1.0").await;
    assert_eq!(status, StatusCode::OK);
    let json: Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(doc_ids(&json), vec!["a.json", "b.json"]);
    assert_eq!(json["total_hits"], 2);
    assert_eq!(json["results"][0]["score"].as_f64().unwrap(), 1.0);

    let (_, body) = get(app, "/search?q=virus&k=1").await;
    let json: Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(doc_ids(&json), vec!["a.json"]);
    assert_eq!(json["total_hits"], 2);
}

#[tokio::test]
async fn unknown_terms_return_no_hits() {
    let dir = tempdir().unwrap();
    build_tiny_index(dir.path(), corpus());
    let app = server::build_app(dir.path()).unwrap();

    let (status, body) = get(app, "/search?q=zebra").await;
    assert_eq!(status, StatusCode::OK);
    let json: Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(json["total_hits"], 0);
}

#[tokio::test]
async fn alpha_outside_unit_interval_is_a_bad_request() {
    let dir = tempdir().unwrap();
    build_tiny_index(dir.path(), corpus());
    let app = server::build_app(dir.path()).unwrap();

    let (status, _) = get(app, "/search?q=virus&alpha=1.5").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn autocomplete_normalizes_prefix_and_breaks_ties_by_term() {
    let dir = tempdir().unwrap();
    build_tiny_index(dir.path(), corpus());
    let app = server::build_app(dir.path()).unwrap();

    let (status, body) = get(app.clone(), "/autocomplete?prefix=V&limit=1").await;
    assert_eq!(status, StatusCode::OK);
    let json: Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(json["prefix"], "v");
    assert_eq!(json["suggestions"], serde_json::json!(["vaccine"]));

    let (_, body) = get(app.clone(), "/autocomplete?prefix=v").await;
    let json: Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(json["suggestions"], serde_json::json!(["vaccine", "virus"]));

    let (_, body) = get(app, "/autocomplete?prefix=xy").await;
    let json: Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(json["suggestions"], serde_json::json!([]));
}

struct LengthEncoder;

impl QueryEncoder for LengthEncoder {
    fn encode(&self, tokens: &[String]) -> Option<Vec<f32>> {
        tokens.first().map(|t| vec![t.len() as f32])
    }
}

struct FixedIndex;

impl VectorIndex for FixedIndex {
    fn search(&self, _query: &[f32], _k: usize) -> Vec<(String, f32)> {
        vec![("c.json".into(), 0.0), ("b.json".into(), 1.0)]
    }
}

#[tokio::test]
async fn semantic_scores_join_the_ranking() {
    let dir = tempdir().unwrap();
    build_tiny_index(dir.path(), corpus());
    let scorer = SemanticScorer::new(Box::new(LengthEncoder), Box::new(FixedIndex));
    let app = server::build_app_with_semantic(dir.path(), Some(Arc::new(scorer))).unwrap();

    let (_, body) = get(app.clone(), "/search?q=virus&alpha=0").await;
    let json: Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(doc_ids(&json), vec!["c.json", "b.json", "a.json"]);

    let (_, body) = get(app, "/search?q=virus&alpha=1").await;
    let json: Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(doc_ids(&json), vec!["a.json", "b.json", "c.json"]);
}

struct ManyNeighbours;

impl VectorIndex for ManyNeighbours {
    fn search(&self, _query: &[f32], k: usize) -> Vec<(String, f32)> {
        (0..k).map(|i| (format!("s{i}.json"), i as f32)).collect()
    }
}

#[tokio::test]
async fn semantic_neighbours_scale_with_requested_results() {
    let dir = tempdir().unwrap();
    build_tiny_index(dir.path(), corpus());
    let scorer = SemanticScorer::new(Box::new(LengthEncoder), Box::new(ManyNeighbours));
    let app = server::build_app_with_semantic(dir.path(), Some(Arc::new(scorer))).unwrap();

    let (_, body) = get(app.clone(), "/search?q=zebra&k=2").await;
    let json: Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(json["total_hits"], 6);
    assert_eq!(json["results"].as_array().unwrap().len(), 2);

    let (_, body) = get(app, "/search?q=zebra&k=50").await;
    let json: Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(json["total_hits"], 100);
}

#[tokio::test]
async fn reload_requires_admin_token() {
    let dir = tempdir().unwrap();
    build_tiny_index(dir.path(), corpus());
    let app = server::build_app(dir.path()).unwrap();

    let req = Request::post("/admin/reload").header("X-ADMIN-TOKEN", "wrong").body(Body::empty()).unwrap();
    let (status, _) = call(app, req).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn reload_picks_up_a_newer_build() {
    std::env::set_var("ADMIN_TOKEN", "reload-secret");
    let dir = tempdir().unwrap();
    build_tiny_index(dir.path(), corpus());
    let app = server::build_app(dir.path()).unwrap();

    let (_, body) = get(app.clone(), "/search?q=genome").await;
    let json: Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(json["total_hits"], 0);

    build_tiny_index(dir.path(), vec![CleanedDocument::new("d.json", [("title", "genome")])]);
    let req = Request::post("/admin/reload").header("X-ADMIN-TOKEN", "reload-secret").body(Body::empty()).unwrap();
    let (status, _) = call(app.clone(), req).await;
    assert_eq!(status, StatusCode::OK);

    let (_, body) = get(app.clone(), "/search?q=genome").await;
    let json: Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(doc_ids(&json), vec!["d.json"]);

    let (_, body) = get(app, "/search?q=virus&alpha=1").await;
    let json: Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(doc_ids(&json), vec!["a.json", "b.json"]);
}
