//! Integration tests for Trellis
//!
//! These tests drive the whole pipeline — stub registries, a crawl
//! session, snapshot persistence — through the public crate APIs.

use std::io::{BufReader, Write};
use std::net::SocketAddr;
use std::process::Command;

use axum::Router;
use axum::routing::get;

use trellis_core::{Ecosystem, EdgeKind, NodeIdentity, PackageId, PostId};
use trellis_fetch::FetchConfig;
use trellis_registry::{NpmConfig, PypiConfig, StackOverflowConfig};
use trellis_session::{CrawlSession, SessionConfig};

/// Test that the CLI can be invoked
#[test]
fn test_cli_invocation() {
    let output = Command::new("cargo")
        .args(["run", "--", "--help"])
        .current_dir(".")
        .output()
        .expect("Failed to execute command");

    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("trellis"));
    assert!(stdout.contains("Cross-registry package crawler"));
}

async fn spawn_server(app: Router) -> SocketAddr {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    addr
}

async fn stub_registries() -> SocketAddr {
    let posts = serde_json::json!({
        "items": [
            {"answer_id": 9042, "body": "<p>try <code>npm install left-pad</code> or `left-pad`</p>"}
        ]
    });
    let mut writer = zip::ZipWriter::new(std::io::Cursor::new(Vec::new()));
    writer
        .start_file("answers.json", zip::write::SimpleFileOptions::default())
        .unwrap();
    writer.write_all(posts.to_string().as_bytes()).unwrap();
    let archive = writer.finish().unwrap().into_inner();

    let app = Router::new()
        .route(
            "/simple/",
            get(|| async { r#"{"projects": [{"name": "alpha"}, {"name": "left_pad"}]}"# }),
        )
        .route(
            "/pypi/alpha/json",
            get(|| async {
                serde_json::json!({
                    "info": {
                        "name": "alpha",
                        "version": "1.0",
                        "license": "MIT",
                        "requires_dist": ["beta>=2.0"]
                    },
                    "urls": [{"upload_time_iso_8601": "2021-06-01T12:00:00.000000Z"}]
                })
                .to_string()
            }),
        )
        .route(
            "/pypi/left_pad/json",
            get(|| async {
                serde_json::json!({
                    "info": {"name": "left_pad", "version": "0.1", "requires_dist": null},
                    "urls": []
                })
                .to_string()
            }),
        )
        .route(
            "/npm/bulk",
            get(|| async {
                serde_json::json!({
                    "rows": [
                        {"id": "@scope/pkg", "doc": {
                            "name": "@scope/pkg",
                            "versions": {"1.0.0": {"dependencies": {"left-pad": "^1.0"}}}
                        }},
                        {"id": "left-pad", "doc": {
                            "name": "left-pad",
                            "versions": {"1.3.0": {"dependencies": {}}}
                        }}
                    ]
                })
                .to_string()
            }),
        )
        .route("/so/posts.zip", get(move || async move { archive.clone() }));
    spawn_server(app).await
}

fn session_config(addr: SocketAddr) -> SessionConfig {
    SessionConfig {
        fetch: FetchConfig {
            requests_per_second: 500,
            max_retries: 0,
            ..FetchConfig::default()
        },
        pypi: Some(PypiConfig {
            base_url: format!("http://{addr}"),
            concurrency: 2,
            limit: None,
        }),
        npm: Some(NpmConfig {
            registry_url: format!("http://{addr}/npm/bulk"),
            ..NpmConfig::default()
        }),
        stackoverflow: Some(StackOverflowConfig {
            archive_url: format!("http://{addr}/so/posts.zip"),
            ..StackOverflowConfig::default()
        }),
        ..SessionConfig::default()
    }
}

/// Crawl all three stub sources, persist the graph, reload it, and
/// check the cross-registry structure survives end to end.
#[tokio::test]
async fn crawl_persist_reload_round_trip() {
    let addr = stub_registries().await;
    let report = CrawlSession::new(session_config(addr)).unwrap().run().await;
    assert!(report.session_error().is_none());

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("graph.jsonl");
    let mut file = std::fs::File::create(&path).unwrap();
    trellis_core::save(&report.graph, &mut file).unwrap();

    let graph = trellis_core::load(BufReader::new(std::fs::File::open(&path).unwrap())).unwrap();
    assert_eq!(graph.node_count(), report.graph.node_count());
    assert_eq!(graph.edge_count(), report.graph.edge_count());

    // PyPI: alpha 1.0 → beta, with the PEP 503-normalized left_pad
    // crawled as left-pad.
    let alpha = NodeIdentity::Package(PackageId::new(Ecosystem::Pypi, "alpha", Some("1.0".into())));
    let beta = NodeIdentity::Package(PackageId::new(Ecosystem::Pypi, "beta", None));
    assert!(graph.edge(&alpha, &beta, EdgeKind::DependsOn).is_some());

    // NPM: @scope/pkg 1.0.0 → left-pad.
    let scoped = NodeIdentity::Package(PackageId::new(
        Ecosystem::Npm,
        "@scope/pkg",
        Some("1.0.0".into()),
    ));
    let npm_left_pad = NodeIdentity::Package(PackageId::new(Ecosystem::Npm, "left-pad", None));
    assert!(graph.edge(&scoped, &npm_left_pad, EdgeKind::DependsOn).is_some());

    // The post names left-pad twice: the install command pins NPM, the
    // bare inline span matches both ecosystems. Ambiguity is preserved
    // as two mention edges.
    let mention = NodeIdentity::Mention(PostId(9042));
    let pypi_left_pad = NodeIdentity::Package(PackageId::new(Ecosystem::Pypi, "left-pad", None));
    assert!(graph.edge(&mention, &npm_left_pad, EdgeKind::Mentions).is_some());
    assert!(graph.edge(&mention, &pypi_left_pad, EdgeKind::Mentions).is_some());
}

/// The snapshot seeds a second session, which merges new content into
/// the reloaded graph instead of starting over.
#[tokio::test]
async fn snapshot_seeds_a_follow_up_session() {
    let addr = stub_registries().await;
    let first = CrawlSession::new(session_config(addr)).unwrap().run().await;
    let first_nodes = first.graph.node_count();
    assert!(first_nodes > 0);

    let mut buffer = Vec::new();
    trellis_core::save(&first.graph, &mut buffer).unwrap();
    let reloaded = trellis_core::load(BufReader::new(buffer.as_slice())).unwrap();

    // Second session: only NPM enabled, merged onto the prior graph.
    let config = SessionConfig {
        npm: session_config(addr).npm,
        fetch: session_config(addr).fetch,
        ..SessionConfig::default()
    };
    let second = CrawlSession::new(config)
        .unwrap()
        .with_seed(reloaded)
        .run()
        .await;

    // Nothing was lost, nothing was duplicated.
    assert_eq!(second.graph.node_count(), first_nodes);
    let alpha = NodeIdentity::Package(PackageId::new(Ecosystem::Pypi, "alpha", Some("1.0".into())));
    assert!(second.graph.contains_node(&alpha));
}
