//! Tracker API integration flow
//!
//! Boots a real tracker on an ephemeral port and drives it with the
//! peer-side client: register, announce, swarm query, search, stats.

use fileswarm::protocol::{ChunkInfo, FileMetadata};
use fileswarm::{TrackerClient, TrackerConfig, TrackerServer};
use std::time::Duration;

/// Start a tracker on an ephemeral loopback port, returning its base URL
async fn spawn_tracker() -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let base_url = format!("http://{}", addr);

    let config = TrackerConfig {
        addr: addr.to_string(),
        public_url: base_url.clone(),
        ..TrackerConfig::default()
    };
    let server = TrackerServer::new(config);
    tokio::spawn(async move {
        let _ = server.serve(listener).await;
    });

    // Wait for the listener to answer health checks
    let client = reqwest::Client::new();
    for _ in 0..50 {
        if let Ok(resp) = client.get(format!("{}/health", base_url)).send().await {
            if resp.status().is_success() {
                return base_url;
            }
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("tracker did not become ready");
}

fn sample_metadata() -> FileMetadata {
    let chunk_hashes = [
        "aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa",
        "bbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbb",
        "cccccccccccccccccccccccccccccccccccccccccccccccccccccccccccccccc",
        "dddddddddddddddddddddddddddddddddddddddddddddddddddddddddddddddd",
    ];
    FileMetadata {
        name: "movie.mkv".to_string(),
        size: 1024,
        hash: "abc123def4567890abc123def4567890abc123def4567890abc123def4567890".to_string(),
        chunk_size: 256,
        chunks: chunk_hashes
            .iter()
            .enumerate()
            .map(|(i, h)| ChunkInfo {
                index: i,
                hash: h.to_string(),
                size: 256,
            })
            .collect(),
        merkle_root: None,
    }
}

#[tokio::test]
async fn register_announce_query_flow() {
    let base_url = spawn_tracker().await;
    let seeder = TrackerClient::new(&base_url, "seeder-1");
    let metadata = sample_metadata();

    // Register the seeder with its routable address
    let reply = seeder.register("192.168.1.10", 6881).await.unwrap();
    assert!(reply.success);

    // Announce the file
    let reply = seeder.announce_file(&metadata).await.unwrap();
    assert!(reply.success);
    assert_eq!(reply.file_id.as_deref(), Some(metadata.hash.as_str()));

    // A leecher asks for the swarm
    let leecher = TrackerClient::new(&base_url, "leecher-1");
    let swarm = leecher.get_peers(&metadata.hash).await.unwrap();

    assert_eq!(swarm.file_hash, metadata.hash);
    assert_eq!(swarm.chunk_count, 4);
    assert_eq!(swarm.peers.len(), 1);
    assert_eq!(swarm.peers[0].peer.peer_id, "seeder-1");
    assert_eq!(swarm.peers[0].peer.ip, "192.168.1.10");
    assert!(swarm.peers[0].is_seeder);
    assert_eq!(swarm.peers[0].chunks_available.len(), 4);
}

#[tokio::test]
async fn unknown_file_returns_not_found() {
    let base_url = spawn_tracker().await;
    let client = TrackerClient::new(&base_url, "peer-1");

    let err = client.get_peers("0000000000000000").await.unwrap_err();
    assert!(err.to_string().contains("404") || err.to_string().contains("not found"));
}

#[tokio::test]
async fn heartbeat_reports_interval() {
    let base_url = spawn_tracker().await;
    let client = TrackerClient::new(&base_url, "peer-1");
    client.register("192.168.1.20", 6881).await.unwrap();

    let reply = client.heartbeat(vec![]).await.unwrap();
    assert!(reply.success);
    assert_eq!(reply.next_heartbeat_in, 30);
}

#[tokio::test]
async fn list_and_search_files() {
    let base_url = spawn_tracker().await;
    let seeder = TrackerClient::new(&base_url, "seeder-1");
    seeder.register("192.168.1.10", 6881).await.unwrap();
    seeder.announce_file(&sample_metadata()).await.unwrap();

    let listing = seeder.list_files().await.unwrap();
    assert_eq!(listing.files.len(), 1);
    assert_eq!(listing.files[0].name, "movie.mkv");
    assert_eq!(listing.files[0].seeders, 1);
    assert_eq!(listing.files[0].leechers, 0);

    let hits = seeder.search_files("MOVIE").await.unwrap();
    assert_eq!(hits["count"], 1);
    let misses = seeder.search_files("nothing-here").await.unwrap();
    assert_eq!(misses["count"], 0);
}

#[tokio::test]
async fn leave_removes_peer_from_swarm() {
    let base_url = spawn_tracker().await;
    let seeder = TrackerClient::new(&base_url, "seeder-1");
    let metadata = sample_metadata();
    seeder.register("192.168.1.10", 6881).await.unwrap();
    seeder.announce_file(&metadata).await.unwrap();

    seeder.leave().await.unwrap();

    let swarm = seeder.get_peers(&metadata.hash).await.unwrap();
    assert!(swarm.peers.is_empty());
}

#[tokio::test]
async fn stats_feed_reputation_and_top_peers() {
    let base_url = spawn_tracker().await;

    let generous = TrackerClient::new(&base_url, "generous");
    generous.register("192.168.1.30", 6881).await.unwrap();
    generous.report_stats(40_000, 10_000).await.unwrap();

    let leech = TrackerClient::new(&base_url, "leech");
    leech.register("192.168.1.31", 6881).await.unwrap();
    leech.report_stats(100, 10_000).await.unwrap();

    let http = reqwest::Client::new();
    let top: serde_json::Value = http
        .get(format!("{}/api/peers/top?limit=10", base_url))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();

    assert_eq!(top["count"], 2);
    assert_eq!(top["peers"][0]["id"], "generous");
    let first = top["peers"][0]["reputation"].as_f64().unwrap();
    let second = top["peers"][1]["reputation"].as_f64().unwrap();
    assert!(first > second);
}

#[tokio::test]
async fn magnet_endpoint_round_trips() {
    let base_url = spawn_tracker().await;
    let seeder = TrackerClient::new(&base_url, "seeder-1");
    let metadata = sample_metadata();
    seeder.register("192.168.1.10", 6881).await.unwrap();
    seeder.announce_file(&metadata).await.unwrap();

    let http = reqwest::Client::new();
    let reply: serde_json::Value = http
        .get(format!("{}/api/files/{}/magnet", base_url, metadata.hash))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();

    assert_eq!(reply["seeder_count"], 1);
    let uri = reply["magnet"].as_str().unwrap();
    let magnet = fileswarm::Magnet::parse(uri).unwrap();
    assert_eq!(magnet.info_hash, metadata.hash);
    assert_eq!(magnet.display_name, "movie.mkv");
    assert_eq!(magnet.size, 1024);
    assert_eq!(magnet.total_chunks, 4);
    assert_eq!(magnet.chunk_size, 256);
}

#[tokio::test]
async fn health_and_metrics_endpoints() {
    let base_url = spawn_tracker().await;
    let http = reqwest::Client::new();

    let health = http
        .get(format!("{}/health", base_url))
        .send()
        .await
        .unwrap();
    assert_eq!(health.status(), 200);
    assert_eq!(health.text().await.unwrap(), "OK");

    let seeder = TrackerClient::new(&base_url, "seeder-1");
    seeder.register("192.168.1.10", 6881).await.unwrap();

    let metrics: serde_json::Value = http
        .get(format!("{}/metrics", base_url))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(metrics["registers_total"], 1);
    assert_eq!(metrics["peers_online"], 1);
    assert_eq!(metrics["relay_peers"], 0);
}

#[tokio::test]
async fn malformed_body_is_bad_request() {
    let base_url = spawn_tracker().await;
    let http = reqwest::Client::new();

    let resp = http
        .post(format!("{}/api/peers/register", base_url))
        .header("content-type", "application/json")
        .body("{not json")
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);
}

#[tokio::test]
async fn admin_kick_peer() {
    let base_url = spawn_tracker().await;
    let seeder = TrackerClient::new(&base_url, "seeder-1");
    seeder.register("192.168.1.10", 6881).await.unwrap();

    let http = reqwest::Client::new();
    let resp = http
        .delete(format!("{}/api/admin/peers/seeder-1", base_url))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);

    let resp = http
        .delete(format!("{}/api/admin/peers/seeder-1", base_url))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 404);
}
