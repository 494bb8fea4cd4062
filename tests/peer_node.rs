//! Whole-system flow through PeerNode
//!
//! A tracker plus two peer nodes on loopback: one shares a file, the
//! other discovers it through the tracker and downloads it.

use fileswarm::content::hash;
use fileswarm::{PeerConfig, PeerNode, TrackerConfig, TrackerServer};
use std::time::Duration;

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

fn node_config(dir: &tempfile::TempDir, peer_id: &str, tracker_url: &str) -> PeerConfig {
    let mut config = PeerConfig::new(dir.path(), peer_id, tracker_url);
    // Reserve a free loopback port so parallel tests never collide
    config.listen_port = {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        listener.local_addr().unwrap().port()
    };
    config.chunk_size = 256;
    config
}

#[tokio::test]
async fn share_then_download_between_two_nodes() {
    let tracker_url = spawn_tracker().await;
    let data: Vec<u8> = (0..900u32).map(|i| (i % 181) as u8).collect();

    // Node A shares a file
    let dir_a = tempfile::tempdir().unwrap();
    let source = dir_a.path().join("holiday.mp4");
    tokio::fs::write(&source, &data).await.unwrap();

    let mut node_a = PeerNode::new(node_config(&dir_a, "node-a", &tracker_url))
        .await
        .unwrap();
    node_a.start("127.0.0.1").await.unwrap();
    let metadata = node_a.share_file(&source).await.unwrap();
    assert_eq!(metadata.chunks.len(), 4);

    // Node B finds it through the tracker and downloads
    let dir_b = tempfile::tempdir().unwrap();
    let mut node_b = PeerNode::new(node_config(&dir_b, "node-b", &tracker_url))
        .await
        .unwrap();
    node_b.start("127.0.0.1").await.unwrap();

    node_b.download(&metadata.hash).await.unwrap();

    let state = node_b.store().download(&metadata.hash).await.unwrap();
    let output = tokio::fs::read(&state.output_path).await.unwrap();
    assert_eq!(output, data);
    assert_eq!(hash::digest_hex(&output), metadata.hash);

    // Node B now seeds the file too and has announced it
    assert!(node_b.store().shared_file(&metadata.hash).await.is_some());
    let swarm = node_b.tracker().get_peers(&metadata.hash).await.unwrap();
    let ids: Vec<&str> = swarm.peers.iter().map(|p| p.peer.peer_id.as_str()).collect();
    assert!(ids.contains(&"node-a"));
    assert!(ids.contains(&"node-b"));

    node_a.shutdown().await;
    node_b.shutdown().await;
}

#[tokio::test]
async fn download_of_unknown_hash_fails() {
    let tracker_url = spawn_tracker().await;
    let dir = tempfile::tempdir().unwrap();
    let mut node = PeerNode::new(node_config(&dir, "lonely", &tracker_url))
        .await
        .unwrap();
    node.start("127.0.0.1").await.unwrap();

    let err = node.download("ffffffffffffffff").await.unwrap_err();
    assert!(err.to_string().contains("not found") || err.to_string().contains("404"));

    node.shutdown().await;
}

#[tokio::test]
async fn restarted_node_reannounces_shared_files() {
    let tracker_url = spawn_tracker().await;
    let dir = tempfile::tempdir().unwrap();
    let source = dir.path().join("notes.txt");
    tokio::fs::write(&source, b"persistent content").await.unwrap();

    let hash = {
        let mut node = PeerNode::new(node_config(&dir, "phoenix", &tracker_url))
            .await
            .unwrap();
        node.start("127.0.0.1").await.unwrap();
        let metadata = node.share_file(&source).await.unwrap();
        node.shutdown().await;
        metadata.hash
    };

    // The same base_dir comes back with its shared files intact
    let mut reborn = PeerNode::new(node_config(&dir, "phoenix", &tracker_url))
        .await
        .unwrap();
    reborn.start("127.0.0.1").await.unwrap();

    let swarm = reborn.tracker().get_peers(&hash).await.unwrap();
    assert_eq!(swarm.peers.len(), 1);
    assert_eq!(swarm.peers[0].peer.peer_id, "phoenix");

    reborn.shutdown().await;
}
