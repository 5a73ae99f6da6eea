//! HTTP chain client against a scripted local block service: endpoint
//! failover, status mapping, segmented event pages and a full scan.

#[cfg(test)]
mod tests {
    use crate::blockchain::models::{ChainEvent, Phase};
    use crate::blockchain::{BlockScanner, ChainAdapter, ClientError, HttpChainClient};
    use crate::db::{failure, source_init};
    use crate::models::ChainId;
    use crate::tests::{fast_retry, scan_config, test_pool};
    use reqwest::Url;
    use serde_json::{json, Value};
    use std::collections::HashMap;
    use std::net::SocketAddr;
    use std::sync::{Arc, Mutex};
    use std::time::Duration;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::{TcpListener, TcpStream};
    use tokio::task::JoinHandle;
    use tokio_util::sync::CancellationToken;

    type Routes = Arc<Mutex<HashMap<String, Vec<(u16, String)>>>>;

    /// Answers each path from its queue of responses; the last response of a
    /// queue repeats. Unknown paths get a 404.
    struct BlockService {
        addr: SocketAddr,
        hits: Arc<Mutex<Vec<String>>>,
        task: JoinHandle<()>,
    }

    impl BlockService {
        async fn start(script: Vec<(&str, Vec<(u16, Value)>)>) -> Self {
            let routes: Routes = Arc::new(Mutex::new(
                script
                    .into_iter()
                    .map(|(path, replies)| {
                        let replies = replies
                            .into_iter()
                            .map(|(status, body)| (status, body.to_string()))
                            .collect();
                        (path.to_string(), replies)
                    })
                    .collect(),
            ));
            let hits = Arc::new(Mutex::new(Vec::new()));

            let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
            let addr = listener.local_addr().unwrap();
            let task = {
                let hits = hits.clone();
                tokio::spawn(async move {
                    while let Ok((socket, _)) = listener.accept().await {
                        let routes = routes.clone();
                        let hits = hits.clone();
                        tokio::spawn(async move {
                            let _ = reply(socket, routes, hits).await;
                        });
                    }
                })
            };

            Self { addr, hits, task }
        }

        fn url(&self) -> Url {
            Url::parse(&format!("http://{}/", self.addr)).unwrap()
        }

        fn hits(&self) -> Vec<String> {
            self.hits.lock().unwrap().clone()
        }
    }

    impl Drop for BlockService {
        fn drop(&mut self) {
            self.task.abort();
        }
    }

    async fn reply(
        mut socket: TcpStream,
        routes: Routes,
        hits: Arc<Mutex<Vec<String>>>,
    ) -> std::io::Result<()> {
        let mut request = Vec::new();
        let mut chunk = [0u8; 1024];
        while !request.windows(4).any(|w| w == b"\r\n\r\n") {
            let read = socket.read(&mut chunk).await?;
            if read == 0 {
                break;
            }
            request.extend_from_slice(&chunk[..read]);
        }

        let head = String::from_utf8_lossy(&request);
        let path = head.split_whitespace().nth(1).unwrap_or("/").to_string();
        hits.lock().unwrap().push(path.clone());

        let (status, body) = {
            let mut routes = routes.lock().unwrap();
            match routes.get_mut(&path) {
                Some(queue) if queue.len() > 1 => queue.remove(0),
                Some(queue) => queue
                    .first()
                    .cloned()
                    .unwrap_or((404, "{}".to_string())),
                None => (404, "{}".to_string()),
            }
        };

        let response = format!(
            "HTTP/1.1 {} Scripted\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
            status,
            body.len(),
            body
        );
        socket.write_all(response.as_bytes()).await?;
        socket.shutdown().await
    }

    /// An address nothing listens on.
    fn dead_endpoint() -> Url {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);
        Url::parse(&format!("http://{}/", addr)).unwrap()
    }

    fn client(endpoints: Vec<Url>) -> HttpChainClient {
        HttpChainClient::new(endpoints, Duration::from_secs(5), None).unwrap()
    }

    fn block(number: u64, hash: &str, signers: &[Option<&str>]) -> Value {
        let extrinsics: Vec<Value> = signers
            .iter()
            .map(|signer| match signer {
                Some(id) => json!({"signature": {"signer": {"id": id}}}),
                None => json!({"signature": null}),
            })
            .collect();
        json!({"number": number.to_string(), "hash": hash, "extrinsics": extrinsics})
    }

    fn outgoing_event(index: u32, extrinsic: u32, nonce: u64, amount: &str) -> Value {
        json!({
            "index": index,
            "phase": {"applyExtrinsic": extrinsic},
            "method": {"pallet": "transporter", "method": "OutgoingTransferInitiated"},
            "data": [{"domain": 0}, [1, nonce], amount]
        })
    }

    fn filler_event(index: u32) -> Value {
        json!({
            "index": index,
            "phase": "finalization",
            "method": {"pallet": "system", "method": "ExtrinsicSuccess"},
            "data": []
        })
    }

    #[tokio::test]
    async fn test_dead_first_endpoint_falls_through_to_second() {
        let live = BlockService::start(vec![("/blocks/7", vec![(200, block(7, "0x07", &[Some("addrA")]))])]).await;
        let client = client(vec![dead_endpoint(), live.url()]);

        let fetched = client.block_at(7).await.unwrap();

        assert_eq!(fetched.hash, "0x07");
        assert_eq!(fetched.extrinsics[0].signer.as_deref(), Some("addrA"));
        assert_eq!(live.hits(), vec!["/blocks/7".to_string()]);
    }

    #[tokio::test]
    async fn test_rate_limited_request_is_retried() {
        let service = BlockService::start(vec![(
            "/blocks/7",
            vec![
                (429, json!({"error": "slow down"})),
                (429, json!({"error": "slow down"})),
                (200, block(7, "0x07", &[])),
            ],
        )])
        .await;
        let client = client(vec![service.url()]);

        assert!(matches!(client.block_at(7).await, Err(ClientError::RateLimited(_))));

        let fetched = fast_retry(5).run(7, || client.block_at(7)).await.unwrap();
        assert_eq!(fetched.height, 7);
        assert_eq!(service.hits().len(), 3);
    }

    #[tokio::test]
    async fn test_statuses_and_bodies_map_to_errors() {
        let service = BlockService::start(vec![
            ("/blocks/2", vec![(500, json!({"error": "boom"}))]),
            ("/blocks/3", vec![(200, json!({"hash": "0x03"}))]),
            ("/blocks/4", vec![(200, block(5, "0x05", &[]))]),
        ])
        .await;
        let client = client(vec![service.url()]);

        assert!(matches!(client.block_at(1).await, Err(ClientError::NotFound(_))));
        match client.block_at(2).await {
            Err(ClientError::Status { status, .. }) => assert_eq!(status, 500),
            other => panic!("expected status error, got {:?}", other),
        }
        let schema = client.block_at(3).await.unwrap_err();
        assert!(matches!(schema, ClientError::Schema(_)));
        assert!(!schema.is_transient());
        assert!(matches!(client.block_at(4).await, Err(ClientError::Malformed(_))));
    }

    #[tokio::test]
    async fn test_shape_fault_is_not_retried_on_other_endpoints() {
        let first = BlockService::start(vec![("/blocks/3", vec![(200, json!({"number": []}))])]).await;
        let second = BlockService::start(vec![("/blocks/3", vec![(200, block(3, "0x03", &[]))])]).await;
        let client = client(vec![first.url(), second.url()]);

        assert!(matches!(client.block_at(3).await, Err(ClientError::Schema(_))));
        assert!(second.hits().is_empty());
    }

    #[tokio::test]
    async fn test_overlapping_segments_flatten_in_order() {
        let service = BlockService::start(vec![
            (
                "/blocks/0xab/events?segment=0",
                vec![(200, json!({"events": [filler_event(0), filler_event(1), filler_event(2)], "hasMore": true}))],
            ),
            (
                "/blocks/0xab/events?segment=1",
                vec![(200, json!({"events": [filler_event(2), outgoing_event(3, 0, 5, "100")], "hasMore": true}))],
            ),
            (
                "/blocks/0xab/events?segment=2",
                vec![(200, json!({"events": [filler_event(4)], "hasMore": false}))],
            ),
        ])
        .await;
        let client = client(vec![service.url()]);

        let events = client.events_at("0xab", true).await.unwrap();

        let indices: Vec<u32> = events.iter().filter_map(|r| r.index).collect();
        assert_eq!(indices, vec![0, 1, 2, 3, 4]);
        assert!(matches!(
            events[3].event,
            ChainEvent::OutgoingTransferInitiated { channel_id: 1, .. }
        ));
        assert_eq!(service.hits().len(), 3);
    }

    #[tokio::test]
    async fn test_odd_events_keep_the_rest_of_the_page() {
        let service = BlockService::start(vec![(
            "/blocks/0xab/events",
            vec![(
                200,
                json!({"events": [
                    outgoing_event(0, 0, 5, "100"),
                    {"index": 1, "phase": "onIdle", "method": {"pallet": "scheduler", "method": "Dispatched"}},
                    {
                        "index": 2,
                        "phase": {"applyExtrinsic": 0},
                        "method": {"pallet": "transporter", "method": "OutgoingTransferInitiated"},
                        "data": {"chain_id": 7}
                    }
                ]}),
            )],
        )])
        .await;
        let client = client(vec![service.url()]);

        let events = client.events_at("0xab", false).await.unwrap();

        assert_eq!(events.len(), 3);
        assert!(matches!(events[0].event, ChainEvent::OutgoingTransferInitiated { .. }));
        assert_eq!(events[1].phase, Phase::Other);
        assert!(matches!(events[2].event, ChainEvent::Undecodable { .. }));
    }

    #[tokio::test]
    async fn test_scan_over_http_stores_rows() {
        let service = BlockService::start(vec![
            ("/blocks/1", vec![(200, block(1, "0x01", &[Some("addrA")]))]),
            ("/blocks/2", vec![(503, json!({})), (200, block(2, "0x02", &[None]))]),
            (
                "/blocks/0x01/events",
                vec![(200, json!({"events": [outgoing_event(0, 0, 5, "100"), filler_event(1)]}))],
            ),
            (
                "/blocks/0x02/events",
                vec![(
                    200,
                    json!({"events": [
                        {"index": 0, "phase": "onIdle", "method": {"pallet": "scheduler", "method": "Dispatched"}},
                        {
                            "index": 1,
                            "phase": {"applyExtrinsic": 0},
                            "method": {"pallet": "transporter", "method": "OutgoingTransferInitiated"},
                            "data": "garbage"
                        }
                    ]}),
                )],
            ),
        ])
        .await;
        let pool = test_pool().await;
        let scanner = BlockScanner::new(
            Arc::new(client(vec![service.url()])),
            pool.clone(),
            scan_config("A", 1, 2, 2),
        );

        let summary = scanner.run(CancellationToken::new()).await.unwrap();

        assert_eq!(summary.heights_processed, 2);
        assert_eq!(summary.committed, Some(2));
        let init = source_init::get_source_init(&pool, &ChainId::new("A"), 1, "5")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(init.from_address, "addrA");
        assert_eq!(init.source_block_hash, "0x01");
        assert_eq!(failure::count_failures(&pool, &ChainId::new("A")).await.unwrap(), 1);
    }
}
