//! A portal rejecting the credentials has to abort the whole run after a
//! single login attempt; the pair is never re-posted per fund and kind.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use tokio::io::{AsyncReadExt, AsyncWriteExt};

use fpp_core::ReportKind;
use fpp_portal::Credentials;
use fpp_sync::{PipelineConfig, SyncPipeline};

/// Answers every request with 401 and counts how many arrive.
async fn denying_portal(hits: Arc<AtomicUsize>) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let base_url = format!("http://{}", listener.local_addr().unwrap());
    tokio::spawn(async move {
        loop {
            let Ok((mut socket, _)) = listener.accept().await else {
                break;
            };
            let hits = Arc::clone(&hits);
            tokio::spawn(async move {
                let mut request = Vec::new();
                let mut buf = [0u8; 1024];
                loop {
                    match socket.read(&mut buf).await {
                        Ok(0) | Err(_) => return,
                        Ok(n) => request.extend_from_slice(&buf[..n]),
                    }
                    let text = String::from_utf8_lossy(&request);
                    if let Some(headers_end) = text.find("\r\n\r\n") {
                        let body_len = text
                            .lines()
                            .find_map(|line| {
                                line.to_ascii_lowercase()
                                    .strip_prefix("content-length:")
                                    .map(|v| v.trim().parse::<usize>().unwrap_or(0))
                            })
                            .unwrap_or(0);
                        if request.len() >= headers_end + 4 + body_len {
                            break;
                        }
                    }
                }
                hits.fetch_add(1, Ordering::SeqCst);
                let _ = socket
                    .write_all(
                        b"HTTP/1.1 401 Unauthorized\r\ncontent-length: 0\r\nconnection: close\r\n\r\n",
                    )
                    .await;
            });
        }
    });
    base_url
}

#[tokio::test]
async fn rejected_credentials_abort_the_run_after_one_login() {
    let hits = Arc::new(AtomicUsize::new(0));
    let base_url = denying_portal(Arc::clone(&hits)).await;

    let dir = tempfile::tempdir().unwrap();
    let registry_path = dir.path().join("funds.yaml");
    std::fs::write(
        &registry_path,
        "funds:\n  - remote_id: f-1\n    display_name: FIP Um\n    tax_id: 00.000.000/0001-00\n    kind: FIP\n  - remote_id: f-2\n    display_name: FIDC Dois\n    tax_id: 11.111.111/0001-11\n    kind: FIDC\n",
    )
    .unwrap();

    let config = PipelineConfig {
        base_url,
        credentials: Credentials {
            username: "u".into(),
            password: "errada".into(),
        },
        primary_db: dir.path().join("primary.db").to_str().unwrap().to_string(),
        warehouse_db: dir.path().join("warehouse.db").to_str().unwrap().to_string(),
        archive_dir: dir.path().join("archive"),
        reports_dir: dir.path().join("reports"),
        registry_path,
        enabled_kinds: ReportKind::ALL.to_vec(),
        date_range: None,
        workers: 4,
        http_timeout_secs: 5,
        holidays: vec![],
        sync_cron: None,
    };

    let result = SyncPipeline::connect(config)
        .await
        .unwrap()
        .run_once()
        .await;
    let err = result.unwrap_err();
    assert!(err.to_string().contains("rejected the credentials"));
    // Two funds and four kinds queued, but the rejected pair went over the
    // wire exactly once.
    assert_eq!(hits.load(Ordering::SeqCst), 1);
}
