//! Batch uploads, concurrent uploads of identical content, and provider
//! reloads while uploads are in flight

mod common;

use common::*;
use pix_storage::{StorageConfig, StorageConfigId};
use pix_upload::{UploadConfig, UploadRequest};
use std::time::Duration;

/// B1. Identical uploads racing each other end up as one record and one blob
#[tokio::test]
async fn test_concurrent_identical_uploads_store_once() {
    let h = Harness::new().await;
    let data = jpeg_bytes(8192, 1);
    let (ctx_a, ctx_b) = (ctx(), ctx());

    let (a, b) = tokio::join!(
        h.pipeline
            .upload(&ctx_a, UploadRequest::from_bytes("a.jpg", data.clone())),
        h.pipeline
            .upload(&ctx_b, UploadRequest::from_bytes("b.jpg", data.clone())),
    );
    let (a, b) = (a.unwrap(), b.unwrap());

    assert_eq!(a.record.identifier, b.record.identifier);
    assert_eq!([a.is_duplicate, b.is_duplicate].iter().filter(|d| !**d).count(), 1);
    assert_eq!(h.repo.inner.len(), 1);
    assert_eq!(count_files(&h.root("disk")), 1);
}

/// B2. One bad file does not sink the batch and results keep input order
#[tokio::test]
async fn test_batch_partial_success_in_order() {
    // Arrange
    let h = Harness::new().await;
    let photo = jpeg_bytes(4096, 2);
    let requests = vec![
        UploadRequest::from_bytes("a.jpg", photo.clone()),
        UploadRequest::from_bytes("notes.pdf", b"%PDF-1.4\nnot an image".to_vec()),
        UploadRequest::from_bytes("a-copy.jpg", photo),
        UploadRequest::from_bytes("icon.png", png_bytes(4, 4)),
    ];

    // Act
    let report = h.pipeline.upload_batch(&ctx(), requests).await.unwrap();

    // Assert
    let names: Vec<&str> = report.items.iter().map(|i| i.file_name.as_str()).collect();
    assert_eq!(names, ["a.jpg", "notes.pdf", "a-copy.jpg", "icon.png"]);
    assert_eq!(report.succeeded, 3);
    assert_eq!(report.failed, 1);
    assert_eq!(report.duplicates, 1);

    assert!(report.items[0].is_success());
    assert!(report.items[1].error.is_some());
    assert_eq!(report.items[1].file_size, 0);
    assert_eq!(report.items[0].identifier, report.items[2].identifier);
    assert_eq!(report.items[0].file_size, 4096);
    assert_eq!(h.repo.inner.len(), 2);
}

/// B3. An oversized batch is refused before any file is read
#[tokio::test]
async fn test_batch_over_limit_rejected() {
    let h = Harness::with(&["disk"], UploadConfig::new().with_max_batch_files(2)).await;
    let requests = (0..3)
        .map(|i| UploadRequest::from_bytes(format!("{i}.jpg"), jpeg_bytes(1024, i)))
        .collect();

    let err = h.pipeline.upload_batch(&ctx(), requests).await.unwrap_err();

    assert!(err.is_validation());
    assert_eq!(count_files(&h.root("disk")), 0);
    assert!(h.repo.inner.is_empty());
}

/// B4. Cancelling the request marks every unfinished item as cancelled
#[tokio::test]
async fn test_cancelled_batch_reports_each_item() {
    let h = Harness::new().await;
    let ctx = ctx();
    ctx.cancel();
    let requests = vec![
        UploadRequest::from_bytes("a.jpg", jpeg_bytes(1024, 3)),
        UploadRequest::from_bytes("b.jpg", jpeg_bytes(1024, 4)),
    ];

    let report = h.pipeline.upload_batch(&ctx, requests).await.unwrap();

    assert_eq!(report.failed, 2);
    assert!(report
        .items
        .iter()
        .all(|i| i.error.as_deref() == Some("cancelled")));
    assert!(h.repo.inner.is_empty());
}

/// B5. An empty batch is an empty report
#[tokio::test]
async fn test_empty_batch() {
    let h = Harness::new().await;

    let report = h.pipeline.upload_batch(&ctx(), Vec::new()).await.unwrap();

    assert!(report.items.is_empty());
    assert_eq!((report.succeeded, report.failed, report.duplicates), (0, 0, 0));
}

/// B6. Reloading another provider does not wait for, or disturb, an upload in flight
#[tokio::test]
async fn test_reload_during_inflight_upload() {
    // Arrange
    let h = Harness::with(&["gated", "archive"], UploadConfig::new()).await;
    let renamed = StorageConfig::local(2, "archive-2", h.root("archive"));
    let ctx = ctx();

    // Act
    let (result, ()) = tokio::join!(
        h.pipeline
            .upload(&ctx, UploadRequest::from_bytes("a.jpg", jpeg_bytes(4096, 5))),
        async {
            h.switches.saved.notified().await;
            h.source.upsert(renamed);
            tokio::time::timeout(Duration::from_secs(5), h.registry.reload(StorageConfigId(2)))
                .await
                .expect("reload blocked on the in-flight upload")
                .unwrap();
            assert!(h.registry.get_by_name("archive-2").is_ok());
            assert!(h.registry.get_by_name("archive").is_err());
            h.switches.release.notify_one();
        }
    );

    // Assert
    let outcome = result.unwrap();
    assert_eq!(outcome.record.storage_config_id, StorageConfigId(1));
    assert!(h.blob_path("gated", &outcome.record).exists());
    assert_eq!(h.repo.inner.len(), 1);
}

/// B7. Replacing the provider an upload is using lets that upload finish on the old one
#[tokio::test]
async fn test_replacing_active_provider_keeps_upload_alive() {
    let h = Harness::with(&["gated"], UploadConfig::new()).await;
    let replacement = StorageConfig::local(1, "gated", h.root("gated")).as_default();
    let ctx = ctx();

    let (result, ()) = tokio::join!(
        h.pipeline
            .upload(&ctx, UploadRequest::from_bytes("a.jpg", jpeg_bytes(4096, 6))),
        async {
            h.switches.saved.notified().await;
            h.source.upsert(replacement);
            h.registry.reload(StorageConfigId(1)).await.unwrap();
            h.switches.release.notify_one();
        }
    );

    let outcome = result.unwrap();
    assert!(!outcome.is_duplicate);
    assert!(h.pipeline.open(&ctx, &outcome.record.identifier).await.is_ok());
}
