#![allow(dead_code)]

use bytes::Bytes;
use pix_storage::{bytes_stream, read_to_bytes, ByteStream, StorageCtx, StorageProvider};

pub fn ctx() -> StorageCtx {
    StorageCtx::new().with_actor("tester")
}

pub fn chunked(parts: &[&'static [u8]]) -> ByteStream {
    let chunks: Vec<Result<Bytes, std::io::Error>> =
        parts.iter().map(|p| Ok(Bytes::from_static(p))).collect();
    Box::pin(futures::stream::iter(chunks))
}

/// Behavior every provider must share, regardless of backend
pub async fn assert_provider_contract(provider: &dyn StorageProvider) {
    let ctx = ctx();

    // Save then read back through nested, not yet existing directories
    provider
        .save(&ctx, "ab/cd/abcdef123456.png", chunked(&[b"\x89PNG", b"-rest"]))
        .await
        .unwrap();
    assert!(provider.exists(&ctx, "ab/cd/abcdef123456.png").await.unwrap());
    let mut reader = provider.get(&ctx, "ab/cd/abcdef123456.png").await.unwrap();
    assert_eq!(read_to_bytes(&mut reader).await.unwrap(), b"\x89PNG-rest");

    // Overwrite replaces content
    provider
        .save(&ctx, "ab/cd/abcdef123456.png", bytes_stream(&b"second"[..]))
        .await
        .unwrap();
    let mut reader = provider.get(&ctx, "ab/cd/abcdef123456.png").await.unwrap();
    assert_eq!(read_to_bytes(&mut reader).await.unwrap(), b"second");

    // Misses are typed
    assert!(!provider.exists(&ctx, "ab/cd/missing.png").await.unwrap());
    assert!(provider.get(&ctx, "ab/cd/missing.png").await.err().unwrap().is_not_found());
    assert!(provider.delete(&ctx, "ab/cd/missing.png").await.unwrap_err().is_not_found());

    // Delete removes
    provider.delete(&ctx, "ab/cd/abcdef123456.png").await.unwrap();
    assert!(!provider.exists(&ctx, "ab/cd/abcdef123456.png").await.unwrap());

    assert_rejects_unsafe_identifiers(provider).await;

    provider.health(&ctx).await.unwrap();
}

/// Every operation on an unsafe identifier fails validation
pub async fn assert_rejects_unsafe_identifiers(provider: &dyn StorageProvider) {
    let ctx = ctx();
    for bad in ["../escape.png", "/etc/passwd", "%2e%2e/x.png", "a\\..\\..\\b.png", "a//b.png"] {
        assert!(provider.save(&ctx, bad, bytes_stream(&b"x"[..])).await.unwrap_err().is_validation(), "{bad}");
        assert!(provider.get(&ctx, bad).await.err().unwrap().is_validation(), "{bad}");
        assert!(provider.delete(&ctx, bad).await.unwrap_err().is_validation(), "{bad}");
        assert!(provider.exists(&ctx, bad).await.unwrap_err().is_validation(), "{bad}");
    }
}
