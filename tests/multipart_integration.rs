//! Multipart Engine Integration Tests
//!
//! End-to-end lifecycle scenarios driving the full engine over fleets of
//! local disks in temporary directories.

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;

use shardstore::api::{CompletePart, ObjectOptions, PutObjReader};
use shardstore::disk::{Disk, DiskRef, FileStat, FileWriter, LocalDisk};
use shardstore::error::{DiskError, DiskResult, Error};
use shardstore::store::ObjectState;
use shardstore::{ErasureStore, StoreConfig};

const MIB: usize = 1024 * 1024;

// =============================================================================
// Fixtures
// =============================================================================

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init();
}

async fn new_fleet(count: usize) -> (Vec<tempfile::TempDir>, Vec<Option<DiskRef>>) {
    init_tracing();
    let mut dirs = Vec::with_capacity(count);
    let mut disks = Vec::with_capacity(count);
    for _ in 0..count {
        let dir = tempfile::tempdir().expect("tempdir");
        let disk = LocalDisk::open(dir.path()).await.expect("open disk");
        dirs.push(dir);
        disks.push(Some(Arc::new(disk) as DiskRef));
    }
    (dirs, disks)
}

async fn new_store(count: usize) -> (Vec<tempfile::TempDir>, Arc<ErasureStore>) {
    new_store_with(count, StoreConfig::default()).await
}

async fn new_store_with(
    count: usize,
    config: StoreConfig,
) -> (Vec<tempfile::TempDir>, Arc<ErasureStore>) {
    let (dirs, disks) = new_fleet(count).await;
    let store = ErasureStore::new(disks, config).await.expect("store");
    (dirs, store)
}

async fn upload_part(
    store: &ErasureStore,
    bucket: &str,
    object: &str,
    upload_id: &str,
    number: usize,
    body: Vec<u8>,
) -> shardstore::PartInfo {
    let mut reader = PutObjReader::from_bytes(body);
    store
        .put_object_part(bucket, object, upload_id, number, &mut reader, &ObjectOptions::default())
        .await
        .expect("put part")
}

fn md5_hex(data: &[u8]) -> String {
    format!("{:x}", md5::compute(data))
}

// =============================================================================
// Lifecycle Scenarios
// =============================================================================

#[tokio::test]
async fn test_simple_two_part_upload() {
    let (_dirs, store) = new_store(4).await;

    let upload_id = store
        .new_multipart_upload("bucket", "video.mp4", &ObjectOptions::default())
        .await
        .expect("new upload");

    let body1 = vec![0x61u8; 6 * MIB];
    let body2 = vec![0x62u8; MIB];
    let p1 = upload_part(&store, "bucket", "video.mp4", &upload_id, 1, body1.clone()).await;
    let p2 = upload_part(&store, "bucket", "video.mp4", &upload_id, 2, body2.clone()).await;

    assert_eq!(p1.etag, md5_hex(&body1));
    assert_eq!(p1.size, 6 * MIB as i64);

    let parts = vec![
        CompletePart { part_number: 1, etag: p1.etag.clone() },
        CompletePart { part_number: 2, etag: p2.etag.clone() },
    ];
    let info = store
        .complete_multipart_upload("bucket", "video.mp4", &upload_id, &parts, &ObjectOptions::default())
        .await
        .expect("complete");

    assert_eq!(info.size, 7 * MIB as i64);
    assert_eq!(info.content_type, "video/mp4");

    // Composite ETag: md5 of the two raw part digests, dash part count.
    let mut ctx = md5::Context::new();
    ctx.consume(hex::decode(&p1.etag).unwrap());
    ctx.consume(hex::decode(&p2.etag).unwrap());
    assert_eq!(info.etag, format!("{:x}-2", ctx.compute()));

    let (read_info, body) = store.get_object("bucket", "video.mp4").await.expect("get");
    assert_eq!(read_info.size, 7 * MIB as i64);
    assert_eq!(body.len(), 7 * MIB);
    assert!(body[..6 * MIB].iter().all(|&b| b == 0x61));
    assert!(body[6 * MIB..].iter().all(|&b| b == 0x62));

    // The staging area is gone: the upload can no longer be addressed.
    let err = store
        .abort_multipart_upload("bucket", "video.mp4", &upload_id)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::NoSuchUpload { .. }));
}

#[tokio::test]
async fn test_complete_orders_parts_by_client_list() {
    let (_dirs, store) = new_store(4).await;

    let upload_id = store
        .new_multipart_upload("bucket", "obj", &ObjectOptions::default())
        .await
        .unwrap();

    // Upload order 1, 3, 2; the complete list decides the layout.
    let p1 = upload_part(&store, "bucket", "obj", &upload_id, 1, vec![b'a'; 6 * MIB]).await;
    let p3 = upload_part(&store, "bucket", "obj", &upload_id, 3, vec![b'c'; MIB]).await;
    let p2 = upload_part(&store, "bucket", "obj", &upload_id, 2, vec![b'b'; 5 * MIB]).await;

    let parts = vec![
        CompletePart { part_number: 1, etag: p1.etag },
        CompletePart { part_number: 2, etag: p2.etag },
        CompletePart { part_number: 3, etag: p3.etag },
    ];
    store
        .complete_multipart_upload("bucket", "obj", &upload_id, &parts, &ObjectOptions::default())
        .await
        .expect("complete");

    let (_, body) = store.get_object("bucket", "obj").await.unwrap();
    assert_eq!(body.len(), 12 * MIB);
    assert!(body[..6 * MIB].iter().all(|&b| b == b'a'));
    assert!(body[6 * MIB..11 * MIB].iter().all(|&b| b == b'b'));
    assert!(body[11 * MIB..].iter().all(|&b| b == b'c'));
}

#[tokio::test]
async fn test_complete_rejects_unordered_part_list() {
    let (_dirs, store) = new_store(4).await;

    let upload_id = store
        .new_multipart_upload("bucket", "obj", &ObjectOptions::default())
        .await
        .unwrap();

    let p1 = upload_part(&store, "bucket", "obj", &upload_id, 1, vec![b'a'; 6 * MIB]).await;
    let p2 = upload_part(&store, "bucket", "obj", &upload_id, 2, vec![b'b'; 5 * MIB]).await;
    let p3 = upload_part(&store, "bucket", "obj", &upload_id, 3, vec![b'c'; MIB]).await;

    let shuffled = vec![
        CompletePart { part_number: 1, etag: p1.etag },
        CompletePart { part_number: 3, etag: p3.etag },
        CompletePart { part_number: 2, etag: p2.etag },
    ];
    let err = store
        .complete_multipart_upload("bucket", "obj", &upload_id, &shuffled, &ObjectOptions::default())
        .await
        .unwrap_err();
    assert!(matches!(err, Error::InvalidPartOrder));
}

#[tokio::test]
async fn test_complete_rejects_small_middle_part() {
    let (_dirs, store) = new_store(4).await;

    let upload_id = store
        .new_multipart_upload("bucket", "obj", &ObjectOptions::default())
        .await
        .unwrap();

    let p1 = upload_part(&store, "bucket", "obj", &upload_id, 1, vec![b'a'; 5 * MIB]).await;
    let p2 = upload_part(&store, "bucket", "obj", &upload_id, 2, vec![b'b'; MIB]).await;
    let p3 = upload_part(&store, "bucket", "obj", &upload_id, 3, vec![b'c'; 5 * MIB]).await;

    let parts = vec![
        CompletePart { part_number: 1, etag: p1.etag },
        CompletePart { part_number: 2, etag: p2.etag },
        CompletePart { part_number: 3, etag: p3.etag },
    ];
    let err = store
        .complete_multipart_upload("bucket", "obj", &upload_id, &parts, &ObjectOptions::default())
        .await
        .unwrap_err();
    match err {
        Error::PartTooSmall { part_number, .. } => assert_eq!(part_number, 2),
        other => panic!("expected PartTooSmall, got {other:?}"),
    }
}

#[tokio::test]
async fn test_complete_rejects_wrong_etag_and_unknown_part() {
    let (_dirs, store) = new_store(4).await;

    let upload_id = store
        .new_multipart_upload("bucket", "obj", &ObjectOptions::default())
        .await
        .unwrap();
    upload_part(&store, "bucket", "obj", &upload_id, 1, vec![b'x'; MIB]).await;

    let wrong_etag = vec![CompletePart {
        part_number: 1,
        etag: md5_hex(b"something else"),
    }];
    let err = store
        .complete_multipart_upload("bucket", "obj", &upload_id, &wrong_etag, &ObjectOptions::default())
        .await
        .unwrap_err();
    assert!(matches!(err, Error::InvalidPart { part_number: 1, .. }));

    let unknown_part = vec![CompletePart {
        part_number: 9,
        etag: md5_hex(b"ghost"),
    }];
    let err = store
        .complete_multipart_upload("bucket", "obj", &upload_id, &unknown_part, &ObjectOptions::default())
        .await
        .unwrap_err();
    assert!(matches!(err, Error::InvalidPart { part_number: 9, .. }));
}

// =============================================================================
// Part Replacement & Zero-Length Bodies
// =============================================================================

#[tokio::test]
async fn test_reuploaded_part_number_replaces_entry() {
    let (_dirs, store) = new_store(4).await;

    let upload_id = store
        .new_multipart_upload("bucket", "obj", &ObjectOptions::default())
        .await
        .unwrap();

    upload_part(&store, "bucket", "obj", &upload_id, 1, vec![b'o'; MIB]).await;
    let replacement = upload_part(&store, "bucket", "obj", &upload_id, 1, vec![b'n'; 2 * MIB]).await;

    let listing = store
        .list_object_parts("bucket", "obj", &upload_id, 0, 100)
        .await
        .unwrap();
    assert_eq!(listing.parts.len(), 1);
    assert_eq!(listing.parts[0].etag, replacement.etag);
    assert_eq!(listing.parts[0].size, 2 * MIB as i64);

    let parts = vec![CompletePart { part_number: 1, etag: replacement.etag }];
    store
        .complete_multipart_upload("bucket", "obj", &upload_id, &parts, &ObjectOptions::default())
        .await
        .unwrap();

    let (_, body) = store.get_object("bucket", "obj").await.unwrap();
    assert!(body.iter().all(|&b| b == b'n'));
}

#[tokio::test]
async fn test_complete_with_subset_drops_orphan_parts() {
    let (_dirs, disks) = new_fleet(4).await;
    let store = ErasureStore::new(disks.clone(), StoreConfig::default())
        .await
        .unwrap();

    let upload_id = store
        .new_multipart_upload("bucket", "obj", &ObjectOptions::default())
        .await
        .unwrap();
    let p1 = upload_part(&store, "bucket", "obj", &upload_id, 1, vec![b'k'; MIB]).await;
    upload_part(&store, "bucket", "obj", &upload_id, 2, vec![b'd'; MIB]).await;

    // Complete referencing only part 1; part 2's shards become orphans.
    store
        .complete_multipart_upload(
            "bucket",
            "obj",
            &upload_id,
            &[CompletePart { part_number: 1, etag: p1.etag }],
            &ObjectOptions::default(),
        )
        .await
        .unwrap();

    let (info, body) = store.get_object("bucket", "obj").await.unwrap();
    assert_eq!(info.size, MIB as i64);
    assert!(body.iter().all(|&b| b == b'k'));

    // The dropped part's shard files never made it into the object dir.
    for disk in disks.iter().flatten() {
        assert_eq!(
            disk.stat_file("bucket", "obj/part.2").await.unwrap_err(),
            DiskError::FileNotFound
        );
    }
}

#[tokio::test]
async fn test_zero_length_final_object() {
    let (_dirs, store) = new_store(4).await;

    let upload_id = store
        .new_multipart_upload("bucket", "empty", &ObjectOptions::default())
        .await
        .unwrap();
    let p1 = upload_part(&store, "bucket", "empty", &upload_id, 1, Vec::new()).await;
    assert_eq!(p1.size, 0);

    let parts = vec![CompletePart { part_number: 1, etag: p1.etag }];
    let info = store
        .complete_multipart_upload("bucket", "empty", &upload_id, &parts, &ObjectOptions::default())
        .await
        .unwrap();
    assert_eq!(info.size, 0);

    let (_, body) = store.get_object("bucket", "empty").await.unwrap();
    assert!(body.is_empty());
}

#[tokio::test]
async fn test_incomplete_body_is_rejected() {
    let (_dirs, store) = new_store(4).await;

    let upload_id = store
        .new_multipart_upload("bucket", "obj", &ObjectOptions::default())
        .await
        .unwrap();

    // Declared 64 KiB, delivered 10 bytes.
    let mut reader = PutObjReader::new(
        std::io::Cursor::new(Bytes::from_static(b"short body")),
        64 * 1024,
        64 * 1024,
    );
    let err = store
        .put_object_part("bucket", "obj", &upload_id, 1, &mut reader, &ObjectOptions::default())
        .await
        .unwrap_err();
    assert!(matches!(err, Error::IncompleteBody { got: 10, .. }));
}

// =============================================================================
// Abort Semantics
// =============================================================================

#[tokio::test]
async fn test_abort_is_terminal_and_idempotent() {
    let (_dirs, store) = new_store(4).await;

    let upload_id = store
        .new_multipart_upload("bucket", "obj", &ObjectOptions::default())
        .await
        .unwrap();
    upload_part(&store, "bucket", "obj", &upload_id, 1, vec![b'x'; MIB]).await;

    store
        .abort_multipart_upload("bucket", "obj", &upload_id)
        .await
        .expect("first abort");

    let err = store
        .abort_multipart_upload("bucket", "obj", &upload_id)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::NoSuchUpload { .. }));

    // Uploading against the aborted id fails the existence check.
    let mut reader = PutObjReader::from_bytes(vec![b'y'; 1024]);
    let err = store
        .put_object_part("bucket", "obj", &upload_id, 2, &mut reader, &ObjectOptions::default())
        .await
        .unwrap_err();
    assert!(matches!(err, Error::NoSuchUpload { .. }));
}

// =============================================================================
// Listings
// =============================================================================

#[tokio::test]
async fn test_list_parts_pagination() {
    let (_dirs, store) = new_store(4).await;

    let upload_id = store
        .new_multipart_upload("bucket", "obj", &ObjectOptions::default())
        .await
        .unwrap();
    for number in [1usize, 2, 3] {
        upload_part(&store, "bucket", "obj", &upload_id, number, vec![number as u8; 1024]).await;
    }

    let page = store
        .list_object_parts("bucket", "obj", &upload_id, 0, 2)
        .await
        .unwrap();
    assert_eq!(page.parts.len(), 2);
    assert!(page.is_truncated);
    assert_eq!(page.next_part_number_marker, 2);

    let rest = store
        .list_object_parts("bucket", "obj", &upload_id, page.next_part_number_marker, 100)
        .await
        .unwrap();
    assert_eq!(rest.parts.len(), 1);
    assert_eq!(rest.parts[0].part_number, 3);
    assert!(!rest.is_truncated);
}

#[tokio::test]
async fn test_list_multipart_uploads_exact_object_only() {
    let (_dirs, store) = new_store(4).await;

    let id_a = store
        .new_multipart_upload("bucket", "obj", &ObjectOptions::default())
        .await
        .unwrap();
    let id_b = store
        .new_multipart_upload("bucket", "obj", &ObjectOptions::default())
        .await
        .unwrap();
    store
        .new_multipart_upload("bucket", "unrelated", &ObjectOptions::default())
        .await
        .unwrap();

    let listing = store
        .list_multipart_uploads("bucket", "obj", "", "", "", 100)
        .await
        .unwrap();
    let mut expected = vec![id_a, id_b];
    expected.sort();
    let got: Vec<String> = listing.uploads.iter().map(|u| u.upload_id.clone()).collect();
    assert_eq!(got, expected);
    assert_eq!(listing.prefix, "obj");

    let none = store
        .list_multipart_uploads("bucket", "never-started", "", "", "", 100)
        .await
        .unwrap();
    assert!(none.uploads.is_empty());
}

// =============================================================================
// Degraded Fleets
// =============================================================================

/// Delegates everything to the wrapped disk but refuses to open shard
/// writers, simulating a peer dying as the part stream starts.
#[derive(Debug)]
struct NoWriteDisk(DiskRef);

#[async_trait]
impl Disk for NoWriteDisk {
    fn endpoint(&self) -> String {
        self.0.endpoint()
    }
    async fn make_volume(&self, bucket: &str) -> DiskResult<()> {
        self.0.make_volume(bucket).await
    }
    async fn list_dir(&self, bucket: &str, prefix: &str, limit: i64) -> DiskResult<Vec<String>> {
        self.0.list_dir(bucket, prefix, limit).await
    }
    async fn stat_file(&self, bucket: &str, path: &str) -> DiskResult<FileStat> {
        self.0.stat_file(bucket, path).await
    }
    async fn delete_file(&self, bucket: &str, path: &str) -> DiskResult<()> {
        self.0.delete_file(bucket, path).await
    }
    async fn rename_metadata(
        &self,
        src_bucket: &str,
        src_prefix: &str,
        dst_bucket: &str,
        dst_prefix: &str,
    ) -> DiskResult<()> {
        self.0
            .rename_metadata(src_bucket, src_prefix, dst_bucket, dst_prefix)
            .await
    }
    async fn rename_file(
        &self,
        src_bucket: &str,
        src_path: &str,
        dst_bucket: &str,
        dst_path: &str,
    ) -> DiskResult<()> {
        self.0.rename_file(src_bucket, src_path, dst_bucket, dst_path).await
    }
    async fn read_all(&self, bucket: &str, path: &str) -> DiskResult<Bytes> {
        self.0.read_all(bucket, path).await
    }
    async fn write_all(&self, bucket: &str, path: &str, data: Bytes) -> DiskResult<()> {
        self.0.write_all(bucket, path, data).await
    }
    async fn create_file(
        &self,
        _bucket: &str,
        _path: &str,
        _size: Option<u64>,
    ) -> DiskResult<FileWriter> {
        Err(DiskError::FaultyDisk)
    }
}

#[tokio::test]
async fn test_part_survives_one_dead_shard_writer() {
    let (_dirs, disks) = new_fleet(4).await;
    let store = ErasureStore::new(disks.clone(), StoreConfig::default())
        .await
        .unwrap();

    let upload_id = store
        .new_multipart_upload("bucket", "obj", &ObjectOptions::default())
        .await
        .unwrap();

    // One peer stops accepting shard streams; quorum is 3 of 4.
    let wrapped: DiskRef = Arc::new(NoWriteDisk(disks[0].clone().unwrap()));
    store.set_disk(0, Some(wrapped));

    let body = vec![0xabu8; 3 * MIB];
    let p1 = upload_part(&store, "bucket", "obj", &upload_id, 1, body.clone()).await;

    store
        .complete_multipart_upload(
            "bucket",
            "obj",
            &upload_id,
            &[CompletePart { part_number: 1, etag: p1.etag }],
            &ObjectOptions::default(),
        )
        .await
        .expect("complete with one degraded disk");

    // Reading back reconstructs the missing shard through parity.
    let (_, read) = store.get_object("bucket", "obj").await.unwrap();
    assert_eq!(read, body);
}

#[tokio::test]
async fn test_offline_disk_lands_object_on_heal_queue() {
    let (_dirs, store) = new_store(4).await;

    let upload_id = store
        .new_multipart_upload("bucket", "obj", &ObjectOptions::default())
        .await
        .unwrap();
    let p1 = upload_part(&store, "bucket", "obj", &upload_id, 1, vec![b'z'; MIB]).await;

    // Peer goes dark before the commit.
    store.set_disk(3, None);

    store
        .complete_multipart_upload(
            "bucket",
            "obj",
            &upload_id,
            &[CompletePart { part_number: 1, etag: p1.etag }],
            &ObjectOptions::default(),
        )
        .await
        .expect("complete at quorum");

    let healing = store.partial_uploads().drain();
    assert!(healing.iter().any(|e| e.bucket == "bucket" && e.object == "obj"));

    let (_, body) = store.get_object("bucket", "obj").await.unwrap();
    assert!(body.iter().all(|&b| b == b'z'));
}

#[tokio::test]
async fn test_new_upload_fails_below_write_quorum() {
    let (_dirs, store) = new_store(4).await;

    // Write quorum for 2+2 coding is 3; leave only 2 disks.
    store.set_disk(0, None);
    store.set_disk(1, None);

    let err = store
        .new_multipart_upload("bucket", "obj", &ObjectOptions::default())
        .await
        .unwrap_err();
    assert!(matches!(err, Error::WriteQuorumNotMet { .. }));
}

#[tokio::test]
async fn test_corrupt_minority_manifest_is_outvoted() {
    let (_dirs, disks) = new_fleet(4).await;
    let store = ErasureStore::new(disks.clone(), StoreConfig::default())
        .await
        .unwrap();

    let upload_id = store
        .new_multipart_upload("bucket", "obj", &ObjectOptions::default())
        .await
        .unwrap();
    let body = vec![0x77u8; 2 * MIB];
    let p1 = upload_part(&store, "bucket", "obj", &upload_id, 1, body.clone()).await;
    store
        .complete_multipart_upload(
            "bucket",
            "obj",
            &upload_id,
            &[CompletePart { part_number: 1, etag: p1.etag }],
            &ObjectOptions::default(),
        )
        .await
        .unwrap();

    // Scribble over one disk's committed manifest.
    let rogue = disks[2].as_ref().unwrap();
    rogue
        .write_all("bucket", "obj/er.json", Bytes::from_static(b"not json at all"))
        .await
        .unwrap();

    let (_, read) = store.get_object("bucket", "obj").await.unwrap();
    assert_eq!(read, body);
}

// =============================================================================
// Overwrite & Namespace Rules
// =============================================================================

#[tokio::test]
async fn test_second_complete_overwrites_object() {
    let (_dirs, store) = new_store(4).await;

    for (round, fill) in [(1u8, b'A'), (2u8, b'B')] {
        let upload_id = store
            .new_multipart_upload("bucket", "obj", &ObjectOptions::default())
            .await
            .unwrap();
        let p1 = upload_part(
            &store,
            "bucket",
            "obj",
            &upload_id,
            1,
            vec![fill; round as usize * MIB],
        )
        .await;
        store
            .complete_multipart_upload(
                "bucket",
                "obj",
                &upload_id,
                &[CompletePart { part_number: 1, etag: p1.etag }],
                &ObjectOptions::default(),
            )
            .await
            .unwrap();
    }

    let (info, body) = store.get_object("bucket", "obj").await.unwrap();
    assert_eq!(info.size, 2 * MIB as i64);
    assert!(body.iter().all(|&b| b == b'B'));
}

#[tokio::test]
async fn test_worm_rejects_overwrite() {
    let config = StoreConfig {
        worm: true,
        ..Default::default()
    };
    let (_dirs, store) = new_store_with(4, config).await;

    for round in 0..2 {
        let upload_id = store
            .new_multipart_upload("bucket", "locked", &ObjectOptions::default())
            .await
            .unwrap();
        let p1 = upload_part(&store, "bucket", "locked", &upload_id, 1, vec![b'w'; MIB]).await;
        let result = store
            .complete_multipart_upload(
                "bucket",
                "locked",
                &upload_id,
                &[CompletePart { part_number: 1, etag: p1.etag }],
                &ObjectOptions::default(),
            )
            .await;

        if round == 0 {
            result.expect("first complete");
        } else {
            assert!(matches!(result.unwrap_err(), Error::ObjectAlreadyExists { .. }));
        }
    }
}

#[tokio::test]
async fn test_complete_under_committed_parent_fails() {
    let (_dirs, store) = new_store(4).await;

    // Commit "a/b" as an object.
    let upload_id = store
        .new_multipart_upload("bucket", "a/b", &ObjectOptions::default())
        .await
        .unwrap();
    let p1 = upload_part(&store, "bucket", "a/b", &upload_id, 1, vec![b'p'; MIB]).await;
    store
        .complete_multipart_upload(
            "bucket",
            "a/b",
            &upload_id,
            &[CompletePart { part_number: 1, etag: p1.etag }],
            &ObjectOptions::default(),
        )
        .await
        .unwrap();
    assert_eq!(store.probe("bucket", "a/b").await.unwrap(), ObjectState::Committed);

    // A key nested under it cannot complete.
    let upload_id = store
        .new_multipart_upload("bucket", "a/b/c", &ObjectOptions::default())
        .await
        .unwrap();
    let p1 = upload_part(&store, "bucket", "a/b/c", &upload_id, 1, vec![b'q'; MIB]).await;
    let err = store
        .complete_multipart_upload(
            "bucket",
            "a/b/c",
            &upload_id,
            &[CompletePart { part_number: 1, etag: p1.etag }],
            &ObjectOptions::default(),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, Error::FileParentIsFile { .. }));
}

// =============================================================================
// Copy Part
// =============================================================================

#[tokio::test]
async fn test_copy_object_part_from_committed_source() {
    let (_dirs, store) = new_store(4).await;

    let source_body = vec![0x42u8; 2 * MIB];
    let upload_id = store
        .new_multipart_upload("bucket", "source", &ObjectOptions::default())
        .await
        .unwrap();
    let p1 = upload_part(&store, "bucket", "source", &upload_id, 1, source_body.clone()).await;
    store
        .complete_multipart_upload(
            "bucket",
            "source",
            &upload_id,
            &[CompletePart { part_number: 1, etag: p1.etag }],
            &ObjectOptions::default(),
        )
        .await
        .unwrap();

    let upload_id = store
        .new_multipart_upload("bucket", "copy", &ObjectOptions::default())
        .await
        .unwrap();
    let copied = store
        .copy_object_part(
            "bucket",
            "source",
            "bucket",
            "copy",
            &upload_id,
            1,
            &ObjectOptions::default(),
        )
        .await
        .expect("copy part");
    assert_eq!(copied.size, 2 * MIB as i64);

    store
        .complete_multipart_upload(
            "bucket",
            "copy",
            &upload_id,
            &[CompletePart { part_number: 1, etag: copied.etag }],
            &ObjectOptions::default(),
        )
        .await
        .unwrap();

    let (_, body) = store.get_object("bucket", "copy").await.unwrap();
    assert_eq!(body, source_body);
}

// =============================================================================
// Concurrency
// =============================================================================

#[tokio::test]
async fn test_concurrent_part_uploads_all_survive() {
    let (_dirs, store) = new_store(4).await;

    let upload_id = store
        .new_multipart_upload("bucket", "obj", &ObjectOptions::default())
        .await
        .unwrap();

    let mut tasks = Vec::new();
    for number in 1..=6usize {
        let store = store.clone();
        let upload_id = upload_id.clone();
        tasks.push(tokio::spawn(async move {
            let mut reader = PutObjReader::from_bytes(vec![number as u8; 256 * 1024]);
            store
                .put_object_part("bucket", "obj", &upload_id, number, &mut reader, &ObjectOptions::default())
                .await
        }));
    }
    for task in tasks {
        task.await.unwrap().expect("concurrent part upload");
    }

    // Every part's entry made it into the manifest.
    let listing = store
        .list_object_parts("bucket", "obj", &upload_id, 0, 100)
        .await
        .unwrap();
    let numbers: Vec<usize> = listing.parts.iter().map(|p| p.part_number).collect();
    assert_eq!(numbers, vec![1, 2, 3, 4, 5, 6]);
}

// =============================================================================
// Janitor
// =============================================================================

#[tokio::test]
async fn test_janitor_expires_idle_uploads() {
    let config = StoreConfig {
        cleanup_interval: std::time::Duration::from_millis(50),
        expiry: std::time::Duration::from_millis(1),
        ..Default::default()
    };
    let (_dirs, store) = new_store_with(4, config).await;

    let upload_id = store
        .new_multipart_upload("bucket", "stale", &ObjectOptions::default())
        .await
        .unwrap();
    upload_part(&store, "bucket", "stale", &upload_id, 1, vec![b's'; 1024]).await;

    let (done_tx, done_rx) = tokio::sync::mpsc::channel(1);
    let janitor = tokio::spawn(store.clone().cleanup_stale_uploads(done_rx));

    // Give the janitor a few ticks to notice the idle upload.
    let mut expired = false;
    for _ in 0..40 {
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        let listing = store
            .list_multipart_uploads("bucket", "stale", "", "", "", 10)
            .await
            .unwrap();
        if listing.uploads.is_empty() {
            expired = true;
            break;
        }
    }
    assert!(expired, "janitor never expired the idle upload");

    let err = store
        .list_object_parts("bucket", "stale", &upload_id, 0, 10)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::NoSuchUpload { .. }));

    done_tx.send(()).await.unwrap();
    janitor.await.unwrap();
}
