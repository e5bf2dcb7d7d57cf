//! End-to-end ingestion tests against the in-memory store.
//!
//! These drive the upload manager and batch processor the way the API does,
//! with a mock embedding backend, and check the persisted results.

use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tempfile::TempDir;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use lorekeep_core::{
    CreateCollectionRequest, DocumentStatus, EventBus, JobOptions, NewUploadJob, ProgressEvent,
    UploadJob, UploadJobStatus, UploadSource,
};
use lorekeep_db::{MemoryStore, Repositories};
use lorekeep_inference::mock::MockEmbeddingBackend;
use lorekeep_inference::RetryPolicy;
use lorekeep_jobs::{
    BatchProcessor, BatchRequest, ExtractionRegistry, FileProcessor, IngestConfig, IngestFile,
    JobRef, ProgressCallback, UploadManager,
};

const WAIT: Duration = Duration::from_secs(20);

struct Harness {
    tmp: TempDir,
    repos: Repositories,
    manager: UploadManager,
    collection_id: Uuid,
}

fn config(tmp: &Path) -> IngestConfig {
    IngestConfig::default()
        .with_max_concurrent_files(3)
        .with_chunking(200, 0)
        .with_retry(RetryPolicy::new(2, Duration::from_millis(1), Duration::from_secs(5)))
        .with_staging_dir(tmp.join("staging"))
}

async fn harness(backend: MockEmbeddingBackend) -> Harness {
    let tmp = TempDir::new().unwrap();
    let repos = MemoryStore::new().repositories();
    let collection = repos
        .collections
        .create(
            CreateCollectionRequest {
                name: "knowledge".to_string(),
                description: Some("integration".to_string()),
                embedding_model: None,
            },
            "mock-embed",
        )
        .await
        .unwrap();
    let manager = UploadManager::new(
        repos.clone(),
        Arc::new(backend),
        Arc::new(ExtractionRegistry::with_defaults()),
        config(tmp.path()),
        EventBus::new(256),
    );
    Harness {
        tmp,
        repos,
        manager,
        collection_id: collection.id,
    }
}

impl Harness {
    /// Stage files in a fresh incoming area and run them as one job.
    async fn upload(&self, files: &[(&str, &str)]) -> UploadJob {
        let incoming = self.manager.new_staging_area().await.unwrap();
        for (rel, body) in files {
            let path = incoming.join(rel);
            std::fs::create_dir_all(path.parent().unwrap()).unwrap();
            std::fs::write(path, body).unwrap();
        }
        let job = self
            .manager
            .submit(
                self.collection_id,
                UploadSource::Files {
                    root: incoming.display().to_string(),
                    files: files.iter().map(|(rel, _)| rel.to_string()).collect(),
                },
                JobOptions::default(),
            )
            .await
            .unwrap();
        self.manager.wait_for_completion(&job.job_id, WAIT).await.unwrap()
    }
}

fn write_zip(path: &Path, entries: &[(&str, &[u8])]) {
    let mut writer = zip::ZipWriter::new(std::fs::File::create(path).unwrap());
    for (name, body) in entries {
        writer
            .start_file(*name, zip::write::SimpleFileOptions::default())
            .unwrap();
        std::io::Write::write_all(&mut writer, body).unwrap();
    }
    writer.finish().unwrap();
}

#[tokio::test]
async fn test_zip_upload_builds_folder_hierarchy() {
    let h = harness(MockEmbeddingBackend::new()).await;
    let incoming = h.manager.new_staging_area().await.unwrap();
    let archive = incoming.join("upload.zip");
    write_zip(
        &archive,
        &[
            ("a/b/report.pdf", b"not really a pdf".as_slice()),
            ("a/c/notes.txt", b"Meeting notes for the quarter. Action items follow.".as_slice()),
        ],
    );

    let job = h
        .manager
        .submit(
            h.collection_id,
            UploadSource::Zip {
                archive_path: archive.display().to_string(),
            },
            JobOptions::default(),
        )
        .await
        .unwrap();
    let job = h.manager.wait_for_completion(&job.job_id, WAIT).await.unwrap();

    assert_eq!(job.total_files, 2);
    assert_eq!(job.successful_files, 1);
    assert_eq!(job.failed_files, 1);
    assert_eq!(job.status, UploadJobStatus::Failed);
    assert_eq!(job.error_log.len(), 1);
    assert_eq!(job.error_log[0].file, "a/b/report.pdf");
    assert_eq!(job.successful_paths, vec!["a/c/notes.txt".to_string()]);

    let folders = h.repos.folders.list(h.collection_id).await.unwrap();
    let mut shape: Vec<(String, i32)> = folders.iter().map(|n| (n.full_path.clone(), n.depth)).collect();
    shape.sort();
    assert_eq!(
        shape,
        vec![
            ("a".to_string(), 0),
            ("a/b".to_string(), 1),
            ("a/c".to_string(), 1),
        ]
    );

    let a = h.repos.folders.find_by_path(h.collection_id, "a").await.unwrap().unwrap();
    assert_eq!(a.document_count, 0);
    assert_eq!(a.total_documents, 2);
    assert!(a.auto_tags.contains(&"top-level".to_string()));

    let b = h.repos.folders.find_by_path(h.collection_id, "a/b").await.unwrap().unwrap();
    assert_eq!(b.parent_id, Some(a.id));
    assert_eq!(b.document_count, 1);

    let tree = h.repos.hierarchy().get_tree(h.collection_id, None).await.unwrap();
    assert_eq!(tree.len(), 1);
    assert_eq!(tree[0].count(), 3);

    // Both the unpacked tree and the incoming area are gone
    assert!(!h.manager.staging_dir_for(&job.job_id).exists());
    assert!(!incoming.exists());
}

#[tokio::test]
async fn test_one_failing_file_in_ten_fails_job_and_keeps_the_rest() {
    let h = harness(MockEmbeddingBackend::new().fail_when_contains("POISON")).await;
    let bodies: Vec<(String, String)> = (0..10)
        .map(|i| {
            let body = if i == 6 {
                "POISON pill sentence that never embeds.".to_string()
            } else {
                format!("Document number {} talks about topic {}.", i, i * 7)
            };
            (format!("docs/file_{:02}.txt", i), body)
        })
        .collect();
    let files: Vec<(&str, &str)> = bodies.iter().map(|(p, b)| (p.as_str(), b.as_str())).collect();

    let job = h.upload(&files).await;

    assert_eq!(job.status, UploadJobStatus::Failed);
    assert_eq!(job.total_files, 10);
    assert_eq!(job.processed_files, 10);
    assert_eq!(job.successful_files, 9);
    assert_eq!(job.failed_files, 1);
    assert_eq!(job.error_log.len(), 1);
    assert_eq!(job.error_log[0].file, "docs/file_06.txt");
    assert_eq!(job.successful_paths.len(), 9);
    // Terminal percentage reports successes, not progress
    assert_eq!(job.progress().percentage, 90.0);

    let docs = h.repos.documents.list(h.collection_id, Some("docs")).await.unwrap();
    assert_eq!(docs.len(), 10);
    let failed: Vec<_> = docs
        .iter()
        .filter(|d| d.status == DocumentStatus::Failed)
        .collect();
    assert_eq!(failed.len(), 1);
    assert_eq!(failed[0].placement.relative_path, "docs/file_06.txt");

    let collection = h.repos.collections.get(h.collection_id).await.unwrap().unwrap();
    assert_eq!(collection.total_documents, 9);
}

#[tokio::test]
async fn test_cancel_after_fourth_start_stops_scheduling() {
    let tmp = TempDir::new().unwrap();
    let repos = MemoryStore::new().repositories();
    let collection = repos
        .collections
        .create(
            CreateCollectionRequest {
                name: "cancel".to_string(),
                description: None,
                embedding_model: None,
            },
            "mock-embed",
        )
        .await
        .unwrap();

    let files: Vec<IngestFile> = (0..10)
        .map(|i| {
            let rel = format!("batch/part_{}.txt", i);
            let path = tmp.path().join(&rel);
            std::fs::create_dir_all(path.parent().unwrap()).unwrap();
            let body = format!("Part {} of the cancelled batch.", i);
            std::fs::write(&path, &body).unwrap();
            IngestFile {
                path,
                relative_path: rel,
                size_bytes: body.len() as u64,
            }
        })
        .collect();

    let job = repos
        .upload_jobs
        .create(NewUploadJob {
            job_id: "upload_1700000000_0000beef".to_string(),
            collection_id: collection.id,
            source: UploadSource::Folder {
                path: tmp.path().display().to_string(),
            },
            options: JobOptions::default(),
        })
        .await
        .unwrap();
    repos.upload_jobs.mark_processing(&job.job_id).await.unwrap();

    let processor = FileProcessor::new(
        repos.clone(),
        Arc::new(MockEmbeddingBackend::new().with_latency_ms(20)),
        Arc::new(ExtractionRegistry::with_defaults()),
        &config(tmp.path()),
    );
    let batch = BatchProcessor::new(Arc::new(processor), 3);

    let cancel = CancellationToken::new();
    let starts = Arc::new(Mutex::new(0usize));
    let trigger = cancel.clone();
    let seen = starts.clone();
    let callback: ProgressCallback = Arc::new(move |event: &ProgressEvent| {
        if let ProgressEvent::FileStart { .. } = event {
            let mut n = seen.lock().unwrap();
            *n += 1;
            if *n == 4 {
                trigger.cancel();
            }
        }
    });

    let result = batch
        .process_batch(
            BatchRequest {
                collection_id: collection.id,
                job: Some(JobRef {
                    job_id: job.job_id.clone(),
                    id: job.id,
                }),
                files,
                preserve_structure: true,
                max_file_size_bytes: 1024 * 1024,
            },
            cancel,
            Some(callback),
        )
        .await
        .unwrap();

    assert!(result.cancelled);
    assert_eq!(*starts.lock().unwrap(), 4);
    assert_eq!(result.status, UploadJobStatus::Cancelled);
    assert_eq!(result.counters.processed_files, 4);
    assert_eq!(result.counters.successful_files, 4);

    let stored = repos.upload_jobs.get(&job.job_id).await.unwrap().unwrap();
    assert_eq!(stored.status, UploadJobStatus::Cancelled);
    assert_eq!(stored.processed_files, 4);
    assert_eq!(stored.total_files, result.total as i32);
    assert!(stored.successful_files + stored.failed_files <= stored.processed_files);
    assert!(stored.completed_at_utc.is_some());
}

#[tokio::test]
async fn test_reupload_of_identical_bytes_keeps_one_document() {
    let h = harness(MockEmbeddingBackend::new()).await;
    let files = [("guides/setup.md", "# Setup\n\nInstall the tool. Then run it once.")];

    let first = h.upload(&files).await;
    let second = h.upload(&files).await;
    assert_eq!(first.status, UploadJobStatus::Completed);
    assert_eq!(second.status, UploadJobStatus::Completed);

    let docs = h.repos.documents.list(h.collection_id, None).await.unwrap();
    assert_eq!(docs.len(), 1);
    assert_eq!(docs[0].upload_job_id, Some(second.id));

    let chunks = h.repos.documents.get_chunks(docs[0].id).await.unwrap();
    let indices: Vec<i32> = chunks.iter().map(|c| c.chunk_index).collect();
    assert_eq!(indices, (0..chunks.len() as i32).collect::<Vec<_>>());
}

#[tokio::test]
async fn test_changed_content_keeps_folder_node_identity() {
    let h = harness(MockEmbeddingBackend::new()).await;

    h.upload(&[("guides/setup.md", "Install the tool. Then run it once.")]).await;
    let node = h
        .repos
        .folders
        .find_by_path(h.collection_id, "guides")
        .await
        .unwrap()
        .unwrap();
    let old = h.repos.documents.list(h.collection_id, None).await.unwrap();

    let job = h
        .upload(&[("guides/setup.md", "Install version two. Configure it. Run it daily.")])
        .await;
    assert_eq!(job.status, UploadJobStatus::Completed);

    let docs = h.repos.documents.list(h.collection_id, None).await.unwrap();
    assert_eq!(docs.len(), 1);
    assert_ne!(docs[0].id, old[0].id);
    assert_ne!(docs[0].content_hash, old[0].content_hash);
    assert!(h.repos.documents.get_chunks(old[0].id).await.unwrap().is_empty());

    let after = h
        .repos
        .folders
        .find_by_path(h.collection_id, "guides")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(after.id, node.id);
    assert_eq!(after.total_documents, 1);
    assert_eq!(h.repos.folders.list(h.collection_id).await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_progress_events_never_overshoot_total() {
    let h = harness(MockEmbeddingBackend::new()).await;
    let mut events = h.manager.events().subscribe();

    let job = h
        .upload(&[
            ("one.txt", "First file body."),
            ("two.txt", "Second file body."),
            ("three.txt", "Third file body."),
            ("four.txt", "Fourth file body."),
        ])
        .await;
    assert_eq!(job.status, UploadJobStatus::Completed);
    assert!(h.tmp.path().exists());

    let mut last_processed = 0;
    let mut completes = 0;
    while let Ok(event) = events.try_recv() {
        match event.payload {
            ProgressEvent::BatchProgress {
                processed, total, successful, failed, ..
            } => {
                assert!(processed <= total);
                assert!(processed > last_processed);
                assert_eq!(successful + failed, processed);
                last_processed = processed;
            }
            ProgressEvent::BatchComplete { processed, total, .. } => {
                assert_eq!(processed, total);
                completes += 1;
            }
            _ => {}
        }
    }
    assert_eq!(last_processed, 4);
    assert_eq!(completes, 1);
}
