//! End-to-end library tests: upload, retrieve, answer.

mod common;

use std::fs;

use futures::StreamExt;
use tempfile::TempDir;

use common::offline_context;
use lectio::error::{Error, LoadError};
use lectio::generation::NO_CONTEXT_ANSWER;
use lectio::hash::document_id;
use lectio::ingest::{ingest_upload, preload_directory};

async fn ask(ctx: &lectio::context::AppContext, message: &str) -> String {
    ctx.orchestrator()
        .respond_text(message)
        .await
        .unwrap()
        .map(|r| r.unwrap())
        .collect::<Vec<_>>()
        .await
        .concat()
}

#[tokio::test]
async fn upload_then_ask() {
    let tmp = TempDir::new().unwrap();
    let ctx = offline_context(tmp.path());

    let report = ingest_upload(&ctx, "notes.txt", b"Saturn has rings of ice.")
        .await
        .unwrap();

    assert_eq!(report.identifier, document_id("notes.txt"));
    assert_eq!(report.filename, "notes.txt");
    assert_eq!(report.chunk_count, 1);
    assert!(tmp.path().join("books").join("notes.txt").exists());
    assert_eq!(ctx.current_document(), Some(document_id("notes.txt")));

    assert_eq!(
        ask(&ctx, "What is in the notes?").await,
        "Saturn has rings of ice."
    );
}

#[tokio::test]
async fn nothing_uploaded_still_answers() {
    let tmp = TempDir::new().unwrap();
    let ctx = offline_context(tmp.path());
    assert_eq!(ask(&ctx, "anything?").await, NO_CONTEXT_ANSWER);
}

#[tokio::test]
async fn same_name_replaces_previous_upload() {
    let tmp = TempDir::new().unwrap();
    let ctx = offline_context(tmp.path());

    ingest_upload(&ctx, "notes.txt", b"Saturn has rings of ice.")
        .await
        .unwrap();
    ingest_upload(&ctx, "notes.txt", b"Jupiter has a great red spot.")
        .await
        .unwrap();

    let docs = ctx.memory.documents();
    assert_eq!(docs.len(), 1);
    assert_eq!(docs[0].chunk_count, 1);
    assert_eq!(ask(&ctx, "Saturn rings").await, "Jupiter has a great red spot.");
}

#[tokio::test]
async fn failed_reupload_keeps_the_stored_file() {
    let tmp = TempDir::new().unwrap();
    let ctx = offline_context(tmp.path());
    let books = tmp.path().join("books");

    let first = ingest_upload(&ctx, "notes.txt", b"Saturn has rings of ice.")
        .await
        .unwrap();
    assert_eq!(first.location, books.join("notes.txt").display().to_string());

    let err = ingest_upload(&ctx, "notes.txt", b"   ").await.unwrap_err();
    assert!(matches!(err, Error::Load(LoadError::Empty(_))));

    assert_eq!(
        fs::read_to_string(books.join("notes.txt")).unwrap(),
        "Saturn has rings of ice."
    );
    let stored: Vec<String> = fs::read_dir(&books)
        .unwrap()
        .map(|e| e.unwrap().file_name().to_string_lossy().to_string())
        .collect();
    assert_eq!(stored, vec!["notes.txt"]);
    assert_eq!(ctx.memory.len(), 1);
    assert_eq!(ask(&ctx, "Saturn rings").await, "Saturn has rings of ice.");
}

#[tokio::test]
async fn failed_first_upload_leaves_nothing_on_disk() {
    let tmp = TempDir::new().unwrap();
    let ctx = offline_context(tmp.path());

    ingest_upload(&ctx, "blank.md", b"\n\n").await.unwrap_err();

    let books = tmp.path().join("books");
    assert_eq!(fs::read_dir(&books).unwrap().count(), 0);
    assert_eq!(ctx.current_document(), None);
}

#[tokio::test]
async fn query_picks_the_matching_document() {
    let tmp = TempDir::new().unwrap();
    let ctx = offline_context(tmp.path());

    ingest_upload(&ctx, "saturn.md", b"Saturn has rings of ice.")
        .await
        .unwrap();
    ingest_upload(&ctx, "bread.md", b"Sourdough needs a starter and patience.")
        .await
        .unwrap();

    assert_eq!(ctx.memory.documents().len(), 2);
    assert_eq!(ctx.current_document(), Some(document_id("bread.md")));
    assert_eq!(
        ask(&ctx, "sourdough starter and patience").await,
        "Sourdough needs a starter and patience."
    );
}

#[tokio::test]
async fn audio_answer_is_synthesized_per_sentence() {
    let tmp = TempDir::new().unwrap();
    let ctx = offline_context(tmp.path());
    ingest_upload(&ctx, "notes.txt", b"Saturn has rings of ice. They are mostly water.")
        .await
        .unwrap();

    let frames: Vec<Vec<u8>> = ctx
        .orchestrator()
        .respond_audio("Saturn rings")
        .await
        .unwrap()
        .map(|r| r.unwrap().to_vec())
        .collect()
        .await;

    assert_eq!(
        frames,
        vec![
            b"[Saturn has rings of ice.]".to_vec(),
            b"[They are mostly water.]".to_vec(),
        ]
    );
}

#[tokio::test]
async fn unsupported_upload_leaves_state_untouched() {
    let tmp = TempDir::new().unwrap();
    let ctx = offline_context(tmp.path());

    let err = ingest_upload(&ctx, "cover.png", b"\x89PNG").await.unwrap_err();
    assert!(matches!(err, Error::Load(LoadError::UnsupportedFormat(_))));
    assert!(ctx.memory.is_empty());
    assert_eq!(ctx.current_document(), None);
    assert!(!tmp.path().join("books").join("cover.png").exists());
}

#[tokio::test]
async fn upload_name_is_reduced_to_its_last_component() {
    let tmp = TempDir::new().unwrap();
    let ctx = offline_context(tmp.path());

    let report = ingest_upload(&ctx, "../../etc/secrets.txt", b"Nothing to see here.")
        .await
        .unwrap();
    assert_eq!(report.identifier, document_id("secrets.txt"));
    assert!(tmp.path().join("books").join("secrets.txt").exists());

    let err = ingest_upload(&ctx, "../", b"x").await.unwrap_err();
    assert!(matches!(err, Error::Load(LoadError::InvalidName(_))));
}

#[tokio::test]
async fn preload_skips_bad_files() {
    let tmp = TempDir::new().unwrap();
    let library = tmp.path().join("library");
    fs::create_dir_all(library.join("nested")).unwrap();
    fs::write(library.join("a.md"), "Alpha document about comets.").unwrap();
    fs::write(library.join("nested").join("b.txt"), "Beta notes about tides.").unwrap();
    fs::write(library.join("empty.txt"), "   \n").unwrap();
    fs::write(library.join("image.png"), b"\x89PNG").unwrap();

    let ctx = offline_context(tmp.path());
    let reports = preload_directory(&ctx, &library).await.unwrap();

    let mut names: Vec<&str> = reports.iter().map(|r| r.filename.as_str()).collect();
    names.sort();
    assert_eq!(names, vec!["a.md", "b.txt"]);
    assert_eq!(ctx.memory.documents().len(), 2);
    assert!(ctx.current_document().is_some());
}

#[tokio::test]
async fn shutdown_clears_memory() {
    let tmp = TempDir::new().unwrap();
    let ctx = offline_context(tmp.path());
    ingest_upload(&ctx, "notes.txt", b"Saturn has rings of ice.")
        .await
        .unwrap();

    ctx.shutdown();
    assert!(ctx.memory.is_empty());
    assert_eq!(ctx.current_document(), None);
    assert_eq!(ask(&ctx, "Saturn").await, NO_CONTEXT_ANSWER);
}
