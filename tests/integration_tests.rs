//! Integration tests for the chunked joiner and the form controller
//!
//! A fake backend stands in for ffmpeg: every input file holds its own name,
//! "concatenating" writes the joined lines, so the final file lists the play
//! order.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;

use towel_joiner::{
    ChunkedJoiner, EncodeSettings, FfmpegError, Finalize, JoinController, JoinError, JoinForm,
    JoinJob, JoinerConfig, MediaBackend, MemorySink, Notification,
};
use towel_joiner::backend::ENCODE_THREADS;
use towel_joiner::joiner::SCRATCH_PREFIX;

// ============================================================================
// Fake backend
// ============================================================================

#[derive(Default)]
struct FakeBackend {
    open_handles: Arc<AtomicUsize>,
    /// (output file name, clip count, threads)
    encodes: Mutex<Vec<(String, usize, u32)>>,
    /// Output file names whose encode fails
    fail_outputs: Vec<String>,
    /// Output file names written as a directory instead of a file
    dir_outputs: Vec<String>,
    delay: Option<Duration>,
}

struct FakeClip {
    lines: Vec<String>,
    handles: Arc<AtomicUsize>,
}

impl Drop for FakeClip {
    fn drop(&mut self) {
        self.handles.fetch_sub(1, Ordering::SeqCst);
    }
}

impl FakeBackend {
    fn encode_names(&self) -> Vec<String> {
        self.encodes.lock().unwrap().iter().map(|e| e.0.clone()).collect()
    }
}

impl MediaBackend for FakeBackend {
    type Clip = FakeClip;

    fn open_clip(&self, path: &Path) -> Result<FakeClip, FfmpegError> {
        let content = fs::read_to_string(path)?;
        if content.starts_with("BAD") {
            return Err(FfmpegError::InvalidOutput("no video stream".to_string()));
        }
        self.open_handles.fetch_add(1, Ordering::SeqCst);
        Ok(FakeClip {
            lines: content.lines().map(str::to_string).collect(),
            handles: Arc::clone(&self.open_handles),
        })
    }

    fn concatenate(
        &self,
        clips: &[&FakeClip],
        output: &Path,
        settings: &EncodeSettings,
    ) -> Result<(), FfmpegError> {
        if let Some(delay) = self.delay {
            std::thread::sleep(delay);
        }
        let name = output.file_name().unwrap().to_string_lossy().into_owned();
        if self.fail_outputs.contains(&name) {
            fs::write(output, b"partial").unwrap();
            return Err(FfmpegError::ExecutionFailed("simulated encoder crash".to_string()));
        }
        self.encodes
            .lock()
            .unwrap()
            .push((name.clone(), clips.len(), settings.threads));

        if self.dir_outputs.contains(&name) {
            fs::create_dir_all(output)?;
            return Ok(());
        }
        let mut joined = String::new();
        for clip in clips {
            for line in &clip.lines {
                joined.push_str(line);
                joined.push('\n');
            }
        }
        fs::write(output, joined)?;
        Ok(())
    }
}

// ============================================================================
// Helpers
// ============================================================================

fn make_inputs(dir: &Path, names: &[&str]) {
    for name in names {
        fs::write(dir.join(name), name.as_bytes()).unwrap();
    }
}

fn numbered(count: usize) -> Vec<String> {
    (0..count).map(|i| format!("clip_{:03}.mp4", i)).collect()
}

fn play_order(path: &Path) -> Vec<String> {
    fs::read_to_string(path)
        .unwrap()
        .lines()
        .map(str::to_string)
        .collect()
}

struct Workspace {
    _root: TempDir,
    input: PathBuf,
    output: PathBuf,
}

fn workspace() -> Workspace {
    let root = TempDir::new().unwrap();
    let input = root.path().join("in");
    let output = root.path().join("out");
    fs::create_dir(&input).unwrap();
    Workspace {
        _root: root,
        input,
        output,
    }
}

fn job(ws: &Workspace, chunk_size: usize) -> JoinJob {
    JoinJob::new(&ws.input, &ws.output, "mp4")
        .unwrap()
        .with_chunk_size(chunk_size)
}

fn leftover_chunks(dir: &Path) -> Vec<String> {
    fs::read_dir(dir)
        .unwrap()
        .filter_map(|e| e.ok())
        .map(|e| e.file_name().to_string_lossy().into_owned())
        .filter(|n| {
            n.starts_with("chunk_") || n.starts_with(".joined_video") || n.starts_with(SCRATCH_PREFIX)
        })
        .collect()
}

// ============================================================================
// Chunked joiner
// ============================================================================

#[test]
fn test_single_chunk_is_renamed_without_reencode() {
    let ws = workspace();
    make_inputs(&ws.input, &["b.mp4", "a.mp4", "c.mov"]);
    let backend = FakeBackend::default();
    let sink = MemorySink::new();

    let report = ChunkedJoiner::new(&backend, &sink).join(&job(&ws, 20)).unwrap();

    assert_eq!(report.output, ws.output.join("joined_video.mp4"));
    assert_eq!(play_order(&report.output), vec!["a.mp4", "b.mp4", "c.mov"]);
    assert_eq!(report.finalize, Finalize::Renamed);
    assert_eq!(report.intermediates, 1);
    assert_eq!(report.files_joined, 3);
    assert_eq!(backend.encode_names(), vec!["chunk_0.mp4"]);
    assert_eq!(report.metrics.encode_passes, 1);
    assert!(leftover_chunks(&ws.output).is_empty());
}

#[test]
fn test_forty_five_files_make_three_chunks() {
    let ws = workspace();
    let names = numbered(45);
    make_inputs(&ws.input, &names.iter().map(String::as_str).collect::<Vec<_>>());
    let backend = FakeBackend::default();
    let sink = MemorySink::new();

    let report = ChunkedJoiner::new(&backend, &sink).join(&job(&ws, 20)).unwrap();

    assert_eq!(report.intermediates, 3);
    assert_eq!(report.finalize, Finalize::Reencoded);
    assert_eq!(
        backend.encode_names(),
        vec!["chunk_0.mp4", "chunk_1.mp4", "chunk_2.mp4", ".joined_video.partial.mp4"]
    );
    let sizes: Vec<usize> = backend.encodes.lock().unwrap().iter().map(|e| e.1).collect();
    assert_eq!(sizes, vec![20, 20, 5, 3]);

    assert_eq!(play_order(&report.output), names);
    assert_eq!(report.files_joined, 45);
    assert_eq!(report.metrics.encode_passes, 4);
    assert_eq!(report.metrics.intermediates_deleted, 3);
    assert!(report.cleanup_failures.is_empty());
    assert!(leftover_chunks(&ws.output).is_empty());
}

#[test]
fn test_play_order_independent_of_chunk_size() {
    let names = numbered(23);
    for chunk_size in [1, 2, 3, 7, 10, 22, 23, 24, 100] {
        let ws = workspace();
        make_inputs(&ws.input, &names.iter().map(String::as_str).collect::<Vec<_>>());
        let backend = FakeBackend::default();
        let sink = MemorySink::new();

        let report = ChunkedJoiner::new(&backend, &sink)
            .join(&job(&ws, chunk_size))
            .unwrap();

        assert_eq!(play_order(&report.output), names, "chunk size {}", chunk_size);
        let expected_passes = if chunk_size >= names.len() {
            1
        } else {
            names.len().div_ceil(chunk_size) as u64 + 1
        };
        assert_eq!(report.metrics.encode_passes, expected_passes, "chunk size {}", chunk_size);
    }
}

#[test]
fn test_empty_directory_is_no_valid_input() {
    let ws = workspace();
    fs::create_dir(ws.input.join("nested")).unwrap();
    let backend = FakeBackend::default();
    let sink = MemorySink::new();

    let err = ChunkedJoiner::new(&backend, &sink).join(&job(&ws, 20)).unwrap_err();

    assert!(matches!(err, JoinError::NoValidInput));
    assert!(!ws.output.join("joined_video.mp4").exists());
    assert!(backend.encode_names().is_empty());
}

#[test]
fn test_all_files_unopenable_is_no_output() {
    let ws = workspace();
    for name in ["a.txt", "b.txt", "c.txt"] {
        fs::write(ws.input.join(name), b"BAD not a video").unwrap();
    }
    let backend = FakeBackend::default();
    let sink = MemorySink::new();

    let err = ChunkedJoiner::new(&backend, &sink).join(&job(&ws, 2)).unwrap_err();

    assert!(matches!(err, JoinError::NoOutputProduced));
    assert!(!ws.output.join("joined_video.mp4").exists());
    assert!(leftover_chunks(&ws.output).is_empty());
    assert!(sink.messages().iter().any(|m| m.starts_with("Skipping")));
}

#[test]
fn test_unopenable_files_are_skipped_in_order() {
    let ws = workspace();
    make_inputs(&ws.input, &["a.mp4", "c.mp4", "e.mp4"]);
    fs::write(ws.input.join("b.mp4"), b"BAD").unwrap();
    fs::write(ws.input.join("d.txt"), b"BAD").unwrap();
    let backend = FakeBackend::default();
    let sink = MemorySink::new();

    let report = ChunkedJoiner::new(&backend, &sink).join(&job(&ws, 20)).unwrap();

    assert_eq!(play_order(&report.output), vec!["a.mp4", "c.mp4", "e.mp4"]);
    let skipped: Vec<PathBuf> = report.skipped.iter().map(|s| s.path.clone()).collect();
    assert_eq!(skipped, vec![ws.input.join("b.mp4"), ws.input.join("d.txt")]);
    assert!(report.skipped[0].reason.contains("no video stream"));
    assert_eq!(report.metrics.files_skipped, 2);
}

#[test]
fn test_chunk_without_clips_produces_nothing() {
    let ws = workspace();
    fs::write(ws.input.join("a.mp4"), b"BAD").unwrap();
    fs::write(ws.input.join("b.mp4"), b"BAD").unwrap();
    make_inputs(&ws.input, &["c.mp4", "d.mp4"]);
    let backend = FakeBackend::default();
    let sink = MemorySink::new();

    let report = ChunkedJoiner::new(&backend, &sink).join(&job(&ws, 2)).unwrap();

    assert_eq!(report.intermediates, 1);
    assert_eq!(report.finalize, Finalize::Renamed);
    assert_eq!(backend.encode_names(), vec!["chunk_0.mp4"]);
    assert_eq!(play_order(&report.output), vec!["c.mp4", "d.mp4"]);
}

#[test]
fn test_every_clip_is_released() {
    let ws = workspace();
    let names = numbered(7);
    make_inputs(&ws.input, &names.iter().map(String::as_str).collect::<Vec<_>>());
    let backend = FakeBackend::default();
    let sink = MemorySink::new();

    let joiner = ChunkedJoiner::new(&backend, &sink);
    let report = joiner.join(&job(&ws, 3)).unwrap();

    assert_eq!(backend.open_handles.load(Ordering::SeqCst), 0);
    // 7 inputs + 3 intermediates re-opened for the merge
    assert_eq!(report.metrics.clips_opened, 10);
    assert_eq!(joiner.metrics().clips_in_flight(), 0);
}

#[test]
fn test_chunk_encode_failure_aborts_and_cleans_up() {
    let ws = workspace();
    let names = numbered(5);
    make_inputs(&ws.input, &names.iter().map(String::as_str).collect::<Vec<_>>());
    let backend = FakeBackend {
        fail_outputs: vec!["chunk_1.mp4".to_string()],
        ..FakeBackend::default()
    };
    let sink = MemorySink::new();

    let joiner = ChunkedJoiner::new(&backend, &sink);
    let err = joiner.join(&job(&ws, 2)).unwrap_err();

    match err {
        JoinError::EncodeFailure { stage, source } => {
            assert_eq!(stage, "joining chunk 2");
            assert!(matches!(source, FfmpegError::ExecutionFailed(_)));
        }
        other => panic!("unexpected error: {:?}", other),
    }
    assert!(!ws.output.join("joined_video.mp4").exists());
    assert!(leftover_chunks(&ws.output).is_empty());
    assert_eq!(backend.open_handles.load(Ordering::SeqCst), 0);
    assert_eq!(joiner.metrics().clips_in_flight(), 0);
}

#[test]
fn test_merge_failure_still_deletes_intermediates() {
    let ws = workspace();
    let names = numbered(4);
    make_inputs(&ws.input, &names.iter().map(String::as_str).collect::<Vec<_>>());
    let backend = FakeBackend {
        fail_outputs: vec![".joined_video.partial.mp4".to_string()],
        ..FakeBackend::default()
    };
    let sink = MemorySink::new();

    let err = ChunkedJoiner::new(&backend, &sink).join(&job(&ws, 2)).unwrap_err();

    assert!(matches!(err, JoinError::EncodeFailure { ref stage, .. } if stage == "merging chunks"));
    assert!(!ws.output.join("joined_video.mp4").exists());
    assert!(leftover_chunks(&ws.output).is_empty());
    assert_eq!(backend.open_handles.load(Ordering::SeqCst), 0);
}

#[test]
fn test_cleanup_continues_past_a_failed_deletion() {
    let ws = workspace();
    let names = numbered(6);
    make_inputs(&ws.input, &names.iter().map(String::as_str).collect::<Vec<_>>());
    // chunk_1 comes out as a directory: it cannot be re-opened or removed as a file
    let backend = FakeBackend {
        dir_outputs: vec!["chunk_1.mp4".to_string()],
        ..FakeBackend::default()
    };
    let sink = MemorySink::new();

    let report = ChunkedJoiner::new(&backend, &sink).join(&job(&ws, 2)).unwrap();

    assert_eq!(report.cleanup_failures.len(), 1);
    assert_eq!(report.cleanup_failures[0].path.file_name().unwrap(), "chunk_1.mp4");
    assert_eq!(report.metrics.intermediates_deleted, 2);
    assert!(leftover_chunks(&ws.output).is_empty());

    // the chunk that could not be re-opened shows up in the report
    assert_eq!(report.skipped.len(), 1);
    assert_eq!(report.skipped[0].path.file_name().unwrap(), "chunk_1.mp4");

    assert_eq!(report.files_joined, 4);
    assert_eq!(
        play_order(&report.output),
        vec![names[0].clone(), names[1].clone(), names[4].clone(), names[5].clone()]
    );
}

#[test]
fn test_existing_final_is_replaced_and_output_dir_created() {
    let ws = workspace();
    make_inputs(&ws.input, &["a.mp4"]);
    let backend = FakeBackend::default();
    let sink = MemorySink::new();

    let first = ChunkedJoiner::new(&backend, &sink).join(&job(&ws, 20)).unwrap();
    assert!(ws.output.is_dir());

    make_inputs(&ws.input, &["b.mp4"]);
    let second = ChunkedJoiner::new(&backend, &sink).join(&job(&ws, 20)).unwrap();

    assert_eq!(first.output, second.output);
    assert_eq!(play_order(&second.output), vec!["a.mp4", "b.mp4"]);
}

#[test]
fn test_encodes_are_single_threaded() {
    let ws = workspace();
    let names = numbered(5);
    make_inputs(&ws.input, &names.iter().map(String::as_str).collect::<Vec<_>>());
    let backend = FakeBackend::default();
    let sink = MemorySink::new();

    ChunkedJoiner::new(&backend, &sink).join(&job(&ws, 2)).unwrap();

    let encodes = backend.encodes.lock().unwrap();
    assert_eq!(encodes.len(), 4);
    assert!(encodes.iter().all(|e| e.2 == 1));
}

#[test]
fn test_requested_format_names_final_file() {
    let ws = workspace();
    make_inputs(&ws.input, &["a.mp4", "b.mp4", "c.mp4"]);
    let backend = FakeBackend::default();
    let sink = MemorySink::new();

    let job = JoinJob::new(&ws.input, &ws.output, ".MKV").unwrap().with_chunk_size(2);
    let report = ChunkedJoiner::new(&backend, &sink).join(&job).unwrap();

    assert_eq!(report.output, ws.output.join("joined_video.mkv"));
    assert!(report.output.exists());
    assert_eq!(backend.encode_names().last().unwrap(), ".joined_video.partial.mkv");
}

#[test]
fn test_joining_into_input_folder_keeps_user_files() {
    let ws = workspace();
    make_inputs(&ws.input, &["a.mp4", "b.mp4", "chunk_0.mp4"]);
    let backend = FakeBackend::default();
    let sink = MemorySink::new();

    let job = JoinJob::new(&ws.input, &ws.input, "mp4").unwrap().with_chunk_size(2);
    let report = ChunkedJoiner::new(&backend, &sink).join(&job).unwrap();

    assert_eq!(report.output, ws.input.join("joined_video.mp4"));
    assert_eq!(play_order(&report.output), vec!["a.mp4", "b.mp4", "chunk_0.mp4"]);
    assert_eq!(fs::read_to_string(ws.input.join("chunk_0.mp4")).unwrap(), "chunk_0.mp4");
    assert!(report.cleanup_failures.is_empty());

    let mut names: Vec<String> = fs::read_dir(&ws.input)
        .unwrap()
        .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
        .collect();
    names.sort();
    assert_eq!(names, vec!["a.mp4", "b.mp4", "chunk_0.mp4", "joined_video.mp4"]);
}

#[test]
fn test_failed_encode_in_input_folder_keeps_user_files() {
    let ws = workspace();
    make_inputs(&ws.input, &["a.mp4", "chunk_0.mp4"]);
    let backend = FakeBackend {
        fail_outputs: vec!["chunk_0.mp4".to_string()],
        ..FakeBackend::default()
    };
    let sink = MemorySink::new();

    let job = JoinJob::new(&ws.input, &ws.input, "mp4").unwrap();
    let err = ChunkedJoiner::new(&backend, &sink).join(&job).unwrap_err();

    assert!(matches!(err, JoinError::EncodeFailure { .. }));
    assert_eq!(fs::read_to_string(ws.input.join("chunk_0.mp4")).unwrap(), "chunk_0.mp4");
    assert!(ws.input.join("a.mp4").exists());
    assert!(!ws.input.join("joined_video.mp4").exists());
}

#[test]
fn test_failed_rename_keeps_previous_output() {
    let ws = workspace();
    make_inputs(&ws.input, &["a.mp4"]);
    // a non-empty directory where the final file should go
    let final_path = ws.output.join("joined_video.mp4");
    fs::create_dir_all(&final_path).unwrap();
    fs::write(final_path.join("previous.txt"), b"previous").unwrap();
    let backend = FakeBackend::default();
    let sink = MemorySink::new();

    let err = ChunkedJoiner::new(&backend, &sink).join(&job(&ws, 20)).unwrap_err();

    assert!(matches!(err, JoinError::OutputWrite { .. }));
    assert_eq!(fs::read(final_path.join("previous.txt")).unwrap(), b"previous");
    assert!(leftover_chunks(&ws.output).is_empty());
}

#[test]
fn test_missing_input_directory() {
    let ws = workspace();
    let backend = FakeBackend::default();
    let sink = MemorySink::new();
    let job = JoinJob::new(ws.input.join("missing"), &ws.output, "mp4").unwrap();

    let err = ChunkedJoiner::new(&backend, &sink).join(&job).unwrap_err();
    assert!(matches!(err, JoinError::DirectoryUnreadable { .. }));
}

// ============================================================================
// Form controller
// ============================================================================

fn form(ws: &Workspace) -> JoinForm {
    JoinForm::new(
        ws.input.to_string_lossy(),
        ws.output.to_string_lossy(),
        "mp4",
    )
}

#[tokio::test]
async fn test_controller_runs_join_in_background() {
    let ws = workspace();
    make_inputs(&ws.input, &["b.mp4", "a.mp4"]);
    let mut controller = JoinController::new(Arc::new(FakeBackend::default()), JoinerConfig::default());

    controller.start(&form(&ws)).unwrap();
    let notification = controller.next_notification().await.unwrap();

    assert!(notification.is_success());
    assert_eq!(
        notification.message(),
        format!("Joined video saved as:\n{}", ws.output.join("joined_video.mp4").display())
    );
    assert!(controller.console().contains("Joined video saved as"));
    assert!(!controller.is_busy());
    assert_eq!(controller.metrics().unwrap().snapshot().encode_passes, 1);
}

#[tokio::test]
async fn test_controller_rejects_second_join_while_busy() {
    let ws = workspace();
    make_inputs(&ws.input, &["a.mp4"]);
    let backend = FakeBackend {
        delay: Some(Duration::from_millis(300)),
        ..FakeBackend::default()
    };
    let mut controller = JoinController::new(Arc::new(backend), JoinerConfig::default());

    controller.start(&form(&ws)).unwrap();
    assert!(controller.is_busy());
    let err = controller.start(&form(&ws)).unwrap_err();
    assert!(matches!(err, JoinError::JobInProgress));

    let first = controller.next_notification().await.unwrap();
    assert!(first.is_success());
    assert!(!controller.is_busy());

    controller.start(&form(&ws)).unwrap();
    assert!(controller.next_notification().await.unwrap().is_success());
}

#[tokio::test]
async fn test_controller_pump_collects_console_lines() {
    let ws = workspace();
    make_inputs(&ws.input, &["a.mp4", "b.mp4", "c.mp4"]);
    let config = JoinerConfig {
        chunk_size: 2,
        ..JoinerConfig::default()
    };
    let mut controller = JoinController::new(Arc::new(FakeBackend::default()), config);

    controller.start(&form(&ws)).unwrap();
    let notification = loop {
        if let Some(n) = controller.pump() {
            break n;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    };

    assert!(notification.is_success());
    assert!(controller.console().contains("Chunk 1/2"));
    assert!(controller.console().contains("Merging 2 chunks"));
}

#[tokio::test]
async fn test_controller_ignores_configured_thread_count() {
    let ws = workspace();
    make_inputs(&ws.input, &["a.mp4", "b.mp4", "c.mp4"]);
    let config = JoinerConfig::from_json(r#"{"encode_threads": 8, "chunk_size": 2}"#).unwrap();
    let backend = Arc::new(FakeBackend::default());
    let mut controller = JoinController::new(Arc::clone(&backend), config);

    controller.start(&form(&ws)).unwrap();
    assert!(controller.next_notification().await.unwrap().is_success());

    let encodes = backend.encodes.lock().unwrap();
    assert_eq!(encodes.len(), 3);
    assert!(encodes.iter().all(|e| e.2 == ENCODE_THREADS));
}

#[tokio::test]
async fn test_controller_surfaces_errors() {
    let ws = workspace();
    let mut controller = JoinController::new(Arc::new(FakeBackend::default()), JoinerConfig::default());

    controller.start(&form(&ws)).unwrap();
    let notification = controller.next_notification().await.unwrap();

    match notification {
        Notification::Error { title, message } => {
            assert_eq!(title, "Error");
            assert_eq!(message, "No valid video files found.");
        }
        other => panic!("expected error, got {:?}", other),
    }
    assert!(!controller.is_busy());
}

#[tokio::test]
async fn test_controller_rejects_incomplete_form() {
    let mut controller = JoinController::new(Arc::new(FakeBackend::default()), JoinerConfig::default());

    let err = controller.start(&JoinForm::new("", "", "mp4")).unwrap_err();
    assert!(matches!(err, JoinError::InvalidJob(_)));
    assert!(!controller.is_busy());
}
