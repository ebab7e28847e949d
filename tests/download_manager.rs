//! Integration tests for DownloadManager
//!
//! Slot accounting, FIFO queueing, promotion onto the caller's original
//! channels, stagnation, timeouts and stop semantics.

mod common;

use common::{test_config, wait_for, MockDownloader};
use reelbot_core::{
    Database, DownloadConfig, DownloadManager, MemoryStore, MovieStore, NewMovie, NoConversion,
    NotificationKind, ReelError,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::error::TryRecvError;
use tokio::time::sleep;

fn memory_manager(config: DownloadConfig) -> (Arc<DownloadManager>, Arc<MemoryStore>) {
    let store = Arc::new(MemoryStore::new());
    let manager = DownloadManager::new(config, store.clone(), Arc::new(NoConversion)).unwrap();
    (manager, store)
}

#[tokio::test(start_paused = true)]
async fn test_under_capacity_all_start_immediately() {
    let (manager, _store) = memory_manager(test_config(3));

    let mocks: Vec<_> = (0..3)
        .map(|i| MockDownloader::new(&format!("movie-{}", i)))
        .collect();
    for mock in &mocks {
        manager.start_download(mock.clone(), 1).await.unwrap();
    }

    assert!(mocks.iter().all(|m| m.is_started()));
    assert_eq!(manager.active_count().await, 3);
    assert_eq!(manager.queue_len().await, 0);
    assert_eq!(manager.available_slots(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_overflow_is_queued_in_order() {
    let (manager, _store) = memory_manager(test_config(2));
    let mut notifications = manager.take_notifications().unwrap();

    let mut handles = Vec::new();
    for i in 0..5 {
        let mock = MockDownloader::new(&format!("movie-{}", i));
        handles.push(manager.start_download(mock, 7).await.unwrap());
    }

    assert_eq!(manager.active_count().await, 2);
    assert_eq!(manager.queue_len().await, 3);

    let queued = manager.queued_downloads().await;
    let queued_ids: Vec<i64> = queued.iter().map(|entry| entry.movie_id).collect();
    let expected: Vec<i64> = handles[2..].iter().map(|h| h.movie_id).collect();
    assert_eq!(queued_ids, expected);

    for (offset, handle) in handles[2..].iter().enumerate() {
        assert_eq!(manager.queue_position(handle.movie_id).await, Some(offset + 1));

        let event = notifications.recv().await.unwrap();
        assert_eq!(event.movie_id, handle.movie_id);
        assert_eq!(event.chat_id, 7);
        match event.kind {
            NotificationKind::Queued {
                position,
                max_concurrent,
                ..
            } => {
                assert_eq!(position, offset + 1);
                assert_eq!(max_concurrent, 2);
            }
            other => panic!("unexpected notification: {:?}", other),
        }
    }
}

#[tokio::test(start_paused = true)]
async fn test_queued_channels_stay_open_and_silent() {
    let (manager, _store) = memory_manager(test_config(1));

    let a = MockDownloader::new("a");
    let b = MockDownloader::new("b");
    let _a_handle = manager.start_download(a.clone(), 1).await.unwrap();
    let mut b_handle = manager.start_download(b.clone(), 1).await.unwrap();

    a.progress(40.0).await;
    sleep(Duration::from_secs(120)).await;

    assert!(!b.is_started());
    assert!(matches!(b_handle.progress.try_recv(), Err(TryRecvError::Empty)));
    assert!(matches!(
        b_handle.result.try_recv(),
        Err(tokio::sync::oneshot::error::TryRecvError::Empty)
    ));
}

#[tokio::test(start_paused = true)]
async fn test_stop_active_promotes_queue_head_onto_original_channels() {
    let (manager, _store) = memory_manager(test_config(1));
    let mut notifications = manager.take_notifications().unwrap();

    let a = MockDownloader::new("a");
    let b = MockDownloader::new("b");
    let a_handle = manager.start_download(a.clone(), 1).await.unwrap();
    let mut b_handle = manager.start_download(b.clone(), 2).await.unwrap();
    let b_id = b_handle.movie_id;

    assert_eq!(manager.queue_position(b_id).await, Some(1));
    let queued = notifications.recv().await.unwrap();
    assert!(matches!(queued.kind, NotificationKind::Queued { position: 1, .. }));

    manager.stop_download(a_handle.movie_id).await.unwrap();
    let a_result = a_handle.wait().await;
    assert!(matches!(a_result, Err(ReelError::StoppedByUser { .. })));

    wait_for(|| b.is_started()).await;
    let started = notifications.recv().await.unwrap();
    assert_eq!(started.movie_id, b_id);
    assert_eq!(started.kind, NotificationKind::Started);

    b.progress(55.0).await;
    assert_eq!(b_handle.progress.recv().await, Some(55.0));

    b.finish();
    b_handle.wait().await.unwrap();

    assert_eq!(manager.active_count().await, 0);
    assert_eq!(manager.queue_len().await, 0);
}

#[tokio::test(start_paused = true)]
async fn test_queue_positions_shift_after_promotion() {
    let (manager, _store) = memory_manager(test_config(1));
    let a = MockDownloader::new("a");
    let b = MockDownloader::new("b");
    let c = MockDownloader::new("c");
    let a_handle = manager.start_download(a.clone(), 1).await.unwrap();
    let b_handle = manager.start_download(b.clone(), 1).await.unwrap();
    let c_handle = manager.start_download(c.clone(), 1).await.unwrap();
    assert_eq!(manager.queue_position(c_handle.movie_id).await, Some(2));

    a.finish();
    a_handle.wait().await.unwrap();
    wait_for(|| b.is_started()).await;

    assert_eq!(manager.queue_position(b_handle.movie_id).await, None);
    assert_eq!(manager.queue_position(c_handle.movie_id).await, Some(1));

    let queued = manager.queued_downloads().await;
    assert_eq!(queued.len(), 1);
    assert_eq!(queued[0].movie_id, c_handle.movie_id);
    assert_eq!(queued[0].position, 1);
    assert_eq!(queued[0].estimated_wait, "~30 min");
}

#[tokio::test(start_paused = true)]
async fn test_progress_clamped_before_persist_and_forward() {
    let (manager, store) = memory_manager(test_config(1));
    let mock = MockDownloader::new("loud");
    let mut handle = manager.start_download(mock.clone(), 1).await.unwrap();

    mock.progress(150.0).await;
    assert_eq!(handle.progress.recv().await, Some(100.0));

    let movie = store.get_movie(handle.movie_id).await.unwrap().unwrap();
    assert_eq!(movie.downloaded_percentage, 100.0);

    mock.finish();
    handle.wait().await.unwrap();
    let movie = store.get_movie(movie.id).await.unwrap().unwrap();
    assert!(movie.is_loaded);
}

#[tokio::test(start_paused = true)]
async fn test_flat_progress_stagnates() {
    let (manager, _store) = memory_manager(test_config(1));
    let mock = MockDownloader::new("stuck");
    let handle = manager.start_download(mock.clone(), 1).await.unwrap();
    let movie_id = handle.movie_id;

    mock.progress(10.0).await;
    sleep(Duration::from_secs(20 * 60)).await;
    mock.progress(10.0).await;
    sleep(Duration::from_secs(31 * 60)).await;
    mock.progress(10.0).await;

    let err = handle.wait().await.unwrap_err();
    assert!(matches!(err, ReelError::Stagnated { movie_id: id, .. } if id == movie_id));
    assert!(err.is_timeout());
    assert_eq!(mock.stop_calls(), 1);
    assert_eq!(manager.available_slots(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_creeping_progress_stagnates() {
    let (manager, _store) = memory_manager(test_config(1));
    let mock = MockDownloader::new("crawling");
    let mut handle = manager.start_download(mock.clone(), 1).await.unwrap();
    let movie_id = handle.movie_id;

    let mut value = 10.0;
    mock.progress(value).await;
    for _ in 0..40 {
        sleep(Duration::from_secs(60)).await;
        value += 0.05;
        mock.progress(value).await;
    }

    let result = tokio::time::timeout(Duration::from_secs(60), &mut handle.result)
        .await
        .expect("stalled download should have ended")
        .unwrap();
    let err = result.unwrap_err();
    assert!(matches!(err, ReelError::Stagnated { movie_id: id, .. } if id == movie_id));
    assert!(!manager.is_active(movie_id).await);
}

#[tokio::test(start_paused = true)]
async fn test_episodes_reset_stagnation() {
    let (manager, store) = memory_manager(test_config(1));
    let mock = MockDownloader::series("show", 10);
    let mut handle = manager.start_download(mock.clone(), 1).await.unwrap();

    mock.progress(10.0).await;
    for episode in 1..=5 {
        sleep(Duration::from_secs(20 * 60)).await;
        mock.episode(episode).await;
        mock.progress(10.0).await;
    }
    sleep(Duration::from_secs(60)).await;

    assert!(matches!(
        handle.result.try_recv(),
        Err(tokio::sync::oneshot::error::TryRecvError::Empty)
    ));
    assert!(manager.is_active(handle.movie_id).await);

    let movie = store.get_movie(handle.movie_id).await.unwrap().unwrap();
    assert_eq!(movie.completed_episodes, 5);

    mock.finish();
    handle.wait().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_absolute_timeout_reports_duration() {
    let config = DownloadConfig {
        download_timeout: Duration::from_millis(200),
        ..test_config(1)
    };
    let (manager, _store) = memory_manager(config);
    let mock = MockDownloader::new("slow");
    let handle = manager.start_download(mock.clone(), 1).await.unwrap();

    let err = handle.wait().await.unwrap_err();
    assert!(matches!(err, ReelError::DownloadTimeout { .. }));
    assert!(err.to_string().contains("200ms"), "{}", err);
    assert_eq!(manager.active_count().await, 0);
}

#[tokio::test(start_paused = true)]
async fn test_zero_timeout_never_fires() {
    let (manager, _store) = memory_manager(test_config(1));
    let mock = MockDownloader::new("patient");
    let mut handle = manager.start_download(mock.clone(), 1).await.unwrap();

    sleep(Duration::from_secs(6 * 60 * 60)).await;
    assert!(matches!(
        handle.result.try_recv(),
        Err(tokio::sync::oneshot::error::TryRecvError::Empty)
    ));

    mock.finish();
    handle.wait().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_stop_finished_movie_is_noop() {
    let (manager, _store) = memory_manager(test_config(1));
    let mock = MockDownloader::new("done");
    let handle = manager.start_download(mock.clone(), 1).await.unwrap();
    let movie_id = handle.movie_id;

    mock.finish();
    handle.wait().await.unwrap();

    manager.stop_download(movie_id).await.unwrap();
    manager.stop_download(9999).await.unwrap();
    assert_eq!(mock.stop_calls(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_slot_released_after_completion_and_stop() {
    let (manager, _store) = memory_manager(test_config(1));

    let first = MockDownloader::new("first");
    let handle = manager.start_download(first.clone(), 1).await.unwrap();
    first.finish();
    handle.wait().await.unwrap();

    let second = MockDownloader::new("second");
    let handle = manager.start_download(second.clone(), 1).await.unwrap();
    assert!(manager.is_active(handle.movie_id).await);
    assert_eq!(manager.queue_len().await, 0);

    manager.stop_download(handle.movie_id).await.unwrap();
    assert!(handle.wait().await.unwrap_err().is_stop());

    let third = MockDownloader::new("third");
    let handle = manager.start_download(third.clone(), 1).await.unwrap();
    assert!(manager.is_active(handle.movie_id).await);
    assert_eq!(manager.queue_len().await, 0);
}

#[tokio::test(start_paused = true)]
async fn test_stop_queued_download() {
    let (manager, _store) = memory_manager(test_config(1));
    let a = MockDownloader::new("a");
    let b = MockDownloader::new("b");
    let c = MockDownloader::new("c");
    let _a_handle = manager.start_download(a.clone(), 1).await.unwrap();
    let b_handle = manager.start_download(b.clone(), 1).await.unwrap();
    let c_handle = manager.start_download(c.clone(), 1).await.unwrap();

    manager.stop_download(b_handle.movie_id).await.unwrap();
    manager.stop_download_silently(c_handle.movie_id).await.unwrap();

    assert!(matches!(
        b_handle.wait().await,
        Err(ReelError::StoppedByUser { .. })
    ));
    let err = c_handle.wait().await.unwrap_err();
    assert!(err.is_silent());
    assert_eq!(manager.queue_len().await, 0);
    assert!(!b.is_started());
    assert!(!c.is_started());
}

#[tokio::test(start_paused = true)]
async fn test_silent_stop_of_active_download() {
    let (manager, _store) = memory_manager(test_config(1));
    let mock = MockDownloader::new("deleted");
    let handle = manager.start_download(mock.clone(), 1).await.unwrap();

    manager.stop_download_silently(handle.movie_id).await.unwrap();
    let err = handle.wait().await.unwrap_err();
    assert!(matches!(err, ReelError::StoppedByDeletion { .. }));
    assert!(mock.was_cancelled());
}

#[tokio::test(start_paused = true)]
async fn test_progress_close_without_result_completes() {
    let (manager, store) = memory_manager(test_config(1));
    let mock = MockDownloader::new("quiet finish");
    let handle = manager.start_download(mock.clone(), 1).await.unwrap();
    let movie_id = handle.movie_id;

    mock.progress(99.0).await;
    mock.close_progress();
    handle.wait().await.unwrap();

    let movie = store.get_movie(movie_id).await.unwrap().unwrap();
    assert!(movie.is_loaded);
    assert_eq!(mock.stop_calls(), 0);
    assert_eq!(manager.available_slots(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_progress_close_after_silent_stop_is_deletion() {
    let (manager, store) = memory_manager(test_config(1));
    let mock = MockDownloader::closing_on_stop("deleted mid-transfer");
    let handle = manager.start_download(mock.clone(), 1).await.unwrap();
    let movie_id = handle.movie_id;

    mock.progress(40.0).await;
    manager.stop_download_silently(movie_id).await.unwrap();

    let err = handle.wait().await.unwrap_err();
    assert!(matches!(err, ReelError::StoppedByDeletion { movie_id: id } if id == movie_id));
    assert!(err.is_silent());

    let movie = store.get_movie(movie_id).await.unwrap().unwrap();
    assert!(!movie.is_loaded);
}

#[tokio::test(start_paused = true)]
async fn test_stop_during_promotion_is_honoured() {
    let (manager, _store) = memory_manager(test_config(1));
    let a = MockDownloader::new("a");
    let b = MockDownloader::gated("b");
    let a_handle = manager.start_download(a.clone(), 1).await.unwrap();
    let b_handle = manager.start_download(b.clone(), 1).await.unwrap();
    let b_id = b_handle.movie_id;

    a.finish();
    a_handle.wait().await.unwrap();

    // promoter is inside b's start_download
    wait_for(|| b.start_requested()).await;
    assert!(manager.is_active(b_id).await);
    assert_eq!(manager.queue_len().await, 0);

    manager.stop_download(b_id).await.unwrap();
    b.release_start();

    let err = b_handle.wait().await.unwrap_err();
    assert!(matches!(err, ReelError::StoppedByUser { movie_id } if movie_id == b_id));
    assert!(b.was_cancelled());
    assert!(!manager.is_active(b_id).await);
    assert_eq!(manager.available_slots(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_downloader_failure_wrapped_with_movie() {
    let (manager, _store) = memory_manager(test_config(1));
    let mock = MockDownloader::new("broken");
    let handle = manager.start_download(mock.clone(), 1).await.unwrap();
    let movie_id = handle.movie_id;

    mock.fail("tracker unreachable");
    let err = handle.wait().await.unwrap_err();
    assert!(matches!(err, ReelError::DownloadFailed { movie_id: id, .. } if id == movie_id));
    assert!(err.to_string().contains("tracker unreachable"));
}

#[tokio::test(start_paused = true)]
async fn test_start_failure_is_synchronous_and_frees_slot() {
    let (manager, _store) = memory_manager(test_config(1));

    let result = manager.start_download(MockDownloader::failing("dead"), 1).await;
    assert!(matches!(result, Err(ReelError::StartFailed { .. })));
    assert_eq!(manager.active_count().await, 0);
    assert_eq!(manager.available_slots(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_failed_promotion_reported_on_original_channel() {
    let (manager, _store) = memory_manager(test_config(1));
    let a = MockDownloader::new("a");
    let a_handle = manager.start_download(a.clone(), 1).await.unwrap();
    let b_handle = manager
        .start_download(MockDownloader::failing("b"), 1)
        .await
        .unwrap();

    a.finish();
    a_handle.wait().await.unwrap();

    let err = b_handle.wait().await.unwrap_err();
    assert!(matches!(err, ReelError::StartFailed { .. }));
    wait_for(|| manager.available_slots() == 1).await;
}

#[tokio::test(start_paused = true)]
async fn test_resume_download() {
    let (manager, store) = memory_manager(test_config(2));
    let movie_id = store.create_movie(&NewMovie::new("Resumed")).await.unwrap();

    let mock = MockDownloader::new("Resumed");
    let handle = manager.resume_download(movie_id, mock.clone(), 1).await.unwrap();
    assert_eq!(handle.movie_id, movie_id);
    assert!(manager.is_active(movie_id).await);

    let again = manager
        .resume_download(movie_id, MockDownloader::new("Resumed"), 1)
        .await;
    assert!(matches!(again, Err(ReelError::InvalidState(_))));

    let missing = manager
        .resume_download(movie_id + 100, MockDownloader::new("Ghost"), 1)
        .await;
    assert!(matches!(missing, Err(ReelError::RecordNotFound(_))));

    mock.finish();
    handle.wait().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_fails_queue_and_stops_active() {
    let (manager, _store) = memory_manager(test_config(1));
    let a = MockDownloader::new("a");
    let a_handle = manager.start_download(a.clone(), 1).await.unwrap();
    let b_handle = manager
        .start_download(MockDownloader::new("b"), 1)
        .await
        .unwrap();

    manager.shutdown().await;

    assert!(a_handle.wait().await.unwrap_err().is_stop());
    assert!(matches!(b_handle.wait().await, Err(ReelError::Shutdown)));
    assert!(matches!(
        manager.start_download(MockDownloader::new("c"), 1).await,
        Err(ReelError::Shutdown)
    ));
}

#[tokio::test]
async fn test_progress_persisted_to_sqlite() {
    let db = Arc::new(Database::new_in_memory().await.unwrap());
    let manager = DownloadManager::new(test_config(1), db.clone(), Arc::new(NoConversion)).unwrap();

    let mock = MockDownloader::new("Persisted");
    let mut handle = manager.start_download(mock.clone(), 1).await.unwrap();

    mock.progress(42.5).await;
    assert_eq!(handle.progress.recv().await, Some(42.5));
    let movie = db.get_movie(handle.movie_id).await.unwrap().unwrap();
    assert_eq!(movie.downloaded_percentage, 42.5);
    assert_eq!(movie.name, "Persisted");
    assert!(!movie.is_loaded);

    mock.finish();
    handle.wait().await.unwrap();

    let movie = db.get_movie(movie.id).await.unwrap().unwrap();
    assert!(movie.is_loaded);
}
