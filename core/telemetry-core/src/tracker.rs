//! Durable, rotating spool writer.
//!
//! [`JournalingTracker`] owns exactly one active `.trk` file at a time,
//! appending length-delimited records to it under an OS exclusive lock, and
//! rotating to a fresh file by size or elapsed time. [`NullTracker`] is the
//! opted-out twin: same interface, touches neither disk nor scheduler.

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use telemetry_protocol::LogEvent;
use uuid::Uuid;

use crate::date_provider::DateProvider;
use crate::error::{AnalyticsError, Result};
use crate::fs_lock::{self, LockAttempt};
use crate::logger::Logger;
use crate::scheduler::{ScheduledHandle, Scheduler};

/// Host-facing tracker contract shared by the active and no-op variants.
pub trait Tracker: Send + Sync {
    fn log(&self, payload: Vec<u8>) -> Result<()>;
    fn close(&self);
}

struct State {
    active_file: Option<File>,
    active_path: Option<PathBuf>,
    current_count: u64,
    max_size: u64,
    max_time_nanos: i64,
    schedule_version: u64,
    timeout_handle: Option<ScheduledHandle>,
    closed: bool,
}

struct Inner {
    spool_dir: PathBuf,
    scheduler: Arc<dyn Scheduler>,
    date_provider: Arc<dyn DateProvider>,
    logger: Arc<dyn Logger>,
    state: Mutex<State>,
}

/// Accepts events, writes them length-delimited to a locked active spool
/// file, and rotates by size or elapsed time.
pub struct JournalingTracker {
    inner: Arc<Inner>,
}

impl JournalingTracker {
    pub fn new(
        spool_dir: PathBuf,
        scheduler: Arc<dyn Scheduler>,
        date_provider: Arc<dyn DateProvider>,
        logger: Arc<dyn Logger>,
    ) -> Result<Self> {
        fs_err::create_dir_all(&spool_dir)
            .map_err(|err| AnalyticsError::io(format!("create {}", spool_dir.display()), err))?;

        let mut state = State {
            active_file: None,
            active_path: None,
            current_count: 0,
            max_size: 0,
            max_time_nanos: 0,
            schedule_version: 0,
            timeout_handle: None,
            closed: false,
        };
        rotate_in_locked(&spool_dir, &mut state)?;

        let inner = Arc::new(Inner {
            spool_dir,
            scheduler,
            date_provider,
            logger,
            state: Mutex::new(state),
        });

        Ok(JournalingTracker { inner })
    }

    pub fn set_max_journal_size(&self, max_size: u64) {
        self.inner.state.lock().unwrap().max_size = max_size;
    }

    pub fn set_max_journal_time(&self, duration: Duration) {
        let mut state = self.inner.state.lock().unwrap();
        state.max_time_nanos = duration.as_nanos() as i64;
        arm_new_timeout(&self.inner, &mut state);
    }

    fn fire_timeout(inner: Arc<Inner>, version: u64) {
        let mut state = inner.state.lock().unwrap();
        if state.closed || state.schedule_version != version {
            return;
        }

        if state.current_count > 0 {
            if let Err(err) = rotate_out_locked(&mut state) {
                inner.logger.error(&format!("timeout rotate-out failed: {err}"));
            }
            if let Err(err) = rotate_in_locked(&inner.spool_dir, &mut state) {
                inner.logger.error(&format!("timeout rotate-in failed: {err}"));
            }
        }

        if state.schedule_version == version && state.max_time_nanos > 0 {
            reschedule_same_timeout(&inner, &mut state, version);
        }
    }
}

impl Tracker for JournalingTracker {
    fn log(&self, payload: Vec<u8>) -> Result<()> {
        {
            let state = self.inner.state.lock().unwrap();
            if state.closed {
                return Err(AnalyticsError::State("log called after close".to_string()));
            }
        }

        let inner = Arc::clone(&self.inner);
        self.inner.scheduler.submit(Box::new(move || {
            let mut state = inner.state.lock().unwrap();
            if state.closed {
                return;
            }

            let event_time_ms = inner.date_provider.now_ms();
            let event = LogEvent::new(event_time_ms, payload);

            match write_event_locked(&mut state, &event) {
                Ok(()) => {
                    state.current_count += 1;
                    if state.max_size > 0 && state.current_count >= state.max_size {
                        if let Err(err) = rotate_out_locked(&mut state) {
                            inner.logger.error(&format!("size rotate-out failed: {err}"));
                        }
                        if let Err(err) = rotate_in_locked(&inner.spool_dir, &mut state) {
                            inner.logger.error(&format!("size rotate-in failed: {err}"));
                        }
                        if state.timeout_handle.is_some() {
                            arm_new_timeout(&inner, &mut state);
                        }
                    }
                }
                Err(err) => {
                    // Spool writes never retry: a write failure here is a
                    // fatal condition for this tracker instance.
                    panic!("fatal spool write failure: {err}");
                }
            }
        }));

        Ok(())
    }

    fn close(&self) {
        let mut state = self.inner.state.lock().unwrap();
        if state.closed {
            return;
        }
        state.closed = true;
        state.schedule_version += 1;
        state.timeout_handle = None;
        if let Err(err) = rotate_out_locked(&mut state) {
            self.inner.logger.error(&format!("close rotate-out failed: {err}"));
        }
    }
}

fn arm_new_timeout(inner: &Arc<Inner>, state: &mut State) {
    state.schedule_version += 1;
    state.timeout_handle = None;
    if state.max_time_nanos <= 0 || state.closed {
        return;
    }
    let version = state.schedule_version;
    let delay = Duration::from_nanos(state.max_time_nanos as u64);
    let inner_clone = Arc::clone(inner);
    let handle = inner
        .scheduler
        .schedule(Box::new(move || JournalingTracker::fire_timeout(inner_clone, version)), delay);
    state.timeout_handle = Some(handle);
}

fn reschedule_same_timeout(inner: &Arc<Inner>, state: &mut State, version: u64) {
    let delay = Duration::from_nanos(state.max_time_nanos as u64);
    let inner_clone = Arc::clone(inner);
    let handle = inner
        .scheduler
        .schedule(Box::new(move || JournalingTracker::fire_timeout(inner_clone, version)), delay);
    state.timeout_handle = Some(handle);
}

fn rotate_in_locked(spool_dir: &PathBuf, state: &mut State) -> Result<()> {
    let path = spool_dir.join(format!("{}.trk", Uuid::new_v4()));
    let file = OpenOptions::new()
        .create(true)
        .read(true)
        .write(true)
        .open(&path)
        .map_err(|err| AnalyticsError::io(format!("open {}", path.display()), err))?;

    match fs_lock::try_lock_exclusive(&file)
        .map_err(|err| AnalyticsError::io(format!("lock {}", path.display()), err))?
    {
        LockAttempt::Acquired => {}
        LockAttempt::Contended => return Err(AnalyticsError::contention(&path)),
    }

    state.active_file = Some(file);
    state.active_path = Some(path);
    state.current_count = 0;
    Ok(())
}

fn rotate_out_locked(state: &mut State) -> Result<()> {
    if let Some(file) = state.active_file.take() {
        let path = state.active_path.take();
        fs_lock::unlock(&file).map_err(|err| {
            AnalyticsError::io(
                format!("unlock {}", path.as_ref().map(|p| p.display().to_string()).unwrap_or_default()),
                err,
            )
        })?;
    }
    Ok(())
}

fn write_event_locked(state: &mut State, event: &LogEvent) -> Result<()> {
    let path_display = state
        .active_path
        .as_ref()
        .map(|p| p.display().to_string())
        .unwrap_or_default();
    let file = state
        .active_file
        .as_mut()
        .expect("an active file is always open while the tracker is not closed");

    telemetry_protocol::write_event(file, event)
        .map_err(|err| AnalyticsError::io(format!("write {path_display}"), err))?;
    file.flush()
        .map_err(|err| AnalyticsError::io(format!("flush {path_display}"), err))?;
    file.sync_all()
        .map_err(|err| AnalyticsError::io(format!("fsync {path_display}"), err))?;
    Ok(())
}

/// Accepts and discards events; installed while the user has not opted in.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullTracker;

impl Tracker for NullTracker {
    fn log(&self, _payload: Vec<u8>) -> Result<()> {
        Ok(())
    }

    fn close(&self) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::date_provider::SystemDateProvider;
    use crate::logger::TracingLogger;
    use crate::scheduler::VirtualScheduler;
    use telemetry_protocol::read_all_events;
    use std::fs;

    fn completed_files(dir: &std::path::Path) -> Vec<PathBuf> {
        fs::read_dir(dir)
            .unwrap()
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.path())
            .filter(|p| p.extension().map(|e| e == "trk").unwrap_or(false))
            .filter(|p| {
                let file = File::open(p).unwrap();
                matches!(
                    fs_lock::try_lock_exclusive(&file).unwrap(),
                    LockAttempt::Acquired
                )
            })
            .collect()
    }

    #[test]
    fn basic_write_and_close_produces_one_completed_file() {
        let dir = tempfile::tempdir().unwrap();
        let scheduler = Arc::new(VirtualScheduler::new());
        let tracker = JournalingTracker::new(
            dir.path().to_path_buf(),
            Arc::clone(&scheduler) as Arc<dyn Scheduler>,
            Arc::new(SystemDateProvider),
            Arc::new(TracingLogger),
        )
        .unwrap();

        tracker.log(b"E".to_vec()).unwrap();
        scheduler.advance(Duration::from_millis(0));

        tracker.close();
        let completed = completed_files(dir.path());
        assert_eq!(completed.len(), 1);
        let events = read_all_events(&mut File::open(&completed[0]).unwrap()).unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].payload, b"E".to_vec());
    }

    #[test]
    fn size_rotation_splits_into_expected_batches() {
        let dir = tempfile::tempdir().unwrap();
        let scheduler = Arc::new(VirtualScheduler::new());
        let tracker = JournalingTracker::new(
            dir.path().to_path_buf(),
            Arc::clone(&scheduler) as Arc<dyn Scheduler>,
            Arc::new(SystemDateProvider),
            Arc::new(TracingLogger),
        )
        .unwrap();
        tracker.set_max_journal_size(3);

        for payload in [b"E1".to_vec(), b"E2".to_vec()] {
            tracker.log(payload).unwrap();
        }
        scheduler.advance(Duration::from_millis(0));
        assert_eq!(completed_files(dir.path()).len(), 0);

        tracker.log(b"E3".to_vec()).unwrap();
        scheduler.advance(Duration::from_millis(0));
        assert_eq!(completed_files(dir.path()).len(), 1);

        for payload in [b"E4".to_vec(), b"E5".to_vec()] {
            tracker.log(payload).unwrap();
        }
        scheduler.advance(Duration::from_millis(0));
        tracker.close();
        assert_eq!(completed_files(dir.path()).len(), 2);
    }

    #[test]
    fn idle_timeout_with_zero_events_creates_no_completed_file() {
        let dir = tempfile::tempdir().unwrap();
        let scheduler = Arc::new(VirtualScheduler::new());
        let tracker = JournalingTracker::new(
            dir.path().to_path_buf(),
            Arc::clone(&scheduler) as Arc<dyn Scheduler>,
            Arc::new(SystemDateProvider),
            Arc::new(TracingLogger),
        )
        .unwrap();
        tracker.set_max_journal_time(Duration::from_secs(60));

        scheduler.advance(Duration::from_secs(60));
        assert_eq!(completed_files(dir.path()).len(), 0);
    }

    #[test]
    fn null_tracker_never_touches_disk() {
        let tracker = NullTracker;
        tracker.log(b"anything".to_vec()).unwrap();
        tracker.close();
        tracker.close();
    }
}
