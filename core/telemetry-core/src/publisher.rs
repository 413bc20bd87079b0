//! Periodic spool-directory scanner and HTTPS uploader.

use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use telemetry_protocol::{
    ClientInfo, ClientType, LogRequest, LogRequestEvent, MetaMetricsPayload, LOG_SOURCE,
};

use crate::date_provider::DateProvider;
use crate::error::{AnalyticsError, Result};
use crate::fs_lock::{self, LockAttempt};
use crate::logger::Logger;
use crate::scheduler::{ScheduledHandle, Scheduler};
use crate::settings::SettingsCache;

pub const DEFAULT_SERVER_URL: &str = "https://play.google.com/log?format=raw";
const DEFAULT_PUBLISH_INTERVAL: Duration = Duration::from_secs(10 * 60);
const MAX_BACKOFF: Duration = Duration::from_secs(24 * 60 * 60);

/// Outcome of one POST attempt against the collector.
pub struct UploadResponse {
    pub status: u16,
    pub message: String,
}

/// Host-facing connection seam. The default implementation opens a real
/// HTTPS connection via `ureq`; tests substitute a stub.
pub trait ConnectionFactory: Send + Sync {
    fn post(&self, url: &str, body: &[u8]) -> std::result::Result<UploadResponse, String>;
}

const UPLOAD_TIMEOUT_MS: u64 = 15_000;

/// Talks to `serverUrl` over HTTPS using `ureq`.
pub struct UreqConnectionFactory {
    agent: ureq::Agent,
}

impl UreqConnectionFactory {
    pub fn new() -> Self {
        let config = ureq::Agent::config_builder()
            .timeout_global(Some(Duration::from_millis(UPLOAD_TIMEOUT_MS)))
            .build();
        UreqConnectionFactory {
            agent: config.into(),
        }
    }
}

impl Default for UreqConnectionFactory {
    fn default() -> Self {
        Self::new()
    }
}

impl ConnectionFactory for UreqConnectionFactory {
    fn post(&self, url: &str, body: &[u8]) -> std::result::Result<UploadResponse, String> {
        match self.agent.post(url).send(body) {
            Ok(mut response) => {
                let status = response.status().as_u16();
                let message = response.body_mut().read_to_string().unwrap_or_default();
                Ok(UploadResponse { status, message })
            }
            Err(err) => Err(err.to_string()),
        }
    }
}

/// Host-facing publisher contract shared by the active and no-op variants.
pub trait Publisher: Send + Sync {
    fn close(&self);
}

struct Counters {
    bytes_sent_in_last_publish: u64,
    failed_connections: u32,
    failed_server_replies: u32,
    backoff_ratio: u32,
}

struct State {
    server_url: String,
    publish_interval: Duration,
    schedule_version: u64,
    timeout_handle: Option<ScheduledHandle>,
    connection_factory: Arc<dyn ConnectionFactory>,
    logger: Arc<dyn Logger>,
    counters: Counters,
    closed: bool,
}

struct Inner {
    spool_dir: PathBuf,
    settings: Arc<SettingsCache>,
    scheduler: Arc<dyn Scheduler>,
    date_provider: Arc<dyn DateProvider>,
    client_info: ClientInfo,
    start_time_ms: i64,
    state: Mutex<State>,
}

/// Scans the spool directory on a schedule, uploads completed files, deletes
/// them on success, and backs off exponentially on failure.
pub struct ActivePublisher {
    inner: Arc<Inner>,
}

impl ActivePublisher {
    pub fn new(
        spool_dir: PathBuf,
        settings: Arc<SettingsCache>,
        scheduler: Arc<dyn Scheduler>,
        date_provider: Arc<dyn DateProvider>,
        logger: Arc<dyn Logger>,
    ) -> Self {
        let user_id = settings.user_id().unwrap_or_default();
        let client_info = ClientInfo {
            os_name: std::env::consts::OS.to_string(),
            os_major_version: os_major_version(),
            os_full_version: os_full_version(),
            client_type: ClientType::Desktop,
            logging_id: user_id,
        };

        let start_time_ms = date_provider.now_ms();

        let inner = Arc::new(Inner {
            spool_dir,
            settings,
            scheduler,
            date_provider,
            client_info,
            start_time_ms,
            state: Mutex::new(State {
                server_url: DEFAULT_SERVER_URL.to_string(),
                publish_interval: DEFAULT_PUBLISH_INTERVAL,
                schedule_version: 0,
                timeout_handle: None,
                connection_factory: Arc::new(UreqConnectionFactory::new()),
                logger,
                counters: Counters {
                    bytes_sent_in_last_publish: 0,
                    failed_connections: 0,
                    failed_server_replies: 0,
                    backoff_ratio: 1,
                },
                closed: false,
            }),
        });

        {
            let mut state = inner.state.lock().unwrap();
            let interval = state.publish_interval;
            arm_next_publish(&inner, &mut state, interval);
        }

        ActivePublisher { inner }
    }

    pub fn set_publish_interval(&self, interval: Duration) {
        let mut state = self.inner.state.lock().unwrap();
        state.publish_interval = interval;
        arm_next_publish(&self.inner, &mut state, interval);
    }

    /// Validates `url` as an `http`/`https` URL before installing it. A
    /// malformed URL supplied by the host is a programmer error (§7
    /// `ConfigError`), not a network failure, so it is rejected here rather
    /// than left to surface later as an ordinary connection failure that
    /// would otherwise feed the backoff/retry loop forever.
    pub fn set_server_url(&self, url: impl Into<String>) -> Result<()> {
        let url = url.into();
        let parsed = url::Url::parse(&url)
            .map_err(|err| AnalyticsError::Config(format!("malformed server URL {url}: {err}")))?;
        if parsed.scheme() != "http" && parsed.scheme() != "https" {
            return Err(AnalyticsError::Config(format!(
                "server URL must use http or https, got {url}"
            )));
        }

        self.inner.state.lock().unwrap().server_url = url;
        Ok(())
    }

    pub fn set_create_connection(&self, factory: Arc<dyn ConnectionFactory>) {
        self.inner.state.lock().unwrap().connection_factory = factory;
    }

    pub fn set_logger(&self, logger: Arc<dyn Logger>) {
        self.inner.state.lock().unwrap().logger = logger;
    }

    fn run_publish_cycle(inner: Arc<Inner>, version: u64) {
        {
            let state = inner.state.lock().unwrap();
            if state.closed || state.schedule_version != version {
                return;
            }
        }

        let entries = match fs::read_dir(&inner.spool_dir) {
            Ok(entries) => entries,
            Err(err) => {
                inner
                    .state
                    .lock()
                    .unwrap()
                    .logger
                    .warning(&format!("spool directory scan failed: {err}"));
                Self::reschedule(&inner, version, false);
                return;
            }
        };

        let mut paths: Vec<PathBuf> = entries
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.path())
            .filter(|path| path.extension().map(|ext| ext == "trk").unwrap_or(false))
            .collect();
        paths.sort();

        let mut hard_failure = false;
        for path in paths {
            if !Self::try_publish(&inner, &path) {
                hard_failure = true;
                break;
            }
        }

        Self::reschedule(&inner, version, hard_failure);
    }

    fn reschedule(inner: &Arc<Inner>, version: u64, failed: bool) {
        let mut state = inner.state.lock().unwrap();
        if state.closed || state.schedule_version != version {
            return;
        }
        if !failed {
            state.counters.backoff_ratio = 1;
        }
        let delay = std::cmp::min(
            state.publish_interval * state.counters.backoff_ratio,
            MAX_BACKOFF,
        );
        arm_same_version(inner, &mut state, version, delay);
    }

    /// Returns `false` to abort the cycle (a hard failure occurred on this
    /// file); `true` to continue scanning the rest of the directory.
    fn try_publish(inner: &Arc<Inner>, path: &Path) -> bool {
        let file = match OpenOptions::new().read(true).write(true).open(path) {
            Ok(file) => file,
            Err(_) => return true,
        };

        match fs_lock::try_lock_exclusive(&file) {
            Ok(LockAttempt::Acquired) => {}
            Ok(LockAttempt::Contended) => return true,
            Err(_) => return true,
        }

        let mut reader = &file;
        let records = match telemetry_protocol::read_all_events(&mut reader) {
            Ok(records) => records,
            Err(err) => {
                inner
                    .state
                    .lock()
                    .unwrap()
                    .logger
                    .error(&format!("spool file {} is corrupt: {err}", path.display()));
                let _ = fs_lock::unlock(&file);
                drop(file);
                let _ = fs::remove_file(path);
                return true;
            }
        };

        if records.is_empty() {
            let _ = fs_lock::unlock(&file);
            drop(file);
            let _ = fs::remove_file(path);
            return true;
        }

        let now_ms = inner.date_provider.now_ms();
        let (bytes_sent, failed_connections, failed_server_replies) = {
            let state = inner.state.lock().unwrap();
            (
                state.counters.bytes_sent_in_last_publish,
                state.counters.failed_connections,
                state.counters.failed_server_replies,
            )
        };
        let Ok(meta_event) = MetaMetricsPayload::new(
            bytes_sent,
            failed_connections,
            failed_server_replies,
        )
        .into_log_event(now_ms) else {
            let _ = fs_lock::unlock(&file);
            return true;
        };

        let mut log_events: Vec<LogRequestEvent> = Vec::with_capacity(records.len() + 1);
        log_events.push(meta_event.into());
        log_events.extend(records.into_iter().map(LogRequestEvent::from));

        let request = LogRequest {
            client_info: inner.client_info.clone(),
            log_source: LOG_SOURCE.to_string(),
            request_time_ms: now_ms,
            request_uptime_ms: now_ms - inner.start_time_ms,
            log_events,
        };

        let body = match serde_json::to_vec(&request) {
            Ok(body) => body,
            Err(err) => {
                inner
                    .state
                    .lock()
                    .unwrap()
                    .logger
                    .error(&format!("failed to serialize log request: {err}"));
                let _ = fs_lock::unlock(&file);
                return false;
            }
        };

        let (url, factory) = {
            let state = inner.state.lock().unwrap();
            (state.server_url.clone(), Arc::clone(&state.connection_factory))
        };

        let outcome = factory.post(&url, &body);
        let mut state = inner.state.lock().unwrap();
        state.counters.bytes_sent_in_last_publish = body.len() as u64;

        match outcome {
            Ok(response) if (200..300).contains(&response.status) => {
                state.counters.failed_connections = 0;
                state.counters.failed_server_replies = 0;
                state.counters.backoff_ratio = 1;
                drop(state);
                let _ = fs_lock::unlock(&file);
                drop(file);
                let _ = fs::remove_file(path);
                true
            }
            Ok(response) => {
                state.counters.failed_server_replies += 1;
                state.counters.backoff_ratio = state.counters.backoff_ratio.saturating_mul(2);
                state
                    .logger
                    .warning(&format!("collector returned status {}: {}", response.status, response.message));
                drop(state);
                let _ = fs_lock::unlock(&file);
                false
            }
            Err(message) => {
                state.counters.failed_connections += 1;
                state.counters.backoff_ratio = state.counters.backoff_ratio.saturating_mul(2);
                state.logger.warning(&format!("upload failed: {message}"));
                drop(state);
                let _ = fs_lock::unlock(&file);
                false
            }
        }
    }
}

impl Publisher for ActivePublisher {
    fn close(&self) {
        let mut state = self.inner.state.lock().unwrap();
        state.closed = true;
        state.schedule_version += 1;
        state.timeout_handle = None;
    }
}

fn arm_next_publish(inner: &Arc<Inner>, state: &mut State, delay: Duration) {
    state.schedule_version += 1;
    let version = state.schedule_version;
    arm_same_version(inner, state, version, delay);
}

fn arm_same_version(inner: &Arc<Inner>, state: &mut State, version: u64, delay: Duration) {
    let inner_clone = Arc::clone(inner);
    let handle = inner
        .scheduler
        .schedule(Box::new(move || ActivePublisher::run_publish_cycle(inner_clone, version)), delay);
    state.timeout_handle = Some(handle);
}

fn os_major_version() -> String {
    sysinfo::System::os_version()
        .and_then(|v| v.split('.').next().map(str::to_string))
        .unwrap_or_else(|| "unknown".to_string())
}

fn os_full_version() -> String {
    sysinfo::System::os_version().unwrap_or_else(|| "unknown".to_string())
}

/// No-op publisher installed while the user has opted out or publishing is
/// disabled via debug override.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullPublisher;

impl Publisher for NullPublisher {
    fn close(&self) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::date_provider::VirtualDateProvider;
    use crate::logger::TracingLogger;
    use crate::scheduler::VirtualScheduler;
    use std::sync::atomic::{AtomicU32, Ordering};
    use telemetry_protocol::{write_event, LogEvent};

    struct StubFactory {
        status: u16,
        calls: AtomicU32,
    }

    impl ConnectionFactory for StubFactory {
        fn post(&self, _url: &str, _body: &[u8]) -> std::result::Result<UploadResponse, String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(UploadResponse {
                status: self.status,
                message: String::new(),
            })
        }
    }

    struct UnreachableFactory;
    impl ConnectionFactory for UnreachableFactory {
        fn post(&self, _url: &str, _body: &[u8]) -> std::result::Result<UploadResponse, String> {
            Err("connection refused".to_string())
        }
    }

    fn write_completed_file(dir: &Path, events: &[&[u8]]) -> PathBuf {
        let path = dir.join(format!("{}.trk", uuid::Uuid::new_v4()));
        let mut file = File::create(&path).unwrap();
        for (i, payload) in events.iter().enumerate() {
            write_event(&mut file, &LogEvent::new(i as i64, payload.to_vec())).unwrap();
        }
        path
    }

    #[test]
    fn successful_publish_sends_one_request_and_clears_spool() {
        let dir = tempfile::tempdir().unwrap();
        write_completed_file(dir.path(), &[b"E"]);

        let settings = Arc::new(SettingsCache::new(dir.path().join("settings"), None));
        settings.get_instance(&TracingLogger);
        let scheduler = Arc::new(VirtualScheduler::new());
        let date_provider = VirtualDateProvider::new(0);

        let publisher = ActivePublisher::new(
            dir.path().to_path_buf(),
            settings,
            Arc::clone(&scheduler) as Arc<dyn Scheduler>,
            date_provider,
            Arc::new(TracingLogger),
        );

        let stub = Arc::new(StubFactory {
            status: 200,
            calls: AtomicU32::new(0),
        });
        publisher.set_create_connection(stub.clone());

        scheduler.advance(Duration::from_secs(10 * 60));

        assert_eq!(stub.calls.load(Ordering::SeqCst), 1);
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 1); // settings file only
        publisher.close();
    }

    #[test]
    fn connection_failure_backs_off_and_keeps_file() {
        let dir = tempfile::tempdir().unwrap();
        write_completed_file(dir.path(), &[b"E"]);

        let settings = Arc::new(SettingsCache::new(dir.path().join("settings"), None));
        settings.get_instance(&TracingLogger);
        let scheduler = Arc::new(VirtualScheduler::new());
        let date_provider = VirtualDateProvider::new(0);

        let publisher = ActivePublisher::new(
            dir.path().to_path_buf(),
            settings,
            Arc::clone(&scheduler) as Arc<dyn Scheduler>,
            date_provider,
            Arc::new(TracingLogger),
        );
        publisher.set_create_connection(Arc::new(UnreachableFactory));

        scheduler.advance(Duration::from_secs(10 * 60));
        let trk_files: Vec<_> = fs::read_dir(dir.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.path().extension().map(|x| x == "trk").unwrap_or(false))
            .collect();
        assert_eq!(trk_files.len(), 1, "file is retained after a connection failure");

        let stub = Arc::new(StubFactory {
            status: 200,
            calls: AtomicU32::new(0),
        });
        publisher.set_create_connection(stub.clone());
        scheduler.advance(Duration::from_secs(20 * 60));
        assert_eq!(stub.calls.load(Ordering::SeqCst), 1);
        publisher.close();
    }

    #[test]
    fn empty_completed_file_is_deleted_without_a_request() {
        let dir = tempfile::tempdir().unwrap();
        write_completed_file(dir.path(), &[]);

        let settings = Arc::new(SettingsCache::new(dir.path().join("settings"), None));
        settings.get_instance(&TracingLogger);
        let scheduler = Arc::new(VirtualScheduler::new());
        let date_provider = VirtualDateProvider::new(0);

        let publisher = ActivePublisher::new(
            dir.path().to_path_buf(),
            settings,
            Arc::clone(&scheduler) as Arc<dyn Scheduler>,
            date_provider,
            Arc::new(TracingLogger),
        );
        let stub = Arc::new(StubFactory {
            status: 200,
            calls: AtomicU32::new(0),
        });
        publisher.set_create_connection(stub.clone());

        scheduler.advance(Duration::from_secs(10 * 60));
        assert_eq!(stub.calls.load(Ordering::SeqCst), 0);
        let trk_files = fs::read_dir(dir.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.path().extension().map(|x| x == "trk").unwrap_or(false))
            .count();
        assert_eq!(trk_files, 0);
        publisher.close();
    }

    #[test]
    fn close_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let settings = Arc::new(SettingsCache::new(dir.path().join("settings"), None));
        let scheduler: Arc<dyn Scheduler> = Arc::new(VirtualScheduler::new());
        let publisher = ActivePublisher::new(
            dir.path().to_path_buf(),
            settings,
            scheduler,
            VirtualDateProvider::new(0),
            Arc::new(TracingLogger),
        );
        publisher.close();
        publisher.close();
    }

    #[test]
    fn set_server_url_accepts_https_and_rejects_malformed_or_non_http() {
        let dir = tempfile::tempdir().unwrap();
        let settings = Arc::new(SettingsCache::new(dir.path().join("settings"), None));
        let scheduler: Arc<dyn Scheduler> = Arc::new(VirtualScheduler::new());
        let publisher = ActivePublisher::new(
            dir.path().to_path_buf(),
            settings,
            scheduler,
            VirtualDateProvider::new(0),
            Arc::new(TracingLogger),
        );

        publisher
            .set_server_url("https://example.com/log")
            .unwrap();

        assert!(matches!(
            publisher.set_server_url("not a url"),
            Err(AnalyticsError::Config(_))
        ));
        assert!(matches!(
            publisher.set_server_url("ftp://example.com/log"),
            Err(AnalyticsError::Config(_))
        ));
    }
}
