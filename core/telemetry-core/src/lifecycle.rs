//! Installs the tracker/publisher pair matching the current opt-in state and
//! swaps them when that state changes.
//!
//! Deliberately not a hidden global: a host constructs one `Lifecycle` and
//! owns it for the life of the process (or, in a test, for the life of one
//! scenario), calling [`Lifecycle::reset`] between scenarios instead of
//! relying on process-wide static state.

use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use crate::date_provider::{DateProvider, SystemDateProvider};
use crate::logger::{Logger, TracingLogger};
use crate::publisher::{ActivePublisher, NullPublisher, Publisher};
use crate::scheduler::Scheduler;
use crate::settings::{Settings, SettingsCache};
use crate::tracker::{JournalingTracker, NullTracker, Tracker};

struct Installed {
    tracker: Arc<dyn Tracker>,
    publisher: Arc<dyn Publisher>,
}

fn placeholder() -> Installed {
    Installed {
        tracker: Arc::new(NullTracker),
        publisher: Arc::new(NullPublisher),
    }
}

/// Owns the current tracker/publisher pair and the settings cache they share.
pub struct Lifecycle {
    spool_dir: PathBuf,
    settings_path: PathBuf,
    legacy_uid_path: Option<PathBuf>,
    settings: Arc<SettingsCache>,
    date_provider: Arc<dyn DateProvider>,
    installed: Mutex<Installed>,
}

impl Lifecycle {
    pub fn new(spool_dir: PathBuf, settings_path: PathBuf, legacy_uid_path: Option<PathBuf>) -> Self {
        let settings = Arc::new(SettingsCache::new(settings_path.clone(), legacy_uid_path.clone()));
        Lifecycle {
            spool_dir,
            settings_path,
            legacy_uid_path,
            settings,
            date_provider: Arc::new(SystemDateProvider),
            installed: Mutex::new(placeholder()),
        }
    }

    pub fn with_date_provider(mut self, date_provider: Arc<dyn DateProvider>) -> Self {
        self.date_provider = date_provider;
        self
    }

    pub fn tracker(&self) -> Arc<dyn Tracker> {
        Arc::clone(&self.installed.lock().unwrap().tracker)
    }

    pub fn publisher(&self) -> Arc<dyn Publisher> {
        Arc::clone(&self.installed.lock().unwrap().publisher)
    }

    /// Loads or creates settings, persists a change to `optedIn` if needed,
    /// and installs the matching tracker variant.
    pub fn update_settings_and_tracker(
        &self,
        opt_in: bool,
        logger: Arc<dyn Logger>,
        scheduler: Arc<dyn Scheduler>,
    ) -> Settings {
        let mut settings = self.settings.get_instance(logger.as_ref());
        if settings.has_opted_in != opt_in {
            settings.has_opted_in = opt_in;
            if let Err(err) = self.settings.save(settings.clone()) {
                logger.error(&format!("failed to persist opt-in change: {err}"));
            }
        }

        {
            let mut installed = self.installed.lock().unwrap();
            installed.tracker.close();
            installed.tracker = self.build_tracker(opt_in, scheduler, logger);
        }

        settings
    }

    /// Installs the matching publisher variant. `debugDisablePublishing`
    /// behaves like an opt-out for publisher selection only.
    pub fn update_publisher(
        &self,
        logger: Arc<dyn Logger>,
        settings: &Settings,
        scheduler: Arc<dyn Scheduler>,
    ) {
        let publishing_enabled = settings.has_opted_in && !settings.debug_disable_publishing;

        let mut installed = self.installed.lock().unwrap();
        installed.publisher.close();
        installed.publisher = if publishing_enabled {
            Arc::new(ActivePublisher::new(
                self.spool_dir.clone(),
                Arc::clone(&self.settings),
                scheduler,
                Arc::clone(&self.date_provider),
                logger,
            ))
        } else {
            Arc::new(NullPublisher)
        };
    }

    fn build_tracker(
        &self,
        opted_in: bool,
        scheduler: Arc<dyn Scheduler>,
        logger: Arc<dyn Logger>,
    ) -> Arc<dyn Tracker> {
        if !opted_in {
            return Arc::new(NullTracker);
        }

        match JournalingTracker::new(
            self.spool_dir.clone(),
            scheduler,
            Arc::clone(&self.date_provider),
            Arc::clone(&logger),
        ) {
            Ok(tracker) => Arc::new(tracker),
            Err(err) => {
                logger.error(&format!("failed to install journaling tracker: {err}"));
                Arc::new(NullTracker)
            }
        }
    }

    /// Tears down the current tracker/publisher pair and restores the
    /// initial Null/Null state with a fresh settings cache, so the next test
    /// scenario starts clean.
    pub fn reset(&self) {
        let mut installed = self.installed.lock().unwrap();
        installed.tracker.close();
        installed.publisher.close();
        *installed = placeholder();
    }

    pub fn settings_snapshot(&self, logger: &dyn Logger) -> Settings {
        self.settings.get_instance(logger)
    }
}
