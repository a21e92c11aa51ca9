//! Capture session controller.
//!
//! A session runs on a dedicated OS thread: wait for a frame (bounded),
//! classify it, append the label, pace to the tick cadence, repeat until the
//! duration elapses or the session is cancelled. Cancellation is checked
//! between iterations only.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashSet;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use thiserror::Error;
use vigil_core::source::{ClassifierError, SourceError};
use vigil_core::{EmotionClassifier, EmotionRecord, EmotionSink, FramePoll, FrameSource, SessionId};

/// Reference observation window.
pub const DEFAULT_DURATION: Duration = Duration::from_secs(60);
pub const DEFAULT_TICK: Duration = Duration::from_millis(30);
pub const DEFAULT_FRAME_TIMEOUT: Duration = Duration::from_millis(250);

#[derive(Error, Debug)]
pub enum SessionError {
    #[error("a capture session is already running for subject {0}")]
    AlreadyRunning(String),
    #[error("no capture session is running")]
    NotRunning,
    #[error("failed to spawn capture thread: {0}")]
    Spawn(#[source] std::io::Error),
    #[error("capture thread exited without a report")]
    WorkerLost,
    #[error("active-subject registry lock poisoned")]
    RegistryPoisoned,
}

/// Why a running session stopped with [`SessionState::Failed`].
#[derive(Error, Debug)]
enum CaptureFault {
    #[error("frame source: {0}")]
    Source(#[from] SourceError),
    #[error("emotion classifier: {0}")]
    Classifier(#[from] ClassifierError),
    #[error("emotion log: {0}")]
    Log(#[source] Box<dyn std::error::Error + Send + Sync>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Idle,
    Running,
    Completed,
    Cancelled,
    Failed,
}

impl SessionState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            SessionState::Completed | SessionState::Cancelled | SessionState::Failed
        )
    }
}

/// Tick cadence and per-tick frame wait bound.
#[derive(Debug, Clone, Copy)]
pub struct CapturePolicy {
    pub tick: Duration,
    pub frame_timeout: Duration,
}

impl Default for CapturePolicy {
    fn default() -> Self {
        Self {
            tick: DEFAULT_TICK,
            frame_timeout: DEFAULT_FRAME_TIMEOUT,
        }
    }
}

/// Summary of a finished session.
#[derive(Debug, Clone, Serialize)]
pub struct SessionReport {
    pub session_id: SessionId,
    pub subject_id: String,
    pub state: SessionState,
    pub started_at: DateTime<Utc>,
    pub elapsed: Duration,
    /// Frames delivered by the source.
    pub frames: u64,
    /// Records appended to the log.
    pub records: u64,
    /// Frames in which the classifier found no face.
    pub no_face: u64,
    pub fault: Option<String>,
}

/// Subjects with a running session, shared by every controller that must
/// not observe the same subject concurrently.
#[derive(Clone, Default)]
pub struct ActiveSubjects(Arc<Mutex<HashSet<String>>>);

impl ActiveSubjects {
    pub fn is_active(&self, subject_id: &str) -> bool {
        self.0
            .lock()
            .map(|set| set.contains(subject_id))
            .unwrap_or(false)
    }

    fn claim(&self, subject_id: &str) -> Result<SubjectClaim, SessionError> {
        let mut set = self.0.lock().map_err(|_| SessionError::RegistryPoisoned)?;
        if !set.insert(subject_id.to_string()) {
            return Err(SessionError::AlreadyRunning(subject_id.to_string()));
        }
        Ok(SubjectClaim {
            registry: self.clone(),
            subject_id: subject_id.to_string(),
        })
    }
}

/// Held by the worker for the session's lifetime.
struct SubjectClaim {
    registry: ActiveSubjects,
    subject_id: String,
}

impl Drop for SubjectClaim {
    fn drop(&mut self) {
        if let Ok(mut set) = self.registry.0.lock() {
            set.remove(&self.subject_id);
        }
    }
}

/// Cross-thread handle for cancelling a running session.
#[derive(Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Owns the frame source for one session and releases it exactly once,
/// including during unwinding.
struct SourceGuard {
    source: Box<dyn FrameSource>,
    released: bool,
}

impl SourceGuard {
    fn new(source: Box<dyn FrameSource>) -> Self {
        Self {
            source,
            released: false,
        }
    }

    fn release(&mut self) {
        if !self.released {
            self.released = true;
            self.source.release();
            tracing::debug!("frame source released");
        }
    }
}

impl Drop for SourceGuard {
    fn drop(&mut self) {
        self.release();
    }
}

struct SessionContext {
    session_id: SessionId,
    subject_id: String,
    duration: Duration,
    policy: CapturePolicy,
    started: Instant,
    started_at: DateTime<Utc>,
    cancel: CancelToken,
}

impl SessionContext {
    /// Wall-clock start plus monotonic elapsed time, so timestamps never
    /// regress within a session.
    fn now(&self) -> DateTime<Utc> {
        let elapsed = chrono::Duration::from_std(self.started.elapsed())
            .unwrap_or_else(|_| chrono::Duration::zero());
        self.started_at + elapsed
    }
}

#[derive(Default)]
struct Counters {
    frames: u64,
    records: u64,
    no_face: u64,
}

/// Drives one observation window at a time over an external frame source.
pub struct CaptureController<S: EmotionSink + 'static> {
    sink: Arc<S>,
    policy: CapturePolicy,
    registry: ActiveSubjects,
    state: Arc<Mutex<SessionState>>,
    cancel: CancelToken,
    worker: Option<JoinHandle<SessionReport>>,
}

impl<S: EmotionSink + 'static> CaptureController<S> {
    pub fn new(sink: Arc<S>, policy: CapturePolicy) -> Self {
        Self::with_registry(sink, policy, ActiveSubjects::default())
    }

    /// Controller that shares `registry` with others, so two of them never
    /// run a session for the same subject at once.
    pub fn with_registry(sink: Arc<S>, policy: CapturePolicy, registry: ActiveSubjects) -> Self {
        Self {
            sink,
            policy,
            registry,
            state: Arc::new(Mutex::new(SessionState::Idle)),
            cancel: CancelToken::default(),
            worker: None,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
            .lock()
            .map(|s| *s)
            .unwrap_or(SessionState::Failed)
    }

    /// Token that cancels the current session from any thread.
    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    /// Begin observing `subject_id` for `duration`.
    ///
    /// The controller takes ownership of `source` and releases it when the
    /// session ends, or immediately if the session cannot start.
    pub fn start(
        &mut self,
        subject_id: &str,
        duration: Duration,
        source: Box<dyn FrameSource>,
        classifier: Box<dyn EmotionClassifier>,
    ) -> Result<SessionId, SessionError> {
        let mut guard = SourceGuard::new(source);

        if self.state() == SessionState::Running {
            return Err(SessionError::AlreadyRunning(subject_id.to_string()));
        }
        // Reap the previous, already finished, worker.
        if let Some(previous) = self.worker.take() {
            let _ = previous.join();
        }

        let claim = self.registry.claim(subject_id)?;

        self.cancel = CancelToken::default();
        let ctx = SessionContext {
            session_id: SessionId::new(),
            subject_id: subject_id.to_string(),
            duration,
            policy: self.policy,
            started: Instant::now(),
            started_at: Utc::now(),
            cancel: self.cancel.clone(),
        };
        let session_id = ctx.session_id;

        self.set_state(SessionState::Running);
        tracing::info!(
            subject = subject_id,
            session = %session_id,
            duration_secs = duration.as_secs_f64(),
            "capture session started"
        );

        let sink = Arc::clone(&self.sink);
        let state = Arc::clone(&self.state);

        // The guard moves into the worker; if spawning fails it is dropped
        // with the closure and the source is released there.
        let spawned = std::thread::Builder::new()
            .name("vigil-capture".into())
            .spawn(move || {
                let guard = &mut guard;
                let report = run_session(&ctx, guard, classifier, sink.as_ref());
                drop(claim);
                if let Ok(mut s) = state.lock() {
                    *s = report.state;
                }
                report
            });

        match spawned {
            Ok(handle) => {
                self.worker = Some(handle);
                Ok(session_id)
            }
            Err(e) => {
                self.set_state(SessionState::Failed);
                Err(SessionError::Spawn(e))
            }
        }
    }

    /// Request cancellation and wait for the worker to stop.
    pub fn cancel(&mut self) -> Result<SessionReport, SessionError> {
        if self.state() != SessionState::Running {
            return Err(SessionError::NotRunning);
        }
        self.cancel.cancel();
        self.wait()
    }

    /// Block until the current session ends and return its report.
    pub fn wait(&mut self) -> Result<SessionReport, SessionError> {
        let worker = self.worker.take().ok_or(SessionError::NotRunning)?;
        worker.join().map_err(|_| SessionError::WorkerLost)
    }

    fn set_state(&self, next: SessionState) {
        if let Ok(mut s) = self.state.lock() {
            *s = next;
        }
    }
}

/// Worker body: run the loop, release the source, build the report.
fn run_session<S: EmotionSink>(
    ctx: &SessionContext,
    guard: &mut SourceGuard,
    mut classifier: Box<dyn EmotionClassifier>,
    sink: &S,
) -> SessionReport {
    let mut counters = Counters::default();

    let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
        observe(ctx, guard.source.as_mut(), classifier.as_mut(), sink, &mut counters)
    }));

    // Release before the terminal state becomes observable.
    guard.release();

    let (state, fault) = match outcome {
        Ok(Ok(state)) => (state, None),
        Ok(Err(fault)) => (SessionState::Failed, Some(fault.to_string())),
        Err(payload) => {
            let msg = payload
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| payload.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "unknown panic".to_string());
            (SessionState::Failed, Some(format!("capture loop panicked: {msg}")))
        }
    };

    let report = SessionReport {
        session_id: ctx.session_id,
        subject_id: ctx.subject_id.clone(),
        state,
        started_at: ctx.started_at,
        elapsed: ctx.started.elapsed(),
        frames: counters.frames,
        records: counters.records,
        no_face: counters.no_face,
        fault,
    };

    match &report.fault {
        None => tracing::info!(
            subject = %report.subject_id,
            session = %report.session_id,
            state = ?report.state,
            frames = report.frames,
            records = report.records,
            no_face = report.no_face,
            "capture session finished"
        ),
        Some(fault) => tracing::warn!(
            subject = %report.subject_id,
            session = %report.session_id,
            fault = %fault,
            frames = report.frames,
            records = report.records,
            "capture session failed"
        ),
    }

    report
}

fn observe<S: EmotionSink>(
    ctx: &SessionContext,
    source: &mut dyn FrameSource,
    classifier: &mut dyn EmotionClassifier,
    sink: &S,
    counters: &mut Counters,
) -> Result<SessionState, CaptureFault> {
    loop {
        if ctx.cancel.is_cancelled() {
            return Ok(SessionState::Cancelled);
        }
        let elapsed = ctx.started.elapsed();
        if elapsed >= ctx.duration {
            return Ok(SessionState::Completed);
        }
        let remaining = ctx.duration - elapsed;
        let tick_start = Instant::now();

        match source.next_frame(ctx.policy.frame_timeout.min(remaining))? {
            FramePoll::Frame(frame) => {
                counters.frames += 1;
                match classifier.classify(&frame)? {
                    Some(label) => {
                        let record = EmotionRecord::new(ctx.subject_id.as_str(), ctx.now(), label)
                            .in_session(ctx.session_id);
                        sink.append(&record)
                            .map_err(|e| CaptureFault::Log(Box::new(e)))?;
                        counters.records += 1;
                    }
                    None => {
                        counters.no_face += 1;
                        tracing::trace!(seq = frame.sequence, "no face in frame");
                    }
                }
            }
            FramePoll::Pending => {
                tracing::debug!("no frame within timeout");
                continue;
            }
            FramePoll::EndOfStream => {
                tracing::warn!(
                    subject = %ctx.subject_id,
                    elapsed_secs = ctx.started.elapsed().as_secs_f64(),
                    "frame source ended before the observation window"
                );
                return Ok(SessionState::Completed);
            }
        }

        let spent = tick_start.elapsed();
        if let Some(rest) = ctx.policy.tick.checked_sub(spent) {
            let left = ctx.duration.saturating_sub(ctx.started.elapsed());
            std::thread::sleep(rest.min(left));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::convert::Infallible;
    use std::sync::atomic::AtomicUsize;
    use vigil_core::{EmotionLabel, Frame};

    struct TestSource {
        /// `None` streams forever.
        frames_left: Option<u32>,
        delay: Duration,
        seq: u32,
        released: Arc<AtomicUsize>,
    }

    impl TestSource {
        fn endless(released: &Arc<AtomicUsize>) -> Box<Self> {
            Box::new(Self {
                frames_left: None,
                delay: Duration::from_millis(2),
                seq: 0,
                released: Arc::clone(released),
            })
        }

        fn finite(n: u32, released: &Arc<AtomicUsize>) -> Box<Self> {
            let mut source = Self::endless(released);
            source.frames_left = Some(n);
            source
        }
    }

    impl FrameSource for TestSource {
        fn next_frame(&mut self, timeout: Duration) -> Result<FramePoll, SourceError> {
            if let Some(n) = self.frames_left {
                if n == 0 {
                    return Ok(FramePoll::EndOfStream);
                }
                self.frames_left = Some(n - 1);
            }
            std::thread::sleep(self.delay.min(timeout));
            self.seq += 1;
            Ok(FramePoll::Frame(Frame::new(vec![0; 4], 2, 2, self.seq)))
        }

        fn release(&mut self) {
            self.released.fetch_add(1, Ordering::SeqCst);
        }
    }

    /// Source that never delivers a frame.
    struct StalledSource(Arc<AtomicUsize>);

    impl FrameSource for StalledSource {
        fn next_frame(&mut self, timeout: Duration) -> Result<FramePoll, SourceError> {
            std::thread::sleep(timeout);
            Ok(FramePoll::Pending)
        }

        fn release(&mut self) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    struct FixedClassifier(Option<EmotionLabel>);

    impl EmotionClassifier for FixedClassifier {
        fn classify(&mut self, _frame: &Frame) -> Result<Option<EmotionLabel>, ClassifierError> {
            Ok(self.0)
        }
    }

    struct PanickingClassifier;

    impl EmotionClassifier for PanickingClassifier {
        fn classify(&mut self, _frame: &Frame) -> Result<Option<EmotionLabel>, ClassifierError> {
            panic!("model blew up");
        }
    }

    #[derive(Default)]
    struct MemorySink(Mutex<Vec<EmotionRecord>>);

    impl EmotionSink for MemorySink {
        type Error = Infallible;

        fn append(&self, record: &EmotionRecord) -> Result<(), Infallible> {
            self.0.lock().unwrap().push(record.clone());
            Ok(())
        }
    }

    #[derive(Debug, Error)]
    #[error("disk full")]
    struct DiskFull;

    struct FailingSink;

    impl EmotionSink for FailingSink {
        type Error = DiskFull;

        fn append(&self, _record: &EmotionRecord) -> Result<(), DiskFull> {
            Err(DiskFull)
        }
    }

    fn fast_policy() -> CapturePolicy {
        CapturePolicy {
            tick: Duration::from_millis(10),
            frame_timeout: Duration::from_millis(50),
        }
    }

    fn angry() -> Box<FixedClassifier> {
        Box::new(FixedClassifier(Some(EmotionLabel::Angry)))
    }

    #[test]
    fn test_one_second_session_completes() {
        let sink = Arc::new(MemorySink::default());
        let released = Arc::new(AtomicUsize::new(0));
        let mut ctl = CaptureController::new(Arc::clone(&sink), fast_policy());

        let started = Instant::now();
        ctl.start("S-1", Duration::from_secs(1), TestSource::endless(&released), angry())
            .unwrap();
        let report = ctl.wait().unwrap();

        assert_eq!(report.state, SessionState::Completed);
        assert_eq!(ctl.state(), SessionState::Completed);
        assert!(started.elapsed() < Duration::from_millis(1500));
        assert!(report.records >= 1);
        assert_eq!(released.load(Ordering::SeqCst), 1);

        let records = sink.0.lock().unwrap();
        assert_eq!(records.len() as u64, report.records);
        assert!(records.iter().all(|r| r.subject_id == "S-1"
            && r.session_id == Some(report.session_id)
            && r.label == EmotionLabel::Angry));
        assert!(records.windows(2).all(|w| w[0].timestamp <= w[1].timestamp));
    }

    #[test]
    fn test_session_writes_to_emotion_log() {
        use vigil_store::{Database, EmotionLog, SignatureStore};

        let db = Arc::new(Database::open_in_memory().unwrap());
        SignatureStore::open(db.clone(), 4)
            .unwrap()
            .enroll(&vigil_core::Subject::new("S-1", "n", 20, "c"))
            .unwrap();
        let log = Arc::new(EmotionLog::new(db));
        let released = Arc::new(AtomicUsize::new(0));

        let mut ctl = CaptureController::new(Arc::clone(&log), fast_policy());
        ctl.start("S-1", Duration::from_secs(1), TestSource::endless(&released), angry())
            .unwrap();
        let report = ctl.wait().unwrap();

        assert_eq!(report.state, SessionState::Completed);
        let history = log.query("S-1").unwrap();
        assert!(!history.is_empty());
        assert_eq!(history.len() as u64, report.records);
        assert_eq!(log.evaluate("S-1").unwrap().verdict, vigil_core::Verdict::ConfirmedSuspect);
    }

    #[test]
    fn test_cancel_releases_once_and_is_cancelled() {
        let released = Arc::new(AtomicUsize::new(0));
        let mut ctl = CaptureController::new(Arc::new(MemorySink::default()), fast_policy());
        ctl.start("S-1", Duration::from_secs(30), TestSource::endless(&released), angry())
            .unwrap();
        std::thread::sleep(Duration::from_millis(100));

        let report = ctl.cancel().unwrap();
        assert_eq!(report.state, SessionState::Cancelled);
        assert_ne!(ctl.state(), SessionState::Completed);
        assert_eq!(ctl.state(), SessionState::Cancelled);
        assert_eq!(released.load(Ordering::SeqCst), 1);
        assert!(report.elapsed < Duration::from_secs(5));
    }

    #[test]
    fn test_cancel_when_idle_is_error() {
        let mut ctl = CaptureController::new(Arc::new(MemorySink::default()), fast_policy());
        assert!(matches!(ctl.cancel(), Err(SessionError::NotRunning)));
        assert_eq!(ctl.state(), SessionState::Idle);
    }

    #[test]
    fn test_cancel_token_from_another_thread() {
        let released = Arc::new(AtomicUsize::new(0));
        let mut ctl = CaptureController::new(Arc::new(MemorySink::default()), fast_policy());
        ctl.start("S-1", Duration::from_secs(30), TestSource::endless(&released), angry())
            .unwrap();

        let token = ctl.cancel_token();
        std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(50));
            token.cancel();
        });

        let report = ctl.wait().unwrap();
        assert_eq!(report.state, SessionState::Cancelled);
        assert_eq!(released.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_start_while_running_is_rejected() {
        let released = Arc::new(AtomicUsize::new(0));
        let mut ctl = CaptureController::new(Arc::new(MemorySink::default()), fast_policy());
        ctl.start("S-1", Duration::from_secs(30), TestSource::endless(&released), angry())
            .unwrap();

        let second = Arc::new(AtomicUsize::new(0));
        let err = ctl
            .start("S-2", Duration::from_secs(1), TestSource::endless(&second), angry())
            .unwrap_err();
        assert!(matches!(err, SessionError::AlreadyRunning(_)));
        // The rejected source is handed back to the device immediately.
        assert_eq!(second.load(Ordering::SeqCst), 1);

        ctl.cancel().unwrap();
        assert_eq!(released.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_same_subject_cannot_run_twice_across_controllers() {
        let registry = ActiveSubjects::default();
        let sink = Arc::new(MemorySink::default());
        let released = Arc::new(AtomicUsize::new(0));

        let mut a = CaptureController::with_registry(Arc::clone(&sink), fast_policy(), registry.clone());
        let mut b = CaptureController::with_registry(Arc::clone(&sink), fast_policy(), registry.clone());
        let mut c = CaptureController::with_registry(sink, fast_policy(), registry.clone());

        a.start("S-1", Duration::from_secs(30), TestSource::endless(&released), angry())
            .unwrap();
        assert!(registry.is_active("S-1"));

        let err = b
            .start("S-1", Duration::from_secs(30), TestSource::endless(&released), angry())
            .unwrap_err();
        assert!(matches!(err, SessionError::AlreadyRunning(_)));
        assert_eq!(b.state(), SessionState::Idle);

        c.start("S-2", Duration::from_secs(30), TestSource::endless(&released), angry())
            .unwrap();

        a.cancel().unwrap();
        c.cancel().unwrap();
        assert!(!registry.is_active("S-1"));

        // Subject is free again once the first session has ended.
        b.start("S-1", Duration::from_millis(50), TestSource::endless(&released), angry())
            .unwrap();
        assert_eq!(b.wait().unwrap().state, SessionState::Completed);
    }

    #[test]
    fn test_poisoned_registry_is_reported_distinctly() {
        let registry = ActiveSubjects::default();
        let poisoner = registry.clone();
        let _ = std::thread::spawn(move || {
            let _held = poisoner.0.lock().unwrap();
            panic!("poison the registry");
        })
        .join();

        let released = Arc::new(AtomicUsize::new(0));
        let mut ctl = CaptureController::with_registry(Arc::new(MemorySink::default()), fast_policy(), registry);
        let err = ctl
            .start("S-1", Duration::from_secs(1), TestSource::endless(&released), angry())
            .unwrap_err();

        assert!(matches!(err, SessionError::RegistryPoisoned));
        assert_eq!(ctl.state(), SessionState::Idle);
        assert_eq!(released.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_restart_after_terminal_state() {
        let released = Arc::new(AtomicUsize::new(0));
        let mut ctl = CaptureController::new(Arc::new(MemorySink::default()), fast_policy());

        let first = ctl
            .start("S-1", Duration::from_millis(50), TestSource::endless(&released), angry())
            .unwrap();
        ctl.wait().unwrap();
        let second = ctl
            .start("S-1", Duration::from_millis(50), TestSource::endless(&released), angry())
            .unwrap();
        assert_ne!(first, second);
        assert_eq!(ctl.wait().unwrap().state, SessionState::Completed);
        assert_eq!(released.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_no_face_frames_are_skipped() {
        let sink = Arc::new(MemorySink::default());
        let released = Arc::new(AtomicUsize::new(0));
        let mut ctl = CaptureController::new(Arc::clone(&sink), fast_policy());
        ctl.start(
            "S-1",
            Duration::from_millis(200),
            TestSource::endless(&released),
            Box::new(FixedClassifier(None)),
        )
        .unwrap();
        let report = ctl.wait().unwrap();

        assert_eq!(report.state, SessionState::Completed);
        assert_eq!(report.records, 0);
        assert!(report.no_face >= 1);
        assert_eq!(report.no_face, report.frames);
        assert!(sink.0.lock().unwrap().is_empty());
    }

    #[test]
    fn test_end_of_stream_completes_early() {
        let sink = Arc::new(MemorySink::default());
        let released = Arc::new(AtomicUsize::new(0));
        let mut ctl = CaptureController::new(Arc::clone(&sink), fast_policy());
        ctl.start("S-1", Duration::from_secs(30), TestSource::finite(3, &released), angry())
            .unwrap();
        let report = ctl.wait().unwrap();

        assert_eq!(report.state, SessionState::Completed);
        assert_eq!(report.records, 3);
        assert!(report.elapsed < Duration::from_secs(5));
        assert_eq!(released.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_stalled_source_still_terminates() {
        let released = Arc::new(AtomicUsize::new(0));
        let mut ctl = CaptureController::new(Arc::new(MemorySink::default()), fast_policy());
        ctl.start(
            "S-1",
            Duration::from_millis(300),
            Box::new(StalledSource(Arc::clone(&released))),
            angry(),
        )
        .unwrap();
        let report = ctl.wait().unwrap();

        assert_eq!(report.state, SessionState::Completed);
        assert_eq!(report.frames, 0);
        assert!(report.elapsed < Duration::from_millis(300) + fast_policy().frame_timeout * 4);
        assert_eq!(released.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_log_fault_fails_session_and_releases() {
        let released = Arc::new(AtomicUsize::new(0));
        let mut ctl = CaptureController::new(Arc::new(FailingSink), fast_policy());
        ctl.start("S-1", Duration::from_secs(30), TestSource::endless(&released), angry())
            .unwrap();
        let report = ctl.wait().unwrap();

        assert_eq!(report.state, SessionState::Failed);
        assert!(report.fault.as_deref().unwrap_or_default().contains("disk full"));
        assert_eq!(released.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_panicking_classifier_fails_session_and_releases() {
        let released = Arc::new(AtomicUsize::new(0));
        let registry = ActiveSubjects::default();
        let mut ctl = CaptureController::with_registry(
            Arc::new(MemorySink::default()),
            fast_policy(),
            registry.clone(),
        );
        ctl.start(
            "S-1",
            Duration::from_secs(30),
            TestSource::endless(&released),
            Box::new(PanickingClassifier),
        )
        .unwrap();
        let report = ctl.wait().unwrap();

        assert_eq!(report.state, SessionState::Failed);
        assert!(report.fault.as_deref().unwrap_or_default().contains("model blew up"));
        assert_eq!(released.load(Ordering::SeqCst), 1);
        assert!(!registry.is_active("S-1"));
    }
}
