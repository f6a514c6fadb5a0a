//! Live recompute controller: debounced, last-request-wins pipeline runs.
//!
//! Every change to the source or options bumps a generation counter and
//! restarts a quiet-period timer. When the timer fires, the current
//! snapshot is handed to a [`PipelineRunner`] on the blocking pool. The
//! run is never aborted; when it finishes, its result is published only
//! if no change happened in the meantime. Stale results are dropped
//! silently.
//!
//! State is published through a [`tokio::sync::watch`] channel of
//! [`Preview`] values. Replacing the preview drops the previous
//! [`ProcessedImage`] once no subscriber holds it.
//!
//! The controller spawns its timers and runs on the runtime it was
//! created in, so edits may come from any thread once it exists.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use imgx_pipeline::{
    Codec, PipelineError, PipelineOptions, ProcessedImage, SourceImage, StageKind, run_pipeline,
};
use serde::{Deserialize, Serialize};
use tokio::runtime::Handle;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info};

/// Runs one full pipeline pass. Called on Tokio's blocking pool.
pub trait PipelineRunner: Send + Sync + 'static {
    /// Produce the processed image for `source` under `options`.
    ///
    /// # Errors
    ///
    /// Any stage failure.
    fn run(
        &self,
        source: &SourceImage,
        options: &PipelineOptions,
    ) -> Result<ProcessedImage, PipelineError>;
}

/// [`PipelineRunner`] that calls [`run_pipeline`] with a fixed codec.
#[derive(Debug, Clone, Default)]
pub struct CodecRunner {
    codec: Codec,
}

impl CodecRunner {
    /// Run pipelines with `codec`.
    #[must_use]
    pub const fn new(codec: Codec) -> Self {
        Self { codec }
    }
}

impl PipelineRunner for CodecRunner {
    fn run(
        &self,
        source: &SourceImage,
        options: &PipelineOptions,
    ) -> Result<ProcessedImage, PipelineError> {
        run_pipeline(&self.codec, source, options)
    }
}

/// Controller configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ControllerConfig {
    /// Quiet period after the last change before a run starts, in
    /// milliseconds.
    pub quiet_period_ms: u64,
}

impl ControllerConfig {
    /// Default quiet period.
    pub const DEFAULT_QUIET_PERIOD_MS: u64 = 150;

    /// The quiet period as a [`Duration`].
    #[must_use]
    pub const fn quiet_period(&self) -> Duration {
        Duration::from_millis(self.quiet_period_ms)
    }
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            quiet_period_ms: Self::DEFAULT_QUIET_PERIOD_MS,
        }
    }
}

/// What a UI shows: the latest good image and the latest error.
#[derive(Debug, Clone, Default)]
pub struct Preview {
    /// Most recent result of a non-stale run.
    pub image: Option<Arc<ProcessedImage>>,
    /// Failure of the most recent non-stale run, cleared by the next
    /// success.
    pub error: Option<String>,
    /// A recompute for the current generation is pending or in flight.
    pub running: bool,
    /// Generation the preview belongs to.
    pub generation: u64,
}

#[derive(Default)]
struct State {
    source: Option<Arc<SourceImage>>,
    options: Option<PipelineOptions>,
    generation: u64,
    timer: Option<JoinHandle<()>>,
}

struct Shared<R> {
    runtime: Handle,
    runner: Arc<R>,
    state: Mutex<State>,
    preview: watch::Sender<Preview>,
    runs_started: AtomicU64,
    quiet_period: Duration,
}

impl<R> Shared<R> {
    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Debounced pipeline controller for one edit session.
pub struct LiveController<R: PipelineRunner> {
    shared: Arc<Shared<R>>,
}

impl<R: PipelineRunner> LiveController<R> {
    /// A controller with no source, running on the current Tokio
    /// runtime.
    ///
    /// # Panics
    ///
    /// Panics when called outside a Tokio runtime.
    #[must_use]
    pub fn new(runner: R, config: &ControllerConfig) -> Self {
        Self::with_handle(runner, config, Handle::current())
    }

    /// A controller with no source, running on `runtime`.
    #[must_use]
    pub fn with_handle(runner: R, config: &ControllerConfig, runtime: Handle) -> Self {
        let (preview, _) = watch::channel(Preview::default());
        Self {
            shared: Arc::new(Shared {
                runtime,
                runner: Arc::new(runner),
                state: Mutex::new(State::default()),
                preview,
                runs_started: AtomicU64::new(0),
                quiet_period: config.quiet_period(),
            }),
        }
    }

    /// Receive every preview update.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<Preview> {
        self.shared.preview.subscribe()
    }

    /// The preview as of now.
    #[must_use]
    pub fn preview(&self) -> Preview {
        self.shared.preview.borrow().clone()
    }

    /// Pipeline runs started since creation.
    #[must_use]
    pub fn runs_started(&self) -> u64 {
        self.shared.runs_started.load(Ordering::SeqCst)
    }

    /// The current source, if any.
    #[must_use]
    pub fn source(&self) -> Option<Arc<SourceImage>> {
        self.shared.lock().source.clone()
    }

    /// The current options, if a source is loaded.
    #[must_use]
    pub fn options(&self) -> Option<PipelineOptions> {
        self.shared.lock().options
    }

    /// Replace the source and reset every option to its defaults.
    ///
    /// The previous preview stays visible until the new run lands.
    pub fn set_source(&self, source: SourceImage) {
        let mut state = self.shared.lock();
        state.options = Some(PipelineOptions::for_source(&source));
        state.source = Some(Arc::new(source));
        self.schedule(&mut state);
    }

    /// Replace the options, clamped into range. Ignored without a source.
    pub fn set_options(&self, options: PipelineOptions) {
        self.update_options(|current| *current = options);
    }

    /// Edit the options in place; the result is clamped. Ignored without
    /// a source.
    pub fn update_options(&self, edit: impl FnOnce(&mut PipelineOptions)) {
        let mut state = self.shared.lock();
        let Some(options) = state.options.as_mut() else {
            debug!("options edited with no source loaded");
            return;
        };
        edit(options);
        *options = options.clamped();
        self.schedule(&mut state);
    }

    /// Restore one stage's defaults, derived from the current source.
    pub fn reset_stage(&self, stage: StageKind) {
        let mut state = self.shared.lock();
        let State {
            source, options, ..
        } = &mut *state;
        let (Some(source), Some(options)) = (source.as_ref(), options.as_mut()) else {
            return;
        };
        options.reset(stage, source);
        self.schedule(&mut state);
    }

    /// Drop the source, cancel any pending run, mark in-flight runs
    /// stale and clear the preview.
    pub fn clear(&self) {
        let mut state = self.shared.lock();
        if let Some(timer) = state.timer.take() {
            timer.abort();
        }
        state.generation += 1;
        state.source = None;
        state.options = None;
        let generation = state.generation;
        self.shared.preview.send_replace(Preview {
            generation,
            ..Preview::default()
        });
        debug!(generation, "cleared");
    }

    /// Bump the generation and restart the quiet-period timer.
    fn schedule(&self, state: &mut State) {
        state.generation += 1;
        let generation = state.generation;
        if let Some(timer) = state.timer.take() {
            timer.abort();
        }
        self.shared.preview.send_modify(|preview| {
            preview.generation = generation;
            preview.running = true;
        });

        let shared = Arc::clone(&self.shared);
        state.timer = Some(self.shared.runtime.spawn(async move {
            tokio::time::sleep(shared.quiet_period).await;
            start_run(&shared, generation);
        }));
    }
}

impl<R: PipelineRunner> Drop for LiveController<R> {
    fn drop(&mut self) {
        if let Some(timer) = self.shared.lock().timer.take() {
            timer.abort();
        }
    }
}

/// Snapshot the inputs for `generation` and run them on the blocking
/// pool, unless a newer change has already arrived.
fn start_run<R: PipelineRunner>(shared: &Arc<Shared<R>>, generation: u64) {
    let (source, options) = {
        let mut state = shared.lock();
        if state.generation != generation {
            return;
        }
        state.timer = None;
        let (Some(source), Some(options)) = (state.source.clone(), state.options) else {
            return;
        };
        (source, options)
    };

    shared.runs_started.fetch_add(1, Ordering::SeqCst);
    debug!(generation, "starting pipeline run");

    let runner = Arc::clone(&shared.runner);
    let runtime = shared.runtime.clone();
    let run = runtime.spawn_blocking(move || runner.run(&source, &options));
    let shared = Arc::clone(shared);
    runtime.spawn(async move {
        finish_run(&shared, generation, run.await);
    });
}

/// Publish a finished run if it is still the latest.
fn finish_run<R>(
    shared: &Shared<R>,
    generation: u64,
    outcome: Result<Result<ProcessedImage, PipelineError>, tokio::task::JoinError>,
) {
    // Hold the lock while publishing so a concurrent change cannot
    // interleave between the check and the send.
    let state = shared.lock();
    if state.generation != generation {
        debug!(
            generation,
            current = state.generation,
            "discarding stale pipeline result"
        );
        return;
    }

    shared.preview.send_modify(|preview| {
        preview.running = false;
        match outcome {
            Ok(Ok(image)) => {
                info!(
                    generation,
                    size = %image.dimensions(),
                    format = %image.format(),
                    bytes = image.byte_size(),
                    "preview updated"
                );
                preview.image = Some(Arc::new(image));
                preview.error = None;
            }
            Ok(Err(e)) => {
                debug!(generation, error = %e, "pipeline run failed");
                preview.error = Some(e.to_string());
            }
            Err(e) => {
                debug!(generation, error = %e, "pipeline task did not complete");
                preview.error = Some(format!("pipeline task failed: {e}"));
            }
        }
    });
    drop(state);
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use std::collections::HashMap;
    use std::sync::mpsc;

    use imgx_pipeline::{ImageFormat, RgbaImage};

    use super::*;

    const QUIET: u64 = 10;
    const FAIL_WIDTH: u32 = 13;

    /// Records every run. A run whose target width has a gate blocks
    /// until the gate is released. Width [`FAIL_WIDTH`] fails.
    #[derive(Default)]
    struct FakeRunner {
        calls: Mutex<Vec<PipelineOptions>>,
        gates: Mutex<HashMap<u32, mpsc::Receiver<()>>>,
    }

    impl FakeRunner {
        fn gate(&self, width: u32) -> mpsc::Sender<()> {
            let (tx, rx) = mpsc::channel();
            self.gates.lock().unwrap().insert(width, rx);
            tx
        }
    }

    impl PipelineRunner for Arc<FakeRunner> {
        fn run(
            &self,
            _source: &SourceImage,
            options: &PipelineOptions,
        ) -> Result<ProcessedImage, PipelineError> {
            self.calls.lock().unwrap().push(*options);
            let width = options.resize.width;
            let gate = self.gates.lock().unwrap().remove(&width);
            if let Some(gate) = gate {
                gate.recv().unwrap();
            }
            if width == FAIL_WIDTH {
                return Err(PipelineError::InvalidParameter("unlucky width".into()));
            }
            Codec::default().encode(&RgbaImage::new(width, 1), ImageFormat::Png, 100)
        }
    }

    fn controller() -> (LiveController<Arc<FakeRunner>>, Arc<FakeRunner>) {
        let runner = Arc::new(FakeRunner::default());
        let config = ControllerConfig {
            quiet_period_ms: QUIET,
        };
        (LiveController::new(Arc::clone(&runner), &config), runner)
    }

    fn source() -> SourceImage {
        square(8)
    }

    fn square(side: u32) -> SourceImage {
        Codec::default()
            .encode(&RgbaImage::new(side, side), ImageFormat::Png, 100)
            .unwrap()
    }

    fn set_width(controller: &LiveController<Arc<FakeRunner>>, width: u32) {
        controller.update_options(|o| {
            o.resize.width = width;
            o.resize.maintain_aspect_ratio = false;
        });
    }

    async fn wait_for(
        controller: &LiveController<Arc<FakeRunner>>,
        predicate: impl FnMut(&Preview) -> bool,
    ) -> Preview {
        let mut rx = controller.subscribe();
        let seen = tokio::time::timeout(Duration::from_secs(5), rx.wait_for(predicate))
            .await
            .expect("timed out waiting for preview")
            .expect("controller dropped")
            .clone();
        seen
    }

    async fn wait_for_runs(controller: &LiveController<Arc<FakeRunner>>, n: u64) {
        tokio::time::timeout(Duration::from_secs(5), async {
            while controller.runs_started() < n {
                tokio::time::sleep(Duration::from_millis(1)).await;
            }
        })
        .await
        .expect("timed out waiting for run to start");
    }

    fn image_width(preview: &Preview) -> Option<u32> {
        preview.image.as_ref().map(|image| image.width())
    }

    #[tokio::test]
    async fn burst_of_edits_starts_one_run_with_last_options() {
        let (controller, runner) = controller();
        controller.set_source(source());
        for width in [2, 3, 4, 5, 6] {
            set_width(&controller, width);
        }

        let preview = wait_for(&controller, |p| p.image.is_some()).await;
        assert_eq!(image_width(&preview), Some(6));
        assert!(!preview.running);

        tokio::time::sleep(Duration::from_millis(QUIET * 5)).await;
        assert_eq!(controller.runs_started(), 1);
        let calls = runner.calls.lock().unwrap();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].resize.width, 6);
    }

    #[tokio::test]
    async fn slow_earlier_run_never_overwrites_newer_result() {
        let (controller, runner) = controller();
        let release_a = runner.gate(3);

        controller.set_source(source());
        set_width(&controller, 3);
        wait_for_runs(&controller, 1).await;

        set_width(&controller, 5);
        let preview = wait_for(&controller, |p| p.image.is_some()).await;
        assert_eq!(image_width(&preview), Some(5));

        release_a.send(()).unwrap();
        tokio::time::sleep(Duration::from_millis(QUIET * 5)).await;
        assert_eq!(controller.runs_started(), 2);
        assert_eq!(runner.calls.lock().unwrap().len(), 2);
        let preview = controller.preview();
        assert_eq!(image_width(&preview), Some(5));
        assert!(preview.error.is_none());
    }

    #[tokio::test]
    async fn new_source_while_running_discards_the_old_run() {
        let (controller, runner) = controller();
        // Defaults follow the source, so the first run targets width 8.
        let release_first = runner.gate(8);
        controller.set_source(source());
        wait_for_runs(&controller, 1).await;

        controller.set_source(square(5));
        let preview = wait_for(&controller, |p| p.image.is_some()).await;
        assert_eq!(image_width(&preview), Some(5));

        release_first.send(()).unwrap();
        tokio::time::sleep(Duration::from_millis(QUIET * 5)).await;
        assert_eq!(controller.runs_started(), 2);
        let preview = controller.preview();
        assert_eq!(image_width(&preview), Some(5));
        assert!(!preview.running);
        assert_eq!(controller.source().unwrap().width(), 5);
        assert_eq!(controller.options().unwrap().resize.width, 5);
    }

    #[tokio::test]
    async fn failure_keeps_previous_image() {
        let (controller, _runner) = controller();
        controller.set_source(source());
        set_width(&controller, 4);
        wait_for(&controller, |p| p.image.is_some()).await;

        set_width(&controller, FAIL_WIDTH);
        let preview = wait_for(&controller, |p| p.error.is_some()).await;
        assert_eq!(image_width(&preview), Some(4));
        assert!(!preview.running);

        set_width(&controller, 7);
        let preview = wait_for(&controller, |p| image_width(p) == Some(7)).await;
        assert!(preview.error.is_none());
    }

    #[tokio::test]
    async fn clear_cancels_pending_run() {
        let (controller, _runner) = controller();
        controller.set_source(source());
        controller.clear();

        tokio::time::sleep(Duration::from_millis(QUIET * 5)).await;
        assert_eq!(controller.runs_started(), 0);
        let preview = controller.preview();
        assert!(preview.image.is_none());
        assert!(!preview.running);
        assert!(controller.options().is_none());
    }

    #[tokio::test]
    async fn clear_discards_in_flight_run() {
        let (controller, runner) = controller();
        let release = runner.gate(9);
        controller.set_source(source());
        set_width(&controller, 9);
        wait_for_runs(&controller, 1).await;

        controller.clear();
        release.send(()).unwrap();
        tokio::time::sleep(Duration::from_millis(QUIET * 5)).await;
        assert!(controller.preview().image.is_none());
        assert!(controller.source().is_none());
    }

    #[tokio::test]
    async fn edits_without_source_are_ignored() {
        let (controller, _runner) = controller();
        set_width(&controller, 4);
        controller.reset_stage(StageKind::Filter);
        tokio::time::sleep(Duration::from_millis(QUIET * 3)).await;
        assert_eq!(controller.runs_started(), 0);
        assert!(controller.options().is_none());
    }

    #[tokio::test]
    async fn options_are_clamped_and_reset_per_stage() {
        let (controller, _runner) = controller();
        controller.set_source(source());
        controller.update_options(|o| {
            o.filter.sepia = 4.0;
            o.compress.quality = 0;
        });
        let options = controller.options().unwrap();
        assert!((options.filter.sepia - 1.0).abs() < f32::EPSILON);
        assert_eq!(options.compress.quality, 1);

        controller.reset_stage(StageKind::Filter);
        let options = controller.options().unwrap();
        assert!(options.filter.sepia.abs() < f32::EPSILON);
        assert_eq!(options.compress.quality, 1);
    }

    #[test]
    fn edits_from_outside_the_runtime_use_its_handle() {
        let runtime = tokio::runtime::Runtime::new().unwrap();
        let runner = Arc::new(FakeRunner::default());
        let config = ControllerConfig {
            quiet_period_ms: QUIET,
        };
        let controller =
            LiveController::with_handle(Arc::clone(&runner), &config, runtime.handle().clone());

        controller.set_source(source());
        set_width(&controller, 6);
        let preview = runtime.block_on(wait_for(&controller, |p| p.image.is_some()));
        assert_eq!(image_width(&preview), Some(6));
        assert_eq!(runner.calls.lock().unwrap().len(), 1);
    }

    #[test]
    fn quiet_period_defaults_to_150ms() {
        assert_eq!(
            ControllerConfig::default().quiet_period(),
            Duration::from_millis(150)
        );
    }
}
