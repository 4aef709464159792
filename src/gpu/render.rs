use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Instant;

use crossbeam_channel::Receiver;
use parking_lot::Mutex;
use tracing::{error, info, warn};

use super::context::{GraphicsContext, HostSurface};
use super::program::{self, ProgramBindings, FRAGMENT_SHADER, VERTEX_SHADER};
use crate::error::GpuError;
use crate::status::{RunStatus, StatusBoard};

pub const CLEAR_COLOR: [f32; 4] = [0.0, 0.0, 0.0, 1.0];

/// Seconds since the session started, never going backwards.
#[derive(Debug)]
pub struct FrameClock {
    origin: Instant,
    last: f32,
}

impl FrameClock {
    pub fn start() -> Self {
        Self {
            origin: Instant::now(),
            last: 0.0,
        }
    }

    pub fn sample(&mut self) -> f32 {
        let now = self.origin.elapsed().as_secs_f32();
        if now > self.last {
            self.last = now;
        }
        self.last
    }
}

/// One continuous graphics run: the context plus everything `initialize`
/// produced for it.
pub struct RenderSession {
    ctx: Box<dyn GraphicsContext>,
    bindings: ProgramBindings,
    clock: FrameClock,
    frames: u64,
}

impl RenderSession {
    pub fn open(ctx: Box<dyn GraphicsContext>) -> Result<Self, GpuError> {
        Self::open_with(ctx, VERTEX_SHADER, FRAGMENT_SHADER)
    }

    pub fn open_with(
        mut ctx: Box<dyn GraphicsContext>,
        vertex_source: &str,
        fragment_source: &str,
    ) -> Result<Self, GpuError> {
        let bindings = program::initialize_with(ctx.as_mut(), vertex_source, fragment_source)?;
        Ok(Self {
            ctx,
            bindings,
            clock: FrameClock::start(),
            frames: 0,
        })
    }

    pub fn bindings(&self) -> &ProgramBindings {
        &self.bindings
    }

    pub fn frames(&self) -> u64 {
        self.frames
    }

    /// Clears, feeds the current time to the shader and draws the quad.
    /// Returns the time value the frame was drawn with.
    pub fn frame_step(&mut self) -> Result<f32, GpuError> {
        let b = self.bindings;
        self.ctx.clear(CLEAR_COLOR);
        let time = self.clock.sample();
        self.ctx.set_uniform_f32(b.program, b.time, time);
        self.ctx.draw_strip(b.program, b.vertex_buffer, b.vertex_count)?;
        self.frames += 1;
        Ok(time)
    }

    pub fn release(mut self) {
        self.ctx.delete_buffer(self.bindings.vertex_buffer);
        self.ctx.delete_program(self.bindings.program);
    }
}

struct RenderLoop {
    generation: u64,
    stop: Arc<AtomicBool>,
    handle: JoinHandle<()>,
}

/// Keeps the graphics pipeline busy from `start` until `stop`.
pub struct GraphicsEngine {
    board: Arc<StatusBoard>,
    active: Mutex<Option<RenderLoop>>,
}

impl GraphicsEngine {
    pub fn new() -> Self {
        Self {
            board: Arc::new(StatusBoard::new()),
            active: Mutex::new(None),
        }
    }

    pub fn start<S: HostSurface>(&self, surface: S) -> Result<(), GpuError> {
        self.start_with(surface, VERTEX_SHADER, FRAGMENT_SHADER)
    }

    /// Acquires a context from `surface`, sets up the program from the given
    /// sources and hands the session to a render thread.
    ///
    /// Setup failures are published as `Failed` and returned; the session
    /// then never reaches `Running`.
    pub fn start_with<S: HostSurface>(
        &self,
        mut surface: S,
        vertex_source: &str,
        fragment_source: &str,
    ) -> Result<(), GpuError> {
        let mut active = self.active.lock();
        if self.board.current().is_running() {
            return Err(GpuError::AlreadyRunning);
        }
        if let Some(finished) = active.take() {
            // a loop that ended on its own has already released its session
            let _ = finished.handle.join();
        }

        let ctx = surface
            .acquire_context()
            .ok_or(GpuError::ContextUnavailable)
            .map_err(|err| self.fail(err))?;
        let session = RenderSession::open_with(ctx, vertex_source, fragment_source)
            .map_err(|err| self.fail(err))?;

        let generation = self.board.begin().ok_or(GpuError::AlreadyRunning)?;
        let stop = Arc::new(AtomicBool::new(false));
        let spawned = {
            let stop = Arc::clone(&stop);
            let board = Arc::clone(&self.board);
            thread::Builder::new()
                .name("burn-render".to_string())
                .spawn(move || render_loop(session, surface, &stop, &board, generation))
        };
        match spawned {
            Ok(handle) => {
                info!(generation, "render session running");
                *active = Some(RenderLoop {
                    generation,
                    stop,
                    handle,
                });
                Ok(())
            }
            Err(err) => {
                let err = GpuError::Device(format!("render thread could not start: {}", err));
                self.board.publish(generation, RunStatus::Failed(err.to_string()));
                Err(err)
            }
        }
    }

    /// Prevents the next frame from being issued, waits for the one in
    /// flight and releases the session's graphics resources.
    pub fn stop(&self) {
        if let Some(running) = self.active.lock().take() {
            running.stop.store(true, Ordering::SeqCst);
            if running.handle.join().is_err() {
                error!("render thread panicked");
            }
            if self.board.retire(running.generation) {
                info!(generation = running.generation, "render session stopped");
            }
        }
    }

    pub fn status(&self) -> RunStatus {
        self.board.current()
    }

    pub fn subscribe(&self) -> Receiver<RunStatus> {
        self.board.subscribe()
    }

    fn fail(&self, err: GpuError) -> GpuError {
        warn!(%err, "render session could not start");
        self.board.reject(err.to_string());
        err
    }
}

impl Default for GraphicsEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for GraphicsEngine {
    fn drop(&mut self) {
        self.stop();
    }
}

fn render_loop<S: HostSurface>(
    mut session: RenderSession,
    mut surface: S,
    stop: &AtomicBool,
    board: &StatusBoard,
    generation: u64,
) {
    loop {
        if stop.load(Ordering::SeqCst) {
            break;
        }
        surface.request_frame();
        if stop.load(Ordering::SeqCst) {
            break;
        }
        if let Err(err) = session.frame_step() {
            error!(%err, frames = session.frames(), "frame step failed");
            board.publish(generation, RunStatus::Failed(err.to_string()));
            break;
        }
    }
    info!(frames = session.frames(), "releasing render session");
    session.release();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Stage;
    use crate::gpu::recording::{Call, RecordingContext, RecordingSurface};
    use std::time::Duration;

    fn wait_for(what: &str, mut done: impl FnMut() -> bool) {
        let deadline = Instant::now() + Duration::from_secs(10);
        while !done() {
            assert!(Instant::now() < deadline, "timed out waiting for {}", what);
            thread::sleep(Duration::from_millis(1));
        }
    }

    #[test]
    fn clock_never_goes_backwards() {
        let mut clock = FrameClock::start();
        let mut last = clock.sample();
        for _ in 0..1000 {
            let now = clock.sample();
            assert!(now >= last);
            last = now;
        }
    }

    #[test]
    fn hundred_frames_see_non_decreasing_time() {
        let ctx = RecordingContext::new();
        let log = ctx.log();
        let mut session = RenderSession::open(Box::new(ctx)).unwrap();

        let mut last = f32::MIN;
        for _ in 0..100 {
            let time = session.frame_step().unwrap();
            assert!(time >= last);
            last = time;
        }
        assert_eq!(session.frames(), 100);

        let calls = log.lock();
        let draws = calls.iter().filter(|c| matches!(c, Call::Draw { .. })).count();
        assert_eq!(draws, 100);
        // every frame is clear, uniform, draw in that order
        let frame_calls: Vec<_> = calls
            .iter()
            .filter(|c| matches!(c, Call::Clear(_) | Call::Uniform(..) | Call::Draw { .. }))
            .collect();
        for frame in frame_calls.chunks(3) {
            assert!(matches!(frame[0], Call::Clear(c) if *c == CLEAR_COLOR));
            assert!(matches!(frame[1], Call::Uniform(..)));
            assert!(matches!(frame[2], Call::Draw { vertex_count: 4, .. }));
        }
    }

    #[test]
    fn release_frees_program_and_buffer() {
        let ctx = RecordingContext::new();
        let log = ctx.log();
        let session = RenderSession::open(Box::new(ctx)).unwrap();
        let bindings = *session.bindings();
        session.release();

        let calls = log.lock();
        assert!(calls.contains(&Call::DeleteBuffer(bindings.vertex_buffer)));
        assert!(calls.contains(&Call::DeleteProgram(bindings.program)));
    }

    #[test]
    fn engine_runs_until_stopped() {
        let surface = RecordingSurface::new();
        let log = surface.log();
        let engine = GraphicsEngine::new();
        let statuses = engine.subscribe();

        engine.start(surface).unwrap();
        assert_eq!(engine.status(), RunStatus::Running);

        wait_for("100 frames", || {
            log.lock().iter().filter(|c| matches!(c, Call::Draw { .. })).count() >= 100
        });
        engine.stop();

        assert_eq!(engine.status(), RunStatus::Idle);
        assert_eq!(
            statuses.try_iter().collect::<Vec<_>>(),
            vec![RunStatus::Running, RunStatus::Idle]
        );

        let calls = log.lock();
        let times: Vec<f32> = calls
            .iter()
            .filter_map(|c| match c {
                Call::Uniform(_, value) => Some(*value),
                _ => None,
            })
            .collect();
        assert!(times.len() >= 100);
        assert!(times.windows(2).all(|w| w[1] >= w[0]));
        assert!(matches!(calls.last(), Some(Call::DeleteProgram(_))));

        let draws_at_stop = calls.iter().filter(|c| matches!(c, Call::Draw { .. })).count();
        drop(calls);
        thread::sleep(Duration::from_millis(20));
        let draws_later = log.lock().iter().filter(|c| matches!(c, Call::Draw { .. })).count();
        assert_eq!(draws_at_stop, draws_later);
    }

    #[test]
    fn malformed_fragment_never_runs() {
        let engine = GraphicsEngine::new();
        let statuses = engine.subscribe();
        let broken = FRAGMENT_SHADER.replace("fn fs_main(", "fn fs_main(((");

        let err = engine
            .start_with(RecordingSurface::new(), VERTEX_SHADER, &broken)
            .unwrap_err();

        assert!(matches!(err, GpuError::Compile { stage: Stage::Fragment, .. }));
        let seen: Vec<_> = statuses.try_iter().collect();
        assert!(!seen.contains(&RunStatus::Running));
        assert!(matches!(engine.status(), RunStatus::Failed(_)));
    }

    #[test]
    fn missing_context_is_reported() {
        let engine = GraphicsEngine::new();
        let err = engine.start(RecordingSurface::without_context()).unwrap_err();
        assert_eq!(err, GpuError::ContextUnavailable);
        assert_eq!(engine.status(), RunStatus::Failed(err.to_string()));
    }

    #[test]
    fn second_start_while_running_is_refused() {
        let engine = GraphicsEngine::new();
        engine.start(RecordingSurface::new()).unwrap();
        assert_eq!(
            engine.start(RecordingSurface::new()).unwrap_err(),
            GpuError::AlreadyRunning
        );
        engine.stop();
        engine.start(RecordingSurface::new()).unwrap();
        assert_eq!(engine.status(), RunStatus::Running);
        engine.stop();
    }

    #[test]
    fn failed_start_can_be_retried() {
        let engine = GraphicsEngine::new();
        assert!(engine.start(RecordingSurface::without_context()).is_err());
        engine.start(RecordingSurface::new()).unwrap();
        assert_eq!(engine.status(), RunStatus::Running);
        engine.stop();
    }

    #[test]
    fn draw_failure_ends_the_session() {
        let surface = RecordingSurface::with_context(RecordingContext::new().fail_draw_after(5));
        let log = surface.log();
        let engine = GraphicsEngine::new();
        engine.start(surface).unwrap();

        wait_for("session failure", || matches!(engine.status(), RunStatus::Failed(_)));
        wait_for("release", || {
            matches!(log.lock().last(), Some(Call::DeleteProgram(_)))
        });
        engine.stop();
        assert!(matches!(engine.status(), RunStatus::Failed(_)));
    }
}
