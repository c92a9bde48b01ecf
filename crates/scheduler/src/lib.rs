use std::cell::Cell;
use std::fmt;
use std::time::{Duration, Instant};

#[derive(Debug, thiserror::Error)]
pub enum SchedulerError {
    #[error("{0} task is already running")]
    Reentrant(TaskKind),
    #[error("{task} task failed: {source}")]
    Task {
        task: TaskKind,
        #[source]
        source: anyhow::Error,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskKind {
    Image,
    Ui,
}

impl fmt::Display for TaskKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TaskKind::Image => f.write_str("image"),
            TaskKind::Ui => f.write_str("ui"),
        }
    }
}

/// Work driven by a [`FrameLoop`]. Each task receives the loop so it can
/// re-dirty itself or the other task.
pub trait FrameTasks {
    fn render_image(&mut self, frame: &FrameLoop) -> anyhow::Result<()>;

    fn render_ui(&mut self, _frame: &FrameLoop) -> anyhow::Result<()> {
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TickReport {
    pub image: bool,
    pub ui: bool,
}

impl TickReport {
    pub fn ran_anything(&self) -> bool {
        self.image || self.ui
    }
}

#[derive(Debug, Default)]
struct TaskSlot {
    dirty: Cell<bool>,
    running: Cell<bool>,
}

/// Clears the running flag even when the task fails.
struct RunningGuard<'a>(&'a Cell<bool>);

impl Drop for RunningGuard<'_> {
    fn drop(&mut self) {
        self.0.set(false);
    }
}

/// Single-threaded two-task loop: image render and UI render, each run at
/// most once per tick and only when dirty.
#[derive(Debug, Default)]
pub struct FrameLoop {
    image: TaskSlot,
    ui: TaskSlot,
    frame_interval: Option<Duration>,
    last_tick: Cell<Option<Instant>>,
}

impl FrameLoop {
    pub fn new(frame_interval: Option<Duration>) -> Self {
        Self {
            frame_interval: frame_interval.filter(|interval| !interval.is_zero()),
            ..Self::default()
        }
    }

    pub fn frame_interval(&self) -> Option<Duration> {
        self.frame_interval
    }

    pub fn mark_image_dirty(&self) {
        self.image.dirty.set(true);
    }

    pub fn mark_ui_dirty(&self) {
        self.ui.dirty.set(true);
    }

    pub fn is_dirty(&self) -> bool {
        self.image.dirty.get() || self.ui.dirty.get()
    }

    /// Whether a frame-rate cap allows another tick at `now`.
    pub fn due(&self, now: Instant) -> bool {
        match (self.frame_interval, self.last_tick.get()) {
            (Some(interval), Some(last)) => now.saturating_duration_since(last) >= interval,
            _ => true,
        }
    }

    /// Ticks only when [`due`](Self::due), stamping `now` as the last tick.
    pub fn tick_if_due(
        &self,
        now: Instant,
        tasks: &mut dyn FrameTasks,
    ) -> Result<Option<TickReport>, SchedulerError> {
        if !self.due(now) {
            return Ok(None);
        }
        self.last_tick.set(Some(now));
        self.tick(tasks).map(Some)
    }

    /// Runs each dirty task once. The dirty flag is cleared before the task
    /// runs, so a task that re-dirties itself runs again on the next tick.
    pub fn tick(&self, tasks: &mut dyn FrameTasks) -> Result<TickReport, SchedulerError> {
        let mut report = TickReport::default();
        report.image = self.run_slot(TaskKind::Image, tasks)?;
        report.ui = self.run_slot(TaskKind::Ui, tasks)?;
        Ok(report)
    }

    fn slot(&self, task: TaskKind) -> &TaskSlot {
        match task {
            TaskKind::Image => &self.image,
            TaskKind::Ui => &self.ui,
        }
    }

    fn run_slot(&self, task: TaskKind, tasks: &mut dyn FrameTasks) -> Result<bool, SchedulerError> {
        let slot = self.slot(task);
        if slot.running.get() {
            return Err(SchedulerError::Reentrant(task));
        }
        if !slot.dirty.replace(false) {
            return Ok(false);
        }
        slot.running.set(true);
        let _guard = RunningGuard(&slot.running);
        let result = match task {
            TaskKind::Image => tasks.render_image(self),
            TaskKind::Ui => tasks.render_ui(self),
        };
        result.map_err(|source| SchedulerError::Task { task, source })?;
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct Recorder {
        image_runs: u32,
        ui_runs: u32,
        redirty_image: bool,
        nested: Option<String>,
        fail: bool,
    }

    impl FrameTasks for Recorder {
        fn render_image(&mut self, frame: &FrameLoop) -> anyhow::Result<()> {
            self.image_runs += 1;
            if self.redirty_image {
                frame.mark_image_dirty();
            }
            if self.fail {
                anyhow::bail!("device lost");
            }
            Ok(())
        }

        fn render_ui(&mut self, frame: &FrameLoop) -> anyhow::Result<()> {
            self.ui_runs += 1;
            if self.nested.is_none() {
                let mut inner = Recorder::default();
                frame.mark_image_dirty();
                if let Err(err) = frame.tick(&mut inner) {
                    self.nested = Some(err.to_string());
                }
            }
            Ok(())
        }
    }

    #[test]
    fn runs_only_dirty_tasks() {
        let frame = FrameLoop::new(None);
        let mut tasks = Recorder {
            nested: Some(String::new()),
            ..Recorder::default()
        };
        assert!(!frame.tick(&mut tasks).unwrap().ran_anything());

        frame.mark_image_dirty();
        let report = frame.tick(&mut tasks).unwrap();
        assert_eq!(report, TickReport { image: true, ui: false });
        assert!(!frame.is_dirty());

        frame.mark_ui_dirty();
        frame.tick(&mut tasks).unwrap();
        assert_eq!((tasks.image_runs, tasks.ui_runs), (1, 1));
    }

    #[test]
    fn self_dirtying_task_runs_next_tick() {
        let frame = FrameLoop::new(None);
        let mut tasks = Recorder {
            redirty_image: true,
            nested: Some(String::new()),
            ..Recorder::default()
        };
        frame.mark_image_dirty();
        frame.tick(&mut tasks).unwrap();
        assert_eq!(tasks.image_runs, 1);
        assert!(frame.is_dirty());
        frame.tick(&mut tasks).unwrap();
        assert_eq!(tasks.image_runs, 2);
    }

    #[test]
    fn nested_tick_is_rejected() {
        let frame = FrameLoop::new(None);
        let mut tasks = Recorder::default();
        frame.mark_ui_dirty();
        frame.tick(&mut tasks).unwrap();
        // The image slot is free, the ui slot is running.
        assert_eq!(tasks.nested.as_deref(), Some("ui task is already running"));
        assert_eq!(tasks.ui_runs, 1);
    }

    #[test]
    fn failing_task_releases_its_slot() {
        let frame = FrameLoop::new(None);
        let mut tasks = Recorder {
            fail: true,
            nested: Some(String::new()),
            ..Recorder::default()
        };
        frame.mark_image_dirty();
        let err = frame.tick(&mut tasks).unwrap_err();
        assert!(matches!(err, SchedulerError::Task { task: TaskKind::Image, .. }));

        tasks.fail = false;
        frame.mark_image_dirty();
        assert!(frame.tick(&mut tasks).unwrap().image);
    }

    #[test]
    fn frame_interval_gates_ticks() {
        let frame = FrameLoop::new(Some(Duration::from_millis(20)));
        let mut tasks = Recorder {
            nested: Some(String::new()),
            ..Recorder::default()
        };
        let start = Instant::now();
        frame.mark_image_dirty();
        assert!(frame.tick_if_due(start, &mut tasks).unwrap().is_some());

        frame.mark_image_dirty();
        assert!(!frame.due(start + Duration::from_millis(5)));
        assert!(frame
            .tick_if_due(start + Duration::from_millis(5), &mut tasks)
            .unwrap()
            .is_none());
        assert!(frame.is_dirty());

        let later = start + Duration::from_millis(20);
        assert_eq!(
            frame.tick_if_due(later, &mut tasks).unwrap(),
            Some(TickReport { image: true, ui: false })
        );
    }

    #[test]
    fn zero_interval_is_uncapped() {
        let frame = FrameLoop::new(Some(Duration::ZERO));
        assert_eq!(frame.frame_interval(), None);
        assert!(frame.due(Instant::now()));
    }
}
