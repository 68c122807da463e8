//! Task/stack tracker.
//!
//! Each location owns one [`TaskStack`]: the frames of every task that runs
//! on it plus the free pools they are recycled through. A task's stack is a
//! chain of fixed-capacity frames; entering a region writes into the top
//! frame and only touches the frame pool when the frame is full. Frames that
//! become empty go back to the location's free list instead of being
//! dropped, so after warm-up enter and exit never allocate.
//!
//! ```text
//!   task ──► frame 7 [R3 R9 _ _ ...]   (top, 2 used)
//!               │ prev
//!               ▼
//!            frame 2 [R1 R4 R4 ... R8] (full, 30 used)
//!
//!   free frames: [5, 0]
//! ```
//!
//! The stack stores raw region handles, including
//! [`RegionHandle::FILTERED`]; the tracker does not interpret them.

use std::fmt;

use crate::definitions::RegionHandle;
use crate::error::{Error, ErrorKind, Result};
use crate::util::{Arena, ArenaIndex};

/// Region handles per frame.
pub const FRAME_CAPACITY: usize = 30;

/// Identifies a task within one [`TaskStack`].
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct TaskId(ArenaIndex);

impl fmt::Debug for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TaskId({}:{})", self.0.slot(), self.0.generation())
    }
}

#[derive(Debug, Clone)]
struct Frame {
    regions: [RegionHandle; FRAME_CAPACITY],
    prev: Option<u32>,
}

impl Frame {
    const EMPTY: Self = Self {
        regions: [RegionHandle::INVALID; FRAME_CAPACITY],
        prev: None,
    };
}

/// One unit of work and its live region stack.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Task {
    top_frame: Option<u32>,
    top_len: usize,
    depth: usize,
    thread_id: u32,
    generation: u32,
}

impl Task {
    const fn new(thread_id: u32, generation: u32) -> Self {
        Self {
            top_frame: None,
            top_len: 0,
            depth: 0,
            thread_id,
            generation,
        }
    }

    /// Number of open regions.
    #[must_use]
    pub const fn depth(&self) -> usize {
        self.depth
    }

    /// Creating thread, as numbered by the paradigm.
    #[must_use]
    pub const fn thread_id(&self) -> u32 {
        self.thread_id
    }

    /// Creation generation on that thread.
    #[must_use]
    pub const fn generation(&self) -> u32 {
        self.generation
    }
}

/// Pool usage of a [`TaskStack`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StackStats {
    /// Frames ever allocated.
    pub frames: usize,
    /// Frames waiting for reuse.
    pub free_frames: usize,
    /// Live tasks, including the implicit one.
    pub tasks: usize,
    /// Task slots waiting for reuse.
    pub pooled_tasks: usize,
}

/// All tasks of one location and their frame pool.
#[derive(Debug)]
pub struct TaskStack {
    frames: Vec<Frame>,
    free_frames: Vec<u32>,
    tasks: Arena<Task>,
    implicit: TaskId,
    current: TaskId,
}

impl Default for TaskStack {
    fn default() -> Self {
        Self::new()
    }
}

impl TaskStack {
    /// A tracker holding only the implicit task, which is current.
    #[must_use]
    pub fn new() -> Self {
        let mut tasks = Arena::new();
        let implicit = TaskId(tasks.alloc(Task::new(0, 0)));
        Self {
            frames: Vec::new(),
            free_frames: Vec::new(),
            tasks,
            implicit,
            current: implicit,
        }
    }

    /// The task every location starts with.
    #[must_use]
    pub const fn implicit(&self) -> TaskId {
        self.implicit
    }

    /// The task enter and exit operate on.
    #[must_use]
    pub const fn current(&self) -> TaskId {
        self.current
    }

    /// The task behind `id`.
    #[must_use]
    pub fn task(&self, id: TaskId) -> Option<&Task> {
        self.tasks.get(id.0)
    }

    fn current_task_mut(&mut self) -> &mut Task {
        match self.tasks.get_mut(self.current.0) {
            Some(task) => task,
            // `current` always names a live task: completing the current
            // task switches back to the implicit one, which is never freed.
            None => unreachable!("current task is not live"),
        }
    }

    fn take_frame(&mut self, prev: Option<u32>) -> u32 {
        let index = match self.free_frames.pop() {
            Some(index) => index,
            None => {
                self.frames.push(Frame::EMPTY);
                (self.frames.len() - 1) as u32
            }
        };
        self.frames[index as usize].prev = prev;
        index
    }

    /// Pushes `region` on the current task's stack.
    #[inline]
    pub fn enter(&mut self, region: RegionHandle) {
        let task = *self.current_task_mut();
        let (frame, slot) = match task.top_frame {
            Some(frame) if task.top_len < FRAME_CAPACITY => (frame, task.top_len),
            prev => (self.take_frame(prev), 0),
        };
        self.frames[frame as usize].regions[slot] = region;
        let task = self.current_task_mut();
        task.top_frame = Some(frame);
        task.top_len = slot + 1;
        task.depth += 1;
    }

    /// Pops the top region of the current task's stack. `None` if the stack
    /// is empty.
    #[inline]
    pub fn exit(&mut self) -> Option<RegionHandle> {
        let task = *self.current_task_mut();
        let frame = task.top_frame?;
        let slot = task.top_len - 1;
        let region = self.frames[frame as usize].regions[slot];
        let (top_frame, top_len) = if slot == 0 {
            self.free_frames.push(frame);
            let prev = self.frames[frame as usize].prev;
            (prev, if prev.is_some() { FRAME_CAPACITY } else { 0 })
        } else {
            (Some(frame), slot)
        };
        let task = self.current_task_mut();
        task.top_frame = top_frame;
        task.top_len = top_len;
        task.depth -= 1;
        Some(region)
    }

    /// The innermost open region of the current task.
    #[must_use]
    pub fn top(&self) -> Option<RegionHandle> {
        let task = self.task(self.current)?;
        let frame = task.top_frame?;
        Some(self.frames[frame as usize].regions[task.top_len - 1])
    }

    /// Number of open regions on the current task.
    #[must_use]
    pub fn depth(&self) -> usize {
        self.task(self.current).map_or(0, Task::depth)
    }

    /// Pops every open region of the current task, innermost first, and
    /// returns those that are not filtered.
    pub fn exit_all(&mut self) -> Vec<RegionHandle> {
        let mut exited = Vec::with_capacity(self.depth());
        while let Some(region) = self.exit() {
            if !region.is_filtered() {
                exited.push(region);
            }
        }
        exited
    }

    /// Drops the current task's stack without reporting the regions.
    pub fn clear_stack(&mut self) {
        while self.exit().is_some() {}
    }

    /// Creates a task with an empty stack. It does not become current.
    pub fn create_task(&mut self, thread_id: u32, generation: u32) -> TaskId {
        TaskId(self.tasks.alloc(Task::new(thread_id, generation)))
    }

    /// Makes `task` current and returns the previously current task.
    pub fn switch_to(&mut self, task: TaskId) -> Result<TaskId> {
        if !self.tasks.contains(task.0) {
            return Err(Error::new(ErrorKind::UnknownTask)
                .with_message(format!("switch to {task:?}")));
        }
        Ok(std::mem::replace(&mut self.current, task))
    }

    /// Retires `task`: its frames return to the pool and its slot is
    /// recycled. Completing the current task makes the implicit task
    /// current. The implicit task itself is only cleared.
    pub fn complete_task(&mut self, task: TaskId) -> Result<()> {
        if !self.tasks.contains(task.0) {
            return Err(Error::new(ErrorKind::UnknownTask)
                .with_message(format!("complete {task:?}")));
        }
        let previous = std::mem::replace(&mut self.current, task);
        self.clear_stack();
        if task == self.implicit {
            self.current = previous;
            return Ok(());
        }
        self.current = if previous == task {
            self.implicit
        } else {
            previous
        };
        self.tasks.release(task.0);
        Ok(())
    }

    /// Pool usage.
    #[must_use]
    pub fn stats(&self) -> StackStats {
        StackStats {
            frames: self.frames.len(),
            free_frames: self.free_frames.len(),
            tasks: self.tasks.len(),
            pooled_tasks: self.tasks.pooled(),
        }
    }
}
