//! Working-copy pool.
//!
//! The pool owns a fixed set of slots. Each slot is a git worktree of the
//! continent, created on first use and reset (not destroyed) on release so
//! later cycles reuse the checkout. A cycle borrows a slot exclusively
//! through a [`WorkingCopy`]; the slot returns to the pool on
//! [`WorkingCopyPool::release`] or, failing that, when the copy is dropped.
//!
//! Size 0 is direct mode: one virtual slot bound to the continent itself,
//! with no worktree and no git operations.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::{debug, info, warn};

use crate::cancel::CancelSignal;
use crate::domain::error::{PaintressError, Result};
use crate::domain::work_item::WorkItem;
use crate::git::GitRunner;
use crate::process::{run_process, shell_command, ProcessRun};

/// Pool construction parameters.
#[derive(Debug, Clone)]
pub struct PoolConfig {
    pub continent: PathBuf,
    /// Number of slots; 0 selects direct mode.
    pub size: usize,
    /// Directory holding `worker-NNN` worktrees.
    pub worktree_root: PathBuf,
    pub base_branch: String,
    pub setup_cmd: Option<String>,
    /// Grace period for the setup command on cancellation.
    pub cancel_grace: Duration,
    /// Detach worktrees at the base branch instead of binding item branches.
    /// Used by dry runs, which must not create or move any branch.
    pub detached: bool,
}

#[derive(Debug)]
struct SlotRecord {
    ordinal: usize,
    path: PathBuf,
    created: bool,
    setup_complete: bool,
    /// Returned without a reset; reset before the next checkout.
    dirty: bool,
}

#[derive(Debug, Default)]
struct SlotTable {
    free: Mutex<Vec<SlotRecord>>,
}

impl SlotTable {
    fn put(&self, record: SlotRecord) {
        let mut free = self.free.lock().unwrap_or_else(|e| e.into_inner());
        free.push(record);
    }

    fn take(&self) -> Option<SlotRecord> {
        let mut free = self.free.lock().unwrap_or_else(|e| e.into_inner());
        free.pop()
    }

    fn drain(&self) -> Vec<SlotRecord> {
        let mut free = self.free.lock().unwrap_or_else(|e| e.into_inner());
        std::mem::take(&mut *free)
    }
}

/// Exclusive borrow of one slot. Returns the slot to its table on drop.
#[derive(Debug)]
struct Lease {
    record: Option<SlotRecord>,
    table: Arc<SlotTable>,
    _permit: OwnedSemaphorePermit,
}

impl Drop for Lease {
    fn drop(&mut self) {
        if let Some(record) = self.record.take() {
            self.table.put(record);
        }
        // `_permit` drops after this, so the slot is back before a waiter wakes.
    }
}

/// One isolated, branch-scoped checkout of the continent, exclusively held
/// by a single cycle.
#[derive(Debug)]
pub struct WorkingCopy {
    slot: usize,
    branch: String,
    path: PathBuf,
    direct: bool,
    released: bool,
    lease: Lease,
}

impl WorkingCopy {
    pub fn slot(&self) -> usize {
        self.slot
    }

    pub fn branch(&self) -> &str {
        &self.branch
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Direct mode: the copy is the continent itself.
    pub fn is_direct(&self) -> bool {
        self.direct
    }

    pub fn setup_complete(&self) -> bool {
        self.record().is_some_and(|r| r.setup_complete)
    }

    fn record(&self) -> Option<&SlotRecord> {
        self.lease.record.as_ref()
    }

    fn record_mut(&mut self) -> Option<&mut SlotRecord> {
        self.lease.record.as_mut()
    }
}

/// Fixed-size pool of working copies.
pub struct WorkingCopyPool {
    config: PoolConfig,
    table: Arc<SlotTable>,
    permits: Arc<Semaphore>,
    capacity: usize,
}

impl WorkingCopyPool {
    pub fn new(config: PoolConfig) -> Self {
        let capacity = config.size.max(1);
        let table = Arc::new(SlotTable::default());
        for ordinal in (0..capacity).rev() {
            let path = if config.size == 0 {
                config.continent.clone()
            } else {
                config.worktree_root.join(format!("worker-{ordinal:03}"))
            };
            table.put(SlotRecord {
                ordinal,
                path,
                created: config.size == 0,
                setup_complete: false,
                dirty: false,
            });
        }
        Self {
            config,
            table,
            permits: Arc::new(Semaphore::new(capacity)),
            capacity,
        }
    }

    /// Configured size (0 in direct mode).
    pub fn size(&self) -> usize {
        self.config.size
    }

    /// Number of slots cycles can hold at once; at least 1.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn is_direct(&self) -> bool {
        self.config.size == 0
    }

    /// Slots not currently borrowed.
    pub fn available(&self) -> usize {
        self.permits.available_permits()
    }

    /// Acquire a copy for `item` and run the setup command if this slot has
    /// not been set up yet.
    pub async fn acquire(&self, item: &WorkItem, cancel: &CancelSignal) -> Result<WorkingCopy> {
        let mut copy = self.checkout(item, cancel).await?;
        if let Err(e) = self.ensure_setup(&mut copy, cancel).await {
            self.release(copy).await;
            return Err(e);
        }
        Ok(copy)
    }

    /// Wait for a free slot and bind it to a fresh branch for `item`.
    ///
    /// A leftover branch with commits of its own is never reset; the copy
    /// gets the next free suffixed name instead (`paintress/my-1-2`).
    /// Detached pools check out the base branch and touch no branch.
    ///
    /// Fails without allocating if `cancel` fires while waiting.
    pub async fn checkout(&self, item: &WorkItem, cancel: &CancelSignal) -> Result<WorkingCopy> {
        if let Some(reason) = cancel.reason() {
            return Err(PaintressError::Cancelled(reason));
        }

        let permit = tokio::select! {
            permit = Arc::clone(&self.permits).acquire_owned() => permit
                .map_err(|_| PaintressError::Acquisition("working-copy pool is closed".to_string()))?,
            reason = cancel.cancelled() => return Err(PaintressError::Cancelled(reason)),
        };

        let record = self.table.take().ok_or_else(|| {
            PaintressError::Acquisition("no free slot despite available permit".to_string())
        })?;

        let mut copy = WorkingCopy {
            slot: record.ordinal,
            branch: item.branch_name(),
            path: record.path.clone(),
            direct: self.is_direct(),
            released: false,
            lease: Lease {
                record: Some(record),
                table: Arc::clone(&self.table),
                _permit: permit,
            },
        };

        if !copy.direct {
            self.bind_branch(&mut copy).await.map_err(|e| {
                PaintressError::Acquisition(format!("slot {}: {e}", copy.slot))
            })?;
        }

        debug!(slot = copy.slot, branch = %copy.branch, path = %copy.path.display(), "working copy acquired");
        Ok(copy)
    }

    async fn bind_branch(&self, copy: &mut WorkingCopy) -> Result<()> {
        let base = self.config.base_branch.clone();
        let continent = GitRunner::new(&self.config.continent);
        if !self.config.detached {
            copy.branch = continent.free_branch_name(&copy.branch, &base).await?;
        }
        let branch = copy.branch.clone();
        let detached = self.config.detached;
        let path = copy.path.clone();
        let Some(record) = copy.record_mut() else {
            return Err(PaintressError::Acquisition("lease already returned".to_string()));
        };

        if !record.created {
            if let Some(parent) = path.parent() {
                tokio::fs::create_dir_all(parent).await?;
            }
            if path.exists() {
                // Left behind by an earlier run; rebuild it.
                let _ = continent.worktree_remove(&path).await;
                let _ = continent.worktree_prune().await;
                if path.exists() {
                    tokio::fs::remove_dir_all(&path).await?;
                }
            }
            if detached {
                continent.worktree_add_detached(&path, &base).await?;
            } else {
                continent.worktree_add(&path, &branch, &base).await?;
            }
            record.created = true;
            record.dirty = false;
            info!(slot = record.ordinal, path = %path.display(), "created worktree");
            return Ok(());
        }

        let git = GitRunner::new(&path);
        if record.dirty {
            git.discard_changes().await?;
            record.dirty = false;
        }
        if detached {
            git.detach_at(&base).await
        } else {
            git.checkout_fresh(&branch, &base).await
        }
    }

    /// Run the setup command once per slot. No-op when not configured or
    /// already done for this slot.
    pub async fn ensure_setup(&self, copy: &mut WorkingCopy, cancel: &CancelSignal) -> Result<()> {
        let Some(script) = self.config.setup_cmd.as_deref().filter(|s| !s.trim().is_empty()) else {
            return Ok(());
        };
        if copy.setup_complete() {
            return Ok(());
        }

        info!(slot = copy.slot, command = %script, "running setup command");
        let run = run_process(shell_command(script, &copy.path), cancel, self.config.cancel_grace)
            .await
            .map_err(|e| PaintressError::Setup(format!("failed to spawn setup: {e}")))?;

        match run {
            ProcessRun::Finished(out) if out.success => {
                if let Some(record) = copy.record_mut() {
                    record.setup_complete = true;
                }
                Ok(())
            }
            ProcessRun::Finished(out) => Err(PaintressError::Setup(out.failure_summary())),
            ProcessRun::Cancelled { reason } => Err(PaintressError::Cancelled(reason)),
        }
    }

    /// Return a copy to the pool, discarding uncommitted state and detaching
    /// at the base branch. The cycle branch itself is kept.
    ///
    /// A failed reset is logged and the slot is flagged for reset on its
    /// next checkout.
    pub async fn release(&self, mut copy: WorkingCopy) {
        if !copy.direct {
            let created = copy.record().is_some_and(|r| r.created);
            if created {
                let git = GitRunner::new(&copy.path);
                let reset = async {
                    git.discard_changes().await?;
                    git.detach_at(&self.config.base_branch).await
                };
                match reset.await {
                    Ok(()) => {
                        if let Some(record) = copy.record_mut() {
                            record.dirty = false;
                        }
                    }
                    Err(e) => {
                        warn!(slot = copy.slot, error = %e, "working copy reset failed");
                        if let Some(record) = copy.record_mut() {
                            record.dirty = true;
                        }
                    }
                }
            }
        }
        debug!(slot = copy.slot, branch = %copy.branch, "working copy released");
        copy.released = true;
        drop(copy);
    }

    /// Remove every created worktree and prune worktree metadata.
    ///
    /// Call once after all cycles have finished; borrowed slots are skipped.
    pub async fn shutdown(&self) -> Result<()> {
        if self.is_direct() {
            return Ok(());
        }
        let continent = GitRunner::new(&self.config.continent);
        let records = self.table.drain();
        for record in records.iter().filter(|r| r.created) {
            if let Err(e) = continent.worktree_remove(&record.path).await {
                warn!(path = %record.path.display(), error = %e, "worktree remove failed");
            }
        }
        continent.worktree_prune().await?;
        for mut record in records {
            record.created = false;
            record.setup_complete = false;
            self.table.put(record);
        }
        Ok(())
    }
}

impl Drop for WorkingCopy {
    fn drop(&mut self) {
        // Dropped without `release`: force a reset on the next checkout.
        if self.released || self.direct {
            return;
        }
        if let Some(record) = self.lease.record.as_mut() {
            if record.created {
                record.dirty = true;
            }
        }
    }
}
