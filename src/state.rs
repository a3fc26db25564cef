//! Evaluation state: the paged register file, memoization stack,
//! instruction meter and cancellation flag.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::consts::PAGE_SIZE;
use crate::error::EvalError;
use crate::pool::PagePool;
use crate::value::Value;

/// One page of register slots with its definedness and data-origin bitsets.
///
/// The slot array always holds values; whether a local is *defined* is
/// tracked separately, which is what keeps "undefined" out of the value
/// domain.
#[derive(Debug, Clone)]
pub struct Page {
    slots: [Value; PAGE_SIZE],
    defined: u32,
    data: u32,
}

impl Default for Page {
    fn default() -> Self {
        Self {
            slots: std::array::from_fn(|_| Value::Null),
            defined: 0,
            data: 0,
        }
    }
}

impl Page {
    /// Clear all slots and bitsets.
    pub fn reset(&mut self) {
        for slot in &mut self.slots {
            *slot = Value::Null;
        }
        self.defined = 0;
        self.data = 0;
    }
}

/// The register file of one frame: a primary inline page plus overflow
/// pages drawn from the per-VM pool. Local `i` lives in page `i / 32` at
/// slot `i % 32`.
#[derive(Debug)]
pub struct Locals {
    primary: Page,
    overflow: Vec<Box<Page>>,
    pool: PagePool,
}

impl Locals {
    /// Fresh register file backed by `pool`.
    pub fn new(pool: PagePool) -> Self {
        Self {
            primary: Page::default(),
            overflow: Vec::new(),
            pool,
        }
    }

    fn page(&self, idx: u32) -> Option<&Page> {
        match (idx as usize) / PAGE_SIZE {
            0 => Some(&self.primary),
            n => self.overflow.get(n - 1).map(|b| b.as_ref()),
        }
    }

    fn page_mut(&mut self, idx: u32) -> &mut Page {
        let n = (idx as usize) / PAGE_SIZE;
        if n == 0 {
            return &mut self.primary;
        }
        while self.overflow.len() < n {
            let page = self.pool.take();
            self.overflow.push(page);
        }
        &mut self.overflow[n - 1]
    }

    fn bit(idx: u32) -> u32 {
        1 << ((idx as usize) % PAGE_SIZE)
    }

    /// Value of a defined local.
    pub fn get(&self, idx: u32) -> Option<&Value> {
        let page = self.page(idx)?;
        if page.defined & Self::bit(idx) == 0 {
            return None;
        }
        Some(&page.slots[(idx as usize) % PAGE_SIZE])
    }

    /// Mutable access to a defined local.
    pub fn get_mut(&mut self, idx: u32) -> Option<&mut Value> {
        if !self.is_defined(idx) {
            return None;
        }
        let page = self.page_mut(idx);
        Some(&mut page.slots[(idx as usize) % PAGE_SIZE])
    }

    /// True when the local is defined.
    pub fn is_defined(&self, idx: u32) -> bool {
        self.page(idx)
            .map(|p| p.defined & Self::bit(idx) != 0)
            .unwrap_or(false)
    }

    /// Define the local, clearing any data-origin flag.
    pub fn set(&mut self, idx: u32, value: Value) {
        let bit = Self::bit(idx);
        let page = self.page_mut(idx);
        page.slots[(idx as usize) % PAGE_SIZE] = value;
        page.defined |= bit;
        page.data &= !bit;
    }

    /// Reset the local to undefined.
    pub fn unset(&mut self, idx: u32) {
        let bit = Self::bit(idx);
        let page = self.page_mut(idx);
        page.slots[(idx as usize) % PAGE_SIZE] = Value::Null;
        page.defined &= !bit;
        page.data &= !bit;
    }

    /// Copy a slot: value plus definedness and data flag. Used by argument
    /// passing and `with` save/restore.
    pub fn snapshot(&self, idx: u32) -> Option<(Value, bool)> {
        let v = self.get(idx)?.clone();
        Some((v, self.is_data(idx)))
    }

    /// Restore a slot snapshot taken with [`Locals::snapshot`].
    pub fn restore(&mut self, idx: u32, snapshot: Option<(Value, bool)>) {
        match snapshot {
            Some((v, data)) => {
                self.set(idx, v);
                self.set_data_flag(idx, data);
            }
            None => self.unset(idx),
        }
    }

    /// Flag the local as originating from the data document.
    pub fn set_data_flag(&mut self, idx: u32, flag: bool) {
        let bit = Self::bit(idx);
        let page = self.page_mut(idx);
        if flag {
            page.data |= bit;
        } else {
            page.data &= !bit;
        }
    }

    /// True when the local was derived from the data document.
    pub fn is_data(&self, idx: u32) -> bool {
        self.page(idx)
            .map(|p| p.data & Self::bit(idx) != 0)
            .unwrap_or(false)
    }

    /// Copy of this register file with all slots and bitsets, drawing
    /// overflow pages from the same pool. Values are shallow copies.
    pub fn fork(&self) -> Locals {
        let mut forked = Locals::new(self.pool.clone());
        forked.primary = self.primary.clone();
        for page in &self.overflow {
            let mut copy = self.pool.take();
            *copy = (**page).clone();
            forked.overflow.push(copy);
        }
        forked
    }

    /// Return overflow pages to the pool and clear the primary page. The
    /// register file must not be used past this point within a frame.
    pub fn release(&mut self) {
        for page in self.overflow.drain(..) {
            self.pool.recycle(page);
        }
        self.primary.reset();
    }
}

impl Drop for Locals {
    fn drop(&mut self) {
        self.release();
    }
}

/// Per-statement instruction meter.
#[derive(Debug, Clone, Copy)]
pub struct Meter {
    used: u64,
    limit: u64,
}

impl Meter {
    /// Meter with the given statement budget.
    pub fn new(limit: u64) -> Self {
        Self {
            used: 0,
            limit,
        }
    }

    /// Count one statement, failing once the budget is exhausted.
    pub fn tick(&mut self) -> Result<(), EvalError> {
        self.used += 1;
        if self.used > self.limit {
            return Err(EvalError::InstructionsLimitExceeded(self.limit));
        }
        Ok(())
    }

    /// Statements executed so far.
    pub const fn used(&self) -> u64 {
        self.used
    }
}

/// Shared cancellation flag.
///
/// The flag is flipped either directly by the caller or by a watcher
/// thread subscribed to the caller's deadline; the interpreter polls it at
/// every statement boundary and inside long-running generators.
#[derive(Debug, Default, Clone)]
pub struct Cancel {
    flag: Arc<AtomicBool>,
}

impl Cancel {
    /// Fresh, unset flag.
    pub fn new() -> Self {
        Self::default()
    }

    /// Flip the flag. Every evaluation sharing it observes the cancel at
    /// its next checkpoint.
    pub fn cancel(&self) {
        self.flag.store(true, Ordering::Release);
    }

    /// Current state of the flag.
    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::Acquire)
    }

    /// Spawn a watcher that cancels after `timeout`.
    pub fn cancel_after(&self, timeout: Duration) -> std::thread::JoinHandle<()> {
        let this = self.clone();
        std::thread::spawn(move || {
            std::thread::sleep(timeout);
            this.cancel();
        })
    }

    /// Checkpoint: error out when the flag is set.
    pub fn check(&self) -> Result<(), EvalError> {
        if self.is_cancelled() {
            Err(EvalError::Cancel)
        } else {
            Ok(())
        }
    }
}

/// Stack of memoization frames. Each frame maps a function-table index to
/// the memoized call result; lookups only consult the top frame.
#[derive(Debug, Default)]
pub struct MemoStack {
    frames: Vec<HashMap<u32, Option<Value>>>,
}

impl MemoStack {
    /// Stack with the root frame installed.
    pub fn new() -> Self {
        Self {
            frames: vec![HashMap::new()],
        }
    }

    /// Enter a nested scope.
    pub fn push(&mut self) {
        self.frames.push(HashMap::new());
    }

    /// Leave a nested scope, discarding its memo entries.
    pub fn pop(&mut self) {
        self.frames.pop();
    }

    /// Memoized result for a function index in the current scope.
    pub fn get(&self, func: u32) -> Option<&Option<Value>> {
        self.frames.last().and_then(|f| f.get(&func))
    }

    /// Memoize a call result in the current scope.
    pub fn insert(&mut self, func: u32, result: Option<Value>) {
        if let Some(frame) = self.frames.last_mut() {
            frame.insert(func, result);
        }
    }
}
