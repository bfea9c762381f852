//! Green-stack root registry
//!
//! Collections must see every reference held on a green stack. A green
//! stack is never the native stack of the OS thread running it, so every
//! one is listed here for its whole life with its bounds and status (see
//! [`RootRegistry::for_each_registered`]). A collector scans a running
//! green stack in place of the native stack of the thread executing it.
//!
//! A parked stack is covered here: its saved stack pointer and stack top
//! bound the live range, which [`RootRegistry::scan_parked`] reports word
//! by word to a conservative visitor, together with the callee-saved
//! registers kept in its control block.
//!
//! Switching out takes two steps. The green thread first marks its stack
//! as parking, while its registers are still live; the host publishes the
//! saved registers once the switch has returned. A scan waits for every
//! parking stack to be published, so no stack is ever missing from a scan
//! while it moves from running to parked.
//!
//! The registry lock doubles as the scan barrier. A scan holds it for its
//! whole duration, and resuming a parked stack must take it to unpark, so
//! no parked stack starts running while it is being scanned.

use std::collections::HashMap;
use std::sync::{Condvar, Mutex, MutexGuard, OnceLock, PoisonError};

use greenrt_core::{kdebug, GcRoots, LogicalThreadId, SavedRegs, StackBounds};

use crate::lock;

/// Where a scanned word lives
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RootSlot {
    /// Address on a parked stack
    Stack(usize),
    /// Index into the parked thread's saved registers
    Register(usize),
}

/// What a registered stack is doing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StackStatus {
    /// Executing on some OS thread
    Running,
    /// Switching out; registers not yet published
    Parking,
    /// Suspended with its registers saved
    Parked,
}

#[derive(Debug, Clone, Copy)]
struct Parked {
    sp: usize,
    regs: SavedRegs,
}

#[derive(Debug, Clone, Copy)]
enum StackState {
    Running,
    Parking { sp: usize },
    Parked(Parked),
}

#[derive(Debug, Clone, Copy)]
struct StackEntry {
    bounds: StackBounds,
    state: StackState,
}

impl StackEntry {
    fn status(&self) -> StackStatus {
        match self.state {
            StackState::Running => StackStatus::Running,
            StackState::Parking { .. } => StackStatus::Parking,
            StackState::Parked(_) => StackStatus::Parked,
        }
    }

    fn parked(&self) -> Option<&Parked> {
        match &self.state {
            StackState::Parked(p) => Some(p),
            _ => None,
        }
    }
}

type Stacks = HashMap<LogicalThreadId, StackEntry>;

#[derive(Default)]
pub struct RootRegistry {
    stacks: Mutex<Stacks>,
    /// Signalled whenever a parking stack is published or dropped
    settled: Condvar,
}

impl RootRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registered green stacks
    pub fn len(&self) -> usize {
        lock(&self.stacks).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Green stacks currently parked
    pub fn parked_count(&self) -> usize {
        lock(&self.stacks)
            .values()
            .filter(|e| e.parked().is_some())
            .count()
    }

    /// Status of one registered stack
    pub fn status(&self, owner: LogicalThreadId) -> Option<StackStatus> {
        lock(&self.stacks).get(&owner).map(StackEntry::status)
    }

    /// Visit every registered stack, running or not, with its bounds
    ///
    /// The registry is locked while `visitor` runs: nothing is registered,
    /// parked or resumed until this returns.
    pub fn for_each_registered<F>(&self, mut visitor: F)
    where
        F: FnMut(LogicalThreadId, StackBounds, StackStatus),
    {
        let stacks = lock(&self.stacks);
        for (&owner, entry) in stacks.iter() {
            visitor(owner, entry.bounds, entry.status());
        }
    }

    /// Lock the registry once no stack is halfway through parking
    fn lock_settled(&self) -> MutexGuard<'_, Stacks> {
        self.settled
            .wait_while(lock(&self.stacks), |stacks| {
                stacks
                    .values()
                    .any(|e| matches!(e.state, StackState::Parking { .. }))
            })
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Visit every pointer-sized word that may hold a root of a parked
    /// green thread: its saved registers and the live range of its stack
    ///
    /// `visitor` receives the owning thread, where the word lives and its
    /// value. Returns the number of words visited. Stacks that are still
    /// switching out are waited for, and no parked stack is resumed until
    /// this returns.
    pub fn scan_parked<F>(&self, mut visitor: F) -> usize
    where
        F: FnMut(LogicalThreadId, RootSlot, usize),
    {
        let stacks = self.lock_settled();
        let mut words = 0;
        for (&owner, entry) in stacks.iter() {
            let Some(parked) = entry.parked() else { continue };
            for (i, &word) in parked.regs.words().iter().enumerate() {
                visitor(owner, RootSlot::Register(i), word as usize);
                words += 1;
            }
            let start = parked.sp & !(size_of::<usize>() - 1);
            let mut addr = start.max(entry.bounds.limit);
            while addr + size_of::<usize>() <= entry.bounds.top {
                // Safety: [sp, top) of a registered stack is mapped and
                // nothing writes to it while it is parked and we hold the lock
                let word = unsafe { (addr as *const usize).read_volatile() };
                visitor(owner, RootSlot::Stack(addr), word);
                addr += size_of::<usize>();
                words += 1;
            }
        }
        words
    }

    /// Live range of a parked stack
    pub fn parked_range(&self, owner: LogicalThreadId) -> Option<(usize, usize)> {
        let stacks = lock(&self.stacks);
        let entry = stacks.get(&owner)?;
        entry.parked().map(|p| (p.sp, entry.bounds.top))
    }
}

impl GcRoots for RootRegistry {
    fn register_stack(&self, owner: LogicalThreadId, bounds: StackBounds) {
        lock(&self.stacks).insert(owner, StackEntry { bounds, state: StackState::Running });
    }

    fn begin_park(&self, owner: LogicalThreadId, sp: usize) {
        if let Some(entry) = lock(&self.stacks).get_mut(&owner) {
            debug_assert!(entry.bounds.contains(sp));
            entry.state = StackState::Parking { sp };
        }
    }

    fn park_stack(&self, owner: LogicalThreadId, sp: usize, regs: &SavedRegs) {
        if let Some(entry) = lock(&self.stacks).get_mut(&owner) {
            debug_assert!(entry.bounds.contains(sp));
            if let StackState::Parking { sp: published } = entry.state {
                // The switch only pushes, so the exact sp is never above it
                debug_assert!(sp <= published);
            }
            entry.state = StackState::Parked(Parked { sp, regs: *regs });
        }
        self.settled.notify_all();
    }

    fn unpark_stack(&self, owner: LogicalThreadId) {
        if let Some(entry) = lock(&self.stacks).get_mut(&owner) {
            entry.state = StackState::Running;
        }
    }

    fn unregister_stack(&self, owner: LogicalThreadId) {
        if lock(&self.stacks).remove(&owner).is_none() {
            kdebug!("unregister of unknown stack {}", owner);
        }
        self.settled.notify_all();
    }
}

static ROOTS: OnceLock<RootRegistry> = OnceLock::new();

/// Process-wide registry the switch primitive reports to
pub fn roots() -> &'static RootRegistry {
    ROOTS.get_or_init(RootRegistry::new)
}

/// Block until no scan of parked stacks is in progress
pub fn safe_point() {
    drop(lock(&roots().stacks));
}
