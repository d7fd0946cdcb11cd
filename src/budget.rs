//! Budget tracker: hard daily ceiling on generative spend (USD and tokens).
//!
//! Every mutation goes through one mutex, so "check then add" is atomic and
//! concurrent callers can never push the counters past a ceiling. Calls that
//! have not reported their real cost yet hold a [`Reservation`]; reserved
//! headroom counts against the ceiling until it is settled or dropped.
//!
//! Store writes run on tokio's blocking pool when a runtime is present and are
//! versioned, so a slow write never replaces a newer state. [`BudgetTracker::flush`]
//! waits for the latest state to land.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::NaiveDate;
use metrics::{counter, gauge};
use parking_lot::Mutex;

use crate::error::{BudgetExceeded, StoreError};
use crate::model::BudgetState;

// ------------------------------------------------------------
// Persistence
// ------------------------------------------------------------

pub trait BudgetStore: Send + Sync {
    /// `Ok(None)` when nothing was persisted yet.
    fn load(&self) -> Result<Option<BudgetState>, StoreError>;
    fn save(&self, state: &BudgetState) -> Result<(), StoreError>;
}

/// Budget state kept in a single JSON file, replaced atomically (tmp + rename).
pub struct JsonFileBudgetStore {
    path: PathBuf,
}

impl JsonFileBudgetStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl BudgetStore for JsonFileBudgetStore {
    fn load(&self) -> Result<Option<BudgetState>, StoreError> {
        if !self.path.exists() {
            return Ok(None);
        }
        let s = fs::read_to_string(&self.path)?;
        if s.trim().is_empty() {
            return Ok(None);
        }
        Ok(Some(serde_json::from_str(&s)?))
    }

    fn save(&self, state: &BudgetState) -> Result<(), StoreError> {
        if let Some(dir) = self.path.parent() {
            if !dir.as_os_str().is_empty() {
                fs::create_dir_all(dir)?;
            }
        }
        let tmp = self.path.with_extension("json.tmp");
        let json = serde_json::to_string_pretty(state)?;
        let mut f = fs::File::create(&tmp)?;
        f.write_all(json.as_bytes())?;
        f.sync_all()?;
        fs::rename(tmp, &self.path)?;
        Ok(())
    }
}

#[derive(Default)]
pub struct MemoryBudgetStore {
    state: Mutex<Option<BudgetState>>,
}

impl MemoryBudgetStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl BudgetStore for MemoryBudgetStore {
    fn load(&self) -> Result<Option<BudgetState>, StoreError> {
        Ok(self.state.lock().clone())
    }

    fn save(&self, state: &BudgetState) -> Result<(), StoreError> {
        *self.state.lock() = Some(state.clone());
        Ok(())
    }
}

// ------------------------------------------------------------
// Tracker
// ------------------------------------------------------------

#[derive(Debug)]
struct Ledger {
    state: BudgetState,
    reserved_usd: f64,
    reserved_tokens: u64,
    /// Bumped on every change to `state`.
    version: u64,
}

impl Ledger {
    fn headroom(&self) -> (f64, u64) {
        let usd = (self.state.max_usd - self.state.spent_usd - self.reserved_usd).max(0.0);
        let tokens = self
            .state
            .max_tokens
            .saturating_sub(self.state.spent_tokens)
            .saturating_sub(self.reserved_tokens);
        (usd, tokens)
    }

    /// Strict comparison against the ceiling; no tolerance.
    fn admits(&self, usd: f64, tokens: u64) -> bool {
        let usd_ok = self.state.spent_usd + self.reserved_usd + usd <= self.state.max_usd;
        let tokens_ok = self
            .state
            .spent_tokens
            .checked_add(self.reserved_tokens)
            .and_then(|t| t.checked_add(tokens))
            .map(|t| t <= self.state.max_tokens)
            .unwrap_or(false);
        usd_ok && tokens_ok
    }

    fn refusal(&self, usd: f64, tokens: u64) -> BudgetExceeded {
        let (remaining_usd, remaining_tokens) = self.headroom();
        BudgetExceeded {
            requested_usd: usd,
            requested_tokens: tokens,
            remaining_usd,
            remaining_tokens,
        }
    }
}

/// Remaining headroom after committed spend and open reservations.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Remaining {
    pub usd: f64,
    pub tokens: u64,
}

pub struct BudgetTracker {
    ledger: Mutex<Ledger>,
    store: Arc<dyn BudgetStore>,
    /// Highest ledger version the store holds.
    written: Arc<Mutex<u64>>,
}

impl std::fmt::Debug for BudgetTracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BudgetTracker")
            .field("ledger", &*self.ledger.lock())
            .finish()
    }
}

impl BudgetTracker {
    /// Restore today's counters from the store when they belong to `today`,
    /// otherwise start a fresh window. Ceilings always come from the caller.
    pub fn new(max_usd: f64, max_tokens: u64, today: NaiveDate, store: Arc<dyn BudgetStore>) -> Self {
        let max_usd = if max_usd.is_finite() { max_usd.max(0.0) } else { 0.0 };
        let mut state = BudgetState::fresh(today, max_usd, max_tokens);
        match store.load() {
            Ok(Some(prev)) if prev.window == today => {
                state.spent_usd = prev.spent_usd.clamp(0.0, max_usd);
                state.spent_tokens = prev.spent_tokens.min(max_tokens);
                state.overshoot_usd = prev.overshoot_usd.max(0.0);
                state.overshoot_tokens = prev.overshoot_tokens;
            }
            Ok(_) => {}
            Err(e) => {
                tracing::warn!(target: "budget", error = %e, "budget store load failed; starting fresh window");
            }
        }
        gauge!("budget_spent_usd").set(state.spent_usd);
        Self {
            ledger: Mutex::new(Ledger {
                state,
                reserved_usd: 0.0,
                reserved_tokens: 0,
                version: 0,
            }),
            store,
            written: Arc::new(Mutex::new(0)),
        }
    }

    /// In-memory tracker, mostly for tests and one-off runs.
    pub fn in_memory(max_usd: f64, max_tokens: u64, today: NaiveDate) -> Self {
        Self::new(max_usd, max_tokens, today, Arc::new(MemoryBudgetStore::new()))
    }

    pub fn get_state(&self) -> BudgetState {
        self.ledger.lock().state.clone()
    }

    pub fn remaining(&self) -> Remaining {
        let (usd, tokens) = self.ledger.lock().headroom();
        Remaining { usd, tokens }
    }

    /// Smaller of the USD and token headroom fractions, in `[0, 1]`.
    /// A zero ceiling reads as fully spent.
    pub fn remaining_fraction(&self) -> f64 {
        let g = self.ledger.lock();
        let (usd, tokens) = g.headroom();
        let f_usd = if g.state.max_usd > 0.0 {
            usd / g.state.max_usd
        } else {
            0.0
        };
        let f_tok = if g.state.max_tokens > 0 {
            tokens as f64 / g.state.max_tokens as f64
        } else {
            0.0
        };
        f_usd.min(f_tok).clamp(0.0, 1.0)
    }

    /// Atomically record spend, or refuse it without changing anything.
    pub fn commit_spend(&self, usd: f64, tokens: u64) -> Result<(), BudgetExceeded> {
        let usd = sanitize_usd(usd);
        let snapshot = {
            let mut g = self.ledger.lock();
            if !g.admits(usd, tokens) {
                let refusal = g.refusal(usd, tokens);
                drop(g);
                return Err(self.refused(refusal));
            }
            g.state.spent_usd += usd;
            g.state.spent_tokens += tokens;
            g.version += 1;
            (g.state.clone(), g.version)
        };
        self.persist(snapshot);
        Ok(())
    }

    /// Hold headroom for a call whose real cost is only known afterwards.
    pub fn reserve(self: &Arc<Self>, usd: f64, tokens: u64) -> Result<Reservation, BudgetExceeded> {
        let usd = sanitize_usd(usd);
        let mut g = self.ledger.lock();
        if !g.admits(usd, tokens) {
            let refusal = g.refusal(usd, tokens);
            drop(g);
            return Err(self.refused(refusal));
        }
        g.reserved_usd += usd;
        g.reserved_tokens += tokens;
        tracing::debug!(target: "budget", usd, tokens, "reserved");
        Ok(Reservation {
            tracker: Arc::clone(self),
            usd,
            tokens,
            open: true,
        })
    }

    /// Start a new window when `date` is later than the current one. Earlier
    /// dates never reset the counters. Returns `true` when counters were reset.
    pub fn roll_window(&self, date: NaiveDate) -> bool {
        let snapshot = {
            let mut g = self.ledger.lock();
            if date <= g.state.window {
                return false;
            }
            let (max_usd, max_tokens) = (g.state.max_usd, g.state.max_tokens);
            g.state = BudgetState::fresh(date, max_usd, max_tokens);
            g.version += 1;
            (g.state.clone(), g.version)
        };
        tracing::info!(target: "budget", window = %date, "budget window rolled");
        self.persist(snapshot);
        true
    }

    /// Write the current state and wait for it. No-op when the store is already current.
    pub async fn flush(&self) {
        let (state, version) = {
            let g = self.ledger.lock();
            (g.state.clone(), g.version)
        };
        if let Err(e) = tokio::task::spawn_blocking(self.save_job(state, version)).await {
            tracing::warn!(target: "budget", error = %e, "budget flush task failed");
        }
    }

    fn release(&self, usd: f64, tokens: u64) {
        let mut g = self.ledger.lock();
        g.reserved_usd = (g.reserved_usd - usd).max(0.0);
        g.reserved_tokens = g.reserved_tokens.saturating_sub(tokens);
    }

    /// Counts reported spend up to the reservation; anything above it goes
    /// to the overshoot counters.
    fn settle_reserved(&self, reserved_usd: f64, reserved_tokens: u64, usd: f64, tokens: u64) {
        let snapshot = {
            let mut g = self.ledger.lock();
            g.reserved_usd = (g.reserved_usd - reserved_usd).max(0.0);
            g.reserved_tokens = g.reserved_tokens.saturating_sub(reserved_tokens);
            g.state.spent_usd = (g.state.spent_usd + usd.min(reserved_usd)).min(g.state.max_usd);
            g.state.spent_tokens = g
                .state
                .spent_tokens
                .saturating_add(tokens.min(reserved_tokens))
                .min(g.state.max_tokens);
            g.state.overshoot_usd += (usd - reserved_usd).max(0.0);
            g.state.overshoot_tokens += tokens.saturating_sub(reserved_tokens);
            g.version += 1;
            (g.state.clone(), g.version)
        };
        self.persist(snapshot);
    }

    fn refused(&self, refusal: BudgetExceeded) -> BudgetExceeded {
        counter!("budget_refusals_total").increment(1);
        tracing::info!(
            target: "budget",
            requested_usd = refusal.requested_usd,
            requested_tokens = refusal.requested_tokens,
            remaining_usd = refusal.remaining_usd,
            remaining_tokens = refusal.remaining_tokens,
            "spend refused"
        );
        refusal
    }

    fn persist(&self, (state, version): (BudgetState, u64)) {
        gauge!("budget_spent_usd").set(state.spent_usd);
        let job = self.save_job(state, version);
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn_blocking(job);
            }
            Err(_) => job(),
        }
    }

    fn save_job(&self, state: BudgetState, version: u64) -> impl FnOnce() + Send + 'static {
        let store = Arc::clone(&self.store);
        let written = Arc::clone(&self.written);
        move || {
            let mut w = written.lock();
            if version <= *w {
                return;
            }
            match store.save(&state) {
                Ok(()) => *w = version,
                Err(e) => tracing::warn!(target: "budget", error = %e, version, "budget store save failed"),
            }
        }
    }
}

fn sanitize_usd(usd: f64) -> f64 {
    if usd.is_nan() {
        f64::INFINITY
    } else {
        usd.max(0.0)
    }
}

/// Headroom held on a [`BudgetTracker`]. Dropping it without [`settle`](Self::settle)
/// gives the headroom back unspent.
#[must_use = "an unsettled reservation is released on drop"]
pub struct Reservation {
    tracker: Arc<BudgetTracker>,
    usd: f64,
    tokens: u64,
    open: bool,
}

impl Reservation {
    pub fn usd(&self) -> f64 {
        self.usd
    }

    pub fn tokens(&self) -> u64 {
        self.tokens
    }

    /// Record what the call actually cost. Spend counted against the ceiling
    /// stops at the reservation; the excess is kept in
    /// [`BudgetState::overshoot_usd`] and [`BudgetState::overshoot_tokens`].
    pub fn settle(mut self, usd: f64, tokens: u64) {
        let usd = if usd.is_finite() { usd.max(0.0) } else { self.usd };
        if usd > self.usd || tokens > self.tokens {
            counter!("budget_settle_overshoot_total").increment(1);
            tracing::warn!(
                target: "budget",
                reported_usd = usd,
                reported_tokens = tokens,
                reserved_usd = self.usd,
                reserved_tokens = self.tokens,
                "reported spend above reservation"
            );
        }
        self.open = false;
        self.tracker.settle_reserved(self.usd, self.tokens, usd, tokens);
    }
}

impl Drop for Reservation {
    fn drop(&mut self) {
        if self.open {
            self.tracker.release(self.usd, self.tokens);
        }
    }
}
