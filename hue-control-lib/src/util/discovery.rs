use std::cmp::max;
use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, Weak};

use derivative::Derivative;
use futures::future::{self, BoxFuture, FutureExt, Shared};
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use tokio::task::JoinSet;
use tokio_util::sync::{CancellationToken, DropGuard};

use crate::util::description::{serial_number, DescriptionSource};
use crate::util::error::DiscoveryError;
use crate::util::strategy::{MethodSelector, SearchMethod, Strategy, StrategySet};

/// A bridge found by a search.
#[derive(Derivative)]
#[derivative(Hash, PartialEq, Eq)]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Candidate {
    pub address: String,

    /**
    The bridge serial number from its description.

    `None` if the description could not be fetched or carried no serial number.
    Candidates are identified by address alone.
    */
    #[derivative(Hash = "ignore", PartialEq = "ignore")]
    pub id: Option<String>,
}

impl Candidate {
    pub fn new(address: String, id: Option<String>) -> Self {
        Candidate { address, id }
    }
}

/// What every caller of one search session receives.
pub type SearchResult = Result<Vec<Candidate>, DiscoveryError>;

type SharedSearch = Shared<BoxFuture<'static, SearchResult>>;

/**
The search currently in flight.

`guard` is weak: the strong references are held by the callers awaiting the
search, so the session is cancelled once all of them have gone away. A cancelled
session stays in the slot until its task has reaped every strategy.
 */
struct SessionHandle {
    id: u64,
    result: SharedSearch,
    guard: Weak<DropGuard>,
    cancel: CancellationToken,
}

type SessionSlot = Arc<Mutex<Option<SessionHandle>>>;

/// What a caller of [`Discovery::search`] found in the session slot.
enum Attach {
    /// A live session, joined or just started.
    Live(SharedSearch, Arc<DropGuard>),
    /// A cancelled session that is still being torn down.
    TearingDown(u64, SharedSearch),
}

/**
Races the search strategies and turns their results into [`Candidate`]s.

At most one search session runs per instance. A [`Discovery::search`] issued while
another is in flight joins it and receives the same result, whatever methods it
asked for.
 */
pub struct Discovery {
    strategies: StrategySet,
    describer: Arc<dyn DescriptionSource>,
    session: SessionSlot,
    next_session: AtomicU64,
}

impl Discovery {
    pub fn new(strategies: StrategySet, describer: Arc<dyn DescriptionSource>) -> Self {
        Discovery {
            strategies,
            describer,
            session: Arc::new(Mutex::new(None)),
            next_session: AtomicU64::new(1),
        }
    }

    /**
    Searches for bridges with the selected methods.

    The first method to find at least one address wins and the others are cancelled.
    Addresses are deduplicated in order of first occurrence and each is enriched with
    the bridge serial number.

    # Errors
    Only developer errors are returned, e.g. [`DiscoveryError::InvalidMethod`] when a
    method has no strategy. Finding nothing, timeouts and network failures all resolve
    to an empty list.

    Dropping the returned future abandons the search; once every caller of the
    session has done so the strategies are cancelled and their sockets closed.
     */
    pub async fn search(&self, selector: impl Into<MethodSelector>) -> SearchResult {
        let methods = selector.into().methods();
        debug!("Beginning a search using: {:?}", methods);
        let dispatched = self.strategies.dispatch(&methods)?;

        let (result, guard) = loop {
            match self.join_or_start(&dispatched) {
                Attach::Live(result, guard) => break (result, guard),
                Attach::TearingDown(id, teardown) => {
                    debug!("Waiting for search session {} to be torn down", id);
                    let _ = teardown.await;
                    clear_session(&self.session, id);
                }
            }
        };
        let candidates = result.await;
        drop(guard);
        candidates
    }

    /// Like [`Discovery::search`], with the methods given by name (`"upnp,nupnp"`).
    pub async fn search_named(&self, names: &str) -> SearchResult {
        let selector: MethodSelector = names.parse()?;
        self.search(selector).await
    }

    /// Whether a search session is currently in flight.
    pub fn is_searching(&self) -> bool {
        self.lock_session().is_some()
    }

    /// Cancels the search in flight, if any. Its callers receive an empty list.
    ///
    /// A search issued afterwards starts a new session once the cancelled one has
    /// reaped its strategies.
    pub fn cancel(&self) {
        if let Some(active) = self.lock_session().as_ref() {
            debug!("Disposing of search session {}", active.id);
            active.cancel.cancel();
        }
    }

    fn lock_session(&self) -> std::sync::MutexGuard<'_, Option<SessionHandle>> {
        self.session.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn join_or_start(&self, strategies: &[(SearchMethod, Arc<dyn Strategy>)]) -> Attach {
        let mut slot = self.lock_session();
        if let Some(active) = slot.as_ref() {
            if !active.cancel.is_cancelled() {
                if let Some(guard) = active.guard.upgrade() {
                    debug!("Joining search session {}", active.id);
                    return Attach::Live(active.result.clone(), guard);
                }
            }
            return Attach::TearingDown(active.id, active.result.clone());
        }

        let id = self.next_session.fetch_add(1, Ordering::Relaxed);
        let cancel = CancellationToken::new();
        let guard = Arc::new(cancel.clone().drop_guard());
        debug!("Starting search session {}", id);

        let task = tokio::spawn(run_session(
            id,
            strategies.to_vec(),
            self.describer.clone(),
            cancel.clone(),
            self.session.clone(),
        ));
        let result = task
            .map(|joined| {
                joined.unwrap_or_else(|e| {
                    warn!("Search session failed: {}", e);
                    Ok(Vec::new())
                })
            })
            .boxed()
            .shared();

        *slot = Some(SessionHandle {
            id,
            result: result.clone(),
            guard: Arc::downgrade(&guard),
            cancel,
        });
        Attach::Live(result, guard)
    }

    pub fn pretty_print_candidates(candidates: &[Candidate]) {
        let max_address_width = candidates
            .iter()
            .map(|c| c.address.len())
            .max()
            .unwrap_or(0);
        let max_id_width = candidates
            .iter()
            .map(|c| max(c.id.as_deref().map_or(0, str::len), 9))
            .max()
            .unwrap_or(0);

        println!(
            "{:<address_width$} {:<id_width$}",
            "Address",
            "Bridge ID",
            address_width = max(max_address_width, 7) + 2,
            id_width = max_id_width + 2,
        );
        println!(
            "{:<address_width$} {:<id_width$}",
            "-".repeat(max(max_address_width, 7)),
            "-".repeat(max_id_width),
            address_width = max(max_address_width, 7) + 2,
            id_width = max_id_width + 2,
        );
        for candidate in candidates {
            println!(
                "{:<address_width$} {:<id_width$}",
                candidate.address,
                candidate.id.as_deref().unwrap_or("-"),
                address_width = max(max_address_width, 7) + 2,
                id_width = max_id_width + 2,
            );
        }
    }
}

impl Drop for Discovery {
    fn drop(&mut self) {
        self.cancel();
    }
}

/// One search session, from race to teardown.
async fn run_session(
    id: u64,
    strategies: Vec<(SearchMethod, Arc<dyn Strategy>)>,
    describer: Arc<dyn DescriptionSource>,
    cancel: CancellationToken,
    slot: SessionSlot,
) -> SearchResult {
    let outcome = async {
        let addresses = race(strategies, &cancel).await?;
        let addresses = unique_addresses(addresses);
        debug!("Initial results deduplicated: {:?}", addresses);
        tokio::select! {
            _ = cancel.cancelled() => Err(DiscoveryError::Cancelled),
            candidates = enrich(describer.as_ref(), addresses) => Ok(candidates),
        }
    }
    .await;

    let settled = settle(outcome);
    clear_session(&slot, id);
    settled
}

/// Empties the slot if it still holds session `id`.
fn clear_session(slot: &SessionSlot, id: u64) {
    let mut slot = slot.lock().unwrap_or_else(PoisonError::into_inner);
    if slot.as_ref().is_some_and(|active| active.id == id) {
        debug!("Clearing out search session {}", id);
        *slot = None;
    }
}

/**
Runs every strategy concurrently and returns the first non-empty result.

Strategies that finish empty or with an operational error are skipped. A developer
error ends the race immediately. However the race ends, the remaining strategies
are cancelled and awaited before this returns.
 */
async fn race(
    strategies: Vec<(SearchMethod, Arc<dyn Strategy>)>,
    session: &CancellationToken,
) -> Result<Vec<String>, DiscoveryError> {
    let cancel = session.child_token();
    let mut tasks = JoinSet::new();
    for (method, strategy) in strategies {
        let token = cancel.child_token();
        debug!("Executing {} search method", method);
        tasks.spawn(async move {
            let outcome = strategy.run(token).await;
            (method, outcome)
        });
    }

    let mut last_error = DiscoveryError::NoResults;
    let winner = loop {
        tokio::select! {
            _ = cancel.cancelled() => break Err(DiscoveryError::Cancelled),
            joined = tasks.join_next() => match joined {
                None => break Err(last_error),
                Some(Ok((method, Ok(addresses)))) if !addresses.is_empty() => {
                    info!("{} found {} address(es)", method, addresses.len());
                    break Ok(addresses);
                }
                Some(Ok((method, Ok(_)))) => debug!("{} found nothing", method),
                Some(Ok((method, Err(e)))) if e.is_developer_error() => {
                    warn!("{} failed with a developer error: {}", method, e);
                    break Err(e);
                }
                Some(Ok((method, Err(e)))) => {
                    debug!("{} failed: {}", method, e);
                    last_error = e;
                }
                Some(Err(e)) => {
                    warn!("Search method task failed: {}", e);
                    last_error = DiscoveryError::Task(e.to_string());
                }
            },
        }
    };

    if !tasks.is_empty() {
        debug!("Cancelling {} pending search method(s)", tasks.len());
    }
    cancel.cancel();
    tasks.shutdown().await;
    winner
}

/// Removes repeated addresses, keeping the first occurrence of each.
pub(crate) fn unique_addresses(addresses: Vec<String>) -> Vec<String> {
    let mut seen = HashSet::new();
    addresses
        .into_iter()
        .filter(|address| seen.insert(address.clone()))
        .collect()
}

/// Looks up the serial number of every address; a failed lookup leaves `id` empty.
async fn enrich(describer: &dyn DescriptionSource, addresses: Vec<String>) -> Vec<Candidate> {
    let lookups = addresses.into_iter().map(|address| async move {
        debug!("Fetching description data for {}", address);
        let id = match describer.describe(&address).await {
            Ok(description) => serial_number(&description),
            Err(e) => {
                warn!("No description for {}: {:#}", address, e);
                None
            }
        };
        info!("Found bridge at {} with id {:?}", address, id);
        Candidate::new(address, id)
    });
    future::join_all(lookups).await
}

/// Developer errors are returned; any other failure means no bridges were found.
fn settle(outcome: Result<Vec<Candidate>, DiscoveryError>) -> SearchResult {
    match outcome {
        Ok(candidates) => Ok(candidates),
        Err(e) if e.is_developer_error() => Err(e),
        Err(e) => {
            debug!("The search failed ({}), resolving with an empty list", e);
            Ok(Vec::new())
        }
    }
}
