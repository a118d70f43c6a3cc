use super::checkpoint::CursorStore;
use super::cursor::{PersistentCursor, SyncCursor};
use crate::common::{EngineError, EngineResult};
use std::fmt::{self, Display};
use std::future::Future;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Where a scan is in its page loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ScanState {
    Idle,
    FetchingPage,
    ProcessingPage,
    Advancing,
    Done,
}

impl fmt::Display for ScanState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ScanState::Idle => "idle",
            ScanState::FetchingPage => "fetching_page",
            ScanState::ProcessingPage => "processing_page",
            ScanState::Advancing => "advancing",
            ScanState::Done => "done",
        };
        f.write_str(name)
    }
}

/// How a scan reached [`ScanState::Done`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanOutcome {
    /// The cursor reached the total count.
    Completed,
    /// The remote returned an empty page before the total count was reached.
    Inconsistent,
    /// Shutdown was requested; the cursor points at the first unprocessed page.
    Interrupted,
    /// Fetching or processing a page failed.
    Failed,
}

/// Result of a finished scan.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScanSummary {
    pub outcome: ScanOutcome,
    /// Pages fully processed by this scan (not counting pages of an earlier run).
    pub pages: u64,
    pub items: u64,
    pub cursor: SyncCursor,
}

/// Position of a fetched page.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageInfo {
    pub skip: u64,
    /// Batch number the cursor records once this page is complete.
    pub number: u64,
    pub len: usize,
}

/// A page handed out by [`Paginator::next_page`].
#[derive(Debug)]
pub struct FetchedPage<T> {
    pub info: PageInfo,
    pub items: Vec<T>,
}

/// Drives one paginated scan as an explicit loop.
///
/// Pages are fetched strictly in skip order and a page is only requested once
/// the previous one has been completed. The loop ends when the cursor reaches
/// the total count captured when the scan started; later changes to the
/// remote collection size are not picked up.
///
/// Callers either hand both closures to [`scan`](Paginator::scan) or drive
/// the loop themselves with [`next_page`](Paginator::next_page) and
/// [`complete_page`](Paginator::complete_page).
pub struct Paginator {
    scope: String,
    cursor: PersistentCursor,
    page_size: u64,
    shutdown: CancellationToken,
    checkpoint: Option<Arc<dyn CursorStore>>,
    state: ScanState,
    history: Vec<ScanState>,
    outcome: Option<ScanOutcome>,
    pages: u64,
    items: u64,
}

impl Paginator {
    pub fn new(
        scope: impl Into<String>,
        cursor: PersistentCursor,
        page_size: u64,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            scope: scope.into(),
            cursor,
            page_size: page_size.max(1),
            shutdown,
            checkpoint: None,
            state: ScanState::Idle,
            history: vec![ScanState::Idle],
            outcome: None,
            pages: 0,
            items: 0,
        }
    }

    /// Save the cursor to `store` after every completed page.
    pub fn with_checkpoint(mut self, store: Arc<dyn CursorStore>) -> Self {
        self.checkpoint = Some(store);
        self
    }

    pub fn scope(&self) -> &str {
        &self.scope
    }

    pub fn state(&self) -> ScanState {
        self.state
    }

    /// Every state the scan has entered, in order, starting with `Idle`.
    pub fn history(&self) -> &[ScanState] {
        &self.history
    }

    pub fn cursor(&self) -> &PersistentCursor {
        &self.cursor
    }

    pub fn summary(&self) -> ScanSummary {
        ScanSummary {
            outcome: self.outcome.unwrap_or(ScanOutcome::Completed),
            pages: self.pages,
            items: self.items,
            cursor: self.cursor.snapshot(),
        }
    }

    fn transition(&mut self, next: ScanState) {
        log::trace!("Scan '{}': {} -> {}", self.scope, self.state, next);
        self.state = next;
        self.history.push(next);
    }

    fn finish(&mut self, outcome: ScanOutcome) {
        if self.state != ScanState::Done {
            self.transition(ScanState::Done);
        }
        self.outcome = Some(outcome);
    }

    /// Fetch the next page, or return `None` once the scan is done.
    ///
    /// # Errors
    ///
    /// [`EngineError::PageFetch`] when `fetch` fails. The scan is `Done`
    /// afterwards and must not be resumed from this instance.
    pub async fn next_page<T, E, F, Fut>(
        &mut self,
        fetch: &mut F,
    ) -> EngineResult<Option<FetchedPage<T>>>
    where
        F: FnMut(u64, u64) -> Fut,
        Fut: Future<Output = Result<Vec<T>, E>>,
        E: Display,
    {
        match self.state {
            ScanState::Done => return Ok(None),
            ScanState::FetchingPage | ScanState::ProcessingPage => {
                return Err(EngineError::malformed(
                    format!("scan '{}'", self.scope),
                    format!("next page requested while {}", self.state),
                ));
            }
            ScanState::Idle | ScanState::Advancing => {}
        }

        if self.cursor.is_complete() {
            log::debug!(
                "Scan '{}' complete at skip {} of {}",
                self.scope,
                self.cursor.last_skip(),
                self.cursor.total_count()
            );
            self.finish(ScanOutcome::Completed);
            return Ok(None);
        }

        if self.shutdown.is_cancelled() {
            log::info!(
                "Shutdown requested, scan '{}' stops before skip {}",
                self.scope,
                self.cursor.last_skip()
            );
            self.finish(ScanOutcome::Interrupted);
            return Ok(None);
        }

        self.transition(ScanState::FetchingPage);
        let skip = self.cursor.last_skip();
        log::debug!(
            "Fetching page of '{}' at skip {} (limit {})",
            self.scope,
            skip,
            self.page_size
        );

        let items = match fetch(skip, self.page_size).await {
            Ok(items) => items,
            Err(e) => {
                log::error!("Failed to fetch page of '{}' at skip {}: {}", self.scope, skip, e);
                self.finish(ScanOutcome::Failed);
                return Err(EngineError::PageFetch {
                    scope: self.scope.clone(),
                    skip,
                    reason: e.to_string(),
                });
            }
        };

        if items.is_empty() {
            log::warn!(
                "Remote returned an empty page for '{}' at skip {} although {} items were reported; stopping scan",
                self.scope,
                skip,
                self.cursor.total_count()
            );
            self.finish(ScanOutcome::Inconsistent);
            return Ok(None);
        }

        self.transition(ScanState::ProcessingPage);
        Ok(Some(FetchedPage {
            info: PageInfo {
                skip,
                number: self.cursor.last_batch_number() + 1,
                len: items.len(),
            },
            items,
        }))
    }

    /// Record `page` as fully processed and move the cursor past it.
    pub fn complete_page(&mut self, page: &PageInfo) {
        self.transition(ScanState::Advancing);
        self.cursor.advance(page.len as u64, page.number);
        self.pages += 1;
        self.items += page.len as u64;

        if let Some(store) = &self.checkpoint {
            if let Err(e) = store.save(&self.scope, &self.cursor.snapshot()) {
                log::error!("Failed to checkpoint scan '{}': {}", self.scope, e);
            }
        }

        if self.cursor.is_complete() {
            self.finish(ScanOutcome::Completed);
        }
    }

    /// Stop the scan without completing the page in progress.
    ///
    /// The cursor is left where it was, so a resumed run starts with the same
    /// page again.
    pub fn interrupt(&mut self) {
        log::info!(
            "Scan '{}' interrupted, cursor stays at skip {}",
            self.scope,
            self.cursor.last_skip()
        );
        self.finish(ScanOutcome::Interrupted);
    }

    /// Run the whole loop, handing every page to `on_page`.
    ///
    /// `on_page` returning [`EngineError::Interrupted`] ends the scan with
    /// [`ScanOutcome::Interrupted`] and leaves the page unacknowledged. Any
    /// other error ends the scan and is returned.
    pub async fn scan<T, E, F, Fut, P, PFut>(
        &mut self,
        mut fetch: F,
        mut on_page: P,
    ) -> EngineResult<ScanSummary>
    where
        F: FnMut(u64, u64) -> Fut,
        Fut: Future<Output = Result<Vec<T>, E>>,
        E: Display,
        P: FnMut(PageInfo, Vec<T>) -> PFut,
        PFut: Future<Output = EngineResult<()>>,
    {
        while let Some(page) = self.next_page(&mut fetch).await? {
            match on_page(page.info, page.items).await {
                Ok(()) => self.complete_page(&page.info),
                Err(EngineError::Interrupted) => {
                    self.interrupt();
                    break;
                }
                Err(e) => {
                    self.finish(ScanOutcome::Failed);
                    return Err(e);
                }
            }
        }

        let summary = self.summary();
        log::info!(
            "Scan '{}' finished ({:?}): {} pages, {} items, cursor at {}",
            self.scope,
            summary.outcome,
            summary.pages,
            summary.items,
            summary.cursor.last_skip
        );
        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    fn items(skip: u64, limit: u64, total: u64) -> Vec<u64> {
        (skip..(skip + limit).min(total)).collect()
    }

    #[tokio::test]
    async fn test_scan_25_items_in_pages_of_10() {
        let mut paginator =
            Paginator::new("assets", PersistentCursor::new(25), 10, CancellationToken::new());
        let skips = Mutex::new(Vec::new());
        let batches = Mutex::new(Vec::new());

        let summary = paginator
            .scan(
                |skip, limit| {
                    skips.lock().unwrap().push(skip);
                    async move { Ok::<_, String>(items(skip, limit, 25)) }
                },
                |info, page| {
                    batches.lock().unwrap().push((info.number, page.len()));
                    async { Ok(()) }
                },
            )
            .await
            .unwrap();

        assert_eq!(*skips.lock().unwrap(), vec![0, 10, 20]);
        assert_eq!(*batches.lock().unwrap(), vec![(1, 10), (2, 10), (3, 5)]);
        assert_eq!(summary.outcome, ScanOutcome::Completed);
        assert_eq!(summary.cursor.last_skip, 25);
        assert_eq!(summary.cursor.last_batch_number, 3);
        assert_eq!(paginator.state(), ScanState::Done);
        assert_eq!(
            &paginator.history()[..5],
            &[
                ScanState::Idle,
                ScanState::FetchingPage,
                ScanState::ProcessingPage,
                ScanState::Advancing,
                ScanState::FetchingPage,
            ]
        );
        assert_eq!(paginator.history().last(), Some(&ScanState::Done));
    }

    #[tokio::test]
    async fn test_empty_first_page_terminates() {
        let mut paginator =
            Paginator::new("entries/blog", PersistentCursor::new(40), 10, CancellationToken::new());
        let calls = Mutex::new(0);

        let summary = paginator
            .scan(
                |_, _| {
                    *calls.lock().unwrap() += 1;
                    async { Ok::<Vec<u64>, String>(Vec::new()) }
                },
                |_, _| async { Ok(()) },
            )
            .await
            .unwrap();

        assert_eq!(*calls.lock().unwrap(), 1);
        assert_eq!(summary.outcome, ScanOutcome::Inconsistent);
        assert_eq!(summary.cursor.last_skip, 0);
        assert_eq!(paginator.state(), ScanState::Done);
    }

    #[tokio::test]
    async fn test_fetch_error_stops_scan() {
        let mut paginator =
            Paginator::new("assets", PersistentCursor::new(30), 10, CancellationToken::new());

        let result = paginator
            .scan(
                |skip, limit| async move {
                    if skip == 10 {
                        Err("connection reset".to_string())
                    } else {
                        Ok(items(skip, limit, 30))
                    }
                },
                |_, _| async { Ok(()) },
            )
            .await;

        assert!(matches!(result, Err(EngineError::PageFetch { skip: 10, .. })));
        assert_eq!(paginator.state(), ScanState::Done);
        assert_eq!(paginator.cursor().last_skip(), 10);
    }

    #[tokio::test]
    async fn test_resume_skips_completed_pages() {
        let snapshot = SyncCursor {
            last_skip: 20,
            last_batch_number: 2,
            total_count: Some(25),
        };
        let cursor = PersistentCursor::load_from(snapshot).unwrap();
        let mut paginator = Paginator::new("assets", cursor, 10, CancellationToken::new());
        let seen = Mutex::new(Vec::new());

        let summary = paginator
            .scan(
                |skip, limit| async move { Ok::<_, String>(items(skip, limit, 25)) },
                |_, page| {
                    seen.lock().unwrap().extend(page);
                    async { Ok(()) }
                },
            )
            .await
            .unwrap();

        assert_eq!(*seen.lock().unwrap(), vec![20, 21, 22, 23, 24]);
        assert_eq!(summary.pages, 1);
        assert_eq!(summary.cursor.last_batch_number, 3);
    }

    #[tokio::test]
    async fn test_shutdown_before_first_page() {
        let token = CancellationToken::new();
        token.cancel();
        let mut paginator = Paginator::new("assets", PersistentCursor::new(25), 10, token);

        let summary = paginator
            .scan(
                |_, _| async { Ok::<Vec<u64>, String>(vec![1]) },
                |_, _| async { Ok(()) },
            )
            .await
            .unwrap();

        assert_eq!(summary.outcome, ScanOutcome::Interrupted);
        assert_eq!(summary.pages, 0);
        assert_eq!(paginator.history(), &[ScanState::Idle, ScanState::Done]);
    }

    #[tokio::test]
    async fn test_interrupted_page_is_not_advanced() {
        let mut paginator =
            Paginator::new("assets", PersistentCursor::new(25), 10, CancellationToken::new());

        let summary = paginator
            .scan(
                |skip, limit| async move { Ok::<_, String>(items(skip, limit, 25)) },
                |info, _| async move {
                    if info.skip == 10 {
                        Err(EngineError::Interrupted)
                    } else {
                        Ok(())
                    }
                },
            )
            .await
            .unwrap();

        assert_eq!(summary.outcome, ScanOutcome::Interrupted);
        assert_eq!(summary.cursor.last_skip, 10);
        assert_eq!(summary.pages, 1);
    }

    #[tokio::test]
    async fn test_already_complete_cursor_fetches_nothing() {
        let mut cursor = PersistentCursor::new(5);
        cursor.advance(5, 1);
        let mut paginator = Paginator::new("locales", cursor, 10, CancellationToken::new());

        let mut fetch = |_: u64, _: u64| async { Ok::<Vec<u64>, String>(vec![1]) };
        assert!(paginator.next_page(&mut fetch).await.unwrap().is_none());
        assert_eq!(paginator.summary().outcome, ScanOutcome::Completed);
    }
}
