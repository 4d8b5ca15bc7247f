use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::NaiveDate;

use crate::errors::{Result, StorageError};
use crate::models::{DateWindow, Page, RawRecord};

/// Bearer token for an upstream API.
#[derive(Clone, PartialEq, Eq)]
pub struct Token(String);

impl Token {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn secret(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Token(***)")
    }
}

/// One upstream "list records in [date, date + days)" endpoint.
#[async_trait]
pub trait RemoteSource: Send + Sync {
    /// Registry name of the data source this endpoint feeds.
    fn name(&self) -> &'static str;

    /// `Ok(None)` means the upstream refused to hand out a token.
    async fn get_token(&self) -> Result<Option<Token>>;

    /// Fetches one page. A rejected token must be reported as
    /// `StorageError::Unauthorized`, other non-success answers as
    /// `StorageError::Remote`.
    async fn fetch_page(
        &self,
        token: &Token,
        window: &DateWindow,
        page: u32,
        limit: u32,
    ) -> Result<Vec<RawRecord>>;
}

/// Walks an upstream's pages strictly sequentially, holding the token for the
/// duration of a run.
pub struct RemotePaginator {
    source: Arc<dyn RemoteSource>,
    page_size: u32,
    token: Option<Token>,
    requests: u64,
}

impl RemotePaginator {
    pub fn new(source: Arc<dyn RemoteSource>, page_size: u32) -> Self {
        Self {
            source,
            page_size,
            token: None,
            requests: 0,
        }
    }

    pub fn source_name(&self) -> &'static str {
        self.source.name()
    }

    /// Number of page requests issued so far, retries included.
    pub fn requests(&self) -> u64 {
        self.requests
    }

    async fn acquire_token(&mut self) -> Result<Token> {
        let token = match self.source.get_token().await {
            Ok(Some(token)) => token,
            Ok(None) => {
                return Err(StorageError::Auth(format!(
                    "{} did not return an access token",
                    self.source.name()
                )));
            }
            Err(StorageError::Auth(detail)) => return Err(StorageError::Auth(detail)),
            Err(err) => {
                return Err(StorageError::Auth(format!(
                    "{}: {}",
                    self.source.name(),
                    err
                )));
            }
        };
        self.token = Some(token.clone());
        Ok(token)
    }

    async fn current_token(&mut self) -> Result<Token> {
        match &self.token {
            Some(token) => Ok(token.clone()),
            None => self.acquire_token().await,
        }
    }

    /// Requests one page. A rejected token is refreshed once and the page
    /// retried once; anything else is returned as is.
    async fn request_page(&mut self, window: &DateWindow, page: u32, limit: u32) -> Result<Vec<RawRecord>> {
        let token = self.current_token().await?;
        self.requests += 1;
        match self.source.fetch_page(&token, window, page, limit).await {
            Err(StorageError::Unauthorized(detail)) => {
                log::warn!(
                    "{} rejected the access token ({}), refreshing",
                    self.source.name(),
                    detail
                );
                let fresh = self.acquire_token().await?;
                self.requests += 1;
                match self.source.fetch_page(&fresh, window, page, limit).await {
                    Err(StorageError::Unauthorized(body)) => {
                        Err(StorageError::Remote { status: 401, body })
                    }
                    other => other,
                }
            }
            other => other,
        }
    }

    /// Lazy page sequence for one window.
    pub fn window(&mut self, window: DateWindow) -> WindowPager<'_> {
        WindowPager {
            paginator: self,
            window,
            next_page: 1,
            exhausted: false,
        }
    }

    /// Drains every page of `window`, preserving upstream order.
    pub async fn fetch_window(&mut self, window: DateWindow) -> Result<Vec<RawRecord>> {
        let mut pager = self.window(window);
        let mut records = Vec::new();
        while let Some(page) = pager.next_page().await? {
            log::debug!(
                "Page {} for {}..{}: {} record(s)",
                page.number,
                page.window.start,
                page.window.end(),
                page.records.len()
            );
            records.extend(page.records);
        }
        Ok(records)
    }

    /// Whether the upstream has at least one record on `day`.
    pub async fn probe_day(&mut self, day: NaiveDate) -> Result<bool> {
        let records = self
            .request_page(&DateWindow::single_day(day), 1, 1)
            .await?;
        Ok(!records.is_empty())
    }
}

/// Finite and not restartable: once an empty page or an error has been seen
/// it yields `None` without touching the upstream again.
pub struct WindowPager<'p> {
    paginator: &'p mut RemotePaginator,
    window: DateWindow,
    next_page: u32,
    exhausted: bool,
}

impl WindowPager<'_> {
    pub async fn next_page(&mut self) -> Result<Option<Page>> {
        if self.exhausted {
            return Ok(None);
        }
        let number = self.next_page;
        let limit = self.paginator.page_size;
        let records = match self
            .paginator
            .request_page(&self.window, number, limit)
            .await
        {
            Ok(records) => records,
            Err(err) => {
                self.exhausted = true;
                return Err(err);
            }
        };
        if records.is_empty() {
            self.exhausted = true;
            return Ok(None);
        }
        self.next_page += 1;
        Ok(Some(Page {
            number,
            window: self.window,
            records,
        }))
    }
}
