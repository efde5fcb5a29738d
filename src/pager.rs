//! Pull-based iteration over a paginated files.list.

use std::collections::VecDeque;

use tracing::debug;

use crate::client::DriveClient;
use crate::error::{DriveError, Result};
use crate::models::DriveItem;

/// Lazy, single-pass sequence of the items in a Shared Drive.
///
/// Holds at most one page in memory. A request is only made when the
/// buffered page is used up and the server handed out a continuation
/// token. After an error the pager is exhausted.
pub struct ItemPager<'a> {
    client: &'a DriveClient,
    drive_id: String,
    page_size: u32,
    buffer: VecDeque<DriveItem>,
    next_token: Option<String>,
    exhausted: bool,
    pages_fetched: usize,
    items_yielded: usize,
}

impl<'a> ItemPager<'a> {
    pub(crate) fn new(client: &'a DriveClient, drive_id: &str, page_size: u32) -> Self {
        Self {
            client,
            drive_id: drive_id.to_string(),
            page_size,
            buffer: VecDeque::new(),
            next_token: None,
            exhausted: false,
            pages_fetched: 0,
            items_yielded: 0,
        }
    }

    /// Next item in server order, or `None` once the listing is complete.
    pub async fn next_item(&mut self) -> Result<Option<DriveItem>> {
        loop {
            if let Some(item) = self.buffer.pop_front() {
                self.items_yielded += 1;
                return Ok(Some(item));
            }
            if self.exhausted {
                return Ok(None);
            }
            if let Err(e) = self.fetch_page().await {
                self.exhausted = true;
                return Err(e);
            }
        }
    }

    async fn fetch_page(&mut self) -> Result<()> {
        let submitted = self.next_token.take();
        let page = self
            .client
            .list_page(&self.drive_id, self.page_size, submitted.as_deref())
            .await?;
        self.pages_fetched += 1;

        debug!(
            page = self.pages_fetched,
            items = page.files.len(),
            more = page.next_page_token.is_some(),
            "Fetched listing page"
        );

        match page.next_page_token {
            Some(token) if submitted.as_deref() == Some(token.as_str()) => {
                return Err(DriveError::RepeatedPageToken(token));
            }
            Some(token) if !token.is_empty() => self.next_token = Some(token),
            _ => self.exhausted = true,
        }

        self.buffer.extend(page.files);
        Ok(())
    }

    /// Number of list requests made so far.
    pub fn pages_fetched(&self) -> usize {
        self.pages_fetched
    }

    pub fn items_yielded(&self) -> usize {
        self.items_yielded
    }

    pub fn drive_id(&self) -> &str {
        &self.drive_id
    }
}
