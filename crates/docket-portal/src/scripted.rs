//! Scripted in-memory portal adapter.
//!
//! Stands in for a real coordinator portal in test suites and dry runs: it
//! serves configured pages of rows, stacks dismissible (or sticky)
//! overlays, reacts to search actions per a scripted behavior, and records
//! every interaction so assertions can replay the conversation.

use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::driver::{
    ClickMode, GridSnapshot, PageBaseline, PaginationControls, PortalError, PortalSession, RawRow,
    SearchCandidate,
};

/// How the scripted portal reacts to search actions while empty.
#[derive(Debug, Clone, Default)]
pub enum SearchBehavior {
    /// Grid content is whatever pages were added up front.
    #[default]
    Static,
    /// First search-candidate click installs these pages.
    PopulateOnClick(Vec<Vec<Vec<String>>>),
    /// Only the Results-tab fallback installs these pages.
    PopulateOnResultsTab(Vec<Vec<Vec<String>>>),
    /// Nothing ever populates the grid.
    NeverPopulate,
}

#[derive(Debug, Default)]
pub struct ScriptedPortal {
    url: String,
    headers: Vec<String>,
    pages: Vec<Vec<RawRow>>,
    current_page: usize,
    page_info: Option<String>,
    /// (description, dismissible)
    overlays: VecDeque<(String, bool)>,
    search_behavior: SearchBehavior,
    search_clicks: u32,
    candidates: Vec<SearchCandidate>,
    authenticated: bool,
    pages_after_refresh: Option<Vec<Vec<RawRow>>>,
    refresh_count: u32,
    opened_row: Option<(usize, usize)>,
    open_count: u32,
    uploaded_paths: Vec<PathBuf>,
    confirm_count: u32,
    remove_on_upload: bool,
    fail_open: VecDeque<PortalError>,
    fail_upload: VecDeque<PortalError>,
    fail_confirm: VecDeque<PortalError>,
    fail_refresh: VecDeque<PortalError>,
    screenshot_labels: Vec<String>,
}

impl ScriptedPortal {
    pub fn new() -> Self {
        Self::default()
    }

    fn rows_from(cells: Vec<Vec<String>>) -> Vec<RawRow> {
        cells
            .into_iter()
            .map(|row| RawRow {
                cells: row,
                internal_id: None,
            })
            .collect()
    }

    // Scripting surface.

    pub fn set_url(&mut self, url: &str) {
        self.url = url.to_string();
    }

    pub fn set_headers(&mut self, headers: &[&str]) {
        self.headers = headers.iter().map(|s| s.to_string()).collect();
    }

    /// Append a page of rows (cell texts, in header order).
    pub fn add_page(&mut self, rows: Vec<Vec<String>>) {
        self.pages.push(Self::rows_from(rows));
    }

    /// Append a page whose rows carry internal ids.
    pub fn add_page_with_ids(&mut self, rows: Vec<(Vec<String>, Option<String>)>) {
        self.pages.push(
            rows.into_iter()
                .map(|(cells, internal_id)| RawRow { cells, internal_id })
                .collect(),
        );
    }

    pub fn set_page_info(&mut self, info: &str) {
        self.page_info = Some(info.to_string());
    }

    pub fn push_overlay(&mut self, description: &str) {
        self.overlays.push_back((description.to_string(), true));
    }

    pub fn push_sticky_overlay(&mut self, description: &str) {
        self.overlays.push_back((description.to_string(), false));
    }

    pub fn set_search_behavior(&mut self, behavior: SearchBehavior) {
        self.search_behavior = behavior;
    }

    pub fn set_authenticated(&mut self, authenticated: bool) {
        self.authenticated = authenticated;
    }

    /// Pages the portal serves after the next `refresh()`.
    pub fn set_pages_after_refresh(&mut self, pages: Vec<Vec<Vec<String>>>) {
        self.pages_after_refresh = Some(pages.into_iter().map(Self::rows_from).collect());
    }

    /// Keep the uploaded row in the grid (simulates a portal that did not
    /// register the upload).
    pub fn keep_rows_after_upload(&mut self) {
        self.remove_on_upload = false;
    }

    pub fn fail_next_open(&mut self, error: PortalError) {
        self.fail_open.push_back(error);
    }

    pub fn fail_next_upload(&mut self, error: PortalError) {
        self.fail_upload.push_back(error);
    }

    pub fn fail_next_confirm(&mut self, error: PortalError) {
        self.fail_confirm.push_back(error);
    }

    pub fn fail_next_refresh(&mut self, error: PortalError) {
        self.fail_refresh.push_back(error);
    }

    // Assertion surface.

    pub fn search_clicks(&self) -> u32 {
        self.search_clicks
    }

    pub fn refresh_count(&self) -> u32 {
        self.refresh_count
    }

    pub fn open_count(&self) -> u32 {
        self.open_count
    }

    pub fn confirm_count(&self) -> u32 {
        self.confirm_count
    }

    pub fn uploaded_paths(&self) -> &[PathBuf] {
        &self.uploaded_paths
    }

    pub fn screenshot_labels(&self) -> &[String] {
        &self.screenshot_labels
    }

    fn total_rows(&self) -> usize {
        self.pages.iter().map(Vec::len).sum()
    }

    fn install(&mut self, pages: Vec<Vec<Vec<String>>>) {
        self.pages = pages.into_iter().map(Self::rows_from).collect();
        self.current_page = 0;
    }
}

impl PortalSession for ScriptedPortal {
    fn current_url(&self) -> String {
        if self.url.is_empty() {
            "https://portal.example/cae/pendientes".to_string()
        } else {
            self.url.clone()
        }
    }

    fn grid(&mut self) -> Result<GridSnapshot, PortalError> {
        let headers = if self.headers.is_empty() {
            vec![
                "Tipo Documento".to_string(),
                "Elemento".to_string(),
                "Empresa".to_string(),
            ]
        } else {
            self.headers.clone()
        };
        let rows = self
            .pages
            .get(self.current_page)
            .cloned()
            .unwrap_or_default();
        Ok(GridSnapshot {
            headers,
            rows,
            counter_text: Some(format!("{} Registros", self.total_rows())),
        })
    }

    fn pagination(&mut self) -> Result<PaginationControls, PortalError> {
        let multi = self.pages.len() > 1;
        Ok(PaginationControls {
            has_first: multi,
            has_prev: multi,
            has_next: multi,
            next_enabled: self.current_page + 1 < self.pages.len(),
            page_info: self.page_info.clone(),
        })
    }

    fn active_overlay(&mut self) -> Result<Option<String>, PortalError> {
        Ok(self.overlays.front().map(|(d, _)| d.clone()))
    }

    fn is_authenticated(&mut self) -> Result<bool, PortalError> {
        Ok(self.authenticated)
    }

    fn dismiss_active_overlay(&mut self) -> Result<bool, PortalError> {
        match self.overlays.front() {
            Some((_, true)) => {
                self.overlays.pop_front();
                Ok(true)
            }
            Some((_, false)) => Ok(false),
            None => Ok(false),
        }
    }

    fn list_search_candidates(&mut self) -> Result<Vec<SearchCandidate>, PortalError> {
        if self.candidates.is_empty() {
            Ok(vec![SearchCandidate::default()])
        } else {
            Ok(self.candidates.clone())
        }
    }

    fn click_search_candidate(
        &mut self,
        _index: usize,
        _mode: ClickMode,
    ) -> Result<(), PortalError> {
        self.search_clicks += 1;
        match std::mem::take(&mut self.search_behavior) {
            SearchBehavior::PopulateOnClick(pages) => self.install(pages),
            other => self.search_behavior = other,
        }
        Ok(())
    }

    fn activate_results_tab(&mut self) -> Result<bool, PortalError> {
        match std::mem::take(&mut self.search_behavior) {
            SearchBehavior::PopulateOnResultsTab(pages) => self.install(pages),
            other => self.search_behavior = other,
        }
        Ok(true)
    }

    fn submit_filter_enter(&mut self) -> Result<bool, PortalError> {
        Ok(false)
    }

    fn click_grid_refresh(&mut self) -> Result<bool, PortalError> {
        Ok(false)
    }

    fn goto_first_page(&mut self) -> Result<(), PortalError> {
        self.current_page = 0;
        Ok(())
    }

    fn click_next_page(&mut self) -> Result<(), PortalError> {
        if self.current_page + 1 < self.pages.len() {
            self.current_page += 1;
            Ok(())
        } else {
            Err(PortalError::Other("next page beyond last".to_string()))
        }
    }

    fn refresh(&mut self) -> Result<(), PortalError> {
        if let Some(err) = self.fail_refresh.pop_front() {
            return Err(err);
        }
        self.refresh_count += 1;
        self.current_page = 0;
        if let Some(pages) = self.pages_after_refresh.take() {
            self.pages = pages;
        }
        Ok(())
    }

    fn open_row(&mut self, index: usize) -> Result<(), PortalError> {
        if let Some(err) = self.fail_open.pop_front() {
            return Err(err);
        }
        let page = self.pages.get(self.current_page).ok_or_else(|| {
            PortalError::Other(format!("no page {}", self.current_page))
        })?;
        if index >= page.len() {
            return Err(PortalError::ItemNotOnPage {
                key: format!("row index {index}"),
            });
        }
        self.open_count += 1;
        self.opened_row = Some((self.current_page, index));
        Ok(())
    }

    fn upload_file(&mut self, path: &Path) -> Result<(), PortalError> {
        if let Some(err) = self.fail_upload.pop_front() {
            return Err(err);
        }
        self.uploaded_paths.push(path.to_path_buf());
        Ok(())
    }

    fn confirm_upload(&mut self) -> Result<(), PortalError> {
        if let Some(err) = self.fail_confirm.pop_front() {
            return Err(err);
        }
        self.confirm_count += 1;
        if self.remove_on_upload
            && let Some((page, index)) = self.opened_row.take()
            && let Some(rows) = self.pages.get_mut(page)
            && index < rows.len()
        {
            rows.remove(index);
        }
        Ok(())
    }

    fn close_detail(&mut self) -> Result<(), PortalError> {
        Ok(())
    }

    fn screenshot(&mut self, label: &str) -> Result<Vec<u8>, PortalError> {
        self.screenshot_labels.push(label.to_string());
        Ok(format!("png:{label}").into_bytes())
    }

    fn wait_grid_populated(&mut self, _timeout: Duration) -> Result<bool, PortalError> {
        Ok(self
            .pages
            .get(self.current_page)
            .map(|p| !p.is_empty())
            .unwrap_or(false))
    }

    fn wait_page_transition(
        &mut self,
        _baseline: &PageBaseline,
        _timeout: Duration,
    ) -> Result<bool, PortalError> {
        Ok(true)
    }

    fn wait_loading_cleared(&mut self, _timeout: Duration) -> Result<bool, PortalError> {
        Ok(true)
    }
}

impl ScriptedPortal {
    /// Constructor for execution suites: empty grid on the pending page,
    /// authenticated session, uploads remove their row.
    pub fn authenticated() -> Self {
        Self {
            authenticated: true,
            remove_on_upload: true,
            ..Self::default()
        }
    }
}
