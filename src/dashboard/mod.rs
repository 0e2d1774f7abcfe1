use std::path::Path;

use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::{
    api::{AuditApi, AuditEvent, to_options},
    error::{DashboardError, Result},
    export::{ExportOutcome, ExportPipeline},
    gate::Transport,
    query::{self, FilterId, FilterSet, QueryMode},
    range::DateTimeRangeResolver,
    session::View,
    workbook,
};

/// State behind the audit dashboard view: the filter panel, the range
/// picker and the rows currently on display.
///
/// Every action goes through [`AuditApi`], so a lost session is noticed on
/// the next call; the transient state is then reset before the error is
/// handed back.
pub struct AuditDashboard<T> {
    api: AuditApi<T>,
    filters: FilterSet,
    range: DateTimeRangeResolver,
    rows: Vec<AuditEvent>,
    export: ExportPipeline,
    view: watch::Receiver<View>,
}

impl<T: Transport> AuditDashboard<T> {
    pub fn new(api: AuditApi<T>, range: DateTimeRangeResolver, export: ExportPipeline) -> Self {
        let view = api.gate().session().subscribe();
        Self {
            api,
            filters: FilterSet::default(),
            range,
            rows: Vec::new(),
            export,
            view,
        }
    }

    pub fn api(&self) -> &AuditApi<T> {
        &self.api
    }

    pub fn filters(&self) -> &FilterSet {
        &self.filters
    }

    pub fn range(&self) -> &DateTimeRangeResolver {
        &self.range
    }

    pub fn range_mut(&mut self) -> &mut DateTimeRangeResolver {
        &mut self.range
    }

    pub fn rows(&self) -> &[AuditEvent] {
        &self.rows
    }

    pub async fn load_companies(&mut self) -> Result<usize> {
        self.sync_view();
        let result = self.api.companies().await;
        let companies = self.settle(result, "load companies")?;
        self.filters
            .set_options(FilterId::CompanyId, to_options(&companies))?;
        Ok(companies.len())
    }

    /// Select a company and load its stores. Any previous store selection
    /// and store options are dropped first.
    pub async fn select_company(&mut self, company_id: Option<String>) -> Result<()> {
        self.sync_view();
        self.filters.select(FilterId::CompanyId, company_id)?;
        let Some(company_id) = self.filters.get(FilterId::CompanyId).and_then(|f| f.value()) else {
            return Ok(());
        };
        let company_id = company_id.to_string();

        let result = self.api.store_locations(&company_id).await;
        let stores = self.settle(result, "load stores")?;
        debug!(%company_id, stores = stores.len(), "stores loaded");
        self.filters
            .set_options(FilterId::StoreId, to_options(&stores))?;
        Ok(())
    }

    pub fn select_store(&mut self, store_id: Option<String>) -> Result<()> {
        self.filters.select(FilterId::StoreId, store_id)?;
        Ok(())
    }

    pub async fn load_functionalities(&mut self) -> Result<usize> {
        self.sync_view();
        let result = self.api.functionalities().await;
        let functionalities = self.settle(result, "load functionalities")?;
        self.filters
            .set_options(FilterId::Functionality, to_options(&functionalities))?;
        Ok(functionalities.len())
    }

    /// Select a functionality and load its event types, looked up by the
    /// functionality's display name. An id with no loaded option loads nothing.
    pub async fn select_functionality(&mut self, functionality_id: Option<String>) -> Result<()> {
        self.sync_view();
        self.filters.select(FilterId::Functionality, functionality_id)?;
        let Some(name) = self
            .filters
            .get(FilterId::Functionality)
            .and_then(|filter| filter.selected_label())
            .map(str::to_string)
        else {
            debug!("no functionality label to look up, skipping event types");
            return Ok(());
        };

        let result = self.api.event_types(&name).await;
        let event_types = self.settle(result, "load event types")?;
        self.filters
            .set_options(FilterId::EventType, to_options(&event_types))?;
        Ok(())
    }

    pub fn select_event_type(&mut self, event_type_id: Option<String>) -> Result<()> {
        self.filters.select(FilterId::EventType, event_type_id)?;
        Ok(())
    }

    pub fn set_text_filter(&mut self, id: FilterId, text: impl Into<String>) -> Result<()> {
        self.filters.set_text(id, text)?;
        Ok(())
    }

    /// Keep the checkbox and the picker's bounds in step.
    pub fn set_extended_history(&mut self, extended: bool) -> Result<()> {
        self.filters.set_checked(FilterId::ExtendedHistory, extended)?;
        self.range.set_extended_history(extended);
        Ok(())
    }

    pub async fn load_recent(&mut self) -> Result<usize> {
        self.sync_view();
        let result = self.api.recent().await;
        self.rows = self.settle(result, "load recent events")?;
        Ok(self.rows.len())
    }

    /// Run a search and replace the displayed rows. Returns the server's
    /// warning when it answered with partial results.
    pub async fn search(&mut self) -> Result<Option<String>> {
        self.sync_view();
        let params = query::build(
            self.filters.as_slice(),
            self.range.committed(),
            QueryMode::Search,
            self.range.today(),
        );
        debug!(params = params.len(), "searching audit events");

        let result = self.api.search(&params).await;
        let outcome = self.settle(result, "search")?;
        self.rows = outcome.events;
        info!(rows = self.rows.len(), "search finished");
        Ok(outcome.warning)
    }

    pub async fn export(&mut self) -> Result<ExportOutcome> {
        self.sync_view();
        let params = query::build(
            self.filters.as_slice(),
            self.range.committed(),
            QueryMode::Export,
            self.range.today(),
        );
        let request = self.api.export_request(&params)?;

        let result = self.export.run(self.api.gate(), &request).await;
        self.settle(result, "export")
    }

    /// Clear every filter value, the extended-history toggle, the committed
    /// range and the rows, then reload the recent events.
    pub async fn reset(&mut self) -> Result<usize> {
        self.reset_transient();
        info!("dashboard reset");
        self.load_recent().await
    }

    pub async fn logout(&mut self) -> Result<()> {
        let result = self.api.logout().await;
        self.reset_transient();
        result
    }

    pub fn save_rows(&self, path: &Path) -> Result<()> {
        workbook::write_rows(path, &self.rows)
    }

    /// Pick up a logout signalled elsewhere since the last action.
    pub fn sync_view(&mut self) -> View {
        let changed = self.view.has_changed().unwrap_or(false);
        let view = *self.view.borrow_and_update();
        if changed && view == View::Login {
            debug!("session ended, dropping dashboard state");
            self.reset_transient();
        }
        view
    }

    fn reset_transient(&mut self) {
        self.filters.reset_values();
        self.range.set_extended_history(false);
        self.range.clear_committed();
        self.rows.clear();
    }

    fn settle<R>(&mut self, result: Result<R>, action: &'static str) -> Result<R> {
        let err = match result {
            Ok(value) => return Ok(value),
            Err(err) => err,
        };

        if err.is_auth_failure() {
            warn!(action, %err, "session lost, returning to login");
            self.sync_view();
            self.reset_transient();
        } else if let DashboardError::Application {
            status_code,
            message,
        } = &err
        {
            warn!(action, status_code, %message, "request rejected by server");
        } else {
            error!(action, ?err, "request failed");
        }
        Err(err)
    }
}
