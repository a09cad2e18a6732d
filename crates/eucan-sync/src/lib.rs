//! Import pipeline: reconcile reference values, build target tables and
//! replace each source catalogue's contribution in the central catalogue.

use std::fmt;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use eucan_adapters::{AdapterRegistry, SourceAdapter};
use eucan_core::{Catalogue, CatalogueOutcome, ErrorReport, EucanError, EucanWarning, ReferenceCatalog};
use eucan_storage::{
    get_catalogues, get_reference_data, HttpClientConfig, MolgenisSession, RemoteStore, StoreError,
    DEFAULT_ADD_BATCH_SIZE,
};
use serde::Serialize;
use tracing::{info, info_span, warn, Instrument};
use uuid::Uuid;

pub mod builder;
pub mod importer;
pub mod printer;
pub mod reconcile;

pub use builder::{CatalogueDataBuilder, TableMetas, SOURCE_CATALOGUE_ATTRIBUTE};
pub use importer::SyncEngine;
pub use printer::{Printer, Reporter, SharedBuffer};
pub use reconcile::{ReconcileOutcome, ReferenceReconciler};

pub const CRATE_NAME: &str = "eucan-sync";

#[derive(Clone, PartialEq, Eq)]
pub enum Credentials {
    Token(String),
    Login { username: String, password: String },
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Credentials::Token(_) => f.write_str("Token(***)"),
            Credentials::Login { username, .. } => f
                .debug_struct("Login")
                .field("username", username)
                .finish_non_exhaustive(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImportConfig {
    pub target: String,
    pub credentials: Credentials,
    pub batch_size: usize,
    pub http_timeout_secs: u64,
    pub user_agent: String,
}

impl ImportConfig {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let var = |name: &str| lookup(name).filter(|value| !value.trim().is_empty());

        let target = var("EUCAN_TARGET").context("EUCAN_TARGET is not set")?;
        let credentials = match (var("EUCAN_TOKEN"), var("EUCAN_USERNAME"), var("EUCAN_PASSWORD")) {
            (Some(token), _, _) => Credentials::Token(token),
            (None, Some(username), Some(password)) => Credentials::Login { username, password },
            _ => bail!("set EUCAN_TOKEN or both EUCAN_USERNAME and EUCAN_PASSWORD"),
        };
        let batch_size = match var("EUCAN_BATCH_SIZE") {
            Some(value) => value
                .parse::<usize>()
                .with_context(|| format!("EUCAN_BATCH_SIZE is not a number: {value}"))?
                .max(1),
            None => DEFAULT_ADD_BATCH_SIZE,
        };

        Ok(Self {
            target,
            credentials,
            batch_size,
            http_timeout_secs: var("EUCAN_HTTP_TIMEOUT_SECS")
                .and_then(|v| v.parse().ok())
                .unwrap_or(60),
            user_agent: var("EUCAN_USER_AGENT")
                .unwrap_or_else(|| "eucan-connect-importer/0.1".to_string()),
        })
    }

    pub fn http_client_config(&self) -> HttpClientConfig {
        HttpClientConfig {
            timeout: Duration::from_secs(self.http_timeout_secs),
            user_agent: Some(self.user_agent.clone()),
        }
    }

    /// Session on the central catalogue, logged in unless a token is configured.
    pub async fn open_session(&self) -> Result<MolgenisSession> {
        let mut session = MolgenisSession::new(&self.target, &self.http_client_config())?;
        match &self.credentials {
            Credentials::Token(token) => session = session.with_token(token.clone()),
            Credentials::Login { username, password } => session
                .login(username, password)
                .await
                .with_context(|| format!("logging in to {}", self.target))?,
        }
        Ok(session)
    }
}

/// Imports source catalogues into the central catalogue one at a time.
///
/// Owns the reference catalog for the whole run, so values registered for one
/// catalogue are known when the next one is reconciled.
pub struct Eucan<'a> {
    store: &'a dyn RemoteStore,
    adapters: AdapterRegistry,
    printer: Box<dyn Reporter>,
    ref_data: ReferenceCatalog,
    batch_size: usize,
}

impl<'a> Eucan<'a> {
    pub fn new(store: &'a dyn RemoteStore, adapters: AdapterRegistry, ref_data: ReferenceCatalog) -> Self {
        Self {
            store,
            adapters,
            printer: Box::new(Printer::stdout()),
            ref_data,
            batch_size: DEFAULT_ADD_BATCH_SIZE,
        }
    }

    /// Starts from the reference data currently in the central catalogue.
    pub async fn connect(store: &'a dyn RemoteStore, adapters: AdapterRegistry) -> Result<Self, StoreError> {
        let ref_data = get_reference_data(store).await?;
        Ok(Self::new(store, adapters, ref_data))
    }

    pub fn with_printer(mut self, printer: Box<dyn Reporter>) -> Self {
        self.printer = printer;
        self
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    pub fn reference_data(&self) -> &ReferenceCatalog {
        &self.ref_data
    }

    /// Runs every catalogue in order. A failing catalogue is recorded in the
    /// report and never stops the ones after it.
    pub async fn import_catalogues(&mut self, catalogues: &[Catalogue]) -> ErrorReport {
        let mut report = ErrorReport::new(catalogues.to_vec());
        let resolved: Vec<_> = catalogues
            .iter()
            .map(|catalogue| self.adapters.resolve(catalogue))
            .collect();

        for (catalogue, adapter) in catalogues.iter().zip(resolved) {
            self.printer.print_catalogue_title(catalogue);
            let mut warnings = Vec::new();

            let result = match adapter {
                Ok(adapter) => {
                    let span = info_span!("import_catalogue", code = %catalogue.code);
                    self.import_catalogue(catalogue, adapter.as_ref(), &mut warnings)
                        .instrument(span)
                        .await
                }
                Err(err) => Err(err),
            };

            if let Err(err) = result {
                warn!(catalogue = %catalogue.code, error = %err, "catalogue import failed");
                self.printer.reset_indent();
                self.printer.print_error(&err);
                report.add_error(catalogue, err);
            }
            report.add_warnings(catalogue, warnings);
        }

        self.printer.print_summary(&report);
        report
    }

    async fn import_catalogue(
        &mut self,
        catalogue: &Catalogue,
        adapter: &dyn SourceAdapter,
        warnings: &mut Vec<EucanWarning>,
    ) -> Result<(), EucanError> {
        self.printer.print_sub_header(&format!(
            "📥 Get data of source catalogue {}",
            catalogue.description
        ));
        let source = adapter
            .fetch(catalogue)
            .await
            .map_err(|err| EucanError::source_fetch(catalogue, err))?;
        for warning in &source.warnings {
            self.printer.print_warning(warning);
        }
        warnings.extend(source.warnings);
        let mut rows = source.rows;
        info!(rows = rows.len(), "fetched source rows");

        self.printer.print("✏️ Verify reference data");
        self.printer.indent();
        let reconciled = ReferenceReconciler::reconcile(&mut rows, &mut self.ref_data, self.printer.as_mut());
        self.printer.dedent();
        warnings.extend(reconciled.warnings);

        let data = CatalogueDataBuilder::fetch(self.store)
            .await?
            .build(catalogue, &rows)?;

        let engine = SyncEngine::new(self.store).with_batch_size(self.batch_size);

        self.printer.print_sub_header("📤 If there, import new reference data");
        self.printer.indent();
        let pushed = engine.import_reference_data(&self.ref_data, self.printer.as_mut()).await;
        self.printer.dedent();
        pushed?;

        self.printer.print_sub_header(&format!(
            "📤 Importing source catalogue {}",
            catalogue.description
        ));
        self.printer.indent();
        let synced = engine.sync(&data, self.printer.as_mut(), warnings).await;
        self.printer.dedent();
        synced
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ImportRunSummary {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub catalogues: usize,
    pub succeeded: usize,
    pub with_warnings: usize,
    pub failed: usize,
}

impl ImportRunSummary {
    pub fn from_report(
        run_id: Uuid,
        started_at: DateTime<Utc>,
        finished_at: DateTime<Utc>,
        report: &ErrorReport,
    ) -> Self {
        let mut summary = Self {
            run_id,
            started_at,
            finished_at,
            catalogues: report.catalogues.len(),
            succeeded: 0,
            with_warnings: 0,
            failed: 0,
        };
        for catalogue in &report.catalogues {
            match report.outcome(catalogue) {
                CatalogueOutcome::Succeeded => summary.succeeded += 1,
                CatalogueOutcome::SucceededWithWarnings(_) => summary.with_warnings += 1,
                CatalogueOutcome::Failed { .. } => summary.failed += 1,
            }
        }
        summary
    }
}

/// Imports the catalogues named by `codes`, or all of them when empty.
pub async fn run_import_from_env(codes: &[String]) -> Result<ImportRunSummary> {
    let config = ImportConfig::from_env()?;
    let run_id = Uuid::new_v4();
    let started_at = Utc::now();

    async move {
        let session = config.open_session().await?;
        let catalogues = get_catalogues(&session, codes)
            .await
            .context("loading source catalogues")?;
        info!(catalogues = catalogues.len(), target = session.url(), "starting import");

        let adapters = AdapterRegistry::with_defaults(&config.http_client_config())?;
        let mut eucan = Eucan::connect(&session, adapters)
            .await
            .context("loading reference data")?
            .with_batch_size(config.batch_size);
        let report = eucan.import_catalogues(&catalogues).await;

        let summary = ImportRunSummary::from_report(run_id, started_at, Utc::now(), &report);
        info!(
            succeeded = summary.succeeded,
            with_warnings = summary.with_warnings,
            failed = summary.failed,
            "import finished"
        );
        Ok(summary)
    }
    .instrument(info_span!("import_run", %run_id))
    .await
}

pub async fn list_catalogues_from_env() -> Result<Vec<Catalogue>> {
    let config = ImportConfig::from_env()?;
    let session = config.open_session().await?;
    get_catalogues(&session, &[])
        .await
        .context("loading source catalogues")
}
