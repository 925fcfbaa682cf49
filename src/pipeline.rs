//! Per-entity scrape, reconcile and persist cycle over a bounded worker pool.
//!
//! Workers share the fetcher (and through it the rate limiter and proxy
//! rotator). Within one entity the sections are handled one after another;
//! each section is its own unit of persistence, so a failing section never
//! rolls back the others.

use crate::error::{Error, FetchError, ParseError, RosterError, StoreError};
use crate::fetch::urls::slug_from_url;
use crate::fetch::{ResilientFetcher, Upstream};
use crate::merge::MergeEngine;
use crate::model::{
    Entity, ExceptionNote, KpiRecord, Provenance, Repository, RowKind, Section, View,
};
use crate::parse::{parse_schedule, CompanyPage, EntityContext, TableParser};
use crate::roster::RosterResolution;
use crate::scheduler::FreshnessScheduler;
use chrono::Utc;
use futures::stream::{self, StreamExt};
use std::collections::HashSet;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Knobs of one run.
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineOptions {
    pub view: View,
    /// Entities processed in parallel
    pub concurrency: usize,
    /// Process only the stalest `limit` entities
    pub limit: Option<usize>,
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self {
            view: View::Consolidated,
            concurrency: 2,
            limit: None,
        }
    }
}

/// Totals of one run.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RunSummary {
    /// Entities that were started
    pub processed: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub records_inserted: usize,
    pub records_updated: usize,
    pub exceptions: Vec<ExceptionNote>,
    /// Whether the run stopped early on a shutdown request
    pub cancelled: bool,
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Outcome {
    Succeeded,
    Failed,
    Cancelled,
    Skipped,
}

#[derive(Debug)]
struct EntityReport {
    outcome: Outcome,
    inserted: usize,
    updated: usize,
    exceptions: Vec<ExceptionNote>,
    /// Set when the sink went away while this entity was being written
    sink_error: Option<StoreError>,
}

impl EntityReport {
    fn new(outcome: Outcome) -> Self {
        Self {
            outcome,
            inserted: 0,
            updated: 0,
            exceptions: Vec::new(),
            sink_error: None,
        }
    }

    /// Keeps what was gathered so far and marks the sink as lost.
    fn sink_lost(mut self, err: StoreError) -> Self {
        self.outcome = Outcome::Failed;
        self.sink_error = Some(err);
        self
    }

    fn failed(note: ExceptionNote) -> Self {
        Self {
            exceptions: vec![note],
            ..Self::new(Outcome::Failed)
        }
    }
}

impl RunSummary {
    fn absorb(&mut self, report: EntityReport) {
        match report.outcome {
            Outcome::Skipped => return,
            Outcome::Succeeded => self.succeeded += 1,
            Outcome::Failed => self.failed += 1,
            Outcome::Cancelled => self.cancelled = true,
        }
        self.processed += 1;
        self.records_inserted += report.inserted;
        self.records_updated += report.updated;
        self.exceptions.extend(report.exceptions);
    }
}

/// Drives entities through fetch, parse, reconcile and persist.
pub struct Pipeline {
    fetcher: Arc<ResilientFetcher>,
    repo: Arc<dyn Repository>,
    upstream: Upstream,
    merge: MergeEngine,
    options: PipelineOptions,
    cancel: CancellationToken,
}

impl Pipeline {
    pub fn new(
        fetcher: Arc<ResilientFetcher>,
        repo: Arc<dyn Repository>,
        upstream: Upstream,
        merge: MergeEngine,
        options: PipelineOptions,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            fetcher,
            repo,
            upstream,
            merge,
            options,
            cancel,
        }
    }

    /// Processes the resolved roster, stalest entities first.
    ///
    /// Per-entity failures end up in the summary's exception list. Losing the
    /// sink stops the run: in-flight entities finish their current step, the
    /// exceptions gathered so far are still offered to the sink and the error
    /// is returned.
    pub async fn run(&self, roster: RosterResolution) -> Result<RunSummary, StoreError> {
        let schedule = self.repo.read_schedule().await?;
        let mut entities = FreshnessScheduler.order_entities(roster.entities, &schedule);
        if let Some(limit) = self.options.limit {
            entities.truncate(limit);
        }
        tracing::info!(
            entities = entities.len(),
            unresolved = roster.exceptions.len(),
            concurrency = self.options.concurrency,
            "Starting run"
        );

        let mut summary = RunSummary {
            exceptions: roster.exceptions,
            ..Default::default()
        };
        let mut fatal: Option<StoreError> = None;

        let mut reports = stream::iter(entities)
            .map(|entity| self.process_entity(entity))
            .buffer_unordered(self.options.concurrency.max(1));
        while let Some(mut report) = reports.next().await {
            if let Some(err) = report.sink_error.take() {
                tracing::error!(error = %err, "Sink unavailable, stopping run");
                self.cancel.cancel();
                fatal.get_or_insert(err);
            }
            summary.absorb(report);
        }

        for note in &summary.exceptions {
            tracing::warn!(exception = %note, "Recorded exception");
        }
        let recorded = self.repo.record_exceptions(&summary.exceptions).await;
        if let Some(err) = fatal {
            if let Err(record_err) = recorded {
                tracing::error!(
                    error = %record_err,
                    exceptions = summary.exceptions.len(),
                    "Exceptions could not be recorded"
                );
            }
            return Err(err);
        }
        recorded?;
        summary.cancelled |= self.cancel.is_cancelled();
        Ok(summary)
    }

    async fn process_entity(&self, mut entity: Entity) -> EntityReport {
        if self.cancel.is_cancelled() {
            return EntityReport::new(Outcome::Skipped);
        }
        let key = entity.key.clone();
        tracing::debug!(entity = %key, name = %entity.name, "Processing entity");

        let page = match self.open_company_page(&mut entity).await {
            Ok(page) => page,
            Err(Error::Fetch(FetchError::Cancelled)) => {
                return EntityReport::new(Outcome::Cancelled);
            }
            Err(err) => {
                tracing::warn!(entity = %key, error = %describe(&err), "Entity failed");
                return EntityReport::failed(ExceptionNote::entity(&key, describe(&err)));
            }
        };
        if page.tables.is_empty() {
            tracing::warn!(entity = %key, "No tables found");
            return EntityReport::failed(ExceptionNote::entity(&key, "no tables found"));
        }

        let ctx = EntityContext {
            entity: key.clone(),
            provenance: Provenance::from(&entity),
        };
        let company_id = entity.company_id.clone().unwrap_or_default();
        let mut report = EntityReport::new(Outcome::Succeeded);

        for section in page.sections() {
            let records: Vec<KpiRecord> = match TableParser.parse(&page, section, &ctx) {
                Ok(records) => records.collect(),
                Err(err) => {
                    tracing::warn!(entity = %key, section = %section, error = %err, "Section skipped");
                    report
                        .exceptions
                        .push(ExceptionNote::section(&key, section, err.to_string()));
                    continue;
                }
            };
            match self
                .process_section(&ctx, &company_id, section, records, &mut report)
                .await
            {
                Ok(false) => {}
                Ok(true) => {
                    report.outcome = Outcome::Cancelled;
                    break;
                }
                Err(err) => return report.sink_lost(err),
            }
        }

        if report.outcome == Outcome::Succeeded {
            if let Err(err) = self.repo.write_schedule(&entity, Utc::now()).await {
                return report.sink_lost(err);
            }
            tracing::info!(
                entity = %key,
                inserted = report.inserted,
                updated = report.updated,
                exceptions = report.exceptions.len(),
                "Entity done"
            );
        }
        report
    }

    /// Tries each slug candidate until a company page is found.
    async fn open_company_page(&self, entity: &mut Entity) -> Result<CompanyPage, Error> {
        for (source, slug) in entity.slug_candidates() {
            let url = self.upstream.company_page(&slug, self.options.view);
            match self.fetcher.fetch(&url).await {
                Ok(page) => {
                    let parsed = CompanyPage::parse(&page.body)?;
                    let company_id = parsed
                        .company_id
                        .clone()
                        .ok_or(ParseError::MissingCompanyId)?;
                    let resolved = slug_from_url(&page.final_url);
                    let resolved = if resolved.is_empty() { slug } else { resolved };
                    tracing::debug!(entity = %entity.key, slug = %resolved, source = %source, "Slug resolved");
                    entity.resolve(resolved, source, company_id);
                    return Ok(parsed);
                }
                Err(err) if err.is_not_found() => {
                    tracing::debug!(entity = %entity.key, slug = %slug, "No company page for slug");
                }
                Err(err) => return Err(err.into()),
            }
        }
        Err(RosterError::EntityUnresolved {
            descriptor: entity.key.to_string(),
        }
        .into())
    }

    /// Reconciles and persists one section. Returns whether the run was
    /// cancelled while expanding children.
    async fn process_section(
        &self,
        ctx: &EntityContext,
        company_id: &str,
        section: Section,
        records: Vec<KpiRecord>,
        report: &mut EntityReport,
    ) -> Result<bool, StoreError> {
        let (records, cancelled) = self
            .expand_children(company_id, section, records, report)
            .await;

        let existing = match self.repo.fetch_existing(&ctx.entity, section).await {
            Ok(existing) => existing,
            Err(err) if err.is_unavailable() => return Err(err),
            Err(err) => {
                tracing::warn!(entity = %ctx.entity, section = %section, error = %err, "Stored records unreadable");
                report
                    .exceptions
                    .push(ExceptionNote::section(&ctx.entity, section, err.to_string()));
                return Ok(cancelled);
            }
        };

        let batch = self.merge.reconcile(existing, records);
        if batch.has_writes() {
            match self.repo.write_batch(section, &batch).await {
                Ok(()) => {}
                Err(err) if err.is_unavailable() => return Err(err),
                Err(err) => {
                    report
                        .exceptions
                        .push(ExceptionNote::section(&ctx.entity, section, err.to_string()));
                    return Ok(cancelled);
                }
            }
        }
        tracing::debug!(
            entity = %ctx.entity,
            section = %section,
            inserted = batch.inserts.len(),
            updated = batch.updates.len(),
            unchanged = batch.unchanged,
            "Section reconciled"
        );
        report.inserted += batch.inserts.len();
        report.updated += batch.updates.len();
        report.exceptions.extend(batch.exceptions);
        Ok(cancelled)
    }

    /// Adds children of parent rows the table did not break down itself.
    async fn expand_children(
        &self,
        company_id: &str,
        section: Section,
        mut records: Vec<KpiRecord>,
        report: &mut EntityReport,
    ) -> (Vec<KpiRecord>, bool) {
        let with_children: HashSet<String> = records
            .iter()
            .filter(|r| r.kind == RowKind::Child)
            .map(|r| r.parent.clone())
            .collect();
        let parents: Vec<KpiRecord> = records
            .iter()
            .filter(|r| r.kind == RowKind::Parent && !with_children.contains(&r.parent))
            .cloned()
            .collect();

        for parent in parents {
            match self.fetch_children(company_id, section, &parent).await {
                Ok(children) => records.extend(children),
                Err(Error::Fetch(FetchError::Cancelled)) => return (records, true),
                Err(Error::Fetch(err)) if err.is_not_found() => {}
                Err(err) => {
                    tracing::warn!(
                        entity = %parent.entity,
                        section = %section,
                        parent = %parent.parent,
                        error = %describe(&err),
                        "Child breakdown unavailable"
                    );
                    report.exceptions.push(ExceptionNote::section(
                        &parent.entity,
                        section,
                        format!("children of '{}': {}", parent.parent, describe(&err)),
                    ));
                }
            }
        }
        (records, false)
    }

    async fn fetch_children(
        &self,
        company_id: &str,
        section: Section,
        parent: &KpiRecord,
    ) -> Result<Vec<KpiRecord>, Error> {
        let url = self
            .upstream
            .schedules(company_id, &parent.parent, section, self.options.view)?;
        let page = self.fetcher.fetch(&url).await?;
        Ok(parse_schedule(&page.body, parent)?)
    }
}

/// Innermost message of a stage error, without the stage prefix.
fn describe(err: &Error) -> String {
    match err {
        Error::Fetch(e) => e.to_string(),
        Error::Parse(e) => e.to_string(),
        Error::Roster(e) => e.to_string(),
        Error::Store(e) => e.to_string(),
    }
}
