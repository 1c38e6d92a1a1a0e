use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use futures::future::join_all;
use serde::Serialize;
use tracing::{debug, info};
use uuid::Uuid;

use crate::aggregate::{monthly_average, pooled_monthly, question_monthly};
use crate::baseline::OrgSeries;
use crate::cache::{RowCache, Rows};
use crate::error::SelectorError;
use crate::milestone::MilestoneChart;
use crate::models::{BaselinePolicy, MonthlyAverage, OrgId, SubConstructKey, SurveySet};
use crate::scatter::{pair_months, pair_rows, pool_months, Pairing, ScatterPairs, Selector, SelectorCatalog};
use crate::source::RowSource;
use crate::views::{build_radar_axis, build_trend, RadarAxis, RowsByOrg, TrendView};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RequestToken(u64);

/// Monotonic request counter. Only the most recently issued token is current.
#[derive(Debug, Default)]
pub struct Generation {
    latest: AtomicU64,
}

impl Generation {
    pub fn issue(&self) -> RequestToken {
        RequestToken(self.latest.fetch_add(1, Ordering::SeqCst) + 1)
    }

    pub fn is_current(&self, token: RequestToken) -> bool {
        self.latest.load(Ordering::SeqCst) == token.0
    }

    /// Hands back `value` only if no newer request was issued meanwhile.
    pub fn settle<T>(&self, token: RequestToken, value: T) -> Option<T> {
        if self.is_current(token) {
            Some(value)
        } else {
            debug!(token = token.0, "discarding result of superseded request");
            None
        }
    }
}

/// Everything one analysis request needs: who is asking, who they are
/// compared against, and which generation the request belongs to.
#[derive(Debug, Clone, PartialEq)]
pub struct RequestContext {
    pub organization: OrgId,
    pub organizations: Vec<OrgId>,
    pub policy: BaselinePolicy,
    pub token: RequestToken,
}

impl RequestContext {
    pub fn peers(&self) -> Vec<&OrgId> {
        self.policy.eligible(&self.organizations, &self.organization)
    }

    /// Every organization whose rows a request touches: the listed ones plus
    /// the acting one if it is not listed.
    fn all_organizations(&self) -> Vec<OrgId> {
        let mut orgs = self.organizations.clone();
        if !orgs.contains(&self.organization) {
            orgs.push(self.organization.clone());
        }
        orgs
    }
}

pub struct AnalysisSession {
    id: Uuid,
    cache: RowCache,
    generation: Generation,
}

impl AnalysisSession {
    pub fn new(source: Arc<dyn RowSource>) -> Self {
        let id = Uuid::new_v4();
        info!(session = %id, "analysis session started");
        Self {
            id,
            cache: RowCache::new(source),
            generation: Generation::default(),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn cache(&self) -> &RowCache {
        &self.cache
    }

    /// Starts a request, superseding every earlier one.
    pub fn begin(
        &self,
        organization: &str,
        organizations: &[OrgId],
        policy: BaselinePolicy,
    ) -> RequestContext {
        RequestContext {
            organization: organization.to_string(),
            organizations: organizations.to_vec(),
            policy,
            token: self.generation.issue(),
        }
    }

    pub fn settle<T>(&self, ctx: &RequestContext, value: T) -> Option<T> {
        self.generation.settle(ctx.token, value)
    }

    pub async fn rows(&self, set: &SurveySet, org: &str) -> Rows {
        self.cache.rows(org, &set.locator_for(org)).await
    }

    pub async fn rows_by_org(&self, set: &SurveySet, orgs: &[OrgId]) -> RowsByOrg {
        join_all(orgs.iter().map(|org| async move { (org.clone(), self.rows(set, org).await) }))
            .await
            .into_iter()
            .collect()
    }

    /// Two-stage monthly average of one set for one organization.
    pub async fn monthly_average(
        &self,
        set: &SurveySet,
        org: &str,
        questions: Option<&[String]>,
    ) -> MonthlyAverage {
        let rows = self.rows(set, org).await;
        monthly_average(&rows, Some(questions.unwrap_or(&set.questions)))
    }

    pub async fn monthly_by_org(&self, set: &SurveySet, orgs: &[OrgId]) -> OrgSeries {
        self.rows_by_org(set, orgs)
            .await
            .into_iter()
            .map(|(org, rows)| (org, monthly_average(&rows, Some(set.questions.as_slice()))))
            .collect()
    }

    /// Pooled monthly average over every set carrying `key`, fetched concurrently.
    #[tracing::instrument(skip(self, sets), fields(session = %self.id))]
    pub async fn sub_construct_rollup(
        &self,
        sets: &[SurveySet],
        key: SubConstructKey,
        org: &str,
    ) -> MonthlyAverage {
        let members: Vec<&SurveySet> = sets
            .iter()
            .filter(|set| set.sub_construct() == Some(key))
            .collect();
        let fetched = join_all(members.iter().map(|set| self.rows(set, org))).await;
        pooled_monthly(
            members
                .iter()
                .zip(&fetched)
                .map(|(set, rows)| (&rows[..], set.questions.as_slice())),
        )
    }

    #[tracing::instrument(skip(self, ctx, sets), fields(session = %self.id, org = %ctx.organization))]
    pub async fn trend(&self, ctx: &RequestContext, sets: &[SurveySet]) -> Option<TrendView> {
        let orgs = ctx.all_organizations();
        let fetched = join_all(sets.iter().map(|set| self.rows_by_org(set, &orgs))).await;
        let inputs: Vec<(SurveySet, RowsByOrg)> = sets.iter().cloned().zip(fetched).collect();
        let view = build_trend(&inputs, ctx.policy, &ctx.organization);
        self.settle(ctx, view)
    }

    #[tracing::instrument(skip(self, ctx, sets), fields(session = %self.id, org = %ctx.organization))]
    pub async fn radar(&self, ctx: &RequestContext, sets: &[SurveySet]) -> Option<Vec<RadarAxis>> {
        let orgs = ctx.all_organizations();
        let fetched = join_all(sets.iter().map(|set| self.rows_by_org(set, &orgs))).await;
        let axes = sets
            .iter()
            .zip(&fetched)
            .map(|(set, rows)| build_radar_axis(set, rows, ctx.policy, &ctx.organization))
            .collect();
        self.settle(ctx, axes)
    }

    #[tracing::instrument(skip(self, ctx, sets), fields(session = %self.id, org = %ctx.organization))]
    pub async fn milestone_chart(
        &self,
        ctx: &RequestContext,
        sets: &[SurveySet],
    ) -> Option<MilestoneChart> {
        let series = join_all(sets.iter().map(|set| async move {
            (set.clone(), self.monthly_average(set, &ctx.organization, None).await)
        }))
        .await;
        self.settle(ctx, MilestoneChart::new(series))
    }

    async fn selector_monthly(
        &self,
        catalog: &SelectorCatalog,
        selector: Selector,
        org: &str,
    ) -> MonthlyAverage {
        match selector {
            Selector::Item { set, question } => match catalog.item(set, question) {
                Some((survey_set, text)) => {
                    let rows = self.rows(survey_set, org).await;
                    question_monthly(rows.iter(), text)
                }
                None => MonthlyAverage::new(),
            },
            Selector::SubConstruct(key) => self.sub_construct_rollup(catalog.sets(), key, org).await,
        }
    }

    /// Org and peer point clouds for two selectors, each with its own fit.
    /// `Ok(None)` means the request was superseded while it ran.
    #[tracing::instrument(skip(self, ctx, catalog), fields(session = %self.id, org = %ctx.organization))]
    pub async fn pair_series(
        &self,
        ctx: &RequestContext,
        catalog: &SelectorCatalog,
        x: Selector,
        y: Selector,
    ) -> Result<Option<ScatterPairs>, SelectorError> {
        let x = catalog.validate(x)?;
        let y = catalog.validate(y)?;
        let pairing = catalog.pairing(x, y);
        let peers = ctx.peers();

        let pairs = match (pairing, x, y) {
            (
                Pairing::Row,
                Selector::Item { set: sx, question: qx },
                Selector::Item { set: sy, question: qy },
            ) => {
                let (survey_set, x_text) = catalog
                    .item(sx, qx)
                    .ok_or(SelectorError::UnknownQuestion { set: sx, question: qx })?;
                let (_, y_text) = catalog
                    .item(sy, qy)
                    .ok_or(SelectorError::UnknownQuestion { set: sy, question: qy })?;

                let own = self.rows(survey_set, &ctx.organization).await;
                let org_points = pair_rows(&own, x_text, y_text, &ctx.organization);

                let peer_rows = join_all(peers.iter().map(|org| async move {
                    (*org, self.rows(survey_set, org).await)
                }))
                .await;
                let peer_points = peer_rows
                    .iter()
                    .flat_map(|(org, rows)| pair_rows(rows, x_text, y_text, org))
                    .collect();
                ScatterPairs::new(Pairing::Row, org_points, peer_points)
            }
            _ => {
                let (own_x, own_y) = futures::join!(
                    self.selector_monthly(catalog, x, &ctx.organization),
                    self.selector_monthly(catalog, y, &ctx.organization),
                );
                let peer_maps = join_all(peers.iter().map(|org| async move {
                    futures::join!(
                        self.selector_monthly(catalog, x, org),
                        self.selector_monthly(catalog, y, org),
                    )
                }))
                .await;
                let peer_x = pool_months(peer_maps.iter().map(|(mx, _)| mx));
                let peer_y = pool_months(peer_maps.iter().map(|(_, my)| my));
                ScatterPairs::new(
                    Pairing::Month,
                    pair_months(&own_x, &own_y),
                    pair_months(&peer_x, &peer_y),
                )
            }
        };
        debug!(
            ?pairing,
            org_points = pairs.org_points.len(),
            peer_points = pairs.peer_points.len(),
            "paired scatter series"
        );
        Ok(self.settle(ctx, pairs))
    }
}
