//! Filter chain runner — resolves the ordered set of pre-call hooks and
//! lets each rewrite the outgoing request body.
//!
//! Filters are trusted: a hook error aborts the whole turn rather than
//! risking a silently corrupted request. Everything around the hook itself
//! (loading, valve materialization) degrades instead.

use serde_json::Value;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, error, warn};

use relay_core::error::{RelayError, Result};
use relay_core::types::{ModelDescriptor, TurnDiagnostics, TurnMetadata, UserSummary};
use relay_plugins::{Capability, EventCaller, EventSink, FilterContext};

use crate::pipeline::ChatPipeline;

impl ChatPipeline {
    /// Run the filter chain over the request body, returning the rewritten
    /// body and whether any executed filter asked for attached files to be
    /// suppressed from the envelope.
    #[allow(clippy::too_many_arguments)]
    pub(crate) async fn run_filter_chain(
        &self,
        mut body: Value,
        user: &UserSummary,
        metadata: &TurnMetadata,
        model: &ModelDescriptor,
        emitter: Option<Arc<dyn EventSink>>,
        caller: Option<Arc<dyn EventCaller>>,
        diagnostics: &mut TurnDiagnostics,
    ) -> Result<(Value, bool)> {
        let filter_ids = self.resolve_filter_order(model).await;
        debug!(count = filter_ids.len(), "filter chain resolved");

        let mut skip_files = false;

        for filter_id in &filter_ids {
            let module = match self.filters.resolve(filter_id).await {
                Ok(module) => module,
                Err(e) => {
                    // Unavailable filters are skipped, not fatal.
                    warn!(filter = %filter_id, err = %e, "filter unavailable, skipping");
                    continue;
                }
            };

            if module.has_capability(Capability::FileHandler) {
                skip_files = true;
            }

            let valves = self.filter_store.get_valves(filter_id).await;

            let user_valves = if module.has_capability(Capability::UserValves) {
                match self
                    .filter_store
                    .get_user_valves(filter_id, &user.id)
                    .await
                {
                    Ok(valves) => valves,
                    Err(e) => {
                        warn!(filter = %filter_id, err = %e, "user valves unavailable");
                        diagnostics.record("filters", format!("user valves for {filter_id}: {e}"));
                        None
                    }
                }
            } else {
                None
            };

            if module.has_capability(Capability::PreCallHook) {
                let ctx = FilterContext {
                    filter_id,
                    user,
                    metadata,
                    model,
                    valves,
                    user_valves,
                    emitter: emitter.clone(),
                    caller: caller.clone(),
                };

                body = match module.inlet(body, &ctx).await {
                    Ok(body) => body,
                    Err(e) => {
                        error!(filter = %filter_id, err = %e, "filter hook failed, aborting turn");
                        return Err(RelayError::Filter {
                            id: filter_id.clone(),
                            reason: e.to_string(),
                        });
                    }
                };
            }
        }

        Ok((body, skip_files))
    }

    /// Resolve the execution order: global ids unioned with the model's
    /// declared ids (first-seen order), intersected with the enabled set,
    /// stable-sorted ascending by the `priority` key of each filter's
    /// installation valves (default 0).
    pub(crate) async fn resolve_filter_order(&self, model: &ModelDescriptor) -> Vec<String> {
        let mut ids = self.filter_store.global_filter_ids().await;
        for id in &model.filter_ids {
            if !ids.contains(id) {
                ids.push(id.clone());
            }
        }

        let enabled: HashSet<String> = self.filter_store.enabled_filter_ids().await.into_iter().collect();
        ids.retain(|id| enabled.contains(id));

        let mut ordered = Vec::with_capacity(ids.len());
        for id in ids {
            let priority = self
                .filter_store
                .get_valves(&id)
                .await
                .as_ref()
                .and_then(|valves| valves.get("priority"))
                .and_then(Value::as_i64)
                .unwrap_or(0);
            ordered.push((priority, id));
        }
        // Stable sort keeps union order within the same priority.
        ordered.sort_by_key(|(priority, _)| *priority);
        ordered.into_iter().map(|(_, id)| id).collect()
    }
}
