//! Named, versioned prompt templates with usage statistics.
//!
//! Exactly one version per name is active; registering a new version retires
//! the previous one. Active templates are cached in memory and the cache entry
//! is replaced whenever a new version is registered.

pub mod defaults;
mod render;

use std::collections::HashMap;

use narrate_common::{NarrativePhase, PromptTemplate, TemplateStats};
use tokio::sync::RwLock;
use tracing::{debug, info};

use crate::db::DbHandle;
use crate::errors::NarrateError;

pub use defaults::{CLARIFICATION_SUBSYSTEM, clarification_template_body, clarification_template_name};
pub use render::{Rendered, render};

/// Rolling statistics after one more use.
///
/// `n` is the previous usage count. The success rate is re-derived from the
/// rounded success count so repeated updates do not drift.
pub fn next_stats(stats: TemplateStats, latency_ms: u64, success: bool) -> TemplateStats {
    let n = stats.usage_count.max(0) as f64;
    let successes = (stats.success_rate * n).round() + if success { 1.0 } else { 0.0 };
    TemplateStats {
        usage_count: stats.usage_count + 1,
        avg_latency_ms: (stats.avg_latency_ms * n + latency_ms as f64) / (n + 1.0),
        success_rate: successes / (n + 1.0),
    }
}

pub struct TemplateRegistry {
    db: DbHandle,
    active: RwLock<HashMap<String, PromptTemplate>>,
}

impl TemplateRegistry {
    pub fn new(db: DbHandle) -> Self {
        Self {
            db,
            active: RwLock::new(HashMap::new()),
        }
    }

    /// The active version of `name`, restricted to `subsystem` when given.
    pub async fn get_active(
        &self,
        name: &str,
        subsystem: Option<&str>,
    ) -> Result<Option<PromptTemplate>, NarrateError> {
        if let Some(cached) = self.active.read().await.get(name) {
            let matches = subsystem.is_none_or(|s| s == cached.subsystem);
            return Ok(matches.then(|| cached.clone()));
        }

        let key = name.to_string();
        let found = self
            .db
            .call(move |store| store.active_template(&key, None))
            .await?;

        let Some(template) = found else {
            return Ok(None);
        };
        debug!(name, version = template.version, "template cache filled");
        self.active
            .write()
            .await
            .insert(name.to_string(), template.clone());
        let matches = subsystem.is_none_or(|s| s == template.subsystem);
        Ok(matches.then_some(template))
    }

    /// Append a new active version, retiring the previous one.
    pub async fn register(
        &self,
        name: &str,
        subsystem: &str,
        body: &str,
        model_hint: Option<&str>,
    ) -> Result<PromptTemplate, NarrateError> {
        let (n, s, b, h) = (
            name.to_string(),
            subsystem.to_string(),
            body.to_string(),
            model_hint.map(str::to_string),
        );
        let template = self
            .db
            .call(move |store| store.insert_template_version(&n, &s, &b, h.as_deref()))
            .await?;

        self.active
            .write()
            .await
            .insert(template.name.clone(), template.clone());
        info!(name, version = template.version, "registered template version");
        Ok(template)
    }

    /// Register the built-in clarification templates that do not exist yet.
    ///
    /// Returns how many were created.
    pub async fn seed_defaults(&self) -> Result<usize, NarrateError> {
        let mut created = 0;
        for phase in NarrativePhase::ALL {
            let name = clarification_template_name(phase);
            let key = name.clone();
            let exists = self
                .db
                .call(move |store| store.template_exists(&key))
                .await?;
            if exists {
                continue;
            }
            self.register(
                &name,
                CLARIFICATION_SUBSYSTEM,
                &clarification_template_body(phase),
                None,
            )
            .await?;
            created += 1;
        }
        Ok(created)
    }

    pub async fn list(&self) -> Result<Vec<PromptTemplate>, NarrateError> {
        Ok(self.db.call(|store| store.list_templates()).await?)
    }

    /// Fold one use into the active version's statistics.
    ///
    /// Returns `None` when `name` has no active version.
    pub async fn record_usage(
        &self,
        name: &str,
        latency_ms: u64,
        success: bool,
    ) -> Result<Option<TemplateStats>, NarrateError> {
        let key = name.to_string();
        let updated = self
            .db
            .call(move |store| {
                let Some(template) = store.active_template(&key, None)? else {
                    return Ok(None);
                };
                let stats = next_stats(template.stats, latency_ms, success);
                store.update_template_stats(template.id, &stats)?;
                Ok::<_, anyhow::Error>(Some(stats))
            })
            .await?;

        if let Some(stats) = updated {
            if let Some(cached) = self.active.write().await.get_mut(name) {
                cached.stats = stats;
            }
        }
        Ok(updated)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry() -> anyhow::Result<TemplateRegistry> {
        Ok(TemplateRegistry::new(DbHandle::in_memory()?))
    }

    #[test]
    fn test_next_stats_formulas() {
        let first = next_stats(TemplateStats::default(), 200, true);
        assert_eq!(first.usage_count, 1);
        assert_eq!(first.avg_latency_ms, 200.0);
        assert_eq!(first.success_rate, 1.0);

        let second = next_stats(first, 400, false);
        assert_eq!(second.usage_count, 2);
        assert_eq!(second.avg_latency_ms, 300.0);
        assert_eq!(second.success_rate, 0.5);

        let third = next_stats(second, 0, true);
        assert_eq!(third.usage_count, 3);
        assert_eq!(third.avg_latency_ms, 200.0);
        assert!((third.success_rate - 2.0 / 3.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_register_retires_previous_and_refreshes_cache() -> anyhow::Result<()> {
        let registry = registry()?;
        registry
            .register("clarification.during_event", "clarification", "v1", None)
            .await?;
        let first = registry
            .get_active("clarification.during_event", None)
            .await?
            .expect("v1 active");
        assert_eq!(first.version, 1);

        registry
            .register("clarification.during_event", "clarification", "v2", Some("haiku"))
            .await?;
        let second = registry
            .get_active("clarification.during_event", Some("clarification"))
            .await?
            .expect("v2 active");
        assert_eq!(second.version, 2);
        assert_eq!(second.body, "v2");

        let all = registry.list().await?;
        assert_eq!(all.len(), 2);
        assert_eq!(
            all.iter()
                .filter(|t| t.lifecycle == narrate_common::Lifecycle::Active)
                .count(),
            1
        );
        Ok(())
    }

    #[tokio::test]
    async fn test_get_active_respects_subsystem() -> anyhow::Result<()> {
        let registry = registry()?;
        registry.register("t", "clarification", "body", None).await?;
        assert!(registry.get_active("t", Some("analysis")).await?.is_none());
        assert!(registry.get_active("t", Some("clarification")).await?.is_some());
        assert!(registry.get_active("unknown", None).await?.is_none());
        Ok(())
    }

    #[tokio::test]
    async fn test_seed_defaults_is_idempotent() -> anyhow::Result<()> {
        let registry = registry()?;
        assert_eq!(registry.seed_defaults().await?, 4);
        assert_eq!(registry.seed_defaults().await?, 0);

        let before = registry
            .get_active("clarification.before_event", Some(CLARIFICATION_SUBSYSTEM))
            .await?
            .expect("seeded");
        assert!(before.body.contains("{{narrative_text}}"));
        Ok(())
    }

    #[tokio::test]
    async fn test_record_usage_updates_active_version() -> anyhow::Result<()> {
        let registry = registry()?;
        registry.register("t", "clarification", "body", None).await?;
        registry.get_active("t", None).await?;

        registry.record_usage("t", 100, true).await?;
        let stats = registry
            .record_usage("t", 300, false)
            .await?
            .expect("active template");
        assert_eq!(stats.usage_count, 2);
        assert_eq!(stats.avg_latency_ms, 200.0);
        assert_eq!(stats.success_rate, 0.5);

        let cached = registry.get_active("t", None).await?.expect("cached");
        assert_eq!(cached.stats, stats);
        assert!(registry.record_usage("missing", 10, true).await?.is_none());
        Ok(())
    }
}
