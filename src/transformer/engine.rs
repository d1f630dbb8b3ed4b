//! Transform Engine - MQTT message to gauge update
//!
//! This module provides the per-message pipeline. For every delivered
//! message the payload is classified once, then each rule attached to the
//! matching subscriptions is evaluated independently:
//!
//! ```text
//! Matching -> Valuing -> Labeling -> Updating -> Applied
//!     \           \          \           \
//!      `-----------`----------`-----------`----> Skipped
//! ```
//!
//! A skipped rule never affects other rules of the same message.

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::metrics::ExporterMetrics;
use crate::registry::{GaugeRegistry, RegistryError};

use super::payload::{parse_number, ClassifiedPayload, RenderContext};
use super::rules::{CompiledRule, TopicRuleSet};
use super::template::RenderError;

/// Why a rule did not update its gauge
#[derive(Debug, Clone, PartialEq)]
pub enum SkipReason {
    /// The topic did not match the rule's pattern
    NoMatch,
    /// No value template and the payload is not a number
    PayloadNotNumeric,
    /// The value template failed to render
    ValueRender(RenderError),
    /// The rendered value is not a number
    ValueNotNumeric(String),
    /// A label template failed to render
    LabelRender { label: String, error: RenderError },
    /// The registry refused the update
    Rejected(RegistryError),
}

impl SkipReason {
    /// Outcome label used in the self-metrics
    pub fn as_str(&self) -> &'static str {
        match self {
            SkipReason::NoMatch => "no_match",
            SkipReason::PayloadNotNumeric | SkipReason::ValueNotNumeric(_) => "not_numeric",
            SkipReason::ValueRender(_) | SkipReason::LabelRender { .. } => "render_error",
            SkipReason::Rejected(_) => "rejected",
        }
    }
}

impl std::fmt::Display for SkipReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SkipReason::NoMatch => write!(f, "topic does not match pattern"),
            SkipReason::PayloadNotNumeric => write!(f, "payload is not numeric"),
            SkipReason::ValueRender(e) => write!(f, "value template failed: {}", e),
            SkipReason::ValueNotNumeric(v) => write!(f, "rendered value '{}' is not numeric", v),
            SkipReason::LabelRender { label, error } => {
                write!(f, "label '{}' template failed: {}", label, error)
            }
            SkipReason::Rejected(e) => write!(f, "registry rejected update: {}", e),
        }
    }
}

/// Result of evaluating one rule against one message
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    /// The gauge was updated
    Applied {
        value: f64,
        labels: BTreeMap<String, String>,
    },
    /// The rule did not update its gauge
    Skipped(SkipReason),
}

impl Outcome {
    /// Outcome label used in the self-metrics
    pub fn as_str(&self) -> &'static str {
        match self {
            Outcome::Applied { .. } => "applied",
            Outcome::Skipped(reason) => reason.as_str(),
        }
    }

    /// Check if the gauge was updated
    pub fn is_applied(&self) -> bool {
        matches!(self, Outcome::Applied { .. })
    }
}

/// Transform Engine
///
/// Holds the compiled rules and the registry they write to. The engine
/// itself is immutable and can be shared between delivery callbacks.
#[derive(Clone)]
pub struct TransformEngine {
    /// Compiled rules grouped by topic filter
    rules: Arc<TopicRuleSet>,
    /// Gauge registry
    registry: Arc<GaugeRegistry>,
    /// Self-observability counters
    metrics: Arc<ExporterMetrics>,
}

impl TransformEngine {
    /// Create a new TransformEngine
    ///
    /// # Arguments
    ///
    /// * `rules` - Rules compiled against `registry`
    /// * `registry` - Registry holding the gauges of `rules`
    /// * `metrics` - Exporter self-metrics
    pub fn new(
        rules: Arc<TopicRuleSet>,
        registry: Arc<GaugeRegistry>,
        metrics: Arc<ExporterMetrics>,
    ) -> Self {
        for topic in rules.iter() {
            for rule in &topic.rules {
                metrics.register_rule(rule.name());
            }
        }

        Self {
            rules,
            registry,
            metrics,
        }
    }

    /// Get a reference to the rule set
    pub fn rules(&self) -> &TopicRuleSet {
        &self.rules
    }

    /// Get a reference to the registry
    pub fn registry(&self) -> &GaugeRegistry {
        &self.registry
    }

    /// Get a reference to the self-metrics
    pub fn metrics(&self) -> &ExporterMetrics {
        &self.metrics
    }

    /// Process a message received on any subscription
    ///
    /// The message is handed to every subscription whose topic filter
    /// matches `topic`, the same way an MQTT client routes a publish to all
    /// matching subscription callbacks.
    pub fn process(&self, topic: &str, payload: &[u8]) -> Vec<Outcome> {
        self.metrics.record_message();

        let payload = ClassifiedPayload::classify(payload);
        tracing::trace!(topic = %topic, kind = payload.kind(), "Classified payload");

        let mut outcomes = Vec::new();
        for subscription in self.rules.iter() {
            if !subscription_matches(&subscription.filter, topic) {
                continue;
            }
            for rule in &subscription.rules {
                outcomes.push(self.evaluate_recorded(rule, topic, &payload));
            }
        }

        outcomes
    }

    /// Process a message delivered for one specific subscription
    ///
    /// Unknown filters produce no outcomes.
    pub fn process_subscription(&self, filter: &str, topic: &str, payload: &[u8]) -> Vec<Outcome> {
        let Some(rules) = self.rules.rules_for(filter) else {
            tracing::debug!(filter = %filter, "No rules for subscription");
            return Vec::new();
        };

        self.metrics.record_message();
        let payload = ClassifiedPayload::classify(payload);

        rules
            .iter()
            .map(|rule| self.evaluate_recorded(rule, topic, &payload))
            .collect()
    }

    fn evaluate_recorded(
        &self,
        rule: &CompiledRule,
        topic: &str,
        payload: &ClassifiedPayload,
    ) -> Outcome {
        let outcome = self.evaluate(rule, topic, payload);
        self.metrics.record_outcome(rule.name(), outcome.as_str());
        outcome
    }

    /// Evaluate a single rule against a classified message
    pub fn evaluate(&self, rule: &CompiledRule, topic: &str, payload: &ClassifiedPayload) -> Outcome {
        // Matching
        let Some(ctx) = rule.context(payload, topic) else {
            tracing::trace!(metric = %rule.name(), topic = %topic, "Topic does not match rule");
            return Outcome::Skipped(SkipReason::NoMatch);
        };

        // Valuing
        let value = match self.value(rule, &ctx) {
            Ok(value) => value,
            Err(reason) => {
                log_skip(rule, topic, &reason);
                return Outcome::Skipped(reason);
            }
        };

        // Labeling
        let labels = match render_labels(rule, &ctx) {
            Ok(labels) => labels,
            Err(reason) => {
                log_skip(rule, topic, &reason);
                return Outcome::Skipped(reason);
            }
        };

        // Updating
        if let Err(e) = self.registry.set(rule.gauge(), &labels, value) {
            let reason = SkipReason::Rejected(e);
            log_skip(rule, topic, &reason);
            return Outcome::Skipped(reason);
        }

        tracing::trace!(
            metric = %rule.name(),
            topic = %topic,
            value,
            "Gauge updated"
        );

        Outcome::Applied { value, labels }
    }

    fn value(&self, rule: &CompiledRule, ctx: &RenderContext<'_>) -> Result<f64, SkipReason> {
        let Some(template) = rule.value_template() else {
            return ctx.payload.as_number().ok_or(SkipReason::PayloadNotNumeric);
        };

        let rendered = template.render(ctx).map_err(SkipReason::ValueRender)?;
        let trimmed = rendered.trim();
        parse_number(trimmed).ok_or_else(|| SkipReason::ValueNotNumeric(trimmed.to_string()))
    }
}

/// Render every label, failing the whole rule on the first error
///
/// A partial label set would not match the registered label names.
fn render_labels(
    rule: &CompiledRule,
    ctx: &RenderContext<'_>,
) -> Result<BTreeMap<String, String>, SkipReason> {
    rule.label_templates()
        .iter()
        .map(|(label, template)| {
            template
                .render(ctx)
                .map(|value| (label.clone(), value))
                .map_err(|error| SkipReason::LabelRender {
                    label: label.clone(),
                    error,
                })
        })
        .collect()
}

/// Whether a subscription filter covers a topic
///
/// Topics starting with `$` reach only filters that spell out the same `$`
/// prefix, never a leading wildcard.
fn subscription_matches(filter: &str, topic: &str) -> bool {
    let (topic, filter) = match topic.strip_prefix('$') {
        Some(rest) => match filter.strip_prefix('$') {
            Some(filter) => (rest, filter),
            None => return false,
        },
        None => (topic, filter),
    };

    // rumqttc slices the first byte of the topic
    if topic.is_empty() || topic.is_char_boundary(1) {
        rumqttc::matches(topic, filter)
    } else {
        rumqttc::matches(&format!("/{}", topic), &format!("/{}", filter))
    }
}

fn log_skip(rule: &CompiledRule, topic: &str, reason: &SkipReason) {
    match reason {
        SkipReason::ValueRender(_) | SkipReason::LabelRender { .. } => {
            tracing::warn!(metric = %rule.name(), topic = %topic, reason = %reason, "Rule skipped");
        }
        _ => {
            tracing::debug!(metric = %rule.name(), topic = %topic, reason = %reason, "Rule skipped");
        }
    }
}
