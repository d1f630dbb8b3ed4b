//! Rule definitions and the rule compiler
//!
//! A rule describes how messages on a subscribed topic filter update one
//! gauge. Rules are grouped by topic filter in the configuration and compiled
//! exactly once at startup.
//!
//! # Example Configuration (YAML)
//!
//! ```yaml
//! topics:
//!   "sensors/+/temp":
//!     - name: temperature_celsius
//!       help: "Temperature reported by sensors"
//!       match: "sensors/(\\w+)/temp"
//!       value: "{{ .Payload }}"
//!       labels:
//!         room: "{{ .Captures.0 }}"
//! ```
//!
//! # Compilation
//!
//! Compilation is all-or-nothing: patterns and templates of every rule are
//! compiled first, then all gauges are registered in a single batch. Any
//! error aborts startup and leaves the registry untouched.

use std::collections::BTreeMap;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::payload::{ClassifiedPayload, RenderContext};
use super::template::{Template, TemplateError};
use crate::registry::{GaugeHandle, GaugeRegistry, MetricIdentity, RegistryError};

static METRIC_NAME_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[a-zA-Z_:][a-zA-Z0-9_:]*$").expect("invalid metric name regex"));

static LABEL_NAME_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[a-zA-Z_][a-zA-Z0-9_]*$").expect("invalid label name regex"));

/// Errors that can occur during rule compilation
#[derive(Error, Debug)]
pub enum RuleError {
    /// Topic filter is not a valid MQTT subscription
    #[error("Invalid topic filter '{topic}': {reason}")]
    InvalidTopicFilter { topic: String, reason: String },

    /// Rule without a name
    #[error("Rule {index} of topic '{topic}' has no name")]
    EmptyName { topic: String, index: usize },

    /// Name that Prometheus would reject
    #[error("Invalid metric name '{name}': must match [a-zA-Z_:][a-zA-Z0-9_:]*")]
    InvalidMetricName { name: String },

    /// Label name that Prometheus would reject
    #[error("Invalid label name '{label}' in rule '{rule}': {reason}")]
    InvalidLabelName {
        rule: String,
        label: String,
        reason: String,
    },

    /// Invalid regex pattern
    #[error("Invalid match pattern '{pattern}' in rule '{rule}': {source}")]
    InvalidPattern {
        rule: String,
        pattern: String,
        #[source]
        source: regex::Error,
    },

    /// Invalid value or label template
    #[error("Invalid {field} template '{template}' in rule '{rule}': {source}")]
    InvalidTemplate {
        rule: String,
        field: String,
        template: String,
        #[source]
        source: TemplateError,
    },

    /// Gauge registration failed (duplicate or conflicting metric)
    #[error("Failed to register metric: {0}")]
    Registry(#[from] RegistryError),
}

/// Result type for rule operations
pub type RuleResult<T> = Result<T, RuleError>;

/// Declarative rule as read from the configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RuleSpec {
    /// Metric name (without namespace)
    pub name: String,

    /// Regex applied to the message topic; the rule applies unconditionally
    /// when absent
    #[serde(rename = "match", default, skip_serializing_if = "Option::is_none")]
    pub pattern: Option<String>,

    /// Template producing the gauge value; the payload itself must be
    /// numeric when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,

    /// Label name to label value template
    #[serde(default)]
    pub labels: BTreeMap<String, String>,

    /// Help text for the metric
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub help: Option<String>,
}

impl RuleSpec {
    /// Create a rule that stores numeric payloads under `name`
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    /// Set the topic pattern
    pub fn with_match(mut self, pattern: impl Into<String>) -> Self {
        self.pattern = Some(pattern.into());
        self
    }

    /// Set the value template
    pub fn with_value(mut self, value: impl Into<String>) -> Self {
        self.value = Some(value.into());
        self
    }

    /// Add a label template
    pub fn with_label(mut self, key: impl Into<String>, template: impl Into<String>) -> Self {
        self.labels.insert(key.into(), template.into());
        self
    }

    /// Set the help text
    pub fn with_help(mut self, help: impl Into<String>) -> Self {
        self.help = Some(help.into());
        self
    }
}

/// A rule ready for evaluation
///
/// Holds no mutable state and can be shared freely between threads.
#[derive(Debug, Clone)]
pub struct CompiledRule {
    matcher: Option<Regex>,
    value: Option<Template>,
    labels: Vec<(String, Template)>,
    gauge: GaugeHandle,
}

impl CompiledRule {
    /// Fully qualified metric name
    pub fn name(&self) -> &str {
        self.gauge.name()
    }

    /// Gauge this rule writes to
    pub fn gauge(&self) -> &GaugeHandle {
        &self.gauge
    }

    /// Topic pattern, if any
    pub fn matcher(&self) -> Option<&Regex> {
        self.matcher.as_ref()
    }

    /// Value template, if any
    pub fn value_template(&self) -> Option<&Template> {
        self.value.as_ref()
    }

    /// Label templates ordered by label name
    pub fn label_templates(&self) -> &[(String, Template)] {
        &self.labels
    }

    /// Build the render context for a message
    ///
    /// Returns `None` when the rule has a pattern and the topic does not
    /// match it; the rule is then skipped for this message.
    pub fn context<'a>(
        &self,
        payload: &'a ClassifiedPayload,
        topic: &str,
    ) -> Option<RenderContext<'a>> {
        match &self.matcher {
            None => Some(RenderContext::new(payload)),
            Some(re) => re
                .captures(topic)
                .map(|caps| RenderContext::from_captures(payload, &caps)),
        }
    }
}

/// Rules attached to one subscription
#[derive(Debug, Clone)]
pub struct TopicRules {
    /// MQTT topic filter used for the subscription
    pub filter: String,
    /// Rules evaluated for every message delivered on this subscription
    pub rules: Vec<CompiledRule>,
}

/// Compiled rules grouped by topic filter
///
/// Filters are ordered lexicographically and rules keep their
/// configuration order, so evaluation order is deterministic.
#[derive(Debug, Clone, Default)]
pub struct TopicRuleSet {
    topics: Vec<TopicRules>,
}

impl TopicRuleSet {
    /// Create an empty rule set
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of topic filters
    pub fn len(&self) -> usize {
        self.topics.len()
    }

    /// Check if there are no topic filters
    pub fn is_empty(&self) -> bool {
        self.topics.is_empty()
    }

    /// Total number of rules over all filters
    pub fn rule_count(&self) -> usize {
        self.topics.iter().map(|t| t.rules.len()).sum()
    }

    /// Iterate over the topic filters in order
    pub fn filters(&self) -> impl Iterator<Item = &str> {
        self.topics.iter().map(|t| t.filter.as_str())
    }

    /// Rules attached to a topic filter
    pub fn rules_for(&self, filter: &str) -> Option<&[CompiledRule]> {
        self.topics
            .iter()
            .find(|t| t.filter == filter)
            .map(|t| t.rules.as_slice())
    }

    /// Iterate over every subscription and its rules
    pub fn iter(&self) -> impl Iterator<Item = &TopicRules> {
        self.topics.iter()
    }

    /// Describe the compiled rules, for `--dry-run` output
    pub fn describe(&self) -> Vec<RuleSummary> {
        self.topics
            .iter()
            .flat_map(|t| {
                t.rules.iter().map(|r| RuleSummary {
                    topic: t.filter.clone(),
                    metric: r.name().to_string(),
                    pattern: r.matcher().map(|m| m.as_str().to_string()),
                    value: r.value_template().map(|v| v.source().to_string()),
                    labels: r
                        .label_templates()
                        .iter()
                        .map(|(k, v)| (k.clone(), v.source().to_string()))
                        .collect(),
                })
            })
            .collect()
    }
}

impl<'a> IntoIterator for &'a TopicRuleSet {
    type Item = &'a TopicRules;
    type IntoIter = std::slice::Iter<'a, TopicRules>;

    fn into_iter(self) -> Self::IntoIter {
        self.topics.iter()
    }
}

/// Serializable description of a compiled rule
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RuleSummary {
    /// Topic filter
    pub topic: String,
    /// Fully qualified metric name
    pub metric: String,
    /// Topic pattern
    #[serde(rename = "match", skip_serializing_if = "Option::is_none")]
    pub pattern: Option<String>,
    /// Value template
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
    /// Label templates
    pub labels: BTreeMap<String, String>,
}

/// Rule compiled but not yet bound to a gauge
struct PendingRule {
    matcher: Option<Regex>,
    value: Option<Template>,
    labels: Vec<(String, Template)>,
}

/// Compile every rule and register its gauge
///
/// # Arguments
///
/// * `topics` - Rules grouped by MQTT topic filter
/// * `namespace` - Metric namespace prepended to every rule name
/// * `registry` - Registry receiving one gauge per rule
///
/// # Errors
///
/// Returns the first compilation or registration error. Nothing is
/// registered when an error is returned.
pub fn compile_topics(
    topics: &BTreeMap<String, Vec<RuleSpec>>,
    namespace: &str,
    registry: &GaugeRegistry,
) -> RuleResult<TopicRuleSet> {
    let mut pending = Vec::with_capacity(topics.len());
    let mut identities = Vec::new();

    for (filter, specs) in topics {
        if !rumqttc::valid_filter(filter) {
            return Err(RuleError::InvalidTopicFilter {
                topic: filter.clone(),
                reason: "'#' must be the last level and wildcards must fill a whole level"
                    .to_string(),
            });
        }

        let mut rules = Vec::with_capacity(specs.len());
        for (index, spec) in specs.iter().enumerate() {
            if spec.name.is_empty() {
                return Err(RuleError::EmptyName {
                    topic: filter.clone(),
                    index,
                });
            }

            let identity = identity_for(spec, namespace)?;
            rules.push(compile_rule(spec, &identity.fq_name())?);
            identities.push(identity);
        }

        pending.push((filter.clone(), rules));
    }

    let mut gauges = registry.register_all(&identities)?.into_iter();

    let topics = pending
        .into_iter()
        .map(|(filter, rules)| TopicRules {
            filter,
            rules: rules
                .into_iter()
                .zip(gauges.by_ref())
                .map(|(rule, gauge)| CompiledRule {
                    matcher: rule.matcher,
                    value: rule.value,
                    labels: rule.labels,
                    gauge,
                })
                .collect(),
        })
        .collect();

    let rule_set = TopicRuleSet { topics };

    tracing::debug!(
        topics = rule_set.len(),
        rules = rule_set.rule_count(),
        "Compiled rules"
    );

    Ok(rule_set)
}

fn identity_for(spec: &RuleSpec, namespace: &str) -> RuleResult<MetricIdentity> {
    let mut identity = MetricIdentity::new(namespace, spec.name.as_str(), spec.labels.keys());
    if let Some(help) = &spec.help {
        identity = identity.with_help(help);
    }

    let fq_name = identity.fq_name();
    if !METRIC_NAME_RE.is_match(&fq_name) {
        return Err(RuleError::InvalidMetricName { name: fq_name });
    }

    for label in spec.labels.keys() {
        let reason = if !LABEL_NAME_RE.is_match(label) {
            "must match [a-zA-Z_][a-zA-Z0-9_]*"
        } else if label.starts_with("__") {
            "names starting with '__' are reserved"
        } else {
            continue;
        };

        return Err(RuleError::InvalidLabelName {
            rule: fq_name,
            label: label.clone(),
            reason: reason.to_string(),
        });
    }

    Ok(identity)
}

fn compile_rule(spec: &RuleSpec, rule_name: &str) -> RuleResult<PendingRule> {
    let matcher = spec
        .pattern
        .as_deref()
        .filter(|pattern| !pattern.is_empty())
        .map(|pattern| {
            Regex::new(pattern).map_err(|source| RuleError::InvalidPattern {
                rule: rule_name.to_string(),
                pattern: pattern.to_string(),
                source,
            })
        })
        .transpose()?;

    let value = spec
        .value
        .as_deref()
        .filter(|template| !template.is_empty())
        .map(|template| compile_template(rule_name, "value", template))
        .transpose()?;

    let labels = spec
        .labels
        .iter()
        .map(|(label, template)| {
            compile_template(rule_name, &format!("label '{}'", label), template)
                .map(|t| (label.clone(), t))
        })
        .collect::<RuleResult<Vec<_>>>()?;

    Ok(PendingRule {
        matcher,
        value,
        labels,
    })
}

fn compile_template(rule: &str, field: &str, template: &str) -> RuleResult<Template> {
    Template::parse(template).map_err(|source| RuleError::InvalidTemplate {
        rule: rule.to_string(),
        field: field.to_string(),
        template: template.to_string(),
        source,
    })
}
