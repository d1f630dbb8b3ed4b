//! Message transformation module
//!
//! Turns MQTT publishes into gauge updates: the payload is classified once,
//! each rule of the matching subscriptions tests the topic against its
//! pattern, renders its value and label templates, and writes the gauge.
//!
//! # Example
//!
//! ```ignore
//! use mqtt_exporter::transformer::{compile_topics, RuleSpec, TransformEngine};
//!
//! let rules = compile_topics(&topics, "mqtt", &registry)?;
//! let engine = TransformEngine::new(Arc::new(rules), registry, metrics);
//! engine.process("sensors/kitchen/temp", b"21.5");
//! ```

pub mod engine;
pub mod formatter;
pub mod payload;
pub mod rules;
pub mod template;

pub use engine::{Outcome, SkipReason, TransformEngine};
pub use formatter::{MetricType, PrometheusFormatter, PrometheusMetric, CONTENT_TYPE};
pub use payload::{ClassifiedPayload, RenderContext};
pub use rules::{
    compile_topics, CompiledRule, RuleError, RuleResult, RuleSpec, RuleSummary, TopicRuleSet,
    TopicRules,
};
pub use template::{RenderError, RenderResult, Template, TemplateError};
