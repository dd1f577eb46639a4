//! Query orchestration
//!
//! A query flows through relevance filtering, then context compaction and
//! grammar compilation over the *same* filtered set, then one serialized
//! inference call, then dispatch. Every failure along the way ends up in the
//! returned [`QueryReport`]; nothing here returns an error to the caller for a
//! bad query.

use crate::bus::MessageBus;
use crate::compactor::compact_services;
use crate::config::RouterConfig;
use crate::dispatch::{parse_completion, CommandDispatcher, CommandOutcome, ModelSelection};
use crate::error::{RouterError, RouterResult};
use crate::grammar::compile_grammar;
use crate::inference::{CompletionRequest, InferenceEngine};
use crate::interface::{EnricherRegistry, ServiceInterface};
use crate::registry::{CapabilityRegistry, DiscoveryWorker};
use crate::relevance::RelevanceFilter;
use crate::things::{JsonFileThingSource, ThingDirectory};
use chrono::{DateTime, Utc};
use serde::{Serialize, Serializer};
use serde_json::Value as JsonValue;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{debug, info, warn};

/// System prompt placed before the compacted service context
pub const DEFAULT_PREAMBLE: &str = r#"You are a home assistant. Pick a command from the services below.
Reply JSON: {"service":"...","command":"...","args":{...}}
Only use listed commands and args. Leave args empty ({}) unless the user gives a value.
Pick the command whose description best matches the request.
If nothing matches, reply exactly: DONT_KNOW
Do not explain or add any other text.

Examples:
User: turn on the living room lights
{"service":"ZmwLights","command":"all_lights_on","args":{"prefix":"LivingRoom"}}
User: announce dinner is ready
{"service":"ZmwSpeakerAnnounce","command":"tts","args":{"msg":"Dinner is ready"}}
User: what is the meaning of life
DONT_KNOW

Available services:
"#;

/// Everything the model is shown for one query
#[derive(Debug, Clone, Serialize)]
pub struct PreparedQuery {
    pub query: String,
    pub services: Vec<ServiceInterface>,
    pub context: String,
    pub device_context: Option<String>,
    pub grammar: String,
    pub system_prompt: String,
}

impl PreparedQuery {
    pub fn service_names(&self) -> Vec<&str> {
        self.services.iter().map(|s| s.name.as_str()).collect()
    }
}

#[derive(Debug, Clone)]
pub struct AskOptions {
    /// Ask the model but do not execute its choice
    pub dry_run: bool,
    /// Where the query came from, kept in the history
    pub source: String,
}

impl Default for AskOptions {
    fn default() -> Self {
        Self {
            dry_run: false,
            source: "local".to_string(),
        }
    }
}

impl AskOptions {
    pub fn dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    pub fn source(mut self, source: impl Into<String>) -> Self {
        self.source = source.into();
        self
    }
}

fn serialize_error<S: Serializer>(error: &RouterError, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(&error.to_string())
}

#[derive(Debug, Serialize)]
#[serde(tag = "outcome", content = "detail", rename_all = "snake_case")]
pub enum QueryOutcome {
    /// The filter found nothing; the model was not consulted
    NoRelevantService,
    /// The inference engine is not ready
    ModelUnavailable(String),
    /// The model answered with the fallback sentinel
    NoMatch,
    /// Dry run: what would have been executed
    Selected(ModelSelection),
    Dispatched { service: String, command: String },
    Replied {
        service: String,
        command: String,
        reply: JsonValue,
    },
    Failed(#[serde(serialize_with = "serialize_error")] RouterError),
}

impl QueryOutcome {
    /// Text for whoever asked
    pub fn user_message(&self, prompt: &str) -> String {
        match self {
            QueryOutcome::NoRelevantService | QueryOutcome::NoMatch => {
                format!("I don't know how to reply to: {}", prompt)
            }
            QueryOutcome::ModelUnavailable(_) => "Model not loaded yet".to_string(),
            QueryOutcome::Selected(selection) => format!(
                "Would run {}.{} {}",
                selection.service,
                selection.command,
                JsonValue::Object(selection.args.clone())
            ),
            QueryOutcome::Dispatched { service, command } => {
                format!("Sent {}.{}", service, command)
            }
            QueryOutcome::Replied { reply, .. } => match reply {
                JsonValue::String(text) => text.clone(),
                other => other.to_string(),
            },
            QueryOutcome::Failed(error) => error.to_string(),
        }
    }

    /// Short machine-friendly label
    pub fn label(&self) -> &'static str {
        match self {
            QueryOutcome::NoRelevantService => "no_relevant_service",
            QueryOutcome::ModelUnavailable(_) => "model_unavailable",
            QueryOutcome::NoMatch => "no_match",
            QueryOutcome::Selected(_) => "selected",
            QueryOutcome::Dispatched { .. } => "dispatched",
            QueryOutcome::Replied { .. } => "replied",
            QueryOutcome::Failed(_) => "failed",
        }
    }

    /// The service and command the model picked, if any
    pub fn chosen(&self) -> Option<(&str, &str)> {
        match self {
            QueryOutcome::Selected(s) => Some((s.service.as_str(), s.command.as_str())),
            QueryOutcome::Dispatched { service, command }
            | QueryOutcome::Replied {
                service, command, ..
            } => Some((service.as_str(), command.as_str())),
            _ => None,
        }
    }
}

impl From<CommandOutcome> for QueryOutcome {
    fn from(outcome: CommandOutcome) -> Self {
        match outcome {
            CommandOutcome::NoMatch => QueryOutcome::NoMatch,
            CommandOutcome::Dispatched { service, command } => {
                QueryOutcome::Dispatched { service, command }
            }
            CommandOutcome::Replied {
                service,
                command,
                reply,
            } => QueryOutcome::Replied {
                service,
                command,
                reply,
            },
        }
    }
}

#[derive(Debug, Serialize)]
pub struct QueryReport {
    pub prepared: PreparedQuery,
    /// Raw model output; absent when the model was not consulted
    pub completion: Option<String>,
    pub outcome: QueryOutcome,
    pub dry_run: bool,
}

impl QueryReport {
    pub fn user_message(&self) -> String {
        self.outcome.user_message(&self.prepared.query)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct HistoryEntry {
    pub prompt: String,
    pub completion: Option<String>,
    pub outcome: String,
    pub result: String,
    pub time: DateTime<Utc>,
    pub source: String,
}

pub struct Router {
    bus: Arc<dyn MessageBus>,
    registry: Arc<CapabilityRegistry>,
    enrichers: EnricherRegistry,
    filter: RelevanceFilter,
    dispatcher: CommandDispatcher,
    engine: Arc<dyn InferenceEngine>,
    /// One inference context: calls are serialized
    inference_lock: tokio::sync::Mutex<()>,
    things: Option<ThingDirectory>,
    include_things: bool,
    preamble: String,
    use_grammar: bool,
    max_tokens: u32,
    temperature: f32,
    history: Mutex<VecDeque<HistoryEntry>>,
    history_len: usize,
    discovery: Mutex<Option<DiscoveryWorker>>,
}

impl Router {
    pub fn new(
        bus: Arc<dyn MessageBus>,
        engine: Arc<dyn InferenceEngine>,
        config: &RouterConfig,
    ) -> Self {
        let enrichers = EnricherRegistry::with_builtin();
        let things = config.devices.things_file.as_ref().map(|path| {
            ThingDirectory::new(
                Arc::new(JsonFileThingSource::new(path.clone())),
                Duration::from_secs(config.devices.cache_ttl_secs),
                config.devices.max_things,
            )
        });

        Self {
            registry: Arc::new(CapabilityRegistry::new(Arc::clone(&bus))),
            filter: RelevanceFilter::new(enrichers.clone())
                .with_max_results(config.router.max_services)
                .with_skip_services(config.router.skip_services.iter().cloned()),
            dispatcher: CommandDispatcher::new(Arc::clone(&bus))
                .with_reply_timeout(config.router.reply_timeout()),
            bus,
            enrichers,
            engine,
            inference_lock: tokio::sync::Mutex::new(()),
            things,
            include_things: config.devices.include_in_prompt,
            preamble: config
                .router
                .preamble
                .clone()
                .unwrap_or_else(|| DEFAULT_PREAMBLE.to_string()),
            use_grammar: config.router.use_grammar,
            max_tokens: config.llm.max_tokens,
            temperature: config.llm.temperature,
            history: Mutex::new(VecDeque::new()),
            history_len: config.router.history_len,
            discovery: Mutex::new(None),
        }
    }

    /// Replace the enrichment handlers used for filtering, compaction and
    /// grammar compilation
    pub fn with_enrichers(mut self, enrichers: EnricherRegistry) -> Self {
        self.filter.set_enrichers(enrichers.clone());
        self.enrichers = enrichers;
        self
    }

    pub fn with_things(mut self, things: ThingDirectory, include_in_prompt: bool) -> Self {
        self.things = Some(things);
        self.include_things = include_in_prompt;
        self
    }

    pub fn registry(&self) -> &Arc<CapabilityRegistry> {
        &self.registry
    }

    pub fn dispatcher(&self) -> &CommandDispatcher {
        &self.dispatcher
    }

    pub fn enrichers(&self) -> &EnricherRegistry {
        &self.enrichers
    }

    pub fn engine_name(&self) -> &str {
        self.engine.name()
    }

    /// Subscribe to discovery replies. Calling it twice keeps the first
    /// subscription.
    pub fn start_discovery(&self) -> RouterResult<()> {
        let mut discovery = self
            .discovery
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if discovery.is_none() {
            *discovery = Some(self.registry.start_discovery_worker()?);
            info!("Listening for interface descriptions");
        }
        Ok(())
    }

    pub fn is_discovering(&self) -> bool {
        self.discovery
            .lock()
            .map(|d| d.is_some())
            .unwrap_or(false)
    }

    pub fn shutdown(&self) {
        let worker = self
            .discovery
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();
        if let Some(worker) = worker {
            worker.stop();
            info!("Stopped discovery");
        }
    }

    pub async fn on_service_announced(
        &self,
        service_name: &str,
        topic: Option<&str>,
    ) -> RouterResult<bool> {
        self.registry.on_service_announced(service_name, topic).await
    }

    /// Ask every known service to re-publish its interface
    pub async fn rediscover_all(&self) -> RouterResult<usize> {
        self.registry.request_discovery_all().await
    }

    /// Build the model input for `query` without calling the model
    pub async fn prepare(&self, query: &str) -> PreparedQuery {
        let snapshot = self.registry.snapshot();
        let services = self.filter.filter(query, &snapshot);
        debug!(
            "Query '{}' selected {:?}",
            query,
            services.iter().map(|s| s.name.as_str()).collect::<Vec<_>>()
        );

        let context = compact_services(&services, &self.enrichers);
        let grammar = compile_grammar(&services, &self.enrichers);

        let device_context = match &self.things {
            Some(directory) => match directory.context_for(query).await {
                Ok(text) if !text.is_empty() => Some(text),
                Ok(_) => None,
                Err(e) => {
                    warn!("Device context unavailable: {}", e);
                    None
                }
            },
            None => None,
        };

        let mut system_prompt = format!("{}{}", self.preamble, context);
        if self.include_things {
            if let Some(devices) = &device_context {
                system_prompt.push('\n');
                system_prompt.push_str(devices);
            }
        }

        PreparedQuery {
            query: query.to_string(),
            services,
            context,
            device_context,
            grammar,
            system_prompt,
        }
    }

    pub async fn count_prompt_tokens(&self, prepared: &PreparedQuery) -> Option<usize> {
        self.engine.count_tokens(&prepared.system_prompt).await
    }

    /// Run the full pipeline for one query
    pub async fn ask(&self, query: &str, options: AskOptions) -> QueryReport {
        let prepared = self.prepare(query).await;

        let (completion, outcome) = if prepared.services.is_empty() {
            info!("No relevant service for '{}'", query);
            (None, QueryOutcome::NoRelevantService)
        } else {
            match self.infer(&prepared).await {
                Ok(completion) => {
                    let outcome = self.resolve(&completion, options.dry_run).await;
                    (Some(completion), outcome)
                }
                Err(RouterError::ModelUnavailable(reason)) => {
                    warn!("Model unavailable: {}", reason);
                    (None, QueryOutcome::ModelUnavailable(reason))
                }
                Err(e) => {
                    warn!("Inference failed: {}", e);
                    (None, QueryOutcome::Failed(e))
                }
            }
        };

        let report = QueryReport {
            prepared,
            completion,
            outcome,
            dry_run: options.dry_run,
        };
        self.record(&report, options.source);
        report
    }

    async fn infer(&self, prepared: &PreparedQuery) -> RouterResult<String> {
        let request = CompletionRequest::new(&prepared.system_prompt, &prepared.query)
            .with_grammar(self.use_grammar.then(|| prepared.grammar.clone()))
            .with_sampling(self.max_tokens, self.temperature);

        let _guard = self.inference_lock.lock().await;
        let completion = self.engine.complete(&request).await?;
        debug!("Model replied: {}", completion);
        Ok(completion)
    }

    async fn resolve(&self, completion: &str, dry_run: bool) -> QueryOutcome {
        if dry_run {
            return match parse_completion(completion) {
                Ok(None) => QueryOutcome::NoMatch,
                Ok(Some(selection)) => QueryOutcome::Selected(selection),
                Err(e) => QueryOutcome::Failed(e),
            };
        }

        let snapshot = self.registry.snapshot();
        match self.dispatcher.dispatch(completion, &snapshot).await {
            Ok(outcome) => outcome.into(),
            Err(e) => {
                warn!("Dispatch failed: {}", e);
                QueryOutcome::Failed(e)
            }
        }
    }

    fn record(&self, report: &QueryReport, source: String) {
        if self.history_len == 0 {
            return;
        }
        let entry = HistoryEntry {
            prompt: report.prepared.query.clone(),
            completion: report.completion.clone(),
            outcome: report.outcome.label().to_string(),
            result: report.user_message(),
            time: Utc::now(),
            source,
        };
        let mut history = self
            .history
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        history.push_back(entry);
        while history.len() > self.history_len {
            history.pop_front();
        }
    }

    /// Recent queries, oldest first
    pub fn history(&self) -> Vec<HistoryEntry> {
        self.history
            .lock()
            .map(|h| h.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn bus(&self) -> &Arc<dyn MessageBus> {
        &self.bus
    }
}

impl Drop for Router {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::InMemoryBus;
    use crate::inference::ScriptedEngine;
    use crate::interface::{Enricher, ValueDomains};
    use serde_json::json;

    fn lights_doc() -> Vec<u8> {
        serde_json::to_vec(&json!({
            "meta": {"name": "ZmwLights", "mqtt_topic": "zmw_lights"},
            "description": "Control lights",
            "commands": {
                "all_lights_on": {"description": "Turn lights on", "params": {"prefix": "Light name prefix"}},
                "get_mqtt_description": {"params": {}}
            }
        }))
        .unwrap()
    }

    fn router(replies: &[&str]) -> (Arc<InMemoryBus>, Arc<ScriptedEngine>, Router) {
        let bus = Arc::new(InMemoryBus::new());
        let engine = Arc::new(ScriptedEngine::new(replies.iter().copied()));
        let router = Router::new(bus.clone(), engine.clone(), &RouterConfig::default());
        router
            .registry()
            .ingest_discovery_payload("zmw_lights/get_mqtt_description_reply", &lights_doc())
            .unwrap();
        (bus, engine, router)
    }

    #[tokio::test]
    async fn nothing_relevant_skips_the_model() {
        let (_, engine, router) = router(&[]);
        let report = router.ask("meaning of life", AskOptions::default()).await;
        assert!(matches!(report.outcome, QueryOutcome::NoRelevantService));
        assert!(engine.requests().is_empty());
        assert_eq!(
            report.user_message(),
            "I don't know how to reply to: meaning of life"
        );
    }

    #[tokio::test]
    async fn dispatches_model_choice() {
        let (bus, engine, router) = router(&[
            r#"{"service":"ZmwLights","command":"all_lights_on","args":{"prefix":"Kitchen"}}"#,
        ]);
        let report = router
            .ask("turn on the kitchen lights", AskOptions::default())
            .await;

        assert!(matches!(report.outcome, QueryOutcome::Dispatched { .. }));
        assert_eq!(bus.published_on("zmw_lights/all_lights_on").len(), 1);

        let request = &engine.requests()[0];
        assert!(request.system_prompt.starts_with(DEFAULT_PREAMBLE));
        assert!(request.system_prompt.contains("- all_lights_on(prefix): Turn lights on"));
        assert_eq!(request.grammar.as_deref(), Some(report.prepared.grammar.as_str()));
    }

    #[tokio::test]
    async fn dry_run_does_not_publish() {
        let (bus, _, router) = router(&[
            r#"{"service":"ZmwLights","command":"all_lights_on","args":{"prefix":"Kitchen"}}"#,
        ]);
        let report = router
            .ask("kitchen lights", AskOptions::default().dry_run(true))
            .await;
        assert_eq!(report.outcome.chosen(), Some(("ZmwLights", "all_lights_on")));
        assert!(bus.published().is_empty());
    }

    #[tokio::test]
    async fn unavailable_model_degrades() {
        let (_, _, router) = router(&[]);
        let report = router.ask("lights on", AskOptions::default()).await;
        assert!(matches!(report.outcome, QueryOutcome::ModelUnavailable(_)));
        assert_eq!(report.user_message(), "Model not loaded yet");
    }

    #[tokio::test]
    async fn invalid_output_is_reported_with_raw_text() {
        let (_, _, router) = router(&["sure, turning on the lights"]);
        let report = router.ask("lights on", AskOptions::default()).await;
        assert_eq!(
            report.user_message(),
            "LLM produced invalid response: sure, turning on the lights"
        );
    }

    #[tokio::test]
    async fn history_is_bounded() {
        let bus = Arc::new(InMemoryBus::new());
        let mut config = RouterConfig::default();
        config.router.history_len = 2;
        let router = Router::new(bus, Arc::new(ScriptedEngine::default()), &config);

        for query in ["one", "two", "three"] {
            router
                .ask(query, AskOptions::default().source("test"))
                .await;
        }
        let history = router.history();
        let prompts: Vec<&str> = history.iter().map(|h| h.prompt.as_str()).collect();
        assert_eq!(prompts, vec!["two", "three"]);
        assert!(history.iter().all(|h| h.source == "test"));
    }

    #[tokio::test]
    async fn discovery_lifecycle_owns_one_subscription() {
        let (bus, _, router) = router(&[]);
        router.start_discovery().unwrap();
        router.start_discovery().unwrap();
        assert_eq!(bus.active_subscriptions("+/get_mqtt_description_reply"), 1);

        assert_eq!(router.rediscover_all().await.unwrap(), 1);
        assert_eq!(bus.published_on("zmw_lights/get_mqtt_description").len(), 1);

        router.shutdown();
        assert!(!router.is_discovering());
        assert_eq!(bus.active_subscriptions("+/get_mqtt_description_reply"), 0);
    }

    #[tokio::test]
    async fn engine_failure_is_reported_not_raised() {
        let (bus, engine, router) = router(&[]);
        engine.push_error(RouterError::Inference("HTTP 500".to_string()));

        let report = router.ask("lights on", AskOptions::default()).await;
        assert!(matches!(
            report.outcome,
            QueryOutcome::Failed(RouterError::Inference(_))
        ));
        assert_eq!(report.user_message(), "Inference error: HTTP 500");
        assert!(bus.published().is_empty());
    }

    #[tokio::test]
    async fn device_context_joins_the_prompt() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        std::io::Write::write_all(
            &mut file,
            br#"[{"name": "Kitchen", "type": "light", "actions": {
                "state": {"type": "binary", "value_on": "ON", "value_off": "OFF"}
            }}]"#,
        )
        .unwrap();
        let directory = ThingDirectory::new(
            Arc::new(JsonFileThingSource::new(file.path())),
            Duration::from_secs(30),
            10,
        );

        let (_, _, router) = router(&[]);
        let router = router.with_things(directory, true);
        let prepared = router.prepare("kitchen lights").await;

        let devices = prepared.device_context.clone().unwrap();
        assert!(devices.contains("Kitchen"));
        assert!(prepared.system_prompt.ends_with(&devices));
    }

    struct RoomsEnricher;

    impl Enricher for RoomsEnricher {
        fn context(&self, _iface: &ServiceInterface) -> Option<String> {
            Some("Rooms: Garden, Kitchen".to_string())
        }

        fn value_domains(&self, _iface: &ServiceInterface) -> ValueDomains {
            ValueDomains::from([(
                "prefix".to_string(),
                vec!["Garden".to_string(), "Kitchen".to_string()],
            )])
        }
    }

    #[tokio::test]
    async fn custom_enrichers_reach_filter_context_and_grammar() {
        let (_, _, router) = router(&[]);
        let mut enrichers = EnricherRegistry::empty();
        enrichers.register("ZmwLights", Arc::new(RoomsEnricher));
        let router = router.with_enrichers(enrichers);

        let lights = router.registry().get("ZmwLights").unwrap();
        assert_eq!(
            router.enrichers().value_domains(&lights)["prefix"],
            vec!["Garden", "Kitchen"]
        );

        // "garden" is only known through the enricher
        let prepared = router.prepare("garden").await;
        assert_eq!(prepared.service_names(), vec!["ZmwLights"]);
        assert!(prepared.context.contains("Rooms: Garden, Kitchen"));
        assert!(prepared.grammar.contains(r#"("Garden" | "Kitchen")"#));
    }
}
