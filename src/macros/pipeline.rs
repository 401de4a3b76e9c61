use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use regex::Regex;
use tracing::{debug, info, warn};

use super::parser::{MacroAction, MacroMatch, MacroParser};
use crate::backend::DeviceBackend;
use crate::core::{Device, DeviceState, Result};
use crate::cycle::CycleScheduler;
use crate::registry::DeviceRegistry;

/// Configuration for the macro pipeline
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Cycle duration used when a `cycle` macro omits its seconds
    pub default_cycle_secs: u64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        PipelineConfig {
            default_cycle_secs: 30,
        }
    }
}

/// The two divergent projections of one processed message
///
/// The context view is the only text fed back into persisted conversational
/// state; the visual view is the only text rendered to the human. The
/// human-visible bracket text never appears in the context view.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageProjections {
    /// Macro literals removed, whitespace collapsed
    pub context: String,
    /// Executed macro literals replaced by bracketed status text
    pub visual: String,
    /// How many macros executed successfully
    pub executed: usize,
}

/// How one match ended up
enum MatchOutcome {
    /// Operation succeeded; visual view gets this replacement
    Replaced(String),
    /// Name did not resolve or the operation failed; the literal stays in
    /// the visual view but is still stripped from the context view
    Skipped,
}

/// Scans rendered chat text for device macros, executes them, and emits the
/// context/visual projections
pub struct MacroPipeline {
    registry: Arc<DeviceRegistry>,
    backend: Arc<dyn DeviceBackend>,
    scheduler: CycleScheduler,
    parser: MacroParser,
    config: PipelineConfig,
    /// Message identifiers already processed; checked and marked before any
    /// device I/O so a re-render cannot double-trigger
    processed: Mutex<HashSet<String>>,
    spaces: Regex,
}

impl MacroPipeline {
    /// Creates a pipeline with default settings
    pub fn new(
        registry: Arc<DeviceRegistry>,
        backend: Arc<dyn DeviceBackend>,
        scheduler: CycleScheduler,
    ) -> Self {
        Self::with_config(registry, backend, scheduler, PipelineConfig::default())
    }

    /// Creates a pipeline with explicit settings
    pub fn with_config(
        registry: Arc<DeviceRegistry>,
        backend: Arc<dyn DeviceBackend>,
        scheduler: CycleScheduler,
        config: PipelineConfig,
    ) -> Self {
        MacroPipeline {
            registry,
            backend,
            scheduler,
            parser: MacroParser::new(),
            config,
            processed: Mutex::new(HashSet::new()),
            spaces: Regex::new(r"[ \t]{2,}").expect("whitespace pattern is valid"),
        }
    }

    /// Processes one rendered message
    ///
    /// Returns `None` when there is nothing to do: the message is still
    /// streaming (re-attempt once rendering completes), was already
    /// processed, or contains no macros. Matches execute strictly left to
    /// right, each awaited before the next; one macro's failure is logged
    /// and skipped while its siblings still run.
    pub async fn process(
        &self,
        message_id: &str,
        text: &str,
        streaming: bool,
    ) -> Result<Option<MessageProjections>> {
        if streaming {
            debug!(message_id, "message still streaming, deferring");
            return Ok(None);
        }

        let matches = self.parser.find_all(text);
        if matches.is_empty() {
            return Ok(None);
        }

        // Atomic check-and-mark before any device operation begins.
        {
            let mut processed = self.processed.lock().expect("lock poisoned");
            if !processed.insert(message_id.to_string()) {
                debug!(message_id, "message already processed");
                return Ok(None);
            }
        }
        info!(message_id, macros = matches.len(), "processing device macros");

        let mut outcomes = Vec::with_capacity(matches.len());
        for m in &matches {
            outcomes.push(self.execute_match(m).await);
        }

        let executed = outcomes
            .iter()
            .filter(|o| matches!(o, MatchOutcome::Replaced(_)))
            .count();
        Ok(Some(MessageProjections {
            context: self.context_view(text, &matches),
            visual: visual_view(text, &matches, &outcomes),
            executed,
        }))
    }

    /// Resolves and executes one match
    async fn execute_match(&self, m: &MacroMatch) -> MatchOutcome {
        let Some(device) = self.registry.find_by_name(&m.device_name) else {
            warn!(name = %m.device_name, "macro names an unknown device, skipping");
            return MatchOutcome::Skipped;
        };

        match m.action {
            MacroAction::On => self.set_state(&device, DeviceState::On).await,
            MacroAction::Off => self.set_state(&device, DeviceState::Off).await,
            MacroAction::Cycle => {
                let secs = m.duration.unwrap_or(self.config.default_cycle_secs);
                match self
                    .scheduler
                    .request_cycle(device.ip, &device.description, secs)
                    .await
                {
                    // Queued or started immediately, the replacement reads
                    // the same; queue position is not reflected in the text.
                    Ok(_) => MatchOutcome::Replaced(format!(
                        "[{} CYCLED {}s]",
                        device.description, secs
                    )),
                    Err(e) => {
                        warn!(name = %device.name, "cycle macro failed: {}", e);
                        MatchOutcome::Skipped
                    }
                }
            }
        }
    }

    async fn set_state(&self, device: &Device, state: DeviceState) -> MatchOutcome {
        let result = match state {
            DeviceState::On => self.backend.turn_on(device.ip).await,
            DeviceState::Off => self.backend.turn_off(device.ip).await,
        };
        match result {
            Ok(()) => {
                self.registry.update_state(device.ip, state);
                let word = match state {
                    DeviceState::On => "ON",
                    DeviceState::Off => "OFF",
                };
                MatchOutcome::Replaced(format!("[{} {}]", device.description, word))
            }
            Err(e) => {
                warn!(name = %device.name, "macro device operation failed: {}", e);
                MatchOutcome::Skipped
            }
        }
    }

    /// Builds the context view: every matched literal deleted, runs of
    /// spaces collapsed
    fn context_view(&self, text: &str, matches: &[MacroMatch]) -> String {
        let mut out = String::with_capacity(text.len());
        let mut cursor = 0;
        for m in matches {
            out.push_str(&text[cursor..m.span.start]);
            cursor = m.span.end;
        }
        out.push_str(&text[cursor..]);
        self.spaces.replace_all(&out, " ").trim().to_string()
    }
}

/// Builds the visual view: executed matches replaced by their bracket text,
/// skipped matches left as their original literals
fn visual_view(text: &str, matches: &[MacroMatch], outcomes: &[MatchOutcome]) -> String {
    let mut out = String::with_capacity(text.len());
    let mut cursor = 0;
    for (m, outcome) in matches.iter().zip(outcomes) {
        out.push_str(&text[cursor..m.span.start]);
        match outcome {
            MatchOutcome::Replaced(replacement) => out.push_str(replacement),
            MatchOutcome::Skipped => out.push_str(&text[m.span.clone()]),
        }
        cursor = m.span.end;
    }
    out.push_str(&text[cursor..]);
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::testing::MockBackend;
    use crate::backend::DeviceOp;
    use crate::core::DEFAULT_DESCRIPTION;
    use std::net::Ipv4Addr;

    fn device(ip: &str, name: &str, description: &str) -> Device {
        Device {
            ip: ip.parse().unwrap(),
            name: name.to_string(),
            original_name: String::new(),
            model: "HS100".to_string(),
            description: description.to_string(),
            state: DeviceState::Off,
            has_emeter: false,
        }
    }

    fn setup() -> (Arc<DeviceRegistry>, Arc<MockBackend>, MacroPipeline) {
        let registry = Arc::new(DeviceRegistry::new());
        registry
            .upsert(device("192.168.1.10", "Lamp", "Desk Lamp"))
            .unwrap();
        registry
            .upsert(device("192.168.1.11", "Fan", DEFAULT_DESCRIPTION))
            .unwrap();
        let backend = Arc::new(MockBackend::new());
        let scheduler = CycleScheduler::new(backend.clone());
        let pipeline = MacroPipeline::new(registry.clone(), backend.clone(), scheduler);
        (registry, backend, pipeline)
    }

    #[tokio::test]
    async fn test_dual_channel_projections() {
        let (registry, _backend, pipeline) = setup();
        let text = "turn on the lamp {{tplink-on:Lamp}} now";

        let out = pipeline.process("m1", text, false).await.unwrap().unwrap();
        assert_eq!(out.context, "turn on the lamp now");
        assert_eq!(out.visual, "turn on the lamp [Desk Lamp ON] now");
        assert!(!out.context.contains("{{tplink-on:Lamp}}"));
        assert!(!out.visual.contains("{{tplink-on:Lamp}}"));
        assert_eq!(out.executed, 1);

        // The registry's state snapshot was refreshed
        let lamp: Ipv4Addr = "192.168.1.10".parse().unwrap();
        assert_eq!(registry.get(lamp).unwrap().state, DeviceState::On);
    }

    #[tokio::test]
    async fn test_idempotence_marker() {
        let (_registry, backend, pipeline) = setup();
        let text = "{{tplink-on:Lamp}}";

        assert!(pipeline.process("m1", text, false).await.unwrap().is_some());
        let calls = backend.calls().len();

        // Second processing of the same message id does nothing.
        assert!(pipeline.process("m1", text, false).await.unwrap().is_none());
        assert_eq!(backend.calls().len(), calls);

        // A different message id is its own marker.
        assert!(pipeline.process("m2", text, false).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_streaming_message_is_deferred_not_marked() {
        let (_registry, backend, pipeline) = setup();
        let text = "{{tplink-off:Lamp}}";

        assert!(pipeline.process("m1", text, true).await.unwrap().is_none());
        assert!(backend.calls().is_empty());

        // The same id still processes once rendering completes.
        assert!(pipeline.process("m1", text, false).await.unwrap().is_some());
        assert_eq!(backend.calls().len(), 1);
    }

    #[tokio::test]
    async fn test_unresolved_device_stripped_from_context_only() {
        let (_registry, backend, pipeline) = setup();
        let text = "kill it {{tplink-off:Unknown}} please";

        let out = pipeline.process("m1", text, false).await.unwrap().unwrap();
        assert_eq!(out.context, "kill it please");
        assert_eq!(out.visual, "kill it {{tplink-off:Unknown}} please");
        assert_eq!(out.executed, 0);
        assert!(backend.calls().is_empty());
    }

    #[tokio::test]
    async fn test_failed_macro_is_isolated_from_siblings() {
        let (_registry, backend, pipeline) = setup();
        backend.set_failing("192.168.1.10".parse().unwrap(), true);
        let text = "{{tplink-on:Lamp}} and {{tplink-on:Fan}}";

        let out = pipeline.process("m1", text, false).await.unwrap().unwrap();
        assert_eq!(out.visual, "{{tplink-on:Lamp}} and [Generic Device ON]");
        assert_eq!(out.context, "and");
        assert_eq!(out.executed, 1);
    }

    #[tokio::test]
    async fn test_malformed_duration_runs_nothing() {
        let (_registry, backend, pipeline) = setup();
        // Seconds too large for u64: not a macro, and in particular not a
        // cycle at the default duration.
        let text = "{{tplink-cycle:Lamp:99999999999999999999999}}";

        assert!(pipeline.process("m1", text, false).await.unwrap().is_none());
        assert!(backend.calls().is_empty());
    }

    #[tokio::test]
    async fn test_matches_execute_left_to_right() {
        let (_registry, backend, pipeline) = setup();
        let text = "{{tplink-on:Fan}} {{tplink-off:Lamp}} {{tplink-off:Fan}}";

        pipeline.process("m1", text, false).await.unwrap().unwrap();
        let ips: Vec<Ipv4Addr> = backend.calls().into_iter().map(|(ip, _)| ip).collect();
        assert_eq!(
            ips,
            vec![
                "192.168.1.11".parse::<Ipv4Addr>().unwrap(),
                "192.168.1.10".parse().unwrap(),
                "192.168.1.11".parse().unwrap(),
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_cycle_macro_with_and_without_seconds() {
        let (_registry, backend, pipeline) = setup();
        let text = "{{tplink-cycle:Lamp:5}} {{tplink-cycle:Fan}}";

        let out = pipeline.process("m1", text, false).await.unwrap().unwrap();
        assert_eq!(
            out.visual,
            "[Desk Lamp CYCLED 5s] [Generic Device CYCLED 30s]"
        );
        // Both devices were turned on by the scheduler.
        let ons = backend
            .calls()
            .into_iter()
            .filter(|(_, op)| *op == DeviceOp::SetRelay(DeviceState::On))
            .count();
        assert_eq!(ons, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_queued_cycle_macro_reads_the_same() {
        let (_registry, _backend, pipeline) = setup();

        let first = pipeline
            .process("m1", "{{tplink-cycle:Lamp:60}}", false)
            .await
            .unwrap()
            .unwrap();
        let second = pipeline
            .process("m2", "{{tplink-cycle:Lamp:60}}", false)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(first.visual, second.visual);
    }

    #[tokio::test]
    async fn test_message_without_macros_is_untouched() {
        let (_registry, backend, pipeline) = setup();
        assert!(pipeline
            .process("m1", "no devices here", false)
            .await
            .unwrap()
            .is_none());
        assert!(backend.calls().is_empty());
    }
}
