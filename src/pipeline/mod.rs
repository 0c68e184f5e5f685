//! Pipeline: registry, linker and lifecycle manager for a set of elements.
//!
//! Registration order is significant: register sources before filters before
//! sinks, because every lifecycle operation propagates in registration order.
//! `link` turns the registered set into a chain by creating one connecting
//! port per adjacent pair (geometry taken from the upstream element's output
//! spec) and chaining every element's event bus into the pipeline's own.

use crate::element::{AudioElement, ElementState, OutputSpec};
use crate::error::{Error, Result};
use crate::event::EventBus;
use crate::port::Port;
use std::time::Duration;

/// Construction parameters for a [`Pipeline`].
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Capacity of the pipeline's event bus.
    pub bus_capacity: usize,
    /// Pre-roll threshold in `[0, 1]` applied to the first resumed element.
    pub resume_threshold: f32,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            bus_capacity: 64,
            resume_threshold: 0.0,
        }
    }
}

struct Entry {
    name: String,
    element: AudioElement,
    linked: bool,
    created_input: bool,
    created_output: bool,
}

/// Registry + linker + lifecycle manager for a set of connected elements.
///
/// # Example
///
/// ```rust,ignore
/// let mut pipeline = Pipeline::new(PipelineConfig::default());
/// pipeline.register(decoder, "dec")?;
/// pipeline.register(resampler, "rsp")?;
/// pipeline.register(speaker, "spk")?;
/// pipeline.link(&["dec", "rsp", "spk"])?;
/// pipeline.run()?;
/// ```
pub struct Pipeline {
    entries: Vec<Entry>,
    linked: bool,
    state: ElementState,
    bus: EventBus,
    config: PipelineConfig,
}

impl Pipeline {
    /// Create an empty pipeline.
    pub fn new(config: PipelineConfig) -> Self {
        Self {
            entries: Vec::new(),
            linked: false,
            state: ElementState::Init,
            bus: EventBus::new(config.bus_capacity),
            config,
        }
    }

    /// The pipeline's event bus. Listen here (or chain it onward with
    /// [`set_listener`](Self::set_listener)) to observe every linked element.
    pub fn bus(&self) -> EventBus {
        self.bus.clone()
    }

    /// Aggregate pipeline state.
    pub fn state(&self) -> ElementState {
        self.state
    }

    /// Register an element under a unique name.
    ///
    /// The name becomes the element's tag. Duplicate names are rejected and
    /// leave the pipeline untouched.
    pub fn register(&mut self, element: AudioElement, name: impl Into<String>) -> Result<()> {
        let name = name.into();
        if self.entries.iter().any(|entry| entry.name == name) {
            return Err(Error::DuplicateName(name));
        }
        element.set_tag(name.clone());
        self.entries.push(Entry {
            name,
            element,
            linked: false,
            created_input: false,
            created_output: false,
        });
        Ok(())
    }

    /// Remove an element from the registry. Rejected while linked.
    pub fn unregister(&mut self, name: &str) -> Result<AudioElement> {
        if self.linked {
            return Err(Error::AlreadyLinked);
        }
        let index = self
            .entries
            .iter()
            .position(|entry| entry.name == name)
            .ok_or_else(|| Error::UnknownElement(name.to_string()))?;
        Ok(self.entries.remove(index).element)
    }

    /// Look up a registered element by name.
    pub fn element_by_tag(&self, name: &str) -> Option<AudioElement> {
        self.entries
            .iter()
            .find(|entry| entry.name.eq_ignore_ascii_case(name))
            .map(|entry| entry.element.clone())
    }

    /// Connect the named elements into a chain, in the exact order given.
    ///
    /// Element *i*'s output port becomes element *i+1*'s input port; the port
    /// geometry comes from element *i*'s output spec. Every named element is
    /// subscribed to the pipeline bus. All validation happens before any
    /// mutation, so a failed link leaves the topology exactly as it was.
    pub fn link(&mut self, names: &[&str]) -> Result<()> {
        if self.linked {
            return Err(Error::AlreadyLinked);
        }
        if names.is_empty() {
            return Err(Error::InvalidConfig("link needs at least one element".into()));
        }
        let mut indices = Vec::with_capacity(names.len());
        for name in names {
            let index = self
                .entries
                .iter()
                .position(|entry| entry.name == *name)
                .ok_or_else(|| Error::UnknownElement(name.to_string()))?;
            if indices.contains(&index) {
                return Err(Error::InvalidConfig(format!(
                    "element '{}' appears twice in the link sequence",
                    name
                )));
            }
            indices.push(index);
        }

        // Create every connecting port before touching any element.
        let mut ports = Vec::with_capacity(indices.len().saturating_sub(1));
        for pair in indices.windows(2) {
            let producer = &self.entries[pair[0]];
            let port = match producer.element.output_spec() {
                OutputSpec::Ring { size } => Port::ring(size)?
                    .with_tag(format!("{}_out_rb", producer.name)),
                OutputSpec::Frame {
                    node_size,
                    node_count,
                } => Port::frame(node_size, node_count)?
                    .with_tag(format!("{}_out_fb", producer.name)),
            };
            ports.push(port);
        }

        for (position, &index) in indices.iter().enumerate() {
            let entry = &mut self.entries[index];
            entry.linked = true;
            if position > 0 {
                entry.element.set_input_port(Some(ports[position - 1].clone()));
                entry.created_input = true;
            }
            if position < ports.len() {
                entry.element.set_output_port(Some(ports[position].clone()));
                entry.created_output = true;
            }
            entry.element.set_listener(&self.bus);
            tracing::debug!(element = %entry.name, "linked");
        }
        self.linked = true;
        Ok(())
    }

    /// Remove the data connections and event subscriptions created by
    /// [`link`](Self::link). Ports the elements brought themselves (callback
    /// endpoints) stay in place. Idempotent.
    pub fn unlink(&mut self) -> Result<()> {
        if !self.linked {
            return Ok(());
        }
        for entry in self.entries.iter_mut().filter(|e| e.linked) {
            entry.element.remove_listener();
            if entry.created_input {
                entry.element.set_input_port(None);
                entry.created_input = false;
            }
            if entry.created_output {
                entry.element.set_output_port(None);
                entry.created_output = false;
            }
            entry.linked = false;
            tracing::debug!(element = %entry.name, "unlinked");
        }
        self.linked = false;
        self.state = ElementState::Init;
        Ok(())
    }

    /// Start every linked element's task and resume processing, in
    /// registration order.
    pub fn run(&mut self) -> Result<()> {
        if self.state != ElementState::Init {
            tracing::debug!(state = ?self.state, "pipeline already started");
            return Ok(());
        }
        for entry in self.entries.iter().filter(|e| e.linked) {
            if entry.element.state().can_restart() {
                entry.element.run()?;
            }
        }
        if let Err(e) = self.resume_linked() {
            tracing::error!(error = %e, "pipeline resume failed");
            self.state = ElementState::Error;
            self.terminate()?;
            return Err(e);
        }
        self.state = ElementState::Running;
        tracing::debug!("pipeline started");
        Ok(())
    }

    fn resume_linked(&self) -> Result<()> {
        let mut first = true;
        for entry in self.entries.iter().filter(|e| e.linked) {
            let threshold = if first { self.config.resume_threshold } else { 0.0 };
            first = false;
            entry
                .element
                .resume(threshold, Some(Duration::from_secs(2)))?;
        }
        Ok(())
    }

    /// Suspend every linked element, in registration order.
    pub fn pause(&mut self) -> Result<()> {
        for entry in self.entries.iter().filter(|e| e.linked) {
            entry.element.pause()?;
        }
        self.state = ElementState::Paused;
        Ok(())
    }

    /// Continue after a pause.
    pub fn resume(&mut self) -> Result<()> {
        self.resume_linked()?;
        self.state = ElementState::Running;
        Ok(())
    }

    /// Request a cooperative stop on every linked element. Follow with
    /// [`wait_for_stop`](Self::wait_for_stop).
    pub fn stop(&mut self) -> Result<()> {
        if self.state != ElementState::Running && self.state != ElementState::Paused {
            return Err(Error::InvalidConfig(format!(
                "pipeline cannot stop in state {:?}",
                self.state
            )));
        }
        for entry in self.entries.iter().filter(|e| e.linked) {
            if let Err(e) = entry.element.stop() {
                tracing::warn!(element = %entry.name, error = %e, "stop request failed");
            }
        }
        Ok(())
    }

    /// Block until every linked element actually reached Stopped/Finished,
    /// then reset their state machines to Init for possible reuse.
    pub fn wait_for_stop(&mut self, timeout: Option<Duration>) -> Result<()> {
        for entry in self.entries.iter().filter(|e| e.linked) {
            entry.element.wait_for_stop(timeout)?;
            entry.element.reset_state();
        }
        self.state = ElementState::Init;
        Ok(())
    }

    /// Tear down every linked element's task. Elements remain registered and
    /// can run again.
    pub fn terminate(&mut self) -> Result<()> {
        for entry in self.entries.iter().filter(|e| e.linked) {
            if let Err(e) = entry.element.terminate() {
                tracing::warn!(element = %entry.name, error = %e, "terminate failed");
            }
        }
        if self.state != ElementState::Error {
            self.state = ElementState::Init;
        }
        Ok(())
    }

    /// Reset every linked element's state machine and ports so the chain can
    /// stream again from scratch.
    pub fn reset_items_state(&mut self) -> Result<()> {
        for entry in self.entries.iter().filter(|e| e.linked) {
            entry.element.reset_state();
            entry.element.reset_ports();
        }
        self.state = ElementState::Init;
        Ok(())
    }

    /// Chain the pipeline bus into an external listener bus, replacing any
    /// previous chain.
    pub fn set_listener(&self, listener: &EventBus) {
        self.bus.chain(listener);
    }

    /// Detach from the external listener bus.
    pub fn remove_listener(&self) {
        self.bus.unchain();
    }

    /// True while the registered set is linked into a chain.
    pub fn is_linked(&self) -> bool {
        self.linked
    }

    /// Number of registered elements.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True when nothing is registered.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Drop for Pipeline {
    fn drop(&mut self) {
        let _ = self.terminate();
        let _ = self.unlink();
    }
}

impl std::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline")
            .field("elements", &self.entries.len())
            .field("linked", &self.linked)
            .field("state", &self.state)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::element::{
        ElementConfig, ElementContext, ElementStatus, ProcessOutcome, Processor,
    };
    use crate::event::BusPayload;
    use crate::port::IoOutcome;
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    const WAIT: Option<Duration> = Some(Duration::from_secs(5));

    struct BytesSource {
        data: Vec<u8>,
        pos: usize,
    }

    impl Processor for BytesSource {
        fn process(&mut self, ctx: &mut ElementContext) -> Result<ProcessOutcome> {
            if self.pos >= self.data.len() {
                return Ok(ProcessOutcome::Finished);
            }
            let end = (self.pos + ctx.chunk_size()).min(self.data.len());
            match ctx.write(&self.data[self.pos..end])? {
                IoOutcome::Data(n) => {
                    self.pos += n;
                    Ok(ProcessOutcome::Processed(n))
                }
                other => Ok(ProcessOutcome::from_io(other)),
            }
        }
    }

    struct Relay;

    impl Processor for Relay {
        fn process(&mut self, ctx: &mut ElementContext) -> Result<ProcessOutcome> {
            let mut buf = vec![0u8; ctx.chunk_size()];
            match ctx.read(&mut buf)? {
                IoOutcome::Data(n) => {
                    ctx.write(&buf[..n])?;
                    Ok(ProcessOutcome::Processed(n))
                }
                other => Ok(ProcessOutcome::from_io(other)),
            }
        }
    }

    struct CollectSink {
        out: Arc<Mutex<Vec<u8>>>,
    }

    impl Processor for CollectSink {
        fn process(&mut self, ctx: &mut ElementContext) -> Result<ProcessOutcome> {
            let mut buf = vec![0u8; ctx.chunk_size()];
            match ctx.read(&mut buf)? {
                IoOutcome::Data(n) => {
                    self.out.lock().unwrap().extend_from_slice(&buf[..n]);
                    Ok(ProcessOutcome::Processed(n))
                }
                other => Ok(ProcessOutcome::from_io(other)),
            }
        }
    }

    fn source(data: Vec<u8>) -> AudioElement {
        AudioElement::new(
            ElementConfig::new("unnamed").with_chunk_size(256),
            Box::new(BytesSource { data, pos: 0 }),
        )
        .unwrap()
    }

    fn relay() -> AudioElement {
        AudioElement::new(
            ElementConfig::new("unnamed").with_chunk_size(256),
            Box::new(Relay),
        )
        .unwrap()
    }

    fn sink() -> (AudioElement, Arc<Mutex<Vec<u8>>>) {
        let out = Arc::new(Mutex::new(Vec::new()));
        let element = AudioElement::new(
            ElementConfig::new("unnamed").with_chunk_size(256),
            Box::new(CollectSink {
                out: Arc::clone(&out),
            }),
        )
        .unwrap();
        (element, out)
    }

    #[test]
    fn test_duplicate_name_rejected() {
        let mut pipeline = Pipeline::new(PipelineConfig::default());
        pipeline.register(source(vec![]), "a").unwrap();
        let err = pipeline.register(source(vec![]), "a").unwrap_err();
        assert!(matches!(err, Error::DuplicateName(name) if name == "a"));
        assert_eq!(pipeline.len(), 1);
    }

    #[test]
    fn test_link_unknown_name_leaves_topology_untouched() {
        let mut pipeline = Pipeline::new(PipelineConfig::default());
        pipeline.register(source(vec![1, 2, 3]), "src").unwrap();
        let (snk, _) = sink();
        pipeline.register(snk, "snk").unwrap();

        let err = pipeline.link(&["src", "missing", "snk"]).unwrap_err();
        assert!(matches!(err, Error::UnknownElement(name) if name == "missing"));
        assert!(!pipeline.is_linked());
        // Nothing was wired up.
        assert!(pipeline.element_by_tag("src").unwrap().output_port().is_none());
    }

    #[test]
    fn test_relink_without_unlink_rejected() {
        let mut pipeline = Pipeline::new(PipelineConfig::default());
        pipeline.register(source(vec![1]), "src").unwrap();
        let (snk, _) = sink();
        pipeline.register(snk, "snk").unwrap();

        pipeline.link(&["src", "snk"]).unwrap();
        assert!(matches!(
            pipeline.link(&["src", "snk"]),
            Err(Error::AlreadyLinked)
        ));

        pipeline.unlink().unwrap();
        pipeline.link(&["src", "snk"]).unwrap();
    }

    #[test]
    fn test_three_stage_chain_end_to_end() {
        let data: Vec<u8> = (0..5000u32).map(|i| (i % 251) as u8).collect();
        let mut pipeline = Pipeline::new(PipelineConfig::default());
        pipeline.register(source(data.clone()), "src").unwrap();
        pipeline.register(relay(), "mid").unwrap();
        let (snk, collected) = sink();
        pipeline.register(snk, "snk").unwrap();

        pipeline.link(&["src", "mid", "snk"]).unwrap();
        pipeline.run().unwrap();
        pipeline.wait_for_stop(WAIT).unwrap();

        assert_eq!(collected.lock().unwrap().as_slice(), data.as_slice());
        pipeline.terminate().unwrap();
    }

    #[test]
    fn test_stop_waits_for_all_elements() {
        // Endless source: only stop() ends this pipeline.
        struct Endless;
        impl Processor for Endless {
            fn process(&mut self, ctx: &mut ElementContext) -> Result<ProcessOutcome> {
                match ctx.write(&[0u8; 64])? {
                    IoOutcome::Data(n) => Ok(ProcessOutcome::Processed(n)),
                    other => Ok(ProcessOutcome::from_io(other)),
                }
            }
        }

        let mut pipeline = Pipeline::new(PipelineConfig::default());
        pipeline
            .register(
                AudioElement::new(ElementConfig::new("unnamed"), Box::new(Endless)).unwrap(),
                "a",
            )
            .unwrap();
        pipeline.register(relay(), "b").unwrap();
        let (snk, _) = sink();
        pipeline.register(snk, "c").unwrap();
        pipeline.link(&["a", "b", "c"]).unwrap();

        let bus = pipeline.bus();
        pipeline.run().unwrap();
        std::thread::sleep(Duration::from_millis(50));

        pipeline.stop().unwrap();
        pipeline.wait_for_stop(WAIT).unwrap();

        // Every element reported Stopped (or Finished) through the bus.
        let mut reported: Vec<String> = Vec::new();
        while let Some(msg) = bus.try_listen() {
            if matches!(
                msg.payload,
                BusPayload::Status(ElementStatus::Stopped | ElementStatus::Finished)
            ) {
                reported.push(msg.source_tag.to_string());
            }
        }
        for name in ["a", "b", "c"] {
            assert!(reported.iter().any(|tag| tag == name), "{name} not reported");
        }
        pipeline.terminate().unwrap();
    }

    #[test]
    fn test_pause_resume_pipeline() {
        let data: Vec<u8> = vec![7u8; 20_000];
        let mut pipeline = Pipeline::new(PipelineConfig::default());
        pipeline.register(source(data.clone()), "src").unwrap();
        let (snk, collected) = sink();
        pipeline.register(snk, "snk").unwrap();
        pipeline.link(&["src", "snk"]).unwrap();

        pipeline.run().unwrap();
        pipeline.pause().unwrap();
        let frozen = collected.lock().unwrap().len();
        std::thread::sleep(Duration::from_millis(60));
        assert_eq!(collected.lock().unwrap().len(), frozen);

        pipeline.resume().unwrap();
        pipeline.wait_for_stop(WAIT).unwrap();
        assert_eq!(collected.lock().unwrap().len(), data.len());
        pipeline.terminate().unwrap();
    }

    #[test]
    fn test_unregister_while_linked_rejected() {
        let mut pipeline = Pipeline::new(PipelineConfig::default());
        pipeline.register(source(vec![1]), "src").unwrap();
        let (snk, _) = sink();
        pipeline.register(snk, "snk").unwrap();
        pipeline.link(&["src", "snk"]).unwrap();

        assert!(matches!(
            pipeline.unregister("src"),
            Err(Error::AlreadyLinked)
        ));
        pipeline.unlink().unwrap();
        assert!(pipeline.unregister("src").is_ok());
        assert_eq!(pipeline.len(), 1);
    }

    #[test]
    fn test_frame_output_spec_creates_frame_port() {
        let element = AudioElement::new(
            ElementConfig::new("unnamed")
                .with_chunk_size(64)
                .with_frame_output(128, 4),
            Box::new(BytesSource {
                data: vec![1; 300],
                pos: 0,
            }),
        )
        .unwrap();

        let mut pipeline = Pipeline::new(PipelineConfig::default());
        pipeline.register(element, "framer").unwrap();
        let (snk, collected) = sink();
        pipeline.register(snk, "snk").unwrap();
        pipeline.link(&["framer", "snk"]).unwrap();

        let port = pipeline.element_by_tag("framer").unwrap().output_port().unwrap();
        assert_eq!(port.kind(), crate::port::PortKind::Frame);
        assert_eq!(port.tag(), "framer_out_fb");

        pipeline.run().unwrap();
        pipeline.wait_for_stop(WAIT).unwrap();
        assert_eq!(collected.lock().unwrap().len(), 300);
        pipeline.terminate().unwrap();
    }

    #[test]
    fn test_element_by_tag_case_insensitive() {
        let mut pipeline = Pipeline::new(PipelineConfig::default());
        pipeline.register(source(vec![]), "Mic").unwrap();
        assert!(pipeline.element_by_tag("mic").is_some());
        assert!(pipeline.element_by_tag("spk").is_none());
    }
}
