//! End-to-end integration tests for the Sluice delivery engine.
//!
//! Each test configures a pipeline, filters a document and checks the visit
//! sequence, the serialized output, or the error reported.

use std::cell::RefCell;
use std::io::Write;
use std::rc::Rc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use serde_json::json;
use sluice_delivery::params::{DEFAULT_SERIALIZATION, TERMINATE_ON_VISITOR_EXCEPTION};
use sluice_delivery::{
    Action, ApplicationContext, Capabilities, ContentHandler, ContextObjectSerializer,
    EventPointer, ExecutionContext, ExecutionEvent, ExecutionEventListener,
    FileOutputStreamFactory, FilterProvider, FilterSettings, GhostElementSerializer,
    InnerFailurePolicy, Memento, MemoryOutputStreamResource, NestedPipelineVisitor,
    OutputResourceVisitor, Pipeline, ProfileSet, ResourceConfig, ResourceConfigExpander,
    ResourceWriter, SimpleSerializerVisitor, StreamFilterProvider, TracingEventListener,
    TreeFilterProvider, Visitor, VisitorAppender, VisitorId,
};
use sluice_types::{Result, SluiceError, TypedKey, VisitSequence};
use sluice_xml::NodeRef;

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

type Log = Arc<Mutex<Vec<String>>>;

fn app() -> Arc<ApplicationContext> {
    ApplicationContext::builder()
        .without_env()
        .build()
        .expect("application context should build")
}

fn pipeline() -> Pipeline {
    Pipeline::with_application_context(app())
}

fn entries(log: &Log) -> Vec<String> {
    log.lock().unwrap().clone()
}

/// Element name, text content, or path for the document node.
fn label(node: NodeRef<'_>) -> String {
    match node.local_name() {
        Some(name) => name.to_string(),
        None => node.text().map(str::to_string).unwrap_or_else(|| node.path()),
    }
}

/// Records every visit it receives as `name:event:node`.
struct Recorder {
    name: &'static str,
    capabilities: Capabilities,
    log: Log,
}

impl Recorder {
    fn new(name: &'static str, log: &Log) -> Self {
        Self::with_capabilities(
            name,
            log,
            Capabilities::ELEMENT
                | Capabilities::CHILD_TEXT
                | Capabilities::CHILD_ELEMENT
                | Capabilities::POST_FRAGMENT,
        )
    }

    fn with_capabilities(name: &'static str, log: &Log, capabilities: Capabilities) -> Self {
        Self {
            name,
            capabilities,
            log: log.clone(),
        }
    }

    fn record(&self, event: &str, node: NodeRef<'_>) {
        self.log
            .lock()
            .unwrap()
            .push(format!("{}:{}:{}", self.name, event, label(node)));
    }
}

impl Visitor for Recorder {
    fn capabilities(&self) -> Capabilities {
        self.capabilities
    }

    fn visit_before(&self, element: NodeRef<'_>, _ctx: &mut ExecutionContext) -> Result<()> {
        self.record("before", element);
        Ok(())
    }

    fn visit_after(&self, element: NodeRef<'_>, _ctx: &mut ExecutionContext) -> Result<()> {
        self.record("after", element);
        Ok(())
    }

    fn visit_child_text(&self, text: NodeRef<'_>, _ctx: &mut ExecutionContext) -> Result<()> {
        self.record("text", text);
        Ok(())
    }

    fn visit_child_element(
        &self,
        _element: NodeRef<'_>,
        child: NodeRef<'_>,
        _ctx: &mut ExecutionContext,
    ) -> Result<()> {
        self.record("child", child);
        Ok(())
    }

    fn on_post_fragment(&self, fragment: NodeRef<'_>, _ctx: &mut ExecutionContext) -> Result<()> {
        self.record("post", fragment);
        Ok(())
    }
}

#[derive(Clone, Copy)]
enum When {
    Before,
    Text,
    After,
}

/// Writes fixed text to the current output at one point of the visit.
struct Emit {
    text: &'static str,
    when: When,
}

fn emit(text: &'static str, when: When) -> Emit {
    Emit { text, when }
}

impl Visitor for Emit {
    fn capabilities(&self) -> Capabilities {
        match self.when {
            When::Before => Capabilities::BEFORE,
            When::Text => Capabilities::CHILD_TEXT,
            When::After => Capabilities::AFTER,
        }
    }

    fn visit_before(&self, _element: NodeRef<'_>, ctx: &mut ExecutionContext) -> Result<()> {
        ctx.write_out(self.text)
    }

    fn visit_after(&self, _element: NodeRef<'_>, ctx: &mut ExecutionContext) -> Result<()> {
        ctx.write_out(self.text)
    }

    fn visit_child_text(&self, _text: NodeRef<'_>, ctx: &mut ExecutionContext) -> Result<()> {
        ctx.write_out(self.text)
    }
}

/// Fails every visit it receives.
struct Fail(Capabilities);

impl Visitor for Fail {
    fn capabilities(&self) -> Capabilities {
        self.0
    }

    fn visit_before(&self, _element: NodeRef<'_>, _ctx: &mut ExecutionContext) -> Result<()> {
        Err(SluiceError::handler("Fail", "boom"))
    }

    fn visit_child_text(&self, _text: NodeRef<'_>, _ctx: &mut ExecutionContext) -> Result<()> {
        Err(SluiceError::handler("Fail", "boom"))
    }
}

/// Ends the pass when visited.
struct Stop;

impl Visitor for Stop {
    fn capabilities(&self) -> Capabilities {
        Capabilities::BEFORE
    }

    fn visit_before(&self, _element: NodeRef<'_>, _ctx: &mut ExecutionContext) -> Result<()> {
        Err(SluiceError::Terminate)
    }
}

/// Build a nested visitor over a fresh inner pipeline.
fn nested(action: Option<Action>, configure: impl FnOnce(&mut Pipeline)) -> NestedPipelineVisitor {
    let mut inner = pipeline();
    configure(&mut inner);
    NestedPipelineVisitor::new(inner, action).expect("nested visitor should build")
}

/// Filter `xml` with `visitor` bound to `a`.
fn run_nested(visitor: NestedPipelineVisitor, xml: &str) -> String {
    let mut outer = pipeline();
    outer.add_visitor(visitor, "a").unwrap();
    outer.filter_str(xml).expect("outer pass should succeed")
}

// ---------------------------------------------------------------------------
// Test 1: Visit sequence of one fragment
// ---------------------------------------------------------------------------

#[test]
fn visit_sequence_interleaves_children_between_before_and_after() {
    let log = Log::default();
    let mut p = pipeline();
    p.add_visitor(Recorder::new("x", &log), "b").unwrap();
    p.add_visitor(Recorder::new("y", &log), "b").unwrap();

    let out = p.filter_str("<a><b>t1<c/>t2</b></a>").unwrap();
    assert_eq!(out, "<a><b>t1<c></c>t2</b></a>", "Recorders do not change output");

    assert_eq!(
        entries(&log),
        vec![
            "x:before:b",
            "y:before:b",
            "x:text:t1",
            "y:text:t1",
            "x:child:c",
            "y:child:c",
            "x:text:t2",
            "y:text:t2",
            "x:after:b",
            "y:after:b",
            "x:post:b",
            "y:post:b",
        ],
        "Visitors of one fragment run in registration order for every event"
    );
}

// ---------------------------------------------------------------------------
// Test 2: Selector ordering across groups
// ---------------------------------------------------------------------------

#[test]
fn more_specific_selectors_run_first() {
    let log = Log::default();
    let before = Capabilities::BEFORE;
    let mut p = pipeline();
    p.add_visitor(Recorder::with_capabilities("any", &log, before), "*").unwrap();
    p.add_visitor(Recorder::with_capabilities("plain", &log, before), "c").unwrap();
    p.add_visitor(Recorder::with_capabilities("deep", &log, before), "a/b/c").unwrap();

    p.filter_str("<a><b><c/></b></a>").unwrap();
    let on_c: Vec<_> = entries(&log)
        .into_iter()
        .filter(|e| e.ends_with(":c"))
        .collect();
    assert_eq!(on_c, vec!["deep:before:c", "plain:before:c", "any:before:c"]);
}

// ---------------------------------------------------------------------------
// Test 3: Mementos carry state from BEFORE to AFTER
// ---------------------------------------------------------------------------

struct ChildCounter;

impl ChildCounter {
    fn memento(&self, element: NodeRef<'_>) -> Memento<usize> {
        Memento::new(element.key(), VisitorId::of(self), "children", 0)
    }
}

impl Visitor for ChildCounter {
    fn capabilities(&self) -> Capabilities {
        Capabilities::ELEMENT | Capabilities::CHILD_ELEMENT
    }

    fn visit_before(&self, element: NodeRef<'_>, ctx: &mut ExecutionContext) -> Result<()> {
        ctx.mementos_mut().capture(&self.memento(element));
        Ok(())
    }

    fn visit_child_element(
        &self,
        element: NodeRef<'_>,
        _child: NodeRef<'_>,
        ctx: &mut ExecutionContext,
    ) -> Result<()> {
        ctx.mementos_mut().stash(self.memento(element), |n| *n += 1)?;
        Ok(())
    }

    fn visit_after(&self, element: NodeRef<'_>, ctx: &mut ExecutionContext) -> Result<()> {
        let mut memento = self.memento(element);
        ctx.mementos().restore(&mut memento)?;
        ctx.write_out(&format!("[{}]", memento.state))
    }
}

#[test]
fn mementos_are_scoped_per_fragment_and_discarded() {
    let mut p = pipeline();
    p.add_visitor(ChildCounter, "a").unwrap();
    let mut ctx = p.create_execution_context().unwrap();

    let out = p
        .filter_str_with(&mut ctx, "<r><a><b/><b/></a><a><b/></a></r>")
        .unwrap();
    assert_eq!(out, "<r><a><b></b><b></b>[2]</a><a><b></b>[1]</a></r>");
    assert!(ctx.mementos().is_empty(), "Mementos are forgotten after each fragment");
}

struct RestoreOnly;

impl Visitor for RestoreOnly {
    fn capabilities(&self) -> Capabilities {
        Capabilities::AFTER
    }

    fn visit_after(&self, element: NodeRef<'_>, ctx: &mut ExecutionContext) -> Result<()> {
        let mut memento = Memento::new(element.key(), VisitorId::of(self), "never", 0u8);
        ctx.mementos().restore(&mut memento)
    }
}

#[test]
fn restoring_an_uncaptured_memento_fails() {
    let mut p = pipeline();
    p.add_visitor(RestoreOnly, "a").unwrap();
    let err = p.filter_str("<a/>").unwrap_err();
    assert!(
        matches!(err, SluiceError::MementoNotFound { ref key, .. } if key == "never"),
        "Structured errors are not wrapped: {err:?}"
    );
}

// ---------------------------------------------------------------------------
// Test 4: Filter provider resolution
// ---------------------------------------------------------------------------

#[test]
fn requested_tree_filter_with_text_visitor_lists_compatible_filters() {
    let mut p = pipeline();
    p.set_filter_settings(FilterSettings::tree()).unwrap();
    p.add_visitor(emit("!", When::Text), "a").unwrap();

    let err = p.filter_str("<a>x</a>").unwrap_err();
    match &err {
        SluiceError::NoCompatibleFilter { requested, compatible } => {
            assert_eq!(requested, "tree");
            assert_eq!(compatible, &vec!["stream".to_string()]);
        }
        other => panic!("Expected NoCompatibleFilter, got {other:?}"),
    }
    assert!(err.is_configuration());
}

#[test]
fn any_filter_takes_the_first_compatible_provider() {
    let providers: Vec<Arc<dyn FilterProvider>> =
        vec![Arc::new(TreeFilterProvider), Arc::new(StreamFilterProvider)];
    let app = ApplicationContext::builder()
        .without_env()
        .with_filter_providers(providers.clone())
        .build()
        .unwrap();
    let mut p = Pipeline::with_application_context(app);
    p.add_visitor(emit("!", When::Before), "b").unwrap();
    let config = p.content_delivery_config("default").unwrap();
    assert_eq!(config.filter_provider().name(), "tree");

    let app = ApplicationContext::builder()
        .without_env()
        .with_filter_providers(providers)
        .build()
        .unwrap();
    let mut p = Pipeline::with_application_context(app);
    p.add_visitor(emit("!", When::Text), "b").unwrap();
    let config = p.content_delivery_config("default").unwrap();
    assert_eq!(config.filter_provider().name(), "stream");
}

#[test]
fn no_compatible_provider_is_a_configuration_error() {
    let app = ApplicationContext::builder()
        .without_env()
        .with_filter_providers(vec![Arc::new(TreeFilterProvider)])
        .build()
        .unwrap();
    let mut p = Pipeline::with_application_context(app);
    p.add_visitor(emit("!", When::Text), "b").unwrap();

    let err = p.create_execution_context().unwrap_err();
    assert!(
        matches!(&err, SluiceError::NoCompatibleFilter { requested, compatible }
            if requested == "any" && compatible.is_empty()),
        "got {err:?}"
    );
}

// ---------------------------------------------------------------------------
// Test 5: Stream and tree filters order output differently
// ---------------------------------------------------------------------------

#[test]
fn tree_filter_visits_everything_before_serializing() {
    let mut stream = pipeline();
    stream.add_visitor(emit("!", When::Before), "b").unwrap();
    assert_eq!(stream.filter_str("<a><b/></a>").unwrap(), "<a>!<b></b></a>");

    let mut tree = pipeline();
    tree.set_filter_settings(FilterSettings::tree()).unwrap();
    tree.add_visitor(emit("!", When::Before), "b").unwrap();
    assert_eq!(tree.filter_str("<a><b/></a>").unwrap(), "!<a><b></b></a>");
}

#[test]
fn tree_filter_runs_post_fragment_once_per_fragment() {
    let log = Log::default();
    let mut p = pipeline();
    p.set_filter_settings(FilterSettings::tree()).unwrap();
    p.add_visitor(
        Recorder::with_capabilities("r", &log, Capabilities::ELEMENT | Capabilities::POST_FRAGMENT),
        "b",
    )
    .unwrap();

    p.filter_str("<a><b><b/></b></a>").unwrap();
    assert_eq!(
        entries(&log),
        vec!["r:before:b", "r:before:b", "r:after:b", "r:post:b", "r:after:b", "r:post:b"]
    );
}

// ---------------------------------------------------------------------------
// Test 6: Visitor failures and terminate.on.visitor.exception
// ---------------------------------------------------------------------------

#[test]
fn failing_visitor_terminates_with_context() {
    let mut p = pipeline();
    p.add_visitor(Fail(Capabilities::BEFORE), "b").unwrap();
    let mut ctx = p.create_execution_context().unwrap();

    let err = p.filter_str_with(&mut ctx, "<a><b/></a>").unwrap_err();
    match &err {
        SluiceError::Visit {
            event,
            path,
            selector,
            handler,
            ..
        } => {
            assert_eq!(event, "start");
            assert_eq!(path, "/a/b");
            assert_eq!(selector, "b");
            assert!(handler.contains("Fail"), "handler was {handler}");
        }
        other => panic!("Expected a Visit error, got {other:?}"),
    }
    assert!(matches!(err.root_cause(), SluiceError::Handler { message, .. } if message == "boom"));
    assert!(
        matches!(ctx.termination_error(), Some(SluiceError::Handler { .. })),
        "The original failure is recorded on the context"
    );
}

#[test]
fn failing_text_visitor_reports_the_text_event() {
    let mut p = pipeline();
    p.add_visitor(Fail(Capabilities::CHILD_TEXT), "b").unwrap();
    let err = p.filter_str("<a><b>x</b></a>").unwrap_err();
    assert!(
        matches!(&err, SluiceError::Visit { event, .. } if event == "text"),
        "got {err:?}"
    );
}

#[test]
fn visitor_failures_are_recorded_when_not_terminating() {
    let app = ApplicationContext::builder()
        .without_env()
        .with_system_property(TERMINATE_ON_VISITOR_EXCEPTION, "false")
        .build()
        .unwrap();
    let mut p = Pipeline::with_application_context(app);
    p.add_visitor(Fail(Capabilities::BEFORE), "b").unwrap();
    let mut ctx = p.create_execution_context().unwrap();

    let out = p.filter_str_with(&mut ctx, "<a><b/><c/></a>").unwrap();
    assert_eq!(out, "<a><b></b><c></c></a>", "The pass continues past the failure");
    assert!(matches!(ctx.termination_error(), Some(SluiceError::Handler { .. })));
}

#[test]
fn terminate_signal_ends_the_pass_quietly() {
    let mut p = pipeline();
    p.add_visitor(Stop, "b").unwrap();
    let mut ctx = p.create_execution_context().unwrap();

    let out = p.filter_str_with(&mut ctx, "<a><x/><b/><c/></a>").unwrap();
    assert_eq!(out, "<a><x></x>", "Output stops where the pass was terminated");
    assert!(ctx.termination_error().is_none());
}

// ---------------------------------------------------------------------------
// Test 7: Global parameter precedence
// ---------------------------------------------------------------------------

#[test]
fn explicit_settings_override_system_properties() {
    let with_property = || {
        ApplicationContext::builder()
            .without_env()
            .with_system_property(DEFAULT_SERIALIZATION, "false")
            .build()
            .unwrap()
    };

    let p = Pipeline::with_application_context(with_property());
    assert_eq!(p.filter_str("<a/>").unwrap(), "");

    let mut p = Pipeline::with_application_context(with_property());
    p.set_filter_settings(FilterSettings::default()).unwrap();
    assert_eq!(p.filter_str("<a/>").unwrap(), "<a></a>");
}

// ---------------------------------------------------------------------------
// Test 8: Profiles
// ---------------------------------------------------------------------------

#[test]
fn profile_targeted_configs_apply_to_matching_profiles_only() {
    let app = ApplicationContext::builder()
        .without_env()
        .with_profile_set(ProfileSet::new("acme").with_profile("xml"))
        .build()
        .unwrap();
    let mut p = Pipeline::with_application_context(app);
    p.add_resource_config(
        ResourceConfig::with_instance("b", ContentHandler::visitor(emit("!", When::Before)))
            .unwrap()
            .with_target_profile("xml"),
    )
    .unwrap();

    let mut acme = p.create_execution_context_for_profile("acme").unwrap();
    assert_eq!(p.filter_str_with(&mut acme, "<a><b/></a>").unwrap(), "<a>!<b></b></a>");
    assert_eq!(p.filter_str("<a><b/></a>").unwrap(), "<a><b></b></a>");
}

// ---------------------------------------------------------------------------
// Test 9: Conditions
// ---------------------------------------------------------------------------

#[test]
fn conditions_gate_dispatch_per_element() {
    let log = Log::default();
    let mut p = pipeline();
    p.add_resource_config(
        ResourceConfig::with_instance(
            "b",
            ContentHandler::visitor(Recorder::with_capabilities("r", &log, Capabilities::BEFORE)),
        )
        .unwrap()
        .with_condition("attr.type=x")
        .unwrap(),
    )
    .unwrap();

    p.filter_str(r#"<a><b type="x"/><b type="y"/><b/></a>"#).unwrap();
    assert_eq!(entries(&log), vec!["r:before:b"]);
}

// ---------------------------------------------------------------------------
// Test 10: Class resources and built-in serializers
// ---------------------------------------------------------------------------

#[test]
fn unknown_class_fails_the_build() {
    let mut p = pipeline();
    p.add_resource_config(ResourceConfig::class("a", "NoSuchVisitor").unwrap())
        .unwrap();
    let err = p.filter_str("<a/>").unwrap_err();
    assert!(
        matches!(&err, SluiceError::UnknownClass { class } if class == "NoSuchVisitor"),
        "got {err:?}"
    );
}

#[test]
fn unknown_resource_types_are_ignored() {
    let mut p = pipeline();
    p.add_resource_config(
        ResourceConfig::new("a")
            .unwrap()
            .with_resource("template.xsl")
            .with_resource_type("xsl"),
    )
    .unwrap();
    assert_eq!(p.filter_str("<a/>").unwrap(), "<a></a>");
}

#[test]
fn ghost_serializer_drops_only_the_element_tags() {
    let mut p = pipeline();
    p.add_resource_config(ResourceConfig::class("b", GhostElementSerializer::CLASS).unwrap())
        .unwrap();
    assert_eq!(p.filter_str("<a><b>x<c/></b></a>").unwrap(), "<a>x<c></c></a>");
}

#[test]
fn context_object_serializer_writes_the_named_bean() {
    let mut p = pipeline();
    p.add_resource_config(ResourceConfig::class("ctx", ContextObjectSerializer::CLASS).unwrap())
        .unwrap();
    let mut ctx = p.create_execution_context().unwrap();
    let greeting = p.application_context().bean_id_store().register("greeting");
    ctx.bean_context()
        .borrow_mut()
        .add_bean(greeting, json!("hi"), None);

    let out = p
        .filter_str_with(&mut ctx, r#"<a><ctx key="greeting"/><ctx key="missing"/></a>"#)
        .unwrap();
    assert_eq!(out, "<a>hi</a>");
}

// ---------------------------------------------------------------------------
// Test 11: Expanders and appenders
// ---------------------------------------------------------------------------

struct BangExpander;

impl ResourceConfigExpander for BangExpander {
    fn expand(&self, config: &ResourceConfig) -> Result<Vec<ResourceConfig>> {
        let child = format!("{}/b", config.selector_str());
        Ok(vec![ResourceConfig::with_instance(
            &child,
            ContentHandler::visitor(emit("!", When::Before)),
        )?])
    }
}

#[test]
fn expanded_configs_are_registered_and_bound() {
    let mut p = pipeline();
    p.add_resource_config(
        ResourceConfig::with_instance("a", ContentHandler::Expander(Arc::new(BangExpander)))
            .unwrap(),
    )
    .unwrap();

    assert_eq!(p.filter_str("<a><b/></a>").unwrap(), "<a>!<b></b></a>");
    let expanded = p.application_context().registry().expanded_resource_configs();
    assert_eq!(expanded.len(), 1);
    assert_eq!(expanded[0].selector_str(), "a/b");
}

struct Pair;

impl VisitorAppender for Pair {
    fn visitors(
        &self,
        _config: &ResourceConfig,
    ) -> Result<Vec<(Arc<dyn Visitor>, ResourceConfig)>> {
        let open: Arc<dyn Visitor> = Arc::new(emit("(", When::Before));
        let close: Arc<dyn Visitor> = Arc::new(emit(")", When::After));
        Ok(vec![
            (open.clone(), ResourceConfig::with_instance("b", ContentHandler::Visitor(open))?),
            (close.clone(), ResourceConfig::with_instance("b", ContentHandler::Visitor(close))?),
        ])
    }
}

#[test]
fn appenders_contribute_ready_bindings() {
    let mut p = pipeline();
    p.add_resource_config(
        ResourceConfig::with_instance("#document", ContentHandler::Appender(Arc::new(Pair)))
            .unwrap(),
    )
    .unwrap();
    assert_eq!(p.filter_str("<a><b>x</b></a>").unwrap(), "<a>(<b>x)</b></a>");
}

// ---------------------------------------------------------------------------
// Test 12: Output resources
// ---------------------------------------------------------------------------

/// Copies every element to the `res` resource.
struct ToResource;

impl Visitor for ToResource {
    fn capabilities(&self) -> Capabilities {
        Capabilities::BEFORE
    }

    fn visit_before(&self, element: NodeRef<'_>, ctx: &mut ExecutionContext) -> Result<()> {
        let writer = ResourceWriter::open_required(ctx, "res")?;
        writer.borrow_mut().write_all(label(element).as_bytes())?;
        Ok(())
    }
}

#[test]
fn unbound_output_resource_is_a_structured_error() {
    let mut p = pipeline();
    p.add_visitor(ToResource, "a").unwrap();
    let err = p.filter_str("<a/>").unwrap_err();
    assert!(
        matches!(&err, SluiceError::OutputResourceNotBound { resource } if resource == "res"),
        "got {err:?}"
    );
}

#[test]
fn memory_resource_collects_output_while_bound() {
    let memory = MemoryOutputStreamResource::new("res");
    let mut p = pipeline();
    p.add_visitor(OutputResourceVisitor::new(memory.clone()), "#document")
        .unwrap();
    p.add_visitor(ToResource, "b").unwrap();

    p.filter_str("<a><b/><b/></a>").unwrap();
    assert_eq!(memory.contents(), "bb");
}

// ---------------------------------------------------------------------------
// Test 13: Nested pipelines and output placement
// ---------------------------------------------------------------------------

#[test]
fn prepend_before_places_inner_output_ahead_of_the_fragment() {
    let v = nested(Some(Action::PrependBefore), |p| {
        p.add_visitor(emit("bar", When::Before), "a").unwrap();
    });
    assert_eq!(run_nested(v, "<a>foo</a>"), "bar<a>foo</a>");

    let v = nested(Some(Action::PrependBefore), |p| {
        p.add_visitor(emit("bar", When::Text), "a").unwrap();
    });
    assert_eq!(run_nested(v, "<a>foo</a>"), "bar<a>foo</a>", "Child text output is prepended too");
}

#[test]
fn prepend_after_places_inner_output_inside_the_start_tag() {
    let v = nested(Some(Action::PrependAfter), |p| {
        p.add_visitor(emit("bar", When::Before), "a").unwrap();
    });
    assert_eq!(run_nested(v, "<a>foo</a>"), "<a>barfoo</a>");

    let v = nested(Some(Action::PrependAfter), |p| {
        p.add_visitor(emit("bar", When::Text), "a").unwrap();
    });
    assert_eq!(
        run_nested(v, "<a>foo</a>"),
        "<a>barfoo</a>",
        "Child text output lands after the start tag too"
    );
}

#[test]
fn append_actions_place_inner_output_around_the_end_tag() {
    let v = nested(Some(Action::AppendAfter), |p| {
        p.add_visitor(emit("bar", When::After), "a").unwrap();
    });
    assert_eq!(run_nested(v, "<a>foo</a>"), "<a>foo</a>bar");

    let v = nested(Some(Action::AppendBefore), |p| {
        p.add_visitor(emit("bar", When::After), "a").unwrap();
    });
    assert_eq!(run_nested(v, "<a>foo</a>"), "<a>foobar</a>");

    let v = nested(Some(Action::AppendBefore), |p| {
        p.add_visitor(emit("bar", When::Before), "a").unwrap();
    });
    assert_eq!(run_nested(v, "<r><a>foo</a></r>"), "<r><a>barfoo</a></r>");
}

#[test]
fn replace_swaps_the_fragment_for_inner_output() {
    let v = nested(Some(Action::Replace), |p| {
        p.add_visitor(emit("bar", When::Before), "a").unwrap();
    });
    assert_eq!(run_nested(v, "<x><a>foo</a><b/></x>"), "<x>bar<b></b></x>");
}

#[test]
fn nested_pass_sees_a_depth_limited_copy() {
    let shallow = nested(Some(Action::Replace), |p| {
        p.add_resource_config(ResourceConfig::class("*", SimpleSerializerVisitor::CLASS).unwrap())
            .unwrap();
    });
    assert_eq!(
        run_nested(shallow, "<a><b><c>x</c></b></a>"),
        "<a><b></b></a>",
        "Default depth copies direct children only"
    );

    let deep = nested(Some(Action::Replace), |p| {
        p.add_resource_config(ResourceConfig::class("*", SimpleSerializerVisitor::CLASS).unwrap())
            .unwrap();
    })
    .max_node_depth(0);
    assert_eq!(run_nested(deep, "<a><b><c>x</c></b></a>"), "<a><b><c>x</c></b></a>");
}

#[test]
fn bind_to_stores_inner_output_as_a_bean() {
    let v = nested(Some(Action::BindTo), |p| {
        p.add_visitor(emit("bar", When::Before), "a").unwrap();
    })
    .bind_to("fragment");
    let mut outer = pipeline();
    outer.add_visitor(v, "a").unwrap();
    let mut ctx = outer.create_execution_context().unwrap();

    let out = outer.filter_str_with(&mut ctx, "<a>foo</a>").unwrap();
    assert_eq!(out, "<a>foo</a>", "Binding leaves the outer output alone");
    assert_eq!(
        ctx.bean_context().borrow().get_by_name("fragment"),
        Some(&json!("bar"))
    );
}

#[test]
fn output_to_writes_the_inner_pass_to_a_memory_resource() {
    let memory = MemoryOutputStreamResource::new("mem");
    let v = nested(Some(Action::OutputTo), |p| {
        p.add_resource_config(ResourceConfig::class("*", SimpleSerializerVisitor::CLASS).unwrap())
            .unwrap();
    })
    .output_to("mem");

    let mut outer = pipeline();
    outer
        .add_visitor(OutputResourceVisitor::new(memory.clone()), "#document")
        .unwrap();
    outer.add_visitor(v, "a").unwrap();

    let out = outer.filter_str("<r><a>foo</a></r>").unwrap();
    assert_eq!(out, "<r><a>foo</a></r>");
    assert_eq!(memory.contents(), "<a>foo</a>");
}

#[test]
fn output_to_writes_the_inner_pass_to_a_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("fragment.xml");

    let v = nested(Some(Action::OutputTo), |p| {
        p.add_resource_config(ResourceConfig::class("*", SimpleSerializerVisitor::CLASS).unwrap())
            .unwrap();
    })
    .output_to("file");

    let mut outer = pipeline();
    outer
        .add_resource_config(
            ResourceConfig::new("#document")
                .unwrap()
                .with_resource("file")
                .with_resource_type(FileOutputStreamFactory::RESOURCE_TYPE)
                .with_param("file", path.to_string_lossy().to_string()),
        )
        .unwrap();
    outer.add_visitor(v, "a").unwrap();

    outer.filter_str("<r><a>foo</a><a>bar</a></r>").unwrap();
    let written = std::fs::read_to_string(&path).unwrap();
    assert_eq!(written, "<a>foo</a><a>bar</a>");
}

#[test]
fn output_to_an_unbound_resource_discards_inner_output() {
    let v = nested(Some(Action::OutputTo), |p| {
        p.add_visitor(emit("bar", When::Before), "a").unwrap();
    })
    .output_to("nowhere");
    assert_eq!(run_nested(v, "<a>foo</a>"), "<a>foo</a>");
}

#[test]
fn nested_visitors_get_post_fragment_exactly_once() {
    let log = Log::default();
    let inner_log = log.clone();
    let v = nested(Some(Action::Replace), move |p| {
        p.add_visitor(
            Recorder::with_capabilities(
                "inner",
                &inner_log,
                Capabilities::ELEMENT | Capabilities::POST_FRAGMENT,
            ),
            "a",
        )
        .unwrap();
    });
    run_nested(v, "<r><a>x</a></r>");
    assert_eq!(entries(&log), vec!["inner:before:a", "inner:after:a", "inner:post:a"]);
}

#[test]
fn inner_failures_propagate_by_default() {
    let v = nested(Some(Action::Replace), |p| {
        p.add_visitor(Fail(Capabilities::BEFORE), "a").unwrap();
    });
    let mut outer = pipeline();
    outer.add_visitor(v, "a").unwrap();
    let err = outer.filter_str("<a/>").unwrap_err();
    assert!(matches!(err.root_cause(), SluiceError::Handler { .. }), "got {err:?}");
}

#[test]
fn inner_failures_report_the_real_fragment_path() {
    let v = nested(Some(Action::Replace), |p| {
        p.add_visitor(Fail(Capabilities::BEFORE), "a").unwrap();
    });
    let mut outer = pipeline();
    outer.add_visitor(v, "a").unwrap();
    let err = outer.filter_str("<a/>").unwrap_err();
    assert!(
        matches!(&err, SluiceError::Visit { event, path, .. } if event == "start" && path == "/a"),
        "Path should name the visited fragment, not its pointer: {err:?}"
    );
}

#[test]
fn propagated_inner_failures_do_not_abort_a_non_terminating_outer_pass() {
    let v = nested(Some(Action::Replace), |p| {
        p.add_visitor(Fail(Capabilities::BEFORE), "a").unwrap();
    })
    .failure_policy(InnerFailurePolicy::Propagate);
    let app = ApplicationContext::builder()
        .without_env()
        .with_system_property(TERMINATE_ON_VISITOR_EXCEPTION, "false")
        .build()
        .unwrap();
    let mut outer = Pipeline::with_application_context(app);
    outer.add_visitor(v, "a").unwrap();
    let mut ctx = outer.create_execution_context().unwrap();

    let out = outer
        .filter_str_with(&mut ctx, "<r><a/><b/></r>")
        .expect("the outer pass should complete");
    assert_eq!(out, "<r><b></b></r>");
    assert_eq!(ctx.listener_count(), 0, "The child listener is removed after the fragment");

    let recorded = ctx.termination_error().expect("failure should be recorded");
    assert!(
        matches!(recorded, SluiceError::Visit { path, .. } if path == "/a"),
        "got {recorded:?}"
    );
    assert!(matches!(recorded.root_cause(), SluiceError::Handler { .. }));
}

#[test]
fn recorded_inner_failures_leave_the_outer_pass_running() {
    let v = nested(Some(Action::Replace), |p| {
        p.add_visitor(Fail(Capabilities::BEFORE), "a").unwrap();
    })
    .failure_policy(InnerFailurePolicy::Record);
    let mut outer = pipeline();
    outer.add_visitor(v, "a").unwrap();
    let mut ctx = outer.create_execution_context().unwrap();

    let out = outer.filter_str_with(&mut ctx, "<r><a/><b/></r>").unwrap();
    assert_eq!(out, "<r><b></b></r>");
    let recorded = ctx.termination_error().expect("failure should be recorded");
    assert!(matches!(recorded.root_cause(), SluiceError::Handler { .. }));
}

/// Claims the `res` resource without writing anything.
struct Consumer;

impl Visitor for Consumer {
    fn capabilities(&self) -> Capabilities {
        Capabilities::BEFORE
    }

    fn consumes(&self, resource: &str) -> bool {
        resource == "res"
    }
}

#[test]
fn descendants_consuming_the_output_resource_are_not_serialized() {
    let v = nested(Some(Action::OutputTo), |_| {}).output_to("res");
    let mut outer = pipeline();
    outer.add_visitor(v, "a").unwrap();
    outer.add_visitor(Consumer, "b").unwrap();

    let out = outer.filter_str("<r><a><b>x</b><c/></a><b>y</b></r>").unwrap();
    assert_eq!(
        out, "<r><a><c></c></a><b>y</b></r>",
        "Only consumers inside the nested fragment are suppressed"
    );
}

// ---------------------------------------------------------------------------
// Test 14: Event pointers
// ---------------------------------------------------------------------------

#[test]
fn dangling_event_pointer_fails_to_dereference() {
    let p = pipeline();
    let mut ctx = p.create_execution_context().unwrap();
    let pointer = EventPointer::new(TypedKey::new("missing"), VisitSequence::Before).to_document();

    let err = p.filter_source(&mut ctx, pointer.root(), None).unwrap_err();
    assert!(
        matches!(&err, SluiceError::PointerDereference { reference } if reference == "missing"),
        "got {err:?}"
    );
}

// ---------------------------------------------------------------------------
// Test 15: Execution events
// ---------------------------------------------------------------------------

struct EventLog(Rc<RefCell<Vec<String>>>);

impl ExecutionEventListener for EventLog {
    fn on_event(&self, event: &ExecutionEvent<'_>, _ctx: &mut ExecutionContext) {
        let entry = match event {
            ExecutionEvent::FilterStarted { .. } => "started".to_string(),
            ExecutionEvent::Visit(visit) => format!(
                "{}:{}:{}",
                visit.phase,
                visit.fragment.path(),
                if visit.error.is_some() { "err" } else { "ok" }
            ),
            ExecutionEvent::FilterCompleted { error, .. } => {
                format!("completed:{}", if error.is_some() { "err" } else { "ok" })
            }
        };
        self.0.borrow_mut().push(entry);
    }
}

#[test]
fn listeners_see_every_guarded_visit() {
    let mut p = pipeline();
    p.add_visitor(emit("!", When::Before), "b").unwrap();
    p.add_visitor(Fail(Capabilities::BEFORE), "c").unwrap();
    let mut ctx = p.create_execution_context().unwrap();
    let events = Rc::new(RefCell::new(Vec::new()));
    ctx.add_listener(EventLog(events.clone()));
    let tracing_id = ctx.add_listener(TracingEventListener);
    assert_eq!(ctx.listener_count(), 2);
    assert!(ctx.remove_listener(tracing_id));

    assert!(p.filter_str_with(&mut ctx, "<a><b/><c/></a>").is_err());
    assert_eq!(
        *events.borrow(),
        vec!["started", "start:/a/b:ok", "start:/a/c:err", "completed:err"]
    );
}

// ---------------------------------------------------------------------------
// Test 16: Lifecycle
// ---------------------------------------------------------------------------

struct Closing(Arc<AtomicUsize>);

impl Visitor for Closing {
    fn capabilities(&self) -> Capabilities {
        Capabilities::BEFORE
    }

    fn close(&self) {
        self.0.fetch_add(1, Ordering::SeqCst);
    }
}

#[test]
fn closing_a_pipeline_closes_its_visitors_once() {
    let closed = Arc::new(AtomicUsize::new(0));
    let inner_closed = closed.clone();
    let v = nested(None, move |p| {
        p.add_visitor(Closing(inner_closed), "a").unwrap();
    });
    let mut outer = pipeline();
    outer.add_visitor(Closing(closed.clone()), "a").unwrap();
    outer.add_visitor(v, "a").unwrap();

    outer.filter_str("<a/>").unwrap();
    outer.close();
    outer.close();
    assert_eq!(
        closed.load(Ordering::SeqCst),
        2,
        "The outer visitor and the inner pipeline's visitor close once each"
    );
}
