//! Pipelines declared in a service manifest, run unary and streamed.

mod common;

use std::sync::Arc;
use std::time::Duration;

use agent_runtime::{
    CallContext, Error, KernelBuilder, LocalPluginRegistry, OrchestratorOptions, SequentialOrchestrator,
    ServiceManifest, StreamEvent,
};
use common::{prompt_context, Scripted, ScriptedFactory};
use serde_json::{json, Map, Value};
use tokio::sync::mpsc;

const MANIFEST: &str = r#"
apiVersion: agents/v1
kind: Sequential
description: Research then summarize
service_name: research
version: v1
input_type: ResearchInput
spec:
  agents:
    - name: A
      role: researcher
      model: gpt-4o-mini
      system_prompt: You research.
      plugins: [math]
    - name: B
      role: writer
      model: gpt-4o-mini
      temperature: 0.2
      system_prompt: You write.
      plugins: [clock]
  tasks:
    - name: T1
      task_no: 1
      description: research
      instructions: Research {{ topic }}
      agent: A
    - name: T2
      task_no: 2
      description: summarize
      instructions: Summarize the research
      agent: B
"#;

fn orchestrator(manifest: &str, client: Arc<Scripted>) -> SequentialOrchestrator {
    let manifest = ServiceManifest::from_yaml_str(manifest).unwrap();
    manifest.validate().unwrap();
    SequentialOrchestrator::from_manifest(
        &manifest,
        KernelBuilder::new(LocalPluginRegistry::with_builtins()),
        Arc::new(ScriptedFactory(client)),
        OrchestratorOptions::default(),
    )
    .unwrap()
}

fn inputs(value: Value) -> Map<String, Value> {
    value.as_object().cloned().unwrap()
}

async fn collect(mut rx: mpsc::Receiver<StreamEvent>) -> Vec<StreamEvent> {
    let mut events = Vec::new();
    while let Some(event) = rx.recv().await {
        events.push(event);
    }
    events
}

#[tokio::test]
async fn manifest_pipeline_threads_results() {
    let client = Arc::new(Scripted::default());
    let orchestrator = orchestrator(MANIFEST, client.clone());
    assert_eq!(orchestrator.task_names(), vec!["T1", "T2"]);

    let response = orchestrator
        .invoke(&CallContext::new(), inputs(json!({"topic": "rust"})))
        .await
        .unwrap();

    assert_eq!(response.result["T1"], json!("result:T1"));
    assert_eq!(response.result["T2"], json!("result:T2"));
    assert_eq!(response.metadata["agent"], json!("research"));
    assert_eq!(response.token_usage.total_tokens, 4);

    let requests = client.requests.lock();
    assert_eq!(requests.len(), 2);
    assert!(requests[0].messages[1]
        .content
        .as_deref()
        .unwrap()
        .starts_with("Research rust"));
    assert_eq!(requests[1].temperature, Some(0.2));

    let second = prompt_context(&requests[1]);
    assert_eq!(second["T1"], json!("result:T1"));
    assert_eq!(second["topic"], json!("rust"));
}

#[tokio::test]
async fn stream_is_ordered_and_ends_with_done() {
    let orchestrator = Arc::new(orchestrator(MANIFEST, Arc::new(Scripted::default())));
    let events = collect(orchestrator.invoke_stream(CallContext::new(), Map::new())).await;

    let statuses: Vec<(&str, &str)> = events
        .iter()
        .map(|e| {
            (
                e.metadata["task"].as_str().unwrap(),
                e.metadata["status"].as_str().unwrap(),
            )
        })
        .collect();
    assert_eq!(
        statuses,
        vec![("T1", "started"), ("T1", "completed"), ("T2", "started"), ("T2", "completed")]
    );
    assert_eq!(events.iter().filter(|e| e.done).count(), 1);
    assert!(events.last().unwrap().done);
    assert_eq!(events[3].data, json!("result:T2"));
    assert_eq!(events[2].metadata["task_no"], json!(2));
}

#[tokio::test]
async fn failing_task_ends_stream_with_one_error_event() {
    let manifest = MANIFEST.replace("name: T2", "name: explode");
    let orchestrator = Arc::new(orchestrator(&manifest, Arc::new(Scripted::default())));
    let events = collect(orchestrator.invoke_stream(CallContext::new(), Map::new())).await;

    assert_eq!(events.len(), 4);
    let last = events.last().unwrap();
    assert!(last.is_error());
    assert!(last.done);
    assert_eq!(last.metadata["task"], json!("explode"));
    assert_eq!(last.metadata["kind"], json!("invocation"));
    assert_eq!(events.iter().filter(|e| e.is_error()).count(), 1);

    let err = orchestrator.invoke(&CallContext::new(), Map::new()).await.unwrap_err();
    assert!(matches!(err, Error::Completion(_)));
}

#[test]
fn task_bound_to_undeclared_agent_is_rejected() {
    let manifest = ServiceManifest::from_yaml_str(&MANIFEST.replace("agent: B", "agent: C")).unwrap();
    assert!(manifest.validate().is_err());

    let err = SequentialOrchestrator::from_manifest(
        &manifest,
        KernelBuilder::new(LocalPluginRegistry::with_builtins()),
        Arc::new(ScriptedFactory(Arc::new(Scripted::default()))),
        OrchestratorOptions::default(),
    )
    .unwrap_err();
    assert!(matches!(err, Error::Configuration(ref msg) if msg.contains("agent C not found for task T2")));
}

#[tokio::test]
async fn cancelled_stream_stops_without_terminal_event() {
    let client = Arc::new(Scripted::slow(Duration::from_millis(200)));
    let orchestrator = Arc::new(orchestrator(MANIFEST, client.clone()));
    let ctx = CallContext::new();
    let mut rx = orchestrator.invoke_stream(ctx.clone(), Map::new());

    let first = rx.recv().await.unwrap();
    assert_eq!(first.metadata["status"], json!("started"));
    ctx.cancel();

    let rest = collect(rx).await;
    assert!(rest.iter().all(|e| !e.done && !e.is_error()));
    assert_eq!(client.requests.lock().len(), 1);
}

#[tokio::test]
async fn unary_invoke_honours_timeout() {
    let orchestrator = orchestrator(MANIFEST, Arc::new(Scripted::slow(Duration::from_secs(5))));
    let ctx = CallContext::new();
    ctx.cancel_after(Duration::from_millis(50));

    let err = orchestrator.invoke(&ctx, Map::new()).await.unwrap_err();
    assert!(matches!(err, Error::Cancelled));
}
