//! End-to-end scenarios running full recipes through the executor.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use indexmap::IndexMap;
use recipe_executor::{
    Context, Executor, LlmClient, LlmClientError, LlmRequest, Recipe, RecipeError,
};
use serde_json::{json, Value};

/// Test double for the LLM client: returns a canned value and records the
/// request for assertions.
struct ScriptedLlm {
    response: Value,
    last_request: Arc<Mutex<Option<LlmRequest>>>,
}

impl ScriptedLlm {
    fn new(response: Value) -> (Arc<Self>, Arc<Mutex<Option<LlmRequest>>>) {
        let last_request = Arc::new(Mutex::new(None));
        let client = Arc::new(Self {
            response,
            last_request: Arc::clone(&last_request),
        });
        (client, last_request)
    }
}

#[async_trait]
impl LlmClient for ScriptedLlm {
    async fn generate(&self, request: LlmRequest) -> Result<Value, LlmClientError> {
        *self.last_request.lock().unwrap() = Some(request);
        Ok(self.response.clone())
    }
}

fn executor() -> Executor {
    Executor::new().unwrap()
}

async fn run(recipe: Value, context: &mut Context) -> recipe_executor::Result<()> {
    let recipe = Recipe::from_value(recipe)?;
    executor().execute(&recipe, context).await
}

#[tokio::test]
async fn sequential_set_context_and_write_files() {
    // Scenario: merge two strings into one artifact, persist it to disk.
    let out_root = tempfile::tempdir().unwrap();
    let mut context = Context::with_parts(
        [(
            "out_root".to_string(),
            json!(out_root.path().to_str().unwrap()),
        )],
        IndexMap::new(),
    );

    run(
        json!({ "steps": [
            { "type": "set_context", "config": { "key": "msg", "value": "hello" } },
            { "type": "set_context", "config": { "key": "msg", "value": " world", "if_exists": "merge" } },
            { "type": "write_files", "config": {
                "files": [ { "path": "out.txt", "content_key": "msg" } ],
                "root": "{{out_root}}"
            } }
        ] }),
        &mut context,
    )
    .await
    .unwrap();

    let written = std::fs::read_to_string(out_root.path().join("out.txt")).unwrap();
    assert_eq!(written, "hello world");
}

#[tokio::test]
async fn conditional_on_missing_file_takes_false_branch() {
    let mut context = Context::new();
    run(
        json!({ "steps": [
            { "type": "conditional", "config": {
                "condition": "file_exists('/does/not/exist')",
                "if_true": { "steps": [
                    { "type": "set_context", "config": { "key": "A", "value": "1" } }
                ] },
                "if_false": { "steps": [
                    { "type": "set_context", "config": { "key": "A", "value": "2" } }
                ] }
            } }
        ] }),
        &mut context,
    )
    .await
    .unwrap();

    assert_eq!(context.get("A"), Some(&json!("2")));
}

#[tokio::test]
async fn conditional_with_absent_branch_is_a_noop() {
    let mut context = Context::new();
    run(
        json!({ "steps": [
            { "type": "conditional", "config": { "condition": true } }
        ] }),
        &mut context,
    )
    .await
    .unwrap();
    assert!(context.is_empty());
}

#[tokio::test]
async fn conditional_rendered_boolean_artifact() {
    let mut context = Context::new();
    context.set("flag", json!(true));
    run(
        json!({ "steps": [
            { "type": "conditional", "config": {
                "condition": "{{ flag }}",
                "if_true": { "steps": [
                    { "type": "set_context", "config": { "key": "hit", "value": "yes" } }
                ] }
            } }
        ] }),
        &mut context,
    )
    .await
    .unwrap();
    assert_eq!(context.get("hit"), Some(&json!("yes")));
}

#[tokio::test]
async fn execute_recipe_parses_json_overrides() {
    // Scenario: a string override that parses as JSON becomes structured
    // data inside the sub-recipe (and stays in the shared context after).
    let dir = tempfile::tempdir().unwrap();
    let sub_path = dir.path().join("sub.json");
    std::fs::write(
        &sub_path,
        serde_json::to_string(&json!({ "steps": [
            { "type": "set_context", "config": { "key": "a_val", "value": "{{ payload.a }}" } }
        ] }))
        .unwrap(),
    )
    .unwrap();

    let mut context = Context::new();
    run(
        json!({ "steps": [
            { "type": "execute_recipe", "config": {
                "recipe_path": sub_path.to_str().unwrap(),
                "context_overrides": { "payload": "{\"a\":1,\"b\":[2,3]}" }
            } }
        ] }),
        &mut context,
    )
    .await
    .unwrap();

    assert_eq!(context.get("payload"), Some(&json!({"a": 1, "b": [2, 3]})));
    assert_eq!(context.get("a_val"), Some(&json!("1")));
}

#[tokio::test]
async fn execute_recipe_missing_file_fails() {
    let mut context = Context::new();
    let error = run(
        json!({ "steps": [
            { "type": "execute_recipe", "config": { "recipe_path": "/nope/recipe.json" } }
        ] }),
        &mut context,
    )
    .await
    .unwrap_err();
    assert!(matches!(
        error.root_cause(),
        RecipeError::FileNotFound(_)
    ));
}

#[tokio::test]
async fn self_recursive_recipe_hits_depth_limit() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("loop.json");
    std::fs::write(
        &path,
        serde_json::to_string(&json!({ "steps": [
            { "type": "execute_recipe", "config": { "recipe_path": path.to_str().unwrap() } }
        ] }))
        .unwrap(),
    )
    .unwrap();

    let mut context = Context::new();
    let executor = executor();
    let error = executor.execute_path(&path, &mut context).await.unwrap_err();
    assert!(matches!(
        error.root_cause(),
        RecipeError::RecursionLimit(_)
    ));
}

#[tokio::test]
async fn llm_generate_files_then_write_files() {
    // Scenario: the LLM returns FileSpecs; write_files persists them.
    let (client, last_request) = ScriptedLlm::new(json!({
        "files": [
            { "path": "a.txt", "content": "X" },
            { "path": "b/c.txt", "content": "Y" }
        ]
    }));
    let executor = Executor::new().unwrap().with_llm_client(client);

    let out_root = tempfile::tempdir().unwrap();
    let mut context = Context::with_parts(
        [(
            "out_root".to_string(),
            json!(out_root.path().to_str().unwrap()),
        )],
        IndexMap::new(),
    );

    let recipe = Recipe::from_value(json!({ "steps": [
        { "type": "llm_generate", "config": {
            "prompt": "Generate the files.",
            "model": "test/model",
            "max_tokens": "512",
            "output_format": "files",
            "output_key": "generated"
        } },
        { "type": "write_files", "config": { "files_key": "generated", "root": "{{out_root}}" } }
    ] }))
    .unwrap();
    executor.execute(&recipe, &mut context).await.unwrap();

    let generated = context.get("generated").unwrap();
    assert_eq!(generated.as_array().unwrap().len(), 2);
    assert_eq!(
        std::fs::read_to_string(out_root.path().join("a.txt")).unwrap(),
        "X"
    );
    assert_eq!(
        std::fs::read_to_string(out_root.path().join("b/c.txt")).unwrap(),
        "Y"
    );

    let request = last_request.lock().unwrap().take().unwrap();
    assert_eq!(request.model, "test/model");
    assert_eq!(request.max_tokens, Some(512));
}

#[tokio::test]
async fn llm_generate_text_stores_string() {
    let (client, _) = ScriptedLlm::new(json!("a plain answer"));
    let executor = Executor::new().unwrap().with_llm_client(client);
    let mut context = Context::new();

    let recipe = Recipe::from_value(json!({ "steps": [
        { "type": "llm_generate", "config": {
            "prompt": "Say something.",
            "output_format": "text"
        } }
    ] }))
    .unwrap();
    executor.execute(&recipe, &mut context).await.unwrap();

    assert_eq!(context.get("llm_output"), Some(&json!("a plain answer")));
}

#[tokio::test]
async fn llm_generate_schema_list_unwraps_items() {
    let (client, last_request) = ScriptedLlm::new(json!({
        "items": [ { "id": 1 }, { "id": 2 } ]
    }));
    let executor = Executor::new().unwrap().with_llm_client(client);
    let mut context = Context::new();

    let recipe = Recipe::from_value(json!({ "steps": [
        { "type": "llm_generate", "config": {
            "prompt": "List things.",
            "output_format": [ { "type": "object", "properties": { "id": { "type": "integer" } } } ],
            "output_key": "things"
        } }
    ] }))
    .unwrap();
    executor.execute(&recipe, &mut context).await.unwrap();

    assert_eq!(context.get("things"), Some(&json!([{"id": 1}, {"id": 2}])));
    // The wrapped schema is what reaches the client.
    let request = last_request.lock().unwrap().take().unwrap();
    let recipe_executor::LlmOutput::Schema(schema) = request.output else {
        panic!("expected a schema request");
    };
    assert_eq!(schema["required"], json!(["items"]));
}

#[tokio::test]
async fn llm_error_carries_model_and_format() {
    // The default executor has no LLM client wired.
    let mut context = Context::new();
    let error = run(
        json!({ "steps": [
            { "type": "llm_generate", "config": {
                "prompt": "hi",
                "model": "absent/model",
                "output_format": "text"
            } }
        ] }),
        &mut context,
    )
    .await
    .unwrap_err();

    match error.root_cause() {
        RecipeError::Llm { model, format, .. } => {
            assert_eq!(model, "absent/model");
            assert_eq!(format, "text");
        }
        other => panic!("expected an LLM error, got {other:?}"),
    }
}

#[tokio::test]
async fn read_files_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let mut context = Context::with_parts(
        [("root".to_string(), json!(dir.path().to_str().unwrap()))],
        IndexMap::new(),
    );

    run(
        json!({ "steps": [
            { "type": "set_context", "config": { "key": "body", "value": "round trip payload" } },
            { "type": "write_files", "config": {
                "files": [ { "path": "data.txt", "content_key": "body" } ],
                "root": "{{ root }}"
            } },
            { "type": "read_files", "config": {
                "path": "{{ root }}/data.txt",
                "content_key": "reread"
            } }
        ] }),
        &mut context,
    )
    .await
    .unwrap();

    assert_eq!(context.get("reread"), Some(&json!("round trip payload")));
}

#[tokio::test]
async fn read_files_optional_missing_yields_empty_string() {
    let mut context = Context::new();
    run(
        json!({ "steps": [
            { "type": "read_files", "config": {
                "path": "/missing/one.txt",
                "content_key": "content",
                "optional": true
            } }
        ] }),
        &mut context,
    )
    .await
    .unwrap();
    assert_eq!(context.get("content"), Some(&json!("")));
}

#[tokio::test]
async fn read_files_json_is_parsed() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("cfg.json"), r#"{"threshold": 7}"#).unwrap();
    let mut context = Context::with_parts(
        [("root".to_string(), json!(dir.path().to_str().unwrap()))],
        IndexMap::new(),
    );

    run(
        json!({ "steps": [
            { "type": "read_files", "config": {
                "path": "{{ root }}/cfg.json",
                "content_key": "cfg"
            } }
        ] }),
        &mut context,
    )
    .await
    .unwrap();
    assert_eq!(context.get("cfg"), Some(&json!({"threshold": 7})));
}

#[tokio::test]
async fn read_files_comma_separated_dict_mode() {
    let dir = tempfile::tempdir().unwrap();
    let a = dir.path().join("a.txt");
    let b = dir.path().join("b.txt");
    std::fs::write(&a, "one").unwrap();
    std::fs::write(&b, "two").unwrap();

    let mut context = Context::new();
    run(
        json!({ "steps": [
            { "type": "read_files", "config": {
                "path": format!("{}, {}", a.display(), b.display()),
                "content_key": "both",
                "merge_mode": "dict"
            } }
        ] }),
        &mut context,
    )
    .await
    .unwrap();

    let both = context.get("both").unwrap().as_object().unwrap();
    assert_eq!(both.len(), 2);
    assert_eq!(both.get(a.to_str().unwrap()), Some(&json!("one")));
}

#[tokio::test]
async fn unknown_step_type_fails() {
    let mut context = Context::new();
    let error = run(
        json!({ "steps": [ { "type": "transmogrify", "config": {} } ] }),
        &mut context,
    )
    .await
    .unwrap_err();
    assert!(matches!(
        error.root_cause(),
        RecipeError::UnknownStepType(name) if name == "transmogrify"
    ));
}

#[tokio::test]
async fn failing_step_reports_index_and_type() {
    let mut context = Context::new();
    let error = run(
        json!({ "steps": [
            { "type": "set_context", "config": { "key": "ok", "value": "fine" } },
            { "type": "read_files", "config": { "path": "/absent.txt", "content_key": "c" } }
        ] }),
        &mut context,
    )
    .await
    .unwrap_err();

    match &error {
        RecipeError::StepFailed {
            index, step_type, ..
        } => {
            assert_eq!(*index, 1);
            assert_eq!(step_type, "read_files");
        }
        other => panic!("expected StepFailed, got {other:?}"),
    }
    // The successful first step still took effect.
    assert_eq!(context.get("ok"), Some(&json!("fine")));
}

#[tokio::test]
async fn recipe_writes_only_declared_keys() {
    let mut context = Context::new();
    run(
        json!({ "steps": [
            { "type": "set_context", "config": { "key": "one", "value": "1" } },
            { "type": "set_context", "config": { "key": "two", "value": "2" } }
        ] }),
        &mut context,
    )
    .await
    .unwrap();
    let keys: Vec<_> = context.keys().collect();
    assert_eq!(keys, vec!["one", "two"]);
}

#[tokio::test]
async fn set_context_overwrite_is_idempotent() {
    let mut context = Context::new();
    let recipe = json!({ "steps": [
        { "type": "set_context", "config": { "key": "v", "value": { "nested": ["a", "b"] } } }
    ] });
    run(recipe.clone(), &mut context).await.unwrap();
    let first = context.get("v").cloned();
    run(recipe, &mut context).await.unwrap();
    assert_eq!(context.get("v").cloned(), first);
}

#[tokio::test]
async fn set_context_nested_render_reaches_fixed_point() {
    let mut context = Context::new();
    context.set("inner", json!("deep value"));
    context.set("outer", json!("{{ inner }}"));
    run(
        json!({ "steps": [
            { "type": "set_context", "config": {
                "key": "resolved",
                "value": "{{ outer }}",
                "nested_render": true
            } }
        ] }),
        &mut context,
    )
    .await
    .unwrap();
    assert_eq!(context.get("resolved"), Some(&json!("deep value")));
}

#[tokio::test]
async fn write_files_with_empty_list_is_a_noop() {
    let mut context = Context::new();
    run(
        json!({ "steps": [
            { "type": "write_files", "config": { "files": [], "root": "/nonexistent-root" } }
        ] }),
        &mut context,
    )
    .await
    .unwrap();
}

#[tokio::test]
async fn write_files_serializes_structured_content() {
    let dir = tempfile::tempdir().unwrap();
    let mut context = Context::with_parts(
        [("root".to_string(), json!(dir.path().to_str().unwrap()))],
        IndexMap::new(),
    );
    run(
        json!({ "steps": [
            { "type": "write_files", "config": {
                "files": [ { "path": "data.json", "content": { "a": [1, 2] } } ],
                "root": "{{ root }}"
            } }
        ] }),
        &mut context,
    )
    .await
    .unwrap();

    let text = std::fs::read_to_string(dir.path().join("data.json")).unwrap();
    let parsed: Value = serde_json::from_str(&text).unwrap();
    assert_eq!(parsed, json!({"a": [1, 2]}));
    assert!(text.contains('\n'), "structured content is indented");
}

#[tokio::test]
async fn write_files_rejects_bad_files_key_shape() {
    let mut context = Context::new();
    context.set("not_files", json!(42));
    let error = run(
        json!({ "steps": [
            { "type": "write_files", "config": { "files_key": "not_files" } }
        ] }),
        &mut context,
    )
    .await
    .unwrap_err();
    assert!(matches!(
        error.root_cause(),
        RecipeError::InvalidFilesInput { .. }
    ));
}
