//! End-to-end validation scenarios
//!
//! Schema set under `tests/fixtures/schemas`, documents either from
//! `tests/fixtures/documents` or built in memory.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use serde_json::{json, Value};

use extended_json_validator::checksum::cache_key;
use extended_json_validator::extensions::Extension;
use extended_json_validator::{
    DocumentReport, DocumentSource, ErrorReason, ExtensibleValidator, GuessMode, InlineDocument,
    MalformedKeywordPolicy, PrimaryKeyConfig, SchemaSource, ValidateOptions, ValidatorConfig,
    ValidatorError,
};

const PEOPLE: &str = "https://example.org/schemas/people.json";
const REFS: &str = "https://example.org/schemas/refs.json";
const STUDIES: &str = "https://example.org/schemas/studies.yaml";
const SAMPLES: &str = "https://example.org/schemas/samples.json";
const CYCLE_A: &str = "https://example.org/schemas/cycle_a.json";
const CYCLE_B: &str = "https://example.org/schemas/cycle_b.json";

fn fixtures_path() -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR")).join("tests/fixtures")
}

fn fixture_validator(config: ValidatorConfig) -> ExtensibleValidator {
    let mut validator = ExtensibleValidator::new(config).unwrap();
    validator
        .load_schemas(&[SchemaSource::Path(fixtures_path().join("schemas"))])
        .unwrap();
    validator
}

fn inline_schema(id: &str, body: Value) -> SchemaSource {
    let mut schema = json!({"$schema": "http://json-schema.org/draft-07/schema#", "$id": id});
    if let (Some(target), Value::Object(extra)) = (schema.as_object_mut(), body) {
        target.extend(extra);
    }
    SchemaSource::from(schema)
}

fn doc(file: &str, schema: &str, body: Value) -> DocumentSource {
    let mut json = json!({"$schema": schema});
    if let (Some(target), Value::Object(extra)) = (json.as_object_mut(), body) {
        target.extend(extra);
    }
    DocumentSource::json(file, json)
}

fn run(
    validator: &mut ExtensibleValidator,
    documents: Vec<DocumentSource>,
    options: ValidateOptions,
) -> BTreeMap<String, DocumentReport> {
    validator
        .validate_documents(documents, options)
        .unwrap()
        .map(|report| (report.file.clone(), report))
        .collect()
}

fn reasons(report: &DocumentReport) -> Vec<ErrorReason> {
    report.errors.iter().map(|error| error.reason).collect()
}

// =============================================================================
// Schema loading
// =============================================================================

#[test]
fn test_fixture_schemas_load_consistently() {
    let mut validator = ExtensibleValidator::new(ValidatorConfig::default()).unwrap();
    let stats = validator
        .load_schemas(&[SchemaSource::Path(fixtures_path().join("schemas"))])
        .unwrap();

    assert_eq!(stats.files_ok, 6);
    assert_eq!(stats.dirs_ok, 1);
    assert_eq!(stats.schemas_consistent, 6);
    assert_eq!(stats.schemas_inconsistent, 0);

    let valid = validator.valid_document_schemas(false);
    for uri in [PEOPLE, REFS, STUDIES, SAMPLES, CYCLE_A, CYCLE_B] {
        assert!(valid.contains_key(uri), "{uri} should be loaded");
    }
}

#[test]
fn test_dup_id_no_id_and_anonymous_schemas() {
    let mut strict = ExtensibleValidator::new(ValidatorConfig::default()).unwrap();
    let stats = strict
        .load_schemas(&[
            inline_schema("https://example.org/schemas/twin.json", json!({})),
            inline_schema("https://example.org/schemas/twin.json", json!({"type": "object"})),
            SchemaSource::from(json!({"$schema": "http://json-schema.org/draft-07/schema#"})),
        ])
        .unwrap();
    assert_eq!(stats.files_ok, 1);
    assert_eq!(stats.files_failed, 2);
    let rejected: Vec<ErrorReason> = strict
        .rejected_schemas()
        .iter()
        .map(|r| r.errors[0].reason)
        .collect();
    assert_eq!(rejected, vec![ErrorReason::DupId, ErrorReason::NoId]);

    let config = ValidatorConfig {
        validate_no_id: false,
        ..Default::default()
    };
    let mut lenient = ExtensibleValidator::new(config).unwrap();
    lenient
        .load_schemas(&[SchemaSource::from(json!({
            "$schema": "http://json-schema.org/draft-07/schema#",
            "type": "object",
            "required": ["code"],
            "unique": ["code"]
        }))])
        .unwrap();
    let valid = lenient.valid_document_schemas(false);
    let record = valid["urn:ejsv:anonymous-schema:1"];
    assert!(record.anonymous);

    let reports = run(
        &mut lenient,
        vec![
            DocumentSource::json("a.json", json!({"code": "c"})),
            DocumentSource::json("b.json", json!({"code": "c"})),
        ],
        ValidateOptions {
            guess: GuessMode::All,
            ..Default::default()
        },
    );
    assert!(reports["a.json"].is_valid());
    assert_eq!(reports["a.json"].schema_id.as_deref(), Some("urn:ejsv:anonymous-schema:1"));
    assert_eq!(reasons(&reports["b.json"]), vec![ErrorReason::SchemaUnknown]);
}

#[test]
fn test_malformed_keyword_policies() {
    let schema = || {
        inline_schema(
            "https://example.org/schemas/templated.json",
            json!({
                "type": "object",
                "x-templates": {"row": {"unique": "id"}},
                "unique": ["id"]
            }),
        )
    };

    let mut discarding = ExtensibleValidator::new(ValidatorConfig::default()).unwrap();
    let stats = discarding.load_schemas(&[schema()]).unwrap();
    assert_eq!(stats.schemas_consistent, 1);

    let config = ValidatorConfig {
        malformed_keywords: MalformedKeywordPolicy::Reject,
        ..Default::default()
    };
    let mut rejecting = ExtensibleValidator::new(config).unwrap();
    let stats = rejecting.load_schemas(&[schema()]).unwrap();
    assert_eq!(stats.schemas_inconsistent, 1);
    let record = rejecting
        .schema("https://example.org/schemas/templated.json")
        .unwrap();
    assert_eq!(record.errors[0].reason, ErrorReason::SchemaError);
    assert_eq!(record.errors[0].path.as_deref(), Some("/x-templates/row/unique"));
}

#[test]
fn test_fk_to_unloaded_schema_is_reported_at_bootstrap() {
    let mut validator = ExtensibleValidator::new(ValidatorConfig::default()).unwrap();
    let stats = validator
        .load_schemas(&[inline_schema(
            "https://example.org/schemas/orphans.json",
            json!({"foreign_keys": [{"schema_id": "missing.json", "members": ["ref"]}]}),
        )])
        .unwrap();
    assert_eq!(stats.schemas_inconsistent, 1);

    let record = validator.schema("https://example.org/schemas/orphans.json").unwrap();
    assert_eq!(record.bootstrap_errors.len(), 1);
    assert_eq!(record.bootstrap_errors[0].reason, ErrorReason::FkNoSchema);
    assert!(record.bootstrap_errors[0]
        .description
        .contains("https://example.org/schemas/missing.json"));

    let reports = run(
        &mut validator,
        vec![doc("o.json", "https://example.org/schemas/orphans.json", json!({"ref": "r"}))],
        ValidateOptions::default(),
    );
    assert!(reasons(&reports["o.json"]).contains(&ErrorReason::FkNoSchema));
}

#[test]
fn test_cycles_terminate_and_share_features() {
    let mut validator = fixture_validator(ValidatorConfig::default());
    assert_eq!(
        validator.reference_cycles(),
        vec![vec![CYCLE_A.to_string(), CYCLE_B.to_string()]]
    );

    let record = validator.schema(CYCLE_A).unwrap();
    let inherited = record.extensions.iter().find_map(|extension| match extension {
        Extension::Index(index) => index.world().by_name("by_tag").map(|d| d.schema_uri.clone()),
        _ => None,
    });
    assert_eq!(inherited.as_deref(), Some(CYCLE_B));

    let reports = run(
        &mut validator,
        vec![
            doc("nest.json", CYCLE_A, json!({"code": "c1", "b": {"tag": "t", "a": {"code": "c2"}}})),
            doc("again.json", CYCLE_A, json!({"code": "c2"})),
        ],
        ValidateOptions::default(),
    );
    assert!(reports["nest.json"].is_valid());
    assert_eq!(reasons(&reports["again.json"]), vec![ErrorReason::DupUnique]);
}

#[test]
fn test_resolved_schemas_leave_recursion_in_place() {
    let mut validator = fixture_validator(ValidatorConfig::default());
    let schemas = validator.valid_document_schemas(true);
    let resolved = schemas[CYCLE_A].resolved_schema.as_ref().unwrap();
    assert_eq!(resolved["properties"]["b"]["index"]["name"], "by_tag");
    assert_eq!(resolved["properties"]["b"]["properties"]["a"], json!({"$ref": "cycle_a.json"}));
}

// =============================================================================
// Primary and foreign keys
// =============================================================================

#[test]
fn test_pk_fk_end_to_end() {
    let mut validator = fixture_validator(ValidatorConfig::default());

    let clean = run(
        &mut validator,
        vec![
            doc("d1.json", PEOPLE, json!({"id": "x"})),
            doc("d2.json", REFS, json!({"ref": "x"})),
        ],
        ValidateOptions::default(),
    );
    assert_eq!(clean.len(), 2);
    assert!(clean.values().all(DocumentReport::is_valid));
    assert_eq!(clean["d1.json"].schema_id.as_deref(), Some(PEOPLE));

    let stale = run(
        &mut validator,
        vec![
            doc("d1.json", PEOPLE, json!({"id": "x"})),
            doc("d2.json", REFS, json!({"ref": "y"})),
        ],
        ValidateOptions::default(),
    );
    assert!(stale["d1.json"].is_valid());
    assert_eq!(reasons(&stale["d2.json"]), vec![ErrorReason::StaleFk]);

    let duplicated = run(
        &mut validator,
        vec![
            doc("d1.json", PEOPLE, json!({"id": "x"})),
            doc("d2.json", REFS, json!({"ref": "x"})),
            doc("d1b.json", PEOPLE, json!({"id": "x"})),
        ],
        ValidateOptions::default(),
    );
    assert!(duplicated["d1.json"].is_valid());
    assert!(duplicated["d2.json"].is_valid());
    assert_eq!(reasons(&duplicated["d1b.json"]), vec![ErrorReason::DupPk]);
}

#[test]
fn test_dangling_versus_stale() {
    let mut validator = fixture_validator(ValidatorConfig::default());

    let dangling = run(
        &mut validator,
        vec![
            doc("r1.json", REFS, json!({"ref": "a"})),
            doc("r2.json", REFS, json!({"ref": "b"})),
        ],
        ValidateOptions::default(),
    );
    assert_eq!(reasons(&dangling["r1.json"]), vec![ErrorReason::DanglingFk]);
    assert_eq!(reasons(&dangling["r2.json"]), vec![ErrorReason::DanglingFk]);

    let stale = run(
        &mut validator,
        vec![
            doc("p.json", PEOPLE, json!({"id": "a"})),
            doc("r1.json", REFS, json!({"ref": "a"})),
            doc("r2.json", REFS, json!({"ref": "b"})),
        ],
        ValidateOptions::default(),
    );
    assert!(stale["r1.json"].is_valid());
    assert_eq!(reasons(&stale["r2.json"]), vec![ErrorReason::StaleFk]);
    assert_eq!(stale["r2.json"].errors[0].path.as_deref(), Some(""));
}

#[test]
fn test_unique_round_trip() {
    let mut validator = ExtensibleValidator::new(ValidatorConfig::default()).unwrap();
    let users = "https://example.org/schemas/users.json";
    validator
        .load_schemas(&[inline_schema(
            users,
            json!({"properties": {"email": {"type": "string"}}, "unique": ["email"]}),
        )])
        .unwrap();

    for _ in 0..2 {
        let reports = run(
            &mut validator,
            vec![doc("u1.json", users, json!({"email": "a@example.org"}))],
            ValidateOptions::default(),
        );
        assert!(reports["u1.json"].is_valid());
    }

    let reports = run(
        &mut validator,
        vec![
            doc("u1.json", users, json!({"email": "a@example.org"})),
            doc("u2.json", users, json!({"email": "a@example.org"})),
        ],
        ValidateOptions::default(),
    );
    assert!(reports["u1.json"].is_valid());
    assert_eq!(reasons(&reports["u2.json"]), vec![ErrorReason::DupUnique]);
    assert!(reports["u2.json"].errors[0].description.contains("u1.json"));
}

#[test]
fn test_scope_limited_keys() {
    let mut validator = ExtensibleValidator::new(ValidatorConfig::default()).unwrap();
    let sheets = "https://example.org/schemas/sheets.json";
    validator
        .load_schemas(&[inline_schema(
            sheets,
            json!({
                "properties": {
                    "rows": {
                        "type": "array",
                        "items": {
                            "type": "object",
                            "unique": {"members": ["name"], "limit_scope": true}
                        }
                    }
                }
            }),
        )])
        .unwrap();

    let reports = run(
        &mut validator,
        vec![
            doc("one.json", sheets, json!({"rows": [{"name": "a"}, {"name": "b"}]})),
            doc("two.json", sheets, json!({"rows": [{"name": "a"}, {"name": "a"}]})),
        ],
        ValidateOptions::default(),
    );
    assert!(reports["one.json"].is_valid());
    assert_eq!(reasons(&reports["two.json"]), vec![ErrorReason::DupUnique]);
    assert_eq!(reports["two.json"].errors[0].path.as_deref(), Some("/rows/1"));
}

#[test]
fn test_join_keys_with_refers_to() {
    let mut validator = fixture_validator(ValidatorConfig::default());
    let reports = run(
        &mut validator,
        vec![
            doc("study.json", STUDIES, json!({"code": "S-1", "meta": {"alt": "A-1"}})),
            doc("sample_alt.json", SAMPLES, json!({"study": "A-1"})),
            doc("sample_code.json", SAMPLES, json!({"study": "S-1"})),
        ],
        ValidateOptions::default(),
    );
    assert!(reports["study.json"].is_valid());
    assert!(reports["sample_alt.json"].is_valid());
    assert_eq!(reasons(&reports["sample_code.json"]), vec![ErrorReason::StaleJk]);
}

#[test]
fn test_relative_ids_link_keys() {
    let mut validator = ExtensibleValidator::new(ValidatorConfig::default()).unwrap();
    let stats = validator
        .load_schemas(&[
            inline_schema(
                "S1",
                json!({"properties": {"id": {"type": "string"}}, "required": ["id"], "primary_key": ["id"]}),
            ),
            inline_schema(
                "S2",
                json!({
                    "properties": {"ref": {"type": "string"}},
                    "foreign_keys": [{"schema_id": "S1", "members": ["ref"]}]
                }),
            ),
        ])
        .unwrap();
    assert_eq!(stats.schemas_consistent, 2);

    let clean = run(
        &mut validator,
        vec![doc("d1.json", "S1", json!({"id": "x"})), doc("d2.json", "S2", json!({"ref": "x"}))],
        ValidateOptions::default(),
    );
    assert!(clean.values().all(DocumentReport::is_valid));

    let stale = run(
        &mut validator,
        vec![doc("d1.json", "S1", json!({"id": "x"})), doc("d2.json", "S2", json!({"ref": "y"}))],
        ValidateOptions::default(),
    );
    assert_eq!(reasons(&stale["d2.json"]), vec![ErrorReason::StaleFk]);

    let duplicated = run(
        &mut validator,
        vec![
            doc("d1.json", "S1", json!({"id": "x"})),
            doc("d1b.json", "S1", json!({"id": "x"})),
        ],
        ValidateOptions::default(),
    );
    assert!(duplicated["d1.json"].is_valid());
    assert_eq!(reasons(&duplicated["d1b.json"]), vec![ErrorReason::DupPk]);
}

#[test]
fn test_array_members_match_single_keys() {
    let bundles = "https://example.org/schemas/bundles.json";
    let mut validator = ExtensibleValidator::new(ValidatorConfig::default()).unwrap();
    validator
        .load_schemas(&[
            SchemaSource::Path(fixtures_path().join("schemas")),
            inline_schema(
                bundles,
                json!({
                    "properties": {"refs": {"type": "array", "items": {"type": "string"}}},
                    "foreign_keys": [{"schema_id": "people.json", "members": ["refs[]"]}]
                }),
            ),
        ])
        .unwrap();

    let reports = run(
        &mut validator,
        vec![
            doc("a.json", PEOPLE, json!({"id": "a"})),
            doc("b.json", PEOPLE, json!({"id": "b"})),
            doc("one.json", bundles, json!({"refs": ["a"]})),
            doc("both.json", bundles, json!({"refs": ["a", "b"]})),
            doc("partial.json", bundles, json!({"refs": ["b", "z"]})),
        ],
        ValidateOptions::default(),
    );
    assert!(reports["one.json"].is_valid());
    assert!(reports["both.json"].is_valid());
    assert_eq!(reasons(&reports["partial.json"]), vec![ErrorReason::StaleFk]);
}

#[test]
fn test_multi_valued_primary_keys_collide_per_value() {
    let tags = "https://example.org/schemas/tags.json";
    let mut validator = ExtensibleValidator::new(ValidatorConfig::default()).unwrap();
    validator
        .load_schemas(&[inline_schema(
            tags,
            json!({
                "properties": {"ids": {"type": "array", "items": {"type": "string"}}},
                "primary_key": ["ids[]"]
            }),
        )])
        .unwrap();

    let reports = run(
        &mut validator,
        vec![
            doc("first.json", tags, json!({"ids": ["a"]})),
            doc("second.json", tags, json!({"ids": ["a", "b"]})),
            doc("third.json", tags, json!({"ids": ["c", "d"]})),
        ],
        ValidateOptions::default(),
    );
    assert!(reports["first.json"].is_valid());
    assert_eq!(reasons(&reports["second.json"]), vec![ErrorReason::DupPk]);
    assert!(reports["third.json"].is_valid());
}

#[test]
fn test_join_keys_against_scope_limited_index() {
    let catalog = "https://example.org/schemas/catalog.json";
    let mut validator = ExtensibleValidator::new(ValidatorConfig::default()).unwrap();
    validator
        .load_schemas(&[inline_schema(
            catalog,
            json!({
                "properties": {
                    "defs": {
                        "type": "array",
                        "items": {
                            "type": "object",
                            "index": {"members": ["code"], "name": "local", "limit_scope": true}
                        }
                    },
                    "uses": {
                        "type": "array",
                        "items": {
                            "type": "object",
                            "join_keys": [{"schema_id": "catalog.json", "members": ["code"], "refers_to": "local"}]
                        }
                    }
                }
            }),
        )])
        .unwrap();

    let reports = run(
        &mut validator,
        vec![
            doc(
                "own.json",
                catalog,
                json!({"defs": [{"code": "c"}], "uses": [{"code": "c"}]}),
            ),
            doc("borrowed.json", catalog, json!({"defs": [], "uses": [{"code": "c"}]})),
        ],
        ValidateOptions::default(),
    );
    assert!(reports["own.json"].is_valid());
    assert_eq!(reasons(&reports["borrowed.json"]), vec![ErrorReason::StaleJk]);
    assert_eq!(reports["borrowed.json"].errors[0].path.as_deref(), Some("/uses/0"));
}

#[test]
fn test_documents_sharing_a_name_share_second_pass_errors() {
    let mut validator = fixture_validator(ValidatorConfig::default());
    let reports: Vec<DocumentReport> = validator
        .validate_documents(
            vec![
                doc("p.json", PEOPLE, json!({"id": "a"})),
                doc("dup.json", REFS, json!({"ref": "z"})),
                doc("dup.json", REFS, json!({"ref": "z"})),
            ],
            ValidateOptions::default(),
        )
        .unwrap()
        .collect();

    let shared: Vec<&DocumentReport> = reports.iter().filter(|report| report.file == "dup.json").collect();
    assert_eq!(shared.len(), 2);
    for report in shared {
        assert!(!report.is_valid());
        assert!(reasons(report).iter().all(|reason| *reason == ErrorReason::StaleFk));
    }
}

// =============================================================================
// Key providers
// =============================================================================

#[test]
fn test_inline_provider_feeds_primary_keys() {
    let cache = tempfile::tempdir().unwrap();
    let mut settings = PrimaryKeyConfig::default();
    settings
        .inline_provider
        .insert("people.json".to_string(), vec!["p-1".to_string()]);
    let config = ValidatorConfig {
        cache_dir: Some(cache.path().to_path_buf()),
        primary_key: Some(settings),
        ..Default::default()
    };
    let mut validator = fixture_validator(config);

    let reports = run(
        &mut validator,
        vec![
            doc("r.json", REFS, json!({"ref": "p-1"})),
            doc("p.json", PEOPLE, json!({"id": "p-1"})),
        ],
        ValidateOptions::default(),
    );
    assert!(reports["r.json"].is_valid());
    assert_eq!(reasons(&reports["p.json"]), vec![ErrorReason::DupPk]);
}

#[test]
fn test_cached_provider_list() {
    let cache = tempfile::tempdir().unwrap();
    let settings = PrimaryKeyConfig {
        provider: vec!["http://127.0.0.1:9/ids/".to_string()],
        ..Default::default()
    };
    let config = ValidatorConfig {
        cache_dir: Some(cache.path().to_path_buf()),
        read_only_cache: true,
        primary_key: Some(settings),
        ..Default::default()
    };
    let cache_dir = config.extension_cache_dir("primary_key");
    fs::create_dir_all(&cache_dir).unwrap();
    fs::write(
        cache_dir.join(format!("{}.ids", cache_key("http://127.0.0.1:9/ids/people.json/"))),
        "c-1\nc-2\n",
    )
    .unwrap();

    let mut validator = fixture_validator(config);
    validator.warm_up_caches();
    let reports = run(
        &mut validator,
        vec![
            doc("ok.json", REFS, json!({"ref": "c-2"})),
            doc("bad.json", REFS, json!({"ref": "c-9"})),
        ],
        ValidateOptions::default(),
    );
    assert!(reports["ok.json"].is_valid());
    assert_eq!(reasons(&reports["bad.json"]), vec![ErrorReason::StaleFk]);

    validator.invalidate_caches();
    assert!(cache_dir.exists());
}

#[test]
fn test_provider_collisions_make_the_schema_inconsistent() {
    let cache = tempfile::tempdir().unwrap();
    let mut settings = PrimaryKeyConfig {
        provider: vec!["http://127.0.0.1:9/ids/".to_string()],
        ..Default::default()
    };
    settings
        .inline_provider
        .insert("people.json".to_string(), vec!["p-1".to_string()]);
    let config = ValidatorConfig {
        cache_dir: Some(cache.path().to_path_buf()),
        read_only_cache: true,
        primary_key: Some(settings),
        ..Default::default()
    };
    let cache_dir = config.extension_cache_dir("primary_key");
    fs::create_dir_all(&cache_dir).unwrap();
    fs::write(
        cache_dir.join(format!("{}.ids", cache_key("http://127.0.0.1:9/ids/people.json/"))),
        "p-1\np-2\n",
    )
    .unwrap();

    let mut validator = ExtensibleValidator::new(config).unwrap();
    let stats = validator
        .load_schemas(&[SchemaSource::Path(fixtures_path().join("schemas"))])
        .unwrap();
    assert_eq!(stats.schemas_inconsistent, 1);
    let people = validator.schema(PEOPLE).unwrap();
    assert!(!people.is_consistent());
    assert!(people.bootstrap_errors.iter().any(|error| error.reason == ErrorReason::DupPk));

    let reports = run(
        &mut validator,
        vec![
            doc("first.json", PEOPLE, json!({"id": "q-1"})),
            doc("second.json", PEOPLE, json!({"id": "q-2"})),
        ],
        ValidateOptions::default(),
    );
    for file in ["first.json", "second.json"] {
        assert!(reasons(&reports[file]).contains(&ErrorReason::DupPk), "{file} should carry the collision");
    }
}

// =============================================================================
// Document inputs and routing
// =============================================================================

#[test]
fn test_directory_documents_with_yaml_and_fatal_files() {
    let mut validator = fixture_validator(ValidatorConfig::default());
    let reports = run(
        &mut validator,
        vec![DocumentSource::Path(fixtures_path().join("documents"))],
        ValidateOptions::default(),
    );

    let by_name: BTreeMap<String, &DocumentReport> = reports
        .values()
        .map(|report| {
            let name = Path::new(&report.file)
                .file_name()
                .unwrap()
                .to_string_lossy()
                .into_owned();
            (name, report)
        })
        .collect();
    assert_eq!(
        by_name.keys().cloned().collect::<Vec<_>>(),
        vec!["broken.json", "person_x.json", "ref_x.yaml", "ref_y.json"]
    );
    assert_eq!(reasons(by_name["broken.json"]), vec![ErrorReason::Fatal]);
    assert!(by_name["person_x.json"].is_valid());
    assert!(by_name["ref_x.yaml"].is_valid());
    assert_eq!(reasons(by_name["ref_y.json"]), vec![ErrorReason::StaleFk]);
}

#[test]
fn test_schema_hints() {
    let mut validator = fixture_validator(ValidatorConfig::default());
    let mut run = validator
        .validate_documents(
            vec![
                doc("unknown.json", "https://example.org/schemas/nowhere.json", json!({})),
                DocumentSource::json("hintless.json", json!({"id": "z"})),
                DocumentSource::Record(InlineDocument {
                    file: Some("empty".to_string()),
                    json: None,
                }),
                doc("invalid.json", PEOPLE, json!({"name": 3})),
            ],
            ValidateOptions::default(),
        )
        .unwrap();
    let reports: BTreeMap<String, DocumentReport> = run.by_ref().map(|r| (r.file.clone(), r)).collect();

    assert_eq!(reasons(&reports["unknown.json"]), vec![ErrorReason::SchemaUnknown]);
    assert_eq!(
        reports["unknown.json"].errors[0].description,
        "Schema with URI https://example.org/schemas/nowhere.json was not loaded"
    );
    assert_eq!(reasons(&reports["hintless.json"]), vec![ErrorReason::NoId]);
    assert_eq!(reasons(&reports["empty"]), vec![ErrorReason::Ignored]);

    let invalid = &reports["invalid.json"];
    assert!(invalid.errors.len() >= 2);
    assert!(invalid.errors.iter().all(|e| e.reason == ErrorReason::SchemaError));
    assert!(invalid
        .errors
        .iter()
        .any(|e| e.path.as_deref() == Some("/name") && e.description.starts_with("Path: /name . Message: ")));

    let stats = run.stats();
    assert_eq!(stats.processed, 4);
    assert_eq!(stats.failed, 3);
    assert_eq!(stats.held, 0);
}

#[test]
fn test_guess_mode_forgets_failed_candidates() {
    let mut validator = ExtensibleValidator::new(ValidatorConfig::default()).unwrap();
    let codes = "https://example.org/schemas/guess_codes.json";
    let open = "https://example.org/schemas/guess_open.json";
    validator
        .load_schemas(&[
            inline_schema(
                codes,
                json!({
                    "type": "object",
                    "properties": {"code": {"type": "string"}, "sub": {"$ref": "#"}},
                    "unique": ["code"]
                }),
            ),
            inline_schema(open, json!({"type": "object"})),
        ])
        .unwrap();

    let reports = run(
        &mut validator,
        vec![
            DocumentSource::json("first.json", json!({"code": "c1"})),
            DocumentSource::json("second.json", json!({"code": "c2", "sub": {"code": "c1"}})),
            doc("third.json", codes, json!({"code": "c2"})),
        ],
        ValidateOptions {
            guess: GuessMode::All,
            ..Default::default()
        },
    );
    assert_eq!(reports["first.json"].schema_id.as_deref(), Some(codes));
    assert_eq!(reports["second.json"].schema_id.as_deref(), Some(open));
    assert!(reports.values().all(DocumentReport::is_valid));

    let restricted = run(
        &mut validator,
        vec![DocumentSource::json("only.json", json!({"code": 5}))],
        ValidateOptions {
            guess: GuessMode::Only(vec![codes.to_string()]),
            ..Default::default()
        },
    );
    assert_eq!(reasons(&restricted["only.json"]), vec![ErrorReason::SchemaUnknown]);
}

#[test]
fn test_array_documents_are_shredded() {
    let mut validator = fixture_validator(ValidatorConfig::default());
    let batch = json!([
        {"$schema": PEOPLE, "id": "a"},
        {"$schema": PEOPLE, "id": "a"},
        {"$schema": REFS, "ref": "a"}
    ]);

    let reports = run(
        &mut validator,
        vec![DocumentSource::json("batch.json", batch.clone())],
        ValidateOptions {
            iterate_arrays: true,
            ..Default::default()
        },
    );
    assert_eq!(reports.len(), 3);
    assert!(reports["batch.json[0]"].is_valid());
    assert_eq!(reasons(&reports["batch.json[1]"]), vec![ErrorReason::DupPk]);
    assert!(reports["batch.json[2]"].is_valid());

    let whole = run(
        &mut validator,
        vec![DocumentSource::json("batch.json", batch)],
        ValidateOptions::default(),
    );
    assert_eq!(reasons(&whole["batch.json"]), vec![ErrorReason::NoId]);
}

#[test]
fn test_zero_schemas_is_fatal() {
    let mut validator = ExtensibleValidator::new(ValidatorConfig::default()).unwrap();
    validator
        .load_schemas(&[SchemaSource::from(json!({"type": "object"}))])
        .unwrap();
    let result = validator.validate_documents(
        vec![DocumentSource::json("d.json", json!({}))],
        ValidateOptions::default(),
    );
    assert!(matches!(result, Err(ValidatorError::NoSchemasLoaded)));
}
