use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use tempfile::TempDir;

fn tender_binary() -> PathBuf {
    let mut path = std::env::current_exe().unwrap();
    path.pop(); // remove test binary name
    path.pop(); // remove deps/
    path.push("tender");
    path
}

const DOCUMENT: &str = r#"{
  "tender_id": "ETP-2024-0117",
  "title": "Капитальный ремонт кровли",
  "object": { "title": "Школа №5", "address": "ул. Ленина, 1" },
  "executor": { "name": "Иванов И.И.", "phone": "+7 900 000-00-00" },
  "prepared_date": "15.03.2024 10:30:00",
  "lots": {
    "LOT-1": {
      "title": "Лот №1",
      "proposals": {
        "7701234567": {
          "contractor": { "inn": "7701234567", "title": "ООО Ромашка" },
          "additional_info": { "Срок выполнения": "90 дней" },
          "items": {
            "1": { "job_title": "Раздел 1. Кровля", "is_chapter": true },
            "1.1": { "job_title": "Демонтаж покрытия", "job_title_normalized": "демонтаж покрытие",
                     "parent_key": "1", "unit": "м2", "quantity": 120.0, "unit_price": 350.0,
                     "total_cost": 42000.0 }
          },
          "summary": { "total": { "job_title": "Итого", "total_cost": 42000.0 } }
        }
      }
    }
  }
}"#;

fn setup_test_env() -> (TempDir, PathBuf, PathBuf) {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path().to_path_buf();

    let config_dir = root.join("config");
    fs::create_dir_all(&config_dir).unwrap();

    let config_content = format!(
        r#"[db]
path = "{}/data/tender.sqlite"

[matching]
norm_version = 1
cache_ttl_days = 30

[logging]
filter = "warn"
"#,
        root.display()
    );
    let config_path = config_dir.join("tender.toml");
    fs::write(&config_path, config_content).unwrap();

    let document_path = root.join("tender.json");
    fs::write(&document_path, DOCUMENT).unwrap();

    (tmp, config_path, document_path)
}

fn run_tender(config_path: &Path, args: &[&str]) -> (String, String, bool) {
    let binary = tender_binary();
    let output = Command::new(&binary)
        .arg("--config")
        .arg(config_path.to_str().unwrap())
        .args(args)
        .output()
        .unwrap_or_else(|e| panic!("Failed to run tender binary at {:?}: {}", binary, e));

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();
    let success = output.status.success();
    (stdout, stderr, success)
}

fn import_document(config_path: &Path, document_path: &Path) -> String {
    run_tender(config_path, &["init"]);
    let (stdout, stderr, success) =
        run_tender(config_path, &["import", document_path.to_str().unwrap()]);
    assert!(success, "import failed: stdout={}, stderr={}", stdout, stderr);
    stdout
}

fn json(stdout: &str) -> serde_json::Value {
    serde_json::from_str(stdout).unwrap_or_else(|e| panic!("not JSON ({}): {}", e, stdout))
}

#[test]
fn test_init_creates_database() {
    let (_tmp, config_path, _) = setup_test_env();

    let (stdout, stderr, success) = run_tender(&config_path, &["init"]);
    assert!(success, "init failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("initialized"));
}

#[test]
fn test_init_idempotent() {
    let (_tmp, config_path, _) = setup_test_env();

    let (_, _, success1) = run_tender(&config_path, &["init"]);
    assert!(success1, "First init failed");

    let (_, _, success2) = run_tender(&config_path, &["init"]);
    assert!(success2, "Second init failed (not idempotent)");
}

#[test]
fn test_import_reports_pending_items() {
    let (_tmp, config_path, document_path) = setup_test_env();

    let stdout = import_document(&config_path, &document_path);
    assert!(stdout.contains("import ETP-2024-0117"));
    assert!(stdout.contains("position items: 2 (0 unchanged)"));
    assert!(stdout.contains("pending items: 1"));
    assert!(stdout.contains("new pending: true"));
    assert!(stdout.contains("ok"));
}

#[test]
fn test_reimport_changes_nothing() {
    let (_tmp, config_path, document_path) = setup_test_env();

    let first = import_document(&config_path, &document_path);
    let (second, _, success) =
        run_tender(&config_path, &["import", document_path.to_str().unwrap()]);
    assert!(success);

    let tender_line = |out: &str| {
        out.lines()
            .find(|l| l.contains("tender id:"))
            .map(str::to_string)
    };
    assert_eq!(tender_line(&first), tender_line(&second));
    assert!(second.contains("position items: 2 (2 unchanged)"));
}

#[test]
fn test_import_malformed_document_fails() {
    let (tmp, config_path, _) = setup_test_env();
    let bad = tmp.path().join("bad.json");
    fs::write(&bad, "{\"tender_id\": ").unwrap();

    run_tender(&config_path, &["init"]);
    let (_, stderr, success) = run_tender(&config_path, &["import", bad.to_str().unwrap()]);
    assert!(!success);
    assert!(stderr.contains("invalid tender payload"));
}

#[test]
fn test_raw_returns_stored_bytes() {
    let (_tmp, config_path, document_path) = setup_test_env();
    import_document(&config_path, &document_path);

    let (stdout, _, success) = run_tender(&config_path, &["raw", "ETP-2024-0117"]);
    assert!(success);
    assert_eq!(stdout, DOCUMENT);
}

#[test]
fn test_raw_missing_tender() {
    let (_tmp, config_path, _) = setup_test_env();
    run_tender(&config_path, &["init"]);

    let (_, stderr, success) = run_tender(&config_path, &["raw", "ETP-404"]);
    assert!(!success);
    assert!(stderr.contains("not found"));
}

#[test]
fn test_match_flow_empties_feed() {
    let (_tmp, config_path, document_path) = setup_test_env();
    import_document(&config_path, &document_path);

    let (stdout, _, success) = run_tender(&config_path, &["match", "unmatched", "--limit", "5000"]);
    assert!(success);
    let feed = json(&stdout);
    let items = feed.as_array().unwrap();
    assert_eq!(items.len(), 1);
    assert_eq!(
        items[0]["rich_context"],
        "Раздел: Раздел 1. Кровля | Позиция: Демонтаж покрытия"
    );
    assert_eq!(items[0]["standard_job_title"], "демонтаж покрытие");

    let item = items[0]["position_item_id"].as_i64().unwrap().to_string();
    let catalog = items[0]["draft_catalog_id"].as_i64().unwrap().to_string();
    let hash = items[0]["job_title_hash"].as_str().unwrap().to_string();

    let (stdout, stderr, success) = run_tender(
        &config_path,
        &["match", "apply", "--item", &item, "--catalog", &catalog, "--hash", &hash],
    );
    assert!(success, "apply failed: stdout={}, stderr={}", stdout, stderr);

    let (stdout, _, _) = run_tender(&config_path, &["match", "unmatched"]);
    assert_eq!(json(&stdout), serde_json::json!([]));
}

#[test]
fn test_catalog_indexing_flow() {
    let (_tmp, config_path, document_path) = setup_test_env();
    import_document(&config_path, &document_path);

    let (stdout, _, success) = run_tender(&config_path, &["catalog", "pending"]);
    assert!(success);
    let pending = json(&stdout);
    let pending = pending.as_array().unwrap();
    assert_eq!(pending.len(), 1);
    assert_eq!(
        pending[0]["description"],
        "Работа: демонтаж покрытие | Ед. изм.: м2"
    );

    let id = pending[0]["id"].as_i64().unwrap().to_string();
    let (stdout, _, success) = run_tender(&config_path, &["catalog", "activate", &id]);
    assert!(success);
    assert!(stdout.contains("activated: 1"));

    let (stdout, _, _) = run_tender(&config_path, &["catalog", "active"]);
    assert_eq!(json(&stdout).as_array().unwrap().len(), 1);

    let (stdout, _, _) = run_tender(&config_path, &["catalog", "pending"]);
    assert_eq!(json(&stdout), serde_json::json!([]));
}

#[test]
fn test_active_rejects_zero_limit() {
    let (_tmp, config_path, _) = setup_test_env();
    run_tender(&config_path, &["init"]);

    let (_, stderr, success) = run_tender(&config_path, &["catalog", "active", "--limit", "0"]);
    assert!(!success);
    assert!(stderr.contains("limit must be positive"));
}

#[test]
fn test_self_merge_is_ignored() {
    let (_tmp, config_path, _) = setup_test_env();
    run_tender(&config_path, &["init"]);

    let (stdout, _, success) = run_tender(
        &config_path,
        &["catalog", "merge", "--main", "7", "--duplicate", "7", "--score", "0.99"],
    );
    assert!(success);
    assert!(stdout.contains("ignored self-merge"));

    let (stdout, _, _) = run_tender(&config_path, &["catalog", "merges"]);
    assert_eq!(json(&stdout), serde_json::json!([]));
}

#[test]
fn test_stats_and_cache_purge() {
    let (_tmp, config_path, document_path) = setup_test_env();
    import_document(&config_path, &document_path);

    let (stdout, _, success) = run_tender(&config_path, &["stats"]);
    assert!(success);
    assert!(stdout.contains("Tenders:"));
    assert!(stdout.contains("Unmatched items:"));

    let (stdout, _, success) = run_tender(&config_path, &["cache", "purge"]);
    assert!(success);
    assert!(stdout.contains("purged 0 expired cache entries"));
}
