#![allow(deprecated)]
use assert_cmd::Command;
use predicates::prelude::*;
use std::io::Read;
use std::path::Path;
use tempfile::TempDir;

const CRM_MANIFEST: &str = "\
composition_root:
  path: backend/server.js
core:
  routes: [customers.js]
features:
  invoices:
    routes: [invoices.js]
modules:
  - { file: customers.js, symbol: customersRouter, mount: /api/customers }
  - { file: invoices.js, symbol: invoicesRouter, mount: /api/invoices }
";

fn kitforge(dir: &TempDir) -> Command {
    let mut cmd = Command::cargo_bin("kitforge").unwrap();
    cmd.current_dir(dir.path()).env("KITFORGE_ROOT", dir.path());
    for key in [
        "KITFORGE_ENV",
        "KITFORGE_TEMPLATES",
        "KITFORGE_DATA_DIR",
        "KITFORGE_STORAGE",
        "KITFORGE_S3_BUCKET",
        "GITHUB_TOKEN",
        "GITHUB_OWNER",
        "RENDER_API_KEY",
        "RENDER_OWNER_ID",
    ] {
        cmd.env_remove(key);
    }
    cmd
}

fn write(path: &Path, contents: &str) {
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    std::fs::write(path, contents).unwrap();
}

/// A site template plus a CRM template with a feature manifest.
fn init_templates(dir: &TempDir) {
    let t = dir.path().join("templates");
    write(&t.join("site/index.html"), "<title>{{COMPANY_NAME}}</title>\n");
    write(&t.join("site/src/data/settings.json"), "{}\n");
    write(&t.join("site/package.json"), "{\"name\": \"{{COMPANY_SLUG}}\"}\n");

    write(&t.join("crm/feature-manifest.yaml"), CRM_MANIFEST);
    write(
        &t.join("crm/backend/server.js"),
        "// factory:imports:start\n// factory:imports:end\n// factory:mounts:start\n// factory:mounts:end\n",
    );
    write(&t.join("crm/backend/routes/customers.js"), "module.exports = {};\n");
    write(&t.join("crm/backend/routes/invoices.js"), "module.exports = {};\n");
}

fn write_site_config(dir: &TempDir, company: &str) -> std::path::PathBuf {
    let path = dir.path().join("acme.yaml");
    write(
        &path,
        &format!("products: [site]\ncompany:\n  name: {company}\nbranding:\n  primary_color: \"#0f766e\"\n"),
    );
    path
}

/// Generate a site build and return its JSON summary.
fn generate(dir: &TempDir, company: &str) -> serde_json::Value {
    let config = write_site_config(dir, company);
    let output = kitforge(dir)
        .args(["--json", "generate"])
        .arg(&config)
        .output()
        .unwrap();
    assert!(output.status.success(), "{}", String::from_utf8_lossy(&output.stderr));
    serde_json::from_slice(&output.stdout).unwrap()
}

// ---------------------------------------------------------------------------
// kitforge generate
// ---------------------------------------------------------------------------

#[test]
fn generate_prints_summary_and_password() {
    let dir = TempDir::new().unwrap();
    init_templates(&dir);
    let config = write_site_config(&dir, "Acme Roofing");

    kitforge(&dir)
        .arg("generate")
        .arg(&config)
        .assert()
        .success()
        .stdout(predicate::str::contains("Tenant:    acme-roofing"))
        .stdout(predicate::str::contains("Admin password (shown once)"));
}

#[test]
fn generate_produces_archive_with_substituted_tokens() {
    let dir = TempDir::new().unwrap();
    init_templates(&dir);
    let built = generate(&dir, "Acme Roofing");

    let key = built["storage"]["key"].as_str().unwrap();
    let file = std::fs::File::open(key).unwrap();
    let mut archive = zip::ZipArchive::new(file).unwrap();
    let index_name = archive
        .file_names()
        .find(|n| n.ends_with("index.html"))
        .unwrap()
        .to_string();
    let mut html = String::new();
    archive
        .by_name(&index_name)
        .unwrap()
        .read_to_string(&mut html)
        .unwrap();
    assert!(html.contains("<title>Acme Roofing</title>"));
}

#[test]
fn generate_with_explicit_tenant() {
    let dir = TempDir::new().unwrap();
    init_templates(&dir);
    let config = write_site_config(&dir, "Acme");

    kitforge(&dir)
        .args(["generate", "--tenant", "acme-west"])
        .arg(&config)
        .assert()
        .success();
    kitforge(&dir)
        .args(["tenant", "show", "acme-west"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Status:   generated"));
}

#[test]
fn generate_rejects_unknown_feature() {
    let dir = TempDir::new().unwrap();
    init_templates(&dir);
    let config = dir.path().join("crm.yaml");
    write(
        &config,
        "products: [crm]\ncompany:\n  name: Acme\nfeatures:\n  crm: [teleportation]\n",
    );

    kitforge(&dir)
        .arg("generate")
        .arg(&config)
        .assert()
        .failure()
        .stderr(predicate::str::contains("teleportation"));
    assert!(!dir.path().join(".kitforge/archives").exists()
        || std::fs::read_dir(dir.path().join(".kitforge/archives")).unwrap().next().is_none());
}

#[test]
fn generate_rejects_bad_color() {
    let dir = TempDir::new().unwrap();
    init_templates(&dir);
    let config = dir.path().join("bad.yaml");
    write(
        &config,
        "products: [site]\ncompany:\n  name: Acme\nbranding:\n  primary_color: \"#zzz\"\n",
    );

    kitforge(&dir).arg("generate").arg(&config).assert().failure();
}

#[test]
fn generate_without_templates_fails() {
    let dir = TempDir::new().unwrap();
    let config = write_site_config(&dir, "Acme");

    kitforge(&dir)
        .arg("generate")
        .arg(&config)
        .assert()
        .failure()
        .stderr(predicate::str::contains("site"));
}

// ---------------------------------------------------------------------------
// kitforge builds
// ---------------------------------------------------------------------------

#[test]
fn builds_list_filters_by_tenant() {
    let dir = TempDir::new().unwrap();
    init_templates(&dir);
    generate(&dir, "Acme");
    generate(&dir, "Globex");

    kitforge(&dir)
        .args(["builds", "list"])
        .assert()
        .success()
        .stdout(predicate::str::contains("acme"))
        .stdout(predicate::str::contains("globex"));

    let output = kitforge(&dir)
        .args(["--json", "builds", "list", "--tenant", "globex"])
        .output()
        .unwrap();
    let list: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(list.as_array().unwrap().len(), 1);
    assert_eq!(list[0]["tenant_id"], "globex");
}

#[test]
fn builds_download_writes_archive() {
    let dir = TempDir::new().unwrap();
    init_templates(&dir);
    let built = generate(&dir, "Acme");
    let id = built["build_id"].as_str().unwrap();
    let out = dir.path().join("out/acme.zip");

    kitforge(&dir)
        .args(["builds", "download", id, "--out"])
        .arg(&out)
        .assert()
        .success()
        .stdout(predicate::str::contains("Wrote"));

    let bytes = std::fs::read(&out).unwrap();
    assert_eq!(bytes.len() as u64, built["size_bytes"].as_u64().unwrap());
}

#[test]
fn builds_regenerate_keeps_id() {
    let dir = TempDir::new().unwrap();
    init_templates(&dir);
    let built = generate(&dir, "Acme");
    let id = built["build_id"].as_str().unwrap();

    let output = kitforge(&dir)
        .args(["--json", "builds", "regenerate", id])
        .output()
        .unwrap();
    assert!(output.status.success());
    let again: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(again["build_id"], id);
    assert_eq!(again["archive_filename"], built["archive_filename"]);
    assert!(again["archive_filename"].as_str().unwrap().contains(&id[..8]));
    assert_eq!(again["storage"]["key"], built["storage"]["key"]);
    assert!(Path::new(again["storage"]["key"].as_str().unwrap()).exists());
}

#[test]
fn builds_delete_forgets_build() {
    let dir = TempDir::new().unwrap();
    init_templates(&dir);
    let built = generate(&dir, "Acme");
    let id = built["build_id"].as_str().unwrap();

    kitforge(&dir).args(["builds", "delete", id]).assert().success();
    kitforge(&dir)
        .args(["builds", "show", id])
        .assert()
        .failure()
        .stderr(predicate::str::contains("not found"));
}

// ---------------------------------------------------------------------------
// kitforge tenant
// ---------------------------------------------------------------------------

#[test]
fn tenant_list_and_billing() {
    let dir = TempDir::new().unwrap();
    init_templates(&dir);
    generate(&dir, "Acme");

    kitforge(&dir)
        .args(["tenant", "list"])
        .assert()
        .success()
        .stdout(predicate::str::contains("generated"));

    kitforge(&dir)
        .args(["tenant", "billing", "acme", "--customer", "cus_42"])
        .assert()
        .success();
    kitforge(&dir)
        .args(["tenant", "show", "acme"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Billing:  cus_42"));
}

#[test]
fn tenant_show_unknown_fails() {
    let dir = TempDir::new().unwrap();
    kitforge(&dir).args(["tenant", "show", "nobody"]).assert().failure();
}

// ---------------------------------------------------------------------------
// kitforge manifest / config / deploy
// ---------------------------------------------------------------------------

#[test]
fn manifest_check_passes_for_complete_template() {
    let dir = TempDir::new().unwrap();
    init_templates(&dir);

    kitforge(&dir)
        .args(["manifest", "check"])
        .assert()
        .success()
        .stdout(predicate::str::contains("crm: ok (1 features)"))
        .stdout(predicate::str::contains("site: no feature manifest"));
}

#[test]
fn manifest_check_reports_missing_files() {
    let dir = TempDir::new().unwrap();
    init_templates(&dir);
    std::fs::remove_file(dir.path().join("templates/crm/backend/routes/invoices.js")).unwrap();

    kitforge(&dir)
        .args(["manifest", "check", "--product", "crm"])
        .assert()
        .failure()
        .stdout(predicate::str::contains("backend/routes/invoices.js"));
}

#[test]
fn config_validate_warns_without_failing() {
    let dir = TempDir::new().unwrap();
    kitforge(&dir)
        .args(["config", "validate"])
        .assert()
        .success()
        .stdout(predicate::str::contains("[warning]"));
}

#[test]
fn config_validate_fails_for_local_storage_in_production() {
    let dir = TempDir::new().unwrap();
    write(&dir.path().join("kitforge.yaml"), "environment: production\n");
    kitforge(&dir)
        .args(["config", "validate"])
        .assert()
        .failure()
        .stdout(predicate::str::contains("[error]"));
}

#[test]
fn config_show_hides_credentials() {
    let dir = TempDir::new().unwrap();
    kitforge(&dir)
        .env("GITHUB_TOKEN", "ghp_secret")
        .args(["config", "show"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Deployments:  disabled"))
        .stdout(predicate::str::contains("ghp_secret").not());
}

#[test]
fn deploy_without_credentials_fails() {
    let dir = TempDir::new().unwrap();
    init_templates(&dir);
    generate(&dir, "Acme");

    kitforge(&dir)
        .args(["deploy", "status", "acme"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("deployment is not configured"));
}
