//! Интеграционные тесты на временном дереве Herd.
//!
//! Внешние команды заменены: листинг задается заранее,
//! перезапуск nginx только подсчитывается.

use std::fs;

use herd_manager::config::{HerdPaths, MasterConfig};
use herd_manager::error::ErrorCategory;
use herd_manager::herd::StaticListing;
use herd_manager::ports::StaticPortProbe;
use herd_manager::proxies::{JsonFileStore, ProxyStore};
use herd_manager::restart::RecordingRestarter;
use herd_manager::sites::ApplyStep;
use herd_manager::{DesiredSite, ProxyRegistry, SiteManager, SiteType};
use tempfile::{tempdir, TempDir};

const MASTER_CONF: &str = "\
worker_processes 1;

http {
    include mime.types;
    include a-local.conf;
    include c-local.conf;
    include herd.conf;
    client_max_body_size 512M;
}
";

struct HerdTree {
    _dir: TempDir,
    paths: HerdPaths,
    restarter: RecordingRestarter,
}

impl HerdTree {
    fn new() -> Self {
        let dir = tempdir().unwrap();
        let paths = HerdPaths::new(dir.path());
        fs::create_dir_all(paths.nginx_dir()).unwrap();
        fs::create_dir_all(paths.valet_nginx_dir()).unwrap();
        fs::write(paths.master_config(), MASTER_CONF).unwrap();

        Self {
            _dir: dir,
            paths,
            restarter: RecordingRestarter::new(),
        }
    }

    fn site_manager(&self, listing: StaticListing) -> SiteManager {
        SiteManager::new(self.paths.clone(), Box::new(listing), Box::new(self.restarter.clone()))
    }

    fn proxy_registry(&self) -> ProxyRegistry {
        ProxyRegistry::new(
            self.paths.clone(),
            Box::new(JsonFileStore::new(self.paths.proxies_file())),
            Box::new(self.restarter.clone()),
        )
    }

    fn master(&self) -> String {
        fs::read_to_string(self.paths.master_config()).unwrap()
    }
}

fn desired(name: &str, port: u16) -> DesiredSite {
    DesiredSite {
        name: name.to_string(),
        url: format!("http://{}.test", name),
        port,
    }
}

#[test]
fn test_listing_to_generated_config() {
    let tree = HerdTree::new();
    let listing = StaticListing::new().with_lines(
        SiteType::Parked,
        ["  | empresta-legal |          | http://empresta-legal.test | /Users/x/Sites/empresta-legal |"],
    );
    let manager = tree.site_manager(listing);

    let sites = manager.list_sites();
    assert_eq!(sites.len(), 1);
    let site = &sites[0];
    assert_eq!(site.name, "empresta-legal");
    assert_eq!(site.url, "http://empresta-legal.test");
    assert_eq!(site.path, "/Users/x/Sites/empresta-legal");
    assert_eq!(site.site_type, SiteType::Parked);

    let config = manager.generate_nginx_configuration(&DesiredSite::from(site)).unwrap();
    assert!(config.contains("listen 0.0.0.0:8000"));
    assert!(config.contains("proxy_set_header Host empresta-legal.test"));
}

#[test]
fn test_apply_reconciles_master_config() {
    let tree = HerdTree::new();
    let manager = tree.site_manager(StaticListing::new());
    fs::write(manager.configuration_path("c"), "server { listen 0.0.0.0:8003; }").unwrap();

    let report = manager.apply(&[desired("a", 8001), desired("b", 8002)]);
    assert!(report.is_success());

    let master = tree.master();
    assert_eq!(
        master,
        "\
worker_processes 1;

http {
    include mime.types;
    include a-local.conf;
    include herd.conf;
    include b-local.conf;
    client_max_body_size 512M;
}
"
    );
    assert!(!manager.configuration_path("c").exists());

    // повторное применение ничего не меняет
    assert!(manager.apply_changes(&[desired("a", 8001), desired("b", 8002)]));
    assert_eq!(tree.master(), master);
    assert_eq!(tree.restarter.count(), 2);
}

#[test]
fn test_exposed_state_round_trips_through_listing() {
    let tree = HerdTree::new();
    let listing = StaticListing::new()
        .with_lines(SiteType::Parked, ["| shop |  | http://shop.test | /srv/shop |"])
        .with_lines(SiteType::Linked, ["| blog |  | https://blog.test | /srv/blog |"]);
    let manager = tree.site_manager(listing);

    assert!(manager.apply_changes(&[desired("shop", 8123)]));

    let sites = manager.list_sites();
    let blog = sites.iter().find(|s| s.name == "blog").unwrap();
    let shop = sites.iter().find(|s| s.name == "shop").unwrap();

    assert!(!blog.exposed);
    assert_eq!(blog.port, 8000);
    assert!(shop.exposed);
    assert_eq!(shop.port, 8123);
}

#[test]
fn test_missing_anchor_is_reported_not_fixed() {
    let tree = HerdTree::new();
    fs::write(tree.paths.master_config(), "http {\n    include a-local.conf;\n}\n").unwrap();
    let manager = tree.site_manager(StaticListing::new());

    let report = manager.apply(&[desired("a", 8001), desired("new", 8002)]);

    assert!(report.is_success());
    let reconcile = report.reconcile.unwrap();
    assert!(!reconcile.anchor_found);
    assert_eq!(reconcile.pending_without_anchor, vec!["new-local.conf"]);

    let master = MasterConfig::load(tree.paths.master_config()).unwrap();
    assert_eq!(master.included_site_configs(), vec!["a-local.conf"]);
    assert!(manager.configuration_path("new").exists());
}

#[test]
fn test_apply_failure_keeps_partial_writes() {
    let tree = HerdTree::new();
    fs::remove_file(tree.paths.master_config()).unwrap();
    let manager = tree.site_manager(StaticListing::new());

    let report = manager.apply(&[desired("a", 8001)]);

    assert_eq!(report.failed_step(), Some(ApplyStep::ReconcileMaster));
    assert!(manager.configuration_path("a").exists());
    assert_eq!(tree.restarter.count(), 0);
}

#[test]
fn test_port_checks() {
    let tree = HerdTree::new();
    let manager = tree
        .site_manager(StaticListing::new())
        .with_port_probe(Box::new(StaticPortProbe::with_open_ports(&[8001])));

    for port in [0, -5, 65536, 100_000] {
        assert!(!manager.check_port_availability(port));
    }
    assert!(!manager.check_port_availability(8001));
    assert!(manager.check_port_availability(8002));

    let status = manager.ports().ports_status(&[8001], &[8002]);
    assert!(status.running);
}

#[test]
fn test_proxy_lifecycle_on_disk() {
    let tree = HerdTree::new();
    let registry = tree.proxy_registry();

    let created = registry.create_proxy("my-api", 3000).unwrap();
    assert_eq!(created.domain, "my-api.test");
    assert_eq!(created.port, 3000);

    // реестр перечитывается с диска новым экземпляром
    let proxies = tree.proxy_registry().list_proxies().unwrap();
    assert_eq!(proxies, vec![created.clone()]);

    let raw = fs::read_to_string(tree.paths.proxies_file()).unwrap();
    let json: serde_json::Value = serde_json::from_str(&raw).unwrap();
    assert_eq!(json["my-api"]["domain"], "my-api.test");
    assert_eq!(json["my-api"]["port"], 3000);

    let config = fs::read_to_string(tree.paths.proxy_config("my-api.test")).unwrap();
    assert!(config.contains("listen 127.0.0.1:80;"));
    assert!(config.contains("proxy_pass http://127.0.0.1:3000;"));

    registry.delete_proxy("my-api").unwrap();
    assert!(registry.list_proxies().unwrap().is_empty());
    assert!(!tree.paths.proxy_config("my-api.test").exists());
    assert_eq!(tree.restarter.count(), 2);
}

#[test]
fn test_proxy_conflict_and_not_found_leave_registry_untouched() {
    let tree = HerdTree::new();
    let registry = tree.proxy_registry();
    let first = registry.create_proxy("api", 4000).unwrap();
    let before = fs::read_to_string(tree.paths.proxies_file()).unwrap();

    let err = registry.create_proxy("api", 5000).unwrap_err();
    assert_eq!(err.category(), ErrorCategory::Conflict);
    assert_eq!(err.status_code(), 409);

    let err = registry.delete_proxy("ghost").unwrap_err();
    assert_eq!(err.category(), ErrorCategory::NotFound);
    assert_eq!(err.status_code(), 404);

    assert_eq!(fs::read_to_string(tree.paths.proxies_file()).unwrap(), before);
    assert_eq!(registry.list_proxies().unwrap(), vec![first]);
}

#[test]
fn test_proxies_listed_in_insertion_order() {
    let tree = HerdTree::new();
    let registry = tree.proxy_registry();

    for (name, port) in [("zulu", 3001), ("alpha", 3002), ("mike", 3003)] {
        registry.create_proxy(name, port).unwrap();
    }

    let names: Vec<_> = registry.list_proxies().unwrap().into_iter().map(|p| p.name).collect();
    assert_eq!(names, vec!["zulu", "alpha", "mike"]);

    let table = JsonFileStore::new(tree.paths.proxies_file()).load().unwrap();
    assert_eq!(table.len(), 3);
}

#[test]
fn test_registry_keeps_records_it_cannot_read() {
    let tree = HerdTree::new();
    fs::write(
        tree.paths.proxies_file(),
        r#"{
    "old-a": {"name": "old-a", "domain": "old-a.test", "port": 3000, "created_at": "2025-01-01 10:00:00"},
    "old-b": {"name": "old-b", "domain": "old-b.test", "port": 3001, "created_at": "2025-01-01T10:00:00"},
    "old-c": {"name": "old-c", "domain": "old-c.test", "port": 3002, "created_at": "last week"}
}"#,
    )
    .unwrap();
    let registry = tree.proxy_registry();

    let names: Vec<_> = registry.list_proxies().unwrap().into_iter().map(|p| p.name).collect();
    assert_eq!(names, vec!["old-a", "old-b"]);

    registry.create_proxy("new", 4000).unwrap();

    let raw = fs::read_to_string(tree.paths.proxies_file()).unwrap();
    let json: serde_json::Value = serde_json::from_str(&raw).unwrap();
    assert_eq!(json["old-a"]["port"], 3000);
    assert_eq!(json["old-b"]["created_at"], "2025-01-01 10:00:00");
    assert_eq!(json["old-c"]["created_at"], "last week");
    assert_eq!(json["new"]["port"], 4000);
}

#[test]
fn test_duplicate_desired_sites_collapse_on_disk() {
    let tree = HerdTree::new();
    let manager = tree.site_manager(StaticListing::new());

    assert!(manager.apply_changes(&[desired("a", 8001), desired("b", 8002), desired("a", 8005)]));

    let a = fs::read_to_string(manager.configuration_path("a")).unwrap();
    assert!(a.contains("listen 0.0.0.0:8005;"));

    let master = MasterConfig::load(tree.paths.master_config()).unwrap();
    assert_eq!(master.included_site_configs(), vec!["a-local.conf", "b-local.conf"]);
}
