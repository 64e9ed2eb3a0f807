use std::path::Path;
use std::sync::{Arc, Once};

use patchlog::{IdentityRegistry, LocalServer, ServerConfig};

static TRACING: Once = Once::new();

pub fn init_tracing() {
    TRACING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_test_writer()
            .with_max_level(tracing::Level::DEBUG)
            .try_init();
    });
}

pub fn test_config(root: &Path) -> ServerConfig {
    let mut config = ServerConfig::with_root(root);
    config.sync_on_write = false;
    config
}

pub fn start_server(root: &Path, registry: &Arc<IdentityRegistry>) -> LocalServer {
    init_tracing();
    LocalServer::attach(test_config(root), registry.clone()).unwrap()
}

/// Every path under `root`, sorted, for before/after comparisons.
pub fn list_tree(root: &Path) -> Vec<String> {
    let mut out = Vec::new();
    walk(root, root, &mut out);
    out.sort();
    out
}

fn walk(root: &Path, dir: &Path, out: &mut Vec<String>) {
    for entry in std::fs::read_dir(dir).unwrap() {
        let path = entry.unwrap().path();
        out.push(path.strip_prefix(root).unwrap().display().to_string());
        if path.is_dir() {
            walk(root, &path, out);
        }
    }
}
