//! `relay list` and `relay config`.

use crate::ui;
use relay_apps::bundled_urls;
use relay_kernel::config::default_config_path;
use relay_types::config::RelayConfig;

pub fn cmd_list(json: bool) {
    let urls = bundled_urls();
    if json {
        let names: Vec<&str> = urls.iter().map(|u| u.as_str()).collect();
        match serde_json::to_string_pretty(&names) {
            Ok(out) => println!("{out}"),
            Err(e) => {
                ui::error(&format!("Failed to encode list: {e}"));
                std::process::exit(1);
            }
        }
        return;
    }
    ui::section("Bundled applications");
    ui::blank();
    for url in &urls {
        println!("    {url}");
    }
}

pub fn cmd_config(config: &RelayConfig, path: Option<&std::path::Path>) {
    let path = path
        .map(|p| p.to_path_buf())
        .unwrap_or_else(default_config_path);
    ui::kv("Config file", &path.display().to_string());
    ui::kv("Mappings", &config.mappings.len().to_string());
    ui::kv("Apps", &config.apps.len().to_string());
    ui::blank();
    match toml::to_string_pretty(config) {
        Ok(out) => println!("{out}"),
        Err(e) => {
            ui::error(&format!("Failed to render config: {e}"));
            std::process::exit(1);
        }
    }
}
