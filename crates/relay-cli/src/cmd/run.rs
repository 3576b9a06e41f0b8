//! `relay run`: boot a manager with the bundled applications and run one.

use crate::ui;
use relay_apps::register_bundled;
use relay_kernel::ApplicationManager;
use relay_types::config::RelayConfig;
use tracing::info;

pub fn cmd_run(config: &RelayConfig, url: &str, args: Vec<String>) {
    let rt = match tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
    {
        Ok(rt) => rt,
        Err(e) => {
            ui::error(&format!("Failed to start the async runtime: {e}"));
            std::process::exit(1);
        }
    };

    rt.block_on(async {
        let manager = ApplicationManager::with_config(config);
        register_bundled(&manager);
        if !args.is_empty() {
            let mut full = Vec::with_capacity(args.len() + 1);
            full.push(url.to_string());
            full.extend(args);
            manager.set_args_for_url(url, full);
        }

        let app = match manager.run(url).await {
            Ok(app) => app,
            Err(e) => {
                ui::error(&format!("Failed to start {url}: {e}"));
                ui::hint("Run `relay list` to see the bundled applications.");
                std::process::exit(1);
            }
        };

        tokio::select! {
            _ = app.wait() => {
                info!(url, "Application quit");
                ui::success(&format!("{url} finished"));
            }
            _ = tokio::signal::ctrl_c() => info!(url, "Interrupted"),
        }
        manager.shutdown();
    });
}
