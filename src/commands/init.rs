use crate::config::CONFIG_FILE_NAME;
use anyhow::Result;
use std::path::Path;

const DEFAULT_CONFIG: &str = r#"# metricore configuration

[engine]
# max_workers = 8
batch_timeout_ms = 60000
memory_ceiling_bytes = 536870912
memory_cost_factor = 4.0
pool_idle_timeout_ms = 30000
emergency_breach_limit = 3

[engine.thresholds]
sequential_below_items = 8
process_pool_min_items = 64
heavy_item_cost = 262144
isolate_item_cost = 16777216

[engine.cache]
# location = "/var/cache/metricore"
max_age_days = 30
max_size_bytes = 536870912
max_entries = 100000
sync_writes = false
checkpoint_records = 1024
lock_timeout_ms = 30000
"#;

/// Write a starter `metricore.toml` into `dir`.
pub fn init_config(dir: &Path, force: bool) -> Result<()> {
    let config_path = dir.join(CONFIG_FILE_NAME);

    if config_path.exists() && !force {
        anyhow::bail!(
            "{} already exists. Use --force to overwrite.",
            config_path.display()
        );
    }

    std::fs::write(&config_path, DEFAULT_CONFIG)?;
    println!("Created {}", config_path.display());
    Ok(())
}
