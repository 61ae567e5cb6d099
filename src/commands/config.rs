//! Config command handlers: show effective configuration.

use authcache_core::LoadedConfig;

pub fn run_config_show_command(loaded: &LoadedConfig) {
    let config = &loaded.config;

    println!(
        "config_file = {}",
        loaded.path.as_ref().map_or_else(
            || "not found (using defaults)".to_string(),
            |path| path.display().to_string(),
        )
    );
    println!("state_dir = {}", config.state_dir.display());
    println!("force_fresh = {}", config.force_fresh);
    println!("reuse_enabled = {}", config.reuse_enabled);
    println!("max_age_hours = {}", config.max_age_hours);
    println!("fresh_keywords = {}", config.fresh_keywords.join(","));
    println!("probe_timeout_ms = {}", config.probe_timeout_ms);
    println!("legacy_probe_timeout_ms = {}", config.legacy_probe_timeout_ms);
    println!("settle_delay_ms = {}", config.settle_delay_ms);
    println!("lock_timeout_ms = {}", config.lock_timeout_ms);
    println!("default_url = {}", config.default_url);
    for (kind, url) in &config.base_urls {
        println!("base_urls.{kind} = {url}");
    }
    println!("sites = {}", config.sites.len());
    for site in &config.sites {
        println!(
            "site.{} = {}",
            site.kind.as_deref().unwrap_or(&site.keyword),
            site.base_url
        );
    }
}
